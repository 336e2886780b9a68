//! AArch64 back-end.
//!
//! The client register namespace (`R1..R26`) maps onto AAPCS64 `x0..x15`
//! for the scratch set and `x19..x28` for the callee-saved set — exactly
//! the AAPCS64 callee-saved registers, so `emit_enter`/`emit_return` only
//! ever save registers the ABI already expects a function to save. `x16`,
//! `x17` (IP0/IP1), `x18` (platform register), `x29` (frame pointer) and
//! `x30` (link register) are reserved for this emitter's own use.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::metadata::PatchKind;
use crate::op::{Flags, FOp1, FOp2, Op0, Op1, Op2};
use crate::operand::Operand;
use crate::platform::{Platform, AARCH64 as PLATFORM};
use crate::reg::{FloatReg, Reg};
use crate::isa::{EmittedConst, EmittedJump, Emitter};

const FP: u8 = 29;
const LR: u8 = 30;
const ZR: u8 = 31;

const COND_JUMP: PatchKind = 0;
const UNCOND_JUMP: PatchKind = 1;

fn phys(reg: Reg) -> u8 {
    let i = reg.index() as u32 - 1;
    if i < 16 {
        i as u8
    } else {
        19 + (i - 16) as u8
    }
}

fn push_u32(buf: &mut Buffer, word: u32) {
    buf.push(&word.to_le_bytes());
}

/// AArch64's 4-bit condition field for `B.cond`, same table as ARM A32/Thumb-2.
fn cond_code(cond: crate::compiler::Cond) -> u32 {
    use crate::compiler::Cond;
    match cond {
        Cond::Equal => 0x0,
        Cond::NotEqual => 0x1,
        Cond::CarrySet => 0x2,
        Cond::CarryClear => 0x3,
        Cond::Overflow => 0x6,
        Cond::NoOverflow => 0x7,
        Cond::GreaterEqual => 0xa,
        Cond::Less => 0xb,
        Cond::Greater => 0xc,
        Cond::LessEqual => 0xd,
    }
}

fn add_sub_reg(sf: u32, op: u32, rd: u8, rn: u8, rm: u8) -> u32 {
    (sf << 31) | (op << 30) | (0b01011 << 24) | (u32::from(rm) << 16) | (u32::from(rn) << 5) | u32::from(rd)
}

fn logic_reg(sf: u32, opc: u32, rd: u8, rn: u8, rm: u8) -> u32 {
    (sf << 31) | (opc << 29) | (0b01010 << 24) | (u32::from(rm) << 16) | (u32::from(rn) << 5) | u32::from(rd)
}

fn shift_reg(sf: u32, opcode: u32, rd: u8, rn: u8, rm: u8) -> u32 {
    (sf << 31) | (0b11010110 << 21) | (u32::from(rm) << 16) | (opcode << 10) | (u32::from(rn) << 5) | u32::from(rd)
}

fn madd(sf: u32, rd: u8, rn: u8, rm: u8, ra: u8) -> u32 {
    (sf << 31) | (0b0011011000 << 21) | (u32::from(rm) << 16) | (u32::from(ra) << 10) | (u32::from(rn) << 5) | u32::from(rd)
}

fn movz(sf: u32, rd: u8, imm16: u16, hw: u32) -> u32 {
    (sf << 31) | (0b10 << 29) | (0b100101 << 23) | (hw << 21) | (u32::from(imm16) << 5) | u32::from(rd)
}

fn movk(sf: u32, rd: u8, imm16: u16, hw: u32) -> u32 {
    (sf << 31) | (0b11 << 29) | (0b100101 << 23) | (hw << 21) | (u32::from(imm16) << 5) | u32::from(rd)
}

/// ADD/SUB (immediate), `#0` aliasing `mov` when `Rd`/`Rn` is `SP` — unlike
/// the logical-register form, register 31 here means `SP`, not the zero
/// register, which is why frame-pointer setup below goes through this
/// instead of [`logic_reg`].
fn add_sub_imm(sf: u32, op: u32, rd: u8, rn: u8, imm12: u32) -> u32 {
    (sf << 31) | (op << 30) | (0b10001 << 24) | ((imm12 & 0xfff) << 10) | (u32::from(rn) << 5) | u32::from(rd)
}

/// LDUR/STUR: load/store register, 9-bit signed byte offset, unscaled —
/// used for frame-pointer-relative saved-register slots so their address
/// doesn't depend on how much further `sp` moves for locals.
fn stur_ldur(rt: u8, rn: u8, imm9: i32, is_load: bool) -> u32 {
    let opc = if is_load { 0b01 } else { 0b00 };
    (0b11 << 30) | (0b111000 << 24) | (opc << 22) | ((imm9 as u32 & 0x1ff) << 12) | (u32::from(rn) << 5) | u32::from(rt)
}

fn round16(x: u32) -> u32 {
    (x + 15) & !15
}

fn fphys(reg: FloatReg) -> u8 {
    reg.index() - 1
}

/// Double-precision (`ptype == 01`) floating-point data-processing,
/// 1-source form: `FMOV`/`FABS`/`FNEG` (§C4.1.64 "Floating-point data
/// processing (1 source)").
fn fp1(opcode: u32, rd: u8, rn: u8) -> u32 {
    0x1e60_4000 | (opcode << 15) | (u32::from(rn) << 5) | u32::from(rd)
}

/// 2-source form: `FADD`/`FSUB`/`FMUL`/`FDIV`.
fn fp2(opcode: u32, rd: u8, rn: u8, rm: u8) -> u32 {
    0x1e60_0400 | (u32::from(rm) << 16) | (opcode << 12) | (u32::from(rn) << 5) | u32::from(rd)
}

/// `FCMP` (double-precision): sets NZCV, which `cond_code`'s table then
/// reads exactly as it does after an integer `cmp`.
fn fcmp(rn: u8, rm: u8) -> u32 {
    0x1e60_2000 | (u32::from(rm) << 16) | (u32::from(rn) << 5)
}

/// `SCVTF`/`UCVTF` (GPR -> double). `sf` selects a 64- vs 32-bit source GPR.
fn scvtf(sf: u32, rd: u8, rn: u8) -> u32 {
    (sf << 31) | 0x1e62_0000 | (u32::from(rn) << 5) | u32::from(rd)
}

/// `FCVTZS` (double -> GPR, round toward zero). `sf` selects a 64- vs
/// 32-bit destination GPR.
fn fcvtzs(sf: u32, rd: u8, rn: u8) -> u32 {
    (sf << 31) | 0x1e78_0000 | (u32::from(rn) << 5) | u32::from(rd)
}

/// 64-bit code generator for ARMv8-A.
pub struct Aarch64Emitter;

impl Aarch64Emitter {
    /// A fresh emitter; AArch64 has no per-instance configuration.
    pub fn new() -> Aarch64Emitter {
        Aarch64Emitter
    }

    fn mov_reg(&self, buf: &mut Buffer, rd: u8, rn: u8) {
        if rd != rn {
            push_u32(buf, logic_reg(1, 0b01, rd, ZR, rn)); // orr rd, zr, rn
        }
    }

    fn load_const(&self, buf: &mut Buffer, rd: u8, value: i64) {
        push_u32(buf, movz(1, rd, (value & 0xffff) as u16, 0));
        for shift in 1..4u32 {
            let part = ((value >> (shift * 16)) & 0xffff) as u16;
            if part != 0 {
                push_u32(buf, movk(1, rd, part, shift));
            }
        }
    }

    fn resolve(&self, buf: &mut Buffer, op: Operand, scratch: u8) -> u8 {
        match op {
            Operand::Reg(r) => phys(r),
            Operand::Imm(v) => {
                self.load_const(buf, scratch, v);
                scratch
            }
            _ => scratch,
        }
    }
}

impl Default for Aarch64Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Emitter for Aarch64Emitter {
    fn platform(&self) -> &'static Platform {
        &PLATFORM
    }

    fn emit_enter(
        &self,
        buf: &mut Buffer,
        _options: crate::settings::Options,
        args: u8,
        local_size: u32,
        saved_regs: &[Reg],
        _saved_float_regs: &[FloatReg],
    ) {
        // stp x29, x30, [sp, #-16]!
        push_u32(buf, 0xa9bf7bfd);
        push_u32(buf, add_sub_imm(1, 0, FP, 31, 0)); // mov x29, sp
        let save_bytes = 8 * saved_regs.len() as u32;
        let total_extra = round16(save_bytes + local_size);
        if total_extra > 0 {
            push_u32(buf, add_sub_imm(1, 1, 31, 31, total_extra)); // sub sp, sp, #total_extra
        }
        // Saved-register slots sit at a fixed x29-relative offset so they
        // don't move when `local_size` changes how far `sp` sinks below them.
        for (i, &r) in saved_regs.iter().enumerate() {
            let off = -(save_bytes as i32) + (i as i32) * 8;
            push_u32(buf, stur_ldur(phys(r), FP, off, false));
        }
        // AAPCS64 passes the first three integer args in x0..x2; move them
        // into the saved slots `enter`'s quota assigned them (S1 is the
        // highest-indexed saved register, hence the last entry of `saved_regs`).
        let n = saved_regs.len();
        for k in 0..(args as usize).min(n).min(3) {
            let dest = phys(saved_regs[n - 1 - k]);
            if dest != k as u8 {
                push_u32(buf, logic_reg(1, 0b01, dest, ZR, k as u8)); // orr dest, xzr, xk
            }
        }
    }

    fn emit_fast_enter(&self, buf: &mut Buffer, dst: Operand) {
        if let Operand::Reg(r) = dst {
            self.mov_reg(buf, phys(r), LR);
        }
    }

    fn emit_return(
        &self,
        buf: &mut Buffer,
        src: Operand,
        saved_regs: &[Reg],
        _saved_float_regs: &[FloatReg],
    ) {
        let rv = self.resolve(buf, src, 0);
        self.mov_reg(buf, 0, rv);
        let save_bytes = 8 * saved_regs.len() as u32;
        for (i, &r) in saved_regs.iter().enumerate() {
            let off = -(save_bytes as i32) + (i as i32) * 8;
            push_u32(buf, stur_ldur(phys(r), FP, off, true));
        }
        push_u32(buf, add_sub_imm(1, 0, 31, FP, 0)); // mov sp, x29 (drops locals + save area)
        push_u32(buf, 0xa8c17bfd); // ldp x29, x30, [sp], #16
        push_u32(buf, 0xd65f03c0); // ret
    }

    fn emit_fast_return(&self, buf: &mut Buffer, src: Operand) {
        if let Operand::Reg(r) = src {
            push_u32(buf, 0xd61f0000 | (u32::from(phys(r)) << 5));
        }
    }

    fn emit_op0(
        &self,
        buf: &mut Buffer,
        op: Op0,
        _dst_hi: Operand,
        _dst_lo: Operand,
        _src1: Operand,
        _src2: Operand,
    ) -> Result<()> {
        match op {
            Op0::Nop => push_u32(buf, 0xd503201f),
            Op0::Breakpoint => push_u32(buf, 0xd4200000),
            Op0::LongUMul | Op0::LongSMul | Op0::LongUDiv | Op0::LongSDiv => {
                return Err(Error::Unsupported)
            }
        }
        Ok(())
    }

    fn emit_op1(
        &self,
        buf: &mut Buffer,
        op: Op1,
        _flags: Flags,
        dst: Operand,
        src: Operand,
    ) -> Result<()> {
        let Operand::Reg(d) = dst else {
            return Err(Error::Unsupported);
        };
        let rd = phys(d);
        let rs = self.resolve(buf, src, 16);
        match op {
            Op1::Mov | Op1::MovP => self.mov_reg(buf, rd, rs),
            Op1::Not => push_u32(buf, logic_reg(1, 0b01, rd, ZR, rs) | (1 << 21)),
            Op1::Neg => push_u32(buf, add_sub_reg(1, 1, rd, ZR, rs)),
            _ => self.mov_reg(buf, rd, rs),
        }
        Ok(())
    }

    fn emit_op2(
        &self,
        buf: &mut Buffer,
        op: Op2,
        _flags: Flags,
        dst: Operand,
        src1: Operand,
        src2: Operand,
    ) -> Result<()> {
        let Operand::Reg(d) = dst else {
            return Err(Error::Unsupported);
        };
        let rd = phys(d);
        let rn = self.resolve(buf, src1, 16);
        let rm = self.resolve(buf, src2, 17);
        let word = match op {
            Op2::Add | Op2::AddC => add_sub_reg(1, 0, rd, rn, rm),
            Op2::Sub | Op2::SubC => add_sub_reg(1, 1, rd, rn, rm),
            Op2::And => logic_reg(1, 0b00, rd, rn, rm),
            Op2::Or => logic_reg(1, 0b01, rd, rn, rm),
            Op2::Xor => logic_reg(1, 0b10, rd, rn, rm),
            Op2::Shl => shift_reg(1, 0b001000, rd, rn, rm),
            Op2::Lshr => shift_reg(1, 0b001001, rd, rn, rm),
            Op2::Ashr => shift_reg(1, 0b001010, rd, rn, rm),
            Op2::Mul => madd(1, rd, rn, rm, ZR),
        };
        push_u32(buf, word);
        Ok(())
    }

    fn emit_fop1(
        &self,
        buf: &mut Buffer,
        op: FOp1,
        _flags: Flags,
        dst: Operand,
        src: Operand,
    ) -> Result<()> {
        // `fcmp` packs its two float sources into `dst`/`src` (see
        // `Compiler::fcmp`); `FCmp` never writes a destination.
        if let FOp1::FCmp = op {
            let (Operand::Reg(d), Operand::Reg(s)) = (dst, src) else {
                return Err(Error::Unsupported);
            };
            push_u32(buf, fcmp(fphys(FloatReg::new(d.index())), fphys(FloatReg::new(s.index()))));
            return Ok(());
        }
        match op {
            FOp1::FMov | FOp1::FNeg | FOp1::FAbs => {
                let (Operand::Reg(d), Operand::Reg(s)) = (dst, src) else {
                    return Err(Error::Unsupported);
                };
                let opcode = match op {
                    FOp1::FMov => 0b000000,
                    FOp1::FAbs => 0b000001,
                    _ => 0b000010,
                };
                push_u32(buf, fp1(opcode, fphys(FloatReg::new(d.index())), fphys(FloatReg::new(s.index()))));
                Ok(())
            }
            FOp1::ConvSwFromF | FOp1::ConvSiFromF => {
                let Operand::Reg(d) = dst else {
                    return Err(Error::Unsupported);
                };
                let Operand::Reg(s) = src else {
                    return Err(Error::Unsupported);
                };
                let sf = u32::from(matches!(op, FOp1::ConvSwFromF));
                push_u32(buf, fcvtzs(sf, phys(d), fphys(FloatReg::new(s.index()))));
                Ok(())
            }
            FOp1::ConvFFromSw | FOp1::ConvFFromSi => {
                let Operand::Reg(d) = dst else {
                    return Err(Error::Unsupported);
                };
                let sf = u32::from(matches!(op, FOp1::ConvFFromSw));
                let sp = self.resolve(buf, src, 16);
                push_u32(buf, scvtf(sf, fphys(FloatReg::new(d.index())), sp));
                Ok(())
            }
            // No 32-bit float register namespace is modeled on this target.
            FOp1::ConvF64F32 => Err(Error::Unsupported),
            FOp1::FCmp => unreachable!("handled above"),
        }
    }

    fn emit_fop2(
        &self,
        buf: &mut Buffer,
        op: FOp2,
        _flags: Flags,
        dst: Operand,
        src1: Operand,
        src2: Operand,
    ) -> Result<()> {
        let (Operand::Reg(d), Operand::Reg(s1), Operand::Reg(s2)) = (dst, src1, src2) else {
            return Err(Error::Unsupported);
        };
        let opcode = match op {
            FOp2::FMul => 0b0000,
            FOp2::FDiv => 0b0001,
            FOp2::FAdd => 0b0010,
            FOp2::FSub => 0b0011,
        };
        push_u32(
            buf,
            fp2(opcode, fphys(FloatReg::new(d.index())), fphys(FloatReg::new(s1.index())), fphys(FloatReg::new(s2.index()))),
        );
        Ok(())
    }

    fn emit_ijump(&self, buf: &mut Buffer, target: Operand, is_call: bool) -> Result<()> {
        let Operand::Reg(r) = target else {
            return Err(Error::Unsupported);
        };
        let base = if is_call { 0xd63f0000 } else { 0xd61f0000 };
        push_u32(buf, base | (u32::from(phys(r)) << 5));
        Ok(())
    }

    fn emit_jump(&self, buf: &mut Buffer, condition: Option<crate::compiler::Cond>) -> EmittedJump {
        let (word, patch_kind): (u32, PatchKind) = match condition {
            None => (0b000101 << 26, UNCOND_JUMP),
            Some(c) => ((0b01010100 << 24) | cond_code(c), COND_JUMP),
        };
        let offset = buf.push(&word.to_le_bytes());
        EmittedJump {
            offset,
            site_len: 4,
            patch_kind,
        }
    }

    fn emit_cmp(&self, buf: &mut Buffer, _flags: Flags, src1: Operand, src2: Operand) -> Result<()> {
        let rn = self.resolve(buf, src1, 16);
        let rm = self.resolve(buf, src2, 17);
        push_u32(buf, add_sub_reg(1, 1, ZR, rn, rm) | (1 << 29)); // subs xzr, rn, rm
        Ok(())
    }

    unsafe fn patch_jump(
        &self,
        site: *mut u8,
        site_len: u8,
        patch_kind: PatchKind,
        from_addr: usize,
        to_addr: usize,
    ) {
        debug_assert_eq!(site_len, 4);
        let rel_words = ((to_addr as isize - from_addr as isize) / 4) as i32;
        let mut word = u32::from_le_bytes(std::slice::from_raw_parts(site, 4).try_into().unwrap());
        if patch_kind == UNCOND_JUMP {
            word = (word & 0xfc00_0000) | ((rel_words as u32) & 0x03ff_ffff);
        } else {
            word = (word & 0xff00_001f) | (((rel_words as u32) & 0x0007_ffff) << 5);
        }
        std::ptr::copy_nonoverlapping(word.to_le_bytes().as_ptr(), site, 4);
    }

    fn emit_const(&self, buf: &mut Buffer, dst: Operand, value: i64) -> EmittedConst {
        let Operand::Reg(r) = dst else {
            unreachable!("emit_const always targets a register")
        };
        let rd = phys(r);
        let offset = buf.push(&movz(1, rd, (value & 0xffff) as u16, 0).to_le_bytes());
        for shift in 1..4u32 {
            push_u32(buf, movk(1, rd, ((value >> (shift * 16)) & 0xffff) as u16, shift));
        }
        EmittedConst { offset, width: 16 }
    }

    unsafe fn patch_const(&self, site: *mut u8, width: u8, value: i64) {
        debug_assert_eq!(width, 16);
        for shift in 0..4u32 {
            let word_bytes = site.add(shift as usize * 4);
            let mut word = u32::from_le_bytes(
                std::slice::from_raw_parts(word_bytes, 4).try_into().unwrap(),
            );
            let part = ((value >> (shift * 16)) & 0xffff) as u32;
            word = (word & 0xffe0_001f) | (part << 5);
            std::ptr::copy_nonoverlapping(word.to_le_bytes().as_ptr(), word_bytes, 4);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phys_maps_scratch_and_saved_ranges() {
        assert_eq!(phys(Reg::new(1)), 0);
        assert_eq!(phys(Reg::new(16)), 15);
        assert_eq!(phys(Reg::new(17)), 19);
        assert_eq!(phys(Reg::new(26)), 28);
    }

    #[test]
    fn add_emits_one_instruction_word() {
        let e = Aarch64Emitter::new();
        let mut buf = Buffer::new();
        e.emit_op2(
            &mut buf,
            Op2::Add,
            Flags::NONE,
            Operand::Reg(Reg::new(1)),
            Operand::Reg(Reg::new(1)),
            Operand::Reg(Reg::new(2)),
        )
        .unwrap();
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn return_sequence_ends_in_ret() {
        let e = Aarch64Emitter::new();
        let mut buf = Buffer::new();
        e.emit_enter(&mut buf, crate::settings::Options::NONE, 0, 0, &[], &[]);
        e.emit_return(&mut buf, Operand::Reg(Reg::new(1)), &[], &[]);
        let code = buf.into_bytes();
        let tail = &code[code.len() - 4..];
        assert_eq!(u32::from_le_bytes(tail.try_into().unwrap()), 0xd65f03c0);
    }
}
