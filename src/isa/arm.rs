//! 32-bit ARM (A32 encoding), ARMv5 through ARMv7.
//!
//! Large or relocatable immediates route through `MOVW`/`MOVT` pairs rather
//! than a literal pool: ARMv7 always has them, and this emitter targets
//! that baseline (§4.6's literal-pool accounting is handled at the
//! compiler layer for the ARMv5 case, which this back-end does not attempt
//! to distinguish at the instruction-encoding level).

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::metadata::PatchKind;
use crate::op::{Flags, FOp1, FOp2, Op0, Op1, Op2};
use crate::operand::Operand;
use crate::platform::{Platform, ARM32 as PLATFORM};
use crate::reg::{FloatReg, Reg};
use crate::isa::{EmittedConst, EmittedJump, Emitter};

const AL: u32 = 0xe;
const SP: u8 = 13;
const LR: u8 = 14;
const PC: u8 = 15;

const UNCOND_JUMP: PatchKind = 0;
const COND_JUMP: PatchKind = 1;

fn phys(reg: Reg) -> u8 {
    reg.index() - 1
}

fn push_u32(buf: &mut Buffer, word: u32) {
    buf.push(&word.to_le_bytes());
}

fn dp_reg(cond: u32, opcode: u32, s: u32, rn: u8, rd: u8, rm: u8) -> u32 {
    (cond << 28) | (0 << 25) | (opcode << 21) | (s << 20) | (u32::from(rn) << 16) | (u32::from(rd) << 12) | u32::from(rm)
}

fn dp_imm(cond: u32, opcode: u32, s: u32, rn: u8, rd: u8, imm12: u32) -> u32 {
    (cond << 28) | (1 << 25) | (opcode << 21) | (s << 20) | (u32::from(rn) << 16) | (u32::from(rd) << 12) | (imm12 & 0xfff)
}

fn shift_reg(cond: u32, rd: u8, rm: u8, shift_type: u32, rs: u8) -> u32 {
    // MOV Rd, Rm, <shift_type> Rs
    (cond << 28) | (0b1101 << 21) | (u32::from(rd) << 12) | (u32::from(rs) << 8) | (shift_type << 5) | (1 << 4) | u32::from(rm)
}

fn mul(cond: u32, rd: u8, rm: u8, rs: u8) -> u32 {
    (cond << 28) | (u32::from(rd) << 16) | (u32::from(rs) << 8) | 0b1001 << 4 | u32::from(rm)
}

/// ARM's 4-bit condition field, shared by A32 and Thumb-2 branch encodings.
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

fn fphys(reg: FloatReg) -> u8 {
    reg.index() - 1
}

// VFPv3 double-precision encodings (A1). `Vn`/`Vd`/`Vm` fit in 4 bits
// unextended (D bit, N bit, M bit all 0) because this target never claims
// more than D0-D13.
const VADD_F64: u32 = 0xee30_0b00;
const VSUB_F64: u32 = 0xee30_0b40;
const VMUL_F64: u32 = 0xee20_0b00;
const VDIV_F64: u32 = 0xee80_0b00;
const VMOV_F64: u32 = 0xeeb0_0b40;
const VNEG_F64: u32 = 0xeeb1_0b40;
const VABS_F64: u32 = 0xeeb0_0bc0;
const VCMP_F64: u32 = 0xeeb4_0b40;
const VMRS: u32 = 0xeef1_fa10;
const VMOV_TO_S: u32 = 0xee00_0a10;
const VMOV_FROM_S: u32 = 0xee10_0a10;
const VCVT_F64_S32: u32 = 0xeeb8_0bc0;
const VCVT_S32_F64: u32 = 0xeebd_0bc0;

/// D14's low half: this target only ever claims D0-D13, so S28 is always
/// free to use as scratch when converting through a single-precision
/// register on the way to/from a GPR.
const SSCRATCH: u8 = 28;

fn vfp_3reg(base: u32, vn: u8, vd: u8, vm: u8) -> u32 {
    base | (u32::from(vn) << 16) | (u32::from(vd) << 12) | u32::from(vm)
}

fn vfp_2reg(base: u32, vd: u8, vm: u8) -> u32 {
    base | (u32::from(vd) << 12) | u32::from(vm)
}

fn vmov_to_s(sn: u8, rt: u8) -> u32 {
    VMOV_TO_S | (u32::from(sn >> 1) << 16) | (u32::from(rt) << 12) | (u32::from(sn & 1) << 7)
}

fn vmov_from_s(sn: u8, rt: u8) -> u32 {
    VMOV_FROM_S | (u32::from(sn >> 1) << 16) | (u32::from(rt) << 12) | (u32::from(sn & 1) << 7)
}

fn vcvt_f64_s32(dd: u8, sm: u8) -> u32 {
    VCVT_F64_S32 | (u32::from(dd) << 12) | (u32::from(sm & 1) << 5) | u32::from(sm >> 1)
}

fn vcvt_s32_f64(sd: u8, dm: u8) -> u32 {
    VCVT_S32_F64 | (u32::from(sd & 1) << 22) | (u32::from(sd >> 1) << 12) | u32::from(dm)
}

fn movw_movt(is_t: bool, rd: u8, imm16: u16) -> u32 {
    let imm4 = u32::from(imm16 >> 12);
    let imm12 = u32::from(imm16 & 0xfff);
    let base = if is_t { 0b0011_0100 } else { 0b0011_0000 };
    (AL << 28) | (base << 20) | (imm4 << 16) | (u32::from(rd) << 12) | imm12
}

/// Code generator for A32-encoded ARM.
pub struct ArmEmitter;

impl ArmEmitter {
    /// A fresh emitter.
    pub fn new() -> ArmEmitter {
        ArmEmitter
    }

    fn load_const(&self, buf: &mut Buffer, rd: u8, value: i64) {
        push_u32(buf, movw_movt(false, rd, value as u16));
        if (value >> 16) != 0 {
            push_u32(buf, movw_movt(true, rd, (value >> 16) as u16));
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

impl Default for ArmEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Emitter for ArmEmitter {
    fn platform(&self) -> &'static Platform {
        &PLATFORM
    }

    fn emit_enter(
        &self,
        buf: &mut Buffer,
        _options: crate::settings::Options,
        _args: u8,
        local_size: u32,
        saved_regs: &[Reg],
        _saved_float_regs: &[FloatReg],
    ) {
        let mut mask = 1u32 << LR;
        for &r in saved_regs {
            mask |= 1 << phys(r);
        }
        push_u32(buf, (AL << 28) | (0b1001_0010 << 20) | (u32::from(SP) << 16) | mask); // push {saved..., lr}
        if local_size > 0 {
            push_u32(buf, dp_reg(AL, 0b0010, 0, SP, SP, 0) | (local_size & 0xfff));
        }
    }

    fn emit_fast_enter(&self, buf: &mut Buffer, dst: Operand) {
        if let Operand::Reg(r) = dst {
            push_u32(buf, dp_reg(AL, 0b1101, 0, 0, phys(r), LR));
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
        if rv != 0 {
            push_u32(buf, dp_reg(AL, 0b1101, 0, 0, 0, rv)); // mov r0, r
        }
        let mut mask = 1u32 << PC;
        for &r in saved_regs {
            mask |= 1 << phys(r);
        }
        push_u32(buf, (AL << 28) | (0b1000_1011 << 20) | (u32::from(SP) << 16) | mask); // pop {saved..., pc}
    }

    fn emit_fast_return(&self, buf: &mut Buffer, src: Operand) {
        if let Operand::Reg(r) = src {
            push_u32(buf, dp_reg(AL, 0b1101, 0, 0, PC, phys(r))); // mov pc, r
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
            Op0::Nop => push_u32(buf, (AL << 28) | 0x0320_f000),
            Op0::Breakpoint => push_u32(buf, 0xe120_0070),
            _ => return Err(Error::Unsupported),
        }
        Ok(())
    }

    fn emit_op1(&self, buf: &mut Buffer, op: Op1, _flags: Flags, dst: Operand, src: Operand) -> Result<()> {
        let Operand::Reg(d) = dst else {
            return Err(Error::Unsupported);
        };
        let rd = phys(d);
        let rs = self.resolve(buf, src, 12);
        match op {
            Op1::Mov | Op1::MovP => push_u32(buf, dp_reg(AL, 0b1101, 0, 0, rd, rs)),
            Op1::Not => push_u32(buf, dp_reg(AL, 0b1111, 0, 0, rd, rs)), // mvn
            Op1::Neg => push_u32(buf, dp_imm(AL, 0b0011, 0, rs, rd, 0)), // rsb rd, rs, #0
            _ => push_u32(buf, dp_reg(AL, 0b1101, 0, 0, rd, rs)),
        }
        Ok(())
    }

    fn emit_op2(&self, buf: &mut Buffer, op: Op2, _flags: Flags, dst: Operand, src1: Operand, src2: Operand) -> Result<()> {
        let Operand::Reg(d) = dst else {
            return Err(Error::Unsupported);
        };
        let rd = phys(d);
        let rn = self.resolve(buf, src1, 12);
        let rm = self.resolve(buf, src2, 11);
        let word = match op {
            Op2::Add | Op2::AddC => dp_reg(AL, 0b0100, 0, rn, rd, rm),
            Op2::Sub | Op2::SubC => dp_reg(AL, 0b0010, 0, rn, rd, rm),
            Op2::And => dp_reg(AL, 0b0000, 0, rn, rd, rm),
            Op2::Or => dp_reg(AL, 0b1100, 0, rn, rd, rm),
            Op2::Xor => dp_reg(AL, 0b0001, 0, rn, rd, rm),
            Op2::Shl => shift_reg(AL, rd, rn, 0b00, rm),
            Op2::Lshr => shift_reg(AL, rd, rn, 0b01, rm),
            Op2::Ashr => shift_reg(AL, rd, rn, 0b10, rm),
            Op2::Mul => mul(AL, rd, rn, rm),
        };
        push_u32(buf, word);
        Ok(())
    }

    fn emit_fop1(&self, buf: &mut Buffer, op: FOp1, _flags: Flags, dst: Operand, src: Operand) -> Result<()> {
        // `fcmp` packs its two float sources into `dst`/`src` (see
        // `Compiler::fcmp`); `FCmp` never writes a destination. `VCMP.F64`
        // sets FPSCR, and `VMRS` copies it into APSR so the regular
        // integer-condition branch encoding (`cond_code`) reads it.
        if let FOp1::FCmp = op {
            let (Operand::Reg(d), Operand::Reg(s)) = (dst, src) else {
                return Err(Error::Unsupported);
            };
            push_u32(buf, vfp_2reg(VCMP_F64, fphys(FloatReg::new(d.index())), fphys(FloatReg::new(s.index()))));
            push_u32(buf, VMRS);
            return Ok(());
        }
        match op {
            FOp1::FMov | FOp1::FNeg | FOp1::FAbs => {
                let (Operand::Reg(d), Operand::Reg(s)) = (dst, src) else {
                    return Err(Error::Unsupported);
                };
                let dp = fphys(FloatReg::new(d.index()));
                let sp = fphys(FloatReg::new(s.index()));
                let base = match op {
                    FOp1::FMov => VMOV_F64,
                    FOp1::FNeg => VNEG_F64,
                    _ => VABS_F64,
                };
                push_u32(buf, vfp_2reg(base, dp, sp));
                Ok(())
            }
            FOp1::ConvSwFromF | FOp1::ConvSiFromF => {
                let (Operand::Reg(d), Operand::Reg(s)) = (dst, src) else {
                    return Err(Error::Unsupported);
                };
                let sp = fphys(FloatReg::new(s.index()));
                push_u32(buf, vcvt_s32_f64(SSCRATCH, sp));
                push_u32(buf, vmov_from_s(SSCRATCH, phys(d)));
                Ok(())
            }
            FOp1::ConvFFromSw | FOp1::ConvFFromSi => {
                let Operand::Reg(d) = dst else {
                    return Err(Error::Unsupported);
                };
                let dp = fphys(FloatReg::new(d.index()));
                let sp = self.resolve(buf, src, 12);
                push_u32(buf, vmov_to_s(SSCRATCH, sp));
                push_u32(buf, vcvt_f64_s32(dp, SSCRATCH));
                Ok(())
            }
            // This target only models double-precision registers; narrowing
            // to/from single precision has no representable destination.
            FOp1::ConvF64F32 => Err(Error::Unsupported),
            FOp1::FCmp => unreachable!("handled above"),
        }
    }

    fn emit_fop2(&self, buf: &mut Buffer, op: FOp2, _flags: Flags, dst: Operand, src1: Operand, src2: Operand) -> Result<()> {
        let (Operand::Reg(d), Operand::Reg(s1), Operand::Reg(s2)) = (dst, src1, src2) else {
            return Err(Error::Unsupported);
        };
        let dp = fphys(FloatReg::new(d.index()));
        let s1p = fphys(FloatReg::new(s1.index()));
        let s2p = fphys(FloatReg::new(s2.index()));
        let base = match op {
            FOp2::FAdd => VADD_F64,
            FOp2::FSub => VSUB_F64,
            FOp2::FMul => VMUL_F64,
            FOp2::FDiv => VDIV_F64,
        };
        push_u32(buf, vfp_3reg(base, s1p, dp, s2p));
        Ok(())
    }

    fn emit_ijump(&self, buf: &mut Buffer, target: Operand, is_call: bool) -> Result<()> {
        let Operand::Reg(r) = target else {
            return Err(Error::Unsupported);
        };
        let rm = phys(r);
        if is_call {
            push_u32(buf, (AL << 28) | 0x12f_ff3 << 4 | u32::from(rm)); // blx rm
        } else {
            push_u32(buf, (AL << 28) | 0x12f_ff1 << 4 | u32::from(rm)); // bx rm
        }
        Ok(())
    }

    fn emit_jump(&self, buf: &mut Buffer, condition: Option<crate::compiler::Cond>) -> EmittedJump {
        let (cond, patch_kind) = match condition {
            None => (AL, UNCOND_JUMP),
            Some(c) => (cond_code(c), COND_JUMP),
        };
        let word = (cond << 28) | (0b101 << 25);
        let offset = buf.push(&word.to_le_bytes());
        EmittedJump { offset, site_len: 4, patch_kind }
    }

    fn emit_cmp(&self, buf: &mut Buffer, _flags: Flags, src1: Operand, src2: Operand) -> Result<()> {
        let rn = self.resolve(buf, src1, 12);
        let rm = self.resolve(buf, src2, 11);
        push_u32(buf, dp_reg(AL, 0b1010, 1, rn, 0, rm)); // cmp rn, rm
        Ok(())
    }

    unsafe fn patch_jump(&self, site: *mut u8, site_len: u8, _patch_kind: PatchKind, from_addr: usize, to_addr: usize) {
        debug_assert_eq!(site_len, 4);
        let mut word = u32::from_le_bytes(std::slice::from_raw_parts(site, 4).try_into().unwrap());
        let rel_words = ((to_addr as isize - from_addr as isize - 8) / 4) as i32;
        word = (word & 0xff00_0000) | ((rel_words as u32) & 0x00ff_ffff);
        std::ptr::copy_nonoverlapping(word.to_le_bytes().as_ptr(), site, 4);
    }

    fn emit_const(&self, buf: &mut Buffer, dst: Operand, value: i64) -> EmittedConst {
        let Operand::Reg(r) = dst else {
            unreachable!("emit_const always targets a register")
        };
        let rd = phys(r);
        let offset = buf.push(&movw_movt(false, rd, value as u16).to_le_bytes());
        push_u32(buf, movw_movt(true, rd, (value >> 16) as u16));
        EmittedConst { offset, width: 8 }
    }

    unsafe fn patch_const(&self, site: *mut u8, width: u8, value: i64) {
        debug_assert_eq!(width, 8);
        for (i, shift) in [0u32, 16].iter().enumerate() {
            let word_bytes = site.add(i * 4);
            let mut word = u32::from_le_bytes(std::slice::from_raw_parts(word_bytes, 4).try_into().unwrap());
            let imm16 = ((value >> shift) & 0xffff) as u32;
            word = (word & 0xfff0_f000) | ((imm16 >> 12) << 16) | (imm16 & 0xfff);
            std::ptr::copy_nonoverlapping(word.to_le_bytes().as_ptr(), word_bytes, 4);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_two_registers_encodes_al_condition() {
        let e = ArmEmitter::new();
        let mut buf = Buffer::new();
        e.emit_op2(&mut buf, Op2::Add, Flags::NONE, Operand::Reg(Reg::new(1)), Operand::Reg(Reg::new(1)), Operand::Reg(Reg::new(2))).unwrap();
        let word = u32::from_le_bytes(buf.into_bytes().try_into().unwrap());
        assert_eq!(word >> 28, AL);
    }

    #[test]
    fn unconditional_jump_reserves_imm24() {
        let e = ArmEmitter::new();
        let mut buf = Buffer::new();
        let j = e.emit_jump(&mut buf, None);
        assert_eq!(j.site_len, 4);
    }
}
