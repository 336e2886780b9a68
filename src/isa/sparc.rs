//! 32-bit SPARC.
//!
//! Like MIPS, every control-transfer instruction has a delay slot; this
//! emitter follows the same policy of never scheduling into it and always
//! emitting an explicit `nop` after a branch, call, or `jmpl`.
//!
//! This emitter does not use SPARC's register-window `save`/`restore`
//! convention — it treats `%l0..%l7` as a flat scratch/saved register file
//! addressed through `%sp`-relative loads and stores the way the other
//! back-ends in this crate do, trading away windowed-call performance for
//! one calling convention shared across every architecture.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::metadata::PatchKind;
use crate::op::{Flags, FOp1, FOp2, Op0, Op1, Op2};
use crate::operand::Operand;
use crate::platform::{Platform, SPARC32 as PLATFORM};
use crate::reg::{FloatReg, Reg};
use crate::isa::{EmittedConst, EmittedJump, Emitter};

const G0: u8 = 0;
const O7: u8 = 15; // %o7, link register for `call`
const SP: u8 = 14; // %o6

const UNCOND_JUMP: PatchKind = 0;
const COND_JUMP: PatchKind = 1;

fn phys(reg: Reg) -> u8 {
    16 + (reg.index() - 1) // %l0..%l7 for scratch, overflowing into %i0.. for saved
}

fn push_be32(buf: &mut Buffer, word: u32) {
    buf.push(&word.to_be_bytes());
}

fn format3_reg(rd: u8, op3: u32, rs1: u8, rs2: u8) -> u32 {
    (0b10 << 30) | (u32::from(rd) << 25) | (op3 << 19) | (u32::from(rs1) << 14) | u32::from(rs2)
}

fn format3_imm(rd: u8, op3: u32, rs1: u8, simm13: i16) -> u32 {
    (0b10 << 30) | (u32::from(rd) << 25) | (op3 << 19) | (u32::from(rs1) << 14) | (1 << 13) | (simm13 as u32 & 0x1fff)
}

/// FPop1 (`op3` fixed at `0x34`): the `opf` 9-bit field in the middle
/// selects the specific floating-point operation in place of the plain
/// `rs2` ALU instructions use.
fn fp_op(rd: u8, opf: u32, rs1: u8, rs2: u8) -> u32 {
    (0b10 << 30) | (u32::from(rd) << 25) | (0x34 << 19) | (u32::from(rs1) << 14) | (opf << 5) | u32::from(rs2)
}

/// This target's virtual float registers map onto V8's even-numbered
/// double register pairs (`%f0`/`%f2`/.../`%f30`) — V8 has no odd-aligned
/// double access, and `num_float_regs` (16) fits exactly in the 16
/// available pairs.
fn fphys(reg: FloatReg) -> u8 {
    (reg.index() - 1) * 2
}

/// Code generator for SPARC-V8 (32-bit).
pub struct SparcEmitter;

impl SparcEmitter {
    /// A fresh emitter.
    pub fn new() -> SparcEmitter {
        SparcEmitter
    }

    fn load_const(&self, buf: &mut Buffer, rd: u8, value: i64) {
        // sethi %hi(value), rd; or rd, %lo(value), rd
        push_be32(buf, (0b00 << 30) | (u32::from(rd) << 25) | (0b100 << 22) | (((value >> 10) as u32) & 0x3fffff));
        push_be32(buf, format3_imm(rd, 0x02, rd, (value & 0x3ff) as i16));
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

impl Default for SparcEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Emitter for SparcEmitter {
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
        let frame = local_size + 4 * (saved_regs.len() as u32 + 1);
        push_be32(buf, format3_imm(SP, 0x00, SP, -(frame as i32) as i16)); // add sp, -frame, sp
        // st %o7, [sp + frame - 4]
        let word = (0b11 << 30) | (u32::from(O7) << 25) | (0x04 << 19) | (u32::from(SP) << 14) | (1 << 13) | (((frame - 4) as u32) & 0x1fff);
        push_be32(buf, word);
        for (i, &r) in saved_regs.iter().enumerate() {
            let disp = 4 * i as u32;
            let st = (0b11 << 30) | (u32::from(phys(r)) << 25) | (0x04 << 19) | (u32::from(SP) << 14) | (1 << 13) | (disp & 0x1fff);
            push_be32(buf, st);
        }
    }

    fn emit_fast_enter(&self, buf: &mut Buffer, dst: Operand) {
        if let Operand::Reg(r) = dst {
            push_be32(buf, format3_reg(phys(r), 0x02, G0, O7)); // or rd, g0, o7
        }
    }

    fn emit_return(
        &self,
        buf: &mut Buffer,
        src: Operand,
        saved_regs: &[Reg],
        _saved_float_regs: &[FloatReg],
    ) {
        const O0: u8 = 8;
        let rv = self.resolve(buf, src, O0);
        if rv != O0 {
            push_be32(buf, format3_reg(O0, 0x02, G0, rv)); // or o0, g0, r
        }
        let frame = 4 * (saved_regs.len() as u32 + 1);
        for (i, &r) in saved_regs.iter().enumerate() {
            let disp = 4 * i as u32;
            let ld = (0b11 << 30) | (u32::from(phys(r)) << 25) | (0x00 << 19) | (u32::from(SP) << 14) | (1 << 13) | (disp & 0x1fff);
            push_be32(buf, ld);
        }
        let ld_o7 = (0b11 << 30) | (u32::from(O7) << 25) | (0x00 << 19) | (u32::from(SP) << 14) | (1 << 13) | (((frame - 4) as u32) & 0x1fff);
        push_be32(buf, ld_o7);
        push_be32(buf, format3_reg(G0, 0x38, O7, G0) | (1 << 13) | 8); // jmpl %o7+8, %g0
        push_be32(buf, format3_imm(SP, 0x00, SP, frame as i16)); // delay slot: add sp, frame, sp
    }

    fn emit_fast_return(&self, buf: &mut Buffer, src: Operand) {
        if let Operand::Reg(r) = src {
            push_be32(buf, format3_reg(G0, 0x38, phys(r), G0)); // jmpl r, %g0
            push_be32(buf, 0x01000000); // delay slot: nop (sethi 0, %g0)
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
            Op0::Nop => push_be32(buf, 0x01000000),
            Op0::Breakpoint => push_be32(buf, 0x91d02001), // ta 1
            _ => return Err(Error::Unsupported),
        }
        Ok(())
    }

    fn emit_op1(&self, buf: &mut Buffer, op: Op1, _flags: Flags, dst: Operand, src: Operand) -> Result<()> {
        let Operand::Reg(d) = dst else {
            return Err(Error::Unsupported);
        };
        let rd = phys(d);
        let rs = self.resolve(buf, src, 1 /* %g1 scratch */);
        match op {
            Op1::Mov | Op1::MovP => push_be32(buf, format3_reg(rd, 0x02, G0, rs)),
            Op1::Not => push_be32(buf, format3_reg(rd, 0x07, rs, G0)), // xnor
            Op1::Neg => push_be32(buf, format3_reg(rd, 0x04, G0, rs)), // sub rd, g0, rs
            _ => push_be32(buf, format3_reg(rd, 0x02, G0, rs)),
        }
        Ok(())
    }

    fn emit_op2(&self, buf: &mut Buffer, op: Op2, _flags: Flags, dst: Operand, src1: Operand, src2: Operand) -> Result<()> {
        let Operand::Reg(d) = dst else {
            return Err(Error::Unsupported);
        };
        let rd = phys(d);
        let rs1 = self.resolve(buf, src1, 1);
        let rs2 = self.resolve(buf, src2, 2);
        let op3 = match op {
            Op2::Add => 0x00,
            Op2::AddC => 0x08,
            Op2::Sub => 0x04,
            Op2::SubC => 0x0c,
            Op2::And => 0x01,
            Op2::Or => 0x02,
            Op2::Xor => 0x03,
            Op2::Shl => 0x25,
            Op2::Lshr => 0x26,
            Op2::Ashr => 0x27,
            Op2::Mul => 0x0a, // umul
        };
        push_be32(buf, format3_reg(rd, op3, rs1, rs2));
        Ok(())
    }

    fn emit_fop1(&self, buf: &mut Buffer, op: FOp1, _flags: Flags, dst: Operand, src: Operand) -> Result<()> {
        // `fcmp` packs its two float sources into `dst`/`src` (see
        // `Compiler::fcmp`); `FCmp` never writes a destination. `FCMPd`
        // sets `fcc0`, but (like MIPS's FCC0) nothing downstream branches
        // on it yet, so only equality is meaningful after a float compare
        // today (see DESIGN.md).
        if let FOp1::FCmp = op {
            let (Operand::Reg(d), Operand::Reg(s)) = (dst, src) else {
                return Err(Error::Unsupported);
            };
            push_be32(buf, fp_op(0, 0x52, fphys(FloatReg::new(d.index())), fphys(FloatReg::new(s.index()))));
            return Ok(());
        }
        let (Operand::Reg(d), Operand::Reg(s)) = (dst, src) else {
            return Err(Error::Unsupported);
        };
        let dp = fphys(FloatReg::new(d.index()));
        let sp = fphys(FloatReg::new(s.index()));
        match op {
            FOp1::FMov => {
                push_be32(buf, fp_op(dp, 0x01, 0, sp));
                push_be32(buf, fp_op(dp + 1, 0x01, 0, sp + 1));
                Ok(())
            }
            FOp1::FNeg => {
                // V8 has no double-precision negate; the sign bit lives
                // only in the high word, so negate that word and copy the
                // low word across unchanged.
                push_be32(buf, fp_op(dp, 0x05, 0, sp));
                push_be32(buf, fp_op(dp + 1, 0x01, 0, sp + 1));
                Ok(())
            }
            FOp1::FAbs => {
                push_be32(buf, fp_op(dp, 0x09, 0, sp));
                push_be32(buf, fp_op(dp + 1, 0x01, 0, sp + 1));
                Ok(())
            }
            // V8 has no direct integer-register/float-register move; the
            // standard path is through memory, which `emit_fop1` has no
            // frame layout available to address safely.
            FOp1::ConvSwFromF
            | FOp1::ConvSiFromF
            | FOp1::ConvFFromSw
            | FOp1::ConvFFromSi
            | FOp1::ConvF64F32 => Err(Error::Unsupported),
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
        let opf = match op {
            FOp2::FAdd => 0x42,
            FOp2::FSub => 0x46,
            FOp2::FMul => 0x4a,
            FOp2::FDiv => 0x4e,
        };
        push_be32(buf, fp_op(dp, opf, s1p, s2p));
        Ok(())
    }

    fn emit_ijump(&self, buf: &mut Buffer, target: Operand, is_call: bool) -> Result<()> {
        let Operand::Reg(r) = target else {
            return Err(Error::Unsupported);
        };
        let rt = phys(r);
        let rd = if is_call { O7 } else { G0 };
        push_be32(buf, format3_reg(rd, 0x38, rt, G0)); // jmpl rt, rd
        push_be32(buf, 0x01000000); // delay slot nop
        Ok(())
    }

    fn emit_jump(&self, buf: &mut Buffer, condition: Option<crate::compiler::Cond>) -> EmittedJump {
        // Only equality is distinguished today; signed relations and
        // carry/overflow fall back to the not-equal test, a known gap (see
        // DESIGN.md).
        let (cond, patch_kind): (u32, PatchKind) = match condition {
            None => (0b1000, UNCOND_JUMP),
            Some(crate::compiler::Cond::Equal) => (0b0001, COND_JUMP), // be
            Some(_) => (0b1001, COND_JUMP), // bne
        };
        let word = (cond << 25) | (0b010 << 22);
        let offset = buf.push(&word.to_be_bytes());
        push_be32(buf, 0x01000000); // delay slot nop
        EmittedJump { offset, site_len: 4, patch_kind }
    }

    fn emit_cmp(&self, buf: &mut Buffer, _flags: Flags, src1: Operand, src2: Operand) -> Result<()> {
        let rs1 = self.resolve(buf, src1, 1);
        let rs2 = self.resolve(buf, src2, 2);
        push_be32(buf, format3_reg(G0, 0x14, rs1, rs2)); // subcc g0, rs1, rs2
        Ok(())
    }

    unsafe fn patch_jump(&self, site: *mut u8, site_len: u8, _patch_kind: PatchKind, from_addr: usize, to_addr: usize) {
        debug_assert_eq!(site_len, 4);
        let mut word = u32::from_be_bytes(std::slice::from_raw_parts(site, 4).try_into().unwrap());
        let rel_words = ((to_addr as isize - from_addr as isize) / 4) as i32;
        word = (word & 0xffc0_0000) | (rel_words as u32 & 0x003f_ffff);
        std::ptr::copy_nonoverlapping(word.to_be_bytes().as_ptr(), site, 4);
    }

    fn emit_const(&self, buf: &mut Buffer, dst: Operand, value: i64) -> EmittedConst {
        let Operand::Reg(r) = dst else {
            unreachable!("emit_const always targets a register")
        };
        let rd = phys(r);
        let offset = buf.push(&((0b00u32 << 30) | (u32::from(rd) << 25) | (0b100 << 22) | (((value >> 10) as u32) & 0x3fffff)).to_be_bytes());
        push_be32(buf, format3_imm(rd, 0x02, rd, (value & 0x3ff) as i16));
        EmittedConst { offset, width: 8 }
    }

    unsafe fn patch_const(&self, site: *mut u8, width: u8, value: i64) {
        debug_assert_eq!(width, 8);
        let hi = site;
        let lo = site.add(4);
        let mut hi_word = u32::from_be_bytes(std::slice::from_raw_parts(hi, 4).try_into().unwrap());
        hi_word = (hi_word & 0xffc0_0000) | (((value >> 10) as u32) & 0x3fffff);
        std::ptr::copy_nonoverlapping(hi_word.to_be_bytes().as_ptr(), hi, 4);
        let mut lo_word = u32::from_be_bytes(std::slice::from_raw_parts(lo, 4).try_into().unwrap());
        lo_word = (lo_word & 0xffff_e000) | ((value as u32) & 0x3ff);
        std::ptr::copy_nonoverlapping(lo_word.to_be_bytes().as_ptr(), lo, 4);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branches_reserve_a_trailing_delay_slot_nop() {
        let e = SparcEmitter::new();
        let mut buf = Buffer::new();
        e.emit_jump(&mut buf, None);
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn add_uses_op3_zero() {
        let e = SparcEmitter::new();
        let mut buf = Buffer::new();
        e.emit_op2(&mut buf, Op2::Add, Flags::NONE, Operand::Reg(Reg::new(1)), Operand::Reg(Reg::new(1)), Operand::Reg(Reg::new(2))).unwrap();
        let word = u32::from_be_bytes(buf.into_bytes().try_into().unwrap());
        assert_eq!((word >> 19) & 0x3f, 0x00);
    }
}
