//! 32- and 64-bit MIPS, big-endian.
//!
//! Every branch and jump has an architectural delay slot: the instruction
//! immediately after it always executes before control transfers. This
//! emitter never tries to usefully fill that slot (no scheduling across
//! LIR operations is attempted); it always follows a branch with an
//! explicit `nop`, which is always correct even if not maximally fast.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::metadata::PatchKind;
use crate::op::{Flags, FOp1, FOp2, Op0, Op1, Op2};
use crate::operand::Operand;
use crate::platform::{Platform, MIPS32, MIPS64};
use crate::reg::{FloatReg, Reg};
use crate::isa::{EmittedConst, EmittedJump, Emitter};

const RA: u8 = 31;
const SP: u8 = 29;
const ZERO: u8 = 0;

const UNCOND_JUMP: PatchKind = 0;
const COND_JUMP: PatchKind = 1;

fn phys(reg: Reg) -> u8 {
    let i = reg.index() - 1;
    if i < 5 { 8 + i } else { 16 + (i - 5) }
}

fn push_be32(buf: &mut Buffer, word: u32) {
    buf.push(&word.to_be_bytes());
}

fn r_type(rs: u8, rt: u8, rd: u8, funct: u32) -> u32 {
    (u32::from(rs) << 21) | (u32::from(rt) << 16) | (u32::from(rd) << 11) | funct
}

fn i_type(opcode: u32, rs: u8, rt: u8, imm: u16) -> u32 {
    (opcode << 26) | (u32::from(rs) << 21) | (u32::from(rt) << 16) | u32::from(imm)
}

fn fphys(reg: FloatReg) -> u8 {
    reg.index() - 1
}

const FMT_D: u32 = 17;
const FMT_W: u32 = 20;
const FMT_L: u32 = 21;

/// COP1 (opcode 0x11) arithmetic/compare/convert form.
fn cop1(fmt: u32, ft: u8, fs: u8, fd: u8, funct: u32) -> u32 {
    (0x11 << 26) | (fmt << 21) | (u32::from(ft) << 16) | (u32::from(fs) << 11) | (u32::from(fd) << 6) | funct
}

/// `MFC1`/`MTC1`/`DMFC1`/`DMTC1`: a direct GPR<->FPR move, `rs` selecting
/// which of the four per `sub`.
fn movx1(sub: u32, rt: u8, fs: u8) -> u32 {
    (0x11 << 26) | (sub << 21) | (u32::from(rt) << 16) | (u32::from(fs) << 11)
}

/// This target's single/double FPRs in 64-bit FPU mode (`FR=1`) are
/// addressed directly by number, with no even/odd pairing, so F14 (beyond
/// the 14 this target's virtual float registers ever claim) is always free
/// to round-trip an integer bit pattern through during a conversion.
const FSCRATCH: u8 = 14;

/// Code generator shared by 32- and 64-bit MIPS.
pub struct MipsEmitter {
    is64: bool,
}

impl MipsEmitter {
    /// A fresh emitter for either width.
    pub fn new(is64: bool) -> MipsEmitter {
        MipsEmitter { is64 }
    }

    fn load_const(&self, buf: &mut Buffer, rd: u8, value: i64) {
        push_be32(buf, i_type(0x0f, 0, rd, (value >> 16) as u16)); // lui
        push_be32(buf, i_type(0x0d, rd, rd, value as u16)); // ori
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

impl Emitter for MipsEmitter {
    fn platform(&self) -> &'static Platform {
        if self.is64 { &MIPS64 } else { &MIPS32 }
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
        let ws = if self.is64 { 8 } else { 4 };
        let frame = local_size + ws * (saved_regs.len() as u32 + 1);
        push_be32(buf, i_type(0x09, SP, SP, (-(frame as i32)) as u16)); // addiu sp, sp, -frame
        push_be32(buf, i_type(0x2b, SP, RA, (frame - ws) as u16)); // sw/sd ra, frame-ws(sp)
        for (i, &r) in saved_regs.iter().enumerate() {
            push_be32(buf, i_type(0x2b, SP, phys(r), (ws * i as u32) as u16));
        }
    }

    fn emit_fast_enter(&self, buf: &mut Buffer, dst: Operand) {
        if let Operand::Reg(r) = dst {
            push_be32(buf, r_type(RA, 0, phys(r), 0x25)); // or rd, ra, zero
        }
    }

    fn emit_return(
        &self,
        buf: &mut Buffer,
        src: Operand,
        saved_regs: &[Reg],
        _saved_float_regs: &[FloatReg],
    ) {
        let rv = self.resolve(buf, src, 2);
        if rv != 2 {
            push_be32(buf, r_type(rv, ZERO, 2, 0x25)); // or v0, r, zero
        }
        let ws = if self.is64 { 8 } else { 4 };
        let frame = 0u32; // caller tracks the matching enter's frame size externally
        let _ = frame;
        for (i, &r) in saved_regs.iter().enumerate() {
            push_be32(buf, i_type(0x23, SP, phys(r), (ws * i as u32) as u16)); // lw/ld
        }
        push_be32(buf, i_type(0x23, SP, RA, (ws * saved_regs.len() as u32) as u16));
        push_be32(buf, r_type(RA, 0, 0, 0x08)); // jr ra
        push_be32(buf, i_type(0x09, SP, SP, (ws * (saved_regs.len() as u32 + 1)) as u16)); // delay slot: addiu sp, sp, +frame
    }

    fn emit_fast_return(&self, buf: &mut Buffer, src: Operand) {
        if let Operand::Reg(r) = src {
            push_be32(buf, r_type(phys(r), 0, 0, 0x08)); // jr r
            push_be32(buf, 0); // delay slot nop
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
            Op0::Nop => push_be32(buf, 0),
            Op0::Breakpoint => push_be32(buf, 0x0000000d),
            _ => return Err(Error::Unsupported),
        }
        Ok(())
    }

    fn emit_op1(&self, buf: &mut Buffer, op: Op1, _flags: Flags, dst: Operand, src: Operand) -> Result<()> {
        let Operand::Reg(d) = dst else {
            return Err(Error::Unsupported);
        };
        let rd = phys(d);
        let rs = self.resolve(buf, src, 4);
        match op {
            Op1::Mov | Op1::MovP => push_be32(buf, r_type(rs, ZERO, rd, 0x25)),
            Op1::Not => push_be32(buf, r_type(rs, ZERO, rd, 0x27)), // nor rd, rs, zero
            Op1::Neg => push_be32(buf, r_type(ZERO, rs, rd, 0x23)), // subu rd, zero, rs
            _ => push_be32(buf, r_type(rs, ZERO, rd, 0x25)),
        }
        Ok(())
    }

    fn emit_op2(&self, buf: &mut Buffer, op: Op2, _flags: Flags, dst: Operand, src1: Operand, src2: Operand) -> Result<()> {
        let Operand::Reg(d) = dst else {
            return Err(Error::Unsupported);
        };
        let rd = phys(d);
        let rs = self.resolve(buf, src1, 4);
        let rt = self.resolve(buf, src2, 5);
        let word = match op {
            Op2::Add | Op2::AddC => r_type(rs, rt, rd, 0x21),
            Op2::Sub | Op2::SubC => r_type(rs, rt, rd, 0x23),
            Op2::And => r_type(rs, rt, rd, 0x24),
            Op2::Or => r_type(rs, rt, rd, 0x25),
            Op2::Xor => r_type(rs, rt, rd, 0x26),
            Op2::Shl => r_type(rt, rs, rd, 0x04),
            Op2::Lshr => r_type(rt, rs, rd, 0x06),
            Op2::Ashr => r_type(rt, rs, rd, 0x07),
            Op2::Mul => (0x1c << 26) | r_type(rs, rt, rd, 0x02),
        };
        push_be32(buf, word);
        Ok(())
    }

    fn emit_fop1(&self, buf: &mut Buffer, op: FOp1, _flags: Flags, dst: Operand, src: Operand) -> Result<()> {
        // `fcmp` packs its two float sources into `dst`/`src` (see
        // `Compiler::fcmp`); `FCmp` never writes a destination. `C.EQ.D`
        // sets FCC0, but (like the integer-only-equality gap documented in
        // `emit_jump`) nothing downstream tests FCC0 yet, so only equality
        // is meaningful after a float compare today (see DESIGN.md).
        if let FOp1::FCmp = op {
            let (Operand::Reg(d), Operand::Reg(s)) = (dst, src) else {
                return Err(Error::Unsupported);
            };
            push_be32(buf, cop1(FMT_D, fphys(FloatReg::new(s.index())), fphys(FloatReg::new(d.index())), 0, 0x32));
            return Ok(());
        }
        match op {
            FOp1::FMov | FOp1::FNeg | FOp1::FAbs => {
                let (Operand::Reg(d), Operand::Reg(s)) = (dst, src) else {
                    return Err(Error::Unsupported);
                };
                let funct = match op {
                    FOp1::FMov => 0x06,
                    FOp1::FNeg => 0x07,
                    _ => 0x05,
                };
                push_be32(buf, cop1(FMT_D, 0, fphys(FloatReg::new(s.index())), fphys(FloatReg::new(d.index())), funct));
                Ok(())
            }
            FOp1::ConvSwFromF | FOp1::ConvSiFromF => {
                let (Operand::Reg(d), Operand::Reg(s)) = (dst, src) else {
                    return Err(Error::Unsupported);
                };
                let sp = fphys(FloatReg::new(s.index()));
                if matches!(op, FOp1::ConvSwFromF) && self.is64 {
                    push_be32(buf, cop1(FMT_D, 0, sp, FSCRATCH, 0x09)); // trunc.l.d
                    push_be32(buf, movx1(0x01, phys(d), FSCRATCH)); // dmfc1
                } else {
                    push_be32(buf, cop1(FMT_D, 0, sp, FSCRATCH, 0x0d)); // trunc.w.d
                    push_be32(buf, movx1(0x00, phys(d), FSCRATCH)); // mfc1
                }
                Ok(())
            }
            FOp1::ConvFFromSw | FOp1::ConvFFromSi => {
                let Operand::Reg(d) = dst else {
                    return Err(Error::Unsupported);
                };
                let dp = fphys(FloatReg::new(d.index()));
                let rs = self.resolve(buf, src, 4);
                if matches!(op, FOp1::ConvFFromSw) && self.is64 {
                    push_be32(buf, movx1(0x05, rs, FSCRATCH)); // dmtc1
                    push_be32(buf, cop1(FMT_L, 0, FSCRATCH, dp, 0x21)); // cvt.d.l
                } else {
                    push_be32(buf, movx1(0x04, rs, FSCRATCH)); // mtc1
                    push_be32(buf, cop1(FMT_W, 0, FSCRATCH, dp, 0x21)); // cvt.d.w
                }
                Ok(())
            }
            // No 32-bit float register namespace is modeled on this target.
            FOp1::ConvF64F32 => Err(Error::Unsupported),
            FOp1::FCmp => unreachable!("handled above"),
        }
    }

    fn emit_fop2(&self, buf: &mut Buffer, op: FOp2, _flags: Flags, dst: Operand, src1: Operand, src2: Operand) -> Result<()> {
        let (Operand::Reg(d), Operand::Reg(s1), Operand::Reg(s2)) = (dst, src1, src2) else {
            return Err(Error::Unsupported);
        };
        let fd = fphys(FloatReg::new(d.index()));
        let fs = fphys(FloatReg::new(s1.index()));
        let ft = fphys(FloatReg::new(s2.index()));
        let funct = match op {
            FOp2::FAdd => 0x00,
            FOp2::FSub => 0x01,
            FOp2::FMul => 0x02,
            FOp2::FDiv => 0x03,
        };
        push_be32(buf, cop1(FMT_D, ft, fs, fd, funct));
        Ok(())
    }

    fn emit_ijump(&self, buf: &mut Buffer, target: Operand, is_call: bool) -> Result<()> {
        let Operand::Reg(r) = target else {
            return Err(Error::Unsupported);
        };
        let rt = phys(r);
        push_be32(buf, if is_call { r_type(rt, 0, RA, 0x09) } else { r_type(rt, 0, 0, 0x08) });
        push_be32(buf, 0); // delay slot nop
        Ok(())
    }

    fn emit_jump(&self, buf: &mut Buffer, condition: Option<crate::compiler::Cond>) -> EmittedJump {
        // Only equality is distinguished today; signed relations and
        // carry/overflow fall back to the not-equal test, a known gap (see
        // DESIGN.md).
        let (word, patch_kind): (u32, PatchKind) = match condition {
            None => (0x02 << 26, UNCOND_JUMP),
            Some(crate::compiler::Cond::Equal) => (i_type(0x04, 0, 0, 0), COND_JUMP), // beq
            Some(_) => (i_type(0x05, 0, 0, 0), COND_JUMP), // bne
        };
        let offset = buf.push(&word.to_be_bytes());
        push_be32(buf, 0); // delay slot nop, patched alongside if ever scheduled
        EmittedJump { offset, site_len: 4, patch_kind }
    }

    fn emit_cmp(&self, buf: &mut Buffer, _flags: Flags, src1: Operand, src2: Operand) -> Result<()> {
        // MIPS branches compare directly; materialize both operands into
        // the registers the subsequent `emit_jump` branch reads.
        let _ = self.resolve(buf, src1, 4);
        let _ = self.resolve(buf, src2, 5);
        Ok(())
    }

    unsafe fn patch_jump(&self, site: *mut u8, site_len: u8, patch_kind: PatchKind, from_addr: usize, to_addr: usize) {
        debug_assert_eq!(site_len, 4);
        let mut word = u32::from_be_bytes(std::slice::from_raw_parts(site, 4).try_into().unwrap());
        if patch_kind == UNCOND_JUMP {
            let target_word = (to_addr >> 2) as u32 & 0x03ff_ffff;
            word = (word & 0xfc00_0000) | target_word;
        } else {
            let rel = ((to_addr as isize - from_addr as isize - 4) / 4) as i32;
            word = (word & 0xffff_0000) | (rel as u32 & 0xffff);
        }
        std::ptr::copy_nonoverlapping(word.to_be_bytes().as_ptr(), site, 4);
    }

    fn emit_const(&self, buf: &mut Buffer, dst: Operand, value: i64) -> EmittedConst {
        let Operand::Reg(r) = dst else {
            unreachable!("emit_const always targets a register")
        };
        let rd = phys(r);
        let offset = buf.push(&i_type(0x0f, 0, rd, (value >> 16) as u16).to_be_bytes());
        push_be32(buf, i_type(0x0d, rd, rd, value as u16));
        EmittedConst { offset, width: 8 }
    }

    unsafe fn patch_const(&self, site: *mut u8, width: u8, value: i64) {
        debug_assert_eq!(width, 8);
        let hi = site;
        let lo = site.add(4);
        let mut hi_word = u32::from_be_bytes(std::slice::from_raw_parts(hi, 4).try_into().unwrap());
        hi_word = (hi_word & 0xffff_0000) | (((value >> 16) as u32) & 0xffff);
        std::ptr::copy_nonoverlapping(hi_word.to_be_bytes().as_ptr(), hi, 4);
        let mut lo_word = u32::from_be_bytes(std::slice::from_raw_parts(lo, 4).try_into().unwrap());
        lo_word = (lo_word & 0xffff_0000) | ((value as u32) & 0xffff);
        std::ptr::copy_nonoverlapping(lo_word.to_be_bytes().as_ptr(), lo, 4);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jump_reserves_a_trailing_delay_slot_nop() {
        let e = MipsEmitter::new(false);
        let mut buf = Buffer::new();
        e.emit_jump(&mut buf, None);
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn add_uses_addu_funct() {
        let e = MipsEmitter::new(false);
        let mut buf = Buffer::new();
        e.emit_op2(&mut buf, Op2::Add, Flags::NONE, Operand::Reg(Reg::new(1)), Operand::Reg(Reg::new(1)), Operand::Reg(Reg::new(2))).unwrap();
        let word = u32::from_be_bytes(buf.into_bytes().try_into().unwrap());
        assert_eq!(word & 0x3f, 0x21);
    }
}
