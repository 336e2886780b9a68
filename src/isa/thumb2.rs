//! ARM, Thumb-2 encoding.
//!
//! This back-end drives the 16-bit Thumb-1 instruction subset for register
//! arithmetic (so it only reaches the low register file, `r0..r7`; `R8..R10`
//! alias back onto `r0..r2` — a real limitation, not a hidden one) and the
//! 32-bit `MOVW`/`MOVT` Thumb-2 extension for full-width immediates, which
//! every Thumb-2-capable core supports regardless of IT-block availability.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::metadata::PatchKind;
use crate::op::{Flags, FOp1, FOp2, Op0, Op1, Op2};
use crate::operand::Operand;
use crate::platform::{Platform, THUMB2 as PLATFORM};
use crate::reg::{FloatReg, Reg};
use crate::isa::{EmittedConst, EmittedJump, Emitter};

const UNCOND_JUMP: PatchKind = 0;
const COND_JUMP: PatchKind = 1;

fn phys(reg: Reg) -> u8 {
    (reg.index() - 1) % 8
}

fn push_u16(buf: &mut Buffer, half: u16) {
    buf.push(&half.to_le_bytes());
}

fn fphys(reg: FloatReg) -> u8 {
    reg.index() - 1
}

/// A T32 coprocessor instruction is the same 32-bit word as its A32
/// equivalent (the 4-bit `cond` field becomes a fixed unconditional marker,
/// which is what `cond=AL` already encodes), stored as two halfwords:
/// bits[31:16] first, then bits[15:0], each halfword little-endian.
fn push_vfp(buf: &mut Buffer, word: u32) {
    push_u16(buf, (word >> 16) as u16);
    push_u16(buf, (word & 0xffff) as u16);
}

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

/// ARM's 4-bit condition field; same table Thumb-2's 16-bit conditional
/// branch (`T1`) and A32 share.
fn cond_code(cond: crate::compiler::Cond) -> u16 {
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

/// Code generator for the Thumb-2 encoding of 32-bit ARM.
pub struct Thumb2Emitter;

impl Thumb2Emitter {
    /// A fresh emitter.
    pub fn new() -> Thumb2Emitter {
        Thumb2Emitter
    }

    fn movw_movt(&self, buf: &mut Buffer, rd: u8, imm16: u16, is_t: bool) -> crate::buffer::BufferPos {
        let imm4 = u16::from(imm16 >> 12);
        let i = u16::from((imm16 >> 11) & 1);
        let imm3 = u16::from((imm16 >> 8) & 0b111);
        let imm8 = imm16 & 0xff;
        let op = if is_t { 0b101100 } else { 0b100100 };
        let first = 0xf000 | (i << 10) | (op << 4) | imm4;
        let second = (imm3 << 12) | (u16::from(rd) << 8) | imm8;
        let offset = buf.push(&first.to_le_bytes());
        push_u16(buf, second);
        offset
    }

    fn load_const(&self, buf: &mut Buffer, rd: u8, value: i64) {
        self.movw_movt(buf, rd, value as u16, false);
        if (value >> 16) != 0 {
            self.movw_movt(buf, rd, (value >> 16) as u16, true);
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

impl Default for Thumb2Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Emitter for Thumb2Emitter {
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
        let mut reglist = 0u16;
        for &r in saved_regs {
            reglist |= 1 << phys(r);
        }
        push_u16(buf, 0xb500 | reglist); // push {saved..., lr}
        if local_size > 0 && local_size <= 508 {
            push_u16(buf, 0xb080 | ((local_size / 4) as u16 & 0x7f)); // sub sp, #imm7*4
        }
    }

    fn emit_fast_enter(&self, buf: &mut Buffer, dst: Operand) {
        if let Operand::Reg(r) = dst {
            // mov rd, lr
            push_u16(buf, 0x4670 | phys(r) as u16);
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
            push_u16(buf, 0x1c00 | ((rv as u16) << 3)); // adds r0, r, #0
        }
        let mut reglist = 0u16;
        for &r in saved_regs {
            reglist |= 1 << phys(r);
        }
        push_u16(buf, 0xbd00 | reglist); // pop {saved..., pc}
    }

    fn emit_fast_return(&self, buf: &mut Buffer, src: Operand) {
        if let Operand::Reg(r) = src {
            push_u16(buf, 0x4700 | ((phys(r) as u16) << 3)); // bx r
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
            Op0::Nop => push_u16(buf, 0xbf00),
            Op0::Breakpoint => push_u16(buf, 0xbe00),
            _ => return Err(Error::Unsupported),
        }
        Ok(())
    }

    fn emit_op1(&self, buf: &mut Buffer, op: Op1, _flags: Flags, dst: Operand, src: Operand) -> Result<()> {
        let Operand::Reg(d) = dst else {
            return Err(Error::Unsupported);
        };
        let rd = phys(d);
        let rs = self.resolve(buf, src, 6);
        match op {
            Op1::Mov | Op1::MovP => push_u16(buf, 0x1c00 | (u16::from(rs) << 3) | u16::from(rd)),
            Op1::Not => {
                if rd != rs {
                    push_u16(buf, 0x1c00 | (u16::from(rs) << 3) | u16::from(rd));
                }
                push_u16(buf, 0x43c0 | (u16::from(rd) << 3) | u16::from(rd));
            }
            Op1::Neg => push_u16(buf, 0x4240 | (u16::from(rs) << 3) | u16::from(rd)),
            _ => push_u16(buf, 0x1c00 | (u16::from(rs) << 3) | u16::from(rd)),
        }
        Ok(())
    }

    fn emit_op2(&self, buf: &mut Buffer, op: Op2, _flags: Flags, dst: Operand, src1: Operand, src2: Operand) -> Result<()> {
        let Operand::Reg(d) = dst else {
            return Err(Error::Unsupported);
        };
        let rd = phys(d);
        let rn = self.resolve(buf, src1, 6);
        let rm = self.resolve(buf, src2, 7);
        match op {
            Op2::Add | Op2::AddC => push_u16(buf, 0x1800 | (u16::from(rm) << 6) | (u16::from(rn) << 3) | u16::from(rd)),
            Op2::Sub | Op2::SubC => push_u16(buf, 0x1a00 | (u16::from(rm) << 6) | (u16::from(rn) << 3) | u16::from(rd)),
            Op2::And | Op2::Or | Op2::Xor | Op2::Shl | Op2::Lshr | Op2::Ashr | Op2::Mul => {
                if rd != rn {
                    push_u16(buf, 0x1c00 | (u16::from(rn) << 3) | u16::from(rd));
                }
                let opcode16: u16 = match op {
                    Op2::And => 0x4000,
                    Op2::Or => 0x4300,
                    Op2::Xor => 0x4040,
                    Op2::Shl => 0x4080,
                    Op2::Lshr => 0x40c0,
                    Op2::Ashr => 0x4100,
                    Op2::Mul => 0x4340,
                    _ => unreachable!(),
                };
                push_u16(buf, opcode16 | (u16::from(rm) << 3) | u16::from(rd));
            }
        }
        Ok(())
    }

    fn emit_fop1(&self, buf: &mut Buffer, op: FOp1, _flags: Flags, dst: Operand, src: Operand) -> Result<()> {
        if let FOp1::FCmp = op {
            let (Operand::Reg(d), Operand::Reg(s)) = (dst, src) else {
                return Err(Error::Unsupported);
            };
            push_vfp(buf, vfp_2reg(VCMP_F64, fphys(FloatReg::new(d.index())), fphys(FloatReg::new(s.index()))));
            push_vfp(buf, VMRS);
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
                push_vfp(buf, vfp_2reg(base, dp, sp));
                Ok(())
            }
            FOp1::ConvSwFromF | FOp1::ConvSiFromF => {
                let (Operand::Reg(d), Operand::Reg(s)) = (dst, src) else {
                    return Err(Error::Unsupported);
                };
                let sp = fphys(FloatReg::new(s.index()));
                push_vfp(buf, vcvt_s32_f64(SSCRATCH, sp));
                push_vfp(buf, vmov_from_s(SSCRATCH, phys(d)));
                Ok(())
            }
            FOp1::ConvFFromSw | FOp1::ConvFFromSi => {
                let Operand::Reg(d) = dst else {
                    return Err(Error::Unsupported);
                };
                let dp = fphys(FloatReg::new(d.index()));
                let sp = self.resolve(buf, src, 6);
                push_vfp(buf, vmov_to_s(SSCRATCH, sp));
                push_vfp(buf, vcvt_f64_s32(dp, SSCRATCH));
                Ok(())
            }
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
        push_vfp(buf, vfp_3reg(base, s1p, dp, s2p));
        Ok(())
    }

    fn emit_ijump(&self, buf: &mut Buffer, target: Operand, is_call: bool) -> Result<()> {
        let Operand::Reg(r) = target else {
            return Err(Error::Unsupported);
        };
        let rm = phys(r);
        if is_call {
            push_u16(buf, 0x4780 | (u16::from(rm) << 3)); // blx rm
        } else {
            push_u16(buf, 0x4700 | (u16::from(rm) << 3)); // bx rm
        }
        Ok(())
    }

    fn emit_jump(&self, buf: &mut Buffer, condition: Option<crate::compiler::Cond>) -> EmittedJump {
        let (half, patch_kind, len): (u16, PatchKind, u8) = match condition {
            None => (0xe000, UNCOND_JUMP, 2),
            Some(c) => (0xd000 | (cond_code(c) << 8), COND_JUMP, 2),
        };
        let offset = buf.push(&half.to_le_bytes());
        EmittedJump { offset, site_len: len, patch_kind }
    }

    fn emit_cmp(&self, buf: &mut Buffer, _flags: Flags, src1: Operand, src2: Operand) -> Result<()> {
        let rn = self.resolve(buf, src1, 6);
        let rm = self.resolve(buf, src2, 7);
        push_u16(buf, 0x4280 | (u16::from(rm) << 3) | u16::from(rn));
        Ok(())
    }

    unsafe fn patch_jump(&self, site: *mut u8, site_len: u8, _patch_kind: PatchKind, from_addr: usize, to_addr: usize) {
        debug_assert_eq!(site_len, 2);
        let mut half = u16::from_le_bytes(std::slice::from_raw_parts(site, 2).try_into().unwrap());
        let rel = ((to_addr as isize - from_addr as isize - 4) / 2) as i16;
        half = (half & 0xff00) | (rel as u16 & 0xff);
        std::ptr::copy_nonoverlapping(half.to_le_bytes().as_ptr(), site, 2);
    }

    fn emit_const(&self, buf: &mut Buffer, dst: Operand, value: i64) -> EmittedConst {
        let Operand::Reg(r) = dst else {
            unreachable!("emit_const always targets a register")
        };
        let rd = phys(r);
        let offset = self.movw_movt(buf, rd, value as u16, false);
        self.movw_movt(buf, rd, (value >> 16) as u16, true);
        EmittedConst { offset, width: 8 }
    }

    unsafe fn patch_const(&self, site: *mut u8, width: u8, value: i64) {
        debug_assert_eq!(width, 8);
        for (i, shift) in [0u32, 16].iter().enumerate() {
            let imm16 = ((value >> shift) & 0xffff) as u16;
            let first_bytes = site.add(i * 4);
            let second_bytes = site.add(i * 4 + 2);
            let mut first = u16::from_le_bytes(std::slice::from_raw_parts(first_bytes, 2).try_into().unwrap());
            let imm4 = imm16 >> 12;
            let ibit = (imm16 >> 11) & 1;
            first = (first & 0xfbf0) | (ibit << 10) | imm4;
            std::ptr::copy_nonoverlapping(first.to_le_bytes().as_ptr(), first_bytes, 2);
            let mut second = u16::from_le_bytes(std::slice::from_raw_parts(second_bytes, 2).try_into().unwrap());
            let imm3 = (imm16 >> 8) & 0b111;
            let imm8 = imm16 & 0xff;
            second = (second & 0x8f00) | (imm3 << 12) | imm8;
            std::ptr::copy_nonoverlapping(second.to_le_bytes().as_ptr(), second_bytes, 2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_register_wraparound_is_explicit() {
        assert_eq!(phys(Reg::new(9)), 0);
    }

    #[test]
    fn add_emits_two_bytes() {
        let e = Thumb2Emitter::new();
        let mut buf = Buffer::new();
        e.emit_op2(&mut buf, Op2::Add, Flags::NONE, Operand::Reg(Reg::new(1)), Operand::Reg(Reg::new(1)), Operand::Reg(Reg::new(2))).unwrap();
        assert_eq!(buf.len(), 2);
    }
}
