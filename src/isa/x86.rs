//! x86-32 and x86-64 back-ends.
//!
//! Both targets share one instruction shape (ModRM/SIB, REX only on
//! x86-64) and differ mainly in operand width and how many of the
//! client-visible registers are physically backed. x86-32 is handled by
//! spilling its four virtual registers (`R4..R7`) to a fixed stack slot
//! area reserved by the prologue, loading into a scratch physical register
//! around each use (§4.6, glossary "virtual register").

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::metadata::PatchKind;
use crate::op::{Flags, FOp1, FOp2, Op0, Op1, Op2};
use crate::operand::Operand;
use crate::platform::Platform;
use crate::platform::{X86_32 as PLATFORM_32, X86_64 as PLATFORM_64};
use crate::reg::{FloatReg, Reg};
use crate::isa::{EmittedConst, EmittedJump, Emitter};

const COND_JUMP: PatchKind = 0;
const UNCOND_JUMP: PatchKind = 1;

/// `R1..R5` are physically backed (rax/rcx/rdx/rsi/rdi), `R6..R10` are the
/// callee-saved set (rbx/r12..r15). Index 0 is `rsp`, reserved for the
/// `Reg::sp` sentinel.
const PHYS64: [u8; 10] = [0, 1, 2, 6, 7, 3, 12, 13, 14, 15];

/// x86-32 has only 3 physically-backed registers (eax/ecx/edx); `R4..R7`
/// are spilled to the frame's virtual-register save area.
const PHYS32: [u8; 3] = [0, 1, 2];

fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode << 6) | ((reg & 7) << 3) | (rm & 7)
}

fn rex(w: bool, r: bool, x: bool, b: bool) -> Option<u8> {
    if !(w || r || x || b) {
        return None;
    }
    Some(0x40 | ((w as u8) << 3) | ((r as u8) << 2) | ((x as u8) << 1) | (b as u8))
}

/// Encode a `reg, r/m` operand pair where `rm` is a register-direct operand,
/// returning the trailing bytes (ModRM only; no SIB/disp needed).
fn modrm_reg_reg(reg_field: u8, rm_field: u8) -> Vec<u8> {
    vec![modrm(0b11, reg_field, rm_field)]
}

/// Encode `[base + disp]` as a ModRM(+SIB)(+disp) trailer for `reg_field`.
fn modrm_mem(reg_field: u8, base_field: u8, disp: i64) -> Vec<u8> {
    let mut out = Vec::new();
    let needs_sib = base_field & 7 == 4; // rsp/r12 require a SIB byte.
    let mode = if disp == 0 && base_field & 7 != 5 {
        0b00
    } else if (-128..=127).contains(&disp) {
        0b01
    } else {
        0b10
    };
    let rm = if needs_sib { 0b100 } else { base_field & 7 };
    out.push(modrm(mode, reg_field, rm));
    if needs_sib {
        out.push(0x24); // scale=0, index=none, base=rsp/r12
    }
    match mode {
        0b01 => out.push(disp as i8 as u8),
        0b10 => out.extend_from_slice(&(disp as i32).to_le_bytes()),
        _ => {}
    }
    out
}

/// Shared encoder state for both x86 widths; `is64` selects REX.W / operand
/// width and whether `R6..R10` are physically backed (x86-64) or need
/// spilling through `scratch_phys` (x86-32).
struct X86Common {
    is64: bool,
    platform: &'static Platform,
}

impl X86Common {
    fn phys(&self, reg: Reg) -> Option<u8> {
        if self.is64 {
            Some(PHYS64[reg.index() as usize - 1])
        } else {
            let idx = reg.index() as usize - 1;
            PHYS32.get(idx).copied()
        }
    }

    fn is_sp(&self, reg: Reg) -> bool {
        reg == Reg::sp(self.platform.num_regs)
    }

    /// Byte offset, relative to the frame base, of `reg`'s spill slot. Only
    /// meaningful for x86-32 virtual registers.
    fn spill_offset(&self, reg: Reg) -> i64 {
        let virt_index = reg.index() as i64 - PHYS32.len() as i64 - 1;
        debug_assert!(virt_index >= 0);
        -(virt_index * 4 + 4)
    }

    /// Load `reg` into the fixed scratch physical register (`eax`/`rax`),
    /// emitting a spill-slot load first if `reg` is virtual (x86-32 only).
    fn load_to_scratch(&self, buf: &mut Buffer, reg: Reg) -> u8 {
        let scratch = 0u8; // rax/eax
        if self.is_sp(reg) {
            return 4; // rsp itself, never spilled
        }
        match self.phys(reg) {
            Some(p) => p,
            None => {
                let disp = self.spill_offset(reg);
                self.emit_mov_reg_mem(buf, scratch, 5 /* rbp */, disp);
                scratch
            }
        }
    }

    /// Store the scratch physical register back into `reg`'s spill slot, a
    /// no-op for physically-backed registers.
    fn store_from_scratch(&self, buf: &mut Buffer, reg: Reg) {
        if self.phys(reg).is_none() && !self.is_sp(reg) {
            let disp = self.spill_offset(reg);
            self.emit_mov_mem_reg(buf, 5, disp, 0);
        }
    }

    fn emit_mov_reg_mem(&self, buf: &mut Buffer, dst: u8, base: u8, disp: i64) {
        let mut code = Vec::new();
        if let Some(r) = rex(self.is64, dst >= 8, false, base >= 8) {
            code.push(r);
        }
        code.push(0x8b);
        code.extend(modrm_mem(dst, base, disp));
        buf.push(&code);
    }

    fn emit_mov_mem_reg(&self, buf: &mut Buffer, base: u8, disp: i64, src: u8) {
        let mut code = Vec::new();
        if let Some(r) = rex(self.is64, src >= 8, false, base >= 8) {
            code.push(r);
        }
        code.push(0x89);
        code.extend(modrm_mem(src, base, disp));
        buf.push(&code);
    }

    fn emit_mov_reg_reg(&self, buf: &mut Buffer, dst: u8, src: u8) {
        if dst == src {
            return;
        }
        let mut code = Vec::new();
        if let Some(r) = rex(self.is64, src >= 8, false, dst >= 8) {
            code.push(r);
        }
        code.push(0x89);
        code.extend(modrm_reg_reg(src, dst));
        buf.push(&code);
    }

    fn emit_mov_reg_imm(&self, buf: &mut Buffer, dst: u8, imm: i64) {
        let mut code = Vec::new();
        if self.is64 {
            code.push(rex(true, false, false, dst >= 8).unwrap());
            code.push(0xb8 + (dst & 7));
            code.extend_from_slice(&imm.to_le_bytes());
        } else {
            if dst >= 8 {
                code.push(rex(false, false, false, true).unwrap());
            }
            code.push(0xb8 + (dst & 7));
            code.extend_from_slice(&(imm as i32).to_le_bytes());
        }
        buf.push(&code);
    }

    /// Resolve an operand into a physical register, loading it into the
    /// scratch register first if it is an x86-32 virtual register or a
    /// memory/immediate operand that can't be used directly by the caller.
    fn reg_of(&self, buf: &mut Buffer, op: Operand) -> u8 {
        match op {
            Operand::Reg(r) => self.load_to_scratch(buf, r),
            Operand::Imm(v) => {
                self.emit_mov_reg_imm(buf, 1 /* rcx, second scratch */, v);
                1
            }
            _ => unreachable!("caller only passes Reg/Imm operands to reg_of"),
        }
    }

    fn alu_op_rm(&self, buf: &mut Buffer, opcode: u8, ext: Option<u8>, dst: u8, src: Operand) {
        let mut code = Vec::new();
        match src {
            Operand::Reg(r) => {
                let s = self.load_to_scratch_into(buf, r, 6 /* rsi, third scratch */);
                if let Some(x) = rex(self.is64, s >= 8, false, dst >= 8) {
                    code.push(x);
                }
                code.push(opcode);
                code.extend(modrm_reg_reg(s, dst));
            }
            Operand::Imm(v) => {
                let op_imm = 0x81;
                if let Some(x) = rex(self.is64, false, false, dst >= 8) {
                    code.push(x);
                }
                code.push(op_imm);
                code.extend(modrm_reg_reg(ext.unwrap_or(0), dst));
                code.extend_from_slice(&(v as i32).to_le_bytes());
            }
            Operand::Mem { base, offset } => {
                let b = self.load_to_scratch_into(buf, base, 6);
                if let Some(x) = rex(self.is64, dst >= 8, false, b >= 8) {
                    code.push(x);
                }
                // `opcode` is the `r/m, reg` (Ev,Gv) form used above for the
                // register-register case; loading FROM memory needs the
                // `reg, r/m` (Gv,Ev) direction instead, two opcodes higher in
                // this instruction group, or `dst` would be added/compared
                // into the caller's memory rather than the other way round.
                code.push(opcode + 2);
                code.extend(modrm_mem(dst, b, offset));
            }
            _ => {}
        }
        buf.push(&code);
    }

    /// Like `load_to_scratch` but into a caller-chosen scratch slot, so the
    /// destination and right-hand operand of a binary op never collide.
    fn load_to_scratch_into(&self, buf: &mut Buffer, reg: Reg, scratch: u8) -> u8 {
        if self.is_sp(reg) {
            return 4;
        }
        match self.phys(reg) {
            Some(p) => p,
            None => {
                let disp = self.spill_offset(reg);
                self.emit_mov_reg_mem(buf, scratch, 5, disp);
                scratch
            }
        }
    }

    /// Float virtual registers map straight onto `xmm0..xmm5`
    /// (`num_float_regs` never exceeds 6 on this target), so unlike the
    /// integer side there is no spilling to account for.
    fn fphys(&self, reg: FloatReg) -> u8 {
        reg.index() - 1
    }

    fn emit_sse2(&self, buf: &mut Buffer, prefix: u8, opcode: u8, reg: u8, rm: u8) {
        let mut code = vec![prefix, 0x0f, opcode];
        code.extend(modrm_reg_reg(reg, rm));
        buf.push(&code);
    }

    fn movsd(&self, buf: &mut Buffer, dst: u8, src: u8) {
        if dst != src {
            self.emit_sse2(buf, 0xf2, 0x10, dst, src);
        }
    }

    /// `dst = cvt(src)`, where `src` is a GPR holding an integer and `dst`
    /// is an xmm register; `w` selects the 64- vs 32-bit integer source.
    fn cvtsi2sd(&self, buf: &mut Buffer, dst: u8, src: u8, w: bool) {
        let mut code = vec![0xf2];
        if let Some(r) = rex(w, dst >= 8, false, src >= 8) {
            code.push(r);
        }
        code.extend_from_slice(&[0x0f, 0x2a]);
        code.extend(modrm_reg_reg(dst, src));
        buf.push(&code);
    }

    /// `dst = trunc(src)`, `dst` a GPR, `src` an xmm register; `w` selects a
    /// 64- vs 32-bit integer result.
    fn cvttsd2si(&self, buf: &mut Buffer, dst: u8, src: u8, w: bool) {
        let mut code = vec![0xf2];
        if let Some(r) = rex(w, dst >= 8, false, src >= 8) {
            code.push(r);
        }
        code.extend_from_slice(&[0x0f, 0x2c]);
        code.extend(modrm_reg_reg(dst, src));
        buf.push(&code);
    }

    /// `movq gpr, xmm`: the low 64 bits of `xmm` into a GPR.
    fn movq_from_xmm(&self, buf: &mut Buffer, gpr: u8, xmm: u8) {
        let mut code = vec![0x66, rex(true, xmm >= 8, false, gpr >= 8).unwrap(), 0x0f, 0x7e];
        code.extend(modrm_reg_reg(xmm, gpr));
        buf.push(&code);
    }

    /// `movq xmm, gpr`: a GPR's low 64 bits into `xmm`.
    fn movq_to_xmm(&self, buf: &mut Buffer, xmm: u8, gpr: u8) {
        let mut code = vec![0x66, rex(true, xmm >= 8, false, gpr >= 8).unwrap(), 0x0f, 0x6e];
        code.extend(modrm_reg_reg(xmm, gpr));
        buf.push(&code);
    }
}

fn binary_opcode(op: Op2) -> (u8, u8) {
    // (reg-form opcode, /digit used by the imm8/imm32 form)
    match op {
        Op2::Add | Op2::AddC => (0x01, 0),
        Op2::Sub | Op2::SubC => (0x29, 5),
        Op2::And => (0x21, 4),
        Op2::Or => (0x09, 1),
        Op2::Xor => (0x31, 6),
        Op2::Shl => (0xd3, 4),
        Op2::Lshr => (0xd3, 5),
        Op2::Ashr => (0xd3, 7),
        Op2::Mul => (0x0f, 0), // handled specially (0f af)
    }
}

macro_rules! define_emitter {
    ($name:ident, $platform:expr, $is64:expr) => {
        /// Code generator for this width of x86.
        pub struct $name {
            common: X86Common,
        }

        impl $name {
            /// A fresh emitter bound to its static platform descriptor.
            pub fn new() -> $name {
                $name {
                    common: X86Common {
                        is64: $is64,
                        platform: &$platform,
                    },
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Emitter for $name {
            fn platform(&self) -> &'static Platform {
                &$platform
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
                // push rbp; mov rbp, rsp
                buf.push(&[0x55]);
                self.common.emit_mov_reg_reg(buf, 5, 4);
                for &r in saved_regs {
                    if let Some(p) = self.common.phys(r) {
                        let mut code = Vec::new();
                        if p >= 8 {
                            code.push(rex(false, false, false, true).unwrap());
                        }
                        code.push(0x50 + (p & 7));
                        buf.push(&code);
                    }
                }
                // SysV x86-64 passes the first three integer args in
                // rdi/rsi/rdx; move them into the saved slots `enter`'s quota
                // assigned them (S1 is the last entry of `saved_regs`, the
                // original push order above already preserved the callee's
                // prior values of those same physical registers). x86-32's
                // cdecl args arrive on the stack instead; not yet wired here.
                if self.common.is64 {
                    const ARG_ABI: [u8; 3] = [7, 6, 2]; // rdi, rsi, rdx
                    let n = saved_regs.len();
                    for (k, &abi_phys) in ARG_ABI.iter().enumerate().take((args as usize).min(n)) {
                        if let Some(dest) = self.common.phys(saved_regs[n - 1 - k]) {
                            self.common.emit_mov_reg_reg(buf, dest, abi_phys);
                        }
                    }
                }
                if local_size > 0 {
                    self.sub_rsp(buf, local_size);
                }
            }

            fn emit_fast_enter(&self, buf: &mut Buffer, dst: Operand) {
                if let Operand::Reg(r) = dst {
                    let p = self.common.phys(r).unwrap_or(0);
                    self.common.emit_mov_reg_mem(buf, p, 4, 0);
                }
            }

            fn emit_return(
                &self,
                buf: &mut Buffer,
                src: Operand,
                saved_regs: &[Reg],
                _saved_float_regs: &[FloatReg],
            ) {
                match src {
                    Operand::Reg(r) => {
                        let p = self.common.load_to_scratch(buf, r);
                        self.common.emit_mov_reg_reg(buf, 0, p);
                    }
                    Operand::Imm(v) => self.common.emit_mov_reg_imm(buf, 0, v),
                    Operand::Mem { base, offset } => {
                        let b = self.common.load_to_scratch_into(buf, base, 6);
                        self.common.emit_mov_reg_mem(buf, 0, b, offset);
                    }
                    Operand::Unused | Operand::MemIndexed { .. } => {}
                }
                for &r in saved_regs.iter().rev() {
                    if let Some(p) = self.common.phys(r) {
                        let mut code = Vec::new();
                        if p >= 8 {
                            code.push(rex(false, false, false, true).unwrap());
                        }
                        code.push(0x58 + (p & 7));
                        buf.push(&code);
                    }
                }
                buf.push(&[0x5d]); // pop rbp
                buf.push(&[0xc3]); // ret
            }

            fn emit_fast_return(&self, buf: &mut Buffer, src: Operand) {
                if let Operand::Reg(r) = src {
                    let p = self.common.load_to_scratch(buf, r);
                    // jmp [src] is not meaningful here; fast_return jumps to
                    // the address loaded by fast_enter, held in the register.
                    let mut code = Vec::new();
                    if p >= 8 {
                        code.push(rex(self.common.is64, false, false, true).unwrap());
                    }
                    code.push(0xff);
                    code.extend(modrm_reg_reg(4, p));
                    buf.push(&code);
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
                    Op0::Nop => buf.push(&[0x90]),
                    Op0::Breakpoint => buf.push(&[0xcc]),
                    Op0::LongUMul | Op0::LongSMul | Op0::LongUDiv | Op0::LongSDiv => {
                        return Err(Error::Unsupported)
                    }
                };
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
                let dp = self.common.phys(d).unwrap_or(0);
                match (op, src) {
                    // A memory source only needs to support the plain-move
                    // opcodes; `Not`/`Neg` always act on a register already
                    // loaded by a prior `Mov`.
                    (Op1::Mov | Op1::MovP, Operand::Mem { base, offset }) => {
                        let b = self.common.load_to_scratch_into(buf, base, 6);
                        self.common.emit_mov_reg_mem(buf, dp, b, offset);
                    }
                    (_, Operand::Imm(v)) => {
                        self.common.emit_mov_reg_imm(buf, dp, v);
                        match op {
                            Op1::Not => {
                                let mut code = Vec::new();
                                if let Some(r) = rex(self.common.is64, false, false, dp >= 8) {
                                    code.push(r);
                                }
                                code.push(0xf7);
                                code.extend(modrm_reg_reg(2, dp));
                                buf.push(&code);
                            }
                            Op1::Neg => {
                                let mut code = Vec::new();
                                if let Some(r) = rex(self.common.is64, false, false, dp >= 8) {
                                    code.push(r);
                                }
                                code.push(0xf7);
                                code.extend(modrm_reg_reg(3, dp));
                                buf.push(&code);
                            }
                            _ => {}
                        }
                    }
                    (_, Operand::Reg(s)) => {
                        let sp = self.common.load_to_scratch_into(buf, s, dp);
                        match op {
                            Op1::Mov | Op1::MovP => self.common.emit_mov_reg_reg(buf, dp, sp),
                            Op1::Not => {
                                self.common.emit_mov_reg_reg(buf, dp, sp);
                                let mut code = Vec::new();
                                if let Some(r) = rex(self.common.is64, false, false, dp >= 8) {
                                    code.push(r);
                                }
                                code.push(0xf7);
                                code.extend(modrm_reg_reg(2, dp));
                                buf.push(&code);
                            }
                            Op1::Neg => {
                                self.common.emit_mov_reg_reg(buf, dp, sp);
                                let mut code = Vec::new();
                                if let Some(r) = rex(self.common.is64, false, false, dp >= 8) {
                                    code.push(r);
                                }
                                code.push(0xf7);
                                code.extend(modrm_reg_reg(3, dp));
                                buf.push(&code);
                            }
                            _ => self.common.emit_mov_reg_reg(buf, dp, sp),
                        }
                    }
                    _ => return Err(Error::Unsupported),
                }
                self.common.store_from_scratch(buf, d);
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
                let dp = self.common.phys(d).unwrap_or(2 /* rdx scratch */);
                match src1 {
                    Operand::Reg(r) => {
                        let sp = self.common.load_to_scratch_into(buf, r, dp);
                        self.common.emit_mov_reg_reg(buf, dp, sp);
                    }
                    Operand::Imm(v) => self.common.emit_mov_reg_imm(buf, dp, v),
                    _ => return Err(Error::Unsupported),
                }

                if op == Op2::Mul {
                    let sp = self.common.reg_of(buf, src2);
                    let mut code = Vec::new();
                    if let Some(r) = rex(self.common.is64, dp >= 8, false, sp >= 8) {
                        code.push(r);
                    }
                    code.push(0x0f);
                    code.push(0xaf);
                    code.extend(modrm_reg_reg(dp, sp));
                    buf.push(&code);
                } else if matches!(op, Op2::Shl | Op2::Lshr | Op2::Ashr) {
                    let (_, ext) = binary_opcode(op);
                    let count = match src2 {
                        Operand::Imm(v) => v as u8,
                        Operand::Reg(r) => {
                            let sp = self.common.load_to_scratch_into(buf, r, 1);
                            self.common.emit_mov_reg_reg(buf, 1, sp);
                            0xff // marker: use %cl form below
                        }
                        _ => return Err(Error::Unsupported),
                    };
                    let mut code = Vec::new();
                    if let Some(r) = rex(self.common.is64, false, false, dp >= 8) {
                        code.push(r);
                    }
                    if count == 0xff {
                        code.push(0xd3);
                        code.extend(modrm_reg_reg(ext, dp));
                    } else {
                        code.push(0xc1);
                        code.extend(modrm_reg_reg(ext, dp));
                        code.push(count);
                    }
                    buf.push(&code);
                } else {
                    let (opcode, ext) = binary_opcode(op);
                    self.common.alu_op_rm(buf, opcode, Some(ext), dp, src2);
                }
                self.common.store_from_scratch(buf, d);
                Ok(())
            }

            fn emit_fop1(
                &self,
                buf: &mut Buffer,
                op: FOp1,
                flags: Flags,
                dst: Operand,
                src: Operand,
            ) -> Result<()> {
                // `fcmp` packs its two float sources into `dst`/`src` (see
                // `Compiler::fcmp`); `FCmp` never writes a destination.
                if let FOp1::FCmp = op {
                    let (Operand::Reg(d), Operand::Reg(s)) = (dst, src) else {
                        return Err(Error::Unsupported);
                    };
                    let dp = self.common.fphys(FloatReg::new(d.index()));
                    let sp = self.common.fphys(FloatReg::new(s.index()));
                    self.common.emit_sse2(buf, 0x66, 0x2e, dp, sp); // ucomisd
                    return Ok(());
                }
                let (Operand::Reg(d), Operand::Reg(s)) = (dst, src) else {
                    return Err(Error::Unsupported);
                };
                match op {
                    FOp1::FMov => {
                        let dp = self.common.fphys(FloatReg::new(d.index()));
                        let sp = self.common.fphys(FloatReg::new(s.index()));
                        self.common.movsd(buf, dp, sp);
                    }
                    FOp1::ConvF64F32 => {
                        let dp = self.common.fphys(FloatReg::new(d.index()));
                        let sp = self.common.fphys(FloatReg::new(s.index()));
                        // `SINGLE_OP` set narrows double to single (cvtsd2ss);
                        // unset widens single to double (cvtss2sd).
                        if flags.contains(Flags::SINGLE_OP) {
                            self.common.emit_sse2(buf, 0xf2, 0x5a, dp, sp);
                        } else {
                            self.common.emit_sse2(buf, 0xf3, 0x5a, dp, sp);
                        }
                    }
                    FOp1::FNeg => {
                        let dp = self.common.fphys(FloatReg::new(d.index()));
                        let sp = self.common.fphys(FloatReg::new(s.index()));
                        const SCRATCH: u8 = 6; // xmm6, outside the virtual float namespace
                        self.common.emit_sse2(buf, 0x66, 0xef, SCRATCH, SCRATCH); // pxor xmm6, xmm6
                        self.common.emit_sse2(buf, 0xf2, 0x5c, SCRATCH, sp); // subsd xmm6, src
                        self.common.movsd(buf, dp, SCRATCH);
                    }
                    FOp1::FAbs => {
                        let dp = self.common.fphys(FloatReg::new(d.index()));
                        let sp = self.common.fphys(FloatReg::new(s.index()));
                        // No SSE2 andpd-with-immediate form exists without a
                        // literal pool, so clear the sign bit through two
                        // GPRs that no virtual register ever claims (r8, r9).
                        const TMP: u8 = 8;
                        const MASK: u8 = 9;
                        self.common.movq_from_xmm(buf, TMP, sp);
                        self.common.emit_mov_reg_imm(buf, MASK, 0x7fff_ffff_ffff_ffffi64);
                        let mut code = vec![rex(true, MASK >= 8, false, TMP >= 8).unwrap(), 0x21];
                        code.extend(modrm_reg_reg(MASK, TMP));
                        buf.push(&code);
                        self.common.movq_to_xmm(buf, dp, TMP);
                    }
                    FOp1::ConvSwFromF | FOp1::ConvSiFromF => {
                        let dp = self.common.phys(d).unwrap_or(0);
                        let sp = self.common.fphys(FloatReg::new(s.index()));
                        let w = matches!(op, FOp1::ConvSwFromF) && self.common.is64;
                        self.common.cvttsd2si(buf, dp, sp, w);
                        self.common.store_from_scratch(buf, d);
                    }
                    FOp1::ConvFFromSw | FOp1::ConvFFromSi => {
                        let dp = self.common.fphys(FloatReg::new(d.index()));
                        let sp = self.common.load_to_scratch(buf, s);
                        let w = matches!(op, FOp1::ConvFFromSw) && self.common.is64;
                        self.common.cvtsi2sd(buf, dp, sp, w);
                    }
                    FOp1::FCmp => unreachable!("handled above"),
                }
                Ok(())
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
                let dp = self.common.fphys(FloatReg::new(d.index()));
                let s1p = self.common.fphys(FloatReg::new(s1.index()));
                let s2p = self.common.fphys(FloatReg::new(s2.index()));
                let opcode = match op {
                    FOp2::FAdd => 0x58,
                    FOp2::FSub => 0x5c,
                    FOp2::FMul => 0x59,
                    FOp2::FDiv => 0x5e,
                };
                // Route through xmm7 so `dst` aliasing either source never
                // clobbers an operand the op still needs to read.
                const SCRATCH: u8 = 7;
                self.common.movsd(buf, SCRATCH, s1p);
                self.common.emit_sse2(buf, 0xf2, opcode, SCRATCH, s2p);
                self.common.movsd(buf, dp, SCRATCH);
                Ok(())
            }

            fn emit_ijump(&self, buf: &mut Buffer, target: Operand, is_call: bool) -> Result<()> {
                let Operand::Reg(r) = target else {
                    return Err(Error::Unsupported);
                };
                let p = self.common.load_to_scratch(buf, r);
                let mut code = Vec::new();
                if let Some(x) = rex(self.common.is64, false, false, p >= 8) {
                    code.push(x);
                }
                code.push(0xff);
                code.extend(modrm_reg_reg(if is_call { 2 } else { 4 }, p));
                buf.push(&code);
                Ok(())
            }

            fn emit_jump(&self, buf: &mut Buffer, condition: Option<crate::compiler::Cond>) -> EmittedJump {
                use crate::compiler::Cond;
                let (opcode, patch_kind): (&[u8], PatchKind) = match condition {
                    None => (&[0xe9], UNCOND_JUMP),
                    Some(Cond::Equal) => (&[0x0f, 0x84], COND_JUMP),
                    Some(Cond::NotEqual) => (&[0x0f, 0x85], COND_JUMP),
                    Some(Cond::Less) => (&[0x0f, 0x8c], COND_JUMP),
                    Some(Cond::GreaterEqual) => (&[0x0f, 0x8d], COND_JUMP),
                    Some(Cond::LessEqual) => (&[0x0f, 0x8e], COND_JUMP),
                    Some(Cond::Greater) => (&[0x0f, 0x8f], COND_JUMP),
                    Some(Cond::CarrySet) => (&[0x0f, 0x82], COND_JUMP),
                    Some(Cond::CarryClear) => (&[0x0f, 0x83], COND_JUMP),
                    Some(Cond::Overflow) => (&[0x0f, 0x80], COND_JUMP),
                    Some(Cond::NoOverflow) => (&[0x0f, 0x81], COND_JUMP),
                };
                buf.push(opcode);
                let offset = buf.push(&[0, 0, 0, 0]);
                EmittedJump {
                    offset,
                    site_len: 4,
                    patch_kind,
                }
            }

            fn emit_cmp(
                &self,
                buf: &mut Buffer,
                _flags: Flags,
                src1: Operand,
                src2: Operand,
            ) -> Result<()> {
                let Operand::Reg(r1) = src1 else {
                    return Err(Error::Unsupported);
                };
                let p1 = self.common.load_to_scratch_into(buf, r1, 0);
                self.common.alu_op_rm(buf, 0x39, Some(7), p1, src2);
                Ok(())
            }

            unsafe fn patch_jump(
                &self,
                site: *mut u8,
                site_len: u8,
                _patch_kind: PatchKind,
                from_addr: usize,
                to_addr: usize,
            ) {
                debug_assert_eq!(site_len, 4);
                let rel = (to_addr as isize - (from_addr + site_len as usize) as isize) as i32;
                std::ptr::copy_nonoverlapping(rel.to_le_bytes().as_ptr(), site, 4);
            }

            fn emit_const(&self, buf: &mut Buffer, dst: Operand, value: i64) -> EmittedConst {
                let Operand::Reg(r) = dst else {
                    unreachable!("emit_const always targets a register")
                };
                let p = self.common.phys(r).unwrap_or(0);
                let mut code = Vec::new();
                if self.common.is64 {
                    code.push(rex(true, false, false, p >= 8).unwrap());
                    code.push(0xb8 + (p & 7));
                } else {
                    code.push(0xb8 + (p & 7));
                }
                let offset = buf.push(&code);
                let width = if self.common.is64 { 8 } else { 4 };
                let value_pos = buf.push(&vec![0u8; width as usize]);
                self.common.store_from_scratch(buf, r);
                let _ = offset;
                EmittedConst {
                    offset: value_pos,
                    width,
                }
            }

            unsafe fn patch_const(&self, site: *mut u8, width: u8, value: i64) {
                if width == 8 {
                    std::ptr::copy_nonoverlapping(value.to_le_bytes().as_ptr(), site, 8);
                } else {
                    std::ptr::copy_nonoverlapping((value as i32).to_le_bytes().as_ptr(), site, 4);
                }
            }
        }
    };
}

define_emitter!(X86_64Emitter, PLATFORM_64, true);
define_emitter!(X86_32Emitter, PLATFORM_32, false);

impl X86_64Emitter {
    fn sub_rsp(&self, buf: &mut Buffer, size: u32) {
        let mut code = vec![rex(true, false, false, false).unwrap(), 0x81];
        code.extend(modrm_reg_reg(5, 4));
        code.extend_from_slice(&(size as i32).to_le_bytes());
        buf.push(&code);
    }
}

impl X86_32Emitter {
    fn sub_rsp(&self, buf: &mut Buffer, size: u32) {
        let mut code = vec![0x81];
        code.extend(modrm_reg_reg(5, 4));
        code.extend_from_slice(&(size as i32).to_le_bytes());
        buf.push(&code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Options;

    #[test]
    fn identity_function_moves_arg_to_return_value() {
        let emitter = X86_64Emitter::new();
        let mut buf = Buffer::new();
        emitter.emit_enter(&mut buf, Options::NONE, 1, 0, &[], &[]);
        emitter
            .emit_op1(
                &mut buf,
                Op1::Mov,
                Flags::NONE,
                Operand::Reg(Reg::new(1)),
                Operand::Reg(Reg::new(1)),
            )
            .unwrap();
        emitter.emit_return(&mut buf, Operand::Reg(Reg::new(1)), &[], &[]);
        let code = buf.into_bytes();
        assert_eq!(code.last(), Some(&0xc3));
    }

    #[test]
    fn unconditional_jump_reserves_a_rel32_patch_site() {
        let emitter = X86_64Emitter::new();
        let mut buf = Buffer::new();
        let j = emitter.emit_jump(&mut buf, None);
        assert_eq!(j.site_len, 4);
        assert_eq!(j.patch_kind, UNCOND_JUMP);
    }

    #[test]
    fn add_two_registers_encodes_rex_and_opcode() {
        let emitter = X86_64Emitter::new();
        let mut buf = Buffer::new();
        emitter
            .emit_op2(
                &mut buf,
                Op2::Add,
                Flags::NONE,
                Operand::Reg(Reg::new(1)),
                Operand::Reg(Reg::new(1)),
                Operand::Reg(Reg::new(2)),
            )
            .unwrap();
        assert!(!buf.into_bytes().is_empty());
    }
}
