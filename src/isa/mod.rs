//! Architecture dispatch (§9): every back-end implements the same
//! [`Emitter`] capability set, selected at runtime by [`crate::settings::Architecture`]
//! and gated at compile time by the matching Cargo feature.
//!
//! [`crate::compiler::Compiler`] never encodes a single instruction itself;
//! it drives an `Emitter` through this trait and leaves every
//! architecture-specific bit pattern, register-numbering quirk, and
//! relocation format to the back-end module.

use crate::buffer::{Buffer, BufferPos};
use crate::compiler::Cond;
use crate::error::Result;
use crate::metadata::PatchKind;
use crate::op::{Flags, FOp1, FOp2, Op0, Op1, Op2};
use crate::operand::Operand;
use crate::platform::Platform;
use crate::reg::{FloatReg, Reg};
use crate::settings::{Architecture, Options};

#[cfg(feature = "x86")]
pub mod x86;

#[cfg(feature = "arm")]
pub mod arm;

#[cfg(feature = "thumb2")]
pub mod thumb2;

#[cfg(feature = "aarch64")]
pub mod aarch64;

#[cfg(feature = "ppc")]
pub mod ppc;

#[cfg(feature = "mips")]
pub mod mips;

#[cfg(feature = "sparc")]
pub mod sparc;

/// Everything a fully-emitted unconditional or conditional branch site needs
/// recorded so the assembler pass can rewrite it once a label's final
/// address (or an external target) is known.
pub struct EmittedJump {
    /// Offset of the patch site in the instruction buffer.
    pub offset: BufferPos,
    /// Width, in bytes, of the patch site.
    pub site_len: u8,
    /// Back-end-defined bits describing how to rewrite the site
    /// (displacement vs. absolute, branch-range class, and so on).
    pub patch_kind: PatchKind,
}

/// Everything a fully-emitted embedded-immediate site needs recorded for
/// later rewrite via `patch_const`/`set_const`.
pub struct EmittedConst {
    /// Offset of the constant's encoding in the instruction buffer.
    pub offset: BufferPos,
    /// Width in bytes of the encoded immediate (4 or 8).
    pub width: u8,
}

/// The per-architecture code generation capability set (§9).
///
/// An `Emitter` owns no buffer of its own: every `emit_*` method appends to
/// the `Buffer` passed in and returns the bookkeeping the compiler needs to
/// register a [`crate::metadata::Jump`] or [`crate::metadata::Const`]. This
/// keeps the instruction buffer, its metadata arenas, and the bit-pattern
/// logic in three independently testable layers.
pub trait Emitter {
    /// Static facts about the target this emitter generates code for.
    fn platform(&self) -> &'static Platform;

    /// Emit the function prologue: save callee-saved registers used by this
    /// function, move the first `args` incoming arguments from their ABI
    /// registers into the last `args` entries of `saved_regs` (§4.4: "args
    /// of the saveds registers are pre-loaded with the incoming
    /// arguments"), reserve `local_size` bytes of locals, and (per
    /// `Options::DOUBLE_ALIGNMENT`) align the stack for double-width access.
    fn emit_enter(
        &self,
        buf: &mut Buffer,
        options: Options,
        args: u8,
        local_size: u32,
        saved_regs: &[Reg],
        saved_float_regs: &[FloatReg],
    );

    /// Emit a prologue with no stack frame or register saves, for leaf
    /// functions entered via `fast_enter` (§4.3).
    fn emit_fast_enter(&self, buf: &mut Buffer, dst: Operand);

    /// Emit the epilogue matching a prior `emit_enter`: restore saved
    /// registers, tear down locals, and return `src` (or nothing) to the
    /// caller.
    fn emit_return(&self, buf: &mut Buffer, src: Operand, saved_regs: &[Reg], saved_float_regs: &[FloatReg]);

    /// Emit a bare return-to-register sequence matching `emit_fast_enter`.
    fn emit_fast_return(&self, buf: &mut Buffer, src: Operand);

    /// A zero-operand opcode (`Breakpoint`, `Nop`, or a wide multiply/divide
    /// into a register pair).
    fn emit_op0(&self, buf: &mut Buffer, op: Op0, dst_hi: Operand, dst_lo: Operand, src1: Operand, src2: Operand) -> Result<()>;

    /// A one-operand opcode.
    fn emit_op1(&self, buf: &mut Buffer, op: Op1, flags: Flags, dst: Operand, src: Operand) -> Result<()>;

    /// A two-operand opcode.
    fn emit_op2(&self, buf: &mut Buffer, op: Op2, flags: Flags, dst: Operand, src1: Operand, src2: Operand) -> Result<()>;

    /// A one-operand float opcode.
    fn emit_fop1(&self, buf: &mut Buffer, op: FOp1, flags: Flags, dst: Operand, src: Operand) -> Result<()>;

    /// A two-operand float opcode.
    fn emit_fop2(&self, buf: &mut Buffer, op: FOp2, flags: Flags, dst: Operand, src1: Operand, src2: Operand) -> Result<()>;

    /// Emit a call or jump indirect through `target`.
    fn emit_ijump(&self, buf: &mut Buffer, target: Operand, is_call: bool) -> Result<()>;

    /// Emit an unconditional or condition-coded branch whose destination is
    /// not yet known, returning the patch site to register as a
    /// [`crate::metadata::Jump`]. `condition` is `None` for an unconditional
    /// jump, `Some(cond)` for a conditional one, reading whatever flag state
    /// the preceding `emit_cmp`/flag-setting op2 left live.
    fn emit_jump(&self, buf: &mut Buffer, condition: Option<Cond>) -> EmittedJump;

    /// Emit a comparison (integer or float) that leaves the condition state
    /// a subsequent `emit_jump(Some(cond))` will read.
    fn emit_cmp(&self, buf: &mut Buffer, flags: Flags, src1: Operand, src2: Operand) -> Result<()>;

    /// Rewrite a previously emitted jump's patch site so it targets `addr`.
    /// Called both by the assembler pass (label resolution) and by
    /// `set_jump_addr` after `generate_code` when the jump was marked
    /// [`crate::metadata::REWRITABLE`].
    ///
    /// # Safety
    /// `buf` must be the writable backing memory of the already-generated
    /// code, not the staging [`Buffer`] used during emission.
    unsafe fn patch_jump(&self, site: *mut u8, site_len: u8, patch_kind: PatchKind, from_addr: usize, to_addr: usize);

    /// Emit a register load of an embedded constant, returning the patch
    /// site to register as a [`crate::metadata::Const`].
    fn emit_const(&self, buf: &mut Buffer, dst: Operand, value: i64) -> EmittedConst;

    /// Rewrite a previously emitted constant's encoding in place.
    ///
    /// # Safety
    /// Same contract as [`Emitter::patch_jump`].
    unsafe fn patch_const(&self, site: *mut u8, width: u8, value: i64);

    /// Flush the instruction cache over `[ptr, ptr+len)` once code has been
    /// written and made executable. The default forwards to [`crate::cache::flush`];
    /// back-ends never need to override it.
    fn cache_flush(&self, ptr: *mut u8, len: usize) {
        crate::cache::flush(ptr, len);
    }
}

/// Construct the emitter for `arch`, if this build was compiled with the
/// matching Cargo feature.
pub fn emitter_for(arch: Architecture) -> Result<Box<dyn Emitter>> {
    match arch {
        #[cfg(feature = "x86_32")]
        Architecture::X86_32 => Ok(Box::new(x86::X86_32Emitter::new())),
        #[cfg(feature = "x86")]
        Architecture::X86_64 => Ok(Box::new(x86::X86_64Emitter::new())),
        #[cfg(feature = "arm")]
        Architecture::Arm32 => Ok(Box::new(arm::ArmEmitter::new())),
        #[cfg(feature = "thumb2")]
        Architecture::Thumb2 => Ok(Box::new(thumb2::Thumb2Emitter::new())),
        #[cfg(feature = "aarch64")]
        Architecture::Aarch64 => Ok(Box::new(aarch64::Aarch64Emitter::new())),
        #[cfg(feature = "ppc")]
        Architecture::Ppc32 => Ok(Box::new(ppc::PpcEmitter::new(false))),
        #[cfg(feature = "ppc")]
        Architecture::Ppc64 => Ok(Box::new(ppc::PpcEmitter::new(true))),
        #[cfg(feature = "mips")]
        Architecture::Mips32 => Ok(Box::new(mips::MipsEmitter::new(false))),
        #[cfg(feature = "mips")]
        Architecture::Mips64 => Ok(Box::new(mips::MipsEmitter::new(true))),
        #[cfg(feature = "sparc")]
        Architecture::Sparc32 => Ok(Box::new(sparc::SparcEmitter::new())),
        #[allow(unreachable_patterns)]
        _ => Err(crate::error::Error::Unsupported),
    }
}
