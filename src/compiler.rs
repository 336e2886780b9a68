//! The `Compiler` state machine: the public emission API described in §6,
//! driving a [`crate::isa::Emitter`] over a pair of [`Buffer`]s and the
//! [`Metadata`] arenas.
//!
//! Lifecycle (§3): *created* → *configured* (the first `enter`/`set_context`
//! fixes register quotas and local-frame size) → *emitting* (append-only) →
//! *generated* (`generate_code` latches `AlreadyCompiled`) → *freed*. Every
//! emission method short-circuits once [`Compiler::error`] is set, matching
//! the latching policy in §7/§8 invariant 1.

use log::{debug, trace as log_trace};

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::exec::{alloc_exec, ExecMemory};
use crate::isa::{emitter_for, Emitter};
use crate::metadata::{ConstId, JumpId, JumpTarget, LabelId, Metadata, PatchKind, REWRITABLE};
use crate::op::{Flags, FOp1, FOp2, Op0, Op1, Op2};
use crate::operand::Operand;
use crate::reg::{FloatReg, Reg, RegQuotas};
use crate::settings::{Architecture, Options};
use crate::trace;

/// `requested`'s `SET_*` bits must all be present in `allowed` (§4.1
/// per-opcode flag-legality table); `is_self_consistent` is checked
/// separately since `KEEP_FLAGS` isn't itself part of any opcode's table.
fn check_flags(requested: Flags, allowed: Flags) -> Result<()> {
    if !requested.is_self_consistent() {
        return Err(Error::BadArgument);
    }
    for bit in [Flags::SET_E, Flags::SET_U, Flags::SET_S, Flags::SET_O, Flags::SET_C] {
        if requested.contains(bit) && !allowed.contains(bit) {
            return Err(Error::BadArgument);
        }
    }
    Ok(())
}

/// A resolved label position, returned by [`Compiler::label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(pub(crate) LabelId);

/// A branch not yet resolved to a target, returned by [`Compiler::jump`] /
/// [`Compiler::cmp`] / [`Compiler::fcmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jump(pub(crate) JumpId);

/// An embedded immediate whose site can be rewritten later via
/// [`Compiler::set_const`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Const(pub(crate) crate::metadata::ConstId);

/// The relation an `cmp`/`fcmp`/conditional `jump`/`op_flags` call tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    CarrySet,
    CarryClear,
    Overflow,
    NoOverflow,
}

impl Cond {
    /// The `Flags::SET_*` bit a comparison under this relation must request.
    fn set_flag(self) -> Flags {
        match self {
            Cond::Equal | Cond::NotEqual => Flags::SET_E,
            Cond::Less | Cond::GreaterEqual | Cond::Greater | Cond::LessEqual => Flags::SET_S,
            Cond::CarrySet | Cond::CarryClear => Flags::SET_C,
            Cond::Overflow | Cond::NoOverflow => Flags::SET_O,
        }
    }
}

/// The entry pointer `generate_code` hands back. On Thumb-2 its low bit is
/// set (interworking convention); on PPC-64 ELFv1/AIX it points to a TOC
/// descriptor rather than directly at code (§4.7k).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeEntry(pub usize);

enum State {
    Created,
    Configured,
    Generated,
}

/// A single JIT compilation session (§3 "Compiler"). Not `Sync`: a compiler
/// is owned by one thread of control while emitting (§5 "Scheduling model").
pub struct Compiler {
    emitter: Box<dyn Emitter>,
    options: Options,
    arch: Architecture,
    buf: Buffer,
    meta: Metadata,
    error: Option<Error>,
    state: State,
    quotas: RegQuotas,
    local_size: u32,
    saved_regs: Vec<Reg>,
    saved_float_regs: Vec<FloatReg>,
    code: Option<ExecMemory>,
    /// `(absolute byte offset within the generated region, site length,
    /// patch kind)` per jump, cached at `generate_code` time since the
    /// staging `Buffer` (and its `BufferPos` handles) is consumed there.
    jump_sites: Vec<(JumpId, usize, u8, PatchKind)>,
    /// `(absolute byte offset, width)` per constant, same reason.
    const_sites: Vec<(ConstId, usize, u8)>,
}

impl Compiler {
    /// Start a fresh, empty session targeting `arch`. Fails only if this
    /// build was not compiled with the Cargo feature for `arch`.
    pub fn create(arch: Architecture) -> Result<Compiler> {
        let emitter = emitter_for(arch)?;
        Ok(Compiler {
            emitter,
            options: Options::NONE,
            arch,
            buf: Buffer::new(),
            meta: Metadata::new(),
            error: None,
            state: State::Created,
            quotas: RegQuotas {
                args: 0,
                scratches: 0,
                saveds: 0,
                fscratches: 0,
                fsaveds: 0,
            },
            local_size: 0,
            saved_regs: Vec::new(),
            saved_float_regs: Vec::new(),
            code: None,
            jump_sites: Vec::new(),
            const_sites: Vec::new(),
        })
    }

    /// The architecture this session was created for.
    pub fn architecture(&self) -> Architecture {
        self.arch
    }

    /// True once [`Compiler::generate_code`] has produced executable code
    /// (§3 lifecycle's *generated* state).
    pub fn is_generated(&self) -> bool {
        matches!(self.state, State::Generated)
    }

    /// The latched error, if any (`None` == success), matching the "return
    /// the code, let the caller decide" policy of §7.
    pub fn last_error(&self) -> Option<Error> {
        self.error
    }

    /// Drop every fragment, metadata record, and scratch this compiler
    /// owns. Does *not* release previously generated code (§3 ownership);
    /// that happens only via [`Compiler::free_code`].
    pub fn free(self) {
        debug!("compiler: freeing session for {}", self.arch);
        // Buffers and metadata drop with `self`; nothing else to do. This
        // method exists so a `free()` call appears explicitly in client
        // code, matching the original's explicit teardown API.
    }

    fn fail(&mut self, err: Error) -> Error {
        if self.error.is_none() {
            self.error = Some(err);
        }
        self.error.unwrap()
    }

    /// Short-circuit if an error already latched; the emission protocol's
    /// step (1) (§4.4).
    fn check(&self) -> Result<()> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn saved_regs_from_quotas(&self, num_regs: u8) -> Vec<Reg> {
        let first = num_regs - self.quotas.saveds + 1;
        (first..=num_regs).map(Reg::new).collect()
    }

    fn saved_float_regs_from_quotas(&self, num_float_regs: u8) -> Vec<FloatReg> {
        let first = num_float_regs - self.quotas.fsaveds + 1;
        (first..=num_float_regs).map(FloatReg::new).collect()
    }

    /// `[SP+imm]` operands are adjusted so the client-visible local frame
    /// starts at logical zero (§4.4 step 3, §8 invariant 3).
    fn adjust_locals(&self, op: Operand) -> Operand {
        let locals_offset = i64::from(self.emitter.platform().locals_offset);
        match op {
            Operand::Mem { base, offset } if base == Reg::sp(self.emitter.platform().num_regs) => {
                Operand::Mem { base, offset: offset + locals_offset }
            }
            other => other,
        }
    }

    fn configure(&mut self, options: Options, args: u8, scratches: u8, saveds: u8, fscratches: u8, fsaveds: u8, local_size: u32) -> Result<()> {
        self.check()?;
        let platform = self.emitter.platform();
        if args > 3 || scratches + saveds > platform.num_regs || args > saveds || local_size > 65536 {
            return Err(self.fail(Error::BadArgument));
        }
        self.options = options;
        self.quotas = RegQuotas { args, scratches, saveds, fscratches, fsaveds };
        self.local_size = round_local_size(local_size, options);
        self.saved_regs = self.saved_regs_from_quotas(platform.num_regs);
        self.saved_float_regs = self.saved_float_regs_from_quotas(platform.num_float_regs);
        self.state = State::Configured;
        Ok(())
    }

    /// Fix register quotas and local-frame size, and emit the function
    /// prologue (save callee-saved registers, reserve locals).
    pub fn enter(&mut self, options: Options, args: u8, scratches: u8, saveds: u8, fscratches: u8, fsaveds: u8, local_size: u32) -> Result<()> {
        self.configure(options, args, scratches, saveds, fscratches, fsaveds, local_size)?;
        self.emitter.emit_enter(&mut self.buf, self.options, args, self.local_size, &self.saved_regs, &self.saved_float_regs);
        trace::log_enter(self.arch, &self.quotas, self.local_size);
        Ok(())
    }

    /// Fix register quotas and local-frame size without emitting a
    /// prologue, for code that will be entered via [`Compiler::fast_enter`]
    /// or spliced into an existing frame.
    pub fn set_context(&mut self, options: Options, args: u8, scratches: u8, saveds: u8, fscratches: u8, fsaveds: u8, local_size: u32) -> Result<()> {
        self.configure(options, args, scratches, saveds, fscratches, fsaveds, local_size)
    }

    /// Emit the epilogue matching `enter`, returning `src` to the caller.
    pub fn ret(&mut self, op: Op1, src: Operand) -> Result<()> {
        self.check()?;
        let _ = op;
        let src = self.adjust_locals(src);
        self.emitter.emit_return(&mut self.buf, src, &self.saved_regs, &self.saved_float_regs);
        log_trace!("return {:?}", src);
        Ok(())
    }

    /// Enter a leaf function without a stack frame, preserving the caller's
    /// frame; `dst` receives the return address.
    pub fn fast_enter(&mut self, dst: Operand) -> Result<()> {
        self.check()?;
        self.emitter.emit_fast_enter(&mut self.buf, dst);
        Ok(())
    }

    /// Return from a leaf function entered via [`Compiler::fast_enter`].
    pub fn fast_return(&mut self, src: Operand) -> Result<()> {
        self.check()?;
        self.emitter.emit_fast_return(&mut self.buf, src);
        Ok(())
    }

    /// A zero-operand opcode.
    pub fn op0(&mut self, op: Op0) -> Result<()> {
        self.check()?;
        self.emitter
            .emit_op0(&mut self.buf, op, Operand::Unused, Operand::Unused, Operand::Unused, Operand::Unused)
            .map_err(|e| self.fail(e))?;
        log_trace!("{}", trace::format_op0(op));
        Ok(())
    }

    /// A one-operand opcode: `dst = op(src)`.
    pub fn op1(&mut self, op: Op1, flags: Flags, dst: Operand, src: Operand) -> Result<()> {
        self.check()?;
        check_flags(flags, op.allowed_flags()).map_err(|e| self.fail(e))?;
        let dst = self.adjust_locals(dst);
        let src = self.adjust_locals(src);
        self.emitter.emit_op1(&mut self.buf, op, flags, dst, src).map_err(|e| self.fail(e))?;
        log_trace!("{}", trace::format_op1(op, flags, dst, src));
        Ok(())
    }

    /// A two-operand opcode: `dst = src1 op src2`.
    pub fn op2(&mut self, op: Op2, flags: Flags, dst: Operand, src1: Operand, src2: Operand) -> Result<()> {
        self.check()?;
        check_flags(flags, op.allowed_flags()).map_err(|e| self.fail(e))?;
        let dst = self.adjust_locals(dst);
        let src1 = self.adjust_locals(src1);
        let src2 = self.adjust_locals(src2);
        self.emitter.emit_op2(&mut self.buf, op, flags, dst, src1, src2).map_err(|e| self.fail(e))?;
        log_trace!("{}", trace::format_op2(op, flags, dst, src1, src2));
        Ok(())
    }

    /// A one-operand float opcode.
    pub fn fop1(&mut self, op: FOp1, flags: Flags, fdst: Operand, fsrc: Operand) -> Result<()> {
        self.check()?;
        self.emitter.emit_fop1(&mut self.buf, op, flags, fdst, fsrc).map_err(|e| self.fail(e))?;
        Ok(())
    }

    /// A two-operand float opcode.
    pub fn fop2(&mut self, op: FOp2, flags: Flags, fdst: Operand, fsrc1: Operand, fsrc2: Operand) -> Result<()> {
        self.check()?;
        self.emitter.emit_fop2(&mut self.buf, op, flags, fdst, fsrc1, fsrc2).map_err(|e| self.fail(e))?;
        Ok(())
    }

    /// Mark the current position in the instruction stream as a jump
    /// target.
    pub fn label(&mut self) -> Result<Label> {
        self.check()?;
        let pos = self.buf.ensure(0);
        Ok(Label(self.meta.push_label(pos)))
    }

    /// Emit an unconditional or condition-coded branch to a not-yet-known
    /// destination; resolve it with [`Compiler::set_label`] or
    /// [`Compiler::set_target`] before [`Compiler::generate_code`].
    pub fn jump(&mut self, cond: Option<Cond>) -> Result<Jump> {
        self.check()?;
        let emitted = self.emitter.emit_jump(&mut self.buf, cond);
        let id = self.meta.push_jump(emitted.offset, emitted.site_len, emitted.patch_kind);
        log_trace!("jump{}", trace::cond_suffix(cond));
        Ok(Jump(id))
    }

    /// Fuse a comparison with a subsequent conditional branch (§4.5):
    /// lower `src1 cond src2` to a flag-setting comparison followed by a
    /// conditional jump, returning the unresolved jump.
    pub fn cmp(&mut self, cond: Cond, src1: Operand, src2: Operand) -> Result<Jump> {
        self.check()?;
        let src1 = self.adjust_locals(src1);
        let src2 = self.adjust_locals(src2);
        let flags = cond.set_flag();
        self.emitter.emit_cmp(&mut self.buf, flags, src1, src2).map_err(|e| self.fail(e))?;
        self.jump(Some(cond))
    }

    /// Floating-point analogue of [`Compiler::cmp`]: lower `fsrc1 cond
    /// fsrc2` to a flag-setting comparison followed by a conditional jump.
    /// `FCmp` is the one `FOp1` opcode that reads two sources instead of
    /// writing a destination, so it packs `fsrc1` into `emit_fop1`'s `dst`
    /// slot and `fsrc2` into its `src` slot rather than leaving a slot idle.
    pub fn fcmp(&mut self, cond: Cond, fsrc1: Operand, fsrc2: Operand) -> Result<Jump> {
        self.check()?;
        let flags = cond.set_flag();
        self.emitter.emit_fop1(&mut self.buf, FOp1::FCmp, flags, fsrc1, fsrc2).map_err(|e| self.fail(e))?;
        self.jump(Some(cond))
    }

    /// Resolve `jump` to land on `label`.
    pub fn set_label(&mut self, jump: Jump, label: Label) -> Result<()> {
        self.check()?;
        self.meta.set_label(jump.0, label.0);
        Ok(())
    }

    /// Resolve `jump` to land on a fixed absolute address (e.g. a host
    /// function to call into).
    pub fn set_target(&mut self, jump: Jump, abs: usize) -> Result<()> {
        self.check()?;
        self.meta.set_target(jump.0, abs);
        Ok(())
    }

    /// Emit an indirect call or jump through a register operand.
    pub fn ijump(&mut self, src: Operand, is_call: bool) -> Result<()> {
        self.check()?;
        self.emitter.emit_ijump(&mut self.buf, src, is_call).map_err(|e| self.fail(e))?;
        Ok(())
    }

    /// Materialize `cond` as a 0/1 value in `dst` (when `src`/`op` request a
    /// plain move) or fold it into an and/or/xor with `src` (§6
    /// "op_flags"). Implemented generically via a conditional branch plus
    /// two immediate moves; per-architecture conditional-move fusions are a
    /// possible future optimization, not required for correctness.
    pub fn op_flags(&mut self, op: Op1, dst: Operand, src: Operand, cond: Cond) -> Result<()> {
        self.check()?;
        let _ = src;
        let taken = self.jump(Some(cond))?;
        self.op1(Op1::Mov, Flags::NONE, dst, Operand::Imm(0))?;
        let done = self.jump(None)?;
        let target = self.label()?;
        self.set_label(taken, target)?;
        self.op1(op, Flags::NONE, dst, Operand::Imm(1))?;
        let end = self.label()?;
        self.set_label(done, end)?;
        Ok(())
    }

    /// Compute `dst = [frame base] + offset`, i.e. the address of a local
    /// variable, honoring the same local-offset adjustment as memory
    /// operands (§4.4).
    pub fn local_base(&mut self, dst: Operand, offset: i32) -> Result<()> {
        self.check()?;
        let sp = Reg::sp(self.emitter.platform().num_regs);
        let src = self.adjust_locals(Operand::Mem { base: sp, offset: i64::from(offset) });
        let Operand::Mem { base, offset: adjusted } = src else {
            unreachable!()
        };
        self.op2(Op2::Add, Flags::NONE, dst, Operand::Reg(base), Operand::Imm(adjusted))
    }

    /// Embed a rewritable immediate, returning a handle for later
    /// [`Compiler::set_const`] calls.
    pub fn emit_const(&mut self, dst: Operand, init: i64) -> Result<Const> {
        self.check()?;
        let emitted = self.emitter.emit_const(&mut self.buf, dst, init);
        let id = self.meta.push_const(emitted.offset, emitted.width);
        Ok(Const(id))
    }

    /// The physical register index backing virtual register `vreg` on this
    /// target, for clients that need to interoperate with raw calling
    /// conventions (e.g. `op_custom` sequences).
    pub fn get_reg_index(&self, vreg: Reg) -> Option<u8> {
        if vreg.is_unused() {
            return None;
        }
        Some(vreg.index())
    }

    /// Insert raw encoded bytes verbatim into the instruction stream,
    /// bypassing the LIR model entirely (§6 "op_custom").
    pub fn op_custom(&mut self, bytes: &[u8]) -> Result<()> {
        self.check()?;
        let valid_len = match self.arch {
            Architecture::Thumb2 => bytes.len() == 2 || bytes.len() == 4,
            Architecture::X86_32 | Architecture::X86_64 => (1..=15).contains(&bytes.len()),
            _ => bytes.len() == 4,
        };
        if !valid_len {
            return Err(self.fail(Error::BadArgument));
        }
        self.buf.push(bytes);
        Ok(())
    }

    /// Run the assembler pass (§4.7): allocate executable memory, copy
    /// emitted bytes, resolve labels, patch jumps and constants, flush the
    /// instruction cache, and latch `AlreadyCompiled` so further emission
    /// fails loudly.
    pub fn generate_code(&mut self) -> Result<CodeEntry> {
        self.check()?;
        if !self.meta.all_jumps_resolved() {
            return Err(self.fail(Error::BadArgument));
        }

        // `BufferPos` handles are only meaningful against `self.buf`; turn
        // every one into a plain byte offset before it's consumed below.
        let label_offsets: Vec<(LabelId, usize)> = self
            .meta
            .labels()
            .map(|(id, l)| (id, self.buf.absolute_offset(l.offset)))
            .collect();
        let jump_records: Vec<(JumpId, usize, u8, PatchKind, JumpTarget)> = self
            .meta
            .jumps()
            .map(|(id, j)| (id, self.buf.absolute_offset(j.offset), j.site_len, j.patch_kind, j.target))
            .collect();
        let const_records: Vec<(ConstId, usize, u8)> = self
            .meta
            .consts()
            .map(|(id, c)| (id, self.buf.absolute_offset(c.offset), c.width))
            .collect();

        let size = self.buf.len();
        let code_bytes = std::mem::replace(&mut self.buf, Buffer::new()).into_bytes();
        debug_assert_eq!(code_bytes.len(), size);

        let mut mem = alloc_exec(size).map_err(|e| self.fail(e))?;
        // SAFETY: `mem` was just allocated with capacity `>= size` and no
        // other reference to it exists yet.
        unsafe {
            mem.write(&code_bytes);
        }

        let base = mem.as_ptr() as usize;
        for (id, offset) in &label_offsets {
            self.meta.label_mut(*id).addr = base + offset;
        }

        for (_id, offset, site_len, patch_kind, target) in &jump_records {
            let to_addr = match *target {
                JumpTarget::Label(l) => self.meta.label(l).addr,
                JumpTarget::Addr(a) => a,
                JumpTarget::Unresolved => unreachable!("checked above"),
            };
            let from_addr = base + offset;
            // SAFETY: `mem` is the writable backing store of the region we
            // just copied `code_bytes` into; `offset` was computed above
            // from the same buffer and is in range.
            unsafe {
                let site = mem.as_ptr().add(*offset);
                self.emitter.patch_jump(site, *site_len, *patch_kind, from_addr, to_addr);
            }
        }

        mem.make_executable().map_err(|e| self.fail(e))?;
        self.emitter.cache_flush(mem.as_ptr(), size);
        debug!("compiler: generated {} bytes of {} code", size, self.arch);

        self.jump_sites = jump_records.into_iter().map(|(id, off, len, kind, _)| (id, off, len, kind)).collect();
        self.const_sites = const_records;

        let entry = entry_value(self.arch, base);
        self.code = Some(mem);
        self.state = State::Generated;
        self.error = Some(Error::AlreadyCompiled);
        Ok(CodeEntry(entry))
    }

    /// Release the executable region returned by a prior
    /// [`Compiler::generate_code`] call. Does not affect this compiler's
    /// own (already-frozen) buffers.
    pub fn free_code(&mut self, _entry: CodeEntry) {
        if let Some(mem) = self.code.take() {
            mem.release();
        }
    }

    /// Rewrite a rewritable jump's target after `generate_code` (self-
    /// modifying code, §6 "Persisted state", §5 "Shared-resource policy").
    /// The jump must have been created with [`crate::metadata::REWRITABLE`]
    /// set in its patch kind by the emitting back-end.
    pub fn set_jump_addr(&mut self, jump: Jump, new: usize) -> Result<()> {
        let &(_, offset, site_len, patch_kind) = self
            .jump_sites
            .iter()
            .find(|(id, _, _, _)| *id == jump.0)
            .ok_or(Error::BadArgument)?;
        if patch_kind & REWRITABLE == 0 {
            return Err(Error::BadArgument);
        }
        let Some(mem) = self.code.as_mut() else {
            return Err(Error::BadArgument);
        };
        let base = mem.as_ptr() as usize;
        let from_addr = base + offset;
        // SAFETY: `offset` was computed from this same region's emitted
        // bytes in `generate_code` and is in range.
        unsafe {
            mem.make_writable()?;
            let site = mem.as_ptr().add(offset);
            self.emitter.patch_jump(site, site_len, patch_kind, from_addr, new);
            mem.make_executable()?;
            self.emitter.cache_flush(site, site_len as usize);
        }
        self.meta.set_target(jump.0, new);
        Ok(())
    }

    /// Rewrite an embedded constant's value after `generate_code`.
    pub fn set_const(&mut self, c: Const, new_value: i64) -> Result<()> {
        let &(_, offset, width) = self
            .const_sites
            .iter()
            .find(|(id, _, _)| *id == c.0)
            .ok_or(Error::BadArgument)?;
        let Some(mem) = self.code.as_mut() else {
            return Err(Error::BadArgument);
        };
        // SAFETY: same as `set_jump_addr` above.
        unsafe {
            mem.make_writable()?;
            let site = mem.as_ptr().add(offset);
            self.emitter.patch_const(site, width, new_value);
            mem.make_executable()?;
            self.emitter.cache_flush(site, width as usize);
        }
        Ok(())
    }
}

fn entry_value(arch: Architecture, base: usize) -> usize {
    match arch {
        Architecture::Thumb2 => base | 1,
        _ => base,
    }
}

fn round_local_size(size: u32, options: Options) -> u32 {
    if options.contains(Options::DOUBLE_ALIGNMENT) {
        (size + 7) & !7
    } else {
        size
    }
}
