//! The virtual register namespace shared by every architecture.
//!
//! Registers are named by the client, never allocated by this crate (see the
//! "no register allocator" non-goal). Each [`crate::platform::Platform`]
//! fixes how many of `1..=NUM_REGS` exist and how the trailing indices alias
//! the callee-saved set; this module only describes the namespace shape and
//! the couple of sentinel values every back-end agrees on.

use core::fmt;

/// A general-purpose virtual register, `1..=NUM_REGS`, or the [`Reg::SP`] /
/// [`Reg::UNUSED`] sentinels.
///
/// `Reg(0)` is [`Reg::UNUSED`]: valid only as a destination operand, where it
/// means "discard the result." `Reg(NUM_REGS + 1)` is the reserved stack
/// pointer index, [`Reg::SP`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(pub(crate) u8);

/// A floating-point virtual register, with the same overlap scheme as
/// [`Reg`] but in a disjoint namespace.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FloatReg(pub(crate) u8);

impl Reg {
    /// The discard sentinel. Only legal as a destination.
    pub const UNUSED: Reg = Reg(0);

    /// Name a scratch/saved register by its 1-based index in the
    /// client-visible namespace (`R(1)` is the first scratch register).
    pub const fn new(index: u8) -> Reg {
        debug_assert!(index >= 1);
        Reg(index)
    }

    /// The reserved stack-pointer register, given how many named registers
    /// this platform exposes.
    pub const fn sp(num_regs: u8) -> Reg {
        Reg(num_regs + 1)
    }

    /// True for the discard sentinel.
    pub fn is_unused(self) -> bool {
        self.0 == 0
    }

    /// Raw 1-based index (0 for [`Reg::UNUSED`]).
    pub fn index(self) -> u8 {
        self.0
    }
}

impl FloatReg {
    /// The discard sentinel.
    pub const UNUSED: FloatReg = FloatReg(0);

    /// Name a scratch/saved float register by its 1-based index.
    pub const fn new(index: u8) -> FloatReg {
        debug_assert!(index >= 1);
        FloatReg(index)
    }

    /// True for the discard sentinel.
    pub fn is_unused(self) -> bool {
        self.0 == 0
    }

    /// Raw 1-based index (0 for [`FloatReg::UNUSED`]).
    pub fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unused() {
            write!(f, "unused")
        } else {
            write!(f, "r{}", self.0)
        }
    }
}

impl fmt::Debug for FloatReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unused() {
            write!(f, "unused")
        } else {
            write!(f, "fr{}", self.0)
        }
    }
}

/// The quotas a single `enter`/`set_context` call fixes for the lifetime of
/// a [`crate::compiler::Compiler`].
///
/// `scratches` registers are caller-saved (the first `scratches` indices),
/// `saveds` are callee-saved (the last `saveds` indices, aliasing the
/// platform's physical callee-saved set); `args` of the `saveds` registers
/// are pre-loaded with the incoming arguments by the emitted prologue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegQuotas {
    /// Number of incoming arguments, `0..=3`.
    pub args: u8,
    /// Number of caller-saved (scratch) registers in use, `R(1)..=R(scratches)`.
    pub scratches: u8,
    /// Number of callee-saved registers in use, `S(1)..=S(saveds)`.
    pub saveds: u8,
    /// Number of caller-saved float registers in use.
    pub fscratches: u8,
    /// Number of callee-saved float registers in use.
    pub fsaveds: u8,
}

impl RegQuotas {
    /// True if `reg` falls within the scratch range fixed by this quota.
    pub fn is_scratch(&self, reg: Reg) -> bool {
        !reg.is_unused() && reg.index() <= self.scratches
    }

    /// True if `reg` falls within the saved range fixed by this quota. The
    /// platform's total register count is needed because saved registers
    /// are numbered from the top of the namespace down.
    pub fn is_saved(&self, reg: Reg, num_regs: u8) -> bool {
        !reg.is_unused() && reg.index() > num_regs - self.saveds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_is_sentinel_zero() {
        assert!(Reg::UNUSED.is_unused());
        assert_eq!(Reg::UNUSED.index(), 0);
    }

    #[test]
    fn sp_is_one_past_num_regs() {
        assert_eq!(Reg::sp(10).index(), 11);
    }

    #[test]
    fn quota_classifies_scratch_and_saved() {
        let q = RegQuotas {
            args: 1,
            scratches: 2,
            saveds: 3,
            fscratches: 0,
            fsaveds: 0,
        };
        assert!(q.is_scratch(Reg::new(1)));
        assert!(q.is_scratch(Reg::new(2)));
        assert!(!q.is_scratch(Reg::new(3)));
        // num_regs = 10: saved registers are 8, 9, 10.
        assert!(q.is_saved(Reg::new(8), 10));
        assert!(!q.is_saved(Reg::new(7), 10));
    }
}
