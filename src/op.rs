//! The LIR operation set: op0/op1/op2/fop1/fop2 opcodes and the modifier
//! bits that ride along with them (§4.1).

use core::ops::{BitOr, BitOrAssign};

/// Modifier bits combined with an opcode via `|`.
///
/// `INT_OP` and `SINGLE_OP` share a bit position (one is for integer ops,
/// the other for float ops, and an opcode is never both), matching the
/// original encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(u32);

impl Flags {
    /// No modifiers.
    pub const NONE: Flags = Flags(0);
    /// 32-bit sub-word semantics on a 64-bit machine.
    pub const INT_OP: Flags = Flags(0x100);
    /// Single- (as opposed to double-) precision float semantics. Same bit
    /// position as `INT_OP`; legal only on fop opcodes.
    pub const SINGLE_OP: Flags = Flags(0x100);
    /// Request that the zero flag be observable after the instruction.
    pub const SET_E: Flags = Flags(0x200);
    /// Request that the unsigned-overflow ("carry out of an unsigned
    /// comparison") flag be observable.
    pub const SET_U: Flags = Flags(0x400);
    /// Request that the signed-less-than flag be observable.
    pub const SET_S: Flags = Flags(0x800);
    /// Request that the signed-overflow flag be observable.
    pub const SET_O: Flags = Flags(0x1000);
    /// Request that the carry/borrow flag be observable.
    pub const SET_C: Flags = Flags(0x2000);
    /// Forbid the instruction from clobbering flags at all. Mutually
    /// exclusive with every `SET_*` bit.
    pub const KEEP_FLAGS: Flags = Flags(0x4000);

    const ANY_SET: Flags = Flags(
        Self::SET_E.0 | Self::SET_U.0 | Self::SET_S.0 | Self::SET_O.0 | Self::SET_C.0,
    );

    /// True if any `SET_*` bit is present.
    pub fn requests_flags(self) -> bool {
        self.0 & Self::ANY_SET.0 != 0
    }

    /// `KEEP_FLAGS` together with any `SET_*` bit is a contradiction; the
    /// argument checker rejects it (§4.1).
    pub fn is_self_consistent(self) -> bool {
        !(self.contains(Flags::KEEP_FLAGS) && self.requests_flags())
    }

    /// True if `self` contains every bit of `other`.
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for Flags {
    type Output = Flags;
    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

/// Zero-operand opcodes: implicit operands are R0/R1 (e.g. the 64-bit
/// product of a long multiply spans both).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op0 {
    /// Traps into the host debugger.
    Breakpoint,
    /// Does nothing.
    Nop,
    /// Unsigned 64-bit product of R0 and R1, written back to R0:R1.
    LongUMul,
    /// Signed 64-bit product of R0 and R1, written back to R0:R1.
    LongSMul,
    /// Unsigned 64-bit division, `R0:R1 / R0 -> quotient R0, remainder R1`.
    LongUDiv,
    /// Signed 64-bit division.
    LongSDiv,
}

/// One-operand opcodes (`dst, src`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op1 {
    /// Plain move, width determined by `Flags::INT_OP`.
    Mov,
    /// Move an unsigned byte.
    MovUB,
    /// Move a signed byte.
    MovSB,
    /// Move an unsigned half-word.
    MovUH,
    /// Move a signed half-word.
    MovSH,
    /// Move an unsigned 32-bit int (zero-extends on a 64-bit machine).
    MovUI,
    /// Move a signed 32-bit int (sign-extends on a 64-bit machine).
    MovSI,
    /// Move a pointer-width value.
    MovP,
    /// Like `Mov`, but post-updates the memory operand's base register.
    MovU,
    /// Like `MovUB`, with post-update.
    MovUUB,
    /// Like `MovSB`, with post-update.
    MovUSB,
    /// Like `MovUH`, with post-update.
    MovUUH,
    /// Like `MovSH`, with post-update.
    MovUSH,
    /// Like `MovUI`, with post-update.
    MovUUI,
    /// Like `MovSI`, with post-update.
    MovUSI,
    /// Like `MovP`, with post-update.
    MovUP,
    /// Bitwise complement.
    Not,
    /// Arithmetic negation.
    Neg,
    /// Count leading zero bits.
    Clz,
}

impl Op1 {
    /// Is this one of the `MOVU*` pre/post-update variants (§4.1)?
    pub fn is_update(self) -> bool {
        matches!(
            self,
            Op1::MovU
                | Op1::MovUUB
                | Op1::MovUSB
                | Op1::MovUUH
                | Op1::MovUSH
                | Op1::MovUUI
                | Op1::MovUSI
                | Op1::MovUP
        )
    }

    /// `SET_*` flags this opcode accepts; moves accept none (§4.1).
    pub fn allowed_flags(self) -> Flags {
        Flags::NONE
    }
}

/// Two-operand opcodes (`dst, src1, src2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op2 {
    /// `dst = src1 + src2`.
    Add,
    /// `dst = src1 + src2 + carry`.
    AddC,
    /// `dst = src1 - src2`.
    Sub,
    /// `dst = src1 - src2 - borrow`.
    SubC,
    /// `dst = src1 * src2` (low word).
    Mul,
    /// `dst = src1 & src2`.
    And,
    /// `dst = src1 | src2`.
    Or,
    /// `dst = src1 ^ src2`.
    Xor,
    /// `dst = src1 << src2`.
    Shl,
    /// `dst = src1 >> src2` (logical).
    Lshr,
    /// `dst = src1 >> src2` (arithmetic).
    Ashr,
}

impl Op2 {
    /// Per-opcode flag-legality table (§4.1).
    pub fn allowed_flags(self) -> Flags {
        match self {
            Op2::Add => {
                Flags::SET_E | Flags::SET_C | Flags::SET_O | Flags::KEEP_FLAGS
            }
            Op2::AddC | Op2::SubC => Flags::SET_C | Flags::KEEP_FLAGS,
            Op2::Sub => {
                Flags::SET_E
                    | Flags::SET_U
                    | Flags::SET_S
                    | Flags::SET_O
                    | Flags::SET_C
                    | Flags::KEEP_FLAGS
            }
            Op2::Mul => Flags::SET_O | Flags::KEEP_FLAGS,
            Op2::And | Op2::Or | Op2::Xor | Op2::Shl | Op2::Lshr | Op2::Ashr => {
                Flags::SET_E | Flags::KEEP_FLAGS
            }
        }
    }
}

/// One-operand float opcodes (`fdst, fsrc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FOp1 {
    /// Plain float move.
    FMov,
    /// Convert double to single precision (or vice versa, by `Flags`).
    ConvF64F32,
    /// Convert a signed integer word to float.
    ConvSwFromF,
    /// Convert a signed int to float.
    ConvSiFromF,
    /// Convert float to a signed integer word.
    ConvFFromSw,
    /// Convert float to a signed int.
    ConvFFromSi,
    /// Compare, result observable via `Flags::SET_E`/`SET_S`.
    FCmp,
    /// Negate.
    FNeg,
    /// Absolute value.
    FAbs,
}

/// Two-operand float opcodes (`fdst, fsrc1, fsrc2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FOp2 {
    /// `fdst = fsrc1 + fsrc2`.
    FAdd,
    /// `fdst = fsrc1 - fsrc2`.
    FSub,
    /// `fdst = fsrc1 * fsrc2`.
    FMul,
    /// `fdst = fsrc1 / fsrc2`.
    FDiv,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_flags_conflicts_with_set_flags() {
        let f = Flags::KEEP_FLAGS | Flags::SET_E;
        assert!(!f.is_self_consistent());
        assert!(Flags::SET_E.is_self_consistent());
        assert!(Flags::KEEP_FLAGS.is_self_consistent());
    }

    #[test]
    fn add_rejects_set_u_and_set_s() {
        let allowed = Op2::Add.allowed_flags();
        assert!(!allowed.contains(Flags::SET_U));
        assert!(!allowed.contains(Flags::SET_S));
        assert!(allowed.contains(Flags::SET_O));
    }

    #[test]
    fn moves_accept_no_flags() {
        assert_eq!(Op1::Mov.allowed_flags(), Flags::NONE);
    }

    #[test]
    fn mulc_only_allows_carry() {
        let allowed = Op2::AddC.allowed_flags();
        assert!(allowed.contains(Flags::SET_C));
        assert!(!allowed.contains(Flags::SET_E));
    }
}
