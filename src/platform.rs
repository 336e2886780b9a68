//! The Platform Descriptor: compile-time constants describing a target
//! (§2.1, §4.2).

use crate::settings::Architecture;

/// Byte order of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    /// Least-significant byte first (x86, ARM default, MIPS/PPC/SPARC in
    /// their LE configuration).
    Little,
    /// Most-significant byte first (classic PPC/MIPS/SPARC configuration).
    Big,
}

/// Static facts about one target architecture.
///
/// Each [`crate::isa`] back-end module exposes one of these; the compiler
/// never hardcodes architecture constants outside this struct.
#[derive(Debug, Clone, Copy)]
pub struct Platform {
    /// Which architecture this describes.
    pub arch: Architecture,
    /// Natural word size in bytes (4 on ILP32 targets, 8 on LP64).
    pub word_size: u8,
    /// Byte order.
    pub endian: Endianness,
    /// True if unaligned memory access is tolerated without a fault.
    pub unaligned_ok: bool,
    /// Number of general-purpose virtual registers available
    /// (`1..=num_regs`), not counting [`crate::reg::Reg::SP`].
    pub num_regs: u8,
    /// How many of those `num_regs` are backed by a real physical register;
    /// the rest (x86-32 only) are spilled to stack slots.
    pub num_physical_regs: u8,
    /// How many of `num_regs` alias the platform's callee-saved set.
    pub num_saved_regs: u8,
    /// Number of floating-point virtual registers.
    pub num_float_regs: u8,
    /// How many of `num_float_regs` alias the callee-saved float set.
    pub num_saved_float_regs: u8,
    /// Byte offset from the logical `[SP+0]` to the first byte of the
    /// client-visible local frame (after saved-register spill slots, the
    /// return address slot, etc. — the "local-offset adjustment" of §4.4).
    pub locals_offset: u32,
    /// Byte offset from a call instruction's address to the return address
    /// pushed/stored by that call, used by indirect-call descriptor and
    /// fast_enter/fast_return bookkeeping.
    pub return_addr_offset: i32,
    /// Largest immediate, in bytes, this target can encode directly in a
    /// `[reg+imm]` addressing form before the emitter must synthesize a
    /// temporary address (§4.2).
    pub max_inline_offset: i32,
}

/// x86-64 (System V / Win64): 10 GP virtual registers, all physically
/// backed, 6 callee-saved.
pub const X86_64: Platform = Platform {
    arch: Architecture::X86_64,
    word_size: 8,
    endian: Endianness::Little,
    unaligned_ok: true,
    num_regs: 10,
    num_physical_regs: 10,
    num_saved_regs: 5,
    num_float_regs: 6,
    num_saved_float_regs: 0,
    locals_offset: 0,
    return_addr_offset: 8,
    max_inline_offset: i32::MAX,
};

/// x86-32: only 3 of its registers are physically backed; the remaining 4
/// (R3..R6 in the client namespace) are virtual, spilled to stack slots and
/// forbidden inside addressing expressions (§4.6, glossary "virtual
/// register").
pub const X86_32: Platform = Platform {
    arch: Architecture::X86_32,
    word_size: 4,
    endian: Endianness::Little,
    unaligned_ok: true,
    num_regs: 7,
    num_physical_regs: 3,
    num_saved_regs: 3,
    num_float_regs: 6,
    num_saved_float_regs: 0,
    locals_offset: 0,
    return_addr_offset: 4,
    max_inline_offset: i32::MAX,
};

/// ARMv5/v7 (32-bit, A32 encoding). Large/relocatable immediates route
/// through the literal pool (§4.6).
pub const ARM32: Platform = Platform {
    arch: Architecture::Arm32,
    word_size: 4,
    endian: Endianness::Little,
    unaligned_ok: false,
    num_regs: 10,
    num_physical_regs: 10,
    num_saved_regs: 5,
    num_float_regs: 14,
    num_saved_float_regs: 6,
    locals_offset: 0,
    return_addr_offset: 0,
    max_inline_offset: 4095,
};

/// ARM, Thumb-2 encoding. Shares `ARM32`'s register geometry.
pub const THUMB2: Platform = Platform {
    arch: Architecture::Thumb2,
    ..ARM32
};

/// AArch64.
pub const AARCH64: Platform = Platform {
    arch: Architecture::Aarch64,
    word_size: 8,
    endian: Endianness::Little,
    unaligned_ok: true,
    num_regs: 26,
    num_physical_regs: 26,
    num_saved_regs: 10,
    num_float_regs: 32,
    num_saved_float_regs: 8,
    locals_offset: 0,
    return_addr_offset: 0,
    max_inline_offset: 4095,
};

/// 32-bit PowerPC (big-endian by default).
pub const PPC32: Platform = Platform {
    arch: Architecture::Ppc32,
    word_size: 4,
    endian: Endianness::Big,
    unaligned_ok: true,
    num_regs: 11,
    num_physical_regs: 11,
    num_saved_regs: 6,
    num_float_regs: 14,
    num_saved_float_regs: 6,
    locals_offset: 0,
    return_addr_offset: 4,
    max_inline_offset: 32767,
};

/// 64-bit PowerPC. Indirect calls on the ELFv1/AIX ABI go through a 3-word
/// TOC descriptor (§4.6, glossary "function-context descriptor").
pub const PPC64: Platform = Platform {
    arch: Architecture::Ppc64,
    word_size: 8,
    endian: Endianness::Big,
    ..PPC32
};

/// 32-bit MIPS. Branches have a delay slot (§4.6, §8 invariant 7).
pub const MIPS32: Platform = Platform {
    arch: Architecture::Mips32,
    word_size: 4,
    endian: Endianness::Big,
    unaligned_ok: false,
    num_regs: 11,
    num_physical_regs: 11,
    num_saved_regs: 6,
    num_float_regs: 14,
    num_saved_float_regs: 6,
    locals_offset: 0,
    return_addr_offset: 0,
    max_inline_offset: 32767,
};

/// 64-bit MIPS.
pub const MIPS64: Platform = Platform {
    arch: Architecture::Mips64,
    word_size: 8,
    ..MIPS32
};

/// 32-bit SPARC. Branches have a delay slot.
pub const SPARC32: Platform = Platform {
    arch: Architecture::Sparc32,
    word_size: 4,
    endian: Endianness::Big,
    unaligned_ok: false,
    num_regs: 11,
    num_physical_regs: 11,
    num_saved_regs: 6,
    num_float_regs: 16,
    num_saved_float_regs: 8,
    locals_offset: 0,
    return_addr_offset: 0,
    max_inline_offset: 4095,
};

impl Platform {
    /// The static descriptor for `arch`.
    pub fn for_arch(arch: Architecture) -> Platform {
        match arch {
            Architecture::X86_32 => X86_32,
            Architecture::X86_64 => X86_64,
            Architecture::Arm32 => ARM32,
            Architecture::Thumb2 => THUMB2,
            Architecture::Aarch64 => AARCH64,
            Architecture::Ppc32 => PPC32,
            Architecture::Ppc64 => PPC64,
            Architecture::Mips32 => MIPS32,
            Architecture::Mips64 => MIPS64,
            Architecture::Sparc32 => SPARC32,
        }
    }

    /// Number of the first virtual register aliasing the callee-saved set
    /// (i.e. `S0`'s index in the `1..=num_regs` namespace).
    pub fn first_saved_reg(&self) -> u8 {
        self.num_regs - self.num_saved_regs + 1
    }

    /// True for the x86-32 virtual (non-physically-backed) register range.
    pub fn is_virtual_reg(&self, index: u8) -> bool {
        index > self.num_physical_regs && index <= self.num_regs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x86_32_has_virtual_registers() {
        assert!(X86_32.is_virtual_reg(4));
        assert!(!X86_32.is_virtual_reg(1));
    }

    #[test]
    fn first_saved_reg_counts_from_the_top() {
        assert_eq!(X86_64.first_saved_reg(), 6);
    }

    #[test]
    fn for_arch_round_trips() {
        assert_eq!(Platform::for_arch(Architecture::Aarch64).arch, Architecture::Aarch64);
    }
}
