//! Compile-time configuration: which architecture this build targets and
//! the handful of options a client can request per [`crate::compiler::Compiler`].

use core::fmt;

/// A tiny `bitflags`-shaped macro so this crate doesn't need to pull in the
/// `bitflags` crate for two bits; expands to a newtype over `u32` with the
/// usual `|`, `&`, `contains` surface.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(
                $(#[$fmeta:meta])*
                const $flag:ident = $value:expr;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name($repr);

        impl $name {
            $(
                $(#[$fmeta])*
                pub const $flag: $name = $name($value);
            )*

            /// The empty flag set.
            pub const NONE: $name = $name(0);

            /// Returns true if every bit in `other` is set in `self`.
            pub fn contains(self, other: $name) -> bool {
                (self.0 & other.0) == other.0
            }

            /// Raw bit pattern, for the verbose-trace / ABI boundary.
            pub fn bits(self) -> $repr {
                self.0
            }

            /// Reconstruct from a raw bit pattern.
            pub fn from_bits_truncate(bits: $repr) -> Self {
                let mut known = 0;
                $(known |= $value;)*
                $name(bits & known)
            }
        }

        impl core::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl core::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }
    };
}

bitflags_like! {
    /// Options passed to [`crate::compiler::Compiler::enter`] /
    /// [`crate::compiler::Compiler::set_context`].
    pub struct Options: u32 {
        /// Round the local frame size up so doubles stored in it stay
        /// naturally aligned. Cheap to request unconditionally; only
        /// matters on targets that care about misaligned float access.
        const DOUBLE_ALIGNMENT = 0x0000_0001;
        /// Enable argument-well-formedness checks and the verbose trace
        /// printer, matching the original implementation's debug build.
        /// Ignored (treated as always-on) when the crate is built with
        /// `debug_assertions`.
        const ARG_CHECK = 0x0000_0002;
    }
}

/// The CPU family a [`crate::compiler::Compiler`] targets.
///
/// Each variant is gated by the matching Cargo feature; [`Architecture::host`]
/// picks the one matching the build host when no explicit choice is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Architecture {
    /// 32-bit x86, with four virtual (stack-spilled) general registers.
    X86_32,
    /// 64-bit x86 (System V and Win64 calling conventions).
    X86_64,
    /// 32-bit ARM (ARMv5 literal pools, ARMv7 MOVW/MOVT immediates).
    Arm32,
    /// 32-bit ARM, Thumb-2 instruction encoding.
    Thumb2,
    /// 64-bit ARM (AArch64).
    Aarch64,
    /// 32-bit PowerPC.
    Ppc32,
    /// 64-bit PowerPC (ELFv1/AIX indirect-call and ELFv2 direct-call ABIs).
    Ppc64,
    /// 32-bit MIPS (delay slots).
    Mips32,
    /// 64-bit MIPS (delay slots).
    Mips64,
    /// 32-bit SPARC (delay slots).
    Sparc32,
}

impl Architecture {
    /// The architecture matching the host this crate was built for, or
    /// `None` if the host isn't one this crate knows how to target.
    pub fn host() -> Option<Architecture> {
        #[cfg(target_arch = "x86_64")]
        {
            return Some(Architecture::X86_64);
        }
        #[cfg(target_arch = "x86")]
        {
            return Some(Architecture::X86_32);
        }
        #[cfg(target_arch = "aarch64")]
        {
            return Some(Architecture::Aarch64);
        }
        #[cfg(target_arch = "arm")]
        {
            return Some(Architecture::Arm32);
        }
        #[cfg(target_arch = "powerpc")]
        {
            return Some(Architecture::Ppc32);
        }
        #[cfg(target_arch = "powerpc64")]
        {
            return Some(Architecture::Ppc64);
        }
        #[cfg(target_arch = "mips")]
        {
            return Some(Architecture::Mips32);
        }
        #[cfg(target_arch = "mips64")]
        {
            return Some(Architecture::Mips64);
        }
        #[cfg(target_arch = "sparc")]
        {
            return Some(Architecture::Sparc32);
        }
        #[allow(unreachable_code)]
        None
    }

    /// Human-readable name, used by the verbose trace header and by `Debug`.
    pub fn name(self) -> &'static str {
        match self {
            Architecture::X86_32 => "x86-32",
            Architecture::X86_64 => "x86-64",
            Architecture::Arm32 => "arm32",
            Architecture::Thumb2 => "thumb2",
            Architecture::Aarch64 => "aarch64",
            Architecture::Ppc32 => "ppc32",
            Architecture::Ppc64 => "ppc64",
            Architecture::Mips32 => "mips32",
            Architecture::Mips64 => "mips64",
            Architecture::Sparc32 => "sparc32",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_compose() {
        let o = Options::DOUBLE_ALIGNMENT | Options::ARG_CHECK;
        assert!(o.contains(Options::DOUBLE_ALIGNMENT));
        assert!(o.contains(Options::ARG_CHECK));
        assert!(!Options::NONE.contains(Options::ARG_CHECK));
    }

    #[test]
    fn architecture_round_trips_name() {
        assert_eq!(Architecture::X86_64.name(), "x86-64");
        assert_eq!(format!("{}", Architecture::Aarch64), "aarch64");
    }
}
