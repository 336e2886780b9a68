//! The latched error kinds a [`crate::compiler::Compiler`] can report.

use thiserror::Error;

/// Everything that can go wrong while emitting or assembling LIR.
///
/// Once a [`crate::compiler::Compiler`] produces one of these it is latched: every
/// subsequent emission call returns the same error without doing any further
/// work. There is no recoverable path out of an error other than dropping the
/// compiler (or, for `AlreadyCompiled`, reading back the code that was
/// produced before the error occurred).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An emission call arrived after `generate_code` already ran.
    #[error("compiler has already generated code")]
    AlreadyCompiled,

    /// A fragment or scratch allocation failed (host out of memory).
    #[error("failed to allocate compiler scratch memory")]
    AllocFailed,

    /// The executable allocator could not satisfy a request for memory.
    #[error("failed to allocate executable memory")]
    ExecAllocFailed,

    /// This back-end does not implement the requested operation on the
    /// current target (stub architecture, or a call shape it can't encode).
    #[error("operation is not supported on this target")]
    Unsupported,

    /// An argument-check invariant was violated (only raised when argument
    /// checking is enabled; see [`crate::settings::Options::ARG_CHECK`]).
    #[error("bad argument to an emission call")]
    BadArgument,
}

impl Error {
    /// The stable numeric code associated with each kind, matching the
    /// `0..=5` convention described by the error-handling design (`0` is
    /// reserved for success and has no `Error` value).
    pub fn code(self) -> u32 {
        match self {
            Error::AlreadyCompiled => 1,
            Error::AllocFailed => 2,
            Error::ExecAllocFailed => 3,
            Error::Unsupported => 4,
            Error::BadArgument => 5,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
