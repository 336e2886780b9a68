//! A portable, stack-less low-level intermediate representation and native
//! code generator.
//!
//! A client builds an instruction stream on a [`compiler::Compiler`] through
//! the LIR emission API (`op0`/`op1`/`op2`/`fop1`/`fop2`, labels and jumps,
//! embedded constants), then calls [`compiler::Compiler::generate_code`] to
//! get back an executable entry point obeying the host's calling
//! convention. Supported targets: x86-32/64, ARMv5/v7/Thumb-2/AArch64,
//! PowerPC-32/64, MIPS-32/64, SPARC-32, each gated by its own Cargo feature.
//!
//! ```no_run
//! use lirjit_codegen::compiler::Compiler;
//! use lirjit_codegen::op::Op1;
//! use lirjit_codegen::operand::Operand;
//! use lirjit_codegen::reg::Reg;
//! use lirjit_codegen::settings::{Architecture, Options};
//!
//! # fn identity() -> lirjit_codegen::error::Result<()> {
//! let mut c = Compiler::create(Architecture::host().unwrap())?;
//! c.enter(Options::NONE, 1, 1, 1, 0, 0, 0)?;
//! c.ret(Op1::Mov, Operand::Reg(Reg::new(1)))?;
//! let entry = c.generate_code()?;
//! let f: extern "C" fn(i64) -> i64 = unsafe { std::mem::transmute(entry.0) };
//! assert_eq!(f(42), 42);
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod cache;
pub mod compiler;
pub mod error;
pub mod exec;
pub mod isa;
pub mod metadata;
pub mod op;
pub mod operand;
pub mod platform;
pub mod reg;
pub mod settings;
pub mod stack;
pub mod trace;

pub use compiler::{CodeEntry, Compiler, Cond, Const, Jump, Label};
pub use error::{Error, Result};
pub use settings::{Architecture, Options};
