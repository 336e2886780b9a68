//! End-to-end scenarios: build a program through the public emission API,
//! generate native code, and call it.
//!
//! Argument marshalling and direct memory operands are only wired for
//! x86-64 today (see DESIGN.md's "known, bounded limitations"), so every
//! scenario here targets that backend. Saved registers are named from the
//! top of the platform's register namespace down — `S0` for a single-saved
//! function is `Reg::new(platform::X86_64.num_regs)`, not `Reg::new(1)`,
//! since incoming arguments are pre-loaded into the *saved* range, never
//! the scratch range.

#![cfg(all(target_arch = "x86_64", feature = "x86"))]

use lirjit_codegen::compiler::Compiler;
use lirjit_codegen::op::{Flags, Op1, Op2};
use lirjit_codegen::operand::Operand;
use lirjit_codegen::platform;
use lirjit_codegen::reg::Reg;
use lirjit_codegen::settings::{Architecture, Options};
use lirjit_codegen::Cond;

fn s(i: u8) -> Reg {
    // Saved registers are numbered from the top of the virtual namespace
    // down, and `enter`'s prologue loads arguments into the highest-indexed
    // saved slots first — so `s(0)` is both S0 and the first argument.
    Reg::new(platform::X86_64.num_regs - i)
}

fn r(i: u8) -> Reg {
    Reg::new(i)
}

#[test]
fn identity_returns_its_argument() {
    let mut c = Compiler::create(Architecture::X86_64).unwrap();
    c.enter(Options::NONE, 1, 1, 1, 0, 0, 0).unwrap();
    c.ret(Op1::Mov, Operand::Reg(s(0))).unwrap();
    let entry = c.generate_code().unwrap();
    let f: extern "C" fn(i64) -> i64 = unsafe { std::mem::transmute(entry.0) };
    assert_eq!(f(42), 42);
    assert_eq!(f(-7), -7);
    c.free_code(entry);
}

#[test]
fn sum_of_array_loads_two_elements() {
    let mut c = Compiler::create(Architecture::X86_64).unwrap();
    c.enter(Options::NONE, 1, 2, 1, 0, 0, 0).unwrap();
    let base = s(0);
    let acc = r(1);
    c.op1(Op1::Mov, Flags::NONE, Operand::Reg(acc), Operand::mem_offset(base, 0)).unwrap();
    c.op2(Op2::Add, Flags::NONE, Operand::Reg(acc), Operand::Reg(acc), Operand::mem_offset(base, 8)).unwrap();
    c.ret(Op1::Mov, Operand::Reg(acc)).unwrap();
    let entry = c.generate_code().unwrap();
    let f: extern "C" fn(*const i64) -> i64 = unsafe { std::mem::transmute(entry.0) };
    let data: [i64; 3] = [5, 12, 999];
    assert_eq!(f(data.as_ptr()), 17);
    c.free_code(entry);
}

#[test]
fn conditional_branches_on_less_than() {
    let mut c = Compiler::create(Architecture::X86_64).unwrap();
    c.enter(Options::NONE, 1, 1, 1, 0, 0, 0).unwrap();
    let input = s(0);
    let taken = c.cmp(Cond::Less, Operand::Reg(input), Operand::Imm(10)).unwrap();
    c.ret(Op1::Mov, Operand::Imm(0)).unwrap();
    let l = c.label().unwrap();
    c.set_label(taken, l).unwrap();
    c.ret(Op1::Mov, Operand::Imm(1)).unwrap();
    let entry = c.generate_code().unwrap();
    let f: extern "C" fn(i64) -> i64 = unsafe { std::mem::transmute(entry.0) };
    assert_eq!(f(5), 1);
    assert_eq!(f(20), 0);
    c.free_code(entry);
}

#[test]
fn self_modifying_constant_is_rewritable_after_generation() {
    let mut c = Compiler::create(Architecture::X86_64).unwrap();
    c.enter(Options::NONE, 0, 1, 0, 0, 0, 0).unwrap();
    let scratch = r(1);
    let site = c.emit_const(Operand::Reg(scratch), 7).unwrap();
    c.ret(Op1::Mov, Operand::Reg(scratch)).unwrap();
    let entry = c.generate_code().unwrap();
    let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(entry.0) };
    assert_eq!(f(), 7);

    c.set_const(site, 99).unwrap();
    assert_eq!(f(), 99);
    c.free_code(entry);
}

#[test]
fn unsigned_overflow_sets_carry() {
    let mut c = Compiler::create(Architecture::X86_64).unwrap();
    c.enter(Options::NONE, 2, 1, 2, 0, 0, 0).unwrap();
    let a = s(0);
    let b = s(1);
    c.op2(Op2::Add, Flags::SET_C, Operand::Reg(a), Operand::Reg(a), Operand::Reg(b)).unwrap();
    let overflowed = c.jump(Some(Cond::CarrySet)).unwrap();
    c.ret(Op1::Mov, Operand::Imm(0)).unwrap();
    let l = c.label().unwrap();
    c.set_label(overflowed, l).unwrap();
    c.ret(Op1::Mov, Operand::Imm(1)).unwrap();
    let entry = c.generate_code().unwrap();
    let f: extern "C" fn(u64, u64) -> i64 = unsafe { std::mem::transmute(entry.0) };
    assert_eq!(f(u64::MAX, 1), 1);
    assert_eq!(f(1, 1), 0);
    c.free_code(entry);
}

#[test]
fn forward_jump_skips_dead_code() {
    let mut c = Compiler::create(Architecture::X86_64).unwrap();
    c.enter(Options::NONE, 0, 1, 0, 0, 0, 0).unwrap();
    let dst = r(1);
    let skip = c.jump(None).unwrap();
    // Never executed: proves the unconditional jump lands past it, not
    // into it.
    c.op1(Op1::Mov, Flags::NONE, Operand::Reg(dst), Operand::Imm(999)).unwrap();
    c.ret(Op1::Mov, Operand::Reg(dst)).unwrap();
    let l = c.label().unwrap();
    c.set_label(skip, l).unwrap();
    c.op1(Op1::Mov, Flags::NONE, Operand::Reg(dst), Operand::Imm(42)).unwrap();
    c.ret(Op1::Mov, Operand::Reg(dst)).unwrap();
    let entry = c.generate_code().unwrap();
    let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(entry.0) };
    assert_eq!(f(), 42);
    c.free_code(entry);
}

#[test]
fn compiler_rejects_emission_after_generate_code() {
    let mut c = Compiler::create(Architecture::X86_64).unwrap();
    c.enter(Options::NONE, 0, 1, 0, 0, 0, 0).unwrap();
    c.ret(Op1::Mov, Operand::Imm(0)).unwrap();
    let entry = c.generate_code().unwrap();
    assert!(c.is_generated());
    assert!(c.op1(Op1::Mov, Flags::NONE, Operand::Reg(r(1)), Operand::Imm(1)).is_err());
    c.free_code(entry);
}
