//! Verbose trace formatting (§6 "Verbose trace format").
//!
//! When a [`crate::compiler::Compiler`] emits an instruction it logs one
//! line through [`log::trace!`] rather than writing to a caller-supplied
//! file handle, the way the rest of this crate's ambient stack reports
//! diagnostics (§2a). Mnemonics get a suffix letter per active modifier
//! (`.e .u .s .o .c .k`); operands render as `#imm`, `rN`/`sN`, or
//! `[base + index*2^shift + imm]`.

use crate::op::{Flags, Op0, Op1, Op2};
use crate::operand::Operand;
use crate::reg::{Reg, RegQuotas};
use crate::settings::Architecture;

fn flag_suffix(flags: Flags) -> String {
    let mut s = String::new();
    if flags.contains(Flags::SET_E) {
        s.push_str(".e");
    }
    if flags.contains(Flags::SET_U) {
        s.push_str(".u");
    }
    if flags.contains(Flags::SET_S) {
        s.push_str(".s");
    }
    if flags.contains(Flags::SET_O) {
        s.push_str(".o");
    }
    if flags.contains(Flags::SET_C) {
        s.push_str(".c");
    }
    if flags.contains(Flags::KEEP_FLAGS) {
        s.push_str(".k");
    }
    s
}

/// Render a register as `rN` (scratch) or `sN` (saved), the way the
/// original's trace printer distinguishes the two halves of the namespace.
/// Without a `quotas` context every register renders as `rN`.
fn format_reg(reg: Reg, quotas: Option<&RegQuotas>, num_regs: u8) -> String {
    if reg.is_unused() {
        return "unused".to_string();
    }
    match quotas {
        Some(q) if q.is_saved(reg, num_regs) => format!("s{}", num_regs - reg.index() + 1),
        _ => format!("r{}", reg.index()),
    }
}

fn format_operand(op: Operand, quotas: Option<&RegQuotas>, num_regs: u8) -> String {
    match op {
        Operand::Unused => "unused".to_string(),
        Operand::Imm(v) => format!("#{v}"),
        Operand::Reg(r) => format_reg(r, quotas, num_regs),
        Operand::Mem { base, offset } => {
            if offset == 0 {
                format!("[{}]", format_reg(base, quotas, num_regs))
            } else {
                format!("[{} + {offset}]", format_reg(base, quotas, num_regs))
            }
        }
        Operand::MemIndexed { base, index, shift } => format!(
            "[{} + {}*{}]",
            format_reg(base, quotas, num_regs),
            format_reg(index, quotas, num_regs),
            1u32 << shift,
        ),
    }
}

fn op0_mnemonic(op: Op0) -> &'static str {
    match op {
        Op0::Breakpoint => "breakpoint",
        Op0::Nop => "nop",
        Op0::LongUMul => "lumul",
        Op0::LongSMul => "lsmul",
        Op0::LongUDiv => "ludiv",
        Op0::LongSDiv => "lsdiv",
    }
}

fn op1_mnemonic(op: Op1) -> &'static str {
    match op {
        Op1::Mov => "mov",
        Op1::MovUB => "mov.ub",
        Op1::MovSB => "mov.sb",
        Op1::MovUH => "mov.uh",
        Op1::MovSH => "mov.sh",
        Op1::MovUI => "mov.ui",
        Op1::MovSI => "mov.si",
        Op1::MovP => "mov.p",
        Op1::MovU => "movu",
        Op1::MovUUB => "movu.ub",
        Op1::MovUSB => "movu.sb",
        Op1::MovUUH => "movu.uh",
        Op1::MovUSH => "movu.sh",
        Op1::MovUUI => "movu.ui",
        Op1::MovUSI => "movu.si",
        Op1::MovUP => "movu.p",
        Op1::Not => "not",
        Op1::Neg => "neg",
        Op1::Clz => "clz",
    }
}

fn op2_mnemonic(op: Op2) -> &'static str {
    match op {
        Op2::Add => "add",
        Op2::AddC => "addc",
        Op2::Sub => "sub",
        Op2::SubC => "subc",
        Op2::Mul => "mul",
        Op2::And => "and",
        Op2::Or => "or",
        Op2::Xor => "xor",
        Op2::Shl => "shl",
        Op2::Lshr => "lshr",
        Op2::Ashr => "ashr",
    }
}

/// One trace line for a zero-operand opcode.
pub fn format_op0(op: Op0) -> String {
    op0_mnemonic(op).to_string()
}

/// One trace line for a one-operand opcode.
pub fn format_op1(op: Op1, flags: Flags, dst: Operand, src: Operand) -> String {
    format!(
        "{}{} {}, {}",
        op1_mnemonic(op),
        flag_suffix(flags),
        format_operand(dst, None, u8::MAX),
        format_operand(src, None, u8::MAX),
    )
}

/// One trace line for a two-operand opcode.
pub fn format_op2(op: Op2, flags: Flags, dst: Operand, src1: Operand, src2: Operand) -> String {
    format!(
        "{}{} {}, {}, {}",
        op2_mnemonic(op),
        flag_suffix(flags),
        format_operand(dst, None, u8::MAX),
        format_operand(src1, None, u8::MAX),
        format_operand(src2, None, u8::MAX),
    )
}

/// The mnemonic suffix for a conditional (or unconditional) jump.
pub fn cond_suffix(cond: Option<crate::compiler::Cond>) -> String {
    match cond {
        None => String::new(),
        Some(c) => format!(".{c:?}").to_lowercase(),
    }
}

/// Log the prologue this session's `enter` call just emitted.
pub fn log_enter(arch: Architecture, quotas: &RegQuotas, local_size: u32) {
    log::trace!(
        "enter {arch}: args={} scratches={} saveds={} fscratches={} fsaveds={} local_size={local_size}",
        quotas.args,
        quotas.scratches,
        quotas.saveds,
        quotas.fscratches,
        quotas.fsaveds,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg::Reg;

    #[test]
    fn immediate_renders_with_hash_prefix() {
        assert_eq!(format_operand(Operand::Imm(42), None, 10), "#42");
    }

    #[test]
    fn mem_indexed_renders_shift_as_power_of_two() {
        let op = Operand::mem_indexed(Reg::new(1), Reg::new(2), 2);
        assert_eq!(format_operand(op, None, 10), "[r1 + r2*4]");
    }

    #[test]
    fn set_e_and_keep_flags_both_contribute_suffix_letters() {
        let f = Flags::SET_E | Flags::KEEP_FLAGS;
        assert_eq!(flag_suffix(f), ".e.k");
    }

    #[test]
    fn op1_trace_line_has_mnemonic_and_operands() {
        let line = format_op1(Op1::Mov, Flags::NONE, Operand::Reg(Reg::new(1)), Operand::Imm(5));
        assert_eq!(line, "mov r1, #5");
    }
}
