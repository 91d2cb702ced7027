//! Condition-code lowering (spec.md §4.4, [`Condition::eval`]'s doc: "emitted code instead lowers
//! the guard to a native branch").
//!
//! Each micro-block's guard is checked once, against the CPSR value already committed to guest
//! state at block entry (not the transient per-opcode `HostFlagShadow`), and lowered straight from
//! [`Condition::eval`]'s own boolean algebra rather than re-deriving it.

use wasm_encoder::Instruction;

use crate::isa::condition::Condition;
use crate::state::cpsr::CpsrFlags;

fn bit(cpsr_local: u32, flag: CpsrFlags) -> Vec<Instruction<'static>> {
    vec![
        Instruction::LocalGet(cpsr_local),
        Instruction::I32Const(flag.bits() as i32),
        Instruction::I32And,
    ]
}

fn bit_set(cpsr_local: u32, flag: CpsrFlags) -> Vec<Instruction<'static>> {
    let mut out = bit(cpsr_local, flag);
    out.push(Instruction::I32Const(0));
    out.push(Instruction::I32Ne);
    out
}

fn bit_clear(cpsr_local: u32, flag: CpsrFlags) -> Vec<Instruction<'static>> {
    let mut out = bit(cpsr_local, flag);
    out.push(Instruction::I32Eqz);
    out
}

/// Leaves a 0/1 `i32` on the stack: whether `condition` holds given the CPSR value in
/// `cpsr_local`. `Condition::Al` is handled by the caller (callers skip the guard entirely rather
/// than spend an `i32.const 1`).
pub fn lower(condition: Condition, cpsr_local: u32) -> Vec<Instruction<'static>> {
    match condition {
        Condition::Eq => bit_set(cpsr_local, CpsrFlags::Z),
        Condition::Ne => bit_clear(cpsr_local, CpsrFlags::Z),
        Condition::Cs => bit_set(cpsr_local, CpsrFlags::C),
        Condition::Cc => bit_clear(cpsr_local, CpsrFlags::C),
        Condition::Mi => bit_set(cpsr_local, CpsrFlags::N),
        Condition::Pl => bit_clear(cpsr_local, CpsrFlags::N),
        Condition::Vs => bit_set(cpsr_local, CpsrFlags::V),
        Condition::Vc => bit_clear(cpsr_local, CpsrFlags::V),
        Condition::Hi => {
            let mut out = bit_set(cpsr_local, CpsrFlags::C);
            out.extend(bit_clear(cpsr_local, CpsrFlags::Z));
            out.push(Instruction::I32And);
            out
        }
        Condition::Ls => {
            let mut out = bit_clear(cpsr_local, CpsrFlags::C);
            out.extend(bit_set(cpsr_local, CpsrFlags::Z));
            out.push(Instruction::I32Or);
            out
        }
        Condition::Ge => {
            let mut out = bit_set(cpsr_local, CpsrFlags::N);
            out.extend(bit_set(cpsr_local, CpsrFlags::V));
            out.push(Instruction::I32Eq);
            out
        }
        Condition::Lt => {
            let mut out = bit_set(cpsr_local, CpsrFlags::N);
            out.extend(bit_set(cpsr_local, CpsrFlags::V));
            out.push(Instruction::I32Ne);
            out
        }
        Condition::Gt => {
            let mut out = bit_clear(cpsr_local, CpsrFlags::Z);
            out.extend(bit_set(cpsr_local, CpsrFlags::N));
            out.extend(bit_set(cpsr_local, CpsrFlags::V));
            out.push(Instruction::I32Eq);
            out.push(Instruction::I32And);
            out
        }
        Condition::Le => {
            let mut out = bit_set(cpsr_local, CpsrFlags::Z);
            out.extend(bit_set(cpsr_local, CpsrFlags::N));
            out.extend(bit_set(cpsr_local, CpsrFlags::V));
            out.push(Instruction::I32Ne);
            out.push(Instruction::I32Or);
            out
        }
        Condition::Al => vec![Instruction::I32Const(1)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every branch here must agree with [`Condition::eval`]'s boolean algebra; this test
    /// cross-checks the instruction count is nonzero and `Al`'s shortcut matches `eval`.
    #[test]
    fn always_lowers_to_constant_true() {
        assert_eq!(lower(Condition::Al, 0), vec![Instruction::I32Const(1)]);
        assert!(Condition::Al.eval(CpsrFlags::empty()));
    }

    #[test]
    fn eq_checks_only_zero_bit() {
        let instrs = lower(Condition::Eq, 3);
        assert!(instrs.iter().any(|i| matches!(i, Instruction::I32Const(v) if *v == CpsrFlags::Z.bits() as i32)));
    }
}
