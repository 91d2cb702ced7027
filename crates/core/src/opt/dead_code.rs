//! Dead code elision (spec.md §4.5(d)).
//!
//! A backward liveness sweep: an opcode with no side effect whose every write (primary and, for
//! `Mul`'s `result_hi` / `Add64`'s two destinations, secondary) is dead downstream is replaced with
//! [`Opcode::Nop`]. An opcode is never partially elided — `Mul` with a dead `result_hi` still keeps
//! its low-half write alive, so the whole opcode survives.

use std::collections::HashSet;

use crate::ir::opcode::Opcode;
use crate::ir::value::VarId;

/// Runs one backward dead-code pass. Returns `true` if anything changed.
pub(super) fn run(program: &mut [Opcode]) -> bool {
    let mut live: HashSet<VarId> = HashSet::new();
    let mut changed = false;

    for i in (0..program.len()).rev() {
        let op = &program[i];
        let writes_primary = op.writes();
        let writes_secondary = op.writes_secondary();
        let any_write_live = writes_primary.is_some_and(|id| live.contains(&id)) || writes_secondary.iter().any(|id| live.contains(id));

        let keep = op.has_side_effect() || any_write_live || (writes_primary.is_none() && writes_secondary.is_empty() && !matches!(op, Opcode::Nop));

        if keep {
            if let Some(id) = writes_primary {
                live.remove(&id);
            }
            for id in &writes_secondary {
                live.remove(id);
            }
            for id in op.reads() {
                live.insert(id);
            }
        } else if !matches!(op, Opcode::Nop) {
            program[i] = Opcode::Nop;
            changed = true;
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::opcode::{Alu, AluKind, StoreGpr};
    use crate::ir::value::{AnyRef, Constant, DataType, Variable};
    use crate::state::mode::CpuMode;

    #[test]
    fn unread_alu_result_is_elided() {
        let mut program = vec![
            Opcode::Alu(Alu { dst: Variable::new(0, DataType::U32), kind: AluKind::Mov, lhs: AnyRef::Constant(Constant::u32(1)), rhs: AnyRef::Null, update_host_flags: false }),
            Opcode::Alu(Alu { dst: Variable::new(1, DataType::U32), kind: AluKind::Mov, lhs: AnyRef::Constant(Constant::u32(2)), rhs: AnyRef::Null, update_host_flags: false }),
            Opcode::StoreGpr(StoreGpr { mode: CpuMode::User, reg: 0, value: AnyRef::Variable(1) }),
        ];
        assert!(run(&mut program));
        assert!(matches!(program[0], Opcode::Nop));
        assert!(matches!(program[1], Opcode::Alu(_)));
    }

    #[test]
    fn store_is_never_elided_even_if_unused() {
        let mut program = vec![Opcode::StoreGpr(StoreGpr { mode: CpuMode::User, reg: 0, value: AnyRef::Constant(Constant::u32(1)) })];
        assert!(!run(&mut program));
        assert!(matches!(program[0], Opcode::StoreGpr(_)));
    }
}
