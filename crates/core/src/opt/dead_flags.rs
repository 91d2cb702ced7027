//! Dead flag elision (spec.md §4.5(e)).
//!
//! Backward flag-liveness sweep. Each [`Opcode::UpdateFlags`] carries a [`FlagMask`] naming the
//! bits it actually needs to merge into its `cpsr_in`; a bit no downstream reader ever looks at is
//! dropped from the mask, and once narrowing shrinks a mask to empty the whole opcode is replaced
//! with a plain repoint of `cpsr_in` through to its `dst`. A variable read by anything other than a
//! downstream `UpdateFlags`/`UpdateSticky` (a `StoreCPSR`, a second use as a generic value, ...) is
//! conservatively treated as needing every flag, since this pass only tracks bit-level demand
//! through the flag-update chain itself.

use std::collections::{HashMap, HashSet};

use crate::ir::opcode::{FlagMask, Opcode};
use crate::ir::value::VarId;

/// Runs one backward dead-flag pass. Returns `true` if anything changed.
pub(super) fn run(program: &mut [Opcode]) -> bool {
    let mut needed: HashMap<VarId, FlagMask> = HashMap::new();
    let mut needed_sticky: HashSet<VarId> = HashSet::new();
    let mut changed = false;

    for i in (0..program.len()).rev() {
        match &program[i] {
            Opcode::UpdateFlags(u) => {
                let want = needed.get(&u.dst.id).copied().unwrap_or_else(FlagMask::all);
                let effective = u.mask & want;
                let cpsr_in = u.cpsr_in;
                let dst_id = u.dst.id;

                if effective.is_empty() {
                    program[i] = Opcode::Nop;
                    for op in program[i + 1..].iter_mut() {
                        op.repoint(dst_id, cpsr_in.0);
                    }
                    changed = true;
                } else {
                    if effective != u.mask {
                        if let Opcode::UpdateFlags(u) = &mut program[i] {
                            u.mask = effective;
                        }
                        changed = true;
                    }
                    *needed.entry(cpsr_in.0).or_insert_with(FlagMask::empty) |= effective;
                }
                needed.remove(&dst_id);
            }
            Opcode::UpdateSticky(u) => {
                let cpsr_in = u.cpsr_in;
                needed_sticky.insert(cpsr_in.0);
                needed.entry(cpsr_in.0).or_insert_with(FlagMask::all);
                needed.remove(&u.dst.id);
            }
            other => {
                if let Some(id) = other.writes() {
                    needed.remove(&id);
                    needed_sticky.remove(&id);
                }
                for id in other.writes_secondary() {
                    needed.remove(&id);
                    needed_sticky.remove(&id);
                }
                for id in other.reads() {
                    needed.insert(id, FlagMask::all());
                }
            }
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::opcode::{LoadCpsr, StoreCpsr, UpdateFlags};
    use crate::ir::value::{AnyRef, DataType, VarRef, Variable};

    #[test]
    fn mask_bits_unused_by_any_consumer_are_dropped() {
        // UpdateFlags result is read only by a second UpdateFlags that only wants Z.
        let mut program = vec![
            Opcode::LoadCpsr(LoadCpsr { dst: Variable::new(0, DataType::U32) }),
            Opcode::UpdateFlags(UpdateFlags { dst: Variable::new(1, DataType::U32), cpsr_in: VarRef(0), mask: FlagMask::N | FlagMask::C }),
            Opcode::UpdateFlags(UpdateFlags { dst: Variable::new(2, DataType::U32), cpsr_in: VarRef(1), mask: FlagMask::Z }),
            Opcode::StoreCpsr(StoreCpsr { value: AnyRef::Variable(2) }),
        ];
        assert!(run(&mut program));
        match &program[1] {
            Opcode::UpdateFlags(u) => assert_eq!(u.mask, FlagMask::empty()),
            _ => panic!("expected narrowed UpdateFlags"),
        }
    }

    #[test]
    fn store_consumer_forces_full_mask_demand() {
        let mut program = vec![
            Opcode::LoadCpsr(LoadCpsr { dst: Variable::new(0, DataType::U32) }),
            Opcode::UpdateFlags(UpdateFlags { dst: Variable::new(1, DataType::U32), cpsr_in: VarRef(0), mask: FlagMask::N | FlagMask::Z }),
            Opcode::StoreCpsr(StoreCpsr { value: AnyRef::Variable(1) }),
        ];
        assert!(!run(&mut program));
        match &program[1] {
            Opcode::UpdateFlags(u) => assert_eq!(u.mask, FlagMask::N | FlagMask::Z),
            _ => panic!("expected UpdateFlags to survive"),
        }
    }
}
