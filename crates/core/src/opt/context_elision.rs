//! Context load/store elision (spec.md §4.5(b), (c)).

use std::collections::{HashMap, HashSet};

use crate::ir::opcode::{Alu, AluKind, Opcode};
use crate::ir::value::{AnyRef, DataType, VarId, Variable};
use crate::state::mode::CpuMode;

/// Forward pass (b): a `LoadGPR`/`LoadCPSR` that follows a known store to the same target is
/// removed and repointed to the stored value, or replaced with a residual `MOV` when repointing
/// isn't possible (the stored value is a constant, or its type doesn't match the load's).
pub(super) fn load_store_elision(program: &mut [Opcode]) -> bool {
    let mut var_types: HashMap<VarId, DataType> = HashMap::new();
    let mut last_gpr: HashMap<(CpuMode, u32), AnyRef> = HashMap::new();
    let mut last_cpsr: Option<AnyRef> = None;
    let mut changed = false;

    for i in 0..program.len() {
        if let (Some(id), Some(dt)) = (program[i].writes(), program[i].write_data_type()) {
            var_types.insert(id, dt);
        }

        let action = match &program[i] {
            Opcode::LoadGpr(l) => last_gpr.get(&(l.mode, l.reg)).map(|&v| (l.dst.id, l.dst.data_type, v)),
            Opcode::LoadCpsr(l) => last_cpsr.map(|v| (l.dst.id, l.dst.data_type, v)),
            _ => None,
        };

        if let Some((dst_id, dst_type, value)) = action {
            let repointable = matches!(value, AnyRef::Variable(src) if var_types.get(&src) == Some(&dst_type));
            if let AnyRef::Variable(src) = value {
                if repointable {
                    program[i] = Opcode::Nop;
                    for op in program[i + 1..].iter_mut() {
                        op.repoint(dst_id, src);
                    }
                    changed = true;
                }
            }
            if !repointable {
                program[i] = Opcode::Alu(Alu {
                    dst: Variable::new(dst_id, dst_type),
                    kind: AluKind::Mov,
                    lhs: value,
                    rhs: AnyRef::Null,
                    update_host_flags: false,
                });
                changed = true;
            }
        }

        match &program[i] {
            Opcode::StoreGpr(s) => {
                last_gpr.insert((s.mode, s.reg), s.value);
            }
            Opcode::StoreCpsr(s) => {
                last_cpsr = Some(s.value);
            }
            _ => {}
        }
    }

    changed
}

/// Backward pass (c): a `StoreGPR`/`StoreCPSR` to a target that a later store (already seen while
/// walking in reverse) overwrites is dead and is deleted.
pub(super) fn store_elision(program: &mut [Opcode]) -> bool {
    let mut seen_gpr: HashSet<(CpuMode, u32)> = HashSet::new();
    let mut seen_cpsr = false;
    let mut changed = false;

    for i in (0..program.len()).rev() {
        match &program[i] {
            Opcode::StoreGpr(s) => {
                let key = (s.mode, s.reg);
                if seen_gpr.contains(&key) {
                    program[i] = Opcode::Nop;
                    changed = true;
                } else {
                    seen_gpr.insert(key);
                }
            }
            Opcode::StoreCpsr(_) => {
                if seen_cpsr {
                    program[i] = Opcode::Nop;
                    changed = true;
                } else {
                    seen_cpsr = true;
                }
            }
            _ => {}
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::opcode::{LoadGpr, StoreGpr};

    #[test]
    fn load_after_store_repoints_when_types_match() {
        let mut program = vec![
            Opcode::StoreGpr(StoreGpr { mode: CpuMode::User, reg: 0, value: AnyRef::Variable(0) }),
            Opcode::LoadGpr(LoadGpr { dst: Variable::new(1, DataType::U32), mode: CpuMode::User, reg: 0 }),
            Opcode::StoreGpr(StoreGpr { mode: CpuMode::User, reg: 1, value: AnyRef::Variable(1) }),
        ];
        // seed var 0's type via a fake earlier write so the repoint's type check succeeds
        program.insert(0, Opcode::Alu(Alu { dst: Variable::new(0, DataType::U32), kind: AluKind::Mov, lhs: AnyRef::Constant(crate::ir::value::Constant::u32(1)), rhs: AnyRef::Null, update_host_flags: false }));
        assert!(load_store_elision(&mut program));
        assert!(matches!(program[2], Opcode::Nop));
        match &program[3] {
            Opcode::StoreGpr(s) => assert_eq!(s.value, AnyRef::Variable(0)),
            _ => panic!("expected store repointed to var 0"),
        }
    }

    #[test]
    fn second_store_to_same_reg_kills_the_first() {
        let mut program = vec![
            Opcode::StoreGpr(StoreGpr { mode: CpuMode::User, reg: 0, value: AnyRef::Constant(crate::ir::value::Constant::u32(1)) }),
            Opcode::StoreGpr(StoreGpr { mode: CpuMode::User, reg: 0, value: AnyRef::Constant(crate::ir::value::Constant::u32(2)) }),
        ];
        assert!(store_elision(&mut program));
        assert!(matches!(program[0], Opcode::Nop));
        assert!(matches!(program[1], Opcode::StoreGpr(_)));
    }
}
