//! Micro-blocks: the condition-guarded IR program groupings inside a basic block (spec.md §3).

use std::collections::HashSet;

use crate::ir::opcode::Opcode;
use crate::ir::value::VarId;
use crate::isa::condition::Condition;

/// A group of IR opcodes sharing one guard condition (spec.md §3 "MicroBlock"). Optimization and
/// register allocation are scoped to exactly one micro-block.
#[derive(Clone, Debug)]
pub struct MicroBlock {
    /// Guard condition; the micro-block's IR only executes when this evaluates true against the
    /// current CPSR flags.
    pub condition: Condition,
    /// Ordered IR program.
    pub program: Vec<Opcode>,
    /// Number of guest instructions this micro-block covers.
    pub length: u32,
}

impl MicroBlock {
    /// Creates an empty micro-block under the given guard.
    pub fn new(condition: Condition) -> Self {
        Self { condition, program: Vec::new(), length: 0 }
    }

    /// Appends an opcode to the program.
    pub fn push(&mut self, op: Opcode) {
        self.program.push(op);
    }

    /// Verifies spec.md §8's SSA and closed-variable-scope properties: every variable this
    /// micro-block defines is written by exactly one opcode, and every read is dominated by a
    /// preceding write within the same program order.
    pub fn check_ssa_and_scope(&self) -> Result<(), SsaViolation> {
        let mut defined: HashSet<VarId> = HashSet::new();
        for (index, op) in self.program.iter().enumerate() {
            for read in op.reads() {
                if !defined.contains(&read) {
                    return Err(SsaViolation::ReadBeforeWrite { index, var: read });
                }
            }
            let mut writes = op.writes().into_iter().collect::<Vec<_>>();
            writes.extend(op.writes_secondary());
            for w in writes {
                if !defined.insert(w) {
                    return Err(SsaViolation::DoubleWrite { index, var: w });
                }
            }
        }
        Ok(())
    }
}

/// Why [`MicroBlock::check_ssa_and_scope`] failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SsaViolation {
    /// An opcode at `index` read `var` before any preceding opcode wrote it.
    ReadBeforeWrite {
        /// Index of the offending opcode within the micro-block's program.
        index: usize,
        /// The variable read without a dominating write.
        var: VarId,
    },
    /// An opcode at `index` wrote `var`, but an earlier opcode already wrote it (SSA violation).
    DoubleWrite {
        /// Index of the offending opcode within the micro-block's program.
        index: usize,
        /// The variable written twice.
        var: VarId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::opcode::{Alu, AluKind, LoadGpr, Opcode, StoreGpr};
    use crate::ir::value::{AnyRef, DataType, Variable};
    use crate::state::mode::CpuMode;

    #[test]
    fn well_formed_program_passes() {
        let mut mb = MicroBlock::new(Condition::Al);
        mb.push(Opcode::LoadGpr(LoadGpr { dst: Variable::new(0, DataType::U32), mode: CpuMode::User, reg: 0 }));
        mb.push(Opcode::Alu(Alu {
            dst: Variable::new(1, DataType::U32),
            kind: AluKind::Mov,
            lhs: AnyRef::Variable(0),
            rhs: AnyRef::Null,
            update_host_flags: false,
        }));
        mb.push(Opcode::StoreGpr(StoreGpr { mode: CpuMode::User, reg: 1, value: AnyRef::Variable(1) }));
        assert_eq!(mb.check_ssa_and_scope(), Ok(()));
    }

    #[test]
    fn read_before_write_is_detected() {
        let mut mb = MicroBlock::new(Condition::Al);
        mb.push(Opcode::StoreGpr(StoreGpr { mode: CpuMode::User, reg: 0, value: AnyRef::Variable(7) }));
        assert_eq!(mb.check_ssa_and_scope(), Err(SsaViolation::ReadBeforeWrite { index: 0, var: 7 }));
    }

    #[test]
    fn double_write_is_detected() {
        let mut mb = MicroBlock::new(Condition::Al);
        mb.push(Opcode::LoadGpr(LoadGpr { dst: Variable::new(0, DataType::U32), mode: CpuMode::User, reg: 0 }));
        mb.push(Opcode::LoadGpr(LoadGpr { dst: Variable::new(0, DataType::U32), mode: CpuMode::User, reg: 1 }));
        assert_eq!(mb.check_ssa_and_scope(), Err(SsaViolation::DoubleWrite { index: 1, var: 0 }));
    }
}
