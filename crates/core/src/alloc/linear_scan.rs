//! Linear-scan allocation over one micro-block's IR (spec.md §4.6).

use std::collections::{HashMap, HashSet};

use crate::common::error::JitError;
use crate::ir::microblock::MicroBlock;
use crate::ir::value::VarId;

/// Index into the pool of host registers reserved for IR variables. Excludes the emitter's three
/// statically-reserved registers (state pointer, cycle counter, host-flag shadow) — those never
/// enter this pool (spec.md §4.6 "excluding architecturally reserved ones").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HostReg(pub u32);

/// A 32-bit slot in the dispatcher's fixed spill area.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpillSlot(pub u32);

/// What the emitter must do with one variable immediately before lowering opcode `at`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreAction {
    /// Write `var`'s current register out to `slot`, then free the register.
    SpillStore { var: VarId, reg: HostReg, slot: SpillSlot },
    /// Load `var` back from `slot` into `reg` before it is read.
    Reload { var: VarId, reg: HostReg, slot: SpillSlot },
}

/// Per-opcode allocation decisions: which register each read/write operand occupies, whether a
/// write reused a dying operand's register (eliding a MOV, per spec.md §4.6), and any spill/reload
/// housekeeping that must run immediately before the opcode.
#[derive(Clone, Debug, Default)]
pub struct OpcodeAlloc {
    /// Host register bound to each variable this opcode reads, at the moment of the read.
    pub reads: Vec<(VarId, HostReg)>,
    /// Host register bound to each variable this opcode writes, and whether it was inherited from
    /// a dying input register rather than freshly allocated.
    pub writes: Vec<(VarId, HostReg, bool)>,
    /// Spill stores and reloads that must happen before this opcode is lowered, in order.
    pub pre_actions: Vec<PreAction>,
}

/// The full allocation result for one micro-block: one [`OpcodeAlloc`] per program index.
#[derive(Clone, Debug)]
pub struct Allocation {
    /// Parallel to [`MicroBlock::program`].
    pub per_opcode: Vec<OpcodeAlloc>,
}

struct Pools {
    free_regs: Vec<HostReg>,
    free_slots: Vec<SpillSlot>,
}

impl Pools {
    fn new(host_registers: usize, spill_slots: usize) -> Self {
        Self {
            free_regs: (0..host_registers as u32).rev().map(HostReg).collect(),
            free_slots: (0..spill_slots as u32).rev().map(SpillSlot).collect(),
        }
    }
}

struct Scan {
    pools: Pools,
    last_use: HashMap<VarId, usize>,
    active: HashMap<VarId, HostReg>,
    spilled: HashMap<VarId, SpillSlot>,
    decisions: Vec<OpcodeAlloc>,
    total_regs: usize,
    total_slots: usize,
}

impl Scan {
    fn expire(&mut self, position: usize) {
        let dead: Vec<VarId> = self
            .active
            .iter()
            .filter(|(var, _)| self.last_use.get(var).copied().unwrap_or(position) < position)
            .map(|(var, _)| *var)
            .collect();
        for var in dead {
            if let Some(reg) = self.active.remove(&var) {
                self.pools.free_regs.push(reg);
            }
        }
    }

    /// Frees one register by spilling some variable not read by the current opcode. Returns the
    /// freed register, or `None` if every active variable is needed by this very opcode (in which
    /// case no legal spill candidate exists and the allocator must fail).
    fn spill_one(&mut self, pre: &mut Vec<PreAction>, protected: &HashSet<VarId>) -> Option<HostReg> {
        let candidate = self.active.keys().find(|v| !protected.contains(v)).copied()?;
        let reg = self.active.remove(&candidate).unwrap();
        let slot = self.pools.free_slots.pop()?;
        self.spilled.insert(candidate, slot);
        pre.push(PreAction::SpillStore { var: candidate, reg, slot });
        Some(reg)
    }

    fn acquire(&mut self, var: VarId, pre: &mut Vec<PreAction>, protected: &HashSet<VarId>) -> Result<HostReg, JitError> {
        if let Some(&reg) = self.active.get(&var) {
            return Ok(reg);
        }
        let reg = match self.pools.free_regs.pop() {
            Some(reg) => reg,
            None => self.spill_one(pre, protected).ok_or_else(|| JitError::RegisterAllocationExhausted {
                live: self.active.len() + 1,
                regs: self.total_regs,
                slots: self.total_slots,
            })?,
        };
        if let Some(slot) = self.spilled.remove(&var) {
            pre.push(PreAction::Reload { var, reg, slot });
        }
        self.active.insert(var, reg);
        Ok(reg)
    }
}

/// Runs linear-scan allocation over `micro`'s program, bounded by `host_registers` general-purpose
/// registers and `spill_slots` stack slots.
pub fn allocate(micro: &MicroBlock, host_registers: usize, spill_slots: usize) -> Result<Allocation, JitError> {
    let mut last_use: HashMap<VarId, usize> = HashMap::new();
    for (index, op) in micro.program.iter().enumerate() {
        for var in op.reads() {
            last_use.insert(var, index);
        }
        if let Some(var) = op.writes() {
            last_use.entry(var).or_insert(index);
        }
        for var in op.writes_secondary() {
            last_use.entry(var).or_insert(index);
        }
    }

    let mut scan = Scan {
        pools: Pools::new(host_registers, spill_slots),
        last_use,
        active: HashMap::new(),
        spilled: HashMap::new(),
        decisions: Vec::with_capacity(micro.program.len()),
        total_regs: host_registers,
        total_slots: spill_slots,
    };

    for (index, op) in micro.program.iter().enumerate() {
        scan.expire(index);

        let mut pre_actions = Vec::new();
        let reads_vars = op.reads();
        let protected: HashSet<VarId> = reads_vars.iter().copied().collect();

        let mut reads = Vec::with_capacity(reads_vars.len());
        for var in &reads_vars {
            let reg = scan.acquire(*var, &mut pre_actions, &protected)?;
            reads.push((*var, reg));
        }

        let mut writes = Vec::new();
        let mut primary_targets: Vec<VarId> = op.writes().into_iter().collect();
        primary_targets.extend(op.writes_secondary());

        for dst in primary_targets {
            // Inherit a dying input's register when one is available: the operand's last use is
            // this opcode and it is not needed by any other still-pending write in this opcode.
            let inherited = reads
                .iter()
                .find(|(var, reg)| scan.last_use.get(var) == Some(&index) && !writes.iter().any(|(_, r, _)| r == reg))
                .map(|(_, reg)| *reg);

            let (reg, was_inherited) = if let Some(reg) = inherited {
                (reg, true)
            } else {
                (scan.acquire(dst, &mut pre_actions, &protected)?, false)
            };

            scan.active.insert(dst, reg);
            writes.push((dst, reg, was_inherited));
        }

        scan.decisions.push(OpcodeAlloc { reads, writes, pre_actions });
    }

    Ok(Allocation { per_opcode: scan.decisions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::opcode::{Alu, AluKind, Opcode, StoreGpr};
    use crate::ir::value::{AnyRef, Constant, DataType, Variable};
    use crate::isa::condition::Condition;
    use crate::state::mode::CpuMode;

    fn mov(id: VarId, c: u32) -> Opcode {
        Opcode::Alu(Alu { dst: Variable::new(id, DataType::U32), kind: AluKind::Mov, lhs: AnyRef::Constant(Constant::u32(c)), rhs: AnyRef::Null, update_host_flags: false })
    }

    #[test]
    fn reuses_registers_once_plenty_available() {
        let mut mb = MicroBlock::new(Condition::Al);
        mb.push(mov(0, 1));
        mb.push(mov(1, 2));
        mb.push(Opcode::Alu(Alu { dst: Variable::new(2, DataType::U32), kind: AluKind::Add, lhs: AnyRef::Variable(0), rhs: AnyRef::Variable(1), update_host_flags: false }));
        mb.push(Opcode::StoreGpr(StoreGpr { mode: CpuMode::User, reg: 0, value: AnyRef::Variable(2) }));
        let alloc = allocate(&mb, 8, 4).unwrap();
        assert_eq!(alloc.per_opcode.len(), 4);
        assert!(alloc.per_opcode.iter().all(|d| d.pre_actions.is_empty()));
    }

    #[test]
    fn spills_when_registers_run_out() {
        let mut mb = MicroBlock::new(Condition::Al);
        for i in 0..4 {
            mb.push(mov(i, i));
        }
        // keep all four alive simultaneously by reading them all at the end
        mb.push(Opcode::Alu(Alu { dst: Variable::new(4, DataType::U32), kind: AluKind::Add, lhs: AnyRef::Variable(0), rhs: AnyRef::Variable(1), update_host_flags: false }));
        mb.push(Opcode::Alu(Alu { dst: Variable::new(5, DataType::U32), kind: AluKind::Add, lhs: AnyRef::Variable(2), rhs: AnyRef::Variable(3), update_host_flags: false }));
        mb.push(Opcode::Alu(Alu { dst: Variable::new(6, DataType::U32), kind: AluKind::Add, lhs: AnyRef::Variable(4), rhs: AnyRef::Variable(5), update_host_flags: false }));
        let alloc = allocate(&mb, 2, 4).unwrap();
        assert!(alloc.per_opcode.iter().any(|d| !d.pre_actions.is_empty()));
    }

    #[test]
    fn exhaustion_with_no_spill_slots_fails() {
        let mut mb = MicroBlock::new(Condition::Al);
        for i in 0..4 {
            mb.push(mov(i, i));
        }
        mb.push(Opcode::Alu(Alu { dst: Variable::new(4, DataType::U32), kind: AluKind::Add, lhs: AnyRef::Variable(0), rhs: AnyRef::Variable(1), update_host_flags: false }));
        mb.push(Opcode::Alu(Alu { dst: Variable::new(5, DataType::U32), kind: AluKind::Add, lhs: AnyRef::Variable(2), rhs: AnyRef::Variable(3), update_host_flags: false }));
        mb.push(Opcode::Alu(Alu { dst: Variable::new(6, DataType::U32), kind: AluKind::Add, lhs: AnyRef::Variable(4), rhs: AnyRef::Variable(5), update_host_flags: false }));
        let result = allocate(&mb, 1, 0);
        assert!(result.is_err());
    }
}
