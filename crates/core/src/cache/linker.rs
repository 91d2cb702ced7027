//! Slot bookkeeping for inter-block linking (spec.md §3 "branch_target"/"linking_blocks",
//! SPEC_FULL.md §C.2).
//!
//! Every [`BlockKey`] ever referenced as a `branch_target` — whether or not it has compiled yet —
//! owns exactly one slot in the code buffer's funcref table, the same slot the block itself is
//! exported under once it does compile. A predecessor's tail `call_indirect` always targets its
//! successor's slot directly, so every existing predecessor starts reaching a freshly compiled
//! block as soon as the next module rebuild fills that slot in; no per-call-site slot or
//! pending-link queue is needed. Before a target compiles (or after it's evicted and not yet
//! recompiled), its slot holds a shared trampoline that calls back into the dispatcher. Slot
//! numbers are never reused or reclaimed across an eviction, since already-emitted predecessor
//! code bakes the numeric index into its `call_indirect` immediate.

use std::collections::HashMap;

use crate::common::addr::BlockKey;
use crate::ir::block::FunctionSlot;

/// Assigns dense, permanent [`FunctionSlot`]s to block keys.
#[derive(Default)]
pub struct Linker {
    next_slot: u32,
    slots: HashMap<BlockKey, FunctionSlot>,
}

impl Linker {
    /// Builds an empty linker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns (or returns the existing) funcref-table slot for `key`. Idempotent and permanent:
    /// once assigned, a key's slot never changes, even across eviction and recompilation.
    pub fn slot_for(&mut self, key: BlockKey) -> FunctionSlot {
        *self.slots.entry(key).or_insert_with(|| {
            let slot = FunctionSlot(self.next_slot);
            self.next_slot += 1;
            slot
        })
    }

    /// The slot already assigned to `key`, if any, without reserving a new one.
    pub fn existing_slot(&self, key: BlockKey) -> Option<FunctionSlot> {
        self.slots.get(&key).copied()
    }

    /// Total number of slots handed out so far; the size the funcref table must be allocated at.
    pub fn table_size(&self) -> u32 {
        self.next_slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::addr::GuestAddr;
    use crate::state::mode::CpuMode;

    fn key(addr: u32) -> BlockKey {
        BlockKey::new(GuestAddr::new(addr), CpuMode::User, false)
    }

    #[test]
    fn slot_assignment_is_stable_and_dense() {
        let mut linker = Linker::new();
        let a = linker.slot_for(key(0x1000));
        let b = linker.slot_for(key(0x2000));
        assert_eq!(a.0, 0);
        assert_eq!(b.0, 1);
        assert_eq!(linker.slot_for(key(0x1000)), a);
        assert_eq!(linker.table_size(), 2);
    }

    #[test]
    fn existing_slot_does_not_reserve() {
        let mut linker = Linker::new();
        assert_eq!(linker.existing_slot(key(0x3000)), None);
        assert_eq!(linker.table_size(), 0);
        let slot = linker.slot_for(key(0x3000));
        assert_eq!(linker.existing_slot(key(0x3000)), Some(slot));
    }
}
