//! Keyed block storage and invalidation (spec.md §3 "Basic Block" cache ownership, §8
//! "Invalidation consistency").

use std::collections::HashMap;

use crate::cache::code_version::CodeVersionTable;
use crate::common::addr::{BlockKey, GuestAddr};
use crate::ir::block::{BasicBlock, FunctionSlot};

/// A cached block plus the page versions it was compiled against.
pub struct CachedBlock {
    /// The compiled block.
    pub block: BasicBlock,
    /// Its funcref-table slot.
    pub function: FunctionSlot,
    pages: Vec<u32>,
    versions_at_compile: Vec<u32>,
}

impl CachedBlock {
    /// Whether every page this block was compiled against still matches its stamped version.
    fn is_stale(&self, versions: &CodeVersionTable) -> bool {
        self.pages.iter().zip(&self.versions_at_compile).any(|(&page, &v)| versions.current(page) != v)
    }
}

/// Keyed storage for compiled blocks, with page-version-based invalidation.
#[derive(Default)]
pub struct BlockCache {
    entries: HashMap<BlockKey, CachedBlock>,
    versions: CodeVersionTable,
}

impl BlockCache {
    /// Builds an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a cached block by key, without checking staleness (callers that hold a key from a
    /// prior successful lookup rely on `flush` having already evicted anything stale).
    pub fn get(&self, key: BlockKey) -> Option<&CachedBlock> {
        self.entries.get(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records a freshly compiled block at its current page versions. Each guest instruction in
    /// `block` occupies at most [`crate::common::constants::ARM_OPCODE_SIZE`] bytes, so the last
    /// byte covered is bounded by `length * ARM_OPCODE_SIZE` from the entry address regardless of
    /// ARM/Thumb encoding.
    pub fn insert(&mut self, block: BasicBlock, function: FunctionSlot) {
        let key = block.key;
        let last_byte = key.addr().val().saturating_add(block.length.saturating_mul(crate::common::constants::ARM_OPCODE_SIZE));
        let first_page = key.addr().page();
        let last_page = GuestAddr::new(last_byte).page();
        let pages: Vec<u32> = (first_page..=last_page).collect();
        let versions_at_compile = pages.iter().map(|&p| self.versions.current(p)).collect();
        self.entries.insert(key, CachedBlock { block, function, pages, versions_at_compile });
    }

    /// Bumps every guest page touched by `[addr_lo, addr_hi]` and evicts every cached block whose
    /// stamped page versions are now stale. Returns the evicted keys so the caller (the linker)
    /// can unlink any predecessor still pointing at them.
    pub fn flush(&mut self, addr_lo: GuestAddr, addr_hi: GuestAddr) -> Vec<BlockKey> {
        self.versions.bump_range(addr_lo, addr_hi);
        let stale: Vec<BlockKey> =
            self.entries.iter().filter(|(_, cached)| cached.is_stale(&self.versions)).map(|(key, _)| *key).collect();
        for key in &stale {
            self.entries.remove(key);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::microblock::MicroBlock;
    use crate::isa::condition::Condition;
    use crate::state::mode::CpuMode;

    fn block_at(addr: u32, length: u32) -> BasicBlock {
        let mut block = BasicBlock::new(BlockKey::new(GuestAddr::new(addr), CpuMode::User, false));
        let mut mb = MicroBlock::new(Condition::Al);
        mb.length = length;
        block.push_micro_block(mb);
        block
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let mut cache = BlockCache::new();
        let key = BlockKey::new(GuestAddr::new(0x1000), CpuMode::User, false);
        cache.insert(block_at(0x1000, 2), FunctionSlot(0));
        assert!(cache.get(key).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn flush_evicts_overlapping_block_only() {
        let mut cache = BlockCache::new();
        cache.insert(block_at(0x1000, 2), FunctionSlot(0));
        cache.insert(block_at(0x5000, 2), FunctionSlot(1));

        let evicted = cache.flush(GuestAddr::new(0x1004), GuestAddr::new(0x1004));
        assert_eq!(evicted, vec![BlockKey::new(GuestAddr::new(0x1000), CpuMode::User, false)]);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(BlockKey::new(GuestAddr::new(0x5000), CpuMode::User, false)).is_some());
    }
}
