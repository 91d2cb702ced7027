//! Basic blocks: the immutable, cache-owned unit of compilation (spec.md §3 "Basic Block").

use crate::common::addr::BlockKey;
use crate::ir::microblock::MicroBlock;

/// Dense index into the code buffer's funcref table, assigned by the block cache at insertion
/// time (SPEC_FULL.md §C.2: inter-block linking as an indirect-call-table patch). Opaque to the
/// IR layer; only the cache and emitter interpret it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FunctionSlot(pub u32);

/// A statically known successor and the call-site slot the linker patches to jump there
/// directly once the successor is compiled (spec.md §3 "branch_target").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BranchTarget {
    /// Key of the successor block.
    pub key: BlockKey,
    /// Funcref-table slot this block's tail indirect-calls through; the linker overwrites this
    /// slot with the successor's funcref once it compiles.
    pub call_site_slot: u32,
}

/// An immutable compiled basic block (spec.md §3). Owned exclusively by the block cache; deletion
/// must run the release callback that detaches this block from its `branch_target`'s
/// `linking_blocks` and from every predecessor's `linking_blocks` that names it.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    /// Packed entry-point identity.
    pub key: BlockKey,
    /// Number of guest instructions this block covers; debited from the dispatcher's cycle
    /// counter on every entry.
    pub length: u32,
    /// Ordered condition-guarded IR groups.
    pub micro_blocks: Vec<MicroBlock>,
    /// Slot in the code buffer's funcref table, once emitted. `None` before the block reaches the
    /// `Emitted` lifecycle state.
    pub function: Option<FunctionSlot>,
    /// Statically known successor, if the translator determined one.
    pub branch_target: Option<BranchTarget>,
    /// Keys of predecessor blocks whose `branch_target` names this block.
    pub linking_blocks: Vec<BlockKey>,
}

impl BasicBlock {
    /// Creates a block with no micro-blocks yet (the `Fresh` lifecycle state).
    pub fn new(key: BlockKey) -> Self {
        Self { key, length: 0, micro_blocks: Vec::new(), function: None, branch_target: None, linking_blocks: Vec::new() }
    }

    /// Appends a micro-block, folding its instruction count into this block's total length.
    pub fn push_micro_block(&mut self, micro_block: MicroBlock) {
        self.length += micro_block.length;
        self.micro_blocks.push(micro_block);
    }

    /// Verifies spec.md §8's SSA and closed-variable-scope properties across every micro-block.
    pub fn check_ssa_and_scope(&self) -> Result<(), (usize, crate::ir::microblock::SsaViolation)> {
        for (i, mb) in self.micro_blocks.iter().enumerate() {
            mb.check_ssa_and_scope().map_err(|e| (i, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::condition::Condition;
    use crate::state::mode::CpuMode;

    #[test]
    fn length_accumulates_across_micro_blocks() {
        let mut block = BasicBlock::new(BlockKey::new(crate::common::addr::GuestAddr::new(0x1000), CpuMode::User, false));
        let mut a = MicroBlock::new(Condition::Al);
        a.length = 2;
        let mut b = MicroBlock::new(Condition::Eq);
        b.length = 3;
        block.push_micro_block(a);
        block.push_micro_block(b);
        assert_eq!(block.length, 5);
        assert_eq!(block.micro_blocks.len(), 2);
    }
}
