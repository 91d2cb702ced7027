//! Lifts guest machine code into the IR (spec.md §3, §4.4).
//!
//! [`Translator::translate_block`] walks guest instructions starting at a [`BlockKey`]'s entry
//! point, grouping consecutive same-condition instructions into one [`MicroBlock`] and ending the
//! [`BasicBlock`] at the first control-flow terminator, PC-writing instruction, privileged-state
//! change, or the configured instruction cap (spec.md §4.4 "Block Boundaries").

mod arm;
mod thumb;

use crate::common::addr::{BlockKey, GuestAddr};
use crate::common::error::JitError;
use crate::config::Config;
use crate::ir::block::{BasicBlock, BranchTarget};
use crate::ir::microblock::MicroBlock;
use crate::ir::opcode::Opcode;
use crate::ir::value::{AnyRef, Constant, DataType, VarId, Variable};
use crate::isa::condition::Condition;

/// Supplies raw instruction words to the translator. The dispatcher's [`crate::memory::Memory`]
/// implementation is the production source; tests use a flat in-memory slice.
pub trait CodeFetch {
    /// Fetches the 32-bit ARM instruction word at `addr`.
    fn fetch_arm(&mut self, addr: GuestAddr) -> u32;
    /// Fetches the 16-bit Thumb instruction halfword at `addr`.
    fn fetch_thumb(&mut self, addr: GuestAddr) -> u16;
}

/// Whether lowering one guest instruction ends the basic block being built.
pub(crate) enum Terminate {
    /// Translation continues with the next guest instruction.
    No,
    /// This instruction is the last in the block; no statically known successor.
    Yes,
    /// This instruction is the last in the block, and `target` is the sole, statically known
    /// successor (spec.md §3 "branch_target").
    Branch(BlockKey),
}

/// Accumulates one micro-block's IR program. Variable ids are dense and restart at zero for each
/// micro-block (spec.md §3: a `Variable`'s id is "unique within the micro-block that defines
/// it").
pub(crate) struct IrBuilder {
    micro: MicroBlock,
    next_var: VarId,
}

impl IrBuilder {
    fn new(condition: Condition) -> Self {
        Self { micro: MicroBlock::new(condition), next_var: 0 }
    }

    fn fresh(&mut self) -> VarId {
        let id = self.next_var;
        self.next_var += 1;
        id
    }

    pub(crate) fn var(&mut self, data_type: DataType) -> Variable {
        Variable::new(self.fresh(), data_type)
    }

    pub(crate) fn push(&mut self, op: Opcode) {
        self.micro.push(op);
    }

    fn finish(self, length: u32) -> MicroBlock {
        let mut micro = self.micro;
        micro.length = length;
        micro
    }
}

/// Converts a guest instruction count into a byte-address delta under `key`'s encoding state.
fn bytes(key: BlockKey, instructions: u32) -> u32 {
    key.opcode_size() * instructions
}

/// Computes the value R15 reads as, per ARM's two-ahead pipeline model (spec.md §4.4): the
/// address of the instruction being lowered, plus two instruction widths (or three, for the
/// register-specified-shift pipeline quirk where PC is read an extra cycle later).
pub(crate) fn pc_read_value(key: BlockKey, instr_addr: u32, extra_ahead: bool) -> u32 {
    instr_addr.wrapping_add(bytes(key, if extra_ahead { 3 } else { 2 }))
}

/// Lifts guest code into basic blocks, using `config` to decide the instruction cap.
pub struct Translator<'a> {
    config: &'a Config,
}

impl<'a> Translator<'a> {
    /// Builds a translator bound to `config`'s block-size limit.
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Translates the basic block starting at `key`, fetching instruction words through `fetch`.
    pub fn translate_block<F: CodeFetch>(&self, key: BlockKey, fetch: &mut F) -> Result<BasicBlock, JitError> {
        let mut block = BasicBlock::new(key);
        let mut addr = key.addr().val();
        let mut builder: Option<IrBuilder> = None;
        let mut current_cond: Option<Condition> = None;
        let mut count: u32 = 0;
        // `BL`/`BLX` (Thumb format 19) splits its signed offset across two consecutive
        // halfwords; this carries the high half's bits across the one-instruction gap.
        let mut pending_bl_high: Option<u32> = None;

        loop {
            if count >= self.config.block_size {
                break;
            }

            let instr_addr = GuestAddr::new(addr);
            let terminate = if key.thumb() {
                let word = fetch.fetch_thumb(instr_addr);
                thumb::step(self, key, instr_addr, word, &mut block, &mut builder, &mut current_cond, &mut pending_bl_high)?
            } else {
                let word = fetch.fetch_arm(instr_addr);
                arm::step(self, key, instr_addr, word, &mut block, &mut builder, &mut current_cond)?
            };

            count += 1;
            addr = addr.wrapping_add(key.opcode_size());
            if let Some(b) = builder.as_mut() {
                b.micro.length += 1;
            }

            match terminate {
                Terminate::No => continue,
                Terminate::Yes => break,
                Terminate::Branch(target_key) => {
                    let slot = 0;
                    block.branch_target = Some(BranchTarget { key: target_key, call_site_slot: slot });
                    break;
                }
            }
        }

        if let Some(b) = builder.take() {
            let length = b.micro.length;
            block.push_micro_block(b.finish(length));
        }

        Ok(block)
    }
}

/// Opens a fresh micro-block when `cond` differs from the currently open one, flushing the
/// previous micro-block into `block` first.
pub(crate) fn enter_condition(
    block: &mut BasicBlock,
    builder: &mut Option<IrBuilder>,
    current_cond: &mut Option<Condition>,
    cond: Condition,
) {
    if *current_cond != Some(cond) {
        if let Some(prev) = builder.take() {
            let length = prev.micro.length;
            block.push_micro_block(prev.finish(length));
        }
        *builder = Some(IrBuilder::new(cond));
        *current_cond = Some(cond);
    }
}

/// A `Constant` `AnyRef` wrapping a plain `u32`, convenience for lowering code.
pub(crate) fn imm(value: u32) -> AnyRef {
    AnyRef::from(Constant::u32(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::mode::CpuMode;

    struct FlatMemory(Vec<u8>);

    impl CodeFetch for FlatMemory {
        fn fetch_arm(&mut self, addr: GuestAddr) -> u32 {
            let i = addr.val() as usize;
            u32::from_le_bytes([self.0[i], self.0[i + 1], self.0[i + 2], self.0[i + 3]])
        }
        fn fetch_thumb(&mut self, addr: GuestAddr) -> u16 {
            let i = addr.val() as usize;
            u16::from_le_bytes([self.0[i], self.0[i + 1]])
        }
    }

    #[test]
    fn straight_line_block_ends_at_branch() {
        // MOV r0, #1 ; MOV r1, #2 ; B +0 (infinite self-branch, just needs to decode)
        let mov_r0_1: u32 = 0xE3A00001;
        let mov_r1_2: u32 = 0xE3A01002;
        let b_self: u32 = 0xEAFFFFFE;
        let mut bytes = Vec::new();
        for w in [mov_r0_1, mov_r1_2, b_self] {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        let mut mem = FlatMemory(bytes);
        let config = Config::default();
        let translator = Translator::new(&config);
        let key = BlockKey::new(GuestAddr::new(0), CpuMode::Supervisor, false);
        let block = translator.translate_block(key, &mut mem).unwrap();
        assert_eq!(block.length, 3);
        assert!(block.branch_target.is_some());
        assert!(block.check_ssa_and_scope().is_ok());
    }
}
