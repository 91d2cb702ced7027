//! Property-based tests for the testable properties named in spec.md §8: cycle accounting and
//! invalidation consistency, checked across randomized inputs rather than fixed examples.

use armjit_core::cache::BlockCache;
use armjit_core::common::addr::{BlockKey, GuestAddr};
use armjit_core::coprocessor::Coprocessor;
use armjit_core::ir::block::{BasicBlock, FunctionSlot};
use armjit_core::ir::microblock::MicroBlock;
use armjit_core::ir::opcode::MemBus;
use armjit_core::isa::condition::Condition;
use armjit_core::memory::Memory;
use armjit_core::state::mode::CpuMode;
use armjit_core::{Config, Cpu};
use proptest::prelude::*;

struct FlatMemory {
    bytes: Vec<u8>,
}

impl Memory for FlatMemory {
    fn read_byte(&mut self, addr: u32, _bus: MemBus) -> u8 {
        self.bytes.get(addr as usize).copied().unwrap_or(0)
    }
    fn read_half(&mut self, addr: u32, _bus: MemBus) -> u16 {
        let i = addr as usize;
        u16::from_le_bytes([self.bytes.get(i).copied().unwrap_or(0), self.bytes.get(i + 1).copied().unwrap_or(0)])
    }
    fn read_word(&mut self, addr: u32, _bus: MemBus) -> u32 {
        let i = addr as usize;
        u32::from_le_bytes([
            self.bytes.get(i).copied().unwrap_or(0),
            self.bytes.get(i + 1).copied().unwrap_or(0),
            self.bytes.get(i + 2).copied().unwrap_or(0),
            self.bytes.get(i + 3).copied().unwrap_or(0),
        ])
    }
    fn write_byte(&mut self, _addr: u32, _value: u8, _bus: MemBus) {}
    fn write_half(&mut self, _addr: u32, _value: u16, _bus: MemBus) {}
    fn write_word(&mut self, _addr: u32, _value: u32, _bus: MemBus) {}
}

struct NoopCoprocessor;

impl Coprocessor for NoopCoprocessor {
    fn read(&mut self, _opcode1: u32, _crn: u32, _crm: u32, _opcode2: u32) -> u32 {
        0
    }
    fn write(&mut self, _opcode1: u32, _crn: u32, _crm: u32, _opcode2: u32, _value: u32) {}
    fn should_write_break_basic_block(&self, _opcode1: u32, _crn: u32, _crm: u32, _opcode2: u32) -> bool {
        false
    }
    fn reset(&mut self) {}
}

fn coprocessors() -> [Box<dyn Coprocessor>; 16] {
    std::array::from_fn(|_| Box::new(NoopCoprocessor) as Box<dyn Coprocessor>)
}

/// `B .` (branch-to-self): a one-instruction infinite loop, used so every `run` call is forced to
/// cross many one-length block boundaries regardless of the requested budget.
const BRANCH_TO_SELF: u32 = 0xEAFF_FFFE;

fn self_loop_cpu() -> Cpu {
    let mut bytes = vec![0u8; 0x10];
    bytes[0..4].copy_from_slice(&BRANCH_TO_SELF.to_le_bytes());
    Cpu::new(Config::default(), Box::new(FlatMemory { bytes }), coprocessors())
}

proptest! {
    /// spec.md §8 "Cycle accounting": consumed cycles meet the budget and never overshoot it by
    /// more than the last block's length (1, for this single-instruction loop).
    #[test]
    fn cycle_accounting_bounds_hold(budget in 1u32..64) {
        let mut cpu = self_loop_cpu();
        let consumed = cpu.run(budget).expect("run should not error");
        prop_assert!(consumed >= budget);
        prop_assert!(consumed <= budget + 1);
    }
}

fn block_at(addr: u32, length: u32) -> BasicBlock {
    let mut block = BasicBlock::new(BlockKey::new(GuestAddr::new(addr), CpuMode::User, false));
    let mut mb = MicroBlock::new(Condition::Al);
    mb.length = length;
    block.push_micro_block(mb);
    block
}

proptest! {
    /// spec.md §8 "Invalidation consistency": after `flush(addr_lo, addr_hi)`, no cached block
    /// whose byte span overlaps that range is still reachable through `get`.
    #[test]
    fn invalidation_consistency_holds(
        addr in 0u32..0x10_0000,
        length in 1u32..8,
        flush_offset in 0u32..32,
    ) {
        let mut cache = BlockCache::new();
        let key = BlockKey::new(GuestAddr::new(addr), CpuMode::User, false);
        cache.insert(block_at(addr, length), FunctionSlot(0));
        prop_assert!(cache.get(key).is_some());

        let flush_at = addr.saturating_add(flush_offset);
        let evicted = cache.flush(GuestAddr::new(flush_at), GuestAddr::new(flush_at));

        let span_end = addr.saturating_add(length.saturating_mul(4));
        if flush_at <= span_end {
            prop_assert!(cache.get(key).is_none());
            prop_assert!(evicted.contains(&key));
        }
    }
}
