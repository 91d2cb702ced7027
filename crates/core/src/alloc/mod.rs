//! Register allocation (spec.md §4.6): linear-scan over one micro-block's IR, producing the
//! per-opcode register/spill decisions the code emitter lowers from.

mod linear_scan;

pub use linear_scan::{Allocation, HostReg, OpcodeAlloc, PreAction, SpillSlot, allocate};

use crate::common::error::JitError;
use crate::config::Config;
use crate::ir::microblock::MicroBlock;

/// Allocates registers for `micro` under `config`'s register/spill budget.
pub fn allocate_micro_block(micro: &MicroBlock, config: &Config) -> Result<Allocation, JitError> {
    allocate(micro, config.host_registers, config.spill_slots)
}
