//! Root configuration for a compiled core instance (SPEC_FULL.md §B.3).
//!
//! Mirrors the teacher's `config.rs` defaults-module pattern: a `serde`-deserializable `Config`
//! with a hand-written [`Default`] impl backed by named constant defaults, so an embedder can
//! deserialize a partial config (e.g. from JSON) and get sensible values for everything else.

use serde::Deserialize;

use crate::common::constants::{DEFAULT_HOST_REGISTERS, DEFAULT_SPILL_SLOTS, MAX_BLOCK_LENGTH};

/// Baseline configuration values, named so `Config::default()` and any embedder-facing
/// documentation cite the same constants.
pub mod defaults {
    use super::{DEFAULT_HOST_REGISTERS, DEFAULT_SPILL_SLOTS, MAX_BLOCK_LENGTH};

    /// Default guest CPU model.
    pub const CPU_MODEL: super::CpuModel = super::CpuModel::ArmV5TE;
    /// Default maximum guest instructions per compiled block (spec.md §4.4).
    pub const BLOCK_SIZE: u32 = MAX_BLOCK_LENGTH;
    /// Default number of host registers reserved for the linear-scan allocator.
    pub const HOST_REGISTERS: usize = DEFAULT_HOST_REGISTERS;
    /// Default number of 32-bit spill slots.
    pub const SPILL_SLOTS: usize = DEFAULT_SPILL_SLOTS;
    /// Default page-table presence (spec.md §6).
    pub const PAGE_TABLE_ENABLED: bool = true;
    /// Default instruction-TCM presence.
    pub const INSTRUCTION_TCM_ENABLED: bool = false;
    /// Default data-TCM presence.
    pub const DATA_TCM_ENABLED: bool = false;
}

/// The two guest CPU variants this core targets (spec.md §6 "CPU descriptor").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum CpuModel {
    /// ARMv4T: no `BLX`, no `CLZ`, no saturating arithmetic, ARMv4T misaligned-halfword
    /// degradation applies.
    #[serde(rename = "armv4t")]
    ArmV4T,
    /// ARMv5TE: adds `BLX`, `CLZ`, `QADD`/`QSUB`/`QDADD`/`QDSUB`, and DSP multiply extensions.
    #[serde(rename = "armv5te")]
    ArmV5TE,
}

impl CpuModel {
    /// `true` for instructions only valid on ARMv5TE (`BLX`, `CLZ`, the saturating-arithmetic and
    /// DSP-multiply families).
    pub fn has_armv5te_extensions(self) -> bool {
        matches!(self, CpuModel::ArmV5TE)
    }
}

/// Presence and addressing of one tightly-coupled-memory window (spec.md §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct TcmWindowConfig {
    /// Whether this window is present at all.
    pub enable: bool,
    /// Whether reads are accelerated through this window (writes always are, when `enable`).
    pub enable_read: bool,
    /// Base guest address.
    pub base: u32,
    /// Exclusive upper bound; `limit - base` need not be a power of two.
    pub limit: u32,
}

impl TcmWindowConfig {
    /// A disabled window.
    pub const DISABLED: TcmWindowConfig = TcmWindowConfig { enable: false, enable_read: false, base: 0, limit: 0 };

    /// Whether `addr` falls within `[base, limit)` and the window is enabled for the requested
    /// direction.
    pub fn covers(&self, addr: u32, for_write: bool) -> bool {
        self.enable && (for_write || self.enable_read) && addr >= self.base && addr < self.limit
    }
}

impl Default for TcmWindowConfig {
    fn default() -> Self {
        Self::DISABLED
    }
}

/// Root configuration for one [`crate::dispatch::Dispatcher`] instance (spec.md §6 "CPU
/// descriptor"). `memory`/`coprocessors` are runtime collaborators, not configuration, and are
/// supplied separately to the dispatcher's constructor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which guest CPU variant to target.
    pub model: CpuModel,
    /// Maximum guest instructions per compiled block.
    pub block_size: u32,
    /// Host registers available to the linear-scan allocator.
    pub host_registers: usize,
    /// 32-bit spill slots reserved by the dispatcher prologue.
    pub spill_slots: usize,
    /// Whether a guest page table is consulted for the memory fast path.
    pub page_table_enabled: bool,
    /// Instruction-TCM window.
    pub instruction_tcm: TcmWindowConfig,
    /// Data-TCM window.
    pub data_tcm: TcmWindowConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: defaults::CPU_MODEL,
            block_size: defaults::BLOCK_SIZE,
            host_registers: defaults::HOST_REGISTERS,
            spill_slots: defaults::SPILL_SLOTS,
            page_table_enabled: defaults::PAGE_TABLE_ENABLED,
            instruction_tcm: TcmWindowConfig { enable: defaults::INSTRUCTION_TCM_ENABLED, ..TcmWindowConfig::DISABLED },
            data_tcm: TcmWindowConfig { enable: defaults::DATA_TCM_ENABLED, ..TcmWindowConfig::DISABLED },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_named_defaults() {
        let c = Config::default();
        assert_eq!(c.model, defaults::CPU_MODEL);
        assert_eq!(c.block_size, defaults::BLOCK_SIZE);
        assert_eq!(c.host_registers, defaults::HOST_REGISTERS);
    }

    #[test]
    fn tcm_window_respects_read_gate() {
        let w = TcmWindowConfig { enable: true, enable_read: false, base: 0x1000, limit: 0x2000 };
        assert!(!w.covers(0x1500, false));
        assert!(w.covers(0x1500, true));
    }

    #[test]
    fn armv4t_lacks_v5_extensions() {
        assert!(!CpuModel::ArmV4T.has_armv5te_extensions());
        assert!(CpuModel::ArmV5TE.has_armv5te_extensions());
    }
}
