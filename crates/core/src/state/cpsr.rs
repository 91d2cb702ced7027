//! Current/saved program status register bit layout (spec.md §3).
//!
//! CPSR is a 32-bit word: `mode[4:0]`, the Thumb state bit `T[5]`, interrupt masks `I`/`F`, the
//! four condition flags `N`,`Z`,`C`,`V`, and the saturating flag `Q`. `Cpsr` wraps the raw word;
//! [`CpsrFlags`] names the individual single-bit fields for mask-based IR ([`crate::ir::opcode`]
//! `UpdateFlags`/`UpdateSticky`) and emitter bit-translation use.

use bitflags::bitflags;

use crate::state::mode::CpuMode;

bitflags! {
    /// Single-bit CPSR fields. Bit positions match the real ARM encoding so the emitter can
    /// translate host flag bits into these positions with a direct shift/mask, per spec.md §4.7.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CpsrFlags: u32 {
        /// Negative condition flag (bit 31).
        const N = 1 << 31;
        /// Zero condition flag (bit 30).
        const Z = 1 << 30;
        /// Carry condition flag (bit 29).
        const C = 1 << 29;
        /// Overflow condition flag (bit 28).
        const V = 1 << 28;
        /// Sticky saturation flag (bit 27), set by `QADD`/`QSUB` family ops and `UpdateSticky`.
        const Q = 1 << 27;
        /// IRQ disable mask (bit 7).
        const IRQ_DISABLE = 1 << 7;
        /// FIQ disable mask (bit 6).
        const FIQ_DISABLE = 1 << 6;
        /// Thumb instruction-set state bit (bit 5).
        const THUMB = 1 << 5;
    }
}

/// Bit mask covering the 5-bit mode field (bits 0–4).
const MODE_MASK: u32 = 0x1F;

/// A program status register (used for both CPSR and any SPSR bank): a raw 32-bit word with
/// typed accessors for the fields emitted code and the optimizer's flag tracking care about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Cpsr(pub u32);

impl Cpsr {
    /// Wraps a raw PSR word.
    #[inline(always)]
    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw 32-bit value.
    #[inline(always)]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns the single-bit flags currently set.
    #[inline(always)]
    pub fn flags(self) -> CpsrFlags {
        CpsrFlags::from_bits_truncate(self.0)
    }

    /// Sets or clears the given flags, leaving every other bit untouched.
    pub fn set_flags(&mut self, flags: CpsrFlags, on: bool) {
        let raw = CpsrFlags::from_bits_truncate(self.0);
        let updated = if on { raw | flags } else { raw & !flags };
        self.0 = (self.0 & !CpsrFlags::all().bits()) | updated.bits();
    }

    /// Decodes the current processor mode from the mode field; `None` for a reserved encoding.
    pub fn mode(self) -> Option<CpuMode> {
        CpuMode::from_mode_bits(self.0 & MODE_MASK)
    }

    /// Overwrites the mode field, leaving every other bit untouched.
    pub fn set_mode(&mut self, mode: CpuMode) {
        self.0 = (self.0 & !MODE_MASK) | mode.mode_bits();
    }

    /// Whether the Thumb instruction-set state bit is set.
    #[inline(always)]
    pub fn thumb(self) -> bool {
        self.flags().contains(CpsrFlags::THUMB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_flags_preserves_mode() {
        let mut p = Cpsr::new(CpuMode::Supervisor.mode_bits());
        p.set_flags(CpsrFlags::Z | CpsrFlags::C, true);
        assert_eq!(p.mode(), Some(CpuMode::Supervisor));
        assert!(p.flags().contains(CpsrFlags::Z));
        assert!(p.flags().contains(CpsrFlags::C));
        assert!(!p.flags().contains(CpsrFlags::N));
    }

    #[test]
    fn set_mode_preserves_flags() {
        let mut p = Cpsr::new(CpsrFlags::N.bits() | CpuMode::User.mode_bits());
        p.set_mode(CpuMode::Irq);
        assert_eq!(p.mode(), Some(CpuMode::Irq));
        assert!(p.flags().contains(CpsrFlags::N));
    }
}
