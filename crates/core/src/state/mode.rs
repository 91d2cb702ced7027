//! Processor modes and the register-banking rules between them (spec.md §3).
//!
//! R0–R7 and R15 are shared across every mode. R8–R12 are banked between FIQ and "all other
//! modes" (one extra copy). R13–R14 are banked per mode, except that User and System share a
//! single copy. SPSR exists for every mode except User and System.

/// The seven ARM processor modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CpuMode {
    /// Unprivileged mode; shares R13/R14 with System and has no SPSR.
    User,
    /// Fast interrupt mode; has its own R8–R12 bank in addition to R13/R14 and SPSR.
    Fiq,
    /// Interrupt mode.
    Irq,
    /// Supervisor mode, entered on reset and `SWI`.
    Supervisor,
    /// Abort mode, entered on data/prefetch abort.
    Abort,
    /// Undefined-instruction mode.
    Undefined,
    /// Privileged mode sharing R13/R14 with User and having no SPSR.
    System,
}

/// The two R8–R12 register banks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Bank8_12 {
    /// R8–R12 as seen by every mode other than FIQ.
    Other,
    /// R8–R12 as seen by FIQ.
    Fiq,
}

impl CpuMode {
    /// All seven modes, in the order the guest-state layout stores their R13/R14 and SPSR banks.
    pub const ALL: [CpuMode; 7] = [
        CpuMode::User,
        CpuMode::Fiq,
        CpuMode::Irq,
        CpuMode::Supervisor,
        CpuMode::Abort,
        CpuMode::Undefined,
        CpuMode::System,
    ];

    /// Which of the two R8–R12 banks this mode reads and writes.
    pub(crate) fn r8_12_bank(self) -> Bank8_12 {
        match self {
            CpuMode::Fiq => Bank8_12::Fiq,
            _ => Bank8_12::Other,
        }
    }

    /// Index (0..6) into the R13/R14 bank array. User and System alias to the same slot.
    pub(crate) fn r13_14_bank(self) -> usize {
        match self {
            CpuMode::User | CpuMode::System => 0,
            CpuMode::Fiq => 1,
            CpuMode::Irq => 2,
            CpuMode::Supervisor => 3,
            CpuMode::Abort => 4,
            CpuMode::Undefined => 5,
        }
    }

    /// Index (0..5) into the SPSR bank array, or `None` for User/System which have no SPSR.
    pub(crate) fn spsr_bank(self) -> Option<usize> {
        match self {
            CpuMode::User | CpuMode::System => None,
            CpuMode::Fiq => Some(0),
            CpuMode::Irq => Some(1),
            CpuMode::Supervisor => Some(2),
            CpuMode::Abort => Some(3),
            CpuMode::Undefined => Some(4),
        }
    }

    /// The 5-bit CPSR mode-field encoding for this mode.
    pub fn mode_bits(self) -> u32 {
        match self {
            CpuMode::User => 0b10000,
            CpuMode::Fiq => 0b10001,
            CpuMode::Irq => 0b10010,
            CpuMode::Supervisor => 0b10011,
            CpuMode::Abort => 0b10111,
            CpuMode::Undefined => 0b11011,
            CpuMode::System => 0b11111,
        }
    }

    /// Decodes a mode from the CPSR mode-field bits; `None` for an unrecognized (reserved)
    /// encoding.
    pub fn from_mode_bits(bits: u32) -> Option<CpuMode> {
        CpuMode::ALL.into_iter().find(|m| m.mode_bits() == bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_and_system_share_r13_14_bank() {
        assert_eq!(CpuMode::User.r13_14_bank(), CpuMode::System.r13_14_bank());
    }

    #[test]
    fn user_and_system_have_no_spsr() {
        assert_eq!(CpuMode::User.spsr_bank(), None);
        assert_eq!(CpuMode::System.spsr_bank(), None);
    }

    #[test]
    fn mode_bits_roundtrip() {
        for m in CpuMode::ALL {
            assert_eq!(CpuMode::from_mode_bits(m.mode_bits()), Some(m));
        }
    }

    #[test]
    fn fiq_has_distinct_r8_12_bank() {
        assert_eq!(CpuMode::Fiq.r8_12_bank(), Bank8_12::Fiq);
        assert_eq!(CpuMode::User.r8_12_bank(), Bank8_12::Other);
    }
}
