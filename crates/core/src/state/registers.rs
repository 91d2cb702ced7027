//! `GuestState`: the frozen register-file layout emitted code addresses by constant displacement
//! from a state base pointer (spec.md §4.1).
//!
//! The layout is intentionally simple (no padding tricks, `#[repr(C)]`) so [`gpr_offset`],
//! [`cpsr_offset`], and [`spsr_offset`] are stable across builds — the emitter bakes these
//! offsets into the wasm it generates, so they must never move under an existing compiled block.

use crate::state::cpsr::Cpsr;
use crate::state::mode::{Bank8_12, CpuMode};

/// Number of GPRs banked between FIQ and all other modes (R8–R12).
const R8_12_COUNT: usize = 5;
/// Number of R13/R14 banks (User+System, FIQ, IRQ, Supervisor, Abort, Undefined).
const R13_14_BANKS: usize = 6;
/// Number of SPSR banks (every mode except User/System).
const SPSR_BANKS: usize = 5;

/// The banked ARM guest register file.
///
/// Field order is load-bearing: [`gpr_offset`]/[`cpsr_offset`]/[`spsr_offset`] compute byte
/// offsets from `std::mem::offset_of!` against these exact fields.
#[repr(C)]
#[derive(Clone, Debug)]
pub struct GuestState {
    /// R0–R7, shared across every mode.
    pub r_common: [u32; 8],
    /// R15 (the program counter), shared across every mode.
    pub r_pc: u32,
    /// R8–R12, banked `[Other, Fiq]`.
    pub r8_12: [[u32; R8_12_COUNT]; 2],
    /// R13/R14, banked `[UserSystem, Fiq, Irq, Supervisor, Abort, Undefined]`.
    pub r13_14: [[u32; 2]; R13_14_BANKS],
    /// Current program status register.
    pub cpsr: u32,
    /// Saved program status registers, banked `[Fiq, Irq, Supervisor, Abort, Undefined]`.
    pub spsr: [u32; SPSR_BANKS],
}

impl Default for GuestState {
    fn default() -> Self {
        Self {
            r_common: [0; 8],
            r_pc: 0,
            r8_12: [[0; R8_12_COUNT]; 2],
            r13_14: [[0; 2]; R13_14_BANKS],
            cpsr: CpuMode::Supervisor.mode_bits(),
            spsr: [0; SPSR_BANKS],
        }
    }
}

impl GuestState {
    /// Reads GPR `reg` (0–15) as banked for `mode`.
    ///
    /// # Panics
    ///
    /// Panics if `reg > 15`; callers (decoder output) guarantee a 4-bit register field.
    pub fn gpr(&self, mode: CpuMode, reg: u32) -> u32 {
        match reg {
            0..=7 => self.r_common[reg as usize],
            15 => self.r_pc,
            8..=12 => self.r8_12[bank8_12_index(mode)][(reg - 8) as usize],
            13..=14 => self.r13_14[mode.r13_14_bank()][(reg - 13) as usize],
            _ => panic!("guest register index out of range: {reg}"),
        }
    }

    /// Writes GPR `reg` (0–15) as banked for `mode`.
    ///
    /// # Panics
    ///
    /// Panics if `reg > 15`.
    pub fn set_gpr(&mut self, mode: CpuMode, reg: u32, val: u32) {
        match reg {
            0..=7 => self.r_common[reg as usize] = val,
            15 => self.r_pc = val,
            8..=12 => self.r8_12[bank8_12_index(mode)][(reg - 8) as usize] = val,
            13..=14 => self.r13_14[mode.r13_14_bank()][(reg - 13) as usize] = val,
            _ => panic!("guest register index out of range: {reg}"),
        }
    }

    /// Reads the current program status register.
    pub fn cpsr(&self) -> Cpsr {
        Cpsr::new(self.cpsr)
    }

    /// Overwrites the current program status register.
    pub fn set_cpsr(&mut self, val: Cpsr) {
        self.cpsr = val.bits();
    }

    /// Reads the saved program status register for `mode`; `None` for User/System.
    pub fn spsr(&self, mode: CpuMode) -> Option<Cpsr> {
        mode.spsr_bank().map(|bank| Cpsr::new(self.spsr[bank]))
    }

    /// Overwrites the saved program status register for `mode`. A no-op for User/System, which
    /// have no SPSR (mirrors real hardware: the write is simply discarded).
    pub fn set_spsr(&mut self, mode: CpuMode, val: Cpsr) {
        if let Some(bank) = mode.spsr_bank() {
            self.spsr[bank] = val.bits();
        }
    }
}

fn bank8_12_index(mode: CpuMode) -> usize {
    match mode.r8_12_bank() {
        Bank8_12::Other => 0,
        Bank8_12::Fiq => 1,
    }
}

/// Byte offset of GPR `reg` as banked for `mode`, relative to a `GuestState` base pointer.
///
/// This is the O(1) `(mode, reg)` → offset lookup spec.md §4.1 calls for: each arm of the match
/// is a constant-time computation over `offset_of!` plus a bank-index multiply, with no runtime
/// search.
///
/// # Panics
///
/// Panics if `reg > 15`.
pub fn gpr_offset(mode: CpuMode, reg: u32) -> usize {
    match reg {
        0..=7 => std::mem::offset_of!(GuestState, r_common) + reg as usize * 4,
        15 => std::mem::offset_of!(GuestState, r_pc),
        8..=12 => {
            std::mem::offset_of!(GuestState, r8_12)
                + bank8_12_index(mode) * R8_12_COUNT * 4
                + (reg - 8) as usize * 4
        }
        13..=14 => {
            std::mem::offset_of!(GuestState, r13_14) + mode.r13_14_bank() * 2 * 4 + (reg - 13) as usize * 4
        }
        _ => panic!("guest register index out of range: {reg}"),
    }
}

/// Byte offset of the CPSR field, relative to a `GuestState` base pointer.
pub fn cpsr_offset() -> usize {
    std::mem::offset_of!(GuestState, cpsr)
}

/// Byte offset of the SPSR bank for `mode`, relative to a `GuestState` base pointer; `None` for
/// User/System.
pub fn spsr_offset(mode: CpuMode) -> Option<usize> {
    mode.spsr_bank()
        .map(|bank| std::mem::offset_of!(GuestState, spsr) + bank * 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r0_r7_and_pc_shared_across_modes() {
        let mut s = GuestState::default();
        s.set_gpr(CpuMode::User, 3, 0x1111);
        s.set_gpr(CpuMode::Fiq, 15, 0x2222);
        assert_eq!(s.gpr(CpuMode::Supervisor, 3), 0x1111);
        assert_eq!(s.gpr(CpuMode::Irq, 15), 0x2222);
    }

    #[test]
    fn r8_12_banked_between_fiq_and_others() {
        let mut s = GuestState::default();
        s.set_gpr(CpuMode::User, 9, 0xAAAA);
        s.set_gpr(CpuMode::Fiq, 9, 0xBBBB);
        assert_eq!(s.gpr(CpuMode::Supervisor, 9), 0xAAAA);
        assert_eq!(s.gpr(CpuMode::Fiq, 9), 0xBBBB);
    }

    #[test]
    fn r13_14_user_and_system_share_bank() {
        let mut s = GuestState::default();
        s.set_gpr(CpuMode::User, 13, 0xCAFE);
        assert_eq!(s.gpr(CpuMode::System, 13), 0xCAFE);
        s.set_gpr(CpuMode::Irq, 13, 0xBEEF);
        assert_eq!(s.gpr(CpuMode::User, 13), 0xCAFE);
    }

    #[test]
    fn spsr_absent_for_user_and_system() {
        let mut s = GuestState::default();
        s.set_spsr(CpuMode::User, Cpsr::new(0xFF));
        assert_eq!(s.spsr(CpuMode::User), None);
        assert_eq!(spsr_offset(CpuMode::User), None);
    }

    #[test]
    fn offsets_are_distinct_and_in_bounds() {
        let size = std::mem::size_of::<GuestState>();
        for mode in CpuMode::ALL {
            for reg in 0..16u32 {
                let off = gpr_offset(mode, reg);
                assert!(off + 4 <= size);
            }
        }
        assert!(cpsr_offset() + 4 <= size);
    }
}
