//! Guest address and block-key types.
//!
//! Strongly typed wrappers prevent accidentally mixing a raw guest address with the packed key a
//! compiled block is identified by. A [`BlockKey`] bundles everything the decoder needs to decide
//! *how* to read the bytes at an address: the address itself, the banking mode, and the
//! instruction-set state (ARM vs. Thumb).

use crate::state::CpuMode;

/// A 32-bit guest address (code or data; the space is not distinguished at this type).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GuestAddr(pub u32);

impl GuestAddr {
    /// Wraps a raw 32-bit value.
    #[inline(always)]
    pub fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Returns the raw 32-bit address value.
    #[inline(always)]
    pub fn val(self) -> u32 {
        self.0
    }

    /// Returns the guest page number (address divided by the 4 KiB page size).
    #[inline(always)]
    pub fn page(self) -> u32 {
        self.0 >> crate::common::constants::GUEST_PAGE_SHIFT
    }

    /// Returns the in-page byte offset.
    #[inline(always)]
    pub fn page_offset(self) -> u32 {
        self.0 & (crate::common::constants::GUEST_PAGE_OFFSET_MASK as u32)
    }
}

/// Packed identity of a basic block's guest entry point (spec.md §3: "`key` — packed
/// (address\[31:1\], mode\[4:0\], T-flag)").
///
/// Two blocks with the same address but different mode or instruction-set state decode
/// differently and must never collide in the block cache, hence the mode/T-flag are folded
/// into equality and hashing alongside the address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockKey {
    /// Entry address. Bit 0 is ignored for Thumb entries (Thumb instructions are halfword
    /// aligned) and must be zero for ARM entries.
    addr: u32,
    /// Processor mode active at entry (governs which banked registers the block addresses).
    mode: CpuMode,
    /// Instruction-set state at entry: `true` for Thumb, `false` for ARM.
    thumb: bool,
}

impl BlockKey {
    /// Builds a block key from an entry address, mode, and Thumb state.
    ///
    /// The low bit of `addr` is cleared: ARM entries must already have it clear (misaligned ARM
    /// fetch is a guest bug, not a key variation) and Thumb entries treat it as the interworking
    /// bit already consumed by the caller, not part of the key.
    pub fn new(addr: GuestAddr, mode: CpuMode, thumb: bool) -> Self {
        Self {
            addr: addr.val() & !1,
            mode,
            thumb,
        }
    }

    /// The block's entry address.
    #[inline(always)]
    pub fn addr(self) -> GuestAddr {
        GuestAddr(self.addr)
    }

    /// The processor mode the block was compiled for.
    #[inline(always)]
    pub fn mode(self) -> CpuMode {
        self.mode
    }

    /// Whether this block decodes as Thumb (16-bit) or ARM (32-bit) encoding.
    #[inline(always)]
    pub fn thumb(self) -> bool {
        self.thumb
    }

    /// Size in bytes of one guest instruction at this key's encoding state.
    #[inline(always)]
    pub fn opcode_size(self) -> u32 {
        if self.thumb {
            crate::common::constants::THUMB_OPCODE_SIZE
        } else {
            crate::common::constants::ARM_OPCODE_SIZE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumb_key_clears_low_bit() {
        let key = BlockKey::new(GuestAddr::new(0x1001), CpuMode::User, true);
        assert_eq!(key.addr().val(), 0x1000);
        assert!(key.thumb());
    }

    #[test]
    fn distinct_mode_yields_distinct_key() {
        let a = BlockKey::new(GuestAddr::new(0x8000), CpuMode::User, false);
        let b = BlockKey::new(GuestAddr::new(0x8000), CpuMode::Supervisor, false);
        assert_ne!(a, b);
    }

    #[test]
    fn page_and_offset_roundtrip() {
        let a = GuestAddr::new(0x0000_2345);
        assert_eq!(a.page(), 0x2);
        assert_eq!(a.page_offset(), 0x345);
    }
}
