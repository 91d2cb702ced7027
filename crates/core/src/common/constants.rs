//! Cross-module constants.

/// Number of bits to shift to convert between bytes and guest pages.
pub const GUEST_PAGE_SHIFT: u32 = 12;

/// Guest page size in bytes (4 KiB), matching the page-table/TCM granularity of spec.md §4.7/§6.
pub const GUEST_PAGE_SIZE: u64 = 1 << GUEST_PAGE_SHIFT;

/// Mask for extracting the in-page byte offset from a guest address.
pub const GUEST_PAGE_OFFSET_MASK: u64 = GUEST_PAGE_SIZE - 1;

/// Number of entries in the guest page table (2^20, one per 4 KiB page across a 32-bit space).
pub const PAGE_TABLE_ENTRIES: usize = 1 << 20;

/// Maximum number of guest instructions a single basic block may cover (spec.md §4.4).
pub const MAX_BLOCK_LENGTH: u32 = 32;

/// Size in bytes of an ARM (32-bit encoding) instruction.
pub const ARM_OPCODE_SIZE: u32 = 4;

/// Size in bytes of a Thumb (16-bit encoding) instruction.
pub const THUMB_OPCODE_SIZE: u32 = 2;

/// Default number of host registers available to the linear-scan allocator.
pub const DEFAULT_HOST_REGISTERS: usize = 12;

/// Default number of 32-bit spill slots reserved by the dispatcher prologue.
pub const DEFAULT_SPILL_SLOTS: usize = 32;
