//! Common types shared across the decoder, translator, optimizer, allocator, and emitter.
//!
//! 1. **Addressing:** [`BlockKey`], the guest entry point identity a compiled block is keyed on.
//! 2. **Constants:** page size, block length cap, and other cross-module limits.
//! 3. **Errors:** the [`error::JitError`] taxonomy (spec.md §7).

/// Guest address / block-key types.
pub mod addr;
/// Cross-module constants.
pub mod constants;
/// Error taxonomy for fallible core operations.
pub mod error;

pub use addr::{BlockKey, GuestAddr};
pub use constants::{GUEST_PAGE_SHIFT, GUEST_PAGE_SIZE, MAX_BLOCK_LENGTH};
pub use error::JitError;
