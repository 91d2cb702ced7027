//! Error taxonomy for fallible core operations (spec.md §7).
//!
//! Class (1) and (2) below are handled locally by the dispatcher (fallback / one retry); class
//! (3) is fatal and propagates to the embedder; class (4) (host memory faults) deliberately has
//! *no* variant here, since that failure domain belongs to the [`crate::memory::Memory`]
//! implementation, not the core; class (5) (guest exceptions) is not an error at all — it is
//! encoded as ordinary IR that banks processor state and branches to a vector.

use thiserror::Error;

use crate::common::addr::GuestAddr;

/// Errors surfaced by translation, optimization, allocation, emission, or dispatch.
#[derive(Error, Debug)]
pub enum JitError {
    /// Class (1): the decoder or translator does not recognize this encoding. Recoverable — the
    /// dispatcher may interpret exactly one instruction at `at` and resume translation past it.
    #[error("unimplemented encoding at {at:#010x}: {reason}")]
    UnimplementedEncoding {
        /// Guest address of the offending instruction.
        at: u32,
        /// Human-readable description of what was unrecognized.
        reason: &'static str,
    },

    /// Class (3): the allocator could not satisfy a variable's live range with the available
    /// host registers and spill slots. Indicates a bug upstream (too many simultaneously live
    /// values for the configured allocator), not a guest-triggerable condition.
    #[error("register allocation exhausted: {live} live values, {regs} registers, {slots} spill slots")]
    RegisterAllocationExhausted {
        /// Number of simultaneously live variables the allocator could not place.
        live: usize,
        /// Number of host registers configured.
        regs: usize,
        /// Number of spill slots configured.
        slots: usize,
    },

    /// Class (2): the managed code buffer filled up during emission. The dispatcher resets the
    /// buffer, re-emits its prologue, and retries this block exactly once; a second occurrence
    /// is promoted to fatal by the caller.
    #[error("code buffer exhausted while emitting block at {at:#010x}")]
    CodeBufferExhausted {
        /// Entry address of the block being emitted when the buffer filled.
        at: u32,
    },

    /// The requested block key does not name a valid, currently cached block.
    #[error("no cached block for key at {0:#010x}")]
    InvalidBlockKey(u32),

    /// Failure while building or validating the wasm module produced by the emitter.
    #[error("wasm encode failure: {0}")]
    WasmEncodeFailure(String),

    /// Failure constructing or instantiating the host execution engine for a compiled module.
    #[error("engine initialization failure: {0}")]
    EngineInit(String),
}

impl JitError {
    /// `true` if this error class is recoverable by the dispatcher without aborting the host
    /// program (spec.md §7 classes (1) and (2)).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            JitError::UnimplementedEncoding { .. } | JitError::CodeBufferExhausted { .. }
        )
    }

    /// Convenience constructor for an unimplemented-encoding error at a guest address.
    pub fn unimplemented(at: GuestAddr, reason: &'static str) -> Self {
        JitError::UnimplementedEncoding {
            at: at.val(),
            reason,
        }
    }
}
