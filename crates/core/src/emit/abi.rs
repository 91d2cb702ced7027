//! Host/wasm ABI constants shared by every emitted block (SPEC_FULL.md §C.1).
//!
//! The dispatcher's code buffer is a single wasm module, instantiated once per recompile, that
//! imports a small fixed set of host functions and exports one function per compiled block plus a
//! funcref table used for inter-block linking. Naming and shape here mirror how a native wasm JIT
//! backend structures its host/guest boundary.

/// Import module name every host function lives under.
pub const IMPORT_MODULE: &str = "host";

/// Slow-path memory read, one per access width: `(addr: i32, bus: i32) -> i32`.
pub const IMPORT_MEM_READ_U8: &str = "mem_read_u8";
/// See [`IMPORT_MEM_READ_U8`].
pub const IMPORT_MEM_READ_U16: &str = "mem_read_u16";
/// See [`IMPORT_MEM_READ_U8`].
pub const IMPORT_MEM_READ_U32: &str = "mem_read_u32";
/// Slow-path memory write, one per access width: `(addr: i32, bus: i32, value: i32)`.
pub const IMPORT_MEM_WRITE_U8: &str = "mem_write_u8";
/// See [`IMPORT_MEM_WRITE_U8`].
pub const IMPORT_MEM_WRITE_U16: &str = "mem_write_u16";
/// See [`IMPORT_MEM_WRITE_U8`].
pub const IMPORT_MEM_WRITE_U32: &str = "mem_write_u32";

/// `(coproc: i32, opcode1: i32, crn: i32, crm: i32, opcode2: i32) -> i32`.
pub const IMPORT_MRC: &str = "coprocessor_read";
/// `(coproc: i32, opcode1: i32, crn: i32, crm: i32, opcode2: i32, value: i32)`.
pub const IMPORT_MCR: &str = "coprocessor_write";

/// Called on block exit when the cycle counter has run out or the block has no statically linked
/// successor; returns control to the dispatcher thunk. `(remaining_cycles: i32) -> i32`, echoing
/// its argument back so every block-exported function keeps the same
/// `(state_ptr, cycles, flags) -> remaining_cycles` signature whether it exits locally or via a
/// tail `call_indirect` into a linked successor.
pub const IMPORT_JIT_EXIT: &str = "jit_exit";

/// Name of the module's own exported linear memory, sized to hold [`GuestState`] followed
/// immediately by the spill area; `state::registers` byte offsets and [`spill_offset`] apply
/// directly as wasm `i32.load`/`i32.store` offsets against it. Exported (not imported) so the
/// dispatcher can read/patch guest state directly through `Memory::data_mut` between calls,
/// rather than needing a separate host-owned backing buffer kept in sync with wasm's own.
///
/// [`GuestState`]: crate::state::registers::GuestState
/// [`spill_offset`]: crate::emit::spill_offset
pub const STATE_MEMORY: &str = "guest_state";

/// Name of the exported funcref table every block's tail indirect-calls through for inter-block
/// linking (SPEC_FULL.md §C.2).
pub const LINK_TABLE: &str = "blocks";

/// Export name prefix for one compiled block's entry function; the suffix is its [`FunctionSlot`]
/// index, matching its funcref table slot (SPEC_FULL.md §C.2).
///
/// [`FunctionSlot`]: crate::ir::block::FunctionSlot
pub const BLOCK_EXPORT_PREFIX: &str = "block_";

/// Wasm local index of the guest-state base pointer, set once on module instantiation (spec.md
/// §4.7 "StatePointer").
pub const LOCAL_STATE_PTR: u32 = 0;
/// Wasm local index of the remaining cycle budget for this call (spec.md §4.7 "CycleCounter").
pub const LOCAL_CYCLE_COUNTER: u32 = 1;
/// Wasm local index of the host-flag shadow word. Bit layout matches guest CPSR directly (N=31,
/// Z=30, C=29, V=28, Q=27) — wasm has no native flags register to mirror, so lowering computes
/// these bits explicitly in this local rather than reading a real host status register, which also
/// makes `UpdateFlags`'s bit-permutation an identity instead of a mask+multiply (spec.md §4.7
/// "Flag propagation").
pub const LOCAL_FLAG_SHADOW: u32 = 2;
/// First local index available for IR variables / allocator-assigned registers.
pub const LOCAL_FIRST_SCRATCH: u32 = 3;

/// Index into the type section of the function type shared by every exported block (and every
/// funcref-table entry), so a tail `call_indirect` never needs a per-callee type check. Assigned
/// once when the module's type section is built (SPEC_FULL.md §C.2); every block shares it.
pub const BLOCK_FUNC_TYPE_INDEX: u32 = 0;
