//! Dispatcher (spec.md §6, §7): owns the code buffer and runs compiled blocks under a cycle
//! budget.
//!
//! [`Dispatcher::run`] repeatedly looks up the [`BlockKey`] named by the current PC/CPSR,
//! compiling it (translate → optimize → allocate → emit) if the cache has nothing for it, then
//! calls into the wasm module that the cache's blocks have been assembled into. A block may tail
//! `call_indirect` through the funcref table into any number of already-linked successors before
//! control returns here, so one `run` call can cross many basic block boundaries without ever
//! leaving wasmtime.

use wasmtime::{Caller, Engine, Instance, Linker as WasmLinker, Module, Store};

use crate::alloc;
use crate::cache::{BlockCache, Linker};
use crate::common::addr::{BlockKey, GuestAddr};
use crate::common::error::JitError;
use crate::config::Config;
use crate::coprocessor::Coprocessor;
use crate::emit::wasm_module::{self, FixedImports};
use crate::emit::{self, abi, CodeEmitter, EmittedBlock};
use crate::ir::block::FunctionSlot;
use crate::ir::opcode::MemBus;
use crate::memory::{Memory, PageTable, TcmWindow};
use crate::opt;
use crate::state::mode::CpuMode;
use crate::state::registers::GuestState;
use crate::translate::{CodeFetch, Translator};

/// Wasm page size in bytes (spec.md §6 / the wasm spec, not configurable).
const WASM_PAGE_BYTES: u64 = 65536;

/// Host-side collaborators reachable from inside a wasmtime host-function closure.
///
/// # Safety Invariants
///
/// - `memory`, `coprocessors`, `page_table`, `instruction_tcm`, and `data_tcm` must each point to
///   a live [`Dispatcher`]'s same-named field for as long as any `Store<HostState>` built from this
///   value is in use.
/// - [`Dispatcher::rebuild`] re-derives every pointer fresh every time it builds a new `Store`, so
///   this only needs to hold for the span of one such `Store`'s instantiate/call sequence — moving
///   the owning `Dispatcher` itself is fine, since a `Box`'s heap allocation does not move with it.
struct HostState {
    memory: *mut dyn Memory,
    coprocessors: *mut [Box<dyn Coprocessor>; 16],
    page_table: *const PageTable,
    instruction_tcm: *const TcmWindow,
    data_tcm: *const TcmWindow,
    page_table_enabled: bool,
}

/// A live wasmtime instantiation of the current code buffer. Rebuilt wholesale whenever the
/// dispatcher compiles a block or evicts one (`Dispatcher::dirty`), since wasm has no
/// incremental-link story (see [`wasm_module`]).
struct Runtime {
    store: Store<HostState>,
    instance: Instance,
}

/// Supplies instruction words to the translator straight from the dispatcher's [`Memory`].
struct MemoryFetch<'a> {
    memory: &'a mut dyn Memory,
}

impl CodeFetch for MemoryFetch<'_> {
    fn fetch_arm(&mut self, addr: GuestAddr) -> u32 {
        self.memory.read_word(addr.val(), MemBus::Code)
    }

    fn fetch_thumb(&mut self, addr: GuestAddr) -> u16 {
        self.memory.read_half(addr.val(), MemBus::Code)
    }
}

fn mem_bus(value: i32) -> MemBus {
    match value {
        0 => MemBus::Code,
        1 => MemBus::Data,
        _ => MemBus::System,
    }
}

fn wasm_pages(bytes: u64) -> u64 {
    bytes.div_ceil(WASM_PAGE_BYTES).max(1)
}

/// Byte view of `state`, used to seed and read back a wasm instance's state memory.
///
/// # Safety
/// `GuestState` is `#[repr(C)]` and made up entirely of `u32` fields, so any byte pattern of this
/// size is a valid reinterpretation; there is no padding to leak and no niche to invalidate.
fn state_bytes(state: &GuestState) -> &[u8] {
    unsafe { std::slice::from_raw_parts((state as *const GuestState).cast::<u8>(), std::mem::size_of::<GuestState>()) }
}

/// See [`state_bytes`].
fn state_bytes_mut(state: &mut GuestState) -> &mut [u8] {
    unsafe { std::slice::from_raw_parts_mut((state as *mut GuestState).cast::<u8>(), std::mem::size_of::<GuestState>()) }
}

/// Resolves `addr` against the tiered fast path (spec.md §4.7 "Memory fast path", tiers 1-3):
/// instruction-TCM (code/data buses), then data-TCM (data bus only), then the page table. Returns
/// `None` ("slow path") if no tier covers the address or the page table is disabled.
///
/// # Safety
/// `state`'s `page_table`/`instruction_tcm`/`data_tcm` pointers must be valid for reads, per
/// [`HostState`]'s invariants.
unsafe fn resolve_fast_path(state: &HostState, addr: u32, bus: MemBus, for_write: bool) -> Option<*mut u8> {
    if matches!(bus, MemBus::Code | MemBus::Data) {
        if let Some(ptr) = unsafe { &*state.instruction_tcm }.host_ptr(addr, for_write) {
            return Some(ptr);
        }
    }
    if matches!(bus, MemBus::Data) {
        if let Some(ptr) = unsafe { &*state.data_tcm }.host_ptr(addr, for_write) {
            return Some(ptr);
        }
    }
    if state.page_table_enabled {
        if let Some(ptr) = unsafe { &*state.page_table }.translate(addr) {
            return Some(ptr);
        }
    }
    None
}

/// Owns the code buffer and the dispatch loop for one guest CPU instance (spec.md §6 "CPU
/// descriptor", §7 "Dispatch loop").
pub struct Dispatcher {
    config: Config,
    state: GuestState,
    memory: Box<dyn Memory>,
    coprocessors: [Box<dyn Coprocessor>; 16],
    /// spec.md §6 "page table" acceleration channel; empty (all slow-path) until the embedder maps
    /// pages via [`Dispatcher::map_page`].
    page_table: PageTable,
    /// spec.md §6 "tightly-coupled memory" windows; disabled until the embedder calls
    /// [`Dispatcher::set_instruction_tcm`]/[`Dispatcher::set_data_tcm`].
    instruction_tcm: TcmWindow,
    data_tcm: TcmWindow,
    cache: BlockCache,
    linker: Linker,
    /// One entry per funcref-table slot the linker has handed out; `None` until that slot's block
    /// compiles (or after it's evicted and not yet recompiled).
    emitted: Vec<Option<EmittedBlock>>,
    engine: Engine,
    runtime: Option<Runtime>,
    /// Set whenever the cache or `emitted` changes; forces [`Dispatcher::rebuild`] before the next
    /// call into the current `runtime`.
    dirty: bool,
}

impl Dispatcher {
    /// Builds a dispatcher over `memory` and sixteen coprocessor slots, with no blocks compiled
    /// yet.
    pub fn new(config: Config, memory: Box<dyn Memory>, coprocessors: [Box<dyn Coprocessor>; 16]) -> Self {
        Self {
            config,
            state: GuestState::default(),
            memory,
            coprocessors,
            page_table: PageTable::new(),
            instruction_tcm: TcmWindow::disabled(),
            data_tcm: TcmWindow::disabled(),
            cache: BlockCache::new(),
            linker: Linker::new(),
            emitted: Vec::new(),
            engine: Engine::default(),
            runtime: None,
            dirty: true,
        }
    }

    /// The guest register file. Embedders set up the initial PC/SP/mode here before the first
    /// [`Dispatcher::run`] call.
    pub fn state(&self) -> &GuestState {
        &self.state
    }

    /// Mutable access to the guest register file.
    pub fn state_mut(&mut self) -> &mut GuestState {
        &mut self.state
    }

    /// Invalidates every compiled block whose byte span overlaps `[addr_lo, addr_hi]` (spec.md §8
    /// "Invalidation consistency"). Call this after a guest write lands on code the embedder knows
    /// is (or might be) executable; self-modifying code that never calls this will keep running
    /// stale translations.
    pub fn flush(&mut self, addr_lo: GuestAddr, addr_hi: GuestAddr) {
        let evicted = self.cache.flush(addr_lo, addr_hi);
        if evicted.is_empty() {
            return;
        }
        for key in &evicted {
            if let Some(slot) = self.linker.existing_slot(*key) {
                self.emitted[slot.0 as usize] = None;
            }
        }
        self.dirty = true;
        tracing::debug!(count = evicted.len(), "evicted stale blocks");
    }

    /// Maps guest page `index` (i.e. guest address range `[index << 12, (index + 1) << 12)`) onto
    /// `page` for the page-table acceleration channel (spec.md §6). Has no effect on memory
    /// accesses already in flight; takes effect on the next compiled-block entry.
    ///
    /// # Safety
    /// See [`PageTable::map`].
    pub unsafe fn map_page(&mut self, index: usize, page: *mut u8) {
        unsafe { self.page_table.map(index, page) };
    }

    /// Removes guest page `index`'s page-table mapping, reverting it to the slow path.
    pub fn unmap_page(&mut self, index: usize) {
        self.page_table.unmap(index);
    }

    /// Installs `backing` as the instruction-TCM window's store, using the range/enable flags from
    /// this dispatcher's [`Config::instruction_tcm`].
    ///
    /// # Safety
    /// See [`TcmWindow::new`].
    pub unsafe fn set_instruction_tcm(&mut self, backing: *mut u8) {
        self.instruction_tcm = unsafe { TcmWindow::new(self.config.instruction_tcm, backing) };
    }

    /// Installs `backing` as the data-TCM window's store, using the range/enable flags from this
    /// dispatcher's [`Config::data_tcm`].
    ///
    /// # Safety
    /// See [`TcmWindow::new`].
    pub unsafe fn set_data_tcm(&mut self, backing: *mut u8) {
        self.data_tcm = unsafe { TcmWindow::new(self.config.data_tcm, backing) };
    }

    fn current_key(&self) -> BlockKey {
        let cpsr = self.state.cpsr();
        let mode = cpsr.mode().unwrap_or(CpuMode::Supervisor);
        BlockKey::new(GuestAddr::new(self.state.r_pc), mode, cpsr.thumb())
    }

    /// Assigns (or returns) `key`'s permanent funcref-table slot, growing `emitted` to cover it.
    fn slot_for(&mut self, key: BlockKey) -> FunctionSlot {
        let slot = self.linker.slot_for(key);
        while self.emitted.len() <= slot.0 as usize {
            self.emitted.push(None);
        }
        slot
    }

    /// Runs guest instructions until the accumulated cycle decrement meets or exceeds
    /// `cycle_budget`, then returns the number of cycles actually consumed (spec.md §7 "Run
    /// contract"). Since each block debits its own full length regardless of how much budget
    /// remained when it was entered, the return value may exceed `cycle_budget` by up to one
    /// block's length (spec.md §8 "Cycle accounting").
    pub fn run(&mut self, cycle_budget: u32) -> Result<u32, JitError> {
        let mut remaining = cycle_budget as i32;
        while remaining > 0 {
            let key = self.current_key();
            self.ensure_compiled(key)?;
            remaining = self.enter(key, remaining)?;
        }
        Ok((i64::from(cycle_budget) - i64::from(remaining)) as u32)
    }

    /// Compiles `key`'s block if the cache has nothing for it: translate, optimize each
    /// micro-block to a fixpoint, allocate registers per micro-block, then emit.
    fn ensure_compiled(&mut self, key: BlockKey) -> Result<(), JitError> {
        if self.cache.get(key).is_some() {
            return Ok(());
        }

        let span = tracing::debug_span!("compile_block", addr = key.addr().val(), thumb = key.thumb());
        let _enter = span.enter();

        let mut fetch = MemoryFetch { memory: &mut *self.memory };
        let mut block = Translator::new(&self.config).translate_block(key, &mut fetch)?;
        block
            .check_ssa_and_scope()
            .map_err(|_| JitError::unimplemented(key.addr(), "ssa/scope violation in translated micro-block"))?;

        for micro in &mut block.micro_blocks {
            opt::optimize_micro_block(micro);
        }

        let allocations = block
            .micro_blocks
            .iter()
            .map(|micro| alloc::allocate_micro_block(micro, &self.config))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(target) = block.branch_target.as_mut() {
            target.call_site_slot = self.slot_for(target.key).0;
        }
        let slot = self.slot_for(key);
        block.function = Some(slot);

        let emitted = CodeEmitter::new(&self.config).emit_block(&block, &allocations, &FixedImports)?;
        tracing::debug!(slot = slot.0, length = block.length, "compiled block");

        self.emitted[slot.0 as usize] = Some(emitted);
        self.cache.insert(block, slot);
        self.dirty = true;
        Ok(())
    }

    /// Enters `key`'s compiled block (rebuilding the code buffer first if it's stale), runs until
    /// control falls back out to the dispatcher, and returns the updated remaining cycle count.
    fn enter(&mut self, key: BlockKey, remaining: i32) -> Result<i32, JitError> {
        if self.dirty || self.runtime.is_none() {
            self.rebuild()?;
        }
        let slot = self.linker.existing_slot(key).ok_or_else(|| JitError::InvalidBlockKey(key.addr().val()))?;
        let runtime = self.runtime.as_mut().ok_or_else(|| JitError::InvalidBlockKey(key.addr().val()))?;

        let name = format!("{}{}", abi::BLOCK_EXPORT_PREFIX, slot.0);
        let entry = runtime
            .instance
            .get_typed_func::<(i32, i32, i32), i32>(&mut runtime.store, name.as_str())
            .map_err(|e| JitError::EngineInit(e.to_string()))?;

        let flags_in = self.state.cpsr as i32;
        let result = entry.call(&mut runtime.store, (0, remaining, flags_in)).map_err(|e| JitError::EngineInit(e.to_string()))?;

        let memory = runtime
            .instance
            .get_memory(&mut runtime.store, abi::STATE_MEMORY)
            .ok_or_else(|| JitError::EngineInit("compiled module exports no state memory".to_string()))?;
        let len = state_bytes_mut(&mut self.state).len();
        state_bytes_mut(&mut self.state).copy_from_slice(&memory.data(&runtime.store)[..len]);

        Ok(result)
    }

    /// Re-encodes the whole code buffer (every `emitted` slot, `Some` or `None`) into a fresh
    /// module and instantiates it, seeding the new instance's state memory from `self.state`
    /// (SPEC_FULL.md §C.1/§C.2).
    fn rebuild(&mut self) -> Result<(), JitError> {
        let pages = wasm_pages(emit::state_memory_bytes(self.config.spill_slots));
        let bytes = wasm_module::build_module(&self.emitted, pages);
        let module = Module::new(&self.engine, &bytes).map_err(|e| JitError::WasmEncodeFailure(e.to_string()))?;

        let mut wasm_linker = WasmLinker::new(&self.engine);
        self.register_imports(&mut wasm_linker)?;

        let host_state = HostState {
            memory: &mut *self.memory as *mut dyn Memory,
            coprocessors: &mut self.coprocessors as *mut _,
            page_table: &self.page_table as *const PageTable,
            instruction_tcm: &self.instruction_tcm as *const TcmWindow,
            data_tcm: &self.data_tcm as *const TcmWindow,
            page_table_enabled: self.config.page_table_enabled,
        };
        let mut store = Store::new(&self.engine, host_state);
        let instance = wasm_linker.instantiate(&mut store, &module).map_err(|e| JitError::EngineInit(e.to_string()))?;

        let memory = instance
            .get_memory(&mut store, abi::STATE_MEMORY)
            .ok_or_else(|| JitError::EngineInit("compiled module exports no state memory".to_string()))?;
        let bytes = state_bytes(&self.state);
        memory.data_mut(&mut store)[..bytes.len()].copy_from_slice(bytes);

        self.runtime = Some(Runtime { store, instance });
        self.dirty = false;
        Ok(())
    }

    /// Registers the nine fixed host imports (SPEC_FULL.md §C.1) that every compiled block calls
    /// on its slow paths.
    fn register_imports(&self, wasm_linker: &mut WasmLinker<HostState>) -> Result<(), JitError> {
        let wrap_err = |e: wasmtime::Error| JitError::EngineInit(e.to_string());

        let _ = wasm_linker
            .func_wrap(abi::IMPORT_MODULE, abi::IMPORT_MEM_READ_U8, |caller: Caller<'_, HostState>, addr: i32, bus: i32| -> i32 {
                let addr = addr as u32;
                let bus = mem_bus(bus);
                if let Some(ptr) = unsafe { resolve_fast_path(caller.data(), addr, bus, false) } {
                    return i32::from(unsafe { *ptr });
                }
                let memory = unsafe { &mut *caller.data().memory };
                i32::from(memory.read_byte(addr, bus))
            })
            .map_err(wrap_err)?;
        let _ = wasm_linker
            .func_wrap(abi::IMPORT_MODULE, abi::IMPORT_MEM_READ_U16, |caller: Caller<'_, HostState>, addr: i32, bus: i32| -> i32 {
                let addr = addr as u32;
                let bus = mem_bus(bus);
                if let Some(ptr) = unsafe { resolve_fast_path(caller.data(), addr, bus, false) } {
                    return i32::from(u16::from_le_bytes(unsafe { [*ptr, *ptr.add(1)] }));
                }
                let memory = unsafe { &mut *caller.data().memory };
                i32::from(memory.read_half(addr, bus))
            })
            .map_err(wrap_err)?;
        let _ = wasm_linker
            .func_wrap(abi::IMPORT_MODULE, abi::IMPORT_MEM_READ_U32, |caller: Caller<'_, HostState>, addr: i32, bus: i32| -> i32 {
                let addr = addr as u32;
                let bus = mem_bus(bus);
                if let Some(ptr) = unsafe { resolve_fast_path(caller.data(), addr, bus, false) } {
                    return u32::from_le_bytes(unsafe { [*ptr, *ptr.add(1), *ptr.add(2), *ptr.add(3)] }) as i32;
                }
                let memory = unsafe { &mut *caller.data().memory };
                memory.read_word(addr, bus) as i32
            })
            .map_err(wrap_err)?;
        let _ = wasm_linker
            .func_wrap(
                abi::IMPORT_MODULE,
                abi::IMPORT_MEM_WRITE_U8,
                |caller: Caller<'_, HostState>, addr: i32, bus: i32, value: i32| {
                    let addr = addr as u32;
                    let bus = mem_bus(bus);
                    if let Some(ptr) = unsafe { resolve_fast_path(caller.data(), addr, bus, true) } {
                        unsafe { *ptr = value as u8 };
                        return;
                    }
                    let memory = unsafe { &mut *caller.data().memory };
                    memory.write_byte(addr, value as u8, bus);
                },
            )
            .map_err(wrap_err)?;
        let _ = wasm_linker
            .func_wrap(
                abi::IMPORT_MODULE,
                abi::IMPORT_MEM_WRITE_U16,
                |caller: Caller<'_, HostState>, addr: i32, bus: i32, value: i32| {
                    let addr = addr as u32;
                    let bus = mem_bus(bus);
                    if let Some(ptr) = unsafe { resolve_fast_path(caller.data(), addr, bus, true) } {
                        let bytes = (value as u16).to_le_bytes();
                        unsafe {
                            *ptr = bytes[0];
                            *ptr.add(1) = bytes[1];
                        }
                        return;
                    }
                    let memory = unsafe { &mut *caller.data().memory };
                    memory.write_half(addr, value as u16, bus);
                },
            )
            .map_err(wrap_err)?;
        let _ = wasm_linker
            .func_wrap(
                abi::IMPORT_MODULE,
                abi::IMPORT_MEM_WRITE_U32,
                |caller: Caller<'_, HostState>, addr: i32, bus: i32, value: i32| {
                    let addr = addr as u32;
                    let bus = mem_bus(bus);
                    if let Some(ptr) = unsafe { resolve_fast_path(caller.data(), addr, bus, true) } {
                        let bytes = (value as u32).to_le_bytes();
                        unsafe {
                            for (i, b) in bytes.into_iter().enumerate() {
                                *ptr.add(i) = b;
                            }
                        }
                        return;
                    }
                    let memory = unsafe { &mut *caller.data().memory };
                    memory.write_word(addr, value as u32, bus);
                },
            )
            .map_err(wrap_err)?;
        let _ = wasm_linker
            .func_wrap(
                abi::IMPORT_MODULE,
                abi::IMPORT_MRC,
                |caller: Caller<'_, HostState>, coproc: i32, opcode1: i32, crn: i32, crm: i32, opcode2: i32| -> i32 {
                    let coprocessors = unsafe { &mut *caller.data().coprocessors };
                    coprocessors[coproc as usize].read(opcode1 as u32, crn as u32, crm as u32, opcode2 as u32) as i32
                },
            )
            .map_err(wrap_err)?;
        let _ = wasm_linker
            .func_wrap(
                abi::IMPORT_MODULE,
                abi::IMPORT_MCR,
                |caller: Caller<'_, HostState>, coproc: i32, opcode1: i32, crn: i32, crm: i32, opcode2: i32, value: i32| {
                    let coprocessors = unsafe { &mut *caller.data().coprocessors };
                    coprocessors[coproc as usize].write(opcode1 as u32, crn as u32, crm as u32, opcode2 as u32, value as u32);
                },
            )
            .map_err(wrap_err)?;
        let _ = wasm_linker
            .func_wrap(abi::IMPORT_MODULE, abi::IMPORT_JIT_EXIT, |_caller: Caller<'_, HostState>, remaining: i32| -> i32 {
                tracing::trace!(remaining, "block exit");
                remaining
            })
            .map_err(wrap_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatMemory {
        bytes: Vec<u8>,
    }

    impl Memory for FlatMemory {
        fn read_byte(&mut self, addr: u32, _bus: MemBus) -> u8 {
            self.bytes[addr as usize]
        }
        fn read_half(&mut self, addr: u32, _bus: MemBus) -> u16 {
            u16::from_le_bytes([self.bytes[addr as usize], self.bytes[addr as usize + 1]])
        }
        fn read_word(&mut self, addr: u32, _bus: MemBus) -> u32 {
            let i = addr as usize;
            u32::from_le_bytes([self.bytes[i], self.bytes[i + 1], self.bytes[i + 2], self.bytes[i + 3]])
        }
        fn write_byte(&mut self, addr: u32, value: u8, _bus: MemBus) {
            self.bytes[addr as usize] = value;
        }
        fn write_half(&mut self, addr: u32, value: u16, _bus: MemBus) {
            self.bytes[addr as usize..addr as usize + 2].copy_from_slice(&value.to_le_bytes());
        }
        fn write_word(&mut self, addr: u32, value: u32, _bus: MemBus) {
            self.bytes[addr as usize..addr as usize + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    struct NoopCoprocessor;

    impl Coprocessor for NoopCoprocessor {
        fn read(&mut self, _opcode1: u32, _crn: u32, _crm: u32, _opcode2: u32) -> u32 {
            0
        }
        fn write(&mut self, _opcode1: u32, _crn: u32, _crm: u32, _opcode2: u32, _value: u32) {}
        fn should_write_break_basic_block(&self, _opcode1: u32, _crn: u32, _crm: u32, _opcode2: u32) -> bool {
            false
        }
        fn reset(&mut self) {}
    }

    fn coprocessors() -> [Box<dyn Coprocessor>; 16] {
        std::array::from_fn(|_| Box::new(NoopCoprocessor) as Box<dyn Coprocessor>)
    }

    fn dispatcher(image: Vec<u8>) -> Dispatcher {
        Dispatcher::new(Config::default(), Box::new(FlatMemory { bytes: image }), coprocessors())
    }

    #[test]
    fn slot_for_is_idempotent_and_grows_emitted() {
        let mut cpu = dispatcher(vec![0; 64]);
        let key = BlockKey::new(GuestAddr::new(0x1000), CpuMode::Supervisor, false);
        let a = cpu.slot_for(key);
        let b = cpu.slot_for(key);
        assert_eq!(a, b);
        assert_eq!(cpu.emitted.len(), a.0 as usize + 1);
    }

    #[test]
    fn current_key_tracks_pc_and_thumb_state() {
        let mut cpu = dispatcher(vec![0; 64]);
        cpu.state_mut().r_pc = 0x8000;
        cpu.state_mut().set_cpsr(crate::state::cpsr::Cpsr::new(CpuMode::User.mode_bits() | crate::state::cpsr::CpsrFlags::THUMB.bits()));
        let key = cpu.current_key();
        assert_eq!(key.addr().val(), 0x8000);
        assert!(key.thumb());
        assert_eq!(key.mode(), CpuMode::User);
    }

    #[test]
    fn flush_with_nothing_cached_is_a_no_op() {
        let mut cpu = dispatcher(vec![0; 64]);
        cpu.dirty = false;
        cpu.flush(GuestAddr::new(0), GuestAddr::new(0xFFF));
        assert!(!cpu.dirty);
    }

    /// `MOV R0,#0x5A; MOV R1,#0x20; STR R0,[R1]; MOV R0,#0; LDR R2,[R1]; BX LR`: a real store/load
    /// round-trip through the default (page-table-enabled, no TCM, no pages mapped) config, which
    /// must land in actual guest memory rather than aliasing the guest register file.
    #[test]
    fn memory_fast_path_default_config_falls_through_to_guest_memory() {
        let words: [u32; 6] = [0xE3A0005A, 0xE3A01020, 0xE5810000, 0xE3A00000, 0xE5912000, 0xE12FFF1E];
        let mut image = vec![0u8; 0x40];
        for (i, w) in words.iter().enumerate() {
            image[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        let mut cpu = dispatcher(image);
        cpu.state_mut().set_cpsr(crate::state::cpsr::Cpsr::new(CpuMode::User.mode_bits()));

        cpu.run(16).expect("run should not error");

        assert_eq!(cpu.state().gpr(CpuMode::User, 2), 0x5A);
    }
}
