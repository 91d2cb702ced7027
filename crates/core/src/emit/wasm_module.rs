//! Assembles one wasm module from a set of already-lowered blocks (SPEC_FULL.md §C.1/§C.2).
//!
//! The dispatcher rebuilds the whole module on every recompile rather than patching an existing
//! one: wasm has no incremental-link story, so a fresh [`wasm_encoder::Module`] is the simplest
//! correct design — every currently cached block's [`EmittedBlock`] is re-encoded into one type,
//! import, function, table, export, and code section. The cost of re-encoding already-compiled
//! blocks is accepted in exchange for never having to reason about a partially-linked module.

use wasm_encoder::{
    CodeSection, ConstExpr, ElementSection, Elements, EntityType, ExportKind, ExportSection, Function, FunctionSection,
    ImportSection, MemorySection, MemoryType, Module, RefType, TableSection, TableType, TypeSection, ValType,
};

use crate::emit::abi;
use crate::emit::memory_fastpath::ImportIndex;
use crate::emit::EmittedBlock;

/// Fixed host-import ordering every module uses, so the emitter's `Call(imports.index_of(..))`
/// sites and this module's import section always agree on function indices.
pub struct FixedImports;

impl FixedImports {
    const ORDER: [&'static str; 9] = [
        abi::IMPORT_MEM_READ_U8,
        abi::IMPORT_MEM_READ_U16,
        abi::IMPORT_MEM_READ_U32,
        abi::IMPORT_MEM_WRITE_U8,
        abi::IMPORT_MEM_WRITE_U16,
        abi::IMPORT_MEM_WRITE_U32,
        abi::IMPORT_MRC,
        abi::IMPORT_MCR,
        abi::IMPORT_JIT_EXIT,
    ];
}

impl ImportIndex for FixedImports {
    fn index_of(&self, name: &str) -> u32 {
        Self::ORDER
            .iter()
            .position(|&n| n == name)
            .unwrap_or_else(|| panic!("unknown import: {name}")) as u32
    }
}

/// Builds the wasm bytes for a module with exactly `slots.len()` funcref-table entries: index `i`
/// is compiled block `i`'s own permanent linker slot. A `None` entry (a slot reserved as some
/// other block's `branch_target` but not yet compiled, or evicted and not yet recompiled) is
/// filled with [`trampoline_instructions`] instead of a real body, so a tail `call_indirect` into
/// it safely falls back out to the dispatcher rather than trapping. Every predecessor's
/// `call_indirect` names a slot directly, so once a slot's entry turns `Some` on a later rebuild,
/// every existing predecessor starts tail-linking straight to it with no further patching.
/// `state_memory_pages` sizes the module's own exported state memory (`GuestState` plus the spill
/// area, SPEC_FULL.md §C.1).
pub fn build_module(slots: &[Option<EmittedBlock>], state_memory_pages: u64) -> Vec<u8> {
    let mut module = Module::new();
    let table_size = slots.len() as u32;
    let import_count = FixedImports::ORDER.len() as u32;

    let mut types = TypeSection::new();
    // Type 0: every exported block and every table slot (SPEC_FULL.md §C.2 "BLOCK_FUNC_TYPE_INDEX").
    types.ty().function([ValType::I32, ValType::I32, ValType::I32], [ValType::I32]);
    // Types 1..3: slow-path memory reads, `(addr, bus) -> value`.
    for _ in 0..3 {
        types.ty().function([ValType::I32, ValType::I32], [ValType::I32]);
    }
    // Types 4..6: slow-path memory writes, `(addr, bus, value)`.
    for _ in 0..3 {
        types.ty().function([ValType::I32, ValType::I32, ValType::I32], []);
    }
    // Type 7: coprocessor read, `(coproc, opcode1, crn, crm, opcode2) -> value`.
    types.ty().function([ValType::I32; 5], [ValType::I32]);
    // Type 8: coprocessor write, `(coproc, opcode1, crn, crm, opcode2, value)`.
    types.ty().function([ValType::I32; 6], []);
    // Type 9: `jit_exit`, `(remaining_cycles) -> remaining_cycles`.
    types.ty().function([ValType::I32], [ValType::I32]);
    module.section(&types);

    let mut imports = ImportSection::new();
    let import_types = [1u32, 1, 1, 2, 2, 2, 3, 4, 5];
    for (name, ty) in FixedImports::ORDER.iter().zip(import_types) {
        imports.import(abi::IMPORT_MODULE, name, EntityType::Function(ty));
    }
    module.section(&imports);

    let mut functions = FunctionSection::new();
    for _ in slots {
        functions.function(abi::BLOCK_FUNC_TYPE_INDEX);
    }
    module.section(&functions);

    let mut memories = MemorySection::new();
    memories.memory(MemoryType { minimum: state_memory_pages.max(1), maximum: None, memory64: false, shared: false, page_size_log2: None });
    module.section(&memories);

    let mut tables = TableSection::new();
    tables.table(TableType { element_type: RefType::FUNCREF, minimum: table_size as u64, maximum: Some(table_size as u64), table64: false, shared: false });
    module.section(&tables);

    let mut elements = ElementSection::new();
    if table_size > 0 {
        let func_indices: Vec<u32> = (0..table_size).map(|i| import_count + i).collect();
        elements.active(None, &ConstExpr::i32_const(0), Elements::Functions(func_indices.into()));
    }
    module.section(&elements);

    let mut exports = ExportSection::new();
    exports.export(abi::STATE_MEMORY, ExportKind::Memory, 0);
    exports.export(abi::LINK_TABLE, ExportKind::Table, 0);
    for (i, slot) in slots.iter().enumerate() {
        if slot.is_some() {
            let name = format!("{}{}", abi::BLOCK_EXPORT_PREFIX, i);
            exports.export(&name, ExportKind::Func, import_count + i as u32);
        }
    }
    module.section(&exports);

    let mut code = CodeSection::new();
    for slot in slots {
        match slot {
            Some(emitted) => {
                let mut func = Function::new_with_locals_types(emitted.extra_locals.iter().copied());
                for instr in &emitted.instructions {
                    func.instruction(instr);
                }
                func.instruction(&wasm_encoder::Instruction::End);
                code.function(&func);
            }
            None => {
                let mut func = Function::new_with_locals_types([]);
                for instr in trampoline_instructions() {
                    func.instruction(&instr);
                }
                func.instruction(&wasm_encoder::Instruction::End);
                code.function(&func);
            }
        }
    }
    module.section(&code);

    module.finish()
}

/// A one-instruction function body returning its argument unchanged: the `jit_exit`-style shape
/// used to fill an as-yet-unlinked table slot, so an early `call_indirect` into a not-yet-compiled
/// successor falls straight back out to the dispatcher instead of trapping. Exported so the
/// dispatcher can reuse it as the trampoline occupying every fresh slot before linking.
pub fn trampoline_instructions() -> Vec<wasm_encoder::Instruction<'static>> {
    use wasm_encoder::Instruction;
    vec![
        Instruction::LocalGet(1), // cycle counter argument
        Instruction::Call(FixedImports.index_of(abi::IMPORT_JIT_EXIT)),
        Instruction::Return,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_import_order_matches_abi_constants() {
        let imports = FixedImports;
        assert_eq!(imports.index_of(abi::IMPORT_MEM_READ_U8), 0);
        assert_eq!(imports.index_of(abi::IMPORT_JIT_EXIT), 8);
    }

    #[test]
    fn empty_module_still_encodes() {
        let bytes = build_module(&[], 1);
        assert!(bytes.starts_with(b"\0asm"));
    }

    #[test]
    fn unfilled_slot_gets_a_trampoline_body_not_an_export() {
        let bytes = build_module(&[None], 1);
        assert!(bytes.starts_with(b"\0asm"));
    }
}
