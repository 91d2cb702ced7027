//! Memory fast-path lowering (spec.md §4.7 "Memory fast path", "Alignment / rotation").
//!
//! Every guest memory access tries, in order: the instruction-TCM window (code/data buses), the
//! data-TCM window (data bus only), the page table, and finally the host `Memory` trait. Generated
//! code's role in that tiering is limited to alignment and rotation: the tiers themselves are walked
//! on the host side, inside the import the generated code calls, rather than as nested `if`s in the
//! emitted wasm. The two are not interchangeable here. The page table and TCM windows name plain
//! host pointers (`PageTable`/`TcmWindow`, `crate::memory`) for a backend whose generated code can
//! dereference an arbitrary host address directly; this backend's generated code is wasm, which can
//! only address bytes inside one of its own declared linear memories, never an arbitrary host
//! pointer. So every access lowers to exactly one call across the host boundary, and the host-side
//! import implementation (`dispatch::register_imports`) is what actually consults the page table and
//! TCM windows before falling back to `Memory`.

use wasm_encoder::Instruction;

use crate::emit::abi;
use crate::ir::opcode::{MemBus, MemFlags};

/// Which width/slow-path import pair an access uses.
#[derive(Clone, Copy)]
pub enum Width {
    /// 8-bit access.
    Byte,
    /// 16-bit access.
    Half,
    /// 32-bit access.
    Word,
}

impl Width {
    fn align_mask(self) -> i32 {
        match self {
            Width::Byte => 0,
            Width::Half => !0i32 << 1,
            Width::Word => !0i32 << 2,
        }
    }

    fn read_import(self) -> &'static str {
        match self {
            Width::Byte => abi::IMPORT_MEM_READ_U8,
            Width::Half => abi::IMPORT_MEM_READ_U16,
            Width::Word => abi::IMPORT_MEM_READ_U32,
        }
    }

    fn write_import(self) -> &'static str {
        match self {
            Width::Byte => abi::IMPORT_MEM_WRITE_U8,
            Width::Half => abi::IMPORT_MEM_WRITE_U16,
            Width::Word => abi::IMPORT_MEM_WRITE_U32,
        }
    }
}

/// Host function indices the emitter resolved for each slow-path import, keyed by name.
pub trait ImportIndex {
    /// Resolves an imported function's index by name.
    fn index_of(&self, name: &str) -> u32;
}

/// Lowers a guest load, leaving the (possibly rotated/sign-extended) 32-bit result in
/// `scratch_local`. `addr_local` holds the raw guest address and is left untouched; `scratch_local`
/// is used as working storage throughout (aligned address, then loaded word, then rotated word).
pub fn lower_read(
    out: &mut Vec<Instruction<'static>>,
    imports: &dyn ImportIndex,
    width: Width,
    bus: MemBus,
    flags: MemFlags,
    addr_local: u32,
    scratch_local: u32,
    shift_local: u32,
) {
    // Force natural alignment before the call (spec.md §4.7 "Alignment / rotation"); the TCM/page
    // table tiering happens host-side inside the import itself (see module doc).
    out.push(Instruction::LocalGet(addr_local));
    out.push(Instruction::I32Const(width.align_mask()));
    out.push(Instruction::I32And);
    out.push(Instruction::LocalSet(scratch_local));

    out.push(Instruction::LocalGet(scratch_local));
    out.push(Instruction::I32Const(bus as i32));
    out.push(Instruction::Call(imports.index_of(width.read_import())));
    out.push(Instruction::LocalSet(scratch_local));

    // The import always returns a zero-extended value; sign-extend here if the access asked for
    // one (no dedicated load-and-sign-extend instruction exists once the load itself is a call).
    if flags.contains(MemFlags::SIGNED) {
        sign_extend(out, width, scratch_local);
    }

    if flags.contains(MemFlags::ROTATE) {
        apply_rotation(out, width, addr_local, scratch_local, shift_local);
    }
}

/// Lowers a guest store. `addr_local`/`value_local` hold the raw guest address and value.
pub fn lower_write(
    out: &mut Vec<Instruction<'static>>,
    imports: &dyn ImportIndex,
    width: Width,
    bus: MemBus,
    addr_local: u32,
    value_local: u32,
    scratch_local: u32,
) {
    out.push(Instruction::LocalGet(addr_local));
    out.push(Instruction::I32Const(width.align_mask()));
    out.push(Instruction::I32And);
    out.push(Instruction::LocalSet(scratch_local));

    out.push(Instruction::LocalGet(scratch_local));
    out.push(Instruction::I32Const(bus as i32));
    out.push(Instruction::LocalGet(value_local));
    out.push(Instruction::Call(imports.index_of(width.write_import())));
}

/// Sign-extends the low `width` bytes of `value_local` to a full 32-bit value, using shifts rather
/// than a dedicated sign-extend instruction (not assumed available).
fn sign_extend(out: &mut Vec<Instruction<'static>>, width: Width, value_local: u32) {
    let bits = match width {
        Width::Byte => 24,
        Width::Half => 16,
        Width::Word => return,
    };
    out.push(Instruction::LocalGet(value_local));
    out.push(Instruction::I32Const(bits));
    out.push(Instruction::I32Shl);
    out.push(Instruction::I32Const(bits));
    out.push(Instruction::I32ShrS);
    out.push(Instruction::LocalSet(value_local));
}

/// Rotates a misaligned word/halfword load right by `(addr & mask) * 8` (spec.md §4.7). The
/// `ARMv4T` + `Signed` + `Half` combination instead degrades to a signed-byte load, handled by the
/// caller before rotation is reached (an `ARMV4T`-flagged signed halfword never sets `ROTATE`).
/// `shift_local` is used as working storage for the rotate distance; `addr_local` is left intact.
fn apply_rotation(out: &mut Vec<Instruction<'static>>, width: Width, addr_local: u32, value_local: u32, shift_local: u32) {
    let mask = match width {
        Width::Word => 3,
        Width::Half => 1,
        Width::Byte => 0,
    };
    if mask == 0 {
        return;
    }
    // shift = (addr & mask) * 8
    out.push(Instruction::LocalGet(addr_local));
    out.push(Instruction::I32Const(mask));
    out.push(Instruction::I32And);
    out.push(Instruction::I32Const(3));
    out.push(Instruction::I32Shl);
    out.push(Instruction::LocalSet(shift_local));
    // rotate_right(value, shift) = (value >> shift) | (value << ((32 - shift) & 31))
    out.push(Instruction::LocalGet(value_local));
    out.push(Instruction::LocalGet(shift_local));
    out.push(Instruction::I32ShrU);
    out.push(Instruction::LocalGet(value_local));
    out.push(Instruction::I32Const(32));
    out.push(Instruction::LocalGet(shift_local));
    out.push(Instruction::I32Sub);
    out.push(Instruction::I32Const(31));
    out.push(Instruction::I32And);
    out.push(Instruction::I32Shl);
    out.push(Instruction::I32Or);
    out.push(Instruction::LocalSet(value_local));
}
