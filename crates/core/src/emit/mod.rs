//! Code Emitter (spec.md §4.7): lowers one basic block's allocated IR to a wasm function body.
//!
//! Each micro-block's guard is checked as a native `if`; each opcode is lowered switch-on-variant
//! using the register/spill decisions [`crate::alloc::allocate`] already made. The block's exit
//! (cycle accounting, inter-block linking) is appended whenever a [`Flush`]/[`FlushExchange`] is
//! encountered, and once more at the end of the block as a fallback for a block that fell off the
//! end of its micro-blocks without an explicit flush.
//!
//! [`Flush`]: crate::ir::opcode::Flush
//! [`FlushExchange`]: crate::ir::opcode::FlushExchange

/// Host/wasm ABI constants (SPEC_FULL.md §C.1).
pub mod abi;
/// Condition-code guard lowering.
pub mod condition;
/// Flag-shadow lowering (spec.md §4.7 "Flag propagation").
pub mod flags;
/// Memory fast-path lowering (spec.md §4.7 "Memory fast path").
pub mod memory_fastpath;
/// Assembles a set of emitted blocks into one wasm module (SPEC_FULL.md §C.1/§C.2).
pub mod wasm_module;

use wasm_encoder::{BlockType, Instruction, MemArg, ValType};

use crate::alloc::{Allocation, HostReg, OpcodeAlloc, PreAction, SpillSlot};
use crate::common::error::JitError;
use crate::config::Config;
use crate::emit::memory_fastpath::{ImportIndex, Width};
use crate::ir::block::BasicBlock;
use crate::ir::opcode::{AluKind, MemFlags, Opcode, ShiftKind};
use crate::ir::value::{AnyRef, VarId};
use crate::state::cpsr::CpsrFlags;
use crate::state::mode::CpuMode;
use crate::state::registers::{self, GuestState};

/// A lowered block body plus the local declarations it needs beyond the three fixed ones
/// (`LOCAL_STATE_PTR`/`LOCAL_CYCLE_COUNTER`/`LOCAL_FLAG_SHADOW`).
pub struct EmittedBlock {
    /// The wasm instruction sequence, ending in an explicit `return` on every path.
    pub instructions: Vec<Instruction<'static>>,
    /// Local types starting at [`abi::LOCAL_FIRST_SCRATCH`], in declaration order.
    pub extra_locals: Vec<ValType>,
}

/// Byte offset of a spill slot, relative to the state pointer. The spill area is laid out
/// immediately after [`GuestState`] in the same backing buffer, so spilled variables address
/// through the same `StatePointer` local as everything else (spec.md §4.6: "a fixed number of
/// 32-bit slots ... on the dispatcher's stack").
pub(crate) fn spill_offset(slot: SpillSlot) -> u64 {
    std::mem::size_of::<GuestState>() as u64 + slot.0 as u64 * 4
}

/// Total byte size the state memory must cover: [`GuestState`] plus `spill_slots` 32-bit slots.
pub fn state_memory_bytes(spill_slots: usize) -> u64 {
    std::mem::size_of::<GuestState>() as u64 + spill_slots as u64 * 4
}

struct LocalPlan {
    host_registers: u32,
    shift: u32,
    mem_scratch: u32,
    mem_addr: u32,
    cond_cpsr: u32,
    wide_sum: u32,
}

impl LocalPlan {
    fn new(host_registers: usize) -> Self {
        let base = abi::LOCAL_FIRST_SCRATCH + host_registers as u32;
        Self {
            host_registers: host_registers as u32,
            shift: base,
            mem_scratch: base + 1,
            mem_addr: base + 2,
            cond_cpsr: base + 3,
            wide_sum: base + 4,
        }
    }

    fn reg_local(&self, reg: HostReg) -> u32 {
        abi::LOCAL_FIRST_SCRATCH + reg.0
    }

    fn types(&self) -> Vec<ValType> {
        let mut out = vec![ValType::I32; self.host_registers as usize + 4];
        out.push(ValType::I64);
        out
    }
}

/// Where `emit_add`'s carry-in bit comes from.
#[derive(Clone, Copy, PartialEq, Eq)]
enum CarryIn {
    /// `Add`: no carry-in.
    Zero,
    /// `Sub`/`Rsb`: ARM's carry-as-not-borrow convention always carries in 1.
    One,
    /// `Adc`/`Sbc`/`Rsc`: carry-in is whatever the host-flag shadow's C bit currently holds.
    Flag,
}

/// Lowers basic blocks to wasm, given a fixed host register / spill slot budget.
pub struct CodeEmitter<'a> {
    config: &'a Config,
    locals: LocalPlan,
}

impl<'a> CodeEmitter<'a> {
    /// Builds an emitter for `config`'s allocator budget.
    pub fn new(config: &'a Config) -> Self {
        Self { config, locals: LocalPlan::new(config.host_registers) }
    }

    /// Lowers `block`, whose micro-blocks have already been allocated (one [`Allocation`] per
    /// micro-block, in order).
    pub fn emit_block(
        &self,
        block: &BasicBlock,
        allocations: &[Allocation],
        imports: &dyn ImportIndex,
    ) -> Result<EmittedBlock, JitError> {
        let mut out = Vec::new();
        let mut flushed = false;

        for (micro, allocation) in block.micro_blocks.iter().zip(allocations) {
            let guarded = !matches!(micro.condition, crate::isa::condition::Condition::Al);
            if guarded {
                self.load_cpsr(&mut out, self.locals.cond_cpsr);
                out.extend(condition::lower(micro.condition, self.locals.cond_cpsr));
                out.push(Instruction::If(BlockType::Empty));
            }

            for (op, alloc) in micro.program.iter().zip(&allocation.per_opcode) {
                for pre in &alloc.pre_actions {
                    self.emit_pre_action(&mut out, pre);
                }
                if matches!(op, Opcode::Flush(_) | Opcode::FlushExchange(_)) {
                    self.emit_opcode(&mut out, op, alloc, imports)?;
                    self.emit_block_exit(&mut out, block, imports);
                    // An exit inside a guarded (conditional) micro-block only fires when the guard
                    // is true; the function can still fall through its `End` when it's false, so
                    // only an unconditional exit lets the trailing fallback below be skipped.
                    flushed |= !guarded;
                } else {
                    self.emit_opcode(&mut out, op, alloc, imports)?;
                }
            }

            if guarded {
                out.push(Instruction::End);
            }
        }

        if !flushed {
            self.emit_block_exit(&mut out, block, imports);
        }

        Ok(EmittedBlock { instructions: out, extra_locals: self.locals.types() })
    }

    fn emit_pre_action(&self, out: &mut Vec<Instruction<'static>>, action: &PreAction) {
        match *action {
            PreAction::SpillStore { reg, slot, .. } => {
                out.push(Instruction::LocalGet(abi::LOCAL_STATE_PTR));
                out.push(Instruction::LocalGet(self.locals.reg_local(reg)));
                out.push(Instruction::I32Store(MemArg { offset: spill_offset(slot), align: 2, memory_index: 0 }));
            }
            PreAction::Reload { reg, slot, .. } => {
                out.push(Instruction::LocalGet(abi::LOCAL_STATE_PTR));
                out.push(Instruction::I32Load(MemArg { offset: spill_offset(slot), align: 2, memory_index: 0 }));
                out.push(Instruction::LocalSet(self.locals.reg_local(reg)));
            }
        }
    }

    fn load_cpsr(&self, out: &mut Vec<Instruction<'static>>, dst_local: u32) {
        out.push(Instruction::LocalGet(abi::LOCAL_STATE_PTR));
        out.push(Instruction::I32Load(MemArg { offset: registers::cpsr_offset() as u64, align: 2, memory_index: 0 }));
        out.push(Instruction::LocalSet(dst_local));
    }

    fn operand(&self, alloc: &OpcodeAlloc, operand: AnyRef) -> Instruction<'static> {
        match operand {
            AnyRef::Null => panic!("Null operand lowered; caller must guard unary/absent operands"),
            AnyRef::Constant(c) => Instruction::I32Const(c.value as i32),
            AnyRef::Variable(id) => Instruction::LocalGet(self.read_local(alloc, id)),
        }
    }

    fn read_local(&self, alloc: &OpcodeAlloc, var: VarId) -> u32 {
        let reg = alloc
            .reads
            .iter()
            .find(|(v, _)| *v == var)
            .map(|(_, r)| *r)
            .expect("read operand must have an allocated register");
        self.locals.reg_local(reg)
    }

    fn write_local(&self, alloc: &OpcodeAlloc, var: VarId) -> u32 {
        let reg = alloc
            .writes
            .iter()
            .find(|(v, _, _)| *v == var)
            .map(|(_, r, _)| *r)
            .expect("write operand must have an allocated register");
        self.locals.reg_local(reg)
    }

    fn emit_opcode(
        &self,
        out: &mut Vec<Instruction<'static>>,
        op: &Opcode,
        alloc: &OpcodeAlloc,
        imports: &dyn ImportIndex,
    ) -> Result<(), JitError> {
        match op {
            Opcode::LoadGpr(o) => {
                out.push(Instruction::LocalGet(abi::LOCAL_STATE_PTR));
                out.push(Instruction::I32Load(gpr_memarg(o.mode, o.reg)));
                out.push(Instruction::LocalSet(self.write_local(alloc, o.dst.id)));
            }
            Opcode::StoreGpr(o) => {
                out.push(Instruction::LocalGet(abi::LOCAL_STATE_PTR));
                out.push(self.operand(alloc, o.value));
                out.push(Instruction::I32Store(gpr_memarg(o.mode, o.reg)));
            }
            Opcode::LoadSpsr(o) => {
                let offset = registers::spsr_offset(o.mode).unwrap_or_else(registers::cpsr_offset);
                out.push(Instruction::LocalGet(abi::LOCAL_STATE_PTR));
                out.push(Instruction::I32Load(MemArg { offset: offset as u64, align: 2, memory_index: 0 }));
                out.push(Instruction::LocalSet(self.write_local(alloc, o.dst.id)));
            }
            Opcode::StoreSpsr(o) => {
                // User/System have no SPSR bank; the write is simply discarded, matching
                // `GuestState::set_spsr`.
                if let Some(offset) = registers::spsr_offset(o.mode) {
                    out.push(Instruction::LocalGet(abi::LOCAL_STATE_PTR));
                    out.push(self.operand(alloc, o.value));
                    out.push(Instruction::I32Store(MemArg { offset: offset as u64, align: 2, memory_index: 0 }));
                }
            }
            Opcode::LoadCpsr(o) => {
                out.push(Instruction::LocalGet(abi::LOCAL_STATE_PTR));
                out.push(Instruction::I32Load(MemArg { offset: registers::cpsr_offset() as u64, align: 2, memory_index: 0 }));
                out.push(Instruction::LocalSet(self.write_local(alloc, o.dst.id)));
            }
            Opcode::StoreCpsr(o) => {
                out.push(Instruction::LocalGet(abi::LOCAL_STATE_PTR));
                out.push(self.operand(alloc, o.value));
                out.push(Instruction::I32Store(MemArg { offset: registers::cpsr_offset() as u64, align: 2, memory_index: 0 }));
            }
            Opcode::ClearCarry => self.mask_shadow(out, !(CpsrFlags::C.bits() as i32), 0),
            Opcode::SetCarry => self.mask_shadow(out, !0, CpsrFlags::C.bits() as i32),
            Opcode::UpdateFlags(o) => {
                let cpsr_in_local = self.read_local(alloc, o.cpsr_in.0);
                let dst_local = self.write_local(alloc, o.dst.id);
                out.extend(flags::lower_update_flags(dst_local, cpsr_in_local, abi::LOCAL_FLAG_SHADOW, o.mask));
            }
            Opcode::UpdateSticky(o) => {
                let cpsr_in_local = self.read_local(alloc, o.cpsr_in.0);
                let dst_local = self.write_local(alloc, o.dst.id);
                out.extend(flags::lower_update_sticky(dst_local, cpsr_in_local, abi::LOCAL_FLAG_SHADOW));
            }
            Opcode::Shift(o) => self.emit_shift(out, o, alloc),
            Opcode::Alu(o) => self.emit_alu(out, o, alloc),
            Opcode::Mul(o) => self.emit_mul(out, o, alloc),
            Opcode::Add64(o) => self.emit_add64(out, o, alloc),
            Opcode::MemoryRead(o) => self.emit_memory_read(out, o, alloc, imports),
            Opcode::MemoryWrite(o) => self.emit_memory_write(out, o, alloc, imports),
            Opcode::Flush(o) => {
                out.push(Instruction::LocalGet(abi::LOCAL_STATE_PTR));
                out.push(self.operand(alloc, o.target));
                out.push(Instruction::I32Store(gpr_memarg(CpuMode::User, 15)));
            }
            Opcode::FlushExchange(o) => self.emit_flush_exchange(out, o, alloc),
            Opcode::Mrc(o) => {
                out.push(Instruction::I32Const(o.coproc as i32));
                out.push(Instruction::I32Const(o.opcode1 as i32));
                out.push(Instruction::I32Const(o.crn as i32));
                out.push(Instruction::I32Const(o.crm as i32));
                out.push(Instruction::I32Const(o.opcode2 as i32));
                out.push(Instruction::Call(imports.index_of(abi::IMPORT_MRC)));
                out.push(Instruction::LocalSet(self.write_local(alloc, o.dst.id)));
            }
            Opcode::Mcr(o) => {
                out.push(Instruction::I32Const(o.coproc as i32));
                out.push(Instruction::I32Const(o.opcode1 as i32));
                out.push(Instruction::I32Const(o.crn as i32));
                out.push(Instruction::I32Const(o.crm as i32));
                out.push(Instruction::I32Const(o.opcode2 as i32));
                out.push(self.operand(alloc, o.value));
                out.push(Instruction::Call(imports.index_of(abi::IMPORT_MCR)));
            }
            Opcode::Nop => {}
        }
        Ok(())
    }

    fn mask_shadow(&self, out: &mut Vec<Instruction<'static>>, and_mask: i32, or_bits: i32) {
        out.push(Instruction::LocalGet(abi::LOCAL_FLAG_SHADOW));
        out.push(Instruction::I32Const(and_mask));
        out.push(Instruction::I32And);
        if or_bits != 0 {
            out.push(Instruction::I32Const(or_bits));
            out.push(Instruction::I32Or);
        }
        out.push(Instruction::LocalSet(abi::LOCAL_FLAG_SHADOW));
    }

    fn emit_shift(&self, out: &mut Vec<Instruction<'static>>, o: &crate::ir::opcode::Shift, alloc: &OpcodeAlloc) {
        let dst_local = self.write_local(alloc, o.dst.id);
        out.push(self.operand(alloc, o.input));
        out.push(self.operand(alloc, o.amount));
        out.push(match o.kind {
            ShiftKind::Lsl => Instruction::I32Shl,
            ShiftKind::Lsr => Instruction::I32ShrU,
            ShiftKind::Asr => Instruction::I32ShrS,
            ShiftKind::Ror => Instruction::I32Rotr,
        });
        out.push(Instruction::LocalSet(dst_local));

        if o.update_host_flags {
            // Barrel-shifter carry-out (the translator is responsible for materializing ARM's
            // shift-amount-0 "no flag update" and shift-amount->=32 degenerate cases before this
            // opcode is reached, so `amount` here is always in 1..=32).
            let carry_expr = match o.kind {
                ShiftKind::Lsl => vec![
                    self.operand(alloc, o.input),
                    Instruction::I32Const(32),
                    self.operand(alloc, o.amount),
                    Instruction::I32Sub,
                    Instruction::I32ShrU,
                    Instruction::I32Const(1),
                    Instruction::I32And,
                ],
                ShiftKind::Lsr | ShiftKind::Asr => vec![
                    self.operand(alloc, o.input),
                    self.operand(alloc, o.amount),
                    Instruction::I32Const(1),
                    Instruction::I32Sub,
                    Instruction::I32ShrU,
                    Instruction::I32Const(1),
                    Instruction::I32And,
                ],
                ShiftKind::Ror => vec![
                    Instruction::LocalGet(dst_local),
                    Instruction::I32Const(i32::MIN),
                    Instruction::I32And,
                    Instruction::I32Const(31),
                    Instruction::I32ShrU,
                ],
            };
            out.extend(flags::set_carry(abi::LOCAL_FLAG_SHADOW, carry_expr));
        }
    }

    fn emit_alu(&self, out: &mut Vec<Instruction<'static>>, o: &crate::ir::opcode::Alu, alloc: &OpcodeAlloc) {
        let dst_local = self.write_local(alloc, o.dst.id);
        match o.kind {
            AluKind::And | AluKind::Orr | AluKind::Eor => {
                out.push(self.operand(alloc, o.lhs));
                out.push(self.operand(alloc, o.rhs));
                out.push(match o.kind {
                    AluKind::And => Instruction::I32And,
                    AluKind::Orr => Instruction::I32Or,
                    AluKind::Eor => Instruction::I32Xor,
                    _ => unreachable!(),
                });
                out.push(Instruction::LocalSet(dst_local));
                if o.update_host_flags {
                    out.extend(flags::set_nz(abi::LOCAL_FLAG_SHADOW, dst_local));
                }
            }
            AluKind::Bic => {
                out.push(self.operand(alloc, o.lhs));
                out.push(self.operand(alloc, o.rhs));
                out.push(Instruction::I32Const(-1));
                out.push(Instruction::I32Xor);
                out.push(Instruction::I32And);
                out.push(Instruction::LocalSet(dst_local));
                if o.update_host_flags {
                    out.extend(flags::set_nz(abi::LOCAL_FLAG_SHADOW, dst_local));
                }
            }
            AluKind::Mov => {
                out.push(self.operand(alloc, o.lhs));
                out.push(Instruction::LocalSet(dst_local));
                if o.update_host_flags {
                    out.extend(flags::set_nz(abi::LOCAL_FLAG_SHADOW, dst_local));
                }
            }
            AluKind::Mvn => {
                out.push(self.operand(alloc, o.lhs));
                out.push(Instruction::I32Const(-1));
                out.push(Instruction::I32Xor);
                out.push(Instruction::LocalSet(dst_local));
                if o.update_host_flags {
                    out.extend(flags::set_nz(abi::LOCAL_FLAG_SHADOW, dst_local));
                }
            }
            AluKind::Clz => {
                out.push(self.operand(alloc, o.lhs));
                out.push(Instruction::I32Clz);
                out.push(Instruction::LocalSet(dst_local));
            }
            AluKind::Add => self.emit_add(out, o, alloc, dst_local, CarryIn::Zero, false),
            AluKind::Adc => self.emit_add(out, o, alloc, dst_local, CarryIn::Flag, false),
            AluKind::Sub => self.emit_add(out, o, alloc, dst_local, CarryIn::One, true),
            AluKind::Sbc => self.emit_add(out, o, alloc, dst_local, CarryIn::Flag, true),
            AluKind::Rsb | AluKind::Rsc => {
                // Reverse subtract: `rhs - lhs`. Swap operands onto the same add-with-borrow path.
                let swapped = crate::ir::opcode::Alu { lhs: o.rhs, rhs: o.lhs, ..o.clone() };
                let carry_in = if o.kind == AluKind::Rsc { CarryIn::Flag } else { CarryIn::One };
                self.emit_add(out, &swapped, alloc, dst_local, carry_in, true)
            }
            AluKind::Qadd => self.emit_saturating(out, alloc, o.lhs, o.rhs, dst_local, false),
            AluKind::Qsub => self.emit_saturating(out, alloc, o.lhs, o.rhs, dst_local, true),
            AluKind::Qdadd => {
                let doubled = self.saturating_double(out, alloc, o.rhs);
                self.emit_saturating_with(out, self.operand(alloc, o.lhs), doubled, dst_local, false);
            }
            AluKind::Qdsub => {
                let doubled = self.saturating_double(out, alloc, o.rhs);
                self.emit_saturating_with(out, self.operand(alloc, o.lhs), doubled, dst_local, true);
            }
        }
    }

    /// Lowers `Add`/`Sub`/`Adc`/`Sbc` (and, via the caller swapping operands, `Rsb`/`Rsc`):
    /// `dst = lhs +/- rhs + carry_in`, with carry-out and signed-overflow computed from the
    /// wrapped 32-bit sum per the standard two's-complement formulas.
    ///
    /// ARM's carry-as-not-borrow convention means a plain `Sub`/`Rsb` behaves as an add of the
    /// bitwise-inverted right operand with a constant carry-in of 1 — it never reads the live
    /// flag shadow, unlike `Sbc`/`Rsc`/`Adc` which fold in whatever the previous instruction left
    /// in `C`. `CarryIn` makes that distinction explicit instead of conflating "is a subtract"
    /// with "reads the carry flag".
    fn emit_add(
        &self,
        out: &mut Vec<Instruction<'static>>,
        o: &crate::ir::opcode::Alu,
        alloc: &OpcodeAlloc,
        dst_local: u32,
        carry_in: CarryIn,
        subtract: bool,
    ) {
        let lhs = self.operand(alloc, o.lhs);
        let rhs_raw = self.operand(alloc, o.rhs);
        out.push(lhs.clone());
        if subtract {
            out.push(rhs_raw.clone());
            out.push(Instruction::I32Const(-1));
            out.push(Instruction::I32Xor);
        } else {
            out.push(rhs_raw.clone());
        }
        out.push(Instruction::I32Add);
        match carry_in {
            CarryIn::Zero => {}
            CarryIn::One => {
                out.push(Instruction::I32Const(1));
                out.push(Instruction::I32Add);
            }
            CarryIn::Flag => {
                out.push(Instruction::LocalGet(abi::LOCAL_FLAG_SHADOW));
                out.push(Instruction::I32Const(CpsrFlags::C.bits() as i32));
                out.push(Instruction::I32And);
                out.push(Instruction::I32Const(CpsrFlags::C.bits().trailing_zeros() as i32));
                out.push(Instruction::I32ShrU);
                out.push(Instruction::I32Add);
            }
        }
        out.push(Instruction::LocalSet(dst_local));

        if o.update_host_flags {
            out.extend(flags::set_nz(abi::LOCAL_FLAG_SHADOW, dst_local));
            let rhs_effective = if subtract {
                vec![rhs_raw.clone(), Instruction::I32Const(-1), Instruction::I32Xor]
            } else {
                vec![rhs_raw.clone()]
            };
            let mut carry_expr = vec![Instruction::LocalGet(dst_local), lhs.clone()];
            carry_expr.push(Instruction::I32LtU);
            out.extend(flags::set_carry(abi::LOCAL_FLAG_SHADOW, carry_expr));

            let mut overflow_expr = vec![lhs];
            overflow_expr.extend(vec![Instruction::LocalGet(dst_local), Instruction::I32Xor]);
            overflow_expr.extend(rhs_effective);
            overflow_expr.push(Instruction::LocalGet(dst_local));
            overflow_expr.push(Instruction::I32Xor);
            overflow_expr.push(Instruction::I32And);
            overflow_expr.push(Instruction::I32Const(31));
            overflow_expr.push(Instruction::I32ShrU);
            out.extend(flags::set_overflow(abi::LOCAL_FLAG_SHADOW, overflow_expr));
        }
    }

    /// Saturates `lhs op rhs` (`op` = add or subtract per `is_sub`) to the signed 32-bit range via
    /// widening `i64` arithmetic, which sidesteps needing a dedicated overflow-check formula: the
    /// 64-bit intermediate can never itself overflow for two 32-bit operands.
    fn emit_saturating(&self, out: &mut Vec<Instruction<'static>>, alloc: &OpcodeAlloc, lhs: AnyRef, rhs: AnyRef, dst_local: u32, is_sub: bool) {
        let lhs_expr = self.operand(alloc, lhs);
        let rhs_expr = self.operand(alloc, rhs);
        self.emit_saturating_with(out, lhs_expr, rhs_expr, dst_local, is_sub)
    }

    fn emit_saturating_with(&self, out: &mut Vec<Instruction<'static>>, lhs_expr: Instruction<'static>, rhs_expr: Instruction<'static>, dst_local: u32, is_sub: bool) {
        out.push(lhs_expr);
        out.push(Instruction::I64ExtendI32S);
        out.push(rhs_expr);
        out.push(Instruction::I64ExtendI32S);
        out.push(if is_sub { Instruction::I64Sub } else { Instruction::I64Add });
        out.push(Instruction::LocalSet(self.locals.wide_sum));

        // clamp to [i32::MIN, i32::MAX], sticky-flagging whichever side overflowed.
        out.push(Instruction::LocalGet(self.locals.wide_sum));
        out.push(Instruction::I64Const(i32::MAX as i64));
        out.push(Instruction::I64GtS);
        out.push(Instruction::If(BlockType::Result(ValType::I32)));
        out.push(Instruction::I32Const(i32::MAX));
        out.push(Instruction::Else);
        out.push(Instruction::LocalGet(self.locals.wide_sum));
        out.push(Instruction::I64Const(i32::MIN as i64));
        out.push(Instruction::I64LtS);
        out.push(Instruction::If(BlockType::Result(ValType::I32)));
        out.push(Instruction::I32Const(i32::MIN));
        out.push(Instruction::Else);
        out.push(Instruction::LocalGet(self.locals.wide_sum));
        out.push(Instruction::I32WrapI64);
        out.push(Instruction::End);
        out.push(Instruction::End);
        out.push(Instruction::LocalSet(dst_local));

        let sticky_expr = vec![
            Instruction::LocalGet(self.locals.wide_sum),
            Instruction::I64Const(i32::MAX as i64),
            Instruction::I64GtS,
            Instruction::LocalGet(self.locals.wide_sum),
            Instruction::I64Const(i32::MIN as i64),
            Instruction::I64LtS,
            Instruction::I32Or,
        ];
        out.extend(flags::set_sticky(abi::LOCAL_FLAG_SHADOW, sticky_expr));
    }

    /// Saturating-doubles `rhs` (the `QD*` family's doubling step), leaving the clamped result in
    /// a fresh instruction sequence the caller splices in as an operand.
    fn saturating_double(&self, out: &mut Vec<Instruction<'static>>, alloc: &OpcodeAlloc, rhs: AnyRef) -> Instruction<'static> {
        let rhs_expr = self.operand(alloc, rhs);
        self.emit_saturating_with(out, rhs_expr.clone(), rhs_expr, self.locals.mem_scratch, false);
        Instruction::LocalGet(self.locals.mem_scratch)
    }

    fn emit_mul(&self, out: &mut Vec<Instruction<'static>>, o: &crate::ir::opcode::Mul, alloc: &OpcodeAlloc) {
        let lo_local = self.write_local(alloc, o.dst.id);
        let extend = if o.signed { Instruction::I64ExtendI32S } else { Instruction::I64ExtendI32U };
        if let Some(hi) = &o.result_hi {
            let hi_local = self.write_local(alloc, hi.id);
            out.push(self.operand(alloc, o.lhs));
            out.push(extend.clone());
            out.push(self.operand(alloc, o.rhs));
            out.push(extend);
            out.push(Instruction::I64Mul);
            out.push(Instruction::LocalTee(self.locals.wide_sum));
            out.push(Instruction::I32WrapI64);
            out.push(Instruction::LocalSet(lo_local));
            out.push(Instruction::LocalGet(self.locals.wide_sum));
            out.push(Instruction::I64Const(32));
            out.push(Instruction::I64ShrU);
            out.push(Instruction::I32WrapI64);
            out.push(Instruction::LocalSet(hi_local));
            if o.update_host_flags {
                out.push(Instruction::LocalGet(hi_local));
                out.push(Instruction::I32Const(0));
                out.push(Instruction::I32Ne);
                out.push(Instruction::LocalGet(lo_local));
                out.push(Instruction::I32Const(0));
                out.push(Instruction::I32Ne);
                out.push(Instruction::I32Or);
                out.push(Instruction::I32Eqz);
                out.push(Instruction::I32Const(CpsrFlags::Z.bits().trailing_zeros() as i32));
                out.push(Instruction::I32Shl);
                out.push(Instruction::LocalGet(abi::LOCAL_FLAG_SHADOW));
                out.push(Instruction::I32Const(!(CpsrFlags::N.bits() as i32 | CpsrFlags::Z.bits() as i32)));
                out.push(Instruction::I32And);
                out.push(Instruction::I32Or);
                out.push(Instruction::LocalGet(hi_local));
                out.push(Instruction::I32Const(CpsrFlags::N.bits() as i32));
                out.push(Instruction::I32And);
                out.push(Instruction::I32Or);
                out.push(Instruction::LocalSet(abi::LOCAL_FLAG_SHADOW));
            }
        } else {
            out.push(self.operand(alloc, o.lhs));
            out.push(self.operand(alloc, o.rhs));
            out.push(Instruction::I32Mul);
            out.push(Instruction::LocalSet(lo_local));
            if o.update_host_flags {
                out.extend(flags::set_nz(abi::LOCAL_FLAG_SHADOW, lo_local));
            }
        }
    }

    fn emit_add64(&self, out: &mut Vec<Instruction<'static>>, o: &crate::ir::opcode::Add64, alloc: &OpcodeAlloc) {
        let hi_local = self.write_local(alloc, o.dst_hi.id);
        let lo_local = self.write_local(alloc, o.dst_lo.id);

        out.push(self.operand(alloc, o.lhs_hi));
        out.push(Instruction::I64ExtendI32U);
        out.push(Instruction::I64Const(32));
        out.push(Instruction::I64Shl);
        out.push(self.operand(alloc, o.lhs_lo));
        out.push(Instruction::I64ExtendI32U);
        out.push(Instruction::I64Or);

        out.push(self.operand(alloc, o.rhs_hi));
        out.push(Instruction::I64ExtendI32U);
        out.push(Instruction::I64Const(32));
        out.push(Instruction::I64Shl);
        out.push(self.operand(alloc, o.rhs_lo));
        out.push(Instruction::I64ExtendI32U);
        out.push(Instruction::I64Or);

        out.push(Instruction::I64Add);
        out.push(Instruction::LocalTee(self.locals.wide_sum));
        out.push(Instruction::I32WrapI64);
        out.push(Instruction::LocalSet(lo_local));
        out.push(Instruction::LocalGet(self.locals.wide_sum));
        out.push(Instruction::I64Const(32));
        out.push(Instruction::I64ShrU);
        out.push(Instruction::I32WrapI64);
        out.push(Instruction::LocalSet(hi_local));
    }

    fn emit_memory_read(&self, out: &mut Vec<Instruction<'static>>, o: &crate::ir::opcode::MemoryRead, alloc: &OpcodeAlloc, imports: &dyn ImportIndex) {
        out.push(self.operand(alloc, o.addr));
        out.push(Instruction::LocalSet(self.locals.mem_addr));
        let dst_local = self.write_local(alloc, o.dst.id);

        let degrades = o.flags.contains(MemFlags::ARMV4T) && o.flags.contains(MemFlags::SIGNED) && o.flags.contains(MemFlags::HALF);
        if degrades {
            // ARMv4T misaligned signed halfword degrades to a signed-byte load at the exact
            // (odd) address rather than rotating a word load (spec.md §4.7).
            out.push(Instruction::LocalGet(self.locals.mem_addr));
            out.push(Instruction::I32Const(1));
            out.push(Instruction::I32And);
            out.push(Instruction::If(BlockType::Empty));
            memory_fastpath::lower_read(out, imports, Width::Byte, o.bus, MemFlags::SIGNED, self.locals.mem_addr, self.locals.mem_scratch, self.locals.shift);
            out.push(Instruction::Else);
            memory_fastpath::lower_read(out, imports, Width::Half, o.bus, o.flags & !MemFlags::ARMV4T, self.locals.mem_addr, self.locals.mem_scratch, self.locals.shift);
            out.push(Instruction::End);
        } else {
            let width = width_of(o.flags);
            memory_fastpath::lower_read(out, imports, width, o.bus, o.flags, self.locals.mem_addr, self.locals.mem_scratch, self.locals.shift);
        }
        out.push(Instruction::LocalGet(self.locals.mem_scratch));
        out.push(Instruction::LocalSet(dst_local));
    }

    fn emit_memory_write(&self, out: &mut Vec<Instruction<'static>>, o: &crate::ir::opcode::MemoryWrite, alloc: &OpcodeAlloc, imports: &dyn ImportIndex) {
        out.push(self.operand(alloc, o.addr));
        out.push(Instruction::LocalSet(self.locals.mem_addr));
        out.push(self.operand(alloc, o.value));
        out.push(Instruction::LocalSet(self.locals.mem_scratch));
        let width = width_of(o.flags);
        memory_fastpath::lower_write(out, imports, width, o.bus, self.locals.mem_addr, self.locals.mem_scratch, self.locals.shift);
    }

    fn emit_flush_exchange(&self, out: &mut Vec<Instruction<'static>>, o: &crate::ir::opcode::FlushExchange, alloc: &OpcodeAlloc) {
        out.push(self.operand(alloc, o.target));
        out.push(Instruction::LocalSet(self.locals.mem_addr));

        out.push(Instruction::LocalGet(abi::LOCAL_STATE_PTR));
        out.push(Instruction::LocalGet(self.locals.mem_addr));
        out.push(Instruction::I32Const(-2)); // !1
        out.push(Instruction::I32And);
        out.push(Instruction::I32Store(gpr_memarg(CpuMode::User, 15)));

        out.push(Instruction::LocalGet(abi::LOCAL_STATE_PTR));
        out.push(Instruction::LocalGet(abi::LOCAL_STATE_PTR));
        out.push(Instruction::I32Load(MemArg { offset: registers::cpsr_offset() as u64, align: 2, memory_index: 0 }));
        out.push(Instruction::I32Const(!(CpsrFlags::THUMB.bits() as i32)));
        out.push(Instruction::I32And);
        out.push(Instruction::LocalGet(self.locals.mem_addr));
        out.push(Instruction::I32Const(1));
        out.push(Instruction::I32And);
        out.push(Instruction::I32Const(CpsrFlags::THUMB.bits().trailing_zeros() as i32));
        out.push(Instruction::I32Shl);
        out.push(Instruction::I32Or);
        out.push(Instruction::I32Store(MemArg { offset: registers::cpsr_offset() as u64, align: 2, memory_index: 0 }));
    }

    /// Appends the shared block-exit sequence (spec.md §4.7 "Block exit semantics"): debit
    /// `length` cycles, then either tail-link directly into a statically known successor (if
    /// cycles remain) or call back out to the dispatcher.
    fn emit_block_exit(&self, out: &mut Vec<Instruction<'static>>, block: &BasicBlock, imports: &dyn ImportIndex) {
        out.push(Instruction::LocalGet(abi::LOCAL_CYCLE_COUNTER));
        out.push(Instruction::I32Const(block.length as i32));
        out.push(Instruction::I32Sub);
        out.push(Instruction::LocalSet(abi::LOCAL_CYCLE_COUNTER));

        match block.branch_target {
            Some(bt) => {
                out.push(Instruction::LocalGet(abi::LOCAL_CYCLE_COUNTER));
                out.push(Instruction::I32Const(0));
                out.push(Instruction::I32GtS);
                out.push(Instruction::If(BlockType::Empty));
                out.push(Instruction::LocalGet(abi::LOCAL_STATE_PTR));
                out.push(Instruction::LocalGet(abi::LOCAL_CYCLE_COUNTER));
                out.push(Instruction::LocalGet(abi::LOCAL_FLAG_SHADOW));
                out.push(Instruction::I32Const(bt.call_site_slot as i32));
                out.push(Instruction::CallIndirect { type_index: abi::BLOCK_FUNC_TYPE_INDEX, table_index: 0 });
                out.push(Instruction::Return);
                out.push(Instruction::Else);
                out.push(Instruction::LocalGet(abi::LOCAL_CYCLE_COUNTER));
                out.push(Instruction::Call(imports.index_of(abi::IMPORT_JIT_EXIT)));
                out.push(Instruction::Return);
                out.push(Instruction::End);
            }
            None => {
                out.push(Instruction::LocalGet(abi::LOCAL_CYCLE_COUNTER));
                out.push(Instruction::Call(imports.index_of(abi::IMPORT_JIT_EXIT)));
                out.push(Instruction::Return);
            }
        }
    }
}

fn gpr_memarg(mode: CpuMode, reg: u32) -> MemArg {
    MemArg { offset: registers::gpr_offset(mode, reg) as u64, align: 2, memory_index: 0 }
}

fn width_of(flags: MemFlags) -> Width {
    if flags.contains(MemFlags::BYTE) {
        Width::Byte
    } else if flags.contains(MemFlags::HALF) {
        Width::Half
    } else {
        Width::Word
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::allocate_micro_block;
    use crate::common::addr::{BlockKey, GuestAddr};
    use crate::ir::microblock::MicroBlock;
    use crate::ir::opcode::{Alu, LoadGpr, StoreGpr};
    use crate::ir::value::{Constant, DataType, Variable};
    use crate::isa::condition::Condition;

    struct StubImports;
    impl ImportIndex for StubImports {
        fn index_of(&self, _name: &str) -> u32 {
            0
        }
    }

    fn straight_line_block() -> BasicBlock {
        let mut mb = MicroBlock::new(Condition::Al);
        mb.push(Opcode::LoadGpr(LoadGpr { dst: Variable::new(0, DataType::U32), mode: CpuMode::User, reg: 1 }));
        mb.push(Opcode::Alu(Alu {
            dst: Variable::new(1, DataType::U32),
            kind: AluKind::Mov,
            lhs: AnyRef::Constant(Constant::u32(7)),
            rhs: AnyRef::Null,
            update_host_flags: false,
        }));
        mb.push(Opcode::StoreGpr(StoreGpr { mode: CpuMode::User, reg: 2, value: AnyRef::Variable(1) }));
        mb.length = 3;
        let mut block = BasicBlock::new(BlockKey::new(GuestAddr::new(0x8000), CpuMode::User, false));
        block.push_micro_block(mb);
        block
    }

    #[test]
    fn straight_line_block_ends_in_return() {
        let config = Config::default();
        let block = straight_line_block();
        let allocation = allocate_micro_block(&block.micro_blocks[0], &config).unwrap();
        let emitter = CodeEmitter::new(&config);
        let emitted = emitter.emit_block(&block, &[allocation], &StubImports).unwrap();
        assert!(matches!(emitted.instructions.last(), Some(Instruction::Return)));
    }

    /// A block whose only micro-block is conditionally guarded (e.g. `BEQ`'s lifted form) and ends
    /// in `FlushExchange` must still end in an unconditional `Return`: when the guard is false at
    /// runtime, execution falls through the guard's `End` with nothing left to run, and the
    /// function's declared `(i32,i32,i32) -> i32` result type requires every path to produce one.
    #[test]
    fn conditionally_guarded_only_exit_still_gets_fallback_return() {
        let config = Config::default();
        let mut mb = MicroBlock::new(Condition::Eq);
        mb.push(Opcode::FlushExchange(crate::ir::opcode::FlushExchange { target: AnyRef::Constant(Constant::u32(0x8000)) }));
        mb.length = 1;
        let mut block = BasicBlock::new(BlockKey::new(GuestAddr::new(0x8000), CpuMode::User, false));
        block.push_micro_block(mb);

        let allocation = allocate_micro_block(&block.micro_blocks[0], &config).unwrap();
        let emitter = CodeEmitter::new(&config);
        let emitted = emitter.emit_block(&block, &[allocation], &StubImports).unwrap();

        assert!(matches!(emitted.instructions.last(), Some(Instruction::Return)));
        // The fallback `Return` must come from a block-exit sequence emitted *after* the guard's
        // `End`, not from inside the `If` — i.e. there are two `Return`s total, one guarded and
        // one unconditional.
        let return_count = emitted.instructions.iter().filter(|i| matches!(i, Instruction::Return)).count();
        assert_eq!(return_count, 2);
        let last_end_index = emitted.instructions.iter().rposition(|i| matches!(i, Instruction::End)).unwrap();
        assert!(matches!(emitted.instructions[last_end_index + 1..].last(), Some(Instruction::Return)));
    }

    #[test]
    fn extra_locals_cover_registers_plus_scratch() {
        let config = Config::default();
        let emitter = CodeEmitter::new(&config);
        assert_eq!(emitter.locals.types().len(), config.host_registers + 5);
    }
}
