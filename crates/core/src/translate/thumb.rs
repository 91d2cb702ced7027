//! Lowers decoded Thumb instructions into IR (spec.md §4.4).
//!
//! Thumb carries no guest-visible predication outside format 16's conditional branch, so every
//! micro-block opened here uses [`Condition::Al`] except the one instruction that tests a real
//! condition field.

use crate::common::addr::{BlockKey, GuestAddr};
use crate::common::error::JitError;
use crate::ir::block::BasicBlock;
use crate::ir::opcode::{
    Alu, AluKind, FlagMask, LoadGpr, MemBus, MemFlags, MemoryRead, MemoryWrite, Opcode, Shift, StoreGpr, UpdateFlags,
};
use crate::ir::value::{AnyRef, DataType, VarRef};
use crate::isa::arm::instruction::ShiftKind;
use crate::isa::condition::Condition;
use crate::isa::thumb::decode;
use crate::isa::thumb::instruction::*;
use crate::state::mode::CpuMode;

use super::arm::{flush, lower_exception_entry, load_operand, map_shift_kind, push_nz_from_host_flags};
use super::{enter_condition, imm, pc_read_value, IrBuilder, Terminate, Translator};

pub(crate) fn step(
    t: &Translator,
    key: BlockKey,
    addr: GuestAddr,
    word: u16,
    block: &mut BasicBlock,
    builder: &mut Option<IrBuilder>,
    current_cond: &mut Option<Condition>,
    pending_bl_high: &mut Option<u32>,
) -> Result<Terminate, JitError> {
    let _ = t;
    let inst = decode::decode(word);
    let cond = match &inst {
        ThumbInstruction::ConditionalBranch(br) => br.cond,
        _ => Condition::Al,
    };
    enter_condition(block, builder, current_cond, cond);
    let b = builder.as_mut().expect("enter_condition always opens a builder");
    let mode = key.mode();
    lower(b, key, addr.val(), mode, inst, pending_bl_high)
}

/// Loads a low-register (R0–R7) GPR; Thumb's 3-bit register fields never need the PC-read
/// substitution `load_operand` handles for ARM's full R0–R15 range, but reusing it keeps one
/// code path for "read a GPR" across both front ends.
fn low(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, reg: u32) -> AnyRef {
    load_operand(b, key, addr, mode, reg, false)
}

fn store(b: &mut IrBuilder, mode: CpuMode, reg: u32, value: AnyRef) {
    b.push(Opcode::StoreGpr(StoreGpr { mode, reg, value }));
}

fn alu(b: &mut IrBuilder, kind: AluKind, lhs: AnyRef, rhs: AnyRef, set_flags: bool) -> AnyRef {
    let dst = b.var(DataType::U32);
    let id = dst.id;
    b.push(Opcode::Alu(Alu { dst, kind, lhs, rhs, update_host_flags: set_flags }));
    AnyRef::Variable(id)
}

/// Folds N/Z/C/V (as left by the preceding flag-producing op) into CPSR and stores it back —
/// the common tail of every flag-setting Thumb ALU/shift form, all of which set the full NZCV
/// (Thumb's two/three-operand ALU encodings have no S-bit; flags are always updated).
fn update_nzcv(b: &mut IrBuilder, mask: FlagMask) {
    let cpsr_cur = b.var(DataType::U32);
    let cpsr_cur_id = cpsr_cur.id;
    b.push(Opcode::LoadCpsr(crate::ir::opcode::LoadCpsr { dst: cpsr_cur }));
    let cpsr_new = b.var(DataType::U32);
    let cpsr_new_id = cpsr_new.id;
    b.push(Opcode::UpdateFlags(UpdateFlags { dst: cpsr_new, cpsr_in: VarRef(cpsr_cur_id), mask }));
    b.push(Opcode::StoreCpsr(crate::ir::opcode::StoreCpsr { value: AnyRef::Variable(cpsr_new_id) }));
}

fn lower(
    b: &mut IrBuilder,
    key: BlockKey,
    addr: u32,
    mode: CpuMode,
    inst: ThumbInstruction,
    pending_bl_high: &mut Option<u32>,
) -> Result<Terminate, JitError> {
    match inst {
        ThumbInstruction::ShiftImmediate(i) => Ok(lower_shift_immediate(b, key, addr, mode, i)),
        ThumbInstruction::AddSubtract(i) => Ok(lower_add_subtract(b, key, addr, mode, i)),
        ThumbInstruction::ImmediateAlu(i) => Ok(lower_immediate_alu(b, mode, i)),
        ThumbInstruction::AluRegister(i) => Ok(lower_alu_register(b, mode, i)),
        ThumbInstruction::HiRegisterOp(i) => Ok(lower_hi_register_op(b, key, addr, mode, i)),
        ThumbInstruction::BranchExchange(i) => Ok(lower_branch_exchange(b, key, addr, mode, i)),
        ThumbInstruction::PcRelativeLoad(i) => Ok(lower_pc_relative_load(b, key, addr, mode, i)),
        ThumbInstruction::RegOffsetTransfer(i) => Ok(lower_reg_offset_transfer(b, key, addr, mode, i)),
        ThumbInstruction::ImmOffsetTransfer(i) => Ok(lower_imm_offset_transfer(b, key, addr, mode, i)),
        ThumbInstruction::SpRelativeTransfer(i) => Ok(lower_sp_relative_transfer(b, mode, i)),
        ThumbInstruction::LoadAddress(i) => Ok(lower_load_address(b, key, addr, mode, i)),
        ThumbInstruction::AdjustStackPointer(i) => Ok(lower_adjust_sp(b, mode, i)),
        ThumbInstruction::PushPop(i) => Ok(lower_push_pop(b, mode, i)),
        ThumbInstruction::BlockTransfer(i) => Ok(lower_block_transfer(b, mode, i)),
        ThumbInstruction::ConditionalBranch(i) => Ok(lower_conditional_branch(b, key, addr, mode, i)),
        ThumbInstruction::SoftwareInterrupt(imm24) => Ok(lower_swi(b, key, addr, imm24)),
        ThumbInstruction::UnconditionalBranch(i) => Ok(lower_unconditional_branch(b, key, addr, mode, i)),
        ThumbInstruction::BranchLinkHalf(i) => Ok(lower_branch_link_half(b, key, addr, mode, i, pending_bl_high)),
        ThumbInstruction::Unsupported(reason) => Err(JitError::unimplemented(GuestAddr::new(addr), reason)),
    }
}

fn lower_shift_immediate(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, i: ShiftImmediate) -> Terminate {
    let input = low(b, key, addr, mode, i.rs);
    // Amount 0 is `LSL #0` (pure passthrough, carry unaffected) for `Lsl`; for `Lsr`/`Asr` amount
    // 0 in the encoding means a shift of 32 (handled by the emitter's shift opcode, not here).
    let result = if i.kind == ShiftKind::Lsl && i.amount == 0 {
        input
    } else {
        let dst = b.var(DataType::U32);
        let id = dst.id;
        b.push(Opcode::Shift(Shift { dst, kind: map_shift_kind(i.kind), input, amount: imm(i.amount), update_host_flags: true }));
        AnyRef::Variable(id)
    };
    store(b, mode, i.rd, result);
    let mut mask = FlagMask::N | FlagMask::Z;
    if !(i.kind == ShiftKind::Lsl && i.amount == 0) {
        mask |= FlagMask::C;
    }
    update_nzcv(b, mask);
    Terminate::No
}

fn lower_add_subtract(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, i: AddSubtract) -> Terminate {
    let lhs = low(b, key, addr, mode, i.rs);
    let rhs = match i.immediate {
        Some(v) => imm(v),
        None => low(b, key, addr, mode, i.rn),
    };
    let kind = if i.subtract { AluKind::Sub } else { AluKind::Add };
    let result = alu(b, kind, lhs, rhs, true);
    store(b, mode, i.rd, result);
    update_nzcv(b, FlagMask::N | FlagMask::Z | FlagMask::C | FlagMask::V);
    Terminate::No
}

fn lower_immediate_alu(b: &mut IrBuilder, mode: CpuMode, i: ImmediateAlu) -> Terminate {
    let rd_val = {
        let dst = b.var(DataType::U32);
        let id = dst.id;
        b.push(Opcode::LoadGpr(LoadGpr { dst, mode, reg: i.rd }));
        AnyRef::Variable(id)
    };
    let rhs = imm(i.imm8);
    match i.op {
        ImmediateOp::Mov => {
            let result = alu(b, AluKind::Mov, rhs, AnyRef::Null, true);
            store(b, mode, i.rd, result);
            update_nzcv(b, FlagMask::N | FlagMask::Z);
        }
        ImmediateOp::Cmp => {
            alu(b, AluKind::Sub, rd_val, rhs, true);
            update_nzcv(b, FlagMask::N | FlagMask::Z | FlagMask::C | FlagMask::V);
        }
        ImmediateOp::Add => {
            let result = alu(b, AluKind::Add, rd_val, rhs, true);
            store(b, mode, i.rd, result);
            update_nzcv(b, FlagMask::N | FlagMask::Z | FlagMask::C | FlagMask::V);
        }
        ImmediateOp::Sub => {
            let result = alu(b, AluKind::Sub, rd_val, rhs, true);
            store(b, mode, i.rd, result);
            update_nzcv(b, FlagMask::N | FlagMask::Z | FlagMask::C | FlagMask::V);
        }
    }
    Terminate::No
}

fn lower_alu_register(b: &mut IrBuilder, mode: CpuMode, i: AluRegister) -> Terminate {
    let rd_val = {
        let dst = b.var(DataType::U32);
        let id = dst.id;
        b.push(Opcode::LoadGpr(LoadGpr { dst, mode, reg: i.rd }));
        AnyRef::Variable(id)
    };
    let rs_val = {
        let dst = b.var(DataType::U32);
        let id = dst.id;
        b.push(Opcode::LoadGpr(LoadGpr { dst, mode, reg: i.rs }));
        AnyRef::Variable(id)
    };

    match i.op {
        AluOp::Lsl | AluOp::Lsr | AluOp::Asr | AluOp::Ror => {
            // Register-specified shift: the low byte of Rs is the shift amount, matching the ARM
            // data-processing register-shift form (spec.md §4.4).
            let masked = alu(b, AluKind::And, rs_val, imm(0xFF), false);
            let kind = match i.op {
                AluOp::Lsl => crate::ir::opcode::ShiftKind::Lsl,
                AluOp::Lsr => crate::ir::opcode::ShiftKind::Lsr,
                AluOp::Asr => crate::ir::opcode::ShiftKind::Asr,
                _ => crate::ir::opcode::ShiftKind::Ror,
            };
            let dst = b.var(DataType::U32);
            let id = dst.id;
            b.push(Opcode::Shift(Shift { dst, kind, input: rd_val, amount: masked, update_host_flags: true }));
            store(b, mode, i.rd, AnyRef::Variable(id));
            update_nzcv(b, FlagMask::N | FlagMask::Z | FlagMask::C);
        }
        AluOp::Mul => {
            let dst = b.var(DataType::U32);
            let id = dst.id;
            b.push(Opcode::Mul(crate::ir::opcode::Mul {
                dst,
                result_hi: None,
                lhs: rd_val,
                rhs: rs_val,
                signed: false,
                update_host_flags: false,
            }));
            store(b, mode, i.rd, AnyRef::Variable(id));
            push_nz_from_host_flags(b, AnyRef::Variable(id));
        }
        AluOp::Neg => {
            let result = alu(b, AluKind::Rsb, rd_val, imm(0), true);
            store(b, mode, i.rd, result);
            update_nzcv(b, FlagMask::N | FlagMask::Z | FlagMask::C | FlagMask::V);
        }
        AluOp::Cmp => {
            alu(b, AluKind::Sub, rd_val, rs_val, true);
            update_nzcv(b, FlagMask::N | FlagMask::Z | FlagMask::C | FlagMask::V);
        }
        AluOp::Cmn => {
            alu(b, AluKind::Add, rd_val, rs_val, true);
            update_nzcv(b, FlagMask::N | FlagMask::Z | FlagMask::C | FlagMask::V);
        }
        AluOp::Tst => {
            alu(b, AluKind::And, rd_val, rs_val, true);
            update_nzcv(b, FlagMask::N | FlagMask::Z);
        }
        _ => {
            let kind = match i.op {
                AluOp::And => AluKind::And,
                AluOp::Eor => AluKind::Eor,
                AluOp::Adc => AluKind::Adc,
                AluOp::Sbc => AluKind::Sbc,
                AluOp::Orr => AluKind::Orr,
                AluOp::Bic => AluKind::Bic,
                AluOp::Mvn => AluKind::Mvn,
                _ => unreachable!("handled above"),
            };
            let lhs = if kind == AluKind::Mvn { rs_val } else { rd_val };
            let rhs = if kind == AluKind::Mvn { AnyRef::Null } else { rs_val };
            let result = alu(b, kind, lhs, rhs, true);
            store(b, mode, i.rd, result);
            let mask = match kind {
                AluKind::Adc | AluKind::Sbc => FlagMask::N | FlagMask::Z | FlagMask::C | FlagMask::V,
                _ => FlagMask::N | FlagMask::Z,
            };
            update_nzcv(b, mask);
        }
    }
    Terminate::No
}

fn lower_hi_register_op(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, i: HiRegisterOp) -> Terminate {
    let rs_val = load_operand(b, key, addr, mode, i.rs, false);
    match i.op {
        HiRegOp::Add => {
            let rd_val = load_operand(b, key, addr, mode, i.rd, false);
            let result = alu(b, AluKind::Add, rd_val, rs_val, false);
            if i.rd == 15 {
                flush(b, result, false);
                Terminate::Yes
            } else {
                store(b, mode, i.rd, result);
                Terminate::No
            }
        }
        HiRegOp::Cmp => {
            let rd_val = load_operand(b, key, addr, mode, i.rd, false);
            alu(b, AluKind::Sub, rd_val, rs_val, true);
            update_nzcv(b, FlagMask::N | FlagMask::Z | FlagMask::C | FlagMask::V);
            Terminate::No
        }
        HiRegOp::Mov => {
            if i.rd == 15 {
                flush(b, rs_val, false);
                Terminate::Yes
            } else {
                store(b, mode, i.rd, rs_val);
                Terminate::No
            }
        }
    }
}

fn lower_branch_exchange(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, i: BranchExchange) -> Terminate {
    let target = load_operand(b, key, addr, mode, i.rm, false);
    flush(b, target, true);
    Terminate::Yes
}

fn lower_pc_relative_load(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, i: PcRelativeLoad) -> Terminate {
    // The PC value this format reads is word-aligned (bit 1 forced to 0) before the offset is
    // added, a Thumb-specific quirk of format 6.
    let pc = pc_read_value(key, addr, false) & !0b11;
    let eff_addr = pc.wrapping_add(i.offset);
    let dst = b.var(DataType::U32);
    let dst_id = dst.id;
    b.push(Opcode::MemoryRead(MemoryRead { dst, addr: imm(eff_addr), bus: MemBus::Data, flags: MemFlags::WORD | MemFlags::ROTATE }));
    store(b, mode, i.rd, AnyRef::Variable(dst_id));
    Terminate::No
}

fn lower_reg_offset_transfer(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, i: RegOffsetTransfer) -> Terminate {
    let base = low(b, key, addr, mode, i.rb);
    let offset = low(b, key, addr, mode, i.ro);
    let eff_addr = alu(b, AluKind::Add, base, offset, false);

    match i.kind {
        RegOffsetKind::StrWord => {
            let value = low(b, key, addr, mode, i.rd);
            b.push(Opcode::MemoryWrite(MemoryWrite { addr: eff_addr, value, bus: MemBus::Data, flags: MemFlags::WORD | MemFlags::ROTATE }));
        }
        RegOffsetKind::StrByte => {
            let value = low(b, key, addr, mode, i.rd);
            b.push(Opcode::MemoryWrite(MemoryWrite { addr: eff_addr, value, bus: MemBus::Data, flags: MemFlags::BYTE }));
        }
        RegOffsetKind::StrHalf => {
            let value = low(b, key, addr, mode, i.rd);
            b.push(Opcode::MemoryWrite(MemoryWrite { addr: eff_addr, value, bus: MemBus::Data, flags: MemFlags::HALF }));
        }
        RegOffsetKind::LdrWord => return load_into(b, mode, eff_addr, MemFlags::WORD | MemFlags::ROTATE, i.rd),
        RegOffsetKind::LdrByte => return load_into(b, mode, eff_addr, MemFlags::BYTE, i.rd),
        RegOffsetKind::LdrHalf => return load_into(b, mode, eff_addr, MemFlags::HALF, i.rd),
        RegOffsetKind::LdrSignedByte => return load_into(b, mode, eff_addr, MemFlags::BYTE | MemFlags::SIGNED, i.rd),
        RegOffsetKind::LdrSignedHalf => {
            return load_into(b, mode, eff_addr, MemFlags::HALF | MemFlags::SIGNED | MemFlags::ARMV4T, i.rd)
        }
    }
    Terminate::No
}

fn load_into(b: &mut IrBuilder, mode: CpuMode, addr: AnyRef, flags: MemFlags, rd: u32) -> Terminate {
    let dst = b.var(DataType::U32);
    let dst_id = dst.id;
    b.push(Opcode::MemoryRead(MemoryRead { dst, addr, bus: MemBus::Data, flags }));
    store(b, mode, rd, AnyRef::Variable(dst_id));
    Terminate::No
}

fn lower_imm_offset_transfer(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, i: ImmOffsetTransfer) -> Terminate {
    let base = low(b, key, addr, mode, i.rb);
    let eff_addr = alu(b, AluKind::Add, base, imm(i.offset), false);
    match i.kind {
        ImmOffsetKind::StrWord => {
            let value = low(b, key, addr, mode, i.rd);
            b.push(Opcode::MemoryWrite(MemoryWrite { addr: eff_addr, value, bus: MemBus::Data, flags: MemFlags::WORD | MemFlags::ROTATE }));
            Terminate::No
        }
        ImmOffsetKind::StrByte => {
            let value = low(b, key, addr, mode, i.rd);
            b.push(Opcode::MemoryWrite(MemoryWrite { addr: eff_addr, value, bus: MemBus::Data, flags: MemFlags::BYTE }));
            Terminate::No
        }
        ImmOffsetKind::StrHalf => {
            let value = low(b, key, addr, mode, i.rd);
            b.push(Opcode::MemoryWrite(MemoryWrite { addr: eff_addr, value, bus: MemBus::Data, flags: MemFlags::HALF }));
            Terminate::No
        }
        ImmOffsetKind::LdrWord => load_into(b, mode, eff_addr, MemFlags::WORD | MemFlags::ROTATE, i.rd),
        ImmOffsetKind::LdrByte => load_into(b, mode, eff_addr, MemFlags::BYTE, i.rd),
        ImmOffsetKind::LdrHalf => load_into(b, mode, eff_addr, MemFlags::HALF, i.rd),
    }
}

fn lower_sp_relative_transfer(b: &mut IrBuilder, mode: CpuMode, i: SpRelativeTransfer) -> Terminate {
    let sp = {
        let dst = b.var(DataType::U32);
        let id = dst.id;
        b.push(Opcode::LoadGpr(LoadGpr { dst, mode, reg: 13 }));
        AnyRef::Variable(id)
    };
    let eff_addr = alu(b, AluKind::Add, sp, imm(i.offset), false);
    if i.load {
        load_into(b, mode, eff_addr, MemFlags::WORD | MemFlags::ROTATE, i.rd)
    } else {
        let value = {
            let dst = b.var(DataType::U32);
            let id = dst.id;
            b.push(Opcode::LoadGpr(LoadGpr { dst, mode, reg: i.rd }));
            AnyRef::Variable(id)
        };
        b.push(Opcode::MemoryWrite(MemoryWrite { addr: eff_addr, value, bus: MemBus::Data, flags: MemFlags::WORD | MemFlags::ROTATE }));
        Terminate::No
    }
}

fn lower_load_address(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, i: LoadAddress) -> Terminate {
    let base = if i.from_sp {
        let dst = b.var(DataType::U32);
        let id = dst.id;
        b.push(Opcode::LoadGpr(LoadGpr { dst, mode, reg: 13 }));
        AnyRef::Variable(id)
    } else {
        imm(pc_read_value(key, addr, false) & !0b11)
    };
    let result = alu(b, AluKind::Add, base, imm(i.offset), false);
    store(b, mode, i.rd, result);
    Terminate::No
}

fn lower_adjust_sp(b: &mut IrBuilder, mode: CpuMode, i: AdjustStackPointer) -> Terminate {
    let sp = {
        let dst = b.var(DataType::U32);
        let id = dst.id;
        b.push(Opcode::LoadGpr(LoadGpr { dst, mode, reg: 13 }));
        AnyRef::Variable(id)
    };
    let kind = if i.subtract { AluKind::Sub } else { AluKind::Add };
    let result = alu(b, kind, sp, imm(i.offset), false);
    store(b, mode, 13, result);
    Terminate::No
}

fn lower_push_pop(b: &mut IrBuilder, mode: CpuMode, i: PushPop) -> Terminate {
    let registers: Vec<u32> = (0..8).filter(|n| i.register_list & (1 << n) != 0).collect();
    let sp_reg = |b: &mut IrBuilder, mode: CpuMode| -> AnyRef {
        let dst = b.var(DataType::U32);
        let id = dst.id;
        b.push(Opcode::LoadGpr(LoadGpr { dst, mode, reg: 13 }));
        AnyRef::Variable(id)
    };

    if i.pop {
        let mut sp = sp_reg(b, mode);
        for reg in registers {
            load_into(b, mode, sp, MemFlags::WORD | MemFlags::ROTATE, reg);
            sp = alu(b, AluKind::Add, sp, imm(4), false);
        }
        let mut pc_target = None;
        if i.include_extra {
            let dst = b.var(DataType::U32);
            let dst_id = dst.id;
            b.push(Opcode::MemoryRead(MemoryRead { dst, addr: sp, bus: MemBus::Data, flags: MemFlags::WORD | MemFlags::ROTATE }));
            pc_target = Some(AnyRef::Variable(dst_id));
            sp = alu(b, AluKind::Add, sp, imm(4), false);
        }
        store(b, mode, 13, sp);
        if let Some(target) = pc_target {
            flush(b, target, true);
            Terminate::Yes
        } else {
            Terminate::No
        }
    } else {
        let count = registers.len() as u32 + if i.include_extra { 1 } else { 0 };
        let sp0 = sp_reg(b, mode);
        let base = alu(b, AluKind::Sub, sp0, imm(4 * count), false);
        store(b, mode, 13, base);

        let mut addr_cursor = base;
        for reg in registers {
            let value = {
                let dst = b.var(DataType::U32);
                let id = dst.id;
                b.push(Opcode::LoadGpr(LoadGpr { dst, mode, reg }));
                AnyRef::Variable(id)
            };
            b.push(Opcode::MemoryWrite(MemoryWrite { addr: addr_cursor, value, bus: MemBus::Data, flags: MemFlags::WORD | MemFlags::ROTATE }));
            addr_cursor = alu(b, AluKind::Add, addr_cursor, imm(4), false);
        }
        if i.include_extra {
            let value = {
                let dst = b.var(DataType::U32);
                let id = dst.id;
                b.push(Opcode::LoadGpr(LoadGpr { dst, mode, reg: 14 }));
                AnyRef::Variable(id)
            };
            b.push(Opcode::MemoryWrite(MemoryWrite { addr: addr_cursor, value, bus: MemBus::Data, flags: MemFlags::WORD | MemFlags::ROTATE }));
        }
        Terminate::No
    }
}

fn lower_block_transfer(b: &mut IrBuilder, mode: CpuMode, i: BlockTransfer) -> Terminate {
    let base = {
        let dst = b.var(DataType::U32);
        let id = dst.id;
        b.push(Opcode::LoadGpr(LoadGpr { dst, mode, reg: i.rb }));
        AnyRef::Variable(id)
    };
    let registers: Vec<u32> = (0..8).filter(|n| i.register_list & (1 << n) != 0).collect();
    let count = registers.len() as u32;

    let mut addr_cursor = base;
    for reg in &registers {
        if i.load {
            load_into(b, mode, addr_cursor, MemFlags::WORD | MemFlags::ROTATE, *reg);
        } else {
            let value = {
                let dst = b.var(DataType::U32);
                let id = dst.id;
                b.push(Opcode::LoadGpr(LoadGpr { dst, mode, reg: *reg }));
                AnyRef::Variable(id)
            };
            b.push(Opcode::MemoryWrite(MemoryWrite { addr: addr_cursor, value, bus: MemBus::Data, flags: MemFlags::WORD | MemFlags::ROTATE }));
        }
        addr_cursor = alu(b, AluKind::Add, addr_cursor, imm(4), false);
    }

    // `LDMIA`/`STMIA rb!` always writes back, even when `rb` is itself in the list — per the
    // architecture's documented "an empty register list is a special case" aside, a non-empty
    // Thumb block transfer writes back `base + 4*count` unconditionally.
    let final_addr = alu(b, AluKind::Add, base, imm(4 * count), false);
    store(b, mode, i.rb, final_addr);
    Terminate::No
}

fn lower_conditional_branch(b: &mut IrBuilder, key: BlockKey, addr: u32, _mode: CpuMode, i: ConditionalBranch) -> Terminate {
    let pc = pc_read_value(key, addr, false);
    let target = pc.wrapping_add(i.offset as u32);
    flush(b, imm(target), false);
    Terminate::Yes
}

fn lower_swi(b: &mut IrBuilder, key: BlockKey, addr: u32, _imm24: u32) -> Terminate {
    let return_addr = addr.wrapping_add(key.opcode_size());
    lower_exception_entry(b, CpuMode::Supervisor, 0x0000_0008, return_addr)
}

fn lower_unconditional_branch(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, i: UnconditionalBranch) -> Terminate {
    let pc = pc_read_value(key, addr, false);
    let target = pc.wrapping_add(i.offset as u32);
    flush(b, imm(target), false);
    Terminate::Branch(BlockKey::new(GuestAddr::new(target), mode, true))
}

fn lower_branch_link_half(
    b: &mut IrBuilder,
    key: BlockKey,
    addr: u32,
    mode: CpuMode,
    i: BranchLinkHalf,
    pending_bl_high: &mut Option<u32>,
) -> Terminate {
    if !i.low_half {
        // High half: bits 22:12 of the signed offset, sign-extended from bit 10 (spec.md §4.4
        // treats this as the Thumb BL/BLX pairing quirk). The base (this half's PC-read value
        // plus its offset contribution) is stashed for the low half to add its own 11 bits to;
        // LR is set provisionally to this instruction's own successor in case an interrupt lands
        // between the two halves, and the low-half instruction overwrites it with the real
        // return address once both halves have combined.
        let high = ((i.bits11 as i32) << 21) >> 21;
        let base = pc_read_value(key, addr, false).wrapping_add((high << 12) as u32);
        *pending_bl_high = Some(base);
        let provisional_target = addr.wrapping_add(key.opcode_size() * 2);
        store(b, mode, 14, imm(provisional_target | 1));
        Terminate::No
    } else {
        let base = pending_bl_high.take().unwrap_or_else(|| pc_read_value(key, addr, false));
        let target = base.wrapping_add(i.bits11 << 1);
        let ret = addr.wrapping_add(key.opcode_size());
        store(b, mode, 14, imm(ret | 1));
        flush(b, imm(target), false);
        Terminate::Yes
    }
}
