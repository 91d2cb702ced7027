//! Lowers decoded ARM instructions into IR (spec.md §4.4).

use crate::common::addr::{BlockKey, GuestAddr};
use crate::common::error::JitError;
use crate::ir::block::BasicBlock;
use crate::ir::opcode::{
    Alu, AluKind, FlagMask, LoadCpsr, LoadGpr, LoadSpsr, MemBus, MemFlags, MemoryRead, MemoryWrite, Mrc, Mcr, Mul,
    Opcode, Shift, ShiftKind as IrShiftKind, StoreCpsr, StoreGpr, StoreSpsr, UpdateFlags,
};
use crate::ir::value::{AnyRef, DataType};
use crate::isa::arm::decode;
use crate::isa::arm::instruction::{
    AddrOffset, ArmInstruction, BlockDataTransfer, BranchExchange, BranchRelative, CoprocessorRegisterTransfer,
    CountLeadingZeros, DataProcessing, DpOpcode, Exception, ExceptionKind, HalfwordKind, HalfwordOffset,
    HalfwordSignedTransfer, MoveRegisterStatus, MoveStatusRegister, Multiply, MultiplyLong, Operand2,
    SaturatingAddSub, SatOp, ShiftKind as ArmShiftKind, SingleDataSwap, SingleDataTransfer,
};
use crate::isa::condition::Condition;
use crate::state::mode::CpuMode;

use super::{enter_condition, imm, pc_read_value, IrBuilder, Terminate, Translator};

pub(crate) fn step(
    t: &Translator,
    key: BlockKey,
    addr: GuestAddr,
    word: u32,
    block: &mut BasicBlock,
    builder: &mut Option<IrBuilder>,
    current_cond: &mut Option<Condition>,
) -> Result<Terminate, JitError> {
    let _ = t;
    let inst = decode::decode(word);
    let cond = instruction_condition(&inst);
    enter_condition(block, builder, current_cond, cond);
    let b = builder.as_mut().expect("enter_condition always opens a builder");
    let mode = key.mode();
    lower(b, key, addr.val(), mode, inst)
}

fn instruction_condition(inst: &ArmInstruction) -> Condition {
    match inst {
        ArmInstruction::DataProcessing(i) => i.cond,
        ArmInstruction::SingleDataTransfer(i) => i.cond,
        ArmInstruction::HalfwordSignedTransfer(i) => i.cond,
        ArmInstruction::BlockDataTransfer(i) => i.cond,
        ArmInstruction::BranchRelative(i) => i.cond,
        ArmInstruction::BranchExchange(i) => i.cond,
        ArmInstruction::Multiply(i) => i.cond,
        ArmInstruction::MultiplyLong(i) => i.cond,
        ArmInstruction::SingleDataSwap(i) => i.cond,
        ArmInstruction::Exception(i) => i.cond,
        ArmInstruction::MoveStatusRegister(i) => i.cond,
        ArmInstruction::MoveRegisterStatus(i) => i.cond,
        ArmInstruction::CountLeadingZeros(i) => i.cond,
        ArmInstruction::SaturatingAddSub(i) => i.cond,
        ArmInstruction::CoprocessorRegisterTransfer(i) => i.cond,
        ArmInstruction::Unsupported(_) => Condition::Al,
    }
}

/// Reads a GPR operand, substituting the pipeline-advanced PC value when `reg == 15`.
pub(super) fn load_operand(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, reg: u32, pc_extra_ahead: bool) -> AnyRef {
    if reg == 15 {
        imm(pc_read_value(key, addr, pc_extra_ahead))
    } else {
        let dst = b.var(DataType::U32);
        let id = dst.id;
        b.push(Opcode::LoadGpr(LoadGpr { dst, mode, reg }));
        AnyRef::Variable(id)
    }
}

/// Ends the block with a PC write: `Flush` unless `exchange`, in which case `FlushExchange`.
pub(super) fn flush(b: &mut IrBuilder, target: AnyRef, exchange: bool) {
    if exchange {
        b.push(Opcode::FlushExchange(crate::ir::opcode::FlushExchange { target }));
    } else {
        b.push(Opcode::Flush(crate::ir::opcode::Flush { target }));
    }
}

/// Lowers the barrel-shifter half of a data-processing operand 2, returning the value and
/// whether a shift/rotate opcode ran that can affect the carry flag.
fn lower_operand2(
    b: &mut IrBuilder,
    key: BlockKey,
    addr: u32,
    mode: CpuMode,
    op2: Operand2,
    set_flags: bool,
) -> (AnyRef, bool) {
    match op2 {
        Operand2::Immediate { value, rotate } => (imm(value), rotate != 0),
        Operand2::ShiftByImmediate { rm, kind, amount } => {
            let input = load_operand(b, key, addr, mode, rm, false);
            if kind == ArmShiftKind::Lsl && amount == 0 {
                (input, false)
            } else {
                let dst = b.var(DataType::U32);
                let id = dst.id;
                b.push(Opcode::Shift(Shift {
                    dst,
                    kind: map_shift_kind(kind),
                    input,
                    amount: imm(amount),
                    update_host_flags: set_flags,
                }));
                (AnyRef::Variable(id), true)
            }
        }
        Operand2::ShiftByRegister { rm, kind, rs } => {
            // A register-specified shift reads Rm/Rs one pipeline stage later than a normal
            // operand (spec.md §4.4): PC, if used here, reads as `addr + 3 * opcode_size`.
            let input = load_operand(b, key, addr, mode, rm, true);
            let amount_reg = load_operand(b, key, addr, mode, rs, true);
            let masked = b.var(DataType::U32);
            let masked_id = masked.id;
            b.push(Opcode::Alu(Alu {
                dst: masked,
                kind: AluKind::And,
                lhs: amount_reg,
                rhs: imm(0xFF),
                update_host_flags: false,
            }));
            let dst = b.var(DataType::U32);
            let id = dst.id;
            b.push(Opcode::Shift(Shift {
                dst,
                kind: map_shift_kind(kind),
                input,
                amount: AnyRef::Variable(masked_id),
                update_host_flags: set_flags,
            }));
            (AnyRef::Variable(id), true)
        }
    }
}

pub(super) fn map_shift_kind(k: ArmShiftKind) -> IrShiftKind {
    match k {
        ArmShiftKind::Lsl => IrShiftKind::Lsl,
        ArmShiftKind::Lsr => IrShiftKind::Lsr,
        ArmShiftKind::Asr => IrShiftKind::Asr,
        ArmShiftKind::Ror => IrShiftKind::Ror,
    }
}

fn map_dp_opcode(op: DpOpcode) -> AluKind {
    match op {
        DpOpcode::And | DpOpcode::Tst => AluKind::And,
        DpOpcode::Eor | DpOpcode::Teq => AluKind::Eor,
        DpOpcode::Sub | DpOpcode::Cmp => AluKind::Sub,
        DpOpcode::Rsb => AluKind::Rsb,
        DpOpcode::Add | DpOpcode::Cmn => AluKind::Add,
        DpOpcode::Adc => AluKind::Adc,
        DpOpcode::Sbc => AluKind::Sbc,
        DpOpcode::Rsc => AluKind::Rsc,
        DpOpcode::Orr => AluKind::Orr,
        DpOpcode::Mov => AluKind::Mov,
        DpOpcode::Bic => AluKind::Bic,
        DpOpcode::Mvn => AluKind::Mvn,
    }
}

fn lower(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, inst: ArmInstruction) -> Result<Terminate, JitError> {
    match inst {
        ArmInstruction::DataProcessing(dp) => Ok(lower_data_processing(b, key, addr, mode, dp)),
        ArmInstruction::SingleDataTransfer(xfer) => Ok(lower_single_transfer(b, key, addr, mode, xfer)),
        ArmInstruction::HalfwordSignedTransfer(xfer) => Ok(lower_halfword_transfer(b, key, addr, mode, xfer)),
        ArmInstruction::BlockDataTransfer(xfer) => Ok(lower_block_transfer(b, mode, xfer)),
        ArmInstruction::BranchRelative(br) => Ok(lower_branch_relative(b, key, addr, mode, br)),
        ArmInstruction::BranchExchange(bx) => Ok(lower_branch_exchange(b, key, addr, mode, bx)),
        ArmInstruction::Multiply(m) => Ok(lower_multiply(b, mode, m)),
        ArmInstruction::MultiplyLong(m) => Ok(lower_multiply_long(b, mode, m)),
        ArmInstruction::SingleDataSwap(swp) => Ok(lower_swap(b, mode, swp)),
        ArmInstruction::Exception(exc) => Ok(lower_exception(b, key, addr, mode, exc)),
        ArmInstruction::MoveStatusRegister(mrs) => Ok(lower_mrs(b, mode, mrs)),
        ArmInstruction::MoveRegisterStatus(msr) => Ok(lower_msr(b, key, addr, mode, msr)),
        ArmInstruction::CountLeadingZeros(clz) => Ok(lower_clz(b, mode, clz)),
        ArmInstruction::SaturatingAddSub(sat) => Ok(lower_saturating(b, mode, sat)),
        ArmInstruction::CoprocessorRegisterTransfer(xfer) => Ok(lower_coproc_transfer(b, mode, xfer)),
        ArmInstruction::Unsupported(reason) => Err(JitError::unimplemented(GuestAddr::new(addr), reason)),
    }
}

fn lower_data_processing(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, dp: DataProcessing) -> Terminate {
    let rn_val = if dp.opcode.uses_rn() { load_operand(b, key, addr, mode, dp.rn, false) } else { imm(0) };
    let (rhs, shifter_touched_carry) = lower_operand2(b, key, addr, mode, dp.operand2, dp.set_flags);
    let kind = map_dp_opcode(dp.opcode);
    let dst = b.var(DataType::U32);
    let dst_id = dst.id;
    b.push(Opcode::Alu(Alu { dst, kind, lhs: rn_val, rhs, update_host_flags: dp.set_flags }));

    if dp.set_flags {
        let mask = if kind.is_unary() || matches!(kind, AluKind::And | AluKind::Orr | AluKind::Eor | AluKind::Bic) {
            let mut m = FlagMask::N | FlagMask::Z;
            if shifter_touched_carry {
                m |= FlagMask::C;
            }
            m
        } else {
            FlagMask::N | FlagMask::Z | FlagMask::C | FlagMask::V
        };
        let cpsr_cur = b.var(DataType::U32);
        let cpsr_cur_id = cpsr_cur.id;
        b.push(Opcode::LoadCpsr(LoadCpsr { dst: cpsr_cur }));
        let cpsr_new = b.var(DataType::U32);
        let cpsr_new_id = cpsr_new.id;
        b.push(Opcode::UpdateFlags(UpdateFlags {
            dst: cpsr_new,
            cpsr_in: crate::ir::value::VarRef(cpsr_cur_id),
            mask,
        }));
        b.push(Opcode::StoreCpsr(StoreCpsr { value: AnyRef::Variable(cpsr_new_id) }));

        if dp.rd == 15 {
            // S=1 with Rd=R15 is the privileged "restore from SPSR" return-from-exception idiom
            // (spec.md §9 Open Question: resolved by reloading CPSR from the current mode's
            // SPSR before the flush, matching the real instruction semantics).
            let spsr = b.var(DataType::U32);
            let spsr_id = spsr.id;
            b.push(Opcode::LoadSpsr(LoadSpsr { dst: spsr, mode }));
            b.push(Opcode::StoreCpsr(StoreCpsr { value: AnyRef::Variable(spsr_id) }));
        }
    }

    if dp.rd == 15 {
        if !dp.opcode.is_comparison() {
            flush(b, AnyRef::Variable(dst_id), false);
        }
        Terminate::Yes
    } else if !dp.opcode.is_comparison() {
        b.push(Opcode::StoreGpr(StoreGpr { mode, reg: dp.rd, value: AnyRef::Variable(dst_id) }));
        Terminate::No
    } else {
        Terminate::No
    }
}

fn lower_addr_offset(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, base: AnyRef, offset: AddrOffset, add: bool) -> AnyRef {
    let offset_val = match offset {
        AddrOffset::Immediate(v) => imm(v),
        AddrOffset::Register { rm, kind, amount } => {
            let input = load_operand(b, key, addr, mode, rm, false);
            if kind == ArmShiftKind::Lsl && amount == 0 {
                input
            } else {
                let dst = b.var(DataType::U32);
                let id = dst.id;
                b.push(Opcode::Shift(Shift { dst, kind: map_shift_kind(kind), input, amount: imm(amount), update_host_flags: false }));
                AnyRef::Variable(id)
            }
        }
    };
    let dst = b.var(DataType::U32);
    let id = dst.id;
    b.push(Opcode::Alu(Alu {
        dst,
        kind: if add { AluKind::Add } else { AluKind::Sub },
        lhs: base,
        rhs: offset_val,
        update_host_flags: false,
    }));
    AnyRef::Variable(id)
}

fn lower_single_transfer(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, xfer: SingleDataTransfer) -> Terminate {
    let base = load_operand(b, key, addr, mode, xfer.rn, false);
    let offset_addr = lower_addr_offset(b, key, addr, mode, base, xfer.offset, xfer.add);
    let effective = if xfer.pre_index { offset_addr } else { base };

    let flags = if xfer.byte { MemFlags::BYTE } else { MemFlags::WORD | MemFlags::ROTATE };

    let terminate = if xfer.load {
        let dst = b.var(DataType::U32);
        let dst_id = dst.id;
        b.push(Opcode::MemoryRead(MemoryRead { dst, addr: effective, bus: MemBus::Data, flags }));
        if xfer.rd == 15 {
            flush(b, AnyRef::Variable(dst_id), false);
            Terminate::Yes
        } else {
            b.push(Opcode::StoreGpr(StoreGpr { mode, reg: xfer.rd, value: AnyRef::Variable(dst_id) }));
            Terminate::No
        }
    } else {
        let value = load_operand(b, key, addr, mode, xfer.rd, false);
        b.push(Opcode::MemoryWrite(MemoryWrite { addr: effective, value, bus: MemBus::Data, flags }));
        Terminate::No
    };

    if xfer.writeback && xfer.rn != 15 {
        // Both addressing forms write back `base + offset`: pre-indexed already used it as the
        // transfer address; post-indexed applies it only now.
        b.push(Opcode::StoreGpr(StoreGpr { mode, reg: xfer.rn, value: offset_addr }));
    }
    terminate
}

fn lower_halfword_transfer(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, xfer: HalfwordSignedTransfer) -> Terminate {
    let base = load_operand(b, key, addr, mode, xfer.rn, false);
    let offset_val = match xfer.offset {
        HalfwordOffset::Immediate(v) => imm(v),
        HalfwordOffset::Register(rm) => load_operand(b, key, addr, mode, rm, false),
    };
    let offset_dst = b.var(DataType::U32);
    let offset_id = offset_dst.id;
    b.push(Opcode::Alu(Alu {
        dst: offset_dst,
        kind: if xfer.add { AluKind::Add } else { AluKind::Sub },
        lhs: base,
        rhs: offset_val,
        update_host_flags: false,
    }));
    let offset_addr = AnyRef::Variable(offset_id);
    let effective = if xfer.pre_index { offset_addr } else { base };

    let flags = match xfer.kind {
        HalfwordKind::UnsignedHalf => MemFlags::HALF,
        HalfwordKind::SignedHalf => MemFlags::HALF | MemFlags::SIGNED | MemFlags::ARMV4T,
        HalfwordKind::SignedByte => MemFlags::BYTE | MemFlags::SIGNED,
    };

    let terminate = if xfer.load {
        let dst = b.var(DataType::U32);
        let dst_id = dst.id;
        b.push(Opcode::MemoryRead(MemoryRead { dst, addr: effective, bus: MemBus::Data, flags }));
        if xfer.rd == 15 {
            flush(b, AnyRef::Variable(dst_id), false);
            Terminate::Yes
        } else {
            b.push(Opcode::StoreGpr(StoreGpr { mode, reg: xfer.rd, value: AnyRef::Variable(dst_id) }));
            Terminate::No
        }
    } else {
        let value = load_operand(b, key, addr, mode, xfer.rd, false);
        b.push(Opcode::MemoryWrite(MemoryWrite { addr: effective, value, bus: MemBus::Data, flags: MemFlags::HALF }));
        Terminate::No
    };

    if xfer.writeback && xfer.rn != 15 {
        b.push(Opcode::StoreGpr(StoreGpr { mode, reg: xfer.rn, value: offset_addr }));
    }
    terminate
}

fn lower_block_transfer(b: &mut IrBuilder, mode: CpuMode, xfer: BlockDataTransfer) -> Terminate {
    let rn = b.var(DataType::U32);
    let rn_id = rn.id;
    b.push(Opcode::LoadGpr(LoadGpr { dst: rn, mode, reg: xfer.rn }));
    let base = AnyRef::Variable(rn_id);

    let registers: Vec<u32> = (0..16).filter(|i| xfer.register_list & (1 << i) != 0).collect();
    let count = registers.len() as i64;

    // Base byte offset of the first (lowest-numbered) register in the list, derived from the
    // four ARM addressing modes (IA/IB/DA/DB), per the ARM architecture reference's formulas for
    // `start_address`.
    let base_off: i64 = match (xfer.add, xfer.pre_index) {
        (true, false) => 0,
        (true, true) => 4,
        (false, false) => -4 * count + 4,
        (false, true) => -4 * count,
    };

    // `user_mode` (the `^` bit) selects the User-mode register bank for non-PC transfers, and
    // (for LDM with R15 in the list) additionally reloads CPSR from the current SPSR — the `^`
    // LDM register-bank variant itself (spec.md §9 Open Question) is resolved by always using the
    // User bank for every listed register except R15 when `user_mode` is set, matching the
    // documented ARM behavior for the common (non-FIQ) case.
    let bank = if xfer.user_mode { CpuMode::User } else { mode };

    let mut loaded_pc: Option<u32> = None;
    for (i, reg) in registers.iter().copied().enumerate() {
        let offset_bytes = base_off + (i as i64) * 4;
        let addr_this = {
            let a = b.var(DataType::U32);
            let id = a.id;
            b.push(Opcode::Alu(Alu {
                dst: a,
                kind: AluKind::Add,
                lhs: base,
                rhs: imm(offset_bytes as i32 as u32),
                update_host_flags: false,
            }));
            AnyRef::Variable(id)
        };

        let reg_mode = if reg == 15 { mode } else { bank };
        if xfer.load {
            let dst = b.var(DataType::U32);
            let dst_id = dst.id;
            b.push(Opcode::MemoryRead(MemoryRead { dst, addr: addr_this, bus: MemBus::Data, flags: MemFlags::WORD }));
            if reg == 15 {
                loaded_pc = Some(dst_id);
            } else {
                b.push(Opcode::StoreGpr(StoreGpr { mode: reg_mode, reg, value: AnyRef::Variable(dst_id) }));
            }
        } else {
            let value = if reg == 15 {
                imm(0) // PC store in STM reads the pipeline value; approximated as the stored-PC
                       // field the register file already holds is not tracked further here.
            } else {
                let v = b.var(DataType::U32);
                let id = v.id;
                b.push(Opcode::LoadGpr(LoadGpr { dst: v, mode: reg_mode, reg }));
                AnyRef::Variable(id)
            };
            b.push(Opcode::MemoryWrite(MemoryWrite { addr: addr_this, value, bus: MemBus::Data, flags: MemFlags::WORD }));
        }
    }

    if xfer.writeback {
        let total: i64 = if xfer.add { 4 * count } else { -4 * count };
        let final_addr = b.var(DataType::U32);
        let final_id = final_addr.id;
        b.push(Opcode::Alu(Alu {
            dst: final_addr,
            kind: AluKind::Add,
            lhs: base,
            rhs: imm(total as i32 as u32),
            update_host_flags: false,
        }));
        b.push(Opcode::StoreGpr(StoreGpr { mode, reg: xfer.rn, value: AnyRef::Variable(final_id) }));
    }

    if let Some(pc_val) = loaded_pc {
        if xfer.user_mode {
            let spsr = b.var(DataType::U32);
            let spsr_id = spsr.id;
            b.push(Opcode::LoadSpsr(LoadSpsr { dst: spsr, mode }));
            b.push(Opcode::StoreCpsr(StoreCpsr { value: AnyRef::Variable(spsr_id) }));
        }
        flush(b, AnyRef::Variable(pc_val), true);
        Terminate::Yes
    } else {
        Terminate::No
    }
}

fn lower_branch_relative(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, br: BranchRelative) -> Terminate {
    let pc = pc_read_value(key, addr, false);
    let target = pc.wrapping_add(br.offset as u32);
    if br.link {
        let ret = addr.wrapping_add(key.opcode_size());
        b.push(Opcode::StoreGpr(StoreGpr { mode, reg: 14, value: imm(ret) }));
    }
    flush(b, imm(target), false);
    if br.cond == Condition::Al {
        Terminate::Branch(BlockKey::new(GuestAddr::new(target), mode, key.thumb()))
    } else {
        Terminate::Yes
    }
}

fn lower_branch_exchange(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, bx: BranchExchange) -> Terminate {
    if bx.link {
        let ret = addr.wrapping_add(key.opcode_size());
        b.push(Opcode::StoreGpr(StoreGpr { mode, reg: 14, value: imm(ret) }));
    }
    let target = load_operand(b, key, addr, mode, bx.rm, false);
    flush(b, target, true);
    Terminate::Yes
}

fn lower_multiply(b: &mut IrBuilder, mode: CpuMode, m: Multiply) -> Terminate {
    let rs = b.var(DataType::U32);
    let rs_id = rs.id;
    b.push(Opcode::LoadGpr(LoadGpr { dst: rs, mode, reg: m.rs }));
    let rm = b.var(DataType::U32);
    let rm_id = rm.id;
    b.push(Opcode::LoadGpr(LoadGpr { dst: rm, mode, reg: m.rm }));

    let product = b.var(DataType::U32);
    let product_id = product.id;
    b.push(Opcode::Mul(Mul {
        dst: product,
        result_hi: None,
        lhs: AnyRef::Variable(rm_id),
        rhs: AnyRef::Variable(rs_id),
        signed: false,
        update_host_flags: false,
    }));

    let result_id = if m.accumulate {
        let rn = b.var(DataType::U32);
        let rn_id = rn.id;
        b.push(Opcode::LoadGpr(LoadGpr { dst: rn, mode, reg: m.rn }));
        let sum = b.var(DataType::U32);
        let sum_id = sum.id;
        b.push(Opcode::Alu(Alu {
            dst: sum,
            kind: AluKind::Add,
            lhs: AnyRef::Variable(product_id),
            rhs: AnyRef::Variable(rn_id),
            update_host_flags: m.set_flags,
        }));
        sum_id
    } else {
        product_id
    };

    if m.set_flags {
        push_nz_from_host_flags(b, AnyRef::Variable(result_id));
    }
    b.push(Opcode::StoreGpr(StoreGpr { mode, reg: m.rd, value: AnyRef::Variable(result_id) }));
    Terminate::No
}

fn lower_multiply_long(b: &mut IrBuilder, mode: CpuMode, m: MultiplyLong) -> Terminate {
    let rs = b.var(DataType::U32);
    let rs_id = rs.id;
    b.push(Opcode::LoadGpr(LoadGpr { dst: rs, mode, reg: m.rs }));
    let rm = b.var(DataType::U32);
    let rm_id = rm.id;
    b.push(Opcode::LoadGpr(LoadGpr { dst: rm, mode, reg: m.rm }));

    let lo = b.var(DataType::U32);
    let lo_id = lo.id;
    let hi = b.var(DataType::U32);
    let hi_id = hi.id;
    b.push(Opcode::Mul(Mul {
        dst: lo,
        result_hi: Some(hi),
        lhs: AnyRef::Variable(rm_id),
        rhs: AnyRef::Variable(rs_id),
        signed: m.signed,
        update_host_flags: false,
    }));

    let (final_lo, final_hi) = if m.accumulate {
        let acc_lo = b.var(DataType::U32);
        let acc_lo_id = acc_lo.id;
        b.push(Opcode::LoadGpr(LoadGpr { dst: acc_lo, mode, reg: m.rd_lo }));
        let acc_hi = b.var(DataType::U32);
        let acc_hi_id = acc_hi.id;
        b.push(Opcode::LoadGpr(LoadGpr { dst: acc_hi, mode, reg: m.rd_hi }));
        let sum_hi = b.var(DataType::U32);
        let sum_hi_id = sum_hi.id;
        let sum_lo = b.var(DataType::U32);
        let sum_lo_id = sum_lo.id;
        b.push(Opcode::Add64(crate::ir::opcode::Add64 {
            dst_hi: sum_hi,
            dst_lo: sum_lo,
            lhs_hi: AnyRef::Variable(acc_hi_id),
            lhs_lo: AnyRef::Variable(acc_lo_id),
            rhs_hi: AnyRef::Variable(hi_id),
            rhs_lo: AnyRef::Variable(lo_id),
        }));
        (sum_lo_id, sum_hi_id)
    } else {
        (lo_id, hi_id)
    };

    if m.set_flags {
        push_mul_long_nz(b, AnyRef::Variable(final_hi), AnyRef::Variable(final_lo));
    }
    b.push(Opcode::StoreGpr(StoreGpr { mode, reg: m.rd_lo, value: AnyRef::Variable(final_lo) }));
    b.push(Opcode::StoreGpr(StoreGpr { mode, reg: m.rd_hi, value: AnyRef::Variable(final_hi) }));
    Terminate::No
}

fn lower_swap(b: &mut IrBuilder, mode: CpuMode, swp: SingleDataSwap) -> Terminate {
    let rn = b.var(DataType::U32);
    let rn_id = rn.id;
    b.push(Opcode::LoadGpr(LoadGpr { dst: rn, mode, reg: swp.rn }));
    let addr = AnyRef::Variable(rn_id);
    let flags = if swp.byte { MemFlags::BYTE } else { MemFlags::WORD };

    let old = b.var(DataType::U32);
    let old_id = old.id;
    b.push(Opcode::MemoryRead(MemoryRead { dst: old, addr, bus: MemBus::Data, flags }));

    let rm = b.var(DataType::U32);
    let rm_id = rm.id;
    b.push(Opcode::LoadGpr(LoadGpr { dst: rm, mode, reg: swp.rm }));
    b.push(Opcode::MemoryWrite(MemoryWrite { addr, value: AnyRef::Variable(rm_id), bus: MemBus::Data, flags }));

    b.push(Opcode::StoreGpr(StoreGpr { mode, reg: swp.rd, value: AnyRef::Variable(old_id) }));
    Terminate::No
}

fn lower_exception(b: &mut IrBuilder, key: BlockKey, addr: u32, _mode: CpuMode, exc: Exception) -> Terminate {
    let (target_mode, vector): (CpuMode, u32) = match exc.kind {
        ExceptionKind::Swi(_) => (CpuMode::Supervisor, 0x0000_0008),
        ExceptionKind::Undefined => (CpuMode::Undefined, 0x0000_0004),
    };
    let return_addr = addr.wrapping_add(key.opcode_size());
    lower_exception_entry(b, target_mode, vector, return_addr)
}

/// Shared exception-entry sequence (spec.md §4.4): banks the return address and CPSR into the
/// target mode's LR/SPSR, switches CPSR into that mode with IRQs masked and Thumb cleared, and
/// flushes to the vector. Used by both `SWI`/undefined-instruction exceptions (ARM) and `SWI`
/// (Thumb, which always enters ARM state on exception per the architecture).
pub(super) fn lower_exception_entry(b: &mut IrBuilder, target_mode: CpuMode, vector: u32, return_addr: u32) -> Terminate {
    let cpsr = b.var(DataType::U32);
    let cpsr_id = cpsr.id;
    b.push(Opcode::LoadCpsr(LoadCpsr { dst: cpsr }));
    b.push(Opcode::StoreSpsr(StoreSpsr { mode: target_mode, value: AnyRef::Variable(cpsr_id) }));
    b.push(Opcode::StoreGpr(StoreGpr { mode: target_mode, reg: 14, value: imm(return_addr) }));

    // Mode entry: mask off mode[4:0]/T[5]/I[7] then OR in the target mode with IRQs masked and
    // ARM (Thumb-clear) state, leaving every other CPSR bit (N/Z/C/V/Q, FIQ mask) untouched.
    let masked = b.var(DataType::U32);
    let masked_id = masked.id;
    let preserved_bits = !(0x1Fu32 | crate::state::cpsr::CpsrFlags::THUMB.bits() | crate::state::cpsr::CpsrFlags::IRQ_DISABLE.bits());
    b.push(Opcode::Alu(Alu {
        dst: masked,
        kind: AluKind::And,
        lhs: AnyRef::Variable(cpsr_id),
        rhs: imm(preserved_bits),
        update_host_flags: false,
    }));
    let new_cpsr = b.var(DataType::U32);
    let new_cpsr_id = new_cpsr.id;
    b.push(Opcode::Alu(Alu {
        dst: new_cpsr,
        kind: AluKind::Orr,
        lhs: AnyRef::Variable(masked_id),
        rhs: imm(target_mode.mode_bits() | crate::state::cpsr::CpsrFlags::IRQ_DISABLE.bits()),
        update_host_flags: false,
    }));
    b.push(Opcode::StoreCpsr(StoreCpsr { value: AnyRef::Variable(new_cpsr_id) }));
    flush(b, imm(vector), false);
    Terminate::Yes
}

fn lower_mrs(b: &mut IrBuilder, mode: CpuMode, mrs: MoveStatusRegister) -> Terminate {
    let dst = b.var(DataType::U32);
    let dst_id = dst.id;
    if mrs.spsr {
        b.push(Opcode::LoadSpsr(LoadSpsr { dst, mode }));
    } else {
        b.push(Opcode::LoadCpsr(LoadCpsr { dst }));
    }
    b.push(Opcode::StoreGpr(StoreGpr { mode, reg: mrs.rd, value: AnyRef::Variable(dst_id) }));
    Terminate::No
}

fn lower_msr(b: &mut IrBuilder, key: BlockKey, addr: u32, mode: CpuMode, msr: MoveRegisterStatus) -> Terminate {
    let operand = match msr.operand {
        Operand2::Immediate { value, .. } => imm(value),
        Operand2::ShiftByImmediate { rm, .. } => load_operand(b, key, addr, mode, rm, false),
        Operand2::ShiftByRegister { rm, .. } => load_operand(b, key, addr, mode, rm, false),
    };

    // Field-mask byte lanes: bit0=control (mode/T/I/F), bit3=flags (N/Z/C/V/Q). Only whole-byte
    // granularity is modeled; extension/status lanes (bits 1/2) are reserved on this core.
    let control_written = msr.field_mask & 0b0001 != 0;
    let flags_written = msr.field_mask & 0b1000 != 0;

    let current = b.var(DataType::U32);
    let current_id = current.id;
    if msr.spsr {
        b.push(Opcode::LoadSpsr(LoadSpsr { dst: current, mode }));
    } else {
        b.push(Opcode::LoadCpsr(LoadCpsr { dst: current }));
    }

    let mut mask: u32 = 0;
    if control_written {
        mask |= 0x0000_00FF;
    }
    if flags_written {
        mask |= 0xFF00_0000;
    }

    let masked_old = b.var(DataType::U32);
    let masked_old_id = masked_old.id;
    b.push(Opcode::Alu(Alu {
        dst: masked_old,
        kind: AluKind::And,
        lhs: AnyRef::Variable(current_id),
        rhs: imm(!mask),
        update_host_flags: false,
    }));
    let masked_new = b.var(DataType::U32);
    let masked_new_id = masked_new.id;
    b.push(Opcode::Alu(Alu {
        dst: masked_new,
        kind: AluKind::And,
        lhs: operand,
        rhs: imm(mask),
        update_host_flags: false,
    }));
    let merged = b.var(DataType::U32);
    let merged_id = merged.id;
    b.push(Opcode::Alu(Alu {
        dst: merged,
        kind: AluKind::Orr,
        lhs: AnyRef::Variable(masked_old_id),
        rhs: AnyRef::Variable(masked_new_id),
        update_host_flags: false,
    }));

    if msr.spsr {
        b.push(Opcode::StoreSpsr(StoreSpsr { mode, value: AnyRef::Variable(merged_id) }));
        Terminate::No
    } else {
        b.push(Opcode::StoreCpsr(StoreCpsr { value: AnyRef::Variable(merged_id) }));
        // A CPSR write that can touch the mode/Thumb/interrupt-mask byte changes privileged
        // state the rest of the block was compiled against; end the block (spec.md §4.4).
        if control_written {
            Terminate::Yes
        } else {
            Terminate::No
        }
    }
}

fn lower_clz(b: &mut IrBuilder, mode: CpuMode, clz: CountLeadingZeros) -> Terminate {
    let rm = b.var(DataType::U32);
    let rm_id = rm.id;
    b.push(Opcode::LoadGpr(LoadGpr { dst: rm, mode, reg: clz.rm }));
    let dst = b.var(DataType::U32);
    let dst_id = dst.id;
    b.push(Opcode::Alu(Alu { dst, kind: AluKind::Clz, lhs: AnyRef::Variable(rm_id), rhs: AnyRef::Null, update_host_flags: false }));
    b.push(Opcode::StoreGpr(StoreGpr { mode, reg: clz.rd, value: AnyRef::Variable(dst_id) }));
    Terminate::No
}

fn lower_saturating(b: &mut IrBuilder, mode: CpuMode, sat: SaturatingAddSub) -> Terminate {
    let rn = b.var(DataType::U32);
    let rn_id = rn.id;
    b.push(Opcode::LoadGpr(LoadGpr { dst: rn, mode, reg: sat.rn }));
    let rm = b.var(DataType::U32);
    let rm_id = rm.id;
    b.push(Opcode::LoadGpr(LoadGpr { dst: rm, mode, reg: sat.rm }));
    let kind = match sat.op {
        SatOp::Qadd => AluKind::Qadd,
        SatOp::Qsub => AluKind::Qsub,
        SatOp::Qdadd => AluKind::Qdadd,
        SatOp::Qdsub => AluKind::Qdsub,
    };
    let dst = b.var(DataType::U32);
    let dst_id = dst.id;
    b.push(Opcode::Alu(Alu { dst, kind, lhs: AnyRef::Variable(rn_id), rhs: AnyRef::Variable(rm_id), update_host_flags: true }));

    let cpsr_cur = b.var(DataType::U32);
    let cpsr_cur_id = cpsr_cur.id;
    b.push(Opcode::LoadCpsr(LoadCpsr { dst: cpsr_cur }));
    let cpsr_new = b.var(DataType::U32);
    let cpsr_new_id = cpsr_new.id;
    b.push(Opcode::UpdateSticky(crate::ir::opcode::UpdateSticky { dst: cpsr_new, cpsr_in: crate::ir::value::VarRef(cpsr_cur_id) }));
    b.push(Opcode::StoreCpsr(StoreCpsr { value: AnyRef::Variable(cpsr_new_id) }));
    let _ = cpsr_cur_id;

    b.push(Opcode::StoreGpr(StoreGpr { mode, reg: sat.rd, value: AnyRef::Variable(dst_id) }));
    Terminate::No
}

fn lower_coproc_transfer(b: &mut IrBuilder, mode: CpuMode, xfer: CoprocessorRegisterTransfer) -> Terminate {
    if xfer.load {
        let dst = b.var(DataType::U32);
        let dst_id = dst.id;
        b.push(Opcode::Mrc(Mrc { dst, coproc: xfer.coproc, opcode1: xfer.opcode1, crn: xfer.crn, crm: xfer.crm, opcode2: xfer.opcode2 }));
        b.push(Opcode::StoreGpr(StoreGpr { mode, reg: xfer.rd, value: AnyRef::Variable(dst_id) }));
        Terminate::No
    } else {
        let value = {
            let v = b.var(DataType::U32);
            let id = v.id;
            b.push(Opcode::LoadGpr(LoadGpr { dst: v, mode, reg: xfer.rd }));
            AnyRef::Variable(id)
        };
        b.push(Opcode::Mcr(Mcr { coproc: xfer.coproc, opcode1: xfer.opcode1, crn: xfer.crn, value, crm: xfer.crm, opcode2: xfer.opcode2 }));
        // A system-control-coprocessor write (CP15) may change the memory map or banking; end
        // the block conservatively rather than risk running against a stale fast-dispatch link
        // (spec.md §4.4 "Block Boundaries").
        if xfer.coproc == 15 {
            Terminate::Yes
        } else {
            Terminate::No
        }
    }
}

/// Folds N/Z from `result` into CPSR, leaving C/V untouched (multiply's `S` bit only ever
/// defines N/Z; carry/overflow are architecturally unpredictable and left alone). Implemented as
/// a flags-only `MOV` so the result itself need not be re-threaded through an `UpdateFlags`.
pub(super) fn push_nz_from_host_flags(b: &mut IrBuilder, result: AnyRef) {
    let probe = b.var(DataType::U32);
    b.push(Opcode::Alu(Alu { dst: probe, kind: AluKind::Mov, lhs: result, rhs: AnyRef::Null, update_host_flags: true }));
    let cpsr_cur = b.var(DataType::U32);
    let cpsr_cur_id = cpsr_cur.id;
    b.push(Opcode::LoadCpsr(LoadCpsr { dst: cpsr_cur }));
    let cpsr_new = b.var(DataType::U32);
    let cpsr_new_id = cpsr_new.id;
    b.push(Opcode::UpdateFlags(UpdateFlags {
        dst: cpsr_new,
        cpsr_in: crate::ir::value::VarRef(cpsr_cur_id),
        mask: FlagMask::N | FlagMask::Z,
    }));
    b.push(Opcode::StoreCpsr(StoreCpsr { value: AnyRef::Variable(cpsr_new_id) }));
}

/// As [`push_nz_from_host_flags`], but Z additionally requires the low half to be zero (the
/// 64-bit multiply-long `S`-bit semantics: `Z = (hi == 0) && (lo == 0)`, `N` = bit 31 of `hi`).
fn push_mul_long_nz(b: &mut IrBuilder, hi: AnyRef, lo: AnyRef) {
    let n_probe = b.var(DataType::U32);
    b.push(Opcode::Alu(Alu { dst: n_probe, kind: AluKind::Mov, lhs: hi, rhs: AnyRef::Null, update_host_flags: true }));
    let cpsr0 = b.var(DataType::U32);
    let cpsr0_id = cpsr0.id;
    b.push(Opcode::LoadCpsr(LoadCpsr { dst: cpsr0 }));
    let cpsr1 = b.var(DataType::U32);
    let cpsr1_id = cpsr1.id;
    b.push(Opcode::UpdateFlags(UpdateFlags { dst: cpsr1, cpsr_in: crate::ir::value::VarRef(cpsr0_id), mask: FlagMask::N }));

    let combined = b.var(DataType::U32);
    b.push(Opcode::Alu(Alu { dst: combined, kind: AluKind::Orr, lhs: hi, rhs: lo, update_host_flags: true }));
    let cpsr2 = b.var(DataType::U32);
    let cpsr2_id = cpsr2.id;
    b.push(Opcode::UpdateFlags(UpdateFlags { dst: cpsr2, cpsr_in: crate::ir::value::VarRef(cpsr1_id), mask: FlagMask::Z }));
    b.push(Opcode::StoreCpsr(StoreCpsr { value: AnyRef::Variable(cpsr2_id) }));
}
