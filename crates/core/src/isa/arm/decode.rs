//! ARM (32-bit encoding) instruction decoder.
//!
//! Dispatch follows the standard ARM top-level split on bits 27:25, with a secondary split inside
//! the `000` ("data processing and miscellaneous") space per the ARM architecture reference.

use super::instruction::*;
use crate::isa::condition::Condition;

/// Decodes one ARM instruction word.
pub fn decode(inst: u32) -> ArmInstruction {
    let cond = inst.cond();
    match (inst >> 25) & 0x7 {
        0b000 => decode_000_space(inst, cond),
        0b001 => decode_001_space(inst, cond),
        0b010 => decode_single_transfer(inst, cond, false),
        0b011 => {
            if (inst >> 4) & 1 == 1 {
                ArmInstruction::Unsupported("media/undefined instruction space")
            } else {
                decode_single_transfer(inst, cond, true)
            }
        }
        0b100 => decode_block_transfer(inst, cond),
        0b101 => decode_branch(inst, cond),
        0b110 => ArmInstruction::Unsupported("coprocessor data transfer (LDC/STC)"),
        _ => decode_111_space(inst, cond),
    }
}

fn decode_000_space(inst: u32, cond: Condition) -> ArmInstruction {
    let bits7_4 = (inst >> 4) & 0xF;
    if bits7_4 == 0b1001 {
        if (inst >> 23) & 0x1F == 0b0001_0 && (inst >> 20) & 0x3 == 0b00 {
            return decode_swap(inst, cond);
        }
        return decode_multiply(inst, cond);
    }
    let bit7 = (inst >> 7) & 1;
    let bit4 = (inst >> 4) & 1;
    if bit7 == 1 && bit4 == 1 {
        let sh = (inst >> 5) & 0x3;
        if sh != 0 {
            return decode_halfword_transfer(inst, cond);
        }
        return ArmInstruction::Unsupported("signed-multiply (SMLAxy family)");
    }
    let bits24_23 = (inst >> 23) & 0x3;
    let s = (inst >> 20) & 1;
    if bits24_23 == 0b10 && s == 0 {
        return decode_misc(inst, cond);
    }
    decode_data_processing(inst, cond, false)
}

fn decode_001_space(inst: u32, cond: Condition) -> ArmInstruction {
    let bits24_23 = (inst >> 23) & 0x3;
    let s = (inst >> 20) & 1;
    if bits24_23 == 0b10 && s == 0 {
        let spsr = inst.bit22();
        let field_mask = ((inst >> 16) & 0xF) as u8;
        let operand = decode_operand2(inst, true);
        return ArmInstruction::MoveRegisterStatus(MoveRegisterStatus { cond, spsr, operand, field_mask });
    }
    decode_data_processing(inst, cond, true)
}

fn decode_data_processing(inst: u32, cond: Condition, immediate: bool) -> ArmInstruction {
    let opcode = DpOpcode::from_bits(inst >> 21);
    let set_flags = inst.bit20();
    let operand2 = decode_operand2(inst, immediate);
    ArmInstruction::DataProcessing(DataProcessing {
        cond,
        opcode,
        set_flags,
        rd: inst.rd(),
        rn: inst.rn(),
        operand2,
    })
}

fn decode_misc(inst: u32, cond: Condition) -> ArmInstruction {
    let bits7_4 = (inst >> 4) & 0xF;
    let bits21_20 = (inst >> 20) & 0x3;
    match bits7_4 {
        0b0000 if bits21_20 == 0b00 => {
            ArmInstruction::MoveStatusRegister(MoveStatusRegister { cond, spsr: inst.bit22(), rd: inst.rd() })
        }
        0b0000 if bits21_20 == 0b10 => {
            let field_mask = ((inst >> 16) & 0xF) as u8;
            ArmInstruction::MoveRegisterStatus(MoveRegisterStatus {
                cond,
                spsr: inst.bit22(),
                operand: Operand2::ShiftByImmediate { rm: inst.rm(), kind: ShiftKind::Lsl, amount: 0 },
                field_mask,
            })
        }
        0b0001 if bits21_20 == 0b01 => ArmInstruction::BranchExchange(BranchExchange { cond, rm: inst.rm(), link: false }),
        0b0001 if bits21_20 == 0b11 => {
            ArmInstruction::CountLeadingZeros(CountLeadingZeros { cond, rd: inst.rd(), rm: inst.rm() })
        }
        0b0011 if bits21_20 == 0b01 => ArmInstruction::BranchExchange(BranchExchange { cond, rm: inst.rm(), link: true }),
        0b0101 => {
            let op = match (inst >> 21) & 0x3 {
                0b00 => SatOp::Qadd,
                0b01 => SatOp::Qsub,
                0b10 => SatOp::Qdadd,
                _ => SatOp::Qdsub,
            };
            ArmInstruction::SaturatingAddSub(SaturatingAddSub { cond, op, rd: inst.rd(), rn: inst.rn(), rm: inst.rm() })
        }
        0b0111 => ArmInstruction::Unsupported("BKPT"),
        _ => ArmInstruction::Unsupported("miscellaneous encoding"),
    }
}

fn decode_multiply(inst: u32, cond: Condition) -> ArmInstruction {
    let is_long = (inst >> 23) & 1 == 1;
    if is_long {
        ArmInstruction::MultiplyLong(MultiplyLong {
            cond,
            signed: inst.bit22(),
            accumulate: inst.bit21(),
            set_flags: inst.bit20(),
            rd_hi: inst.rd(),
            rd_lo: inst.rn(),
            rs: inst.rs(),
            rm: inst.rm(),
        })
    } else {
        ArmInstruction::Multiply(Multiply {
            cond,
            accumulate: inst.bit21(),
            set_flags: inst.bit20(),
            rd: inst.rn(),
            rn: inst.rd(),
            rs: inst.rs(),
            rm: inst.rm(),
        })
    }
}

fn decode_swap(inst: u32, cond: Condition) -> ArmInstruction {
    ArmInstruction::SingleDataSwap(SingleDataSwap {
        cond,
        byte: inst.bit22(),
        rn: inst.rn(),
        rd: inst.rd(),
        rm: inst.rm(),
    })
}

fn decode_halfword_transfer(inst: u32, cond: Condition) -> ArmInstruction {
    let sh = (inst >> 5) & 0x3;
    let kind = match sh {
        0b01 => HalfwordKind::UnsignedHalf,
        0b10 => HalfwordKind::SignedByte,
        _ => HalfwordKind::SignedHalf,
    };
    let immediate_form = inst.bit22();
    let offset = if immediate_form {
        let hi = (inst >> 8) & 0xF;
        let lo = inst & 0xF;
        HalfwordOffset::Immediate((hi << 4) | lo)
    } else {
        HalfwordOffset::Register(inst.rm())
    };
    ArmInstruction::HalfwordSignedTransfer(HalfwordSignedTransfer {
        cond,
        load: inst.bit20(),
        pre_index: inst.bit24(),
        add: inst.bit23(),
        writeback: inst.bit21() || !inst.bit24(),
        rd: inst.rd(),
        rn: inst.rn(),
        offset,
        kind,
    })
}

fn decode_single_transfer(inst: u32, cond: Condition, register_offset: bool) -> ArmInstruction {
    let pre_index = inst.bit24();
    let writeback_bit = inst.bit21();
    // Post-indexed transfers always write back; the `T` (unprivileged) variant is post-indexed
    // with W=1, which this decoder does not distinguish from plain write-back (spec.md §9:
    // LDRT/STRT are reported unimplemented by the translator, not silently downgraded here).
    if !pre_index && writeback_bit {
        return ArmInstruction::Unsupported("LDRT/STRT (unprivileged access)");
    }
    let offset = if register_offset {
        let kind = ShiftKind::from_bits(inst >> 5);
        let amount = (inst >> 7) & 0x1F;
        AddrOffset::Register { rm: inst.rm(), kind, amount }
    } else {
        AddrOffset::Immediate(inst & 0xFFF)
    };
    ArmInstruction::SingleDataTransfer(SingleDataTransfer {
        cond,
        byte: inst.bit22(),
        load: inst.bit20(),
        pre_index,
        add: inst.bit23(),
        writeback: writeback_bit || !pre_index,
        rd: inst.rd(),
        rn: inst.rn(),
        offset,
    })
}

fn decode_block_transfer(inst: u32, cond: Condition) -> ArmInstruction {
    ArmInstruction::BlockDataTransfer(BlockDataTransfer {
        cond,
        load: inst.bit20(),
        pre_index: inst.bit24(),
        add: inst.bit23(),
        writeback: inst.bit21(),
        user_mode: inst.bit22(),
        rn: inst.rn(),
        register_list: (inst & 0xFFFF) as u16,
    })
}

fn decode_branch(inst: u32, cond: Condition) -> ArmInstruction {
    let raw24 = inst & 0x00FF_FFFF;
    let signed = ((raw24 as i32) << 8) >> 8;
    let offset = signed << 2;
    ArmInstruction::BranchRelative(BranchRelative { cond, link: inst.bit24(), offset })
}

fn decode_111_space(inst: u32, cond: Condition) -> ArmInstruction {
    if inst.bit24() {
        return ArmInstruction::Exception(Exception { cond, kind: ExceptionKind::Swi(inst & 0x00FF_FFFF) });
    }
    if (inst >> 4) & 1 == 1 {
        ArmInstruction::CoprocessorRegisterTransfer(CoprocessorRegisterTransfer {
            cond,
            load: inst.bit20(),
            coproc: (inst >> 8) & 0xF,
            opcode1: (inst >> 21) & 0x7,
            crn: inst.rn(),
            rd: inst.rd(),
            crm: inst.rm(),
            opcode2: (inst >> 5) & 0x7,
        })
    } else {
        ArmInstruction::Unsupported("coprocessor data processing (CDP)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mov_r0_imm_decodes() {
        // MOVAL r0, #1 : cond=AL(1110) 00 I=1 opcode=1101(MOV) S=0 Rn=0000 Rd=0000 rot=0000 imm8=00000001
        let inst = 0xE3A0_0001;
        match decode(inst) {
            ArmInstruction::DataProcessing(dp) => {
                assert_eq!(dp.opcode, DpOpcode::Mov);
                assert_eq!(dp.rd, 0);
                assert!(!dp.set_flags);
                assert_eq!(dp.operand2, Operand2::Immediate { value: 1, rotate: 0 });
            }
            other => panic!("expected DataProcessing, got {other:?}"),
        }
    }

    #[test]
    fn add_s_sets_flags_and_uses_rn() {
        // ADDS r1, r2, r3: cond=AL I=0 opcode=0100(ADD) S=1 Rn=2 Rd=1 shift=0 Rm=3
        let inst = 0xE092_1003;
        match decode(inst) {
            ArmInstruction::DataProcessing(dp) => {
                assert_eq!(dp.opcode, DpOpcode::Add);
                assert!(dp.set_flags);
                assert_eq!(dp.rn, 2);
                assert_eq!(dp.rd, 1);
                assert_eq!(dp.operand2, Operand2::ShiftByImmediate { rm: 3, kind: ShiftKind::Lsl, amount: 0 });
            }
            other => panic!("expected DataProcessing, got {other:?}"),
        }
    }

    #[test]
    fn ldr_immediate_offset_pre_indexed() {
        // LDR r0, [r1, #4]: cond=AL 010 P=1 U=1 B=0 W=0 L=1 Rn=1 Rd=0 imm12=4
        let inst = 0xE591_0004;
        match decode(inst) {
            ArmInstruction::SingleDataTransfer(t) => {
                assert!(t.load);
                assert!(!t.byte);
                assert!(t.pre_index);
                assert!(t.add);
                assert!(!t.writeback);
                assert_eq!(t.rn, 1);
                assert_eq!(t.rd, 0);
                assert_eq!(t.offset, AddrOffset::Immediate(4));
            }
            other => panic!("expected SingleDataTransfer, got {other:?}"),
        }
    }

    #[test]
    fn strt_reported_unsupported() {
        // STR r0, [r1], #4 with W=1 (post-indexed already writes back; P=0,W=1 => T-variant)
        let inst = 0xE4A1_0004;
        assert!(matches!(decode(inst), ArmInstruction::Unsupported(_)));
    }

    #[test]
    fn branch_link_sign_extends_backward_offset() {
        // BL with a negative 24-bit offset field.
        let inst = 0xEBFF_FFFE; // offset field = 0xFFFFFE -> -2 words -> -8 bytes
        match decode(inst) {
            ArmInstruction::BranchRelative(b) => {
                assert!(b.link);
                assert_eq!(b.offset, -8);
            }
            other => panic!("expected BranchRelative, got {other:?}"),
        }
    }

    #[test]
    fn swi_extracts_comment_field() {
        let inst = 0xEF00_1234;
        match decode(inst) {
            ArmInstruction::Exception(e) => assert_eq!(e.kind, ExceptionKind::Swi(0x0012_34)),
            other => panic!("expected Exception, got {other:?}"),
        }
    }

    #[test]
    fn bx_decodes_target_register() {
        let inst = 0xE12F_FF11; // BX r1
        match decode(inst) {
            ArmInstruction::BranchExchange(b) => {
                assert_eq!(b.rm, 1);
                assert!(!b.link);
            }
            other => panic!("expected BranchExchange, got {other:?}"),
        }
    }

    #[test]
    fn ldm_decodes_register_list() {
        // LDMIA r13!, {r0,r1,r4}: cond=AL 100 P=0 U=1 S=0 W=1 L=1 Rn=13 list=0b10011
        let inst = 0xE8BD_0013;
        match decode(inst) {
            ArmInstruction::BlockDataTransfer(b) => {
                assert!(b.load);
                assert!(b.add);
                assert!(b.writeback);
                assert!(!b.pre_index);
                assert_eq!(b.rn, 13);
                assert_eq!(b.register_list, 0b10011);
            }
            other => panic!("expected BlockDataTransfer, got {other:?}"),
        }
    }
}
