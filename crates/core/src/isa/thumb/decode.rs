//! Thumb (16-bit encoding) instruction decoder.
//!
//! Dispatch walks the classic nineteen Thumb instruction formats from the high bits down,
//! narrowing the match as each format's discriminator bits are checked.

use super::instruction::*;
use crate::isa::arm::instruction::ShiftKind;
use crate::isa::condition::Condition;

/// Decodes one Thumb instruction halfword.
pub fn decode(inst: u16) -> ThumbInstruction {
    let inst = inst as u32;
    let top5 = (inst >> 11) & 0x1F;
    let top6 = (inst >> 10) & 0x3F;
    let top4 = (inst >> 12) & 0xF;

    match top4 {
        0b0000 | 0b0001 => {
            return if top5 == 0b00011 { decode_add_subtract(inst) } else { decode_shift_immediate(inst) };
        }
        0b0010 | 0b0011 => return decode_immediate_alu(inst),
        0b0100 => {
            return match top6 {
                0b010000 => decode_alu_register(inst),
                0b010001 => decode_hi_register(inst),
                _ => {
                    let rd = (inst >> 8) & 0x7;
                    let imm8 = inst & 0xFF;
                    ThumbInstruction::PcRelativeLoad(PcRelativeLoad { rd, offset: imm8 << 2 })
                }
            };
        }
        0b0101 => return decode_reg_offset_transfer(inst),
        0b0110 | 0b0111 => return decode_imm_offset_word_or_byte(inst),
        0b1000 => return decode_imm_offset_half(inst),
        0b1001 => {
            let load = (inst >> 11) & 1 != 0;
            let rd = (inst >> 8) & 0x7;
            let imm8 = inst & 0xFF;
            return ThumbInstruction::SpRelativeTransfer(SpRelativeTransfer { load, rd, offset: imm8 << 2 });
        }
        0b1010 => {
            let from_sp = (inst >> 11) & 1 != 0;
            let rd = (inst >> 8) & 0x7;
            let imm8 = inst & 0xFF;
            return ThumbInstruction::LoadAddress(LoadAddress { from_sp, rd, offset: imm8 << 2 });
        }
        0b1011 => {
            let bits11_9 = (inst >> 9) & 0x7;
            return match bits11_9 {
                0b000 => decode_adjust_sp(inst),
                0b010 | 0b110 => decode_push_pop(inst),
                _ => ThumbInstruction::Unsupported("reserved 1011-prefixed encoding"),
            };
        }
        0b1100 => return decode_block_transfer(inst),
        0b1101 => return decode_branch16_or_swi(inst),
        0b1110 => {
            return ThumbInstruction::UnconditionalBranch(UnconditionalBranch { offset: sign_extend_branch11(inst) })
        }
        0b1111 => {
            return ThumbInstruction::BranchLinkHalf(BranchLinkHalf {
                low_half: (inst >> 11) & 1 == 1,
                bits11: inst & 0x7FF,
            })
        }
        _ => {}
    }

    ThumbInstruction::Unsupported("unrecognized Thumb encoding")
}

fn decode_shift_immediate(inst: u32) -> ThumbInstruction {
    let op = (inst >> 11) & 0x3;
    let kind = match op {
        0 => ShiftKind::Lsl,
        1 => ShiftKind::Lsr,
        _ => ShiftKind::Asr,
    };
    let amount = (inst >> 6) & 0x1F;
    let rs = (inst >> 3) & 0x7;
    let rd = inst & 0x7;
    ThumbInstruction::ShiftImmediate(ShiftImmediate { kind, amount, rs, rd })
}

fn decode_add_subtract(inst: u32) -> ThumbInstruction {
    let is_immediate = (inst >> 10) & 1 == 1;
    let subtract = (inst >> 9) & 1 == 1;
    let operand = (inst >> 6) & 0x7;
    let rs = (inst >> 3) & 0x7;
    let rd = inst & 0x7;
    ThumbInstruction::AddSubtract(AddSubtract {
        subtract,
        immediate: is_immediate.then_some(operand),
        rn: operand,
        rs,
        rd,
    })
}

fn decode_immediate_alu(inst: u32) -> ThumbInstruction {
    let op = match (inst >> 11) & 0x3 {
        0 => ImmediateOp::Mov,
        1 => ImmediateOp::Cmp,
        2 => ImmediateOp::Add,
        _ => ImmediateOp::Sub,
    };
    let rd = (inst >> 8) & 0x7;
    let imm8 = inst & 0xFF;
    ThumbInstruction::ImmediateAlu(ImmediateAlu { op, rd, imm8 })
}

fn decode_alu_register(inst: u32) -> ThumbInstruction {
    let op = AluOp::from_bits(inst >> 6);
    let rs = (inst >> 3) & 0x7;
    let rd = inst & 0x7;
    ThumbInstruction::AluRegister(AluRegister { op, rs, rd })
}

fn decode_hi_register(inst: u32) -> ThumbInstruction {
    let op_bits = (inst >> 8) & 0x3;
    let h1 = (inst >> 7) & 1;
    let h2 = (inst >> 6) & 1;
    let rs = ((h2 << 3) | ((inst >> 3) & 0x7)) as u32;
    let rd = ((h1 << 3) | (inst & 0x7)) as u32;
    match op_bits {
        0b00 => ThumbInstruction::HiRegisterOp(HiRegisterOp { op: HiRegOp::Add, rs, rd }),
        0b01 => ThumbInstruction::HiRegisterOp(HiRegisterOp { op: HiRegOp::Cmp, rs, rd }),
        0b10 => ThumbInstruction::HiRegisterOp(HiRegisterOp { op: HiRegOp::Mov, rs, rd }),
        _ => ThumbInstruction::BranchExchange(BranchExchange { rm: rs }),
    }
}

fn decode_reg_offset_transfer(inst: u32) -> ThumbInstruction {
    let ro = (inst >> 6) & 0x7;
    let rb = (inst >> 3) & 0x7;
    let rd = inst & 0x7;
    let bit9 = (inst >> 9) & 1;
    let kind = if bit9 == 0 {
        // Format 7: L,B select among store-word/store-byte/load-word/load-byte.
        let l = (inst >> 11) & 1;
        let b = (inst >> 10) & 1;
        match (l, b) {
            (0, 0) => RegOffsetKind::StrWord,
            (0, 1) => RegOffsetKind::StrByte,
            (1, 0) => RegOffsetKind::LdrWord,
            _ => RegOffsetKind::LdrByte,
        }
    } else {
        // Format 8: H,S select among store-halfword/load-sign-extended-byte/
        // load-halfword/load-sign-extended-halfword.
        let h = (inst >> 11) & 1;
        let s = (inst >> 10) & 1;
        match (s, h) {
            (0, 0) => RegOffsetKind::StrHalf,
            (0, 1) => RegOffsetKind::LdrHalf,
            (1, 0) => RegOffsetKind::LdrSignedByte,
            _ => RegOffsetKind::LdrSignedHalf,
        }
    };
    ThumbInstruction::RegOffsetTransfer(RegOffsetTransfer { kind, ro, rb, rd })
}

fn decode_imm_offset_word_or_byte(inst: u32) -> ThumbInstruction {
    let b = (inst >> 12) & 1;
    let l = (inst >> 11) & 1;
    let imm5 = (inst >> 6) & 0x1F;
    let rb = (inst >> 3) & 0x7;
    let rd = inst & 0x7;
    let (kind, scale) = match (b, l) {
        (0, 0) => (ImmOffsetKind::StrWord, 4),
        (0, 1) => (ImmOffsetKind::LdrWord, 4),
        (1, 0) => (ImmOffsetKind::StrByte, 1),
        (_, _) => (ImmOffsetKind::LdrByte, 1),
    };
    ThumbInstruction::ImmOffsetTransfer(ImmOffsetTransfer { kind, offset: imm5 * scale, rb, rd })
}

fn decode_imm_offset_half(inst: u32) -> ThumbInstruction {
    let l = (inst >> 11) & 1;
    let imm5 = (inst >> 6) & 0x1F;
    let rb = (inst >> 3) & 0x7;
    let rd = inst & 0x7;
    let kind = if l == 0 { ImmOffsetKind::StrHalf } else { ImmOffsetKind::LdrHalf };
    ThumbInstruction::ImmOffsetTransfer(ImmOffsetTransfer { kind, offset: imm5 * 2, rb, rd })
}

fn decode_adjust_sp(inst: u32) -> ThumbInstruction {
    let subtract = (inst >> 7) & 1 == 1;
    let imm7 = inst & 0x7F;
    ThumbInstruction::AdjustStackPointer(AdjustStackPointer { subtract, offset: imm7 << 2 })
}

fn decode_push_pop(inst: u32) -> ThumbInstruction {
    let pop = (inst >> 11) & 1 == 1;
    let include_extra = (inst >> 8) & 1 == 1;
    let register_list = (inst & 0xFF) as u8;
    ThumbInstruction::PushPop(PushPop { pop, include_extra, register_list })
}

fn decode_block_transfer(inst: u32) -> ThumbInstruction {
    let load = (inst >> 11) & 1 == 1;
    let rb = (inst >> 8) & 0x7;
    let register_list = (inst & 0xFF) as u8;
    ThumbInstruction::BlockTransfer(BlockTransfer { load, rb, register_list })
}

fn decode_branch16_or_swi(inst: u32) -> ThumbInstruction {
    let cond_bits = (inst >> 8) & 0xF;
    match cond_bits {
        0xF => ThumbInstruction::SoftwareInterrupt(inst & 0xFF),
        0xE => ThumbInstruction::Unsupported("Thumb undefined instruction (cond=1110)"),
        _ => {
            let imm8 = inst & 0xFF;
            let signed = ((imm8 as i32) << 24) >> 24;
            ThumbInstruction::ConditionalBranch(ConditionalBranch {
                cond: Condition::from_bits(cond_bits),
                offset: signed << 1,
            })
        }
    }
}

fn sign_extend_branch11(inst: u32) -> i32 {
    let imm11 = inst & 0x7FF;
    let signed = ((imm11 as i32) << 21) >> 21;
    signed << 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsl_immediate_decodes() {
        // LSL r1, r2, #3: 000 00 00011 010 001
        let inst: u16 = 0b000_00_00011_010_001;
        match decode(inst) {
            ThumbInstruction::ShiftImmediate(s) => {
                assert_eq!(s.kind, ShiftKind::Lsl);
                assert_eq!(s.amount, 3);
                assert_eq!(s.rs, 2);
                assert_eq!(s.rd, 1);
            }
            other => panic!("expected ShiftImmediate, got {other:?}"),
        }
    }

    #[test]
    fn mov_immediate_format3() {
        // MOV r0, #0x42 : 001 00 000 01000010
        let inst: u16 = 0b001_00_000_01000010;
        match decode(inst) {
            ThumbInstruction::ImmediateAlu(a) => {
                assert_eq!(a.op, ImmediateOp::Mov);
                assert_eq!(a.rd, 0);
                assert_eq!(a.imm8, 0x42);
            }
            other => panic!("expected ImmediateAlu, got {other:?}"),
        }
    }

    #[test]
    fn bx_hi_register_decodes() {
        // BX r1: 010001 11 0 0 001 000
        let inst: u16 = 0b010001_11_0_0_001_000;
        match decode(inst) {
            ThumbInstruction::BranchExchange(b) => assert_eq!(b.rm, 1),
            other => panic!("expected BranchExchange, got {other:?}"),
        }
    }

    #[test]
    fn conditional_branch_sign_extends() {
        // BEQ with imm8 = 0xFE (-2 => -4 bytes)
        let inst: u16 = 0b1101_0000_1111_1110;
        match decode(inst) {
            ThumbInstruction::ConditionalBranch(b) => {
                assert_eq!(b.cond, Condition::Eq);
                assert_eq!(b.offset, -4);
            }
            other => panic!("expected ConditionalBranch, got {other:?}"),
        }
    }

    #[test]
    fn swi_decodes_comment() {
        let inst: u16 = 0b1101_1111_0001_0010;
        match decode(inst) {
            ThumbInstruction::SoftwareInterrupt(imm) => assert_eq!(imm, 0x12),
            other => panic!("expected SoftwareInterrupt, got {other:?}"),
        }
    }

    #[test]
    fn push_with_lr_decodes() {
        // PUSH {r0, r1, LR}: 1011 0 1 1 0 00000011
        let inst: u16 = 0b1011_0_1_1_0_00000011;
        match decode(inst) {
            ThumbInstruction::PushPop(p) => {
                assert!(!p.pop);
                assert!(p.include_extra);
                assert_eq!(p.register_list, 0b00000011);
            }
            other => panic!("expected PushPop, got {other:?}"),
        }
    }

    #[test]
    fn unconditional_branch_sign_extends() {
        let inst: u16 = 0b11100_111_1111_1110; // imm11 = 0x7FE -> -2 -> -4
        match decode(inst) {
            ThumbInstruction::UnconditionalBranch(b) => assert_eq!(b.offset, -4),
            other => panic!("expected UnconditionalBranch, got {other:?}"),
        }
    }
}
