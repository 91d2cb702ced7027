//! Decoded ARM (32-bit encoding) instruction records.
//!
//! [`decode::decode`] dispatches a raw 32-bit word into one of these strongly-typed shapes. The
//! translator ([`crate::translate`]) consumes them; it never re-inspects raw instruction bits.

use crate::isa::condition::Condition;

/// Bit mask for the 4-bit condition field (bits 31:28).
pub const COND_MASK: u32 = 0xF000_0000;
/// Bit shift for the condition field.
pub const COND_SHIFT: u32 = 28;

/// Extracts common ARM instruction fields from a raw 32-bit word.
pub trait ArmBits {
    /// The 4-bit condition field (bits 31:28).
    fn cond(&self) -> Condition;
    /// The `Rn` field (bits 19:16).
    fn rn(&self) -> u32;
    /// The `Rd` field (bits 15:12).
    fn rd(&self) -> u32;
    /// The `Rs` field (bits 11:8), used by multiplies and register-specified shifts.
    fn rs(&self) -> u32;
    /// The `Rm` field (bits 3:0).
    fn rm(&self) -> u32;
    /// Bit 20, the "set flags" / load-vs-store bit depending on instruction class.
    fn bit20(&self) -> bool;
    /// Bit 22, the byte/word or signed/unsigned discriminator depending on instruction class.
    fn bit22(&self) -> bool;
    /// Bit 24, the pre/post-indexing discriminator for load/store shapes.
    fn bit24(&self) -> bool;
    /// Bit 23, the add/subtract (up/down) offset discriminator.
    fn bit23(&self) -> bool;
    /// Bit 21, the write-back discriminator for load/store shapes.
    fn bit21(&self) -> bool;
}

impl ArmBits for u32 {
    #[inline(always)]
    fn cond(&self) -> Condition {
        Condition::from_bits((self & COND_MASK) >> COND_SHIFT)
    }
    #[inline(always)]
    fn rn(&self) -> u32 {
        (self >> 16) & 0xF
    }
    #[inline(always)]
    fn rd(&self) -> u32 {
        (self >> 12) & 0xF
    }
    #[inline(always)]
    fn rs(&self) -> u32 {
        (self >> 8) & 0xF
    }
    #[inline(always)]
    fn rm(&self) -> u32 {
        self & 0xF
    }
    #[inline(always)]
    fn bit20(&self) -> bool {
        (self >> 20) & 1 != 0
    }
    #[inline(always)]
    fn bit22(&self) -> bool {
        (self >> 22) & 1 != 0
    }
    #[inline(always)]
    fn bit24(&self) -> bool {
        (self >> 24) & 1 != 0
    }
    #[inline(always)]
    fn bit23(&self) -> bool {
        (self >> 23) & 1 != 0
    }
    #[inline(always)]
    fn bit21(&self) -> bool {
        (self >> 21) & 1 != 0
    }
}

/// The sixteen ARM data-processing opcodes (instruction bits 24:21).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DpOpcode {
    /// Bitwise AND.
    And,
    /// Bitwise exclusive-or.
    Eor,
    /// Subtract.
    Sub,
    /// Reverse subtract.
    Rsb,
    /// Add.
    Add,
    /// Add with carry.
    Adc,
    /// Subtract with carry.
    Sbc,
    /// Reverse subtract with carry.
    Rsc,
    /// Test (AND, result discarded, flags always updated).
    Tst,
    /// Test equivalence (EOR, result discarded, flags always updated).
    Teq,
    /// Compare (SUB, result discarded, flags always updated).
    Cmp,
    /// Compare negative (ADD, result discarded, flags always updated).
    Cmn,
    /// Bitwise OR.
    Orr,
    /// Move (`Rn` ignored).
    Mov,
    /// Bit clear (`Rn AND NOT operand2`).
    Bic,
    /// Move NOT (bitwise complement).
    Mvn,
}

impl DpOpcode {
    /// Decodes the 4-bit data-processing opcode field.
    pub fn from_bits(bits: u32) -> DpOpcode {
        match bits & 0xF {
            0x0 => DpOpcode::And,
            0x1 => DpOpcode::Eor,
            0x2 => DpOpcode::Sub,
            0x3 => DpOpcode::Rsb,
            0x4 => DpOpcode::Add,
            0x5 => DpOpcode::Adc,
            0x6 => DpOpcode::Sbc,
            0x7 => DpOpcode::Rsc,
            0x8 => DpOpcode::Tst,
            0x9 => DpOpcode::Teq,
            0xA => DpOpcode::Cmp,
            0xB => DpOpcode::Cmn,
            0xC => DpOpcode::Orr,
            0xD => DpOpcode::Mov,
            0xE => DpOpcode::Bic,
            _ => DpOpcode::Mvn,
        }
    }

    /// `TST`/`TEQ`/`CMP`/`CMN`: the result is discarded, only flags are produced.
    pub fn is_comparison(self) -> bool {
        matches!(self, DpOpcode::Tst | DpOpcode::Teq | DpOpcode::Cmp | DpOpcode::Cmn)
    }

    /// Logical ops derive their carry-out from the shifter, not from the ALU; arithmetic ops
    /// derive carry/overflow from the add/subtract itself (spec.md §4.4).
    pub fn is_logical(self) -> bool {
        matches!(
            self,
            DpOpcode::And
                | DpOpcode::Eor
                | DpOpcode::Tst
                | DpOpcode::Teq
                | DpOpcode::Orr
                | DpOpcode::Mov
                | DpOpcode::Bic
                | DpOpcode::Mvn
        )
    }

    /// `true` for ops whose left-hand side is `Rn` (every op except `MOV`/`MVN`).
    pub fn uses_rn(self) -> bool {
        !matches!(self, DpOpcode::Mov | DpOpcode::Mvn)
    }
}

/// Barrel-shifter operation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShiftKind {
    /// Logical shift left.
    Lsl,
    /// Logical shift right.
    Lsr,
    /// Arithmetic shift right.
    Asr,
    /// Rotate right (amount 0 means RRX: rotate right through carry by one bit).
    Ror,
}

impl ShiftKind {
    /// Decodes the 2-bit shift-type field (instruction bits 6:5).
    pub fn from_bits(bits: u32) -> ShiftKind {
        match bits & 0x3 {
            0 => ShiftKind::Lsl,
            1 => ShiftKind::Lsr,
            2 => ShiftKind::Asr,
            _ => ShiftKind::Ror,
        }
    }
}

/// The data-processing "operand 2": either a rotated 8-bit immediate, or a register optionally
/// run through the barrel shifter by a constant or register-held amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand2 {
    /// A 32-bit value already produced by rotating an 8-bit immediate right by an even amount.
    Immediate {
        /// The rotated value.
        value: u32,
        /// The rotate amount applied (0–30, always even). A zero rotate leaves the carry flag
        /// unaffected; any other rotate sets carry to the value's bit 31 (spec.md §4.4).
        rotate: u32,
    },
    /// `Rm` shifted by a constant amount.
    ShiftByImmediate {
        /// Register holding the value to shift.
        rm: u32,
        /// Shift kind.
        kind: ShiftKind,
        /// Shift amount, 0–31 (0 with `Ror` means RRX).
        amount: u32,
    },
    /// `Rm` shifted by the low byte of `Rs`.
    ShiftByRegister {
        /// Register holding the value to shift.
        rm: u32,
        /// Shift kind.
        kind: ShiftKind,
        /// Register whose low byte holds the shift amount.
        rs: u32,
    },
}

/// Decodes operand 2 from a data-processing (or `MSR`-immediate) encoding.
pub fn decode_operand2(inst: u32, immediate_form: bool) -> Operand2 {
    if immediate_form {
        let rotate = ((inst >> 8) & 0xF) * 2;
        let imm8 = inst & 0xFF;
        Operand2::Immediate { value: imm8.rotate_right(rotate), rotate }
    } else {
        let kind = ShiftKind::from_bits(inst >> 5);
        let rm = inst.rm();
        if (inst >> 4) & 1 == 0 {
            let amount = (inst >> 7) & 0x1F;
            Operand2::ShiftByImmediate { rm, kind, amount }
        } else {
            let rs = inst.rs();
            Operand2::ShiftByRegister { rm, kind, rs }
        }
    }
}

/// A decoded `AND/EOR/.../MOV/MVN`-class instruction.
#[derive(Clone, Copy, Debug)]
pub struct DataProcessing {
    /// Guard condition.
    pub cond: Condition,
    /// Which of the 16 data-processing operations this is.
    pub opcode: DpOpcode,
    /// Whether this instruction updates CPSR's N/Z/C/V (the `S` bit).
    pub set_flags: bool,
    /// Destination register (ignored for `TST`/`TEQ`/`CMP`/`CMN`).
    pub rd: u32,
    /// First operand register (ignored for `MOV`/`MVN`).
    pub rn: u32,
    /// Second operand.
    pub operand2: Operand2,
}

/// A word/byte offset for a single-register load/store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrOffset {
    /// A 12-bit immediate offset.
    Immediate(u32),
    /// `Rm`, optionally shifted by a constant amount.
    Register {
        /// Base offset register.
        rm: u32,
        /// Shift kind applied to `rm` (register-specified shift amounts are not encodable here).
        kind: ShiftKind,
        /// Constant shift amount.
        amount: u32,
    },
}

/// A decoded `LDR`/`STR` (word or byte, optionally translated / write-back) instruction.
#[derive(Clone, Copy, Debug)]
pub struct SingleDataTransfer {
    /// Guard condition.
    pub cond: Condition,
    /// `true` for a byte transfer, `false` for a word transfer.
    pub byte: bool,
    /// `true` for `LDR`, `false` for `STR`.
    pub load: bool,
    /// `true` if the offset is applied before the transfer (pre-indexed addressing).
    pub pre_index: bool,
    /// `true` if the offset is added to the base, `false` if subtracted.
    pub add: bool,
    /// `true` if the (possibly offset) address is written back to the base register.
    pub writeback: bool,
    /// Destination (load) or source (store) register.
    pub rd: u32,
    /// Base address register.
    pub rn: u32,
    /// Address offset.
    pub offset: AddrOffset,
}

/// The three halfword/signed-transfer sub-kinds distinguished by the `S`/`H` bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HalfwordKind {
    /// Zero-extended 16-bit load, or plain 16-bit store.
    UnsignedHalf,
    /// Sign-extended 8-bit load (store-side is not encodable).
    SignedByte,
    /// Sign-extended 16-bit load (store-side is not encodable).
    SignedHalf,
}

/// A halfword offset: either a split 8-bit immediate or a plain register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HalfwordOffset {
    /// An 8-bit immediate offset (bits 11:8 and 3:0 combined).
    Immediate(u32),
    /// A plain offset register (no shift is encodable for this class).
    Register(u32),
}

/// A decoded `LDRH`/`STRH`/`LDRSB`/`LDRSH` instruction.
#[derive(Clone, Copy, Debug)]
pub struct HalfwordSignedTransfer {
    /// Guard condition.
    pub cond: Condition,
    /// `true` for a load, `false` for a store.
    pub load: bool,
    /// `true` if the offset is applied before the transfer.
    pub pre_index: bool,
    /// `true` if the offset is added to the base.
    pub add: bool,
    /// `true` if the address is written back to the base register.
    pub writeback: bool,
    /// Destination (load) or source (store) register.
    pub rd: u32,
    /// Base address register.
    pub rn: u32,
    /// Address offset.
    pub offset: HalfwordOffset,
    /// Which sub-kind of halfword/signed transfer this is.
    pub kind: HalfwordKind,
}

/// A decoded `LDM`/`STM` block data transfer instruction.
#[derive(Clone, Copy, Debug)]
pub struct BlockDataTransfer {
    /// Guard condition.
    pub cond: Condition,
    /// `true` for `LDM`, `false` for `STM`.
    pub load: bool,
    /// `true` if the offset is applied before each transfer.
    pub pre_index: bool,
    /// `true` if the address increments, `false` if it decrements.
    pub add: bool,
    /// `true` if the final address is written back to `rn`.
    pub writeback: bool,
    /// The `^` (user-bank / SPSR-restoring) bit.
    pub user_mode: bool,
    /// Base address register.
    pub rn: u32,
    /// Bitmask of registers to transfer (bit `i` set means `Ri` is in the list).
    pub register_list: u16,
}

/// A decoded `B`/`BL` instruction.
#[derive(Clone, Copy, Debug)]
pub struct BranchRelative {
    /// Guard condition.
    pub cond: Condition,
    /// `true` for `BL` (link).
    pub link: bool,
    /// Sign-extended word offset (already multiplied by 4), relative to the translator's PC
    /// model (spec.md §4.4: PC reads as `current + 2 * opcode_size`).
    pub offset: i32,
}

/// A decoded `BX`/`BLX` (register-form) instruction.
#[derive(Clone, Copy, Debug)]
pub struct BranchExchange {
    /// Guard condition.
    pub cond: Condition,
    /// Register holding the target address; bit 0 selects ARM (0) or Thumb (1).
    pub rm: u32,
    /// `true` for `BLX` (link).
    pub link: bool,
}

/// A decoded `MUL`/`MLA` instruction.
#[derive(Clone, Copy, Debug)]
pub struct Multiply {
    /// Guard condition.
    pub cond: Condition,
    /// `true` for `MLA` (accumulate).
    pub accumulate: bool,
    /// Whether this instruction updates CPSR's N/Z (the `S` bit).
    pub set_flags: bool,
    /// Destination register.
    pub rd: u32,
    /// Accumulate-operand register (ignored unless `accumulate`).
    pub rn: u32,
    /// First multiplicand.
    pub rs: u32,
    /// Second multiplicand.
    pub rm: u32,
}

/// A decoded `UMULL`/`UMLAL`/`SMULL`/`SMLAL` instruction.
#[derive(Clone, Copy, Debug)]
pub struct MultiplyLong {
    /// Guard condition.
    pub cond: Condition,
    /// `true` for a signed product, `false` for unsigned.
    pub signed: bool,
    /// `true` for the accumulating (`..LAL`) forms.
    pub accumulate: bool,
    /// Whether this instruction updates CPSR's N/Z (the `S` bit).
    pub set_flags: bool,
    /// Register receiving the high 32 bits of the product.
    pub rd_hi: u32,
    /// Register receiving the low 32 bits of the product.
    pub rd_lo: u32,
    /// First multiplicand.
    pub rs: u32,
    /// Second multiplicand.
    pub rm: u32,
}

/// A decoded `SWP`/`SWPB` instruction.
#[derive(Clone, Copy, Debug)]
pub struct SingleDataSwap {
    /// Guard condition.
    pub cond: Condition,
    /// `true` for a byte swap, `false` for a word swap.
    pub byte: bool,
    /// Base address register.
    pub rn: u32,
    /// Destination register (receives the old memory value).
    pub rd: u32,
    /// Source register (new value written to memory).
    pub rm: u32,
}

/// Which guest exception a decoded `Exception` record raises.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionKind {
    /// Software interrupt (`SWI`/`SVC`), carrying the 24-bit comment field.
    Swi(u32),
    /// A reserved/undefined encoding, trapped as an undefined-instruction exception.
    Undefined,
}

/// A decoded `SWI` or undefined-instruction trap.
#[derive(Clone, Copy, Debug)]
pub struct Exception {
    /// Guard condition (the undefined-instruction trap itself is always taken, but the decoded
    /// `SWI` still carries its condition field for IR purposes).
    pub cond: Condition,
    /// Which exception this is.
    pub kind: ExceptionKind,
}

/// A decoded `MRS` (move PSR to register) instruction.
#[derive(Clone, Copy, Debug)]
pub struct MoveStatusRegister {
    /// Guard condition.
    pub cond: Condition,
    /// `true` to read SPSR, `false` to read CPSR.
    pub spsr: bool,
    /// Destination register.
    pub rd: u32,
}

/// A decoded `MSR` (move register/immediate to PSR) instruction.
#[derive(Clone, Copy, Debug)]
pub struct MoveRegisterStatus {
    /// Guard condition.
    pub cond: Condition,
    /// `true` to write SPSR, `false` to write CPSR.
    pub spsr: bool,
    /// Source operand (register, or rotated immediate for the immediate form).
    pub operand: Operand2,
    /// Field mask bits (c,x,s,f from bits 19:16): which PSR byte lanes are written.
    pub field_mask: u8,
}

/// A decoded `CLZ` (count leading zeros, ARMv5T+) instruction.
#[derive(Clone, Copy, Debug)]
pub struct CountLeadingZeros {
    /// Guard condition.
    pub cond: Condition,
    /// Destination register.
    pub rd: u32,
    /// Source register.
    pub rm: u32,
}

/// The four ARMv5TE saturating arithmetic operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SatOp {
    /// `QADD`: saturating add.
    Qadd,
    /// `QSUB`: saturating subtract.
    Qsub,
    /// `QDADD`: saturating add of `Rn` and doubled-and-saturated `Rm`.
    Qdadd,
    /// `QDSUB`: saturating subtract of doubled-and-saturated `Rm` from `Rn`.
    Qdsub,
}

/// A decoded `QADD`/`QSUB`/`QDADD`/`QDSUB` instruction.
#[derive(Clone, Copy, Debug)]
pub struct SaturatingAddSub {
    /// Guard condition.
    pub cond: Condition,
    /// Which saturating operation this is.
    pub op: SatOp,
    /// Destination register.
    pub rd: u32,
    /// Register holding the accumulator / addend operand.
    pub rn: u32,
    /// Register holding the other operand.
    pub rm: u32,
}

/// A decoded `MRC`/`MCR` coprocessor register-transfer instruction.
#[derive(Clone, Copy, Debug)]
pub struct CoprocessorRegisterTransfer {
    /// Guard condition.
    pub cond: Condition,
    /// `true` for `MRC` (coprocessor to ARM register), `false` for `MCR`.
    pub load: bool,
    /// Coprocessor number (0–15).
    pub coproc: u32,
    /// Coprocessor-specific opcode 1.
    pub opcode1: u32,
    /// Coprocessor source/destination register `CRn`.
    pub crn: u32,
    /// ARM destination/source register.
    pub rd: u32,
    /// Coprocessor operand register `CRm`.
    pub crm: u32,
    /// Coprocessor-specific opcode 2.
    pub opcode2: u32,
}

/// One decoded ARM instruction.
#[derive(Clone, Copy, Debug)]
pub enum ArmInstruction {
    /// `AND`/`EOR`/.../`MOV`/`MVN`.
    DataProcessing(DataProcessing),
    /// `LDR`/`STR` (word or byte).
    SingleDataTransfer(SingleDataTransfer),
    /// `LDRH`/`STRH`/`LDRSB`/`LDRSH`.
    HalfwordSignedTransfer(HalfwordSignedTransfer),
    /// `LDM`/`STM`.
    BlockDataTransfer(BlockDataTransfer),
    /// `B`/`BL`.
    BranchRelative(BranchRelative),
    /// `BX`/`BLX` (register form).
    BranchExchange(BranchExchange),
    /// `MUL`/`MLA`.
    Multiply(Multiply),
    /// `UMULL`/`UMLAL`/`SMULL`/`SMLAL`.
    MultiplyLong(MultiplyLong),
    /// `SWP`/`SWPB`.
    SingleDataSwap(SingleDataSwap),
    /// `SWI`/undefined-instruction trap.
    Exception(Exception),
    /// `MRS`.
    MoveStatusRegister(MoveStatusRegister),
    /// `MSR`.
    MoveRegisterStatus(MoveRegisterStatus),
    /// `CLZ`.
    CountLeadingZeros(CountLeadingZeros),
    /// `QADD`/`QSUB`/`QDADD`/`QDSUB`.
    SaturatingAddSub(SaturatingAddSub),
    /// `MRC`/`MCR`.
    CoprocessorRegisterTransfer(CoprocessorRegisterTransfer),
    /// A recognized but unsupported shape (e.g. `LDRT`/`STRT`, `SMLAxy`, `LDC`/`STC`/`CDP`). The
    /// translator reports this as an unimplemented encoding and ends the block at the
    /// instruction before it (spec.md §9: "STRT/LDRT are absent ... preserve that fail-fast
    /// behavior").
    Unsupported(&'static str),
}
