//! IR opcode taxonomy (spec.md §3 "IR Opcode", §4.2).
//!
//! Every opcode is a plain struct grouped into the tagged-union [`Opcode`] enum (spec.md §9:
//! "replace virtual opcode dispatch with a tagged-union enum"). [`Opcode::reads`],
//! [`Opcode::writes`], and [`Opcode::repoint`] are the three introspection primitives the
//! optimizer and allocator drive every pass through.
//!
//! Flags are not modeled as SSA variables: `update_host_flags` on an ALU/shift/multiply opcode
//! means "leave N/Z/C/V (and, for `QADD`-family ops, the sticky overflow) in the host's flag
//! register"; a following `UpdateFlags`/`UpdateSticky` consumes whatever the nearest preceding
//! flag producer left there, per program order (spec.md §5: "flag producers dominate flag
//! consumers"). This mirrors how `update_host_flags` is described in spec.md §4.5(e): a plain
//! bool the optimizer clears, not an SSA-tracked value.

use bitflags::bitflags;

use crate::ir::value::{AnyRef, Constant, DataType, VarId, VarRef, Variable};
use crate::state::cpsr::CpsrFlags;
use crate::state::mode::CpuMode;

bitflags! {
    /// N/Z/C/V subset touched by one `UpdateFlags` opcode.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FlagMask: u32 {
        /// Negative.
        const N = 1 << 0;
        /// Zero.
        const Z = 1 << 1;
        /// Carry.
        const C = 1 << 2;
        /// Overflow.
        const V = 1 << 3;
    }
}

impl FlagMask {
    /// Converts this mask into the corresponding [`CpsrFlags`] bits.
    pub fn to_cpsr_flags(self) -> CpsrFlags {
        let mut out = CpsrFlags::empty();
        if self.contains(FlagMask::N) {
            out |= CpsrFlags::N;
        }
        if self.contains(FlagMask::Z) {
            out |= CpsrFlags::Z;
        }
        if self.contains(FlagMask::C) {
            out |= CpsrFlags::C;
        }
        if self.contains(FlagMask::V) {
            out |= CpsrFlags::V;
        }
        out
    }
}

/// Which memory bus an access targets (spec.md §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemBus {
    /// Instruction fetch bus.
    Code,
    /// Data access bus.
    Data,
    /// System (neither code nor data) bus, used by some coprocessor-adjacent accesses.
    System,
}

bitflags! {
    /// Access-shape flags for `MemoryRead`/`MemoryWrite` (spec.md §3, §4.7 "Alignment / rotation").
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MemFlags: u32 {
        /// 8-bit access.
        const BYTE = 1 << 0;
        /// 16-bit access.
        const HALF = 1 << 1;
        /// 32-bit access.
        const WORD = 1 << 2;
        /// Sign-extend the loaded value (loads only).
        const SIGNED = 1 << 3;
        /// Rotate a misaligned word/halfword load right by `(addr & mask) * 8`.
        const ROTATE = 1 << 4;
        /// ARMv4T misaligned-signed-halfword-degrades-to-signed-byte semantics apply.
        const ARMV4T = 1 << 5;
    }
}

/// The eighteen ALU operation kinds an [`Alu`] opcode may perform. `Clz`/`Qadd`/`Qsub`/`Qdadd`/
/// `Qdsub` are grouped here per spec.md §3's "ALU" bullet ("plus CLZ, QADD, QSUB").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AluKind {
    /// Bitwise AND.
    And,
    /// Bit clear (`lhs AND NOT rhs`).
    Bic,
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
    /// Bitwise OR.
    Orr,
    /// Move (`rhs` unused).
    Mov,
    /// Move NOT (`rhs` unused).
    Mvn,
    /// Count leading zeros (`rhs` unused).
    Clz,
    /// Saturating add.
    Qadd,
    /// Saturating subtract.
    Qsub,
    /// Saturating add of `lhs` and doubled-and-saturated `rhs`.
    Qdadd,
    /// Saturating subtract of doubled-and-saturated `rhs` from `lhs`.
    Qdsub,
}

impl AluKind {
    /// `true` for unary operations where `rhs` carries no meaning.
    pub fn is_unary(self) -> bool {
        matches!(self, AluKind::Mov | AluKind::Mvn | AluKind::Clz)
    }
}

/// `LoadGPR(dst, mode, reg)`.
#[derive(Clone, Debug)]
pub struct LoadGpr {
    /// Result variable.
    pub dst: Variable,
    /// Banking mode to read under.
    pub mode: CpuMode,
    /// Guest register number (0–15).
    pub reg: u32,
}

/// `StoreGPR(mode, reg, value)`.
#[derive(Clone, Debug)]
pub struct StoreGpr {
    /// Banking mode to write under.
    pub mode: CpuMode,
    /// Guest register number (0–15).
    pub reg: u32,
    /// Value to store.
    pub value: AnyRef,
}

/// `LoadSPSR(dst, mode)`.
#[derive(Clone, Debug)]
pub struct LoadSpsr {
    /// Result variable.
    pub dst: Variable,
    /// Mode whose SPSR bank to read.
    pub mode: CpuMode,
}

/// `StoreSPSR(mode, value)`.
#[derive(Clone, Debug)]
pub struct StoreSpsr {
    /// Mode whose SPSR bank to write.
    pub mode: CpuMode,
    /// Value to store.
    pub value: AnyRef,
}

/// `LoadCPSR(dst)`.
#[derive(Clone, Debug)]
pub struct LoadCpsr {
    /// Result variable.
    pub dst: Variable,
}

/// `StoreCPSR(value)`.
#[derive(Clone, Debug)]
pub struct StoreCpsr {
    /// Value to store.
    pub value: AnyRef,
}

/// `UpdateFlags(dst, cpsr_in, mask)`: folds host N/Z/C/V (as left by the nearest preceding
/// flag-producing opcode) into `mask`'s bits of `cpsr_in`, producing `dst`.
#[derive(Clone, Debug)]
pub struct UpdateFlags {
    /// Result variable: `cpsr_in` with `mask`'s bits replaced.
    pub dst: Variable,
    /// CPSR value being updated.
    pub cpsr_in: VarRef,
    /// Which of N/Z/C/V to fold in.
    pub mask: FlagMask,
}

/// `UpdateSticky(dst, cpsr_in)`: ORs a 1 into CPSR bit 27 (Q) when the host overflow flag left by
/// the nearest preceding saturating-arithmetic opcode is set.
#[derive(Clone, Debug)]
pub struct UpdateSticky {
    /// Result variable.
    pub dst: Variable,
    /// CPSR value being updated.
    pub cpsr_in: VarRef,
}

/// One of `LSL`/`LSR`/`ASR`/`ROR`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShiftKind {
    /// Logical shift left.
    Lsl,
    /// Logical shift right.
    Lsr,
    /// Arithmetic shift right.
    Asr,
    /// Rotate right (amount 0 is RRX: rotate through carry by one bit — never folded by the
    /// optimizer, per spec.md §4.5(a)).
    Ror,
}

/// A barrel-shift opcode.
#[derive(Clone, Debug)]
pub struct Shift {
    /// Result variable.
    pub dst: Variable,
    /// Which shift.
    pub kind: ShiftKind,
    /// Value being shifted.
    pub input: AnyRef,
    /// Shift amount.
    pub amount: AnyRef,
    /// Whether this shift leaves its carry-out in the host carry flag for a following
    /// `UpdateFlags` to consume.
    pub update_host_flags: bool,
}

/// An ALU opcode (spec.md §3 "ALU" group).
#[derive(Clone, Debug)]
pub struct Alu {
    /// Result variable.
    pub dst: Variable,
    /// Which operation.
    pub kind: AluKind,
    /// Left-hand operand.
    pub lhs: AnyRef,
    /// Right-hand operand (ignored for unary kinds).
    pub rhs: AnyRef,
    /// Whether this ALU op leaves N/Z/C/V (and, for the `Q*` kinds, sticky overflow) in host
    /// flags for a following `UpdateFlags`/`UpdateSticky` to consume.
    pub update_host_flags: bool,
}

/// `MUL(dst, result_hi?, lhs, rhs)`: 32-bit product, or the low half of a 64-bit product when
/// `result_hi` is present.
#[derive(Clone, Debug)]
pub struct Mul {
    /// Low 32 bits of the product (or the whole 32-bit result for `MUL`/`MLA`).
    pub dst: Variable,
    /// High 32 bits of the product, present for `UMULL`/`UMLAL`/`SMULL`/`SMLAL`.
    pub result_hi: Option<Variable>,
    /// First multiplicand.
    pub lhs: AnyRef,
    /// Second multiplicand.
    pub rhs: AnyRef,
    /// `true` for a signed product.
    pub signed: bool,
    /// Whether this multiply leaves N/Z in host flags (`S`-suffixed forms).
    pub update_host_flags: bool,
}

/// `ADD64`: the accumulating step of `UMLAL`/`SMLAL`, adding a prior 64-bit value to a freshly
/// computed product.
#[derive(Clone, Debug)]
pub struct Add64 {
    /// Result high half.
    pub dst_hi: Variable,
    /// Result low half.
    pub dst_lo: Variable,
    /// First operand, high half.
    pub lhs_hi: AnyRef,
    /// First operand, low half.
    pub lhs_lo: AnyRef,
    /// Second operand, high half.
    pub rhs_hi: AnyRef,
    /// Second operand, low half.
    pub rhs_lo: AnyRef,
}

/// `MemoryRead(dst, addr, bus, flags)`.
#[derive(Clone, Debug)]
pub struct MemoryRead {
    /// Result variable.
    pub dst: Variable,
    /// Address operand.
    pub addr: AnyRef,
    /// Bus this access targets.
    pub bus: MemBus,
    /// Access shape.
    pub flags: MemFlags,
}

/// `MemoryWrite(addr, value, bus, flags)`.
#[derive(Clone, Debug)]
pub struct MemoryWrite {
    /// Address operand.
    pub addr: AnyRef,
    /// Value operand.
    pub value: AnyRef,
    /// Bus this access targets.
    pub bus: MemBus,
    /// Access shape.
    pub flags: MemFlags,
}

/// `Flush(target)`: compute the next guest PC (ARM-width instruction stream), ending the block.
#[derive(Clone, Debug)]
pub struct Flush {
    /// New PC value.
    pub target: AnyRef,
}

/// `FlushExchange(target)`: as [`Flush`], but bit 0 of `target` selects ARM (0) or Thumb (1).
#[derive(Clone, Debug)]
pub struct FlushExchange {
    /// New PC value (bit 0 is the state-select bit, stripped before the real PC is stored).
    pub target: AnyRef,
}

/// `MRC(dst, coproc, opcode1, crn, crm, opcode2)`.
#[derive(Clone, Debug)]
pub struct Mrc {
    /// Result variable.
    pub dst: Variable,
    /// Coprocessor number.
    pub coproc: u32,
    /// Coprocessor-specific opcode 1.
    pub opcode1: u32,
    /// Coprocessor register `CRn`.
    pub crn: u32,
    /// Coprocessor register `CRm`.
    pub crm: u32,
    /// Coprocessor-specific opcode 2.
    pub opcode2: u32,
}

/// `MCR(coproc, opcode1, crn, value, crm, opcode2)`.
#[derive(Clone, Debug)]
pub struct Mcr {
    /// Coprocessor number.
    pub coproc: u32,
    /// Coprocessor-specific opcode 1.
    pub opcode1: u32,
    /// Coprocessor register `CRn`.
    pub crn: u32,
    /// Value being written.
    pub value: AnyRef,
    /// Coprocessor register `CRm`.
    pub crm: u32,
    /// Coprocessor-specific opcode 2.
    pub opcode2: u32,
}

/// One IR opcode. The tagged union spec.md §9 calls for in place of virtual dispatch.
#[derive(Clone, Debug)]
pub enum Opcode {
    /// Read a banked GPR.
    LoadGpr(LoadGpr),
    /// Write a banked GPR.
    StoreGpr(StoreGpr),
    /// Read a banked SPSR.
    LoadSpsr(LoadSpsr),
    /// Write a banked SPSR.
    StoreSpsr(StoreSpsr),
    /// Read CPSR.
    LoadCpsr(LoadCpsr),
    /// Write CPSR.
    StoreCpsr(StoreCpsr),
    /// Force the host carry flag clear.
    ClearCarry,
    /// Force the host carry flag set.
    SetCarry,
    /// Fold host N/Z/C/V into a CPSR value.
    UpdateFlags(UpdateFlags),
    /// Fold host sticky-overflow into a CPSR value's Q bit.
    UpdateSticky(UpdateSticky),
    /// Barrel shift.
    Shift(Shift),
    /// ALU operation.
    Alu(Alu),
    /// 32×32 multiply (optionally producing a 64-bit product).
    Mul(Mul),
    /// 64-bit accumulate.
    Add64(Add64),
    /// Guest memory read.
    MemoryRead(MemoryRead),
    /// Guest memory write.
    MemoryWrite(MemoryWrite),
    /// Pipeline flush (PC write, no state-select).
    Flush(Flush),
    /// Pipeline flush with ARM/Thumb state select.
    FlushExchange(FlushExchange),
    /// Coprocessor register read.
    Mrc(Mrc),
    /// Coprocessor register write.
    Mcr(Mcr),
    /// No operation; left behind by optimizer rewrites that drop a dead result with no
    /// side-effect.
    Nop,
}

impl Opcode {
    /// The variable this opcode defines, if any.
    pub fn writes(&self) -> Option<VarId> {
        match self {
            Opcode::LoadGpr(o) => Some(o.dst.id),
            Opcode::LoadSpsr(o) => Some(o.dst.id),
            Opcode::LoadCpsr(o) => Some(o.dst.id),
            Opcode::UpdateFlags(o) => Some(o.dst.id),
            Opcode::UpdateSticky(o) => Some(o.dst.id),
            Opcode::Shift(o) => Some(o.dst.id),
            Opcode::Alu(o) => Some(o.dst.id),
            Opcode::Mul(o) => Some(o.dst.id),
            Opcode::MemoryRead(o) => Some(o.dst.id),
            Opcode::Mrc(o) => Some(o.dst.id),
            Opcode::StoreGpr(_)
            | Opcode::StoreSpsr(_)
            | Opcode::StoreCpsr(_)
            | Opcode::ClearCarry
            | Opcode::SetCarry
            | Opcode::Add64(_)
            | Opcode::MemoryWrite(_)
            | Opcode::Flush(_)
            | Opcode::FlushExchange(_)
            | Opcode::Mcr(_)
            | Opcode::Nop => None,
        }
    }

    /// A second variable this opcode defines, for the two two-result shapes (`Mul`'s
    /// `result_hi`, `Add64`'s `dst_hi`/`dst_lo`).
    pub fn writes_secondary(&self) -> Vec<VarId> {
        match self {
            Opcode::Mul(o) => o.result_hi.as_ref().map(|v| v.id).into_iter().collect(),
            Opcode::Add64(o) => vec![o.dst_hi.id, o.dst_lo.id],
            _ => Vec::new(),
        }
    }

    /// Every variable this opcode consumes.
    pub fn reads(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        let mut push = |r: AnyRef| {
            if let Some(id) = r.as_variable() {
                out.push(id);
            }
        };
        match self {
            Opcode::LoadGpr(_) | Opcode::LoadSpsr(_) | Opcode::LoadCpsr(_) => {}
            Opcode::StoreGpr(o) => push(o.value),
            Opcode::StoreSpsr(o) => push(o.value),
            Opcode::StoreCpsr(o) => push(o.value),
            Opcode::ClearCarry | Opcode::SetCarry | Opcode::Nop => {}
            Opcode::UpdateFlags(o) => out.push(o.cpsr_in.0),
            Opcode::UpdateSticky(o) => out.push(o.cpsr_in.0),
            Opcode::Shift(o) => {
                push(o.input);
                push(o.amount);
            }
            Opcode::Alu(o) => {
                push(o.lhs);
                if !o.kind.is_unary() {
                    push(o.rhs);
                }
            }
            Opcode::Mul(o) => {
                push(o.lhs);
                push(o.rhs);
            }
            Opcode::Add64(o) => {
                push(o.lhs_hi);
                push(o.lhs_lo);
                push(o.rhs_hi);
                push(o.rhs_lo);
            }
            Opcode::MemoryRead(o) => push(o.addr),
            Opcode::MemoryWrite(o) => {
                push(o.addr);
                push(o.value);
            }
            Opcode::Flush(o) => push(o.target),
            Opcode::FlushExchange(o) => push(o.target),
            Opcode::Mrc(_) => {}
            Opcode::Mcr(o) => push(o.value),
        }
        out
    }

    /// `true` if this opcode has an effect beyond producing its result variable: a store to
    /// guest state, a memory access, a flag update, a pipeline flush, or a coprocessor access.
    /// The dead-code pass only ever deletes opcodes for which this is `false` and whose result
    /// has no reader (spec.md §4.5(d)).
    pub fn has_side_effect(&self) -> bool {
        !matches!(
            self,
            Opcode::LoadGpr(_)
                | Opcode::LoadSpsr(_)
                | Opcode::LoadCpsr(_)
                | Opcode::Shift(_)
                | Opcode::Alu(_)
                | Opcode::Mul(_)
                | Opcode::MemoryRead(_)
                | Opcode::Mrc(_)
                | Opcode::Nop
        )
    }

    /// Rewrites every reference to `old` into `new`. Only valid when `old` and `new` carry the
    /// same [`DataType`]; callers are expected to have checked this (spec.md §4.2: "`repoint`
    /// only succeeds when `old.data_type == new.data_type`").
    pub fn repoint(&mut self, old: VarId, new: VarId) {
        let r = |v: &mut AnyRef| *v = v.repoint(old, new);
        match self {
            Opcode::LoadGpr(_) | Opcode::LoadSpsr(_) | Opcode::LoadCpsr(_) => {}
            Opcode::StoreGpr(o) => r(&mut o.value),
            Opcode::StoreSpsr(o) => r(&mut o.value),
            Opcode::StoreCpsr(o) => r(&mut o.value),
            Opcode::ClearCarry | Opcode::SetCarry | Opcode::Nop => {}
            Opcode::UpdateFlags(o) => o.cpsr_in = o.cpsr_in.repoint(old, new),
            Opcode::UpdateSticky(o) => o.cpsr_in = o.cpsr_in.repoint(old, new),
            Opcode::Shift(o) => {
                r(&mut o.input);
                r(&mut o.amount);
            }
            Opcode::Alu(o) => {
                r(&mut o.lhs);
                r(&mut o.rhs);
            }
            Opcode::Mul(o) => {
                r(&mut o.lhs);
                r(&mut o.rhs);
            }
            Opcode::Add64(o) => {
                r(&mut o.lhs_hi);
                r(&mut o.lhs_lo);
                r(&mut o.rhs_hi);
                r(&mut o.rhs_lo);
            }
            Opcode::MemoryRead(o) => r(&mut o.addr),
            Opcode::MemoryWrite(o) => {
                r(&mut o.addr);
                r(&mut o.value);
            }
            Opcode::Flush(o) => r(&mut o.target),
            Opcode::FlushExchange(o) => r(&mut o.target),
            Opcode::Mrc(_) => {}
            Opcode::Mcr(o) => r(&mut o.value),
        }
    }

    /// The data type of the variable this opcode writes, if any — used to validate a repoint's
    /// precondition before attempting it.
    pub fn write_data_type(&self) -> Option<DataType> {
        match self {
            Opcode::LoadGpr(o) => Some(o.dst.data_type),
            Opcode::LoadSpsr(o) => Some(o.dst.data_type),
            Opcode::LoadCpsr(o) => Some(o.dst.data_type),
            Opcode::UpdateFlags(o) => Some(o.dst.data_type),
            Opcode::UpdateSticky(o) => Some(o.dst.data_type),
            Opcode::Shift(o) => Some(o.dst.data_type),
            Opcode::Alu(o) => Some(o.dst.data_type),
            Opcode::Mul(o) => Some(o.dst.data_type),
            Opcode::MemoryRead(o) => Some(o.dst.data_type),
            Opcode::Mrc(o) => Some(o.dst.data_type),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(id: VarId) -> Variable {
        Variable::new(id, DataType::U32)
    }

    #[test]
    fn alu_reads_both_operands_for_binary_kind() {
        let op = Opcode::Alu(Alu {
            dst: v(2),
            kind: AluKind::Add,
            lhs: AnyRef::Variable(0),
            rhs: AnyRef::Variable(1),
            update_host_flags: false,
        });
        assert_eq!(op.reads(), vec![0, 1]);
        assert_eq!(op.writes(), Some(2));
    }

    #[test]
    fn alu_unary_kind_ignores_rhs() {
        let op = Opcode::Alu(Alu {
            dst: v(1),
            kind: AluKind::Mvn,
            lhs: AnyRef::Variable(0),
            rhs: AnyRef::Variable(99),
            update_host_flags: false,
        });
        assert_eq!(op.reads(), vec![0]);
    }

    #[test]
    fn repoint_rewrites_matching_operand_only() {
        let mut op = Opcode::StoreGpr(StoreGpr { mode: CpuMode::User, reg: 0, value: AnyRef::Variable(5) });
        op.repoint(5, 42);
        assert_eq!(op.reads(), vec![42]);
        op.repoint(7, 100);
        assert_eq!(op.reads(), vec![42]);
    }

    #[test]
    fn store_has_side_effect_but_shift_does_not() {
        let store = Opcode::StoreGpr(StoreGpr { mode: CpuMode::User, reg: 0, value: AnyRef::Null });
        assert!(store.has_side_effect());
        let shift = Opcode::Shift(Shift {
            dst: v(0),
            kind: ShiftKind::Lsl,
            input: AnyRef::Null,
            amount: AnyRef::Null,
            update_host_flags: false,
        });
        assert!(!shift.has_side_effect());
    }

    #[test]
    fn mul_long_writes_both_halves() {
        let op = Opcode::Mul(Mul {
            dst: v(0),
            result_hi: Some(v(1)),
            lhs: AnyRef::Variable(10),
            rhs: AnyRef::Variable(11),
            signed: true,
            update_host_flags: false,
        });
        assert_eq!(op.writes(), Some(0));
        assert_eq!(op.writes_secondary(), vec![1]);
    }
}
