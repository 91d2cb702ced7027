//! Constant propagation (spec.md §4.5(a)).
//!
//! Maintains a `var → value` side table and folds `Shift`/`Alu`/`Mul` opcodes whose operands are
//! all known. The folded value is always recorded for downstream propagation; the opcode itself is
//! only rewritten into an `Alu::Mov` when it does not also produce host flags. Flag-producing
//! arithmetic/shift/multiply ops keep their original shape even once their operands are known,
//! since only `Mov`'s own flag semantics (N/Z, no carry/overflow) are safe to stand in for an
//! arbitrary op's real flag behavior; `And`/`Bic`/`Eor`/`Orr`/`Mov`/`Mvn` never touch carry or
//! overflow in the first place, so those are rewritten unconditionally, flags or not.
//! `Adc`/`Sbc`/`Rsc` read the host carry-in, which this pass never knows, and are never folded.

use std::collections::HashMap;

use crate::ir::opcode::{Alu, AluKind, Mul, Opcode, Shift, ShiftKind};
use crate::ir::value::{AnyRef, Constant, VarId};

fn resolve(bindings: &HashMap<VarId, u32>, r: AnyRef) -> Option<u32> {
    match r {
        AnyRef::Constant(c) => Some(c.value),
        AnyRef::Variable(id) => bindings.get(&id).copied(),
        AnyRef::Null => None,
    }
}

/// `And`/`Bic`/`Eor`/`Orr`/`Mov`/`Mvn` never read or alter carry/overflow, so a fold of these is
/// always safe to materialize as a `Mov`, flags or not.
fn flag_safe_to_rewrite(kind: AluKind) -> bool {
    matches!(kind, AluKind::And | AluKind::Bic | AluKind::Eor | AluKind::Orr | AluKind::Mov | AluKind::Mvn)
}

fn fold_alu(kind: AluKind, lhs: u32, rhs: u32) -> Option<u32> {
    match kind {
        AluKind::And => Some(lhs & rhs),
        AluKind::Bic => Some(lhs & !rhs),
        AluKind::Eor => Some(lhs ^ rhs),
        AluKind::Sub => Some(lhs.wrapping_sub(rhs)),
        AluKind::Rsb => Some(rhs.wrapping_sub(lhs)),
        AluKind::Add => Some(lhs.wrapping_add(rhs)),
        AluKind::Adc | AluKind::Sbc | AluKind::Rsc => None,
        AluKind::Orr => Some(lhs | rhs),
        AluKind::Mov => Some(lhs),
        AluKind::Mvn => Some(!lhs),
        AluKind::Clz => Some(lhs.leading_zeros()),
        AluKind::Qadd => Some((lhs as i32).saturating_add(rhs as i32) as u32),
        AluKind::Qsub => Some((lhs as i32).saturating_sub(rhs as i32) as u32),
        AluKind::Qdadd => Some((lhs as i32).saturating_add((rhs as i32).saturating_mul(2)) as u32),
        AluKind::Qdsub => Some((lhs as i32).saturating_sub((rhs as i32).saturating_mul(2)) as u32),
    }
}

/// Folds a shift whose input and amount are both known. `ROR #0` (RRX) reads the host carry-in
/// and is never folded (spec.md §4.5(a): "ROR on 0 is RRX and is NOT folded").
fn fold_shift(kind: ShiftKind, input: u32, raw_amount: u32) -> Option<u32> {
    match kind {
        ShiftKind::Lsl => {
            let amt = raw_amount & 0xFF;
            Some(if amt == 0 {
                input
            } else if amt < 32 {
                input << amt
            } else {
                0
            })
        }
        ShiftKind::Lsr => {
            let amt = if raw_amount == 0 { 32 } else { raw_amount & 0xFF };
            Some(if amt < 32 { input >> amt } else { 0 })
        }
        ShiftKind::Asr => {
            let amt = (if raw_amount == 0 { 32 } else { raw_amount & 0xFF }).min(31);
            Some(((input as i32) >> amt) as u32)
        }
        ShiftKind::Ror => {
            if raw_amount & 0x1F == 0 {
                None
            } else {
                Some(input.rotate_right(raw_amount & 0x1F))
            }
        }
    }
}

fn as_mov(dst_id: VarId, data_type: crate::ir::value::DataType, value: u32, update_host_flags: bool) -> Opcode {
    Opcode::Alu(Alu {
        dst: crate::ir::value::Variable::new(dst_id, data_type),
        kind: AluKind::Mov,
        lhs: AnyRef::Constant(Constant { value, data_type }),
        rhs: AnyRef::Null,
        update_host_flags,
    })
}

/// Runs one forward constant-propagation pass. Returns `true` if anything changed.
pub(super) fn run(program: &mut [Opcode]) -> bool {
    let mut bindings: HashMap<VarId, u32> = HashMap::new();
    let mut changed = false;

    for op in program.iter_mut() {
        match op {
            Opcode::Alu(a) => {
                if let (Some(lhs), Some(rhs)) = (resolve(&bindings, a.lhs), if a.kind.is_unary() { Some(0) } else { resolve(&bindings, a.rhs) }) {
                    if let Some(value) = fold_alu(a.kind, lhs, rhs) {
                        bindings.insert(a.dst.id, value);
                        if !a.update_host_flags || flag_safe_to_rewrite(a.kind) {
                            let already_folded = a.kind == AluKind::Mov && a.lhs == AnyRef::Constant(Constant { value, data_type: a.dst.data_type });
                            if !already_folded {
                                *op = as_mov(a.dst.id, a.dst.data_type, value, a.update_host_flags);
                                changed = true;
                            }
                        }
                    }
                }
            }
            Opcode::Shift(s) => {
                if let (Some(input), Some(amount)) = (resolve(&bindings, s.input), resolve(&bindings, s.amount)) {
                    if let Some(value) = fold_shift(s.kind, input, amount) {
                        bindings.insert(s.dst.id, value);
                        if !s.update_host_flags {
                            *op = as_mov(s.dst.id, s.dst.data_type, value, false);
                            changed = true;
                        }
                    }
                }
            }
            Opcode::Mul(m) => {
                if let (Some(lhs), Some(rhs)) = (resolve(&bindings, m.lhs), resolve(&bindings, m.rhs)) {
                    let product: u64 = if m.signed {
                        ((lhs as i32 as i64) * (rhs as i32 as i64)) as u64
                    } else {
                        u64::from(lhs) * u64::from(rhs)
                    };
                    bindings.insert(m.dst.id, product as u32);
                    if let Some(hi) = &m.result_hi {
                        bindings.insert(hi.id, (product >> 32) as u32);
                    }
                    // Multiply is never rewritten: a fold would need to replace one opcode with
                    // two (low/high `Mov`s) when `result_hi` is present, which this pass's
                    // single-opcode-in-place rewrite can't express. The value is still recorded
                    // above so later opcodes can keep propagating through it.
                }
            }
            _ => {}
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::value::{DataType, Variable};

    fn mov(id: VarId, c: u32) -> Opcode {
        Opcode::Alu(Alu {
            dst: Variable::new(id, DataType::U32),
            kind: AluKind::Mov,
            lhs: AnyRef::Constant(Constant::u32(c)),
            rhs: AnyRef::Null,
            update_host_flags: false,
        })
    }

    #[test]
    fn folds_add_of_two_constants() {
        let mut program = vec![
            mov(0, 5),
            mov(1, 7),
            Opcode::Alu(Alu { dst: Variable::new(2, DataType::U32), kind: AluKind::Add, lhs: AnyRef::Variable(0), rhs: AnyRef::Variable(1), update_host_flags: false }),
        ];
        assert!(run(&mut program));
        match &program[2] {
            Opcode::Alu(a) => {
                assert_eq!(a.kind, AluKind::Mov);
                assert_eq!(a.lhs, AnyRef::Constant(Constant::u32(12)));
            }
            _ => panic!("expected folded Alu::Mov"),
        }
    }

    #[test]
    fn ror_by_zero_is_not_folded() {
        let mut program = vec![Opcode::Shift(Shift {
            dst: Variable::new(0, DataType::U32),
            kind: ShiftKind::Ror,
            input: AnyRef::Constant(Constant::u32(0x8000_0001)),
            amount: AnyRef::Constant(Constant::u32(0)),
            update_host_flags: true,
        })];
        run(&mut program);
        assert!(matches!(&program[0], Opcode::Shift(_)));
    }

    #[test]
    fn lsl_by_32_saturates_to_zero() {
        assert_eq!(fold_shift(ShiftKind::Lsl, 1, 32), Some(0));
    }
}
