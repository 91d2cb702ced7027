//! Flag lowering (spec.md §4.7 "Flag propagation").
//!
//! Wasm has no native condition-code register, so the `HostFlagShadow` local mirrors guest CPSR's
//! bit layout directly (N=31, Z=30, C=29, V=28, Q=27). Every flag-producing opcode writes its bits
//! into the shadow inline, in the same native positions `UpdateFlags`/`UpdateSticky` read back —
//! turning the "bit-permutation" spec.md describes for a real host flags register into the
//! identity, since this backend never has one to permute from.

use wasm_encoder::Instruction;

use crate::ir::opcode::FlagMask;
use crate::state::cpsr::CpsrFlags;

const N_BIT: i32 = CpsrFlags::N.bits() as i32;
const Z_BIT: i32 = CpsrFlags::Z.bits() as i32;
const C_BIT: i32 = CpsrFlags::C.bits() as i32;
const V_BIT: i32 = CpsrFlags::V.bits() as i32;
const Q_BIT: i32 = CpsrFlags::Q.bits() as i32;

/// Clears `shadow_local`'s N and Z bits and re-sets them from `value_local`'s sign and zero-ness.
/// N is `value`'s own bit 31 (the sign bit already lines up); Z is synthesized from `i32.eqz`.
pub fn set_nz(shadow_local: u32, value_local: u32) -> Vec<Instruction<'static>> {
    vec![
        // shadow = (shadow & !(N|Z)) | (value & N_BIT) | ((value == 0) << Z_SHIFT)
        Instruction::LocalGet(shadow_local),
        Instruction::I32Const(!(N_BIT | Z_BIT)),
        Instruction::I32And,
        Instruction::LocalGet(value_local),
        Instruction::I32Const(N_BIT),
        Instruction::I32And,
        Instruction::I32Or,
        Instruction::LocalGet(value_local),
        Instruction::I32Eqz,
        Instruction::I32Const(Z_BIT.trailing_zeros() as i32),
        Instruction::I32Shl,
        Instruction::I32Or,
        Instruction::LocalSet(shadow_local),
    ]
}

/// Merges a 0/1 carry-out value (left on the wasm stack by `carry_expr`) into `shadow_local`'s C
/// bit. `carry_expr` must leave exactly one `i32` (0 or 1) on the stack.
pub fn set_carry(shadow_local: u32, carry_expr: Vec<Instruction<'static>>) -> Vec<Instruction<'static>> {
    let mut out = vec![Instruction::LocalGet(shadow_local), Instruction::I32Const(!C_BIT)];
    out.push(Instruction::I32And);
    out.extend(carry_expr);
    out.push(Instruction::I32Const(C_BIT.trailing_zeros() as i32));
    out.push(Instruction::I32Shl);
    out.push(Instruction::I32Or);
    out.push(Instruction::LocalSet(shadow_local));
    out
}

/// As [`set_carry`], for the V (overflow) bit.
pub fn set_overflow(shadow_local: u32, overflow_expr: Vec<Instruction<'static>>) -> Vec<Instruction<'static>> {
    let mut out = vec![Instruction::LocalGet(shadow_local), Instruction::I32Const(!V_BIT)];
    out.push(Instruction::I32And);
    out.extend(overflow_expr);
    out.push(Instruction::I32Const(V_BIT.trailing_zeros() as i32));
    out.push(Instruction::I32Shl);
    out.push(Instruction::I32Or);
    out.push(Instruction::LocalSet(shadow_local));
    out
}

/// `UpdateSticky`: ORs a 1 into the shadow's Q bit when `overflow_expr` leaves a nonzero value on
/// the stack. Unlike N/Z/C/V, Q is sticky — it is only ever set, never cleared by this opcode.
pub fn set_sticky(shadow_local: u32, overflow_expr: Vec<Instruction<'static>>) -> Vec<Instruction<'static>> {
    let mut out = vec![Instruction::LocalGet(shadow_local)];
    out.extend(overflow_expr);
    out.push(Instruction::I32Eqz);
    out.push(Instruction::I32Eqz);
    out.push(Instruction::I32Const(Q_BIT.trailing_zeros() as i32));
    out.push(Instruction::I32Shl);
    out.push(Instruction::I32Or);
    out.push(Instruction::LocalSet(shadow_local));
    out
}

/// `UpdateFlags(dst, cpsr_in, mask)`: `dst_local = (cpsr_in_local & !mask) | (shadow_local & mask)`.
/// Since the shadow already uses CPSR-native bit positions, folding in `mask`'s bits needs no
/// permutation — just a masked merge.
pub fn lower_update_flags(dst_local: u32, cpsr_in_local: u32, shadow_local: u32, mask: FlagMask) -> Vec<Instruction<'static>> {
    let bits = mask.to_cpsr_flags().bits() as i32;
    vec![
        Instruction::LocalGet(cpsr_in_local),
        Instruction::I32Const(!bits),
        Instruction::I32And,
        Instruction::LocalGet(shadow_local),
        Instruction::I32Const(bits),
        Instruction::I32And,
        Instruction::I32Or,
        Instruction::LocalSet(dst_local),
    ]
}

/// `UpdateSticky(dst, cpsr_in)`: `dst_local = cpsr_in_local | (shadow_local & Q_BIT)`.
pub fn lower_update_sticky(dst_local: u32, cpsr_in_local: u32, shadow_local: u32) -> Vec<Instruction<'static>> {
    vec![
        Instruction::LocalGet(cpsr_in_local),
        Instruction::LocalGet(shadow_local),
        Instruction::I32Const(Q_BIT),
        Instruction::I32And,
        Instruction::I32Or,
        Instruction::LocalSet(dst_local),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_match_real_cpsr_layout() {
        assert_eq!(N_BIT, 1 << 31);
        assert_eq!(Z_BIT, 1 << 30);
        assert_eq!(C_BIT, 1 << 29);
        assert_eq!(V_BIT, 1 << 28);
        assert_eq!(Q_BIT, 1 << 27);
    }

    #[test]
    fn update_flags_mask_selects_only_named_bits() {
        let bits = FlagMask::N.to_cpsr_flags().bits() as i32;
        assert_eq!(bits, N_BIT);
    }
}
