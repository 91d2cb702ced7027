//! IR value model: variables, constants, and tagged operand references (spec.md §3 "IR Variable",
//! "IR Constant", "IR AnyRef / VarRef").

/// Data-type tag carried by every IR value. Storage width is always 32 bits; this only drives
/// interpretation for multiply and comparison-style opcodes (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Unsigned 32-bit.
    U32,
    /// Signed 32-bit (two's complement).
    S32,
}

/// Dense id of an SSA variable, unique within the micro-block that defines it.
pub type VarId = u32;

/// An immutable SSA variable, identified by a dense integer id unique within one micro-block's
/// IR (spec.md §3). Produced by exactly one opcode (the [`crate::ir::opcode::Opcode::writes`]
/// invariant enforced by the translator and checked by tests).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    /// Dense id, unique within the owning micro-block.
    pub id: VarId,
    /// Interpretation tag; drives signed/unsigned behavior in multiply and repoint validation.
    pub data_type: DataType,
    /// Optional human-readable label, carried for debug output only.
    pub label: Option<&'static str>,
}

impl Variable {
    /// Creates a new variable with no debug label.
    pub fn new(id: VarId, data_type: DataType) -> Self {
        Self { id, data_type, label: None }
    }

    /// Creates a new variable with a debug label.
    pub fn labeled(id: VarId, data_type: DataType, label: &'static str) -> Self {
        Self { id, data_type, label: Some(label) }
    }
}

/// A 32-bit immediate with a data-type tag (spec.md §3 "IR Constant").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Constant {
    /// Raw 32-bit value.
    pub value: u32,
    /// Interpretation tag.
    pub data_type: DataType,
}

impl Constant {
    /// Builds an unsigned constant.
    pub fn u32(value: u32) -> Self {
        Self { value, data_type: DataType::U32 }
    }

    /// Builds a signed constant from its two's-complement bit pattern.
    pub fn s32(value: i32) -> Self {
        Self { value: value as u32, data_type: DataType::S32 }
    }

    /// Reinterprets the raw bits as signed.
    pub fn as_i32(self) -> i32 {
        self.value as i32
    }
}

/// A tagged operand that may be absent, a variable reference, or an immediate constant
/// (spec.md §3 "IR AnyRef"). Model with a sum type, never a sentinel (spec.md §9).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnyRef {
    /// No operand (e.g. the accumulate operand of a non-accumulating multiply).
    Null,
    /// A reference to a previously-defined SSA variable.
    Variable(VarId),
    /// An immediate value.
    Constant(Constant),
}

impl AnyRef {
    /// The variable this operand references, if any.
    pub fn as_variable(self) -> Option<VarId> {
        match self {
            AnyRef::Variable(id) => Some(id),
            _ => None,
        }
    }

    /// The constant this operand holds, if any.
    pub fn as_constant(self) -> Option<Constant> {
        match self {
            AnyRef::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// `true` for [`AnyRef::Null`].
    pub fn is_null(self) -> bool {
        matches!(self, AnyRef::Null)
    }

    /// Rewrites a variable reference from `old` to `new`, leaving constants and `Null` untouched.
    /// Used by the optimizer's repoint step.
    pub fn repoint(self, old: VarId, new: VarId) -> Self {
        match self {
            AnyRef::Variable(id) if id == old => AnyRef::Variable(new),
            other => other,
        }
    }
}

impl From<Constant> for AnyRef {
    fn from(c: Constant) -> Self {
        AnyRef::Constant(c)
    }
}

impl From<VarId> for AnyRef {
    fn from(id: VarId) -> Self {
        AnyRef::Variable(id)
    }
}

/// A refinement of [`AnyRef`] for operands that must name a variable (never a constant or
/// `Null`) — e.g. the destination of a write-back address computation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarRef(pub VarId);

impl VarRef {
    /// Rewrites this reference from `old` to `new`.
    pub fn repoint(self, old: VarId, new: VarId) -> Self {
        if self.0 == old {
            VarRef(new)
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyref_repoint_only_affects_matching_variable() {
        let r = AnyRef::Variable(3);
        assert_eq!(r.repoint(3, 9), AnyRef::Variable(9));
        assert_eq!(r.repoint(4, 9), AnyRef::Variable(3));
        let c = AnyRef::Constant(Constant::u32(7));
        assert_eq!(c.repoint(3, 9), c);
    }

    #[test]
    fn constant_signed_roundtrip() {
        let c = Constant::s32(-1);
        assert_eq!(c.value, 0xFFFF_FFFF);
        assert_eq!(c.as_i32(), -1);
    }
}
