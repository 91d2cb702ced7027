//! Guest instruction-set decoding: ARM (32-bit) and Thumb (16-bit) encodings, plus the shared
//! condition-code model (spec.md §4).

pub mod arm;
pub mod condition;
pub mod thumb;

pub use condition::Condition;
