//! Dynamic recompiler ("JIT") core for a 32-bit ARMv4T / ARMv5TE guest CPU.
//!
//! This crate implements the hard part of a guest-to-host JIT:
//! 1. **State:** banked guest registers, CPSR/SPSR, stable byte offsets (`state`).
//! 2. **IR:** an SSA-style intermediate representation with data-flow introspection (`ir`).
//! 3. **Decoder:** bit-pattern dispatch for 32-bit ARM and 16-bit Thumb encodings (`isa`).
//! 4. **Translator:** per-basic-block lifter from decoded records to IR (`translate`).
//! 5. **Optimizer:** constant propagation, context load/store elision, dead code/flag elision (`opt`).
//! 6. **Register allocator:** linear-scan with spilling (`alloc`).
//! 7. **Code emitter:** lowers IR to a wasm module executed by a native JIT backend (`emit`).
//! 8. **Block cache & linker:** keyed lookup, patch-based inter-block linking, invalidation (`cache`).
//! 9. **Dispatcher:** owns the code buffer and runs compiled blocks under a cycle budget (`dispatch`).
//!
//! Guest memory, coprocessors, and the embedding application are external collaborators; see
//! [`memory`] and [`coprocessor`] for the traits this core consumes.

/// Shared low-level types: addresses/keys, constants, error taxonomy.
pub mod common;
/// Root configuration for a compiled core instance.
pub mod config;
/// Coprocessor interface (external collaborator; black-box register read/write).
pub mod coprocessor;
/// Guest register file: banking rules, CPSR/SPSR, stable byte offsets.
pub mod state;

/// Instruction set decoding (ARM + Thumb bit-pattern dispatch).
pub mod isa;
/// Intermediate representation: values, opcodes, micro-blocks, basic blocks.
pub mod ir;
/// Guest-to-IR translator (per-basic-block lifter).
pub mod translate;
/// Optimization passes run over each micro-block's IR.
pub mod opt;
/// Linear-scan register allocator with spilling.
pub mod alloc;
/// Code emitter: lowers IR to a host-executable wasm module.
pub mod emit;
/// Block cache, inter-block linking, and invalidation.
pub mod cache;
/// Dispatcher: owns the code buffer, enters compiled blocks, drains the cycle budget.
pub mod dispatch;

/// Guest memory interface (external collaborator; black-box byte/half/word access).
pub mod memory;

pub use crate::common::error::JitError;
pub use crate::config::{Config, CpuModel};
pub use crate::dispatch::Dispatcher as Cpu;
