//! Demo driver (SPEC_FULL.md §C.4): loads a flat guest image into a `Vec<u8>`-backed [`Memory`],
//! builds a [`Cpu`], and drives `run` in a loop while logging block-compilation events. This
//! exists so `armjit-core`'s public API has one real caller, the way the teacher's CLI sits next
//! to its hardware crate; argv parsing and image loading live entirely here, never in the core.

use std::env;
use std::fs;
use std::process::ExitCode;

use armjit_core::coprocessor::Coprocessor;
use armjit_core::ir::opcode::MemBus;
use armjit_core::memory::Memory;
use armjit_core::{Config, Cpu};

/// Cycles requested from the dispatcher per `run` call. Arbitrary but large enough that a
/// realistic guest program crosses many basic blocks between returns to this loop.
const CYCLE_BUDGET: u32 = 1_000_000;

/// A flat guest image backed entirely by a `Vec<u8>`, growing on an out-of-range write and
/// reading as zero past the end. No MMIO, no page table, no TCM: this is the simplest `Memory`
/// that lets a guest binary run, not a faithful target board.
struct FlatImage {
    bytes: Vec<u8>,
}

impl FlatImage {
    fn new(image: Vec<u8>) -> Self {
        Self { bytes: image }
    }

    fn read<const N: usize>(&self, addr: u32) -> [u8; N] {
        let base = addr as usize;
        let mut out = [0u8; N];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.bytes.get(base + i).copied().unwrap_or(0);
        }
        out
    }

    fn write(&mut self, addr: u32, bytes: &[u8]) {
        let base = addr as usize;
        if base + bytes.len() > self.bytes.len() {
            self.bytes.resize(base + bytes.len(), 0);
        }
        self.bytes[base..base + bytes.len()].copy_from_slice(bytes);
    }
}

impl Memory for FlatImage {
    fn read_byte(&mut self, addr: u32, _bus: MemBus) -> u8 {
        self.read::<1>(addr)[0]
    }

    fn read_half(&mut self, addr: u32, _bus: MemBus) -> u16 {
        u16::from_le_bytes(self.read(addr))
    }

    fn read_word(&mut self, addr: u32, _bus: MemBus) -> u32 {
        u32::from_le_bytes(self.read(addr))
    }

    fn write_byte(&mut self, addr: u32, value: u8, _bus: MemBus) {
        self.write(addr, &[value]);
    }

    fn write_half(&mut self, addr: u32, value: u16, _bus: MemBus) {
        self.write(addr, &value.to_le_bytes());
    }

    fn write_word(&mut self, addr: u32, value: u32, _bus: MemBus) {
        self.write(addr, &value.to_le_bytes());
    }
}

/// A coprocessor slot with nothing behind it: reads as zero, writes are discarded. Good enough
/// for a guest image that never touches `MRC`/`MCR`.
struct NoopCoprocessor;

impl Coprocessor for NoopCoprocessor {
    fn read(&mut self, _opcode1: u32, _crn: u32, _crm: u32, _opcode2: u32) -> u32 {
        0
    }

    fn write(&mut self, _opcode1: u32, _crn: u32, _crm: u32, _opcode2: u32, _value: u32) {}

    fn should_write_break_basic_block(&self, _opcode1: u32, _crn: u32, _crm: u32, _opcode2: u32) -> bool {
        false
    }

    fn reset(&mut self) {}
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: armjit-cli <flat-image>");
        return ExitCode::FAILURE;
    };

    let image = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("failed to read {path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let coprocessors: [Box<dyn Coprocessor>; 16] = std::array::from_fn(|_| Box::new(NoopCoprocessor) as Box<dyn Coprocessor>);
    let mut cpu = Cpu::new(Config::default(), Box::new(FlatImage::new(image)), coprocessors);
    cpu.state_mut().r_pc = 0;

    loop {
        match cpu.run(CYCLE_BUDGET) {
            Ok(consumed) => tracing::info!(consumed, pc = cpu.state().r_pc, "dispatch loop returned"),
            Err(e) => {
                eprintln!("dispatcher error: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
}
