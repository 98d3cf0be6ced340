//! MOS 6502 / WDC 65C02 CPU core and the co-processor host that runs it
//! inside peripherals.
//!
//! The core is cycle-stepped: one [`Cpu::tick`](emu_core::Cpu::tick) is one
//! bus access. [`CoProc6502`] wraps it with a page-granular [`MemoryMap`]
//! and runs it in slices bounded by a device [`Scheduler`](emu_core::Scheduler).

mod cmos;
mod coproc;
mod cpu;
pub mod flags;
mod memory_map;
mod registers;
mod undocumented;

pub use coproc::{CoProc6502, CoProcBoard};
pub use cpu::{CpuVariant, Mos6502};
pub use flags::Status;
pub use memory_map::{MemoryMap, Page};
pub use registers::Registers;
