//! Atari 850 Interface Module.
//!
//! A 6507 running the 850's 4K ROM against two 6532 RIOTs, on its own
//! 1.108 MHz clock. The module talks to the computer over SIO by
//! bit-banging RIOT pins, drives four RS-232 ports with software UARTs and
//! strobes bytes to a parallel printer.
//!
//! The device runs behind the master clock and is caught up on every bus
//! sync. Edges from the computer reach the RIOTs through a signal queue
//! at device ticks; edges the 6507 drives onto SIO DATA IN are converted
//! back to master time and replayed on the bus after
//! [`atari_sio::TRANSMIT_LATENCY`].

mod baud;
mod board;
mod device;
mod ports;
mod snapshot;

use emu_core::Clock;

pub use baud::{AUTO_BAUD_MIN_CYCLES_PER_BIT, BAUD_RATES, CYCLES_PER_BIT, closest_index};
pub use device::{Atari850, MAX_BAUD_SETTING};
pub use ports::{ParallelPrinter, SerialPort, SerialStatus, TerminalState};
pub use snapshot::{Atari850State, SnapshotError, UartState};

/// Size of the firmware ROM.
pub const ROM_SIZE: usize = 4096;

/// 4.433618 MHz crystal divided by four.
pub const DEVICE_CLOCK: Clock = Clock::new(4_433_618, 4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareStatus {
    Ok,
    Missing,
}
