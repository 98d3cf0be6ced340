//! Save state for the 850.

use atari_sio::{SignalRecord, TransmitBit};
use mos_6502::Mos6502;
use mos_riot_6532::{RiotError, RiotState};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("malformed 850 snapshot: bad {field}")]
    Shape { field: &'static str },
    #[error(transparent)]
    Riot(#[from] RiotError),
}

/// One software UART decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UartState {
    /// Zero while idle.
    pub cycles_per_bit: u32,
    /// Device cycles since the sampling base (half a bit before the start
    /// bit's leading edge).
    pub elapsed: u32,
    pub shift: u32,
    pub bits_shifted: u32,
    pub last_bit: bool,
}

/// Everything needed to resume an 850. Device ticks are relative to the
/// device clock at save time and master ticks to the master clock.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Atari850State {
    pub cpu: Mos6502,
    pub riot1: RiotState,
    pub riot2: RiotState,
    /// Pending pin changes, ticks relative to now.
    pub signals: Vec<SignalRecord>,
    pub shifters: [UartState; 4],
    pub baud_settings: [u8; 4],
    pub baud_indices: [u8; 4],
    pub last_pokey_cycles_per_bit: u32,
    pub last_sio_data_in: bool,
    /// Device cycles the co-processor may still run before catching up
    /// with the master clock.
    pub device_lag: u32,
    /// Fractional device cycle carried by the time base, 0.32.
    pub fraction: u32,
    /// Master cycles until each port rechecks its serial device.
    pub receive_pending: [Option<u32>; 4],
    /// DATA IN edges queued for the bus but not yet played, master ticks
    /// relative to now.
    pub transmit_bits: Vec<TransmitBit>,
    /// DATA IN level before the first queued edge.
    pub transmit_level: bool,
}
