//! Things that plug into the 850's serial and parallel connectors.

/// Modem status lines driven by a serial device toward the 850.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialStatus {
    pub data_set_ready: bool,
    pub carrier_detect: bool,
    pub clear_to_send: bool,
}

/// Control lines the 850 drives toward a serial device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TerminalState {
    pub data_terminal_ready: bool,
    pub request_to_send: bool,
}

/// A device on one of the four RS-232 ports.
pub trait SerialPort {
    /// A byte the 850 finished shifting out at `baud`.
    fn write(&mut self, baud: u32, byte: u8);

    /// The next byte to shift into the 850 and its baud rate, if any is
    /// waiting. A zero baud rate drops the byte.
    fn read(&mut self) -> Option<(u32, u8)>;

    fn status(&self) -> SerialStatus {
        SerialStatus::default()
    }

    fn set_terminal_state(&mut self, _state: TerminalState) {}
}

/// A printer on the parallel port.
pub trait ParallelPrinter {
    fn write_raw(&mut self, byte: u8);
}
