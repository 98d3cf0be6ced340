//! Atari SIO bus plumbing shared by every peripheral.
//!
//! - [`SignalQueue`]: time-sorted pin changes waiting to reach a device's
//!   support chips at device ticks.
//! - [`DeviceTimeBase`]: master/device tick conversion for a device with its
//!   own crystal.
//! - [`SerialBitTransmitQueue`]: edges a device drives onto DATA IN, replayed
//!   on the master clock after [`TRANSMIT_LATENCY`].
//! - [`SioDevice`] / [`SioBus`]: the device interface and the computer's end
//!   of the bus.

mod bus;
mod device;
mod signal_queue;
mod time_base;
mod transmit_queue;

pub use bus::{
    COMMAND_LEAD_CYCLES, COMMAND_TRAIL_CYCLES, DeviceId, NTSC_MASTER_CLOCK, ReceivedByte,
    STANDARD_CYCLES_PER_BIT, SYNC_SLICE, SioBus, TRANSMIT_EVENT, sio_checksum,
};
pub use device::{SioDevice, SioPort};
pub use signal_queue::{SignalChange, SignalQueue, SignalQueueError, SignalRecord};
pub use time_base::DeviceTimeBase;
pub use transmit_queue::{
    DEFAULT_MAX_CYCLES_PER_BIT, SerialBitTransmitQueue, TRANSMIT_LATENCY, TransmitBit,
};
