//! The interface a peripheral presents to the SIO bus.

use std::any::Any;

use emu_core::{EventHandle, EventTarget, Scheduler};

use crate::transmit_queue::SerialBitTransmitQueue;

/// What a device can reach on the master side while handling a bus call.
pub struct SioPort<'a> {
    pub master: &'a mut Scheduler,
    pub transmit: &'a mut SerialBitTransmitQueue,
    pub target: EventTarget,
    /// Level of COMMAND at the time of the call.
    pub command: bool,
}

impl SioPort<'_> {
    /// Current master tick.
    #[must_use]
    pub fn now(&self) -> u32 {
        self.master.tick()
    }

    /// Queue an edge on the device's DATA IN output.
    pub fn add_transmit_bit(&mut self, tick: u32, level: bool) {
        self.transmit.add_transmit_bit(self.master, tick, level);
    }

    /// Schedule a master-clock event for this device.
    pub fn set_event(&mut self, delta: u32, id: u32, handle: &mut Option<EventHandle>) {
        self.master.set_event(delta, self.target, id, handle);
    }

    pub fn unset_event(&mut self, handle: &mut Option<EventHandle>) {
        self.master.unset_event(handle);
    }
}

/// A peripheral attached to the SIO bus.
///
/// Every call happens at the current master tick. Devices with their own
/// clock convert that to device time themselves.
pub trait SioDevice: Any {
    fn on_command_state_changed(&mut self, port: &mut SioPort<'_>, asserted: bool);

    fn on_motor_state_changed(&mut self, _port: &mut SioPort<'_>, _asserted: bool) {}

    fn on_ready_state_changed(&mut self, _port: &mut SioPort<'_>, _asserted: bool) {}

    /// The computer has started shifting out `byte` with the given master
    /// cycles per bit.
    fn on_begin_receive_byte(
        &mut self,
        port: &mut SioPort<'_>,
        byte: u8,
        command: bool,
        cycles_per_bit: u32,
    );

    /// The computer has finished shifting out `byte`.
    fn on_receive_byte(
        &mut self,
        _port: &mut SioPort<'_>,
        _byte: u8,
        _command: bool,
        _cycles_per_bit: u32,
    ) {
    }

    /// The byte in flight was cut short.
    fn on_truncate_byte(&mut self, port: &mut SioPort<'_>);

    fn on_send_ready(&mut self, _port: &mut SioPort<'_>) {}

    /// Catch the device up to the current master tick.
    fn sync(&mut self, port: &mut SioPort<'_>);

    /// A master event scheduled through [`SioPort::set_event`] fired.
    fn on_master_event(&mut self, port: &mut SioPort<'_>, id: u32);

    fn cold_reset(&mut self, port: &mut SioPort<'_>);

    fn warm_reset(&mut self, _port: &mut SioPort<'_>) {}

    /// The computer was power cycled.
    fn computer_cold_reset(&mut self, port: &mut SioPort<'_>) {
        self.cold_reset(port);
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
