//! Master side of the SIO bus.
//!
//! The bus owns the master scheduler and stands in for the computer's POKEY
//! and PIA: it drives COMMAND and MOTOR, shifts bytes out to every attached
//! device, and decodes what the devices send back on DATA IN. Devices are
//! caught up to the master clock at least once per scanline.

use std::collections::VecDeque;

use emu_core::{
    Clock, EventHandle, EventHandler, EventTarget, Scheduler, tick_delta, tick_le,
};

use crate::device::{SioDevice, SioPort};
use crate::transmit_queue::SerialBitTransmitQueue;

/// NTSC Atari master clock, 1.7897725 MHz.
pub const NTSC_MASTER_CLOCK: Clock = Clock::new(7_159_090, 4);

/// Longest stretch of master time between device syncs: one scanline.
pub const SYNC_SLICE: u32 = 114;

/// COMMAND assertion to the first command frame byte.
pub const COMMAND_LEAD_CYCLES: u32 = 1500;

/// Last command frame byte to COMMAND deassertion.
pub const COMMAND_TRAIL_CYCLES: u32 = 1300;

/// POKEY cycles per bit at the standard 19200 baud.
pub const STANDARD_CYCLES_PER_BIT: u32 = 93;

/// Event id reserved for transmit queue replay on a device's target.
pub const TRANSMIT_EVENT: u32 = u32::MAX;

const BUS_TARGET: EventTarget = EventTarget(u32::MAX);
const EVENT_OP: u32 = 1;
const EVENT_SAMPLE: u32 = 2;

/// Index of an attached device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(usize);

/// A byte framed from DATA IN, stamped with the master tick of its start
/// bit's leading edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedByte {
    pub byte: u8,
    pub tick: u32,
}

/// SIO frame checksum: a byte sum with end-around carry.
#[must_use]
pub fn sio_checksum(bytes: &[u8]) -> u8 {
    let mut sum: u32 = 0;
    for &b in bytes {
        sum += u32::from(b);
        sum = (sum & 0xFF) + (sum >> 8);
    }
    sum as u8
}

#[derive(Debug, Clone, Copy)]
enum BusOp {
    Command(bool),
    Byte {
        byte: u8,
        command: bool,
        cycles_per_bit: u32,
    },
    Delay(u32),
}

struct Slot {
    device: Box<dyn SioDevice>,
    transmit: SerialBitTransmitQueue,
    /// Level this device currently drives onto DATA IN.
    level: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Idle,
    /// Sampling bit `bit` (0 = start, 9 = stop) of a frame.
    Receiving { start: u32, bit: u8, shift: u8 },
    /// Framing error; waiting for the line to return high.
    Break { since: u32 },
}

#[derive(Debug)]
struct Decoder {
    cycles_per_bit: u32,
    state: DecoderState,
    event: Option<EventHandle>,
}

impl Decoder {
    fn sample_delta(&self, now: u32, start: u32, bit: u8) -> u32 {
        let at = start
            .wrapping_add(self.cycles_per_bit * u32::from(bit))
            .wrapping_add(self.cycles_per_bit / 2);
        tick_delta(now, at).max(1) as u32
    }
}

struct BusState {
    slots: Vec<Slot>,
    ops: VecDeque<BusOp>,
    in_flight: Option<(u8, bool, u32)>,
    op_event: Option<EventHandle>,
    command: bool,
    motor: bool,
    ready: bool,
    line: bool,
    decoder: Decoder,
    received: Vec<ReceivedByte>,
}

impl BusState {
    fn with_port<R>(
        &mut self,
        master: &mut Scheduler,
        index: usize,
        f: impl FnOnce(&mut dyn SioDevice, &mut SioPort<'_>) -> R,
    ) -> R {
        let slot = &mut self.slots[index];
        let mut port = SioPort {
            master,
            transmit: &mut slot.transmit,
            target: EventTarget(index as u32),
            command: self.command,
        };
        f(slot.device.as_mut(), &mut port)
    }

    fn broadcast(
        &mut self,
        master: &mut Scheduler,
        mut f: impl FnMut(&mut dyn SioDevice, &mut SioPort<'_>),
    ) {
        for index in 0..self.slots.len() {
            self.with_port(master, index, &mut f);
        }
    }

    fn sync_all(&mut self, master: &mut Scheduler) {
        self.broadcast(master, |device, port| device.sync(port));
    }

    fn set_command(&mut self, master: &mut Scheduler, asserted: bool) {
        if self.command != asserted {
            self.command = asserted;
            log::trace!("SIO COMMAND {}", if asserted { "asserted" } else { "negated" });
            self.broadcast(master, |device, port| {
                device.on_command_state_changed(port, asserted);
            });
        }
    }

    /// Start the next queued operation if the bus is idle.
    fn kick(&mut self, master: &mut Scheduler) {
        if self.in_flight.is_some() || master.is_pending(self.op_event) {
            return;
        }

        while let Some(op) = self.ops.pop_front() {
            match op {
                BusOp::Command(asserted) => self.set_command(master, asserted),
                BusOp::Delay(cycles) => {
                    master.set_event(cycles.max(1), BUS_TARGET, EVENT_OP, &mut self.op_event);
                    return;
                }
                BusOp::Byte {
                    byte,
                    command,
                    cycles_per_bit,
                } => {
                    self.in_flight = Some((byte, command, cycles_per_bit));
                    self.broadcast(master, |device, port| {
                        device.on_begin_receive_byte(port, byte, command, cycles_per_bit);
                    });
                    master.set_event(
                        (cycles_per_bit * 10).max(1),
                        BUS_TARGET,
                        EVENT_OP,
                        &mut self.op_event,
                    );
                    return;
                }
            }
        }
    }

    fn on_op_complete(&mut self, master: &mut Scheduler) {
        if let Some((byte, command, cycles_per_bit)) = self.in_flight.take() {
            self.broadcast(master, |device, port| {
                device.on_receive_byte(port, byte, command, cycles_per_bit);
            });
        }
        self.kick(master);
    }

    fn truncate_byte(&mut self, master: &mut Scheduler) {
        if self.in_flight.take().is_some() {
            master.unset_event(&mut self.op_event);
            self.broadcast(master, |device, port| device.on_truncate_byte(port));
            self.kick(master);
        }
    }

    fn max_cycles_per_bit(&self) -> u32 {
        self.slots
            .iter()
            .map(|s| s.transmit.max_cycles_per_bit())
            .max()
            .unwrap_or(crate::transmit_queue::DEFAULT_MAX_CYCLES_PER_BIT)
    }

    fn update_line(&mut self, master: &mut Scheduler) {
        let line = self.slots.iter().all(|s| s.level);
        if line == self.line {
            return;
        }
        self.line = line;

        let now = master.tick();
        match self.decoder.state {
            DecoderState::Idle if !line => {
                let delta = self.decoder.sample_delta(now, now, 0);
                self.decoder.state = DecoderState::Receiving {
                    start: now,
                    bit: 0,
                    shift: 0,
                };
                master.set_event(delta, BUS_TARGET, EVENT_SAMPLE, &mut self.decoder.event);
            }
            DecoderState::Break { since } if line => {
                let held = now.wrapping_sub(since);
                if held >= self.max_cycles_per_bit().saturating_mul(10) {
                    log::debug!("SIO break of {held} cycles ended");
                }
                self.decoder.state = DecoderState::Idle;
            }
            _ => {}
        }
    }

    fn on_sample(&mut self, master: &mut Scheduler) {
        let DecoderState::Receiving { start, bit, shift } = self.decoder.state else {
            return;
        };
        let level = self.line;

        let shift = match bit {
            0 if level => {
                log::debug!("SIO start bit glitch at {start}");
                self.decoder.state = DecoderState::Idle;
                return;
            }
            0 => shift,
            1..=8 => shift | (u8::from(level) << (bit - 1)),
            _ => {
                if level {
                    log::trace!("SIO received ${shift:02X}");
                    self.received.push(ReceivedByte { byte: shift, tick: start });
                    self.decoder.state = DecoderState::Idle;
                } else {
                    log::debug!("SIO framing error on byte starting at {start}");
                    self.decoder.state = DecoderState::Break { since: start };
                }
                return;
            }
        };

        let next = bit + 1;
        self.decoder.state = DecoderState::Receiving {
            start,
            bit: next,
            shift,
        };
        let delta = self.decoder.sample_delta(master.tick(), start, next);
        master.set_event(delta, BUS_TARGET, EVENT_SAMPLE, &mut self.decoder.event);
    }
}

impl EventHandler for BusState {
    fn on_scheduled_event(&mut self, scheduler: &mut Scheduler, target: EventTarget, id: u32) {
        if target == BUS_TARGET {
            match id {
                EVENT_OP => self.on_op_complete(scheduler),
                EVENT_SAMPLE => self.on_sample(scheduler),
                _ => {}
            }
            return;
        }

        let index = target.0 as usize;
        if index >= self.slots.len() {
            return;
        }

        if id == TRANSMIT_EVENT {
            let due = self.slots[index].transmit.drain_due(scheduler);
            for bit in due {
                self.slots[index].level = bit.level;
                self.update_line(scheduler);
            }
        } else {
            self.with_port(scheduler, index, |device, port| device.on_master_event(port, id));
        }
    }
}

/// The computer's end of the SIO bus.
pub struct SioBus {
    master: Scheduler,
    state: BusState,
}

impl Default for SioBus {
    fn default() -> Self {
        Self::new(NTSC_MASTER_CLOCK)
    }
}

impl SioBus {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            master: Scheduler::new(clock),
            state: BusState {
                slots: Vec::new(),
                ops: VecDeque::new(),
                in_flight: None,
                op_event: None,
                command: false,
                motor: false,
                ready: true,
                line: true,
                decoder: Decoder {
                    cycles_per_bit: STANDARD_CYCLES_PER_BIT,
                    state: DecoderState::Idle,
                    event: None,
                },
                received: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.master
    }

    #[must_use]
    pub fn now(&self) -> u32 {
        self.master.tick()
    }

    /// Attach a device and cold reset it.
    pub fn add_device(&mut self, device: Box<dyn SioDevice>) -> DeviceId {
        let index = self.state.slots.len();
        self.state.slots.push(Slot {
            device,
            transmit: SerialBitTransmitQueue::new(EventTarget(index as u32), TRANSMIT_EVENT),
            level: true,
        });
        self.state
            .with_port(&mut self.master, index, |device, port| device.cold_reset(port));
        DeviceId(index)
    }

    /// Borrow an attached device as its concrete type.
    #[must_use]
    pub fn device<T: SioDevice>(&self, id: DeviceId) -> Option<&T> {
        self.state
            .slots
            .get(id.0)
            .and_then(|s| s.device.as_any().downcast_ref::<T>())
    }

    /// Call `f` with a device as its concrete type and its bus port.
    pub fn with_device<T: SioDevice, R>(
        &mut self,
        id: DeviceId,
        f: impl FnOnce(&mut T, &mut SioPort<'_>) -> R,
    ) -> Option<R> {
        if id.0 >= self.state.slots.len() {
            return None;
        }
        self.state.with_port(&mut self.master, id.0, |device, port| {
            device.as_any_mut().downcast_mut::<T>().map(|d| f(d, port))
        })
    }

    #[must_use]
    pub fn command(&self) -> bool {
        self.state.command
    }

    #[must_use]
    pub fn motor(&self) -> bool {
        self.state.motor
    }

    /// Level of DATA IN as the computer sees it.
    #[must_use]
    pub fn data_line(&self) -> bool {
        self.state.line
    }

    pub fn set_command(&mut self, asserted: bool) {
        self.state.set_command(&mut self.master, asserted);
    }

    pub fn set_motor(&mut self, asserted: bool) {
        if self.state.motor != asserted {
            self.state.motor = asserted;
            self.state.broadcast(&mut self.master, |device, port| {
                device.on_motor_state_changed(port, asserted);
            });
        }
    }

    pub fn set_ready(&mut self, asserted: bool) {
        if self.state.ready != asserted {
            self.state.ready = asserted;
            self.state.broadcast(&mut self.master, |device, port| {
                device.on_ready_state_changed(port, asserted);
            });
        }
    }

    /// Tell devices the computer is ready for their next byte.
    pub fn send_ready(&mut self) {
        self.state
            .broadcast(&mut self.master, |device, port| device.on_send_ready(port));
    }

    /// Queue a byte for the computer to shift out at `cycles_per_bit`.
    pub fn send_byte(&mut self, byte: u8, cycles_per_bit: u32) {
        self.state.ops.push_back(BusOp::Byte {
            byte,
            command: self.state.command,
            cycles_per_bit,
        });
        self.state.kick(&mut self.master);
    }

    /// Queue a complete command frame: COMMAND asserted, device, command,
    /// two aux bytes and the checksum, then COMMAND released.
    pub fn queue_command_frame(
        &mut self,
        device: u8,
        command: u8,
        aux1: u8,
        aux2: u8,
        cycles_per_bit: u32,
    ) {
        let mut frame = [device, command, aux1, aux2, 0];
        frame[4] = sio_checksum(&frame[..4]);

        let ops = &mut self.state.ops;
        ops.push_back(BusOp::Command(true));
        ops.push_back(BusOp::Delay(COMMAND_LEAD_CYCLES));
        for byte in frame {
            ops.push_back(BusOp::Byte {
                byte,
                command: true,
                cycles_per_bit,
            });
        }
        ops.push_back(BusOp::Delay(COMMAND_TRAIL_CYCLES));
        ops.push_back(BusOp::Command(false));
        self.state.kick(&mut self.master);
    }

    /// Cut the byte currently being shifted out short.
    pub fn truncate_byte(&mut self) {
        self.state.truncate_byte(&mut self.master);
    }

    /// True while queued bytes or command frame steps remain.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state.in_flight.is_some()
            || !self.state.ops.is_empty()
            || self.master.is_pending(self.state.op_event)
    }

    /// Bit period the decoder expects from devices.
    pub fn set_receive_cycles_per_bit(&mut self, cycles: u32) {
        self.state.decoder.cycles_per_bit = cycles.max(1);
    }

    /// Bytes decoded from DATA IN so far.
    #[must_use]
    pub fn received(&self) -> &[ReceivedByte] {
        &self.state.received
    }

    pub fn take_received(&mut self) -> Vec<ReceivedByte> {
        std::mem::take(&mut self.state.received)
    }

    /// Cold reset every device.
    pub fn cold_reset(&mut self) {
        self.state.broadcast(&mut self.master, |device, port| {
            port.transmit.reset(port.master);
            device.computer_cold_reset(port);
        });
        for slot in &mut self.state.slots {
            slot.level = true;
        }
        self.state.line = true;
        self.state.decoder.state = DecoderState::Idle;
        self.master.unset_event(&mut self.state.decoder.event);
    }

    pub fn warm_reset(&mut self) {
        self.state
            .broadcast(&mut self.master, |device, port| device.warm_reset(port));
    }

    /// Run the master clock to `stop`, syncing devices at least once per
    /// [`SYNC_SLICE`].
    pub fn run_until(&mut self, stop: u32) {
        loop {
            let now = self.master.tick();
            if tick_le(stop, now) {
                return;
            }
            let slice = (tick_delta(now, stop) as u32).min(SYNC_SLICE);
            self.master
                .run_until(now.wrapping_add(slice), &mut self.state);
            self.state.sync_all(&mut self.master);
        }
    }

    /// Run for `cycles` master cycles.
    pub fn run_for(&mut self, cycles: u32) {
        let stop = self.master.tick().wrapping_add(cycles);
        self.run_until(stop);
    }
}
