//! Everything the 6507 sees: the two RIOTs, their RAM, the queue of pin
//! changes arriving from outside, and the software UART decoders watching
//! the transmit pins.
//!
//! RIOT #1 (parallel, serial 1):
//!
//! | Pin | Dir | Signal                        |
//! |-----|-----|-------------------------------|
//! | PA0 | in  | serial 1 RX                   |
//! | PA1 | in  | serial 1 DSR (inverted)       |
//! | PA2 | in  | serial 2 DSR (inverted)       |
//! | PA3 | in  | serial 3 DSR (inverted)       |
//! | PA4 | in  | serial 1 CD (inverted)        |
//! | PA5 | in  | serial 1 CTS (inverted)       |
//! | PA6 | in  | grounded                      |
//! | PA7 | in  | SIO COMMAND (active high)     |
//! | PB  | out | parallel data D0-D7 (inverted)|
//!
//! RIOT #2 (serial 2-4, SIO data):
//!
//! | Pin | Dir | Signal                        |
//! |-----|-----|-------------------------------|
//! | PA0 | in  | SIO DATA OUT (inverted)       |
//! | PA1 | out | serial 1 TX                   |
//! | PA2 | out | serial 2 TX                   |
//! | PA3 | out | serial 3 TX                   |
//! | PA4 | out | serial 4 TX                   |
//! | PA5 | out | SIO DATA IN                   |
//! | PA6 | in  | parallel /FAULT (inverted)    |
//! | PA7 | in  | serial 3 RX                   |
//! | PB0 | in  | serial 4 RX                   |
//! | PB1 | out | serial 1 DTR (inverted)       |
//! | PB2 | out | serial 2 DTR (inverted)       |
//! | PB3 | out | serial 3 DTR (inverted)       |
//! | PB4 | out | serial 1 RTS                  |
//! | PB5 | out | parallel /STROBE (inverted)   |
//! | PB6 | in  | parallel BUSY (inverted)      |
//! | PB7 | in  | serial 2 RX                   |

use atari_sio::{SignalChange, SignalQueue};
use emu_core::{EventHandle, EventHandler, EventTarget, Scheduler, tick_delta};
use mos_6502::CoProcBoard;
use mos_riot_6532::Riot6532;

use crate::baud::{AUTO_BAUD_MIN_CYCLES_PER_BIT, BAUD_RATES, CYCLES_PER_BIT, closest_index};
use crate::ports::{ParallelPrinter, SerialPort, TerminalState};

pub(crate) const HANDLER_RIOT1: u8 = 1;
pub(crate) const HANDLER_RIOT2: u8 = 2;

const TARGET_RIOT1: EventTarget = EventTarget(0);
const TARGET_RIOT2: EventTarget = EventTarget(1);
const TARGET_BOARD: EventTarget = EventTarget(2);

const EVENT_SIGNAL: u32 = 1;
const EVENT_SHIFT_OUT: u32 = 16;

/// Signal lanes: RIOT #1 port A/B, RIOT #2 port A/B.
pub(crate) const LANE_1A: u32 = 0;
pub(crate) const LANE_1B: u32 = 1;
pub(crate) const LANE_2A: u32 = 2;
pub(crate) const LANE_2B: u32 = 3;

pub(crate) fn pins(lane: u32, value: u8, mask: u8) -> SignalChange {
    SignalChange::default().with_lane(lane, value, mask)
}

/// Pin that receives serial data for each port.
pub(crate) fn receive_pin(index: usize) -> (u32, u8) {
    match index {
        0 => (LANE_1A, 0x01),
        1 => (LANE_2B, 0x80),
        2 => (LANE_2A, 0x80),
        _ => (LANE_2B, 0x01),
    }
}

/// Software UART decoder for one transmit pin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct UartShifter {
    /// Zero while idle.
    pub cycles_per_bit: u32,
    /// Half a bit before the start bit's leading edge, so bit cells are
    /// sampled in their middle.
    pub start_base: u32,
    pub shift: u32,
    pub bits_shifted: u32,
    pub last_bit: bool,
}

pub(crate) struct Board {
    pub riot1: Riot6532,
    pub riot2: Riot6532,

    pub signals: SignalQueue,
    signal_event: Option<EventHandle>,

    pub shifters: [UartShifter; 4],
    shift_events: [Option<EventHandle>; 4],
    pub baud_settings: [u8; 4],
    pub baud_indices: [u8; 4],
    /// Master cycles per bit of the last byte the computer sent.
    pub last_pokey_cycles_per_bit: u32,
    pub master_rate: f64,

    pub serial: [Option<Box<dyn SerialPort>>; 4],
    pub printer: Option<Box<dyn ParallelPrinter>>,

    pub last_sio_data_in: bool,
    /// DATA IN edges at device ticks, waiting to be handed to the bus.
    pub transmit_bits: Vec<(u32, bool)>,
}

impl Board {
    pub fn new(master_rate: f64) -> Self {
        Self {
            riot1: Riot6532::new(TARGET_RIOT1),
            riot2: Riot6532::new(TARGET_RIOT2),
            signals: SignalQueue::new(),
            signal_event: None,
            shifters: [UartShifter::default(); 4],
            shift_events: [None; 4],
            baud_settings: [0; 4],
            baud_indices: [0; 4],
            last_pokey_cycles_per_bit: 0,
            master_rate,
            serial: [None, None, None, None],
            printer: None,
            last_sio_data_in: true,
            transmit_bits: Vec::new(),
        }
    }

    /// Queue a pin change at device tick `tick`.
    pub fn add_signal(
        &mut self,
        scheduler: &mut Scheduler,
        tick: u32,
        change: SignalChange,
        truncate: bool,
    ) {
        if let Err(e) = self.signals.add(scheduler.tick(), tick, change, truncate) {
            debug_assert!(false, "{e}");
            log::warn!("850: {e}; change dropped");
            return;
        }
        self.arm_signals(scheduler);
    }

    /// Apply what is due and schedule the next record.
    pub fn arm_signals(&mut self, scheduler: &mut Scheduler) {
        let now = scheduler.tick();
        while let Some(record) = self.signals.pop_due(now) {
            self.apply(record.change);
        }

        match self.signals.next_tick() {
            Some(tick) => {
                let delta = tick_delta(now, tick).max(1) as u32;
                scheduler.set_event(delta, TARGET_BOARD, EVENT_SIGNAL, &mut self.signal_event);
            }
            None => scheduler.unset_event(&mut self.signal_event),
        }
    }

    pub fn clear_signals(&mut self, scheduler: &mut Scheduler) {
        self.signals.clear();
        scheduler.unset_event(&mut self.signal_event);
    }

    pub fn apply(&mut self, change: SignalChange) {
        let (value, mask) = change.lane(LANE_1A);
        self.riot1.set_input_a(value, mask);
        let (value, mask) = change.lane(LANE_1B);
        self.riot1.set_input_b(value, mask);
        let (value, mask) = change.lane(LANE_2A);
        self.riot2.set_input_a(value, mask);
        let (value, mask) = change.lane(LANE_2B);
        self.riot2.set_input_b(value, mask);
    }

    /// Stop every UART decoder.
    pub fn reset_shifters(&mut self, scheduler: &mut Scheduler) {
        for (shifter, event) in self.shifters.iter_mut().zip(&mut self.shift_events) {
            scheduler.unset_event(event);
            shifter.cycles_per_bit = 0;
        }
    }

    /// Re-arm the end-of-byte events after a restore.
    pub fn rearm_shifters(&mut self, scheduler: &mut Scheduler) {
        let now = scheduler.tick();
        for index in 0..4 {
            let shifter = self.shifters[index];
            if shifter.cycles_per_bit == 0 {
                scheduler.unset_event(&mut self.shift_events[index]);
                continue;
            }
            let end = shifter
                .start_base
                .wrapping_add(shifter.cycles_per_bit * 10);
            let delta = tick_delta(now, end).max(1) as u32;
            scheduler.set_event(
                delta,
                TARGET_BOARD,
                EVENT_SHIFT_OUT + index as u32,
                &mut self.shift_events[index],
            );
        }
    }

    pub fn terminal_state(&self, index: usize) -> TerminalState {
        let pb = self.riot2.output_b();
        match index {
            0 => TerminalState {
                data_terminal_ready: pb & 0x02 == 0,
                request_to_send: pb & 0x10 == 0,
            },
            1 => TerminalState {
                data_terminal_ready: pb & 0x04 == 0,
                request_to_send: false,
            },
            2 => TerminalState {
                data_terminal_ready: pb & 0x08 == 0,
                request_to_send: false,
            },
            _ => TerminalState::default(),
        }
    }

    pub fn update_control(&mut self, index: usize) {
        let state = self.terminal_state(index);
        if let Some(device) = self.serial[index].as_mut() {
            device.set_terminal_state(state);
        }
    }

    /// Record a DATA IN edge if PA5 moved.
    pub fn update_sio_data_in(&mut self, scheduler: &Scheduler) {
        let level = self.riot2.output_a() & 0x20 != 0;
        if level != self.last_sio_data_in {
            self.last_sio_data_in = level;
            self.transmit_bits.push((scheduler.tick(), level));
        }
    }

    fn write_riot2(&mut self, scheduler: &mut Scheduler, address: u8, value: u8) {
        let prev_a = self.riot2.output_a();
        let prev_b = self.riot2.output_b();
        self.riot2.write(scheduler, address, value);
        let next_a = self.riot2.output_a();
        let next_b = self.riot2.output_b();

        let delta_a = prev_a ^ next_a;
        for index in 0..4 {
            if delta_a & (2 << index) != 0 {
                self.update_serial_output(scheduler, index, next_a);
            }
        }

        let delta_b = prev_b ^ next_b;
        if delta_b & 0x12 != 0 {
            self.update_control(0);
        }
        if delta_b & 0x04 != 0 {
            self.update_control(1);
        }
        if delta_b & 0x08 != 0 {
            self.update_control(2);
        }

        if next_b & !prev_b & 0x20 != 0 {
            let byte = !self.riot1.output_b();
            if let Some(printer) = self.printer.as_mut() {
                printer.write_raw(byte);
            }
        }

        self.update_sio_data_in(scheduler);
    }

    /// Track the transmit pin of serial port `index` after a change.
    pub fn update_serial_output(&mut self, scheduler: &mut Scheduler, index: usize, port_a: u8) {
        let now = scheduler.tick();
        let output = port_a & (2 << index) != 0;
        let mut shifter = self.shifters[index];

        if shifter.cycles_per_bit == 0 {
            if !output {
                self.start_shift_out(scheduler, index);
            }
            return;
        }

        let bit_counter = (now.wrapping_sub(shifter.start_base) / shifter.cycles_per_bit).min(10);
        let new_bits = bit_counter.saturating_sub(shifter.bits_shifted);

        if new_bits == 0 {
            // Unlike a plain sampler, an edge inside a bit cell is kept so
            // a start bit that goes high before its sample reads as a glitch.
            shifter.last_bit = output;
            self.shifters[index] = shifter;
            return;
        }

        if shifter.bits_shifted == 0 && shifter.last_bit {
            // The start bit was gone before it could be sampled.
            log::debug!("850 port {}: start bit glitch", index + 1);
            scheduler.unset_event(&mut self.shift_events[index]);
            self.shifters[index].cycles_per_bit = 0;
            if !output {
                self.start_shift_out(scheduler, index);
            }
            return;
        }

        shifter.bits_shifted = bit_counter;
        shifter.shift >>= new_bits;
        if shifter.last_bit {
            shifter.shift += 0x400 - (0x400 >> new_bits);
        }

        let prev_output = shifter.last_bit;
        shifter.last_bit = output;

        if bit_counter < 10 {
            self.shifters[index] = shifter;
            return;
        }

        scheduler.unset_event(&mut self.shift_events[index]);

        if shifter.shift & 0x200 != 0 {
            let byte = (shifter.shift >> 1) as u8;
            let baud = BAUD_RATES[usize::from(self.baud_indices[index])];
            log::debug!("850 port {}: sent ${byte:02X} at {baud} baud", index + 1);
            if let Some(device) = self.serial[index].as_mut() {
                device.write(baud, byte);
            }
        } else {
            log::debug!("850 port {}: framing error", index + 1);
        }

        shifter.cycles_per_bit = 0;
        self.shifters[index] = shifter;

        if prev_output && !output {
            self.start_shift_out(scheduler, index);
        }
    }

    fn start_shift_out(&mut self, scheduler: &mut Scheduler, index: usize) {
        let now = scheduler.tick();

        if self.baud_settings[index] == 0
            && self.last_pokey_cycles_per_bit > AUTO_BAUD_MIN_CYCLES_PER_BIT
        {
            let picked = closest_index(self.master_rate, self.last_pokey_cycles_per_bit);
            if picked != self.baud_indices[index] {
                log::debug!(
                    "850 port {}: auto-baud picked {} baud",
                    index + 1,
                    BAUD_RATES[usize::from(picked)]
                );
            }
            self.baud_indices[index] = picked;
        }

        let cycles_per_bit = CYCLES_PER_BIT[usize::from(self.baud_indices[index])];
        let start_base = now.wrapping_sub(cycles_per_bit / 2);
        self.shifters[index] = UartShifter {
            cycles_per_bit,
            start_base,
            shift: 0,
            bits_shifted: 0,
            last_bit: false,
        };

        let end = start_base.wrapping_add(cycles_per_bit * 10);
        scheduler.set_event(
            end.wrapping_sub(now),
            TARGET_BOARD,
            EVENT_SHIFT_OUT + index as u32,
            &mut self.shift_events[index],
        );
    }
}

impl EventHandler for Board {
    fn on_scheduled_event(&mut self, scheduler: &mut Scheduler, target: EventTarget, id: u32) {
        match target {
            TARGET_RIOT1 => self.riot1.handle_event(scheduler, id),
            TARGET_RIOT2 => self.riot2.handle_event(scheduler, id),
            TARGET_BOARD if id == EVENT_SIGNAL => {
                self.signal_event = None;
                self.arm_signals(scheduler);
            }
            TARGET_BOARD if (EVENT_SHIFT_OUT..EVENT_SHIFT_OUT + 4).contains(&id) => {
                let index = (id - EVENT_SHIFT_OUT) as usize;
                self.shift_events[index] = None;
                let port_a = self.riot2.output_a();
                self.update_serial_output(scheduler, index, port_a);
            }
            _ => log::warn!("850: unknown event {target:?}/{id}"),
        }
    }
}

impl CoProcBoard for Board {
    fn read(&mut self, scheduler: &mut Scheduler, handler: u8, address: u16) -> u8 {
        let ram_index = usize::from(address & 0x7F);
        match handler {
            HANDLER_RIOT1 if address & 0x80 == 0 => self.riot1.ram()[ram_index],
            HANDLER_RIOT1 => self.riot1.read(scheduler, address as u8),
            HANDLER_RIOT2 if address & 0x80 != 0 => self.riot2.ram()[ram_index],
            HANDLER_RIOT2 => self.riot2.read(scheduler, address as u8),
            _ => 0xFF,
        }
    }

    fn write(&mut self, scheduler: &mut Scheduler, handler: u8, address: u16, value: u8) {
        let ram_index = usize::from(address & 0x7F);
        match handler {
            HANDLER_RIOT1 if address & 0x80 == 0 => self.riot1.ram_mut()[ram_index] = value,
            HANDLER_RIOT1 => self.riot1.write(scheduler, address as u8, value),
            HANDLER_RIOT2 if address & 0x80 != 0 => self.riot2.ram_mut()[ram_index] = value,
            HANDLER_RIOT2 => self.write_riot2(scheduler, address as u8, value),
            _ => {}
        }
    }

    fn debug_read(&self, scheduler: &Scheduler, handler: u8, address: u16) -> u8 {
        let ram_index = usize::from(address & 0x7F);
        match handler {
            HANDLER_RIOT1 if address & 0x80 == 0 => self.riot1.ram()[ram_index],
            HANDLER_RIOT1 => self.riot1.debug_read(scheduler, address as u8),
            HANDLER_RIOT2 if address & 0x80 != 0 => self.riot2.ram()[ram_index],
            HANDLER_RIOT2 => self.riot2.debug_read(scheduler, address as u8),
            _ => 0xFF,
        }
    }
}
