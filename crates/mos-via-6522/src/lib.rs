//! MOS 6522 Versatile Interface Adapter (VIA).
//!
//! Two 8-bit ports, four control lines, two 16-bit timers, a shift
//! register and an interrupt controller. The chip never ticks: timers are
//! counted down arithmetically from the time of their last update, and
//! scheduler events are only queued when an underflow would be observable
//! (an interrupt flag to raise or PB7 to toggle).
//!
//! The owner of the scheduler routes events tagged with the VIA's
//! [`EventTarget`] to [`Via6522::handle_event`], then polls
//! [`Via6522::take_output_change`] and [`Via6522::irq`] for changes.
//!
//! # Registers ($0-$F)
//!
//! | Reg | Name | Description                              |
//! |-----|------|------------------------------------------|
//! | $0  | ORB  | Port B data (handshake on access)        |
//! | $1  | ORA  | Port A data (handshake on access)        |
//! | $2  | DDRB | Port B data direction (1 = output)       |
//! | $3  | DDRA | Port A data direction (1 = output)       |
//! | $4  | T1CL | Timer 1 counter low (read clears T1 IRQ) |
//! | $5  | T1CH | Timer 1 counter high (write starts T1)   |
//! | $6  | T1LL | Timer 1 latch low                        |
//! | $7  | T1LH | Timer 1 latch high (write clears T1 IRQ) |
//! | $8  | T2CL | Timer 2 counter low (read clears T2 IRQ) |
//! | $9  | T2CH | Timer 2 counter high (write starts T2)   |
//! | $A  | SR   | Shift register                           |
//! | $B  | ACR  | Auxiliary control register               |
//! | $C  | PCR  | Peripheral control register              |
//! | $D  | IFR  | Interrupt flag register                  |
//! | $E  | IER  | Interrupt enable register                |
//! | $F  | ORA  | Port A data (no handshake)               |
//!
//! # Output word
//!
//! [`Via6522::output`] packs the driven lines as `PA | PB << 8`, with CA2
//! at bit 16 and CB2 at bit 17. Port bits configured as inputs read back
//! as 1.

#![allow(clippy::cast_possible_truncation)]

use emu_core::{EventHandle, EventTarget, Scheduler};

// IFR bit positions
pub const IFR_CA2: u8 = 0x01;
pub const IFR_CA1: u8 = 0x02;
pub const IFR_SR: u8 = 0x04;
pub const IFR_CB2: u8 = 0x08;
pub const IFR_CB1: u8 = 0x10;
pub const IFR_T2: u8 = 0x20;
pub const IFR_T1: u8 = 0x40;

/// CA2 line in the output word.
pub const OUTPUT_CA2: u32 = 0x1_0000;
/// CB2 line in the output word.
pub const OUTPUT_CB2: u32 = 0x2_0000;

const EVENT_CA2_ASSERT: u32 = 1;
const EVENT_CA2_DEASSERT: u32 = 2;
const EVENT_CB2_ASSERT: u32 = 3;
const EVENT_CB2_DEASSERT: u32 = 4;
const EVENT_T1: u32 = 5;
const EVENT_T2: u32 = 6;

/// Register image used for save states.
///
/// Timer counters are the values as of the moment of the save. Loading
/// restarts the timers from those values at the loading scheduler's tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ViaState {
    pub ira: u8,
    pub irb: u8,
    pub ora: u8,
    pub orb: u8,
    pub ddra: u8,
    pub ddrb: u8,
    pub t1l: u16,
    pub t1c: u16,
    pub t2l: u16,
    pub t2c: u16,
    pub sr: u8,
    pub acr: u8,
    pub pcr: u8,
    pub ifr: u8,
    pub ier: u8,
}

/// Timer 1 position after some number of elapsed cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct T1Position {
    counter: u16,
    reload_pending: bool,
    underflows: u64,
}

/// Count timer 1 forward by `elapsed` cycles.
///
/// The counter runs N, N-1, ..., 0, $FFFF and then reloads from the
/// latch, so the period between underflows is latch + 2 cycles. A pending
/// reload means the counter shows $FFFF (or the fresh latch value after a
/// T1CH write) and takes the latch on the next cycle.
fn t1_advance(counter: u16, reload_pending: bool, latch: u16, elapsed: u64) -> T1Position {
    if elapsed == 0 {
        return T1Position {
            counter,
            reload_pending,
            underflows: 0,
        };
    }

    let first = if reload_pending {
        u64::from(latch) + 2
    } else {
        u64::from(counter) + 1
    };

    if elapsed < first {
        let counter = if reload_pending {
            latch - (elapsed - 1) as u16
        } else {
            counter - elapsed as u16
        };
        return T1Position {
            counter,
            reload_pending: false,
            underflows: 0,
        };
    }

    let period = u64::from(latch) + 2;
    let rest = elapsed - first;
    let remainder = rest % period;
    let underflows = 1 + rest / period;
    if remainder == 0 {
        T1Position {
            counter: 0xFFFF,
            reload_pending: true,
            underflows,
        }
    } else {
        T1Position {
            counter: latch - (remainder - 1) as u16,
            reload_pending: false,
            underflows,
        }
    }
}

/// MOS 6522 Versatile Interface Adapter.
#[derive(Debug, Clone)]
pub struct Via6522 {
    target: EventTarget,

    /// Port A input latch (follows the pins unless ACR bit 0 latches).
    ira: u8,
    /// Port B input latch (follows the pins unless ACR bit 1 latches).
    irb: u8,
    ora: u8,
    orb: u8,
    ddra: u8,
    ddrb: u8,
    port_a_input: u8,
    port_b_input: u8,

    t1_counter: u16,
    t1_latch: u16,
    t1_reload_pending: bool,
    t1_last_update: u64,
    /// PB7 as driven by timer 1. Low between a T1CH write and the first
    /// underflow; visible on the pin only while ACR bit 7 is set.
    timer_pb7: u8,
    timer_pb7_mask: u8,

    t2_counter: u16,
    t2_latch_lo: u8,
    /// T2 raises its flag only once per T2CH write.
    t2_armed: bool,
    t2_last_update: u64,

    sr: u8,
    acr: u8,
    pcr: u8,
    ifr: u8,
    ier: u8,
    irq: bool,

    ca1_input: bool,
    ca2_input: bool,
    cb1_input: bool,
    cb2_input: bool,
    ca2_output: bool,
    cb2_output: bool,

    output: u32,
    output_changed: bool,

    ca2_event: Option<EventHandle>,
    cb2_event: Option<EventHandle>,
    t1_event: Option<EventHandle>,
    t2_event: Option<EventHandle>,
}

impl Via6522 {
    /// A VIA in its power-on state. Events are queued under `target`.
    #[must_use]
    pub fn new(target: EventTarget) -> Self {
        Self {
            target,
            ira: 0xFF,
            irb: 0xFF,
            ora: 0,
            orb: 0,
            ddra: 0,
            ddrb: 0,
            port_a_input: 0xFF,
            port_b_input: 0xFF,
            t1_counter: 0,
            t1_latch: 0,
            t1_reload_pending: false,
            t1_last_update: 0,
            timer_pb7: 0xFF,
            timer_pb7_mask: 0,
            t2_counter: 0,
            t2_latch_lo: 0,
            t2_armed: false,
            t2_last_update: 0,
            sr: 0,
            acr: 0,
            pcr: 0,
            ifr: 0,
            ier: 0,
            irq: false,
            ca1_input: true,
            ca2_input: true,
            cb1_input: true,
            cb2_input: true,
            ca2_output: true,
            cb2_output: true,
            output: 0x3_FFFF,
            output_changed: false,
            ca2_event: None,
            cb2_event: None,
            t1_event: None,
            t2_event: None,
        }
    }

    #[must_use]
    pub fn target(&self) -> EventTarget {
        self.target
    }

    /// Hardware reset. Registers clear, ports float high, every pending
    /// event is cancelled.
    pub fn reset(&mut self, scheduler: &mut Scheduler) {
        let now = scheduler.tick64();

        self.ira = self.port_a_input;
        self.irb = self.port_b_input;
        self.ora = 0;
        self.orb = 0;
        self.ddra = 0;
        self.ddrb = 0;
        self.t1_counter = 0;
        self.t1_latch = 0;
        self.t1_reload_pending = false;
        self.t1_last_update = now;
        self.timer_pb7 = 0xFF;
        self.timer_pb7_mask = 0;
        self.t2_counter = 0;
        self.t2_latch_lo = 0;
        self.t2_armed = false;
        self.t2_last_update = now;
        self.sr = 0;
        self.acr = 0;
        self.pcr = 0;
        self.ifr = 0;
        self.ier = 0;
        self.ca2_output = true;
        self.cb2_output = true;

        scheduler.unset_event(&mut self.ca2_event);
        scheduler.unset_event(&mut self.cb2_event);
        scheduler.unset_event(&mut self.t1_event);
        scheduler.unset_event(&mut self.t2_event);

        self.update_irq();
        self.update_output();
    }

    /// Read a register with side effects (flag clearing, handshakes).
    pub fn read(&mut self, scheduler: &mut Scheduler, reg: u8) -> u8 {
        match reg & 0x0F {
            0x00 => {
                let value = self.read_port_b();
                let mut clear = IFR_CB1;
                if matches!(self.pcr & 0xE0, 0x00 | 0x40) {
                    clear |= IFR_CB2;
                }
                self.clear_if(scheduler, clear);
                if self.pcr & 0xE0 == 0x80 {
                    scheduler.set_event(1, self.target, EVENT_CB2_ASSERT, &mut self.cb2_event);
                }
                value
            }
            0x01 => {
                let value = self.read_port_a();
                let mut clear = IFR_CA1;
                if matches!(self.pcr & 0x0E, 0x00 | 0x04) {
                    clear |= IFR_CA2;
                }
                self.clear_if(scheduler, clear);
                if self.pcr & 0x0E == 0x08 {
                    scheduler.set_event(1, self.target, EVENT_CA2_ASSERT, &mut self.ca2_event);
                }
                value
            }
            0x04 => {
                self.update_t1_state(scheduler.tick64());
                let value = self.t1_counter as u8;
                self.clear_if(scheduler, IFR_T1);
                value
            }
            0x05 => {
                self.update_t1_state(scheduler.tick64());
                (self.t1_counter >> 8) as u8
            }
            0x08 => {
                self.update_t2_state(scheduler.tick64());
                let value = self.t2_counter as u8;
                self.clear_if(scheduler, IFR_T2);
                value
            }
            0x0A => {
                self.clear_if(scheduler, IFR_SR);
                self.sr
            }
            _ => self.debug_read(scheduler, reg),
        }
    }

    /// Read a register without side effects.
    #[must_use]
    pub fn debug_read(&self, scheduler: &Scheduler, reg: u8) -> u8 {
        let now = scheduler.tick64();
        match reg & 0x0F {
            0x00 => self.read_port_b(),
            0x01 | 0x0F => self.read_port_a(),
            0x02 => self.ddrb,
            0x03 => self.ddra,
            0x04 => self.t1_counter_at(now) as u8,
            0x05 => (self.t1_counter_at(now) >> 8) as u8,
            0x06 => self.t1_latch as u8,
            0x07 => (self.t1_latch >> 8) as u8,
            0x08 => self.t2_counter_at(now) as u8,
            0x09 => (self.t2_counter_at(now) >> 8) as u8,
            0x0A => self.sr,
            0x0B => self.acr,
            0x0C => self.pcr,
            0x0D => {
                let mut value = self.ifr_at(now);
                if value & self.ier != 0 {
                    value |= 0x80;
                }
                value
            }
            _ => self.ier | 0x80,
        }
    }

    /// Write a register.
    pub fn write(&mut self, scheduler: &mut Scheduler, reg: u8, value: u8) {
        match reg & 0x0F {
            0x00 => {
                self.orb = value;
                self.update_output();
                let mut clear = IFR_CB1;
                if matches!(self.pcr & 0xE0, 0x00 | 0x40) {
                    clear |= IFR_CB2;
                }
                self.clear_if(scheduler, clear);
                if self.pcr & 0xE0 == 0x80 {
                    scheduler.set_event(1, self.target, EVENT_CB2_ASSERT, &mut self.cb2_event);
                }
            }
            0x01 => {
                self.ora = value;
                self.update_output();
                let mut clear = IFR_CA1;
                if matches!(self.pcr & 0x0E, 0x00 | 0x04) {
                    clear |= IFR_CA2;
                }
                self.clear_if(scheduler, clear);
                if self.pcr & 0x0E == 0x08 {
                    scheduler.set_event(1, self.target, EVENT_CA2_ASSERT, &mut self.ca2_event);
                }
            }
            0x02 => {
                self.ddrb = value;
                self.update_output();
            }
            0x03 => {
                self.ddra = value;
                self.update_output();
            }
            0x04 | 0x06 => {
                self.update_t1_state(scheduler.tick64());
                self.t1_latch = (self.t1_latch & 0xFF00) | u16::from(value);
                self.update_t1_event(scheduler);
            }
            0x05 => {
                self.update_t1_state(scheduler.tick64());
                self.t1_latch = (self.t1_latch & 0x00FF) | (u16::from(value) << 8);
                self.t1_counter = self.t1_latch;
                self.t1_reload_pending = true;
                self.t1_last_update = scheduler.tick64();
                self.timer_pb7 = 0;
                self.update_output();
                self.clear_if(scheduler, IFR_T1);
                self.update_t1_event(scheduler);
            }
            0x07 => {
                self.update_t1_state(scheduler.tick64());
                self.t1_latch = (self.t1_latch & 0x00FF) | (u16::from(value) << 8);
                self.clear_if(scheduler, IFR_T1);
                self.update_t1_event(scheduler);
            }
            0x08 => self.t2_latch_lo = value,
            0x09 => {
                self.t2_counter = u16::from(self.t2_latch_lo) | (u16::from(value) << 8);
                self.t2_last_update = scheduler.tick64();
                self.t2_armed = true;
                self.clear_if(scheduler, IFR_T2);
                self.update_t2_event(scheduler);
            }
            0x0A => {
                self.sr = value;
                self.clear_if(scheduler, IFR_SR);
            }
            0x0B => self.write_acr(scheduler, value),
            0x0C => self.write_pcr(scheduler, value),
            0x0D => self.clear_if(scheduler, value & 0x7F),
            0x0E => {
                if value & 0x80 != 0 {
                    self.ier |= value & 0x7F;
                } else {
                    self.ier &= !value;
                }
                self.update_irq();
            }
            _ => {
                self.ora = value;
                self.update_output();
            }
        }
    }

    /// Drive port A input pins. Only bits set in `mask` change.
    pub fn set_port_a_input(&mut self, value: u8, mask: u8) {
        self.port_a_input ^= (self.port_a_input ^ value) & mask;
        if self.acr & 0x01 == 0 {
            self.ira = self.port_a_input;
        }
    }

    /// Drive port B input pins. Only bits set in `mask` change.
    ///
    /// With ACR bit 5 set, falling edges on PB6 count timer 2 down.
    pub fn set_port_b_input(&mut self, value: u8, mask: u8) {
        let previous = self.port_b_input;
        self.port_b_input ^= (self.port_b_input ^ value) & mask;
        if self.acr & 0x02 == 0 {
            self.irb = self.port_b_input;
        }

        let pb6_fell = previous & !self.port_b_input & 0x40 != 0;
        if pb6_fell && self.acr & 0x20 != 0 {
            self.t2_counter = self.t2_counter.wrapping_sub(1);
            if self.t2_counter == 0 && self.t2_armed {
                self.t2_armed = false;
                self.set_if(IFR_T2);
            }
        }
    }

    pub fn set_ca1_input(&mut self, scheduler: &mut Scheduler, state: bool) {
        if self.ca1_input == state {
            return;
        }
        self.ca1_input = state;

        let positive = self.pcr & 0x01 != 0;
        if state == positive {
            if self.acr & 0x01 != 0 {
                self.ira = self.port_a_input;
            }
            self.set_if(IFR_CA1);
            if self.pcr & 0x0E == 0x08 {
                scheduler.set_event(1, self.target, EVENT_CA2_DEASSERT, &mut self.ca2_event);
            }
        }
    }

    pub fn set_ca2_input(&mut self, state: bool) {
        if self.ca2_input == state {
            return;
        }
        self.ca2_input = state;

        if self.pcr & 0x08 == 0 {
            let positive = self.pcr & 0x04 != 0;
            if state == positive {
                self.set_if(IFR_CA2);
            }
        }
    }

    pub fn set_cb1_input(&mut self, scheduler: &mut Scheduler, state: bool) {
        if self.cb1_input == state {
            return;
        }
        self.cb1_input = state;

        let positive = self.pcr & 0x10 != 0;
        if state == positive {
            if self.acr & 0x02 != 0 {
                self.irb = self.port_b_input;
            }
            self.set_if(IFR_CB1);
            if self.pcr & 0xE0 == 0x80 {
                scheduler.set_event(1, self.target, EVENT_CB2_DEASSERT, &mut self.cb2_event);
            }
        }
    }

    pub fn set_cb2_input(&mut self, state: bool) {
        if self.cb2_input == state {
            return;
        }
        self.cb2_input = state;

        if self.pcr & 0x80 == 0 {
            let positive = self.pcr & 0x40 != 0;
            if state == positive {
                self.set_if(IFR_CB2);
            }
        }
    }

    /// Deliver a scheduler event queued by this VIA.
    pub fn handle_event(&mut self, scheduler: &mut Scheduler, id: u32) {
        match id {
            EVENT_CA2_ASSERT => {
                self.ca2_event = None;
                self.set_ca2_output(false);
            }
            EVENT_CA2_DEASSERT => {
                self.ca2_event = None;
                self.set_ca2_output(true);
            }
            EVENT_CB2_ASSERT => {
                self.cb2_event = None;
                self.set_cb2_output(false);
            }
            EVENT_CB2_DEASSERT => {
                self.cb2_event = None;
                self.set_cb2_output(true);
            }
            EVENT_T1 => {
                self.t1_event = None;
                self.update_t1_event(scheduler);
            }
            EVENT_T2 => {
                self.t2_event = None;
                self.update_t2_state(scheduler.tick64());
            }
            _ => log::warn!("VIA: unknown event id {id}"),
        }
    }

    /// The packed output word: PA, PB, CA2 and CB2.
    #[must_use]
    pub fn output(&self) -> u32 {
        self.output
    }

    /// The output word, if it changed since the last call.
    pub fn take_output_change(&mut self) -> Option<u32> {
        std::mem::take(&mut self.output_changed).then_some(self.output)
    }

    /// State of the IRQ output (true = asserted).
    #[must_use]
    pub fn irq(&self) -> bool {
        self.irq
    }

    #[must_use]
    pub fn save_state(&self, scheduler: &Scheduler) -> ViaState {
        let now = scheduler.tick64();
        ViaState {
            ira: self.ira,
            irb: self.irb,
            ora: self.ora,
            orb: self.orb,
            ddra: self.ddra,
            ddrb: self.ddrb,
            t1l: self.t1_latch,
            t1c: self.t1_counter_at(now),
            t2l: u16::from(self.t2_latch_lo),
            t2c: self.t2_counter_at(now),
            sr: self.sr,
            acr: self.acr,
            pcr: self.pcr,
            ifr: self.ifr_at(now),
            ier: self.ier,
        }
    }

    /// Restore registers from a save state. Derived state (control line
    /// outputs, timer events, the IRQ line) is rebuilt through the same
    /// paths register writes take.
    pub fn load_state(&mut self, scheduler: &mut Scheduler, state: &ViaState) {
        self.reset(scheduler);

        self.ora = state.ora;
        self.orb = state.orb;
        self.ddra = state.ddra;
        self.ddrb = state.ddrb;
        self.t1_latch = state.t1l;
        self.t1_counter = state.t1c;
        self.t2_latch_lo = state.t2l as u8;
        self.t2_counter = state.t2c;
        self.sr = state.sr;
        self.acr = state.acr;
        self.timer_pb7_mask = if state.acr & 0x80 != 0 { 0x80 } else { 0 };
        if state.acr & 0x01 != 0 {
            self.ira = state.ira;
        }
        if state.acr & 0x02 != 0 {
            self.irb = state.irb;
        }

        self.write_pcr(scheduler, state.pcr);
        self.ifr = state.ifr & 0x7F;
        self.write(scheduler, 0x0E, 0x80 | state.ier);

        self.update_t1_event(scheduler);
        self.update_output();
    }

    // --- Internal helpers ---

    fn read_port_a(&self) -> u8 {
        (self.ira & !self.ddra) | (self.ora & self.ddra)
    }

    fn read_port_b(&self) -> u8 {
        let value = (self.irb & !self.ddrb) | (self.orb & self.ddrb);
        value ^ ((value ^ self.timer_pb7) & self.timer_pb7_mask)
    }

    fn write_acr(&mut self, scheduler: &mut Scheduler, value: u8) {
        let now = scheduler.tick64();
        self.update_t1_state(now);
        self.update_t2_state(now);

        let delta = self.acr ^ value;
        self.acr = value;

        if delta & 0x80 != 0 {
            self.timer_pb7_mask = if value & 0x80 != 0 { 0x80 } else { 0 };
            self.update_output();
        }
        if delta & 0xC0 != 0 {
            self.update_t1_event(scheduler);
        }
        if delta & 0x20 != 0 {
            self.update_t2_event(scheduler);
        }
        if delta & 0x01 != 0 && value & 0x01 == 0 {
            self.ira = self.port_a_input;
        }
        if delta & 0x02 != 0 && value & 0x02 == 0 {
            self.irb = self.port_b_input;
        }
        if delta & 0x1C != 0 {
            log::trace!("VIA: shift register mode {} not emulated", (value >> 2) & 7);
        }
    }

    fn write_pcr(&mut self, scheduler: &mut Scheduler, value: u8) {
        let delta = self.pcr ^ value;
        self.pcr = value;

        if delta & 0x0E != 0 {
            match (value >> 1) & 7 {
                0..=3 => {
                    scheduler.unset_event(&mut self.ca2_event);
                    self.set_ca2_output(true);
                }
                // Handshake: the line keeps its level until the next port access.
                4 => {}
                // TODO: pulse output mode should drop CA2 for one cycle after a port A access.
                5 => scheduler.unset_event(&mut self.ca2_event),
                6 => {
                    scheduler.unset_event(&mut self.ca2_event);
                    self.set_ca2_output(false);
                }
                _ => {
                    scheduler.unset_event(&mut self.ca2_event);
                    self.set_ca2_output(true);
                }
            }
        }

        if delta & 0xE0 != 0 {
            match value >> 5 {
                0..=3 => {
                    scheduler.unset_event(&mut self.cb2_event);
                    self.set_cb2_output(true);
                }
                4 => {}
                5 => scheduler.unset_event(&mut self.cb2_event),
                6 => {
                    scheduler.unset_event(&mut self.cb2_event);
                    self.set_cb2_output(false);
                }
                _ => {
                    scheduler.unset_event(&mut self.cb2_event);
                    self.set_cb2_output(true);
                }
            }
        }
    }

    fn set_ca2_output(&mut self, state: bool) {
        if self.ca2_output != state {
            self.ca2_output = state;
            self.update_output();
        }
    }

    fn set_cb2_output(&mut self, state: bool) {
        if self.cb2_output != state {
            self.cb2_output = state;
            self.update_output();
        }
    }

    fn update_output(&mut self) {
        let pa = u32::from(self.ora | !self.ddra);
        let pb = self.orb | !self.ddrb;
        let pb = pb ^ ((pb ^ self.timer_pb7) & self.timer_pb7_mask);

        let mut output = pa | (u32::from(pb) << 8);
        if self.ca2_output {
            output |= OUTPUT_CA2;
        }
        if self.cb2_output {
            output |= OUTPUT_CB2;
        }

        if output != self.output {
            self.output = output;
            self.output_changed = true;
        }
    }

    fn set_if(&mut self, mask: u8) {
        self.ifr |= mask;
        self.update_irq();
    }

    fn clear_if(&mut self, scheduler: &mut Scheduler, mask: u8) {
        if mask & IFR_T1 != 0 {
            self.update_t1_state(scheduler.tick64());
        }
        if mask & IFR_T2 != 0 {
            self.update_t2_state(scheduler.tick64());
        }

        let cleared = self.ifr & mask;
        self.ifr &= !mask;
        self.update_irq();

        if cleared & IFR_T1 != 0 {
            self.update_t1_event(scheduler);
        }
    }

    fn update_irq(&mut self) {
        self.irq = self.ifr & self.ier & 0x7F != 0;
    }

    fn t1_counter_at(&self, now: u64) -> u16 {
        let elapsed = now.saturating_sub(self.t1_last_update);
        t1_advance(self.t1_counter, self.t1_reload_pending, self.t1_latch, elapsed).counter
    }

    fn t2_counter_at(&self, now: u64) -> u16 {
        if self.acr & 0x20 != 0 {
            return self.t2_counter;
        }
        let elapsed = now.saturating_sub(self.t2_last_update);
        self.t2_counter.wrapping_sub(elapsed as u16)
    }

    /// IFR as it would read after catching both timers up to `now`.
    fn ifr_at(&self, now: u64) -> u8 {
        let mut ifr = self.ifr;

        let elapsed = now.saturating_sub(self.t1_last_update);
        let t1 = t1_advance(self.t1_counter, self.t1_reload_pending, self.t1_latch, elapsed);
        if t1.underflows > 0 && (self.acr & 0x40 != 0 || self.timer_pb7 & 0x80 == 0) {
            ifr |= IFR_T1;
        }

        if self.acr & 0x20 == 0 && self.t2_armed {
            let elapsed = now.saturating_sub(self.t2_last_update);
            if elapsed > u64::from(self.t2_counter) {
                ifr |= IFR_T2;
            }
        }
        ifr
    }

    /// Count timer 1 up to `now`, applying underflow side effects.
    fn update_t1_state(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.t1_last_update);
        self.t1_last_update = now;
        let t1 = t1_advance(self.t1_counter, self.t1_reload_pending, self.t1_latch, elapsed);
        self.t1_counter = t1.counter;
        self.t1_reload_pending = t1.reload_pending;

        if t1.underflows == 0 {
            return;
        }

        if self.acr & 0x40 != 0 {
            if t1.underflows & 1 != 0 {
                self.timer_pb7 ^= 0x80;
                self.update_output();
            }
            self.set_if(IFR_T1);
        } else if self.timer_pb7 & 0x80 == 0 {
            self.timer_pb7 |= 0x80;
            self.update_output();
            self.set_if(IFR_T1);
        }
    }

    /// Catch timer 1 up and queue an event for its next underflow if that
    /// underflow would change anything visible.
    fn update_t1_event(&mut self, scheduler: &mut Scheduler) {
        self.update_t1_state(scheduler.tick64());

        let free_run = self.acr & 0x40 != 0;
        let pb7_toggles = free_run && self.acr & 0x80 != 0;
        let raises_flag = self.ifr & IFR_T1 == 0 && (free_run || self.timer_pb7 & 0x80 == 0);
        let one_shot_pb7 = !free_run && self.timer_pb7 & 0x80 == 0 && self.acr & 0x80 != 0;

        if !(pb7_toggles || raises_flag || one_shot_pb7) {
            scheduler.unset_event(&mut self.t1_event);
            return;
        }

        let delay = if self.t1_reload_pending {
            u32::from(self.t1_latch) + 2
        } else {
            u32::from(self.t1_counter) + 1
        };
        scheduler.set_event(delay, self.target, EVENT_T1, &mut self.t1_event);
    }

    fn update_t2_state(&mut self, now: u64) {
        if self.acr & 0x20 == 0 {
            let elapsed = now.saturating_sub(self.t2_last_update);
            if self.t2_armed && elapsed > u64::from(self.t2_counter) {
                self.t2_armed = false;
                self.set_if(IFR_T2);
            }
            self.t2_counter = self.t2_counter.wrapping_sub(elapsed as u16);
        }
        self.t2_last_update = now;
    }

    fn update_t2_event(&mut self, scheduler: &mut Scheduler) {
        if self.acr & 0x20 == 0 && self.t2_armed {
            let delay = u32::from(self.t2_counter) + 1;
            scheduler.set_event(delay, self.target, EVENT_T2, &mut self.t2_event);
        } else {
            scheduler.unset_event(&mut self.t2_event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::{Clock, EventHandler};
    use proptest::prelude::*;

    const VIA: EventTarget = EventTarget(7);

    struct Harness {
        via: Via6522,
        changes: Vec<(u32, u32)>,
    }

    impl EventHandler for Harness {
        fn on_scheduled_event(&mut self, scheduler: &mut Scheduler, target: EventTarget, id: u32) {
            assert_eq!(target, VIA);
            self.via.handle_event(scheduler, id);
            if let Some(output) = self.via.take_output_change() {
                self.changes.push((scheduler.tick(), output));
            }
        }
    }

    fn setup() -> (Harness, Scheduler) {
        let mut scheduler = Scheduler::new(Clock::new(1_000_000, 1));
        let mut via = Via6522::new(VIA);
        via.reset(&mut scheduler);
        let _ = via.take_output_change();
        (
            Harness {
                via,
                changes: Vec::new(),
            },
            scheduler,
        )
    }

    fn pb7(output: u32) -> bool {
        output & 0x8000 != 0
    }

    #[test]
    fn reset_floats_outputs_high() {
        let (h, scheduler) = setup();
        assert_eq!(h.via.output(), 0x3_FFFF);
        assert!(!h.via.irq());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn free_running_timer_toggles_pb7_every_period() {
        let (mut h, mut scheduler) = setup();
        h.via.write(&mut scheduler, 0x0B, 0xC0);
        h.via.write(&mut scheduler, 0x04, 0x04);
        h.via.write(&mut scheduler, 0x05, 0x00);
        assert!(!pb7(h.via.output()));
        let _ = h.via.take_output_change();

        let mut flag_seen_at = None;
        for t in 1..=20 {
            scheduler.run_until(t, &mut h);
            if flag_seen_at.is_none() && h.via.debug_read(&scheduler, 0x0D) & IFR_T1 != 0 {
                flag_seen_at = Some(t);
            }
        }

        let toggles: Vec<u32> = h.changes.iter().map(|&(t, _)| t).collect();
        assert_eq!(toggles, vec![6, 12, 18]);
        let levels: Vec<bool> = h.changes.iter().map(|&(_, out)| pb7(out)).collect();
        assert_eq!(levels, vec![true, false, true]);
        assert_eq!(flag_seen_at, Some(6));
    }

    #[test]
    fn one_shot_fires_once_per_write() {
        let (mut h, mut scheduler) = setup();
        h.via.write(&mut scheduler, 0x0E, 0x80 | IFR_T1);
        h.via.write(&mut scheduler, 0x04, 0x10);
        h.via.write(&mut scheduler, 0x05, 0x00);

        scheduler.run_until(0x11, &mut h);
        assert!(!h.via.irq());
        scheduler.run_until(0x12, &mut h);
        assert!(h.via.irq());

        // Reading T1CL clears the flag; the timer keeps running but stays quiet.
        let _ = h.via.read(&mut scheduler, 0x04);
        assert!(!h.via.irq());
        scheduler.run_until(0x100, &mut h);
        assert!(!h.via.irq());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn counter_reads_count_down_through_ffff() {
        let (mut h, mut scheduler) = setup();
        h.via.write(&mut scheduler, 0x0B, 0x40);
        h.via.write(&mut scheduler, 0x04, 0x02);
        h.via.write(&mut scheduler, 0x05, 0x00);

        let mut seen = Vec::new();
        for t in 1..=6 {
            scheduler.run_until(t, &mut h);
            let lo = h.via.debug_read(&scheduler, 0x04);
            let hi = h.via.debug_read(&scheduler, 0x05);
            seen.push(u16::from(lo) | (u16::from(hi) << 8));
        }
        assert_eq!(seen, vec![2, 1, 0, 0xFFFF, 2, 1]);
    }

    #[test]
    fn timer2_one_shot_sets_flag_once() {
        let (mut h, mut scheduler) = setup();
        h.via.write(&mut scheduler, 0x08, 0x05);
        h.via.write(&mut scheduler, 0x09, 0x00);
        scheduler.run_until(5, &mut h);
        assert_eq!(h.via.debug_read(&scheduler, 0x0D) & IFR_T2, 0);
        scheduler.run_until(6, &mut h);
        assert_ne!(h.via.debug_read(&scheduler, 0x0D) & IFR_T2, 0);

        assert_eq!(h.via.read(&mut scheduler, 0x08), 0xFF);
        assert_eq!(h.via.debug_read(&scheduler, 0x0D) & IFR_T2, 0);
        scheduler.run_until(0x20000, &mut h);
        assert_eq!(h.via.debug_read(&scheduler, 0x0D) & IFR_T2, 0);
    }

    #[test]
    fn timer2_counts_pb6_pulses() {
        let (mut h, mut scheduler) = setup();
        h.via.write(&mut scheduler, 0x0B, 0x20);
        h.via.write(&mut scheduler, 0x08, 0x02);
        h.via.write(&mut scheduler, 0x09, 0x00);

        h.via.set_port_b_input(0x00, 0x40);
        assert_eq!(h.via.debug_read(&scheduler, 0x0D) & IFR_T2, 0);
        h.via.set_port_b_input(0x40, 0x40);
        h.via.set_port_b_input(0x00, 0x40);
        assert_ne!(h.via.debug_read(&scheduler, 0x0D) & IFR_T2, 0);
    }

    #[test]
    fn ifr_write_clears_flags() {
        let (mut h, mut scheduler) = setup();
        h.via.write(&mut scheduler, 0x0C, 0x11);
        h.via.set_ca1_input(&mut scheduler, false);
        h.via.set_ca1_input(&mut scheduler, true);
        h.via.set_cb1_input(&mut scheduler, false);
        h.via.set_cb1_input(&mut scheduler, true);
        assert_eq!(h.via.debug_read(&scheduler, 0x0D), IFR_CA1 | IFR_CB1);
        h.via.write(&mut scheduler, 0x0D, IFR_CA1);
        assert_eq!(h.via.debug_read(&scheduler, 0x0D), IFR_CB1);
    }

    #[test]
    fn ier_set_clear_mode() {
        let (mut h, mut scheduler) = setup();
        h.via.write(&mut scheduler, 0x0E, 0x80 | IFR_T1 | IFR_CB1);
        assert_eq!(h.via.read(&mut scheduler, 0x0E), 0x80 | IFR_T1 | IFR_CB1);
        h.via.write(&mut scheduler, 0x0E, IFR_T1);
        assert_eq!(h.via.read(&mut scheduler, 0x0E), 0x80 | IFR_CB1);
    }

    #[test]
    fn cb1_uses_its_own_edge_select() {
        let (mut h, mut scheduler) = setup();
        // CA1 positive, CB1 negative.
        h.via.write(&mut scheduler, 0x0C, 0x01);
        h.via.set_cb1_input(&mut scheduler, false);
        assert_ne!(h.via.debug_read(&scheduler, 0x0D) & IFR_CB1, 0);
        h.via.set_ca1_input(&mut scheduler, false);
        assert_eq!(h.via.debug_read(&scheduler, 0x0D) & IFR_CA1, 0);
    }

    #[test]
    fn enabled_flag_raises_irq_and_ifr_bit7() {
        let (mut h, mut scheduler) = setup();
        h.via.write(&mut scheduler, 0x0E, 0x80 | IFR_CA1);
        h.via.set_ca1_input(&mut scheduler, false);
        assert!(h.via.irq());
        assert_eq!(h.via.debug_read(&scheduler, 0x0D), 0x80 | IFR_CA1);

        let _ = h.via.read(&mut scheduler, 0x01);
        assert!(!h.via.irq());
    }

    #[test]
    fn independent_ca2_survives_port_read() {
        let (mut h, mut scheduler) = setup();
        // CA2 independent negative edge input.
        h.via.write(&mut scheduler, 0x0C, 0x02);
        h.via.set_ca2_input(false);
        let _ = h.via.read(&mut scheduler, 0x01);
        assert_ne!(h.via.debug_read(&scheduler, 0x0D) & IFR_CA2, 0);

        h.via.write(&mut scheduler, 0x0C, 0x00);
        let _ = h.via.read(&mut scheduler, 0x01);
        assert_eq!(h.via.debug_read(&scheduler, 0x0D) & IFR_CA2, 0);
    }

    #[test]
    fn port_b_read_leaves_ca2_flag() {
        let (mut h, mut scheduler) = setup();
        h.via.set_ca2_input(false);
        let _ = h.via.read(&mut scheduler, 0x00);
        assert_ne!(h.via.debug_read(&scheduler, 0x0D) & IFR_CA2, 0);
    }

    #[test]
    fn handshake_asserts_on_access_and_releases_on_ca1() {
        let (mut h, mut scheduler) = setup();
        h.via.write(&mut scheduler, 0x0C, 0x08);
        let _ = h.via.read(&mut scheduler, 0x01);
        assert_ne!(h.via.output() & OUTPUT_CA2, 0);
        scheduler.run_until(1, &mut h);
        assert_eq!(h.via.output() & OUTPUT_CA2, 0);

        h.via.set_ca1_input(&mut scheduler, false);
        scheduler.run_until(2, &mut h);
        assert_ne!(h.via.output() & OUTPUT_CA2, 0);
    }

    #[test]
    fn manual_cb2_output_modes() {
        let (mut h, mut scheduler) = setup();
        h.via.write(&mut scheduler, 0x0C, 0xC0);
        assert_eq!(h.via.output() & OUTPUT_CB2, 0);
        assert_ne!(h.via.output() & OUTPUT_CA2, 0);
        h.via.write(&mut scheduler, 0x0C, 0xE0);
        assert_ne!(h.via.output() & OUTPUT_CB2, 0);
    }

    #[test]
    fn ports_mix_outputs_and_inputs() {
        let (mut h, mut scheduler) = setup();
        h.via.write(&mut scheduler, 0x03, 0x0F);
        h.via.write(&mut scheduler, 0x0F, 0xAB);
        h.via.set_port_a_input(0xC0, 0xFF);
        assert_eq!(h.via.read(&mut scheduler, 0x0F), 0xCB);
        assert_eq!(h.via.output() & 0xFF, 0xFB);
    }

    #[test]
    fn latched_port_a_holds_until_ca1() {
        let (mut h, mut scheduler) = setup();
        h.via.write(&mut scheduler, 0x0B, 0x01);
        h.via.set_port_a_input(0x12, 0xFF);
        assert_eq!(h.via.read(&mut scheduler, 0x0F), 0xFF);
        h.via.set_ca1_input(&mut scheduler, false);
        assert_eq!(h.via.read(&mut scheduler, 0x0F), 0x12);
    }

    #[test]
    fn snapshot_round_trip_resumes_timer() {
        let (mut h, mut scheduler) = setup();
        h.via.write(&mut scheduler, 0x0B, 0xC0);
        h.via.write(&mut scheduler, 0x0E, 0x80 | IFR_T1);
        h.via.write(&mut scheduler, 0x04, 0x0A);
        h.via.write(&mut scheduler, 0x05, 0x00);
        scheduler.run_until(4, &mut h);
        let state = h.via.save_state(&scheduler);
        assert_eq!(state.t1c, 7);

        let (mut other, mut other_scheduler) = setup();
        other.via.load_state(&mut other_scheduler, &state);
        assert_eq!(other.via.save_state(&other_scheduler), state);
        other_scheduler.run_until(7, &mut other);
        assert!(!other.via.irq());
        other_scheduler.run_until(8, &mut other);
        assert!(other.via.irq());
    }

    proptest! {
        #[test]
        fn free_run_period_is_latch_plus_two(latch in 0u16..600) {
            let (mut h, mut scheduler) = setup();
            h.via.write(&mut scheduler, 0x0B, 0xC0);
            h.via.write(&mut scheduler, 0x04, latch as u8);
            h.via.write(&mut scheduler, 0x05, (latch >> 8) as u8);
            let period = u32::from(latch) + 2;
            scheduler.run_until(period * 4, &mut h);

            let ticks: Vec<u32> = h.changes.iter().map(|&(t, _)| t).collect();
            prop_assert_eq!(ticks, vec![period, period * 2, period * 3, period * 4]);
        }

        #[test]
        fn irq_tracks_enabled_flags(ops in prop::collection::vec((0u8..16, any::<u8>(), 0u32..40), 1..40)) {
            let (mut h, mut scheduler) = setup();
            for (reg, value, wait) in ops {
                if value & 1 == 0 {
                    h.via.write(&mut scheduler, reg, value);
                } else {
                    let _ = h.via.read(&mut scheduler, reg);
                }
                let stop = scheduler.tick() + wait;
                scheduler.run_until(stop, &mut h);
                let ifr = h.via.debug_read(&scheduler, 0x0D);
                let ier = h.via.debug_read(&scheduler, 0x0E);
                let expected = ifr & ier & 0x7F != 0;
                prop_assert_eq!(h.via.irq(), expected);
            }
        }
    }
}
