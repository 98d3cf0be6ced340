//! MOS 6532 RAM-I/O-Timer (RIOT).
//!
//! 128 bytes of RAM, two 8-bit ports with data direction registers, an
//! interval timer with a 1/8/64/1024 prescaler, and an edge detector on
//! PA7. RAM select is decoded by the board; [`Riot6532::read`] and
//! [`Riot6532::write`] only see the I/O half.
//!
//! # Register decode (A4..A0)
//!
//! | A2 | Access | Meaning                                           |
//! |----|--------|---------------------------------------------------|
//! | 0  | R/W    | A1A0: 0 ORA, 1 DDRA, 2 ORB, 3 DDRB                |
//! | 1  | W, A4=1| timer: A1A0 prescale 1/8/64/1024, A3 IRQ enable   |
//! | 1  | W, A4=0| PA7 edge: A0 positive edge, A1 IRQ enable         |
//! | 1  | R, A0=0| timer (A3 sets IRQ enable), clears timer flag     |
//! | 1  | R, A0=1| flags: bit 7 timer, bit 6 PA7; clears PA7 flag    |
//!
//! The timer is computed from its underflow deadline. An event is only
//! queued for the underflow when the timer interrupt is enabled; otherwise
//! the flag is raised lazily when the chip is next accessed.

#![allow(clippy::cast_possible_truncation)]

use emu_core::{EventHandle, EventTarget, Scheduler};
use thiserror::Error;

/// Size of the on-chip RAM.
pub const RAM_SIZE: usize = 128;

pub const FLAG_TIMER: u8 = 0x80;
pub const FLAG_PA7: u8 = 0x40;

const EVENT_TIMER: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RiotError {
    #[error("RIOT RAM image is {0} bytes, expected {RAM_SIZE}")]
    RamSize(usize),
}

/// Register image used for save states.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RiotState {
    pub ram: Vec<u8>,
    pub ora: u8,
    pub orb: u8,
    pub ddra: u8,
    pub ddrb: u8,
    pub input_a: u8,
    pub input_b: u8,
    /// Timer value as of the save.
    pub timer: u8,
    /// Prescale as a shift: 0, 3, 6 or 10.
    pub timer_shift: u8,
    /// Ticks until the underflow; zero once the timer is counting at 1x.
    pub timer_remaining: u32,
    pub timer_underflowed: bool,
    pub flags: u8,
    pub timer_irq_enabled: bool,
    pub pa7_irq_enabled: bool,
    pub pa7_positive_edge: bool,
}

impl Default for RiotState {
    fn default() -> Self {
        Self {
            ram: vec![0; RAM_SIZE],
            ora: 0,
            orb: 0,
            ddra: 0,
            ddrb: 0,
            input_a: 0xFF,
            input_b: 0xFF,
            timer: 0,
            timer_shift: 0,
            timer_remaining: 0,
            timer_underflowed: true,
            flags: 0,
            timer_irq_enabled: false,
            pa7_irq_enabled: false,
            pa7_positive_edge: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerPosition {
    value: u8,
    /// Set when the underflow has passed but has not been applied yet.
    underflow_pending: bool,
}

/// MOS 6532 RIOT.
#[derive(Debug, Clone)]
pub struct Riot6532 {
    target: EventTarget,
    ram: [u8; RAM_SIZE],

    ora: u8,
    orb: u8,
    ddra: u8,
    ddrb: u8,
    input_a: u8,
    input_b: u8,

    timer_shift: u8,
    /// Tick of the underflow. Once underflowed, the 1x count runs from here.
    timer_deadline: u64,
    timer_underflowed: bool,

    flags: u8,
    timer_irq_enabled: bool,
    pa7_irq_enabled: bool,
    pa7_positive_edge: bool,
    pa7_level: bool,
    irq: bool,

    output: u16,
    output_changed: bool,

    timer_event: Option<EventHandle>,
}

impl Riot6532 {
    #[must_use]
    pub fn new(target: EventTarget) -> Self {
        Self {
            target,
            ram: [0; RAM_SIZE],
            ora: 0,
            orb: 0,
            ddra: 0,
            ddrb: 0,
            input_a: 0xFF,
            input_b: 0xFF,
            timer_shift: 0,
            timer_deadline: 0,
            timer_underflowed: true,
            flags: 0,
            timer_irq_enabled: false,
            pa7_irq_enabled: false,
            pa7_positive_edge: false,
            pa7_level: true,
            irq: false,
            output: 0xFFFF,
            output_changed: false,
            timer_event: None,
        }
    }

    #[must_use]
    pub fn target(&self) -> EventTarget {
        self.target
    }

    #[must_use]
    pub fn ram(&self) -> &[u8; RAM_SIZE] {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut [u8; RAM_SIZE] {
        &mut self.ram
    }

    /// Reset line. Ports become inputs, interrupts are disabled and the
    /// timer free-runs at 1x with its flag clear. RAM is untouched.
    pub fn reset(&mut self, scheduler: &mut Scheduler) {
        self.ora = 0;
        self.orb = 0;
        self.ddra = 0;
        self.ddrb = 0;
        self.timer_shift = 0;
        self.timer_deadline = scheduler.tick64();
        self.timer_underflowed = true;
        self.flags = 0;
        self.timer_irq_enabled = false;
        self.pa7_irq_enabled = false;
        self.pa7_positive_edge = false;
        self.pa7_level = self.port_a_pins() & 0x80 != 0;
        scheduler.unset_event(&mut self.timer_event);
        self.update_irq();
        self.update_output();
    }

    /// Read an I/O register (address bits A4..A0).
    pub fn read(&mut self, scheduler: &mut Scheduler, address: u8) -> u8 {
        if address & 0x04 == 0 {
            return self.debug_read(scheduler, address);
        }

        let now = scheduler.tick64();
        self.update_timer(now);

        if address & 0x01 == 0 {
            let value = self.timer_position(now).value;
            self.flags &= !FLAG_TIMER;
            self.timer_irq_enabled = address & 0x08 != 0;
            self.update_irq();
            self.update_timer_event(scheduler);
            value
        } else {
            let value = self.flags;
            self.flags &= !FLAG_PA7;
            self.update_irq();
            value
        }
    }

    /// Read an I/O register without side effects.
    #[must_use]
    pub fn debug_read(&self, scheduler: &Scheduler, address: u8) -> u8 {
        if address & 0x04 == 0 {
            return match address & 0x03 {
                0 => self.port_a_pins(),
                1 => self.ddra,
                2 => (self.input_b & !self.ddrb) | (self.orb & self.ddrb),
                _ => self.ddrb,
            };
        }

        let position = self.timer_position(scheduler.tick64());
        if address & 0x01 == 0 {
            position.value
        } else if position.underflow_pending {
            self.flags | FLAG_TIMER
        } else {
            self.flags
        }
    }

    /// Write an I/O register (address bits A4..A0).
    pub fn write(&mut self, scheduler: &mut Scheduler, address: u8, value: u8) {
        if address & 0x04 == 0 {
            match address & 0x03 {
                0 => self.ora = value,
                1 => self.ddra = value,
                2 => self.orb = value,
                _ => self.ddrb = value,
            }
            self.update_output();
            self.update_pa7();
            return;
        }

        if address & 0x10 != 0 {
            self.timer_shift = match address & 0x03 {
                0 => 0,
                1 => 3,
                2 => 6,
                _ => 10,
            };
            self.timer_deadline = scheduler.tick64() + (u64::from(value) << self.timer_shift) + 1;
            self.timer_underflowed = false;
            self.flags &= !FLAG_TIMER;
            self.timer_irq_enabled = address & 0x08 != 0;
            self.update_irq();
            self.update_timer_event(scheduler);
        } else {
            self.pa7_positive_edge = address & 0x01 != 0;
            self.pa7_irq_enabled = address & 0x02 != 0;
            self.update_irq();
        }
    }

    /// Drive port A input pins. Only bits set in `mask` change.
    pub fn set_input_a(&mut self, value: u8, mask: u8) {
        self.input_a ^= (self.input_a ^ value) & mask;
        self.update_pa7();
    }

    /// Drive port B input pins. Only bits set in `mask` change.
    pub fn set_input_b(&mut self, value: u8, mask: u8) {
        self.input_b ^= (self.input_b ^ value) & mask;
    }

    #[must_use]
    pub fn input_a(&self) -> u8 {
        self.input_a
    }

    #[must_use]
    pub fn input_b(&self) -> u8 {
        self.input_b
    }

    /// Deliver a scheduler event queued by this RIOT.
    pub fn handle_event(&mut self, scheduler: &mut Scheduler, id: u32) {
        if id == EVENT_TIMER {
            self.timer_event = None;
            self.update_timer(scheduler.tick64());
        } else {
            log::warn!("RIOT: unknown event id {id}");
        }
    }

    /// Driven port levels: PA in bits 0-7, PB in bits 8-15. Input bits
    /// read as 1.
    #[must_use]
    pub fn output(&self) -> u16 {
        self.output
    }

    #[must_use]
    pub fn output_a(&self) -> u8 {
        self.output as u8
    }

    #[must_use]
    pub fn output_b(&self) -> u8 {
        (self.output >> 8) as u8
    }

    /// The output word, if it changed since the last call.
    pub fn take_output_change(&mut self) -> Option<u16> {
        std::mem::take(&mut self.output_changed).then_some(self.output)
    }

    #[must_use]
    pub fn irq(&self) -> bool {
        self.irq
    }

    #[must_use]
    pub fn save_state(&self, scheduler: &Scheduler) -> RiotState {
        let now = scheduler.tick64();
        let position = self.timer_position(now);
        let underflowed = self.timer_underflowed || position.underflow_pending;
        let timer_remaining = if underflowed {
            0
        } else {
            (self.timer_deadline - now) as u32
        };

        let mut flags = self.flags;
        if position.underflow_pending {
            flags |= FLAG_TIMER;
        }

        RiotState {
            ram: self.ram.to_vec(),
            ora: self.ora,
            orb: self.orb,
            ddra: self.ddra,
            ddrb: self.ddrb,
            input_a: self.input_a,
            input_b: self.input_b,
            timer: position.value,
            timer_shift: self.timer_shift,
            timer_remaining,
            timer_underflowed: underflowed,
            flags,
            timer_irq_enabled: self.timer_irq_enabled,
            pa7_irq_enabled: self.pa7_irq_enabled,
            pa7_positive_edge: self.pa7_positive_edge,
        }
    }

    /// Restore from a save state. The RAM image must be exactly
    /// [`RAM_SIZE`] bytes; on error nothing is changed.
    pub fn load_state(
        &mut self,
        scheduler: &mut Scheduler,
        state: &RiotState,
    ) -> Result<(), RiotError> {
        let ram: [u8; RAM_SIZE] = state
            .ram
            .as_slice()
            .try_into()
            .map_err(|_| RiotError::RamSize(state.ram.len()))?;

        let now = scheduler.tick64();
        self.ram = ram;
        self.ora = state.ora;
        self.orb = state.orb;
        self.ddra = state.ddra;
        self.ddrb = state.ddrb;
        self.input_a = state.input_a;
        self.input_b = state.input_b;
        self.timer_shift = match state.timer_shift {
            0 | 3 | 6 | 10 => state.timer_shift,
            _ => 0,
        };
        self.timer_underflowed = state.timer_underflowed || state.timer_remaining == 0;
        self.timer_deadline = if self.timer_underflowed {
            now.wrapping_sub(u64::from(0xFF - state.timer))
        } else {
            now + u64::from(state.timer_remaining)
        };
        self.flags = state.flags & (FLAG_TIMER | FLAG_PA7);
        self.timer_irq_enabled = state.timer_irq_enabled;
        self.pa7_irq_enabled = state.pa7_irq_enabled;
        self.pa7_positive_edge = state.pa7_positive_edge;
        self.pa7_level = self.port_a_pins() & 0x80 != 0;

        scheduler.unset_event(&mut self.timer_event);
        self.update_irq();
        self.update_timer_event(scheduler);
        self.update_output();
        Ok(())
    }

    // --- Internal helpers ---

    fn port_a_pins(&self) -> u8 {
        (self.input_a & !self.ddra) | (self.ora & self.ddra)
    }

    fn update_output(&mut self) {
        let pa = u16::from(self.ora | !self.ddra);
        let pb = u16::from(self.orb | !self.ddrb);
        let output = pa | (pb << 8);
        if output != self.output {
            self.output = output;
            self.output_changed = true;
        }
    }

    fn update_pa7(&mut self) {
        let level = self.port_a_pins() & 0x80 != 0;
        if level == self.pa7_level {
            return;
        }
        self.pa7_level = level;
        if level == self.pa7_positive_edge {
            self.flags |= FLAG_PA7;
            self.update_irq();
        }
    }

    fn update_irq(&mut self) {
        self.irq = (self.flags & FLAG_TIMER != 0 && self.timer_irq_enabled)
            || (self.flags & FLAG_PA7 != 0 && self.pa7_irq_enabled);
    }

    fn timer_position(&self, now: u64) -> TimerPosition {
        if !self.timer_underflowed && now < self.timer_deadline {
            // The count drops one tick after the write, then once per period.
            let remaining = self.timer_deadline - now;
            return TimerPosition {
                value: ((remaining - 1) >> self.timer_shift) as u8,
                underflow_pending: false,
            };
        }

        let since = now.wrapping_sub(self.timer_deadline);
        TimerPosition {
            value: 0xFF - (since & 0xFF) as u8,
            underflow_pending: !self.timer_underflowed,
        }
    }

    fn update_timer(&mut self, now: u64) {
        if self.timer_position(now).underflow_pending {
            self.timer_underflowed = true;
            self.flags |= FLAG_TIMER;
            self.update_irq();
        }
    }

    fn update_timer_event(&mut self, scheduler: &mut Scheduler) {
        let now = scheduler.tick64();
        if self.timer_underflowed || !self.timer_irq_enabled || now >= self.timer_deadline {
            scheduler.unset_event(&mut self.timer_event);
            self.update_timer(now);
            return;
        }
        let remaining = (self.timer_deadline - now) as u32;
        scheduler.set_event(remaining, self.target, EVENT_TIMER, &mut self.timer_event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::{Clock, EventHandler};
    use proptest::prelude::*;

    const RIOT: EventTarget = EventTarget(3);

    struct Harness {
        riot: Riot6532,
        irq_at: Option<u32>,
    }

    impl EventHandler for Harness {
        fn on_scheduled_event(&mut self, scheduler: &mut Scheduler, target: EventTarget, id: u32) {
            assert_eq!(target, RIOT);
            self.riot.handle_event(scheduler, id);
            if self.riot.irq() && self.irq_at.is_none() {
                self.irq_at = Some(scheduler.tick());
            }
        }
    }

    fn setup() -> (Harness, Scheduler) {
        let mut scheduler = Scheduler::new(Clock::new(1_000_000, 1));
        let mut riot = Riot6532::new(RIOT);
        riot.reset(&mut scheduler);
        let _ = riot.take_output_change();
        (Harness { riot, irq_at: None }, scheduler)
    }

    #[test]
    fn ports_read_back_through_ddr() {
        let (mut h, mut scheduler) = setup();
        h.riot.write(&mut scheduler, 0x01, 0x0F);
        h.riot.write(&mut scheduler, 0x00, 0x5A);
        h.riot.set_input_a(0x30, 0xFF);
        assert_eq!(h.riot.read(&mut scheduler, 0x00), 0x3A);
        assert_eq!(h.riot.read(&mut scheduler, 0x01), 0x0F);
        assert_eq!(h.riot.output_a(), 0xFA);
        assert_eq!(h.riot.take_output_change(), Some(0xFFFA));
        assert_eq!(h.riot.take_output_change(), None);
    }

    #[test]
    fn undriven_port_b_floats_high() {
        let (mut h, mut scheduler) = setup();
        h.riot.write(&mut scheduler, 0x03, 0xF0);
        h.riot.write(&mut scheduler, 0x02, 0x00);
        assert_eq!(h.riot.output_b(), 0x0F);
    }

    #[test]
    fn timer_counts_at_prescale_then_1x() {
        let (mut h, mut scheduler) = setup();
        // Divide by 8, value 2.
        h.riot.write(&mut scheduler, 0x15, 0x02);
        let mut values = Vec::new();
        for t in [0, 1, 8, 9, 16, 17, 18] {
            scheduler.run_until(t, &mut h);
            values.push(h.riot.debug_read(&scheduler, 0x04));
        }
        assert_eq!(values, vec![2, 1, 1, 0, 0, 0xFF, 0xFE]);
        assert_eq!(h.riot.debug_read(&scheduler, 0x05) & FLAG_TIMER, FLAG_TIMER);
    }

    #[test]
    fn timer_read_clears_flag() {
        let (mut h, mut scheduler) = setup();
        h.riot.write(&mut scheduler, 0x14, 0x03);
        scheduler.run_until(10, &mut h);
        assert_ne!(h.riot.read(&mut scheduler, 0x05) & FLAG_TIMER, 0);
        let _ = h.riot.read(&mut scheduler, 0x04);
        assert_eq!(h.riot.read(&mut scheduler, 0x05) & FLAG_TIMER, 0);
    }

    #[test]
    fn timer_irq_fires_at_underflow() {
        let (mut h, mut scheduler) = setup();
        // Divide by 64, value 3, IRQ enabled.
        h.riot.write(&mut scheduler, 0x1E, 0x03);
        scheduler.run_until(1000, &mut h);
        assert_eq!(h.irq_at, Some(3 * 64 + 1));
        assert!(h.riot.irq());
        let _ = h.riot.read(&mut scheduler, 0x0C);
        assert!(!h.riot.irq());
    }

    #[test]
    fn pa7_edge_sets_flag_and_irq() {
        let (mut h, mut scheduler) = setup();
        // Negative edge, IRQ enabled.
        h.riot.write(&mut scheduler, 0x06, 0);
        h.riot.set_input_a(0x00, 0x80);
        assert!(h.riot.irq());
        assert_eq!(h.riot.read(&mut scheduler, 0x05) & FLAG_PA7, FLAG_PA7);
        assert!(!h.riot.irq());

        h.riot.set_input_a(0x80, 0x80);
        assert_eq!(h.riot.debug_read(&scheduler, 0x05) & FLAG_PA7, 0);
    }

    #[test]
    fn pa7_positive_edge_select() {
        let (mut h, mut scheduler) = setup();
        h.riot.write(&mut scheduler, 0x05, 0);
        h.riot.set_input_a(0x00, 0x80);
        assert_eq!(h.riot.debug_read(&scheduler, 0x05) & FLAG_PA7, 0);
        h.riot.set_input_a(0x80, 0x80);
        assert_eq!(h.riot.debug_read(&scheduler, 0x05) & FLAG_PA7, FLAG_PA7);
        assert!(!h.riot.irq());
    }

    #[test]
    fn reset_keeps_ram() {
        let (mut h, mut scheduler) = setup();
        h.riot.ram_mut()[5] = 0x42;
        h.riot.write(&mut scheduler, 0x03, 0xFF);
        h.riot.reset(&mut scheduler);
        assert_eq!(h.riot.ram()[5], 0x42);
        assert_eq!(h.riot.output(), 0xFFFF);
    }

    #[test]
    fn snapshot_rejects_wrong_ram_size() {
        let (mut h, mut scheduler) = setup();
        let mut state = h.riot.save_state(&scheduler);
        state.ram.pop();
        state.ora = 0x12;
        assert_eq!(
            h.riot.load_state(&mut scheduler, &state),
            Err(RiotError::RamSize(RAM_SIZE - 1))
        );
        assert_eq!(h.riot.save_state(&scheduler).ora, 0);
    }

    #[test]
    fn snapshot_resumes_prescaled_timer() {
        let (mut h, mut scheduler) = setup();
        h.riot.write(&mut scheduler, 0x1D, 0x04);
        scheduler.run_until(13, &mut h);
        let state = h.riot.save_state(&scheduler);

        let (mut other, mut other_scheduler) = setup();
        other_scheduler.run_until(500, &mut other);
        other
            .riot
            .load_state(&mut other_scheduler, &state)
            .expect("RAM image has the right size");
        assert_eq!(other.riot.save_state(&other_scheduler), state);

        let expected = 4 * 8 + 1 - 13;
        other_scheduler.run_until(500 + expected - 1, &mut other);
        assert!(!other.riot.irq());
        other_scheduler.run_until(500 + expected, &mut other);
        assert!(other.riot.irq());
    }

    proptest! {
        #[test]
        fn flag_rises_exactly_at_underflow(value in 0u8..=255, prescale in 0u8..4) {
            let (mut h, mut scheduler) = setup();
            h.riot.write(&mut scheduler, 0x1C | prescale, value);
            let shift = [0, 3, 6, 10][usize::from(prescale)];
            let underflow = (u32::from(value) << shift) + 1;
            scheduler.run_until(underflow + 10, &mut h);
            prop_assert_eq!(h.irq_at, Some(underflow));
        }
    }
}
