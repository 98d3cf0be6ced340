//! Bit-level egress from a device onto the SIO DATA IN line.
//!
//! A device discovers its output edges while its co-processor runs, which is
//! after the master clock has already moved past them. Edges are therefore
//! stamped at the master time they happened plus a fixed latency and replayed
//! by the master scheduler, so the receiver only ever sees them in its
//! future.

use std::collections::VecDeque;

use emu_core::{EventHandle, EventTarget, Scheduler, tick_delta, tick_le};

/// Master cycles added to every queued edge.
pub const TRANSMIT_LATENCY: u32 = 128;

/// Default bit period limit: 300 baud on the NTSC master clock.
pub const DEFAULT_MAX_CYCLES_PER_BIT: u32 = 5966;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransmitBit {
    pub tick: u32,
    pub level: bool,
}

#[derive(Debug)]
pub struct SerialBitTransmitQueue {
    bits: VecDeque<TransmitBit>,
    /// Level of the most recently queued edge.
    last_level: bool,
    max_cycles_per_bit: u32,
    target: EventTarget,
    event_id: u32,
    event: Option<EventHandle>,
}

impl SerialBitTransmitQueue {
    /// A queue whose replay event is delivered to `target` with `event_id`.
    #[must_use]
    pub fn new(target: EventTarget, event_id: u32) -> Self {
        Self {
            bits: VecDeque::new(),
            last_level: true,
            max_cycles_per_bit: DEFAULT_MAX_CYCLES_PER_BIT,
            target,
            event_id,
            event: None,
        }
    }

    #[must_use]
    pub fn target(&self) -> EventTarget {
        self.target
    }

    #[must_use]
    pub fn event_id(&self) -> u32 {
        self.event_id
    }

    /// Longest bit period the device may send with, in master cycles. A
    /// line held low for ten of these is a break rather than a byte.
    pub fn set_max_cycles_per_bit(&mut self, cycles: u32) {
        self.max_cycles_per_bit = cycles.max(1);
    }

    #[must_use]
    pub fn max_cycles_per_bit(&self) -> u32 {
        self.max_cycles_per_bit
    }

    /// Level the line will settle at once every queued edge has played.
    #[must_use]
    pub fn last_level(&self) -> bool {
        self.last_level
    }

    /// Queue an edge at master tick `tick`.
    ///
    /// Repeats of the current level are dropped. A tick that is not in the
    /// future is moved to the next master cycle.
    pub fn add_transmit_bit(&mut self, scheduler: &mut Scheduler, tick: u32, level: bool) {
        if level == self.last_level {
            return;
        }

        let now = scheduler.tick();
        let mut tick = tick;
        if tick_le(tick, now) {
            log::warn!(
                "transmit bit at {tick} is {} cycles late, moved to {}",
                tick_delta(tick, now),
                now.wrapping_add(1)
            );
            tick = now.wrapping_add(1);
        }

        if let Some(back) = self.bits.back() {
            if tick_le(tick, back.tick) {
                tick = back.tick.wrapping_add(1);
            }
        }

        log::trace!("transmit bit {} @{tick}", u8::from(level));
        self.last_level = level;
        self.bits.push_back(TransmitBit { tick, level });

        if self.bits.len() == 1 {
            self.rearm(scheduler);
        }
    }

    /// Take every edge due at or before now and re-arm for the rest.
    pub fn drain_due(&mut self, scheduler: &mut Scheduler) -> Vec<TransmitBit> {
        let now = scheduler.tick();
        let mut due = Vec::new();
        while let Some(bit) = self.bits.front().copied() {
            if !tick_le(bit.tick, now) {
                break;
            }
            self.bits.pop_front();
            due.push(bit);
        }
        self.rearm(scheduler);
        due
    }

    #[must_use]
    pub fn next_tick(&self) -> Option<u32> {
        self.bits.front().map(|b| b.tick)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Edges still waiting to play, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = TransmitBit> + '_ {
        self.bits.iter().copied()
    }

    /// Replace the queue with `bits`, the line sitting at `level` before
    /// the first of them.
    pub fn restore(&mut self, scheduler: &mut Scheduler, level: bool, bits: &[TransmitBit]) {
        self.reset(scheduler);
        self.last_level = level;
        for bit in bits {
            self.add_transmit_bit(scheduler, bit.tick, bit.level);
        }
    }

    /// Drop queued edges and return the line to idle.
    pub fn reset(&mut self, scheduler: &mut Scheduler) {
        self.bits.clear();
        self.last_level = true;
        scheduler.unset_event(&mut self.event);
    }

    fn rearm(&mut self, scheduler: &mut Scheduler) {
        match self.bits.front() {
            Some(bit) => {
                let delta = tick_delta(scheduler.tick(), bit.tick).max(1) as u32;
                scheduler.set_event(delta, self.target, self.event_id, &mut self.event);
            }
            None => scheduler.unset_event(&mut self.event),
        }
    }
}
