//! Time-sorted queue of coalesced pin changes for a device board.
//!
//! Edges arrive from the master side at master times, are converted to
//! device ticks, and wait here until the device clock reaches them. A
//! record packs up to four 8-bit port lanes into one 32-bit mask/value
//! pair, so every change landing on the same device tick becomes a single
//! record.

use emu_core::{tick_le, tick_lt};
use thiserror::Error;

/// Consumed records are reclaimed once at least this many have piled up.
const COMPACT_MIN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignalQueueError {
    #[error("signal change at tick {tick} is behind the device clock ({now})")]
    OutOfWindow { tick: u32, now: u32 },
}

/// A set of pin levels to apply: bits in `mask` take the matching bit of
/// `value`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignalChange {
    pub mask: u32,
    pub value: u32,
}

impl SignalChange {
    #[must_use]
    pub const fn new(value: u32, mask: u32) -> Self {
        Self {
            mask,
            value: value & mask,
        }
    }

    /// Set the bits of one 8-bit lane (0-3).
    #[must_use]
    pub fn with_lane(mut self, lane: u32, value: u8, mask: u8) -> Self {
        let shift = lane * 8;
        self.merge(Self::new(u32::from(value) << shift, u32::from(mask) << shift));
        self
    }

    /// The (value, mask) pair for one 8-bit lane.
    #[must_use]
    pub const fn lane(&self, lane: u32) -> (u8, u8) {
        let shift = lane * 8;
        ((self.value >> shift) as u8, (self.mask >> shift) as u8)
    }

    /// Fold `other` into this change. Where both touch a bit, `other` wins.
    pub fn merge(&mut self, other: SignalChange) {
        self.mask |= other.mask;
        self.value ^= (self.value ^ other.value) & other.mask;
    }

    /// Apply to a packed set of pin levels.
    #[must_use]
    pub const fn apply(&self, levels: u32) -> u32 {
        levels ^ ((levels ^ self.value) & self.mask)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignalRecord {
    pub tick: u32,
    pub change: SignalChange,
}

/// Pending pin changes ordered by device tick.
#[derive(Debug, Clone, Default)]
pub struct SignalQueue {
    records: Vec<SignalRecord>,
    /// Index of the first record not yet applied.
    next: usize,
}

impl SignalQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `change` for `tick`.
    ///
    /// A record already queued for the same tick absorbs the change. With
    /// `truncate`, every queued record at or after `tick` loses the bits in
    /// the change's mask first, so a fresh edge cancels stale ones on the
    /// same pins.
    pub fn add(
        &mut self,
        now: u32,
        tick: u32,
        change: SignalChange,
        truncate: bool,
    ) -> Result<(), SignalQueueError> {
        if tick_lt(tick, now) {
            return Err(SignalQueueError::OutOfWindow { tick, now });
        }

        self.compact();

        let pending = &mut self.records[self.next..];
        let index = pending.partition_point(|r| tick_lt(r.tick, tick));

        if truncate {
            for record in &mut pending[index..] {
                record.change.mask &= !change.mask;
                record.change.value &= record.change.mask;
            }
        }

        log::trace!(
            "signal change @{tick}: mask {:08X} value {:08X}{}",
            change.mask,
            change.value,
            if truncate { " (truncating)" } else { "" }
        );

        match pending.get_mut(index) {
            Some(record) if record.tick == tick => {
                record.change.merge(change);
                return Ok(());
            }
            _ => {}
        }

        self.records
            .insert(self.next + index, SignalRecord { tick, change });
        Ok(())
    }

    /// Take the next record due at or before `now`.
    pub fn pop_due(&mut self, now: u32) -> Option<SignalRecord> {
        let record = *self.records.get(self.next)?;
        if !tick_le(record.tick, now) {
            return None;
        }
        self.next += 1;
        Some(record)
    }

    /// Tick of the earliest pending record.
    #[must_use]
    pub fn next_tick(&self) -> Option<u32> {
        self.records.get(self.next).map(|r| r.tick)
    }

    /// Records not yet applied, in tick order.
    #[must_use]
    pub fn pending(&self) -> &[SignalRecord] {
        &self.records[self.next..]
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.next >= self.records.len()
    }

    /// Drop every record, applied or not.
    pub fn clear(&mut self) {
        self.records.clear();
        self.next = 0;
    }

    /// Replace the queue contents with `records`, which must already be
    /// in tick order.
    pub fn restore(&mut self, records: &[SignalRecord]) {
        self.records.clear();
        self.records.extend_from_slice(records);
        self.next = 0;
    }

    fn compact(&mut self) {
        if self.next >= self.records.len() {
            self.records.clear();
            self.next = 0;
        } else if self.next >= COMPACT_MIN && self.next * 8 >= self.records.len() {
            self.records.drain(..self.next);
            self.next = 0;
        }
    }
}
