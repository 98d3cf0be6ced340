//! Per-domain clock with wrap-safe 32-bit time.
//!
//! Each clock domain counts its own ticks in a `u32` that is allowed to
//! wrap. Ordering between two ticks is only meaningful within half the
//! range: `a` is before `b` when `b - a`, taken as a signed 32-bit value,
//! is positive. A carry counter extends the tick to 64 bits for long-range
//! ordering inside the scheduler.

/// Signed distance from `from` to `to` in ticks.
#[must_use]
pub const fn tick_delta(from: u32, to: u32) -> i32 {
    to.wrapping_sub(from) as i32
}

/// Wrap-safe `a < b`.
#[must_use]
pub const fn tick_lt(a: u32, b: u32) -> bool {
    tick_delta(a, b) > 0
}

/// Wrap-safe `a <= b`.
#[must_use]
pub const fn tick_le(a: u32, b: u32) -> bool {
    tick_delta(a, b) >= 0
}

/// Tick counter for one clock domain.
///
/// The rate is held as a rational `num / denom` ticks per second, so that
/// crystal rates like 4.433618 MHz / 4 are exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Clock {
    tick: u32,
    /// Number of times `tick` has wrapped.
    epoch: u32,
    rate_num: u32,
    rate_denom: u32,
}

impl Clock {
    /// Create a clock at tick zero running at `num / denom` Hz.
    ///
    /// A zero denominator is treated as 1.
    #[must_use]
    pub const fn new(rate_num: u32, rate_denom: u32) -> Self {
        Self {
            tick: 0,
            epoch: 0,
            rate_num,
            rate_denom: if rate_denom == 0 { 1 } else { rate_denom },
        }
    }

    /// Current 32-bit tick.
    #[must_use]
    pub const fn tick(&self) -> u32 {
        self.tick
    }

    /// Current tick extended by the wrap count.
    #[must_use]
    pub const fn tick64(&self) -> u64 {
        ((self.epoch as u64) << 32) | self.tick as u64
    }

    /// Rate as `(numerator, denominator)` ticks per second.
    #[must_use]
    pub const fn rate(&self) -> (u32, u32) {
        (self.rate_num, self.rate_denom)
    }

    #[must_use]
    pub fn ticks_per_second(&self) -> f64 {
        f64::from(self.rate_num) / f64::from(self.rate_denom)
    }

    #[must_use]
    pub fn seconds_per_tick(&self) -> f64 {
        f64::from(self.rate_denom) / f64::from(self.rate_num)
    }

    /// Advance by `ticks`, carrying into the epoch on wrap.
    pub fn advance(&mut self, ticks: u32) {
        let (tick, wrapped) = self.tick.overflowing_add(ticks);
        self.tick = tick;
        if wrapped {
            self.epoch = self.epoch.wrapping_add(1);
        }
    }

    /// Expand a 32-bit tick near the current time into the 64-bit domain.
    ///
    /// `t` must lie within half-range of now, in either direction.
    #[must_use]
    pub const fn extend(&self, t: u32) -> u64 {
        let delta = tick_delta(self.tick, t) as i64;
        (self.tick64() as i64 + delta) as u64
    }

    /// Place the clock at an absolute 64-bit tick. Used when restoring state.
    pub fn set_tick64(&mut self, t: u64) {
        self.tick = t as u32;
        self.epoch = (t >> 32) as u32;
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(1, 1)
    }
}
