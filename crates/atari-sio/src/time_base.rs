//! Master/device clock conversion for a peripheral running its own crystal.
//!
//! The device's notion of "how far it may run" is a 32.32 fixed-point
//! accumulator of device cycles. Each time the master side syncs the device,
//! the master cycles elapsed since the previous sync are scaled by the rate
//! ratio and added in; the high word is the device tick the co-processor may
//! run up to.

use emu_core::{Clock, tick_delta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceTimeBase {
    /// Device cycles per master cycle, 32.32.
    ratio: u64,
    /// Master tick of the last accumulate.
    master_last_sync: u32,
    /// Device cycles reached at `master_last_sync`, 32.32.
    accum: u64,
}

impl DeviceTimeBase {
    /// A time base with both clocks at their current ticks.
    #[must_use]
    pub fn new(master: &Clock, device: &Clock) -> Self {
        let (master_num, master_denom) = master.rate();
        let (device_num, device_denom) = device.rate();
        let num = (u128::from(device_num) * u128::from(master_denom)) << 32;
        let denom = u128::from(device_denom) * u128::from(master_num);
        let ratio = if denom == 0 { 1 << 32 } else { (num / denom) as u64 };

        Self {
            ratio,
            master_last_sync: master.tick(),
            accum: u64::from(device.tick()) << 32,
        }
    }

    /// Device cycles per master cycle as 32.32 fixed point.
    #[must_use]
    pub fn ratio(&self) -> u64 {
        self.ratio
    }

    /// Realign both clocks, dropping any fractional cycle.
    pub fn reset(&mut self, master_now: u32, device_now: u32) {
        self.master_last_sync = master_now;
        self.accum = u64::from(device_now) << 32;
    }

    /// Bring the accumulator up to `master_now` and return the device tick
    /// the device may run to.
    pub fn accumulate(&mut self, master_now: u32) -> u32 {
        let elapsed = master_now.wrapping_sub(self.master_last_sync);
        self.master_last_sync = master_now;
        self.accum = self
            .accum
            .wrapping_add(u64::from(elapsed).wrapping_mul(self.ratio));
        self.device_limit()
    }

    /// Device tick reached at the last accumulate.
    #[must_use]
    pub fn device_limit(&self) -> u32 {
        (self.accum >> 32) as u32
    }

    /// Fraction of a device cycle carried over, for snapshots.
    #[must_use]
    pub fn fraction(&self) -> u32 {
        self.accum as u32
    }

    /// Restore from a snapshot taken at `master_now`.
    pub fn restore(&mut self, master_now: u32, device_limit: u32, fraction: u32) {
        self.master_last_sync = master_now;
        self.accum = (u64::from(device_limit) << 32) | u64::from(fraction);
    }

    /// Device tick for a master tick near the last sync, rounded up so an
    /// edge never lands before the master event that caused it.
    #[must_use]
    pub fn master_to_device(&self, master: u32) -> u32 {
        let delta = i128::from(tick_delta(self.master_last_sync, master));
        let fixed = i128::from(self.accum) + delta * i128::from(self.ratio);
        ((fixed + 0xFFFF_FFFF) >> 32) as u32
    }

    /// Master tick for a device tick near the last sync, rounded down.
    #[must_use]
    pub fn device_to_master(&self, device: u32) -> u32 {
        if self.ratio == 0 {
            return self.master_last_sync;
        }
        let device_delta = i128::from(tick_delta(self.device_limit(), device));
        let fixed = (device_delta << 32) - i128::from(self.fraction());
        let master_delta = fixed.div_euclid(i128::from(self.ratio));
        self.master_last_sync.wrapping_add(master_delta as u32)
    }

    /// Device cycles per bit for a master cycles-per-bit figure.
    #[must_use]
    pub fn device_cycles_per_bit(&self, master_cycles_per_bit: u32) -> f64 {
        f64::from(master_cycles_per_bit) * self.ratio as f64 / 4_294_967_296.0
    }
}
