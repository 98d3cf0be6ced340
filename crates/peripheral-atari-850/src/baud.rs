//! Serial port baud rate settings.
//!
//! Index 0-15 is the rate the firmware selects; the user-facing setting is
//! one higher, with setting 0 meaning "follow the computer".

/// Baud rate reported to the attached serial device for each index.
pub const BAUD_RATES: [u32; 16] = [
    300, 46, 50, 57, 75, 110, 135, 150, 300, 600, 1200, 1800, 2400, 4800, 9600, 9600,
];

/// Device cycles per bit for each index: `0.5 + 1108404.5 / rate` with the
/// exact rates 45.5, 56.875 and 134.5 where [`BAUD_RATES`] is rounded.
pub const CYCLES_PER_BIT: [u32; 16] = [
    3695, 24361, 22168, 19488, 14779, 10076, 8241, 7389, 3695, 1847, 924, 616, 462, 231, 115, 115,
];

/// Indices in ascending baud order, without the duplicate entries.
const SORT_ORDER: [u8; 14] = [1, 2, 3, 4, 5, 6, 7, 0, 9, 10, 11, 12, 13, 14];

/// Lowest POKEY bit period (in master cycles) that auto-baud follows;
/// anything faster is left at the current rate.
pub const AUTO_BAUD_MIN_CYCLES_PER_BIT: u32 = 130;

/// Closest rate index to the computer's own serial rate.
#[must_use]
pub fn closest_index(master_rate: f64, pokey_cycles_per_bit: u32) -> u8 {
    let pokey_baud = (0.5 + master_rate / f64::from(pokey_cycles_per_bit.max(1))) as u32;

    let mut pos = SORT_ORDER.partition_point(|&i| BAUD_RATES[usize::from(i)] < pokey_baud);
    if pos >= SORT_ORDER.len() {
        pos = SORT_ORDER.len() - 1;
    } else if pos > 0 {
        let below = BAUD_RATES[usize::from(SORT_ORDER[pos - 1])];
        let above = BAUD_RATES[usize::from(SORT_ORDER[pos])];
        if above - pokey_baud > pokey_baud - below {
            pos -= 1;
        }
    }

    SORT_ORDER[pos]
}

#[cfg(test)]
mod tests {
    use super::*;

    const NTSC: f64 = 7_159_090.0 / 4.0;

    #[test]
    fn cycle_table_matches_formula() {
        let exact = [
            300.0, 45.5, 50.0, 56.875, 75.0, 110.0, 134.5, 150.0, 300.0, 600.0, 1200.0, 1800.0,
            2400.0, 4800.0, 9600.0, 9600.0,
        ];
        for (rate, &cycles) in exact.iter().zip(&CYCLES_PER_BIT) {
            assert_eq!((0.5 + 1_108_404.5 / rate) as u32, cycles);
        }
    }

    #[test]
    fn picks_nearest_rate() {
        // 9600 baud from POKEY is 186 cycles per bit.
        assert_eq!(closest_index(NTSC, 186), 14);
        // 1200 baud.
        assert_eq!(closest_index(NTSC, 1491), 10);
        // 300 baud picks the first table entry, not the duplicate.
        assert_eq!(closest_index(NTSC, 5966), 0);
        // Between 1800 and 2400, closer to 1800.
        assert_eq!(closest_index(NTSC, 890), 11);
    }

    #[test]
    fn out_of_range_rates_clamp() {
        assert_eq!(closest_index(NTSC, 131), 14);
        assert_eq!(closest_index(NTSC, 60_000), 1);
    }
}
