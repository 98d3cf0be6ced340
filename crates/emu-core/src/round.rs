//! Round-half-to-even conversion used for tick and sample arithmetic.

/// Round to the nearest integer, ties to even.
///
/// Saturates at the `i32` range; NaN maps to zero.
#[must_use]
pub fn round_to_int(x: f64) -> i32 {
    x.round_ties_even() as i32
}

/// 64-bit variant of [`round_to_int`].
#[must_use]
pub fn round_to_int64(x: f64) -> i64 {
    x.round_ties_even() as i64
}
