//! Filter kernels and their fixed-point phase banks.
//!
//! A kernel is sampled at 256 sub-pixel phases. Tap `i` of phase `p` sits
//! at distance `i - (taps/2 - 1) - p/256` from the sample point, scaled by
//! the kernel's cutoff. Each phase is normalised to sum to exactly
//! [`UNITY`] so flat input stays flat.

use std::f64::consts::PI;

use emu_core::round_to_int;

/// 1.0 in 2.14 fixed point.
pub const UNITY: i32 = 1 << 14;

/// Sub-pixel phases in a bank.
pub const PHASES: usize = 256;

/// Cubic kernel sharpness parameter.
pub const CUBIC_A: f64 = -0.6;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResamplerFilter {
    /// Triangle; two taps when enlarging.
    Linear,
    /// Linear ramp steepened by `factor`, clamped to 0..=1. Factor 1 is
    /// plain linear; large factors approach nearest neighbour.
    SharpLinear(f64),
    /// Keys cubic with A = -0.6.
    Cubic,
    /// Windowed sinc over three lobes. Sharpness above 1 narrows the
    /// kernel.
    Lanczos3 { sharpness: f64 },
}

impl ResamplerFilter {
    pub const LANCZOS3: Self = Self::Lanczos3 { sharpness: 1.0 };
}

/// A kernel at a particular cutoff.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Kernel {
    filter: ResamplerFilter,
    /// Twice the cutoff frequency: 1 when enlarging, dst/src when reducing.
    scale: f64,
    taps: usize,
}

impl Kernel {
    pub fn new(filter: ResamplerFilter, twofc: f64) -> Self {
        let (scale, support) = match filter {
            ResamplerFilter::Linear => (twofc, 1.0),
            ResamplerFilter::SharpLinear(_) => (1.0, 1.0),
            ResamplerFilter::Cubic => (twofc, 2.0),
            ResamplerFilter::Lanczos3 { sharpness } => (twofc * sharpness.max(1.0), 3.0),
        };
        let taps = match filter {
            ResamplerFilter::SharpLinear(_) => 2,
            _ => ((support / scale).ceil() as usize).max(1) * 2,
        };
        Self {
            filter,
            scale,
            taps,
        }
    }

    pub fn taps(&self) -> usize {
        self.taps
    }

    /// Kernel value at unscaled distance `t`.
    pub fn evaluate(&self, t: f64) -> f64 {
        match self.filter {
            ResamplerFilter::Linear => {
                let v = 1.0 - (t * self.scale).abs();
                v.max(0.0)
            }
            ResamplerFilter::SharpLinear(factor) => ((0.5 - t.abs()) * factor + 0.5).clamp(0.0, 1.0),
            ResamplerFilter::Cubic => {
                let a = CUBIC_A;
                let t = (t * self.scale).abs();
                if t < 1.0 {
                    1.0 + t * t * ((-3.0 - a) + t * (2.0 + a))
                } else if t < 2.0 {
                    -4.0 * a + t * (8.0 * a + t * (-5.0 * a + t * a))
                } else {
                    0.0
                }
            }
            ResamplerFilter::Lanczos3 { .. } => {
                let t = t * self.scale;
                if t.abs() < 3.0 {
                    sinc(PI * t) * sinc(PI / 3.0 * t)
                } else {
                    0.0
                }
            }
        }
    }

    /// Float taps for a sample point `offset` (0..1) past a source pixel.
    fn generate(&self, offset: f64) -> Vec<f64> {
        let first = -(((self.taps / 2) as f64 - 1.0) + offset);
        (0..self.taps)
            .map(|i| {
                let t = first + i as f64;
                match self.filter {
                    // Two taps straddling the sample point: near then far.
                    ResamplerFilter::SharpLinear(_) if i == 0 => self.evaluate(offset),
                    ResamplerFilter::SharpLinear(_) => 1.0 - self.evaluate(offset),
                    _ => self.evaluate(t),
                }
            })
            .collect()
    }

    /// `PHASES * taps` coefficients in 2.14, each phase summing to
    /// [`UNITY`].
    pub fn bank(&self) -> Vec<i32> {
        let mut bank = Vec::with_capacity(PHASES * self.taps);
        for phase in 0..PHASES {
            let taps = self.generate(phase as f64 / PHASES as f64);
            bank.extend(normalize(&taps));
        }
        bank
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-9 { 1.0 } else { x.sin() / x }
}

/// Scale taps to sum to [`UNITY`], putting the rounding error on the
/// largest tap.
fn normalize(taps: &[f64]) -> Vec<i32> {
    let sum: f64 = taps.iter().sum();
    if sum.abs() < 1e-9 {
        // Degenerate kernel: fall back to the centre pixel.
        let mut out = vec![0; taps.len()];
        out[(taps.len() / 2).saturating_sub(1)] = UNITY;
        return out;
    }

    let scale = f64::from(UNITY) / sum;
    let mut out: Vec<i32> = taps.iter().map(|&t| round_to_int(t * scale)).collect();
    let error = UNITY - out.iter().sum::<i32>();
    if error != 0 {
        let mut peak = 0;
        for (i, v) in out.iter().enumerate() {
            if v.abs() > out[peak].abs() {
                peak = i;
            }
        }
        out[peak] += error;
    }
    out
}
