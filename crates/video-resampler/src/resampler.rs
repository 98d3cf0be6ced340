//! Two-pass separable resampler.

use crate::ResampleError;
use crate::axis::{Axis, AxisRegions, Tap, mapping};
use crate::kernel::{Kernel, ResamplerFilter, UNITY};
use crate::pixmap::{PixelFormat, Pixmap, PixmapMut};

const ROUND: i32 = 0x2000;

/// 2.14 accumulator to a pixel.
fn saturate(acc: i32) -> u8 {
    ((acc + ROUND) >> 14).clamp(0, 255) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AxisMode {
    /// Same size: rows or columns pass straight through.
    Copy,
    /// Two taps per output, folded to a lerp.
    Lerp,
    Filter,
}

/// Precomputed source indices and 2.14 weights for one axis.
#[derive(Debug, Clone)]
struct AxisPlan {
    mode: AxisMode,
    taps: usize,
    regions: AxisRegions,
    /// `taps` entries per output.
    indices: Vec<u32>,
    weights: Vec<i32>,
}

impl AxisPlan {
    fn new(filter: ResamplerFilter, src: u32, dst: u32) -> Self {
        if src == dst {
            return Self {
                mode: AxisMode::Copy,
                taps: 1,
                regions: AxisRegions {
                    active: dst,
                    ..AxisRegions::default()
                },
                indices: Vec::new(),
                weights: Vec::new(),
            };
        }

        let twofc = if dst < src {
            f64::from(dst) / f64::from(src)
        } else {
            1.0
        };
        let kernel = Kernel::new(filter, twofc);
        let taps = kernel.taps();
        let bank = kernel.bank();
        let (dudx, u0) = mapping(src, dst, taps as u32);
        let axis = Axis::compute(dudx, dst, u0, src, taps as u32);

        let last = i64::from(src) - 1;
        let mut indices = Vec::with_capacity(dst as usize * taps);
        let mut weights = Vec::with_capacity(dst as usize * taps);
        for tap in axis.schedule(src) {
            match tap {
                Tap::Copy(i) => {
                    indices.extend(std::iter::repeat_n(i, taps));
                    weights.push(UNITY);
                    weights.extend(std::iter::repeat_n(0, taps - 1));
                }
                Tap::Direct { first, phase } => {
                    indices.extend((0..taps as u32).map(|k| first + k));
                    weights.extend_from_slice(phase_row(&bank, taps, phase));
                }
                Tap::Clipped { first, phase } => {
                    indices.extend((0..taps as i64).map(|k| (first + k).clamp(0, last) as u32));
                    weights.extend_from_slice(phase_row(&bank, taps, phase));
                }
            }
        }

        let mode = if taps == 2 {
            AxisMode::Lerp
        } else {
            AxisMode::Filter
        };
        log::debug!(
            "resampler axis {src} -> {dst}: {taps} taps, {mode:?}, {:?}",
            axis.regions
        );

        Self {
            mode,
            taps,
            regions: axis.regions,
            indices,
            weights,
        }
    }

    /// Resample one line of `channels`-interleaved pixels.
    fn line(&self, dst: &mut [u8], src: &[u8], channels: usize) {
        match self.mode {
            AxisMode::Copy => dst.copy_from_slice(&src[..dst.len()]),
            AxisMode::Lerp => {
                let outputs = self.indices.chunks_exact(2).zip(self.weights.chunks_exact(2));
                for (out, (idx, w)) in dst.chunks_exact_mut(channels).zip(outputs) {
                    let a = idx[0] as usize * channels;
                    let b = idx[1] as usize * channels;
                    for (c, px) in out.iter_mut().enumerate() {
                        let pa = i32::from(src[a + c]);
                        let pb = i32::from(src[b + c]);
                        *px = saturate(pa * UNITY + (pb - pa) * w[1]);
                    }
                }
            }
            AxisMode::Filter => {
                let taps = self.taps;
                let outputs = self
                    .indices
                    .chunks_exact(taps)
                    .zip(self.weights.chunks_exact(taps));
                for (out, (idx, w)) in dst.chunks_exact_mut(channels).zip(outputs) {
                    for (c, px) in out.iter_mut().enumerate() {
                        let acc: i32 = idx
                            .iter()
                            .zip(w)
                            .map(|(&i, &k)| i32::from(src[i as usize * channels + c]) * k)
                            .sum();
                        *px = saturate(acc);
                    }
                }
            }
        }
    }

    /// Source lines and weights feeding output `i`.
    fn inputs(&self, i: usize) -> impl Iterator<Item = (usize, i32)> + '_ {
        let range = i * self.taps..(i + 1) * self.taps;
        self.indices[range.clone()]
            .iter()
            .zip(&self.weights[range])
            .map(|(&idx, &k)| (idx as usize, k))
    }
}

fn phase_row(bank: &[i32], taps: usize, phase: u8) -> &[i32] {
    let start = usize::from(phase) * taps;
    &bank[start..start + taps]
}

/// Resamples images of one size and format to another.
///
/// The horizontal pass filters every source row into an intermediate
/// image at the destination width; the vertical pass then filters its
/// columns. Both passes round to 8 bits.
#[derive(Debug, Clone)]
pub struct Resampler {
    format: PixelFormat,
    src_size: (u32, u32),
    dst_size: (u32, u32),
    horizontal: AxisPlan,
    vertical: AxisPlan,
    scratch: Vec<u8>,
    acc: Vec<i32>,
}

impl Resampler {
    pub fn new(
        dst_size: (u32, u32),
        src_size: (u32, u32),
        format: PixelFormat,
        filter: ResamplerFilter,
    ) -> Result<Self, ResampleError> {
        Self::with_filters(dst_size, src_size, format, filter, filter)
    }

    /// Separate filters per axis.
    pub fn with_filters(
        dst_size: (u32, u32),
        src_size: (u32, u32),
        format: PixelFormat,
        horizontal: ResamplerFilter,
        vertical: ResamplerFilter,
    ) -> Result<Self, ResampleError> {
        let (dw, dh) = dst_size;
        let (sw, sh) = src_size;
        if dw == 0 || dh == 0 || sw == 0 || sh == 0 {
            return Err(ResampleError::EmptyImage);
        }

        let row_bytes = dw as usize * format.bytes_per_pixel();
        Ok(Self {
            format,
            src_size,
            dst_size,
            horizontal: AxisPlan::new(horizontal, sw, dw),
            vertical: AxisPlan::new(vertical, sh, dh),
            scratch: vec![0; row_bytes * sh as usize],
            acc: vec![0; row_bytes],
        })
    }

    #[must_use]
    pub fn horizontal_regions(&self) -> AxisRegions {
        self.horizontal.regions
    }

    #[must_use]
    pub fn vertical_regions(&self) -> AxisRegions {
        self.vertical.regions
    }

    pub fn process(&mut self, dst: &mut PixmapMut<'_>, src: &Pixmap<'_>) -> Result<(), ResampleError> {
        if src.format() != self.format || dst.format() != self.format {
            return Err(ResampleError::FormatMismatch {
                src: src.format(),
                dst: dst.format(),
            });
        }
        let src_size = (src.width(), src.height());
        let dst_size = (dst.width(), dst.height());
        if src_size != self.src_size || dst_size != self.dst_size {
            return Err(ResampleError::SizeMismatch);
        }

        let channels = self.format.bytes_per_pixel();
        let row_bytes = self.acc.len();

        for (y, line) in self.scratch.chunks_exact_mut(row_bytes).enumerate() {
            self.horizontal.line(line, src.row(y as u32), channels);
        }

        for y in 0..dst_size.1 {
            let out = dst.row_mut(y);
            if self.vertical.mode == AxisMode::Copy {
                let start = y as usize * row_bytes;
                out.copy_from_slice(&self.scratch[start..start + row_bytes]);
                continue;
            }

            self.acc.fill(0);
            for (row, k) in self.vertical.inputs(y as usize) {
                if k == 0 {
                    continue;
                }
                let start = row * row_bytes;
                for (a, &p) in self.acc.iter_mut().zip(&self.scratch[start..start + row_bytes]) {
                    *a += i32::from(p) * k;
                }
            }
            for (px, &a) in out.iter_mut().zip(&self.acc) {
                *px = saturate(a);
            }
        }
        Ok(())
    }
}

/// Resample `src` into `dst` with one filter on both axes.
pub fn resample(
    dst: &mut PixmapMut<'_>,
    src: &Pixmap<'_>,
    filter: ResamplerFilter,
) -> Result<(), ResampleError> {
    if src.format() != dst.format() {
        return Err(ResampleError::FormatMismatch {
            src: src.format(),
            dst: dst.format(),
        });
    }
    let mut resampler = Resampler::new(
        (dst.width(), dst.height()),
        (src.width(), src.height()),
        src.format(),
        filter,
    )?;
    resampler.process(dst, src)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn y8(data: &[u8], w: u32, h: u32) -> Pixmap<'_> {
        Pixmap::new(data, w, h, w as usize, PixelFormat::Y8).expect("pixmap")
    }

    #[test]
    fn same_size_copies() {
        let src: Vec<u8> = (0..16).map(|v| v * 13).collect();
        let mut out = vec![0u8; 16];
        let mut dst = PixmapMut::new(&mut out, 4, 4, 4, PixelFormat::Y8).expect("pixmap");
        resample(&mut dst, &y8(&src, 4, 4), ResamplerFilter::Cubic).expect("resample");
        assert_eq!(out, src);
    }

    #[test]
    fn linear_doubling_interpolates() {
        let src = [0u8, 100];
        let mut out = [0u8; 4];
        let mut dst = PixmapMut::new(&mut out, 4, 1, 4, PixelFormat::Y8).expect("pixmap");
        resample(&mut dst, &y8(&src, 2, 1), ResamplerFilter::Linear).expect("resample");
        // Output centres fall at -0.25, 0.25, 0.75 and 1.25 source pixels.
        assert_eq!(out, [0, 25, 75, 100]);
    }

    #[test]
    fn halving_averages_pairs() {
        let src = [0u8, 200, 0, 200, 0, 200, 0, 200];
        let mut out = [0u8; 4];
        let mut dst = PixmapMut::new(&mut out, 4, 1, 4, PixelFormat::Y8).expect("pixmap");
        resample(&mut dst, &y8(&src, 8, 1), ResamplerFilter::Linear).expect("resample");
        // The end pixels see clamped edges; the interior sees whole pairs.
        assert_eq!(&out[1..3], &[100, 100]);
    }

    #[test]
    fn lanczos_overshoot_saturates() {
        let src = [0u8, 0, 0, 255, 255, 255];
        let mut out = [0u8; 12];
        let mut dst = PixmapMut::new(&mut out, 12, 1, 12, PixelFormat::Y8).expect("pixmap");
        resample(&mut dst, &y8(&src, 6, 1), ResamplerFilter::LANCZOS3).expect("resample");
        assert_eq!(out[0], 0);
        assert_eq!(out[11], 255);
    }

    #[test]
    fn format_and_size_mismatch() {
        let src = [0u8; 16];
        let mut out = [0u8; 64];
        let mut dst = PixmapMut::new(&mut out, 4, 4, 16, PixelFormat::Xrgb8888).expect("pixmap");
        assert_eq!(
            resample(&mut dst, &y8(&src, 4, 4), ResamplerFilter::Linear),
            Err(ResampleError::FormatMismatch {
                src: PixelFormat::Y8,
                dst: PixelFormat::Xrgb8888,
            })
        );

        let mut r = Resampler::new((2, 2), (4, 4), PixelFormat::Y8, ResamplerFilter::Linear)
            .expect("resampler");
        let mut out = [0u8; 9];
        let mut dst = PixmapMut::new(&mut out, 3, 3, 3, PixelFormat::Y8).expect("pixmap");
        assert_eq!(
            r.process(&mut dst, &y8(&src, 4, 4)),
            Err(ResampleError::SizeMismatch)
        );
        assert_eq!(
            Resampler::new((0, 2), (4, 4), PixelFormat::Y8, ResamplerFilter::Linear).err(),
            Some(ResampleError::EmptyImage)
        );
    }

    #[test]
    fn two_tap_axes_take_the_lerp_path() {
        let r = Resampler::new((10, 3), (5, 3), PixelFormat::Y8, ResamplerFilter::Linear)
            .expect("resampler");
        assert_eq!(r.horizontal.mode, AxisMode::Lerp);
        assert_eq!(r.vertical.mode, AxisMode::Copy);
        let r = Resampler::new((10, 3), (5, 3), PixelFormat::Y8, ResamplerFilter::Cubic)
            .expect("resampler");
        assert_eq!(r.horizontal.mode, AxisMode::Filter);
    }
}
