//! Separable 2D image resampler.
//!
//! Scales 8-bit luma or 32-bit XRGB images with a linear, sharp-linear,
//! cubic or Lanczos-3 kernel in two passes: horizontal first, then
//! vertical. Kernels are precomputed into 256-phase fixed-point banks and
//! each axis is split into copy, clipped and direct regions so only edge
//! pixels pay for clamping. Writes stay inside the destination rectangle;
//! bytes beyond each row's width are never touched.

mod axis;
mod kernel;
mod pixmap;
mod resampler;

use thiserror::Error;

pub use axis::AxisRegions;
pub use kernel::{CUBIC_A, PHASES, ResamplerFilter, UNITY};
pub use pixmap::{PixelFormat, Pixmap, PixmapMut};
pub use resampler::{Resampler, resample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResampleError {
    #[error("image has no pixels")]
    EmptyImage,
    #[error("pitch {pitch} shorter than a {row}-byte row")]
    PitchTooSmall { pitch: usize, row: usize },
    #[error("buffer of {len} bytes needs {needed}")]
    BufferTooSmall { len: usize, needed: usize },
    #[error("source is {src:?} but destination is {dst:?}")]
    FormatMismatch { src: PixelFormat, dst: PixelFormat },
    #[error("image size differs from the resampler's")]
    SizeMismatch,
}
