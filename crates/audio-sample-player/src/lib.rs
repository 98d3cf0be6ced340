//! Tick-scheduled sample playback.
//!
//! Devices queue sounds against master ticks (a drive's step click, a
//! motor loop) and the audio frame pump mixes whatever overlaps each
//! frame's window with [`SamplePlayer::write_audio`]. Sounds start and stop
//! sample-accurately regardless of when the frame boundaries fall.

mod buffer;
mod convolution;
mod player;
mod sound;

use thiserror::Error;

pub use buffer::{SAMPLE_FOOTER, SAMPLE_HEADER, SampleBuffer, SampleId, SamplePool, SamplingRate};
pub use convolution::{
    CONV_SIZE, ConvolutionPlayer, ConvolutionPlayerId, MAX_FRAME_SIZE, MAX_SAMPLE_SIZE,
};
pub use player::{DEFAULT_MIXING_RATE, DEFAULT_POKEY_RATIO, MixInfo, SamplePlayer};
pub use sound::{AudioMix, GroupId, SampleSource, SoundGroupDesc, SoundId, SoundParams};

/// Master cycles per POKEY sync-mixer sample.
pub const CYCLES_PER_SYNC_SAMPLE: u32 = 28;

/// Smallest accepted sample step, 2^-12 in 32.32.
pub const MIN_STEP: u64 = 0x10_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SoundError {
    #[error("sample step {step:#x} outside {MIN_STEP:#x}..{limit:#x}")]
    RateOutOfRange { step: u64, limit: u64 },
    #[error("sound volume too low to hear")]
    VolumeTooLow,
    #[error("sample has no data")]
    EmptySample,
    #[error("no sound group {0:?}")]
    UnknownGroup(GroupId),
    #[error("no stock sample {0:?}")]
    UnknownSample(SampleId),
}
