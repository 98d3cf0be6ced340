//! Sounds, groups and playback parameters.

use std::rc::Rc;

use crate::buffer::SampleBuffer;

/// Handle to a queued or playing sound. Valid ids are odd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundId(pub u32);

impl SoundId {
    pub const INVALID: Self = Self(0);

    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 & 1 != 0
    }
}

/// Handle to a [`SoundGroup`](crate::SamplePlayer::create_group).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u32);

/// Mix bus a sound group feeds. Each bus has its own level in
/// [`MixInfo::mix_levels`](crate::MixInfo::mix_levels).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AudioMix {
    Drive,
    Covox,
    Modem,
    Cassette,
    #[default]
    Other,
}

impl AudioMix {
    pub const COUNT: usize = 5;

    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SoundGroupDesc {
    pub mix: AudioMix,
    /// Adding a sound cancels queued sounds in the group starting at or
    /// after it.
    pub remove_superseded: bool,
}

impl SoundGroupDesc {
    #[must_use]
    pub fn mix(mut self, mix: AudioMix) -> Self {
        self.mix = mix;
        self
    }

    #[must_use]
    pub fn remove_superseded(mut self) -> Self {
        self.remove_superseded = true;
        self
    }
}

/// Per-play parameters for a sample sound.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SoundParams {
    pub volume: f32,
    /// -1 is hard left, 0 centre, 1 hard right.
    pub pan: f32,
    /// Multiplier on the sample's playback rate.
    pub rate_scale: f32,
    pub looping: bool,
}

impl Default for SoundParams {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
            rate_scale: 1.0,
            looping: false,
        }
    }
}

impl SoundParams {
    #[must_use]
    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    #[must_use]
    pub fn pan(mut self, pan: f32) -> Self {
        self.pan = pan;
        self
    }

    #[must_use]
    pub fn rate_scale(mut self, scale: f32) -> Self {
        self.rate_scale = scale;
        self
    }

    #[must_use]
    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    /// Equal-power (3 dB) pan law with centre at unity gain.
    #[must_use]
    pub fn pan_volumes(&self) -> (f32, f32) {
        if self.pan.abs() < f32::EPSILON {
            return (1.0, 1.0);
        }
        let l = ((self.pan + 1.0) * (std::f32::consts::PI / 4.0)).cos();
        let r = (1.0 - l * l).max(0.0).sqrt();
        (l * std::f32::consts::SQRT_2, r * std::f32::consts::SQRT_2)
    }
}

/// Generator mixed directly into the output at the mixing rate.
pub trait SampleSource {
    /// Add `dst.len()` samples starting at output sample `offset` of the
    /// sound, scaled by `volume`.
    fn mix_audio(&mut self, dst: &mut [f32], volume: f32, offset: u32, mixing_rate: f32);
}

pub(crate) enum SoundData {
    Sample(Rc<SampleBuffer>),
    Callback(Box<dyn SampleSource>),
}

pub(crate) struct Sound {
    pub id: SoundId,
    pub group: Option<GroupId>,
    pub mix: AudioMix,
    pub data: SoundData,
    /// Master tick the next mixed sample corresponds to.
    pub next_time: u64,
    pub end_time: u64,
    pub end_valid: bool,
    pub looping: bool,
    pub matched_rate: bool,
    /// Source samples per output sample, 32.32.
    pub step: u64,
    pub offset: u32,
    pub sub_offset: u32,
    /// Zero for an endless generator.
    pub length: u32,
    pub volume_l: f32,
    pub volume_r: f32,
}

impl Sound {
    pub fn is_panned(&self) -> bool {
        self.volume_l != self.volume_r
    }
}

#[derive(Debug, Default)]
pub(crate) struct SoundGroup {
    pub desc: SoundGroupDesc,
    /// In start order.
    pub sounds: Vec<SoundId>,
}
