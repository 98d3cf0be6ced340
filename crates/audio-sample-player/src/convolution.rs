//! Convolution playback.
//!
//! A convolution player plays one sample at arbitrary tick-accurate times.
//! Each call to [`ConvolutionPlayer::play`] drops a weighted impulse into
//! the current frame, split linearly between the two nearest output
//! samples. At the end of a mix frame the impulse train is convolved with
//! the sample into a shared ring buffer that all players on the bus feed,
//! and the ring is drained into the mix over the following frames.

use crate::CYCLES_PER_SYNC_SAMPLE;
use crate::buffer::SampleId;

/// Size of the overlap ring.
pub const CONV_SIZE: usize = 4096;

/// Longest mix frame, in output samples, that impulses can be placed in.
pub const MAX_FRAME_SIZE: usize = 1536;

/// Longest sample a convolution player keeps.
pub const MAX_SAMPLE_SIZE: usize = CONV_SIZE - MAX_FRAME_SIZE;

/// Handle to a convolution player owned by a [`SamplePlayer`](crate::SamplePlayer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConvolutionPlayerId(pub u32);

/// Ring of convolved output shared by all convolution players.
pub(crate) struct ConvolutionOutput {
    base_offset: usize,
    overlap_samples: usize,
    has_output: bool,
    accum: Vec<f32>,
    overlap: Vec<f32>,
}

impl ConvolutionOutput {
    pub fn new() -> Self {
        Self {
            base_offset: 0,
            overlap_samples: 0,
            has_output: false,
            accum: vec![0.0; CONV_SIZE],
            overlap: vec![0.0; CONV_SIZE],
        }
    }

    /// Convolve a frame of impulses with a sample into the frame
    /// accumulator.
    pub fn accumulate_impulses(&mut self, impulses: &[f32], sample: &[f32]) {
        for (i, &weight) in impulses.iter().enumerate() {
            if weight == 0.0 {
                continue;
            }
            for (acc, &x) in self.accum[i..].iter_mut().zip(sample) {
                *acc += weight * x;
            }
        }
        self.has_output = true;
    }

    /// Fold this frame's output into the ring and add up to `left.len()`
    /// ring samples into the mix. Returns whether anything was written.
    pub fn commit(&mut self, left: &mut [f32], right: Option<&mut [f32]>) -> bool {
        if self.has_output {
            self.has_output = false;

            let split = CONV_SIZE - self.base_offset;
            let (head, tail) = self.accum.split_at_mut(split);
            accumulate_and_zero(&mut self.overlap[self.base_offset..], head);
            accumulate_and_zero(&mut self.overlap[..self.base_offset], tail);

            self.overlap_samples = CONV_SIZE;
        }

        if self.overlap_samples == 0 {
            return false;
        }

        let len = left.len().min(self.overlap_samples);
        let first = len.min(CONV_SIZE - self.base_offset);
        let second = len - first;
        let base = self.base_offset;

        match right {
            Some(right) => {
                let right_len = right.len().min(len);
                drain_stereo(
                    &mut left[..first],
                    &mut right[..right_len.min(first)],
                    &mut self.overlap[base..base + first],
                );
                drain_stereo(
                    &mut left[first..len],
                    &mut right[right_len.min(first)..right_len],
                    &mut self.overlap[..second],
                );
            }
            None => {
                accumulate_and_zero(&mut left[..first], &mut self.overlap[base..base + first]);
                accumulate_and_zero(&mut left[first..len], &mut self.overlap[..second]);
            }
        }

        self.overlap_samples -= len;
        self.base_offset = (self.base_offset + len) & (CONV_SIZE - 1);
        true
    }
}

fn accumulate_and_zero(dst: &mut [f32], src: &mut [f32]) {
    for (d, s) in dst.iter_mut().zip(src.iter_mut()) {
        *d += *s;
        *s = 0.0;
    }
}

fn drain_stereo(left: &mut [f32], right: &mut [f32], src: &mut [f32]) {
    for (i, s) in src.iter_mut().enumerate() {
        let v = *s;
        *s = 0.0;
        if let Some(l) = left.get_mut(i) {
            *l += v;
        }
        if let Some(r) = right.get_mut(i) {
            *r += v;
        }
    }
}

/// One sample played by impulse.
pub struct ConvolutionPlayer {
    sample_id: Option<SampleId>,
    refs: u32,
    base_time: u32,
    has_impulse: bool,
    sample: Vec<f32>,
    impulses: Vec<f32>,
}

impl ConvolutionPlayer {
    pub(crate) fn new(sample_id: Option<SampleId>, sample: &[i16], base_time: u32) -> Self {
        let len = sample.len().min(MAX_SAMPLE_SIZE);
        let scale = 1.0 / 32767.0;
        Self {
            sample_id,
            refs: 1,
            base_time,
            has_impulse: false,
            sample: sample[..len].iter().map(|&s| f32::from(s) * scale).collect(),
            impulses: vec![0.0; MAX_FRAME_SIZE],
        }
    }

    #[must_use]
    pub fn sample_id(&self) -> Option<SampleId> {
        self.sample_id
    }

    pub(crate) fn add_ref(&mut self) {
        self.refs += 1;
    }

    /// Drop a reference; true when none remain.
    pub(crate) fn release(&mut self) -> bool {
        self.refs = self.refs.saturating_sub(1);
        self.refs == 0
    }

    /// Play the sample at master tick `t` within the current frame.
    /// Impulses beyond the frame window are dropped.
    pub fn play(&mut self, t: u32, volume: f32) {
        let tick_offset = t.wrapping_sub(self.base_time);
        if tick_offset >= (MAX_FRAME_SIZE as u32 - 1) * CYCLES_PER_SYNC_SAMPLE {
            log::trace!("convolution impulse {tick_offset} ticks into frame dropped");
            return;
        }

        let index = (tick_offset / CYCLES_PER_SYNC_SAMPLE) as usize;
        let sub = (tick_offset % CYCLES_PER_SYNC_SAMPLE) as f32 / CYCLES_PER_SYNC_SAMPLE as f32;
        self.impulses[index] += volume - volume * sub;
        self.impulses[index + 1] += volume * sub;
        self.has_impulse = true;
    }

    pub(crate) fn commit_frame(&mut self, next_time: u32, output: &mut ConvolutionOutput) {
        if self.has_impulse {
            self.has_impulse = false;
            output.accumulate_impulses(&self.impulses, &self.sample);
            self.impulses.fill(0.0);
        }
        self.base_time = next_time;
    }
}
