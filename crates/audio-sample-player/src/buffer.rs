//! Sample storage.
//!
//! A [`SampleBuffer`] stores its 16-bit PCM with [`SAMPLE_HEADER`] samples
//! in front, copied from the tail of the sample so a looping read can run
//! straight across the loop point, and [`SAMPLE_FOOTER`] zeroes after it so
//! a one-shot read may look one sample past the end.

use std::rc::Rc;

use crate::SoundError;

/// Samples in front of the data, wrapped from its end.
pub const SAMPLE_HEADER: usize = 8;

/// Zeroed samples after the data.
pub const SAMPLE_FOOTER: usize = 8;

/// Rate a sample was recorded at.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SamplingRate {
    Hz(f32),
    /// Multiple of the POKEY mixing rate (63920.8 Hz on NTSC).
    PokeyMixingRate(f32),
}

impl Default for SamplingRate {
    fn default() -> Self {
        Self::PokeyMixingRate(1.0)
    }
}

/// Immutable PCM sample laid out for mixing.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    data: Vec<i16>,
    len: u32,
    rate: SamplingRate,
    volume: f32,
}

impl SampleBuffer {
    /// Copy `samples` into a mixing layout. `volume` is full scale at 1.0;
    /// it is folded together with the 1/32767 sample normalisation.
    pub fn new(samples: &[i16], rate: SamplingRate, volume: f32) -> Result<Self, SoundError> {
        if samples.is_empty() {
            return Err(SoundError::EmptySample);
        }
        let len = u32::try_from(samples.len()).map_err(|_| SoundError::EmptySample)?;
        let n = samples.len();

        let alloc = (n + SAMPLE_HEADER + SAMPLE_FOOTER + 3) & !3;
        let mut data = vec![0i16; alloc];
        data[SAMPLE_HEADER..SAMPLE_HEADER + n].copy_from_slice(samples);

        // Buffer index k holds sample (k - HEADER) mod n, also for n < HEADER.
        for (k, slot) in data[..SAMPLE_HEADER].iter_mut().enumerate() {
            *slot = samples[(k + n * SAMPLE_HEADER - SAMPLE_HEADER) % n];
        }

        Ok(Self {
            data,
            len,
            rate,
            volume: volume * (1.0 / 32767.0),
        })
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn rate(&self) -> SamplingRate {
        self.rate
    }

    /// Volume including the 1/32767 normalisation.
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Sample data followed by the zero footer.
    #[must_use]
    pub fn one_shot(&self) -> &[i16] {
        &self.data[SAMPLE_HEADER..]
    }

    /// Wrapped header, sample data and footer. Offset [`Self::loop_start`]
    /// is the first sample.
    #[must_use]
    pub fn looping(&self) -> &[i16] {
        &self.data
    }

    /// Offset of the first sample within [`Self::looping`], reduced into
    /// the loop.
    #[must_use]
    pub fn loop_start(&self) -> u32 {
        SAMPLE_HEADER as u32 % self.len
    }
}

/// Identifier of a stock sample registered with a [`SamplePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampleId(pub u32);

/// Stock samples shared by every player, indexed by [`SampleId`].
#[derive(Debug, Default)]
pub struct SamplePool {
    stock: Vec<Option<Rc<SampleBuffer>>>,
}

impl SamplePool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a stock sample. Id 0 is reserved.
    pub fn register_stock_sample(
        &mut self,
        id: SampleId,
        samples: &[i16],
        rate: SamplingRate,
        volume: f32,
    ) -> Result<(), SoundError> {
        let index = id.0 as usize;
        if index == 0 {
            return Err(SoundError::UnknownSample(id));
        }
        let buffer = SampleBuffer::new(samples, rate, volume)?;
        if self.stock.len() < index {
            self.stock.resize(index, None);
        }
        self.stock[index - 1] = Some(Rc::new(buffer));
        Ok(())
    }

    #[must_use]
    pub fn stock_sample(&self, id: SampleId) -> Option<&Rc<SampleBuffer>> {
        let index = id.0 as usize;
        if index == 0 {
            return None;
        }
        self.stock.get(index - 1).and_then(Option::as_ref)
    }

    pub fn clear(&mut self) {
        self.stock.clear();
    }
}
