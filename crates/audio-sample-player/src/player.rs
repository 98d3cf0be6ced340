//! The sample player.

use std::collections::HashMap;
use std::rc::Rc;

use emu_core::{Scheduler, round_to_int};

use crate::buffer::{SampleBuffer, SampleId, SamplePool, SamplingRate};
use crate::convolution::{ConvolutionOutput, ConvolutionPlayer, ConvolutionPlayerId};
use crate::sound::{
    AudioMix, GroupId, SampleSource, Sound, SoundData, SoundGroup, SoundGroupDesc, SoundId,
    SoundParams,
};
use crate::{CYCLES_PER_SYNC_SAMPLE, MIN_STEP, SoundError};

pub const DEFAULT_MIXING_RATE: f32 = 20_000.0;

/// POKEY mixing rate over the default mixing rate.
pub const DEFAULT_POKEY_RATIO: f32 = 63_920.8 / 20_000.0;

const UNIT_STEP: u64 = 1 << 32;

/// One frame of output to mix into.
pub struct MixInfo<'a> {
    /// Master tick of the first output sample.
    pub start_time: u64,
    /// Master ticks covered by the frame.
    pub num_cycles: u32,
    pub left: &'a mut [f32],
    pub right: Option<&'a mut [f32]>,
    /// Level per [`AudioMix`] bus.
    pub mix_levels: [f32; AudioMix::COUNT],
}

impl<'a> MixInfo<'a> {
    #[must_use]
    pub fn mono(start_time: u64, num_cycles: u32, left: &'a mut [f32]) -> Self {
        Self {
            start_time,
            num_cycles,
            left,
            right: None,
            mix_levels: [1.0; AudioMix::COUNT],
        }
    }

    #[must_use]
    pub fn with_right(mut self, right: &'a mut [f32]) -> Self {
        self.right = Some(right);
        self
    }

    #[must_use]
    pub fn with_level(mut self, mix: AudioMix, level: f32) -> Self {
        self.mix_levels[mix.index()] = level;
        self
    }
}

#[derive(Clone, Copy)]
struct Window {
    start: u64,
    end: u64,
    samples_per_tick: f64,
    mixing_rate: f32,
}

impl Window {
    fn ticks_to_samples(&self, ticks: u64) -> u32 {
        round_to_int(ticks as f64 * self.samples_per_tick).max(0) as u32
    }
}

/// Schedules and mixes sounds against master time.
pub struct SamplePlayer {
    pool: SamplePool,
    mixing_rate: f32,
    pokey_ratio: f32,
    samples_per_tick: f64,
    next_sound_id: u32,
    ready: Vec<Sound>,
    playing: Vec<Sound>,
    groups: HashMap<GroupId, SoundGroup>,
    next_group_id: u32,
    convolution_output: Option<ConvolutionOutput>,
    convolution_players: Vec<(ConvolutionPlayerId, ConvolutionPlayer)>,
    next_convolution_id: u32,
    last_mix_time: u64,
}

impl Default for SamplePlayer {
    fn default() -> Self {
        Self::new(SamplePool::new())
    }
}

impl SamplePlayer {
    #[must_use]
    pub fn new(pool: SamplePool) -> Self {
        Self {
            pool,
            mixing_rate: DEFAULT_MIXING_RATE,
            pokey_ratio: DEFAULT_POKEY_RATIO,
            samples_per_tick: 1.0,
            next_sound_id: 1,
            ready: Vec::new(),
            playing: Vec::new(),
            groups: HashMap::new(),
            next_group_id: 1,
            convolution_output: None,
            convolution_players: Vec::new(),
            next_convolution_id: 1,
            last_mix_time: 0,
        }
    }

    /// Start mixing from the scheduler's current tick.
    pub fn init(&mut self, sch: &Scheduler) {
        self.last_mix_time = sch.tick64();
    }

    /// Drop every sound, group and convolution player.
    pub fn shutdown(&mut self) {
        self.ready.clear();
        self.playing.clear();
        self.groups.clear();
        self.convolution_players.clear();
        self.convolution_output = None;
    }

    pub fn set_rates(&mut self, mixing_rate: f32, pokey_ratio: f32, samples_per_tick: f64) {
        self.mixing_rate = mixing_rate;
        self.pokey_ratio = pokey_ratio;
        self.samples_per_tick = samples_per_tick;
    }

    #[must_use]
    pub fn pool(&self) -> &SamplePool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut SamplePool {
        &mut self.pool
    }

    /// Master tick the last mixed frame ended at.
    #[must_use]
    pub fn last_mix_time(&self) -> u64 {
        self.last_mix_time
    }

    /// Sounds waiting to start plus sounds playing.
    #[must_use]
    pub fn sound_count(&self) -> usize {
        self.ready.len() + self.playing.len()
    }

    #[must_use]
    pub fn is_sound_active(&self, id: SoundId) -> bool {
        self.find(id).is_some()
    }

    /// Whether any sound has different left and right volumes.
    #[must_use]
    pub fn requires_stereo_mixing(&self) -> bool {
        self.ready.iter().chain(&self.playing).any(Sound::is_panned)
    }

    pub fn register_sample(
        samples: &[i16],
        rate: SamplingRate,
        volume: f32,
    ) -> Result<Rc<SampleBuffer>, SoundError> {
        SampleBuffer::new(samples, rate, volume).map(Rc::new)
    }

    // Groups

    pub fn create_group(&mut self, desc: SoundGroupDesc) -> GroupId {
        let id = GroupId(self.next_group_id);
        self.next_group_id = self.next_group_id.wrapping_add(1);
        self.groups.insert(
            id,
            SoundGroup {
                desc,
                sounds: Vec::new(),
            },
        );
        id
    }

    /// Drop a group. Its sounds are stopped at the current tick.
    pub fn release_group(&mut self, sch: &Scheduler, group: GroupId) -> Result<(), SoundError> {
        let removed = self
            .groups
            .remove(&group)
            .ok_or(SoundError::UnknownGroup(group))?;
        self.stop_detached(sch.tick64(), &removed.sounds);
        Ok(())
    }

    /// Stop every sound in a group at the current tick.
    pub fn stop_group_sounds(&mut self, sch: &Scheduler, group: GroupId) -> Result<(), SoundError> {
        let sounds = self
            .groups
            .get_mut(&group)
            .map(|g| std::mem::take(&mut g.sounds))
            .ok_or(SoundError::UnknownGroup(group))?;
        self.stop_detached(sch.tick64(), &sounds);
        Ok(())
    }

    #[must_use]
    pub fn is_any_sound_queued(&self, group: GroupId) -> bool {
        self.groups.get(&group).is_some_and(|g| !g.sounds.is_empty())
    }

    fn stop_detached(&mut self, time: u64, sounds: &[SoundId]) {
        for &id in sounds {
            if let Some(s) = self.find_mut(id) {
                s.group = None;
            }
            self.stop_sound_at(id, time);
        }
    }

    // Adding sounds

    /// Play a stock sample once.
    pub fn add_stock_sound(
        &mut self,
        sch: &Scheduler,
        group: GroupId,
        delay: u32,
        sample: SampleId,
        volume: f32,
    ) -> Result<SoundId, SoundError> {
        let buffer = self.stock(sample)?;
        self.add_sound(sch, group, delay, &buffer, SoundParams::default().volume(volume))
    }

    /// Loop a stock sample until stopped.
    pub fn add_looping_stock_sound(
        &mut self,
        sch: &Scheduler,
        group: GroupId,
        delay: u32,
        sample: SampleId,
        volume: f32,
    ) -> Result<SoundId, SoundError> {
        let buffer = self.stock(sample)?;
        let params = SoundParams::default().volume(volume).looping();
        self.add_sound(sch, group, delay, &buffer, params)
    }

    /// [`Self::add_sound`] with looping forced on.
    pub fn add_looping_sound(
        &mut self,
        sch: &Scheduler,
        group: GroupId,
        delay: u32,
        buffer: &Rc<SampleBuffer>,
        params: SoundParams,
    ) -> Result<SoundId, SoundError> {
        self.add_sound(sch, group, delay, buffer, params.looping())
    }

    fn stock(&self, sample: SampleId) -> Result<Rc<SampleBuffer>, SoundError> {
        self.pool
            .stock_sample(sample)
            .cloned()
            .ok_or(SoundError::UnknownSample(sample))
    }

    /// Queue a sample to start `delay` ticks from now.
    pub fn add_sound(
        &mut self,
        sch: &Scheduler,
        group: GroupId,
        delay: u32,
        buffer: &Rc<SampleBuffer>,
        params: SoundParams,
    ) -> Result<SoundId, SoundError> {
        if !self.groups.contains_key(&group) {
            return Err(SoundError::UnknownGroup(group));
        }

        let play_volume = params.volume * buffer.volume();
        if play_volume.abs() < 1e-10 {
            log::debug!("sound dropped: volume {play_volume}");
            return Err(SoundError::VolumeTooLow);
        }

        let mut step = match buffer.rate() {
            SamplingRate::Hz(hz) => f64::from(hz) / f64::from(self.mixing_rate),
            SamplingRate::PokeyMixingRate(ratio) => f64::from(ratio) * f64::from(self.pokey_ratio),
        };
        step *= f64::from(params.rate_scale);

        let (matched_rate, step) = if (step - 1.0).abs() < 1e-5 {
            (true, UNIT_STEP)
        } else {
            let fixed = (0.5 + step * 4_294_967_296.0) as u64;
            let limit = u64::from(buffer.len()) << 32;
            // The mixer can wrap a loop at most once per output sample.
            if !(MIN_STEP..limit).contains(&fixed) {
                log::warn!("sound rejected: step {fixed:#x} outside {MIN_STEP:#x}..{limit:#x}");
                return Err(SoundError::RateOutOfRange { step: fixed, limit });
            }
            (false, fixed)
        };

        let (pan_l, pan_r) = params.pan_volumes();
        let sound = Sound {
            id: SoundId::INVALID,
            group: None,
            mix: AudioMix::default(),
            data: SoundData::Sample(Rc::clone(buffer)),
            next_time: 0,
            end_time: 0,
            end_valid: false,
            looping: params.looping,
            matched_rate,
            step,
            offset: if params.looping { buffer.loop_start() } else { 0 },
            sub_offset: 0,
            length: buffer.len(),
            volume_l: play_volume * pan_l,
            volume_r: play_volume * pan_r,
        };

        Ok(self.start_sound(sound, group, sch.tick64() + u64::from(delay)))
    }

    /// Queue a generator that plays for `len` sync-mixer samples.
    pub fn add_callback_sound(
        &mut self,
        sch: &Scheduler,
        group: GroupId,
        delay: u32,
        source: Box<dyn SampleSource>,
        len: u32,
        volume: f32,
    ) -> Result<SoundId, SoundError> {
        let start = sch.tick64() + u64::from(delay);
        let end = start + u64::from(CYCLES_PER_SYNC_SAMPLE) * u64::from(len);
        self.add_generator(group, source, start, Some((end, len)), volume)
    }

    /// Queue a generator that plays until stopped.
    pub fn add_looping_callback_sound(
        &mut self,
        sch: &Scheduler,
        group: GroupId,
        delay: u32,
        source: Box<dyn SampleSource>,
        volume: f32,
    ) -> Result<SoundId, SoundError> {
        let start = sch.tick64() + u64::from(delay);
        self.add_generator(group, source, start, None, volume)
    }

    fn add_generator(
        &mut self,
        group: GroupId,
        source: Box<dyn SampleSource>,
        start: u64,
        end: Option<(u64, u32)>,
        volume: f32,
    ) -> Result<SoundId, SoundError> {
        if !self.groups.contains_key(&group) {
            return Err(SoundError::UnknownGroup(group));
        }

        let (end_time, length) = end.unwrap_or((start, 0));
        let sound = Sound {
            id: SoundId::INVALID,
            group: None,
            mix: AudioMix::default(),
            data: SoundData::Callback(source),
            next_time: 0,
            end_time,
            end_valid: end.is_some(),
            looping: false,
            matched_rate: true,
            step: UNIT_STEP,
            offset: 0,
            sub_offset: 0,
            length,
            volume_l: volume,
            volume_r: volume,
        };
        Ok(self.start_sound(sound, group, start))
    }

    fn start_sound(&mut self, mut sound: Sound, group: GroupId, start: u64) -> SoundId {
        let id = SoundId(self.next_sound_id);
        self.next_sound_id = self.next_sound_id.wrapping_add(2);

        let Some(desc) = self.groups.get(&group).map(|g| g.desc) else {
            return SoundId::INVALID;
        };

        // Anything queued in the group at or after the new start has not
        // started yet, so it can be dropped outright.
        if desc.remove_superseded {
            while let Some(last) = self.groups.get(&group).and_then(|g| g.sounds.last().copied()) {
                match self.find(last).map(|s| s.next_time) {
                    Some(t) if t >= start => {
                        log::trace!("sound {last:?} superseded by {id:?}");
                        self.force_stop_sound(last);
                    }
                    Some(_) => break,
                    None => {
                        if let Some(g) = self.groups.get_mut(&group) {
                            g.sounds.pop();
                        }
                    }
                }
            }
        }

        if let Some(g) = self.groups.get_mut(&group) {
            g.sounds.push(id);
        }

        sound.id = id;
        sound.group = Some(group);
        sound.mix = desc.mix;
        sound.next_time = start;
        self.ready.push(sound);
        id
    }

    // Stopping sounds

    /// Stop a sound at the current tick.
    pub fn stop_sound(&mut self, sch: &Scheduler, id: SoundId) {
        self.stop_sound_at(id, sch.tick64());
    }

    /// Stop a sound at master tick `time`. A sound that has not started by
    /// then is dropped; a one-shot that would already have ended is left
    /// alone.
    pub fn stop_sound_at(&mut self, id: SoundId, time: u64) {
        let removed = match stop_in(&mut self.ready, id, time) {
            StopOutcome::NotFound => match stop_in(&mut self.playing, id, time) {
                StopOutcome::Removed(s) => Some(s),
                _ => None,
            },
            StopOutcome::Removed(s) => Some(s),
            StopOutcome::Stopped => None,
        };
        if let Some(s) = removed {
            self.free_sound(s);
        }
    }

    /// Remove a sound immediately. Returns whether it existed.
    pub fn force_stop_sound(&mut self, id: SoundId) -> bool {
        let removed = take_by_id(&mut self.playing, id).or_else(|| take_by_id(&mut self.ready, id));
        match removed {
            Some(s) => {
                self.free_sound(s);
                true
            }
            None => false,
        }
    }

    fn free_sound(&mut self, sound: Sound) {
        if let Some(group) = sound.group {
            if let Some(g) = self.groups.get_mut(&group) {
                g.sounds.retain(|&id| id != sound.id);
            }
        }
    }

    fn find(&self, id: SoundId) -> Option<&Sound> {
        self.ready.iter().chain(&self.playing).find(|s| s.id == id)
    }

    fn find_mut(&mut self, id: SoundId) -> Option<&mut Sound> {
        self.ready
            .iter_mut()
            .chain(self.playing.iter_mut())
            .find(|s| s.id == id)
    }

    // Convolution players

    /// Convolution player for a stock sample. Players are shared per
    /// sample; each call adds a reference.
    pub fn create_convolution_player(
        &mut self,
        sample: SampleId,
    ) -> Result<ConvolutionPlayerId, SoundError> {
        if let Some((id, player)) = self
            .convolution_players
            .iter_mut()
            .find(|(_, p)| p.sample_id() == Some(sample))
        {
            player.add_ref();
            return Ok(*id);
        }

        let buffer = self.stock(sample)?;
        let player = ConvolutionPlayer::new(
            Some(sample),
            &buffer.one_shot()[..buffer.len() as usize],
            self.last_mix_time as u32,
        );
        Ok(self.push_convolution_player(player))
    }

    /// Convolution player for raw sample data.
    pub fn create_convolution_player_from(&mut self, samples: &[i16]) -> ConvolutionPlayerId {
        let player = ConvolutionPlayer::new(None, samples, self.last_mix_time as u32);
        self.push_convolution_player(player)
    }

    fn push_convolution_player(&mut self, player: ConvolutionPlayer) -> ConvolutionPlayerId {
        self.convolution_output
            .get_or_insert_with(ConvolutionOutput::new);
        let id = ConvolutionPlayerId(self.next_convolution_id);
        self.next_convolution_id = self.next_convolution_id.wrapping_add(1);
        self.convolution_players.push((id, player));
        id
    }

    pub fn convolution_player_mut(
        &mut self,
        id: ConvolutionPlayerId,
    ) -> Option<&mut ConvolutionPlayer> {
        self.convolution_players
            .iter_mut()
            .find(|(pid, _)| *pid == id)
            .map(|(_, p)| p)
    }

    /// Drop a reference to a convolution player, removing it with the last.
    pub fn release_convolution_player(&mut self, id: ConvolutionPlayerId) {
        if let Some(pos) = self.convolution_players.iter().position(|(pid, _)| *pid == id) {
            if self.convolution_players[pos].1.release() {
                self.convolution_players.swap_remove(pos);
            }
        }
    }

    // Mixing

    /// Mix every sound overlapping the frame into the output. Returns
    /// whether anything was written.
    pub fn write_audio(&mut self, mix: MixInfo<'_>) -> bool {
        let MixInfo {
            start_time,
            num_cycles,
            left,
            mut right,
            mix_levels,
        } = mix;
        let window = Window {
            start: start_time,
            end: start_time + u64::from(num_cycles),
            samples_per_tick: self.samples_per_tick,
            mixing_rate: self.mixing_rate,
        };
        let mut wrote = false;

        let mut i = 0;
        while i < self.ready.len() {
            if self.ready[i].next_time >= window.end {
                i += 1;
                continue;
            }
            let s = self.ready.swap_remove(i);
            if !s.end_valid || s.end_time > window.start {
                self.playing.push(s);
            } else {
                self.free_sound(s);
            }
        }

        let mut i = 0;
        while i < self.playing.len() {
            let s = &mut self.playing[i];
            let level = mix_levels[s.mix.index()];
            let (expired, mixed) = mix_sound(s, &window, level, left, right.as_deref_mut());
            wrote |= mixed;
            if expired {
                let s = self.playing.swap_remove(i);
                self.free_sound(s);
            } else {
                i += 1;
            }
        }

        if let Some(output) = self.convolution_output.as_mut() {
            for (_, player) in &mut self.convolution_players {
                player.commit_frame(window.end as u32, output);
            }
            wrote |= output.commit(left, right);
        }

        self.last_mix_time = window.end;
        wrote
    }
}

fn take_by_id(list: &mut Vec<Sound>, id: SoundId) -> Option<Sound> {
    let pos = list.iter().position(|s| s.id == id)?;
    Some(list.swap_remove(pos))
}

enum StopOutcome {
    NotFound,
    Stopped,
    Removed(Sound),
}

fn stop_in(list: &mut Vec<Sound>, id: SoundId, time: u64) -> StopOutcome {
    let Some(pos) = list.iter().position(|s| s.id == id) else {
        return StopOutcome::NotFound;
    };

    let s = &mut list[pos];
    if time <= s.next_time {
        return StopOutcome::Removed(list.swap_remove(pos));
    }
    if !(s.end_valid && time >= s.end_time) {
        s.end_time = time;
        s.end_valid = true;
    }
    StopOutcome::Stopped
}

/// Output samples that fit in `avail` source samples at `step`, starting
/// `sub` into the first.
fn dst_samples_for(avail: u32, sub: u32, step: u64) -> u64 {
    ((u64::from(avail) << 32) - u64::from(sub) - 1) / step + 1
}

/// Mix one sound into the window. Returns `(expired, wrote)`.
fn mix_sound(
    s: &mut Sound,
    w: &Window,
    level: f32,
    left: &mut [f32],
    right: Option<&mut [f32]>,
) -> (bool, bool) {
    if s.end_valid && s.end_time <= w.start {
        return (true, false);
    }
    if s.next_time >= w.end {
        return (false, false);
    }

    let n = left.len() as u32;
    let src_len = s.length;
    let mut dst_offset = 0u32;

    if s.next_time < w.start {
        // Skip the part of the sound that fell before the window.
        let dst_delay = u64::from(w.ticks_to_samples(w.start - s.next_time));
        let (mut offset, sub) = if s.matched_rate {
            (dst_delay + u64::from(s.offset), s.sub_offset)
        } else {
            let lo = dst_delay * (s.step & 0xFFFF_FFFF);
            let hi = dst_delay * (s.step >> 32);
            let frac = (lo & 0xFFFF_FFFF) + u64::from(s.sub_offset);
            (
                hi + (lo >> 32) + (frac >> 32) + u64::from(s.offset),
                frac as u32,
            )
        };

        if offset != 0 {
            if s.looping {
                offset %= u64::from(src_len);
            }
            if src_len != 0 && offset >= u64::from(src_len) {
                return (true, false);
            }
        }
        s.offset = offset as u32;
        s.sub_offset = sub;
    } else if s.next_time > w.start {
        dst_offset = w.ticks_to_samples(s.next_time - w.start).min(n);
    }

    let mut len = if src_len == 0 || s.looping {
        n
    } else {
        let avail = src_len - s.offset;
        if s.matched_rate {
            avail
        } else {
            dst_samples_for(avail, s.sub_offset, s.step).min(u64::from(n)) as u32
        }
    };

    let mut mix_end = n;
    if s.end_valid && s.end_time < w.end {
        mix_end = w.ticks_to_samples(s.end_time - w.start).min(n);
        if mix_end <= dst_offset {
            return (false, false);
        }
    }

    len = len.min(mix_end - dst_offset);
    if len == 0 {
        return (false, false);
    }

    let start = dst_offset as usize;
    let end = start + len as usize;
    let Some(dst_l) = left.get_mut(start..end) else {
        return (false, false);
    };
    let mut dst_r = right.and_then(|r| r.get_mut(start..end));
    let volume_l = s.volume_l * level;
    let volume_r = s.volume_r * level;

    match &mut s.data {
        SoundData::Callback(source) => {
            source.mix_audio(dst_l, volume_l, s.offset, w.mixing_rate);
            if let Some(r) = dst_r {
                source.mix_audio(r, volume_r, s.offset, w.mixing_rate);
            }
            s.offset += len;
        }
        SoundData::Sample(buffer) => {
            let src0 = if s.looping {
                buffer.looping()
            } else {
                buffer.one_shot()
            };
            let mut src_offset = s.offset;
            let mut sub = s.sub_offset;
            let mut pos = 0usize;
            let mut remaining = len;

            while remaining > 0 {
                let mut block = remaining;
                if s.looping {
                    let avail = src_len - src_offset;
                    let max = if s.matched_rate {
                        u64::from(avail)
                    } else {
                        dst_samples_for(avail, sub, s.step)
                    };
                    if u64::from(block) > max {
                        block = max as u32;
                    }
                }
                remaining -= block;

                let next = pos + block as usize;
                let out_l = &mut dst_l[pos..next];
                let out_r = dst_r.as_deref_mut().map(|r| &mut r[pos..next]);
                if s.matched_rate {
                    let src = src0.get(src_offset as usize..).unwrap_or(&[]);
                    mix_direct(out_l, out_r, src, volume_l, volume_r);
                    src_offset += block;
                } else {
                    let accum = (u64::from(src_offset) << 32) | u64::from(sub);
                    let accum = mix_resample(out_l, out_r, src0, volume_l, volume_r, accum, s.step);
                    src_offset = (accum >> 32) as u32;
                    sub = accum as u32;
                }
                pos = next;

                if src_offset >= src_len {
                    if s.looping {
                        src_offset -= src_len;
                    } else {
                        return (true, true);
                    }
                }
            }

            s.offset = src_offset;
            s.sub_offset = sub;
        }
    }

    s.next_time = w.end;
    (s.end_valid && s.next_time >= s.end_time, true)
}

fn mix_direct(left: &mut [f32], right: Option<&mut [f32]>, src: &[i16], vol_l: f32, vol_r: f32) {
    match right {
        Some(right) => {
            for ((l, r), &x) in left.iter_mut().zip(right.iter_mut()).zip(src) {
                let x = f32::from(x);
                *l += x * vol_l;
                *r += x * vol_r;
            }
        }
        None => {
            for (l, &x) in left.iter_mut().zip(src) {
                *l += f32::from(x) * vol_l;
            }
        }
    }
}

/// Linear-interpolating mix at a 32.32 step. Returns the advanced
/// accumulator.
fn mix_resample(
    left: &mut [f32],
    mut right: Option<&mut [f32]>,
    src: &[i16],
    vol_l: f32,
    vol_r: f32,
    mut accum: u64,
    step: u64,
) -> u64 {
    let at = |i: usize| f32::from(src.get(i).copied().unwrap_or(0));
    for (i, l) in left.iter_mut().enumerate() {
        let offset = (accum >> 32) as usize;
        let x1 = at(offset);
        let x2 = at(offset + 1);
        let frac = ((accum as u32) >> 1) as f32 * (1.0 / 2_147_483_648.0);
        let sample = x1 + (x2 - x1) * frac;
        accum = accum.wrapping_add(step);

        *l += sample * vol_l;
        if let Some(r) = right.as_deref_mut().and_then(|r| r.get_mut(i)) {
            *r += sample * vol_r;
        }
    }
    accum
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::Clock;

    fn scheduler() -> Scheduler {
        Scheduler::new(Clock::new(1_789_772, 1))
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            assert!((a - e).abs() < 1e-2, "sample {i}: {a} != {e}");
        }
    }

    /// Player where one tick is one output sample.
    fn player() -> (SamplePlayer, GroupId) {
        let mut p = SamplePlayer::default();
        p.set_rates(DEFAULT_MIXING_RATE, DEFAULT_POKEY_RATIO, 1.0);
        let g = p.create_group(SoundGroupDesc::default());
        (p, g)
    }

    fn sample(data: &[i16], hz: f32) -> Rc<SampleBuffer> {
        SamplePlayer::register_sample(data, SamplingRate::Hz(hz), 32767.0).expect("sample")
    }

    #[test]
    fn one_shot_lands_at_its_start_tick() {
        let sch = scheduler();
        let (mut p, g) = player();
        let buf = sample(&[1000, 2000, 3000, 4000], 20_000.0);
        let id = p.add_sound(&sch, g, 2, &buf, SoundParams::default()).expect("add");
        assert!(id.is_valid());

        let mut out = vec![0.0; 8];
        assert!(p.write_audio(MixInfo::mono(0, 8, &mut out)));
        assert_close(&out, &[0.0, 0.0, 1000.0, 2000.0, 3000.0, 4000.0, 0.0, 0.0]);
        assert_eq!(p.sound_count(), 0);
        assert!(!p.is_any_sound_queued(g));
    }

    #[test]
    fn one_shot_spans_frames() {
        let sch = scheduler();
        let (mut p, g) = player();
        let buf = sample(&[1, 2, 3, 4, 5, 6], 20_000.0);
        p.add_sound(&sch, g, 0, &buf, SoundParams::default()).expect("add");

        let mut a = vec![0.0; 4];
        let mut b = vec![0.0; 4];
        p.write_audio(MixInfo::mono(0, 4, &mut a));
        assert_eq!(p.sound_count(), 1);
        p.write_audio(MixInfo::mono(4, 4, &mut b));
        assert_close(&a, &[1.0, 2.0, 3.0, 4.0]);
        assert_close(&b, &[5.0, 6.0, 0.0, 0.0]);
        assert_eq!(p.sound_count(), 0);
    }

    #[test]
    fn late_frame_skips_elapsed_samples() {
        let sch = scheduler();
        let (mut p, g) = player();
        let buf = sample(&[1, 2, 3, 4, 5, 6], 20_000.0);
        p.add_sound(&sch, g, 0, &buf, SoundParams::default()).expect("add");

        let mut out = vec![0.0; 4];
        p.write_audio(MixInfo::mono(3, 4, &mut out));
        assert_close(&out, &[4.0, 5.0, 6.0, 0.0]);
    }

    #[test]
    fn looping_sound_wraps_and_stops_on_time() {
        let sch = scheduler();
        let (mut p, g) = player();
        let buf = sample(&[1, 2, 3], 20_000.0);
        let id = p
            .add_looping_sound(&sch, g, 0, &buf, SoundParams::default())
            .expect("add");

        let mut a = vec![0.0; 8];
        p.write_audio(MixInfo::mono(0, 8, &mut a));
        assert_close(&a, &[1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0, 2.0]);

        p.stop_sound_at(id, 10);
        let mut b = vec![0.0; 8];
        p.write_audio(MixInfo::mono(8, 8, &mut b));
        assert_close(&b, &[3.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(!p.is_sound_active(id));
    }

    #[test]
    fn half_rate_sample_is_interpolated() {
        let sch = scheduler();
        let (mut p, g) = player();
        let buf = sample(&[0, 100, 200, 300], 10_000.0);
        p.add_sound(&sch, g, 0, &buf, SoundParams::default()).expect("add");

        let mut out = vec![0.0; 10];
        p.write_audio(MixInfo::mono(0, 10, &mut out));
        assert_close(
            &out,
            &[0.0, 50.0, 100.0, 150.0, 200.0, 250.0, 300.0, 150.0, 0.0, 0.0],
        );
        assert_eq!(p.sound_count(), 0);
    }

    #[test]
    fn stopping_before_start_drops_the_sound() {
        let sch = scheduler();
        let (mut p, g) = player();
        let buf = sample(&[1, 2], 20_000.0);
        let id = p.add_sound(&sch, g, 50, &buf, SoundParams::default()).expect("add");
        p.stop_sound(&sch, id);
        assert_eq!(p.sound_count(), 0);
        assert!(!p.is_any_sound_queued(g));
    }

    #[test]
    fn superseded_sounds_are_cancelled() {
        let sch = scheduler();
        let mut p = SamplePlayer::default();
        let g = p.create_group(SoundGroupDesc::default().remove_superseded());
        let buf = sample(&[1, 2], 20_000.0);

        let late = p.add_sound(&sch, g, 100, &buf, SoundParams::default()).expect("add");
        let early = p.add_sound(&sch, g, 50, &buf, SoundParams::default()).expect("add");
        assert!(!p.is_sound_active(late));
        assert!(p.is_sound_active(early));

        let after = p.add_sound(&sch, g, 200, &buf, SoundParams::default()).expect("add");
        assert!(p.is_sound_active(early));
        assert!(p.is_sound_active(after));
        assert_eq!(p.sound_count(), 2);
    }

    #[test]
    fn panned_sound_mixes_in_stereo() {
        let sch = scheduler();
        let (mut p, g) = player();
        let buf = sample(&[1000], 20_000.0);
        p.add_sound(&sch, g, 0, &buf, SoundParams::default().pan(-1.0))
            .expect("add");
        assert!(p.requires_stereo_mixing());

        let mut l = vec![0.0; 2];
        let mut r = vec![0.0; 2];
        p.write_audio(MixInfo::mono(0, 2, &mut l).with_right(&mut r));
        assert_close(&l, &[1000.0 * std::f32::consts::SQRT_2, 0.0]);
        assert_close(&r, &[0.0, 0.0]);
        assert!(!p.requires_stereo_mixing());
    }

    #[test]
    fn mix_level_scales_group_bus() {
        let sch = scheduler();
        let mut p = SamplePlayer::default();
        p.set_rates(DEFAULT_MIXING_RATE, DEFAULT_POKEY_RATIO, 1.0);
        let g = p.create_group(SoundGroupDesc::default().mix(AudioMix::Drive));
        let buf = sample(&[1000], 20_000.0);
        p.add_sound(&sch, g, 0, &buf, SoundParams::default()).expect("add");

        let mut out = vec![0.0; 1];
        p.write_audio(MixInfo::mono(0, 1, &mut out).with_level(AudioMix::Drive, 0.5));
        assert_close(&out, &[500.0]);
    }

    #[test]
    fn rejected_sounds_leave_lists_alone() {
        let sch = scheduler();
        let (mut p, g) = player();
        let buf = sample(&[1, 2], 20_000.0);

        assert_eq!(
            p.add_sound(&sch, g, 0, &buf, SoundParams::default().volume(0.0)),
            Err(SoundError::VolumeTooLow)
        );
        assert_eq!(
            p.add_sound(&sch, GroupId(99), 0, &buf, SoundParams::default()),
            Err(SoundError::UnknownGroup(GroupId(99)))
        );
        assert_eq!(
            p.add_stock_sound(&sch, g, 0, SampleId(4), 1.0),
            Err(SoundError::UnknownSample(SampleId(4)))
        );
        // Two source samples per output sample is the fastest a two-sample
        // loop can go.
        assert!(matches!(
            p.add_sound(&sch, g, 0, &buf, SoundParams::default().rate_scale(2.0)),
            Err(SoundError::RateOutOfRange { .. })
        ));
        assert_eq!(p.sound_count(), 0);
    }

    #[test]
    fn ids_are_odd_and_increasing() {
        let sch = scheduler();
        let (mut p, g) = player();
        let buf = sample(&[1, 2], 20_000.0);
        let a = p.add_sound(&sch, g, 0, &buf, SoundParams::default()).expect("add");
        let b = p.add_sound(&sch, g, 0, &buf, SoundParams::default()).expect("add");
        assert_eq!(a, SoundId(1));
        assert_eq!(b, SoundId(3));
    }

    struct Ramp;

    impl SampleSource for Ramp {
        fn mix_audio(&mut self, dst: &mut [f32], volume: f32, offset: u32, _rate: f32) {
            for (i, d) in dst.iter_mut().enumerate() {
                *d += (offset as usize + i + 1) as f32 * volume;
            }
        }
    }

    #[test]
    fn callback_sound_runs_for_its_length() {
        let sch = scheduler();
        let mut p = SamplePlayer::default();
        p.set_rates(
            DEFAULT_MIXING_RATE,
            DEFAULT_POKEY_RATIO,
            1.0 / f64::from(CYCLES_PER_SYNC_SAMPLE),
        );
        let g = p.create_group(SoundGroupDesc::default());
        p.add_callback_sound(&sch, g, 0, Box::new(Ramp), 5, 2.0)
            .expect("add");

        let mut out = vec![0.0; 8];
        p.write_audio(MixInfo::mono(0, 8 * CYCLES_PER_SYNC_SAMPLE, &mut out));
        assert_close(&out, &[2.0, 4.0, 6.0, 8.0, 10.0, 0.0, 0.0, 0.0]);
        assert_eq!(p.sound_count(), 0);
    }

    #[test]
    fn looping_callback_continues_until_group_stops() {
        let mut sch = scheduler();
        let (mut p, g) = player();
        p.add_looping_callback_sound(&sch, g, 0, Box::new(Ramp), 1.0)
            .expect("add");

        let mut a = vec![0.0; 3];
        p.write_audio(MixInfo::mono(0, 3, &mut a));
        assert_close(&a, &[1.0, 2.0, 3.0]);

        sch.advance(4);
        p.stop_group_sounds(&sch, g).expect("group");
        assert!(!p.is_any_sound_queued(g));
        let mut b = vec![0.0; 3];
        p.write_audio(MixInfo::mono(3, 3, &mut b));
        assert_close(&b, &[4.0, 0.0, 0.0]);
        assert_eq!(p.sound_count(), 0);
    }

    #[test]
    fn released_group_soft_stops_sounds() {
        let sch = scheduler();
        let (mut p, g) = player();
        let buf = sample(&[1, 2], 20_000.0);
        p.add_sound(&sch, g, 10, &buf, SoundParams::default()).expect("add");
        p.release_group(&sch, g).expect("release");
        assert_eq!(p.sound_count(), 0);
        assert_eq!(p.release_group(&sch, g), Err(SoundError::UnknownGroup(g)));
    }

    #[test]
    fn convolution_players_are_shared_per_sample() {
        let (mut p, _) = player();
        p.pool_mut()
            .register_stock_sample(SampleId(1), &[32767, 32767], SamplingRate::default(), 1.0)
            .expect("register");
        let a = p.create_convolution_player(SampleId(1)).expect("player");
        let b = p.create_convolution_player(SampleId(1)).expect("player");
        assert_eq!(a, b);
        assert!(p.create_convolution_player(SampleId(2)).is_err());

        if let Some(player) = p.convolution_player_mut(a) {
            player.play(CYCLES_PER_SYNC_SAMPLE, 1.0);
        }
        let mut out = vec![0.0; 4];
        assert!(p.write_audio(MixInfo::mono(0, 4 * CYCLES_PER_SYNC_SAMPLE, &mut out)));
        assert_close(&out, &[0.0, 1.0, 1.0, 0.0]);

        p.release_convolution_player(a);
        assert!(p.convolution_player_mut(a).is_some());
        p.release_convolution_player(a);
        assert!(p.convolution_player_mut(a).is_none());
    }
}
