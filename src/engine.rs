// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The audio context and the render-side voice bank.
//!
//! An [`AudioContext`] owns the engine configuration and the clock. It hands out a
//! [`SamplePlayer`] for the control domain and a [`VoiceBank`] for the render domain.
//! The two halves share nothing but the voice mailboxes and a few atomics.

use std::sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Arc,
};

use tracing::info;

use crate::bridge::{voice_channel, Command};
use crate::config::{ConfigError, EngineConfig};
use crate::player::{PlayerVoice, SamplePlayer};
use crate::voice::{
    AdsrEnvelope, AudioBlock, ParamHandle, ParameterSource, RenderParams, VoiceProcessor,
    PLAYBACK_RATE, VELOCITY, VOLUME,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContextState {
    Suspended = 0,
    Running = 1,
}

impl ContextState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ContextState::Running,
            _ => ContextState::Suspended,
        }
    }
}

/// The shared clock, counted in rendered frames.
#[derive(Debug, Clone)]
pub(crate) struct Clock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl Clock {
    fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate,
        }
    }

    pub(crate) fn seconds(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn advance(&self, frames: usize) {
        self.frames.fetch_add(frames as u64, Ordering::AcqRel);
    }
}

/// Owns the engine configuration, the clock and the running state.
#[derive(Debug)]
pub struct AudioContext {
    config: EngineConfig,
    state: Arc<AtomicU8>,
    clock: Clock,
}

impl AudioContext {
    /// Creates a suspended context. Fails if the configuration cannot run.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let clock = Clock::new(config.sample_rate());
        Ok(Self {
            config,
            state: Arc::new(AtomicU8::new(ContextState::Suspended as u8)),
            clock,
        })
    }

    pub fn state(&self) -> ContextState {
        ContextState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn resume(&self) {
        self.state
            .store(ContextState::Running as u8, Ordering::Release);
        info!(sample_rate = self.config.sample_rate(), "Audio context running");
    }

    pub fn suspend(&self) {
        self.state
            .store(ContextState::Suspended as u8, Ordering::Release);
        info!("Audio context suspended");
    }

    /// Context time in seconds.
    pub fn current_time(&self) -> f64 {
        self.clock.seconds()
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Builds a player with its own pool of voices, and the bank that renders them.
    pub fn create_sample_player(&self) -> (SamplePlayer, VoiceBank) {
        let config = &self.config;
        let sample_rate = config.sample_rate();
        let envelope = config.envelope();
        let volume = ParamHandle::new(VOLUME);

        let mut player_voices = Vec::with_capacity(config.voices());
        let mut bank_voices = Vec::with_capacity(config.voices());
        for _ in 0..config.voices() {
            let (control, render) =
                voice_channel(config.mailbox_capacity(), config.telemetry_capacity());
            let playback_rate = ParamHandle::new(PLAYBACK_RATE);
            let velocity = ParamHandle::new(VELOCITY);

            bank_voices.push(BankVoice {
                processor: VoiceProcessor::new(
                    render,
                    sample_rate as f32,
                    config.max_release_seconds(),
                ),
                envelope: Box::new(AdsrEnvelope::new(&envelope, sample_rate)),
                playback_rate: playback_rate.clone(),
                velocity: velocity.clone(),
            });
            player_voices.push(PlayerVoice::new(control, playback_rate, velocity));
        }

        let player = SamplePlayer::new(
            player_voices,
            config.steal_strategy().build(),
            volume.clone(),
            self.clock.clone(),
            config.root_note(),
        );

        let channels = config.channels() as usize;
        let block_size = config.block_size();
        let bank = VoiceBank {
            voices: bank_voices,
            volume,
            state: self.state.clone(),
            clock: self.clock.clone(),
            channels,
            block_size,
            mix: vec![0.0; channels * block_size],
            scratch: vec![0.0; channels * block_size],
            envelope: vec![0.0; block_size],
            cursor: block_size,
        };

        info!(
            voices = config.voices(),
            channels,
            block_size,
            "Created sample player"
        );
        (player, bank)
    }
}

struct BankVoice {
    processor: VoiceProcessor,
    envelope: Box<dyn ParameterSource>,
    playback_rate: ParamHandle,
    velocity: ParamHandle,
}

/// Frames until `time`, rounded up to the first frame at or after it.
fn delay_frames(time: f64, now: f64, sample_rate: f64) -> usize {
    let frames = (time - now) * sample_rate;
    if frames.is_finite() && frames > 0.0 {
        frames.ceil() as usize
    } else {
        0
    }
}

/// Renders every voice of one player and mixes them into a single output.
///
/// All buffers are allocated up front. Rendering never allocates, locks or blocks, so a
/// bank can run directly inside an audio device callback.
pub struct VoiceBank {
    voices: Vec<BankVoice>,
    volume: ParamHandle,
    state: Arc<AtomicU8>,
    clock: Clock,
    channels: usize,
    block_size: usize,
    /// Planar mix of the current block.
    mix: Vec<f32>,
    /// Planar output of one voice.
    scratch: Vec<f32>,
    envelope: Vec<f32>,
    /// Frames of `mix` already handed out by `render_interleaved`.
    cursor: usize,
}

impl VoiceBank {
    /// Renders the next block into the planar mix. A suspended bank renders silence and
    /// does not advance the clock.
    pub fn render_block(&mut self) {
        self.mix.fill(0.0);
        if ContextState::from_u8(self.state.load(Ordering::Acquire)) != ContextState::Running {
            return;
        }

        let now = self.clock.seconds();
        let sample_rate = self.clock.sample_rate as f64;
        let volume = self.volume.get();

        for voice in self.voices.iter_mut() {
            let BankVoice {
                processor,
                envelope,
                playback_rate,
                velocity,
            } = voice;

            processor.receive(now, |command| match command {
                Command::Start { time, .. } => {
                    envelope.note_on(delay_frames(*time, now, sample_rate));
                }
                Command::Release { release_seconds } => envelope.note_off(*release_seconds),
                Command::Stop { time: Some(time) } if *time > now => {}
                Command::Stop { .. } | Command::Init | Command::SetBuffer { .. } => {
                    envelope.stop();
                }
                _ => {}
            });

            if !processor.state().is_active() {
                continue;
            }

            envelope.fill(&mut self.envelope);
            let rate = [playback_rate.get()];
            let velocity = [velocity.get()];
            let params = RenderParams::new(&rate, &self.envelope, &velocity);
            let mut block = AudioBlock::new(&mut self.scratch, self.channels);
            if processor.render(&mut block, &params, now) > 0 {
                for (mixed, sample) in self.mix.iter_mut().zip(self.scratch.iter()) {
                    *mixed += sample * volume;
                }
            }
        }

        self.clock.advance(self.block_size);
    }

    /// Returns the planar mix of the last rendered block.
    pub fn block(&self) -> &[f32] {
        &self.mix
    }

    /// Fills an interleaved buffer, rendering new blocks as needed.
    pub fn render_interleaved(&mut self, out: &mut [f32]) {
        self.render_interleaved_with(out, |sample| sample);
    }

    /// Fills an interleaved buffer of any sample type.
    pub fn render_interleaved_with<T>(&mut self, out: &mut [T], convert: impl Fn(f32) -> T) {
        let channels = self.channels;
        for frame in out.chunks_mut(channels) {
            if self.cursor >= self.block_size {
                self.render_block();
                self.cursor = 0;
            }
            for (channel, sample) in frame.iter_mut().enumerate() {
                *sample = convert(self.mix[channel * self.block_size + self.cursor]);
            }
            self.cursor += 1;
        }
    }

    /// Number of voices currently playing or releasing.
    pub fn active_voices(&self) -> usize {
        self.voices
            .iter()
            .filter(|voice| voice.processor.state().is_active())
            .count()
    }

    /// False once the player is gone and every voice has finished.
    pub fn keep_alive(&self) -> bool {
        self.voices.iter().any(|voice| voice.processor.keep_alive())
    }

    pub fn current_time(&self) -> f64 {
        self.clock.seconds()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate
    }
}
