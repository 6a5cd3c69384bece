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

//! Envelope gain sources.
//!
//! The render state never computes an envelope itself. It multiplies by whatever
//! per-sample gain it is handed, and a [`ParameterSource`] is what hands it over.
//!
//! ```text
//!  level
//!   1.0 ┐     ╱╲
//!       │    ╱  ╲___________
//!    S  │   ╱               ╲
//!   0.0 └──╱─────────────────╲──▶ time
//!      delay  A   D    S      R
//! ```

use crate::config::EnvelopeConfig;

/// Supplies one voice's envelope gain, one block at a time.
pub trait ParameterSource: Send {
    /// Gate on. The attack begins after `delay_frames` frames of silence.
    fn note_on(&mut self, delay_frames: usize);

    /// Gate off. Ramps from the current level to zero over `release_seconds`, or the
    /// source's own release time when none is given.
    fn note_off(&mut self, release_seconds: Option<f64>);

    /// Drops straight to zero.
    fn stop(&mut self);

    /// Writes the gain of the next `out.len()` frames.
    fn fill(&mut self, out: &mut [f32]);

    /// The most recently produced gain.
    fn level(&self) -> f32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Idle,
    Delay,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// A linear ADSR envelope.
#[derive(Debug, Clone)]
pub struct AdsrEnvelope {
    sample_rate: f32,
    attack: f32,
    decay: f32,
    sustain: f32,
    release: f32,

    stage: EnvelopeStage,
    level: f32,
    delay_remaining: usize,
    release_step: f32,
}

impl AdsrEnvelope {
    pub fn new(config: &EnvelopeConfig, sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1) as f32,
            attack: config.attack.max(0.0),
            decay: config.decay.max(0.0),
            sustain: config.sustain.clamp(0.0, 1.0),
            release: config.release.max(0.0),
            stage: EnvelopeStage::Idle,
            level: 0.0,
            delay_remaining: 0,
            release_step: 0.0,
        }
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    /// Per-frame change that covers `span` in `seconds`. Stages shorter than a frame
    /// complete in one step.
    fn step(&self, seconds: f32, span: f32) -> f32 {
        let frames = seconds * self.sample_rate;
        if frames <= 1.0 {
            span
        } else {
            span / frames
        }
    }

    fn next(&mut self) -> f32 {
        match self.stage {
            EnvelopeStage::Idle => self.level = 0.0,
            EnvelopeStage::Delay => {
                self.delay_remaining = self.delay_remaining.saturating_sub(1);
                if self.delay_remaining == 0 {
                    self.stage = EnvelopeStage::Attack;
                }
            }
            EnvelopeStage::Attack => {
                self.level += self.step(self.attack, 1.0);
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = EnvelopeStage::Decay;
                }
            }
            EnvelopeStage::Decay => {
                self.level -= self.step(self.decay, 1.0 - self.sustain);
                if self.level <= self.sustain {
                    self.level = self.sustain;
                    self.stage = EnvelopeStage::Sustain;
                }
            }
            EnvelopeStage::Sustain => self.level = self.sustain,
            EnvelopeStage::Release => {
                self.level -= self.release_step;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = EnvelopeStage::Idle;
                }
            }
        }
        self.level
    }
}

impl ParameterSource for AdsrEnvelope {
    fn note_on(&mut self, delay_frames: usize) {
        self.level = 0.0;
        self.delay_remaining = delay_frames;
        self.stage = if delay_frames == 0 {
            EnvelopeStage::Attack
        } else {
            EnvelopeStage::Delay
        };
    }

    fn note_off(&mut self, release_seconds: Option<f64>) {
        if matches!(self.stage, EnvelopeStage::Idle | EnvelopeStage::Delay) || self.level <= 0.0
        {
            self.stop();
            return;
        }
        let seconds = release_seconds
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map_or(self.release, |s| s as f32);
        self.release_step = self.step(seconds, self.level);
        self.stage = EnvelopeStage::Release;
    }

    fn stop(&mut self) {
        self.stage = EnvelopeStage::Idle;
        self.level = 0.0;
        self.delay_remaining = 0;
    }

    fn fill(&mut self, out: &mut [f32]) {
        for value in out.iter_mut() {
            *value = self.next();
        }
    }

    fn level(&self) -> f32 {
        self.level
    }
}
