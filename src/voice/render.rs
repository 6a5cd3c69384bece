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

//! The per-voice render state machine.
//!
//! ```text
//!   Idle ──start──▶ Playing ──release──▶ Releasing
//!    ▲                 │                    │
//!    │ init/set_buffer │ end/stop           │ end/stop/gain < ε/max release
//!    │                 ▼                    ▼
//!    └──────────────── Ended ◀──────────────┘
//! ```
//!
//! Everything here runs on the render thread. Nothing blocks, allocates or panics.
//! Faults turn into silence plus an `ended` event.

use super::block::AudioBlock;
use super::params::RenderParams;
use super::timing::PlaybackTiming;
use crate::bridge::{Command, Telemetry, TelemetrySink};
use crate::samples::SampleBuffer;

/// Envelope gain below which a releasing voice counts as silent.
pub const RELEASE_EPSILON: f32 = 1.0e-4;

/// Exponent of the velocity response curve.
pub const VELOCITY_CURVE: f32 = 2.0;

/// Gain at full velocity, leaving headroom for stacked voices.
pub const VELOCITY_SENSITIVITY: f32 = 0.8;

/// Output channels a voice renders. Further channels stay silent.
pub const MAX_CHANNELS: usize = 8;

/// Upper bound on the release phase when nothing else ends it.
pub const DEFAULT_MAX_RELEASE_SECONDS: f64 = 5.0;

/// Maps a MIDI-scale velocity to a linear gain.
#[inline]
pub fn velocity_gain(velocity: f32) -> f32 {
    if !velocity.is_finite() {
        return 0.0;
    }
    (velocity / 127.0).clamp(0.0, 1.0).powf(VELOCITY_CURVE) * VELOCITY_SENSITIVITY
}

/// Converts seconds to frames. Results within a millionth of a whole frame snap to it, so
/// loop points given as `n / sample_rate` land exactly on frame `n`.
#[inline]
fn seconds_to_frames(seconds: f64, sample_rate: f64) -> f64 {
    let frames = seconds * sample_rate;
    let rounded = frames.round();
    if (frames - rounded).abs() < 1.0e-6 {
        rounded
    } else {
        frames
    }
}

#[inline]
fn sanitize(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Playing,
    Releasing,
    Ended,
}

/// The `[start, end)` range a voice repeats, in seconds of buffer audio.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LoopRegion {
    pub start: f64,
    pub end: f64,
    pub enabled: bool,
}

impl LoopRegion {
    /// Returns the loop bounds in frames when looping applies to a playable range of
    /// `length` frames. Returns `None` when looping is disabled or the region is invalid.
    pub fn frames(&self, sample_rate: f64, length: f64) -> Option<(f64, f64)> {
        if !self.enabled {
            return None;
        }
        let start = seconds_to_frames(self.start, sample_rate);
        let end = seconds_to_frames(self.end, sample_rate);
        (start >= 0.0 && start < end && end <= length).then_some((start, end))
    }
}

/// Real-time playback state of one voice.
pub struct VoiceRenderState {
    buffer: Option<SampleBuffer>,
    /// Playable range of the buffer in seconds, from `set_buffer`.
    range_seconds: Option<f64>,
    state: VoiceState,
    timing: PlaybackTiming,
    /// Continuous frame index into the buffer.
    position: f64,
    loop_region: LoopRegion,
    loop_count: u32,
    /// One-shot correction added to the first frame after a loop wrap.
    compensation: [f32; MAX_CHANNELS],
    compensation_pending: bool,
    /// The last interpolated frame, before any gain.
    last_frame: [f32; MAX_CHANNELS],
    /// False until the current note renders its first frame.
    has_last_frame: bool,
    stream_position: bool,
    session: u32,
    release_started: Option<f64>,
    release_limit: f64,
    max_release_seconds: f64,
}

impl VoiceRenderState {
    pub fn new(max_release_seconds: f64) -> Self {
        let max_release_seconds = if max_release_seconds.is_finite() && max_release_seconds > 0.0
        {
            max_release_seconds
        } else {
            DEFAULT_MAX_RELEASE_SECONDS
        };
        Self {
            buffer: None,
            range_seconds: None,
            state: VoiceState::Idle,
            timing: PlaybackTiming::new(),
            position: 0.0,
            loop_region: LoopRegion::default(),
            loop_count: 0,
            compensation: [0.0; MAX_CHANNELS],
            compensation_pending: false,
            last_frame: [0.0; MAX_CHANNELS],
            has_last_frame: false,
            stream_position: false,
            session: 0,
            release_started: None,
            release_limit: max_release_seconds,
            max_release_seconds,
        }
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    /// Returns true while the voice is Playing or Releasing.
    pub fn is_active(&self) -> bool {
        matches!(self.state, VoiceState::Playing | VoiceState::Releasing)
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn timing(&self) -> &PlaybackTiming {
        &self.timing
    }

    pub fn loop_region(&self) -> LoopRegion {
        self.loop_region
    }

    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// Applies one command. `now` is the context time at the start of the block the
    /// command takes effect in.
    pub fn handle(&mut self, command: Command, now: f64, sink: &mut impl TelemetrySink) {
        match command {
            Command::Init => {
                self.interrupt(sink);
                self.reset();
            }
            Command::SetBuffer {
                buffer,
                duration_seconds,
            } => {
                self.interrupt(sink);
                self.reset();
                self.range_seconds =
                    Some(duration_seconds).filter(|d| d.is_finite() && *d > 0.0);
                self.buffer = Some(buffer);
            }
            Command::Start {
                time,
                offset,
                duration,
                session,
            } => self.start(time, offset, duration, session, sink),
            Command::Release { release_seconds } => self.release(now, release_seconds),
            Command::Stop { time } => self.stop(now, time, sink),
            Command::SetLoopEnabled { value } => self.loop_region.enabled = value,
            Command::SetLoopPoints {
                loop_start,
                loop_end,
            } => {
                self.loop_region.start = loop_start;
                self.loop_region.end = loop_end;
            }
            Command::UsePlaybackPosition { value } => self.stream_position = value,
        }
    }

    fn start(
        &mut self,
        time: f64,
        offset: f64,
        duration: Option<f64>,
        session: u32,
        sink: &mut impl TelemetrySink,
    ) {
        // A retrigger ends the old note first so its session sees exactly one `ended`.
        self.interrupt(sink);
        self.reset();
        self.session = session;

        let sample_rate = match &self.buffer {
            Some(buffer) => buffer.sample_rate() as f64,
            None => {
                sink.emit(Telemetry::NotLoaded { session });
                sink.emit(Telemetry::Ended { session });
                self.state = VoiceState::Ended;
                return;
            }
        };

        self.timing.start(time, offset, duration);
        self.position = seconds_to_frames(self.timing.offset_seconds(), sample_rate);
        self.state = VoiceState::Playing;
    }

    fn release(&mut self, now: f64, release_seconds: Option<f64>) {
        if self.state != VoiceState::Playing {
            return;
        }
        self.state = VoiceState::Releasing;
        self.release_started = Some(now);
        self.release_limit = release_seconds
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map_or(self.max_release_seconds, |s| s.min(self.max_release_seconds));
    }

    fn stop(&mut self, now: f64, time: Option<f64>, sink: &mut impl TelemetrySink) {
        if !self.is_active() {
            return;
        }
        match time {
            Some(time) if time.is_finite() && time > now => self.timing.stop(time),
            _ => self.finish(sink),
        }
    }

    /// Ends an active note, if any.
    fn interrupt(&mut self, sink: &mut impl TelemetrySink) {
        if self.is_active() {
            self.finish(sink);
        }
    }

    fn finish(&mut self, sink: &mut impl TelemetrySink) {
        self.state = VoiceState::Ended;
        self.timing.clear();
        self.release_started = None;
        self.compensation_pending = false;
        sink.emit(Telemetry::Ended {
            session: self.session,
        });
    }

    /// Clears per-note state. The buffer, loop region and streaming flag survive.
    fn reset(&mut self) {
        self.state = VoiceState::Idle;
        self.timing.clear();
        self.position = 0.0;
        self.loop_count = 0;
        self.compensation = [0.0; MAX_CHANNELS];
        self.compensation_pending = false;
        self.last_frame = [0.0; MAX_CHANNELS];
        self.has_last_frame = false;
        self.release_started = None;
        self.release_limit = self.max_release_seconds;
    }

    /// Renders one block into `block`, which is fully overwritten. `block_start` is the
    /// context time of the first frame. Returns the number of frames that produced audio.
    pub fn render(
        &mut self,
        block: &mut AudioBlock,
        params: &RenderParams,
        block_start: f64,
        context_rate: f32,
        sink: &mut impl TelemetrySink,
    ) -> usize {
        block.silence();
        if !self.is_active() {
            return 0;
        }
        let Some(buffer) = self.buffer.take() else {
            self.finish(sink);
            return 0;
        };

        let rendered = self.render_frames(&buffer, block, params, block_start, context_rate, sink);
        if rendered > 0 && self.stream_position && self.is_active() {
            sink.emit(Telemetry::Position {
                position: self.position / buffer.sample_rate() as f64,
            });
        }

        self.buffer = Some(buffer);
        rendered
    }

    fn render_frames(
        &mut self,
        buffer: &SampleBuffer,
        block: &mut AudioBlock,
        params: &RenderParams,
        block_start: f64,
        context_rate: f32,
        sink: &mut impl TelemetrySink,
    ) -> usize {
        let frame_seconds = 1.0 / context_rate.max(1.0) as f64;
        let sample_rate = buffer.sample_rate() as f64;
        let range_end = self.range_end(buffer);
        let loop_frames = self.loop_region.frames(sample_rate, range_end);
        let gain = velocity_gain(params.velocity.at(0));
        let channels = block.channels().min(MAX_CHANNELS);
        let mut rendered = 0;

        for frame in 0..block.frames() {
            let now = block_start + frame as f64 * frame_seconds;
            if self.timing.should_stop(now) {
                self.finish(sink);
                break;
            }
            if !self.timing.has_started(now) {
                continue;
            }

            let envelope = params.envelope_gain.at(frame);
            if self.state == VoiceState::Releasing && self.release_expired(now, envelope) {
                self.finish(sink);
                break;
            }

            let rate = params.playback_rate.at(frame) as f64;
            let rate = if rate.is_finite() { rate } else { 0.0 };

            match loop_frames {
                Some((start, end)) if rate >= 0.0 && self.position >= end => {
                    self.wrap(buffer, channels, start, sink);
                }
                Some((start, end)) if rate < 0.0 && self.position < start => {
                    self.wrap(buffer, channels, (end - 1.0).max(start), sink);
                }
                Some(_) => {}
                None => {
                    if !(0.0..range_end).contains(&self.position) {
                        self.finish(sink);
                        break;
                    }
                }
            }

            for channel in 0..channels {
                let raw = buffer.interpolate(channel, self.position);
                let mut value = raw;
                if self.compensation_pending {
                    value += self.compensation[channel];
                }
                self.last_frame[channel] = raw;
                block.set(channel, frame, sanitize(value * gain * envelope));
            }
            self.compensation_pending = false;
            self.has_last_frame = true;

            self.position += rate;
            rendered += 1;
        }

        rendered
    }

    /// Jumps to `target`, stashing the click compensation for the next frame.
    fn wrap(
        &mut self,
        buffer: &SampleBuffer,
        channels: usize,
        target: f64,
        sink: &mut impl TelemetrySink,
    ) {
        // A note that starts past the loop end has no previous frame to match.
        if self.has_last_frame {
            for channel in 0..channels {
                let first = buffer.interpolate(channel, target);
                self.compensation[channel] = 0.5 * (self.last_frame[channel] - first);
            }
            self.compensation_pending = true;
        }
        self.position = target;
        self.loop_count = self.loop_count.saturating_add(1);
        sink.emit(Telemetry::Looped {
            loop_count: self.loop_count,
        });
    }

    fn release_expired(&self, now: f64, envelope: f32) -> bool {
        // Also true for a NaN envelope.
        let silent = !(envelope >= RELEASE_EPSILON);
        let timed_out = self
            .release_started
            .is_some_and(|started| now - started >= self.release_limit);
        silent || timed_out
    }

    /// End of the playable range in frames.
    fn range_end(&self, buffer: &SampleBuffer) -> f64 {
        let length = buffer.len() as f64;
        match self.range_seconds {
            Some(seconds) => seconds_to_frames(seconds, buffer.sample_rate() as f64).min(length),
            None => length,
        }
    }
}

impl std::fmt::Debug for VoiceRenderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceRenderState")
            .field("state", &self.state)
            .field("session", &self.session)
            .field("position", &self.position)
            .field("loop_count", &self.loop_count)
            .field("has_buffer", &self.buffer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{constant_buffer, mono_buffer, VoiceHarness};

    fn start(session: u32) -> Command {
        Command::Start {
            time: 0.0,
            offset: 0.0,
            duration: None,
            session,
        }
    }

    fn loop_buffer_harness(sample_rate: u32) -> VoiceHarness {
        let mut harness = VoiceHarness::new(sample_rate, 128);
        let sr = sample_rate as f64;
        harness.set_buffer(mono_buffer(&[0.0, 1.0, 0.0, -1.0], sample_rate));
        harness.send(Command::SetLoopPoints {
            loop_start: 1.0 / sr,
            loop_end: 3.0 / sr,
        });
        harness.send(Command::SetLoopEnabled { value: true });
        harness
    }

    #[test]
    fn test_velocity_gain_bounds() {
        assert_eq!(velocity_gain(127.0), VELOCITY_SENSITIVITY);
        assert_eq!(velocity_gain(0.0), 0.0);
        assert_eq!(velocity_gain(200.0), VELOCITY_SENSITIVITY);
        assert_eq!(velocity_gain(f32::NAN), 0.0);
        assert!(velocity_gain(64.0) < velocity_gain(100.0));
    }

    #[test]
    fn test_deterministic_end_time() {
        let sample_rate = 1000;
        let mut harness = VoiceHarness::new(sample_rate, 128);
        harness.set_buffer(constant_buffer(1.0, 1000, sample_rate));
        harness.send(Command::Start {
            time: 0.0,
            offset: 0.1,
            duration: None,
            session: 1,
        });

        let output = harness.render_blocks_with(20, &[0.75], &[1.0], &[127.0]);

        // ceil((1000 - 0.1 * 1000) / 0.75) advances.
        let audible = output.iter().filter(|s| **s != 0.0).count();
        assert_eq!(audible, 1200);
        assert_eq!(harness.ended(), vec![1]);
        assert_eq!(harness.state.state(), VoiceState::Ended);
    }

    #[test]
    fn test_loop_wrap_count() {
        let sample_rate = 8000;
        let mut harness = loop_buffer_harness(sample_rate);
        harness.send(start(1));

        // Ten seconds of blocks.
        let blocks = (10 * sample_rate as usize) / 128;
        harness.render_blocks(blocks);

        let expected = (10 * sample_rate - 1) / 2;
        assert_eq!(harness.state.loop_count(), expected);
        let last_looped = harness.events.iter().rev().find_map(|event| match event {
            Telemetry::Looped { loop_count } => Some(*loop_count),
            _ => None,
        });
        assert_eq!(last_looped, Some(expected));
        assert!(harness.ended().is_empty());
    }

    #[test]
    fn test_click_compensation_value() {
        let mut harness = loop_buffer_harness(8000);
        harness.send(start(1));

        let output = harness.render_blocks(1);

        let buffer = [0.0f32, 1.0, 0.0, -1.0];
        let compensation = 0.5 * (buffer[2] - buffer[1]);
        // Frames 0..=2 play straight through, frame 3 is the first after the wrap.
        assert_eq!(output[1], buffer[1] * VELOCITY_SENSITIVITY);
        assert_eq!(output[3], (buffer[1] + compensation) * VELOCITY_SENSITIVITY);
        // The correction applies once only.
        assert_eq!(output[4], buffer[2] * VELOCITY_SENSITIVITY);
        assert_eq!(harness.state.loop_count(), (128 - 1) / 2);
    }

    #[test]
    fn test_no_compensation_when_starting_past_loop_end() {
        let mut harness = loop_buffer_harness(1000);
        harness.send(Command::Start {
            time: 0.0,
            offset: 0.003,
            duration: None,
            session: 1,
        });

        let output = harness.render_blocks(1);

        // The first frame wraps straight to the loop start with nothing to smooth over.
        assert_eq!(output[0], VELOCITY_SENSITIVITY);
        assert_eq!(output[1], 0.0);
        assert_eq!(harness.state.loop_count(), 64);
    }

    #[test]
    fn test_idempotent_stop() {
        let mut harness = VoiceHarness::new(1000, 64);
        harness.set_buffer(constant_buffer(0.5, 1000, 1000));
        harness.send(start(3));
        harness.render_blocks(1);

        harness.send(Command::Stop { time: None });
        harness.send(Command::Stop { time: None });
        assert_eq!(harness.ended(), vec![3]);

        // Stopped voices render silence.
        let output = harness.render_blocks(1);
        assert!(output.iter().all(|s| *s == 0.0));

        let mut idle = VoiceHarness::new(1000, 64);
        idle.send(Command::Stop { time: None });
        assert!(idle.events.is_empty());
    }

    #[test]
    fn test_scheduled_stop() {
        let mut harness = VoiceHarness::new(1000, 100);
        harness.set_buffer(constant_buffer(1.0, 1000, 1000));
        harness.send(start(1));
        harness.send(Command::Stop { time: Some(0.0505) });
        assert!(harness.ended().is_empty());

        let output = harness.render_blocks(1);
        assert_eq!(output.iter().filter(|s| **s != 0.0).count(), 51);
        assert_eq!(harness.ended(), vec![1]);
    }

    #[test]
    fn test_missing_buffer_reports_not_loaded() {
        let mut harness = VoiceHarness::new(1000, 64);
        harness.send(start(5));

        assert_eq!(
            harness.events,
            vec![
                Telemetry::NotLoaded { session: 5 },
                Telemetry::Ended { session: 5 }
            ]
        );
        let output = harness.render_blocks(2);
        assert!(output.iter().all(|s| *s == 0.0));
        assert_eq!(harness.ended(), vec![5]);
    }

    #[test]
    fn test_release_ends_below_epsilon() {
        let mut harness = VoiceHarness::new(1000, 64);
        harness.set_buffer(constant_buffer(1.0, 10_000, 1000));
        harness.send(start(1));
        harness.render_blocks(1);

        harness.send(Command::Release {
            release_seconds: None,
        });
        assert_eq!(harness.state.state(), VoiceState::Releasing);
        harness.render_blocks_with(1, &[1.0], &[0.5], &[127.0]);
        assert!(harness.ended().is_empty());

        let mut envelope = vec![0.25; 64];
        envelope[10] = 0.0;
        let output = harness.render_blocks_with(1, &[1.0], &envelope, &[127.0]);
        assert_eq!(output.iter().filter(|s| **s != 0.0).count(), 10);
        assert_eq!(harness.ended(), vec![1]);
    }

    #[test]
    fn test_release_bounded_by_max_duration() {
        let mut harness = VoiceHarness::with_max_release(1000, 64, 0.1);
        harness.set_buffer(constant_buffer(1.0, 10_000, 1000));
        harness.send(start(1));
        harness.send(Command::Release {
            release_seconds: None,
        });

        // The envelope never falls, the time bound ends the voice.
        let output = harness.render_blocks(4);
        let audible = output.iter().filter(|s| **s != 0.0).count();
        assert!((99..=101).contains(&audible), "audible frames: {audible}");
        assert_eq!(harness.ended(), vec![1]);
    }

    #[test]
    fn test_release_seconds_tighten_bound() {
        let mut harness = VoiceHarness::with_max_release(1000, 64, 1.0);
        harness.set_buffer(constant_buffer(1.0, 10_000, 1000));
        harness.send(start(1));
        harness.send(Command::Release {
            release_seconds: Some(0.0305),
        });

        let output = harness.render_blocks(1);
        assert_eq!(output.iter().filter(|s| **s != 0.0).count(), 31);
    }

    #[test]
    fn test_release_ignored_unless_playing() {
        let mut harness = VoiceHarness::new(1000, 64);
        harness.send(Command::Release {
            release_seconds: None,
        });
        assert_eq!(harness.state.state(), VoiceState::Idle);
    }

    #[test]
    fn test_sample_accurate_start() {
        let mut harness = VoiceHarness::new(1000, 64);
        harness.set_buffer(constant_buffer(1.0, 1000, 1000));
        harness.send(Command::Start {
            time: 0.0095,
            offset: 0.0,
            duration: None,
            session: 1,
        });

        let output = harness.render_blocks(1);
        assert!(output[..10].iter().all(|s| *s == 0.0));
        assert!(output[10..].iter().all(|s| *s != 0.0));
        assert_eq!(harness.state.position(), 54.0);
    }

    #[test]
    fn test_duration_limits_playback() {
        let mut harness = VoiceHarness::new(1000, 128);
        harness.set_buffer(constant_buffer(1.0, 1000, 1000));
        harness.send(Command::Start {
            time: 0.0,
            offset: 0.0,
            duration: Some(0.0505),
            session: 2,
        });

        let output = harness.render_blocks(1);
        assert_eq!(output.iter().filter(|s| **s != 0.0).count(), 51);
        assert_eq!(harness.ended(), vec![2]);
    }

    #[test]
    fn test_reverse_playback() {
        let ramp: Vec<f32> = (0..10).map(|i| i as f32 * 0.1).collect();
        let mut harness = VoiceHarness::new(1000, 16);
        harness.set_buffer(mono_buffer(&ramp, 1000));
        harness.send(Command::Start {
            time: 0.0,
            offset: 0.009,
            duration: None,
            session: 1,
        });

        let output = harness.render_blocks_with(1, &[-1.0], &[1.0], &[127.0]);
        for (frame, sample) in output[..9].iter().enumerate() {
            let expected = ramp[9 - frame] * VELOCITY_SENSITIVITY;
            assert!((sample - expected).abs() < 1e-6, "frame {frame}");
        }
        assert!(output[10..].iter().all(|s| *s == 0.0));
        assert_eq!(harness.ended(), vec![1]);
    }

    #[test]
    fn test_reverse_loop_wraps_to_loop_end() {
        let mut harness = loop_buffer_harness(1000);
        harness.send(Command::Start {
            time: 0.0,
            offset: 0.002,
            duration: None,
            session: 1,
        });

        harness.render_blocks_with(1, &[-1.0], &[1.0], &[127.0]);
        assert!(harness.state.loop_count() > 0);
        assert!(harness.ended().is_empty());
    }

    #[test]
    fn test_non_finite_samples_become_silence() {
        let mut harness = VoiceHarness::new(1000, 4);
        harness.set_buffer(mono_buffer(&[f32::NAN, 5.0, -5.0, f32::INFINITY], 1000));
        harness.send(start(1));

        // Integer positions with rate 1 read each frame exactly.
        let output = harness.render_blocks(1);
        assert_eq!(output, vec![0.0, 1.0, -1.0, 0.0]);
    }

    #[test]
    fn test_invalid_loop_region_plays_to_end() {
        let mut harness = VoiceHarness::new(1000, 128);
        harness.set_buffer(constant_buffer(1.0, 100, 1000));
        harness.send(Command::SetLoopPoints {
            loop_start: 0.05,
            loop_end: 0.02,
        });
        harness.send(Command::SetLoopEnabled { value: true });
        harness.send(start(1));

        let output = harness.render_blocks(1);
        assert_eq!(output.iter().filter(|s| **s != 0.0).count(), 100);
        assert_eq!(harness.state.loop_count(), 0);
        assert_eq!(harness.ended(), vec![1]);
    }

    #[test]
    fn test_per_sample_envelope() {
        let mut harness = VoiceHarness::new(1000, 8);
        harness.set_buffer(constant_buffer(1.0, 1000, 1000));
        harness.send(start(1));

        let envelope: Vec<f32> = (0..8).map(|i| i as f32 / 8.0).collect();
        let output = harness.render_blocks_with(1, &[1.0], &envelope, &[127.0]);
        for (sample, gain) in output.iter().zip(&envelope) {
            assert!((sample - gain * VELOCITY_SENSITIVITY).abs() < 1e-6);
        }
    }

    #[test]
    fn test_position_streaming_once_per_block() {
        let mut harness = VoiceHarness::new(1000, 100);
        harness.set_buffer(constant_buffer(1.0, 1000, 1000));
        harness.send(Command::UsePlaybackPosition { value: true });
        harness.send(start(1));

        harness.render_blocks(3);
        let positions: Vec<f64> = harness
            .events
            .iter()
            .filter_map(|event| match event {
                Telemetry::Position { position } => Some(*position),
                _ => None,
            })
            .collect();
        assert_eq!(positions, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_retrigger_ends_previous_session() {
        let mut harness = VoiceHarness::new(1000, 64);
        harness.set_buffer(constant_buffer(1.0, 1000, 1000));
        harness.send(start(1));
        harness.render_blocks(1);
        harness.send(start(2));

        assert_eq!(harness.ended(), vec![1]);
        assert_eq!(harness.state.state(), VoiceState::Playing);
        assert_eq!(harness.state.session(), 2);
        assert_eq!(harness.state.position(), 0.0);
    }

    #[test]
    fn test_set_buffer_interrupts_and_resets() {
        let mut harness = VoiceHarness::new(1000, 64);
        harness.set_buffer(constant_buffer(1.0, 1000, 1000));
        harness.send(start(4));
        harness.render_blocks(1);

        harness.set_buffer(constant_buffer(0.5, 10, 1000));
        assert_eq!(harness.ended(), vec![4]);
        assert_eq!(harness.state.state(), VoiceState::Idle);
        assert_eq!(harness.state.position(), 0.0);

        // Ended voices restart on the next start.
        harness.send(start(5));
        let output = harness.render_blocks(1);
        assert_eq!(output.iter().filter(|s| **s != 0.0).count(), 10);
        assert_eq!(harness.ended(), vec![4, 5]);
    }

    #[test]
    fn test_buffer_duration_trims_range() {
        let mut harness = VoiceHarness::new(1000, 64);
        harness.send(Command::SetBuffer {
            buffer: constant_buffer(1.0, 1000, 1000),
            duration_seconds: 0.02,
        });
        harness.send(start(1));

        let output = harness.render_blocks(1);
        assert_eq!(output.iter().filter(|s| **s != 0.0).count(), 20);
    }

    #[test]
    fn test_mono_buffer_feeds_all_channels() {
        let mut harness = VoiceHarness::with_channels(1000, 4, 2);
        harness.set_buffer(constant_buffer(0.5, 1000, 1000));
        harness.send(start(1));

        let output = harness.render_blocks(1);
        assert_eq!(output.len(), 8);
        assert!(output.iter().all(|s| *s == 0.5 * VELOCITY_SENSITIVITY));
    }
}
