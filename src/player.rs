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
use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::allocator::{PoolCounts, SlotState, StealStrategy, VoiceAllocator, VoiceId};
use crate::bridge::{Command, ControlPort, Telemetry};
use crate::engine::Clock;
use crate::samples::SampleBuffer;
use crate::voice::{velocity_gain, ParamHandle};

/// Errors from player calls that are validated on the control side.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PlayerError {
    #[error("invalid loop region: start {start}s must be before end {end}s and not negative")]
    InvalidLoopRegion { start: f64, end: f64 },

    #[error("loop end {end}s is past the end of the buffer ({duration}s)")]
    LoopOutOfBounds { end: f64, duration: f64 },
}

/// What the control domain learns from its voices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// A voice finished and went back to the pool. `note` is the note it was playing,
    /// unless that binding was already dropped.
    Ended { voice: VoiceId, note: Option<u8> },
    Looped { voice: VoiceId, loop_count: u32 },
    Position { voice: VoiceId, seconds: f64 },
    NotLoaded { voice: VoiceId },
}

/// The control-side handle of one voice.
pub(crate) struct PlayerVoice {
    port: ControlPort,
    playback_rate: ParamHandle,
    velocity: ParamHandle,
    note: Option<u8>,
    /// Tags the current note. Telemetry from older notes is ignored.
    session: u32,
}

impl PlayerVoice {
    pub(crate) fn new(port: ControlPort, playback_rate: ParamHandle, velocity: ParamHandle) -> Self {
        Self {
            port,
            playback_rate,
            velocity,
            note: None,
            session: 0,
        }
    }
}

/// Plays one sample polyphonically, pitched by MIDI note.
///
/// Every call returns immediately. Commands reach the render domain at the start of the
/// next block, and their effects come back through [`SamplePlayer::poll`].
pub struct SamplePlayer {
    voices: Vec<PlayerVoice>,
    allocator: VoiceAllocator,
    /// The voice each held note is playing on.
    notes: HashMap<u8, VoiceId>,
    buffer: Option<SampleBuffer>,
    /// Every buffer handed to the render domain that a voice may still hold. Buffers are
    /// only ever freed here, on the control thread.
    retained: Vec<SampleBuffer>,
    volume: ParamHandle,
    clock: Clock,
    root_note: u8,
}

impl SamplePlayer {
    pub(crate) fn new(
        voices: Vec<PlayerVoice>,
        strategy: Box<dyn StealStrategy>,
        volume: ParamHandle,
        clock: Clock,
        root_note: u8,
    ) -> Self {
        let allocator = VoiceAllocator::with_strategy(voices.len(), strategy);
        Self {
            voices,
            allocator,
            notes: HashMap::new(),
            buffer: None,
            retained: Vec::new(),
            volume,
            clock,
            root_note,
        }
    }

    /// Plays `note` at `velocity` (0-127), at `start_time` on the context clock or as soon
    /// as possible. Returns false if no buffer is set or the pool is empty.
    pub fn play(&mut self, note: u8, velocity: f32, start_time: Option<f64>) -> bool {
        let Some(buffer_rate) = self.buffer.as_ref().map(|buffer| buffer.sample_rate()) else {
            warn!(note, "NotLoaded: no buffer set, ignoring note");
            return false;
        };

        // Retriggering a held note lets the previous voice ring out.
        if let Some(previous) = self.notes.remove(&note) {
            self.release_voice(previous, None);
        }

        let Some(reservation) = self.allocator.reserve() else {
            debug!(note, "No voice for note");
            return false;
        };
        let id = reservation.id;
        let Some(voice) = self.voices.get_mut(id.index()) else {
            self.allocator.stop(id);
            return false;
        };

        if reservation.stolen.is_some() {
            voice.port.send(Command::Stop { time: None });
            if let Some(old) = voice.note.take() {
                if self.notes.get(&old) == Some(&id) {
                    self.notes.remove(&old);
                }
            }
        }

        voice.session = voice.session.wrapping_add(1);
        let rate = 2f64.powf((note as f64 - self.root_note as f64) / 12.0) * buffer_rate as f64
            / self.clock.sample_rate() as f64;
        voice.playback_rate.set(rate as f32);
        voice.velocity.set(velocity);
        self.allocator.set_gain_hint(id, velocity_gain(velocity));

        let time = start_time.unwrap_or_else(|| self.clock.seconds());
        voice.port.send(Command::Start {
            time,
            offset: 0.0,
            duration: None,
            session: voice.session,
        });
        voice.note = Some(note);
        self.notes.insert(note, id);

        debug!(note, velocity, voice = %id, rate, stolen = ?reservation.stolen, "Playing note");
        true
    }

    /// Releases the voice playing `note`. Returns false if the note is not held.
    pub fn release(&mut self, note: u8) -> bool {
        match self.notes.remove(&note) {
            Some(id) => self.release_voice(id, None),
            None => false,
        }
    }

    fn release_voice(&mut self, id: VoiceId, release_seconds: Option<f64>) -> bool {
        if !self.allocator.release(id) {
            return false;
        }
        if let Some(voice) = self.voices.get_mut(id.index()) {
            voice.port.send(Command::Release { release_seconds });
        }
        true
    }

    /// Releases every sounding voice, bounding the release by `release_seconds`.
    pub fn stop_all(&mut self, release_seconds: Option<f64>) {
        let active: Vec<VoiceId> = self.allocator.active_ids().collect();
        for id in active {
            if self.allocator.state_of(id) == Some(SlotState::Playing) {
                self.allocator.release(id);
            }
            if let Some(voice) = self.voices.get_mut(id.index()) {
                voice.port.send(Command::Release { release_seconds });
            }
        }
        self.notes.clear();
    }

    /// Hard-stops every voice. The voices are free again immediately.
    pub fn kill_all(&mut self) {
        let active: Vec<VoiceId> = self.allocator.active_ids().collect();
        for id in active {
            if let Some(voice) = self.voices.get_mut(id.index()) {
                voice.port.send(Command::Stop { time: None });
                voice.note = None;
            }
            self.allocator.stop(id);
        }
        self.notes.clear();
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.set(volume);
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    /// Sets the loop region in seconds of buffer audio.
    pub fn set_loop_points(&mut self, start: f64, end: f64) -> Result<(), PlayerError> {
        if !start.is_finite() || !end.is_finite() || start < 0.0 || start >= end {
            return Err(PlayerError::InvalidLoopRegion { start, end });
        }
        if let Some(buffer) = &self.buffer {
            let duration = buffer.duration_seconds();
            if end > duration {
                return Err(PlayerError::LoopOutOfBounds { end, duration });
            }
        }
        self.broadcast(|| Command::SetLoopPoints {
            loop_start: start,
            loop_end: end,
        });
        Ok(())
    }

    pub fn set_loop_enabled(&mut self, value: bool) {
        self.broadcast(|| Command::SetLoopEnabled { value });
    }

    /// Enables playback position events, at most one per voice per block.
    pub fn set_position_streaming(&mut self, value: bool) {
        self.broadcast(|| Command::UsePlaybackPosition { value });
    }

    /// Attaches a buffer to every voice. Sounding voices end.
    pub fn set_buffer(&mut self, buffer: SampleBuffer) {
        info!(
            channels = buffer.channel_count(),
            frames = buffer.len(),
            sample_rate = buffer.sample_rate(),
            "Setting sample buffer"
        );
        let duration_seconds = buffer.duration_seconds();
        self.broadcast(|| Command::SetBuffer {
            buffer: buffer.clone(),
            duration_seconds,
        });
        self.retained.push(buffer.clone());
        self.buffer = Some(buffer);
        self.prune_buffers();
    }

    fn broadcast(&mut self, command: impl Fn() -> Command) {
        for voice in self.voices.iter_mut() {
            voice.port.send(command());
        }
    }

    /// Delivers queued commands and applies pending telemetry. Returns what happened
    /// since the last call.
    pub fn poll(&mut self) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        for (index, voice) in self.voices.iter_mut().enumerate() {
            let id = VoiceId::new(index);
            voice.port.flush();

            while let Some(telemetry) = voice.port.try_recv() {
                match telemetry {
                    Telemetry::Ended { session } => {
                        if session != voice.session {
                            debug!(voice = %id, session, "Ignoring ended from an old note");
                            continue;
                        }
                        self.allocator.stop(id);
                        let note = voice.note.take();
                        if let Some(note) = note {
                            if self.notes.get(&note) == Some(&id) {
                                self.notes.remove(&note);
                            }
                        }
                        events.push(PlayerEvent::Ended { voice: id, note });
                    }
                    // `play` never starts a voice without a buffer. This covers other
                    // clients of the voice mailbox.
                    Telemetry::NotLoaded { session } => {
                        if session == voice.session {
                            warn!(voice = %id, "NotLoaded: voice started without a buffer");
                            events.push(PlayerEvent::NotLoaded { voice: id });
                        }
                    }
                    Telemetry::Looped { loop_count } => {
                        events.push(PlayerEvent::Looped {
                            voice: id,
                            loop_count,
                        });
                    }
                    Telemetry::Position { position } => {
                        events.push(PlayerEvent::Position {
                            voice: id,
                            seconds: position,
                        });
                    }
                }
            }
        }
        self.prune_buffers();
        events
    }

    /// Frees retained buffers nothing else refers to any more.
    fn prune_buffers(&mut self) {
        let before = self.retained.len();
        self.retained.retain(|buffer| buffer.is_shared());
        let freed = before - self.retained.len();
        if freed > 0 {
            debug!(freed, "Freed unused sample buffers");
        }
    }

    /// Context time in seconds.
    pub fn current_time(&self) -> f64 {
        self.clock.seconds()
    }

    pub fn buffer(&self) -> Option<&SampleBuffer> {
        self.buffer.as_ref()
    }

    pub fn counts(&self) -> PoolCounts {
        self.allocator.counts()
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// The voice that is playing `note`, if the note is held.
    pub fn voice_for(&self, note: u8) -> Option<VoiceId> {
        self.notes.get(&note).copied()
    }

    pub fn voice_state(&self, id: VoiceId) -> Option<SlotState> {
        self.allocator.state_of(id)
    }

    pub fn root_note(&self) -> u8 {
        self.root_note
    }

    /// Number of buffers kept alive for the render domain.
    pub fn retained_buffers(&self) -> usize {
        self.retained.len()
    }
}
