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
use std::mem;

use serde::{Deserialize, Serialize};

use crate::samples::SampleBuffer;

/// A command from the control domain to one voice. Times are seconds on the context clock,
/// offsets and durations are seconds of buffer audio.
#[derive(Debug, Clone)]
pub enum Command {
    /// Resets the voice to idle.
    Init,
    /// Attaches a buffer. `duration_seconds` limits the playable range of the buffer.
    SetBuffer {
        buffer: SampleBuffer,
        duration_seconds: f64,
    },
    /// Starts a note. `session` tags the `ended` telemetry this note will produce.
    Start {
        time: f64,
        offset: f64,
        duration: Option<f64>,
        session: u32,
    },
    /// Enters the release phase, bounded by `release_seconds` when given.
    Release { release_seconds: Option<f64> },
    /// Stops at `time`, or immediately when no time is given.
    Stop { time: Option<f64> },
    SetLoopEnabled { value: bool },
    SetLoopPoints { loop_start: f64, loop_end: f64 },
    /// Enables position telemetry.
    UsePlaybackPosition { value: bool },
}

impl Command {
    /// Returns the wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Init => "voice:init",
            Command::SetBuffer { .. } => "voice:set_buffer",
            Command::Start { .. } => "voice:start",
            Command::Release { .. } => "voice:release",
            Command::Stop { .. } => "voice:stop",
            Command::SetLoopEnabled { .. } => "setLoopEnabled",
            Command::SetLoopPoints { .. } => "voice:set_loop_points",
            Command::UsePlaybackPosition { .. } => "voice:usePlaybackPosition",
        }
    }

    /// Returns true for value-style commands where only the latest pending one matters.
    pub fn is_coalescible(&self) -> bool {
        matches!(
            self,
            Command::SetLoopEnabled { .. }
                | Command::SetLoopPoints { .. }
                | Command::UsePlaybackPosition { .. }
        )
    }

    pub(crate) fn same_kind(&self, other: &Command) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

/// A status event from a voice back to the control domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Telemetry {
    #[serde(rename = "voice:looped", rename_all = "camelCase")]
    Looped { loop_count: u32 },
    #[serde(rename = "voice:ended")]
    Ended { session: u32 },
    /// Playback position in seconds of buffer audio.
    #[serde(rename = "voice:position")]
    Position { position: f64 },
    /// A note was started before any buffer was attached.
    #[serde(rename = "voice:not_loaded")]
    NotLoaded { session: u32 },
}

impl Telemetry {
    /// Returns the wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Telemetry::Looped { .. } => "voice:looped",
            Telemetry::Ended { .. } => "voice:ended",
            Telemetry::Position { .. } => "voice:position",
            Telemetry::NotLoaded { .. } => "voice:not_loaded",
        }
    }

    /// Returns true for events the control domain cannot afford to lose: it frees voices
    /// only when it sees them.
    pub fn is_critical(&self) -> bool {
        matches!(self, Telemetry::Ended { .. } | Telemetry::NotLoaded { .. })
    }

    /// Serialises the event to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses an event from JSON. Unknown or malformed messages are ignored.
    pub fn from_json(text: &str) -> Option<Telemetry> {
        serde_json::from_str(text).ok()
    }
}
