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

/// Where a voice is on its playback timeline at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingState {
    /// Never started, or cleared since the last note.
    Idle,
    /// Started with a start time that has not been reached yet.
    Scheduled,
    /// Between the start time and the end time.
    Playing,
    /// The stop time or the maximum duration has passed.
    Stopped,
}

/// Absolute start/stop bookkeeping for a single voice, in seconds on the context clock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackTiming {
    start_time: Option<f64>,
    stop_time: Option<f64>,
    length_seconds: Option<f64>,
    offset_seconds: f64,
}

impl PlaybackTiming {
    /// Creates an inactive timing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a new timeline. Any previous state is cleared first. A negative offset is
    /// treated as zero and a non-positive length as "no maximum".
    pub fn start(&mut self, time: f64, offset_seconds: f64, length_seconds: Option<f64>) {
        self.clear();
        self.start_time = Some(if time.is_finite() { time } else { 0.0 });
        self.offset_seconds = if offset_seconds.is_finite() {
            offset_seconds.max(0.0)
        } else {
            0.0
        };
        self.length_seconds = length_seconds.filter(|l| l.is_finite() && *l > 0.0);
    }

    /// Schedules a stop. An earlier stop that is already scheduled wins. Does nothing on an
    /// inactive timing.
    pub fn stop(&mut self, time: f64) {
        if self.start_time.is_none() || !time.is_finite() {
            return;
        }
        self.stop_time = Some(match self.stop_time {
            Some(existing) => existing.min(time),
            None => time,
        });
    }

    /// Resets everything, ready for the next `start`.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Returns true between `start` and `clear`.
    pub fn is_active(&self) -> bool {
        self.start_time.is_some()
    }

    /// Returns true once the start time has been reached.
    pub fn has_started(&self, now: f64) -> bool {
        self.start_time.is_some_and(|start| now >= start)
    }

    /// Returns true once the explicit stop time or the maximum duration has passed.
    pub fn should_stop(&self, now: f64) -> bool {
        self.end_time().is_some_and(|end| now >= end)
    }

    /// Returns the earlier of the stop time and the end of the maximum duration.
    pub fn end_time(&self) -> Option<f64> {
        let start = self.start_time?;
        let duration_end = self.length_seconds.map(|length| start + length);
        match (self.stop_time, duration_end) {
            (Some(stop), Some(end)) => Some(stop.min(end)),
            (stop, end) => stop.or(end),
        }
    }

    /// Returns the timeline state at `now`.
    pub fn state(&self, now: f64) -> TimingState {
        if !self.is_active() {
            TimingState::Idle
        } else if self.should_stop(now) {
            TimingState::Stopped
        } else if self.has_started(now) {
            TimingState::Playing
        } else {
            TimingState::Scheduled
        }
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn stop_time(&self) -> Option<f64> {
        self.stop_time
    }

    pub fn length_seconds(&self) -> Option<f64> {
        self.length_seconds
    }

    pub fn offset_seconds(&self) -> f64 {
        self.offset_seconds
    }
}
