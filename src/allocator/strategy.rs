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
use std::fmt::Debug;

use super::VoiceId;

/// A voice that could be stolen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: VoiceId,
    /// Allocation sequence number. Lower is older.
    pub allocated_at: u64,
    /// Last known loudness of the voice, in linear gain.
    pub gain_hint: f32,
}

/// Picks the voice to steal from one tier of candidates. All candidates are in the same
/// state, the allocator handles tier order.
pub trait StealStrategy: Debug + Send {
    fn choose(&self, candidates: &[Candidate]) -> Option<VoiceId>;
}

/// Steals the least recently allocated voice.
#[derive(Debug, Clone, Copy, Default)]
pub struct OldestFirst;

impl StealStrategy for OldestFirst {
    fn choose(&self, candidates: &[Candidate]) -> Option<VoiceId> {
        candidates
            .iter()
            .min_by_key(|candidate| candidate.allocated_at)
            .map(|candidate| candidate.id)
    }
}

/// Steals the quietest voice, the oldest among equally quiet ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuietestFirst;

impl StealStrategy for QuietestFirst {
    fn choose(&self, candidates: &[Candidate]) -> Option<VoiceId> {
        candidates
            .iter()
            .min_by(|a, b| {
                a.gain_hint
                    .total_cmp(&b.gain_hint)
                    .then(a.allocated_at.cmp(&b.allocated_at))
            })
            .map(|candidate| candidate.id)
    }
}
