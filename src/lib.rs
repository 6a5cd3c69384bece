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

//! Polyphonic sample-voice playback.
//!
//! The crate is split along the two scheduling domains:
//! - the control domain ([`player::SamplePlayer`], [`allocator::VoiceAllocator`]) may
//!   allocate, log and wait;
//! - the render domain ([`engine::VoiceBank`], [`voice::VoiceProcessor`]) runs once per
//!   audio block and never blocks, allocates or panics.
//!
//! The only connection between them is the per-voice [`bridge`] mailbox plus a handful of
//! host control parameters.

pub mod allocator;
pub mod audio;
pub mod bridge;
pub mod config;
pub mod engine;
pub mod player;
pub mod samples;
#[cfg(test)]
mod testutil;
pub mod voice;

pub use engine::{AudioContext, ContextState, VoiceBank};
pub use player::{PlayerError, PlayerEvent, SamplePlayer};
pub use samples::SampleBuffer;
