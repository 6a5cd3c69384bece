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

//! The control bridge between the control and render domains.
//!
//! Every voice gets its own fire-and-forget mailbox. A command sent from the control side
//! takes effect at the start of the next render block, and the control side only learns
//! about its effect from later telemetry. Ordering is FIFO within a voice and undefined
//! across voices.

mod mailbox;
mod message;

pub use mailbox::{
    voice_channel, CommandInbox, ControlPort, RenderPort, TelemetryOutbox, TelemetrySink,
};
pub use message::{Command, Telemetry};
