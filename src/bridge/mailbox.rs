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

//! Bounded per-voice mailboxes.
//!
//! Commands flow control → render through a bounded channel. Anything that does not fit
//! waits in an outbox on the control side, where value-style commands coalesce. Telemetry
//! flows render → control through a second bounded channel. Events the control side
//! depends on are held in a fixed-capacity backlog when that channel is full. Loop counts
//! and positions that do not fit keep only their newest value for the next retry.

use std::collections::VecDeque;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

use super::message::{Command, Telemetry};

/// Number of critical telemetry events a voice holds while its telemetry channel is full.
const TELEMETRY_BACKLOG: usize = 8;

/// Anything a render state can report telemetry to.
pub trait TelemetrySink {
    fn emit(&mut self, event: Telemetry);
}

/// Creates the two ends of a voice mailbox.
pub fn voice_channel(mailbox_capacity: usize, telemetry_capacity: usize) -> (ControlPort, RenderPort) {
    let (command_tx, command_rx) = crossbeam_channel::bounded(mailbox_capacity.max(1));
    let (telemetry_tx, telemetry_rx) = crossbeam_channel::bounded(telemetry_capacity.max(1));

    (
        ControlPort {
            commands: command_tx,
            telemetry: telemetry_rx,
            outbox: VecDeque::new(),
        },
        RenderPort {
            inbox: CommandInbox {
                commands: command_rx,
                drain_limit: mailbox_capacity.max(1),
            },
            outbox: TelemetryOutbox {
                telemetry: telemetry_tx,
                backlog: Vec::with_capacity(TELEMETRY_BACKLOG),
                looped: None,
                position: None,
            },
        },
    )
}

/// The control-domain end of a voice mailbox.
pub struct ControlPort {
    commands: Sender<Command>,
    telemetry: Receiver<Telemetry>,
    /// Commands that did not fit in the channel yet, oldest first.
    outbox: VecDeque<Command>,
}

impl ControlPort {
    /// Queues a command and tries to deliver everything pending. A coalescible command
    /// replaces any pending command of the same kind.
    pub fn send(&mut self, command: Command) {
        if command.is_coalescible() {
            self.outbox.retain(|pending| !pending.same_kind(&command));
        }
        self.outbox.push_back(command);
        self.flush();
    }

    /// Moves pending commands into the channel until it is full. Returns the number of
    /// commands still pending.
    pub fn flush(&mut self) -> usize {
        while let Some(command) = self.outbox.pop_front() {
            match self.commands.try_send(command) {
                Ok(()) => {}
                Err(TrySendError::Full(command)) => {
                    self.outbox.push_front(command);
                    break;
                }
                Err(TrySendError::Disconnected(_)) => {
                    // The render side has gone away, nothing will ever read these.
                    self.outbox.clear();
                    break;
                }
            }
        }
        self.outbox.len()
    }

    /// Returns the number of commands waiting in the outbox.
    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    /// Returns the next telemetry event, if any.
    pub fn try_recv(&self) -> Option<Telemetry> {
        self.telemetry.try_recv().ok()
    }
}

/// The render-domain end of a voice mailbox.
pub struct RenderPort {
    pub inbox: CommandInbox,
    pub outbox: TelemetryOutbox,
}

/// Receives commands on the render side.
pub struct CommandInbox {
    commands: Receiver<Command>,
    drain_limit: usize,
}

impl CommandInbox {
    /// Hands pending commands to `handle`, at most one mailbox capacity per call so a block
    /// has bounded work. Returns false once the control side is gone and nothing is left.
    pub fn receive(&mut self, mut handle: impl FnMut(Command)) -> bool {
        for _ in 0..self.drain_limit {
            match self.commands.try_recv() {
                Ok(command) => handle(command),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
        true
    }
}

/// Sends telemetry on the render side without blocking or allocating.
pub struct TelemetryOutbox {
    telemetry: Sender<Telemetry>,
    backlog: Vec<Telemetry>,
    /// Newest `looped` and `position` events that did not fit.
    looped: Option<Telemetry>,
    position: Option<Telemetry>,
}

impl TelemetryOutbox {
    /// Retries critical events held back by a full channel, oldest first, then the
    /// newest held loop count and position.
    pub fn flush_backlog(&mut self) {
        let mut sent = 0;
        for event in self.backlog.iter() {
            match self.telemetry.try_send(*event) {
                Ok(()) => sent += 1,
                Err(TrySendError::Full(_)) => break,
                Err(TrySendError::Disconnected(_)) => {
                    sent = self.backlog.len();
                    break;
                }
            }
        }
        self.backlog.drain(..sent);

        if self.backlog.is_empty() {
            Self::retry(&self.telemetry, &mut self.looped);
            Self::retry(&self.telemetry, &mut self.position);
        }
    }

    /// Returns the number of critical events waiting for channel space.
    pub fn backlog(&self) -> usize {
        self.backlog.len()
    }

    /// Returns the number of latest-value events waiting for channel space.
    pub fn held_latest(&self) -> usize {
        self.looped.iter().chain(self.position.iter()).count()
    }

    fn retry(telemetry: &Sender<Telemetry>, slot: &mut Option<Telemetry>) {
        if let Some(event) = slot.take() {
            if let Err(TrySendError::Full(event)) = telemetry.try_send(event) {
                *slot = Some(event);
            }
        }
    }

    fn latest_slot(&mut self, event: &Telemetry) -> Option<&mut Option<Telemetry>> {
        match event {
            Telemetry::Looped { .. } => Some(&mut self.looped),
            Telemetry::Position { .. } => Some(&mut self.position),
            _ => None,
        }
    }

    fn hold(&mut self, event: Telemetry) {
        // Never grows past the preallocated capacity.
        if self.backlog.len() < self.backlog.capacity() {
            self.backlog.push(event);
        }
    }
}

impl TelemetrySink for TelemetryOutbox {
    fn emit(&mut self, event: Telemetry) {
        if event.is_critical() && !self.backlog.is_empty() {
            // Keep critical events in order behind the ones already waiting.
            self.hold(event);
            return;
        }

        match self.telemetry.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {
                // A newer value went out, so an older held one is stale.
                if let Some(slot) = self.latest_slot(&event) {
                    *slot = None;
                }
            }
            Err(TrySendError::Full(event)) => {
                if event.is_critical() {
                    self.hold(event);
                } else if let Some(slot) = self.latest_slot(&event) {
                    *slot = Some(event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(inbox: &mut CommandInbox) -> Vec<Command> {
        let mut received = Vec::new();
        inbox.receive(|command| received.push(command));
        received
    }

    #[test]
    fn test_fifo_delivery() {
        let (mut control, mut render) = voice_channel(8, 8);
        control.send(Command::Init);
        control.send(Command::Stop { time: None });

        let received = drain(&mut render.inbox);
        assert_eq!(received.len(), 2);
        assert!(matches!(received[0], Command::Init));
        assert!(matches!(received[1], Command::Stop { time: None }));
    }

    #[test]
    fn test_full_channel_coalesces_pending_commands() {
        let (mut control, mut render) = voice_channel(1, 8);
        control.send(Command::Init);
        for i in 0..10 {
            control.send(Command::SetLoopPoints {
                loop_start: 0.0,
                loop_end: i as f64 + 1.0,
            });
        }
        control.send(Command::Release {
            release_seconds: None,
        });
        // Only the newest loop-point update survives behind the full channel.
        assert_eq!(control.pending(), 2);

        assert_eq!(drain(&mut render.inbox).len(), 1);
        assert_eq!(control.flush(), 1);
        let received = drain(&mut render.inbox);
        assert!(matches!(
            received[0],
            Command::SetLoopPoints { loop_end, .. } if loop_end == 10.0
        ));
        assert_eq!(control.flush(), 0);
        assert!(matches!(
            drain(&mut render.inbox)[0],
            Command::Release { .. }
        ));
    }

    #[test]
    fn test_receive_reports_disconnect() {
        let (control, mut render) = voice_channel(4, 4);
        assert!(render.inbox.receive(|_| {}));
        drop(control);
        assert!(!render.inbox.receive(|_| {}));
    }

    #[test]
    fn test_receive_is_bounded_per_call() {
        let (mut control, mut render) = voice_channel(2, 4);
        for _ in 0..2 {
            control.send(Command::Init);
        }
        let mut count = 0;
        render.inbox.receive(|_| count += 1);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_critical_telemetry_survives_full_channel() {
        let (control, mut render) = voice_channel(4, 1);
        render.outbox.emit(Telemetry::Position { position: 0.1 });
        // The channel is full, the newer position waits in its slot and ended is held.
        render.outbox.emit(Telemetry::Position { position: 0.2 });
        render.outbox.emit(Telemetry::Ended { session: 1 });
        assert_eq!(render.outbox.backlog(), 1);

        assert_eq!(
            control.try_recv(),
            Some(Telemetry::Position { position: 0.1 })
        );
        render.outbox.flush_backlog();
        assert_eq!(render.outbox.backlog(), 0);
        assert_eq!(control.try_recv(), Some(Telemetry::Ended { session: 1 }));
        assert_eq!(control.try_recv(), None);
    }

    #[test]
    fn test_full_channel_keeps_newest_loop_count() {
        let (control, mut render) = voice_channel(4, 2);
        for loop_count in 1..=10 {
            render.outbox.emit(Telemetry::Looped { loop_count });
        }
        render.outbox.emit(Telemetry::Position { position: 0.5 });
        assert_eq!(render.outbox.held_latest(), 2);

        assert_eq!(control.try_recv(), Some(Telemetry::Looped { loop_count: 1 }));
        assert_eq!(control.try_recv(), Some(Telemetry::Looped { loop_count: 2 }));
        render.outbox.flush_backlog();
        assert_eq!(render.outbox.held_latest(), 0);
        assert_eq!(control.try_recv(), Some(Telemetry::Looped { loop_count: 10 }));
        assert_eq!(
            control.try_recv(),
            Some(Telemetry::Position { position: 0.5 })
        );
        assert_eq!(control.try_recv(), None);
    }

    #[test]
    fn test_held_events_wait_behind_critical_backlog() {
        let (control, mut render) = voice_channel(4, 1);
        render.outbox.emit(Telemetry::Looped { loop_count: 1 });
        render.outbox.emit(Telemetry::Looped { loop_count: 2 });
        render.outbox.emit(Telemetry::Ended { session: 3 });

        assert_eq!(control.try_recv(), Some(Telemetry::Looped { loop_count: 1 }));
        render.outbox.flush_backlog();
        // Only room for the ended event, the loop count stays held.
        assert_eq!(control.try_recv(), Some(Telemetry::Ended { session: 3 }));
        assert_eq!(render.outbox.held_latest(), 1);
        render.outbox.flush_backlog();
        assert_eq!(control.try_recv(), Some(Telemetry::Looped { loop_count: 2 }));
    }

    #[test]
    fn test_send_after_render_side_dropped() {
        let (mut control, render) = voice_channel(1, 1);
        drop(render);
        control.send(Command::Init);
        control.send(Command::Init);
        assert_eq!(control.pending(), 0);
    }
}
