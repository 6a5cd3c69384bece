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
use super::block::AudioBlock;
use super::params::{ParamDescriptor, RenderParams, ENVELOPE_GAIN, PLAYBACK_RATE, VELOCITY};
use super::render::VoiceRenderState;
use crate::bridge::{Command, RenderPort};

/// Adapts one voice's render state to a host audio processor: a mailbox in, telemetry out,
/// one block per call.
pub struct VoiceProcessor {
    state: VoiceRenderState,
    port: RenderPort,
    context_rate: f32,
    connected: bool,
}

impl VoiceProcessor {
    /// The parameters a host must provide on every `process` call.
    pub const PARAMETERS: &'static [ParamDescriptor] = &[PLAYBACK_RATE, ENVELOPE_GAIN, VELOCITY];

    pub fn new(port: RenderPort, context_rate: f32, max_release_seconds: f64) -> Self {
        Self {
            state: VoiceRenderState::new(max_release_seconds),
            port,
            context_rate,
            connected: true,
        }
    }

    /// Retries held-back telemetry, then applies pending commands at `now`. `observe`
    /// sees each command just before the render state does.
    pub fn receive(&mut self, now: f64, mut observe: impl FnMut(&Command)) {
        let RenderPort { inbox, outbox } = &mut self.port;
        outbox.flush_backlog();

        let state = &mut self.state;
        let still_connected = inbox.receive(|command| {
            observe(&command);
            state.handle(command, now, &mut *outbox);
        });
        self.connected &= still_connected;
    }

    /// Renders one block at `current_time`. Returns the number of audible frames.
    pub fn render(
        &mut self,
        outputs: &mut AudioBlock,
        params: &RenderParams,
        current_time: f64,
    ) -> usize {
        self.state.render(
            outputs,
            params,
            current_time,
            self.context_rate,
            &mut self.port.outbox,
        )
    }

    /// Runs a full processor quantum: receive, then render. Returns the keep-alive flag.
    pub fn process(
        &mut self,
        outputs: &mut AudioBlock,
        params: &RenderParams,
        current_time: f64,
    ) -> bool {
        self.receive(current_time, |_| {});
        self.render(outputs, params, current_time);
        self.keep_alive()
    }

    /// False once the control side is gone and the voice has nothing left to play.
    pub fn keep_alive(&self) -> bool {
        self.connected || self.state.is_active()
    }

    pub fn state(&self) -> &VoiceRenderState {
        &self.state
    }
}
