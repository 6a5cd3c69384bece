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

//! Render-domain voice code.

mod block;
mod envelope;
mod params;
mod processor;
mod render;
mod timing;

pub use block::AudioBlock;
pub use envelope::{AdsrEnvelope, EnvelopeStage, ParameterSource};
pub use params::{
    AutomationRate, ParamDescriptor, ParamHandle, ParamValues, RenderParams, ENVELOPE_GAIN,
    PLAYBACK_RATE, VELOCITY, VOLUME,
};
pub use processor::VoiceProcessor;
pub use render::{
    velocity_gain, LoopRegion, VoiceRenderState, VoiceState, DEFAULT_MAX_RELEASE_SECONDS,
    MAX_CHANNELS, RELEASE_EPSILON, VELOCITY_CURVE, VELOCITY_SENSITIVITY,
};
pub use timing::{PlaybackTiming, TimingState};
