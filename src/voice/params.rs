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

//! Render parameters and their descriptors.
//!
//! A parameter value for one block is either a single value (block-constant) or one value
//! per frame (per-sample). Both arrive as a slice and are read through [`ParamValues::at`],
//! so the render code never branches on the automation rate.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

/// How often a parameter may change within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomationRate {
    /// One value for the whole block.
    Block,
    /// One value per output frame.
    Sample,
}

/// Static description of a render parameter, as declared to the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamDescriptor {
    pub name: &'static str,
    pub default_value: f32,
    pub min_value: f32,
    pub max_value: f32,
    pub automation_rate: AutomationRate,
}

impl ParamDescriptor {
    /// Clamps a value into the declared range. Non-finite values become the default.
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_finite() {
            value.clamp(self.min_value, self.max_value)
        } else {
            self.default_value
        }
    }
}

/// Signed playback rate, 1.0 being the buffer's own pitch. Negative values play in reverse.
pub const PLAYBACK_RATE: ParamDescriptor = ParamDescriptor {
    name: "playbackRate",
    default_value: 1.0,
    min_value: -16.0,
    max_value: 16.0,
    automation_rate: AutomationRate::Sample,
};

/// Externally computed envelope gain.
pub const ENVELOPE_GAIN: ParamDescriptor = ParamDescriptor {
    name: "envelopeGain",
    default_value: 1.0,
    min_value: 0.0,
    max_value: 1.0,
    automation_rate: AutomationRate::Sample,
};

/// Note velocity on the MIDI scale.
pub const VELOCITY: ParamDescriptor = ParamDescriptor {
    name: "velocity",
    default_value: 127.0,
    min_value: 0.0,
    max_value: 127.0,
    automation_rate: AutomationRate::Block,
};

/// Output volume of a player.
pub const VOLUME: ParamDescriptor = ParamDescriptor {
    name: "volume",
    default_value: 1.0,
    min_value: 0.0,
    max_value: 1.0,
    automation_rate: AutomationRate::Block,
};

/// Values of one parameter for one block.
#[derive(Debug, Clone, Copy)]
pub struct ParamValues<'a> {
    values: &'a [f32],
    fallback: f32,
}

impl<'a> ParamValues<'a> {
    /// Wraps a value slice. An empty slice reads as `fallback`.
    pub fn new(values: &'a [f32], fallback: f32) -> Self {
        Self { values, fallback }
    }

    /// Returns the value for a frame. A single value applies to every frame, and frames
    /// past the end of a short slice read its last value.
    #[inline]
    pub fn at(&self, frame: usize) -> f32 {
        match self.values.len() {
            0 => self.fallback,
            1 => self.values[0],
            n => self.values[frame.min(n - 1)],
        }
    }

    /// Returns true if the values are a single block-constant value.
    pub fn is_constant(&self) -> bool {
        self.values.len() <= 1
    }
}

/// The parameter values a voice renders one block with.
#[derive(Debug, Clone, Copy)]
pub struct RenderParams<'a> {
    pub playback_rate: ParamValues<'a>,
    pub envelope_gain: ParamValues<'a>,
    pub velocity: ParamValues<'a>,
}

impl<'a> RenderParams<'a> {
    /// Builds render parameters from raw slices.
    pub fn new(playback_rate: &'a [f32], envelope_gain: &'a [f32], velocity: &'a [f32]) -> Self {
        Self {
            playback_rate: ParamValues::new(playback_rate, PLAYBACK_RATE.default_value),
            envelope_gain: ParamValues::new(envelope_gain, ENVELOPE_GAIN.default_value),
            velocity: ParamValues::new(velocity, VELOCITY.default_value),
        }
    }
}

/// A host control parameter: a scalar the control domain sets and the render domain reads
/// once per block. There is no acknowledgement.
#[derive(Clone, Debug)]
pub struct ParamHandle {
    bits: Arc<AtomicU32>,
    descriptor: ParamDescriptor,
}

impl ParamHandle {
    /// Creates a parameter set to its default value.
    pub fn new(descriptor: ParamDescriptor) -> Self {
        Self {
            bits: Arc::new(AtomicU32::new(descriptor.default_value.to_bits())),
            descriptor,
        }
    }

    /// Sets the value, clamped into the descriptor range.
    pub fn set(&self, value: f32) {
        let value = self.descriptor.clamp(value);
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// Returns the current value.
    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn descriptor(&self) -> &ParamDescriptor {
        &self.descriptor
    }
}
