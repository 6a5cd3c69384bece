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
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::bridge::{Command, Telemetry, TelemetrySink};
use crate::samples::SampleBuffer;
use crate::voice::{AudioBlock, RenderParams, VoiceRenderState, DEFAULT_MAX_RELEASE_SECONDS};

impl TelemetrySink for Vec<Telemetry> {
    fn emit(&mut self, event: Telemetry) {
        self.push(event);
    }
}

/// Writes a 16-bit wav file. The first channel is a ramp up, every other channel the
/// same ramp inverted.
pub fn write_test_wav(path: &Path, channels: u16, sample_rate: u32, frames: usize) {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for frame in 0..frames {
        let value = (frame as f32 / frames as f32 * i16::MAX as f32) as i16;
        for channel in 0..channels {
            let sample = if channel == 0 { value } else { -value };
            writer.write_sample(sample).unwrap();
        }
    }
    writer.finalize().unwrap();
}

/// A mono buffer holding exactly `samples`.
pub fn mono_buffer(samples: &[f32], sample_rate: u32) -> SampleBuffer {
    SampleBuffer::new(vec![samples.to_vec()], sample_rate).unwrap()
}

/// A mono buffer of `frames` copies of `value`.
pub fn constant_buffer(value: f32, frames: usize, sample_rate: u32) -> SampleBuffer {
    SampleBuffer::new(vec![vec![value; frames]], sample_rate).unwrap()
}

/// Drives a single render state block by block, collecting its telemetry.
pub struct VoiceHarness {
    pub state: VoiceRenderState,
    pub events: Vec<Telemetry>,
    sample_rate: u32,
    block_size: usize,
    channels: usize,
    frames: usize,
}

impl VoiceHarness {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self::build(sample_rate, block_size, 1, DEFAULT_MAX_RELEASE_SECONDS)
    }

    pub fn with_channels(sample_rate: u32, block_size: usize, channels: usize) -> Self {
        Self::build(sample_rate, block_size, channels, DEFAULT_MAX_RELEASE_SECONDS)
    }

    pub fn with_max_release(sample_rate: u32, block_size: usize, max_release: f64) -> Self {
        Self::build(sample_rate, block_size, 1, max_release)
    }

    fn build(sample_rate: u32, block_size: usize, channels: usize, max_release: f64) -> Self {
        Self {
            state: VoiceRenderState::new(max_release),
            events: Vec::new(),
            sample_rate,
            block_size,
            channels,
            frames: 0,
        }
    }

    /// Context time of the next block.
    pub fn now(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    pub fn send(&mut self, command: Command) {
        let now = self.now();
        self.state.handle(command, now, &mut self.events);
    }

    /// Attaches a buffer with its full length playable.
    pub fn set_buffer(&mut self, buffer: SampleBuffer) {
        let duration_seconds = buffer.duration_seconds();
        self.send(Command::SetBuffer {
            buffer,
            duration_seconds,
        });
    }

    /// Renders blocks at the buffer's own pitch, unity envelope and full velocity.
    pub fn render_blocks(&mut self, blocks: usize) -> Vec<f32> {
        self.render_blocks_with(blocks, &[1.0], &[1.0], &[127.0])
    }

    /// Renders blocks with the given parameter values and returns the planar output of
    /// every block, concatenated.
    pub fn render_blocks_with(
        &mut self,
        blocks: usize,
        playback_rate: &[f32],
        envelope_gain: &[f32],
        velocity: &[f32],
    ) -> Vec<f32> {
        let mut output = Vec::with_capacity(blocks * self.block_size * self.channels);
        let mut data = vec![0.0; self.block_size * self.channels];
        let params = RenderParams::new(playback_rate, envelope_gain, velocity);
        for _ in 0..blocks {
            let now = self.now();
            let mut block = AudioBlock::new(&mut data, self.channels);
            self.state.render(
                &mut block,
                &params,
                now,
                self.sample_rate as f32,
                &mut self.events,
            );
            output.extend_from_slice(&data);
            self.frames += self.block_size;
        }
        output
    }

    /// Sessions of every `ended` event so far, in order.
    pub fn ended(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Telemetry::Ended { session } => Some(*session),
                _ => None,
            })
            .collect()
    }
}
