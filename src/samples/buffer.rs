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
use std::sync::Arc;

/// Errors raised while building a sample buffer.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("Sample buffer must have at least one channel")]
    NoChannels,

    #[error("Channel {channel} has {actual} frames, expected {expected}")]
    UnequalChannels {
        channel: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Sample rate must be greater than zero")]
    ZeroSampleRate,
}

/// Multichannel PCM audio in planar (channel-major) layout.
///
/// The sample data lives behind an `Arc`, so clones are cheap and every voice that plays the
/// buffer refers to the same memory. Nothing mutates the data once it is built.
#[derive(Clone)]
pub struct SampleBuffer {
    /// One sample vector per channel, all the same length.
    channels: Arc<[Vec<f32>]>,
    /// Sample rate of the audio data.
    sample_rate: u32,
    /// Number of frames per channel.
    length: usize,
}

impl SampleBuffer {
    /// Creates a buffer from planar channel data.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self, BufferError> {
        if sample_rate == 0 {
            return Err(BufferError::ZeroSampleRate);
        }
        let length = match channels.first() {
            Some(channel) => channel.len(),
            None => return Err(BufferError::NoChannels),
        };
        if let Some((channel, data)) = channels
            .iter()
            .enumerate()
            .find(|(_, data)| data.len() != length)
        {
            return Err(BufferError::UnequalChannels {
                channel,
                expected: length,
                actual: data.len(),
            });
        }

        Ok(Self {
            channels: channels.into(),
            sample_rate,
            length,
        })
    }

    /// Creates a buffer from interleaved samples. Trailing samples that do not make up a
    /// whole frame are dropped.
    pub fn from_interleaved(
        samples: &[f32],
        channel_count: u16,
        sample_rate: u32,
    ) -> Result<Self, BufferError> {
        let num_channels = channel_count as usize;
        if num_channels == 0 {
            return Err(BufferError::NoChannels);
        }
        let num_frames = samples.len() / num_channels;

        let mut planar = vec![Vec::with_capacity(num_frames); num_channels];
        for frame in samples.chunks_exact(num_channels) {
            for (channel, sample) in planar.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }

        Self::new(planar, sample_rate)
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Returns the number of frames per channel.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns true if the buffer holds no frames.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the sample rate of the audio data.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the duration of the buffer in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.length as f64 / self.sample_rate as f64
    }

    /// Returns the samples of one channel. Indices past the last channel read the last
    /// channel, so a mono buffer feeds every output channel.
    pub fn channel(&self, index: usize) -> &[f32] {
        let last = self.channels.len() - 1;
        &self.channels[index.min(last)]
    }

    /// Reads a channel at a fractional frame position using linear interpolation. Both
    /// neighbouring frames are clamped to the buffer bounds.
    #[inline]
    pub fn interpolate(&self, channel: usize, position: f64) -> f32 {
        let data = self.channel(channel);
        if data.is_empty() || !position.is_finite() {
            return 0.0;
        }
        let last = data.len() - 1;
        let floor = position.floor();
        let frac = (position - floor) as f32;
        let index = if floor <= 0.0 {
            0
        } else {
            (floor as usize).min(last)
        };
        let next = (index + 1).min(last);

        let current = data[index];
        if frac == 0.0 {
            return current;
        }
        current + (data[next] - current) * frac
    }

    /// Returns the memory size of the sample data in bytes.
    pub fn memory_size(&self) -> usize {
        self.channels.len() * self.length * std::mem::size_of::<f32>()
    }

    /// Returns true if both buffers refer to the same sample data.
    pub fn shares_data(&self, other: &SampleBuffer) -> bool {
        Arc::ptr_eq(&self.channels, &other.channels)
    }

    /// Returns true if anything other than this handle still refers to the sample data.
    pub(crate) fn is_shared(&self) -> bool {
        Arc::strong_count(&self.channels) > 1
    }
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("channels", &self.channels.len())
            .field("frames", &self.length)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}
