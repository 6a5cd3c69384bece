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

/// A mutable view over one planar audio block: `channels` runs of `frames` samples laid
/// out back to back in a single slice, so it can be built without allocating.
pub struct AudioBlock<'a> {
    data: &'a mut [f32],
    channels: usize,
    frames: usize,
}

impl<'a> AudioBlock<'a> {
    /// Wraps planar data. Samples past `channels * frames` are not part of the block.
    pub fn new(data: &'a mut [f32], channels: usize) -> Self {
        let frames = if channels == 0 {
            0
        } else {
            data.len() / channels
        };
        Self {
            data,
            channels,
            frames,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Zeroes the whole block.
    pub fn silence(&mut self) {
        self.data[..self.channels * self.frames].fill(0.0);
    }

    #[inline]
    pub fn set(&mut self, channel: usize, frame: usize, value: f32) {
        self.data[channel * self.frames + frame] = value;
    }

    #[inline]
    pub fn get(&self, channel: usize, frame: usize) -> f32 {
        self.data[channel * self.frames + frame]
    }

    /// Returns one channel of the block.
    pub fn channel(&self, channel: usize) -> &[f32] {
        let start = channel * self.frames;
        &self.data[start..start + self.frames]
    }

    /// Returns one channel of the block, mutably.
    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        let start = channel * self.frames;
        &mut self.data[start..start + self.frames]
    }
}
