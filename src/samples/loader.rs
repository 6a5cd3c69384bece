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

//! Sample loading and caching.
//!
//! Files are decoded entirely into memory before they are handed to voices, so the render
//! domain never touches the filesystem.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use symphonia::core::audio::SampleBuffer as DecodeBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info};

use super::buffer::{BufferError, SampleBuffer};

/// Errors raised while decoding a sample file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audio file error: {0}")]
    Audio(#[from] SymphoniaError),

    #[error("No audio track found in {0}")]
    NoTrack(PathBuf),

    #[error("Sample rate not specified in {0}")]
    UnknownSampleRate(PathBuf),

    #[error("Invalid sample data: {0}")]
    Buffer(#[from] BufferError),
}

/// Loads sample files into memory and caches them by path.
pub struct SampleLoader {
    /// Cache of decoded buffers by file path.
    cache: HashMap<PathBuf, SampleBuffer>,
    /// Sample rate to convert to, usually the audio context rate. `None` keeps the file rate
    /// and leaves rate compensation to the voice playback rate.
    target_sample_rate: Option<u32>,
}

impl SampleLoader {
    /// Creates a new sample loader.
    pub fn new(target_sample_rate: Option<u32>) -> Self {
        Self {
            cache: HashMap::new(),
            target_sample_rate,
        }
    }

    /// Loads a sample from a file into memory.
    /// Returns a cached version if already loaded.
    pub fn load(&mut self, path: &Path) -> Result<SampleBuffer, LoadError> {
        if let Some(buffer) = self.cache.get(path) {
            debug!(path = ?path, "Using cached sample");
            return Ok(buffer.clone());
        }

        info!(path = ?path, "Loading sample into memory");
        let decoded = decode_file(path)?;

        let buffer = match self.target_sample_rate {
            Some(target) if target != decoded.sample_rate() => {
                info!(
                    source_rate = decoded.sample_rate(),
                    target_rate = target,
                    "Transcoding sample"
                );
                transcode(&decoded, target)?
            }
            _ => decoded,
        };

        let duration = Duration::from_secs_f64(buffer.duration_seconds());
        info!(
            path = ?path,
            channels = buffer.channel_count(),
            sample_rate = buffer.sample_rate(),
            duration_ms = duration.as_millis(),
            memory_kb = buffer.memory_size() / 1024,
            "Sample loaded"
        );

        self.cache.insert(path.to_path_buf(), buffer.clone());
        Ok(buffer)
    }

    /// Returns the total memory used by cached samples.
    pub fn total_memory_usage(&self) -> usize {
        self.cache.values().map(|s| s.memory_size()).sum()
    }
}

impl std::fmt::Debug for SampleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleLoader")
            .field("cached_samples", &self.cache.len())
            .field("target_sample_rate", &self.target_sample_rate)
            .field("total_memory_kb", &(self.total_memory_usage() / 1024))
            .finish()
    }
}

/// Decodes the first audio track of a file into a planar buffer.
fn decode_file(path: &Path) -> Result<SampleBuffer, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| LoadError::NoTrack(path.to_path_buf()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| LoadError::UnknownSampleRate(path.to_path_buf()))?;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut planar: Vec<Vec<f32>> = Vec::new();
    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // A corrupt packet is skipped rather than failing the whole file.
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(path = ?path, error = e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let frames = decoded.frames();
        if frames == 0 {
            continue;
        }
        let spec = *decoded.spec();
        let channels = spec.channels.count();
        if planar.is_empty() {
            planar = vec![Vec::new(); channels];
        }

        let mut samples = DecodeBuffer::<f32>::new(decoded.capacity() as u64, spec);
        samples.copy_planar_ref(decoded);
        for (channel, plane) in planar
            .iter_mut()
            .zip(samples.samples().chunks_exact(frames))
        {
            channel.extend_from_slice(plane);
        }
    }

    Ok(SampleBuffer::new(planar, sample_rate)?)
}

/// Converts a buffer to another sample rate using linear interpolation. That is good enough
/// for one-shots and loops. Pitch-accurate conversion is left to the voice playback rate.
fn transcode(buffer: &SampleBuffer, target_rate: u32) -> Result<SampleBuffer, BufferError> {
    let ratio = target_rate as f64 / buffer.sample_rate() as f64;
    let target_frames = (buffer.len() as f64 * ratio).ceil() as usize;

    let channels = (0..buffer.channel_count())
        .map(|channel| {
            (0..target_frames)
                .map(|frame| buffer.interpolate(channel, frame as f64 / ratio))
                .collect()
        })
        .collect();

    SampleBuffer::new(channels, target_rate)
}
