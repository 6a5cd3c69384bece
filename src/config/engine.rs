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
use serde::Deserialize;

use super::error::ConfigError;
use crate::allocator::{OldestFirst, QuietestFirst, StealStrategy};

const DEFAULT_SAMPLE_RATE: u32 = 48000;
const DEFAULT_BLOCK_SIZE: usize = 128;
const DEFAULT_CHANNELS: u16 = 2;
const DEFAULT_VOICES: usize = 16;
const DEFAULT_MAILBOX_CAPACITY: usize = 32;
const DEFAULT_TELEMETRY_CAPACITY: usize = 64;
const DEFAULT_MAX_RELEASE_SECONDS: f64 = 5.0;
const DEFAULT_ROOT_NOTE: u8 = 60;

/// Which voice to take when the pool is exhausted.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StealStrategyKind {
    /// Least recently allocated voice.
    #[default]
    Oldest,
    /// Quietest voice, oldest among equals.
    Quietest,
}

impl StealStrategyKind {
    pub fn build(&self) -> Box<dyn StealStrategy> {
        match self {
            StealStrategyKind::Oldest => Box::new(OldestFirst),
            StealStrategyKind::Quietest => Box::new(QuietestFirst),
        }
    }
}

/// Linear ADSR times in seconds, plus the sustain level.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct EnvelopeConfig {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            attack: 0.005,
            decay: 0.05,
            sustain: 1.0,
            release: 0.2,
        }
    }
}

/// A YAML representation of the engine configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct EngineConfig {
    /// Context sample rate in Hz (default: 48000).
    sample_rate: Option<u32>,

    /// Frames per render block (default: 128).
    block_size: Option<usize>,

    /// Output channels (default: 2).
    channels: Option<u16>,

    /// Size of the voice pool (default: 16).
    voices: Option<usize>,

    /// Commands each voice mailbox holds before the control side starts queueing.
    mailbox_capacity: Option<usize>,

    /// Telemetry events each voice buffers for the control side.
    telemetry_capacity: Option<usize>,

    /// Hard limit on a release phase in seconds (default: 5).
    max_release_seconds: Option<f64>,

    /// MIDI note that plays a sample at its own pitch (default: 60).
    root_note: Option<u8>,

    steal_strategy: Option<StealStrategyKind>,

    envelope: Option<EnvelopeConfig>,
}

impl EngineConfig {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn block_size(&self) -> usize {
        self.block_size.unwrap_or(DEFAULT_BLOCK_SIZE)
    }

    pub fn channels(&self) -> u16 {
        self.channels.unwrap_or(DEFAULT_CHANNELS)
    }

    pub fn voices(&self) -> usize {
        self.voices.unwrap_or(DEFAULT_VOICES)
    }

    pub fn mailbox_capacity(&self) -> usize {
        self.mailbox_capacity.unwrap_or(DEFAULT_MAILBOX_CAPACITY)
    }

    pub fn telemetry_capacity(&self) -> usize {
        self.telemetry_capacity.unwrap_or(DEFAULT_TELEMETRY_CAPACITY)
    }

    pub fn max_release_seconds(&self) -> f64 {
        self.max_release_seconds.unwrap_or(DEFAULT_MAX_RELEASE_SECONDS)
    }

    pub fn root_note(&self) -> u8 {
        self.root_note.unwrap_or(DEFAULT_ROOT_NOTE)
    }

    pub fn steal_strategy(&self) -> StealStrategyKind {
        self.steal_strategy.unwrap_or_default()
    }

    pub fn envelope(&self) -> EnvelopeConfig {
        self.envelope.unwrap_or_default()
    }

    /// Overrides the sample rate, e.g. with the rate an output device runs at.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_voices(mut self, voices: usize) -> Self {
        self.voices = Some(voices);
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }

    pub fn with_max_release_seconds(mut self, seconds: f64) -> Self {
        self.max_release_seconds = Some(seconds);
        self
    }

    pub fn with_steal_strategy(mut self, strategy: StealStrategyKind) -> Self {
        self.steal_strategy = Some(strategy);
        self
    }

    pub fn with_envelope(mut self, envelope: EnvelopeConfig) -> Self {
        self.envelope = Some(envelope);
        self
    }

    /// Checks that the engine can run with this configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("sample_rate", self.sample_rate() as usize),
            ("block_size", self.block_size()),
            ("channels", self.channels() as usize),
            ("mailbox_capacity", self.mailbox_capacity()),
            ("telemetry_capacity", self.telemetry_capacity()),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }

        let max_release = self.max_release_seconds();
        if !max_release.is_finite() || max_release <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "max_release_seconds must be positive, got {max_release}"
            )));
        }

        let envelope = self.envelope();
        if !(0.0..=1.0).contains(&envelope.sustain) {
            return Err(ConfigError::Invalid(format!(
                "envelope sustain must be within [0, 1], got {}",
                envelope.sustain
            )));
        }
        let times = [envelope.attack, envelope.decay, envelope.release];
        if times.iter().any(|time| !time.is_finite() || *time < 0.0) {
            return Err(ConfigError::Invalid(
                "envelope times must be non-negative".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use config::{Config, File, FileFormat};

    use super::*;

    fn parse(yaml: &str) -> EngineConfig {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse("{}");
        assert_eq!(config.sample_rate(), 48000);
        assert_eq!(config.block_size(), 128);
        assert_eq!(config.channels(), 2);
        assert_eq!(config.voices(), 16);
        assert_eq!(config.mailbox_capacity(), 32);
        assert_eq!(config.telemetry_capacity(), 64);
        assert_eq!(config.max_release_seconds(), 5.0);
        assert_eq!(config.root_note(), 60);
        assert_eq!(config.steal_strategy(), StealStrategyKind::Oldest);
        assert_eq!(config.envelope(), EnvelopeConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full() {
        let config = parse(
            r#"
            sample_rate: 44100
            block_size: 256
            voices: 4
            root_note: 48
            steal_strategy: quietest
            envelope:
              attack: 0.1
              sustain: 0.5
            "#,
        );
        assert_eq!(config.sample_rate(), 44100);
        assert_eq!(config.block_size(), 256);
        assert_eq!(config.voices(), 4);
        assert_eq!(config.root_note(), 48);
        assert_eq!(config.steal_strategy(), StealStrategyKind::Quietest);

        let envelope = config.envelope();
        assert_eq!(envelope.attack, 0.1);
        assert_eq!(envelope.sustain, 0.5);
        // Unset envelope fields keep their defaults.
        assert_eq!(envelope.release, EnvelopeConfig::default().release);
    }

    #[test]
    fn test_unknown_strategy_fails() {
        let result: Result<EngineConfig, _> = Config::builder()
            .add_source(File::from_str("steal_strategy: loudest", FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize();
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(matches!(
            parse("block_size: 0").validate(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse("sample_rate: 0").validate(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse("envelope:\n  sustain: 1.5").validate(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse("max_release_seconds: -1.0").validate(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::default()
            .with_sample_rate(96000)
            .with_voices(2)
            .with_steal_strategy(StealStrategyKind::Quietest);
        assert_eq!(config.sample_rate(), 96000);
        assert_eq!(config.voices(), 2);
        assert_eq!(config.steal_strategy(), StealStrategyKind::Quietest);
    }
}
