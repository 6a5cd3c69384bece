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

use config::{Config, File};
use tracing::info;

mod engine;
mod error;

pub use engine::{EngineConfig, EnvelopeConfig, StealStrategyKind};
pub use error::ConfigError;

/// Loads and validates an engine configuration file. The format follows the extension.
pub fn load_engine_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = Config::builder()
        .add_source(File::from(path))
        .build()?
        .try_deserialize()?;
    config.validate()?;

    info!(
        path = %path.display(),
        sample_rate = config.sample_rate(),
        voices = config.voices(),
        "Loaded engine config"
    );
    Ok(config)
}
