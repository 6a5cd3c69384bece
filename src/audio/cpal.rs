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
use std::{error::Error, fmt};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, span, Level};

use crate::engine::VoiceBank;

/// An output device as reported by cpal.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub max_channels: u16,
    pub host: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name, self.max_channels, self.host
        )
    }
}

/// Lists every output device on every available host.
pub fn list_devices() -> Result<Vec<DeviceInfo>, Box<dyn Error>> {
    let mut devices = Vec::new();
    for host_id in cpal::available_hosts() {
        let host_devices = match cpal::host_from_id(host_id)?.devices() {
            Ok(host_devices) => host_devices,
            Err(e) => {
                error!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
        };

        for device in host_devices {
            let Ok(output_configs) = device.supported_output_configs() else {
                continue;
            };
            let max_channels = output_configs
                .map(|config| config.channels())
                .max()
                .unwrap_or(0);
            if max_channels == 0 {
                continue;
            }

            devices.push(DeviceInfo {
                name: device.name()?,
                max_channels,
                host: host_id.name().to_string(),
            });
        }
    }

    devices.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(devices)
}

/// An opened output device, ready to run a voice bank.
pub struct OutputDevice {
    name: String,
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
}

impl OutputDevice {
    /// Opens the named output device, or the default one when no name is given.
    pub fn open(name: Option<&str>) -> Result<Self, Box<dyn Error>> {
        let host = cpal::default_host();
        let device = match name {
            Some(name) => host
                .output_devices()?
                .find(|device| device.name().is_ok_and(|n| n.trim() == name))
                .ok_or_else(|| format!("no device found with name {}", name))?,
            None => host
                .default_output_device()
                .ok_or("no default output device")?,
        };

        let config = device.default_output_config()?;
        let name = device.name()?;
        info!(
            device = name,
            sample_rate = config.sample_rate().0,
            channels = config.channels(),
            format = %config.sample_format(),
            "Opened output device"
        );
        Ok(Self {
            name,
            device,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The device's preferred sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    /// The device's preferred channel count.
    pub fn channels(&self) -> u16 {
        self.config.channels()
    }

    /// Starts a stream that renders `bank` inside the device callback. The stream runs
    /// until the returned handle is dropped.
    pub fn start(&self, bank: VoiceBank) -> Result<OutputStream, Box<dyn Error>> {
        let span = span!(Level::INFO, "output stream (cpal)");
        let _enter = span.enter();

        let config = cpal::StreamConfig {
            channels: bank.channels() as u16,
            sample_rate: cpal::SampleRate(bank.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match self.config.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&self.device, &config, bank)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&self.device, &config, bank)?,
            cpal::SampleFormat::I32 => build_stream::<i32>(&self.device, &config, bank)?,
            format => return Err(format!("unsupported sample format {}", format).into()),
        };
        stream.play()?;

        info!(
            device = self.name,
            channels = config.channels,
            sample_rate = config.sample_rate.0,
            "CPAL output stream started"
        );
        Ok(OutputStream { _stream: stream })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut bank: VoiceBank,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            bank.render_interleaved_with(data, <T as cpal::FromSample<f32>>::from_sample_);
        },
        |err| error!("CPAL output stream error: {}", err),
        None,
    )
}

/// Keeps a cpal output stream alive.
pub struct OutputStream {
    _stream: cpal::Stream,
}
