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
use std::collections::VecDeque;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use polyvoice::audio::{self, OutputDevice};
use polyvoice::config::{self, EngineConfig};
use polyvoice::samples::SampleLoader;
use polyvoice::{AudioContext, PlayerEvent, SamplePlayer};

/// How often the live control loop wakes up.
const CONTROL_INTERVAL: Duration = Duration::from_millis(5);

/// Extra time after the last release to let voices ring out.
const TAIL_SECONDS: f64 = 1.0;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A polyphonic sample player."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Plays a note sequence offline and writes the result to a wav file.
    Render {
        /// The sample to play.
        sample: PathBuf,
        /// The wav file to write.
        output: PathBuf,
        #[clap(flatten)]
        sequence: SequenceArgs,
    },
    /// Plays a note sequence through an audio device.
    Play {
        /// The sample to play.
        sample: PathBuf,
        /// The device name to play through. Uses the default device when unset.
        #[arg(short, long)]
        device: Option<String>,
        #[clap(flatten)]
        sequence: SequenceArgs,
    },
}

#[derive(clap::Args)]
struct SequenceArgs {
    /// The notes to play, in the form <NOTE>[:<VELOCITY>],... For example, 60,64:90,67.
    #[arg(short, long, default_value = "60,64,67")]
    notes: String,
    /// Seconds between note starts.
    #[arg(short, long, default_value_t = 0.5)]
    spacing: f64,
    /// Seconds each note is held before it is released.
    #[arg(long, default_value_t = 1.0)]
    hold: f64,
    /// Path to an engine config file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Print player events as JSON lines.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Action {
    Play { note: u8, velocity: f32 },
    Release { note: u8 },
}

#[derive(Debug, Clone, Copy)]
struct ScheduledAction {
    time: f64,
    action: Action,
}

/// Parses `<NOTE>[:<VELOCITY>],...`.
fn parse_notes(notes: &str) -> Result<Vec<(u8, f32)>, Box<dyn Error>> {
    notes
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            let mut parts = entry.trim().split(':');
            let note = parts.next().ok_or("missing note")?.parse::<u8>()?;
            let velocity = match parts.next() {
                Some(velocity) => velocity.parse::<f32>()?,
                None => 100.0,
            };
            if parts.next().is_some() {
                return Err(format!("malformed note '{}'", entry).into());
            }
            Ok((note, velocity))
        })
        .collect()
}

/// Builds the play and release times of a sequence, ordered by time.
fn schedule(notes: &[(u8, f32)], spacing: f64, hold: f64) -> VecDeque<ScheduledAction> {
    let mut actions: Vec<ScheduledAction> = notes
        .iter()
        .enumerate()
        .flat_map(|(index, (note, velocity))| {
            let start = index as f64 * spacing;
            [
                ScheduledAction {
                    time: start,
                    action: Action::Play {
                        note: *note,
                        velocity: *velocity,
                    },
                },
                ScheduledAction {
                    time: start + hold,
                    action: Action::Release { note: *note },
                },
            ]
        })
        .collect();
    actions.sort_by(|a, b| a.time.total_cmp(&b.time));
    actions.into()
}

/// Applies every action due before `horizon`. Notes start sample-accurately at their
/// scheduled time.
fn apply_due(
    player: &mut SamplePlayer,
    actions: &mut VecDeque<ScheduledAction>,
    origin: f64,
    horizon: f64,
) {
    while let Some(scheduled) = actions.front().copied() {
        let time = origin + scheduled.time;
        if time >= horizon {
            break;
        }
        actions.pop_front();
        match scheduled.action {
            Action::Play { note, velocity } => {
                player.play(note, velocity, Some(time));
            }
            Action::Release { note } => {
                player.release(note);
            }
        }
    }
}

fn report(events: &[PlayerEvent], json: bool) -> Result<(), Box<dyn Error>> {
    for event in events {
        if json {
            println!("{}", serde_json::to_string(event)?);
        } else {
            println!("{:?}", event);
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn Error>> {
    Ok(match path {
        Some(path) => config::load_engine_config(path)?,
        None => EngineConfig::default(),
    })
}

fn render(sample: &Path, output: &Path, sequence: &SequenceArgs) -> Result<(), Box<dyn Error>> {
    let config = load_config(sequence.config.as_deref())?;
    let context = AudioContext::new(config)?;
    let mut loader = SampleLoader::new(Some(context.sample_rate()));
    let buffer = loader.load(sample)?;

    let (mut player, mut bank) = context.create_sample_player();
    player.set_buffer(buffer);
    context.resume();

    let notes = parse_notes(&sequence.notes)?;
    let mut actions = schedule(&notes, sequence.spacing, sequence.hold);
    let end_time = actions.back().map_or(0.0, |last| last.time) + TAIL_SECONDS;

    let channels = bank.channels();
    let sample_rate = bank.sample_rate();
    let mut writer = WavWriter::create(
        output,
        WavSpec {
            channels: channels as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        },
    )?;

    let block_seconds = bank.block_size() as f64 / sample_rate as f64;
    let mut block = vec![0.0f32; bank.block_size() * channels];
    while player.current_time() < end_time {
        let horizon = player.current_time() + block_seconds;
        apply_due(&mut player, &mut actions, 0.0, horizon);
        bank.render_interleaved(&mut block);
        for sample in block.iter() {
            writer.write_sample(*sample)?;
        }
        report(&player.poll(), sequence.json)?;
    }
    writer.finalize()?;

    info!(
        output = %output.display(),
        seconds = player.current_time(),
        "Rendered sequence"
    );
    Ok(())
}

async fn play(
    sample: &Path,
    device: Option<&str>,
    sequence: &SequenceArgs,
) -> Result<(), Box<dyn Error>> {
    let device = OutputDevice::open(device)?;
    let config = load_config(sequence.config.as_deref())?
        .with_sample_rate(device.sample_rate())
        .with_channels(device.channels());
    let context = AudioContext::new(config)?;
    let mut loader = SampleLoader::new(Some(context.sample_rate()));
    let buffer = loader.load(sample)?;

    let (mut player, bank) = context.create_sample_player();
    player.set_buffer(buffer);
    let player = Arc::new(Mutex::new(player));

    let _stream = device.start(bank)?;
    context.resume();

    // Telemetry is drained on its own task, independent of the sequence.
    let json = sequence.json;
    let telemetry_player = player.clone();
    let telemetry = tokio::spawn(async move {
        let mut interval = tokio::time::interval(CONTROL_INTERVAL);
        loop {
            interval.tick().await;
            let events = telemetry_player.lock().poll();
            if let Err(e) = report(&events, json) {
                tracing::error!(err = e.as_ref(), "Unable to report events");
            }
        }
    });

    let notes = parse_notes(&sequence.notes)?;
    let mut actions = schedule(&notes, sequence.spacing, sequence.hold);
    let origin = context.current_time() + CONTROL_INTERVAL.as_secs_f64();
    let end_time = origin + actions.back().map_or(0.0, |last| last.time) + TAIL_SECONDS;

    let mut interval = tokio::time::interval(CONTROL_INTERVAL);
    while context.current_time() < end_time {
        interval.tick().await;
        let horizon = context.current_time() + 2.0 * CONTROL_INTERVAL.as_secs_f64();
        apply_due(&mut player.lock(), &mut actions, origin, horizon);
    }

    telemetry.abort();
    let mut player = player.lock();
    player.kill_all();
    report(&player.poll(), json)?;
    context.suspend();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Render {
            sample,
            output,
            sequence,
        } => render(&sample, &output, &sequence)?,
        Commands::Play {
            sample,
            device,
            sequence,
        } => play(&sample, device.as_deref(), &sequence).await?,
    }

    Ok(())
}
