//! la32mon - replay a note script against the voice allocator
//!
//! Run with: cargo run --bin la32mon -- script.txt

mod config;
mod script;
mod sim;

use std::{fs, path::PathBuf};

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use la32_voices::{synth::Engine, NoteOn, ReportHandler};
use tracing::{info, level_filters::LevelFilter, warn};

use config::MonitorConfig;
use script::Command;
use sim::SimDriver;

#[derive(Parser)]
#[command(name = "la32mon")]
#[command(about = "Replay a note script and print partial usage per step")]
struct Cli {
    /// Event script, one command per line
    script: PathBuf,

    /// TOML file with the hardware profile and an optional sound bank
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hardware profile, overrides the config file (mt32-gen0, mt32, cm32l)
    #[arg(short, long)]
    profile: Option<String>,

    /// Ticks a decaying partial takes to finish, overrides the config file
    #[arg(long)]
    release_ticks: Option<u32>,

    /// More diagnostics (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Logs what a front panel would display.
struct PanelReporter;

impl ReportHandler for PanelReporter {
    fn on_channel_state_changed(&mut self, channel: u8, audible: bool) {
        info!(channel, audible, "part state");
    }

    fn on_program_changed(&mut self, channel: u8, instrument: &str) {
        info!(channel, instrument, "program");
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::default(),
    };
    if let Some(profile) = cli.profile {
        config.profile = profile;
    }
    if let Some(ticks) = cli.release_ticks {
        config.release_ticks = ticks;
    }
    let features = config.features()?;
    info!(profile = %config.profile, partials = features.partial_count, "starting");

    let source = fs::read_to_string(&cli.script)
        .wrap_err_with(|| format!("reading {}", cli.script.display()))?;
    let commands = script::parse(&source)?;

    let driver = SimDriver::new(config.release_ticks);
    let mut engine = Engine::with_reporter(features, config.bank.unwrap_or_default(), driver, PanelReporter);

    for (line, command) in commands {
        match command {
            Command::NoteOn {
                channel,
                key,
                velocity,
            } => match engine.note_on(channel, key, velocity) {
                Ok(NoteOn::Started(voice)) => info!(line, voice = voice.index(), "note started"),
                Ok(NoteOn::Deferred) => info!(line, "note deferred"),
                Err(err) => warn!(line, %err, "note dropped"),
            },
            Command::Message(msg) => engine.handle(msg),
            Command::Tick(count) => {
                for _ in 0..count {
                    let finished = engine.driver_mut().advance();
                    for unit in finished {
                        engine.unit_deactivated(unit);
                    }
                }
            }
        }
        print_usage(line, &engine);
    }
    Ok(())
}

fn print_usage<R: ReportHandler>(line: usize, engine: &Engine<SimDriver, R>) {
    let columns: Vec<String> = engine
        .unit_usage()
        .iter()
        .map(|n| format!("{n:>2}"))
        .collect();
    println!(
        "{line:>4} | free {:>2} | {} | deferred {}{}",
        engine.free_unit_count(),
        columns.join(" "),
        engine.deferred_count(),
        if engine.is_aborting() { " | aborting" } else { "" },
    );
}
