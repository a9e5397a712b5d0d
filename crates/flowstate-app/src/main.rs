//! # Flow State
//!
//! Terminal music player built on the Flow State playback engine.

mod console;
mod settings;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use flowstate_audio::output::{default_device_name, list_output_devices};
use flowstate_audio::{
    CpalDevice, EffectsChain, EngineEvent, Host, NullDevice, OutputDevice, PlaybackController,
    PlaybackState,
};
use flowstate_core::{RepeatMode, StreamProperties};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use console::{execute, ConsoleCommand, Flow};
use settings::AppPaths;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(author, version, about = "Flow State music player", long_about = None)]
struct Cli {
    /// Log filter, e.g. `debug` or `flowstate_audio=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Config file to read instead of the platform default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play files and open the command console. Without files the last session resumes.
    Play {
        files: Vec<PathBuf>,
        #[arg(long)]
        shuffle: bool,
        #[arg(long)]
        repeat: Option<RepeatMode>,
        /// Starting volume (0.0 to 1.0).
        #[arg(long)]
        volume: Option<f32>,
        /// Render into a timer-driven sink instead of an audio device.
        #[arg(long)]
        null_output: bool,
        /// Output device name.
        #[arg(long)]
        device: Option<String>,
    },
    /// List output devices.
    Devices,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Commands::Play {
            files,
            shuffle,
            repeat,
            volume,
            null_output,
            device,
        } => {
            let paths = AppPaths::resolve(cli.config)?;
            let output: Box<dyn OutputDevice> = if null_output {
                Box::new(NullDevice::new())
            } else {
                Box::new(CpalDevice::new(device))
            };
            run_player(&paths, files, shuffle, repeat, volume, output)
        }
        Commands::Devices => print_devices(),
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = level.map_or_else(
        || {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowstate=info,flowstate_audio=info".into())
        },
        EnvFilter::new,
    );
    // Stdout belongs to the console
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn run_player(
    paths: &AppPaths,
    files: Vec<PathBuf>,
    shuffle: bool,
    repeat: Option<RepeatMode>,
    volume: Option<f32>,
    output: Box<dyn OutputDevice>,
) -> Result<()> {
    info!("Starting Flow State v{}", env!("CARGO_PKG_VERSION"));

    let mut config = settings::load_config(&paths.config_file);
    if let Some(volume) = volume {
        config.initial_volume = volume.clamp(0.0, 1.0);
    }
    let chain = EffectsChain::with_default_effects(StreamProperties::default());
    let controller = PlaybackController::new(config, output, chain)?;
    let events = controller.events();
    let mut host = Host::new(controller);

    if files.is_empty() {
        match settings::load_session(&paths.session_file) {
            Some(session) => host.controller_mut().restore_session(&session)?,
            None => println!("Nothing to play. Pass files or type 'help'."),
        }
    } else {
        let c = host.controller_mut();
        c.add_paths(files);
        c.set_shuffle(shuffle);
        if let Some(mode) = repeat {
            c.set_repeat_mode(mode);
        }
        if let Err(e) = c.play_index(0) {
            println!("error: {e}");
        }
    }

    println!("Type 'help' for commands.");
    let lines = console::spawn_stdin_reader()?;
    console_loop(&mut host, &lines, &events);

    let session = host.controller().session_state();
    if let Err(e) = settings::save_session(&paths.session_file, &session) {
        warn!("Could not save session: {e:#}");
    }
    host.controller_mut().shutdown();
    Ok(())
}

fn console_loop(host: &mut Host, lines: &Receiver<String>, events: &Receiver<EngineEvent>) {
    let mut input_open = true;
    loop {
        if input_open {
            match lines.recv_timeout(POLL_INTERVAL) {
                Ok(line) => match ConsoleCommand::parse(&line) {
                    Ok(Some(command)) => {
                        if execute(host, command) == Flow::Quit {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => println!("{message}"),
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // Piped input: keep playing to the end of the playlist
                    input_open = false;
                }
            }
        } else {
            std::thread::sleep(POLL_INTERVAL);
        }

        host.controller_mut().poll();
        for event in events.try_iter() {
            report(host, &event);
        }

        if !input_open && host.controller().state() == PlaybackState::Stopped {
            return;
        }
    }
}

fn report(host: &Host, event: &EngineEvent) {
    match event {
        EngineEvent::TrackLoaded {
            index,
            properties,
            duration_secs,
        } => {
            let title = host
                .controller()
                .playlist()
                .get(*index)
                .map_or("?", |e| e.track.title.as_str());
            let duration = duration_secs.map_or_else(|| "--:--".to_string(), console::format_time);
            println!("> {title} [{duration}] ({properties})");
        }
        EngineEvent::PlaybackFinished => println!("End of playlist."),
        EngineEvent::Error(message) => println!("error: {message}"),
        _ => {}
    }
}

fn print_devices() -> Result<()> {
    let default = default_device_name();
    let devices = list_output_devices()?;
    if devices.is_empty() {
        println!("No output devices found.");
    }
    for name in devices {
        let marker = if default.as_deref() == Some(name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("{name}{marker}");
    }
    Ok(())
}
