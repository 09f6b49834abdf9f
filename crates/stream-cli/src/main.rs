//! stream-play: play one audio stream through the stream-player engine.
//!
//! Opens the URL, plays it on the default (or selected) output device and
//! optionally records a copy under `--save-dir`. Single key presses control
//! pause and volume while a status line tracks progress.

mod cli;
mod config;
mod keys;
mod ui;

use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use stream_player::output::{CaptureBackend, CpalBackend, OutputBackend};
use stream_player::recorder::TrackIdentity;
use stream_player::{PlayerHandle, PlayerReturn, TrackRequest, runtime};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use keys::KeyCommand;

const STATUS_INTERVAL: Duration = Duration::from_millis(500);
const VOLUME_STEP_DB: f32 = 1.0;
/// Engine messages already reach the terminal through [`ui::TerminalSink`].
const ENGINE_MESSAGES_OFF: &str = "stream_player::ui=off";

fn main() -> Result<ExitCode> {
    let args = cli::Args::parse();
    let file = config::FileConfig::load_optional(args.config.as_deref())?;
    let default_filter = file
        .log
        .clone()
        .unwrap_or_else(|| "info,stream_player=info".to_string());
    let filter = log_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
    )?;
    tracing_subscriber::fmt()
        .with_writer(ui::LogWriter::stderr)
        .with_env_filter(filter)
        .init();

    if args.list_devices {
        for name in stream_player::output::device::list_device_names()? {
            println!("{name}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let url = args.url.clone().context("missing stream url")?;
    let settings = config::apply_overrides(file.player, &args);
    let backend: Arc<dyn OutputBackend> = if args.null_output {
        Arc::new(CaptureBackend::discarding().realtime())
    } else {
        Arc::new(CpalBackend::new(&settings))
    };
    let track = TrackRequest {
        url,
        identity: TrackIdentity {
            station: args.station.clone(),
            artist: args.artist.clone(),
            title: args.title.clone(),
        },
        gain_db: args.gain_db,
    };

    let (tx, rx) = crossbeam_channel::unbounded::<KeyCommand>();
    let quit_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = quit_tx.send(KeyCommand::Quit);
    })
    .context("install ctrl-c handler")?;

    // Without a terminal there are no key controls; ctrl-c still quits.
    let stop_keys = Arc::new(AtomicBool::new(false));
    let (raw_mode, key_reader) = if std::io::stdin().is_terminal() {
        let raw_mode = keys::RawMode::enable()?;
        let reader = keys::spawn_key_reader(tx.clone(), stop_keys.clone())
            .context("spawn key reader")?;
        (Some(raw_mode), Some(reader))
    } else {
        (None, None)
    };

    runtime::initialize();
    let player = PlayerHandle::start(track, settings, backend, Arc::new(ui::TerminalSink))
        .context("start player")?;
    if key_reader.is_some() {
        ui::print_line(keys::HELP);
    }

    while !player.is_finished() {
        match rx.recv_timeout(STATUS_INTERVAL) {
            Ok(cmd) => handle_key(&player, cmd),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        ui::draw_status(&ui::format_status(&player.status(), player.volume()));
    }

    let last_status = ui::format_status(&player.status(), player.volume());
    let ret = player.join();
    runtime::shutdown();
    stop_keys.store(true, Ordering::Relaxed);
    if let Some(reader) = key_reader {
        let _ = reader.join();
    }
    ui::print_line(&last_status);
    drop(raw_mode);
    tracing::info!(result = ?ret, "playback finished");
    Ok(exit_code(ret))
}

fn handle_key(player: &PlayerHandle, cmd: KeyCommand) {
    match cmd {
        KeyCommand::TogglePause => {
            player.toggle_pause();
        }
        KeyCommand::VolumeUp => player.set_volume(player.volume() + VOLUME_STEP_DB),
        KeyCommand::VolumeDown => player.set_volume(player.volume() - VOLUME_STEP_DB),
        KeyCommand::VolumeReset => player.set_volume(0.0),
        KeyCommand::Quit => player.request_quit(),
    }
}

fn log_filter(base: EnvFilter) -> Result<EnvFilter> {
    Ok(base.add_directive(ENGINE_MESSAGES_OFF.parse::<Directive>().context("parse log directive")?))
}

fn exit_code(ret: PlayerReturn) -> ExitCode {
    match ret {
        PlayerReturn::Ok => ExitCode::SUCCESS,
        PlayerReturn::SoftFail => ExitCode::from(1),
        PlayerReturn::HardFail => ExitCode::from(2),
    }
}
