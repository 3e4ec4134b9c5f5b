//! `emubridge` relay
//!
//! Launches one remote emulator session against the dashboard backend,
//! streams its audio into a local sink and relays controller input until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use emubridge_core::config::load_config;
use emubridge_core::tracing_init::{default_filter, init_tracing};
use emubridge_relay::audio::{FileSink, NullSink, PlaybackSink};
use emubridge_relay::backend::HttpBackend;
use emubridge_relay::channel::WebSocketConnector;
use emubridge_relay::cleanup::Beacon;
use emubridge_relay::input::{ControllerDevice, NoDevice, ProducerConfig, ReplayDevice};
use emubridge_relay::Epoch;
use emubridge_relay::session::{LaunchControl, LaunchOutcome, SessionContext, SessionParts};
use emubridge_relay::surface::HeadlessSurfaceHost;

/// How long pending cleanup beacons may take to flush on exit.
const BEACON_FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

const SESSION_POLL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "emubridge")]
#[command(version, about = "emubridge - remote emulator session relay")]
struct Args {
    /// ROM to launch
    rom: String,

    /// Dashboard base URL (e.g. "http://127.0.0.1:8080")
    #[arg(long, env = "EMUBRIDGE_BACKEND_URL")]
    backend_url: Option<String>,

    /// Explicit config file (JSON)
    #[arg(long, env = "EMUBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Write the received audio stream to this file
    #[arg(long, env = "EMUBRIDGE_AUDIO_OUT")]
    audio_out: Option<PathBuf>,

    /// Replay controller snapshots from a newline-delimited JSON file
    #[arg(long, env = "EMUBRIDGE_INPUT_REPLAY")]
    input_replay: Option<PathBuf>,

    /// Audio connect timeout in milliseconds
    #[arg(long)]
    audio_timeout_ms: Option<u64>,

    /// Stop the session after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long, env = "EMUBRIDGE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation)
    #[arg(long, env = "EMUBRIDGE_LOG_JSON")]
    log_json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(url) = args.backend_url {
        config.backend.base_url = url;
    }
    if let Some(ms) = args.audio_timeout_ms {
        config.audio.connect_timeout_ms = ms;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    init_tracing(
        &default_filter("emubridge_relay", &config.log_level),
        args.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.backend.base_url,
        rom = %args.rom,
        "Starting emubridge"
    );

    let backend = Arc::new(HttpBackend::new(&config.backend)?);
    let (beacon, beacon_worker) = Beacon::spawn(Arc::clone(&backend) as _);

    let replay = match &args.input_replay {
        Some(path) => {
            let device = ReplayDevice::load(path)?;
            info!(path = %path.display(), snapshots = device.len(), "Loaded controller replay");
            Some(device)
        }
        None => None,
    };
    let host = HeadlessSurfaceHost::new(ProducerConfig::from(&config.input), move || {
        replay.clone().map_or_else(
            || Box::new(NoDevice) as Box<dyn ControllerDevice>,
            |device| Box::new(device) as Box<dyn ControllerDevice>,
        )
    });

    let sink: Box<dyn PlaybackSink> = match &args.audio_out {
        Some(path) => Box::new(FileSink::new(path)),
        None => Box::new(NullSink::default()),
    };

    let context = SessionContext::new(
        SessionParts {
            backend: Arc::clone(&backend) as _,
            cleanup_sender: backend,
            beacon: Some(beacon),
            host: Arc::new(host),
            connector: Arc::new(WebSocketConnector),
            sink,
        },
        &config,
    );

    let control = LaunchControl::new();
    let launched = match context.launch(&args.rom, Some(&control)).await {
        Ok(LaunchOutcome::Mounted(session)) => {
            info!(
                epoch = %session.epoch,
                port = session.endpoints.port,
                audio = ?session.audio,
                "Session running"
            );
            Ok(Some(session.epoch))
        }
        Ok(outcome) => {
            warn!(?outcome, "Launch did not mount");
            Ok(None)
        }
        Err(e) => {
            error!(error = %e, "Launch failed");
            Err(e)
        }
    };
    if let Ok(Some(epoch)) = launched {
        run_session(&context, epoch, args.duration_secs).await?;
    }

    // Dropping the context drops the last beacon sender, so the worker
    // exits once its queue is delivered.
    drop(context);
    if tokio::time::timeout(BEACON_FLUSH_TIMEOUT, beacon_worker)
        .await
        .is_err()
    {
        warn!("Cleanup beacon did not flush in time");
    }

    info!("emubridge stopped");
    launched.map(drop).map_err(Into::into)
}

/// Wait for a shutdown signal, the optional duration or the session ending
/// on its own.
async fn run_session(
    context: &SessionContext,
    epoch: Epoch,
    duration_secs: Option<u64>,
) -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    let deadline = async {
        match duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    let guard = context.guard();
    let session_ended = async {
        let mut ticks = tokio::time::interval(SESSION_POLL);
        while guard.is_current(epoch) {
            ticks.tick().await;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, closing session");
            context.host_unload().await;
        }
        _ = sigterm_future => {
            info!("Received SIGTERM, closing session");
            context.host_unload().await;
        }
        () = deadline => {
            info!("Session duration elapsed");
            context.close().await;
        }
        () = session_ended => {
            warn!(%epoch, "Session ended");
        }
    }

    Ok(())
}
