//! Headless call client
//!
//! Connects to a relay, waits to be paired and holds the call until the
//! peer leaves or Ctrl+C is pressed. Capture is synthetic, so no camera or
//! microphone is needed.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin peercall -- --signaling-url ws://localhost:8080
//!
//! # Audio only, dial again after every call
//! cargo run --bin peercall -- --no-video --redial
//! ```

use anyhow::Context;
use clap::Parser;
use peercall::media::SyntheticDevices;
use peercall::negotiation::WebRtcBackend;
use peercall::signaling::WebSocketConnector;
use peercall::{CallConfig, CaptureConstraints, Session, SessionHandle, SessionNotice};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Peer-to-peer call client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket relay URL
    #[arg(
        long,
        default_value = "ws://localhost:8080",
        env = "PEERCALL_SIGNALING_URL"
    )]
    signaling_url: String,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = peercall::config::DEFAULT_STUN_SERVER,
        env = "PEERCALL_ICE_SERVERS"
    )]
    ice_servers: Vec<String>,

    /// Do not capture audio
    #[arg(long, default_value_t = false)]
    no_audio: bool,

    /// Do not capture video
    #[arg(long, default_value_t = false)]
    no_video: bool,

    /// Look for a new peer after each call ends
    #[arg(long, default_value_t = false, env = "PEERCALL_REDIAL")]
    redial: bool,
}

impl Args {
    fn to_config(&self) -> CallConfig {
        let mut capture = CaptureConstraints::default();
        if self.no_audio {
            capture.audio = false;
        }
        if self.no_video {
            capture.video = None;
        }

        CallConfig {
            signaling_url: self.signaling_url.clone(),
            ice_servers: self.ice_servers.clone(),
            capture,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("peercall-worker")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    init_tracing();

    let config = args.to_config();
    info!(
        version = peercall::version(),
        signaling_url = %config.signaling_url,
        ice_servers = ?config.ice_servers,
        "peercall starting"
    );

    let connector = Arc::new(WebSocketConnector::new(&config.signaling_url));
    let session = Session::new(
        config,
        Arc::new(SyntheticDevices::granting()),
        connector,
        Arc::new(WebRtcBackend::new()),
    )
    .context("Invalid configuration")?;

    let mut notices = session.subscribe();
    let (handle, mut task) = session.spawn();
    install_ctrlc(handle.clone())?;

    handle.request_permissions()?;

    loop {
        tokio::select! {
            finished = &mut task => {
                let session = finished.context("Session task panicked")?;
                info!(state = %session.state(), "Session stopped");
                return Ok(());
            }
            notice = notices.recv() => match notice {
                Ok(notice) => on_notice(&handle, &notice, args.redial),
                Err(RecvError::Lagged(n)) => warn!("Missed {} session notices", n),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

fn on_notice(handle: &SessionHandle, notice: &SessionNotice, redial: bool) {
    if let Some(status) = notice.status_line() {
        info!("{}", status);
    }

    match notice {
        SessionNotice::RemoteTrack(track) => {
            info!(kind = %track.kind, track_id = %track.track_id, "Receiving remote track");
        }
        SessionNotice::PermissionDenied(_) => {
            let _ = handle.shutdown();
        }
        SessionNotice::Ended(_) if redial => {
            let _ = handle.reset();
            let _ = handle.request_permissions();
        }
        _ => {}
    }
}

fn install_ctrlc(handle: SessionHandle) -> anyhow::Result<()> {
    let requested = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if requested.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(1);
        }
        eprintln!("Ctrl+C received, hanging up");
        if handle.shutdown().is_err() {
            std::process::exit(0);
        }
    })
    .context("Failed to set Ctrl+C handler")
}

fn init_tracing() {
    // RUST_LOG overrides the default level
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
