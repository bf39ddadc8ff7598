//! peerdesk host entry point.
//!
//! ```text
//! peerdesk demo                      Loopback session with defaults
//! peerdesk demo --file <path>        Send a specific file across
//! peerdesk --config <path> demo      Use custom config TOML
//! peerdesk --gen-config              Dump default config and exit
//! ```

use std::error::Error;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use peerdesk_core::input::{PointerSample, RecordingInjector};
use peerdesk_core::media::{CaptureEvent, CaptureTarget, Frame, FrameCodec, ScriptedCapture};
use peerdesk_core::transfer::{DirectorySink, OutgoingFile};
use peerdesk_core::{MemoryNetwork, Session, SessionEvent, SessionEvents, SessionState};

use peerdesk::config::{AppConfig, LoggingConfig};

const DEMO_WIDTH: u32 = 64;
const DEMO_HEIGHT: u32 = 36;
const DEMO_TIMEOUT: Duration = Duration::from_secs(10);

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "peerdesk", about = "Peer-to-peer remote desktop session host")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "peerdesk.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to `--config` and exit.
    #[arg(long)]
    init_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a host and a viewer in this process and connect them.
    Demo {
        /// File the viewer sends to the host. A short text file otherwise.
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Where the host saves received files (overrides config).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        println!("{}", AppConfig::default().to_toml()?);
        return Ok(());
    }
    if cli.init_config {
        AppConfig::write_default(&cli.config)?;
        println!("wrote {}", cli.config.display());
        return Ok(());
    }

    let mut config = AppConfig::load(&cli.config);
    init_logging(&config.logging)?;
    info!("peerdesk v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(Command::Demo { file, out }) => {
            if let Some(out) = out {
                config.downloads.dir = out;
            }
            run_demo(config, file).await
        }
        None => {
            println!("nothing to do; try `peerdesk demo` or `peerdesk --help`");
            Ok(())
        }
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<(), Box<dyn Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    }
    Ok(())
}

// ── Demo ─────────────────────────────────────────────────────────

async fn run_demo(config: AppConfig, file: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let net = MemoryNetwork::new();
    let codec = config.session.media.codec;
    let display = CaptureTarget {
        id: "demo-display".into(),
        name: "Demo display".into(),
        width: DEMO_WIDTH,
        height: DEMO_HEIGHT,
        is_primary: true,
    };
    let capture = Arc::new(ScriptedCapture::new(vec![display]));
    let injector = Arc::new(RecordingInjector::new());

    // ── 1. Start both sides ─────────────────────────────────────

    let (host, mut host_events) = Session::builder(Arc::new(net.transport_with_id("demo-host")))
        .with_capture(capture.clone())
        .with_injector(injector.clone())
        .with_sink(Arc::new(DirectorySink::new(&config.downloads.dir)))
        .with_config(config.session.clone())
        .spawn();
    let (viewer, mut viewer_events) =
        Session::builder(Arc::new(net.transport_with_id("demo-viewer")))
            .with_sink(Arc::new(DirectorySink::new(&config.downloads.dir)))
            .with_config(config.session)
            .spawn();

    let host_id = host.local_id().await?;
    let viewer_id = viewer.local_id().await?;
    info!(host = %host_id, viewer = %viewer_id, capabilities = ?host.capabilities(), "peers registered");

    // ── 2. Connect and accept ───────────────────────────────────

    viewer.connect(host_id).await?;
    let call = within(next_matching(&mut host_events, |e| {
        matches!(e, SessionEvent::IncomingCall { .. })
    }))
    .await??;
    info!(?call, "host accepting call");
    host.accept_call(None).await?;

    within(viewer.wait_for_state(SessionState::is_active)).await??;
    within(host.wait_for_state(SessionState::is_active)).await??;

    // ── 3. Share a frame ────────────────────────────────────────

    let pixels = gradient(DEMO_WIDTH, DEMO_HEIGHT);
    let payload = match codec {
        FrameCodec::Zstd => Bytes::from(zstd::encode_all(pixels.as_slice(), 3)?),
        FrameCodec::Raw => Bytes::from(pixels),
    };
    if !capture
        .push(CaptureEvent::Frame(Frame::new(DEMO_WIDTH, DEMO_HEIGHT, payload)))
        .await
    {
        warn!("capture stream is not running");
    }

    let mut frames = viewer.remote_frames();
    let frame = within(frames.wait_for(|f| f.as_ref().is_some_and(|f| f.generation > 0)))
        .await??
        .clone();
    if let Some(frame) = frame {
        info!(
            width = frame.width,
            height = frame.height,
            generation = frame.generation,
            "viewer received shared screen"
        );
    }

    // ── 4. Remote control ───────────────────────────────────────

    viewer.set_remote_control(true).await?;
    let centre = PointerSample {
        x: 320.0,
        y: 180.0,
        display_width: 640.0,
        display_height: 360.0,
        video_width: DEMO_WIDTH,
        video_height: DEMO_HEIGHT,
    };
    viewer.pointer_move(centre).await?;
    viewer.pointer_click(0, Some(centre)).await?;
    viewer.key_press("Enter").await?;

    // ── 5. File transfer ────────────────────────────────────────

    let id = match file {
        Some(path) => viewer.send_file(path).await?,
        None => {
            let text = b"hello from the peerdesk viewer\n".to_vec();
            viewer.send(OutgoingFile::from_bytes("peerdesk-demo.txt", text)).await?
        }
    };
    info!(transfer = %id, "viewer sending file");

    let outcome = within(next_matching(&mut host_events, |e| {
        matches!(
            e,
            SessionEvent::FileSaved { .. }
                | SessionEvent::SaveFailed { .. }
                | SessionEvent::TransferFailed { .. }
        )
    }))
    .await??;
    match &outcome {
        SessionEvent::FileSaved { name, location, .. } => println!("saved {name} to {location}"),
        other => println!("transfer did not complete: {other:?}"),
    }

    // ── 6. Shutdown ─────────────────────────────────────────────

    viewer.disconnect().await?;
    let closed = within(host.wait_for_state(SessionState::is_closed)).await??;
    println!("host: {closed}, injected {} input events", injector.events().len());

    while let Ok(event) = viewer_events.try_recv() {
        debug!(?event, "viewer event");
    }
    host.disconnect().await?;
    Ok(())
}

async fn within<F: Future>(fut: F) -> Result<F::Output, tokio::time::error::Elapsed> {
    tokio::time::timeout(DEMO_TIMEOUT, fut).await
}

async fn next_matching(
    events: &mut SessionEvents,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> Result<SessionEvent, Box<dyn Error>> {
    while let Some(event) = events.recv().await {
        if pred(&event) {
            return Ok(event);
        }
        debug!(?event, "session event");
    }
    Err("session ended".into())
}

/// BGRA test pattern.
fn gradient(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let b = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            pixels.extend_from_slice(&[b, g, 0x80, 0xff]);
        }
    }
    pixels
}
