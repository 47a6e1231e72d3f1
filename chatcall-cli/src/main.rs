//! Chatcall CLI Application

use anyhow::{Context, Result};
use bytes::Bytes;
use chatcall_core::prelude::*;
use chatcall_core::{
    AccessPolicy, CallEnded, LocalMediaStream, NegotiationPeer, SessionDescription, TICK_PERIOD,
};
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use terminal_ui::{format_duration, CliDisplayMode, TerminalUI};
use tracing_subscriber::EnvFilter;
use webrtc::media::Sample;

mod terminal_ui;
#[cfg(test)]
mod terminal_ui_tests;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Local user id shown to the far end
    #[arg(short, long, env = "CHATCALL_IDENTITY")]
    identity: Option<String>,

    /// JSON configuration file
    #[arg(long, env = "CHATCALL_CONFIG")]
    config: Option<PathBuf>,

    /// ICE server URL; replaces the configured list when given
    #[arg(long = "ice-server", env = "CHATCALL_ICE_SERVERS", value_delimiter = ',')]
    ice_servers: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Place a call to an in-process far end
    Call {
        /// User id to call
        party: String,

        /// Video call instead of voice only
        #[arg(long)]
        video: bool,

        /// Video display mode
        #[arg(long, value_enum, default_value = "ascii")]
        display: CliDisplayMode,

        /// Seconds the "calling" banner stays up
        #[arg(long, default_value_t = 2)]
        ring_secs: u64,

        /// Simulated local device behaviour
        #[arg(long, value_enum, default_value = "granted")]
        simulate: Simulate,

        /// Print call progress instead of opening the call window
        #[arg(long)]
        headless: bool,

        /// How long a headless call stays up
        #[arg(long, default_value_t = 3)]
        hold_secs: u64,
    },

    /// Show the effective configuration
    Status,
}

/// Local device behaviour for demo calls
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Simulate {
    /// Devices present, access allowed
    Granted,
    /// User declines the permission prompt
    Denied,
    /// No capture devices
    Missing,
    /// Devices held by another application
    Busy,
}

impl Simulate {
    fn devices(self) -> SyntheticDevices {
        match self {
            Self::Granted => SyntheticDevices::new(),
            Self::Denied => SyntheticDevices::new().with_policy(AccessPolicy::Denied),
            Self::Missing => SyntheticDevices::new().without_microphone().without_camera(),
            Self::Busy => SyntheticDevices::new().with_policy(AccessPolicy::Busy),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The call window owns stdout, keep logs quiet there unless asked for
    let default_filter = match &cli.command {
        Commands::Call { headless: false, .. } => "chatcall=warn",
        _ => "chatcall=info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref(), &cli.ice_servers)?;
    let identity = cli.identity.unwrap_or_else(generate_random_identity);

    match cli.command {
        Commands::Call {
            party,
            video,
            display,
            ring_secs,
            simulate,
            headless,
            hold_secs,
        } => {
            let options = CallOptions {
                video,
                display,
                ring_timeout: Duration::from_secs(ring_secs),
                simulate,
                hold: headless.then(|| Duration::from_secs(hold_secs)),
            };
            handle_call(config, &identity, &party, options).await?;
        }
        Commands::Status => {
            handle_status(&config, cli.config.as_deref())?;
        }
    }

    Ok(())
}

const GATHER_TIMEOUT: Duration = Duration::from_secs(5);
const FRAME_PERIOD: Duration = Duration::from_millis(20);

struct CallOptions {
    video: bool,
    display: CliDisplayMode,
    ring_timeout: Duration,
    simulate: Simulate,
    /// `Some` for headless calls
    hold: Option<Duration>,
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "chatcall", "chatcall")
        .map(|dirs| dirs.config_dir().join("config.json"))
}

fn load_config(path: Option<&std::path::Path>, ice_servers: &[String]) -> Result<CallConfig> {
    if !ice_servers.is_empty() {
        return CallConfig::new(ice_servers).context("invalid --ice-server");
    }

    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path().filter(|p| p.exists()),
    };
    match path {
        Some(path) => CallConfig::from_file(&path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => Ok(CallConfig::default()),
    }
}

fn session_with(
    config: &CallConfig,
    devices: SyntheticDevices,
    side: &'static str,
) -> Result<Arc<CallSession>> {
    let session = CallSession::builder(Arc::new(devices))
        .config(config.clone())
        .on_call_ended(move |ended: &CallEnded<PartyId>| {
            tracing::info!(
                side,
                call_id = %ended.call_id,
                duration = %format_duration(ended.duration_secs),
                "Call ended"
            );
        })
        .build()?;
    Ok(Arc::new(session))
}

async fn handle_call(
    config: CallConfig,
    identity: &str,
    party: &str,
    options: CallOptions,
) -> Result<()> {
    println!("🔗 Using identity: {}", identity);
    println!("📞 Calling {}...", party);

    let caller = session_with(&config, options.simulate.devices(), "caller")?;
    // The far end lives in this process; offer and answer are handed over directly
    let callee = session_with(&config, SyntheticDevices::new(), "callee")?;

    let mut events = caller.subscribe();
    let event_log = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!(?event, "Call event");
        }
    });

    let outgoing = match caller.start(PartyId::new(party), options.video).await {
        Ok(call) => call,
        Err(e) => {
            println!("❌ Call failed: {}", e);
            return Err(e.into());
        }
    };
    println!("📤 Offer ready ({} media sections)", outgoing.offer.media_sections().len());

    // Candidates are not trickled in-process, so hand over gathered descriptions
    let offer = gathered(&outgoing.peer)
        .await
        .unwrap_or_else(|| outgoing.offer.clone());
    let answered = callee
        .answer(PartyId::new(identity), options.video, Some(offer))
        .await
        .context("far end could not answer")?;
    let answer = match gathered(&answered.peer).await {
        Some(answer) => Some(answer),
        None => answered.answer.clone(),
    };
    if let Some(answer) = &answer {
        caller.accept_answer(answer).await?;
    }
    println!("✅ Call {} connected", outgoing.call_id);

    let far_end_media = spawn_far_end_media(answered.local_stream.clone());
    let ticker = spawn_duration_ticker(&caller, TICK_PERIOD);

    match options.hold {
        Some(hold) => run_headless(&caller, hold).await,
        None => {
            let mut ui = TerminalUI::new(options.display.into(), options.ring_timeout)?;
            ui.run(Arc::clone(&caller)).await?;
        }
    }

    far_end_media.abort();
    caller.end().await;
    callee.end().await;
    ticker.abort();
    event_log.abort();

    println!("📞 Call ended");
    Ok(())
}

async fn gathered(peer: &NegotiationPeer) -> Option<SessionDescription> {
    tokio::time::timeout(GATHER_TIMEOUT, peer.gathered_local_description())
        .await
        .ok()
        .flatten()
}

/// Feed silence and blank frames from the far end so its stream reaches the caller
fn spawn_far_end_media(stream: LocalMediaStream) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let sample = Sample {
            data: Bytes::from_static(&[0u8; 160]),
            duration: FRAME_PERIOD,
            ..Default::default()
        };
        let mut frames = tokio::time::interval(FRAME_PERIOD);
        loop {
            frames.tick().await;
            for track in stream.tracks() {
                if let Err(e) = track.write_sample(&sample).await {
                    tracing::debug!(track = track.id(), "Far end sample dropped: {}", e);
                }
            }
        }
    })
}

async fn run_headless(session: &CallSession, hold: Duration) {
    let status = session.status();
    println!(
        "   Video: {} | Muted: {} | Party: {}",
        status.video_enabled,
        status.muted,
        status.remote_party.map(|p| p.to_string()).unwrap_or_default()
    );

    tokio::select! {
        _ = tokio::time::sleep(hold) => {}
        stream = session.wait_for_remote_stream() => {
            if let Some(stream) = stream {
                println!("🎥 Remote stream {} arrived", stream.id());
            }
            tokio::time::sleep(hold).await;
        }
    }

    println!("⏱  Duration: {}", format_duration(session.duration_secs()));
}

fn handle_status(config: &CallConfig, path: Option<&std::path::Path>) -> Result<()> {
    println!("📊 Chatcall Status");
    println!("==================");
    match path.map(PathBuf::from).or_else(default_config_path) {
        Some(path) if path.exists() => println!("Config file: {}", path.display()),
        Some(path) => println!("Config file: {} (not found, using defaults)", path.display()),
        None => println!("Config file: none"),
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    println!();
    println!("Available commands:");
    println!("  chatcall call <party> [options]  - Place a call");
    println!("  chatcall status                  - Show this status");

    Ok(())
}

fn generate_random_identity() -> String {
    let mut rng = rand::thread_rng();
    format!("guest-{:04}", rng.gen_range(0..10_000))
}
