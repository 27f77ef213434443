//! Session probe
//!
//! Operator tool for checking an agent backend by hand:
//! 1. Loads `SESSION_*` configuration from the environment (and `.env`).
//! 2. Applies command-line overrides.
//! 3. Connects, starts one session and logs every event it receives.
//! 4. Disconnects cleanly on `Ctrl+C`.

use anyhow::Context;
use clap::Parser;
use feynman_session::{
    ConfigError, EventKind, SessionClient, SessionConfig, SessionEvent, StartParams,
};
use std::time::Duration;
use tracing::{Level, info, warn};

const ALL_EVENTS: [EventKind; 20] = [
    EventKind::Open,
    EventKind::Close,
    EventKind::Error,
    EventKind::Connected,
    EventKind::StartAck,
    EventKind::SessionStarted,
    EventKind::SessionReady,
    EventKind::SessionClosed,
    EventKind::HandshakeTimedOut,
    EventKind::InputTranscript,
    EventKind::OutputTranscript,
    EventKind::Text,
    EventKind::Audio,
    EventKind::TurnComplete,
    EventKind::SetupComplete,
    EventKind::Interrupted,
    EventKind::ToolCall,
    EventKind::ToolResult,
    EventKind::StageUpdate,
    EventKind::Heartbeat,
];

#[derive(Parser, Debug)]
#[command(version, about = "Connect to a realtime agent backend and log its events")]
struct Args {
    /// Backend endpoint; overrides SESSION_URL.
    #[arg(long)]
    url: Option<String>,

    #[arg(long, default_value = "en-US")]
    language: String,

    #[arg(long)]
    voice: Option<String>,

    #[arg(long)]
    session_id: Option<String>,

    #[arg(long)]
    user_id: Option<String>,

    /// Only connect; never send a start request.
    #[arg(long)]
    no_start: bool,

    /// Overrides the level taken from RUST_LOG.
    #[arg(long)]
    log_level: Option<Level>,

    /// Overrides SESSION_CONNECT_TIMEOUT_MS.
    #[arg(long)]
    connect_timeout_ms: Option<u64>,
}

fn load_config(args: &Args) -> anyhow::Result<SessionConfig> {
    let config = match SessionConfig::from_env() {
        Ok(config) => config,
        Err(ConfigError::MissingVar(_)) if args.url.is_some() => SessionConfig::default(),
        Err(e) => return Err(e).context("Failed to load session configuration"),
    };
    let mut config = match &args.url {
        Some(url) => SessionConfig {
            url: url.clone(),
            ..config
        },
        None => config,
    };
    if let Some(ms) = args.connect_timeout_ms {
        config = config.with_connect_timeout(Duration::from_millis(ms));
    }
    Ok(config.normalized())
}

fn log_level(args: &Args) -> anyhow::Result<Level> {
    if let Some(level) = args.log_level {
        return Ok(level);
    }
    let raw = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
    raw.parse::<Level>()
        .with_context(|| format!("'{}' is not a valid log level", raw))
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Error(err) if err.fatal => {
            warn!(source = ?err.source, message = %err.message, "Fatal session error")
        }
        SessionEvent::Error(err) => {
            warn!(source = ?err.source, message = %err.message, "Session error")
        }
        SessionEvent::InputTranscript(t) => {
            info!(text = %t.text, is_final = t.is_final, "User said")
        }
        SessionEvent::OutputTranscript(t) => {
            info!(text = %t.text, is_final = t.is_final, "Agent said")
        }
        SessionEvent::Audio(audio) => {
            info!(
                samples = audio.pcm16_samples().len(),
                sample_rate = ?audio.sample_rate(),
                "Audio"
            )
        }
        other => info!(event = ?other.kind(), details = ?other, "Event"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(log_level(&args)?)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let config = load_config(&args)?;
    info!(url = %config.url, "Configuration loaded");

    let client = SessionClient::new(config);
    for kind in ALL_EVENTS {
        // Registered for the whole run; never unsubscribed.
        let _ = client.on(kind, log_event);
    }

    if !args.no_start {
        let mut params = StartParams::new(&args.language);
        if let Some(voice) = &args.voice {
            params = params.with_voice(voice);
        }
        if let Some(session_id) = &args.session_id {
            params = params.with_session_id(session_id);
        }
        if let Some(user_id) = &args.user_id {
            params = params.with_user_id(user_id);
        }
        client.start(params).await;
    }
    client.connect().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl+C handler")?;
    info!("Received shutdown signal. Disconnecting...");

    if let Some(health) = client.health().await {
        info!(
            samples = health.samples,
            average_buffered = health.average_buffered,
            heartbeat_successes = health.heartbeat_successes,
            heartbeat_failures = health.heartbeat_failures,
            "Final connection health"
        );
    }
    client.shutdown().await;
    Ok(())
}
