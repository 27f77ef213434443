//! Feynman Realtime Session Client
//!
//! Keeps one conversational session with a voice agent backend alive over a
//! long-lived WebSocket: connection lifecycle with bounded reconnects, the
//! start handshake, heartbeat liveness checks, outbound backpressure, and
//! typed dispatch of inbound frames to subscribers.
//!
//! ```no_run
//! use feynman_session::{EventKind, SessionClient, SessionConfig, SessionEvent, StartParams};
//!
//! # async fn run() {
//! let client = SessionClient::new(SessionConfig::new("wss://agent.example.com/live"));
//! let _sub = client.on(EventKind::OutputTranscript, |event| {
//!     if let SessionEvent::OutputTranscript(t) = event {
//!         println!("agent: {}", t.text);
//!     }
//! });
//! client.start(StartParams::new("en-US")).await;
//! client.connect().await;
//! # }
//! ```

mod client;
pub mod config;
mod connection;
pub mod events;
pub mod gate;
pub mod handshake;
pub mod heartbeat;
pub mod listeners;
mod media;
pub mod protocol;
pub mod router;
pub mod transport;

pub use client::SessionClient;
pub use config::{ConfigError, SessionConfig};
pub use connection::{ClientStatus, ConnectionState, SessionState};
pub use events::{CloseEvent, ErrorEvent, ErrorSource, EventKind, SessionEvent};
pub use gate::{HealthSnapshot, SendError};
pub use listeners::Subscription;
pub use protocol::{ContextUpdate, Location, MediaChunk, StartParams};
