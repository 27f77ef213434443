//! Transport abstraction between the connection manager and the socket.
//!
//! A [`Connector`] opens transports; each transport reports its lifecycle on a
//! shared event channel, tagged with the [`TransportId`] it was opened with so
//! that late events from a discarded transport can be told apart.

mod websocket;

pub use websocket::WsConnector;

use tokio::sync::mpsc;

/// Identifies one transport instance for the lifetime of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(pub u64);

impl std::fmt::Display for TransportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Lifecycle callbacks of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Closed { code: u16, reason: String },
    Error(String),
}

pub type TransportEvents = mpsc::UnboundedSender<(TransportId, TransportEvent)>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not open")]
    NotOpen,
    #[error("transport is closed")]
    Closed,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("i/o error: {0}")]
    Io(String),
}

/// Outbound half of a live transport.
pub trait Transport: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    /// Bytes accepted by [`Transport::send_text`] but not yet written to the network.
    fn buffered_amount(&self) -> usize;

    fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Starts closing. No events are required after this call.
    fn close(&self, code: u16, reason: &str);
}

/// Opens transports. The returned transport starts out [`ReadyState::Connecting`].
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: &str, id: TransportId, events: TransportEvents) -> Box<dyn Transport>;
}

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Closed without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Closed by the client after a timeout or an unusable transport.
pub const CLOSE_FORCED: u16 = 4000;
