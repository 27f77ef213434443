//! Events delivered to subscribers of a [`SessionClient`](crate::SessionClient).

use crate::protocol::{Audio, SessionClosed, SessionReady, SessionStarted, Transcript};
use serde_json::Value;

/// Key under which listeners register. One variant per [`SessionEvent`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Close,
    Error,
    Connected,
    StartAck,
    SessionStarted,
    SessionReady,
    SessionClosed,
    HandshakeTimedOut,
    InputTranscript,
    OutputTranscript,
    Text,
    Audio,
    TurnComplete,
    SetupComplete,
    Interrupted,
    ToolCall,
    ToolResult,
    StageUpdate,
    Heartbeat,
}

/// Where an [`ErrorEvent`] originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// The peer sent an `error` frame.
    Peer,
    /// The socket reported a failure while still usable.
    Transport,
    /// The transport did not open within the connect timeout.
    ConnectTimeout,
    /// No pong or heartbeat arrived within the heartbeat timeout.
    HeartbeatTimeout,
    /// Automatic reconnection gave up.
    ReconnectExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub source: ErrorSource,
    pub message: String,
    /// Fatal errors end the connection lifecycle; only `connect()` resumes it.
    pub fatal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    /// True when the close was requested through `disconnect()`.
    pub manual: bool,
}

/// Everything a subscriber can observe.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Open,
    Close(CloseEvent),
    Error(ErrorEvent),
    Connected { connection_id: String },
    StartAck { connection_id: String },
    SessionStarted(SessionStarted),
    SessionReady(SessionReady),
    SessionClosed(SessionClosed),
    /// The start request went unacknowledged after every allowed attempt.
    HandshakeTimedOut { attempts: u32 },
    InputTranscript(Transcript),
    OutputTranscript(Transcript),
    Text { content: String },
    Audio(Audio),
    TurnComplete,
    SetupComplete,
    Interrupted,
    ToolCall(Value),
    ToolResult(Value),
    StageUpdate(Value),
    Heartbeat { timestamp: Option<i64> },
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Open => EventKind::Open,
            SessionEvent::Close(_) => EventKind::Close,
            SessionEvent::Error(_) => EventKind::Error,
            SessionEvent::Connected { .. } => EventKind::Connected,
            SessionEvent::StartAck { .. } => EventKind::StartAck,
            SessionEvent::SessionStarted(_) => EventKind::SessionStarted,
            SessionEvent::SessionReady(_) => EventKind::SessionReady,
            SessionEvent::SessionClosed(_) => EventKind::SessionClosed,
            SessionEvent::HandshakeTimedOut { .. } => EventKind::HandshakeTimedOut,
            SessionEvent::InputTranscript(_) => EventKind::InputTranscript,
            SessionEvent::OutputTranscript(_) => EventKind::OutputTranscript,
            SessionEvent::Text { .. } => EventKind::Text,
            SessionEvent::Audio(_) => EventKind::Audio,
            SessionEvent::TurnComplete => EventKind::TurnComplete,
            SessionEvent::SetupComplete => EventKind::SetupComplete,
            SessionEvent::Interrupted => EventKind::Interrupted,
            SessionEvent::ToolCall(_) => EventKind::ToolCall,
            SessionEvent::ToolResult(_) => EventKind::ToolResult,
            SessionEvent::StageUpdate(_) => EventKind::StageUpdate,
            SessionEvent::Heartbeat { .. } => EventKind::Heartbeat,
        }
    }

    pub(crate) fn error(source: ErrorSource, message: impl Into<String>, fatal: bool) -> Self {
        SessionEvent::Error(ErrorEvent {
            source,
            message: message.into(),
            fatal,
        })
    }
}
