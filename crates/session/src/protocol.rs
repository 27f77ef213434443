//! Defines the JSON message protocol between the session client and the agent backend.
//!
//! Every frame is an envelope `{ "type": <tag>, "payload": <object> }`. Outbound
//! frames are modelled by [`ClientMessage`]; inbound frames are decoded by the
//! router into [`ServerMessage`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Parameters of a session-start request.
///
/// Kept by the client as the pending start until the peer acknowledges it, and
/// remembered afterwards so the session can be resumed after a reconnect.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartParams {
    pub language_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Free-form user context forwarded verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_context: Option<Value>,
}

impl StartParams {
    pub fn new(language_code: impl Into<String>) -> Self {
        Self {
            language_code: language_code.into(),
            ..Default::default()
        }
    }

    pub fn with_voice(mut self, voice_name: impl Into<String>) -> Self {
        self.voice_name = Some(voice_name.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_user_context(mut self, context: Value) -> Self {
        self.user_context = Some(context);
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// One chunk of realtime media input, already encoded for the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    /// Base64 encoded bytes.
    pub data: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

/// Out-of-band context for the agent, e.g. a description of what the camera sees.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextUpdate {
    pub modality: String,
    pub analysis: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<MediaChunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub timestamp: i64,
}

/// Messages sent from the client to the agent backend.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Requests a new session. Sent once per handshake attempt.
    Start(StartParams),
    /// Ends the session without closing the transport.
    Stop,
    Ping(Timestamp),
    HeartbeatAck(Timestamp),
    RealtimeInput(RealtimeInput),
    ContextUpdate(ContextUpdate),
    ToolResult(Value),
}

impl ClientMessage {
    /// Heartbeat traffic is transport-level and may bypass the buffered-bytes ceiling.
    pub fn is_control(&self) -> bool {
        matches!(self, ClientMessage::Ping(_) | ClientMessage::HeartbeatAck(_))
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ClientMessage::Start(_) => "start",
            ClientMessage::Stop => "stop",
            ClientMessage::Ping(_) => "ping",
            ClientMessage::HeartbeatAck(_) => "heartbeat_ack",
            ClientMessage::RealtimeInput(_) => "realtime_input",
            ClientMessage::ContextUpdate(_) => "context_update",
            ClientMessage::ToolResult(_) => "tool_result",
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub connection_id: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartAck {
    pub connection_id: String,
}

/// Canonical session-confirmation payload.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStarted {
    pub connection_id: String,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub voice_name: Option<String>,
    #[serde(default)]
    pub mock: Option<bool>,
}

/// Lightweight readiness signal some backends send instead of `session_started`.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionReady {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<i64>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionClosed {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TextContent {
    pub content: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Audio {
    /// Base64 encoded audio as sent by the peer.
    pub audio_data: String,
    pub mime_type: String,
}

/// Payload of `heartbeat` and `pong` frames.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Beat {
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<i64>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerError {
    #[serde(default)]
    pub message: Option<String>,
}

/// Messages received from the agent backend, after shape validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Connected(Connected),
    StartAck(StartAck),
    SessionStarted(SessionStarted),
    SessionReady(SessionReady),
    SessionClosed(SessionClosed),
    InputTranscript(Transcript),
    OutputTranscript(Transcript),
    Text(TextContent),
    Audio(Audio),
    TurnComplete,
    SetupComplete,
    Interrupted,
    ToolCall(Value),
    ToolResult(Value),
    StageUpdate(Value),
    Heartbeat(Beat),
    Pong(Beat),
    Error(PeerError),
}

/// Accepts a millisecond timestamp as a JSON number or a numeric string.
///
/// Anything else yields `None`, so an odd timestamp never invalidates a heartbeat.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}
