//! Turns raw inbound frames into typed [`ServerMessage`]s.
//!
//! Decoding is two-staged: the envelope first, then the payload for the given
//! tag. Any failure is logged and the frame is dropped; nothing here returns an
//! error to the caller.

use crate::protocol::ServerMessage;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
}

/// Decodes one text frame. Returns `None` for malformed or unknown frames.
pub fn parse_frame(raw: &str) -> Option<ServerMessage> {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Discarding unparseable frame");
            return None;
        }
    };
    let Envelope { kind, payload } = envelope;
    let payload = payload.filter(|p| !p.is_null());

    let message = match kind.as_str() {
        "connected" => ServerMessage::Connected(required(&kind, payload)?),
        "start_ack" => ServerMessage::StartAck(required(&kind, payload)?),
        "session_started" => ServerMessage::SessionStarted(required(&kind, payload)?),
        "session_ready" => ServerMessage::SessionReady(optional(&kind, payload)?),
        "session_closed" => ServerMessage::SessionClosed(optional(&kind, payload)?),
        "input_transcript" => ServerMessage::InputTranscript(required(&kind, payload)?),
        "output_transcript" => ServerMessage::OutputTranscript(required(&kind, payload)?),
        "text" => ServerMessage::Text(required(&kind, payload)?),
        "audio" => ServerMessage::Audio(required(&kind, payload)?),
        "turn_complete" => ServerMessage::TurnComplete,
        "setup_complete" => ServerMessage::SetupComplete,
        "interrupted" => ServerMessage::Interrupted,
        "tool_call" => ServerMessage::ToolCall(object(&kind, payload)?),
        "tool_result" => ServerMessage::ToolResult(object(&kind, payload)?),
        "stage_update" => ServerMessage::StageUpdate(object(&kind, payload)?),
        "heartbeat" => ServerMessage::Heartbeat(optional(&kind, payload)?),
        "pong" => ServerMessage::Pong(optional(&kind, payload)?),
        "error" => ServerMessage::Error(optional(&kind, payload)?),
        other => {
            debug!(message_type = other, "Ignoring frame with unknown type");
            return None;
        }
    };
    Some(message)
}

/// The payload must be present and carry every required field.
fn required<T: DeserializeOwned>(kind: &str, payload: Option<Value>) -> Option<T> {
    let Some(payload) = payload else {
        debug!(message_type = kind, "Discarding frame without payload");
        return None;
    };
    decode(kind, payload)
}

/// A missing payload decodes as the type's default.
fn optional<T: DeserializeOwned + Default>(kind: &str, payload: Option<Value>) -> Option<T> {
    match payload {
        Some(payload) => decode(kind, payload),
        None => Some(T::default()),
    }
}

/// Tool and stage payloads are opaque, but must at least be an object.
fn object(kind: &str, payload: Option<Value>) -> Option<Value> {
    match payload {
        Some(payload @ Value::Object(_)) => Some(payload),
        _ => {
            debug!(message_type = kind, "Discarding frame without object payload");
            None
        }
    }
}

fn decode<T: DeserializeOwned>(kind: &str, payload: Value) -> Option<T> {
    serde_json::from_value(payload)
        .map_err(|e| debug!(message_type = kind, error = %e, "Discarding malformed payload"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Beat, Connected, SessionReady, Transcript};
    use serde_json::json;

    #[test]
    fn test_parse_input_transcript() {
        let msg = parse_frame(
            r#"{"type":"input_transcript","payload":{"text":"Hello","isFinal":true}}"#,
        );
        assert_eq!(
            msg,
            Some(ServerMessage::InputTranscript(Transcript {
                text: "Hello".to_string(),
                is_final: true,
            }))
        );
    }

    #[test]
    fn test_missing_required_payload_is_discarded() {
        let required_types = [
            "connected",
            "start_ack",
            "session_started",
            "input_transcript",
            "output_transcript",
            "text",
            "audio",
            "tool_call",
            "tool_result",
            "stage_update",
        ];
        for kind in required_types {
            let without = json!({ "type": kind }).to_string();
            assert_eq!(parse_frame(&without), None, "{kind} without payload");

            let null = json!({ "type": kind, "payload": null }).to_string();
            assert_eq!(parse_frame(&null), None, "{kind} with null payload");
        }
    }

    #[test]
    fn test_missing_required_field_is_discarded() {
        assert_eq!(
            parse_frame(r#"{"type":"input_transcript","payload":{"text":"Hi"}}"#),
            None
        );
        assert_eq!(parse_frame(r#"{"type":"connected","payload":{}}"#), None);
        assert_eq!(
            parse_frame(r#"{"type":"audio","payload":{"audioData":"AAA="}}"#),
            None
        );
        assert_eq!(
            parse_frame(r#"{"type":"tool_call","payload":"not-an-object"}"#),
            None
        );
    }

    #[test]
    fn test_malformed_json_is_discarded() {
        assert_eq!(parse_frame("not json"), None);
        assert_eq!(parse_frame(r#"{"payload":{}}"#), None);
        assert_eq!(parse_frame(r#"{"type":42}"#), None);
        assert_eq!(parse_frame(""), None);
    }

    #[test]
    fn test_unknown_type_is_discarded() {
        assert_eq!(parse_frame(r#"{"type":"telemetry","payload":{}}"#), None);
    }

    #[test]
    fn test_optional_payloads_default() {
        assert_eq!(
            parse_frame(r#"{"type":"heartbeat"}"#),
            Some(ServerMessage::Heartbeat(Beat::default()))
        );
        assert_eq!(
            parse_frame(r#"{"type":"session_ready"}"#),
            Some(ServerMessage::SessionReady(SessionReady::default()))
        );
        assert!(matches!(
            parse_frame(r#"{"type":"session_closed"}"#),
            Some(ServerMessage::SessionClosed(_))
        ));
        assert!(matches!(
            parse_frame(r#"{"type":"error","payload":{"message":"quota"}}"#),
            Some(ServerMessage::Error(e)) if e.message.as_deref() == Some("quota")
        ));
    }

    #[test]
    fn test_payloadless_types_ignore_payload() {
        assert_eq!(
            parse_frame(r#"{"type":"turn_complete","payload":{"extra":1}}"#),
            Some(ServerMessage::TurnComplete)
        );
        assert_eq!(
            parse_frame(r#"{"type":"interrupted"}"#),
            Some(ServerMessage::Interrupted)
        );
    }

    #[test]
    fn test_parse_connected() {
        assert_eq!(
            parse_frame(r#"{"type":"connected","payload":{"connectionId":"c1"}}"#),
            Some(ServerMessage::Connected(Connected {
                connection_id: "c1".to_string()
            }))
        );
    }
}
