use feynman_session::{
    EventKind, MediaChunk, SessionClient, SessionConfig, SessionEvent, SessionState, StartParams,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

/// Minimal agent backend: assigns an id, confirms the first start and
/// forwards every frame it receives to the test.
async fn spawn_backend() -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let connected = json!({ "type": "connected", "payload": { "connectionId": "srv-1" } });
        ws.send(Message::Text(connected.to_string())).await.unwrap();

        while let Some(Ok(msg)) = ws.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => {
                    let _ = frames_tx.send(json!({ "type": "__closed" }));
                    break;
                }
                _ => continue,
            };
            let frame: Value = serde_json::from_str(&text).unwrap();
            if frame["type"] == "start" {
                let started = json!({
                    "type": "session_started",
                    "payload": {
                        "connectionId": "srv-1",
                        "languageCode": frame["payload"]["languageCode"]
                    }
                });
                ws.send(Message::Text(started.to_string())).await.unwrap();
            }
            let _ = frames_tx.send(frame);
        }
    });

    (format!("ws://{}/live", addr), frames_rx)
}

async fn next_frame(frames: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    timeout(WAIT, frames.recv())
        .await
        .expect("backend saw no frame in time")
        .expect("backend stopped")
}

#[tokio::test]
async fn test_session_over_real_websocket() {
    let (url, mut frames) = spawn_backend().await;
    let client = SessionClient::new(SessionConfig::new(url));

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let _sub = client.on(EventKind::SessionStarted, move |event| {
        let _ = events_tx.send(event.clone());
    });

    client.start(StartParams::new("en-US")).await;
    client.connect().await;

    let start = next_frame(&mut frames).await;
    assert_eq!(start["type"], "start");
    assert_eq!(start["payload"]["languageCode"], "en-US");

    let started = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    match started {
        SessionEvent::SessionStarted(payload) => {
            assert_eq!(payload.connection_id, "srv-1");
            assert_eq!(payload.language_code.as_deref(), Some("en-US"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(client.session_state(), SessionState::Active);
    assert_eq!(client.connection_id().as_deref(), Some("srv-1"));

    client
        .send_realtime_input(vec![MediaChunk::pcm16(&[1, -1], 16000)])
        .await
        .unwrap();
    let input = next_frame(&mut frames).await;
    assert_eq!(input["type"], "realtime_input");
    assert_eq!(input["payload"]["mediaChunks"][0]["data"], "AQD//w==");

    client.disconnect().await;
    assert_eq!(next_frame(&mut frames).await["type"], "__closed");
    assert!(!client.is_connected());
}
