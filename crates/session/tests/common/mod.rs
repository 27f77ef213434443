//! In-memory transport used to drive a `SessionClient` from tests.

#![allow(dead_code)]

use feynman_session::transport::{
    Connector, ReadyState, Transport, TransportError, TransportEvent, TransportEvents, TransportId,
};
use feynman_session::{EventKind, SessionClient, SessionConfig, SessionEvent};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

struct SocketState {
    ready: ReadyState,
    buffered: usize,
    sent: Vec<String>,
    closed_with: Option<(u16, String)>,
}

/// Test-side view of one transport opened by the client.
#[derive(Clone)]
pub struct FakeSocket {
    pub id: TransportId,
    events: TransportEvents,
    state: Arc<Mutex<SocketState>>,
}

impl FakeSocket {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send((self.id, event));
    }

    pub fn accept(&self) {
        self.state.lock().ready = ReadyState::Open;
        self.emit(TransportEvent::Opened);
    }

    pub fn frame(&self, frame: Value) {
        self.emit(TransportEvent::Frame(frame.to_string()));
    }

    pub fn raw_frame(&self, frame: &str) {
        self.emit(TransportEvent::Frame(frame.to_string()));
    }

    /// The peer (or the network) ends the connection.
    pub fn drop_connection(&self, code: u16) {
        self.state.lock().ready = ReadyState::Closed;
        self.emit(TransportEvent::Closed {
            code,
            reason: "dropped".to_string(),
        });
    }

    pub fn fail(&self, message: &str, ready: ReadyState) {
        self.state.lock().ready = ready;
        self.emit(TransportEvent::Error(message.to_string()));
    }

    pub fn set_buffered(&self, bytes: usize) {
        self.state.lock().buffered = bytes;
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state.lock().ready
    }

    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.state.lock().closed_with.clone()
    }

    pub fn sent(&self) -> Vec<Value> {
        self.state
            .lock()
            .sent
            .iter()
            .map(|text| serde_json::from_str(text).expect("client sent invalid JSON"))
            .collect()
    }

    pub fn sent_of_type(&self, kind: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|frame| frame["type"] == kind)
            .collect()
    }
}

struct FakeTransport(FakeSocket);

impl Transport for FakeTransport {
    fn ready_state(&self) -> ReadyState {
        self.0.state.lock().ready
    }

    fn buffered_amount(&self) -> usize {
        self.0.state.lock().buffered
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        let mut state = self.0.state.lock();
        if state.ready != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }
        state.sent.push(text);
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        let mut state = self.0.state.lock();
        state.ready = ReadyState::Closed;
        state.closed_with = Some((code, reason.to_string()));
    }
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    sockets: Arc<Mutex<Vec<FakeSocket>>>,
}

impl FakeConnector {
    pub fn opened(&self) -> usize {
        self.sockets.lock().len()
    }

    pub fn socket(&self, index: usize) -> FakeSocket {
        self.sockets.lock()[index].clone()
    }

    pub fn last(&self) -> FakeSocket {
        self.sockets
            .lock()
            .last()
            .cloned()
            .expect("no transport opened yet")
    }
}

impl Connector for FakeConnector {
    fn open(&self, _url: &str, id: TransportId, events: TransportEvents) -> Box<dyn Transport> {
        let socket = FakeSocket {
            id,
            events,
            state: Arc::new(Mutex::new(SocketState {
                ready: ReadyState::Connecting,
                buffered: 0,
                sent: Vec::new(),
                closed_with: None,
            })),
        };
        self.sockets.lock().push(socket.clone());
        Box::new(FakeTransport(socket))
    }
}

/// Records every event the client emits, in order.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

pub const ALL_KINDS: &[EventKind] = &[
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

impl EventLog {
    pub fn attach(client: &SessionClient) -> Self {
        let log = Self::default();
        for kind in ALL_KINDS {
            let events = log.events.clone();
            // Subscriptions stay registered for the client's lifetime.
            let _ = client.on(*kind, move |event| events.lock().push(event.clone()));
        }
        log
    }

    pub fn all(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub fn of(&self, kind: EventKind) -> Vec<SessionEvent> {
        self.all().into_iter().filter(|e| e.kind() == kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.of(kind).len()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

pub struct Harness {
    pub client: SessionClient,
    pub connector: FakeConnector,
    pub log: EventLog,
}

impl Harness {
    pub fn new(config: SessionConfig) -> Self {
        let connector = FakeConnector::default();
        let client = SessionClient::with_connector(config, connector.clone());
        let log = EventLog::attach(&client);
        Self {
            client,
            connector,
            log,
        }
    }

    /// Connects and completes the transport open.
    pub async fn open(&self) -> FakeSocket {
        self.client.connect().await;
        let socket = self.connector.last();
        socket.accept();
        settle(&self.client).await;
        socket
    }

    /// Opens and receives a `connected` frame assigning `connection_id`.
    pub async fn open_with_id(&self, connection_id: &str) -> FakeSocket {
        let socket = self.open().await;
        socket.frame(serde_json::json!({
            "type": "connected",
            "payload": { "connectionId": connection_id }
        }));
        settle(&self.client).await;
        socket
    }
}

/// Lets the connection task drain everything already queued for it.
pub async fn settle(client: &SessionClient) {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
    let _ = client.health().await;
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub async fn advance(client: &SessionClient, by: Duration) {
    tokio::time::advance(by).await;
    settle(client).await;
}

/// Short timers so tests read in round numbers.
pub fn test_config() -> SessionConfig {
    SessionConfig::new("ws://agent.test/live")
        .with_connect_timeout(Duration::from_secs(5))
        .with_reconnect(
            5,
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(1),
        )
        .with_heartbeat(
            Duration::from_secs(10),
            Duration::from_secs(30),
            Duration::from_secs(5),
        )
        .with_start_retry(Duration::from_secs(2), 3)
        .with_max_buffered_bytes(1024)
}
