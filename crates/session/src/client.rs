//! Public handle to a realtime session.

use crate::config::SessionConfig;
use crate::connection::{ClientStatus, Command, ConnectionActor, ConnectionState, SessionState};
use crate::events::{EventKind, SessionEvent};
use crate::gate::{HealthSnapshot, SendError};
use crate::listeners::{ListenerRegistry, Subscription};
use crate::protocol::{ClientMessage, ContextUpdate, MediaChunk, RealtimeInput, StartParams};
use crate::transport::{Connector, WsConnector};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;

/// Caller-owned client for one logical session at a time.
///
/// Construction spawns the connection task on the current tokio runtime. The
/// handle is cheap to clone; the task stops when the last clone is dropped or
/// [`SessionClient::shutdown`] is called.
///
/// Listeners run on the connection task and must not block.
#[derive(Clone)]
pub struct SessionClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ClientStatus>,
    listeners: ListenerRegistry,
}

impl SessionClient {
    /// Creates a client that talks WebSocket through tokio-tungstenite.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(config, WsConnector)
    }

    pub fn with_connector(config: SessionConfig, connector: impl Connector) -> Self {
        let config = config.normalized();
        let listeners = ListenerRegistry::new();
        let (status_tx, status_rx) = watch::channel(ClientStatus::default());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let span = tracing::info_span!("session_client", url = %config.url);
        let actor = ConnectionActor::new(
            config,
            Box::new(connector),
            listeners.clone(),
            status_tx,
            events_tx,
        );
        tokio::spawn(actor.run(commands_rx, events_rx).instrument(span));

        Self {
            commands: commands_tx,
            status: status_rx,
            listeners,
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(build(tx)).ok()?;
        rx.await.ok()
    }

    /// Opens the connection. A no-op while connecting or open.
    pub async fn connect(&self) {
        self.request(Command::Connect).await;
    }

    /// Closes the connection and cancels every timer. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        self.request(Command::Disconnect).await;
    }

    /// Queues a session start. It is sent as soon as the peer has assigned a
    /// connection id, and retried until acknowledged or out of attempts.
    pub async fn start(&self, params: StartParams) {
        self.request(|tx| Command::Start(params, tx)).await;
    }

    /// Ends the session without closing the connection.
    pub async fn stop(&self) -> Result<(), SendError> {
        self.request(Command::Stop)
            .await
            .unwrap_or(Err(SendError::ClientClosed))
    }

    pub async fn send_realtime_input(
        &self,
        media_chunks: Vec<MediaChunk>,
    ) -> Result<(), SendError> {
        self.send(ClientMessage::RealtimeInput(RealtimeInput { media_chunks }))
            .await
    }

    /// Best effort: dropped under backpressure like any ordinary frame.
    pub async fn send_context_update(&self, update: ContextUpdate) -> Result<(), SendError> {
        self.send(ClientMessage::ContextUpdate(update)).await
    }

    pub async fn send_tool_result(&self, result: Value) -> Result<(), SendError> {
        self.send(ClientMessage::ToolResult(result)).await
    }

    async fn send(&self, msg: ClientMessage) -> Result<(), SendError> {
        self.request(|tx| Command::Send(msg, tx))
            .await
            .unwrap_or(Err(SendError::ClientClosed))
    }

    /// Diagnostic snapshot; `None` once the client has shut down.
    pub async fn health(&self) -> Option<HealthSnapshot> {
        self.request(Command::Health).await
    }

    pub fn on<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.listeners.on(kind, callback)
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Open
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.status.borrow().connection
    }

    pub fn session_state(&self) -> SessionState {
        self.status.borrow().session
    }

    pub fn connection_id(&self) -> Option<String> {
        self.status.borrow().connection_id.clone()
    }

    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    /// A receiver that is notified whenever the status changes.
    pub fn watch_status(&self) -> watch::Receiver<ClientStatus> {
        self.status.clone()
    }

    /// Disconnects and stops the connection task. Other clones become inert.
    pub async fn shutdown(self) {
        self.request(Command::Shutdown).await;
    }
}
