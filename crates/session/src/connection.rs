//! Connection manager: the single task that owns the transport and all session state.
//!
//! The public [`SessionClient`](crate::SessionClient) only sends [`Command`]s
//! here. Transport callbacks arrive on a second channel and every timer is a
//! deadline checked by the same loop, so no two pieces of code ever touch the
//! counters concurrently.

use crate::config::SessionConfig;
use crate::events::{CloseEvent, ErrorSource, SessionEvent};
use crate::gate::{HealthSnapshot, OutboundGate, SendError};
use crate::handshake::{RetryAction, StartHandshake};
use crate::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use crate::listeners::ListenerRegistry;
use crate::protocol::{
    ClientMessage, ServerMessage, SessionReady, SessionStarted, StartParams, Timestamp,
};
use crate::router::parse_frame;
use crate::transport::{
    CLOSE_FORCED, CLOSE_NORMAL, Connector, ReadyState, Transport, TransportEvent, TransportEvents,
    TransportId,
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

/// Far enough ahead to stand in for "no timer armed".
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Inactive,
    HandshakePending,
    Active,
}

/// Snapshot published by the connection task after every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    pub connection: ConnectionState,
    pub session: SessionState,
    pub connection_id: Option<String>,
    pub reconnect_attempts: u32,
    pub start_attempts: u32,
}

impl Default for ClientStatus {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Idle,
            session: SessionState::Inactive,
            connection_id: None,
            reconnect_attempts: 0,
            start_attempts: 0,
        }
    }
}

pub(crate) enum Command {
    Connect(oneshot::Sender<()>),
    Disconnect(oneshot::Sender<()>),
    Start(StartParams, oneshot::Sender<()>),
    Stop(oneshot::Sender<Result<(), SendError>>),
    Send(ClientMessage, oneshot::Sender<Result<(), SendError>>),
    Health(oneshot::Sender<HealthSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

pub(crate) struct ConnectionActor {
    config: SessionConfig,
    connector: Box<dyn Connector>,
    listeners: ListenerRegistry,
    status: watch::Sender<ClientStatus>,
    events_tx: TransportEvents,
    next_transport_id: u64,
    transport: Option<(TransportId, Box<dyn Transport>)>,
    connection: ConnectionState,
    session: SessionState,
    connection_id: Option<String>,
    manual_close: bool,
    reconnect_attempts: u32,
    connect_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
    health_summary_at: Option<Instant>,
    heartbeat: HeartbeatMonitor,
    handshake: StartHandshake,
    gate: OutboundGate,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn live(transport: &Option<(TransportId, Box<dyn Transport>)>) -> Option<&dyn Transport> {
    transport.as_ref().map(|(_, t)| t.as_ref())
}

impl ConnectionActor {
    pub(crate) fn new(
        config: SessionConfig,
        connector: Box<dyn Connector>,
        listeners: ListenerRegistry,
        status: watch::Sender<ClientStatus>,
        events_tx: TransportEvents,
    ) -> Self {
        let heartbeat = HeartbeatMonitor::new(
            config.heartbeat_interval,
            config.heartbeat_timeout,
            config.heartbeat_check_interval,
        );
        let handshake = StartHandshake::new(config.start_retry_delay, config.max_start_attempts);
        let gate = OutboundGate::new(config.max_buffered_bytes, config.health_samples);
        Self {
            config,
            connector,
            listeners,
            status,
            events_tx,
            next_transport_id: 1,
            transport: None,
            connection: ConnectionState::Idle,
            session: SessionState::Inactive,
            connection_id: None,
            manual_close: false,
            reconnect_attempts: 0,
            connect_deadline: None,
            reconnect_at: None,
            health_summary_at: None,
            heartbeat,
            handshake,
            gate,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<(TransportId, TransportEvent)>,
    ) {
        loop {
            let deadline = self
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + FAR_FUTURE);
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.disconnect();
                        self.publish_status();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All client handles dropped");
                        self.disconnect();
                        self.publish_status();
                        break;
                    }
                },
                Some((id, event)) = events.recv() => self.handle_transport_event(id, event),
                _ = sleep_until(deadline) => self.fire_timers(Instant::now()),
            }
            self.publish_status();
        }
        info!("Session client stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(done) => {
                self.connect();
                let _ = done.send(());
            }
            Command::Disconnect(done) => {
                self.disconnect();
                let _ = done.send(());
            }
            Command::Start(params, done) => {
                self.start(params);
                let _ = done.send(());
            }
            Command::Stop(reply) => {
                let _ = reply.send(self.stop());
            }
            Command::Send(msg, reply) => {
                let _ = reply.send(self.send_session_frame(&msg));
            }
            Command::Health(reply) => {
                let _ = reply.send(self.gate.metrics().snapshot());
            }
            Command::Shutdown(done) => {
                // Handled in `run`.
                let _ = done.send(());
            }
        }
    }

    fn publish_status(&self) {
        let next = ClientStatus {
            connection: self.connection,
            session: self.session,
            connection_id: self.connection_id.clone(),
            reconnect_attempts: self.reconnect_attempts,
            start_attempts: self.handshake.attempts(),
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn emit(&self, event: SessionEvent) {
        self.listeners.emit(&event);
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    fn connect(&mut self) {
        if matches!(
            self.connection,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            debug!(state = ?self.connection, "connect() ignored; connection already in progress");
            return;
        }
        self.manual_close = false;
        self.reconnect_attempts = 0;
        self.reconnect_at = None;
        self.open_transport();
    }

    fn open_transport(&mut self) {
        if let Some((stale_id, stale)) = self.transport.take() {
            debug!(transport = %stale_id, "Tearing down stale transport");
            stale.close(CLOSE_NORMAL, "replaced");
        }
        let id = TransportId(self.next_transport_id);
        self.next_transport_id += 1;
        info!(
            transport = %id,
            url = %self.config.url,
            attempt = self.reconnect_attempts,
            "Opening connection"
        );
        let transport = self
            .connector
            .open(&self.config.url, id, self.events_tx.clone());
        self.transport = Some((id, transport));
        self.connection = ConnectionState::Connecting;
        self.connect_deadline = Some(Instant::now() + self.config.connect_timeout);
    }

    fn disconnect(&mut self) {
        self.manual_close = true;
        self.cancel_timers();
        let Some((id, transport)) = self.transport.take() else {
            if self.connection != ConnectionState::Idle {
                self.connection = ConnectionState::Closed;
            }
            self.connection_id = None;
            self.session = SessionState::Inactive;
            return;
        };
        info!(transport = %id, "Disconnecting");
        self.connection = ConnectionState::Closing;
        self.publish_status();
        transport.close(CLOSE_NORMAL, "client disconnect");
        self.connection = ConnectionState::Closed;
        self.connection_id = None;
        self.session = SessionState::Inactive;
        self.emit(SessionEvent::Close(CloseEvent {
            code: CLOSE_NORMAL,
            reason: "client disconnect".to_string(),
            manual: true,
        }));
    }

    fn cancel_timers(&mut self) {
        self.connect_deadline = None;
        self.reconnect_at = None;
        self.health_summary_at = None;
        self.heartbeat.stop();
        self.handshake.cancel_retry();
    }

    /// Closes the current transport from our side and runs the loss path.
    fn force_close(&mut self, reason: &str) {
        if let Some((id, transport)) = self.transport.take() {
            warn!(transport = %id, %reason, "Forcing connection closed");
            self.connection = ConnectionState::Closing;
            transport.close(CLOSE_FORCED, reason);
        }
        self.connection_lost(CLOSE_FORCED, reason.to_string());
    }

    fn connection_lost(&mut self, code: u16, reason: String) {
        let had_session = self.session != SessionState::Inactive;
        self.cancel_timers();
        self.connection = ConnectionState::Closed;
        self.connection_id = None;
        self.session = SessionState::Inactive;
        if had_session
            && self.config.resume_session_on_reconnect
            && !self.manual_close
            && self.handshake.requeue_last()
        {
            debug!("Session will resume after reconnect");
        }
        self.emit(SessionEvent::Close(CloseEvent {
            code,
            reason,
            manual: self.manual_close,
        }));
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.manual_close {
            return;
        }
        if self.reconnect_attempts >= self.config.max_reconnect_attempts {
            error!(
                attempts = self.reconnect_attempts,
                "Reconnect attempts exhausted; giving up"
            );
            self.reconnect_at = None;
            self.emit(SessionEvent::error(
                ErrorSource::ReconnectExhausted,
                format!(
                    "gave up after {} reconnect attempts",
                    self.reconnect_attempts
                ),
                true,
            ));
            return;
        }
        self.reconnect_attempts += 1;
        let delay = self.config.reconnect_delay(self.reconnect_attempts);
        info!(
            attempt = self.reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.reconnect_at = Some(Instant::now() + delay);
    }

    // ── Transport callbacks ─────────────────────────────────────────────────

    fn handle_transport_event(&mut self, id: TransportId, event: TransportEvent) {
        if self.transport.as_ref().map(|(current, _)| *current) != Some(id) {
            debug!(transport = %id, ?event, "Ignoring event from discarded transport");
            return;
        }
        match event {
            TransportEvent::Opened => self.on_open(id),
            TransportEvent::Frame(text) => self.on_frame(&text),
            TransportEvent::Closed { code, reason } => {
                info!(transport = %id, code, %reason, "Connection closed");
                self.transport = None;
                self.connection_lost(code, reason);
            }
            TransportEvent::Error(message) => self.on_error(id, message),
        }
    }

    fn on_open(&mut self, id: TransportId) {
        let now = Instant::now();
        self.connect_deadline = None;
        self.reconnect_attempts = 0;
        self.connection = ConnectionState::Open;
        self.heartbeat.start(now);
        self.health_summary_at = Some(now + self.config.health_summary_interval);
        info!(transport = %id, "Connection open");
        self.emit(SessionEvent::Open);
    }

    fn on_error(&mut self, id: TransportId, message: String) {
        let state = live(&self.transport).map_or(ReadyState::Closed, |t| t.ready_state());
        match state {
            ReadyState::Open | ReadyState::Connecting => {
                warn!(transport = %id, error = %message, "Transport error on live connection");
                self.emit(SessionEvent::error(ErrorSource::Transport, message, false));
            }
            ReadyState::Closing | ReadyState::Closed => {
                warn!(transport = %id, error = %message, "Transport error left connection unusable");
                self.emit(SessionEvent::error(
                    ErrorSource::Transport,
                    message.clone(),
                    false,
                ));
                self.force_close(&message);
            }
        }
    }

    // ── Event router ────────────────────────────────────────────────────────

    fn on_frame(&mut self, text: &str) {
        let Some(message) = parse_frame(text) else {
            return;
        };
        match message {
            ServerMessage::Connected(connected) => {
                info!(connection_id = %connected.connection_id, "Connection id assigned");
                self.connection_id = Some(connected.connection_id.clone());
                self.handshake.reset_attempts();
                self.emit(SessionEvent::Connected {
                    connection_id: connected.connection_id,
                });
                self.try_send_start();
            }
            ServerMessage::StartAck(ack) => {
                info!(connection_id = %ack.connection_id, "Start acknowledged");
                self.handshake.acknowledge();
                self.emit(SessionEvent::StartAck {
                    connection_id: ack.connection_id,
                });
            }
            ServerMessage::SessionStarted(started) => self.activate_session(started),
            ServerMessage::SessionReady(ready) => self.on_session_ready(ready),
            ServerMessage::SessionClosed(closed) => {
                info!(reason = ?closed.reason, "Session closed by peer");
                self.session = SessionState::Inactive;
                self.handshake.clear();
                self.listeners.clear_cached_session();
                self.emit(SessionEvent::SessionClosed(closed));
            }
            ServerMessage::InputTranscript(t) => self.emit(SessionEvent::InputTranscript(t)),
            ServerMessage::OutputTranscript(t) => self.emit(SessionEvent::OutputTranscript(t)),
            ServerMessage::Text(text) => self.emit(SessionEvent::Text {
                content: text.content,
            }),
            ServerMessage::Audio(audio) => self.emit(SessionEvent::Audio(audio)),
            ServerMessage::TurnComplete => self.emit(SessionEvent::TurnComplete),
            ServerMessage::SetupComplete => self.emit(SessionEvent::SetupComplete),
            ServerMessage::Interrupted => self.emit(SessionEvent::Interrupted),
            ServerMessage::ToolCall(call) => self.emit(SessionEvent::ToolCall(call)),
            ServerMessage::ToolResult(result) => self.emit(SessionEvent::ToolResult(result)),
            ServerMessage::StageUpdate(stage) => self.emit(SessionEvent::StageUpdate(stage)),
            ServerMessage::Heartbeat(beat) => {
                self.heartbeat.record_seen(Instant::now());
                self.gate.metrics_mut().record_heartbeat_success();
                let ack = ClientMessage::HeartbeatAck(Timestamp {
                    timestamp: beat.timestamp.unwrap_or_else(now_millis),
                });
                if let Err(e) = self.gate.send(live(&self.transport), &ack) {
                    debug!(error = %e, "Heartbeat ack not sent");
                }
                self.emit(SessionEvent::Heartbeat {
                    timestamp: beat.timestamp,
                });
            }
            ServerMessage::Pong(_) => {
                self.heartbeat.record_seen(Instant::now());
                self.gate.metrics_mut().record_heartbeat_success();
            }
            ServerMessage::Error(peer) => {
                let message = peer
                    .message
                    .unwrap_or_else(|| "unspecified peer error".to_string());
                warn!(error = %message, "Peer reported an error");
                self.emit(SessionEvent::error(ErrorSource::Peer, message, false));
            }
        }
    }

    fn activate_session(&mut self, started: SessionStarted) {
        if self.session == SessionState::Active {
            debug!(connection_id = %started.connection_id, "Session already active");
            // Still confirms a start sent while the session was live.
            self.handshake.acknowledge();
            return;
        }
        info!(connection_id = %started.connection_id, "Session started");
        self.session = SessionState::Active;
        self.handshake.acknowledge();
        self.listeners.cache_session(started.clone());
        self.emit(SessionEvent::SessionStarted(started));
    }

    fn on_session_ready(&mut self, ready: SessionReady) {
        self.emit(SessionEvent::SessionReady(ready.clone()));
        if self.session == SessionState::Active {
            return;
        }
        let Some(connection_id) = self.connection_id.clone().or(ready.session_id) else {
            warn!("session_ready without any connection or session id; not activating");
            return;
        };
        let last = self.handshake.last();
        let synthesized = SessionStarted {
            connection_id,
            language_code: last.map(|p| p.language_code.clone()),
            voice_name: last.and_then(|p| p.voice_name.clone()),
            mock: None,
        };
        debug!("Synthesizing session_started from session_ready");
        self.activate_session(synthesized);
    }

    // ── Start handshake ─────────────────────────────────────────────────────

    fn start(&mut self, params: StartParams) {
        info!(language = %params.language_code, "Queueing start request");
        self.handshake.queue(params);
        // A live session stays Active until the peer closes it or the
        // connection drops.
        if self.session == SessionState::Inactive {
            self.session = SessionState::HandshakePending;
        }
        self.try_send_start();
    }

    fn try_send_start(&mut self) {
        if self.connection != ConnectionState::Open || self.connection_id.is_none() {
            return;
        }
        let Some(params) = self.handshake.next_send() else {
            return;
        };
        let attempt = self.handshake.attempts();
        if self.session == SessionState::Inactive {
            self.session = SessionState::HandshakePending;
        }
        match self
            .gate
            .send(live(&self.transport), &ClientMessage::Start(params))
        {
            Ok(()) => info!(attempt, "Start request sent"),
            Err(e) => warn!(attempt, error = %e, "Start request not sent; will retry"),
        }
        self.handshake.arm_retry(Instant::now());
    }

    fn stop(&mut self) -> Result<(), SendError> {
        if self.session == SessionState::Inactive {
            return Err(SendError::SessionInactive);
        }
        let result = self.gate.send(live(&self.transport), &ClientMessage::Stop);
        self.handshake.clear();
        if self.session == SessionState::HandshakePending {
            self.session = SessionState::Inactive;
        }
        result
    }

    fn send_session_frame(&mut self, msg: &ClientMessage) -> Result<(), SendError> {
        if self.connection != ConnectionState::Open {
            return Err(SendError::NotOpen);
        }
        if self.session != SessionState::Active {
            return Err(SendError::SessionInactive);
        }
        self.gate.send(live(&self.transport), msg)
    }

    // ── Timers ──────────────────────────────────────────────────────────────

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.connect_deadline,
            self.reconnect_at,
            self.health_summary_at,
            self.heartbeat.next_deadline(),
            self.handshake.retry_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn fire_timers(&mut self, now: Instant) {
        if self.connect_deadline.is_some_and(|at| at <= now) {
            self.connect_deadline = None;
            warn!(
                timeout_ms = self.config.connect_timeout.as_millis() as u64,
                "Connection attempt timed out"
            );
            self.emit(SessionEvent::error(
                ErrorSource::ConnectTimeout,
                "connection attempt timed out",
                false,
            ));
            self.force_close("connect timeout");
            return;
        }

        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            if !self.manual_close {
                self.open_transport();
            }
            return;
        }

        match self.heartbeat.poll(now) {
            HeartbeatAction::Idle => {}
            HeartbeatAction::SendPing => {
                let ping = ClientMessage::Ping(Timestamp {
                    timestamp: now_millis(),
                });
                if let Err(e) = self.gate.send(live(&self.transport), &ping) {
                    self.gate.metrics_mut().record_heartbeat_failure();
                    debug!(error = %e, "Heartbeat ping not sent");
                }
            }
            HeartbeatAction::TimedOut { silent_for } => {
                self.gate.metrics_mut().record_heartbeat_failure();
                warn!(
                    silent_ms = silent_for.as_millis() as u64,
                    "Heartbeat timed out; reconnecting"
                );
                self.emit(SessionEvent::error(
                    ErrorSource::HeartbeatTimeout,
                    format!("no heartbeat for {} ms", silent_for.as_millis()),
                    false,
                ));
                self.force_close("heartbeat timeout");
                return;
            }
        }

        match self.handshake.poll(now) {
            RetryAction::Idle => {}
            RetryAction::Resend => {
                debug!(attempt = self.handshake.attempts(), "Retrying start request");
                self.try_send_start();
            }
            RetryAction::GaveUp { attempts } => {
                warn!(attempts, "Start request never acknowledged; giving up");
                self.emit(SessionEvent::HandshakeTimedOut { attempts });
            }
        }

        if self.health_summary_at.is_some_and(|at| at <= now) {
            self.health_summary_at = Some(now + self.config.health_summary_interval);
            let snapshot = self.gate.metrics().snapshot();
            debug!(
                samples = snapshot.samples,
                average_buffered = snapshot.average_buffered,
                max_buffered = snapshot.max_buffered,
                heartbeat_successes = snapshot.heartbeat_successes,
                heartbeat_failures = snapshot.heartbeat_failures,
                success_ratio = snapshot.success_ratio,
                "Connection health"
            );
        }
    }
}
