//! WebSocket transport built on tokio-tungstenite.

use super::{
    CLOSE_ABNORMAL, Connector, ReadyState, Transport, TransportError, TransportEvent,
    TransportEvents, TransportId,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::{
    CloseFrame, Message as WsMessage, frame::coding::CloseCode,
};
use tracing::{debug, info, warn};

/// How long the writer may outlive its socket task to flush queued frames.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens [`WsTransport`]s with `connect_async`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: &str, id: TransportId, events: TransportEvents) -> Box<dyn Transport> {
        let shared = Arc::new(Shared::default());
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            url.to_string(),
            id,
            shared.clone(),
            outbound_rx,
            events,
        ))
        .abort_handle();
        Box::new(WsTransport {
            shared,
            outbound: outbound_tx,
            task,
        })
    }
}

/// State shared between the transport handle and its socket tasks.
#[derive(Default)]
struct Shared {
    state: AtomicU8,
    /// Text bytes queued for the writer and not yet flushed.
    buffered: AtomicUsize,
}

impl Shared {
    fn state(&self) -> ReadyState {
        match self.state.load(Ordering::Acquire) {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }

    fn set(&self, state: ReadyState) {
        let raw = match state {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closing => 2,
            ReadyState::Closed => 3,
        };
        self.state.store(raw, Ordering::Release);
    }
}

pub struct WsTransport {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<WsMessage>,
    task: AbortHandle,
}

/// Dropping the handle tears the socket down without waiting for the peer's
/// close reply. Frames already queued, a Close frame included, are still
/// flushed by the writer before it exits.
impl Drop for WsTransport {
    fn drop(&mut self) {
        self.task.abort();
        self.shared.set(ReadyState::Closed);
    }
}

impl Transport for WsTransport {
    fn ready_state(&self) -> ReadyState {
        self.shared.state()
    }

    fn buffered_amount(&self) -> usize {
        self.shared.buffered.load(Ordering::Acquire)
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        match self.shared.state() {
            ReadyState::Open => {}
            ReadyState::Connecting => return Err(TransportError::NotOpen),
            ReadyState::Closing | ReadyState::Closed => return Err(TransportError::Closed),
        }
        let len = text.len();
        self.shared.buffered.fetch_add(len, Ordering::AcqRel);
        self.outbound.send(WsMessage::Text(text.into())).map_err(|_| {
            self.shared.buffered.fetch_sub(len, Ordering::AcqRel);
            TransportError::Closed
        })
    }

    fn close(&self, code: u16, reason: &str) {
        match self.shared.state() {
            ReadyState::Connecting => {
                self.task.abort();
                self.shared.set(ReadyState::Closed);
            }
            ReadyState::Open => {
                self.shared.set(ReadyState::Closing);
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.to_string().into(),
                };
                if self.outbound.send(WsMessage::Close(Some(frame))).is_err() {
                    self.task.abort();
                    self.shared.set(ReadyState::Closed);
                }
            }
            ReadyState::Closing | ReadyState::Closed => {}
        }
    }
}

/// Bounds the writer task's lifetime to that of the socket task.
///
/// When the socket task is aborted the writer gets a short grace period to
/// flush what is queued (typically our Close frame), then is aborted too.
struct WriterGuard(AbortHandle);

impl Drop for WriterGuard {
    fn drop(&mut self) {
        if self.0.is_finished() {
            return;
        }
        let writer = self.0.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(CLOSE_FLUSH_TIMEOUT).await;
                    writer.abort();
                });
            }
            Err(_) => writer.abort(),
        }
    }
}

async fn run_socket(
    url: String,
    id: TransportId,
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<WsMessage>,
    events: TransportEvents,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            warn!(transport = %id, error = %e, "WebSocket connect failed");
            shared.set(ReadyState::Closed);
            let _ = events.send((id, TransportEvent::Error(e.to_string())));
            let _ = events.send((
                id,
                TransportEvent::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: e.to_string(),
                },
            ));
            return;
        }
    };
    info!(transport = %id, %url, "WebSocket connected");
    shared.set(ReadyState::Open);
    let _ = events.send((id, TransportEvent::Opened));

    let (mut sink, mut stream) = stream.split();

    let writer_shared = shared.clone();
    let writer_events = events.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let len = match &msg {
                WsMessage::Text(text) => text.len(),
                _ => 0,
            };
            let is_close = matches!(msg, WsMessage::Close(_));
            let result = sink.send(msg).await;
            writer_shared.buffered.fetch_sub(len, Ordering::AcqRel);
            if let Err(e) = result {
                writer_shared.set(ReadyState::Closed);
                let _ = writer_events.send((id, TransportEvent::Error(e.to_string())));
                break;
            }
            if is_close {
                break;
            }
        }
    });
    let writer = WriterGuard(writer.abort_handle());

    let (code, reason) = loop {
        match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                if events
                    .send((id, TransportEvent::Frame(text.to_string())))
                    .is_err()
                {
                    break (CLOSE_ABNORMAL, "client dropped".to_string());
                }
            }
            Some(Ok(WsMessage::Close(frame))) => {
                break frame
                    .map(|f| (u16::from(f.code), f.reason.to_string()))
                    .unwrap_or((1005, String::new()));
            }
            Some(Ok(WsMessage::Binary(data))) => {
                debug!(transport = %id, len = data.len(), "Ignoring binary frame");
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                shared.set(ReadyState::Closed);
                let _ = events.send((id, TransportEvent::Error(e.to_string())));
                break (CLOSE_ABNORMAL, e.to_string());
            }
            None => break (CLOSE_ABNORMAL, "stream ended".to_string()),
        }
    };

    writer.0.abort();
    shared.set(ReadyState::Closed);
    info!(transport = %id, code, %reason, "WebSocket closed");
    let _ = events.send((id, TransportEvent::Closed { code, reason }));
}
