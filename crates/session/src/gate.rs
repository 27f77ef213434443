//! Outbound gate: the single path every frame takes to the transport.
//!
//! Ordinary frames are dropped while the transport holds more than the
//! configured number of buffered bytes. Control frames (heartbeat ping and
//! acknowledgment) always go through.

use crate::protocol::ClientMessage;
use crate::transport::{ReadyState, Transport, TransportError};
use std::collections::VecDeque;
use tracing::{debug, trace};

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection is not open")]
    NotOpen,
    #[error("no active session")]
    SessionInactive,
    #[error("dropped under backpressure ({buffered} bytes buffered, limit {limit})")]
    Backpressure { buffered: usize, limit: usize },
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("session client has shut down")]
    ClientClosed,
}

/// Diagnostic counters. Never consulted for send decisions.
#[derive(Debug)]
pub struct HealthMetrics {
    capacity: usize,
    buffered_samples: VecDeque<usize>,
    heartbeat_successes: u64,
    heartbeat_failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthSnapshot {
    pub samples: usize,
    pub average_buffered: f64,
    pub max_buffered: usize,
    pub heartbeat_successes: u64,
    pub heartbeat_failures: u64,
    /// Successes over all heartbeat outcomes; `1.0` before any outcome.
    pub success_ratio: f64,
}

impl HealthMetrics {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buffered_samples: VecDeque::with_capacity(capacity),
            heartbeat_successes: 0,
            heartbeat_failures: 0,
        }
    }

    pub fn record_buffered(&mut self, bytes: usize) {
        if self.buffered_samples.len() == self.capacity {
            self.buffered_samples.pop_front();
        }
        self.buffered_samples.push_back(bytes);
    }

    pub fn record_heartbeat_success(&mut self) {
        self.heartbeat_successes += 1;
    }

    pub fn record_heartbeat_failure(&mut self) {
        self.heartbeat_failures += 1;
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let samples = self.buffered_samples.len();
        let total: usize = self.buffered_samples.iter().sum();
        let average_buffered = if samples == 0 {
            0.0
        } else {
            total as f64 / samples as f64
        };
        let outcomes = self.heartbeat_successes + self.heartbeat_failures;
        let success_ratio = if outcomes == 0 {
            1.0
        } else {
            self.heartbeat_successes as f64 / outcomes as f64
        };
        HealthSnapshot {
            samples,
            average_buffered,
            max_buffered: self.buffered_samples.iter().copied().max().unwrap_or(0),
            heartbeat_successes: self.heartbeat_successes,
            heartbeat_failures: self.heartbeat_failures,
            success_ratio,
        }
    }
}

pub struct OutboundGate {
    max_buffered_bytes: usize,
    metrics: HealthMetrics,
}

impl OutboundGate {
    pub fn new(max_buffered_bytes: usize, health_samples: usize) -> Self {
        Self {
            max_buffered_bytes,
            metrics: HealthMetrics::new(health_samples),
        }
    }

    pub fn metrics(&self) -> &HealthMetrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut HealthMetrics {
        &mut self.metrics
    }

    /// Serializes and sends `msg`.
    ///
    /// Ordinary frames are rejected with [`SendError::Backpressure`] when the
    /// buffer is over the ceiling; the frame is dropped, not queued.
    pub fn send(
        &mut self,
        transport: Option<&dyn Transport>,
        msg: &ClientMessage,
    ) -> Result<(), SendError> {
        let transport = match transport {
            Some(t) if t.ready_state() == ReadyState::Open => t,
            _ => return Err(SendError::NotOpen),
        };

        if !msg.is_control() {
            let buffered = transport.buffered_amount();
            if buffered > self.max_buffered_bytes {
                debug!(
                    message_type = msg.tag(),
                    buffered,
                    limit = self.max_buffered_bytes,
                    "Dropping frame under backpressure"
                );
                return Err(SendError::Backpressure {
                    buffered,
                    limit: self.max_buffered_bytes,
                });
            }
        }

        let text = serde_json::to_string(msg)?;
        transport.send_text(text)?;
        let buffered = transport.buffered_amount();
        self.metrics.record_buffered(buffered);
        trace!(message_type = msg.tag(), buffered, "Frame sent");
        Ok(())
    }
}
