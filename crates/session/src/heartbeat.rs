//! Heartbeat ping/pong liveness monitoring.
//!
//! Two independent schedules run while the connection is open: one sends a
//! ping every `interval`, the other checks every `check_interval` whether
//! anything (pong or peer heartbeat) was seen within `timeout`.

use std::time::Duration;
use tokio::time::Instant;

/// What the connection manager should do after polling the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    Idle,
    SendPing,
    /// Nothing was heard within the timeout. The monitor has stopped itself.
    TimedOut { silent_for: Duration },
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    check_interval: Duration,
    last_seen: Instant,
    next_ping: Option<Instant>,
    next_check: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, timeout: Duration, check_interval: Duration) -> Self {
        Self {
            interval,
            timeout,
            check_interval,
            last_seen: Instant::now(),
            next_ping: None,
            next_check: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.next_ping.is_some() || self.next_check.is_some()
    }

    /// Arms both schedules. Returns `false` and changes nothing if already running.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.is_running() {
            return false;
        }
        self.last_seen = now;
        self.next_ping = Some(now + self.interval);
        self.next_check = Some(now + self.check_interval);
        true
    }

    pub fn stop(&mut self) {
        self.next_ping = None;
        self.next_check = None;
    }

    /// Any pong or peer heartbeat counts as a sign of life.
    pub fn record_seen(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.next_ping, self.next_check) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        if self.next_check.is_some_and(|at| at <= now) {
            let silent_for = now.saturating_duration_since(self.last_seen);
            if silent_for > self.timeout {
                self.stop();
                return HeartbeatAction::TimedOut { silent_for };
            }
            self.next_check = Some(now + self.check_interval);
        }
        if self.next_ping.is_some_and(|at| at <= now) {
            self.next_ping = Some(now + self.interval);
            return HeartbeatAction::SendPing;
        }
        HeartbeatAction::Idle
    }
}
