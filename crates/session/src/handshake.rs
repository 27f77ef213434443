//! Start handshake bookkeeping.
//!
//! Holds the pending start request, counts send attempts and owns the retry
//! deadline. Sending itself is done by the connection manager, which knows
//! whether the transport can take the frame.

use crate::protocol::StartParams;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Idle,
    Resend,
    /// Every allowed attempt went unacknowledged. The pending start is kept.
    GaveUp { attempts: u32 },
}

#[derive(Debug)]
pub struct StartHandshake {
    retry_delay: Duration,
    max_attempts: u32,
    pending: Option<StartParams>,
    /// Parameters of the most recent `start()` call, kept after acknowledgment.
    last: Option<StartParams>,
    acknowledged: bool,
    attempts: u32,
    retry_at: Option<Instant>,
}

impl StartHandshake {
    pub fn new(retry_delay: Duration, max_attempts: u32) -> Self {
        Self {
            retry_delay,
            max_attempts: max_attempts.max(1),
            pending: None,
            last: None,
            acknowledged: false,
            attempts: 0,
            retry_at: None,
        }
    }

    /// Replaces any pending start with `params` and starts counting afresh.
    pub fn queue(&mut self, params: StartParams) {
        self.last = Some(params.clone());
        self.pending = Some(params);
        self.acknowledged = false;
        self.attempts = 0;
        self.retry_at = None;
    }

    /// Puts the last start parameters back in the queue, if nothing is pending.
    pub fn requeue_last(&mut self) -> bool {
        if self.pending.is_some() {
            return false;
        }
        match &self.last {
            Some(last) => {
                self.pending = Some(last.clone());
                self.acknowledged = false;
                self.attempts = 0;
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> Option<&StartParams> {
        self.pending.as_ref()
    }

    pub fn last(&self) -> Option<&StartParams> {
        self.last.as_ref()
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset_attempts(&mut self) {
        self.attempts = 0;
    }

    /// Claims the next send attempt, if the budget allows one.
    pub fn next_send(&mut self) -> Option<StartParams> {
        if self.acknowledged || self.attempts >= self.max_attempts {
            return None;
        }
        let params = self.pending.clone()?;
        self.attempts += 1;
        Some(params)
    }

    pub fn arm_retry(&mut self, now: Instant) {
        if !self.acknowledged {
            self.retry_at = Some(now + self.retry_delay);
        }
    }

    pub fn cancel_retry(&mut self) {
        self.retry_at = None;
    }

    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn acknowledge(&mut self) {
        self.acknowledged = true;
        self.pending = None;
        self.retry_at = None;
        self.attempts = 0;
    }

    /// Forgets the session entirely, so nothing is resent or resumed.
    pub fn clear(&mut self) {
        self.pending = None;
        self.last = None;
        self.retry_at = None;
        self.attempts = 0;
    }

    pub fn poll(&mut self, now: Instant) -> RetryAction {
        if !self.retry_at.is_some_and(|at| at <= now) {
            return RetryAction::Idle;
        }
        self.retry_at = None;
        if self.acknowledged || self.pending.is_none() {
            return RetryAction::Idle;
        }
        if self.attempts >= self.max_attempts {
            return RetryAction::GaveUp {
                attempts: self.attempts,
            };
        }
        RetryAction::Resend
    }
}
