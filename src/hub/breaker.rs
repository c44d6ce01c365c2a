//! Circuit breaker for the processing loops
//!
//! Counts consecutive failed ticks of one loop. At the threshold the breaker
//! opens and the loop skips its ticks for the cooldown; after that it closes
//! again with the counter reset. Enqueue calls never consult the breaker, so
//! work submitted during a pause is only delayed.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::GatewayError;

/// State of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Ticks run normally
    Closed,
    /// Ticks are skipped until the cooldown elapses
    Open,
}

/// Consecutive-failure breaker for one processing loop
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    /// Create a closed breaker for the loop called `name`
    #[must_use]
    pub fn new(name: &'static str, threshold: u32, cooldown: Duration) -> Self {
        Self {
            name,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            threshold: threshold.max(1),
            cooldown,
        }
    }

    /// A tick succeeded
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// A tick failed. Returns the overload error when this failure trips the breaker.
    pub fn record_failure(&mut self) -> Option<GatewayError> {
        self.consecutive_failures += 1;
        if self.state == BreakerState::Closed && self.consecutive_failures >= self.threshold {
            self.state = BreakerState::Open;
            self.opened_at = Some(Instant::now());
            let error = GatewayError::processing_overload(self.name, self.consecutive_failures);
            log::error!("{error}; pausing for {:?}", self.cooldown);
            return Some(error);
        }
        None
    }

    /// Whether the next tick may run. Closes the breaker once the cooldown is over.
    pub fn can_execute(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled = self
                    .opened_at
                    .is_some_and(|opened| opened.elapsed() >= self.cooldown);
                if cooled {
                    log::info!("{} loop resuming after cooldown", self.name);
                    self.state = BreakerState::Closed;
                    self.consecutive_failures = 0;
                    self.opened_at = None;
                }
                cooled
            }
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Failures since the last success or reset
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
