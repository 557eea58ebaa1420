//! Per-source circuit breaker.
//!
//! Owned by the source's collector task, so it needs no locking. Only
//! `SourceUnavailable` outcomes count as failures; after
//! `failure_threshold` consecutive failures the breaker opens for the
//! cooldown, then lets a single probe through (half-open).

use std::time::Duration;

use cflow_core::BreakerConfig;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    state: BreakerState,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            cooldown: Duration::from_secs(config.cooldown_secs),
            consecutive_failures: 0,
            state: BreakerState::Closed,
        }
    }

    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// `Ok` if a call may proceed at `now`, otherwise the remaining cooldown.
    ///
    /// # Errors
    ///
    /// Returns the time left until the breaker half-opens.
    pub fn check(&mut self, now: Instant) -> Result<(), Duration> {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open { until } if now >= until => {
                self.state = BreakerState::HalfOpen;
                Ok(())
            }
            BreakerState::Open { until } => Err(until - now),
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = BreakerState::Closed;
    }

    /// Record a `SourceUnavailable` outcome. Returns `true` if this opened
    /// the breaker.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let trip = matches!(self.state, BreakerState::HalfOpen)
            || self.consecutive_failures >= self.failure_threshold;
        if trip {
            self.state = BreakerState::Open {
                until: now + self.cooldown,
            };
        }
        trip
    }
}
