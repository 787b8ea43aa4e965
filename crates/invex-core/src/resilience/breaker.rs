//! Consecutive-failure circuit breaker with a single half-open probe.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::VisionError;
use crate::models::config::VisionConfig;

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// One probe call is in flight.
    HalfOpen,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub is_open: bool,
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    last_failure: Option<DateTime<Utc>>,
}

impl Inner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            last_failure: None,
        }
    }
}

/// Guards a dependency that fails by timing out or refusing connections.
///
/// Opens after `failure_threshold` consecutive failures and rejects calls for
/// `cooldown`; then lets exactly one probe through. A successful probe closes
/// the circuit; a failed one reopens it for another cooldown.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner::closed()),
        }
    }

    pub fn from_config(config: &VisionConfig) -> Self {
        Self::new(config.failure_threshold, config.cooldown())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask to make a call. Returns `true` when the call is the half-open
    /// probe, which must end in `record_success`, `record_failure` or
    /// `release_probe`. Errs with `CircuitOpen` while the circuit is open and
    /// with `ProbeInFlight` while another probe is running.
    pub fn try_acquire(&self) -> Result<bool, VisionError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::HalfOpen => Err(VisionError::ProbeInFlight),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(self.cooldown);
                if elapsed >= self.cooldown {
                    info!("Circuit half-open, letting one probe through");
                    inner.state = CircuitState::HalfOpen;
                    Ok(true)
                } else {
                    Err(VisionError::CircuitOpen {
                        retry_in: self.cooldown - elapsed,
                    })
                }
            }
        }
    }

    /// Record a successful call: close the circuit and reset the count.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!("Circuit closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
    }

    /// Record a dependency failure.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Utc::now());

        match inner.state {
            CircuitState::HalfOpen => {
                warn!("Circuit probe failed, reopening for {:?}", self.cooldown);
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                warn!(
                    "Circuit opened after {} consecutive failures",
                    inner.failure_count
                );
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    /// End a probe whose outcome says nothing about the dependency's health.
    /// The circuit stays open and the next caller may probe again.
    pub fn release_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
        }
    }

    pub fn state(&self) -> CircuitBreakerState {
        let inner = self.lock();
        CircuitBreakerState {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure: inner.last_failure,
            is_open: inner.state != CircuitState::Closed,
            failure_threshold: self.failure_threshold,
            cooldown: self.cooldown,
        }
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        *self.lock() = Inner::closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const COOLDOWN: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, COOLDOWN);

        for _ in 0..2 {
            breaker.try_acquire().unwrap();
            breaker.record_failure();
        }
        assert!(!breaker.state().is_open);

        breaker.record_failure();
        let state = breaker.state();
        assert!(state.is_open);
        assert_eq!(state.failure_count, 3);
        assert!(state.last_failure.is_some());

        let err = breaker.try_acquire().unwrap_err();
        assert_eq!(err.to_string(), "circuit open, retry in 60 seconds");
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_after_cooldown() {
        let breaker = CircuitBreaker::new(1, COOLDOWN);
        breaker.record_failure();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(matches!(
            breaker.try_acquire(),
            Err(VisionError::CircuitOpen { retry_in }) if retry_in == Duration::from_secs(30)
        ));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(breaker.try_acquire().unwrap());
        assert_eq!(breaker.state().state, CircuitState::HalfOpen);
        // Only one probe at a time.
        let err = breaker.try_acquire().unwrap_err();
        assert!(matches!(err, VisionError::ProbeInFlight));
        assert_eq!(err.to_string(), "circuit half-open, probe in flight");

        breaker.record_success();
        let state = breaker.state();
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.failure_count, 0);
        assert!(!breaker.try_acquire().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens() {
        let breaker = CircuitBreaker::new(1, COOLDOWN);
        breaker.record_failure();
        tokio::time::advance(COOLDOWN).await;

        breaker.try_acquire().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state().state, CircuitState::Open);
        assert!(matches!(
            breaker.try_acquire(),
            Err(VisionError::CircuitOpen { retry_in }) if retry_in == COOLDOWN
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_probe_allows_another() {
        let breaker = CircuitBreaker::new(1, COOLDOWN);
        breaker.record_failure();
        tokio::time::advance(COOLDOWN).await;

        breaker.try_acquire().unwrap();
        breaker.release_probe();
        assert_eq!(breaker.state().state, CircuitState::Open);
        assert_eq!(breaker.state().failure_count, 1);
        breaker.try_acquire().unwrap();
    }

    #[test]
    fn test_success_resets_count() {
        let breaker = CircuitBreaker::new(3, COOLDOWN);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.state().failure_count, 0);

        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.state().is_open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let breaker = CircuitBreaker::new(1, COOLDOWN);
        breaker.record_failure();
        assert!(breaker.state().is_open);

        breaker.reset();
        let state = breaker.state();
        assert!(!state.is_open);
        assert_eq!(state.failure_count, 0);
        assert_eq!(state.last_failure, None);
    }
}
