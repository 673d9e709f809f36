//! Circuit Breaker pattern implementation.
//!
//! Guards a fallible external call (live feed, registry download) and fails
//! fast while the dependency is known to be down.
//!
//! ## States
//!
//! ```text
//! CLOSED --threshold failures--> OPEN --timeout elapsed--> HALF_OPEN
//!    ^                                                        |
//!    +------------------------- success ----------------------+
//!                     (failure in HALF_OPEN re-opens)
//! ```

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::{AppError, Result};

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open after the last failure
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// Calls pass through
    Closed,
    /// Calls fail fast
    Open,
    /// One trial call is allowed
    HalfOpen,
}

/// Point-in-time view of a breaker, for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub secs_since_last_failure: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker around a single dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom configuration.
    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `op` through the breaker.
    ///
    /// Fails with [`AppError::CircuitOpen`] without calling `op` while the
    /// circuit is open. Errors from `op` are recorded and returned unchanged.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut trial = TrialGuard {
            breaker: self,
            armed: self.before_call()?,
        };
        let result = op().await;
        trial.armed = false;

        match result {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(error) => {
                self.on_failure();
                Err(error)
            }
        }
    }

    /// Current state, without forcing any transition.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Serializable view for health reporting.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            secs_since_last_failure: inner.last_failure.map(|at| at.elapsed().as_secs()),
        }
    }

    /// Admit a call. Returns whether it is the HALF_OPEN trial.
    fn before_call(&self) -> Result<bool> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(false),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.timeout);
                if elapsed >= self.config.timeout {
                    log::info!("Circuit breaker '{}': OPEN -> HALF_OPEN", self.name);
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(true)
                } else {
                    Err(self.open_error(&inner, self.config.timeout - elapsed))
                }
            }
            BreakerState::HalfOpen if inner.trial_in_flight => {
                Err(self.open_error(&inner, Duration::ZERO))
            }
            BreakerState::HalfOpen => {
                inner.trial_in_flight = true;
                Ok(true)
            }
        }
    }

    /// The trial call panicked or was dropped before finishing.
    fn abandon_trial(&self) {
        let mut inner = self.lock();
        if !inner.trial_in_flight {
            return;
        }
        log::warn!(
            "Circuit breaker '{}': trial call abandoned, back to OPEN",
            self.name
        );
        inner.trial_in_flight = false;
        inner.last_failure = Some(Instant::now());
        inner.state = BreakerState::Open;
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state != BreakerState::Closed {
            log::info!("Circuit breaker '{}': recovered, CLOSED", self.name);
        }
        inner.failure_count = 0;
        inner.state = BreakerState::Closed;
        inner.trial_in_flight = false;
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        inner.trial_in_flight = false;
        if inner.failure_count >= self.config.failure_threshold {
            if inner.state != BreakerState::Open {
                log::warn!(
                    "Circuit breaker '{}': OPEN after {} failures ({}s timeout)",
                    self.name,
                    inner.failure_count,
                    self.config.timeout.as_secs()
                );
            }
            inner.state = BreakerState::Open;
        }
    }

    fn open_error(&self, inner: &Inner, remaining: Duration) -> AppError {
        AppError::CircuitOpen {
            name: self.name.clone(),
            failures: inner.failure_count,
            retry_in_secs: remaining.as_secs_f64().ceil() as u64,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reopens the circuit if a HALF_OPEN trial never reports an outcome.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_trial();
        }
    }
}
