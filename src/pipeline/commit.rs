//! Commit scheduling and bounded retry.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::models::UploadConfig;
use crate::pipeline::shutdown::Shutdown;
use crate::storage::{CommitBatch, CommitReport, SummaryStore};

/// Why a commit was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitReason {
    /// First commit since startup
    Baseline,
    /// Cache reached capacity
    CacheFull,
    /// Upload interval elapsed
    Interval,
    /// Final commit before exit
    Shutdown,
}

impl fmt::Display for CommitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Baseline => "baseline",
            Self::CacheFull => "cache full",
            Self::Interval => "interval",
            Self::Shutdown => "shutdown",
        })
    }
}

/// Decides when the cache is due for a commit.
#[derive(Debug)]
pub struct CommitGate {
    interval: Duration,
    capacity: usize,
    last_commit: Option<Instant>,
    started: Instant,
}

impl CommitGate {
    pub fn new(interval: Duration, capacity: usize) -> Self {
        Self {
            interval,
            capacity,
            last_commit: None,
            started: Instant::now(),
        }
    }

    /// Reason to commit `cached` entries now, if any.
    pub fn reason(&self, cached: usize) -> Option<CommitReason> {
        if cached == 0 {
            return None;
        }
        if self.last_commit.is_none() {
            return Some(CommitReason::Baseline);
        }
        if cached >= self.capacity {
            return Some(CommitReason::CacheFull);
        }
        if self.since_last_commit() >= self.interval {
            return Some(CommitReason::Interval);
        }
        None
    }

    pub fn record_success(&mut self) {
        self.last_commit = Some(Instant::now());
    }

    pub fn last_commit(&self) -> Option<Instant> {
        self.last_commit
    }

    fn since_last_commit(&self) -> Duration {
        self.last_commit.unwrap_or(self.started).elapsed()
    }
}

/// Fixed-delay retry policy for commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: Duration::from_secs(config.retry_delay_secs),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Commit `batch`, retrying the whole transaction on failure.
///
/// Gives up with [`AppError::Upload`] after `1 + max_retries` attempts, or
/// early if shutdown interrupts a retry delay.
pub async fn commit_with_retry(
    store: &dyn SummaryStore,
    batch: &CommitBatch,
    policy: RetryPolicy,
    shutdown: &mut Shutdown,
) -> Result<CommitReport> {
    let mut attempt = 1;
    loop {
        match store.commit(batch).await {
            Ok(report) => return Ok(report),
            Err(e) => {
                log::error!(
                    "Database operation failed (attempt {attempt}/{}): {e}",
                    policy.max_attempts()
                );
                let give_up = |message: String| AppError::Upload {
                    attempts: attempt,
                    message,
                };

                if attempt >= policy.max_attempts() {
                    return Err(give_up(e.to_string()));
                }
                log::info!(
                    "Retrying summary upload in {}s ({attempt}/{})",
                    policy.delay.as_secs(),
                    policy.max_retries
                );
                if shutdown.sleep(policy.delay).await {
                    log::warn!("Shutdown requested, abandoning upload retries");
                    return Err(give_up(e.to_string()));
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::{AircraftSnapshot, RegistryRecord, TrackedAircraft};
    use crate::pipeline::shutdown;
    use crate::storage::MemorySummaryStore;

    fn batch() -> CommitBatch {
        CommitBatch::partition(vec![TrackedAircraft {
            snapshot: AircraftSnapshot::new("a1b2c3"),
            registry: RegistryRecord::default(),
            first_seen: Utc::now(),
            is_new_sighting: true,
        }])
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            delay: Duration::from_secs(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_reasons() {
        let mut gate = CommitGate::new(Duration::from_secs(300), 3);
        assert_eq!(gate.reason(0), None);
        assert_eq!(gate.reason(1), Some(CommitReason::Baseline));

        gate.record_success();
        assert!(gate.last_commit().is_some());
        assert_eq!(gate.reason(0), None);
        assert_eq!(gate.reason(2), None);
        assert_eq!(gate.reason(3), Some(CommitReason::CacheFull));

        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(gate.reason(1), Some(CommitReason::Interval));
        assert_eq!(gate.reason(0), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers() {
        let store = MemorySummaryStore::new();
        store.fail_next(2);
        let (_trigger, mut shutdown) = shutdown::channel();

        let started = Instant::now();
        let report = commit_with_retry(&store, &batch(), policy(), &mut shutdown)
            .await
            .unwrap();

        assert_eq!(report.new_sightings, 1);
        assert_eq!(store.attempts(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion() {
        let store = MemorySummaryStore::new();
        store.fail_next(10);
        let (_trigger, mut shutdown) = shutdown::channel();

        let err = commit_with_retry(&store, &batch(), policy(), &mut shutdown)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Upload { attempts: 4, .. }));
        assert_eq!(store.attempts(), 4);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_retrying() {
        let store = MemorySummaryStore::new();
        store.fail_next(10);
        let (trigger, mut shutdown) = shutdown::channel();
        trigger.trigger();

        let err = commit_with_retry(&store, &batch(), policy(), &mut shutdown)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Upload { attempts: 1, .. }));
        assert_eq!(store.attempts(), 1);
    }
}
