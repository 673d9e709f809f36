//! Status events published by the pipeline.
//!
//! Events go out over an unbounded channel so publishing never blocks or
//! fails the loop. A closed or absent receiver is ignored.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::cache::RegistryStats;
use crate::logging::LogCleanupStatus;
use crate::pipeline::circuit_breaker::BreakerSnapshot;
use crate::pipeline::commit::CommitReason;
use crate::storage::CommitReport;

pub type StatusSender = mpsc::UnboundedSender<StatusEvent>;
pub type StatusReceiver = mpsc::UnboundedReceiver<StatusEvent>;

pub fn channel() -> (StatusSender, StatusReceiver) {
    mpsc::unbounded_channel()
}

/// Counters for one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    /// Entries returned by the feed
    pub fetched: usize,
    /// Entries dropped by validation
    pub rejected: usize,
    /// Valid entries absent from the previous cycle
    pub new_sightings: usize,
    /// Entries removed by TTL expiry
    pub expired: usize,
    /// Cache size after the cycle
    pub cached: usize,
    /// Whether the feed read succeeded
    pub feed_ok: bool,
    pub committed: Option<CommitReason>,
}

/// Periodic health summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub at: DateTime<Utc>,
    pub cached_aircraft: usize,
    pub cache_capacity: usize,
    pub registry: RegistryStats,
    pub feed_breaker: BreakerSnapshot,
    pub registry_breaker: BreakerSnapshot,
    pub secs_since_last_commit: Option<u64>,
    pub commits_succeeded: u64,
    pub commits_failed: u64,
    pub log_cleanup: Option<LogCleanupStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    Started {
        feed: String,
        store: &'static str,
    },
    CycleCompleted(CycleReport),
    CommitSucceeded {
        reason: CommitReason,
        report: CommitReport,
    },
    CommitFailed {
        reason: CommitReason,
        attempts: u32,
        pending: usize,
        error: String,
    },
    Health(HealthSnapshot),
    CycleFailed {
        error: String,
    },
    Stopped {
        cycles: u64,
    },
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { feed, store } => {
                write!(f, "Logger started: feed {feed}, store {store}")
            }
            Self::CycleCompleted(r) => write!(
                f,
                "Cycle {}: {} aircraft ({} new, {} rejected), {} cached, {} expired{}",
                r.cycle,
                r.fetched - r.rejected,
                r.new_sightings,
                r.rejected,
                r.cached,
                r.expired,
                if r.feed_ok { "" } else { " [feed unavailable]" }
            ),
            Self::CommitSucceeded { reason, report } => write!(
                f,
                "Commit ({reason}) succeeded: {} new sightings, {} continuing",
                report.new_sightings, report.continuing
            ),
            Self::CommitFailed {
                reason,
                attempts,
                pending,
                error,
            } => write!(
                f,
                "Commit ({reason}) failed after {attempts} attempts, {pending} aircraft retained: {error}"
            ),
            Self::Health(h) => write!(
                f,
                "Health: {}/{} cached, registry {} records, feed breaker {:?}, registry breaker {:?}, commits {} ok / {} failed",
                h.cached_aircraft,
                h.cache_capacity,
                h.registry.total_aircraft,
                h.feed_breaker.state,
                h.registry_breaker.state,
                h.commits_succeeded,
                h.commits_failed
            ),
            Self::CycleFailed { error } => write!(f, "Cycle failed: {error}"),
            Self::Stopped { cycles } => write!(f, "Logger stopped after {cycles} cycles"),
        }
    }
}
