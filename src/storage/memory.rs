//! In-memory summary storage.
//!
//! Applies the same upsert rules as the MySQL table. Used for dry runs
//! and as the store in pipeline tests, where it can be told to fail the
//! next few commits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{AircraftSnapshot, RegistryRecord, TrackedAircraft};
use crate::storage::{CommitBatch, CommitReport, SummaryStore};

/// One persisted row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSummary {
    pub snapshot: AircraftSnapshot,
    pub registry: RegistryRecord,
    pub seen_count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemorySummaryStore {
    rows: Mutex<HashMap<String, StoredSummary>>,
    failures_remaining: AtomicU32,
    attempts: AtomicUsize,
}

impl MemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail without writing anything.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Commits attempted so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Pre-populate a row, as if written by an earlier run.
    pub fn seed(&self, row: StoredSummary) {
        self.lock().insert(row.snapshot.hex.clone(), row);
    }

    pub fn get(&self, hex: &str) -> Option<StoredSummary> {
        self.lock().get(hex).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn upsert(rows: &mut HashMap<String, StoredSummary>, aircraft: &TrackedAircraft, now: DateTime<Utc>) {
        match rows.get_mut(aircraft.hex()) {
            Some(row) => {
                row.snapshot = aircraft.snapshot.clone();
                row.registry = aircraft.registry.clone();
                if aircraft.is_new_sighting {
                    row.seen_count += 1;
                }
                row.last_seen = now;
            }
            None => {
                rows.insert(
                    aircraft.hex().to_string(),
                    StoredSummary {
                        snapshot: aircraft.snapshot.clone(),
                        registry: aircraft.registry.clone(),
                        seen_count: 1,
                        first_seen: aircraft.first_seen,
                        last_seen: now,
                    },
                );
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredSummary>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SummaryStore for MemorySummaryStore {
    async fn commit(&self, batch: &CommitBatch) -> Result<CommitReport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(sqlx::Error::PoolTimedOut.into());
        }

        let now = Utc::now();
        let mut rows = self.lock();
        for aircraft in batch.new_sightings.iter().chain(&batch.continuing) {
            Self::upsert(&mut rows, aircraft, now);
        }

        log::debug!(
            "Stored {} new sightings and {} continuing aircraft in memory",
            batch.new_sightings.len(),
            batch.continuing.len()
        );
        Ok(CommitReport {
            new_sightings: batch.new_sightings.len(),
            continuing: batch.continuing.len(),
            rows_affected: batch.len() as u64,
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
