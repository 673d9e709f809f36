//! Storage abstractions for aircraft summary persistence.
//!
//! A commit writes the cached summaries in two groups that share one
//! upsert shape and differ only in how an existing row's counter moves:
//!
//! ```text
//! new sightings  -> insert (seen_count = 1) | update, seen_count + 1
//! continuing     -> insert (seen_count = 1) | update, seen_count unchanged
//! ```
//!
//! Updates never touch `first_seen` and always refresh `last_seen`.

pub mod memory;
pub mod mysql;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::TrackedAircraft;

// Re-export for convenience
pub use memory::{MemorySummaryStore, StoredSummary};
pub use mysql::{MySqlSummaryStore, PersistenceManager};

/// Cache contents split by sighting kind, ready to be written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitBatch {
    /// Aircraft absent from the previous cycle
    pub new_sightings: Vec<TrackedAircraft>,
    /// Aircraft carried over from the previous cycle
    pub continuing: Vec<TrackedAircraft>,
}

impl CommitBatch {
    pub fn partition(items: impl IntoIterator<Item = TrackedAircraft>) -> Self {
        let (new_sightings, continuing) = items.into_iter().partition(|a| a.is_new_sighting);
        Self {
            new_sightings,
            continuing,
        }
    }

    pub fn len(&self) -> usize {
        self.new_sightings.len() + self.continuing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.new_sightings.is_empty() && self.continuing.is_empty()
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub new_sightings: usize,
    pub continuing: usize,
    /// Rows reported affected by the backend
    pub rows_affected: u64,
}

/// Trait for summary storage backends.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Write one batch atomically: either every record lands or none does.
    async fn commit(&self, batch: &CommitBatch) -> Result<CommitReport>;

    /// Release backend resources at shutdown.
    async fn close(&self) {}

    /// Backend name, for logs.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::{AircraftSnapshot, RegistryRecord};

    fn tracked(hex: &str, is_new_sighting: bool) -> TrackedAircraft {
        TrackedAircraft {
            snapshot: AircraftSnapshot::new(hex),
            registry: RegistryRecord::default(),
            first_seen: Utc::now(),
            is_new_sighting,
        }
    }

    #[test]
    fn test_partition_by_sighting() {
        let batch = CommitBatch::partition(vec![
            tracked("aaaaaa", true),
            tracked("bbbbbb", false),
            tracked("cccccc", true),
        ]);

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.new_sightings.len(), 2);
        assert_eq!(batch.continuing[0].hex(), "bbbbbb");
        assert!(CommitBatch::default().is_empty());
    }
}
