//! The poll, enrich, cache and commit loop.
//!
//! One task drives cycles back to back. Each cycle reads the live feed,
//! merges the valid entries into the summary cache and commits the cache
//! when it is due. Source failures degrade to empty or stale data; only
//! exhausted commits and panics count as failed cycles.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;

use crate::cache::{RegistryCache, TtlCache};
use crate::error::{AppError, Result};
use crate::logging::LogFileManager;
use crate::models::{AircraftSnapshot, Config, TrackedAircraft};
use crate::pipeline::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::pipeline::commit::{CommitGate, CommitReason, RetryPolicy, commit_with_retry};
use crate::pipeline::shutdown::Shutdown;
use crate::pipeline::status::{CycleReport, HealthSnapshot, StatusEvent, StatusSender};
use crate::services::{AircraftFeed, FailureReport, Notifier};
use crate::storage::{CommitBatch, CommitReport, SummaryStore};

/// Loop timing taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub poll_interval: Duration,
    pub error_cooldown: Duration,
    pub health_interval_secs: u64,
    pub upload_interval: Duration,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.runtime.poll_interval_secs),
            error_cooldown: Duration::from_secs(config.runtime.error_cooldown_secs),
            health_interval_secs: config.runtime.health_interval_secs.max(1),
            upload_interval: Duration::from_secs(config.upload.interval_secs),
            cache_capacity: config.cache.max_size,
            cache_ttl: Duration::from_secs(config.cache.ttl_secs),
            retry: RetryPolicy::from_config(&config.upload),
        }
    }
}

pub struct Pipeline {
    settings: PipelineSettings,
    feed: Arc<dyn AircraftFeed>,
    feed_breaker: CircuitBreaker,
    registry: Arc<RegistryCache>,
    store: Arc<dyn SummaryStore>,
    notifier: Arc<dyn Notifier>,
    cache: TtlCache<String, TrackedAircraft>,
    previous: HashSet<String>,
    gate: CommitGate,
    log_manager: Option<LogFileManager>,
    status: Option<StatusSender>,
    cycle: u64,
    last_health_bucket: Option<i64>,
    commits_succeeded: u64,
    commits_failed: u64,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        feed: Arc<dyn AircraftFeed>,
        registry: Arc<RegistryCache>,
        store: Arc<dyn SummaryStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let settings = PipelineSettings::from_config(config);
        let feed_breaker = CircuitBreaker::with_config(
            "feed",
            CircuitBreakerConfig {
                failure_threshold: config.feed.breaker_threshold,
                timeout: Duration::from_secs(config.feed.breaker_timeout_secs),
            },
        );

        Self {
            feed,
            feed_breaker,
            registry,
            store,
            notifier,
            cache: TtlCache::new(settings.cache_capacity, settings.cache_ttl),
            previous: HashSet::new(),
            gate: CommitGate::new(settings.upload_interval, settings.cache_capacity),
            log_manager: None,
            status: None,
            cycle: 0,
            last_health_bucket: None,
            commits_succeeded: 0,
            commits_failed: 0,
            settings,
        }
    }

    /// Publish status events on `tx`.
    pub fn with_status(mut self, tx: StatusSender) -> Self {
        self.status = Some(tx);
        self
    }

    /// Truncate the log file whenever `manager` says it is due.
    pub fn with_log_manager(mut self, manager: LogFileManager) -> Self {
        self.log_manager = Some(manager);
        self
    }

    pub fn cache(&self) -> &TtlCache<String, TrackedAircraft> {
        &self.cache
    }

    /// Run cycles until shutdown, then make one final commit.
    pub async fn run(&mut self, shutdown: &mut Shutdown) {
        self.emit(StatusEvent::Started {
            feed: self.feed.location().to_string(),
            store: self.store.name(),
        });
        log::info!(
            "Polling {} every {}s",
            self.feed.location(),
            self.settings.poll_interval.as_secs()
        );

        while !shutdown.is_triggered() {
            let outcome = AssertUnwindSafe(self.run_cycle(shutdown))
                .catch_unwind()
                .await;

            let pause = match outcome {
                Ok(Ok(report)) => {
                    self.emit(StatusEvent::CycleCompleted(report));
                    self.settings.poll_interval
                }
                Ok(Err(e)) => {
                    log::error!("Cycle {} failed: {e}", self.cycle);
                    self.emit(StatusEvent::CycleFailed {
                        error: e.to_string(),
                    });
                    self.settings.error_cooldown
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    log::error!("Cycle {} panicked: {message}", self.cycle);
                    self.emit(StatusEvent::CycleFailed { error: message });
                    self.settings.error_cooldown
                }
            };

            if shutdown.sleep(pause).await {
                break;
            }
        }

        log::info!("Shutdown requested, performing final commit");
        self.final_commit().await;
        self.store.close().await;
        self.emit(StatusEvent::Stopped { cycles: self.cycle });
    }

    /// Run one fetch, merge and commit cycle.
    ///
    /// Fails only when a due commit exhausted its retries; the cache is
    /// kept for the next cycle in that case.
    pub async fn run_cycle(&mut self, shutdown: &mut Shutdown) -> Result<CycleReport> {
        self.cycle += 1;
        let mut report = CycleReport {
            cycle: self.cycle,
            ..CycleReport::default()
        };

        let entries = match self.feed_breaker.call(|| self.feed.fetch()).await {
            Ok(entries) => {
                report.feed_ok = true;
                entries
            }
            Err(e) if e.is_circuit_open() => {
                log::debug!("Skipping feed read: {e}");
                Vec::new()
            }
            Err(e) => {
                log::warn!("Failed to read aircraft feed {}: {e}", self.feed.location());
                Vec::new()
            }
        };
        report.fetched = entries.len();

        let mut observed = HashSet::with_capacity(entries.len());
        for entry in &entries {
            match AircraftSnapshot::from_value(entry) {
                Ok(snapshot) => {
                    if self.merge(snapshot, &mut observed).await {
                        report.new_sightings += 1;
                    }
                }
                Err(e) => {
                    report.rejected += 1;
                    log::debug!("Dropping invalid aircraft entry: {e}");
                }
            }
        }
        self.previous = observed;

        report.expired = self.cache.purge_expired();
        if report.expired > 0 {
            log::debug!("Expired {} idle aircraft from cache", report.expired);
        }

        self.maintain_log_file().await;

        let committed = match self.gate.reason(self.cache.len()) {
            Some(reason) => self.commit(reason, shutdown).await.map(|_| Some(reason)),
            None => Ok(None),
        };
        self.maybe_emit_health();

        report.committed = committed?;
        report.cached = self.cache.len();
        Ok(report)
    }

    /// Merge one snapshot into the cache. Returns whether it is a new sighting.
    async fn merge(&mut self, snapshot: AircraftSnapshot, observed: &mut HashSet<String>) -> bool {
        let hex = snapshot.hex.clone();
        let registry = self.registry.get_info(&hex).await.truncated();
        let first_seen = self
            .cache
            .get(&hex)
            .map(|cached| cached.first_seen)
            .unwrap_or_else(Utc::now);
        let is_new_sighting = !self.previous.contains(&hex);

        self.cache.put(
            hex.clone(),
            TrackedAircraft {
                snapshot,
                registry,
                first_seen,
                is_new_sighting,
            },
        );
        // Duplicate entries within one snapshot count once.
        observed.insert(hex) && is_new_sighting
    }

    /// Commit the current cache contents with retry.
    ///
    /// On success the new-sighting flags are cleared; on failure the
    /// notifier is told and the cache is left untouched.
    pub async fn commit(
        &mut self,
        reason: CommitReason,
        shutdown: &mut Shutdown,
    ) -> Result<CommitReport> {
        let batch = self.snapshot_batch();
        log::info!(
            "Committing {} aircraft ({reason}): {} new sightings, {} continuing",
            batch.len(),
            batch.new_sightings.len(),
            batch.continuing.len()
        );

        match commit_with_retry(self.store.as_ref(), &batch, self.settings.retry, shutdown).await {
            Ok(report) => {
                self.after_commit(reason, report);
                Ok(report)
            }
            Err(e) => {
                self.commits_failed += 1;
                let attempts = match &e {
                    AppError::Upload { attempts, .. } => *attempts,
                    _ => 1,
                };
                self.emit(StatusEvent::CommitFailed {
                    reason,
                    attempts,
                    pending: batch.len(),
                    error: e.to_string(),
                });
                if shutdown.is_triggered() {
                    log::warn!("Upload interrupted by shutdown, leaving it to the final commit");
                } else {
                    self.notifier
                        .notify(&FailureReport::new(
                            format!("Failed to upload summary: {e}"),
                            attempts,
                            batch.len(),
                        ))
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Single commit attempt over whatever is cached, bypassing the gate
    /// and the retry loop.
    pub async fn final_commit(&mut self) -> Option<CommitReport> {
        let batch = self.snapshot_batch();
        if batch.is_empty() {
            log::info!("No aircraft summary data to upload");
            return None;
        }

        match self.store.commit(&batch).await {
            Ok(report) => {
                self.after_commit(CommitReason::Shutdown, report);
                log::info!("Final commit stored {} aircraft", batch.len());
                Some(report)
            }
            Err(e) => {
                self.commits_failed += 1;
                log::error!("Final commit failed, {} aircraft not stored: {e}", batch.len());
                self.emit(StatusEvent::CommitFailed {
                    reason: CommitReason::Shutdown,
                    attempts: 1,
                    pending: batch.len(),
                    error: e.to_string(),
                });
                self.notifier
                    .notify(&FailureReport::new(
                        format!("Final summary upload failed: {e}"),
                        1,
                        batch.len(),
                    ))
                    .await;
                None
            }
        }
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            at: Utc::now(),
            cached_aircraft: self.cache.len(),
            cache_capacity: self.cache.capacity(),
            registry: self.registry.stats(),
            feed_breaker: self.feed_breaker.snapshot(),
            registry_breaker: self.registry.breaker_snapshot(),
            secs_since_last_commit: self.gate.last_commit().map(|at| at.elapsed().as_secs()),
            commits_succeeded: self.commits_succeeded,
            commits_failed: self.commits_failed,
            log_cleanup: self.log_manager.as_ref().map(LogFileManager::status),
        }
    }

    fn snapshot_batch(&self) -> CommitBatch {
        CommitBatch::partition(self.cache.items().into_iter().map(|(_, aircraft)| aircraft))
    }

    fn after_commit(&mut self, reason: CommitReason, report: CommitReport) {
        self.gate.record_success();
        self.commits_succeeded += 1;
        self.cache
            .update_all(|_, aircraft| aircraft.is_new_sighting = false);
        self.emit(StatusEvent::CommitSucceeded { reason, report });
    }

    async fn maintain_log_file(&mut self) {
        let Some(manager) = self.log_manager.as_mut() else {
            return;
        };
        if !manager.should_cleanup().await {
            return;
        }
        match manager.cleanup().await {
            Ok(freed) => log::info!(
                "Log file {} cleaned up ({freed} bytes dropped)",
                manager.path().display()
            ),
            Err(e) => log::error!("Failed to clean up log file: {e}"),
        }
    }

    /// Emit a health snapshot once per wall-clock bucket.
    fn maybe_emit_health(&mut self) {
        let bucket = Utc::now().timestamp() / self.settings.health_interval_secs as i64;
        if self.last_health_bucket == Some(bucket) {
            return;
        }
        self.last_health_bucket = Some(bucket);
        let snapshot = self.health_snapshot();
        self.emit(StatusEvent::Health(snapshot));
    }

    fn emit(&self, event: StatusEvent) {
        if let Some(tx) = &self.status {
            let _ = tx.send(event);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
