//! Read-through cache over the registry dataset.
//!
//! The whole map is swapped on a successful refresh and kept on failure,
//! so lookups always see either the old or the new dataset. The download
//! runs outside the data lock; callers arriving while a refresh is in
//! flight read the current (possibly stale or empty) data instead of
//! waiting or starting a second download.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::models::RegistryRecord;
use crate::pipeline::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig};
use crate::services::registry::{RegistryMap, RegistrySource, parse_registry};

#[derive(Debug, Default)]
struct RegistryData {
    records: Arc<RegistryMap>,
    loaded_at: Option<Instant>,
}

/// Registry size and freshness.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStats {
    pub total_aircraft: usize,
    pub age_secs: Option<u64>,
}

/// Clears the in-flight flag when the refresh finishes, however it ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RegistryCache {
    source: Arc<dyn RegistrySource>,
    breaker: CircuitBreaker,
    ttl: Duration,
    data: Mutex<RegistryData>,
    refreshing: AtomicBool,
}

impl RegistryCache {
    pub fn new(
        source: Arc<dyn RegistrySource>,
        ttl: Duration,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            source,
            breaker: CircuitBreaker::with_config("registry", breaker_config),
            ttl,
            data: Mutex::new(RegistryData::default()),
            refreshing: AtomicBool::new(false),
        }
    }

    /// Registry record for `hex`, refreshing the dataset first if it is stale.
    ///
    /// Always returns an owned copy; unknown or empty identifiers yield an
    /// all-absent record.
    pub async fn get_info(&self, hex: &str) -> RegistryRecord {
        if hex.is_empty() {
            return RegistryRecord::default();
        }

        if self.needs_refresh() {
            self.refresh().await;
        }

        let key = hex.to_uppercase();
        self.lock().records.get(&key).cloned().unwrap_or_default()
    }

    pub fn stats(&self) -> RegistryStats {
        let data = self.lock();
        RegistryStats {
            total_aircraft: data.records.len(),
            age_secs: data.loaded_at.map(|at| at.elapsed().as_secs()),
        }
    }

    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    fn needs_refresh(&self) -> bool {
        let data = self.lock();
        data.records.is_empty()
            || data
                .loaded_at
                .is_none_or(|at| at.elapsed() > self.ttl)
    }

    async fn refresh(&self) {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("Registry refresh already in progress, using existing data");
            return;
        }
        let _guard = RefreshGuard(&self.refreshing);

        log::debug!("Refreshing aircraft registry from {}", self.source.location());
        let result = self
            .breaker
            .call(|| async { self.source.fetch().await.map(|text| parse_registry(&text)) })
            .await;

        match result {
            Ok(records) if !records.is_empty() => {
                let mut data = self.lock();
                data.records = Arc::new(records);
                data.loaded_at = Some(Instant::now());
                log::debug!("Aircraft registry refreshed ({} records)", data.records.len());
            }
            Ok(_) => {
                log::warn!("Registry contained no valid rows, keeping existing data");
            }
            Err(e) => {
                log::warn!("Failed to refresh aircraft registry, keeping existing data: {e}");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::error::{AppError, Result};

    const DATA_V1: &str = "A1B2C3;N123AB;B738;00;BOEING 737-800\n";
    const DATA_V2: &str = "A1B2C3;N999ZZ;B39M;00;BOEING 737 MAX 9\n";

    /// Serves scripted responses in order; the last one repeats.
    struct ScriptedSource {
        responses: Mutex<Vec<Result<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RegistrySource for ScriptedSource {
        async fn fetch(&self) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            let next = if responses.len() > 1 {
                responses.remove(0)
            } else {
                match &responses[0] {
                    Ok(text) => Ok(text.clone()),
                    Err(_) => Err(AppError::registry("down")),
                }
            };
            next
        }

        fn location(&self) -> &str {
            "scripted"
        }
    }

    fn cache_with(source: Arc<dyn RegistrySource>, threshold: u32) -> RegistryCache {
        RegistryCache::new(
            source,
            Duration::from_secs(3600),
            CircuitBreakerConfig {
                failure_threshold: threshold,
                timeout: Duration::from_secs(300),
            },
        )
    }

    #[tokio::test]
    async fn test_empty_hex_skips_lookup() {
        let source = ScriptedSource::new(vec![Ok(DATA_V1.to_string())]);
        let cache = cache_with(source.clone(), 3);

        assert_eq!(cache.get_info("").await, RegistryRecord::default());
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let source = ScriptedSource::new(vec![Ok(DATA_V1.to_string())]);
        let cache = cache_with(source.clone(), 3);

        let record = cache.get_info("a1b2c3").await;
        assert_eq!(record.registration.as_deref(), Some("N123AB"));
        assert_eq!(cache.get_info("ffffff").await, RegistryRecord::default());
        assert_eq!(source.calls(), 1);
        assert_eq!(cache.stats().total_aircraft, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_after_ttl() {
        let source = ScriptedSource::new(vec![Ok(DATA_V1.to_string()), Ok(DATA_V2.to_string())]);
        let cache = cache_with(source.clone(), 3);

        assert_eq!(
            cache.get_info("A1B2C3").await.registration.as_deref(),
            Some("N123AB")
        );
        tokio::time::advance(Duration::from_secs(1800)).await;
        assert_eq!(
            cache.get_info("A1B2C3").await.registration.as_deref(),
            Some("N123AB")
        );
        assert_eq!(source.calls(), 1);

        tokio::time::advance(Duration::from_secs(1801)).await;
        assert_eq!(
            cache.get_info("A1B2C3").await.registration.as_deref(),
            Some("N999ZZ")
        );
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_old_data() {
        let source = ScriptedSource::new(vec![
            Ok(DATA_V1.to_string()),
            Err(AppError::registry("down")),
        ]);
        let cache = cache_with(source.clone(), 3);

        cache.get_info("A1B2C3").await;
        tokio::time::advance(Duration::from_secs(3601)).await;

        let record = cache.get_info("A1B2C3").await;
        assert_eq!(record.registration.as_deref(), Some("N123AB"));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_breaker_stops_repeated_downloads() {
        let source = ScriptedSource::new(vec![Err(AppError::registry("down"))]);
        let cache = cache_with(source.clone(), 2);

        for _ in 0..5 {
            assert_eq!(cache.get_info("A1B2C3").await, RegistryRecord::default());
        }
        assert_eq!(source.calls(), 2);
        assert_eq!(
            cache.breaker_snapshot().state,
            crate::pipeline::circuit_breaker::BreakerState::Open
        );
    }

    /// Blocks inside `fetch` until released.
    struct GatedSource {
        gate: Arc<Notify>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RegistrySource for GatedSource {
        async fn fetch(&self) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(DATA_V1.to_string())
        }

        fn location(&self) -> &str {
            "gated"
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_use_stale_data_during_refresh() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(GatedSource {
            gate: gate.clone(),
            calls: AtomicUsize::new(0),
        });
        let cache = cache_with(source.clone(), 3);

        let (first, second) = tokio::join!(cache.get_info("A1B2C3"), async {
            let record = cache.get_info("A1B2C3").await;
            gate.notify_one();
            record
        });

        assert_eq!(first.registration.as_deref(), Some("N123AB"));
        assert_eq!(second, RegistryRecord::default());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
