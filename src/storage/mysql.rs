//! MySQL summary storage.
//!
//! `PersistenceManager` owns a fixed-size connection pool and lends out
//! connections with rollback-on-error semantics. `MySqlSummaryStore`
//! commits cached summaries through it as chunked multi-row upserts inside
//! one transaction.

use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::mysql::{MySqlConnection, MySqlPool, MySqlPoolOptions};
use sqlx::{Connection, MySql, QueryBuilder};

use crate::error::Result;
use crate::models::{DatabaseConfig, TrackedAircraft};
use crate::storage::{CommitBatch, CommitReport, SummaryStore};

/// Every column written by an upsert, in bind order.
const COLUMNS: [&str; 18] = [
    "hex",
    "flight",
    "alt_baro",
    "gs",
    "track",
    "baro_rate",
    "squawk",
    "category",
    "messages",
    "seen",
    "lat",
    "lon",
    "registration",
    "type_code",
    "long_type_name",
    "seen_count",
    "first_seen",
    "last_seen",
];

/// Columns overwritten with the incoming value when the row already exists.
const REFRESHED_COLUMNS: [&str; 14] = [
    "flight",
    "alt_baro",
    "gs",
    "track",
    "baro_rate",
    "squawk",
    "category",
    "messages",
    "seen",
    "lat",
    "lon",
    "registration",
    "type_code",
    "long_type_name",
];

/// `first_seen` is bound as UTC, so `last_seen` must not follow the session zone.
const LAST_SEEN: &str = "UTC_TIMESTAMP()";

/// Fixed-size MySQL connection pool.
#[derive(Debug, Clone)]
pub struct PersistenceManager {
    pool: MySqlPool,
}

impl PersistenceManager {
    /// Open the pool with exactly `pool_size` connections.
    ///
    /// Fails if the database is unreachable; there is no degraded mode.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .min_connections(config.pool_size)
            .max_connections(config.pool_size)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;

        log::info!(
            "Database connection pool initialized with {} connections",
            config.pool_size
        );
        Ok(Self { pool })
    }

    /// Run `op` on a pooled connection.
    ///
    /// If `op` fails a `ROLLBACK` is attempted and the original error is
    /// returned. The connection goes back to the pool either way.
    pub async fn with_connection<T, F>(&self, op: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut MySqlConnection) -> BoxFuture<'c, Result<T>>,
    {
        let mut conn = self.pool.acquire().await?;
        log::debug!("Database connection acquired from pool");

        match op(&mut *conn).await {
            Ok(value) => Ok(value),
            Err(e) => {
                match sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    Ok(_) => log::debug!("Database transaction rolled back due to error"),
                    Err(rollback) => log::debug!("Rollback after failed operation failed: {rollback}"),
                }
                Err(e)
            }
        }
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
        log::info!("Database connection pool closed");
    }
}

/// Summary store backed by a MySQL table.
#[derive(Debug, Clone)]
pub struct MySqlSummaryStore {
    manager: PersistenceManager,
    table: String,
    batch_size: usize,
    session_timeout_secs: u64,
}

impl MySqlSummaryStore {
    pub fn new(manager: PersistenceManager, config: &DatabaseConfig, batch_size: usize) -> Self {
        Self {
            manager,
            table: config.table.clone(),
            batch_size: batch_size.max(1),
            session_timeout_secs: config.session_timeout_secs,
        }
    }
}

#[async_trait]
impl SummaryStore for MySqlSummaryStore {
    async fn commit(&self, batch: &CommitBatch) -> Result<CommitReport> {
        let batch = batch.clone();
        let table = self.table.clone();
        let batch_size = self.batch_size;
        let session_timeout = self.session_timeout_secs;

        self.manager
            .with_connection(move |conn| {
                Box::pin(async move {
                    let session = format!(
                        "SET SESSION wait_timeout = {session_timeout}, interactive_timeout = {session_timeout}"
                    );
                    sqlx::query(&session).execute(&mut *conn).await?;

                    let mut tx = conn.begin().await?;
                    let mut rows_affected = 0;
                    for (records, new_sighting) in
                        [(&batch.new_sightings, true), (&batch.continuing, false)]
                    {
                        for chunk in records.chunks(batch_size) {
                            let mut upsert = build_upsert(&table, chunk, new_sighting);
                            rows_affected += upsert.build().execute(&mut *tx).await?.rows_affected();
                        }
                    }
                    tx.commit().await?;

                    log::info!(
                        "Committed {} new sightings and {} continuing aircraft ({} rows affected)",
                        batch.new_sightings.len(),
                        batch.continuing.len(),
                        rows_affected
                    );
                    Ok(CommitReport {
                        new_sightings: batch.new_sightings.len(),
                        continuing: batch.continuing.len(),
                        rows_affected,
                    })
                })
            })
            .await
    }

    async fn close(&self) {
        self.manager.close().await;
    }

    fn name(&self) -> &'static str {
        "mysql"
    }
}

/// Multi-row upsert for one chunk of summaries.
///
/// New sightings bump `seen_count` on an existing row; continuing
/// aircraft leave it as is. Both timestamps are UTC.
fn build_upsert(
    table: &str,
    chunk: &[TrackedAircraft],
    new_sighting: bool,
) -> QueryBuilder<'static, MySql> {
    let mut builder =
        QueryBuilder::<MySql>::new(format!("INSERT INTO `{table}` ({}) ", COLUMNS.join(", ")));

    builder.push_values(chunk, |mut row, aircraft| {
        let snapshot = &aircraft.snapshot;
        let registry = &aircraft.registry;
        row.push_bind(snapshot.hex.clone())
            .push_bind(snapshot.flight.clone())
            .push_bind(snapshot.alt_baro)
            .push_bind(snapshot.gs)
            .push_bind(snapshot.track)
            .push_bind(snapshot.baro_rate)
            .push_bind(snapshot.squawk.clone())
            .push_bind(snapshot.category.clone())
            .push_bind(snapshot.messages)
            .push_bind(snapshot.seen)
            .push_bind(snapshot.lat)
            .push_bind(snapshot.lon)
            .push_bind(registry.registration.clone())
            .push_bind(registry.type_code.clone())
            .push_bind(registry.long_type_name.clone())
            .push("1")
            .push_bind(aircraft.first_seen.naive_utc())
            .push(LAST_SEEN);
    });

    builder.push(" ON DUPLICATE KEY UPDATE ");
    {
        let mut updates = builder.separated(", ");
        for column in REFRESHED_COLUMNS {
            updates.push(format!("{column} = VALUES({column})"));
        }
        if new_sighting {
            updates.push("seen_count = seen_count + 1");
        }
        updates.push(format!("last_seen = {LAST_SEEN}"));
    }
    builder
}
