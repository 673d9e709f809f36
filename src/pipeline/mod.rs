//! Reconciliation pipeline and its building blocks.
//!
//! - `circuit_breaker`: fail-fast guard around the feed and registry
//! - `reconcile`: the poll, enrich, cache and commit loop
//! - `commit`: commit scheduling and bounded retry
//! - `shutdown`: cooperative shutdown flag
//! - `status`: events published for presentation layers

pub mod circuit_breaker;
pub mod commit;
pub mod reconcile;
pub mod shutdown;
pub mod status;

pub use circuit_breaker::{BreakerSnapshot, BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use commit::{CommitGate, CommitReason, RetryPolicy};
pub use reconcile::{Pipeline, PipelineSettings};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use status::{CycleReport, HealthSnapshot, StatusEvent, StatusReceiver, StatusSender};
