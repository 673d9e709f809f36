//! In-memory caches used by the pipeline.
//!
//! - `TtlCache`: bounded, expiring store of tracked aircraft awaiting commit
//! - `RegistryCache`: read-through cache over the registry dataset

pub mod registry;
pub mod ttl;

pub use registry::{RegistryCache, RegistryStats};
pub use ttl::TtlCache;
