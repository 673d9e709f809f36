//! Service layer for the logger application.
//!
//! This module contains the external collaborators of the pipeline:
//! - Live feed reading (`JsonFeed`)
//! - Registry dataset download and parsing (`HttpRegistrySource`)
//! - Failure notifications (`LogNotifier`, `MailNotifier`)

pub mod feed;
pub mod notify;
pub mod registry;

pub use feed::{AircraftFeed, JsonFeed};
#[cfg(feature = "mail")]
pub use notify::MailNotifier;
pub use notify::{FailureReport, LogNotifier, Notifier};
pub use registry::{HttpRegistrySource, RegistryMap, RegistrySource, parse_registry};
