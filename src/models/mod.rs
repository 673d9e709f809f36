// src/models/mod.rs

//! Domain models for the logger application.
//!
//! This module contains the data structures shared across the pipeline,
//! organized by their primary purpose.

mod aircraft;
mod config;

// Re-export all public types
pub use aircraft::{
    AircraftSnapshot, MAX_LONG_TYPE_NAME_LEN, MAX_REGISTRATION_LEN, MAX_TYPE_CODE_LEN,
    RegistryRecord, TrackedAircraft,
};
pub use config::{
    CacheConfig, Config, DatabaseConfig, FeedConfig, LoggingConfig, MailConfig, RegistryConfig,
    RuntimeConfig, UploadConfig,
};
