// src/lib.rs

//! ADS-B summary logger library.
//!
//! Polls a live `aircraft.json` feed, enriches each aircraft from a registry
//! dataset, accumulates per-aircraft summaries in a TTL cache and commits
//! them to MySQL on a schedule.

pub mod cache;
pub mod error;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
