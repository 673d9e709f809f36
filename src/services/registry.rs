// src/services/registry.rs

//! Registry dataset source.
//!
//! The registry is a semicolon-delimited text file keyed by ICAO hex:
//!
//! ```text
//! hex;registration;type_code;flags;long_type_name
//! A1B2C3;N123AB;B738;00;BOEING 737-800
//! ```

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::{AppError, Result};
use crate::models::{RegistryConfig, RegistryRecord};
use crate::utils::http;

/// Parsed registry: upper-case hex to record.
pub type RegistryMap = HashMap<String, RegistryRecord>;

static HEX_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-F]{6}$").expect("static regex is valid"));

/// Something that can produce the raw registry text.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Download the full dataset.
    async fn fetch(&self) -> Result<String>;

    /// Human-readable location, for logs.
    fn location(&self) -> &str;
}

/// Registry served over HTTP(S), or read from a local file.
#[derive(Debug, Clone)]
pub struct HttpRegistrySource {
    client: reqwest::Client,
    location: String,
}

impl HttpRegistrySource {
    pub fn new(config: &RegistryConfig, user_agent: &str) -> Result<Self> {
        Ok(Self {
            client: http::create_client(user_agent, config.timeout_secs)?,
            location: config.url.clone(),
        })
    }
}

#[async_trait]
impl RegistrySource for HttpRegistrySource {
    async fn fetch(&self) -> Result<String> {
        let text = if http::is_http(&self.location) {
            http::fetch_text(&self.client, &self.location).await?
        } else {
            tokio::fs::read_to_string(&self.location).await?
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::registry(format!(
                "empty registry response from {}",
                self.location
            )));
        }
        Ok(text.to_string())
    }

    fn location(&self) -> &str {
        &self.location
    }
}

/// Parse registry text, skipping malformed rows.
pub fn parse_registry(text: &str) -> RegistryMap {
    let mut records = RegistryMap::new();
    let mut rows = 0usize;

    for (row_num, line) in text.lines().enumerate() {
        rows += 1;
        let fields: Vec<&str> = line.split(';').collect();
        if fields.len() < 5 || fields[0].trim().is_empty() {
            continue;
        }

        let hex = fields[0].trim().to_uppercase();
        if !HEX_ID.is_match(&hex) {
            log::debug!("Invalid hex code format on row {}: {}", row_num + 1, hex);
            continue;
        }

        records.insert(
            hex,
            RegistryRecord {
                registration: non_empty(fields[1]),
                type_code: non_empty(fields[2]),
                long_type_name: non_empty(fields[4]),
            },
        );
    }

    log::info!(
        "Loaded {} aircraft records from {} registry rows",
        records.len(),
        rows
    );
    records
}

fn non_empty(field: &str) -> Option<String> {
    let field = field.trim();
    (!field.is_empty()).then(|| field.to_string())
}
