//! Aircraft data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};
use crate::utils::truncate_chars;

/// Maximum stored length of a registration.
pub const MAX_REGISTRATION_LEN: usize = 15;
/// Maximum stored length of an ICAO type code.
pub const MAX_TYPE_CODE_LEN: usize = 10;
/// Maximum stored length of a long type description.
pub const MAX_LONG_TYPE_NAME_LEN: usize = 100;

/// Telemetry fields that must hold numbers when present.
const NUMERIC_FIELDS: [&str; 8] = [
    "alt_baro",
    "gs",
    "track",
    "baro_rate",
    "messages",
    "seen",
    "lat",
    "lon",
];

/// One validated observation from the live feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AircraftSnapshot {
    /// ICAO 24-bit address as reported by the feed
    pub hex: String,
    pub flight: Option<String>,
    pub alt_baro: Option<f64>,
    pub gs: Option<f64>,
    pub track: Option<f64>,
    pub baro_rate: Option<f64>,
    pub squawk: Option<String>,
    pub category: Option<String>,
    pub messages: Option<f64>,
    pub seen: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl AircraftSnapshot {
    /// Create a snapshot carrying only an identifier.
    pub fn new(hex: impl Into<String>) -> Self {
        Self {
            hex: hex.into(),
            ..Self::default()
        }
    }

    /// Validate one raw feed entry.
    ///
    /// Rejects non-objects, a missing/empty/non-string `hex`, and any
    /// non-null numeric telemetry field holding something other than a number.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| AppError::validation("aircraft entry is not an object"))?;

        let hex = match obj.get("hex") {
            Some(Value::String(hex)) if !hex.is_empty() => hex.clone(),
            _ => return Err(AppError::validation("missing or non-string hex")),
        };

        for field in NUMERIC_FIELDS {
            match obj.get(field) {
                None | Some(Value::Null) | Some(Value::Number(_)) => {}
                Some(other) => {
                    return Err(AppError::validation(format!(
                        "invalid numeric field {field} in aircraft {hex}: {other}"
                    )));
                }
            }
        }

        Ok(Self {
            flight: string_field(obj, "flight"),
            alt_baro: number_field(obj, "alt_baro"),
            gs: number_field(obj, "gs"),
            track: number_field(obj, "track"),
            baro_rate: number_field(obj, "baro_rate"),
            squawk: string_field(obj, "squawk"),
            category: string_field(obj, "category"),
            messages: number_field(obj, "messages"),
            seen: number_field(obj, "seen"),
            lat: number_field(obj, "lat"),
            lon: number_field(obj, "lon"),
            hex,
        })
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn number_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key).and_then(Value::as_f64)
}

/// Descriptive attributes from the registry dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub registration: Option<String>,
    pub type_code: Option<String>,
    pub long_type_name: Option<String>,
}

impl RegistryRecord {
    /// Copy with every field cut down to its storage limit.
    pub fn truncated(&self) -> Self {
        Self {
            registration: truncate(&self.registration, MAX_REGISTRATION_LEN),
            type_code: truncate(&self.type_code, MAX_TYPE_CODE_LEN),
            long_type_name: truncate(&self.long_type_name, MAX_LONG_TYPE_NAME_LEN),
        }
    }
}

fn truncate(value: &Option<String>, max_chars: usize) -> Option<String> {
    value
        .as_deref()
        .map(|s| truncate_chars(s, max_chars).to_string())
}

/// The accumulating summary kept in the cache for one aircraft.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedAircraft {
    pub snapshot: AircraftSnapshot,
    pub registry: RegistryRecord,
    /// Set on first insertion, carried forward while cached
    pub first_seen: DateTime<Utc>,
    /// Absent from the previous cycle's observed set
    pub is_new_sighting: bool,
}

impl TrackedAircraft {
    pub fn hex(&self) -> &str {
        &self.snapshot.hex
    }
}
