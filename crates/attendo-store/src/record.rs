//! Employee record and attendance timestamp handling.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Format used when writing `last_attendance_time`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date-time layouts accepted when reading `last_attendance_time`.
const DATETIME_FORMATS: [&str; 3] = [TIMESTAMP_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// One enrolled employee as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeRecord {
    /// Store key; taken from the roster map key on import.
    #[serde(default)]
    pub identity: String,
    pub name: String,
    #[serde(default)]
    pub major: String,
    #[serde(default)]
    pub starting_year: Option<i64>,
    #[serde(default)]
    pub total_attendance: u32,
    #[serde(default = "default_standing")]
    pub standing: String,
    #[serde(default)]
    pub year: Option<i64>,
    /// Raw store value; `None` if the employee was never marked.
    #[serde(default)]
    pub last_attendance_time: Option<String>,
}

fn default_standing() -> String {
    "G".to_string()
}

impl EmployeeRecord {
    pub fn new(identity: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            name: name.into(),
            major: String::new(),
            starting_year: None,
            total_attendance: 0,
            standing: default_standing(),
            year: None,
            last_attendance_time: None,
        }
    }
}

/// Parse a stored attendance timestamp in any of the accepted layouts.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}
