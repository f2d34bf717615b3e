//! Domain models for the bloodline allocation core.

mod actor;
mod blood;
mod inventory;
mod request;
mod transition;

pub use actor::*;
pub use blood::*;
pub use inventory::*;
pub use request::*;
pub use transition::*;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

/// Errors raised while parsing or validating model values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("unknown blood group: {0}")]
    UnknownBloodGroup(String),

    #[error("unknown urgency level: {0}")]
    UnknownUrgency(String),

    #[error("unknown request status: {0}")]
    UnknownStatus(String),

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("invalid timestamp {value}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("{field} {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Format a UTC instant as a fixed-width RFC 3339 string.
///
/// Every stored timestamp goes through here so that lexical order in SQL
/// matches chronological order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time in stored form.
pub fn now() -> String {
    timestamp(Utc::now())
}

/// Parse any RFC 3339 timestamp and normalize it to stored form.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ModelError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ModelError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}
