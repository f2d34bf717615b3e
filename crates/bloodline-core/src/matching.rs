//! Hospital worklist: pending requests ranked for triage.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::EngineConfig;
use crate::db::{Database, DbError};
use crate::models::{BloodGroup, EmergencyRequest};

/// Matching errors.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Invalid query: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

pub type MatchResult<T> = Result<T, MatchError>;

/// Worklist filter. `city` and `blood_group` must match exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyQuery {
    pub city: String,
    pub blood_group: BloodGroup,
    /// `None` uses the configured default
    pub limit: Option<u32>,
}

impl NearbyQuery {
    pub fn new(city: impl Into<String>, blood_group: BloodGroup) -> Self {
        Self {
            city: city.into(),
            blood_group,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Read-only ranking of pending requests.
pub struct Matcher<'a> {
    db: &'a Database,
    config: &'a EngineConfig,
}

impl<'a> Matcher<'a> {
    pub fn new(db: &'a Database, config: &'a EngineConfig) -> Self {
        Self { db, config }
    }

    /// Pending requests in the city for the blood group: critical first,
    /// then oldest first within an urgency level.
    pub fn find_nearby(&self, query: &NearbyQuery) -> MatchResult<Vec<EmergencyRequest>> {
        let city = query.city.trim();
        if city.is_empty() {
            return Err(MatchError::Validation("city is required".into()));
        }
        let limit = self
            .config
            .resolve_limit(query.limit)
            .ok_or_else(|| MatchError::Validation("limit must be positive".into()))?;

        let requests = self
            .db
            .list_pending_requests(city, query.blood_group, limit)?;
        debug!(
            city,
            blood_group = %query.blood_group,
            limit,
            found = requests.len(),
            "Worklist query"
        );
        Ok(requests)
    }
}
