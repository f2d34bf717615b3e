//! Allocation engine: the only writer of request status and inventory units.
//!
//! Two-phase flow:
//!
//! ```text
//! accept(request, hospital)             fulfill(request, hospital)
//!   read request   (must be pending)      read request   (accepted by hospital)
//!   read stock     (units, expiry)        re-read stock  (units)
//!   CAS pending -> accepted               debit stock    (conditional)
//!                                         CAS accepted -> fulfilled
//! ```
//!
//! Accept only reads stock; nothing is reserved until fulfill commits.
//! Every operation runs in one `BEGIN IMMEDIATE` transaction, so a failure
//! at any step leaves both tables untouched.

mod lifecycle;
mod stock;

use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::db::{Database, DbError};
use crate::models::{BloodGroup, ModelError, RequestStatus};

/// Allocation errors. Every variant is recoverable by the caller.
#[derive(Error, Debug)]
pub enum AllocationError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cannot {action} request {request_id}: it is {actual}")]
    InvalidState {
        request_id: String,
        action: &'static str,
        actual: RequestStatus,
    },

    #[error(
        "Insufficient {blood_group} stock at hospital {hospital_id}: {available} usable, {required} required"
    )]
    InsufficientStock {
        hospital_id: String,
        blood_group: BloodGroup,
        required: u32,
        available: u32,
    },

    #[error("Hospital {hospital_id} does not hold request {request_id}")]
    NotHolder {
        request_id: String,
        hospital_id: String,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    Validation(#[from] ModelError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl From<rusqlite::Error> for AllocationError {
    fn from(e: rusqlite::Error) -> Self {
        AllocationError::Database(DbError::Sqlite(e))
    }
}

impl AllocationError {
    /// Whether re-reading state and trying again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AllocationError::Conflict(_))
    }
}

pub type AllocationResult<T> = Result<T, AllocationError>;

/// Stateless transaction coordinator over a [`Database`].
pub struct AllocationEngine<'a> {
    db: &'a Database,
    config: &'a EngineConfig,
}

impl<'a> AllocationEngine<'a> {
    /// Create a new engine.
    pub fn new(db: &'a Database, config: &'a EngineConfig) -> Self {
        Self { db, config }
    }

    /// Run `op` inside an immediate transaction, committing on success.
    ///
    /// A busy database is retried up to `max_attempts` times, then reported
    /// as [`AllocationError::Conflict`]. Every other error is returned as is
    /// after the transaction rolls back.
    fn in_transaction<T>(
        &self,
        operation: &'static str,
        key: &str,
        mut op: impl FnMut(&Connection) -> AllocationResult<T>,
    ) -> AllocationResult<T> {
        let mut attempt = 1u32;
        loop {
            match self.attempt(&mut op) {
                Err(AllocationError::Database(e)) if e.is_busy() => {
                    if attempt >= self.config.max_attempts {
                        warn!(operation, key, attempts = attempt, "Database busy, giving up");
                        return Err(AllocationError::Conflict(format!(
                            "{operation} on {key} kept colliding with other writers"
                        )));
                    }
                    debug!(operation, key, attempt, "Database busy, retrying");
                    std::thread::sleep(self.config.retry_backoff * attempt);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn attempt<T>(
        &self,
        op: &mut impl FnMut(&Connection) -> AllocationResult<T>,
    ) -> AllocationResult<T> {
        let tx = self.db.begin_immediate()?;
        let value = op(&*tx)?;
        tx.commit()?;
        Ok(value)
    }
}
