//! Database layer for the allocation core.
//!
//! Reads are public on [`Database`]. Writes to request `status` and inventory
//! `units` are crate-private and only reached through
//! [`crate::allocation::AllocationEngine`].

mod inventory;
mod requests;
mod schema;
mod transitions;

pub use schema::*;
#[allow(unused_imports)]
pub use inventory::*;
#[allow(unused_imports)]
pub use requests::*;
#[allow(unused_imports)]
pub use transitions::*;

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use thiserror::Error;

use crate::models::ModelError;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(#[from] ModelError),
}

impl DbError {
    /// Whether SQLite gave up waiting for a lock held by another connection.
    pub fn is_busy(&self) -> bool {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Default wait for a competing writer before SQLite reports `BUSY`.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open database at path with an explicit lock wait.
    pub fn open_with_timeout<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a write transaction that takes the database write lock up front.
    ///
    /// Dropping the returned transaction without committing rolls it back.
    pub(crate) fn begin_immediate(&self) -> DbResult<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}
