//! Request transition log operations.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{RequestTransition, TransitionEntry, GENESIS_HASH};

const TRANSITION_COLUMNS: &str =
    "sequence, request_id, from_status, to_status, actor_id, at, prev_hash, entry_hash";

/// Result of walking the whole transition chain.
#[derive(Debug, Clone, PartialEq)]
pub struct LogVerification {
    /// Entries examined
    pub entries: u64,
    /// Sequence of the first entry whose hash or link does not check out
    pub first_invalid: Option<i64>,
}

impl LogVerification {
    pub fn is_intact(&self) -> bool {
        self.first_invalid.is_none()
    }
}

impl Database {
    /// Transitions of one request in the order they happened.
    pub fn list_transitions(&self, request_id: &str) -> DbResult<Vec<RequestTransition>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TRANSITION_COLUMNS} FROM request_transitions WHERE request_id = ? ORDER BY sequence"
        ))?;
        let rows = stmt.query_map([request_id], TransitionRow::from_row)?;

        let mut transitions = Vec::new();
        for row in rows {
            transitions.push(row?.try_into()?);
        }
        Ok(transitions)
    }

    /// Recompute every hash and link in the log.
    pub fn verify_transition_log(&self) -> DbResult<LogVerification> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TRANSITION_COLUMNS} FROM request_transitions ORDER BY sequence"
        ))?;
        let rows = stmt.query_map([], TransitionRow::from_row)?;

        let mut expected_prev = GENESIS_HASH.to_string();
        let mut entries = 0u64;
        for row in rows {
            let transition: RequestTransition = row?.try_into()?;
            entries += 1;
            if transition.prev_hash != expected_prev || !transition.verify()? {
                return Ok(LogVerification {
                    entries,
                    first_invalid: Some(transition.sequence),
                });
            }
            expected_prev = transition.entry_hash;
        }

        Ok(LogVerification {
            entries,
            first_invalid: None,
        })
    }
}

/// Append an entry to the chain. Must run inside the caller's write transaction.
pub(crate) fn append_transition(
    conn: &Connection,
    entry: &TransitionEntry<'_>,
) -> DbResult<RequestTransition> {
    let prev_hash: String = conn
        .query_row(
            "SELECT entry_hash FROM request_transitions ORDER BY sequence DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or_else(|| GENESIS_HASH.to_string());

    let entry_hash = entry.chain_hash(&prev_hash)?;

    conn.execute(
        r#"
        INSERT INTO request_transitions (
            request_id, from_status, to_status, actor_id, at, prev_hash, entry_hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            entry.request_id,
            entry.from_status.map(|s| s.as_str()),
            entry.to_status.as_str(),
            entry.actor_id,
            entry.at,
            prev_hash,
            entry_hash,
        ],
    )?;

    Ok(RequestTransition {
        sequence: conn.last_insert_rowid(),
        request_id: entry.request_id.to_string(),
        from_status: entry.from_status,
        to_status: entry.to_status,
        actor_id: entry.actor_id.to_string(),
        at: entry.at.to_string(),
        prev_hash,
        entry_hash,
    })
}

/// Intermediate row struct for database mapping.
struct TransitionRow {
    sequence: i64,
    request_id: String,
    from_status: Option<String>,
    to_status: String,
    actor_id: String,
    at: String,
    prev_hash: String,
    entry_hash: String,
}

impl TransitionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(TransitionRow {
            sequence: row.get(0)?,
            request_id: row.get(1)?,
            from_status: row.get(2)?,
            to_status: row.get(3)?,
            actor_id: row.get(4)?,
            at: row.get(5)?,
            prev_hash: row.get(6)?,
            entry_hash: row.get(7)?,
        })
    }
}

impl TryFrom<TransitionRow> for RequestTransition {
    type Error = DbError;

    fn try_from(row: TransitionRow) -> Result<Self, Self::Error> {
        Ok(RequestTransition {
            sequence: row.sequence,
            request_id: row.request_id,
            from_status: row.from_status.map(|s| s.parse()).transpose()?,
            to_status: row.to_status.parse()?,
            actor_id: row.actor_id,
            at: row.at,
            prev_hash: row.prev_hash,
            entry_hash: row.entry_hash,
        })
    }
}
