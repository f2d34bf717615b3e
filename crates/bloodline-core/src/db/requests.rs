//! Emergency request database operations.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{BloodGroup, EmergencyRequest, RequestStatus, UrgencyLevel};

const REQUEST_COLUMNS: &str = "id, requester_id, blood_group, units, city, urgency_level, \
     status, accepted_hospital_id, notes, created_at, updated_at";

impl Database {
    /// Get a request by ID.
    pub fn get_request(&self, id: &str) -> DbResult<Option<EmergencyRequest>> {
        select_request(&self.conn, id)
    }

    /// Pending requests for a city and blood group, most urgent then oldest first.
    pub fn list_pending_requests(
        &self,
        city: &str,
        blood_group: BloodGroup,
        limit: u32,
    ) -> DbResult<Vec<EmergencyRequest>> {
        let urgency_rank = urgency_rank_sql();
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM emergency_requests
            WHERE status = 'pending' AND city = ?1 AND blood_group = ?2
            ORDER BY
                {urgency_rank} DESC,
                created_at ASC,
                rowid ASC
            LIMIT ?3
            "#
        ))?;

        let rows = stmt.query_map(
            params![city, blood_group.as_str(), i64::from(limit)],
            RequestRow::from_row,
        )?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?.try_into()?);
        }
        Ok(requests)
    }

    /// Requests the actor opened or holds as accepting hospital, newest first.
    pub fn list_requests_for_actor(&self, actor_id: &str) -> DbResult<Vec<EmergencyRequest>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM emergency_requests
            WHERE requester_id = ?1 OR accepted_hospital_id = ?1
            ORDER BY created_at DESC, rowid DESC
            "#
        ))?;

        let rows = stmt.query_map([actor_id], RequestRow::from_row)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?.try_into()?);
        }
        Ok(requests)
    }

    /// List every request (audit and test use).
    pub fn list_all_requests(&self) -> DbResult<Vec<EmergencyRequest>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM emergency_requests ORDER BY rowid"
        ))?;
        let rows = stmt.query_map([], RequestRow::from_row)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?.try_into()?);
        }
        Ok(requests)
    }
}

/// `CASE` expression mapping `urgency_level` to [`UrgencyLevel::rank`].
fn urgency_rank_sql() -> String {
    let arms: String = UrgencyLevel::ALL
        .iter()
        .map(|level| format!(" WHEN '{}' THEN {}", level.as_str(), level.rank()))
        .collect();
    format!("CASE urgency_level{arms} END")
}

pub(crate) fn insert_request(conn: &Connection, request: &EmergencyRequest) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO emergency_requests (
            id, requester_id, blood_group, units, city, urgency_level,
            status, accepted_hospital_id, notes, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            request.id,
            request.requester_id,
            request.blood_group.as_str(),
            request.units,
            request.city,
            request.urgency_level.as_str(),
            request.status.as_str(),
            request.accepted_hospital_id,
            request.notes,
            request.created_at,
            request.updated_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn select_request(conn: &Connection, id: &str) -> DbResult<Option<EmergencyRequest>> {
    conn.query_row(
        &format!("SELECT {REQUEST_COLUMNS} FROM emergency_requests WHERE id = ?"),
        [id],
        RequestRow::from_row,
    )
    .optional()?
    .map(|row| row.try_into())
    .transpose()
}

/// Compare-and-set `pending -> accepted`. Returns false if the request was no longer pending.
pub(crate) fn claim_request(
    conn: &Connection,
    id: &str,
    hospital_id: &str,
    at: &str,
) -> DbResult<bool> {
    let rows_affected = conn.execute(
        r#"
        UPDATE emergency_requests SET
            status = 'accepted',
            accepted_hospital_id = ?2,
            updated_at = ?3
        WHERE id = ?1 AND status = 'pending'
        "#,
        params![id, hospital_id, at],
    )?;
    Ok(rows_affected > 0)
}

/// Compare-and-set `accepted -> fulfilled` for the given hospital.
pub(crate) fn close_request(
    conn: &Connection,
    id: &str,
    hospital_id: &str,
    at: &str,
) -> DbResult<bool> {
    let rows_affected = conn.execute(
        r#"
        UPDATE emergency_requests SET
            status = 'fulfilled',
            updated_at = ?3
        WHERE id = ?1 AND status = 'accepted' AND accepted_hospital_id = ?2
        "#,
        params![id, hospital_id, at],
    )?;
    Ok(rows_affected > 0)
}

/// Compare-and-set `expected -> cancelled`, releasing any accepting hospital.
pub(crate) fn cancel_request(
    conn: &Connection,
    id: &str,
    expected: RequestStatus,
    at: &str,
) -> DbResult<bool> {
    let rows_affected = conn.execute(
        r#"
        UPDATE emergency_requests SET
            status = 'cancelled',
            accepted_hospital_id = NULL,
            updated_at = ?3
        WHERE id = ?1 AND status = ?2
        "#,
        params![id, expected.as_str(), at],
    )?;
    Ok(rows_affected > 0)
}

/// Intermediate row struct for database mapping.
struct RequestRow {
    id: String,
    requester_id: String,
    blood_group: String,
    units: u32,
    city: String,
    urgency_level: String,
    status: String,
    accepted_hospital_id: Option<String>,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RequestRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RequestRow {
            id: row.get(0)?,
            requester_id: row.get(1)?,
            blood_group: row.get(2)?,
            units: row.get(3)?,
            city: row.get(4)?,
            urgency_level: row.get(5)?,
            status: row.get(6)?,
            accepted_hospital_id: row.get(7)?,
            notes: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl TryFrom<RequestRow> for EmergencyRequest {
    type Error = DbError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(EmergencyRequest {
            id: row.id,
            requester_id: row.requester_id,
            blood_group: row.blood_group.parse()?,
            units: row.units,
            city: row.city,
            urgency_level: row.urgency_level.parse()?,
            status: row.status.parse()?,
            accepted_hospital_id: row.accepted_hospital_id,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
