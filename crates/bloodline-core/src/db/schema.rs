//! SQLite schema definition.

/// Complete database schema for the allocation core.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Emergency Requests (never deleted)
-- ============================================================================

CREATE TABLE IF NOT EXISTS emergency_requests (
    id TEXT PRIMARY KEY,
    requester_id TEXT NOT NULL,
    blood_group TEXT NOT NULL
        CHECK (blood_group IN ('A+', 'A-', 'B+', 'B-', 'AB+', 'AB-', 'O+', 'O-')),
    units INTEGER NOT NULL CHECK (units > 0),
    city TEXT NOT NULL CHECK (length(city) > 0),
    urgency_level TEXT NOT NULL CHECK (urgency_level IN ('low', 'medium', 'critical')),
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'accepted', 'fulfilled', 'cancelled')),
    accepted_hospital_id TEXT,
    notes TEXT,
    created_at TEXT NOT NULL,                    -- fixed-width RFC 3339 UTC
    updated_at TEXT NOT NULL,
    -- A hospital is recorded exactly while the request is accepted or fulfilled
    CHECK ((accepted_hospital_id IS NOT NULL) = (status IN ('accepted', 'fulfilled')))
);

-- Worklist lookups: pending requests by city and group
CREATE INDEX IF NOT EXISTS idx_requests_match
    ON emergency_requests(status, city, blood_group, created_at);
CREATE INDEX IF NOT EXISTS idx_requests_requester ON emergency_requests(requester_id);
CREATE INDEX IF NOT EXISTS idx_requests_hospital ON emergency_requests(accepted_hospital_id);

CREATE TRIGGER IF NOT EXISTS emergency_requests_no_delete BEFORE DELETE ON emergency_requests
BEGIN
    SELECT RAISE(ABORT, 'Emergency requests are append-only');
END;

CREATE TRIGGER IF NOT EXISTS emergency_requests_immutable BEFORE UPDATE ON emergency_requests
WHEN new.id IS NOT old.id
    OR new.requester_id IS NOT old.requester_id
    OR new.blood_group IS NOT old.blood_group
    OR new.units IS NOT old.units
    OR new.city IS NOT old.city
    OR new.urgency_level IS NOT old.urgency_level
    OR new.created_at IS NOT old.created_at
BEGIN
    SELECT RAISE(ABORT, 'Request identity columns are immutable');
END;

CREATE TRIGGER IF NOT EXISTS emergency_requests_lifecycle BEFORE UPDATE OF status ON emergency_requests
WHEN new.status IS NOT old.status
    AND NOT (
        (old.status = 'pending' AND new.status IN ('accepted', 'cancelled'))
        OR (old.status = 'accepted' AND new.status IN ('fulfilled', 'cancelled'))
    )
BEGIN
    SELECT RAISE(ABORT, 'Illegal request status transition');
END;

-- ============================================================================
-- Blood Inventory (one logical bucket per hospital and group)
-- ============================================================================

CREATE TABLE IF NOT EXISTS blood_inventory (
    hospital_id TEXT NOT NULL,
    blood_group TEXT NOT NULL
        CHECK (blood_group IN ('A+', 'A-', 'B+', 'B-', 'AB+', 'AB-', 'O+', 'O-')),
    units INTEGER NOT NULL CHECK (units >= 0),
    expiry_date TEXT NOT NULL,                   -- earliest batch expiry
    updated_at TEXT NOT NULL,
    PRIMARY KEY (hospital_id, blood_group)
);

-- ============================================================================
-- Request Transitions (append-only hash chain)
-- ============================================================================

CREATE TABLE IF NOT EXISTS request_transitions (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL REFERENCES emergency_requests(id),
    from_status TEXT,
    to_status TEXT NOT NULL,
    actor_id TEXT NOT NULL,
    at TEXT NOT NULL,
    prev_hash TEXT NOT NULL,
    entry_hash TEXT NOT NULL UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_transitions_request ON request_transitions(request_id, sequence);

CREATE TRIGGER IF NOT EXISTS request_transitions_no_update BEFORE UPDATE ON request_transitions
BEGIN
    SELECT RAISE(ABORT, 'Transition log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS request_transitions_no_delete BEFORE DELETE ON request_transitions
BEGIN
    SELECT RAISE(ABORT, 'Transition log is append-only');
END;
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn
    }

    fn insert_pending(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO emergency_requests (id, requester_id, blood_group, units, city, urgency_level, created_at, updated_at)
             VALUES (?1, 'donor-1', 'O+', 2, 'Metro', 'critical', '2026-01-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z')",
            [id],
        )
        .unwrap();
    }

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        let result = conn.execute_batch(SCHEMA);
        assert!(result.is_ok(), "Schema should be valid SQL: {:?}", result);
        // Re-applying is a no-op
        assert!(conn.execute_batch(SCHEMA).is_ok());
    }

    #[test]
    fn test_hospital_iff_claimed_constraint() {
        let conn = setup();
        insert_pending(&conn, "r1");

        // Accepted without a hospital should fail
        let result = conn.execute(
            "UPDATE emergency_requests SET status = 'accepted' WHERE id = 'r1'",
            [],
        );
        assert!(result.is_err());

        // Pending with a hospital should fail
        let result = conn.execute(
            "UPDATE emergency_requests SET accepted_hospital_id = 'h1' WHERE id = 'r1'",
            [],
        );
        assert!(result.is_err());

        let result = conn.execute(
            "UPDATE emergency_requests SET status = 'accepted', accepted_hospital_id = 'h1' WHERE id = 'r1'",
            [],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_lifecycle_trigger() {
        let conn = setup();
        insert_pending(&conn, "r1");

        // pending -> fulfilled skips a step
        let result = conn.execute(
            "UPDATE emergency_requests SET status = 'fulfilled', accepted_hospital_id = 'h1' WHERE id = 'r1'",
            [],
        );
        assert!(result.is_err());

        conn.execute(
            "UPDATE emergency_requests SET status = 'cancelled' WHERE id = 'r1'",
            [],
        )
        .unwrap();

        // Terminal states are final
        let result = conn.execute(
            "UPDATE emergency_requests SET status = 'pending' WHERE id = 'r1'",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_requests_not_deletable() {
        let conn = setup();
        insert_pending(&conn, "r1");
        assert!(conn
            .execute("DELETE FROM emergency_requests WHERE id = 'r1'", [])
            .is_err());
        assert!(conn
            .execute("UPDATE emergency_requests SET units = 9 WHERE id = 'r1'", [])
            .is_err());
    }

    #[test]
    fn test_inventory_never_negative() {
        let conn = setup();
        conn.execute(
            "INSERT INTO blood_inventory (hospital_id, blood_group, units, expiry_date, updated_at)
             VALUES ('h1', 'O+', 1, '2030-01-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "UPDATE blood_inventory SET units = units - 2 WHERE hospital_id = 'h1'",
            [],
        );
        assert!(result.is_err());
    }
}
