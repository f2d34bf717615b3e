//! Blood inventory database operations.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{BloodGroup, InventoryUnit};

const INVENTORY_COLUMNS: &str = "hospital_id, blood_group, units, expiry_date, updated_at";

impl Database {
    /// Get the stock row for a hospital and blood group.
    pub fn get_inventory(
        &self,
        hospital_id: &str,
        blood_group: BloodGroup,
    ) -> DbResult<Option<InventoryUnit>> {
        select_inventory(&self.conn, hospital_id, blood_group)
    }

    /// List a hospital's stock rows ordered by blood group.
    pub fn list_inventory(&self, hospital_id: &str) -> DbResult<Vec<InventoryUnit>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INVENTORY_COLUMNS} FROM blood_inventory WHERE hospital_id = ? ORDER BY blood_group"
        ))?;
        let rows = stmt.query_map([hospital_id], InventoryRow::from_row)?;

        let mut units = Vec::new();
        for row in rows {
            units.push(row?.try_into()?);
        }
        Ok(units)
    }
}

pub(crate) fn select_inventory(
    conn: &Connection,
    hospital_id: &str,
    blood_group: BloodGroup,
) -> DbResult<Option<InventoryUnit>> {
    conn.query_row(
        &format!(
            "SELECT {INVENTORY_COLUMNS} FROM blood_inventory WHERE hospital_id = ?1 AND blood_group = ?2"
        ),
        params![hospital_id, blood_group.as_str()],
        InventoryRow::from_row,
    )
    .optional()?
    .map(|row| row.try_into())
    .transpose()
}

/// Add units to a stock row, creating it if needed.
///
/// The row keeps the earlier of the stored and incoming expiry, unless it was
/// empty, in which case the incoming expiry replaces it.
pub(crate) fn add_inventory(
    conn: &Connection,
    hospital_id: &str,
    blood_group: BloodGroup,
    units: u32,
    expiry_date: &str,
    at: &str,
) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO blood_inventory (hospital_id, blood_group, units, expiry_date, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (hospital_id, blood_group) DO UPDATE SET
            units = blood_inventory.units + excluded.units,
            expiry_date = CASE
                WHEN blood_inventory.units = 0 THEN excluded.expiry_date
                ELSE min(blood_inventory.expiry_date, excluded.expiry_date)
            END,
            updated_at = excluded.updated_at
        "#,
        params![hospital_id, blood_group.as_str(), units, expiry_date, at],
    )?;
    Ok(())
}

/// Conditional decrement. Returns false, changing nothing, if the row is
/// missing or holds fewer than `units`.
pub(crate) fn debit_inventory(
    conn: &Connection,
    hospital_id: &str,
    blood_group: BloodGroup,
    units: u32,
    at: &str,
) -> DbResult<bool> {
    let rows_affected = conn.execute(
        r#"
        UPDATE blood_inventory SET
            units = units - ?3,
            updated_at = ?4
        WHERE hospital_id = ?1 AND blood_group = ?2 AND units >= ?3
        "#,
        params![hospital_id, blood_group.as_str(), units, at],
    )?;
    Ok(rows_affected > 0)
}

/// Intermediate row struct for database mapping.
struct InventoryRow {
    hospital_id: String,
    blood_group: String,
    units: u32,
    expiry_date: String,
    updated_at: String,
}

impl InventoryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(InventoryRow {
            hospital_id: row.get(0)?,
            blood_group: row.get(1)?,
            units: row.get(2)?,
            expiry_date: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }
}

impl TryFrom<InventoryRow> for InventoryUnit {
    type Error = DbError;

    fn try_from(row: InventoryRow) -> Result<Self, Self::Error> {
        Ok(InventoryUnit {
            hospital_id: row.hospital_id,
            blood_group: row.blood_group.parse()?,
            units: row.units,
            expiry_date: row.expiry_date,
            updated_at: row.updated_at,
        })
    }
}
