//! Inventory adjustments outside the request lifecycle.

use chrono::{DateTime, Utc};
use tracing::info;

use super::{AllocationEngine, AllocationError, AllocationResult};
use crate::db::{add_inventory, debit_inventory, select_inventory};
use crate::models::{self, BloodGroup, InventoryUnit, ModelError};

impl AllocationEngine<'_> {
    /// Add a batch of units to a hospital's stock.
    pub fn restock(
        &self,
        hospital_id: &str,
        blood_group: BloodGroup,
        units: u32,
        expiry_date: DateTime<Utc>,
    ) -> AllocationResult<InventoryUnit> {
        if units == 0 {
            return Err(ModelError::InvalidField {
                field: "units",
                reason: "must be positive".into(),
            }
            .into());
        }
        if expiry_date <= Utc::now() {
            return Err(ModelError::InvalidField {
                field: "expiry_date",
                reason: "must be in the future".into(),
            }
            .into());
        }
        let expiry = models::timestamp(expiry_date);

        let row = self.in_transaction("restock", hospital_id, |conn| {
            let held = select_inventory(conn, hospital_id, blood_group)?.map_or(0, |row| row.units);
            if held.checked_add(units).is_none() {
                return Err(ModelError::InvalidField {
                    field: "units",
                    reason: format!("would exceed {} held units", u32::MAX),
                }
                .into());
            }
            let now = models::now();
            add_inventory(conn, hospital_id, blood_group, units, &expiry, &now)?;
            select_inventory(conn, hospital_id, blood_group)?.ok_or_else(|| {
                AllocationError::NotFound(format!("inventory {hospital_id}/{blood_group}"))
            })
        })?;

        info!(
            hospital_id,
            blood_group = %blood_group,
            units,
            total = row.units,
            "Inventory restocked"
        );
        Ok(row)
    }

    /// Remove units from a hospital's stock (wastage, transfers, manual use).
    ///
    /// Fails with `InsufficientStock` rather than going below zero.
    pub fn withdraw(
        &self,
        hospital_id: &str,
        blood_group: BloodGroup,
        units: u32,
    ) -> AllocationResult<InventoryUnit> {
        if units == 0 {
            return Err(ModelError::InvalidField {
                field: "units",
                reason: "must be positive".into(),
            }
            .into());
        }

        let row = self.in_transaction("withdraw", hospital_id, |conn| {
            let current = select_inventory(conn, hospital_id, blood_group)?.ok_or_else(|| {
                AllocationError::NotFound(format!("inventory {hospital_id}/{blood_group}"))
            })?;

            let now = models::now();
            if !debit_inventory(conn, hospital_id, blood_group, units, &now)? {
                return Err(AllocationError::InsufficientStock {
                    hospital_id: hospital_id.to_string(),
                    blood_group,
                    required: units,
                    available: current.units,
                });
            }
            select_inventory(conn, hospital_id, blood_group)?.ok_or_else(|| {
                AllocationError::NotFound(format!("inventory {hospital_id}/{blood_group}"))
            })
        })?;

        info!(
            hospital_id,
            blood_group = %blood_group,
            units,
            remaining = row.units,
            "Inventory withdrawn"
        );
        Ok(row)
    }
}
