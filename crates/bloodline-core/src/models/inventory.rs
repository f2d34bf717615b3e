//! Per-hospital blood stock.

use serde::{Deserialize, Serialize};

use super::BloodGroup;

/// Aggregated stock for one (hospital, blood group) pair.
///
/// A single logical bucket: `expiry_date` is the earliest-expiring batch
/// folded into this row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryUnit {
    pub hospital_id: String,
    pub blood_group: BloodGroup,
    /// Available units, never negative
    pub units: u32,
    /// Earliest expiry among the stocked batches (stored timestamp form)
    pub expiry_date: String,
    pub updated_at: String,
}

impl InventoryUnit {
    /// Whether this row can cover `required` units at instant `now`.
    ///
    /// Both timestamps must be in stored form.
    pub fn covers(&self, required: u32, now: &str) -> bool {
        self.units >= required && self.expiry_date.as_str() > now
    }
}
