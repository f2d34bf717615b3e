//! Request lifecycle transitions: create, accept, fulfill, cancel.

use tracing::info;

use super::{AllocationEngine, AllocationError, AllocationResult};
use crate::db::{
    append_transition, cancel_request, claim_request, close_request, debit_inventory,
    insert_request, select_inventory, select_request,
};
use crate::models::{
    self, EmergencyRequest, ModelError, NewRequest, RequestStatus, TransitionEntry,
};

impl AllocationEngine<'_> {
    /// Open a new pending request on behalf of `requester_id`.
    pub fn create_request(
        &self,
        requester_id: &str,
        input: NewRequest,
    ) -> AllocationResult<EmergencyRequest> {
        if requester_id.trim().is_empty() {
            return Err(ModelError::InvalidField {
                field: "requester_id",
                reason: "is required".into(),
            }
            .into());
        }
        let request = EmergencyRequest::open(requester_id.to_string(), input.validated()?);

        self.in_transaction("create", &request.id, |conn| {
            insert_request(conn, &request)?;
            append_transition(
                conn,
                &TransitionEntry {
                    request_id: &request.id,
                    from_status: None,
                    to_status: RequestStatus::Pending,
                    actor_id: requester_id,
                    at: &request.created_at,
                },
            )?;
            Ok(())
        })?;

        info!(
            request_id = %request.id,
            blood_group = %request.blood_group,
            units = request.units,
            urgency = %request.urgency_level,
            "Emergency request opened"
        );
        Ok(request)
    }

    /// Claim a pending request for `hospital_id`.
    ///
    /// Checks, in order: the request exists, it is pending, and the hospital
    /// holds unexpired stock of the request's blood group covering the units.
    /// Stock is read, not reserved.
    pub fn accept(
        &self,
        request_id: &str,
        hospital_id: &str,
    ) -> AllocationResult<EmergencyRequest> {
        let accepted = self.in_transaction("accept", request_id, |conn| {
            let request = select_request(conn, request_id)?
                .ok_or_else(|| AllocationError::NotFound(format!("request {request_id}")))?;

            if !request.status.can_transition_to(RequestStatus::Accepted) {
                return Err(AllocationError::InvalidState {
                    request_id: request.id,
                    action: "accept",
                    actual: request.status,
                });
            }

            let now = models::now();
            let stock = select_inventory(conn, hospital_id, request.blood_group)?;
            let covered = stock
                .as_ref()
                .is_some_and(|row| row.covers(request.units, &now));
            if !covered {
                let available = stock
                    .filter(|row| row.expiry_date > now)
                    .map_or(0, |row| row.units);
                return Err(AllocationError::InsufficientStock {
                    hospital_id: hospital_id.to_string(),
                    blood_group: request.blood_group,
                    required: request.units,
                    available,
                });
            }

            if !claim_request(conn, request_id, hospital_id, &now)? {
                return Err(AllocationError::Conflict(format!(
                    "request {request_id} was claimed by another hospital"
                )));
            }
            append_transition(
                conn,
                &TransitionEntry {
                    request_id,
                    from_status: Some(RequestStatus::Pending),
                    to_status: RequestStatus::Accepted,
                    actor_id: hospital_id,
                    at: &now,
                },
            )?;

            reload(conn, request_id)
        })?;

        info!(
            request_id,
            hospital_id,
            blood_group = %accepted.blood_group,
            units = accepted.units,
            "Emergency request accepted"
        );
        Ok(accepted)
    }

    /// Debit `hospital_id`'s stock and close a request that hospital accepted.
    ///
    /// Stock is re-checked here because accept did not reserve it. Either
    /// both the debit and the status change commit, or neither does. The
    /// holder is checked inside the same transaction, so a claim that moves
    /// to another hospital can never be closed by this caller.
    pub fn fulfill(
        &self,
        request_id: &str,
        hospital_id: &str,
    ) -> AllocationResult<EmergencyRequest> {
        let fulfilled = self.in_transaction("fulfill", request_id, |conn| {
            let request = select_request(conn, request_id)?
                .ok_or_else(|| AllocationError::NotFound(format!("request {request_id}")))?;

            if !request.status.can_transition_to(RequestStatus::Fulfilled) {
                return Err(AllocationError::InvalidState {
                    request_id: request.id,
                    action: "fulfill",
                    actual: request.status,
                });
            }
            if request.accepted_hospital_id.as_deref() != Some(hospital_id) {
                return Err(AllocationError::NotHolder {
                    request_id: request.id,
                    hospital_id: hospital_id.to_string(),
                });
            }

            let now = models::now();
            let available = select_inventory(conn, hospital_id, request.blood_group)?
                .map_or(0, |row| row.units);
            if available < request.units
                || !debit_inventory(conn, hospital_id, request.blood_group, request.units, &now)?
            {
                return Err(AllocationError::InsufficientStock {
                    hospital_id: hospital_id.to_string(),
                    blood_group: request.blood_group,
                    required: request.units,
                    available,
                });
            }

            if !close_request(conn, request_id, hospital_id, &now)? {
                return Err(AllocationError::Conflict(format!(
                    "request {request_id} changed while being fulfilled"
                )));
            }
            append_transition(
                conn,
                &TransitionEntry {
                    request_id,
                    from_status: Some(RequestStatus::Accepted),
                    to_status: RequestStatus::Fulfilled,
                    actor_id: hospital_id,
                    at: &now,
                },
            )?;

            reload(conn, request_id)
        })?;

        info!(
            request_id,
            hospital_id,
            blood_group = %fulfilled.blood_group,
            units = fulfilled.units,
            "Emergency request fulfilled"
        );
        Ok(fulfilled)
    }

    /// Withdraw a pending or accepted request. Inventory is never touched.
    pub fn cancel(&self, request_id: &str, actor_id: &str) -> AllocationResult<EmergencyRequest> {
        let cancelled = self.in_transaction("cancel", request_id, |conn| {
            let request = select_request(conn, request_id)?
                .ok_or_else(|| AllocationError::NotFound(format!("request {request_id}")))?;

            if !request.status.can_transition_to(RequestStatus::Cancelled) {
                return Err(AllocationError::InvalidState {
                    request_id: request.id,
                    action: "cancel",
                    actual: request.status,
                });
            }

            let now = models::now();
            if !cancel_request(conn, request_id, request.status, &now)? {
                return Err(AllocationError::Conflict(format!(
                    "request {request_id} changed while being cancelled"
                )));
            }
            append_transition(
                conn,
                &TransitionEntry {
                    request_id,
                    from_status: Some(request.status),
                    to_status: RequestStatus::Cancelled,
                    actor_id,
                    at: &now,
                },
            )?;

            reload(conn, request_id)
        })?;

        info!(request_id, actor_id, "Emergency request cancelled");
        Ok(cancelled)
    }
}

fn reload(conn: &rusqlite::Connection, request_id: &str) -> AllocationResult<EmergencyRequest> {
    select_request(conn, request_id)?
        .ok_or_else(|| AllocationError::NotFound(format!("request {request_id}")))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::config::EngineConfig;
    use crate::db::Database;
    use crate::models::{BloodGroup, UrgencyLevel};

    fn stock(engine: &AllocationEngine<'_>, hospital: &str, units: u32) {
        engine
            .restock(hospital, BloodGroup::OPositive, units, Utc::now() + Duration::days(30))
            .unwrap();
    }

    fn open_request(engine: &AllocationEngine<'_>, units: u32) -> EmergencyRequest {
        engine
            .create_request(
                "donor-1",
                NewRequest::new(BloodGroup::OPositive, units, "Metro", UrgencyLevel::Critical),
            )
            .unwrap()
    }

    #[test]
    fn test_accept_then_fulfill() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let engine = AllocationEngine::new(&db, &config);
        stock(&engine, "h-1", 5);
        let request = open_request(&engine, 2);

        let accepted = engine.accept(&request.id, "h-1").unwrap();
        assert_eq!(accepted.status, RequestStatus::Accepted);
        assert_eq!(accepted.accepted_hospital_id.as_deref(), Some("h-1"));
        let row = db.get_inventory("h-1", BloodGroup::OPositive).unwrap().unwrap();
        assert_eq!(row.units, 5);

        let fulfilled = engine.fulfill(&request.id, "h-1").unwrap();
        assert_eq!(fulfilled.status, RequestStatus::Fulfilled);
        let row = db.get_inventory("h-1", BloodGroup::OPositive).unwrap().unwrap();
        assert_eq!(row.units, 3);
    }

    #[test]
    fn test_accept_checks_in_order() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let engine = AllocationEngine::new(&db, &config);

        assert!(matches!(
            engine.accept("missing", "h-1"),
            Err(AllocationError::NotFound(_))
        ));

        let request = open_request(&engine, 2);
        // No stock row at all
        assert!(matches!(
            engine.accept(&request.id, "h-1"),
            Err(AllocationError::InsufficientStock { available: 0, .. })
        ));

        stock(&engine, "h-1", 2);
        engine.accept(&request.id, "h-1").unwrap();
        assert!(matches!(
            engine.accept(&request.id, "h-1"),
            Err(AllocationError::InvalidState {
                actual: RequestStatus::Accepted,
                ..
            })
        ));
    }

    #[test]
    fn test_accept_ignores_expired_stock() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let engine = AllocationEngine::new(&db, &config);
        let request = open_request(&engine, 1);

        // Restock refuses expired dates, so plant the row directly
        db.conn()
            .execute(
                "INSERT INTO blood_inventory (hospital_id, blood_group, units, expiry_date, updated_at)
                 VALUES ('h-1', 'O+', 10, '2000-01-01T00:00:00.000000Z', '2000-01-01T00:00:00.000000Z')",
                [],
            )
            .unwrap();

        let err = engine.accept(&request.id, "h-1").unwrap_err();
        assert!(matches!(
            err,
            AllocationError::InsufficientStock { available: 0, required: 1, .. }
        ));
        let unchanged = db.get_request(&request.id).unwrap().unwrap();
        assert_eq!(unchanged.status, RequestStatus::Pending);
    }

    #[test]
    fn test_fulfill_twice_debits_once() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let engine = AllocationEngine::new(&db, &config);
        stock(&engine, "h-1", 5);
        let request = open_request(&engine, 2);
        engine.accept(&request.id, "h-1").unwrap();

        engine.fulfill(&request.id, "h-1").unwrap();
        let second = engine.fulfill(&request.id, "h-1").unwrap_err();
        assert!(matches!(
            second,
            AllocationError::InvalidState {
                actual: RequestStatus::Fulfilled,
                ..
            }
        ));
        let row = db.get_inventory("h-1", BloodGroup::OPositive).unwrap().unwrap();
        assert_eq!(row.units, 3);
    }

    #[test]
    fn test_fulfill_requires_accepted() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let engine = AllocationEngine::new(&db, &config);
        stock(&engine, "h-1", 5);
        let request = open_request(&engine, 2);

        assert!(matches!(
            engine.fulfill(&request.id, "h-1"),
            Err(AllocationError::InvalidState {
                actual: RequestStatus::Pending,
                ..
            })
        ));
        assert!(matches!(
            engine.fulfill("missing", "h-1"),
            Err(AllocationError::NotFound(_))
        ));
    }

    #[test]
    fn test_fulfill_by_other_hospital_changes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let engine = AllocationEngine::new(&db, &config);
        stock(&engine, "h-1", 5);
        stock(&engine, "h-2", 5);
        let request = open_request(&engine, 2);
        engine.accept(&request.id, "h-1").unwrap();

        assert!(matches!(
            engine.fulfill(&request.id, "h-2"),
            Err(AllocationError::NotHolder { ref hospital_id, .. }) if hospital_id == "h-2"
        ));
        let unchanged = db.get_request(&request.id).unwrap().unwrap();
        assert_eq!(unchanged.status, RequestStatus::Accepted);
        assert_eq!(unchanged.accepted_hospital_id.as_deref(), Some("h-1"));
        for hospital in ["h-1", "h-2"] {
            let row = db.get_inventory(hospital, BloodGroup::OPositive).unwrap().unwrap();
            assert_eq!(row.units, 5);
        }
        assert_eq!(db.list_transitions(&request.id).unwrap().len(), 2);
    }

    #[test]
    fn test_cancel_paths() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let engine = AllocationEngine::new(&db, &config);
        stock(&engine, "h-1", 5);

        let pending = open_request(&engine, 1);
        let cancelled = engine.cancel(&pending.id, "donor-1").unwrap();
        assert_eq!(cancelled.status, RequestStatus::Cancelled);

        let accepted = open_request(&engine, 1);
        engine.accept(&accepted.id, "h-1").unwrap();
        let cancelled = engine.cancel(&accepted.id, "h-1").unwrap();
        assert!(cancelled.accepted_hospital_id.is_none());
        assert!(cancelled.is_consistent());

        // Cancelled requests reject every further transition
        assert!(matches!(
            engine.accept(&accepted.id, "h-1"),
            Err(AllocationError::InvalidState { .. })
        ));
        assert!(matches!(
            engine.fulfill(&accepted.id, "h-1"),
            Err(AllocationError::InvalidState { .. })
        ));
        assert!(matches!(
            engine.cancel(&accepted.id, "donor-1"),
            Err(AllocationError::InvalidState { .. })
        ));

        let row = db.get_inventory("h-1", BloodGroup::OPositive).unwrap().unwrap();
        assert_eq!(row.units, 5);
    }

    #[test]
    fn test_transitions_logged() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let engine = AllocationEngine::new(&db, &config);
        stock(&engine, "h-1", 5);
        let request = open_request(&engine, 2);
        engine.accept(&request.id, "h-1").unwrap();
        engine.fulfill(&request.id, "h-1").unwrap();

        let history = db.list_transitions(&request.id).unwrap();
        let steps: Vec<_> = history
            .iter()
            .map(|t| (t.from_status, t.to_status, t.actor_id.as_str()))
            .collect();
        assert_eq!(
            steps,
            vec![
                (None, RequestStatus::Pending, "donor-1"),
                (Some(RequestStatus::Pending), RequestStatus::Accepted, "h-1"),
                (Some(RequestStatus::Accepted), RequestStatus::Fulfilled, "h-1"),
            ]
        );
        assert!(db.verify_transition_log().unwrap().is_intact());
    }

    #[test]
    fn test_create_validates() {
        let db = Database::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let engine = AllocationEngine::new(&db, &config);

        let zero = NewRequest::new(BloodGroup::OPositive, 0, "Metro", UrgencyLevel::Low);
        assert!(matches!(
            engine.create_request("donor-1", zero),
            Err(AllocationError::Validation(_))
        ));
        let ok = NewRequest::new(BloodGroup::OPositive, 1, "Metro", UrgencyLevel::Low);
        assert!(matches!(
            engine.create_request(" ", ok),
            Err(AllocationError::Validation(_))
        ));
        assert!(db.list_all_requests().unwrap().is_empty());
    }
}
