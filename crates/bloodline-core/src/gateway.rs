//! Capability checks between an authenticated actor and the core.
//!
//! Roles are enforced here and never inside the allocation transactions.
//!
//! | Operation        | Allowed                                         |
//! |------------------|-------------------------------------------------|
//! | create / mine    | any actor                                       |
//! | get / history    | admin, requester, accepting hospital            |
//! | nearby / accept  | hospital                                        |
//! | fulfill          | the accepting hospital                          |
//! | cancel           | admin, requester, accepting hospital            |
//! | stock operations | hospital, on its own inventory                  |
//! | verify log       | admin                                           |

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use crate::allocation::{AllocationEngine, AllocationError};
use crate::config::EngineConfig;
use crate::db::{Database, DbError, LogVerification};
use crate::matching::{MatchError, Matcher, NearbyQuery};
use crate::models::{
    Actor, BloodGroup, EmergencyRequest, InventoryUnit, NewRequest, RequestTransition, Role,
};

/// Gateway errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Matching(#[from] MatchError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Role-checked entry points for one actor call.
pub struct Gateway<'a> {
    db: &'a Database,
    config: &'a EngineConfig,
}

impl<'a> Gateway<'a> {
    pub fn new(db: &'a Database, config: &'a EngineConfig) -> Self {
        Self { db, config }
    }

    fn engine(&self) -> AllocationEngine<'a> {
        AllocationEngine::new(self.db, self.config)
    }

    fn require_role(&self, actor: &Actor, role: Role, operation: &str) -> GatewayResult<()> {
        if actor.role == role {
            return Ok(());
        }
        warn!(actor_id = %actor.actor_id, role = %actor.role, operation, "Role check failed");
        Err(GatewayError::Forbidden(format!(
            "{operation} requires the {role} role"
        )))
    }

    fn load(&self, request_id: &str) -> GatewayResult<EmergencyRequest> {
        self.db.get_request(request_id)?.ok_or_else(|| {
            AllocationError::NotFound(format!("request {request_id}")).into()
        })
    }

    fn require_involved(
        &self,
        actor: &Actor,
        request: &EmergencyRequest,
        operation: &str,
    ) -> GatewayResult<()> {
        if actor.role == Role::Admin || request.involves(&actor.actor_id) {
            return Ok(());
        }
        warn!(actor_id = %actor.actor_id, request_id = %request.id, operation, "Actor not involved");
        Err(GatewayError::Forbidden(format!(
            "{operation} is limited to the requester, the accepting hospital, or an admin"
        )))
    }

    /// Open a request. Any authenticated actor may do this.
    pub fn create_request(&self, actor: &Actor, input: NewRequest) -> GatewayResult<EmergencyRequest> {
        Ok(self.engine().create_request(&actor.actor_id, input)?)
    }

    /// Fetch one request.
    pub fn get_request(&self, actor: &Actor, request_id: &str) -> GatewayResult<EmergencyRequest> {
        let request = self.load(request_id)?;
        self.require_involved(actor, &request, "viewing a request")?;
        Ok(request)
    }

    /// Requests the actor opened or accepted.
    pub fn my_requests(&self, actor: &Actor) -> GatewayResult<Vec<EmergencyRequest>> {
        Ok(self.db.list_requests_for_actor(&actor.actor_id)?)
    }

    /// Hospital worklist.
    pub fn find_nearby(&self, actor: &Actor, query: &NearbyQuery) -> GatewayResult<Vec<EmergencyRequest>> {
        self.require_role(actor, Role::Hospital, "findNearby")?;
        Ok(Matcher::new(self.db, self.config).find_nearby(query)?)
    }

    /// Claim a pending request for the calling hospital.
    pub fn accept(&self, actor: &Actor, request_id: &str) -> GatewayResult<EmergencyRequest> {
        self.require_role(actor, Role::Hospital, "accept")?;
        Ok(self.engine().accept(request_id, &actor.actor_id)?)
    }

    /// Commit a request the calling hospital accepted.
    pub fn fulfill(&self, actor: &Actor, request_id: &str) -> GatewayResult<EmergencyRequest> {
        self.require_role(actor, Role::Hospital, "fulfill")?;
        match self.engine().fulfill(request_id, &actor.actor_id) {
            Err(AllocationError::NotHolder { request_id, .. }) => {
                warn!(actor_id = %actor.actor_id, %request_id, "Fulfill by non-holder");
                Err(GatewayError::Forbidden(format!(
                    "request {request_id} was accepted by another hospital"
                )))
            }
            other => Ok(other?),
        }
    }

    /// Cancel a pending or accepted request.
    pub fn cancel(&self, actor: &Actor, request_id: &str) -> GatewayResult<EmergencyRequest> {
        let request = self.load(request_id)?;
        self.require_involved(actor, &request, "cancel")?;
        Ok(self.engine().cancel(request_id, &actor.actor_id)?)
    }

    /// Status history of one request.
    pub fn history(&self, actor: &Actor, request_id: &str) -> GatewayResult<Vec<RequestTransition>> {
        let request = self.load(request_id)?;
        self.require_involved(actor, &request, "viewing history")?;
        Ok(self.db.list_transitions(request_id)?)
    }

    /// Add units to the calling hospital's stock.
    pub fn restock(
        &self,
        actor: &Actor,
        blood_group: BloodGroup,
        units: u32,
        expiry_date: DateTime<Utc>,
    ) -> GatewayResult<InventoryUnit> {
        self.require_role(actor, Role::Hospital, "restock")?;
        Ok(self
            .engine()
            .restock(&actor.actor_id, blood_group, units, expiry_date)?)
    }

    /// Remove units from the calling hospital's stock.
    pub fn withdraw(
        &self,
        actor: &Actor,
        blood_group: BloodGroup,
        units: u32,
    ) -> GatewayResult<InventoryUnit> {
        self.require_role(actor, Role::Hospital, "withdraw")?;
        Ok(self.engine().withdraw(&actor.actor_id, blood_group, units)?)
    }

    /// The calling hospital's stock.
    pub fn inventory(&self, actor: &Actor) -> GatewayResult<Vec<InventoryUnit>> {
        self.require_role(actor, Role::Hospital, "inventory")?;
        Ok(self.db.list_inventory(&actor.actor_id)?)
    }

    /// Walk the whole transition chain.
    pub fn verify_log(&self, actor: &Actor) -> GatewayResult<LogVerification> {
        self.require_role(actor, Role::Admin, "verifyLog")?;
        let verification = self.db.verify_transition_log()?;
        if !verification.is_intact() {
            warn!(
                first_invalid = ?verification.first_invalid,
                entries = verification.entries,
                "Transition log failed verification"
            );
        }
        Ok(verification)
    }
}
