//! Bloodline Core Library
//!
//! Emergency blood request coordination: requesters open requests, hospitals
//! triage a worklist, claim requests, and commit stock when units ship.
//!
//! # Architecture
//!
//! ```text
//!   Donor / Hospital / Admin app
//!               │  {actor_id, role}
//!               ▼
//!        ┌─────────────┐
//!        │   Gateway   │  role and ownership checks
//!        └──────┬──────┘
//!               │
//!      ┌────────┴─────────┐
//!      ▼                  ▼
//!   Matcher        AllocationEngine
//!  (read only)     (BEGIN IMMEDIATE per op)
//!      │                  │
//!      │         ┌────────┼──────────────┐
//!      ▼         ▼        ▼              ▼
//!  emergency_requests  blood_inventory  request_transitions
//!                                      (hash-chained, append only)
//! ```
//!
//! # Core Principle
//!
//! **Stock is only debited on fulfill.** Accept checks availability but
//! reserves nothing; fulfill re-checks and debits in the same transaction
//! that closes the request.
//!
//! # Modules
//!
//! - [`db`]: SQLite store with constraint and trigger enforced invariants
//! - [`models`]: Domain types (EmergencyRequest, InventoryUnit, Actor, etc.)
//! - [`allocation`]: Request lifecycle and inventory writes
//! - [`matching`]: Hospital worklist query
//! - [`gateway`]: Role-checked entry points
//! - [`config`]: Environment-driven tunables

pub mod allocation;
pub mod config;
pub mod db;
pub mod gateway;
pub mod matching;
pub mod models;

// Re-export commonly used types
pub use allocation::{AllocationEngine, AllocationError};
pub use config::EngineConfig;
pub use db::{Database, LogVerification};
pub use gateway::{Gateway, GatewayError};
pub use matching::{MatchError, Matcher, NearbyQuery};
pub use models::{
    Actor, BloodGroup, EmergencyRequest, InventoryUnit, NewRequest, RequestStatus,
    RequestTransition, Role, UrgencyLevel,
};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

use tracing_subscriber::{fmt, EnvFilter};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum BloodlineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<db::DbError> for BloodlineError {
    fn from(e: db::DbError) -> Self {
        BloodlineError::DatabaseError(e.to_string())
    }
}

impl From<models::ModelError> for BloodlineError {
    fn from(e: models::ModelError) -> Self {
        BloodlineError::Validation(e.to_string())
    }
}

impl From<AllocationError> for BloodlineError {
    fn from(e: AllocationError) -> Self {
        let message = e.to_string();
        match e {
            AllocationError::NotFound(what) => BloodlineError::NotFound(what),
            AllocationError::InvalidState { .. } => BloodlineError::InvalidState(message),
            AllocationError::InsufficientStock { .. } => BloodlineError::InsufficientStock(message),
            AllocationError::NotHolder { .. } => BloodlineError::Forbidden(message),
            AllocationError::Conflict(_) => BloodlineError::Conflict(message),
            AllocationError::Validation(inner) => inner.into(),
            AllocationError::Database(inner) => inner.into(),
        }
    }
}

impl From<MatchError> for BloodlineError {
    fn from(e: MatchError) -> Self {
        match e {
            MatchError::Validation(reason) => BloodlineError::Validation(reason),
            MatchError::Database(inner) => inner.into(),
        }
    }
}

impl From<GatewayError> for BloodlineError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Forbidden(reason) => BloodlineError::Forbidden(reason),
            GatewayError::Allocation(inner) => inner.into(),
            GatewayError::Matching(inner) => inner.into(),
            GatewayError::Database(inner) => inner.into(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for BloodlineError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        BloodlineError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Later calls are no-ops.
#[uniffi::export]
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// Open or create a database at the given path.
#[uniffi::export]
pub fn open_database(path: String) -> Result<Arc<BloodlineCore>, BloodlineError> {
    let config = EngineConfig::from_env();
    let db = Database::open_with_timeout(&path, config.busy_timeout)?;
    tracing::info!(path = %path, "Database opened");
    Ok(Arc::new(BloodlineCore::new(db, config)))
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<BloodlineCore>, BloodlineError> {
    let db = Database::open_in_memory()?;
    Ok(Arc::new(BloodlineCore::new(db, EngineConfig::from_env())))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe database wrapper for FFI.
///
/// Calls on one handle are serialized by the mutex. Separate handles on the
/// same file coordinate through SQLite locking.
#[derive(uniffi::Object)]
pub struct BloodlineCore {
    db: Arc<Mutex<Database>>,
    config: EngineConfig,
}

impl BloodlineCore {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            config,
        }
    }
}

#[uniffi::export]
impl BloodlineCore {
    // =========================================================================
    // Request Operations
    // =========================================================================

    /// Open a new emergency request.
    pub fn create_request(
        &self,
        actor: FfiActor,
        request: FfiNewRequest,
    ) -> Result<FfiEmergencyRequest, BloodlineError> {
        let actor = actor.into_actor()?;
        let input = request.into_new_request()?;
        let db = self.db.lock()?;
        let created = Gateway::new(&db, &self.config).create_request(&actor, input)?;
        Ok(created.into())
    }

    /// Get a request by ID.
    pub fn get_request(
        &self,
        actor: FfiActor,
        request_id: String,
    ) -> Result<FfiEmergencyRequest, BloodlineError> {
        let actor = actor.into_actor()?;
        let db = self.db.lock()?;
        let request = Gateway::new(&db, &self.config).get_request(&actor, &request_id)?;
        Ok(request.into())
    }

    /// Requests the actor opened or holds (newest first).
    pub fn my_requests(&self, actor: FfiActor) -> Result<Vec<FfiEmergencyRequest>, BloodlineError> {
        let actor = actor.into_actor()?;
        let db = self.db.lock()?;
        let requests = Gateway::new(&db, &self.config).my_requests(&actor)?;
        Ok(requests.into_iter().map(|r| r.into()).collect())
    }

    /// Pending requests for a city and blood group, most urgent first.
    pub fn find_nearby(
        &self,
        actor: FfiActor,
        city: String,
        blood_group: String,
        limit: Option<u32>,
    ) -> Result<Vec<FfiEmergencyRequest>, BloodlineError> {
        let actor = actor.into_actor()?;
        let query = NearbyQuery {
            city,
            blood_group: blood_group.parse()?,
            limit,
        };
        let db = self.db.lock()?;
        let requests = Gateway::new(&db, &self.config).find_nearby(&actor, &query)?;
        Ok(requests.into_iter().map(|r| r.into()).collect())
    }

    /// Claim a pending request for the calling hospital.
    pub fn accept_request(
        &self,
        actor: FfiActor,
        request_id: String,
    ) -> Result<FfiEmergencyRequest, BloodlineError> {
        let actor = actor.into_actor()?;
        let db = self.db.lock()?;
        let request = Gateway::new(&db, &self.config).accept(&actor, &request_id)?;
        Ok(request.into())
    }

    /// Debit stock and close a request the calling hospital accepted.
    pub fn fulfill_request(
        &self,
        actor: FfiActor,
        request_id: String,
    ) -> Result<FfiEmergencyRequest, BloodlineError> {
        let actor = actor.into_actor()?;
        let db = self.db.lock()?;
        let request = Gateway::new(&db, &self.config).fulfill(&actor, &request_id)?;
        Ok(request.into())
    }

    /// Cancel a pending or accepted request.
    pub fn cancel_request(
        &self,
        actor: FfiActor,
        request_id: String,
    ) -> Result<FfiEmergencyRequest, BloodlineError> {
        let actor = actor.into_actor()?;
        let db = self.db.lock()?;
        let request = Gateway::new(&db, &self.config).cancel(&actor, &request_id)?;
        Ok(request.into())
    }

    /// Status changes of one request, oldest first.
    pub fn request_history(
        &self,
        actor: FfiActor,
        request_id: String,
    ) -> Result<Vec<FfiTransition>, BloodlineError> {
        let actor = actor.into_actor()?;
        let db = self.db.lock()?;
        let history = Gateway::new(&db, &self.config).history(&actor, &request_id)?;
        Ok(history.into_iter().map(|t| t.into()).collect())
    }

    // =========================================================================
    // Inventory Operations
    // =========================================================================

    /// Add units to the calling hospital's stock. `expiry_date` is RFC 3339.
    pub fn restock(
        &self,
        actor: FfiActor,
        blood_group: String,
        units: u32,
        expiry_date: String,
    ) -> Result<FfiInventoryUnit, BloodlineError> {
        let actor = actor.into_actor()?;
        let blood_group: BloodGroup = blood_group.parse()?;
        let expiry = models::parse_timestamp(&expiry_date)?;
        let db = self.db.lock()?;
        let row = Gateway::new(&db, &self.config).restock(&actor, blood_group, units, expiry)?;
        Ok(row.into())
    }

    /// Remove units from the calling hospital's stock.
    pub fn withdraw(
        &self,
        actor: FfiActor,
        blood_group: String,
        units: u32,
    ) -> Result<FfiInventoryUnit, BloodlineError> {
        let actor = actor.into_actor()?;
        let blood_group: BloodGroup = blood_group.parse()?;
        let db = self.db.lock()?;
        let row = Gateway::new(&db, &self.config).withdraw(&actor, blood_group, units)?;
        Ok(row.into())
    }

    /// The calling hospital's stock by blood group.
    pub fn inventory(&self, actor: FfiActor) -> Result<Vec<FfiInventoryUnit>, BloodlineError> {
        let actor = actor.into_actor()?;
        let db = self.db.lock()?;
        let rows = Gateway::new(&db, &self.config).inventory(&actor)?;
        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    // =========================================================================
    // Audit Operations
    // =========================================================================

    /// Recheck the transition hash chain.
    pub fn verify_transition_log(
        &self,
        actor: FfiActor,
    ) -> Result<FfiLogVerification, BloodlineError> {
        let actor = actor.into_actor()?;
        let db = self.db.lock()?;
        let verification = Gateway::new(&db, &self.config).verify_log(&actor)?;
        Ok(verification.into())
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe authenticated caller.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiActor {
    pub actor_id: String,
    /// `donor`, `hospital` or `admin`
    pub role: String,
}

impl FfiActor {
    fn into_actor(self) -> Result<Actor, BloodlineError> {
        if self.actor_id.trim().is_empty() {
            return Err(BloodlineError::Validation("actor_id is required".into()));
        }
        Ok(Actor::new(self.actor_id, self.role.parse()?))
    }
}

/// FFI-safe request input.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNewRequest {
    /// `A+`, `O-`, ...
    pub blood_group: String,
    pub units: u32,
    pub city: String,
    /// `low`, `medium` or `critical`
    pub urgency_level: String,
    pub notes: Option<String>,
}

impl FfiNewRequest {
    fn into_new_request(self) -> Result<NewRequest, BloodlineError> {
        let mut input = NewRequest::new(
            self.blood_group.parse()?,
            self.units,
            self.city,
            self.urgency_level.parse()?,
        );
        if let Some(notes) = self.notes {
            input = input.with_notes(notes);
        }
        Ok(input)
    }
}

/// FFI-safe emergency request.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiEmergencyRequest {
    pub id: String,
    pub requester_id: String,
    pub blood_group: String,
    pub units: u32,
    pub city: String,
    pub urgency_level: String,
    pub status: String,
    pub accepted_hospital_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<EmergencyRequest> for FfiEmergencyRequest {
    fn from(request: EmergencyRequest) -> Self {
        Self {
            id: request.id,
            requester_id: request.requester_id,
            blood_group: request.blood_group.to_string(),
            units: request.units,
            city: request.city,
            urgency_level: request.urgency_level.to_string(),
            status: request.status.to_string(),
            accepted_hospital_id: request.accepted_hospital_id,
            notes: request.notes,
            created_at: request.created_at,
            updated_at: request.updated_at,
        }
    }
}

/// FFI-safe inventory row.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiInventoryUnit {
    pub hospital_id: String,
    pub blood_group: String,
    pub units: u32,
    pub expiry_date: String,
    pub updated_at: String,
}

impl From<InventoryUnit> for FfiInventoryUnit {
    fn from(row: InventoryUnit) -> Self {
        Self {
            hospital_id: row.hospital_id,
            blood_group: row.blood_group.to_string(),
            units: row.units,
            expiry_date: row.expiry_date,
            updated_at: row.updated_at,
        }
    }
}

/// FFI-safe transition log entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTransition {
    pub sequence: i64,
    pub request_id: String,
    pub from_status: Option<String>,
    pub to_status: String,
    pub actor_id: String,
    pub at: String,
    pub entry_hash: String,
}

impl From<RequestTransition> for FfiTransition {
    fn from(transition: RequestTransition) -> Self {
        Self {
            sequence: transition.sequence,
            request_id: transition.request_id,
            from_status: transition.from_status.map(|s| s.to_string()),
            to_status: transition.to_status.to_string(),
            actor_id: transition.actor_id,
            at: transition.at,
            entry_hash: transition.entry_hash,
        }
    }
}

/// FFI-safe chain verification result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLogVerification {
    pub entries: u64,
    pub first_invalid: Option<i64>,
    pub intact: bool,
}

impl From<LogVerification> for FfiLogVerification {
    fn from(verification: LogVerification) -> Self {
        Self {
            intact: verification.is_intact(),
            entries: verification.entries,
            first_invalid: verification.first_invalid,
        }
    }
}
