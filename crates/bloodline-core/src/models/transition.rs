//! Append-only record of request status changes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::RequestStatus;

/// Hash used as the predecessor of the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One status change of one request.
///
/// Entries form a single hash chain across all requests: each `entry_hash`
/// covers the previous entry's hash and this entry's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTransition {
    /// Position in the global log (1-based)
    pub sequence: i64,
    pub request_id: String,
    /// `None` for the creation entry
    pub from_status: Option<RequestStatus>,
    pub to_status: RequestStatus,
    /// Actor who caused the change
    pub actor_id: String,
    pub at: String,
    pub prev_hash: String,
    pub entry_hash: String,
}

/// Content of a transition before it is chained.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionEntry<'a> {
    pub request_id: &'a str,
    pub from_status: Option<RequestStatus>,
    pub to_status: RequestStatus,
    pub actor_id: &'a str,
    pub at: &'a str,
}

impl TransitionEntry<'_> {
    /// Hash this entry onto `prev_hash`.
    pub fn chain_hash(&self, prev_hash: &str) -> Result<String, serde_json::Error> {
        let payload = serde_json::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(prev_hash.as_bytes());
        hasher.update(payload.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

impl RequestTransition {
    pub fn entry(&self) -> TransitionEntry<'_> {
        TransitionEntry {
            request_id: &self.request_id,
            from_status: self.from_status,
            to_status: self.to_status,
            actor_id: &self.actor_id,
            at: &self.at,
        }
    }

    /// Recompute this entry's hash from its content.
    pub fn verify(&self) -> Result<bool, serde_json::Error> {
        Ok(self.entry().chain_hash(&self.prev_hash)? == self.entry_hash)
    }
}
