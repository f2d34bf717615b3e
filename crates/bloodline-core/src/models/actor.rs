//! Authenticated caller identity supplied by the surrounding application.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ModelError;

/// Caller role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Donor,
    Hospital,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Donor => "donor",
            Role::Hospital => "hospital",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "donor" => Ok(Role::Donor),
            "hospital" => Ok(Role::Hospital),
            "admin" => Ok(Role::Admin),
            _ => Err(ModelError::UnknownRole(s.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated caller. The identity is trusted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub actor_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(actor_id: impl Into<String>, role: Role) -> Self {
        Self {
            actor_id: actor_id.into(),
            role,
        }
    }

    pub fn hospital(actor_id: impl Into<String>) -> Self {
        Self::new(actor_id, Role::Hospital)
    }

    pub fn donor(actor_id: impl Into<String>) -> Self {
        Self::new(actor_id, Role::Donor)
    }

    pub fn admin(actor_id: impl Into<String>) -> Self {
        Self::new(actor_id, Role::Admin)
    }
}
