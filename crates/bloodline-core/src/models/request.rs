//! Emergency request records and their status lifecycle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{BloodGroup, ModelError, UrgencyLevel};

/// Request status.
///
/// ```text
/// pending ──accept──▶ accepted ──fulfill──▶ fulfilled
///    │                   │
///    └──────cancel───────┴──────────────▶ cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Open, waiting for a hospital to claim it
    Pending,
    /// Claimed by a hospital, stock not yet debited
    Accepted,
    /// Stock debited, request closed
    Fulfilled,
    /// Withdrawn before fulfillment
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Fulfilled => "fulfilled",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Pending, RequestStatus::Accepted)
                | (RequestStatus::Pending, RequestStatus::Cancelled)
                | (RequestStatus::Accepted, RequestStatus::Fulfilled)
                | (RequestStatus::Accepted, RequestStatus::Cancelled)
        )
    }

    /// Statuses in which an accepting hospital is recorded.
    pub fn holds_hospital(&self) -> bool {
        matches!(self, RequestStatus::Accepted | RequestStatus::Fulfilled)
    }
}

impl FromStr for RequestStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "fulfilled" => Ok(RequestStatus::Fulfilled),
            "cancelled" => Ok(RequestStatus::Cancelled),
            _ => Err(ModelError::UnknownStatus(s.to_string())),
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for opening a new emergency request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRequest {
    pub blood_group: BloodGroup,
    pub units: u32,
    pub city: String,
    pub urgency_level: UrgencyLevel,
    pub notes: Option<String>,
}

impl NewRequest {
    pub fn new(
        blood_group: BloodGroup,
        units: u32,
        city: impl Into<String>,
        urgency_level: UrgencyLevel,
    ) -> Self {
        Self {
            blood_group,
            units,
            city: city.into(),
            urgency_level,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Check field constraints and normalize whitespace.
    pub fn validated(self) -> Result<Self, ModelError> {
        if self.units == 0 {
            return Err(ModelError::InvalidField {
                field: "units",
                reason: "must be positive".into(),
            });
        }
        if i64::from(self.units) > i64::from(i32::MAX) {
            return Err(ModelError::InvalidField {
                field: "units",
                reason: "is out of range".into(),
            });
        }
        let city = self.city.trim().to_string();
        if city.is_empty() {
            return Err(ModelError::InvalidField {
                field: "city",
                reason: "is required".into(),
            });
        }
        let notes = self
            .notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        Ok(Self {
            city,
            notes,
            ..self
        })
    }
}

/// An emergency blood request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyRequest {
    /// Unique request ID
    pub id: String,
    /// Actor who opened the request
    pub requester_id: String,
    pub blood_group: BloodGroup,
    /// Units required
    pub units: u32,
    /// Coarse location used for matching
    pub city: String,
    pub urgency_level: UrgencyLevel,
    pub status: RequestStatus,
    /// Set on accept; cleared if an accepted request is cancelled
    pub accepted_hospital_id: Option<String>,
    pub notes: Option<String>,
    /// Creation timestamp
    pub created_at: String,
    /// Last transition timestamp
    pub updated_at: String,
}

impl EmergencyRequest {
    /// Create a pending request from validated input.
    pub fn open(requester_id: String, input: NewRequest) -> Self {
        let now = super::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            requester_id,
            blood_group: input.blood_group,
            units: input.units,
            city: input.city,
            urgency_level: input.urgency_level,
            status: RequestStatus::Pending,
            accepted_hospital_id: None,
            notes: input.notes,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// `accepted_hospital_id` is present exactly when the status holds a hospital.
    pub fn is_consistent(&self) -> bool {
        self.accepted_hospital_id.is_some() == self.status.holds_hospital()
    }

    /// Whether the actor opened this request or is the hospital holding it.
    pub fn involves(&self, actor_id: &str) -> bool {
        self.requester_id == actor_id || self.accepted_hospital_id.as_deref() == Some(actor_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_edges() {
        use RequestStatus::*;
        assert!(Pending.can_transition_to(Accepted));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Accepted.can_transition_to(Fulfilled));
        assert!(Accepted.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Fulfilled));
        assert!(!Accepted.can_transition_to(Pending));
        for terminal in [Fulfilled, Cancelled] {
            for next in [Pending, Accepted, Fulfilled, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_open_request() {
        let input = NewRequest::new(BloodGroup::OPositive, 2, "Metro", UrgencyLevel::Critical);
        let request = EmergencyRequest::open("donor-1".into(), input);
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.id.len(), 36);
        assert!(request.accepted_hospital_id.is_none());
        assert!(request.is_consistent());
        assert!(request.involves("donor-1"));
    }

    #[test]
    fn test_validation() {
        let zero = NewRequest::new(BloodGroup::APositive, 0, "Metro", UrgencyLevel::Low);
        assert!(matches!(
            zero.validated(),
            Err(ModelError::InvalidField { field: "units", .. })
        ));

        let blank = NewRequest::new(BloodGroup::APositive, 1, "   ", UrgencyLevel::Low);
        assert!(matches!(
            blank.validated(),
            Err(ModelError::InvalidField { field: "city", .. })
        ));

        let ok = NewRequest::new(BloodGroup::APositive, 1, "  Metro ", UrgencyLevel::Low)
            .with_notes("  ")
            .validated()
            .unwrap();
        assert_eq!(ok.city, "Metro");
        assert_eq!(ok.notes, None);
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Accepted,
            RequestStatus::Fulfilled,
            RequestStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert!("closed".parse::<RequestStatus>().is_err());
    }
}
