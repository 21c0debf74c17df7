use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::domain::{ApplicantId, TripId};

/// Program role recorded on a user's profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    Founder,
    Admin,
    WildernessLeader,
    SpiritualLeader,
    Participant,
}

impl Capacity {
    /// Case-insensitive parse of the profile's capacity column; unknown values are participants.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "founder" => Capacity::Founder,
            "admin" => Capacity::Admin,
            "wilderness leader" | "wilderness_leader" => Capacity::WildernessLeader,
            "spiritual leader" | "spiritual_leader" => Capacity::SpiritualLeader,
            _ => Capacity::Participant,
        }
    }

    pub const fn is_admin(self) -> bool {
        matches!(self, Capacity::Admin | Capacity::Founder)
    }
}

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Anonymous,
    User {
        id: ApplicantId,
        capacity: Capacity,
    },
}

impl Subject {
    pub fn user_id(&self) -> Option<&ApplicantId> {
        match self {
            Subject::User { id, .. } => Some(id),
            Subject::Anonymous => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    SubmitApplication,
    ReviewSubmissions,
    EditTrip,
    CreateTrip,
    ManageMedia,
}

/// What is being acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Program,
    Trip {
        trip_id: TripId,
        instructors: Vec<ApplicantId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum AccessDecision {
    Allow,
    Deny(String),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Role and instructor lookups backing the policy.
#[async_trait]
pub trait CapacityDirectory: Send + Sync {
    async fn capacity(&self, user_id: &ApplicantId) -> Result<Option<String>, DirectoryError>;
    async fn trip_instructors(&self, trip_id: &TripId) -> Result<Vec<ApplicantId>, DirectoryError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    #[error("capacity directory unavailable: {0}")]
    Unavailable(String),
}

/// Single place answering (subject, action, resource) -> allow/deny for every surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicy;

impl AccessPolicy {
    pub fn evaluate(
        &self,
        subject: &Subject,
        action: Action,
        resource: &Resource,
    ) -> AccessDecision {
        let Subject::User { id, capacity } = subject else {
            return AccessDecision::Deny("sign in to continue".to_string());
        };

        match action {
            Action::SubmitApplication => AccessDecision::Allow,
            Action::EditTrip | Action::CreateTrip | Action::ManageMedia => {
                if capacity.is_admin() {
                    AccessDecision::Allow
                } else {
                    AccessDecision::Deny("administrator access required".to_string())
                }
            }
            Action::ReviewSubmissions => {
                let instructs = match resource {
                    Resource::Trip { instructors, .. } => instructors.contains(id),
                    Resource::Program => false,
                };
                if capacity.is_admin() || instructs {
                    AccessDecision::Allow
                } else {
                    AccessDecision::Deny(
                        "only administrators and this trip's instructors may review submissions"
                            .to_string(),
                    )
                }
            }
        }
    }
}
