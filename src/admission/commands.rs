//! Command definitions
//!
//! Requests accepted by the admission controller and the results it returns.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Registration, RegistrationStatus};

/// Command to create an event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEventCommand {
    pub title: String,
    /// `None` means unbounded
    pub capacity: Option<u32>,
    #[serde(default)]
    pub allow_waitlist: bool,
    #[serde(default = "default_max_tickets")]
    pub max_tickets_per_user: u32,
}

fn default_max_tickets() -> u32 {
    1
}

impl CreateEventCommand {
    pub fn new(title: impl Into<String>, capacity: Option<u32>) -> Self {
        Self {
            title: title.into(),
            capacity,
            allow_waitlist: false,
            max_tickets_per_user: default_max_tickets(),
        }
    }

    pub fn with_waitlist(mut self) -> Self {
        self.allow_waitlist = true;
        self
    }

    pub fn with_max_tickets(mut self, max_tickets_per_user: u32) -> Self {
        self.max_tickets_per_user = max_tickets_per_user;
        self
    }
}

/// Command to register a user for an event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterCommand {
    pub event_id: Uuid,
    pub user_id: Uuid,
    /// Signed so that zero and negative requests reach validation
    pub ticket_count: i64,
}

impl RegisterCommand {
    pub fn new(event_id: Uuid, user_id: Uuid, ticket_count: i64) -> Self {
        Self {
            event_id,
            user_id,
            ticket_count,
        }
    }
}

/// Result of an accepted registration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationResult {
    pub registration_id: Uuid,
    pub status: RegistrationStatus,
}

/// Result of a registration cancellation
#[derive(Debug, Clone, Serialize)]
pub struct CancellationResult {
    pub registration_id: Uuid,
    pub previous_status: RegistrationStatus,
    pub released_seats: u32,
    pub promoted: Vec<Registration>,
}

/// Result of an event cancellation
#[derive(Debug, Clone, Serialize)]
pub struct EventCancellationResult {
    pub event_id: Uuid,
    pub cancelled_registrations: usize,
}
