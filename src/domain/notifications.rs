//! Domain notifications
//!
//! Structured payloads emitted on registration state transitions. They are
//! facts handed to collaborators (push/email, analytics); nothing in the core
//! depends on their delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Registration, RegistrationStatus};

/// Notification type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    RegistrationConfirmed,
    RegistrationWaitlisted,
    WaitlistPromoted,
    RegistrationCancelled,
    EventCancelled,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::RegistrationConfirmed => "RegistrationConfirmed",
            NotificationKind::RegistrationWaitlisted => "RegistrationWaitlisted",
            NotificationKind::WaitlistPromoted => "WaitlistPromoted",
            NotificationKind::RegistrationCancelled => "RegistrationCancelled",
            NotificationKind::EventCancelled => "EventCancelled",
        }
    }
}

/// Payload handed to the notification dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        event_id: Uuid,
        user_id: Uuid,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            event_id,
            user_id,
            metadata,
            occurred_at: Utc::now(),
        }
    }

    /// Notification describing a registration's transition
    pub fn for_registration(kind: NotificationKind, registration: &Registration) -> Self {
        Self::new(
            kind,
            registration.event_id,
            registration.user_id,
            serde_json::json!({
                "registration_id": registration.id,
                "ticket_count": registration.ticket_count,
                "status": registration.status.as_str(),
            }),
        )
    }

    /// Notification for a newly admitted registration
    pub fn admitted(registration: &Registration) -> Self {
        let kind = match registration.status {
            RegistrationStatus::Waitlisted => NotificationKind::RegistrationWaitlisted,
            _ => NotificationKind::RegistrationConfirmed,
        };
        Self::for_registration(kind, registration)
    }
}
