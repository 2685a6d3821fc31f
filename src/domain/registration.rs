//! Registration entity
//!
//! One user's relationship to one event. The status machine is:
//!
//! ```text
//! ∅ ──admit──▶ confirmed ──cancel──▶ cancelled
//! ∅ ──admit──▶ waitlisted ──promote──▶ confirmed
//!              waitlisted ──cancel──▶ cancelled
//! ```
//!
//! Nothing ever moves a registration back to `waitlisted`, and `cancelled`
//! is terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DomainError;

/// Registration status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Confirmed,
    Waitlisted,
    Cancelled,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Confirmed => "confirmed",
            RegistrationStatus::Waitlisted => "waitlisted",
            RegistrationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, RegistrationStatus::Cancelled)
    }
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RegistrationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(RegistrationStatus::Confirmed),
            "waitlisted" => Ok(RegistrationStatus::Waitlisted),
            "cancelled" => Ok(RegistrationStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown registration status '{other}'"
            ))),
        }
    }
}

/// A user's seat request for an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub status: RegistrationStatus,
    pub ticket_count: u32,
    /// Arrival order key, monotonic per event
    pub timestamp: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Registration {
    fn new(
        event_id: Uuid,
        user_id: Uuid,
        ticket_count: u32,
        timestamp: DateTime<Utc>,
        status: RegistrationStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            user_id,
            status,
            ticket_count,
            timestamp,
            updated_at: timestamp,
            cancelled_at: None,
        }
    }

    /// Admit with a seat
    pub fn confirmed(
        event_id: Uuid,
        user_id: Uuid,
        ticket_count: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(event_id, user_id, ticket_count, timestamp, RegistrationStatus::Confirmed)
    }

    /// Admit onto the waitlist
    pub fn waitlisted(
        event_id: Uuid,
        user_id: Uuid,
        ticket_count: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(event_id, user_id, ticket_count, timestamp, RegistrationStatus::Waitlisted)
    }

    /// Move `waitlisted -> confirmed`.
    ///
    /// Returns `false` and leaves the registration untouched when it is not
    /// waitlisted, which makes replayed promotions harmless.
    pub fn promote(&mut self) -> bool {
        if self.status != RegistrationStatus::Waitlisted {
            return false;
        }
        self.status = RegistrationStatus::Confirmed;
        self.updated_at = Utc::now();
        true
    }

    /// Cancel, returning the status held before cancellation.
    ///
    /// # Errors
    /// - `DomainError::NotFound` if the registration is already cancelled
    pub fn cancel(&mut self) -> Result<RegistrationStatus, DomainError> {
        let previous = self.status;
        if !previous.is_active() {
            return Err(DomainError::not_found("Registration", self.id));
        }
        let now = Utc::now();
        self.status = RegistrationStatus::Cancelled;
        self.updated_at = now;
        self.cancelled_at = Some(now);
        Ok(previous)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// FIFO ordering key: arrival timestamp, ties broken by identity
    pub fn queue_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.timestamp, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waitlisted() -> Registration {
        Registration::waitlisted(Uuid::new_v4(), Uuid::new_v4(), 2, Utc::now())
    }

    #[test]
    fn test_promote_only_from_waitlisted() {
        let mut reg = waitlisted();
        assert!(reg.promote());
        assert_eq!(reg.status, RegistrationStatus::Confirmed);

        // Replay is a no-op
        let before = reg.clone();
        assert!(!reg.promote());
        assert_eq!(reg, before);
    }

    #[test]
    fn test_cancelled_cannot_be_promoted() {
        let mut reg = waitlisted();
        reg.cancel().unwrap();
        assert!(!reg.promote());
        assert_eq!(reg.status, RegistrationStatus::Cancelled);
    }

    #[test]
    fn test_cancel_is_terminal() {
        let mut reg = Registration::confirmed(Uuid::new_v4(), Uuid::new_v4(), 1, Utc::now());
        assert_eq!(reg.cancel().unwrap(), RegistrationStatus::Confirmed);
        assert!(reg.cancelled_at.is_some());
        assert!(matches!(reg.cancel(), Err(DomainError::NotFound { .. })));
    }

    #[test]
    fn test_queue_key_breaks_ties_by_id() {
        let ts = Utc::now();
        let event_id = Uuid::new_v4();
        let a = Registration::waitlisted(event_id, Uuid::new_v4(), 1, ts);
        let b = Registration::waitlisted(event_id, Uuid::new_v4(), 1, ts);
        assert_eq!(a.queue_key().cmp(&b.queue_key()), a.id.cmp(&b.id));
    }
}
