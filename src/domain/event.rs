//! Event entity
//!
//! A scheduled happening users can register for. Capacity bookkeeping lives
//! in the capacity tracker; this type only carries the admission settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DomainError;

/// Event lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Scheduled,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Scheduled => "scheduled",
            EventStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(EventStatus::Scheduled),
            "cancelled" => Ok(EventStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown event status '{other}'"))),
        }
    }
}

/// Event admission settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    /// Seat limit; `None` means unbounded
    pub capacity: Option<u32>,
    pub allow_waitlist: bool,
    pub max_tickets_per_user: u32,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Create a new scheduled event, validating its admission settings.
    ///
    /// # Errors
    /// - `DomainError::Validation` if the title is blank, `capacity` is zero
    ///   or `max_tickets_per_user` is zero
    pub fn create(
        title: String,
        capacity: Option<u32>,
        allow_waitlist: bool,
        max_tickets_per_user: u32,
    ) -> Result<Self, DomainError> {
        if title.trim().is_empty() {
            return Err(DomainError::validation("event title must not be empty"));
        }
        if capacity == Some(0) {
            return Err(DomainError::validation("capacity must be at least 1 when set"));
        }
        if max_tickets_per_user == 0 {
            return Err(DomainError::validation("max_tickets_per_user must be at least 1"));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            title,
            capacity,
            allow_waitlist,
            max_tickets_per_user,
            status: EventStatus::Scheduled,
            created_at: Utc::now(),
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == EventStatus::Cancelled
    }

    /// Check a requested ticket count against this event's per-user limit.
    pub fn validate_ticket_count(&self, ticket_count: i64) -> Result<u32, DomainError> {
        if self.is_cancelled() {
            return Err(DomainError::validation(format!(
                "event {} has been cancelled",
                self.id
            )));
        }
        if ticket_count <= 0 {
            return Err(DomainError::validation("ticket_count must be positive"));
        }
        if ticket_count > i64::from(self.max_tickets_per_user) {
            return Err(DomainError::validation(format!(
                "ticket_count {} exceeds the per-user limit of {}",
                ticket_count, self.max_tickets_per_user
            )));
        }
        // Bounded by max_tickets_per_user above.
        Ok(ticket_count as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(max: u32) -> Event {
        Event::create("Jazz night".to_string(), Some(10), true, max).unwrap()
    }

    #[test]
    fn test_create_rejects_zero_capacity() {
        let result = Event::create("Gig".to_string(), Some(0), false, 2);
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_create_rejects_zero_ticket_limit() {
        let result = Event::create("Gig".to_string(), None, false, 0);
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_validate_ticket_count_bounds() {
        let event = event(4);
        assert_eq!(event.validate_ticket_count(1).unwrap(), 1);
        assert_eq!(event.validate_ticket_count(4).unwrap(), 4);
        assert!(event.validate_ticket_count(0).is_err());
        assert!(event.validate_ticket_count(-3).is_err());
        assert!(event.validate_ticket_count(5).is_err());
    }

    #[test]
    fn test_cancelled_event_rejects_requests() {
        let mut event = event(4);
        event.status = EventStatus::Cancelled;
        assert!(matches!(
            event.validate_ticket_count(1),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [EventStatus::Scheduled, EventStatus::Cancelled] {
            assert_eq!(status.as_str().parse::<EventStatus>().unwrap(), status);
        }
    }
}
