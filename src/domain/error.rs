//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;
use uuid::Uuid;

/// Which derived aggregate a recompute was working on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Place,
    UserStats,
}

impl std::fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateKind::Place => write!(f, "place"),
            AggregateKind::UserStats => write!(f, "user_stats"),
        }
    }
}

/// Domain-specific errors
///
/// Each variant maps to a stable error code (see [`DomainError::error_code`])
/// so callers can tell "try again" apart from "this is final".
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Malformed request (bad ticket count, bad rating, cancelled event)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Referenced event, registration, place or review does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An active registration already exists for the (event, user) pair
    #[error("User {user_id} already holds an active registration for event {event_id}")]
    DuplicateRegistration { event_id: Uuid, user_id: Uuid },

    /// Event is full and waitlisting is disabled
    #[error("Event {event_id} is at capacity ({capacity} seats)")]
    CapacityExceeded { event_id: Uuid, capacity: u32 },

    /// The per-event critical section could not be acquired in time
    #[error("Too many concurrent requests for event {event_id}, try again")]
    Contention { event_id: Uuid },

    /// Aggregate recompute gave up after its attempts
    #[error("Could not recompute {kind} aggregate {id} after {attempts} attempt(s)")]
    ConsistencyRecomputeFailure {
        kind: AggregateKind,
        id: Uuid,
        attempts: u32,
    },
}

impl DomainError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error for an entity
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::DuplicateRegistration { .. } => "duplicate_registration",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Contention { .. } => "contention",
            Self::ConsistencyRecomputeFailure { .. } => "consistency_recompute_failure",
        }
    }

    /// Check if retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Contention { .. } | Self::ConsistencyRecomputeFailure { .. }
        )
    }
}
