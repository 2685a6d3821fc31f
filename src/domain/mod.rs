//! Domain module
//!
//! Entities, value types and domain errors. Nothing in here touches storage.

mod error;
mod event;
mod notifications;
mod rating;
mod registration;
mod review;

pub use error::{AggregateKind, DomainError};
pub use event::{Event, EventStatus};
pub use notifications::{Notification, NotificationKind};
pub use rating::{AggregateKey, Place, RatingSummary, UserReviewStats, Versioned};
pub use registration::{Registration, RegistrationStatus};
pub use review::{Rating, Review, ReviewStatus, MAX_RATING, MIN_RATING};
