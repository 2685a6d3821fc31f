//! Repository interface
//!
//! CRUD over events, registrations, places, reviews and the derived rating
//! aggregates. No business rules live here: admission decisions belong to the
//! admission controller and aggregate math to the consistency engine.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    AggregateKey, Event, EventStatus, Place, RatingSummary, Registration, RegistrationStatus,
    Review, Versioned,
};

use super::StoreError;

/// Whether the backend can run reload + recompute + persist atomically.
///
/// Queried once at startup to pick the consistency engine's strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionCapability {
    Supported,
    Unsupported,
}

impl TransactionCapability {
    pub fn is_supported(&self) -> bool {
        matches!(self, TransactionCapability::Supported)
    }
}

/// Pure function deriving an aggregate from its member reviews
pub type RecomputeFn = fn(&[Review]) -> RatingSummary;

/// Document/row store used by the core
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Multi-document transaction support of this backend
    fn transaction_capability(&self) -> TransactionCapability;

    // Events

    async fn insert_event(&self, event: &Event) -> Result<(), StoreError>;

    async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError>;

    async fn update_event_status(
        &self,
        event_id: Uuid,
        status: EventStatus,
    ) -> Result<(), StoreError>;

    // Registrations

    /// Insert a new registration.
    ///
    /// Fails with `StoreError::Duplicate` if another non-cancelled
    /// registration exists for the same (event, user).
    async fn insert_registration(&self, registration: &Registration) -> Result<(), StoreError>;

    async fn update_registration(&self, registration: &Registration) -> Result<(), StoreError>;

    async fn find_active_registration(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Registration>, StoreError>;

    /// Registrations of an event ordered by `(timestamp, id)`, optionally
    /// filtered by status
    async fn list_registrations(
        &self,
        event_id: Uuid,
        status: Option<RegistrationStatus>,
    ) -> Result<Vec<Registration>, StoreError>;

    // Places

    async fn insert_place(&self, place: &Place) -> Result<(), StoreError>;

    async fn get_place(&self, place_id: Uuid) -> Result<Option<Place>, StoreError>;

    // Reviews

    async fn insert_review(&self, review: &Review) -> Result<(), StoreError>;

    /// Replace a review if it is still at `expected_version`.
    /// Returns the new version.
    ///
    /// # Errors
    /// - `StoreError::ConcurrencyConflict` when another write got there first
    /// - `StoreError::NotFound` when the review is gone
    async fn update_review(&self, review: &Review, expected_version: i64)
        -> Result<i64, StoreError>;

    /// Returns `false` if nothing was deleted
    async fn delete_review(&self, review_id: Uuid) -> Result<bool, StoreError>;

    async fn get_review(&self, review_id: Uuid) -> Result<Option<Review>, StoreError>;

    /// All reviews (any status) an aggregate is derived from
    async fn list_reviews(&self, key: AggregateKey) -> Result<Vec<Review>, StoreError>;

    // Derived aggregates

    /// Current stored value and version. Author stats that were never saved
    /// come back empty at version 0; an unknown place is `NotFound`.
    async fn load_summary(&self, key: AggregateKey)
        -> Result<Versioned<RatingSummary>, StoreError>;

    /// Save if the stored version still equals `expected_version`.
    ///
    /// Returns the new version, or `StoreError::ConcurrencyConflict` when
    /// someone else saved in between.
    async fn save_summary(
        &self,
        key: AggregateKey,
        summary: RatingSummary,
        expected_version: i64,
    ) -> Result<i64, StoreError>;

    /// Reload member reviews, apply `compute` and persist the result inside
    /// one transaction.
    async fn recompute_in_transaction(
        &self,
        key: AggregateKey,
        compute: RecomputeFn,
    ) -> Result<Versioned<RatingSummary>, StoreError> {
        let _ = (key, compute);
        Err(StoreError::TransactionsUnsupported)
    }
}
