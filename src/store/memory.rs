//! In-memory store
//!
//! Process-local implementation of [`Repository`]. All documents sit behind
//! one mutex that is never held across an `.await`, so every method is
//! atomic on its own. Transaction support is configurable so both
//! consistency strategies can run against it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    AggregateKey, Event, EventStatus, Place, RatingSummary, Registration, RegistrationStatus,
    Review, Versioned,
};

use super::{RecomputeFn, Repository, StoreError, TransactionCapability};

#[derive(Debug, Default)]
struct MemoryState {
    events: HashMap<Uuid, Event>,
    registrations: HashMap<Uuid, Registration>,
    places: HashMap<Uuid, Place>,
    reviews: HashMap<Uuid, Review>,
    user_stats: HashMap<Uuid, Versioned<RatingSummary>>,
}

impl MemoryState {
    fn summary(&self, key: AggregateKey) -> Result<Versioned<RatingSummary>, StoreError> {
        match key {
            AggregateKey::Place(id) => self
                .places
                .get(&id)
                .map(|p| Versioned::new(p.summary(), p.version))
                .ok_or_else(|| StoreError::not_found("Place", id)),
            AggregateKey::Author(id) => Ok(self
                .user_stats
                .get(&id)
                .cloned()
                .unwrap_or_else(|| Versioned::new(RatingSummary::empty(), 0))),
        }
    }

    fn write_summary(
        &mut self,
        key: AggregateKey,
        summary: RatingSummary,
        expected_version: i64,
    ) -> Result<i64, StoreError> {
        let current = self.summary(key)?.version;
        if current != expected_version {
            return Err(StoreError::ConcurrencyConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: current,
            });
        }

        let new_version = current + 1;
        match key {
            AggregateKey::Place(id) => {
                if let Some(place) = self.places.get_mut(&id) {
                    place.rating = summary.average;
                    place.total_reviews = summary.count;
                    place.version = new_version;
                }
            }
            AggregateKey::Author(id) => {
                self.user_stats
                    .insert(id, Versioned::new(summary, new_version));
            }
        }
        Ok(new_version)
    }

    fn reviews_for(&self, key: AggregateKey) -> Vec<Review> {
        let mut reviews: Vec<Review> = self
            .reviews
            .values()
            .filter(|r| key.covers(r))
            .cloned()
            .collect();
        reviews.sort_by_key(|r| (r.created_at, r.id));
        reviews
    }
}

/// Repository backed by process memory
#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
    capability: TransactionCapability,
}

impl InMemoryStore {
    /// Create a store that supports transactions
    pub fn new() -> Self {
        Self::with_capability(TransactionCapability::Supported)
    }

    /// Create a store advertising the given transaction capability
    pub fn with_capability(capability: TransactionCapability) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            capability,
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory state lock poisoned".to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for InMemoryStore {
    fn transaction_capability(&self) -> TransactionCapability {
        self.capability
    }

    async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.events.contains_key(&event.id) {
            return Err(StoreError::Duplicate(format!("event {}", event.id)));
        }
        state.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.state()?.events.get(&event_id).cloned())
    }

    async fn update_event_status(
        &self,
        event_id: Uuid,
        status: EventStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let event = state
            .events
            .get_mut(&event_id)
            .ok_or_else(|| StoreError::not_found("Event", event_id))?;
        event.status = status;
        Ok(())
    }

    async fn insert_registration(&self, registration: &Registration) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let clash = state.registrations.values().any(|r| {
            r.event_id == registration.event_id
                && r.user_id == registration.user_id
                && r.is_active()
        });
        if clash && registration.is_active() {
            return Err(StoreError::Duplicate(format!(
                "active registration for event {} user {}",
                registration.event_id, registration.user_id
            )));
        }
        state
            .registrations
            .insert(registration.id, registration.clone());
        Ok(())
    }

    async fn update_registration(&self, registration: &Registration) -> Result<(), StoreError> {
        let mut state = self.state()?;
        match state.registrations.get_mut(&registration.id) {
            Some(stored) => {
                *stored = registration.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("Registration", registration.id)),
        }
    }

    async fn find_active_registration(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Registration>, StoreError> {
        Ok(self
            .state()?
            .registrations
            .values()
            .find(|r| r.event_id == event_id && r.user_id == user_id && r.is_active())
            .cloned())
    }

    async fn list_registrations(
        &self,
        event_id: Uuid,
        status: Option<RegistrationStatus>,
    ) -> Result<Vec<Registration>, StoreError> {
        let state = self.state()?;
        let mut registrations: Vec<Registration> = state
            .registrations
            .values()
            .filter(|r| r.event_id == event_id && status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        registrations.sort_by_key(|r| r.queue_key());
        Ok(registrations)
    }

    async fn insert_place(&self, place: &Place) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.places.contains_key(&place.id) {
            return Err(StoreError::Duplicate(format!("place {}", place.id)));
        }
        state.places.insert(place.id, place.clone());
        Ok(())
    }

    async fn get_place(&self, place_id: Uuid) -> Result<Option<Place>, StoreError> {
        Ok(self.state()?.places.get(&place_id).cloned())
    }

    async fn insert_review(&self, review: &Review) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.reviews.contains_key(&review.id) {
            return Err(StoreError::Duplicate(format!("review {}", review.id)));
        }
        state.reviews.insert(review.id, review.clone());
        Ok(())
    }

    async fn update_review(
        &self,
        review: &Review,
        expected_version: i64,
    ) -> Result<i64, StoreError> {
        let mut state = self.state()?;
        let stored = state
            .reviews
            .get_mut(&review.id)
            .ok_or_else(|| StoreError::not_found("Review", review.id))?;
        if stored.version != expected_version {
            return Err(StoreError::ConcurrencyConflict {
                key: format!("review:{}", review.id),
                expected: expected_version,
                actual: stored.version,
            });
        }
        let version = expected_version + 1;
        *stored = Review {
            version,
            ..review.clone()
        };
        Ok(version)
    }

    async fn delete_review(&self, review_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.state()?.reviews.remove(&review_id).is_some())
    }

    async fn get_review(&self, review_id: Uuid) -> Result<Option<Review>, StoreError> {
        Ok(self.state()?.reviews.get(&review_id).cloned())
    }

    async fn list_reviews(&self, key: AggregateKey) -> Result<Vec<Review>, StoreError> {
        Ok(self.state()?.reviews_for(key))
    }

    async fn load_summary(
        &self,
        key: AggregateKey,
    ) -> Result<Versioned<RatingSummary>, StoreError> {
        self.state()?.summary(key)
    }

    async fn save_summary(
        &self,
        key: AggregateKey,
        summary: RatingSummary,
        expected_version: i64,
    ) -> Result<i64, StoreError> {
        self.state()?.write_summary(key, summary, expected_version)
    }

    async fn recompute_in_transaction(
        &self,
        key: AggregateKey,
        compute: RecomputeFn,
    ) -> Result<Versioned<RatingSummary>, StoreError> {
        if !self.capability.is_supported() {
            return Err(StoreError::TransactionsUnsupported);
        }

        // The whole reload-compute-save runs under one lock acquisition.
        let mut state = self.state()?;
        let current = state.summary(key)?;
        let summary = compute(&state.reviews_for(key));
        let version = state.write_summary(key, summary, current.version)?;
        Ok(Versioned::new(summary, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Rating, ReviewStatus};
    use chrono::Utc;

    #[tokio::test]
    async fn test_duplicate_active_registration_rejected() {
        let store = InMemoryStore::new();
        let event_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let first = Registration::confirmed(event_id, user_id, 1, Utc::now());
        store.insert_registration(&first).await.unwrap();

        let second = Registration::confirmed(event_id, user_id, 1, Utc::now());
        let result = store.insert_registration(&second).await;
        assert!(matches!(result, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_save_summary_detects_lost_update() {
        let store = InMemoryStore::new();
        let place = Place::create("Cafe".to_string());
        store.insert_place(&place).await.unwrap();
        let key = AggregateKey::Place(place.id);

        let summary = RatingSummary {
            average: 4.0,
            count: 1,
        };
        assert_eq!(store.save_summary(key, summary, 0).await.unwrap(), 1);

        let stale = store.save_summary(key, summary, 0).await;
        assert!(matches!(
            stale,
            Err(StoreError::ConcurrencyConflict {
                expected: 0,
                actual: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_update_review_refuses_stale_version() {
        let store = InMemoryStore::new();
        let review = Review::create(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Rating::new(2).unwrap(),
            None,
            ReviewStatus::Pending,
        );
        store.insert_review(&review).await.unwrap();

        let mut approved = review.clone();
        approved.status = ReviewStatus::Approved;
        assert_eq!(store.update_review(&approved, 0).await.unwrap(), 1);

        // Written from the version-0 copy, so it would undo the approval
        let mut rerated = review.clone();
        rerated.rating = Rating::new(5).unwrap();
        let stale = store.update_review(&rerated, 0).await;
        assert!(matches!(
            stale,
            Err(StoreError::ConcurrencyConflict {
                expected: 0,
                actual: 1,
                ..
            })
        ));

        let stored = store.get_review(review.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReviewStatus::Approved);
        assert_eq!(stored.rating.value(), 2);
        assert_eq!(stored.version, 1);

        let missing = store.update_review(&Review { id: Uuid::new_v4(), ..stored }, 1).await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_author_stats_default_to_empty() {
        let store = InMemoryStore::new();
        let loaded = store
            .load_summary(AggregateKey::Author(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(loaded.version, 0);
        assert_eq!(loaded.value, RatingSummary::empty());
    }

    #[tokio::test]
    async fn test_recompute_in_transaction_respects_capability() {
        let store = InMemoryStore::with_capability(TransactionCapability::Unsupported);
        let result = store
            .recompute_in_transaction(AggregateKey::Author(Uuid::new_v4()), |r| {
                RatingSummary::from_reviews(r)
            })
            .await;
        assert!(matches!(result, Err(StoreError::TransactionsUnsupported)));
    }

    #[tokio::test]
    async fn test_recompute_in_transaction_persists() {
        let store = InMemoryStore::new();
        let place = Place::create("Bar".to_string());
        store.insert_place(&place).await.unwrap();

        let review = Review::create(
            place.id,
            Uuid::new_v4(),
            Rating::new(5).unwrap(),
            None,
            ReviewStatus::Approved,
        );
        store.insert_review(&review).await.unwrap();

        let saved = store
            .recompute_in_transaction(AggregateKey::Place(place.id), |r| {
                RatingSummary::from_reviews(r)
            })
            .await
            .unwrap();
        assert_eq!(saved.version, 1);

        let place = store.get_place(place.id).await.unwrap().unwrap();
        assert_eq!(place.total_reviews, 1);
        assert_eq!(place.rating, 5.0);
    }
}
