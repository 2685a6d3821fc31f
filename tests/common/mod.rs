//! Common test utilities
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::mpsc;
use uuid::Uuid;

use city_events::admission::{AdmissionController, CreateEventCommand};
use city_events::config::AdmissionSettings;
use city_events::domain::{
    AggregateKey, Event, EventStatus, Notification, Place, RatingSummary, Registration,
    RegistrationStatus, Review, Versioned,
};
use city_events::notifications::NotificationDispatcher;
use city_events::store::{
    InMemoryStore, RecomputeFn, Repository, StoreError, TransactionCapability,
};

/// Admission controller over a fresh in-memory store, plus the receiving
/// end of its notification channel
pub fn admission() -> (AdmissionController, mpsc::Receiver<Notification>) {
    admission_with_store(Arc::new(InMemoryStore::new()))
}

pub fn admission_with_store(
    store: Arc<dyn Repository>,
) -> (AdmissionController, mpsc::Receiver<Notification>) {
    let (notifier, rx) = NotificationDispatcher::channel(1024);
    let controller = AdmissionController::new(store, notifier, AdmissionSettings::default());
    (controller, rx)
}

pub async fn create_event(
    controller: &AdmissionController,
    capacity: Option<u32>,
    allow_waitlist: bool,
    max_tickets_per_user: u32,
) -> Event {
    let mut command =
        CreateEventCommand::new("Test event", capacity).with_max_tickets(max_tickets_per_user);
    if allow_waitlist {
        command = command.with_waitlist();
    }
    controller.create_event(command).await.unwrap()
}

/// Everything queued so far
pub fn drain(rx: &mut mpsc::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

pub fn count_status(registrations: &[Registration], status: RegistrationStatus) -> usize {
    registrations.iter().filter(|r| r.status == status).count()
}

/// In-memory store with injectable faults.
///
/// Aggregate writes can be made to lose races: for the optimistic path each
/// injected conflict performs a real concurrent save just before the
/// caller's save, so the caller's version check fails for the same reason it
/// would in production; for the transactional path the transaction reports a
/// conflict and aborts. Registration updates can be made to fail outright,
/// and review reads can be slowed down to widen read-modify-write windows.
pub struct FaultyStore {
    inner: InMemoryStore,
    conflicts_left: AtomicU32,
    pub conflicts_injected: AtomicU32,
    /// Registration updates still allowed; `u32::MAX` means unlimited
    registration_updates_left: AtomicU32,
    review_read_delay_ms: AtomicU64,
}

impl FaultyStore {
    pub fn new(capability: TransactionCapability, conflicts: u32) -> Self {
        Self {
            inner: InMemoryStore::with_capability(capability),
            conflicts_left: AtomicU32::new(conflicts),
            conflicts_injected: AtomicU32::new(0),
            registration_updates_left: AtomicU32::new(u32::MAX),
            review_read_delay_ms: AtomicU64::new(0),
        }
    }

    /// Make the next `conflicts` aggregate writes lose their race
    pub fn arm(&self, conflicts: u32) {
        self.conflicts_left.store(conflicts, Ordering::SeqCst);
    }

    pub fn injected(&self) -> u32 {
        self.conflicts_injected.load(Ordering::SeqCst)
    }

    /// Let `successes` registration updates through, then fail every one
    pub fn fail_registration_updates_after(&self, successes: u32) {
        self.registration_updates_left.store(successes, Ordering::SeqCst);
    }

    /// Stop failing registration updates
    pub fn heal(&self) {
        self.registration_updates_left.store(u32::MAX, Ordering::SeqCst);
    }

    pub fn delay_review_reads(&self, delay: Duration) {
        self.review_read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn take_conflict(&self) -> bool {
        let took = self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            self.conflicts_injected.fetch_add(1, Ordering::SeqCst);
        }
        took
    }

    fn take_registration_update(&self) -> bool {
        self.registration_updates_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n == u32::MAX {
                    Some(n)
                } else {
                    n.checked_sub(1)
                }
            })
            .is_ok()
    }
}

#[async_trait]
impl Repository for FaultyStore {
    fn transaction_capability(&self) -> TransactionCapability {
        self.inner.transaction_capability()
    }

    async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        self.inner.insert_event(event).await
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
        self.inner.get_event(event_id).await
    }

    async fn update_event_status(
        &self,
        event_id: Uuid,
        status: EventStatus,
    ) -> Result<(), StoreError> {
        self.inner.update_event_status(event_id, status).await
    }

    async fn insert_registration(&self, registration: &Registration) -> Result<(), StoreError> {
        self.inner.insert_registration(registration).await
    }

    async fn update_registration(&self, registration: &Registration) -> Result<(), StoreError> {
        if !self.take_registration_update() {
            return Err(StoreError::Unavailable(
                "injected registration write failure".to_string(),
            ));
        }
        self.inner.update_registration(registration).await
    }

    async fn find_active_registration(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Registration>, StoreError> {
        self.inner.find_active_registration(event_id, user_id).await
    }

    async fn list_registrations(
        &self,
        event_id: Uuid,
        status: Option<RegistrationStatus>,
    ) -> Result<Vec<Registration>, StoreError> {
        self.inner.list_registrations(event_id, status).await
    }

    async fn insert_place(&self, place: &Place) -> Result<(), StoreError> {
        self.inner.insert_place(place).await
    }

    async fn get_place(&self, place_id: Uuid) -> Result<Option<Place>, StoreError> {
        self.inner.get_place(place_id).await
    }

    async fn insert_review(&self, review: &Review) -> Result<(), StoreError> {
        self.inner.insert_review(review).await
    }

    async fn update_review(
        &self,
        review: &Review,
        expected_version: i64,
    ) -> Result<i64, StoreError> {
        self.inner.update_review(review, expected_version).await
    }

    async fn delete_review(&self, review_id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_review(review_id).await
    }

    async fn get_review(&self, review_id: Uuid) -> Result<Option<Review>, StoreError> {
        let delay = self.review_read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.get_review(review_id).await
    }

    async fn list_reviews(&self, key: AggregateKey) -> Result<Vec<Review>, StoreError> {
        self.inner.list_reviews(key).await
    }

    async fn load_summary(
        &self,
        key: AggregateKey,
    ) -> Result<Versioned<RatingSummary>, StoreError> {
        self.inner.load_summary(key).await
    }

    async fn save_summary(
        &self,
        key: AggregateKey,
        summary: RatingSummary,
        expected_version: i64,
    ) -> Result<i64, StoreError> {
        if self.take_conflict() {
            // A concurrent writer saves a stale value first
            let current = self.inner.load_summary(key).await?;
            self.inner
                .save_summary(key, RatingSummary::empty(), current.version)
                .await?;
        }
        self.inner.save_summary(key, summary, expected_version).await
    }

    async fn recompute_in_transaction(
        &self,
        key: AggregateKey,
        compute: RecomputeFn,
    ) -> Result<Versioned<RatingSummary>, StoreError> {
        if self.take_conflict() {
            return Err(StoreError::ConcurrencyConflict {
                key: key.to_string(),
                expected: 0,
                actual: 0,
            });
        }
        self.inner.recompute_in_transaction(key, compute).await
    }
}

/// Setup test database - truncate tables
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::query(
        "TRUNCATE TABLE registrations, events, reviews, places, user_review_stats CASCADE",
    )
    .execute(&pool)
    .await
    .expect("Failed to clean up DB");

    pool
}
