//! Capacity tracker
//!
//! Holds the authoritative confirmed-seat count per event and serializes
//! every capacity decision for that event. Each event gets its own async
//! mutex; the registry map is only locked long enough to look the mutex up,
//! so requests for different events never wait on each other.
//!
//! Seat counts are hydrated from the repository the first time an event is
//! entered and are kept in memory afterwards. Every write that changes them
//! goes through an [`EventSection`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{DomainError, Event, EventStatus, RegistrationStatus};
use crate::error::{AppError, AppResult};
use crate::store::Repository;

/// Outcome of a seat reservation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Reserved,
    WouldExceed { capacity: u32 },
}

/// Point-in-time seat view of an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub event_id: Uuid,
    pub capacity: Option<u32>,
    pub confirmed_seats: u32,
    pub waitlisted: u32,
    /// `None` when capacity is unbounded
    pub available: Option<u32>,
}

#[derive(Debug, Default)]
struct EventLedger {
    event: Option<Event>,
    confirmed_seats: u32,
    waitlisted: u32,
    last_arrival: Option<DateTime<Utc>>,
}

/// Exclusive access to one event's capacity state.
///
/// Holding a section is holding the event's critical section; drop it as
/// soon as the decision is persisted and before talking to collaborators.
pub struct EventSection {
    event_id: Uuid,
    event: Event,
    ledger: OwnedMutexGuard<EventLedger>,
}

impl EventSection {
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// The event as seen inside the section
    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn confirmed_seats(&self) -> u32 {
        self.ledger.confirmed_seats
    }

    /// Seats still free; `None` for unbounded events
    pub fn available(&self) -> Option<u32> {
        self.event
            .capacity
            .map(|cap| cap.saturating_sub(self.ledger.confirmed_seats))
    }

    /// Reserve `ticket_count` seats or refuse without changing anything.
    pub fn try_reserve(&mut self, ticket_count: u32) -> Reservation {
        if let Some(capacity) = self.event.capacity {
            let wanted = self.ledger.confirmed_seats.saturating_add(ticket_count);
            if wanted > capacity {
                return Reservation::WouldExceed { capacity };
            }
        }
        self.ledger.confirmed_seats += ticket_count;
        Reservation::Reserved
    }

    /// Give back seats of a cancelled confirmed registration.
    pub fn release(&mut self, ticket_count: u32) {
        self.ledger.confirmed_seats = self.ledger.confirmed_seats.saturating_sub(ticket_count);
    }

    pub(crate) fn waitlist_added(&mut self) {
        self.ledger.waitlisted += 1;
    }

    pub(crate) fn waitlist_removed(&mut self) {
        self.ledger.waitlisted = self.ledger.waitlisted.saturating_sub(1);
    }

    /// Next arrival timestamp, strictly increasing within this event.
    ///
    /// Kept at microsecond precision so the order survives a round trip
    /// through `TIMESTAMPTZ`.
    pub fn next_arrival(&mut self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let next = match self.ledger.last_arrival {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.ledger.last_arrival = Some(next);
        next
    }

    /// Mark the cached event cancelled once the store says so
    pub(crate) fn mark_cancelled(&mut self) {
        self.event.status = EventStatus::Cancelled;
        self.ledger.event = Some(self.event.clone());
    }

    pub fn availability(&self) -> Availability {
        Availability {
            event_id: self.event_id,
            capacity: self.event.capacity,
            confirmed_seats: self.ledger.confirmed_seats,
            waitlisted: self.ledger.waitlisted,
            available: self.available(),
        }
    }
}

/// Registry of per-event critical sections
pub struct CapacityTracker {
    repo: Arc<dyn Repository>,
    sections: Mutex<HashMap<Uuid, Arc<AsyncMutex<EventLedger>>>>,
    lock_timeout: Duration,
}

impl CapacityTracker {
    pub fn new(repo: Arc<dyn Repository>, lock_timeout: Duration) -> Self {
        Self {
            repo,
            sections: Mutex::new(HashMap::new()),
            lock_timeout,
        }
    }

    fn registry(
        &self,
    ) -> AppResult<std::sync::MutexGuard<'_, HashMap<Uuid, Arc<AsyncMutex<EventLedger>>>>> {
        self.sections
            .lock()
            .map_err(|_| AppError::Internal("capacity registry lock poisoned".to_string()))
    }

    fn section_lock(&self, event_id: Uuid) -> AppResult<Arc<AsyncMutex<EventLedger>>> {
        Ok(self
            .registry()?
            .entry(event_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(EventLedger::default())))
            .clone())
    }

    /// Drop the registry entry of an event if nobody but `lock` refers to it.
    ///
    /// Clones are only handed out under the registry lock, so a count of two
    /// (the map and `lock`) means no caller is waiting on or holding it.
    fn evict_if_idle(&self, event_id: Uuid, lock: Arc<AsyncMutex<EventLedger>>) {
        let Ok(mut sections) = self.registry() else {
            return;
        };
        let idle = sections
            .get(&event_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            sections.remove(&event_id);
        }
    }

    /// Number of events with a live critical section entry
    pub fn tracked_events(&self) -> usize {
        self.registry().map(|s| s.len()).unwrap_or(0)
    }

    /// Leave a section and forget the event's ledger if nobody else needs it.
    ///
    /// Used for events that will not take further admissions; a later call
    /// hydrates a fresh ledger from the store.
    pub(crate) fn retire(&self, section: EventSection) {
        let EventSection {
            event_id, ledger, ..
        } = section;
        let lock = OwnedMutexGuard::mutex(&ledger).clone();
        drop(ledger);
        self.evict_if_idle(event_id, lock);
    }

    /// Enter the critical section of an event.
    ///
    /// # Errors
    /// - `DomainError::Contention` if the section is not free within the lock timeout
    /// - `DomainError::NotFound` if the event does not exist
    pub async fn enter(&self, event_id: Uuid) -> AppResult<EventSection> {
        let lock = self.section_lock(event_id)?;
        let mut ledger = tokio::time::timeout(self.lock_timeout, lock.clone().lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!(%event_id, "Timed out waiting for event critical section");
                DomainError::Contention { event_id }
            })?;

        let event = match ledger.event.clone() {
            Some(event) => event,
            None => match self.hydrate(event_id, &mut ledger).await {
                Ok(event) => event,
                Err(e) => {
                    // Unknown ids must not leave entries behind
                    drop(ledger);
                    self.evict_if_idle(event_id, lock);
                    return Err(e);
                }
            },
        };

        Ok(EventSection {
            event_id,
            event,
            ledger,
        })
    }

    async fn hydrate(&self, event_id: Uuid, ledger: &mut EventLedger) -> AppResult<Event> {
        let event = self
            .repo
            .get_event(event_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Event", event_id))?;

        let registrations = self.repo.list_registrations(event_id, None).await?;

        ledger.confirmed_seats = registrations
            .iter()
            .filter(|r| r.status == RegistrationStatus::Confirmed)
            .map(|r| r.ticket_count)
            .sum();
        ledger.waitlisted = registrations
            .iter()
            .filter(|r| r.status == RegistrationStatus::Waitlisted)
            .count() as u32;
        ledger.last_arrival = registrations.iter().map(|r| r.timestamp).max();
        ledger.event = Some(event.clone());

        tracing::debug!(
            %event_id,
            confirmed_seats = ledger.confirmed_seats,
            waitlisted = ledger.waitlisted,
            "Hydrated event capacity ledger"
        );
        Ok(event)
    }

    /// Atomically reserve seats for an event (see [`EventSection::try_reserve`]).
    pub async fn try_reserve(&self, event_id: Uuid, ticket_count: u32) -> AppResult<Reservation> {
        let mut section = self.enter(event_id).await?;
        Ok(section.try_reserve(ticket_count))
    }

    /// Release seats for an event (see [`EventSection::release`]).
    pub async fn release(&self, event_id: Uuid, ticket_count: u32) -> AppResult<()> {
        let mut section = self.enter(event_id).await?;
        section.release(ticket_count);
        Ok(())
    }

    pub async fn availability(&self, event_id: Uuid) -> AppResult<Availability> {
        let section = self.enter(event_id).await?;
        Ok(section.availability())
    }
}
