//! Waitlist promotion
//!
//! Walks an event's waitlist in arrival order and confirms entries while
//! seats remain. Entries that do not fit are skipped so smaller requests
//! further back can use the seats.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::{Notification, NotificationKind, Registration, RegistrationStatus};
use crate::error::AppResult;
use crate::notifications::NotificationDispatcher;
use crate::store::Repository;

use super::capacity::{CapacityTracker, EventSection, Reservation};

/// Promotes waitlisted registrations into freed seats
#[derive(Clone)]
pub struct WaitlistPromoter {
    repo: Arc<dyn Repository>,
    tracker: Arc<CapacityTracker>,
    notifier: NotificationDispatcher,
}

impl WaitlistPromoter {
    pub fn new(
        repo: Arc<dyn Repository>,
        tracker: Arc<CapacityTracker>,
        notifier: NotificationDispatcher,
    ) -> Self {
        Self {
            repo,
            tracker,
            notifier,
        }
    }

    /// Promote as many waitlisted registrations as now fit.
    ///
    /// `freed_count` is informational; the budget is the event's current
    /// available capacity, so calling this again is harmless.
    pub async fn promote(&self, event_id: Uuid, freed_count: u32) -> AppResult<Vec<Registration>> {
        let mut section = self.tracker.enter(event_id).await?;
        let promoted = self.promote_within(&mut section, freed_count).await?;
        drop(section);

        self.notify(&promoted);
        Ok(promoted)
    }

    /// Promotion body for callers already inside the event's section.
    ///
    /// Notifications are not sent here; the caller sends them with
    /// [`WaitlistPromoter::notify`] after leaving the section.
    pub(crate) async fn promote_within(
        &self,
        section: &mut EventSection,
        freed_count: u32,
    ) -> AppResult<Vec<Registration>> {
        let event_id = section.event_id();
        if section.event().is_cancelled() || section.available() == Some(0) {
            return Ok(Vec::new());
        }

        let waitlist = self
            .repo
            .list_registrations(event_id, Some(RegistrationStatus::Waitlisted))
            .await?;

        let mut promoted = Vec::new();
        for mut registration in waitlist {
            if section.available() == Some(0) {
                break;
            }
            let ticket_count = registration.ticket_count;
            if let Reservation::WouldExceed { .. } = section.try_reserve(ticket_count) {
                tracing::debug!(
                    %event_id,
                    registration_id = %registration.id,
                    ticket_count,
                    "Waitlisted request does not fit, skipping"
                );
                continue;
            }
            if !registration.promote() {
                section.release(ticket_count);
                continue;
            }
            if let Err(e) = self.repo.update_registration(&registration).await {
                section.release(ticket_count);
                tracing::error!(
                    %event_id,
                    registration_id = %registration.id,
                    error = %e,
                    "Failed to persist waitlist promotion, stopping"
                );
                if promoted.is_empty() {
                    return Err(e.into());
                }
                break;
            }
            section.waitlist_removed();
            promoted.push(registration);
        }

        tracing::info!(
            %event_id,
            freed_count,
            promoted = promoted.len(),
            "Waitlist promotion finished"
        );
        Ok(promoted)
    }

    pub(crate) fn notify(&self, promoted: &[Registration]) {
        self.notifier.dispatch_all(
            promoted
                .iter()
                .map(|r| Notification::for_registration(NotificationKind::WaitlistPromoted, r)),
        );
    }
}
