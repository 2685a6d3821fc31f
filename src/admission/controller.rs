//! Admission Controller
//!
//! Decides confirmed / waitlisted / rejected for each registration request
//! and owns the cancellation paths. Every decision for an event is taken
//! inside that event's critical section; notifications go out only after the
//! section is released.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::AdmissionSettings;
use crate::domain::{
    DomainError, Event, EventStatus, Notification, NotificationKind, Registration,
    RegistrationStatus,
};
use crate::error::{AppError, AppResult};
use crate::notifications::NotificationDispatcher;
use crate::store::{Repository, StoreError};

use super::capacity::{Availability, CapacityTracker, Reservation};
use super::waitlist::WaitlistPromoter;
use super::{
    CancellationResult, CreateEventCommand, EventCancellationResult, RegisterCommand,
    RegistrationResult,
};

/// Admission of users into capacity-limited events
#[derive(Clone)]
pub struct AdmissionController {
    repo: Arc<dyn Repository>,
    tracker: Arc<CapacityTracker>,
    promoter: WaitlistPromoter,
    notifier: NotificationDispatcher,
}

impl AdmissionController {
    pub fn new(
        repo: Arc<dyn Repository>,
        notifier: NotificationDispatcher,
        settings: AdmissionSettings,
    ) -> Self {
        let tracker = Arc::new(CapacityTracker::new(repo.clone(), settings.lock_timeout));
        let promoter = WaitlistPromoter::new(repo.clone(), tracker.clone(), notifier.clone());
        Self {
            repo,
            tracker,
            promoter,
            notifier,
        }
    }

    pub fn tracker(&self) -> &Arc<CapacityTracker> {
        &self.tracker
    }

    pub fn promoter(&self) -> &WaitlistPromoter {
        &self.promoter
    }

    /// Create a new event
    pub async fn create_event(&self, command: CreateEventCommand) -> AppResult<Event> {
        let event = Event::create(
            command.title,
            command.capacity,
            command.allow_waitlist,
            command.max_tickets_per_user,
        )?;
        self.repo.insert_event(&event).await?;

        tracing::info!(
            event_id = %event.id,
            capacity = ?event.capacity,
            allow_waitlist = event.allow_waitlist,
            "Event created"
        );
        Ok(event)
    }

    pub async fn get_event(&self, event_id: Uuid) -> AppResult<Event> {
        self.repo
            .get_event(event_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Event", event_id).into())
    }

    /// Admit a registration request.
    ///
    /// # Errors
    /// - `Validation` for a bad ticket count or a cancelled event
    /// - `DuplicateRegistration` if the user already holds an active registration
    /// - `CapacityExceeded` if the event is full and has no waitlist
    /// - `Contention` if the event's section could not be entered in time
    pub async fn request_registration(
        &self,
        command: RegisterCommand,
    ) -> AppResult<RegistrationResult> {
        let RegisterCommand {
            event_id,
            user_id,
            ticket_count,
        } = command;

        let mut section = self.tracker.enter(event_id).await?;
        let ticket_count = section.event().validate_ticket_count(ticket_count)?;

        if self
            .repo
            .find_active_registration(event_id, user_id)
            .await?
            .is_some()
        {
            return Err(DomainError::DuplicateRegistration { event_id, user_id }.into());
        }

        let timestamp = section.next_arrival();
        let registration = match section.try_reserve(ticket_count) {
            Reservation::Reserved => {
                Registration::confirmed(event_id, user_id, ticket_count, timestamp)
            }
            // A request larger than the whole event could never be promoted
            Reservation::WouldExceed { capacity }
                if section.event().allow_waitlist && ticket_count <= capacity =>
            {
                Registration::waitlisted(event_id, user_id, ticket_count, timestamp)
            }
            Reservation::WouldExceed { capacity } => {
                return Err(DomainError::CapacityExceeded { event_id, capacity }.into());
            }
        };

        if let Err(e) = self.repo.insert_registration(&registration).await {
            if registration.status == RegistrationStatus::Confirmed {
                section.release(ticket_count);
            }
            return Err(match e {
                StoreError::Duplicate(_) => {
                    DomainError::DuplicateRegistration { event_id, user_id }.into()
                }
                other => AppError::from(other),
            });
        }
        if registration.status == RegistrationStatus::Waitlisted {
            section.waitlist_added();
        }
        drop(section);

        tracing::info!(
            %event_id,
            %user_id,
            registration_id = %registration.id,
            ticket_count,
            status = registration.status.as_str(),
            "Registration admitted"
        );
        self.notifier.dispatch(Notification::admitted(&registration));

        Ok(RegistrationResult {
            registration_id: registration.id,
            status: registration.status,
        })
    }

    /// Cancel a user's active registration.
    ///
    /// Seats freed by a confirmed registration are offered to the waitlist
    /// before returning.
    pub async fn cancel_registration(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<CancellationResult> {
        let mut section = self.tracker.enter(event_id).await?;

        let mut registration = self
            .repo
            .find_active_registration(event_id, user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Registration", format!("{event_id}/{user_id}")))?;

        let previous_status = registration.cancel()?;
        self.repo.update_registration(&registration).await?;

        let mut released_seats = 0;
        let mut promoted = Vec::new();
        match previous_status {
            RegistrationStatus::Confirmed => {
                released_seats = registration.ticket_count;
                section.release(released_seats);
                match self.promoter.promote_within(&mut section, released_seats).await {
                    Ok(p) => promoted = p,
                    Err(e) => {
                        tracing::error!(
                            %event_id,
                            error = %e,
                            "Waitlist promotion after cancellation failed"
                        );
                    }
                }
            }
            RegistrationStatus::Waitlisted => section.waitlist_removed(),
            RegistrationStatus::Cancelled => {}
        }
        drop(section);

        tracing::info!(
            %event_id,
            %user_id,
            registration_id = %registration.id,
            previous_status = previous_status.as_str(),
            released_seats,
            promoted = promoted.len(),
            "Registration cancelled"
        );
        self.notifier.dispatch(Notification::for_registration(
            NotificationKind::RegistrationCancelled,
            &registration,
        ));
        self.promoter.notify(&promoted);

        Ok(CancellationResult {
            registration_id: registration.id,
            previous_status,
            released_seats,
            promoted,
        })
    }

    /// Cancel an event and every active registration in it.
    ///
    /// The cached ledger follows each store write, so a failure part way
    /// leaves the event cancelled with accurate seat counts; calling this
    /// again finishes the remaining registrations.
    pub async fn cancel_event(&self, event_id: Uuid) -> AppResult<EventCancellationResult> {
        let mut section = self.tracker.enter(event_id).await?;
        if !section.event().is_cancelled() {
            self.repo
                .update_event_status(event_id, EventStatus::Cancelled)
                .await?;
            section.mark_cancelled();
        }

        let mut cancelled = Vec::new();
        let mut failure = None;
        for mut registration in self.repo.list_registrations(event_id, None).await? {
            if !registration.is_active() {
                continue;
            }
            let previous = match registration.cancel() {
                Ok(previous) => previous,
                Err(e) => {
                    failure = Some(AppError::from(e));
                    break;
                }
            };
            if let Err(e) = self.repo.update_registration(&registration).await {
                failure = Some(AppError::from(e));
                break;
            }
            match previous {
                RegistrationStatus::Confirmed => section.release(registration.ticket_count),
                RegistrationStatus::Waitlisted => section.waitlist_removed(),
                RegistrationStatus::Cancelled => {}
            }
            cancelled.push(registration);
        }

        if failure.is_none() {
            self.tracker.retire(section);
        } else {
            drop(section);
        }

        self.notifier.dispatch_all(
            cancelled
                .iter()
                .map(|r| Notification::for_registration(NotificationKind::EventCancelled, r)),
        );

        if let Some(e) = failure {
            tracing::error!(
                %event_id,
                cancelled_registrations = cancelled.len(),
                error = %e,
                "Event cancellation stopped part way"
            );
            return Err(e);
        }

        tracing::info!(
            %event_id,
            cancelled_registrations = cancelled.len(),
            "Event cancelled"
        );
        Ok(EventCancellationResult {
            event_id,
            cancelled_registrations: cancelled.len(),
        })
    }

    pub async fn availability(&self, event_id: Uuid) -> AppResult<Availability> {
        self.tracker.availability(event_id).await
    }

    /// Offer currently free seats to the waitlist
    pub async fn promote_waitlist(&self, event_id: Uuid) -> AppResult<Vec<Registration>> {
        self.promoter.promote(event_id, 0).await
    }

    /// Registrations of an event in arrival order
    pub async fn list_registrations(
        &self,
        event_id: Uuid,
        status: Option<RegistrationStatus>,
    ) -> AppResult<Vec<Registration>> {
        self.get_event(event_id).await?;
        Ok(self.repo.list_registrations(event_id, status).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use tokio::sync::mpsc;

    fn controller() -> (AdmissionController, mpsc::Receiver<Notification>) {
        let (notifier, rx) = NotificationDispatcher::channel(64);
        let controller = AdmissionController::new(
            Arc::new(InMemoryStore::new()),
            notifier,
            AdmissionSettings::default(),
        );
        (controller, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Notification>) -> Vec<NotificationKind> {
        let mut kinds = Vec::new();
        while let Ok(n) = rx.try_recv() {
            kinds.push(n.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn test_register_then_full() {
        let (controller, mut rx) = controller();
        let event = controller
            .create_event(CreateEventCommand::new("Jazz night", Some(1)))
            .await
            .unwrap();

        let first = controller
            .request_registration(RegisterCommand::new(event.id, Uuid::new_v4(), 1))
            .await
            .unwrap();
        assert_eq!(first.status, RegistrationStatus::Confirmed);

        let second = controller
            .request_registration(RegisterCommand::new(event.id, Uuid::new_v4(), 1))
            .await;
        assert!(matches!(
            second.unwrap_err().as_domain(),
            Some(DomainError::CapacityExceeded { capacity: 1, .. })
        ));

        assert_eq!(drain(&mut rx), vec![NotificationKind::RegistrationConfirmed]);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let (controller, _rx) = controller();
        let event = controller
            .create_event(CreateEventCommand::new("Yoga", None).with_max_tickets(2))
            .await
            .unwrap();
        let user = Uuid::new_v4();

        controller
            .request_registration(RegisterCommand::new(event.id, user, 2))
            .await
            .unwrap();
        let again = controller
            .request_registration(RegisterCommand::new(event.id, user, 1))
            .await;

        assert!(matches!(
            again.unwrap_err().as_domain(),
            Some(DomainError::DuplicateRegistration { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_ticket_counts() {
        let (controller, _rx) = controller();
        let event = controller
            .create_event(CreateEventCommand::new("Yoga", Some(10)).with_max_tickets(3))
            .await
            .unwrap();

        for count in [0, -1, 4] {
            let result = controller
                .request_registration(RegisterCommand::new(event.id, Uuid::new_v4(), count))
                .await;
            assert!(matches!(
                result.unwrap_err().as_domain(),
                Some(DomainError::Validation(_))
            ));
        }
        assert_eq!(controller.availability(event.id).await.unwrap().confirmed_seats, 0);
    }

    #[tokio::test]
    async fn test_request_larger_than_event_is_not_waitlisted() {
        let (controller, mut rx) = controller();
        let event = controller
            .create_event(
                CreateEventCommand::new("Choir", Some(2))
                    .with_max_tickets(5)
                    .with_waitlist(),
            )
            .await
            .unwrap();

        let result = controller
            .request_registration(RegisterCommand::new(event.id, Uuid::new_v4(), 3))
            .await;
        assert!(matches!(
            result.unwrap_err().as_domain(),
            Some(DomainError::CapacityExceeded { capacity: 2, .. })
        ));

        // A request that fits an empty event still queues once it is full
        controller
            .request_registration(RegisterCommand::new(event.id, Uuid::new_v4(), 2))
            .await
            .unwrap();
        let queued = controller
            .request_registration(RegisterCommand::new(event.id, Uuid::new_v4(), 2))
            .await
            .unwrap();
        assert_eq!(queued.status, RegistrationStatus::Waitlisted);

        let availability = controller.availability(event.id).await.unwrap();
        assert_eq!(availability.confirmed_seats, 2);
        assert_eq!(availability.waitlisted, 1);
        assert_eq!(
            drain(&mut rx),
            vec![
                NotificationKind::RegistrationConfirmed,
                NotificationKind::RegistrationWaitlisted
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_waitlisted_does_not_release_seats() {
        let (controller, _rx) = controller();
        let event = controller
            .create_event(CreateEventCommand::new("Film", Some(1)).with_waitlist())
            .await
            .unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        controller
            .request_registration(RegisterCommand::new(event.id, a, 1))
            .await
            .unwrap();
        let waiting = controller
            .request_registration(RegisterCommand::new(event.id, b, 1))
            .await
            .unwrap();
        assert_eq!(waiting.status, RegistrationStatus::Waitlisted);

        let cancelled = controller.cancel_registration(event.id, b).await.unwrap();
        assert_eq!(cancelled.previous_status, RegistrationStatus::Waitlisted);
        assert_eq!(cancelled.released_seats, 0);

        let availability = controller.availability(event.id).await.unwrap();
        assert_eq!(availability.confirmed_seats, 1);
        assert_eq!(availability.waitlisted, 0);
    }

    #[tokio::test]
    async fn test_cancel_event_cancels_everyone() {
        let (controller, mut rx) = controller();
        let event = controller
            .create_event(CreateEventCommand::new("Market", Some(1)).with_waitlist())
            .await
            .unwrap();
        for _ in 0..3 {
            controller
                .request_registration(RegisterCommand::new(event.id, Uuid::new_v4(), 1))
                .await
                .unwrap();
        }
        drain(&mut rx);

        let result = controller.cancel_event(event.id).await.unwrap();
        assert_eq!(result.cancelled_registrations, 3);
        assert_eq!(drain(&mut rx), vec![NotificationKind::EventCancelled; 3]);

        let late = controller
            .request_registration(RegisterCommand::new(event.id, Uuid::new_v4(), 1))
            .await;
        assert!(matches!(
            late.unwrap_err().as_domain(),
            Some(DomainError::Validation(_))
        ));

        let again = controller.cancel_event(event.id).await.unwrap();
        assert_eq!(again.cancelled_registrations, 0);
    }
}
