//! Notification dispatch
//!
//! Fire-and-forget hand-off of [`Notification`]s to collaborators. Callers
//! push into a bounded channel without awaiting; a background worker drains
//! the channel into a [`NotificationSink`]. A full or closed channel drops
//! the notification with a warning and never fails the caller.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::Notification;

/// Destination of drained notifications (push/email bridge, analytics, ...)
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError>;
}

/// Delivery failure reported by a sink
#[derive(Debug, thiserror::Error)]
#[error("Notification delivery failed: {0}")]
pub struct SinkError(pub String);

/// Sink that writes notifications to the structured log
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        tracing::info!(
            kind = notification.kind.as_str(),
            event_id = %notification.event_id,
            user_id = %notification.user_id,
            metadata = %notification.metadata,
            "Notification emitted"
        );
        Ok(())
    }
}

/// Non-blocking sender side
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<Notification>,
}

impl NotificationDispatcher {
    /// Create a dispatcher and the receiving end of its channel
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a notification. Never blocks and never fails the caller.
    pub fn dispatch(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::warn!(
                    kind = dropped.kind.as_str(),
                    event_id = %dropped.event_id,
                    user_id = %dropped.user_id,
                    "Notification queue full, dropping notification"
                );
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                tracing::warn!(
                    kind = dropped.kind.as_str(),
                    event_id = %dropped.event_id,
                    "Notification worker stopped, dropping notification"
                );
            }
        }
    }

    /// Queue several notifications in order
    pub fn dispatch_all(&self, notifications: impl IntoIterator<Item = Notification>) {
        for notification in notifications {
            self.dispatch(notification);
        }
    }
}

/// Background task delivering queued notifications to a sink
pub struct NotificationWorker<S: NotificationSink> {
    rx: mpsc::Receiver<Notification>,
    sink: S,
}

impl<S: NotificationSink> NotificationWorker<S> {
    pub fn new(rx: mpsc::Receiver<Notification>, sink: S) -> Self {
        Self { rx, sink }
    }

    /// Start the worker in the background.
    ///
    /// The task ends once every dispatcher clone has been dropped and the
    /// queue is drained.
    pub fn start(self) -> tokio::task::JoinHandle<u64> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(mut self) -> u64 {
        tracing::info!("Notification worker started");
        let mut delivered = 0u64;

        while let Some(notification) = self.rx.recv().await {
            match self.sink.deliver(&notification).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        kind = notification.kind.as_str(),
                        event_id = %notification.event_id,
                        "Notification delivery failed"
                    );
                }
            }
        }

        tracing::info!(delivered, "Notification worker stopped");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NotificationKind;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    fn notification(kind: NotificationKind) -> Notification {
        Notification::new(kind, Uuid::new_v4(), Uuid::new_v4(), serde_json::json!({}))
    }

    #[derive(Clone, Default)]
    struct FlakySink {
        seen: Arc<Mutex<Vec<NotificationKind>>>,
    }

    #[async_trait]
    impl NotificationSink for FlakySink {
        async fn deliver(&self, n: &Notification) -> Result<(), SinkError> {
            self.seen.lock().unwrap().push(n.kind);
            if n.kind == NotificationKind::EventCancelled {
                return Err(SinkError("smtp down".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_error() {
        let (dispatcher, mut rx) = NotificationDispatcher::channel(1);
        dispatcher.dispatch(notification(NotificationKind::RegistrationConfirmed));
        dispatcher.dispatch(notification(NotificationKind::WaitlistPromoted));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, NotificationKind::RegistrationConfirmed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_queue_is_ignored() {
        let (dispatcher, rx) = NotificationDispatcher::channel(4);
        drop(rx);
        dispatcher.dispatch(notification(NotificationKind::RegistrationCancelled));
    }

    #[tokio::test]
    async fn test_worker_survives_sink_failures() {
        let (dispatcher, rx) = NotificationDispatcher::channel(8);
        let sink = FlakySink::default();
        let handle = NotificationWorker::new(rx, sink.clone()).start();

        dispatcher.dispatch_all(vec![
            notification(NotificationKind::EventCancelled),
            notification(NotificationKind::RegistrationConfirmed),
        ]);
        drop(dispatcher);

        let delivered = handle.await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(sink.seen.lock().unwrap().len(), 2);
    }
}
