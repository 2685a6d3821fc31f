//! Shared handler state

use std::sync::Arc;

use crate::admission::AdmissionController;
use crate::config::{AdmissionSettings, ConsistencySettings};
use crate::consistency::AggregateConsistencyEngine;
use crate::notifications::NotificationDispatcher;
use crate::reviews::ReviewService;
use crate::store::Repository;

/// Services shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub admission: AdmissionController,
    pub reviews: Arc<ReviewService>,
    pub consistency: Arc<AggregateConsistencyEngine>,
}

impl AppState {
    /// Wire every service onto one repository.
    ///
    /// The recompute strategy is chosen here from the repository's
    /// transaction capability and stays fixed for the process lifetime.
    pub fn new(
        repo: Arc<dyn Repository>,
        notifier: NotificationDispatcher,
        admission: AdmissionSettings,
        consistency: ConsistencySettings,
        auto_approve_reviews: bool,
    ) -> Self {
        let engine = Arc::new(AggregateConsistencyEngine::new(repo.clone(), consistency));
        Self {
            admission: AdmissionController::new(repo.clone(), notifier, admission),
            reviews: Arc::new(ReviewService::new(repo, engine.clone(), auto_approve_reviews)),
            consistency: engine,
        }
    }
}
