//! Aggregate Consistency Engine
//!
//! Keeps `Place.rating` and per-author review stats equal to a recompute
//! over their approved reviews. The two aggregates are independent: a review
//! change triggers both, and one failing never stops the other.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::ConsistencySettings;
use crate::domain::{
    AggregateKey, DomainError, Place, RatingSummary, UserReviewStats, Versioned,
};
use crate::error::{AppError, AppResult};
use crate::store::{Repository, StoreError};

use super::strategy::{OptimisticRetryRecompute, RecomputeStrategy, TransactionalRecompute};

/// Outcome of recomputing both aggregates touched by a review change
#[derive(Debug)]
pub struct RecomputeReport {
    pub place: AppResult<Versioned<RatingSummary>>,
    pub author: AppResult<Versioned<RatingSummary>>,
}

impl RecomputeReport {
    pub fn is_complete(&self) -> bool {
        self.place.is_ok() && self.author.is_ok()
    }
}

/// Result of one reconciliation pass over pending aggregates
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub attempted: usize,
    pub repaired: usize,
    pub still_pending: usize,
    pub completed_at: DateTime<Utc>,
}

/// Recomputes derived rating aggregates
pub struct AggregateConsistencyEngine {
    repo: Arc<dyn Repository>,
    strategy: Arc<dyn RecomputeStrategy>,
    pending: Mutex<HashSet<AggregateKey>>,
}

impl AggregateConsistencyEngine {
    /// Build the engine with the strategy the store supports
    pub fn new(repo: Arc<dyn Repository>, settings: ConsistencySettings) -> Self {
        let strategy: Arc<dyn RecomputeStrategy> = if repo.transaction_capability().is_supported()
        {
            Arc::new(TransactionalRecompute)
        } else {
            Arc::new(OptimisticRetryRecompute::new(settings))
        };
        Self::with_strategy(repo, strategy)
    }

    pub fn with_strategy(repo: Arc<dyn Repository>, strategy: Arc<dyn RecomputeStrategy>) -> Self {
        tracing::info!(strategy = strategy.name(), "Aggregate recompute strategy selected");
        Self {
            repo,
            strategy,
            pending: Mutex::new(HashSet::new()),
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Recompute one aggregate.
    ///
    /// A failure leaves the key pending for reconciliation; success clears it.
    pub async fn recompute(&self, key: AggregateKey) -> AppResult<Versioned<RatingSummary>> {
        match self.strategy.recompute(self.repo.as_ref(), key).await {
            Ok(saved) => {
                self.clear_pending(key);
                tracing::debug!(
                    aggregate = %key,
                    average = saved.value.average,
                    count = saved.value.count,
                    version = saved.version,
                    "Aggregate recomputed"
                );
                Ok(saved)
            }
            Err(e) => {
                if !is_missing_root(&e) {
                    self.mark_pending(key);
                }
                Err(e)
            }
        }
    }

    /// Recompute `Place.rating` / `Place.total_reviews`
    pub async fn recompute_place_rating(&self, place_id: Uuid) -> AppResult<Place> {
        self.recompute(AggregateKey::Place(place_id)).await?;
        self.repo
            .get_place(place_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Place", place_id).into())
    }

    /// Recompute the review stats of an author
    pub async fn recompute_user_stats(&self, user_id: Uuid) -> AppResult<UserReviewStats> {
        let saved = self.recompute(AggregateKey::Author(user_id)).await?;
        Ok(UserReviewStats::from_summary(user_id, saved))
    }

    /// Read the stored author stats without recomputing
    pub async fn user_stats(&self, user_id: Uuid) -> AppResult<UserReviewStats> {
        let stored = self.repo.load_summary(AggregateKey::Author(user_id)).await?;
        Ok(UserReviewStats::from_summary(user_id, stored))
    }

    /// Recompute both aggregates a review belongs to.
    ///
    /// Failures are logged and reported; they never undo the review write
    /// that triggered them.
    pub async fn on_review_changed(&self, place_id: Uuid, author_id: Uuid) -> RecomputeReport {
        let (place, author) = tokio::join!(
            self.recompute(AggregateKey::Place(place_id)),
            self.recompute(AggregateKey::Author(author_id)),
        );

        if let Err(e) = &place {
            tracing::error!(%place_id, error = %e, "Place rating recompute failed");
        }
        if let Err(e) = &author {
            tracing::error!(%author_id, error = %e, "User stats recompute failed");
        }

        RecomputeReport { place, author }
    }

    /// Retry every aggregate whose last recompute failed
    pub async fn reconcile_pending(&self) -> ReconcileReport {
        let keys = self.pending_keys();
        let mut report = ReconcileReport {
            attempted: keys.len(),
            ..Default::default()
        };

        for key in keys {
            match self.recompute(key).await {
                Ok(_) => report.repaired += 1,
                Err(e) => {
                    tracing::warn!(aggregate = %key, error = %e, "Aggregate still inconsistent");
                }
            }
        }

        report.still_pending = self.pending_count();
        report.completed_at = Utc::now();
        report
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn pending_keys(&self) -> Vec<AggregateKey> {
        self.pending
            .lock()
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default()
    }

    fn mark_pending(&self, key: AggregateKey) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(key);
        }
    }

    fn clear_pending(&self, key: AggregateKey) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&key);
        }
    }
}

/// A deleted or unknown place can never be repaired by retrying
fn is_missing_root(err: &AppError) -> bool {
    matches!(
        err,
        AppError::Domain(DomainError::NotFound { .. })
            | AppError::Store(StoreError::NotFound { .. })
    )
}
