//! Recompute strategies
//!
//! How a derived rating aggregate gets rebuilt from its reviews. The store's
//! [`TransactionCapability`](crate::store::TransactionCapability) decides
//! which one runs; both produce the same value.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::config::ConsistencySettings;
use crate::domain::{AggregateKey, DomainError, RatingSummary, Review, Versioned};
use crate::error::{AppError, AppResult};
use crate::store::{Repository, StoreError};

/// Recompute function handed to the store
fn summarize(reviews: &[Review]) -> RatingSummary {
    RatingSummary::from_reviews(reviews)
}

/// One way of rebuilding and persisting a derived aggregate
#[async_trait]
pub trait RecomputeStrategy: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Reload the member reviews of `key`, recompute and persist.
    ///
    /// # Errors
    /// - `DomainError::ConsistencyRecomputeFailure` when concurrent writers
    ///   kept winning
    async fn recompute(
        &self,
        repo: &dyn Repository,
        key: AggregateKey,
    ) -> AppResult<Versioned<RatingSummary>>;
}

/// Reload, recompute and persist inside one store transaction
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionalRecompute;

#[async_trait]
impl RecomputeStrategy for TransactionalRecompute {
    fn name(&self) -> &'static str {
        "transactional"
    }

    async fn recompute(
        &self,
        repo: &dyn Repository,
        key: AggregateKey,
    ) -> AppResult<Versioned<RatingSummary>> {
        match repo.recompute_in_transaction(key, summarize).await {
            Ok(saved) => Ok(saved),
            Err(StoreError::ConcurrencyConflict { .. }) => {
                tracing::warn!(aggregate = %key, "Transactional recompute aborted on conflict");
                Err(DomainError::ConsistencyRecomputeFailure {
                    kind: key.kind(),
                    id: key.id(),
                    attempts: 1,
                }
                .into())
            }
            Err(e) => Err(AppError::from(e)),
        }
    }
}

/// Reload, recompute and save with a version check, retrying lost updates
#[derive(Debug, Clone, Copy)]
pub struct OptimisticRetryRecompute {
    max_attempts: u32,
    backoff: Duration,
}

impl OptimisticRetryRecompute {
    pub fn new(settings: ConsistencySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff: settings.backoff,
        }
    }

    /// Linear backoff with up to 50% random jitter
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff * attempt;
        let jitter_ms = (base.as_millis() as u64 / 2).max(1);
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    async fn attempt(
        &self,
        repo: &dyn Repository,
        key: AggregateKey,
    ) -> Result<Versioned<RatingSummary>, StoreError> {
        let current = repo.load_summary(key).await?;
        let reviews = repo.list_reviews(key).await?;
        let summary = summarize(&reviews);
        let version = repo.save_summary(key, summary, current.version).await?;
        Ok(Versioned::new(summary, version))
    }
}

impl Default for OptimisticRetryRecompute {
    fn default() -> Self {
        Self::new(ConsistencySettings::default())
    }
}

#[async_trait]
impl RecomputeStrategy for OptimisticRetryRecompute {
    fn name(&self) -> &'static str {
        "optimistic_retry"
    }

    async fn recompute(
        &self,
        repo: &dyn Repository,
        key: AggregateKey,
    ) -> AppResult<Versioned<RatingSummary>> {
        for attempt in 1..=self.max_attempts {
            match self.attempt(repo, key).await {
                Ok(saved) => return Ok(saved),
                Err(StoreError::ConcurrencyConflict { expected, actual, .. })
                    if attempt < self.max_attempts =>
                {
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        aggregate = %key,
                        expected,
                        actual,
                        "Lost update on aggregate, retrying (attempt {}/{})",
                        attempt,
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(StoreError::ConcurrencyConflict { .. }) => break,
                Err(e) => return Err(e.into()),
            }
        }

        tracing::error!(
            aggregate = %key,
            attempts = self.max_attempts,
            "Giving up on aggregate recompute"
        );
        Err(DomainError::ConsistencyRecomputeFailure {
            kind: key.kind(),
            id: key.id(),
            attempts: self.max_attempts,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_with_attempts() {
        let strategy = OptimisticRetryRecompute::new(ConsistencySettings {
            max_attempts: 4,
            backoff: Duration::from_millis(10),
        });

        let first = strategy.delay(1);
        let third = strategy.delay(3);
        assert!(first >= Duration::from_millis(10) && first <= Duration::from_millis(15));
        assert!(third >= Duration::from_millis(30) && third <= Duration::from_millis(45));
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        let strategy = OptimisticRetryRecompute::new(ConsistencySettings {
            max_attempts: 0,
            backoff: Duration::ZERO,
        });
        assert_eq!(strategy.max_attempts, 1);
    }
}
