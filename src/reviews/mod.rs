//! Review Service
//!
//! Review writes and place registration. Every successful review write is
//! followed by a recompute of the place rating and the author's stats; a
//! failed recompute is logged and left to reconciliation, the write stands.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::consistency::{AggregateConsistencyEngine, RecomputeReport};
use crate::domain::{DomainError, Place, Rating, Review, ReviewStatus};
use crate::error::AppResult;
use crate::store::{Repository, StoreError};

/// Read-modify-write rounds before a contended review update gives up
const REVIEW_WRITE_ATTEMPTS: u32 = 5;

/// Command to create a review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReviewCommand {
    pub place_id: Uuid,
    pub author_id: Uuid,
    pub rating: i64,
    pub comment: Option<String>,
}

/// Partial review update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateReviewCommand {
    pub rating: Option<i64>,
    pub comment: Option<String>,
}

/// A review write together with the aggregate recompute it triggered
#[derive(Debug)]
pub struct ReviewWrite {
    pub review: Review,
    pub recompute: RecomputeReport,
}

pub struct ReviewService {
    repo: Arc<dyn Repository>,
    consistency: Arc<AggregateConsistencyEngine>,
    auto_approve: bool,
}

impl ReviewService {
    pub fn new(
        repo: Arc<dyn Repository>,
        consistency: Arc<AggregateConsistencyEngine>,
        auto_approve: bool,
    ) -> Self {
        Self {
            repo,
            consistency,
            auto_approve,
        }
    }

    pub async fn create_place(&self, name: String) -> AppResult<Place> {
        if name.trim().is_empty() {
            return Err(DomainError::validation("place name must not be empty").into());
        }
        let place = Place::create(name);
        self.repo.insert_place(&place).await?;
        tracing::info!(place_id = %place.id, "Place created");
        Ok(place)
    }

    pub async fn get_place(&self, place_id: Uuid) -> AppResult<Place> {
        self.repo
            .get_place(place_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Place", place_id).into())
    }

    pub async fn get_review(&self, review_id: Uuid) -> AppResult<Review> {
        self.repo
            .get_review(review_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Review", review_id).into())
    }

    pub async fn create_review(&self, command: CreateReviewCommand) -> AppResult<ReviewWrite> {
        let rating = Rating::new(command.rating)?;
        self.get_place(command.place_id).await?;

        let status = if self.auto_approve {
            ReviewStatus::Approved
        } else {
            ReviewStatus::Pending
        };
        let review = Review::create(
            command.place_id,
            command.author_id,
            rating,
            command.comment,
            status,
        );
        self.repo.insert_review(&review).await?;

        tracing::info!(
            review_id = %review.id,
            place_id = %review.place_id,
            author_id = %review.author_id,
            rating = review.rating.value(),
            status = review.status.as_str(),
            "Review created"
        );
        Ok(self.after_write(review).await)
    }

    pub async fn update_review(
        &self,
        review_id: Uuid,
        command: UpdateReviewCommand,
    ) -> AppResult<ReviewWrite> {
        let rating = command.rating.map(Rating::new).transpose()?;
        let review = self
            .modify_review(review_id, |review| {
                if let Some(rating) = rating {
                    review.rating = rating;
                }
                if let Some(comment) = &command.comment {
                    review.comment = Some(comment.clone());
                }
            })
            .await?;

        tracing::info!(%review_id, rating = review.rating.value(), "Review updated");
        Ok(self.after_write(review).await)
    }

    pub async fn moderate_review(
        &self,
        review_id: Uuid,
        status: ReviewStatus,
    ) -> AppResult<ReviewWrite> {
        let review = self
            .modify_review(review_id, |review| review.status = status)
            .await?;

        tracing::info!(%review_id, status = status.as_str(), "Review moderated");
        Ok(self.after_write(review).await)
    }

    pub async fn delete_review(&self, review_id: Uuid) -> AppResult<ReviewWrite> {
        let review = self.get_review(review_id).await?;
        if !self.repo.delete_review(review_id).await? {
            return Err(DomainError::not_found("Review", review_id).into());
        }

        tracing::info!(%review_id, place_id = %review.place_id, "Review deleted");
        Ok(self.after_write(review).await)
    }

    /// Apply `change` to the latest stored copy of a review. A write that
    /// lost a race re-reads and reapplies, so concurrent edits of different
    /// fields all survive.
    async fn modify_review<F>(&self, review_id: Uuid, mut change: F) -> AppResult<Review>
    where
        F: FnMut(&mut Review),
    {
        let mut attempt = 1;
        loop {
            let mut review = self.get_review(review_id).await?;
            let read_version = review.version;
            change(&mut review);
            review.updated_at = chrono::Utc::now();

            match self.repo.update_review(&review, read_version).await {
                Ok(version) => {
                    review.version = version;
                    return Ok(review);
                }
                Err(StoreError::ConcurrencyConflict { .. }) if attempt < REVIEW_WRITE_ATTEMPTS => {
                    tracing::debug!(%review_id, attempt, "Review changed concurrently, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn after_write(&self, review: Review) -> ReviewWrite {
        let recompute = self
            .consistency
            .on_review_changed(review.place_id, review.author_id)
            .await;
        ReviewWrite { review, recompute }
    }
}
