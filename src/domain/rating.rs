//! Derived rating aggregates
//!
//! Both the place rating and the author's review statistics are the same
//! shape: an average and a count over approved reviews. They are owned by
//! different roots and recomputed independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AggregateKind, Review};

/// Average + count over a set of approved reviews
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RatingSummary {
    /// 0.0 when there are no approved reviews
    pub average: f64,
    pub count: u32,
}

impl RatingSummary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Recompute from scratch over the given reviews, counting only approved ones.
    pub fn from_reviews<'a, I>(reviews: I) -> Self
    where
        I: IntoIterator<Item = &'a Review>,
    {
        let (sum, count) = reviews
            .into_iter()
            .filter(|r| r.is_approved())
            .fold((0u64, 0u32), |(sum, count), r| {
                (sum + u64::from(r.rating.value()), count + 1)
            });

        if count == 0 {
            return Self::empty();
        }

        Self {
            average: sum as f64 / f64::from(count),
            count,
        }
    }
}

/// Identifies one derived aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKey {
    /// `Place.rating` / `Place.totalReviews`
    Place(Uuid),
    /// Stats over reviews authored by this user
    Author(Uuid),
}

impl AggregateKey {
    pub fn kind(&self) -> AggregateKind {
        match self {
            AggregateKey::Place(_) => AggregateKind::Place,
            AggregateKey::Author(_) => AggregateKind::UserStats,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            AggregateKey::Place(id) | AggregateKey::Author(id) => *id,
        }
    }

    /// Whether a review belongs to the set this aggregate is derived from
    pub fn covers(&self, review: &Review) -> bool {
        match self {
            AggregateKey::Place(id) => review.place_id == *id,
            AggregateKey::Author(id) => review.author_id == *id,
        }
    }
}

impl std::fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// A value together with its optimistic-concurrency version
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    /// 0 means "never saved"
    pub version: i64,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: i64) -> Self {
        Self { value, version }
    }
}

/// A place with its derived rating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: Uuid,
    pub name: String,
    pub rating: f64,
    pub total_reviews: u32,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Place {
    pub fn create(name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            rating: 0.0,
            total_reviews: 0,
            version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> RatingSummary {
        RatingSummary {
            average: self.rating,
            count: self.total_reviews,
        }
    }
}

/// Review statistics for an author (ratings the user gives)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserReviewStats {
    pub user_id: Uuid,
    pub total_reviews: u32,
    pub average_rating: f64,
    pub version: i64,
}

impl UserReviewStats {
    pub fn from_summary(user_id: Uuid, summary: Versioned<RatingSummary>) -> Self {
        Self {
            user_id,
            total_reviews: summary.value.count,
            average_rating: summary.value.average,
            version: summary.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Rating, ReviewStatus};

    fn review(place_id: Uuid, rating: i64, status: ReviewStatus) -> Review {
        Review::create(place_id, Uuid::new_v4(), Rating::new(rating).unwrap(), None, status)
    }

    #[test]
    fn test_summary_counts_only_approved() {
        let place = Uuid::new_v4();
        let reviews = vec![
            review(place, 4, ReviewStatus::Approved),
            review(place, 2, ReviewStatus::Approved),
            review(place, 1, ReviewStatus::Pending),
            review(place, 1, ReviewStatus::Rejected),
        ];

        let summary = RatingSummary::from_reviews(&reviews);
        assert_eq!(summary.count, 2);
        assert!((summary.average - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_empty_is_zero() {
        let none: Vec<Review> = Vec::new();
        let summary = RatingSummary::from_reviews(&none);
        assert_eq!(summary, RatingSummary::empty());
        assert_eq!(summary.average, 0.0);
    }

    #[test]
    fn test_key_covers() {
        let r = review(Uuid::new_v4(), 3, ReviewStatus::Approved);
        assert!(AggregateKey::Place(r.place_id).covers(&r));
        assert!(AggregateKey::Author(r.author_id).covers(&r));
        assert!(!AggregateKey::Place(r.author_id).covers(&r));
    }
}
