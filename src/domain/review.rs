//! Review entity and the rating value type
//!
//! Ratings are validated at construction time, so an out-of-range star count
//! cannot reach the aggregate math.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DomainError;

/// Lowest allowed star rating
pub const MIN_RATING: u8 = 1;

/// Highest allowed star rating
pub const MAX_RATING: u8 = 5;

/// A star rating in `MIN_RATING..=MAX_RATING`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Rating(u8);

impl Rating {
    /// # Errors
    /// - `DomainError::Validation` when outside 1..=5
    pub fn new(value: i64) -> Result<Self, DomainError> {
        if value < i64::from(MIN_RATING) || value > i64::from(MAX_RATING) {
            return Err(DomainError::validation(format!(
                "rating must be between {MIN_RATING} and {MAX_RATING} (got {value})"
            )));
        }
        Ok(Self(value as u8))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Rating {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Rating::new(value)
    }
}

impl From<Rating> for i64 {
    fn from(rating: Rating) -> Self {
        i64::from(rating.0)
    }
}

/// Moderation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReviewStatus::Pending),
            "approved" => Ok(ReviewStatus::Approved),
            "rejected" => Ok(ReviewStatus::Rejected),
            other => Err(DomainError::validation(format!("unknown review status '{other}'"))),
        }
    }
}

/// A user's review of a place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub place_id: Uuid,
    pub author_id: Uuid,
    pub rating: Rating,
    pub status: ReviewStatus,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by every stored update
    #[serde(default)]
    pub version: i64,
}

impl Review {
    pub fn create(
        place_id: Uuid,
        author_id: Uuid,
        rating: Rating,
        comment: Option<String>,
        status: ReviewStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            place_id,
            author_id,
            rating,
            status,
            comment,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == ReviewStatus::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_bounds() {
        assert!(Rating::new(1).is_ok());
        assert!(Rating::new(5).is_ok());
        assert!(matches!(Rating::new(0), Err(DomainError::Validation(_))));
        assert!(matches!(Rating::new(6), Err(DomainError::Validation(_))));
        assert!(Rating::new(-1).is_err());
    }

    #[test]
    fn test_rating_deserialize_rejects_out_of_range() {
        let ok: Rating = serde_json::from_str("4").unwrap();
        assert_eq!(ok.value(), 4);
        assert!(serde_json::from_str::<Rating>("9").is_err());
    }

    #[test]
    fn test_review_status_parse() {
        assert_eq!("approved".parse::<ReviewStatus>().unwrap(), ReviewStatus::Approved);
        assert!("spam".parse::<ReviewStatus>().is_err());
    }
}
