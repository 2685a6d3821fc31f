//! PostgreSQL store
//!
//! [`Repository`] over the schema in `migrations/0001_init.sql`. Aggregate
//! saves use a `version` column for optimistic locking; the transactional
//! recompute runs under SERIALIZABLE isolation and reports serialization
//! failures as concurrency conflicts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::{
    AggregateKey, Event, EventStatus, Place, Rating, RatingSummary, Registration,
    RegistrationStatus, Review, ReviewStatus, Versioned,
};

use super::{RecomputeFn, Repository, StoreError, TransactionCapability};

/// SQLSTATE for serialization_failure
const SERIALIZATION_FAILURE: &str = "40001";

/// SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

/// Repository backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new PgStore with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn select_reviews(
        tx: &mut Transaction<'_, Postgres>,
        key: AggregateKey,
    ) -> Result<Vec<Review>, StoreError> {
        let rows = sqlx::query(reviews_query(key))
            .bind(key.id())
            .fetch_all(&mut **tx)
            .await?;
        rows.iter().map(review_from_row).collect()
    }

    async fn select_summary(
        tx: &mut Transaction<'_, Postgres>,
        key: AggregateKey,
    ) -> Result<Versioned<RatingSummary>, StoreError> {
        match key {
            AggregateKey::Place(id) => {
                let row: Option<(f64, i32, i64)> = sqlx::query_as(
                    "SELECT rating, total_reviews, version FROM places WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?;
                let (average, count, version) =
                    row.ok_or_else(|| StoreError::not_found("Place", id))?;
                Ok(Versioned::new(
                    RatingSummary {
                        average,
                        count: to_u32(count)?,
                    },
                    version,
                ))
            }
            AggregateKey::Author(id) => {
                let row: Option<(f64, i32, i64)> = sqlx::query_as(
                    "SELECT average_rating, total_reviews, version FROM user_review_stats WHERE user_id = $1",
                )
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?;
                Ok(match row {
                    Some((average, count, version)) => Versioned::new(
                        RatingSummary {
                            average,
                            count: to_u32(count)?,
                        },
                        version,
                    ),
                    None => Versioned::new(RatingSummary::empty(), 0),
                })
            }
        }
    }

    /// Conditional write; returns `None` when `expected_version` is stale
    async fn write_summary(
        tx: &mut Transaction<'_, Postgres>,
        key: AggregateKey,
        summary: RatingSummary,
        expected_version: i64,
    ) -> Result<Option<i64>, StoreError> {
        let count = i32::try_from(summary.count)
            .map_err(|_| StoreError::InvalidData("review count overflow".to_string()))?;

        let version: Option<i64> = match key {
            AggregateKey::Place(id) => {
                sqlx::query_scalar(
                    r#"
                    UPDATE places
                    SET rating = $2, total_reviews = $3, version = version + 1, updated_at = NOW()
                    WHERE id = $1 AND version = $4
                    RETURNING version
                    "#,
                )
                .bind(id)
                .bind(summary.average)
                .bind(count)
                .bind(expected_version)
                .fetch_optional(&mut **tx)
                .await?
            }
            AggregateKey::Author(id) if expected_version == 0 => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO user_review_stats (user_id, average_rating, total_reviews, version, updated_at)
                    VALUES ($1, $2, $3, 1, NOW())
                    ON CONFLICT (user_id) DO NOTHING
                    RETURNING version
                    "#,
                )
                .bind(id)
                .bind(summary.average)
                .bind(count)
                .fetch_optional(&mut **tx)
                .await?
            }
            AggregateKey::Author(id) => {
                sqlx::query_scalar(
                    r#"
                    UPDATE user_review_stats
                    SET average_rating = $2, total_reviews = $3, version = version + 1, updated_at = NOW()
                    WHERE user_id = $1 AND version = $4
                    RETURNING version
                    "#,
                )
                .bind(id)
                .bind(summary.average)
                .bind(count)
                .bind(expected_version)
                .fetch_optional(&mut **tx)
                .await?
            }
        };

        Ok(version)
    }

    async fn try_recompute(
        &self,
        key: AggregateKey,
        compute: RecomputeFn,
    ) -> Result<Versioned<RatingSummary>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let current = Self::select_summary(&mut tx, key).await?;
        let reviews = Self::select_reviews(&mut tx, key).await?;
        let summary = compute(&reviews);

        let version = Self::write_summary(&mut tx, key, summary, current.version)
            .await?
            .ok_or_else(|| StoreError::ConcurrencyConflict {
                key: key.to_string(),
                expected: current.version,
                actual: current.version + 1,
            })?;

        tx.commit().await?;
        Ok(Versioned::new(summary, version))
    }
}

#[async_trait]
impl Repository for PgStore {
    fn transaction_capability(&self) -> TransactionCapability {
        TransactionCapability::Supported
    }

    async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO events (id, title, capacity, allow_waitlist, max_tickets_per_user, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(&event.title)
        .bind(event.capacity.map(to_i32).transpose()?)
        .bind(event.allow_waitlist)
        .bind(to_i32(event.max_tickets_per_user)?)
        .bind(event.status.as_str())
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, format!("event {}", event.id)))?;

        Ok(())
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, capacity, allow_waitlist, max_tickets_per_user, status, created_at
            FROM events
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn update_event_status(
        &self,
        event_id: Uuid,
        status: EventStatus,
    ) -> Result<(), StoreError> {
        let rows_affected = sqlx::query("UPDATE events SET status = $2 WHERE id = $1")
            .bind(event_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::not_found("Event", event_id));
        }
        Ok(())
    }

    async fn insert_registration(&self, registration: &Registration) -> Result<(), StoreError> {
        // A partial unique index enforces one active registration per (event, user).
        sqlx::query(
            r#"
            INSERT INTO registrations (
                id, event_id, user_id, status, ticket_count,
                arrival_at, updated_at, cancelled_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(registration.id)
        .bind(registration.event_id)
        .bind(registration.user_id)
        .bind(registration.status.as_str())
        .bind(to_i32(registration.ticket_count)?)
        .bind(registration.timestamp)
        .bind(registration.updated_at)
        .bind(registration.cancelled_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_unique(
                e,
                format!(
                    "active registration for event {} user {}",
                    registration.event_id, registration.user_id
                ),
            )
        })?;

        Ok(())
    }

    async fn update_registration(&self, registration: &Registration) -> Result<(), StoreError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE registrations
            SET status = $2, ticket_count = $3, updated_at = $4, cancelled_at = $5
            WHERE id = $1
            "#,
        )
        .bind(registration.id)
        .bind(registration.status.as_str())
        .bind(to_i32(registration.ticket_count)?)
        .bind(registration.updated_at)
        .bind(registration.cancelled_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::not_found("Registration", registration.id));
        }
        Ok(())
    }

    async fn find_active_registration(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Registration>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, event_id, user_id, status, ticket_count, arrival_at, updated_at, cancelled_at
            FROM registrations
            WHERE event_id = $1 AND user_id = $2 AND status <> 'cancelled'
            "#,
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(registration_from_row).transpose()
    }

    async fn list_registrations(
        &self,
        event_id: Uuid,
        status: Option<RegistrationStatus>,
    ) -> Result<Vec<Registration>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_id, user_id, status, ticket_count, arrival_at, updated_at, cancelled_at
            FROM registrations
            WHERE event_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY arrival_at ASC, id ASC
            "#,
        )
        .bind(event_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(registration_from_row).collect()
    }

    async fn insert_place(&self, place: &Place) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO places (id, name, rating, total_reviews, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(place.id)
        .bind(&place.name)
        .bind(place.rating)
        .bind(to_i32(place.total_reviews)?)
        .bind(place.version)
        .bind(place.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, format!("place {}", place.id)))?;

        Ok(())
    }

    async fn get_place(&self, place_id: Uuid) -> Result<Option<Place>, StoreError> {
        let row: Option<(Uuid, String, f64, i32, i64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, name, rating, total_reviews, version, created_at FROM places WHERE id = $1",
        )
        .bind(place_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, name, rating, total_reviews, version, created_at)| {
            Ok(Place {
                id,
                name,
                rating,
                total_reviews: to_u32(total_reviews)?,
                version,
                created_at,
            })
        })
        .transpose()
    }

    async fn insert_review(&self, review: &Review) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO reviews (id, place_id, author_id, rating, status, comment, created_at, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(review.id)
        .bind(review.place_id)
        .bind(review.author_id)
        .bind(i16::from(review.rating.value()))
        .bind(review.status.as_str())
        .bind(&review.comment)
        .bind(review.created_at)
        .bind(review.updated_at)
        .bind(review.version)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, format!("review {}", review.id)))?;

        Ok(())
    }

    async fn update_review(
        &self,
        review: &Review,
        expected_version: i64,
    ) -> Result<i64, StoreError> {
        let written: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE reviews
            SET rating = $2, status = $3, comment = $4, updated_at = $5, version = version + 1
            WHERE id = $1 AND version = $6
            RETURNING version
            "#,
        )
        .bind(review.id)
        .bind(i16::from(review.rating.value()))
        .bind(review.status.as_str())
        .bind(&review.comment)
        .bind(review.updated_at)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((version,)) = written {
            return Ok(version);
        }

        // Distinguish a stale version from a missing row
        let current: Option<(i64,)> = sqlx::query_as("SELECT version FROM reviews WHERE id = $1")
            .bind(review.id)
            .fetch_optional(&self.pool)
            .await?;
        match current {
            Some((actual,)) => Err(StoreError::ConcurrencyConflict {
                key: format!("review:{}", review.id),
                expected: expected_version,
                actual,
            }),
            None => Err(StoreError::not_found("Review", review.id)),
        }
    }

    async fn delete_review(&self, review_id: Uuid) -> Result<bool, StoreError> {
        let rows_affected = sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(review_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected > 0)
    }

    async fn get_review(&self, review_id: Uuid) -> Result<Option<Review>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, place_id, author_id, rating, status, comment, created_at, updated_at, version
            FROM reviews
            WHERE id = $1
            "#,
        )
        .bind(review_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(review_from_row).transpose()
    }

    async fn list_reviews(&self, key: AggregateKey) -> Result<Vec<Review>, StoreError> {
        let rows = sqlx::query(reviews_query(key))
            .bind(key.id())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(review_from_row).collect()
    }

    async fn load_summary(
        &self,
        key: AggregateKey,
    ) -> Result<Versioned<RatingSummary>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let summary = Self::select_summary(&mut tx, key).await?;
        tx.commit().await?;
        Ok(summary)
    }

    async fn save_summary(
        &self,
        key: AggregateKey,
        summary: RatingSummary,
        expected_version: i64,
    ) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let written = Self::write_summary(&mut tx, key, summary, expected_version).await?;

        match written {
            Some(version) => {
                tx.commit().await?;
                Ok(version)
            }
            None => {
                // Distinguish a stale version from a missing row
                let current = Self::select_summary(&mut tx, key).await?;
                tx.rollback().await?;
                Err(StoreError::ConcurrencyConflict {
                    key: key.to_string(),
                    expected: expected_version,
                    actual: current.version,
                })
            }
        }
    }

    async fn recompute_in_transaction(
        &self,
        key: AggregateKey,
        compute: RecomputeFn,
    ) -> Result<Versioned<RatingSummary>, StoreError> {
        self.try_recompute(key, compute)
            .await
            .map_err(|e| match e {
                StoreError::Database(ref db) if is_serialization_failure(db) => {
                    StoreError::ConcurrencyConflict {
                        key: key.to_string(),
                        expected: -1,
                        actual: -1,
                    }
                }
                other => other,
            })
    }
}

fn reviews_query(key: AggregateKey) -> &'static str {
    match key {
        AggregateKey::Place(_) => {
            r#"
            SELECT id, place_id, author_id, rating, status, comment, created_at, updated_at, version
            FROM reviews
            WHERE place_id = $1
            ORDER BY created_at ASC, id ASC
            "#
        }
        AggregateKey::Author(_) => {
            r#"
            SELECT id, place_id, author_id, rating, status, comment, created_at, updated_at, version
            FROM reviews
            WHERE author_id = $1
            ORDER BY created_at ASC, id ASC
            "#
        }
    }
}

fn is_serialization_failure(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(SERIALIZATION_FAILURE)
    )
}

fn map_unique(err: sqlx::Error, what: String) -> StoreError {
    let is_unique = matches!(
        &err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION)
    );
    if is_unique {
        StoreError::Duplicate(what)
    } else {
        StoreError::Database(err)
    }
}

fn to_i32(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::InvalidData(format!("{value} out of range")))
}

fn to_u32(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::InvalidData(format!("negative value {value}")))
}

fn invalid(err: crate::domain::DomainError) -> StoreError {
    StoreError::InvalidData(err.to_string())
}

fn event_from_row(row: &PgRow) -> Result<Event, StoreError> {
    let capacity: Option<i32> = row.try_get("capacity")?;
    let max_tickets: i32 = row.try_get("max_tickets_per_user")?;
    let status: String = row.try_get("status")?;

    Ok(Event {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        capacity: capacity.map(to_u32).transpose()?,
        allow_waitlist: row.try_get("allow_waitlist")?,
        max_tickets_per_user: to_u32(max_tickets)?,
        status: status.parse::<EventStatus>().map_err(invalid)?,
        created_at: row.try_get("created_at")?,
    })
}

fn registration_from_row(row: &PgRow) -> Result<Registration, StoreError> {
    let status: String = row.try_get("status")?;
    let ticket_count: i32 = row.try_get("ticket_count")?;

    Ok(Registration {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        user_id: row.try_get("user_id")?,
        status: status.parse::<RegistrationStatus>().map_err(invalid)?,
        ticket_count: to_u32(ticket_count)?,
        timestamp: row.try_get("arrival_at")?,
        updated_at: row.try_get("updated_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
    })
}

fn review_from_row(row: &PgRow) -> Result<Review, StoreError> {
    let rating: i16 = row.try_get("rating")?;
    let status: String = row.try_get("status")?;

    Ok(Review {
        id: row.try_get("id")?,
        place_id: row.try_get("place_id")?,
        author_id: row.try_get("author_id")?,
        rating: Rating::new(i64::from(rating)).map_err(invalid)?,
        status: status.parse::<ReviewStatus>().map_err(invalid)?,
        comment: row.try_get("comment")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        version: row.try_get("version")?,
    })
}
