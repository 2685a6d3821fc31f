//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::admission::{
    Availability, CancellationResult, CreateEventCommand, EventCancellationResult,
    RegisterCommand, RegistrationResult,
};
use crate::domain::{
    Event, Place, Registration, RegistrationStatus, Review, ReviewStatus, UserReviewStats,
};
use crate::error::AppError;
use crate::reviews::{CreateReviewCommand, ReviewWrite, UpdateReviewCommand};

use super::AppState;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub user_id: Uuid,
    #[serde(default = "default_ticket_count")]
    pub ticket_count: i64,
}

fn default_ticket_count() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct RegistrationsQuery {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegistrationsResponse {
    pub event_id: Uuid,
    pub registrations: Vec<Registration>,
}

#[derive(Debug, Serialize)]
pub struct PromotionResponse {
    pub event_id: Uuid,
    pub promoted: Vec<Registration>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePlaceRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ModerateReviewRequest {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    #[serde(flatten)]
    pub review: Review,
    /// `false` when a derived aggregate could not be recomputed yet; it will
    /// be repaired by reconciliation
    pub aggregates_consistent: bool,
}

impl From<ReviewWrite> for ReviewResponse {
    fn from(write: ReviewWrite) -> Self {
        Self {
            aggregates_consistent: write.recompute.is_complete(),
            review: write.review,
        }
    }
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        // Events & admission
        .route("/events", post(create_event))
        .route("/events/:event_id", get(get_event))
        .route("/events/:event_id/cancel", post(cancel_event))
        .route("/events/:event_id/availability", get(get_availability))
        .route(
            "/events/:event_id/registrations",
            post(register).get(list_registrations),
        )
        .route(
            "/events/:event_id/registrations/:user_id",
            delete(cancel_registration),
        )
        .route("/events/:event_id/waitlist/promote", post(promote_waitlist))
        // Places & reviews
        .route("/places", post(create_place))
        .route("/places/:place_id", get(get_place))
        .route("/places/:place_id/recompute", post(recompute_place))
        .route("/reviews", post(create_review))
        .route(
            "/reviews/:review_id",
            get(get_review).patch(update_review).delete(delete_review),
        )
        .route("/reviews/:review_id/moderate", post(moderate_review))
        .route("/users/:user_id/review-stats", get(get_user_stats))
        .route("/users/:user_id/review-stats/recompute", post(recompute_user_stats))
}

// =========================================================================
// Events
// =========================================================================

async fn create_event(
    State(state): State<AppState>,
    Json(command): Json<CreateEventCommand>,
) -> Result<(StatusCode, Json<Event>), AppError> {
    let event = state.admission.create_event(command).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Event>, AppError> {
    Ok(Json(state.admission.get_event(event_id).await?))
}

async fn cancel_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<EventCancellationResult>, AppError> {
    Ok(Json(state.admission.cancel_event(event_id).await?))
}

async fn get_availability(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Availability>, AppError> {
    Ok(Json(state.admission.availability(event_id).await?))
}

// =========================================================================
// Registrations
// =========================================================================

async fn register(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegistrationResult>), AppError> {
    let command = RegisterCommand::new(event_id, request.user_id, request.ticket_count);
    let result = state.admission.request_registration(command).await?;

    let status = match result.status {
        RegistrationStatus::Waitlisted => StatusCode::ACCEPTED,
        _ => StatusCode::CREATED,
    };
    Ok((status, Json(result)))
}

async fn list_registrations(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Query(query): Query<RegistrationsQuery>,
) -> Result<Json<RegistrationsResponse>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<RegistrationStatus>)
        .transpose()
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

    let registrations = state.admission.list_registrations(event_id, status).await?;
    Ok(Json(RegistrationsResponse {
        event_id,
        registrations,
    }))
}

async fn cancel_registration(
    State(state): State<AppState>,
    Path((event_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CancellationResult>, AppError> {
    Ok(Json(state.admission.cancel_registration(event_id, user_id).await?))
}

async fn promote_waitlist(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<PromotionResponse>, AppError> {
    let promoted = state.admission.promote_waitlist(event_id).await?;
    Ok(Json(PromotionResponse { event_id, promoted }))
}

// =========================================================================
// Places
// =========================================================================

async fn create_place(
    State(state): State<AppState>,
    Json(request): Json<CreatePlaceRequest>,
) -> Result<(StatusCode, Json<Place>), AppError> {
    let place = state.reviews.create_place(request.name).await?;
    Ok((StatusCode::CREATED, Json(place)))
}

async fn get_place(
    State(state): State<AppState>,
    Path(place_id): Path<Uuid>,
) -> Result<Json<Place>, AppError> {
    Ok(Json(state.reviews.get_place(place_id).await?))
}

async fn recompute_place(
    State(state): State<AppState>,
    Path(place_id): Path<Uuid>,
) -> Result<Json<Place>, AppError> {
    Ok(Json(state.consistency.recompute_place_rating(place_id).await?))
}

// =========================================================================
// Reviews
// =========================================================================

async fn create_review(
    State(state): State<AppState>,
    Json(command): Json<CreateReviewCommand>,
) -> Result<(StatusCode, Json<ReviewResponse>), AppError> {
    let write = state.reviews.create_review(command).await?;
    Ok((StatusCode::CREATED, Json(write.into())))
}

async fn get_review(
    State(state): State<AppState>,
    Path(review_id): Path<Uuid>,
) -> Result<Json<Review>, AppError> {
    Ok(Json(state.reviews.get_review(review_id).await?))
}

async fn update_review(
    State(state): State<AppState>,
    Path(review_id): Path<Uuid>,
    Json(command): Json<UpdateReviewCommand>,
) -> Result<Json<ReviewResponse>, AppError> {
    let write = state.reviews.update_review(review_id, command).await?;
    Ok(Json(write.into()))
}

async fn delete_review(
    State(state): State<AppState>,
    Path(review_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.reviews.delete_review(review_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn moderate_review(
    State(state): State<AppState>,
    Path(review_id): Path<Uuid>,
    Json(request): Json<ModerateReviewRequest>,
) -> Result<Json<ReviewResponse>, AppError> {
    let status: ReviewStatus = request.status.parse()?;
    let write = state.reviews.moderate_review(review_id, status).await?;
    Ok(Json(write.into()))
}

// =========================================================================
// User review stats
// =========================================================================

async fn get_user_stats(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserReviewStats>, AppError> {
    Ok(Json(state.consistency.user_stats(user_id).await?))
}

async fn recompute_user_stats(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserReviewStats>, AppError> {
    Ok(Json(state.consistency.recompute_user_stats(user_id).await?))
}
