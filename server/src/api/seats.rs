//! Seat map and hold endpoints.
//!
//! - GET /api/showtimes/:id/seats?user_id= - Seat map
//! - POST /api/showtimes/:id/holds - Claim seats
//! - PATCH /api/showtimes/:id/holds - Add/remove seats on the live session
//! - DELETE /api/showtimes/:id/holds?user_id= - Release the session
//! - GET /api/showtimes/:id/holds/:user_id - Live session
//! - PUT /api/showtimes/:id/holds/:user_id/combos - Attach combos

use crate::error::AppError;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
};
use marquee_core::ErrorCode;
use marquee_core::types::{ComboLine, ReservationSession, SeatId, ShowtimeId, UserId};
use marquee_engine::SeatMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Optional viewer of a seat map.
#[derive(Debug, Deserialize)]
pub struct ViewerQuery {
    /// Marks the viewer's own holds as `mine`
    pub user_id: Option<Uuid>,
}

/// User whose session is released.
#[derive(Debug, Deserialize)]
pub struct UserQuery {
    /// Session owner
    pub user_id: Uuid,
}

/// Claim request body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimRequest {
    /// Claiming user
    pub user_id: UserId,
    /// Exact seat set wanted
    pub seat_ids: Vec<SeatId>,
}

/// Modify request body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModifyRequest {
    /// Session owner
    pub user_id: UserId,
    /// Seats to add
    #[serde(default)]
    pub add: Vec<SeatId>,
    /// Seats to drop
    #[serde(default)]
    pub remove: Vec<SeatId>,
}

/// Modify response; `session` is absent once every seat is removed.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModifyResponse {
    /// Live session after the change
    pub session: Option<ReservationSession>,
}

/// Release response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseResponse {
    /// Seats that became free
    pub released: Vec<SeatId>,
}

/// Combo selection body.
#[derive(Debug, Serialize, Deserialize)]
pub struct CombosRequest {
    /// Replaces the session's combo selection
    pub combos: Vec<ComboLine>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Seat map of a showtime.
///
/// ```bash
/// curl "http://localhost:8080/api/showtimes/$SHOWTIME/seats?user_id=$USER"
/// ```
pub async fn get_seat_map(
    Path(showtime_id): Path<Uuid>,
    Query(query): Query<ViewerQuery>,
    State(state): State<AppState>,
) -> Result<Json<SeatMap>, AppError> {
    let map = state
        .holds
        .seat_map(
            ShowtimeId::from_uuid(showtime_id),
            query.user_id.map(UserId::from_uuid),
        )
        .await?;
    Ok(Json(map))
}

/// Claim exactly the listed seats, replacing the user's previous session.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/showtimes/$SHOWTIME/holds \
///   -H 'Content-Type: application/json' \
///   -d '{"user_id":"...","seat_ids":["A1","A2"]}'
/// ```
///
/// Responds 409 `SEAT_CONFLICT` with `conflicting_seat_ids` when any seat is
/// taken; nothing is held in that case.
pub async fn claim_seats(
    Path(showtime_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<ReservationSession>, AppError> {
    let session = state
        .holds
        .claim_seats(
            request.user_id,
            ShowtimeId::from_uuid(showtime_id),
            request.seat_ids,
        )
        .await?;

    tracing::debug!(
        session_id = %session.session_id,
        seats = session.seats.len(),
        "Seats claimed over HTTP"
    );
    Ok(Json(session))
}

/// Add and remove seats in one all-or-nothing step.
pub async fn modify_seats(
    Path(showtime_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<ModifyRequest>,
) -> Result<Json<ModifyResponse>, AppError> {
    let session = state
        .holds
        .modify_seats(
            request.user_id,
            ShowtimeId::from_uuid(showtime_id),
            request.add,
            request.remove,
        )
        .await?;
    Ok(Json(ModifyResponse { session }))
}

/// Release the user's session. Releasing nothing succeeds.
pub async fn release_session(
    Path(showtime_id): Path<Uuid>,
    Query(query): Query<UserQuery>,
    State(state): State<AppState>,
) -> Result<Json<ReleaseResponse>, AppError> {
    let released = state
        .holds
        .release_session(
            UserId::from_uuid(query.user_id),
            ShowtimeId::from_uuid(showtime_id),
        )
        .await?;
    Ok(Json(ReleaseResponse { released }))
}

/// Live session of a user.
///
/// Responds 410 `SESSION_EXPIRED` when there is none; clients use this to
/// revalidate a persisted booking.
pub async fn get_session(
    Path((showtime_id, user_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
) -> Result<Json<ReservationSession>, AppError> {
    state
        .holds
        .session(UserId::from_uuid(user_id), ShowtimeId::from_uuid(showtime_id))
        .await
        .map(Json)
        .ok_or_else(|| AppError::new(ErrorCode::SessionExpired, "no live reservation session"))
}

/// Replace the combo selection of the live session.
pub async fn select_combos(
    Path((showtime_id, user_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
    Json(request): Json<CombosRequest>,
) -> Result<Json<ReservationSession>, AppError> {
    let session = state
        .holds
        .select_combos(
            UserId::from_uuid(user_id),
            ShowtimeId::from_uuid(showtime_id),
            request.combos,
        )
        .await?;
    Ok(Json(session))
}
