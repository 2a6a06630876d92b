//! Price preview endpoint.
//!
//! - POST /api/pricing/preview - Price a selection without reserving anything

use crate::error::AppError;
use crate::server::state::AppState;
use axum::{Json, extract::State};
use marquee_engine::PriceBreakdown;
use marquee_engine::orders::PreviewRequest;

/// Price seats, combos, a promotion and a loyalty redemption.
///
/// Uses the same pricing function as checkout, so the preview total is the
/// amount an order created from the same inputs would charge.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/pricing/preview \
///   -H 'Content-Type: application/json' \
///   -d '{"showtime_id":"...","seat_ids":["A1","A2"],"promotion_code":"TENOFF"}'
/// ```
pub async fn preview(
    State(state): State<AppState>,
    Json(request): Json<PreviewRequest>,
) -> Result<Json<PriceBreakdown>, AppError> {
    let breakdown = state.coordinator.preview(&request).await?;
    Ok(Json(breakdown))
}
