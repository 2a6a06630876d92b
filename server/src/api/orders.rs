//! Order endpoints.
//!
//! - POST /api/order - Freeze the held session into an order and start payment
//! - POST /api/order/gateway-callback - Asynchronous payment outcome
//! - GET /api/order/status/:order_id - Polling

use crate::error::AppError;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use marquee_core::ErrorCode;
use marquee_core::types::{Money, OrderId};
use marquee_engine::orders::{CreateOrderRequest, OrderStatusView};
use marquee_engine::{GatewayCallback, OrderStatus, PriceBreakdown};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Response Types
// ============================================================================

/// Created order.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    /// Order
    pub order_id: OrderId,
    /// Status, `awaiting_gateway` on success
    pub status: OrderStatus,
    /// Amount to charge
    pub total: Money,
    /// Frozen price
    pub breakdown: PriceBreakdown,
    /// Where the customer pays
    pub redirect_url: Option<String>,
    /// Payment deadline, the hold's expiry
    pub expires_at: DateTime<Utc>,
}

/// Acknowledgement sent to the gateway.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallbackAck {
    /// Order the callback resolved to
    pub order_id: OrderId,
    /// Status after the callback
    pub status: OrderStatus,
    /// Whether the callback repeated an earlier terminal one
    pub duplicate: bool,
    /// `DUPLICATE_CALLBACK` for repeats
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create an order from the user's live session.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/order \
///   -H 'Content-Type: application/json' \
///   -d '{"user_id":"...","showtime_id":"...","promotion_code":"TENOFF"}'
/// ```
///
/// Responds 201 with the payment redirect. A lapsed session answers 410
/// `SESSION_EXPIRED`; a gateway refusal answers 502 and frees the seats.
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), AppError> {
    let order = state.coordinator.create_order(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order_id: order.order_id,
            status: order.status,
            total: order.total(),
            breakdown: order.breakdown,
            redirect_url: order.redirect_url,
            expires_at: order.expires_at,
        }),
    ))
}

/// Gateway callback.
///
/// Repeated callbacks for a settled order still answer 200 so the gateway
/// stops retrying; the body carries `DUPLICATE_CALLBACK`.
pub async fn gateway_callback(
    State(state): State<AppState>,
    Json(callback): Json<GatewayCallback>,
) -> Result<Json<CallbackAck>, AppError> {
    let outcome = state.coordinator.handle_gateway_callback(&callback).await?;

    Ok(Json(CallbackAck {
        order_id: outcome.order.order_id,
        status: outcome.order.status,
        duplicate: outcome.duplicate,
        code: outcome.duplicate.then_some(ErrorCode::DuplicateCallback),
    }))
}

/// Current order status. Read-only; polling never changes an order.
pub async fn order_status(
    Path(order_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<OrderStatusView>, AppError> {
    let view = state
        .coordinator
        .check_status(OrderId::from_uuid(order_id))
        .await?;
    Ok(Json(view))
}
