//! Router configuration.

use super::health::{health_check, readiness_check};
use super::state::AppState;
use crate::api::{orders, pricing, seats, websocket};
use axum::{
    Router,
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the application router.
///
/// - `GET /health`, `GET /ready`
/// - `/api/showtimes/...` seat maps and holds
/// - `/api/pricing/preview`
/// - `/api/order/...` checkout, gateway callback and status polling
/// - `GET /ws/showtimes/:id` real-time seat channel
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Seat maps and holds
        .route("/showtimes/:id/seats", get(seats::get_seat_map))
        .route(
            "/showtimes/:id/holds",
            post(seats::claim_seats)
                .patch(seats::modify_seats)
                .delete(seats::release_session),
        )
        .route("/showtimes/:id/holds/:user_id", get(seats::get_session))
        .route("/showtimes/:id/holds/:user_id/combos", put(seats::select_combos))
        // Pricing
        .route("/pricing/preview", post(pricing::preview))
        // Orders
        .route("/order", post(orders::create_order))
        .route("/order/gateway-callback", post(orders::gateway_callback))
        .route("/order/status/:order_id", get(orders::order_status));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api", api_routes)
        .route("/ws/showtimes/:id", get(websocket::ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
