//! Application state for the HTTP server.

use crate::config::WebSocketConfig;
use axum::extract::FromRef;
use marquee_engine::{HoldManager, NotificationBus, OrderCoordinator};
use sqlx::PgPool;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

/// WebSocket limits and timers.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketSettings {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Keep-alive ping period
    pub ping_interval: Duration,
    /// Silence after which a connection is closed
    pub idle_timeout: Duration,
}

impl From<&WebSocketConfig> for WebSocketSettings {
    fn from(config: &WebSocketConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        }
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self::from(&WebSocketConfig {
            max_connections: 1000,
            ping_interval_secs: 30,
            idle_timeout_secs: 300,
        })
    }
}

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is a handle.
#[derive(Clone)]
pub struct AppState {
    /// Authoritative seat holds
    pub holds: Arc<HoldManager>,
    /// Checkout and payment reconciliation
    pub coordinator: Arc<OrderCoordinator>,
    /// Seat-state notifications, one topic per showtime
    pub bus: NotificationBus,
    /// Order database, when orders are stored in `PostgreSQL`
    pub database: Option<PgPool>,
    /// WebSocket limits
    pub websocket: WebSocketSettings,
    /// Open WebSocket connections
    pub ws_connections: Arc<AtomicUsize>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(
        holds: Arc<HoldManager>,
        coordinator: Arc<OrderCoordinator>,
        bus: NotificationBus,
        database: Option<PgPool>,
        websocket: WebSocketSettings,
    ) -> Self {
        Self {
            holds,
            coordinator,
            bus,
            database,
            websocket,
            ws_connections: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FromRef<AppState> for Arc<HoldManager> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.holds)
    }
}

impl FromRef<AppState> for Arc<OrderCoordinator> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.coordinator)
    }
}
