//! # Marquee Server
//!
//! HTTP and WebSocket front end for the Marquee booking engine.
//!
//! ```text
//! browser ──REST──> api::{seats, pricing, orders} ──┐
//!    │                                              v
//!    └──WebSocket──> api::websocket ────> HoldManager / OrderCoordinator
//!             ^                                     │
//!             └────────── NotificationBus <─────────┘
//! gateway ──POST /api/order/gateway-callback──> OrderCoordinator
//! ```
//!
//! - [`config`]: environment configuration
//! - [`bootstrap`]: engine wiring and the demo catalog
//! - [`server`]: state, router and health checks
//! - [`api`]: endpoint handlers
//! - [`persistence`]: `PostgreSQL` order store
//! - [`lifecycle`]: graceful shutdown
//! - [`metrics`]: Prometheus exporter

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod persistence;
pub mod server;

pub use bootstrap::Services;
pub use config::Config;
pub use error::AppError;
pub use lifecycle::Application;
pub use server::{AppState, build_router};
