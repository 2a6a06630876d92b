//! HTTP server module.
//!
//! - Application state shared by handlers
//! - Health check endpoints
//! - Router configuration

pub mod health;
pub mod routes;
pub mod state;

pub use health::health_check;
pub use routes::build_router;
pub use state::{AppState, WebSocketSettings};
