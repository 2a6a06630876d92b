//! HTTP API endpoints.
//!
//! - [`seats`]: seat maps and hold commands
//! - [`pricing`]: price previews
//! - [`orders`]: checkout, gateway callback, status polling
//! - [`websocket`]: real-time seat channel

pub mod orders;
pub mod pricing;
pub mod seats;
pub mod websocket;
