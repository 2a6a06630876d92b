//! # Marquee Core
//!
//! Shared vocabulary of the Marquee cinema booking engine.
//!
//! - [`types`]: identifiers, [`Money`](types::Money), seat layout snapshots,
//!   holds, reservation sessions and tickets
//! - [`environment`]: the [`Clock`](environment::Clock) injected wherever time
//!   matters
//! - [`error`]: the client-visible [`ErrorCode`](error::ErrorCode) taxonomy
//!
//! This crate has no async runtime and no I/O; it is depended on by the engine,
//! the test support crate and the server.

pub mod environment;
pub mod error;
pub mod types;

pub use error::ErrorCode;
