//! Durable order storage.

pub mod postgres;

pub use postgres::{PostgresOrderRepository, connect};
