//! Configuration management for the Marquee server.
//!
//! Loads configuration from environment variables with sensible defaults.

use marquee_engine::holds::HoldPolicy;
use marquee_engine::orders::CoordinatorConfig;
use marquee_engine::pricing::LoyaltyPolicy;
use marquee_core::types::Money;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Seat hold configuration
    pub holds: HoldsConfig,
    /// Loyalty redemption configuration
    pub loyalty: LoyaltyConfig,
    /// Payment gateway configuration
    pub gateway: GatewayConfig,
    /// Order store configuration
    pub orders: OrderStoreConfig,
    /// WebSocket configuration
    pub websocket: WebSocketConfig,
    /// JSON catalog seed; demo data is used when unset
    pub catalog_seed_path: Option<String>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Metrics server host (for Prometheus scraping)
    pub metrics_host: String,
    /// Metrics server port
    pub metrics_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// Seat hold configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldsConfig {
    /// Hold lifetime in seconds
    pub hold_duration_secs: u64,
    /// Largest seat set per session
    pub max_seats_per_session: usize,
    /// Expiry sweep period in milliseconds
    pub sweep_interval_ms: u64,
    /// Per-showtime notification buffer
    pub bus_channel_capacity: usize,
}

/// Loyalty redemption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoyaltyConfig {
    /// Money value of one point
    pub point_value: u64,
    /// Smallest redeemable number of points
    pub min_redeem_points: u64,
}

/// Payment gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the hosted payment page
    pub redirect_base_url: String,
    /// Payment creation timeout in milliseconds
    pub timeout_ms: u64,
}

/// Where orders are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStoreKind {
    /// Process memory; lost on restart
    Memory,
    /// `PostgreSQL`
    Postgres,
}

impl FromStr for OrderStoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            other => Err(ConfigError::Invalid(format!(
                "ORDER_STORE must be memory or postgres, got {other}"
            ))),
        }
    }
}

/// Order store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStoreConfig {
    /// Backend
    pub kind: OrderStoreKind,
    /// `PostgreSQL` connection URL
    pub database_url: Option<String>,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
}

/// WebSocket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Keep-alive ping period in seconds
    pub ping_interval_secs: u64,
    /// Connections silent this long are closed
    pub idle_timeout_secs: u64,
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A value or combination of values is unusable
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn var_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unparseable values fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: var_or("PORT", 8080),
                log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
                metrics_host: env::var("METRICS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                metrics_port: var_or("METRICS_PORT", 9090),
                shutdown_timeout: var_or("SHUTDOWN_TIMEOUT", 30),
            },
            holds: HoldsConfig {
                hold_duration_secs: var_or("HOLD_DURATION_SECS", 300),
                max_seats_per_session: var_or("MAX_SEATS_PER_SESSION", 8),
                sweep_interval_ms: var_or("SWEEP_INTERVAL_MS", 1000),
                bus_channel_capacity: var_or(
                    "BUS_CHANNEL_CAPACITY",
                    marquee_engine::bus::DEFAULT_CHANNEL_CAPACITY,
                ),
            },
            loyalty: LoyaltyConfig {
                point_value: var_or("LOYALTY_POINT_VALUE", 1000),
                min_redeem_points: var_or("LOYALTY_MIN_REDEEM_POINTS", 20),
            },
            gateway: GatewayConfig {
                redirect_base_url: env::var("GATEWAY_REDIRECT_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:8080/mock-gateway".to_string()),
                timeout_ms: var_or("GATEWAY_TIMEOUT_MS", 10_000),
            },
            orders: OrderStoreConfig {
                kind: var_or("ORDER_STORE", OrderStoreKind::Memory),
                database_url: env::var("DATABASE_URL").ok(),
                max_connections: var_or("DATABASE_MAX_CONNECTIONS", 10),
                connect_timeout: var_or("DATABASE_CONNECT_TIMEOUT", 30),
            },
            websocket: WebSocketConfig {
                max_connections: var_or("WS_MAX_CONNECTIONS", 1000),
                ping_interval_secs: var_or("WS_PING_INTERVAL_SECS", 30),
                idle_timeout_secs: var_or("WS_IDLE_TIMEOUT_SECS", 300),
            },
            catalog_seed_path: env::var("CATALOG_SEED_PATH").ok(),
        }
    }

    /// Check for values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.holds.hold_duration_secs == 0 {
            return Err(ConfigError::Invalid("HOLD_DURATION_SECS must be positive".into()));
        }
        if self.holds.max_seats_per_session == 0 {
            return Err(ConfigError::Invalid("MAX_SEATS_PER_SESSION must be positive".into()));
        }
        if self.holds.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid("SWEEP_INTERVAL_MS must be positive".into()));
        }
        if self.holds.bus_channel_capacity == 0 {
            return Err(ConfigError::Invalid("BUS_CHANNEL_CAPACITY must be positive".into()));
        }
        if self.loyalty.point_value == 0 {
            return Err(ConfigError::Invalid("LOYALTY_POINT_VALUE must be positive".into()));
        }
        if self.gateway.timeout_ms == 0 {
            return Err(ConfigError::Invalid("GATEWAY_TIMEOUT_MS must be positive".into()));
        }
        if self.orders.kind == OrderStoreKind::Postgres && self.orders.database_url.is_none() {
            return Err(ConfigError::Invalid(
                "ORDER_STORE=postgres requires DATABASE_URL".into(),
            ));
        }
        if self.websocket.ping_interval_secs >= self.websocket.idle_timeout_secs {
            return Err(ConfigError::Invalid(
                "WS_PING_INTERVAL_SECS must be shorter than WS_IDLE_TIMEOUT_SECS".into(),
            ));
        }
        Ok(())
    }

    /// Address the HTTP server binds to
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Address the metrics server binds to
    #[must_use]
    pub fn metrics_address(&self) -> String {
        format!("{}:{}", self.server.metrics_host, self.server.metrics_port)
    }

    /// Hold policy in force
    #[must_use]
    pub fn hold_policy(&self) -> HoldPolicy {
        HoldPolicy {
            hold_duration: chrono::Duration::seconds(
                i64::try_from(self.holds.hold_duration_secs).unwrap_or(i64::MAX / 1000),
            ),
            max_seats_per_session: self.holds.max_seats_per_session,
        }
    }

    /// Loyalty policy in force
    #[must_use]
    pub const fn loyalty_policy(&self) -> LoyaltyPolicy {
        LoyaltyPolicy {
            point_value: Money::new(self.loyalty.point_value),
            min_redeem_points: self.loyalty.min_redeem_points,
        }
    }

    /// Coordinator tuning
    #[must_use]
    pub const fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            gateway_timeout: Duration::from_millis(self.gateway.timeout_ms),
        }
    }

    /// Expiry sweep period
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.holds.sweep_interval_ms)
    }
}

impl Default for Config {
    /// Defaults without reading the environment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                log_level: "info".to_string(),
                metrics_host: "127.0.0.1".to_string(),
                metrics_port: 9090,
                shutdown_timeout: 30,
            },
            holds: HoldsConfig {
                hold_duration_secs: 300,
                max_seats_per_session: 8,
                sweep_interval_ms: 1000,
                bus_channel_capacity: marquee_engine::bus::DEFAULT_CHANNEL_CAPACITY,
            },
            loyalty: LoyaltyConfig {
                point_value: 1000,
                min_redeem_points: 20,
            },
            gateway: GatewayConfig {
                redirect_base_url: "http://localhost:8080/mock-gateway".to_string(),
                timeout_ms: 10_000,
            },
            orders: OrderStoreConfig {
                kind: OrderStoreKind::Memory,
                database_url: None,
                max_connections: 10,
                connect_timeout: 30,
            },
            websocket: WebSocketConfig {
                max_connections: 1000,
                ping_interval_secs: 30,
                idle_timeout_secs: 300,
            },
            catalog_seed_path: None,
        }
    }
}
