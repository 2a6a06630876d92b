//! PostgreSQL-backed order repository.
//!
//! Orders are stored as a JSONB document next to the columns the coordinator
//! queries by (`external_ref`, `status`, `session_id`, `expires_at`).

use crate::config::OrderStoreConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::types::{OrderId, SessionId};
use marquee_engine::orders::{OrderRepository, RepositoryError};
use marquee_engine::PendingOrder;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::info;

/// Open a pool and apply migrations.
///
/// # Errors
///
/// Returns error if the URL is missing, the database is unreachable or a
/// migration fails.
pub async fn connect(config: &OrderStoreConfig) -> anyhow::Result<PgPool> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;

    info!(max_connections = config.max_connections, "Connecting to order database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout))
        .connect(url)
        .await?;

    info!("Running order migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Order migrations complete");

    Ok(pool)
}

/// Order repository over `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Create a repository over a migrated pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn decode(row: &PgRow) -> Result<PendingOrder, RepositoryError> {
        row.try_get::<Json<PendingOrder>, _>("document")
            .map(|Json(order)| order)
            .map_err(|e| RepositoryError::Decode(e.to_string()))
    }

    fn decode_optional(row: Option<PgRow>) -> Result<Option<PendingOrder>, RepositoryError> {
        row.as_ref().map(Self::decode).transpose()
    }
}

fn backend(context: &str) -> impl FnOnce(sqlx::Error) -> RepositoryError + '_ {
    move |e| RepositoryError::Backend(format!("{context}: {e}"))
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn insert(&self, order: &PendingOrder) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            INSERT INTO orders (order_id, user_id, showtime_id, session_id, status,
                                external_ref, expires_at, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (order_id) DO NOTHING
            ",
        )
        .bind(order.order_id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.showtime_id.as_uuid())
        .bind(order.session_id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.external_ref.as_deref())
        .bind(order.expires_at)
        .bind(Json(order))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend("Failed to insert order"))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Duplicate(order.order_id));
        }
        Ok(())
    }

    async fn update(&self, order: &PendingOrder) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE orders
            SET status = $2, external_ref = $3, expires_at = $4, document = $5, updated_at = $6
            WHERE order_id = $1
            ",
        )
        .bind(order.order_id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.external_ref.as_deref())
        .bind(order.expires_at)
        .bind(Json(order))
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend("Failed to update order"))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Missing(order.order_id));
        }
        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<PendingOrder>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM orders WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend("Failed to load order"))?;
        Self::decode_optional(row)
    }

    async fn find_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<PendingOrder>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM orders WHERE external_ref = $1")
            .bind(external_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend("Failed to load order by external ref"))?;
        Self::decode_optional(row)
    }

    async fn open_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<PendingOrder>, RepositoryError> {
        let row = sqlx::query(
            r"
            SELECT document FROM orders
            WHERE session_id = $1 AND status IN ('created', 'awaiting_gateway')
            ORDER BY created_at DESC
            LIMIT 1
            ",
        )
        .bind(session_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("Failed to load open order"))?;
        Self::decode_optional(row)
    }

    async fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<PendingOrder>, RepositoryError> {
        let rows = sqlx::query(
            r"
            SELECT document FROM orders
            WHERE status IN ('created', 'awaiting_gateway') AND expires_at <= $1
            ORDER BY expires_at
            ",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(backend("Failed to list overdue orders"))?;
        rows.iter().map(Self::decode).collect()
    }
}
