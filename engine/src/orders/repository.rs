//! Order storage.

use super::{OrderStatus, PendingOrder};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::types::{OrderId, SessionId};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Order store failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// Order id already stored
    #[error("order {0} already exists")]
    Duplicate(OrderId),
    /// Update of an order that was never inserted
    #[error("order {0} does not exist")]
    Missing(OrderId),
    /// Backend failure
    #[error("order store error: {0}")]
    Backend(String),
    /// Stored document could not be decoded
    #[error("order decode error: {0}")]
    Decode(String),
}

/// Persistence of pending orders.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Store a new order.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Duplicate`] if the id exists, or a backend error.
    async fn insert(&self, order: &PendingOrder) -> Result<(), RepositoryError>;

    /// Replace a stored order.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Missing`] if the id is unknown, or a backend error.
    async fn update(&self, order: &PendingOrder) -> Result<(), RepositoryError>;

    /// Load an order.
    ///
    /// # Errors
    ///
    /// Backend or decode errors.
    async fn get(&self, order_id: OrderId) -> Result<Option<PendingOrder>, RepositoryError>;

    /// Load an order by gateway reference.
    ///
    /// # Errors
    ///
    /// Backend or decode errors.
    async fn find_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<PendingOrder>, RepositoryError>;

    /// Non-terminal order of a reservation session, if any.
    ///
    /// # Errors
    ///
    /// Backend or decode errors.
    async fn open_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<PendingOrder>, RepositoryError>;

    /// Non-terminal orders whose deadline is at or before `now`.
    ///
    /// # Errors
    ///
    /// Backend or decode errors.
    async fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<PendingOrder>, RepositoryError>;
}

/// In-memory order store.
#[derive(Debug, Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<OrderId, PendingOrder>>,
}

impl InMemoryOrderRepository {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders
    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }

    /// Stored orders with a given status
    pub async fn count_with_status(&self, status: OrderStatus) -> usize {
        self.orders
            .read()
            .await
            .values()
            .filter(|order| order.status == status)
            .count()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &PendingOrder) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.order_id) {
            return Err(RepositoryError::Duplicate(order.order_id));
        }
        orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn update(&self, order: &PendingOrder) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&order.order_id) {
            Some(stored) => {
                *stored = order.clone();
                Ok(())
            }
            None => Err(RepositoryError::Missing(order.order_id)),
        }
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<PendingOrder>, RepositoryError> {
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    async fn find_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<PendingOrder>, RepositoryError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|order| order.external_ref.as_deref() == Some(external_ref))
            .cloned())
    }

    async fn open_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<PendingOrder>, RepositoryError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|order| order.session_id == session_id && !order.status.is_terminal())
            .cloned())
    }

    async fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<PendingOrder>, RepositoryError> {
        let mut overdue: Vec<PendingOrder> = self
            .orders
            .read()
            .await
            .values()
            .filter(|order| !order.status.is_terminal() && order.expires_at <= now)
            .cloned()
            .collect();
        overdue.sort_by_key(|order| order.expires_at);
        Ok(overdue)
    }
}
