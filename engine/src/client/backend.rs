//! Server operations the booking controller relies on.

use crate::holds::{HoldError, HoldManager, SeatMap};
use crate::orders::{CreateOrderRequest, OrderCoordinator, OrderError, OrderStatusView, PreviewRequest};
use crate::pricing::PriceBreakdown;
use async_trait::async_trait;
use marquee_core::error::ErrorCode;
use marquee_core::types::{ComboLine, OrderId, ReservationSession, SeatId, ShowtimeId, UserId};
use std::sync::Arc;
use thiserror::Error;

/// Backend failure as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Hold manager rejected the operation
    #[error(transparent)]
    Hold(#[from] HoldError),
    /// Coordinator rejected the operation
    #[error(transparent)]
    Order(#[from] OrderError),
    /// The server could not be reached or answered garbage
    #[error("transport error: {0}")]
    Transport(String),
}

impl BackendError {
    /// Client-visible code
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Hold(error) => error.code(),
            Self::Order(error) => error.code(),
            Self::Transport(_) => ErrorCode::Internal,
        }
    }

    /// Seats a conflict is about
    #[must_use]
    pub fn conflicting_seats(&self) -> &[SeatId] {
        match self {
            Self::Hold(error) | Self::Order(OrderError::Hold(error)) => error.seat_ids(),
            _ => &[],
        }
    }
}

/// Booking operations offered by the server.
#[async_trait]
pub trait BookingBackend: Send + Sync {
    /// Claim exactly these seats.
    ///
    /// # Errors
    ///
    /// Conflicts and validation failures.
    async fn claim_seats(
        &self,
        user_id: UserId,
        showtime_id: ShowtimeId,
        seat_ids: Vec<SeatId>,
    ) -> Result<ReservationSession, BackendError>;

    /// Add and remove seats of the live session.
    ///
    /// # Errors
    ///
    /// Conflicts, validation failures or an expired session.
    async fn modify_seats(
        &self,
        user_id: UserId,
        showtime_id: ShowtimeId,
        add: Vec<SeatId>,
        remove: Vec<SeatId>,
    ) -> Result<Option<ReservationSession>, BackendError>;

    /// Release the session.
    ///
    /// # Errors
    ///
    /// Transport failures.
    async fn release_session(&self, user_id: UserId, showtime_id: ShowtimeId) -> Result<(), BackendError>;

    /// Live session, if any.
    ///
    /// # Errors
    ///
    /// Transport failures.
    async fn session(
        &self,
        user_id: UserId,
        showtime_id: ShowtimeId,
    ) -> Result<Option<ReservationSession>, BackendError>;

    /// Seat map as seen by `user_id`.
    ///
    /// # Errors
    ///
    /// Unknown showtime or transport failures.
    async fn seat_map(&self, showtime_id: ShowtimeId, user_id: UserId) -> Result<SeatMap, BackendError>;

    /// Attach combos to the live session.
    ///
    /// # Errors
    ///
    /// An expired session.
    async fn select_combos(
        &self,
        user_id: UserId,
        showtime_id: ShowtimeId,
        combos: Vec<ComboLine>,
    ) -> Result<ReservationSession, BackendError>;

    /// Price preview.
    ///
    /// # Errors
    ///
    /// Pricing failures.
    async fn preview(&self, request: PreviewRequest) -> Result<PriceBreakdown, BackendError>;

    /// Create the order.
    ///
    /// # Errors
    ///
    /// Checkout failures.
    async fn create_order(&self, request: CreateOrderRequest) -> Result<OrderStatusView, BackendError>;

    /// Poll an order.
    ///
    /// # Errors
    ///
    /// Unknown orders or transport failures.
    async fn order_status(&self, order_id: OrderId) -> Result<OrderStatusView, BackendError>;
}

/// Backend calling the engine in-process.
#[derive(Clone)]
pub struct LocalBackend {
    holds: Arc<HoldManager>,
    orders: Arc<OrderCoordinator>,
}

impl LocalBackend {
    /// Creates a backend over a hold manager and a coordinator
    #[must_use]
    pub fn new(holds: Arc<HoldManager>, orders: Arc<OrderCoordinator>) -> Self {
        Self { holds, orders }
    }
}

#[async_trait]
impl BookingBackend for LocalBackend {
    async fn claim_seats(
        &self,
        user_id: UserId,
        showtime_id: ShowtimeId,
        seat_ids: Vec<SeatId>,
    ) -> Result<ReservationSession, BackendError> {
        Ok(self.holds.claim_seats(user_id, showtime_id, seat_ids).await?)
    }

    async fn modify_seats(
        &self,
        user_id: UserId,
        showtime_id: ShowtimeId,
        add: Vec<SeatId>,
        remove: Vec<SeatId>,
    ) -> Result<Option<ReservationSession>, BackendError> {
        Ok(self.holds.modify_seats(user_id, showtime_id, add, remove).await?)
    }

    async fn release_session(&self, user_id: UserId, showtime_id: ShowtimeId) -> Result<(), BackendError> {
        self.holds.release_session(user_id, showtime_id).await?;
        Ok(())
    }

    async fn session(
        &self,
        user_id: UserId,
        showtime_id: ShowtimeId,
    ) -> Result<Option<ReservationSession>, BackendError> {
        Ok(self.holds.session(user_id, showtime_id).await)
    }

    async fn seat_map(&self, showtime_id: ShowtimeId, user_id: UserId) -> Result<SeatMap, BackendError> {
        Ok(self.holds.seat_map(showtime_id, Some(user_id)).await?)
    }

    async fn select_combos(
        &self,
        user_id: UserId,
        showtime_id: ShowtimeId,
        combos: Vec<ComboLine>,
    ) -> Result<ReservationSession, BackendError> {
        Ok(self.holds.select_combos(user_id, showtime_id, combos).await?)
    }

    async fn preview(&self, request: PreviewRequest) -> Result<PriceBreakdown, BackendError> {
        Ok(self.orders.preview(&request).await?)
    }

    async fn create_order(&self, request: CreateOrderRequest) -> Result<OrderStatusView, BackendError> {
        Ok(self.orders.create_order(request).await?.status_view())
    }

    async fn order_status(&self, order_id: OrderId) -> Result<OrderStatusView, BackendError> {
        Ok(self.orders.check_status(order_id).await?)
    }
}
