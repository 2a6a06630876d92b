//! Booking wizard driven from the client side.
//!
//! ```text
//! SeatSelection ──next──> Food ──next──> Payment ──checkout/poll──> Completed
//!       ^                  │               │
//!       └──────back────────┘<─────back─────┘
//! ```
//!
//! The controller mirrors the server's session and seat map. The mirror is
//! never trusted to free seats: the countdown only tells the user how long
//! the server will keep the hold, and every resume revalidates against the
//! server's session.

use super::backend::{BookingBackend, BackendError};
use super::cache::{CacheError, PersistedBooking, SessionCache};
use crate::bus::{BusMessage, SeatNotification};
use crate::holds::SeatMap;
use crate::orders::{CreateOrderRequest, OrderStatus, OrderStatusView, PreviewRequest};
use crate::pricing::PriceBreakdown;
use chrono::Duration;
use marquee_core::environment::Clock;
use marquee_core::error::ErrorCode;
use marquee_core::types::{
    ComboLine, OrderId, ReservationSession, SeatId, SeatState, ShowtimeId, UserId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Steps of the booking wizard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    /// Picking seats
    SeatSelection,
    /// Picking food and drinks
    Food,
    /// Reviewing the price and paying
    Payment,
    /// Order confirmed
    Completed,
}

/// Controller failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    /// Server rejected the operation
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// Local cache failure
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// The hold is gone; selection restarts
    #[error("reservation session expired")]
    SessionExpired,
    /// Operation not available at this step
    #[error("not available at step {actual:?}")]
    WrongStep {
        /// Current step
        actual: WizardStep,
    },
    /// No order to poll
    #[error("no order in progress")]
    NoOrder,
}

impl ControllerError {
    /// Client-visible code
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Backend(error) => error.code(),
            Self::SessionExpired => ErrorCode::SessionExpired,
            Self::WrongStep { .. } | Self::NoOrder => ErrorCode::ValidationError,
            Self::Cache(_) => ErrorCode::Internal,
        }
    }
}

/// Something the UI must tell the user about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerNotice {
    /// The user's hold expired on the server
    SessionExpired,
    /// The mirrored seat map missed updates and must be refetched
    ResyncRequired,
}

/// Countdown state after a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Countdown {
    /// No hold
    Idle,
    /// Time left on the hold
    Remaining(Duration),
    /// The hold just ran out; local state was dropped
    Expired,
}

/// Client-side booking wizard for one user and showtime.
pub struct BookingController {
    user_id: UserId,
    showtime_id: ShowtimeId,
    backend: Arc<dyn BookingBackend>,
    cache: Arc<dyn SessionCache>,
    clock: Arc<dyn Clock>,
    step: WizardStep,
    session: Option<ReservationSession>,
    seat_map: Option<SeatMap>,
    stale: bool,
    combos: Vec<ComboLine>,
    promotion_code: Option<String>,
    loyalty_points: u64,
    order_id: Option<OrderId>,
}

impl BookingController {
    /// Creates a controller with empty local state
    #[must_use]
    pub fn new(
        user_id: UserId,
        showtime_id: ShowtimeId,
        backend: Arc<dyn BookingBackend>,
        cache: Arc<dyn SessionCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            user_id,
            showtime_id,
            backend,
            cache,
            clock,
            step: WizardStep::SeatSelection,
            session: None,
            seat_map: None,
            stale: true,
            combos: Vec::new(),
            promotion_code: None,
            loyalty_points: 0,
            order_id: None,
        }
    }

    /// Current step
    #[must_use]
    pub const fn step(&self) -> WizardStep {
        self.step
    }

    /// Mirrored session
    #[must_use]
    pub const fn session(&self) -> Option<&ReservationSession> {
        self.session.as_ref()
    }

    /// Mirrored seat map
    #[must_use]
    pub const fn seat_map(&self) -> Option<&SeatMap> {
        self.seat_map.as_ref()
    }

    /// Whether the seat map must be refetched
    #[must_use]
    pub const fn needs_resync(&self) -> bool {
        self.stale
    }

    /// Order awaiting its outcome
    #[must_use]
    pub const fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    /// Seats currently held by the user
    #[must_use]
    pub fn selected_seats(&self) -> Vec<SeatId> {
        self.session
            .as_ref()
            .map(ReservationSession::seat_list)
            .unwrap_or_default()
    }

    /// Refetch the seat map from the server.
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub async fn load_seat_map(&mut self) -> Result<&SeatMap, ControllerError> {
        let map = self.backend.seat_map(self.showtime_id, self.user_id).await?;
        self.stale = false;
        Ok(self.seat_map.insert(map))
    }

    /// Hold or release one seat.
    ///
    /// # Errors
    ///
    /// [`ControllerError::WrongStep`] outside seat selection; conflicts and
    /// validation failures from the server, which leave the mirror unchanged.
    pub async fn toggle_seat(&mut self, seat_id: SeatId) -> Result<(), ControllerError> {
        self.require_step(WizardStep::SeatSelection)?;
        self.resync_if_stale().await?;
        let live = self.live_session().cloned();

        let result = match live {
            Some(session) if session.seats.contains(&seat_id) => {
                self.backend
                    .modify_seats(self.user_id, self.showtime_id, Vec::new(), vec![seat_id])
                    .await
            }
            Some(_) => {
                self.backend
                    .modify_seats(self.user_id, self.showtime_id, vec![seat_id], Vec::new())
                    .await
            }
            None => self
                .backend
                .claim_seats(self.user_id, self.showtime_id, vec![seat_id])
                .await
                .map(Some),
        };

        self.session = self.check(result)?;
        self.persist().await
    }

    /// Give up the hold and start over.
    ///
    /// # Errors
    ///
    /// Backend or cache failures.
    pub async fn cancel(&mut self) -> Result<(), ControllerError> {
        self.backend
            .release_session(self.user_id, self.showtime_id)
            .await?;
        self.reset();
        self.cache.clear(self.showtime_id).await?;
        Ok(())
    }

    /// Replace the combo selection.
    ///
    /// # Errors
    ///
    /// [`ControllerError::WrongStep`] outside the food step, or an expired session.
    pub async fn select_combos(&mut self, combos: Vec<ComboLine>) -> Result<(), ControllerError> {
        self.require_step(WizardStep::Food)?;
        let result = self
            .backend
            .select_combos(self.user_id, self.showtime_id, combos)
            .await;
        let session = self.check(result)?;
        self.combos.clone_from(&session.combos);
        self.session = Some(session);
        self.persist().await
    }

    /// Set the promotion code and points to redeem.
    ///
    /// # Errors
    ///
    /// Cache failures.
    pub async fn set_discounts(
        &mut self,
        promotion_code: Option<String>,
        loyalty_points: u64,
    ) -> Result<(), ControllerError> {
        self.promotion_code = promotion_code.filter(|code| !code.trim().is_empty());
        self.loyalty_points = loyalty_points;
        self.persist().await
    }

    /// Price the current selection.
    ///
    /// # Errors
    ///
    /// Pricing failures from the server.
    pub async fn quote(&mut self) -> Result<PriceBreakdown, ControllerError> {
        self.resync_if_stale().await?;
        let request = PreviewRequest {
            showtime_id: self.showtime_id,
            seat_ids: self.selected_seats(),
            combos: self.combos.clone(),
            promotion_code: self.promotion_code.clone(),
            loyalty_points: Some(self.loyalty_points),
            user_id: Some(self.user_id),
        };
        Ok(self.backend.preview(request).await?)
    }

    /// Advance the wizard.
    ///
    /// # Errors
    ///
    /// [`ControllerError::SessionExpired`] without a live hold;
    /// [`ControllerError::WrongStep`] from payment or completed.
    pub async fn next_step(&mut self) -> Result<WizardStep, ControllerError> {
        let next = match self.step {
            WizardStep::SeatSelection => WizardStep::Food,
            WizardStep::Food => WizardStep::Payment,
            actual => return Err(ControllerError::WrongStep { actual }),
        };
        self.resync_if_stale().await?;
        if self.live_session().is_none() {
            self.expire_locally().await?;
            return Err(ControllerError::SessionExpired);
        }
        self.step = next;
        self.persist().await?;
        Ok(next)
    }

    /// Go back one step. The hold is kept.
    ///
    /// # Errors
    ///
    /// [`ControllerError::WrongStep`] from seat selection or completed, or
    /// while an order is in progress.
    pub async fn back(&mut self) -> Result<WizardStep, ControllerError> {
        let previous = match self.step {
            WizardStep::Food => WizardStep::SeatSelection,
            WizardStep::Payment if self.order_id.is_none() => WizardStep::Food,
            actual => return Err(ControllerError::WrongStep { actual }),
        };
        self.step = previous;
        self.persist().await?;
        Ok(previous)
    }

    /// Create the order for the held seats.
    ///
    /// # Errors
    ///
    /// [`ControllerError::WrongStep`] outside payment; checkout failures.
    pub async fn checkout(&mut self) -> Result<OrderStatusView, ControllerError> {
        self.require_step(WizardStep::Payment)?;
        self.resync_if_stale().await?;
        if self.live_session().is_none() {
            self.expire_locally().await?;
            return Err(ControllerError::SessionExpired);
        }

        let request = CreateOrderRequest {
            user_id: self.user_id,
            showtime_id: self.showtime_id,
            seat_ids: Some(self.selected_seats()),
            combos: Some(self.combos.clone()),
            promotion_code: self.promotion_code.clone(),
            loyalty_points: Some(self.loyalty_points),
        };
        let result = self.backend.create_order(request).await;
        let view = self.check(result)?;
        info!(order_id = %view.order_id, status = %view.status, "Checkout started");
        self.order_id = Some(view.order_id);
        self.persist().await?;
        Ok(view)
    }

    /// Poll the order in progress and follow its outcome.
    ///
    /// # Errors
    ///
    /// [`ControllerError::NoOrder`] without an order; backend failures.
    pub async fn poll_order(&mut self) -> Result<OrderStatusView, ControllerError> {
        let order_id = self.order_id.ok_or(ControllerError::NoOrder)?;
        let view = self.backend.order_status(order_id).await?;

        match view.status {
            OrderStatus::Confirmed => {
                self.session = None;
                self.step = WizardStep::Completed;
                self.cache.clear(self.showtime_id).await?;
            }
            OrderStatus::Failed | OrderStatus::Expired => {
                self.reset();
                self.cache.clear(self.showtime_id).await?;
            }
            OrderStatus::Created | OrderStatus::AwaitingGateway => {}
        }
        Ok(view)
    }

    /// Apply a bus message to the mirror.
    ///
    /// # Errors
    ///
    /// Cache failures while dropping an expired hold.
    pub async fn on_notification(
        &mut self,
        message: &BusMessage,
    ) -> Result<Option<ControllerNotice>, ControllerError> {
        if message.showtime_id != self.showtime_id {
            return Ok(None);
        }

        if let SeatNotification::ReservationExpired { user_id } = message.notification {
            if user_id == self.user_id && self.order_id.is_none() {
                info!(showtime_id = %self.showtime_id, "Hold expired on the server");
                self.apply_delta(message);
                self.expire_locally().await?;
                return Ok(Some(ControllerNotice::SessionExpired));
            }
        }

        Ok(self
            .apply_delta(message)
            .then_some(ControllerNotice::ResyncRequired))
    }

    /// Advance the countdown.
    ///
    /// Reaching zero drops the local hold and its cached copy and returns to
    /// seat selection. The server frees the seats on its own schedule.
    ///
    /// # Errors
    ///
    /// Cache failures while dropping the hold.
    pub async fn tick(&mut self) -> Result<Countdown, ControllerError> {
        let Some(session) = &self.session else {
            return Ok(Countdown::Idle);
        };
        let remaining = session.remaining(self.clock.now());
        if remaining > Duration::zero() {
            return Ok(Countdown::Remaining(remaining));
        }
        if self.order_id.is_some() {
            return Ok(Countdown::Remaining(Duration::zero()));
        }
        self.expire_locally().await?;
        Ok(Countdown::Expired)
    }

    /// Reload cached state and revalidate it against the server.
    ///
    /// Returns whether there was anything to resume. The server's session
    /// wins over the cache; a missing session discards the cache.
    ///
    /// # Errors
    ///
    /// Backend or cache failures.
    pub async fn resume(&mut self) -> Result<bool, ControllerError> {
        let Some(cached) = self.cache.load(self.showtime_id).await? else {
            return Ok(false);
        };
        if cached.user_id != self.user_id {
            self.cache.clear(self.showtime_id).await?;
            return Ok(false);
        }

        self.promotion_code = cached.promotion_code;
        self.loyalty_points = cached.loyalty_points;

        if let Some(order_id) = cached.order_id {
            self.order_id = Some(order_id);
            self.step = WizardStep::Payment;
            self.session = self.backend.session(self.user_id, self.showtime_id).await?;
            self.poll_order().await?;
            self.load_seat_map().await?;
            return Ok(true);
        }

        match self.backend.session(self.user_id, self.showtime_id).await? {
            Some(session) => {
                if cached.session_id != Some(session.session_id) {
                    debug!(showtime_id = %self.showtime_id, "Cached session replaced by server state");
                }
                self.combos.clone_from(&session.combos);
                self.session = Some(session);
                self.step = match cached.step {
                    WizardStep::Completed => WizardStep::SeatSelection,
                    step => step,
                };
                self.persist().await?;
                self.load_seat_map().await?;
                Ok(true)
            }
            None => {
                info!(showtime_id = %self.showtime_id, "Cached hold no longer exists on the server");
                self.reset();
                self.cache.clear(self.showtime_id).await?;
                self.load_seat_map().await?;
                Ok(false)
            }
        }
    }

    fn live_session(&self) -> Option<&ReservationSession> {
        let now = self.clock.now();
        self.session.as_ref().filter(|session| session.is_live(now))
    }

    fn require_step(&self, expected: WizardStep) -> Result<(), ControllerError> {
        if self.step == expected {
            Ok(())
        } else {
            Err(ControllerError::WrongStep { actual: self.step })
        }
    }

    /// Backend results that report an expired session drop the local hold
    fn check<T>(&mut self, result: Result<T, BackendError>) -> Result<T, ControllerError> {
        result.map_err(|error| {
            if error.code() == ErrorCode::SessionExpired {
                self.reset();
            }
            ControllerError::Backend(error)
        })
    }

    async fn resync_if_stale(&mut self) -> Result<(), ControllerError> {
        if self.stale {
            debug!(showtime_id = %self.showtime_id, "Refetching stale seat map");
            self.load_seat_map().await?;
        }
        Ok(())
    }

    async fn expire_locally(&mut self) -> Result<(), ControllerError> {
        self.reset();
        self.cache.clear(self.showtime_id).await?;
        Ok(())
    }

    fn reset(&mut self) {
        self.session = None;
        self.combos.clear();
        self.order_id = None;
        self.step = WizardStep::SeatSelection;
    }

    /// Returns whether the mirror missed messages
    fn apply_delta(&mut self, message: &BusMessage) -> bool {
        let Some(map) = self.seat_map.as_mut() else {
            return false;
        };
        if message.sequence <= map.sequence {
            return false;
        }
        let gap = message.sequence > map.sequence + 1;
        map.sequence = message.sequence;

        let (seat_ids, state, holder) = match &message.notification {
            SeatNotification::SeatBooked {
                seat_ids,
                user_id,
                expires_at,
            } => (
                seat_ids,
                SeatState::Held {
                    holder: *user_id,
                    expires_at: *expires_at,
                },
                Some(*user_id),
            ),
            SeatNotification::SeatUnbooked { seat_ids } => (seat_ids, SeatState::Free, None),
            SeatNotification::SeatSold { seat_ids } => (seat_ids, SeatState::Sold, None),
            SeatNotification::ReservationExpired { .. } => {
                if gap {
                    self.stale = true;
                }
                return gap;
            }
        };

        for view in map.seats.iter_mut().filter(|view| seat_ids.contains(&view.seat_id)) {
            view.state = state.clone();
            view.mine = holder == Some(self.user_id);
        }

        if gap {
            self.stale = true;
        }
        gap
    }

    async fn persist(&self) -> Result<(), ControllerError> {
        if self.session.is_none() && self.order_id.is_none() {
            self.cache.clear(self.showtime_id).await?;
            return Ok(());
        }
        let booking = PersistedBooking {
            showtime_id: self.showtime_id,
            user_id: self.user_id,
            session_id: self.session.as_ref().map(|session| session.session_id),
            seat_ids: self.selected_seats(),
            expires_at: self.session.as_ref().map(|session| session.expires_at),
            combos: self.combos.clone(),
            promotion_code: self.promotion_code.clone(),
            loyalty_points: self.loyalty_points,
            step: self.step,
            order_id: self.order_id,
            saved_at: self.clock.now(),
        };
        self.cache.save(&booking).await?;
        Ok(())
    }
}
