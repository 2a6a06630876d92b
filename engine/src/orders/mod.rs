//! Orders: checkout snapshots and their reconciliation with the gateway.
//!
//! ```text
//! created ──> awaiting_gateway ──> confirmed
//!    │               ├───────────> failed
//!    │               └───────────> expired
//!    └──> failed | expired
//! ```
//!
//! Terminal states are final. Only the gateway callback and the expiry sweep
//! move an order; status polling is read-only.

pub mod coordinator;
pub mod repository;

pub use coordinator::{
    CoordinatorConfig, CoordinatorEnvironment, CreateOrderRequest, LedgerFinalizer,
    OrderCoordinator, OrderFinalizer, PreviewRequest,
};
pub use repository::{InMemoryOrderRepository, OrderRepository, RepositoryError};

use crate::catalog::CatalogError;
use crate::holds::HoldError;
use crate::payment_gateway::PaymentGatewayError;
use crate::pricing::{PriceBreakdown, PricingError};
use chrono::{DateTime, Utc};
use marquee_core::error::ErrorCode;
use marquee_core::types::{
    ComboId, ComboLine, Money, OrderId, SeatId, SessionId, ShowtimeId, Ticket, UserId,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Snapshot stored, gateway not reached yet
    Created,
    /// Waiting for the gateway callback
    AwaitingGateway,
    /// Paid, seats sold, tickets issued
    Confirmed,
    /// Payment refused or gateway unusable
    Failed,
    /// Hold lapsed before the payment was confirmed
    Expired,
}

impl OrderStatus {
    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed | Self::Expired)
    }

    /// Whether `self → next` is a legal transition
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Created,
                Self::AwaitingGateway | Self::Failed | Self::Expired
            ) | (
                Self::AwaitingGateway,
                Self::Confirmed | Self::Failed | Self::Expired
            )
        )
    }

    /// Wire and metric label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingGateway => "awaiting_gateway",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "awaiting_gateway" => Ok(Self::AwaitingGateway),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

// ============================================================================
// Pending order
// ============================================================================

/// Frozen checkout snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOrder {
    /// Identifier, sent to the gateway as the order reference
    pub order_id: OrderId,
    /// Buyer
    pub user_id: UserId,
    /// Showtime
    pub showtime_id: ShowtimeId,
    /// Session the order was created for
    pub session_id: SessionId,
    /// Seats being bought
    pub seat_ids: Vec<SeatId>,
    /// Food and drinks
    pub combos: Vec<ComboLine>,
    /// Price computed at checkout
    pub breakdown: PriceBreakdown,
    /// Gateway transaction reference
    pub external_ref: Option<String>,
    /// Hosted payment page
    pub redirect_url: Option<String>,
    /// Current status
    pub status: OrderStatus,
    /// Why the order failed or expired
    pub failure_reason: Option<String>,
    /// Issued on confirmation, one per seat
    pub tickets: Vec<Ticket>,
    /// Created at
    pub created_at: DateTime<Utc>,
    /// Last transition
    pub updated_at: DateTime<Utc>,
    /// Hold expiry captured at checkout
    pub expires_at: DateTime<Utc>,
}

impl PendingOrder {
    /// Amount charged
    #[must_use]
    pub const fn total(&self) -> Money {
        self.breakdown.total
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::InvalidTransition`] if the state machine forbids it.
    pub fn transition(&mut self, next: OrderStatus, at: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }

    /// Polling projection
    #[must_use]
    pub fn status_view(&self) -> OrderStatusView {
        OrderStatusView {
            order_id: self.order_id,
            status: self.status,
            total: self.total(),
            redirect_url: self.redirect_url.clone(),
            failure_reason: self.failure_reason.clone(),
            expires_at: self.expires_at,
            tickets: self.tickets.clone(),
        }
    }
}

/// What a polling client sees.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusView {
    /// Order
    pub order_id: OrderId,
    /// Status
    pub status: OrderStatus,
    /// Amount
    pub total: Money,
    /// Payment page while awaiting the gateway
    pub redirect_url: Option<String>,
    /// Set on failure or expiry
    pub failure_reason: Option<String>,
    /// Order deadline
    pub expires_at: DateTime<Utc>,
    /// Tickets once confirmed
    pub tickets: Vec<Ticket>,
}

/// Result of a callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackOutcome {
    /// Order after the callback
    pub order: PendingOrder,
    /// The order was already terminal; nothing changed
    pub duplicate: bool,
}

// ============================================================================
// Errors
// ============================================================================

/// Coordinator failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// No live reservation session to check out
    #[error("reservation session expired")]
    SessionExpired,
    /// Requested seats differ from the held ones
    #[error("requested seats do not match the held seats")]
    SeatsMismatch {
        /// Seats held by the session
        held: Vec<SeatId>,
        /// Seats the request named
        requested: Vec<SeatId>,
    },
    /// The session already has an open order
    #[error("order {order_id} is already in progress for this session")]
    OrderInProgress {
        /// Open order
        order_id: OrderId,
    },
    /// No such order
    #[error("order not found: {0}")]
    NotFound(String),
    /// Showtime missing from the catalog
    #[error("unknown showtime {0}")]
    UnknownShowtime(ShowtimeId),
    /// Combo missing from the menu
    #[error("unknown combo {0}")]
    UnknownCombo(ComboId),
    /// Pricing rejected the selection
    #[error(transparent)]
    Pricing(#[from] PricingError),
    /// Gateway could not create the payment
    #[error(transparent)]
    Gateway(#[from] PaymentGatewayError),
    /// Callback authenticity not confirmed
    #[error("gateway callback could not be verified")]
    CallbackUnverified,
    /// State machine violation
    #[error("invalid order transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: OrderStatus,
        /// Requested status
        to: OrderStatus,
    },
    /// Hold manager failure
    #[error(transparent)]
    Hold(#[from] HoldError),
    /// Collaborator failure
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// Order store failure
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl OrderError {
    /// Client-visible code
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::SessionExpired => ErrorCode::SessionExpired,
            Self::SeatsMismatch { .. } => ErrorCode::ValidationError,
            Self::OrderInProgress { .. } => ErrorCode::OrderInProgress,
            Self::NotFound(_) => ErrorCode::OrderNotFound,
            Self::UnknownShowtime(_) => ErrorCode::UnknownShowtime,
            Self::UnknownCombo(_) => ErrorCode::UnknownCombo,
            Self::Pricing(error) => error.code(),
            Self::Gateway(PaymentGatewayError::Timeout) => ErrorCode::GatewayTimeout,
            Self::Gateway(_) => ErrorCode::GatewayRejected,
            Self::CallbackUnverified => ErrorCode::CallbackUnverified,
            Self::Hold(error) => error.code(),
            Self::InvalidTransition { .. } | Self::Catalog(_) | Self::Repository(_) => {
                ErrorCode::Internal
            }
        }
    }
}
