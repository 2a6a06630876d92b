//! Error taxonomy shared across the engine and its transports.
//!
//! Every typed failure in the engine maps onto one [`ErrorCode`]. Clients
//! branch on the code; the message is for humans.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, client-visible error code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Another user holds or bought one of the requested seats
    SeatConflict,
    /// The reservation session lapsed or was replaced
    SessionExpired,
    /// Seat is disabled in the catalog
    SeatUnavailable,
    /// Seat label not present in the room layout
    UnknownSeat,
    /// Showtime not present in the catalog
    UnknownShowtime,
    /// Claim or modify named no seats
    EmptySelection,
    /// Session would exceed the per-session seat limit
    TooManySeats,
    /// Promotion code unknown, inactive, out of window or below minimum order
    PromotionInvalid,
    /// Loyalty redemption below minimum, above balance or above the cap
    LoyaltyRedemptionInvalid,
    /// Combo item not on the menu
    UnknownCombo,
    /// The session already has an open order
    OrderInProgress,
    /// No such order
    OrderNotFound,
    /// Gateway refused to create the payment
    GatewayRejected,
    /// Gateway did not answer in time
    GatewayTimeout,
    /// Gateway adapter could not verify the callback
    CallbackUnverified,
    /// A later callback for an order that already reached a terminal state
    DuplicateCallback,
    /// Malformed request
    ValidationError,
    /// Infrastructure failure
    Internal,
}

impl ErrorCode {
    /// Wire representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SeatConflict => "SEAT_CONFLICT",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::SeatUnavailable => "SEAT_UNAVAILABLE",
            Self::UnknownSeat => "UNKNOWN_SEAT",
            Self::UnknownShowtime => "UNKNOWN_SHOWTIME",
            Self::EmptySelection => "EMPTY_SELECTION",
            Self::TooManySeats => "TOO_MANY_SEATS",
            Self::PromotionInvalid => "PROMOTION_INVALID",
            Self::LoyaltyRedemptionInvalid => "LOYALTY_REDEMPTION_INVALID",
            Self::UnknownCombo => "UNKNOWN_COMBO",
            Self::OrderInProgress => "ORDER_IN_PROGRESS",
            Self::OrderNotFound => "ORDER_NOT_FOUND",
            Self::GatewayRejected => "GATEWAY_REJECTED",
            Self::GatewayTimeout => "GATEWAY_TIMEOUT",
            Self::CallbackUnverified => "CALLBACK_UNVERIFIED",
            Self::DuplicateCallback => "DUPLICATE_CALLBACK",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn serde_matches_as_str() {
        for code in [
            ErrorCode::SeatConflict,
            ErrorCode::LoyaltyRedemptionInvalid,
            ErrorCode::GatewayTimeout,
            ErrorCode::DuplicateCallback,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }
}
