//! Seat holds: the authoritative reservation store and its manager.
//!
//! - [`reducer`]: the per-showtime state machine (commands, events, state)
//! - [`manager`]: serialization per showtime, lazy expiry, catalog loading
//!   and notification publishing

pub mod manager;
pub mod reducer;

pub use manager::{HoldManager, SeatMap, SeatView};
pub use reducer::{
    CommittedSession, HoldCommand, HoldContext, HoldEvent, HoldEvents, HoldPolicy, HoldReducer,
    Reduction, ReleaseReason, ShowtimeHolds,
};

use crate::catalog::CatalogError;
use marquee_core::error::ErrorCode;
use marquee_core::types::{SeatId, SessionId, ShowtimeId};
use thiserror::Error;

/// Hold manager failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HoldError {
    /// Seats are held by someone else or sold
    #[error("seats already taken: {}", join(.seat_ids))]
    SeatConflict {
        /// Every conflicting seat of the request
        seat_ids: Vec<SeatId>,
    },
    /// No live session for the user
    #[error("reservation session expired")]
    SessionExpired,
    /// The session named by the caller was replaced by a newer one
    #[error("reservation session was replaced by {current}")]
    SessionSuperseded {
        /// Live session of the user
        current: SessionId,
    },
    /// Disabled seats
    #[error("seats out of service: {}", join(.seat_ids))]
    SeatUnavailable {
        /// Disabled seats of the request
        seat_ids: Vec<SeatId>,
    },
    /// Seats missing from the room layout
    #[error("unknown seats: {}", join(.seat_ids))]
    UnknownSeat {
        /// Unknown seats of the request
        seat_ids: Vec<SeatId>,
    },
    /// Showtime missing from the catalog
    #[error("unknown showtime {0}")]
    UnknownShowtime(ShowtimeId),
    /// No seats named
    #[error("no seats selected")]
    EmptySelection,
    /// Session would exceed the limit
    #[error("{requested} seats requested, at most {max} allowed")]
    TooManySeats {
        /// Resulting session size
        requested: usize,
        /// Limit
        max: usize,
    },
    /// Seat catalog failure
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl HoldError {
    /// Client-visible code
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::SeatConflict { .. } => ErrorCode::SeatConflict,
            Self::SessionExpired | Self::SessionSuperseded { .. } => ErrorCode::SessionExpired,
            Self::SeatUnavailable { .. } => ErrorCode::SeatUnavailable,
            Self::UnknownSeat { .. } => ErrorCode::UnknownSeat,
            Self::UnknownShowtime(_) => ErrorCode::UnknownShowtime,
            Self::EmptySelection => ErrorCode::EmptySelection,
            Self::TooManySeats { .. } => ErrorCode::TooManySeats,
            Self::Catalog(_) => ErrorCode::Internal,
        }
    }

    /// Whether the error concerns seats being added rather than the session
    #[must_use]
    pub const fn rejects_additions(&self) -> bool {
        matches!(
            self,
            Self::SeatConflict { .. }
                | Self::SeatUnavailable { .. }
                | Self::UnknownSeat { .. }
                | Self::TooManySeats { .. }
        )
    }

    /// Seats the error is about, empty when it is not seat-specific
    #[must_use]
    pub fn seat_ids(&self) -> &[SeatId] {
        match self {
            Self::SeatConflict { seat_ids }
            | Self::SeatUnavailable { seat_ids }
            | Self::UnknownSeat { seat_ids } => seat_ids,
            _ => &[],
        }
    }
}

fn join(seat_ids: &[SeatId]) -> String {
    seat_ids
        .iter()
        .map(SeatId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
