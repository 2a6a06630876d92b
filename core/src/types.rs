//! Domain types for the Marquee booking engine.
//!
//! Value objects shared by the hold manager, the pricing engine, the order
//! coordinator and the transports: identifiers, money, the seat layout
//! snapshot of a showtime, holds, reservation sessions and issued tickets.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a showtime (one screening of a movie in a room)
    ShowtimeId
);
uuid_id!(
    /// Unique identifier for a customer account
    UserId
);
uuid_id!(
    /// Identifier of one reservation session; replaced whenever the held seat set changes
    SessionId
);
uuid_id!(
    /// Unique identifier for a pending or finished order
    OrderId
);
uuid_id!(
    /// Unique identifier for an issued ticket
    TicketId
);
uuid_id!(
    /// Unique identifier for a food and drink combo
    ComboId
);

/// Error returned when a seat label cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid seat label: {0:?}")]
pub struct InvalidSeatId(pub String);

/// Room-local seat label such as `A1`.
///
/// Labels are trimmed and upper-cased on construction so `a1` and `A1 ` name
/// the same seat.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SeatId(String);

impl SeatId {
    /// Parse a seat label.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSeatId`] when the label is empty or contains anything
    /// other than ASCII letters and digits.
    pub fn parse(label: &str) -> Result<Self, InvalidSeatId> {
        let trimmed = label.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(InvalidSeatId(label.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// The normalized label
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SeatId {
    type Error = InvalidSeatId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SeatId> for String {
    fn from(value: SeatId) -> Self {
        value.0
    }
}

impl FromStr for SeatId {
    type Err = InvalidSeatId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money
// ============================================================================

/// Amount in the smallest currency unit.
///
/// Prices are whole đồng, so there is no fractional part to lose; all
/// arithmetic is checked or saturating.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from an amount in minor units
    #[must_use]
    pub const fn new(amount: u64) -> Self {
        Self(amount)
    }

    /// Returns the raw amount
    #[must_use]
    pub const fn amount(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Subtracts two amounts (returns None if result would be negative)
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Subtracts, stopping at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Multiplies by a quantity with overflow checking
    #[must_use]
    pub const fn checked_mul(self, quantity: u64) -> Option<Self> {
        match self.0.checked_mul(quantity) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Whole-number percentage of this amount, rounded down
    #[must_use]
    pub const fn percent(self, percent: u8) -> Self {
        // u64 * 100 can overflow for absurd amounts; widen first.
        #[allow(clippy::cast_possible_truncation)]
        let value = (self.0 as u128 * percent as u128 / 100) as u64;
        Self(value)
    }

    /// Half of this amount, rounded down
    #[must_use]
    pub const fn half(self) -> Self {
        Self(self.0 / 2)
    }

    /// Sums an iterator of amounts, `None` on overflow
    pub fn checked_sum<I>(amounts: I) -> Option<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, |acc, next| acc.checked_add(next))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Seat catalog snapshot
// ============================================================================

/// Pricing class of a seat (standard, VIP, couple...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatType {
    /// Catalog code referenced by seats
    pub code: String,
    /// Display name
    pub name: String,
    /// Added to the showtime base price
    pub price_offset: Money,
}

/// A physical seat in a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    /// Room-local label
    pub seat_id: SeatId,
    /// Row letter(s)
    pub row: String,
    /// Position in the row
    pub number: u16,
    /// Seat type code, if the seat is not plain base price
    pub seat_type: Option<String>,
    /// Out-of-service seats are never holdable
    pub enabled: bool,
}

/// Read-only snapshot of a showtime's room layout and prices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatLayout {
    /// Showtime the snapshot belongs to
    pub showtime_id: ShowtimeId,
    /// Room name
    pub room: String,
    /// Ticket price before seat-type offsets
    pub base_price: Money,
    /// Seats of the room, in display order
    pub seats: Vec<Seat>,
    /// Seat types referenced by `seats`
    pub seat_types: Vec<SeatType>,
}

impl SeatLayout {
    /// Look up a seat by label
    #[must_use]
    pub fn seat(&self, seat_id: &SeatId) -> Option<&Seat> {
        self.seats.iter().find(|seat| &seat.seat_id == seat_id)
    }

    /// Look up a seat type by code
    #[must_use]
    pub fn seat_type(&self, code: &str) -> Option<&SeatType> {
        self.seat_types.iter().find(|seat_type| seat_type.code == code)
    }

    /// Price offset that applies to a seat. A seat without a type, or whose
    /// type is missing from the snapshot, has none.
    #[must_use]
    pub fn price_offset(&self, seat: &Seat) -> Option<Money> {
        seat.seat_type
            .as_deref()
            .and_then(|code| self.seat_type(code))
            .map(|seat_type| seat_type.price_offset)
    }
}

// ============================================================================
// Holds and sessions
// ============================================================================

/// Authoritative state of one seat for one showtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SeatState {
    /// Nobody holds the seat
    Free,
    /// Temporarily claimed
    Held {
        /// Who holds it
        holder: UserId,
        /// When the hold lapses
        expires_at: DateTime<Utc>,
    },
    /// Converted into a ticket
    Sold,
}

/// A time-bounded claim on one seat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    /// Showtime
    pub showtime_id: ShowtimeId,
    /// Seat
    pub seat_id: SeatId,
    /// User owning the hold
    pub holder: UserId,
    /// Session the hold belongs to
    pub session_id: SessionId,
    /// When the seat was first claimed
    pub created_at: DateTime<Utc>,
    /// Shared expiry of the owning session
    pub expires_at: DateTime<Utc>,
}

impl Hold {
    /// A hold is expired at and after its deadline
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Quantity of one combo item attached to a booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComboLine {
    /// Combo item
    pub combo_id: ComboId,
    /// How many
    pub quantity: u32,
}

/// A user's active claim on a set of seats for one showtime.
///
/// There is at most one per (user, showtime). All seats share `expires_at`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSession {
    /// Identity of this exact seat set
    pub session_id: SessionId,
    /// Owner
    pub user_id: UserId,
    /// Showtime
    pub showtime_id: ShowtimeId,
    /// Held seats
    pub seats: BTreeSet<SeatId>,
    /// Attached food and drink selection
    pub combos: Vec<ComboLine>,
    /// When the first seat of the session was claimed
    pub created_at: DateTime<Utc>,
    /// Shared expiry of every seat in the session
    pub expires_at: DateTime<Utc>,
}

impl ReservationSession {
    /// Whether the session is still valid at `now`
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Time left before expiry, zero once expired
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// Held seats in label order
    #[must_use]
    pub fn seat_list(&self) -> Vec<SeatId> {
        self.seats.iter().cloned().collect()
    }
}

// ============================================================================
// Tickets
// ============================================================================

/// Immutable ticket for one seat of a confirmed order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier
    pub ticket_id: TicketId,
    /// Order that paid for the seat
    pub order_id: OrderId,
    /// Showtime
    pub showtime_id: ShowtimeId,
    /// Seat
    pub seat_id: SeatId,
    /// Owner
    pub user_id: UserId,
    /// Redeemable code, encoded into the QR image at the door
    pub code: String,
    /// When the ticket was issued
    pub issued_at: DateTime<Utc>,
}

impl Ticket {
    /// Issue a ticket for `seat_id`
    #[must_use]
    pub fn issue(
        order_id: OrderId,
        showtime_id: ShowtimeId,
        user_id: UserId,
        seat_id: SeatId,
        issued_at: DateTime<Utc>,
    ) -> Self {
        let code = format!("MRQ-{}-{}", order_id.as_uuid().simple(), seat_id).to_uppercase();
        Self {
            ticket_id: TicketId::new(),
            order_id,
            showtime_id,
            seat_id,
            user_id,
            code,
            issued_at,
        }
    }
}
