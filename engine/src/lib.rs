//! # Marquee Engine
//!
//! Seat-reservation and checkout concurrency engine for cinema bookings.
//!
//! ## Components
//!
//! - [`holds`]: authoritative seat holds per showtime (claim, modify, release,
//!   commit, expiry) expressed as a reducer behind a per-showtime lock
//! - [`bus`]: per-showtime broadcast of seat-state deltas
//! - [`pricing`]: one pure pricing function for previews and frozen orders
//! - [`orders`]: checkout snapshots and reconciliation of gateway callbacks
//! - [`payment_gateway`]: the gateway adapter seam and a mock implementation
//! - [`sweeper`]: background expiry of lapsed holds and overdue orders
//! - [`client`]: the booking wizard that mirrors server state
//! - [`catalog`]: read-only collaborators (seats, combos, promotions, loyalty)
//!
//! ## Data flow
//!
//! ```text
//! BookingController ──claim/modify──> HoldManager ──publish──> NotificationBus ──> viewers
//!        │                                 ^
//!        │ checkout                        │ commit / release
//!        v                                 │
//! OrderCoordinator ──create_payment──> PaymentGateway
//!        ^                                 │
//!        └────────── callback ─────────────┘
//! ```

pub mod bus;
pub mod catalog;
pub mod client;
pub mod holds;
pub mod metrics;
pub mod orders;
pub mod payment_gateway;
pub mod pricing;
pub mod sweeper;

pub use bus::{BusMessage, NotificationBus, SeatNotification};
pub use holds::{HoldError, HoldManager, HoldPolicy, ReleaseReason, SeatMap, SeatView};
pub use orders::{OrderCoordinator, OrderError, OrderStatus, PendingOrder};
pub use payment_gateway::{GatewayCallback, MockPaymentGateway, PaymentGateway};
pub use pricing::{PriceBreakdown, PricingEngine, PricingError};
pub use sweeper::{ExpirySweeper, SweepReport};
