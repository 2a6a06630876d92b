//! Per-showtime notification bus.
//!
//! Every hold transition is fanned out to all viewers of the showtime's seat
//! map, the originator included.
//!
//! # Architecture
//!
//! ```text
//! HoldManager                 NotificationBus                 Viewers
//!     │                             │                            │
//!     ├─ publish(showtime A) ──────>│── broadcast (topic A) ────>│ viewer 1
//!     │                             │                      └────>│ viewer 2
//!     │                             │                            │
//!     ├─ publish(showtime B) ──────>│── broadcast (topic B) ────>│ viewer 3
//! ```
//!
//! # Delivery
//!
//! At-least-once and unordered-safe: each message names the seats it changes
//! and their new state, and carries the showtime's sequence number. A viewer
//! that lags behind the channel, or sees a gap in the sequence, refetches the
//! seat map instead of trying to repair its mirror.
//!
//! # Message Protocol
//!
//! ```json
//! { "type": "seatBooked", "showtime_id": "…", "sequence": 7,
//!   "seat_ids": ["A1", "A2"], "user_id": "…", "expires_at": "…" }
//! { "type": "seatUnbooked", "showtime_id": "…", "sequence": 8, "seat_ids": ["A1"] }
//! { "type": "seatSold", "showtime_id": "…", "sequence": 9, "seat_ids": ["A2"] }
//! { "type": "reservationExpired", "showtime_id": "…", "sequence": 10, "user_id": "…" }
//! ```

use chrono::{DateTime, Utc};
use marquee_core::types::{SeatId, ShowtimeId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Default per-topic channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Seat-state delta for one showtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SeatNotification {
    /// Seats became held
    SeatBooked {
        /// Newly held seats
        seat_ids: Vec<SeatId>,
        /// Holder
        user_id: UserId,
        /// Expiry of the holder's session
        expires_at: DateTime<Utc>,
    },
    /// Seats became free
    SeatUnbooked {
        /// Released seats
        seat_ids: Vec<SeatId>,
    },
    /// Seats were sold
    SeatSold {
        /// Sold seats
        seat_ids: Vec<SeatId>,
    },
    /// A user's session lapsed; its seats are announced by a following `seatUnbooked`
    ReservationExpired {
        /// Owner of the lapsed session
        user_id: UserId,
    },
}

/// Envelope published on a showtime topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Topic
    pub showtime_id: ShowtimeId,
    /// Strictly increasing per showtime
    pub sequence: u64,
    /// Delta
    #[serde(flatten)]
    pub notification: SeatNotification,
}

type TopicsMap = Arc<RwLock<HashMap<ShowtimeId, broadcast::Sender<BusMessage>>>>;

/// Topic broadcaster keyed by showtime.
///
/// Topics are created on first publish or subscribe. Publishing never waits
/// on subscribers: a slow receiver gets [`broadcast::error::RecvError::Lagged`].
#[derive(Clone)]
pub struct NotificationBus {
    topics: TopicsMap,
    capacity: usize,
}

impl NotificationBus {
    /// Creates a bus with the given per-topic capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Publish a message to its showtime topic.
    ///
    /// Returns how many subscribers received it.
    pub async fn publish(&self, message: BusMessage) -> usize {
        let sender = self.sender(message.showtime_id).await;
        let showtime_id = message.showtime_id;
        let sequence = message.sequence;
        // No receivers is not an error; the seat map stays authoritative.
        let delivered = sender.send(message).unwrap_or(0);
        debug!(%showtime_id, sequence, delivered, "Published seat notification");
        delivered
    }

    /// Subscribe to a showtime.
    pub async fn subscribe(&self, showtime_id: ShowtimeId) -> broadcast::Receiver<BusMessage> {
        self.sender(showtime_id).await.subscribe()
    }

    /// Get count of active topics.
    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }

    /// Drop topics nobody listens to. Returns how many were removed.
    pub async fn prune_idle(&self) -> usize {
        let mut topics = self.topics.write().await;
        let before = topics.len();
        topics.retain(|_, sender| sender.receiver_count() > 0);
        before - topics.len()
    }

    async fn sender(&self, showtime_id: ShowtimeId) -> broadcast::Sender<BusMessage> {
        if let Some(sender) = self.topics.read().await.get(&showtime_id) {
            return sender.clone();
        }

        let mut topics = self.topics.write().await;
        topics
            .entry(showtime_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
