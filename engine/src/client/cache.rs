//! Resume-after-reload cache of the client's booking state.
//!
//! The cache is advisory: whatever it holds is revalidated against the
//! server's session before it is shown again.

use super::controller::WizardStep;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::types::{ComboLine, OrderId, SeatId, SessionId, ShowtimeId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::RwLock;

/// Cache failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Storage could not be read or written
    #[error("cache io error: {0}")]
    Io(String),
    /// Stored entry is not a valid booking
    #[error("cache decode error: {0}")]
    Decode(String),
}

impl From<std::io::Error> for CacheError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

/// Everything needed to resume a booking after a reload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedBooking {
    /// Showtime, the cache key
    pub showtime_id: ShowtimeId,
    /// Booking user
    pub user_id: UserId,
    /// Last known session
    pub session_id: Option<SessionId>,
    /// Selected seats
    pub seat_ids: Vec<SeatId>,
    /// Last known session expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Combo selection
    #[serde(default)]
    pub combos: Vec<ComboLine>,
    /// Promotion code typed so far
    #[serde(default)]
    pub promotion_code: Option<String>,
    /// Points the user wants to redeem
    #[serde(default)]
    pub loyalty_points: u64,
    /// Wizard step
    pub step: WizardStep,
    /// Order awaiting its outcome
    #[serde(default)]
    pub order_id: Option<OrderId>,
    /// When the entry was written
    pub saved_at: DateTime<Utc>,
}

/// Storage of [`PersistedBooking`]s keyed by showtime.
#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Stored booking for a showtime.
    ///
    /// # Errors
    ///
    /// Storage or decode failures.
    async fn load(&self, showtime_id: ShowtimeId) -> Result<Option<PersistedBooking>, CacheError>;

    /// Store a booking, replacing the previous one of its showtime.
    ///
    /// # Errors
    ///
    /// Storage failures.
    async fn save(&self, booking: &PersistedBooking) -> Result<(), CacheError>;

    /// Forget a showtime.
    ///
    /// # Errors
    ///
    /// Storage failures.
    async fn clear(&self, showtime_id: ShowtimeId) -> Result<(), CacheError>;
}

/// Cache kept in memory.
#[derive(Debug, Default)]
pub struct InMemorySessionCache {
    entries: RwLock<HashMap<ShowtimeId, PersistedBooking>>,
}

impl InMemorySessionCache {
    /// Creates an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionCache for InMemorySessionCache {
    async fn load(&self, showtime_id: ShowtimeId) -> Result<Option<PersistedBooking>, CacheError> {
        Ok(self.entries.read().await.get(&showtime_id).cloned())
    }

    async fn save(&self, booking: &PersistedBooking) -> Result<(), CacheError> {
        self.entries
            .write()
            .await
            .insert(booking.showtime_id, booking.clone());
        Ok(())
    }

    async fn clear(&self, showtime_id: ShowtimeId) -> Result<(), CacheError> {
        self.entries.write().await.remove(&showtime_id);
        Ok(())
    }
}

/// Cache with one JSON file per showtime under a directory.
#[derive(Clone, Debug)]
pub struct JsonFileSessionCache {
    dir: PathBuf,
}

impl JsonFileSessionCache {
    /// Creates a cache writing under `dir`; the directory is created on first save
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, showtime_id: ShowtimeId) -> PathBuf {
        self.dir.join(format!("booking-{showtime_id}.json"))
    }
}

#[async_trait]
impl SessionCache for JsonFileSessionCache {
    async fn load(&self, showtime_id: ShowtimeId) -> Result<Option<PersistedBooking>, CacheError> {
        match tokio::fs::read(self.path(showtime_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, booking: &PersistedBooking) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec_pretty(booking)?;
        let path = self.path(booking.showtime_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn clear(&self, showtime_id: ShowtimeId) -> Result<(), CacheError> {
        match tokio::fs::remove_file(self.path(showtime_id)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
