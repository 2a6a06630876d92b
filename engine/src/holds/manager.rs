//! Hold manager.
//!
//! Owns one [`ShowtimeHolds`] per showtime behind an async `RwLock`. Every
//! mutating call takes the showtime's write lock, expires lapsed sessions,
//! runs the reducer, applies the events and publishes their notifications
//! before releasing the lock. Per-showtime publish order is therefore the
//! order in which operations took effect; different showtimes never contend.
//!
//! ```text
//! claim / modify / release / commit
//!        │
//!        ▼
//!  load layout (catalog) ──> write lock(showtime)
//!                               ├─ ExpireDue       (lazy expiry)
//!                               ├─ reduce(command) (validate → events)
//!                               ├─ apply_event     (state)
//!                               └─ publish         (bus, with sequence)
//! ```

use super::reducer::{
    HoldCommand, HoldContext, HoldEvent, HoldEvents, HoldPolicy, HoldReducer, ReleaseReason,
    ShowtimeHolds,
};
use super::HoldError;
use crate::bus::{BusMessage, NotificationBus};
use crate::catalog::SeatCatalog;
use crate::metrics;
use chrono::{DateTime, Utc};
use marquee_core::environment::Clock;
use marquee_core::types::{
    ComboLine, Money, ReservationSession, SeatId, SeatLayout, SeatState, SessionId, ShowtimeId,
    UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

type ShowtimeMap = RwLock<HashMap<ShowtimeId, Arc<RwLock<ShowtimeHolds>>>>;

/// One seat of a seat map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatView {
    /// Seat
    pub seat_id: SeatId,
    /// Row
    pub row: String,
    /// Position in the row
    pub number: u16,
    /// Seat type code
    pub seat_type: Option<String>,
    /// Base price plus seat-type offset
    pub price: Money,
    /// Whether the seat can be held at all
    pub enabled: bool,
    /// Current state
    #[serde(flatten)]
    pub state: SeatState,
    /// Held by the viewer
    pub mine: bool,
}

/// Consistent snapshot of a showtime's seats.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatMap {
    /// Showtime
    pub showtime_id: ShowtimeId,
    /// Room
    pub room: String,
    /// Base ticket price
    pub base_price: Money,
    /// Sequence of the last notification reflected in this snapshot
    pub sequence: u64,
    /// When the snapshot was taken
    pub generated_at: DateTime<Utc>,
    /// Seats in layout order
    pub seats: Vec<SeatView>,
}

/// Authoritative seat hold manager.
pub struct HoldManager {
    showtimes: ShowtimeMap,
    catalog: Arc<dyn SeatCatalog>,
    bus: NotificationBus,
    clock: Arc<dyn Clock>,
    policy: HoldPolicy,
}

impl HoldManager {
    /// Creates a hold manager
    #[must_use]
    pub fn new(
        catalog: Arc<dyn SeatCatalog>,
        bus: NotificationBus,
        clock: Arc<dyn Clock>,
        policy: HoldPolicy,
    ) -> Self {
        Self {
            showtimes: RwLock::new(HashMap::new()),
            catalog,
            bus,
            clock,
            policy,
        }
    }

    /// Bus the manager publishes to
    #[must_use]
    pub const fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    /// Policy in force
    #[must_use]
    pub const fn policy(&self) -> HoldPolicy {
        self.policy
    }

    /// Claim exactly `seat_ids` for `user_id`, replacing any existing session.
    ///
    /// All seats are stamped with one expiry `now + hold_duration`.
    ///
    /// # Errors
    ///
    /// [`HoldError::SeatConflict`] listing every seat held by another user or
    /// sold; validation errors for empty, unknown, disabled or oversized
    /// selections. Nothing changes on error.
    pub async fn claim_seats(
        &self,
        user_id: UserId,
        showtime_id: ShowtimeId,
        seat_ids: Vec<SeatId>,
    ) -> Result<ReservationSession, HoldError> {
        let command = HoldCommand::Claim { user_id, seat_ids };
        self.execute(showtime_id, command, |state, _| {
            state.session(&user_id).cloned().ok_or(HoldError::SessionExpired)
        })
        .await
    }

    /// Add and remove seats on the user's live session.
    ///
    /// Returns the new session, or `None` when every seat was removed.
    ///
    /// # Errors
    ///
    /// [`HoldError::SessionExpired`] without a live session;
    /// [`HoldError::SeatConflict`] if any added seat is taken. Additions are
    /// all or nothing, removals always succeed: on a rejected addition the
    /// removed seats are still freed and the expiry is left unchanged.
    pub async fn modify_seats(
        &self,
        user_id: UserId,
        showtime_id: ShowtimeId,
        add: Vec<SeatId>,
        remove: Vec<SeatId>,
    ) -> Result<Option<ReservationSession>, HoldError> {
        let command = HoldCommand::Modify {
            user_id,
            add,
            remove,
        };
        self.execute(showtime_id, command, |state, _| {
            Ok(state.session(&user_id).cloned())
        })
        .await
    }

    /// Attach a combo selection to the user's live session.
    ///
    /// # Errors
    ///
    /// [`HoldError::SessionExpired`] without a live session.
    pub async fn select_combos(
        &self,
        user_id: UserId,
        showtime_id: ShowtimeId,
        combos: Vec<ComboLine>,
    ) -> Result<ReservationSession, HoldError> {
        let command = HoldCommand::SelectCombos { user_id, combos };
        self.execute(showtime_id, command, |state, _| {
            state.session(&user_id).cloned().ok_or(HoldError::SessionExpired)
        })
        .await
    }

    /// Release the user's session. Releasing nothing is not an error.
    ///
    /// Returns the released seats.
    ///
    /// # Errors
    ///
    /// Only catalog failures; see [`HoldError::Catalog`].
    pub async fn release_session(
        &self,
        user_id: UserId,
        showtime_id: ShowtimeId,
    ) -> Result<Vec<SeatId>, HoldError> {
        self.release(user_id, showtime_id, None, ReleaseReason::Cancelled)
            .await
    }

    /// Release the user's session only if it is still `session_id`.
    ///
    /// # Errors
    ///
    /// Only catalog failures; see [`HoldError::Catalog`].
    pub async fn release_session_if_current(
        &self,
        user_id: UserId,
        showtime_id: ShowtimeId,
        session_id: SessionId,
        reason: ReleaseReason,
    ) -> Result<Vec<SeatId>, HoldError> {
        self.release(user_id, showtime_id, Some(session_id), reason)
            .await
    }

    async fn release(
        &self,
        user_id: UserId,
        showtime_id: ShowtimeId,
        session_id: Option<SessionId>,
        reason: ReleaseReason,
    ) -> Result<Vec<SeatId>, HoldError> {
        if !self.is_known(showtime_id).await {
            return Ok(Vec::new());
        }
        let command = HoldCommand::Release {
            user_id,
            session_id,
            reason,
        };
        self.execute(showtime_id, command, |_, events| {
            Ok(events
                .iter()
                .flat_map(|event| match event {
                    HoldEvent::SeatsReleased { seats, .. } => seats.clone(),
                    _ => Vec::new(),
                })
                .collect())
        })
        .await
    }

    /// Convert the session's holds into sales.
    ///
    /// Idempotent: committing an already committed `session_id` returns the
    /// same seats without touching anything.
    ///
    /// # Errors
    ///
    /// [`HoldError::SessionExpired`] if the session lapsed or never existed;
    /// [`HoldError::SessionSuperseded`] if the user's live session is a newer one.
    pub async fn commit_session(
        &self,
        user_id: UserId,
        showtime_id: ShowtimeId,
        session_id: SessionId,
    ) -> Result<Vec<SeatId>, HoldError> {
        if !self.is_known(showtime_id).await {
            return Err(HoldError::SessionExpired);
        }
        let command = HoldCommand::Commit {
            user_id,
            session_id,
        };
        self.execute(showtime_id, command, |state, _| {
            state
                .committed(&session_id)
                .map(|committed| committed.seats.clone())
                .ok_or(HoldError::SessionExpired)
        })
        .await
    }

    /// Live session of a user, if any.
    pub async fn session(
        &self,
        user_id: UserId,
        showtime_id: ShowtimeId,
    ) -> Option<ReservationSession> {
        let entry = self.existing(showtime_id).await?;
        let state = entry.read().await;
        state.live_session(&user_id, self.clock.now()).cloned()
    }

    /// Consistent seat map of a showtime.
    ///
    /// Lapsed holds that the sweep has not reached yet are reported as free.
    ///
    /// # Errors
    ///
    /// [`HoldError::UnknownShowtime`] if the catalog has no such showtime.
    pub async fn seat_map(
        &self,
        showtime_id: ShowtimeId,
        viewer: Option<UserId>,
    ) -> Result<SeatMap, HoldError> {
        let layout = self.load_layout(showtime_id).await?;
        let entry = self.entry(showtime_id).await;
        let state = entry.read().await;
        let now = self.clock.now();

        let seats = layout
            .seats
            .iter()
            .map(|seat| {
                let state_now = state.seat_state(&seat.seat_id, now);
                let mine = matches!(
                    (&state_now, viewer),
                    (SeatState::Held { holder, .. }, Some(viewer)) if *holder == viewer
                );
                SeatView {
                    seat_id: seat.seat_id.clone(),
                    row: seat.row.clone(),
                    number: seat.number,
                    seat_type: seat.seat_type.clone(),
                    price: layout
                        .price_offset(seat)
                        .and_then(|offset| layout.base_price.checked_add(offset))
                        .unwrap_or(layout.base_price),
                    enabled: seat.enabled,
                    state: state_now,
                    mine,
                }
            })
            .collect();

        Ok(SeatMap {
            showtime_id,
            room: layout.room.clone(),
            base_price: layout.base_price,
            sequence: state.sequence(),
            generated_at: now,
            seats,
        })
    }

    /// Expire lapsed sessions on every showtime.
    ///
    /// Returns how many sessions were released.
    pub async fn sweep_expired(&self) -> usize {
        let entries: Vec<Arc<RwLock<ShowtimeHolds>>> =
            self.showtimes.read().await.values().cloned().collect();

        let mut released = 0;
        for entry in entries {
            let mut state = entry.write().await;
            released += self.expire_locked(&mut state, self.clock.now()).await;
        }

        if released > 0 {
            info!(sessions = released, "Expired lapsed reservation sessions");
        }
        released
    }

    /// Showtimes with hold state
    pub async fn showtimes(&self) -> Vec<ShowtimeId> {
        self.showtimes.read().await.keys().copied().collect()
    }

    async fn execute<T, F>(
        &self,
        showtime_id: ShowtimeId,
        command: HoldCommand,
        reply: F,
    ) -> Result<T, HoldError>
    where
        F: FnOnce(&ShowtimeHolds, &[HoldEvent]) -> Result<T, HoldError>,
    {
        let layout = if command.needs_layout() {
            Some(self.load_layout(showtime_id).await?)
        } else {
            None
        };

        let entry = self.entry(showtime_id).await;
        let mut state = entry.write().await;
        if let Some(layout) = layout {
            state.set_layout(layout);
        }

        let ctx = HoldContext {
            now: self.clock.now(),
            policy: self.policy,
        };
        self.expire_locked(&mut state, ctx.now).await;

        let reduction = HoldReducer::reduce_partial(&state, &command, &ctx);
        self.apply_and_publish(&mut state, &reduction.events).await;

        if let Some(error) = reduction.rejected {
            if matches!(command, HoldCommand::Claim { .. } | HoldCommand::Modify { .. }) {
                metrics::record_hold_rejected(error.code().as_str());
            }
            debug!(
                %showtime_id,
                ?command,
                %error,
                applied = reduction.events.len(),
                "Hold command rejected"
            );
            return Err(error);
        }

        reply(&state, &reduction.events)
    }

    async fn expire_locked(&self, state: &mut ShowtimeHolds, now: DateTime<Utc>) -> usize {
        let events = HoldReducer::expire_due(state, now);
        let count = events.len();
        self.apply_and_publish(state, &events).await;
        count
    }

    async fn apply_and_publish(&self, state: &mut ShowtimeHolds, events: &HoldEvents) {
        for event in events {
            HoldReducer::apply_event(state, event);
            Self::record(state.showtime_id(), event);

            for notification in event.notifications() {
                let message = BusMessage {
                    showtime_id: state.showtime_id(),
                    sequence: state.next_sequence(),
                    notification,
                };
                self.bus.publish(message).await;
            }
        }
    }

    fn record(showtime_id: ShowtimeId, event: &HoldEvent) {
        match event {
            HoldEvent::SessionUpdated { session, added, .. } => {
                metrics::record_seats_held(added.len());
                debug!(
                    %showtime_id,
                    user_id = %session.user_id,
                    session_id = %session.session_id,
                    seats = session.seats.len(),
                    expires_at = %session.expires_at,
                    "Seats held"
                );
            }
            HoldEvent::SeatsReleased {
                user_id,
                seats,
                reason,
                ..
            } => {
                metrics::record_seats_released(seats.len(), reason.as_str());
                debug!(%showtime_id, %user_id, seats = seats.len(), reason = reason.as_str(), "Seats released");
            }
            HoldEvent::SeatsSold {
                user_id,
                session_id,
                seats,
                ..
            } => {
                metrics::record_seats_sold(seats.len());
                info!(%showtime_id, %user_id, %session_id, seats = seats.len(), "Seats sold");
            }
            HoldEvent::SessionExpired {
                user_id,
                session_id,
                seats,
            } => {
                metrics::record_session_expired(seats.len());
                info!(%showtime_id, %user_id, %session_id, seats = seats.len(), "Reservation session expired");
            }
            HoldEvent::CombosSelected { .. } => {}
        }
    }

    async fn load_layout(&self, showtime_id: ShowtimeId) -> Result<SeatLayout, HoldError> {
        self.catalog
            .seat_layout(showtime_id)
            .await?
            .ok_or(HoldError::UnknownShowtime(showtime_id))
    }

    async fn is_known(&self, showtime_id: ShowtimeId) -> bool {
        self.showtimes.read().await.contains_key(&showtime_id)
    }

    async fn existing(&self, showtime_id: ShowtimeId) -> Option<Arc<RwLock<ShowtimeHolds>>> {
        self.showtimes.read().await.get(&showtime_id).cloned()
    }

    async fn entry(&self, showtime_id: ShowtimeId) -> Arc<RwLock<ShowtimeHolds>> {
        if let Some(entry) = self.existing(showtime_id).await {
            return entry;
        }
        let mut showtimes = self.showtimes.write().await;
        Arc::clone(
            showtimes
                .entry(showtime_id)
                .or_insert_with(|| Arc::new(RwLock::new(ShowtimeHolds::new(showtime_id)))),
        )
    }
}
