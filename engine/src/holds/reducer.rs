//! Hold state machine for one showtime.
//!
//! Each seat moves `FREE → HELD → {SOLD | FREE}`. A held seat can only be
//! re-claimed by its own holder; sold seats never change again.
//!
//! The reducer is pure: [`HoldReducer::reduce`] validates a command against
//! the current [`ShowtimeHolds`] and produces events, and
//! [`HoldReducer::apply_event`] is the only code that mutates the state. The
//! [`HoldManager`](super::HoldManager) serializes commands per showtime and
//! publishes the notifications each event produces.

use super::HoldError;
use crate::bus::SeatNotification;
use chrono::{DateTime, Duration, Utc};
use marquee_core::types::{
    ComboLine, Hold, ReservationSession, SeatId, SeatLayout, SeatState, SessionId, ShowtimeId,
    UserId,
};
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::collections::{BTreeSet, HashMap};

/// Events produced by one command.
pub type HoldEvents = SmallVec<[HoldEvent; 4]>;

/// Outcome of a command that may take effect only in part.
///
/// A modify whose additions are rejected still drops the seats it was asked
/// to remove: `events` then holds the removal and `rejected` the reason the
/// additions failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reduction {
    /// Events to apply
    pub events: HoldEvents,
    /// Why the command, or its additions, were refused
    pub rejected: Option<HoldError>,
}

impl Reduction {
    /// Turn into a plain result, dropping events that accompany a rejection
    ///
    /// # Errors
    ///
    /// The rejection, if any.
    pub fn into_result(self) -> Result<HoldEvents, HoldError> {
        match self.rejected {
            Some(error) => Err(error),
            None => Ok(self.events),
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Limits applied to every session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HoldPolicy {
    /// How long a claim lasts; every successful claim or add restarts it
    pub hold_duration: Duration,
    /// Largest seat set a session may hold
    pub max_seats_per_session: usize,
}

impl Default for HoldPolicy {
    fn default() -> Self {
        Self {
            hold_duration: Duration::minutes(5),
            max_seats_per_session: 8,
        }
    }
}

/// Time and policy a command is evaluated under.
#[derive(Clone, Copy, Debug)]
pub struct HoldContext {
    /// Current time
    pub now: DateTime<Utc>,
    /// Limits
    pub policy: HoldPolicy,
}

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Why seats went back to free.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// The user gave the seats up
    Cancelled,
    /// The user's new selection no longer includes them
    Replaced,
    /// The gateway reported a failed payment
    PaymentFailed,
    /// The order passed its deadline without a callback
    OrderExpired,
}

impl ReleaseReason {
    /// Metric label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Replaced => "replaced",
            Self::PaymentFailed => "payment_failed",
            Self::OrderExpired => "order_expired",
        }
    }
}

/// Commands accepted by the hold reducer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HoldCommand {
    /// Claim exactly this seat set, replacing the user's current session
    Claim {
        /// Claimant
        user_id: UserId,
        /// Seats wanted
        seat_ids: Vec<SeatId>,
    },
    /// Change the seats of the user's live session
    Modify {
        /// Session owner
        user_id: UserId,
        /// Seats to add, all or nothing
        add: Vec<SeatId>,
        /// Seats to drop, always succeeds
        remove: Vec<SeatId>,
    },
    /// Attach a food and drink selection to the live session
    SelectCombos {
        /// Session owner
        user_id: UserId,
        /// New selection
        combos: Vec<ComboLine>,
    },
    /// Free every seat of the user's session
    Release {
        /// Session owner
        user_id: UserId,
        /// Only release if the live session still has this id
        session_id: Option<SessionId>,
        /// Why
        reason: ReleaseReason,
    },
    /// Convert a session's holds into sales
    Commit {
        /// Session owner
        user_id: UserId,
        /// Session the order was created for
        session_id: SessionId,
    },
    /// Expire every session whose deadline has passed
    ExpireDue,
}

impl HoldCommand {
    /// Whether the command validates seats against the catalog layout
    #[must_use]
    pub fn needs_layout(&self) -> bool {
        match self {
            Self::Claim { .. } => true,
            Self::Modify { add, .. } => !add.is_empty(),
            _ => false,
        }
    }
}

/// Facts recorded by the hold reducer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HoldEvent {
    /// A session was created or replaced with a new seat set or expiry
    SessionUpdated {
        /// The session as it now stands
        session: ReservationSession,
        /// Session it replaces
        previous: Option<SessionId>,
        /// Seats that were free before this event
        added: Vec<SeatId>,
        /// Expiry moved for every seat of the session
        extended: bool,
        /// When the change happened
        held_at: DateTime<Utc>,
    },
    /// Seats went back to free
    SeatsReleased {
        /// Session owner
        user_id: UserId,
        /// Session the seats belonged to
        session_id: SessionId,
        /// Released seats
        seats: Vec<SeatId>,
        /// Why
        reason: ReleaseReason,
    },
    /// Combo selection changed
    CombosSelected {
        /// Session owner
        user_id: UserId,
        /// Session
        session_id: SessionId,
        /// New selection
        combos: Vec<ComboLine>,
    },
    /// A session was committed
    SeatsSold {
        /// Buyer
        user_id: UserId,
        /// Committed session
        session_id: SessionId,
        /// Seats now sold
        seats: Vec<SeatId>,
        /// When
        sold_at: DateTime<Utc>,
    },
    /// A session reached its deadline
    SessionExpired {
        /// Session owner
        user_id: UserId,
        /// Expired session
        session_id: SessionId,
        /// Seats now free
        seats: Vec<SeatId>,
    },
}

impl HoldEvent {
    /// Notifications viewers of the showtime must receive for this event
    #[must_use]
    pub fn notifications(&self) -> SmallVec<[SeatNotification; 2]> {
        match self {
            // Kept seats share the new expiry, so the whole session is announced
            Self::SessionUpdated {
                session,
                extended: true,
                ..
            } => {
                smallvec![SeatNotification::SeatBooked {
                    seat_ids: session.seat_list(),
                    user_id: session.user_id,
                    expires_at: session.expires_at,
                }]
            }
            Self::SeatsReleased { seats, .. } if !seats.is_empty() => {
                smallvec![SeatNotification::SeatUnbooked {
                    seat_ids: seats.clone(),
                }]
            }
            Self::SeatsSold { seats, .. } => smallvec![SeatNotification::SeatSold {
                seat_ids: seats.clone(),
            }],
            Self::SessionExpired { user_id, seats, .. } => smallvec![
                SeatNotification::ReservationExpired { user_id: *user_id },
                SeatNotification::SeatUnbooked {
                    seat_ids: seats.clone(),
                },
            ],
            _ => SmallVec::new(),
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// Seats of a session that was committed, kept to answer repeated commits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedSession {
    /// Buyer
    pub user_id: UserId,
    /// Sold seats
    pub seats: Vec<SeatId>,
    /// When
    pub committed_at: DateTime<Utc>,
}

/// Authoritative hold table of one showtime.
#[derive(Clone, Debug)]
pub struct ShowtimeHolds {
    showtime_id: ShowtimeId,
    layout: Option<SeatLayout>,
    holds: HashMap<SeatId, Hold>,
    sold: HashMap<SeatId, UserId>,
    sessions: HashMap<UserId, ReservationSession>,
    committed: HashMap<SessionId, CommittedSession>,
    sequence: u64,
}

impl ShowtimeHolds {
    /// Empty state for a showtime
    #[must_use]
    pub fn new(showtime_id: ShowtimeId) -> Self {
        Self {
            showtime_id,
            layout: None,
            holds: HashMap::new(),
            sold: HashMap::new(),
            sessions: HashMap::new(),
            committed: HashMap::new(),
            sequence: 0,
        }
    }

    /// Showtime this state belongs to
    #[must_use]
    pub const fn showtime_id(&self) -> ShowtimeId {
        self.showtime_id
    }

    /// Last layout snapshot loaded from the catalog
    #[must_use]
    pub const fn layout(&self) -> Option<&SeatLayout> {
        self.layout.as_ref()
    }

    /// Replace the layout snapshot
    pub fn set_layout(&mut self, layout: SeatLayout) {
        self.layout = Some(layout);
    }

    /// Hold on a seat, if any
    #[must_use]
    pub fn hold(&self, seat_id: &SeatId) -> Option<&Hold> {
        self.holds.get(seat_id)
    }

    /// Number of held seats
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.holds.len()
    }

    /// Whether a seat is sold
    #[must_use]
    pub fn is_sold(&self, seat_id: &SeatId) -> bool {
        self.sold.contains_key(seat_id)
    }

    /// A user's session, live or not
    #[must_use]
    pub fn session(&self, user_id: &UserId) -> Option<&ReservationSession> {
        self.sessions.get(user_id)
    }

    /// A user's session if it has not expired at `now`
    #[must_use]
    pub fn live_session(&self, user_id: &UserId, now: DateTime<Utc>) -> Option<&ReservationSession> {
        self.sessions
            .get(user_id)
            .filter(|session| session.is_live(now))
    }

    /// Record of a committed session
    #[must_use]
    pub fn committed(&self, session_id: &SessionId) -> Option<&CommittedSession> {
        self.committed.get(session_id)
    }

    /// Sequence number of the last published notification
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Allocate the next notification sequence number
    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// State of a seat as viewers should see it at `now`
    #[must_use]
    pub fn seat_state(&self, seat_id: &SeatId, now: DateTime<Utc>) -> SeatState {
        if self.is_sold(seat_id) {
            return SeatState::Sold;
        }
        match self.holds.get(seat_id) {
            Some(hold) if !hold.is_expired(now) => SeatState::Held {
                holder: hold.holder,
                expires_at: hold.expires_at,
            },
            _ => SeatState::Free,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the per-showtime hold table
#[derive(Clone, Copy, Debug, Default)]
pub struct HoldReducer;

impl HoldReducer {
    /// Validate a command and produce its events without touching the state.
    ///
    /// An empty event list means the command was an accepted no-op (a repeated
    /// commit, a release with nothing to release).
    ///
    /// # Errors
    ///
    /// Returns the [`HoldError`] describing why the command was rejected. A
    /// rejected command never produces events.
    pub fn reduce(
        state: &ShowtimeHolds,
        command: &HoldCommand,
        ctx: &HoldContext,
    ) -> Result<HoldEvents, HoldError> {
        match command {
            HoldCommand::Claim { user_id, seat_ids } => {
                Self::reduce_claim(state, *user_id, seat_ids, ctx)
            }
            HoldCommand::Modify { user_id, add, remove } => {
                Self::reduce_modify(state, *user_id, add, remove, ctx)
            }
            HoldCommand::SelectCombos { user_id, combos } => {
                let session = state
                    .live_session(user_id, ctx.now)
                    .ok_or(HoldError::SessionExpired)?;
                Ok(smallvec![HoldEvent::CombosSelected {
                    user_id: *user_id,
                    session_id: session.session_id,
                    combos: combos.iter().filter(|line| line.quantity > 0).cloned().collect(),
                }])
            }
            HoldCommand::Release {
                user_id,
                session_id,
                reason,
            } => Ok(Self::reduce_release(state, *user_id, *session_id, *reason)),
            HoldCommand::Commit {
                user_id,
                session_id,
            } => Self::reduce_commit(state, *user_id, *session_id, ctx),
            HoldCommand::ExpireDue => Ok(Self::expire_due(state, ctx.now)),
        }
    }

    /// Like [`HoldReducer::reduce`], but keeps the part of a modify that
    /// cannot fail.
    ///
    /// Removals always succeed; additions are all or nothing. When the
    /// additions of a modify are refused, the removals are still returned as
    /// events, with the session's expiry left as it was.
    #[must_use]
    pub fn reduce_partial(
        state: &ShowtimeHolds,
        command: &HoldCommand,
        ctx: &HoldContext,
    ) -> Reduction {
        let error = match Self::reduce(state, command, ctx) {
            Ok(events) => {
                return Reduction {
                    events,
                    rejected: None,
                };
            }
            Err(error) => error,
        };

        let events = match command {
            HoldCommand::Modify {
                user_id,
                add,
                remove,
            } if !add.is_empty() && !remove.is_empty() && error.rejects_additions() => {
                Self::reduce_modify(state, *user_id, &[], remove, ctx).unwrap_or_default()
            }
            _ => HoldEvents::new(),
        };

        Reduction {
            events,
            rejected: Some(error),
        }
    }

    /// Reduce then apply, returning the applied events.
    ///
    /// # Errors
    ///
    /// Same as [`HoldReducer::reduce`]. The state is untouched on error,
    /// except for the removals of a modify whose additions were refused.
    pub fn handle(
        state: &mut ShowtimeHolds,
        command: &HoldCommand,
        ctx: &HoldContext,
    ) -> Result<HoldEvents, HoldError> {
        let reduction = Self::reduce_partial(state, command, ctx);
        for event in &reduction.events {
            Self::apply_event(state, event);
        }
        reduction.into_result()
    }

    /// Sessions past their deadline, oldest first
    #[must_use]
    pub fn expire_due(state: &ShowtimeHolds, now: DateTime<Utc>) -> HoldEvents {
        let mut due: Vec<&ReservationSession> = state
            .sessions
            .values()
            .filter(|session| !session.is_live(now))
            .collect();
        due.sort_by_key(|session| (session.expires_at, session.user_id));

        due.into_iter()
            .map(|session| HoldEvent::SessionExpired {
                user_id: session.user_id,
                session_id: session.session_id,
                seats: session.seat_list(),
            })
            .collect()
    }

    fn reduce_claim(
        state: &ShowtimeHolds,
        user_id: UserId,
        seat_ids: &[SeatId],
        ctx: &HoldContext,
    ) -> Result<HoldEvents, HoldError> {
        let seats: BTreeSet<SeatId> = seat_ids.iter().cloned().collect();
        if seats.is_empty() {
            return Err(HoldError::EmptySelection);
        }

        Self::validate_against_layout(state, &seats)?;
        if seats.len() > ctx.policy.max_seats_per_session {
            return Err(HoldError::TooManySeats {
                requested: seats.len(),
                max: ctx.policy.max_seats_per_session,
            });
        }
        Self::validate_free(state, user_id, &seats, ctx.now)?;

        let existing = state.live_session(&user_id, ctx.now);
        let mut events = HoldEvents::new();

        if let Some(existing) = existing {
            let dropped: Vec<SeatId> = existing.seats.difference(&seats).cloned().collect();
            if !dropped.is_empty() {
                events.push(HoldEvent::SeatsReleased {
                    user_id,
                    session_id: existing.session_id,
                    seats: dropped,
                    reason: ReleaseReason::Replaced,
                });
            }
        }

        let added: Vec<SeatId> = match existing {
            Some(existing) => seats.difference(&existing.seats).cloned().collect(),
            None => seats.iter().cloned().collect(),
        };

        events.push(HoldEvent::SessionUpdated {
            session: ReservationSession {
                session_id: SessionId::new(),
                user_id,
                showtime_id: state.showtime_id,
                seats,
                combos: existing.map(|s| s.combos.clone()).unwrap_or_default(),
                created_at: existing.map_or(ctx.now, |s| s.created_at),
                expires_at: ctx.now + ctx.policy.hold_duration,
            },
            previous: existing.map(|s| s.session_id),
            added,
            extended: true,
            held_at: ctx.now,
        });

        Ok(events)
    }

    fn reduce_modify(
        state: &ShowtimeHolds,
        user_id: UserId,
        add: &[SeatId],
        remove: &[SeatId],
        ctx: &HoldContext,
    ) -> Result<HoldEvents, HoldError> {
        if add.is_empty() && remove.is_empty() {
            return Err(HoldError::EmptySelection);
        }

        let session = state
            .live_session(&user_id, ctx.now)
            .ok_or(HoldError::SessionExpired)?;

        let add: BTreeSet<SeatId> = add
            .iter()
            .filter(|seat| !session.seats.contains(*seat))
            .cloned()
            .collect();
        let remove: BTreeSet<SeatId> = remove
            .iter()
            .filter(|seat| session.seats.contains(*seat))
            .cloned()
            .collect();

        if add.is_empty() && remove.is_empty() {
            return Ok(HoldEvents::new());
        }

        if !add.is_empty() {
            Self::validate_against_layout(state, &add)?;
            Self::validate_free(state, user_id, &add, ctx.now)?;
        }

        let result: BTreeSet<SeatId> = session
            .seats
            .difference(&remove)
            .cloned()
            .chain(add.iter().cloned())
            .collect();

        if result.len() > ctx.policy.max_seats_per_session {
            return Err(HoldError::TooManySeats {
                requested: result.len(),
                max: ctx.policy.max_seats_per_session,
            });
        }

        let mut events = HoldEvents::new();
        if !remove.is_empty() {
            events.push(HoldEvent::SeatsReleased {
                user_id,
                session_id: session.session_id,
                seats: remove.into_iter().collect(),
                reason: if result.is_empty() {
                    ReleaseReason::Cancelled
                } else {
                    ReleaseReason::Replaced
                },
            });
        }

        if !result.is_empty() {
            let extended = !add.is_empty();
            let expires_at = if extended {
                ctx.now + ctx.policy.hold_duration
            } else {
                session.expires_at
            };
            events.push(HoldEvent::SessionUpdated {
                session: ReservationSession {
                    session_id: SessionId::new(),
                    user_id,
                    showtime_id: state.showtime_id,
                    seats: result,
                    combos: session.combos.clone(),
                    created_at: session.created_at,
                    expires_at,
                },
                previous: Some(session.session_id),
                added: add.into_iter().collect(),
                extended,
                held_at: ctx.now,
            });
        }

        Ok(events)
    }

    fn reduce_release(
        state: &ShowtimeHolds,
        user_id: UserId,
        session_id: Option<SessionId>,
        reason: ReleaseReason,
    ) -> HoldEvents {
        match state.sessions.get(&user_id) {
            Some(session) if session_id.is_none_or(|id| id == session.session_id) => {
                smallvec![HoldEvent::SeatsReleased {
                    user_id,
                    session_id: session.session_id,
                    seats: session.seat_list(),
                    reason,
                }]
            }
            _ => HoldEvents::new(),
        }
    }

    fn reduce_commit(
        state: &ShowtimeHolds,
        user_id: UserId,
        session_id: SessionId,
        ctx: &HoldContext,
    ) -> Result<HoldEvents, HoldError> {
        if let Some(committed) = state.committed.get(&session_id) {
            if committed.user_id != user_id {
                return Err(HoldError::SessionExpired);
            }
            return Ok(HoldEvents::new());
        }

        match state.sessions.get(&user_id) {
            Some(session) if session.session_id != session_id => {
                Err(HoldError::SessionSuperseded {
                    current: session.session_id,
                })
            }
            Some(session) if session.is_live(ctx.now) => Ok(smallvec![HoldEvent::SeatsSold {
                user_id,
                session_id,
                seats: session.seat_list(),
                sold_at: ctx.now,
            }]),
            _ => Err(HoldError::SessionExpired),
        }
    }

    /// Every requested seat must exist in the layout and be enabled
    fn validate_against_layout(
        state: &ShowtimeHolds,
        seats: &BTreeSet<SeatId>,
    ) -> Result<(), HoldError> {
        let layout = state
            .layout
            .as_ref()
            .ok_or(HoldError::UnknownShowtime(state.showtime_id))?;

        let mut unknown = Vec::new();
        let mut disabled = Vec::new();
        for seat_id in seats {
            match layout.seat(seat_id) {
                None => unknown.push(seat_id.clone()),
                Some(seat) if !seat.enabled => disabled.push(seat_id.clone()),
                Some(_) => {}
            }
        }

        if !unknown.is_empty() {
            return Err(HoldError::UnknownSeat { seat_ids: unknown });
        }
        if !disabled.is_empty() {
            return Err(HoldError::SeatUnavailable { seat_ids: disabled });
        }
        Ok(())
    }

    /// No requested seat may be sold or held by someone else
    fn validate_free(
        state: &ShowtimeHolds,
        user_id: UserId,
        seats: &BTreeSet<SeatId>,
        now: DateTime<Utc>,
    ) -> Result<(), HoldError> {
        let conflicts: Vec<SeatId> = seats
            .iter()
            .filter(|seat_id| match state.seat_state(seat_id, now) {
                SeatState::Free => false,
                SeatState::Held { holder, .. } => holder != user_id,
                SeatState::Sold => true,
            })
            .cloned()
            .collect();

        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(HoldError::SeatConflict { seat_ids: conflicts })
        }
    }

    /// Applies an event to state
    pub fn apply_event(state: &mut ShowtimeHolds, event: &HoldEvent) {
        match event {
            HoldEvent::SessionUpdated {
                session, held_at, ..
            } => {
                for seat_id in &session.seats {
                    let created_at = state
                        .holds
                        .get(seat_id)
                        .filter(|hold| hold.holder == session.user_id)
                        .map_or(*held_at, |hold| hold.created_at);
                    state.holds.insert(
                        seat_id.clone(),
                        Hold {
                            showtime_id: state.showtime_id,
                            seat_id: seat_id.clone(),
                            holder: session.user_id,
                            session_id: session.session_id,
                            created_at,
                            expires_at: session.expires_at,
                        },
                    );
                }
                state.sessions.insert(session.user_id, session.clone());
            }

            HoldEvent::SeatsReleased {
                user_id,
                session_id,
                seats,
                ..
            } => {
                Self::remove_holds(state, *session_id, seats);
                let emptied = match state.sessions.get_mut(user_id) {
                    Some(session) if session.session_id == *session_id => {
                        for seat_id in seats {
                            session.seats.remove(seat_id);
                        }
                        session.seats.is_empty()
                    }
                    _ => false,
                };
                if emptied {
                    state.sessions.remove(user_id);
                }
            }

            HoldEvent::CombosSelected {
                user_id,
                session_id,
                combos,
            } => {
                if let Some(session) = state.sessions.get_mut(user_id) {
                    if session.session_id == *session_id {
                        session.combos.clone_from(combos);
                    }
                }
            }

            HoldEvent::SeatsSold {
                user_id,
                session_id,
                seats,
                sold_at,
            } => {
                Self::remove_holds(state, *session_id, seats);
                for seat_id in seats {
                    state.sold.insert(seat_id.clone(), *user_id);
                }
                Self::remove_session(state, *user_id, *session_id);
                state.committed.insert(
                    *session_id,
                    CommittedSession {
                        user_id: *user_id,
                        seats: seats.clone(),
                        committed_at: *sold_at,
                    },
                );
            }

            HoldEvent::SessionExpired {
                user_id,
                session_id,
                seats,
            } => {
                Self::remove_holds(state, *session_id, seats);
                Self::remove_session(state, *user_id, *session_id);
            }
        }
    }

    fn remove_holds(state: &mut ShowtimeHolds, session_id: SessionId, seats: &[SeatId]) {
        for seat_id in seats {
            if state
                .holds
                .get(seat_id)
                .is_some_and(|hold| hold.session_id == session_id)
            {
                state.holds.remove(seat_id);
            }
        }
    }

    fn remove_session(state: &mut ShowtimeHolds, user_id: UserId, session_id: SessionId) {
        if state
            .sessions
            .get(&user_id)
            .is_some_and(|session| session.session_id == session_id)
        {
            state.sessions.remove(&user_id);
        }
    }
}
