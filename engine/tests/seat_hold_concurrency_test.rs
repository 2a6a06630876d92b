//! Seat hold concurrency tests.
//!
//! Races on the same seats, conflict reporting, expiry and the ordering of
//! seat-state notifications.
//!
//! Run with: `cargo test --test seat_hold_concurrency_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use chrono::Duration;
use marquee_core::types::{SeatId, SeatState, UserId};
use marquee_engine::bus::SeatNotification;
use marquee_engine::holds::{HoldError, HoldPolicy};
use marquee_testing::{drain, init_tracing, seat_ids, Harness};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Twenty users race for the last seat; exactly one wins.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_seat_race_has_one_winner() {
    init_tracing();
    let h = Arc::new(Harness::new().await);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            h.holds
                .claim_seats(UserId::new(), h.showtime_id, seat_ids(&["C8"]))
                .await
        }));
    }

    let mut winners = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(HoldError::SeatConflict { seat_ids: taken }) => {
                assert_eq!(taken, seat_ids(&["C8"]));
                conflicts += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(conflicts, 19);
}

/// X holds A1,A2. Y asks for A2,A3 and is told exactly A2 is taken.
#[tokio::test]
async fn test_overlapping_claim_reports_every_conflict_and_changes_nothing() {
    let h = Harness::new().await;
    let (x, y) = (UserId::new(), UserId::new());

    h.holds
        .claim_seats(x, h.showtime_id, seat_ids(&["A1", "A2"]))
        .await
        .unwrap();

    let err = h
        .holds
        .claim_seats(y, h.showtime_id, seat_ids(&["A2", "A3"]))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        HoldError::SeatConflict {
            seat_ids: seat_ids(&["A2"])
        }
    );

    // A3 stayed free; Y has no partial hold
    assert!(h.holds.session(y, h.showtime_id).await.is_none());
    let map = h.holds.seat_map(h.showtime_id, Some(y)).await.unwrap();
    let a3 = map.seats.iter().find(|s| s.seat_id.as_str() == "A3").unwrap();
    assert_eq!(a3.state, SeatState::Free);

    let session = h
        .holds
        .claim_seats(y, h.showtime_id, seat_ids(&["A3"]))
        .await
        .unwrap();
    assert_eq!(session.seat_list(), seat_ids(&["A3"]));
}

/// After expiry another user may claim the seats, and viewers learn about
/// the expiry before the new hold.
#[tokio::test]
async fn test_expired_hold_is_announced_then_reclaimable() {
    let h = Harness::new().await;
    let (x, y) = (UserId::new(), UserId::new());
    let mut rx = h.bus.subscribe(h.showtime_id).await;

    h.holds
        .claim_seats(x, h.showtime_id, seat_ids(&["A1", "A2"]))
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(5) + Duration::seconds(1));

    h.holds
        .claim_seats(y, h.showtime_id, seat_ids(&["A1"]))
        .await
        .unwrap();

    let messages = drain(&mut rx);
    let notifications: Vec<_> = messages.iter().map(|m| m.notification.clone()).collect();
    assert_eq!(notifications.len(), 4);
    assert!(matches!(&notifications[0], SeatNotification::SeatBooked { user_id, .. } if *user_id == x));
    assert_eq!(notifications[1], SeatNotification::ReservationExpired { user_id: x });
    assert_eq!(
        notifications[2],
        SeatNotification::SeatUnbooked {
            seat_ids: seat_ids(&["A1", "A2"])
        }
    );
    assert!(matches!(
        &notifications[3],
        SeatNotification::SeatBooked { seat_ids: booked, user_id, .. }
            if *user_id == y && *booked == seat_ids(&["A1"])
    ));

    let sequences: Vec<u64> = messages.iter().map(|m| m.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[1] == w[0] + 1));
}

/// Holds run out at exactly `expires_at`, not a moment earlier.
#[tokio::test]
async fn test_hold_lives_until_its_expiry_instant() {
    let h = Harness::new().await;
    let user = UserId::new();
    let session = h
        .holds
        .claim_seats(user, h.showtime_id, seat_ids(&["B4"]))
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(5) - Duration::seconds(1));
    assert_eq!(h.holds.sweep_expired().await, 0);
    assert_eq!(
        h.holds.session(user, h.showtime_id).await.map(|s| s.session_id),
        Some(session.session_id)
    );

    h.clock.advance(Duration::seconds(1));
    assert_eq!(h.holds.sweep_expired().await, 1);
    assert!(h.holds.session(user, h.showtime_id).await.is_none());
}

/// A cart edit that conflicts leaves the whole cart as it was.
#[tokio::test]
async fn test_modify_is_all_or_nothing() {
    let h = Harness::new().await;
    let (x, y) = (UserId::new(), UserId::new());
    h.holds
        .claim_seats(x, h.showtime_id, seat_ids(&["A1", "A2"]))
        .await
        .unwrap();
    h.holds
        .claim_seats(y, h.showtime_id, seat_ids(&["A5"]))
        .await
        .unwrap();

    let err = h
        .holds
        .modify_seats(x, h.showtime_id, seat_ids(&["A5", "A6"]), seat_ids(&["A1"]))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        HoldError::SeatConflict {
            seat_ids: seat_ids(&["A5"])
        }
    );

    let session = h.holds.session(x, h.showtime_id).await.unwrap();
    assert_eq!(session.seat_list(), seat_ids(&["A1", "A2"]));
}

/// Seat limit applies to the resulting session, not to the request.
#[tokio::test]
async fn test_seat_limit_counts_the_whole_session() {
    let h = Harness::with_policy(HoldPolicy {
        hold_duration: Duration::minutes(5),
        max_seats_per_session: 3,
    })
    .await;
    let user = UserId::new();
    h.holds
        .claim_seats(user, h.showtime_id, seat_ids(&["A1", "A2"]))
        .await
        .unwrap();

    let err = h
        .holds
        .modify_seats(user, h.showtime_id, seat_ids(&["A3", "A4"]), Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, HoldError::TooManySeats { requested: 4, max: 3 }));
}

/// Seat maps stay consistent while holds are being churned.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_seat_map_never_shows_a_seat_twice_held() {
    let h = Arc::new(Harness::new().await);
    let users: Vec<UserId> = (0..6).map(|_| UserId::new()).collect();

    let mut handles = Vec::new();
    for (i, user) in users.iter().copied().enumerate() {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            for round in 0..10 {
                let seat = format!("B{}", (i + round) % 8 + 1);
                let _ = h
                    .holds
                    .claim_seats(user, h.showtime_id, seat_ids(&[seat.as_str()]))
                    .await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let map = h.holds.seat_map(h.showtime_id, None).await.unwrap();
    let mut holders: HashMap<UserId, usize> = HashMap::new();
    for seat in &map.seats {
        if let SeatState::Held { holder, .. } = seat.state {
            *holders.entry(holder).or_default() += 1;
        }
    }
    // Each claim replaces the previous one, so nobody holds more than one seat
    assert!(holders.values().all(|count| *count == 1));
}

fn seat_label() -> impl Strategy<Value = SeatId> {
    (0u8..2, 1u16..=4).prop_map(|(row, number)| {
        SeatId::parse(&format!("{}{number}", char::from(b'A' + row))).unwrap()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever sequence of claims runs, no seat ends up with two holders and
    /// every held seat appears in its holder's session.
    #[test]
    fn prop_holds_are_mutually_exclusive(
        claims in prop::collection::vec((0usize..4, prop::collection::vec(seat_label(), 1..4)), 1..24)
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let h = Harness::new().await;
            let users: Vec<UserId> = (0..4).map(|_| UserId::new()).collect();

            for (user, seats) in &claims {
                let _ = h.holds.claim_seats(users[*user], h.showtime_id, seats.clone()).await;
            }

            let map = h.holds.seat_map(h.showtime_id, None).await.unwrap();
            for seat in &map.seats {
                if let SeatState::Held { holder, .. } = seat.state {
                    let session = h.holds.session(holder, h.showtime_id).await.unwrap();
                    prop_assert!(session.seats.contains(&seat.seat_id));
                }
            }
            for user in &users {
                if let Some(session) = h.holds.session(*user, h.showtime_id).await {
                    for other in users.iter().filter(|other| *other != user) {
                        if let Some(theirs) = h.holds.session(*other, h.showtime_id).await {
                            prop_assert!(session.seats.is_disjoint(&theirs.seats));
                        }
                    }
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
