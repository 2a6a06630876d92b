//! Booking wizard tests against the in-process backend.
//!
//! Run with: `cargo test --test booking_controller_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use chrono::Duration;
use marquee_core::environment::Clock;
use marquee_core::types::{ComboLine, SeatState, UserId};
use marquee_engine::bus::{BusMessage, SeatNotification};
use marquee_engine::client::{
    BookingController, ControllerError, ControllerNotice, Countdown, InMemorySessionCache,
    SessionCache, WizardStep,
};
use marquee_engine::orders::OrderStatus;
use marquee_testing::{callback, drain, seat_ids, Harness};
use std::sync::Arc;

fn controller(h: &Harness, user: UserId, cache: &Arc<InMemorySessionCache>) -> BookingController {
    let clock: Arc<dyn Clock> = Arc::new(h.clock.clone());
    BookingController::new(user, h.showtime_id, h.backend(), cache.clone(), clock)
}

fn seat(label: &str) -> marquee_core::types::SeatId {
    seat_ids(&[label]).remove(0)
}

#[tokio::test]
async fn test_full_booking_flow() {
    let h = Harness::new().await;
    let cache = Arc::new(InMemorySessionCache::new());
    let user = UserId::new();
    let mut wizard = controller(&h, user, &cache);

    wizard.load_seat_map().await.unwrap();
    wizard.toggle_seat(seat("A1")).await.unwrap();
    wizard.toggle_seat(seat("A2")).await.unwrap();
    wizard.toggle_seat(seat("A1")).await.unwrap();
    assert_eq!(wizard.selected_seats(), seat_ids(&["A2"]));

    assert_eq!(wizard.next_step().await.unwrap(), WizardStep::Food);
    wizard
        .select_combos(vec![ComboLine {
            combo_id: h.combo.combo_id,
            quantity: 1,
        }])
        .await
        .unwrap();
    assert_eq!(wizard.next_step().await.unwrap(), WizardStep::Payment);

    let quote = wizard.quote().await.unwrap();
    assert_eq!(quote.total.amount(), 150_000);

    let view = wizard.checkout().await.unwrap();
    assert_eq!(view.status, OrderStatus::AwaitingGateway);
    assert!(cache.load(h.showtime_id).await.unwrap().unwrap().order_id.is_some());

    // Going back is not allowed while the order is open
    assert!(matches!(
        wizard.back().await,
        Err(ControllerError::WrongStep {
            actual: WizardStep::Payment
        })
    ));

    h.coordinator
        .handle_gateway_callback(&callback(view.order_id, "0"))
        .await
        .unwrap();
    let done = wizard.poll_order().await.unwrap();

    assert_eq!(done.status, OrderStatus::Confirmed);
    assert_eq!(done.tickets.len(), 1);
    assert_eq!(wizard.step(), WizardStep::Completed);
    assert!(cache.load(h.showtime_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_toggle_conflict_leaves_selection_unchanged() {
    let h = Harness::new().await;
    let cache = Arc::new(InMemorySessionCache::new());
    let (me, other) = (UserId::new(), UserId::new());
    h.holds
        .claim_seats(other, h.showtime_id, seat_ids(&["B2"]))
        .await
        .unwrap();

    let mut wizard = controller(&h, me, &cache);
    wizard.toggle_seat(seat("B1")).await.unwrap();
    let err = wizard.toggle_seat(seat("B2")).await.unwrap_err();

    let ControllerError::Backend(backend) = err else {
        panic!("expected a backend error");
    };
    assert_eq!(backend.code().as_str(), "SEAT_CONFLICT");
    assert_eq!(backend.conflicting_seats(), seat_ids(&["B2"]).as_slice());
    assert_eq!(wizard.selected_seats(), seat_ids(&["B1"]));
}

#[tokio::test]
async fn test_resume_revalidates_against_the_server() {
    let h = Harness::new().await;
    let cache = Arc::new(InMemorySessionCache::new());
    let user = UserId::new();

    let mut first = controller(&h, user, &cache);
    first.toggle_seat(seat("C3")).await.unwrap();
    first.next_step().await.unwrap();
    drop(first);

    // Page reload: a fresh controller picks the hold up from the cache
    let mut reloaded = controller(&h, user, &cache);
    assert!(reloaded.resume().await.unwrap());
    assert_eq!(reloaded.step(), WizardStep::Food);
    assert_eq!(reloaded.selected_seats(), seat_ids(&["C3"]));
    assert!(!reloaded.needs_resync());

    // The server let the hold lapse while the tab was closed
    h.clock.advance(Duration::minutes(5));
    h.holds.sweep_expired().await;

    let mut late = controller(&h, user, &cache);
    assert!(!late.resume().await.unwrap());
    assert_eq!(late.step(), WizardStep::SeatSelection);
    assert!(late.session().is_none());
    assert!(cache.load(h.showtime_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_mirror_applies_deltas_and_detects_gaps() {
    let h = Harness::new().await;
    let cache = Arc::new(InMemorySessionCache::new());
    let (me, other) = (UserId::new(), UserId::new());
    let mut wizard = controller(&h, me, &cache);
    let mut rx = h.bus.subscribe(h.showtime_id).await;

    wizard.load_seat_map().await.unwrap();
    h.holds
        .claim_seats(other, h.showtime_id, seat_ids(&["A5"]))
        .await
        .unwrap();

    for message in drain(&mut rx) {
        assert_eq!(wizard.on_notification(&message).await.unwrap(), None);
    }
    let a5 = wizard
        .seat_map()
        .unwrap()
        .seats
        .iter()
        .find(|s| s.seat_id.as_str() == "A5")
        .unwrap();
    assert!(matches!(a5.state, SeatState::Held { holder, .. } if holder == other));
    assert!(!a5.mine);

    // Two releases happen but only the second reaches us
    h.holds.release_session(other, h.showtime_id).await.unwrap();
    h.holds
        .claim_seats(other, h.showtime_id, seat_ids(&["A6"]))
        .await
        .unwrap();
    let mut missed = drain(&mut rx);
    let last = missed.pop().unwrap();
    assert_eq!(
        wizard.on_notification(&last).await.unwrap(),
        Some(ControllerNotice::ResyncRequired)
    );
    assert!(wizard.needs_resync());

    let map = wizard.load_seat_map().await.unwrap();
    assert_eq!(map.sequence, last.sequence);
    assert!(!wizard.needs_resync());

    // Replays of old messages are ignored
    assert_eq!(wizard.on_notification(&missed[0]).await.unwrap(), None);
}

#[tokio::test]
async fn test_stale_mirror_is_refetched_by_the_next_operation() {
    let h = Harness::new().await;
    let cache = Arc::new(InMemorySessionCache::new());
    let (me, other) = (UserId::new(), UserId::new());
    let mut wizard = controller(&h, me, &cache);
    let mut rx = h.bus.subscribe(h.showtime_id).await;

    wizard.load_seat_map().await.unwrap();
    h.holds
        .claim_seats(other, h.showtime_id, seat_ids(&["B4"]))
        .await
        .unwrap();
    h.holds
        .claim_seats(other, h.showtime_id, seat_ids(&["B5"]))
        .await
        .unwrap();
    let last = drain(&mut rx).pop().unwrap();
    assert_eq!(
        wizard.on_notification(&last).await.unwrap(),
        Some(ControllerNotice::ResyncRequired)
    );

    // The missed hold on B4 is only known after the refetch
    wizard.toggle_seat(seat("A1")).await.unwrap();
    assert!(!wizard.needs_resync());
    let b4 = wizard
        .seat_map()
        .unwrap()
        .seats
        .iter()
        .find(|s| s.seat_id.as_str() == "B4")
        .unwrap();
    assert!(matches!(b4.state, SeatState::Held { holder, .. } if holder == other));
    assert!(wizard.seat_map().unwrap().sequence >= last.sequence);
}

#[tokio::test]
async fn test_countdown_expiry_returns_to_seat_selection() {
    let h = Harness::new().await;
    let cache = Arc::new(InMemorySessionCache::new());
    let user = UserId::new();
    let mut wizard = controller(&h, user, &cache);

    assert_eq!(wizard.tick().await.unwrap(), Countdown::Idle);
    wizard.toggle_seat(seat("B8")).await.unwrap();
    wizard.next_step().await.unwrap();

    h.clock.advance(Duration::minutes(2));
    assert_eq!(
        wizard.tick().await.unwrap(),
        Countdown::Remaining(Duration::minutes(3))
    );
    assert!(cache.load(h.showtime_id).await.unwrap().is_some());

    h.clock.advance(Duration::minutes(3));
    assert_eq!(wizard.tick().await.unwrap(), Countdown::Expired);
    assert_eq!(wizard.step(), WizardStep::SeatSelection);
    assert!(wizard.selected_seats().is_empty());
    assert!(cache.load(h.showtime_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_server_expiry_notice_resets_the_wizard() {
    let h = Harness::new().await;
    let cache = Arc::new(InMemorySessionCache::new());
    let user = UserId::new();
    let mut wizard = controller(&h, user, &cache);
    wizard.toggle_seat(seat("C1")).await.unwrap();
    wizard.next_step().await.unwrap();

    assert!(cache.load(h.showtime_id).await.unwrap().is_some());

    let notice = wizard
        .on_notification(&BusMessage {
            showtime_id: h.showtime_id,
            sequence: 99,
            notification: SeatNotification::ReservationExpired { user_id: user },
        })
        .await
        .unwrap();

    assert_eq!(notice, Some(ControllerNotice::SessionExpired));
    assert_eq!(wizard.step(), WizardStep::SeatSelection);
    assert!(wizard.session().is_none());
    assert!(cache.load(h.showtime_id).await.unwrap().is_none());

    // A reload finds nothing to resume
    let mut reloaded = controller(&h, user, &cache);
    assert!(!reloaded.resume().await.unwrap());
}

#[tokio::test]
async fn test_next_step_requires_a_hold() {
    let h = Harness::new().await;
    let cache = Arc::new(InMemorySessionCache::new());
    let mut wizard = controller(&h, UserId::new(), &cache);

    assert!(matches!(
        wizard.next_step().await,
        Err(ControllerError::SessionExpired)
    ));
    assert!(matches!(
        wizard.checkout().await,
        Err(ControllerError::WrongStep {
            actual: WizardStep::SeatSelection
        })
    ));
}
