//! Checkout and payment reconciliation tests.
//!
//! Covers the order lifecycle end to end over in-memory collaborators:
//! create → gateway → callback, duplicate and unverified callbacks, gateway
//! rejection and timeout, and orders that outlive their hold.
//!
//! Run with: `cargo test --test checkout_flow_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use chrono::Duration;
use marquee_core::types::{ComboLine, Money, SeatState, UserId};
use marquee_engine::bus::SeatNotification;
use marquee_engine::orders::{CreateOrderRequest, OrderError, OrderRepository, OrderStatus};
use marquee_engine::payment_gateway::PaymentGatewayError;
use marquee_testing::{callback, drain, seat_ids, GatewayBehavior, Harness};

fn order_for(user_id: UserId, h: &Harness) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id,
        showtime_id: h.showtime_id,
        seat_ids: None,
        combos: None,
        promotion_code: None,
        loyalty_points: None,
    }
}

/// Successful payment turns the hold into sold seats and issues one ticket per seat.
#[tokio::test]
async fn test_success_callback_sells_seats_and_issues_tickets() {
    let h = Harness::new().await;
    let user = UserId::new();
    h.holds
        .claim_seats(user, h.showtime_id, seat_ids(&["A1", "A2"]))
        .await
        .unwrap();
    h.holds
        .select_combos(
            user,
            h.showtime_id,
            vec![ComboLine {
                combo_id: h.combo.combo_id,
                quantity: 2,
            }],
        )
        .await
        .unwrap();

    let order = h.coordinator.create_order(order_for(user, &h)).await.unwrap();
    assert_eq!(order.status, OrderStatus::AwaitingGateway);
    assert_eq!(order.total(), Money::new(300_000));
    assert!(order.redirect_url.is_some());
    assert_eq!(h.gateway.requests()[0].amount, Money::new(300_000));

    let mut rx = h.bus.subscribe(h.showtime_id).await;
    let outcome = h
        .coordinator
        .handle_gateway_callback(&callback(order.order_id, "0"))
        .await
        .unwrap();

    assert!(!outcome.duplicate);
    assert_eq!(outcome.order.status, OrderStatus::Confirmed);
    assert_eq!(outcome.order.tickets.len(), 2);
    assert!(outcome.order.tickets[0].code.starts_with("MRQ-"));

    let sold: Vec<_> = drain(&mut rx).into_iter().map(|m| m.notification).collect();
    assert_eq!(
        sold,
        vec![SeatNotification::SeatSold {
            seat_ids: seat_ids(&["A1", "A2"])
        }]
    );

    let map = h.holds.seat_map(h.showtime_id, None).await.unwrap();
    let a1 = map.seats.iter().find(|s| s.seat_id.as_str() == "A1").unwrap();
    assert_eq!(a1.state, SeatState::Sold);
    assert!(h.holds.session(user, h.showtime_id).await.is_none());
}

/// The gateway retries a success callback; only the first one counts.
#[tokio::test]
async fn test_duplicate_success_callback_issues_one_ticket_set() {
    let h = Harness::new().await;
    let user = UserId::new();
    h.holds
        .claim_seats(user, h.showtime_id, seat_ids(&["B1", "B2", "B3"]))
        .await
        .unwrap();
    let order = h.coordinator.create_order(order_for(user, &h)).await.unwrap();

    let first = h
        .coordinator
        .handle_gateway_callback(&callback(order.order_id, "0"))
        .await
        .unwrap();
    let second = h
        .coordinator
        .handle_gateway_callback(&callback(order.order_id, "0"))
        .await
        .unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(second.order.tickets, first.order.tickets);
    assert_eq!(
        h.orders.count_with_status(OrderStatus::Confirmed).await,
        1
    );
}

/// A failure arriving after a success changes nothing.
#[tokio::test]
async fn test_first_terminal_callback_wins() {
    let h = Harness::new().await;
    let user = UserId::new();
    h.holds
        .claim_seats(user, h.showtime_id, seat_ids(&["C1"]))
        .await
        .unwrap();
    let order = h.coordinator.create_order(order_for(user, &h)).await.unwrap();

    h.coordinator
        .handle_gateway_callback(&callback(order.order_id, "0"))
        .await
        .unwrap();
    let late = h
        .coordinator
        .handle_gateway_callback(&callback(order.order_id, "24"))
        .await
        .unwrap();

    assert!(late.duplicate);
    assert_eq!(late.order.status, OrderStatus::Confirmed);
}

/// Concurrent duplicates are serialized per order.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_callbacks_confirm_once() {
    let h = std::sync::Arc::new(Harness::new().await);
    let user = UserId::new();
    h.holds
        .claim_seats(user, h.showtime_id, seat_ids(&["A7", "A8"]))
        .await
        .unwrap();
    let order = h.coordinator.create_order(order_for(user, &h)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = std::sync::Arc::clone(&h);
        let cb = callback(order.order_id, "0");
        handles.push(tokio::spawn(async move {
            h.coordinator.handle_gateway_callback(&cb).await
        }));
    }

    let mut fresh = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.order.status, OrderStatus::Confirmed);
        assert_eq!(outcome.order.tickets.len(), 2);
        if !outcome.duplicate {
            fresh += 1;
        }
    }
    assert_eq!(fresh, 1);
}

/// Callbacks the adapter cannot verify never touch the order.
#[tokio::test]
async fn test_unverified_callback_is_rejected() {
    let h = Harness::new().await;
    let user = UserId::new();
    h.holds
        .claim_seats(user, h.showtime_id, seat_ids(&["A3"]))
        .await
        .unwrap();
    let order = h.coordinator.create_order(order_for(user, &h)).await.unwrap();

    h.gateway.set_verified(false);
    let err = h
        .coordinator
        .handle_gateway_callback(&callback(order.order_id, "0"))
        .await
        .unwrap_err();
    assert_eq!(err, OrderError::CallbackUnverified);

    let view = h.coordinator.check_status(order.order_id).await.unwrap();
    assert_eq!(view.status, OrderStatus::AwaitingGateway);
    assert!(h.holds.session(user, h.showtime_id).await.is_some());
}

/// A gateway refusal fails the order and frees the seats at once.
#[tokio::test]
async fn test_gateway_rejection_releases_the_hold() {
    let h = Harness::new().await;
    let user = UserId::new();
    h.holds
        .claim_seats(user, h.showtime_id, seat_ids(&["B5", "B6"]))
        .await
        .unwrap();
    h.gateway
        .set_behavior(GatewayBehavior::Reject("merchant disabled".to_string()));

    let mut rx = h.bus.subscribe(h.showtime_id).await;
    let err = h
        .coordinator
        .create_order(order_for(user, &h))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrderError::Gateway(PaymentGatewayError::Rejected { .. })
    ));
    assert!(h.holds.session(user, h.showtime_id).await.is_none());
    assert_eq!(h.orders.count_with_status(OrderStatus::Failed).await, 1);
    assert!(drain(&mut rx).iter().any(|m| matches!(
        &m.notification,
        SeatNotification::SeatUnbooked { seat_ids: freed } if *freed == seat_ids(&["B5", "B6"])
    )));
}

/// A gateway that never answers is cut off by the timeout.
#[tokio::test]
async fn test_gateway_timeout_fails_the_order() {
    let h = Harness::new().await;
    let user = UserId::new();
    h.holds
        .claim_seats(user, h.showtime_id, seat_ids(&["C2"]))
        .await
        .unwrap();
    h.gateway.set_behavior(GatewayBehavior::Hang);

    let err = h
        .coordinator
        .create_order(order_for(user, &h))
        .await
        .unwrap_err();

    assert_eq!(err, OrderError::Gateway(PaymentGatewayError::Timeout));
    assert_eq!(err.code().as_str(), "GATEWAY_TIMEOUT");
    assert!(h.holds.session(user, h.showtime_id).await.is_none());
}

/// Payment that lands after the hold lapsed does not sell the seats.
#[tokio::test]
async fn test_late_success_after_expiry_expires_the_order() {
    let h = Harness::new().await;
    let (buyer, other) = (UserId::new(), UserId::new());
    h.holds
        .claim_seats(buyer, h.showtime_id, seat_ids(&["A4"]))
        .await
        .unwrap();
    let order = h.coordinator.create_order(order_for(buyer, &h)).await.unwrap();

    h.clock.advance(Duration::minutes(6));
    h.holds
        .claim_seats(other, h.showtime_id, seat_ids(&["A4"]))
        .await
        .unwrap();

    let outcome = h
        .coordinator
        .handle_gateway_callback(&callback(order.order_id, "0"))
        .await
        .unwrap();

    assert_eq!(outcome.order.status, OrderStatus::Expired);
    assert!(outcome.order.tickets.is_empty());
    let session = h.holds.session(other, h.showtime_id).await.unwrap();
    assert_eq!(session.seat_list(), seat_ids(&["A4"]));
}

/// Orders without a callback are expired by the sweeper, which frees their seats.
#[tokio::test]
async fn test_sweeper_expires_overdue_orders() {
    let h = Harness::new().await;
    let user = UserId::new();
    h.holds
        .claim_seats(user, h.showtime_id, seat_ids(&["C5", "C6"]))
        .await
        .unwrap();
    let order = h.coordinator.create_order(order_for(user, &h)).await.unwrap();

    h.clock.advance(Duration::minutes(5));
    let report = h.sweeper().run_once().await;

    assert_eq!(report.sessions_expired, 1);
    assert_eq!(report.orders_expired, 1);
    let stored = h.orders.get(order.order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Expired);

    let map = h.holds.seat_map(h.showtime_id, None).await.unwrap();
    assert!(map
        .seats
        .iter()
        .filter(|s| ["C5", "C6"].contains(&s.seat_id.as_str()))
        .all(|s| s.state == SeatState::Free));
}

/// Loyalty points are redeemed on confirmation, not at checkout.
#[tokio::test]
async fn test_loyalty_points_are_redeemed_on_confirmation() {
    use marquee_engine::catalog::LoyaltyLedger;

    let h = Harness::new().await;
    let user = UserId::new();
    h.loyalty.set_balance(user, 100).await;
    h.holds
        .claim_seats(user, h.showtime_id, seat_ids(&["B7"]))
        .await
        .unwrap();

    let mut request = order_for(user, &h);
    request.loyalty_points = Some(20);
    let order = h.coordinator.create_order(request).await.unwrap();
    assert_eq!(h.loyalty.balance(user).await.unwrap(), 100);

    h.coordinator
        .handle_gateway_callback(&callback(order.order_id, "0"))
        .await
        .unwrap();
    assert_eq!(h.loyalty.balance(user).await.unwrap(), 80);
}

/// The price shown at preview is the price the order freezes and charges.
#[tokio::test]
async fn test_preview_matches_the_frozen_order_price() {
    use marquee_engine::catalog::SeatCatalog;
    use marquee_engine::orders::PreviewRequest;
    use marquee_engine::pricing::{
        LoyaltyPolicy, LoyaltyRedemption, PricedCombo, PricedSeat, PricingEngine, PricingRequest,
    };
    use marquee_testing::ten_percent_capped;

    let h = Harness::new().await;
    let user = UserId::new();
    h.loyalty.set_balance(user, 100).await;
    let seats = seat_ids(&["A3", "A4"]);
    let combos = vec![ComboLine {
        combo_id: h.combo.combo_id,
        quantity: 2,
    }];
    h.holds
        .claim_seats(user, h.showtime_id, seats.clone())
        .await
        .unwrap();

    let preview = h
        .coordinator
        .preview(&PreviewRequest {
            showtime_id: h.showtime_id,
            seat_ids: seats.clone(),
            combos: combos.clone(),
            promotion_code: Some("TENOFF".to_string()),
            loyalty_points: Some(20),
            user_id: Some(user),
        })
        .await
        .unwrap();

    let mut request = order_for(user, &h);
    request.seat_ids = Some(seats);
    request.combos = Some(combos);
    request.promotion_code = Some("TENOFF".to_string());
    request.loyalty_points = Some(20);
    let order = h.coordinator.create_order(request).await.unwrap();

    assert_eq!(order.breakdown, preview);
    assert!(preview.discount > Money::ZERO);
    assert!(preview.loyalty_discount > Money::ZERO);
    assert_eq!(h.gateway.requests()[0].amount, preview.total);

    // Repricing the frozen selection gives the same breakdown
    let layout = h.catalog.seat_layout(h.showtime_id).await.unwrap().unwrap();
    let repriced = PricingEngine::new(LoyaltyPolicy::default())
        .price(&PricingRequest {
            base_price: layout.base_price,
            seats: order
                .seat_ids
                .iter()
                .map(|seat_id| PricedSeat {
                    seat_id: seat_id.clone(),
                    price_offset: layout.seat(seat_id).and_then(|seat| layout.price_offset(seat)),
                })
                .collect(),
            combos: order
                .combos
                .iter()
                .map(|line| PricedCombo {
                    combo_id: line.combo_id,
                    unit_price: h.combo.price,
                    quantity: line.quantity,
                })
                .collect(),
            promotion: Some(ten_percent_capped()),
            loyalty: Some(LoyaltyRedemption {
                points: order.breakdown.loyalty_points,
                balance: 100,
            }),
            at: order.created_at,
        })
        .unwrap();
    assert_eq!(repriced, order.breakdown);
    assert_eq!(repriced.total, order.total());
}
