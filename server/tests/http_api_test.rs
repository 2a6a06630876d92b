//! HTTP API tests over the in-process engine.
//!
//! Run with: `cargo test --test http_api_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use axum_test::TestServer;
use marquee_core::types::UserId;
use marquee_server::build_router;
use marquee_server::server::{AppState, WebSocketSettings};
use marquee_testing::Harness;
use serde_json::{Value, json};
use std::sync::Arc;

fn app(h: &Harness) -> TestServer {
    let state = AppState::new(
        Arc::clone(&h.holds),
        Arc::clone(&h.coordinator),
        h.bus.clone(),
        None,
        WebSocketSettings::default(),
    );
    TestServer::new(build_router(state)).expect("router should start")
}

fn holds_path(h: &Harness) -> String {
    format!("/api/showtimes/{}/holds", h.showtime_id)
}

#[tokio::test]
async fn test_health_and_readiness() {
    let h = Harness::new().await;
    let server = app(&h);

    let health = server.get("/health").await;
    health.assert_status_ok();
    assert_eq!(health.json::<Value>()["status"], "ok");

    let ready = server.get("/ready").await;
    ready.assert_status_ok();
    let body = ready.json::<Value>();
    assert_eq!(body["ready"], true);
    assert_eq!(body["order_store"], "memory");
    assert_eq!(body["active_showtimes"], 0);

    server
        .post(&holds_path(&h))
        .json(&json!({ "user_id": UserId::new(), "seat_ids": ["A1"] }))
        .await
        .assert_status_ok();
    let body = server.get("/ready").await.json::<Value>();
    assert_eq!(body["active_showtimes"], 1);
}

#[tokio::test]
async fn test_conflicting_claim_is_409_with_the_taken_seats() {
    let h = Harness::new().await;
    let server = app(&h);
    let (x, y) = (UserId::new(), UserId::new());

    server
        .post(&holds_path(&h))
        .json(&json!({ "user_id": x, "seat_ids": ["A1", "A2"] }))
        .await
        .assert_status_ok();

    let response = server
        .post(&holds_path(&h))
        .json(&json!({ "user_id": y, "seat_ids": ["A2", "A3"] }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let body = response.json::<Value>();
    assert_eq!(body["code"], "SEAT_CONFLICT");
    assert_eq!(body["conflicting_seat_ids"], json!(["A2"]));

    // Nothing was held for Y
    server
        .get(&format!("{}/{y}", holds_path(&h)))
        .await
        .assert_status(StatusCode::GONE);
}

#[tokio::test]
async fn test_seat_map_marks_the_viewers_holds() {
    let h = Harness::new().await;
    let server = app(&h);
    let (me, other) = (UserId::new(), UserId::new());

    for (user, seat) in [(me, "B1"), (other, "B2")] {
        server
            .post(&holds_path(&h))
            .json(&json!({ "user_id": user, "seat_ids": [seat] }))
            .await
            .assert_status_ok();
    }

    let map = server
        .get(&format!("/api/showtimes/{}/seats", h.showtime_id))
        .add_query_param("user_id", me.to_string())
        .await
        .json::<Value>();

    let seat = |label: &str| {
        map["seats"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["seat_id"] == label)
            .cloned()
            .unwrap()
    };
    assert_eq!(seat("B1")["state"], "held");
    assert_eq!(seat("B1")["mine"], true);
    assert_eq!(seat("B2")["state"], "held");
    assert_eq!(seat("B2")["mine"], false);
    assert_eq!(seat("B3")["state"], "free");
}

#[tokio::test]
async fn test_unknown_showtime_is_404() {
    let h = Harness::new().await;
    let server = app(&h);

    let response = server
        .get(&format!("/api/showtimes/{}/seats", uuid::Uuid::new_v4()))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["code"], "UNKNOWN_SHOWTIME");
}

#[tokio::test]
async fn test_oversized_claim_is_422() {
    let h = Harness::new().await;
    let server = app(&h);

    let seats: Vec<String> = (1..=8).map(|n| format!("A{n}")).chain(["B1".to_string()]).collect();
    let response = server
        .post(&holds_path(&h))
        .json(&json!({ "user_id": UserId::new(), "seat_ids": seats }))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json::<Value>()["code"], "TOO_MANY_SEATS");
}

#[tokio::test]
async fn test_modify_and_release() {
    let h = Harness::new().await;
    let server = app(&h);
    let user = UserId::new();

    server
        .post(&holds_path(&h))
        .json(&json!({ "user_id": user, "seat_ids": ["C1", "C2"] }))
        .await
        .assert_status_ok();

    let modified = server
        .patch(&holds_path(&h))
        .json(&json!({ "user_id": user, "add": ["C3"], "remove": ["C1"] }))
        .await
        .json::<Value>();
    assert_eq!(modified["session"]["seats"], json!(["C2", "C3"]));

    let released = server
        .delete(&holds_path(&h))
        .add_query_param("user_id", user.to_string())
        .await
        .json::<Value>();
    assert_eq!(released["released"], json!(["C2", "C3"]));

    // Releasing again is not an error
    let again = server
        .delete(&holds_path(&h))
        .add_query_param("user_id", user.to_string())
        .await;
    again.assert_status_ok();
    assert_eq!(again.json::<Value>()["released"], json!([]));
}

#[tokio::test]
async fn test_preview_applies_a_capped_promotion() {
    let h = Harness::new().await;
    let server = app(&h);

    let breakdown = server
        .post("/api/pricing/preview")
        .json(&json!({
            "showtime_id": h.showtime_id,
            "seat_ids": ["A1", "A2"],
            "promotion_code": "TENOFF"
        }))
        .await
        .json::<Value>();

    assert_eq!(breakdown["ticket_subtotal"], 200_000);
    assert_eq!(breakdown["discount"], 15_000);
    assert_eq!(breakdown["total"], 185_000);
}

#[tokio::test]
async fn test_invalid_promotion_is_422() {
    let h = Harness::new().await;
    let server = app(&h);

    let response = server
        .post("/api/pricing/preview")
        .json(&json!({
            "showtime_id": h.showtime_id,
            "seat_ids": ["A1"],
            "promotion_code": "NOPE"
        }))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json::<Value>()["code"], "PROMOTION_INVALID");
}

#[tokio::test]
async fn test_checkout_callback_and_polling() {
    let h = Harness::new().await;
    let server = app(&h);
    let user = UserId::new();

    server
        .post(&holds_path(&h))
        .json(&json!({ "user_id": user, "seat_ids": ["A1", "A2"] }))
        .await
        .assert_status_ok();
    server
        .put(&format!("{}/{user}/combos", holds_path(&h)))
        .json(&json!({ "combos": [{ "combo_id": h.combo.combo_id, "quantity": 1 }] }))
        .await
        .assert_status_ok();

    let created = server
        .post("/api/order")
        .json(&json!({ "user_id": user, "showtime_id": h.showtime_id }))
        .await;
    created.assert_status(StatusCode::CREATED);
    let order = created.json::<Value>();
    assert_eq!(order["status"], "awaiting_gateway");
    assert_eq!(order["total"], 250_000);
    let order_id = order["order_id"].as_str().unwrap().to_string();

    // A second checkout of the same session is refused
    server
        .post("/api/order")
        .json(&json!({ "user_id": user, "showtime_id": h.showtime_id }))
        .await
        .assert_status(StatusCode::CONFLICT);

    let ack = server
        .post("/api/order/gateway-callback")
        .json(&json!({ "order_ref": order_id, "result_code": "0", "message": "Successful." }))
        .await;
    ack.assert_status_ok();
    let ack = ack.json::<Value>();
    assert_eq!(ack["status"], "confirmed");
    assert_eq!(ack["duplicate"], false);

    let retry = server
        .post("/api/order/gateway-callback")
        .json(&json!({ "order_ref": order_id, "result_code": "0" }))
        .await;
    retry.assert_status_ok();
    let retry = retry.json::<Value>();
    assert_eq!(retry["duplicate"], true);
    assert_eq!(retry["code"], "DUPLICATE_CALLBACK");

    let status = server
        .get(&format!("/api/order/status/{order_id}"))
        .await
        .json::<Value>();
    assert_eq!(status["status"], "confirmed");
    assert_eq!(status["tickets"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_checkout_without_a_hold_is_410() {
    let h = Harness::new().await;
    let server = app(&h);

    let response = server
        .post("/api/order")
        .json(&json!({ "user_id": UserId::new(), "showtime_id": h.showtime_id }))
        .await;
    response.assert_status(StatusCode::GONE);
    assert_eq!(response.json::<Value>()["code"], "SESSION_EXPIRED");
}

#[tokio::test]
async fn test_unverified_callback_is_401() {
    let h = Harness::new().await;
    let server = app(&h);
    let user = UserId::new();
    h.holds
        .claim_seats(user, h.showtime_id, marquee_testing::seat_ids(&["B4"]))
        .await
        .unwrap();
    let order = server
        .post("/api/order")
        .json(&json!({ "user_id": user, "showtime_id": h.showtime_id }))
        .await
        .json::<Value>();

    h.gateway.set_verified(false);
    let response = server
        .post("/api/order/gateway-callback")
        .json(&json!({ "order_ref": order["order_id"], "result_code": "0" }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["code"], "CALLBACK_UNVERIFIED");
}

#[tokio::test]
async fn test_unknown_order_is_404() {
    let h = Harness::new().await;
    let server = app(&h);

    let response = server
        .get(&format!("/api/order/status/{}", uuid::Uuid::new_v4()))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["code"], "ORDER_NOT_FOUND");
}
