//! Business metrics for the booking engine.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `marquee_holds_total{outcome}` - Claim and modify attempts by outcome
//! - `marquee_seats_released_total{reason}` - Seats returned to free
//! - `marquee_seats_sold_total` - Seats converted into tickets
//! - `marquee_sessions_expired_total` - Sessions released by expiry
//! - `marquee_orders_total{status}` - Orders reaching each status
//! - `marquee_callbacks_total{outcome}` - Gateway callbacks by outcome
//! - `marquee_revenue_total` - Confirmed order totals, minor currency units
//!
//! ## Gauges
//! - `marquee_seats_held` - Seats currently held
//!
//! ## Histograms
//! - `marquee_gateway_duration_seconds` - Payment creation latency
//! - `marquee_sweep_duration_seconds` - Expiry sweep duration

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Initialize and register all business metrics descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "marquee_holds_total",
        "Seat claim and modify attempts by outcome (held, or the rejection code)"
    );
    describe_counter!(
        "marquee_seats_released_total",
        "Seats returned to free by reason"
    );
    describe_counter!("marquee_seats_sold_total", "Seats sold");
    describe_counter!(
        "marquee_sessions_expired_total",
        "Reservation sessions released because their hold lapsed"
    );
    describe_gauge!("marquee_seats_held", "Seats currently held");

    describe_counter!(
        "marquee_orders_total",
        "Orders by status (awaiting_gateway, confirmed, failed, expired)"
    );
    describe_counter!(
        "marquee_callbacks_total",
        "Gateway callbacks by outcome (confirmed, failed, expired, duplicate, unverified)"
    );
    describe_counter!(
        "marquee_revenue_total",
        "Total of confirmed orders in minor currency units"
    );
    describe_histogram!(
        "marquee_gateway_duration_seconds",
        "Time taken by the gateway to create a payment"
    );
    describe_histogram!(
        "marquee_sweep_duration_seconds",
        "Time taken by one expiry sweep"
    );

    tracing::info!("Business metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record seats newly held by a claim or modify.
#[allow(clippy::cast_precision_loss)]
pub fn record_seats_held(count: usize) {
    metrics::counter!("marquee_holds_total", "outcome" => "held").increment(1);
    metrics::gauge!("marquee_seats_held").increment(count as f64);
}

/// Record a rejected claim or modify.
pub fn record_hold_rejected(code: &'static str) {
    metrics::counter!("marquee_holds_total", "outcome" => code).increment(1);
}

/// Record seats going back to free.
#[allow(clippy::cast_precision_loss)]
pub fn record_seats_released(count: usize, reason: &'static str) {
    metrics::counter!("marquee_seats_released_total", "reason" => reason).increment(count as u64);
    metrics::gauge!("marquee_seats_held").decrement(count as f64);
}

/// Record seats sold by a commit.
#[allow(clippy::cast_precision_loss)]
pub fn record_seats_sold(count: usize) {
    metrics::counter!("marquee_seats_sold_total").increment(count as u64);
    metrics::gauge!("marquee_seats_held").decrement(count as f64);
}

/// Record an expired session.
#[allow(clippy::cast_precision_loss)]
pub fn record_session_expired(seats: usize) {
    metrics::counter!("marquee_sessions_expired_total").increment(1);
    metrics::counter!("marquee_seats_released_total", "reason" => "expired").increment(seats as u64);
    metrics::gauge!("marquee_seats_held").decrement(seats as f64);
}

/// Record an order reaching a status.
pub fn record_order_status(status: &'static str) {
    metrics::counter!("marquee_orders_total", "status" => status).increment(1);
}

/// Record revenue of a confirmed order.
pub fn record_revenue(amount: u64) {
    metrics::counter!("marquee_revenue_total").increment(amount);
}

/// Record a gateway callback outcome.
pub fn record_callback(outcome: &'static str) {
    metrics::counter!("marquee_callbacks_total", "outcome" => outcome).increment(1);
}

/// Record gateway payment-creation latency.
pub fn record_gateway_duration(seconds: f64) {
    metrics::histogram!("marquee_gateway_duration_seconds").record(seconds);
}

/// Record one sweep.
pub fn record_sweep_duration(seconds: f64) {
    metrics::histogram!("marquee_sweep_duration_seconds").record(seconds);
}
