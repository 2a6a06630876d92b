//! # Marquee Testing
//!
//! Test support for the Marquee booking engine.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - Seat layout and promotion fixtures
//! - A [`ScriptedGateway`] whose behavior each test chooses
//! - A [`Harness`] wiring the engine together over in-memory collaborators
//!
//! ## Example
//!
//! ```ignore
//! use marquee_testing::{seat_ids, Harness};
//!
//! #[tokio::test]
//! async fn claim_then_expire() {
//!     let h = Harness::new().await;
//!     let user = UserId::new();
//!     h.holds.claim_seats(user, h.showtime_id, seat_ids(&["A1"])).await.unwrap();
//!
//!     h.clock.advance(chrono::Duration::minutes(5));
//!     assert_eq!(h.holds.sweep_expired().await, 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use marquee_core::environment::Clock;

/// Deterministic clocks.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, PoisonError, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use marquee_testing::mocks::FixedClock;
    /// use marquee_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test moves it.
    ///
    /// Clones share the same time, so a test keeps one handle and gives
    /// another to the code under test.
    ///
    /// ```
    /// use marquee_testing::mocks::ManualClock;
    /// use marquee_core::environment::Clock;
    ///
    /// let clock = ManualClock::default();
    /// let handle = clock.clone();
    /// let before = clock.now();
    /// handle.advance(chrono::Duration::seconds(30));
    /// assert_eq!(clock.now() - before, chrono::Duration::seconds(30));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move time forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an instant
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.write().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(super::test_epoch())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(super::test_epoch())
    }
}

/// Reference data for tests.
pub mod fixtures {
    use marquee_core::types::{Money, Seat, SeatId, SeatLayout, SeatType, ShowtimeId};
    use marquee_engine::pricing::{DiscountRule, Promotion, PromotionScope};

    /// Base ticket price of every fixture layout
    pub const BASE_PRICE: Money = Money::new(100_000);

    /// Parse seat labels.
    ///
    /// # Panics
    ///
    /// Panics on a label that is not a valid seat id.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn seat_ids(labels: &[&str]) -> Vec<SeatId> {
        labels
            .iter()
            .map(|label| SeatId::parse(label).expect("fixture seat label should parse"))
            .collect()
    }

    /// Room with `rows` rows (`A`, `B`, ...) of `per_row` enabled standard seats.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn cinema_layout(showtime_id: ShowtimeId, rows: u8, per_row: u16) -> SeatLayout {
        let seats = (0..rows.min(26))
            .flat_map(|row| {
                let row = char::from(b'A' + row).to_string();
                (1..=per_row).map(move |number| Seat {
                    seat_id: SeatId::parse(&format!("{row}{number}"))
                        .expect("generated seat label should parse"),
                    row: row.clone(),
                    number,
                    seat_type: None,
                    enabled: true,
                })
            })
            .collect();

        SeatLayout {
            showtime_id,
            room: "Room 1".to_string(),
            base_price: BASE_PRICE,
            seats,
            seat_types: Vec::new(),
        }
    }

    /// Like [`cinema_layout`], with the last row as `VIP` seats costing `offset` more.
    #[must_use]
    pub fn layout_with_vip_row(showtime_id: ShowtimeId, rows: u8, per_row: u16, offset: Money) -> SeatLayout {
        let mut layout = cinema_layout(showtime_id, rows, per_row);
        let last_row = layout.seats.last().map(|seat| seat.row.clone());
        for seat in &mut layout.seats {
            if Some(&seat.row) == last_row.as_ref() {
                seat.seat_type = Some("VIP".to_string());
            }
        }
        layout.seat_types.push(SeatType {
            code: "VIP".to_string(),
            name: "VIP recliner".to_string(),
            price_offset: offset,
        });
        layout
    }

    /// `TENOFF`: 10% off the whole bill, at most 15 000
    #[must_use]
    pub fn ten_percent_capped() -> Promotion {
        Promotion {
            code: "TENOFF".to_string(),
            scope: PromotionScope::TotalBill,
            rule: DiscountRule::Percentage {
                percent: 10,
                max_discount: Some(Money::new(15_000)),
            },
            min_order_amount: Money::ZERO,
            active: true,
            starts_at: None,
            ends_at: None,
        }
    }
}

/// Payment gateway test double.
pub mod gateway {
    use marquee_engine::payment_gateway::{
        GatewayCallback, GatewayResult, GatewaySession, PaymentGateway, PaymentGatewayError,
        PaymentRequest,
    };
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    /// What the gateway does when asked to create a payment.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum GatewayBehavior {
        /// Create the payment
        Approve,
        /// Refuse with a reason
        Reject(String),
        /// Never answer
        Hang,
    }

    /// Gateway scripted by the test, recording every request.
    #[derive(Clone, Debug)]
    pub struct ScriptedGateway {
        behavior: Arc<Mutex<GatewayBehavior>>,
        verified: Arc<AtomicBool>,
        requests: Arc<Mutex<Vec<PaymentRequest>>>,
    }

    impl ScriptedGateway {
        /// Gateway that approves and verifies everything
        #[must_use]
        pub fn new() -> Self {
            Self {
                behavior: Arc::new(Mutex::new(GatewayBehavior::Approve)),
                verified: Arc::new(AtomicBool::new(true)),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Change what the next payment creation does
        pub fn set_behavior(&self, behavior: GatewayBehavior) {
            *self.behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
        }

        /// Make callbacks verify or not
        pub fn set_verified(&self, verified: bool) {
            self.verified.store(verified, Ordering::SeqCst);
        }

        /// Payment requests received so far
        #[must_use]
        pub fn requests(&self) -> Vec<PaymentRequest> {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl Default for ScriptedGateway {
        fn default() -> Self {
            Self::new()
        }
    }

    impl PaymentGateway for ScriptedGateway {
        fn create_payment(
            &self,
            request: PaymentRequest,
        ) -> Pin<Box<dyn Future<Output = GatewayResult<GatewaySession>> + Send>> {
            let behavior = self
                .behavior
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            let order_id = request.order_id;
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request);

            Box::pin(async move {
                match behavior {
                    GatewayBehavior::Approve => {
                        let external_ref = format!("test_txn_{}", uuid::Uuid::new_v4().simple());
                        Ok(GatewaySession {
                            redirect_url: format!("https://gateway.test/pay/{external_ref}?order={order_id}"),
                            external_ref,
                        })
                    }
                    GatewayBehavior::Reject(reason) => Err(PaymentGatewayError::Rejected { reason }),
                    GatewayBehavior::Hang => std::future::pending().await,
                }
            })
        }

        fn verify_callback(&self, _callback: &GatewayCallback) -> bool {
            self.verified.load(Ordering::SeqCst)
        }
    }
}

/// Engine wired over in-memory collaborators.
pub mod harness {
    use super::fixtures::{cinema_layout, ten_percent_capped};
    use super::gateway::ScriptedGateway;
    use super::mocks::ManualClock;
    use marquee_core::environment::Clock;
    use marquee_core::types::{Money, OrderId, ShowtimeId};
    use marquee_engine::bus::NotificationBus;
    use marquee_engine::catalog::{Combo, InMemoryCatalog, InMemoryLoyaltyLedger};
    use marquee_engine::client::LocalBackend;
    use marquee_engine::holds::{HoldManager, HoldPolicy};
    use marquee_engine::orders::{
        CoordinatorConfig, CoordinatorEnvironment, InMemoryOrderRepository, LedgerFinalizer,
        OrderCoordinator,
    };
    use marquee_engine::payment_gateway::GatewayCallback;
    use marquee_engine::pricing::{LoyaltyPolicy, PricingEngine};
    use marquee_engine::sweeper::ExpirySweeper;
    use std::sync::Arc;
    use std::time::Duration;

    /// Fully wired engine for one showtime of 3 rows × 8 seats.
    pub struct Harness {
        /// Time source shared by every component
        pub clock: ManualClock,
        /// Seats, combos and promotions
        pub catalog: Arc<InMemoryCatalog>,
        /// Loyalty balances
        pub loyalty: Arc<InMemoryLoyaltyLedger>,
        /// Payment gateway
        pub gateway: ScriptedGateway,
        /// Order store
        pub orders: Arc<InMemoryOrderRepository>,
        /// Notification bus
        pub bus: NotificationBus,
        /// Hold manager
        pub holds: Arc<HoldManager>,
        /// Coordinator
        pub coordinator: Arc<OrderCoordinator>,
        /// Showtime present in the catalog
        pub showtime_id: ShowtimeId,
        /// Combo present on the menu, priced 50 000
        pub combo: Combo,
    }

    impl Harness {
        /// Harness with default policies
        pub async fn new() -> Self {
            Self::with_policy(HoldPolicy::default()).await
        }

        /// Harness with a custom hold policy
        pub async fn with_policy(policy: HoldPolicy) -> Self {
            let clock = ManualClock::default();
            let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
            let showtime_id = ShowtimeId::new();

            let catalog = Arc::new(InMemoryCatalog::new());
            catalog.put_layout(cinema_layout(showtime_id, 3, 8)).await;
            let combo = Combo {
                combo_id: marquee_core::types::ComboId::new(),
                name: "Popcorn + Drink".to_string(),
                price: Money::new(50_000),
            };
            catalog.put_combo(combo.clone()).await;
            catalog.put_promotion(ten_percent_capped()).await;

            let loyalty = Arc::new(InMemoryLoyaltyLedger::new());
            let gateway = ScriptedGateway::new();
            let orders = Arc::new(InMemoryOrderRepository::new());
            let bus = NotificationBus::default();
            let holds = Arc::new(HoldManager::new(
                catalog.clone(),
                bus.clone(),
                Arc::clone(&shared_clock),
                policy,
            ));

            let env = CoordinatorEnvironment {
                holds: Arc::clone(&holds),
                orders: orders.clone(),
                gateway: Arc::new(gateway.clone()),
                seats: catalog.clone(),
                combos: catalog.clone(),
                promotions: catalog.clone(),
                loyalty: loyalty.clone(),
                finalizer: Arc::new(LedgerFinalizer::new(loyalty.clone())),
                clock: shared_clock,
            };
            let coordinator = Arc::new(OrderCoordinator::new(
                env,
                PricingEngine::new(LoyaltyPolicy::default()),
                CoordinatorConfig {
                    gateway_timeout: Duration::from_millis(200),
                },
            ));

            Self {
                clock,
                catalog,
                loyalty,
                gateway,
                orders,
                bus,
                holds,
                coordinator,
                showtime_id,
                combo,
            }
        }

        /// Sweeper over this harness's components
        #[must_use]
        pub fn sweeper(&self) -> ExpirySweeper {
            ExpirySweeper::new(
                Arc::clone(&self.holds),
                Arc::clone(&self.coordinator),
                self.bus.clone(),
                Duration::from_millis(50),
            )
        }

        /// In-process backend for the booking controller
        #[must_use]
        pub fn backend(&self) -> Arc<LocalBackend> {
            Arc::new(LocalBackend::new(
                Arc::clone(&self.holds),
                Arc::clone(&self.coordinator),
            ))
        }
    }

    /// Gateway callback referencing an order by id
    #[must_use]
    pub fn callback(order_id: OrderId, result_code: &str) -> GatewayCallback {
        GatewayCallback {
            order_ref: order_id.to_string(),
            result_code: result_code.to_string(),
            message: String::new(),
            transaction_ref: None,
            signature: None,
        }
    }
}

/// Bus helpers.
pub mod recorder {
    use marquee_engine::bus::BusMessage;
    use tokio::sync::broadcast::Receiver;

    /// Every message already waiting on a subscription
    pub fn drain(rx: &mut Receiver<BusMessage>) -> Vec<BusMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}

/// Route engine logs to the test output; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marquee_engine=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn test_epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
}

// Re-export commonly used items
pub use fixtures::{cinema_layout, layout_with_vip_row, seat_ids, ten_percent_capped, BASE_PRICE};
pub use gateway::{GatewayBehavior, ScriptedGateway};
pub use harness::{callback, Harness};
pub use mocks::{test_clock, FixedClock, ManualClock};
pub use recorder::drain;
