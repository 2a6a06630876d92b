//! Order/payment coordinator.
//!
//! Turns a live reservation session into a frozen [`PendingOrder`], hands it
//! to the payment gateway, and reconciles the asynchronous callback with the
//! hold manager. It is the only component that commits or releases a session
//! because of a payment outcome.
//!
//! Every transition of one order runs under that order's lock, so a callback,
//! its duplicates and the expiry sweep are serialized. The first terminal
//! transition wins; later callbacks are acknowledged as duplicates.

use super::repository::OrderRepository;
use super::{CallbackOutcome, OrderError, OrderStatus, OrderStatusView, PendingOrder};
use crate::catalog::{CatalogError, ComboMenu, LoyaltyLedger, PromotionCatalog, SeatCatalog};
use crate::holds::{HoldError, HoldManager, ReleaseReason};
use crate::metrics;
use crate::payment_gateway::{
    GatewayCallback, GatewaySession, PaymentGateway, PaymentGatewayError, PaymentRequest,
};
use crate::pricing::{
    LoyaltyRedemption, PriceBreakdown, PricedCombo, PricedSeat, PricingEngine, PricingError,
    PricingRequest,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::environment::Clock;
use marquee_core::types::{ComboLine, OrderId, SeatId, ShowtimeId, Ticket, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// Environment
// ============================================================================

/// Post-commit side effects owned by the surrounding platform.
#[async_trait]
pub trait OrderFinalizer: Send + Sync {
    /// Apply loyalty and promotion bookkeeping of a confirmed order.
    ///
    /// # Errors
    ///
    /// Collaborator failures. They are logged and never undo the commit.
    async fn finalize(&self, order: &PendingOrder) -> Result<(), CatalogError>;
}

/// Finalizer that decrements redeemed loyalty points.
pub struct LedgerFinalizer {
    loyalty: Arc<dyn LoyaltyLedger>,
}

impl LedgerFinalizer {
    /// Creates a finalizer over a loyalty ledger
    #[must_use]
    pub fn new(loyalty: Arc<dyn LoyaltyLedger>) -> Self {
        Self { loyalty }
    }
}

#[async_trait]
impl OrderFinalizer for LedgerFinalizer {
    async fn finalize(&self, order: &PendingOrder) -> Result<(), CatalogError> {
        let points = order.breakdown.loyalty_points;
        if points > 0 {
            self.loyalty.redeem(order.user_id, points).await?;
        }
        Ok(())
    }
}

/// Collaborators of the coordinator.
#[derive(Clone)]
pub struct CoordinatorEnvironment {
    /// Hold manager
    pub holds: Arc<HoldManager>,
    /// Order store
    pub orders: Arc<dyn OrderRepository>,
    /// Payment gateway adapter
    pub gateway: Arc<dyn PaymentGateway>,
    /// Seat layouts and base prices
    pub seats: Arc<dyn SeatCatalog>,
    /// Combo menu
    pub combos: Arc<dyn ComboMenu>,
    /// Promotion rules
    pub promotions: Arc<dyn PromotionCatalog>,
    /// Loyalty balances
    pub loyalty: Arc<dyn LoyaltyLedger>,
    /// Post-commit bookkeeping
    pub finalizer: Arc<dyn OrderFinalizer>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// Coordinator tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Longest wait for the gateway to create a payment
    pub gateway_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(10),
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Pricing preview input.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRequest {
    /// Showtime
    pub showtime_id: ShowtimeId,
    /// Seats to price
    pub seat_ids: Vec<SeatId>,
    /// Food and drinks
    #[serde(default)]
    pub combos: Vec<ComboLine>,
    /// Promotion code
    #[serde(default)]
    pub promotion_code: Option<String>,
    /// Points to redeem
    #[serde(default)]
    pub loyalty_points: Option<u64>,
    /// Needed to check the loyalty balance
    #[serde(default)]
    pub user_id: Option<UserId>,
}

/// Checkout input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    /// Buyer
    pub user_id: UserId,
    /// Showtime
    pub showtime_id: ShowtimeId,
    /// Must equal the held seats when given
    #[serde(default)]
    pub seat_ids: Option<Vec<SeatId>>,
    /// Overrides the session's combo selection when given
    #[serde(default)]
    pub combos: Option<Vec<ComboLine>>,
    /// Promotion code
    #[serde(default)]
    pub promotion_code: Option<String>,
    /// Points to redeem
    #[serde(default)]
    pub loyalty_points: Option<u64>,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Order/payment coordinator.
pub struct OrderCoordinator {
    env: CoordinatorEnvironment,
    pricing: PricingEngine,
    config: CoordinatorConfig,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl OrderCoordinator {
    /// Creates a coordinator
    #[must_use]
    pub fn new(env: CoordinatorEnvironment, pricing: PricingEngine, config: CoordinatorConfig) -> Self {
        Self {
            env,
            pricing,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Hold manager the coordinator commits and releases through
    #[must_use]
    pub fn holds(&self) -> &Arc<HoldManager> {
        &self.env.holds
    }

    /// Price a selection without creating anything.
    ///
    /// # Errors
    ///
    /// Unknown showtime, seats or combos, and every [`PricingError`].
    pub async fn preview(&self, request: &PreviewRequest) -> Result<PriceBreakdown, OrderError> {
        self.quote(
            request.showtime_id,
            &request.seat_ids,
            &request.combos,
            request.promotion_code.as_deref(),
            request.loyalty_points.unwrap_or(0),
            request.user_id,
            self.env.clock.now(),
        )
        .await
    }

    /// Freeze the user's live session into an order and start payment.
    ///
    /// # Errors
    ///
    /// - [`OrderError::SessionExpired`] without a live session
    /// - [`OrderError::SeatsMismatch`] if `seat_ids` differs from the held seats
    /// - [`OrderError::OrderInProgress`] if the session already has an open order
    /// - pricing errors
    /// - [`OrderError::Gateway`] if the gateway rejects or times out; the
    ///   order is then `failed` and the hold released
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<PendingOrder, OrderError> {
        let now = self.env.clock.now();
        let session = self
            .env
            .holds
            .session(request.user_id, request.showtime_id)
            .await
            .ok_or(OrderError::SessionExpired)?;

        if let Some(requested) = &request.seat_ids {
            let requested_set: BTreeSet<SeatId> = requested.iter().cloned().collect();
            if requested_set != session.seats {
                return Err(OrderError::SeatsMismatch {
                    held: session.seat_list(),
                    requested: requested_set.into_iter().collect(),
                });
            }
        }

        let _session_guard = self.lock(*session.session_id.as_uuid()).await;
        if let Some(open) = self.env.orders.open_for_session(session.session_id).await? {
            return Err(OrderError::OrderInProgress {
                order_id: open.order_id,
            });
        }

        let combos = request.combos.unwrap_or_else(|| session.combos.clone());
        let seat_ids = session.seat_list();
        let breakdown = self
            .quote(
                request.showtime_id,
                &seat_ids,
                &combos,
                request.promotion_code.as_deref(),
                request.loyalty_points.unwrap_or(0),
                Some(request.user_id),
                now,
            )
            .await?;

        let mut order = PendingOrder {
            order_id: OrderId::new(),
            user_id: request.user_id,
            showtime_id: request.showtime_id,
            session_id: session.session_id,
            seat_ids,
            combos: combos.into_iter().filter(|line| line.quantity > 0).collect(),
            breakdown,
            external_ref: None,
            redirect_url: None,
            status: OrderStatus::Created,
            failure_reason: None,
            tickets: Vec::new(),
            created_at: now,
            updated_at: now,
            expires_at: session.expires_at,
        };

        let _order_guard = self.lock(*order.order_id.as_uuid()).await;
        self.env.orders.insert(&order).await?;
        debug!(order_id = %order.order_id, session_id = %order.session_id, total = %order.total(), "Order created");

        match self.start_payment(&order).await {
            Ok(payment) => {
                order.external_ref = Some(payment.external_ref);
                order.redirect_url = Some(payment.redirect_url);
                order.transition(OrderStatus::AwaitingGateway, self.env.clock.now())?;
                self.env.orders.update(&order).await?;
                metrics::record_order_status(order.status.as_str());
                info!(
                    order_id = %order.order_id,
                    user_id = %order.user_id,
                    showtime_id = %order.showtime_id,
                    seats = order.seat_ids.len(),
                    total = %order.total(),
                    "Order awaiting gateway"
                );
                Ok(order)
            }
            Err(error) => {
                order.failure_reason = Some(error.to_string());
                order.transition(OrderStatus::Failed, self.env.clock.now())?;
                self.env.orders.update(&order).await?;
                self.release(&order, ReleaseReason::PaymentFailed).await?;
                metrics::record_order_status(order.status.as_str());
                warn!(order_id = %order.order_id, %error, "Payment creation failed, hold released");
                Err(OrderError::Gateway(error))
            }
        }
    }

    /// Reconcile a gateway callback.
    ///
    /// Repeated callbacks for a terminal order change nothing and report
    /// `duplicate`.
    ///
    /// # Errors
    ///
    /// - [`OrderError::CallbackUnverified`] if the adapter rejects the callback
    /// - [`OrderError::NotFound`] if no order matches `order_ref`
    /// - hold manager or store failures
    pub async fn handle_gateway_callback(
        &self,
        callback: &GatewayCallback,
    ) -> Result<CallbackOutcome, OrderError> {
        if !self.env.gateway.verify_callback(callback) {
            metrics::record_callback("unverified");
            warn!(order_ref = %callback.order_ref, "Rejected unverified gateway callback");
            return Err(OrderError::CallbackUnverified);
        }

        let found = self
            .find_order(&callback.order_ref)
            .await?
            .ok_or_else(|| OrderError::NotFound(callback.order_ref.clone()))?;

        let _guard = self.lock(*found.order_id.as_uuid()).await;
        let mut order = self
            .env
            .orders
            .get(found.order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(callback.order_ref.clone()))?;

        if order.status.is_terminal() {
            metrics::record_callback("duplicate");
            info!(
                order_id = %order.order_id,
                status = %order.status,
                result_code = %callback.result_code,
                "Duplicate gateway callback absorbed"
            );
            return Ok(CallbackOutcome {
                order,
                duplicate: true,
            });
        }

        let now = self.env.clock.now();
        if order.status == OrderStatus::Created {
            warn!(order_id = %order.order_id, "Callback for an order whose payment creation was not recorded");
            order.transition(OrderStatus::AwaitingGateway, now)?;
        }
        if order.external_ref.is_none() {
            order.external_ref.clone_from(&callback.transaction_ref);
        }

        if callback.is_success() {
            self.confirm(&mut order, now).await?;
        } else {
            self.release(&order, ReleaseReason::PaymentFailed).await?;
            order.failure_reason = Some(if callback.message.is_empty() {
                format!("gateway result code {}", callback.result_code)
            } else {
                callback.message.clone()
            });
            order.transition(OrderStatus::Failed, now)?;
            self.env.orders.update(&order).await?;
            metrics::record_callback("failed");
            metrics::record_order_status(order.status.as_str());
            info!(order_id = %order.order_id, result_code = %callback.result_code, "Payment failed, hold released");
        }

        Ok(CallbackOutcome {
            order,
            duplicate: false,
        })
    }

    /// Read-only status for polling clients.
    ///
    /// # Errors
    ///
    /// [`OrderError::NotFound`] for unknown orders.
    pub async fn check_status(&self, order_id: OrderId) -> Result<OrderStatusView, OrderError> {
        self.env
            .orders
            .get(order_id)
            .await?
            .map(|order| order.status_view())
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))
    }

    /// Expire open orders past their deadline and release their holds.
    ///
    /// Returns how many orders were expired.
    ///
    /// # Errors
    ///
    /// Store or hold manager failures.
    pub async fn expire_overdue_orders(&self) -> Result<usize, OrderError> {
        let now = self.env.clock.now();
        let overdue = self.env.orders.list_overdue(now).await?;
        let mut expired = 0;

        for candidate in overdue {
            let _guard = self.lock(*candidate.order_id.as_uuid()).await;
            let Some(mut order) = self.env.orders.get(candidate.order_id).await? else {
                continue;
            };
            if order.status.is_terminal() || order.expires_at > now {
                continue;
            }

            self.release(&order, ReleaseReason::OrderExpired).await?;
            order.failure_reason = Some("gateway timeout".to_string());
            order.transition(OrderStatus::Expired, now)?;
            self.env.orders.update(&order).await?;
            metrics::record_order_status(order.status.as_str());
            info!(order_id = %order.order_id, "Order expired without gateway callback");
            expired += 1;
        }

        self.prune_locks().await;
        Ok(expired)
    }

    async fn confirm(&self, order: &mut PendingOrder, now: DateTime<Utc>) -> Result<(), OrderError> {
        match self
            .env
            .holds
            .commit_session(order.user_id, order.showtime_id, order.session_id)
            .await
        {
            Ok(seats) => {
                order.tickets = seats
                    .into_iter()
                    .map(|seat_id| {
                        Ticket::issue(order.order_id, order.showtime_id, order.user_id, seat_id, now)
                    })
                    .collect();
                order.transition(OrderStatus::Confirmed, now)?;
                self.env.orders.update(order).await?;
                metrics::record_callback("confirmed");
                metrics::record_order_status(order.status.as_str());
                metrics::record_revenue(order.total().amount());
                info!(
                    order_id = %order.order_id,
                    tickets = order.tickets.len(),
                    total = %order.total(),
                    "Order confirmed"
                );

                if let Err(error) = self.env.finalizer.finalize(order).await {
                    warn!(order_id = %order.order_id, %error, "Order finalization failed");
                }
                Ok(())
            }
            Err(HoldError::SessionExpired | HoldError::SessionSuperseded { .. }) => {
                self.release(order, ReleaseReason::OrderExpired).await?;
                order.failure_reason =
                    Some("hold expired before payment confirmation".to_string());
                order.transition(OrderStatus::Expired, now)?;
                self.env.orders.update(order).await?;
                metrics::record_callback("expired");
                metrics::record_order_status(order.status.as_str());
                warn!(
                    order_id = %order.order_id,
                    external_ref = ?order.external_ref,
                    "Payment confirmed after the hold lapsed; order expired and needs a refund"
                );
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn start_payment(&self, order: &PendingOrder) -> Result<GatewaySession, PaymentGatewayError> {
        let request = PaymentRequest {
            order_id: order.order_id,
            amount: order.total(),
            description: format!("{} ticket(s) for showtime {}", order.seat_ids.len(), order.showtime_id),
        };

        let started = Instant::now();
        let result = tokio::time::timeout(
            self.config.gateway_timeout,
            self.env.gateway.create_payment(request),
        )
        .await
        .unwrap_or(Err(PaymentGatewayError::Timeout));
        metrics::record_gateway_duration(started.elapsed().as_secs_f64());
        result
    }

    async fn release(&self, order: &PendingOrder, reason: ReleaseReason) -> Result<(), OrderError> {
        self.env
            .holds
            .release_session_if_current(order.user_id, order.showtime_id, order.session_id, reason)
            .await?;
        Ok(())
    }

    async fn find_order(&self, order_ref: &str) -> Result<Option<PendingOrder>, OrderError> {
        if let Ok(uuid) = order_ref.trim().parse::<Uuid>() {
            if let Some(order) = self.env.orders.get(OrderId::from_uuid(uuid)).await? {
                return Ok(Some(order));
            }
        }
        Ok(self.env.orders.find_by_external_ref(order_ref.trim()).await?)
    }

    #[allow(clippy::too_many_arguments)]
    async fn quote(
        &self,
        showtime_id: ShowtimeId,
        seat_ids: &[SeatId],
        combos: &[ComboLine],
        promotion_code: Option<&str>,
        loyalty_points: u64,
        user_id: Option<UserId>,
        at: DateTime<Utc>,
    ) -> Result<PriceBreakdown, OrderError> {
        let layout = self
            .env
            .seats
            .seat_layout(showtime_id)
            .await?
            .ok_or(OrderError::UnknownShowtime(showtime_id))?;

        let mut seats = Vec::with_capacity(seat_ids.len());
        let mut unknown = Vec::new();
        for seat_id in seat_ids {
            match layout.seat(seat_id) {
                Some(seat) => seats.push(PricedSeat {
                    seat_id: seat_id.clone(),
                    price_offset: layout.price_offset(seat),
                }),
                None => unknown.push(seat_id.clone()),
            }
        }
        if !unknown.is_empty() {
            return Err(HoldError::UnknownSeat { seat_ids: unknown }.into());
        }

        let mut priced_combos = Vec::with_capacity(combos.len());
        for line in combos.iter().filter(|line| line.quantity > 0) {
            let combo = self
                .env
                .combos
                .combo(line.combo_id)
                .await?
                .ok_or(OrderError::UnknownCombo(line.combo_id))?;
            priced_combos.push(PricedCombo {
                combo_id: line.combo_id,
                unit_price: combo.price,
                quantity: line.quantity,
            });
        }

        let promotion = match promotion_code.map(str::trim).filter(|code| !code.is_empty()) {
            Some(code) => Some(self.env.promotions.promotion(code).await?.ok_or_else(|| {
                PricingError::PromotionInvalid {
                    code: code.to_string(),
                    reason: "unknown code".to_string(),
                }
            })?),
            None => None,
        };

        let loyalty = if loyalty_points > 0 {
            let user_id = user_id.ok_or_else(|| PricingError::LoyaltyRedemptionInvalid {
                reason: "a user is required to redeem points".to_string(),
            })?;
            Some(LoyaltyRedemption {
                points: loyalty_points,
                balance: self.env.loyalty.balance(user_id).await?,
            })
        } else {
            None
        };

        let request = PricingRequest {
            base_price: layout.base_price,
            seats,
            combos: priced_combos,
            promotion,
            loyalty,
            at,
        };
        Ok(self.pricing.price(&request)?)
    }

    async fn lock(&self, key: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key).or_default())
        };
        lock.lock_owned().await
    }

    async fn prune_locks(&self) {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::bus::NotificationBus;
    use crate::catalog::{Combo, InMemoryCatalog, InMemoryLoyaltyLedger};
    use crate::holds::HoldPolicy;
    use crate::orders::InMemoryOrderRepository;
    use crate::payment_gateway::MockPaymentGateway;
    use crate::pricing::{DiscountRule, LoyaltyPolicy, Promotion, PromotionScope};
    use marquee_core::types::{ComboId, Money};
    use marquee_testing::{cinema_layout, ManualClock};

    struct Fixture {
        coordinator: OrderCoordinator,
        showtime: ShowtimeId,
        combo: ComboId,
        loyalty: Arc<InMemoryLoyaltyLedger>,
    }

    async fn fixture() -> Fixture {
        let showtime = ShowtimeId::new();
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.put_layout(cinema_layout(showtime, 2, 5)).await;
        let combo = ComboId::new();
        catalog
            .put_combo(Combo {
                combo_id: combo,
                name: "Popcorn".to_string(),
                price: Money::new(50_000),
            })
            .await;
        catalog
            .put_promotion(Promotion {
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
            })
            .await;
        let loyalty = Arc::new(InMemoryLoyaltyLedger::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let holds = Arc::new(HoldManager::new(
            catalog.clone(),
            NotificationBus::default(),
            Arc::clone(&clock),
            HoldPolicy::default(),
        ));

        let env = CoordinatorEnvironment {
            holds,
            orders: Arc::new(InMemoryOrderRepository::new()),
            gateway: Arc::new(MockPaymentGateway::default()),
            seats: catalog.clone(),
            combos: catalog.clone(),
            promotions: catalog,
            loyalty: loyalty.clone(),
            finalizer: Arc::new(LedgerFinalizer::new(loyalty.clone())),
            clock,
        };
        Fixture {
            coordinator: OrderCoordinator::new(
                env,
                PricingEngine::new(LoyaltyPolicy::default()),
                CoordinatorConfig::default(),
            ),
            showtime,
            combo,
            loyalty,
        }
    }

    fn seats(labels: &[&str]) -> Vec<SeatId> {
        labels.iter().map(|label| SeatId::parse(label).unwrap()).collect()
    }

    fn callback(order_id: OrderId, result_code: &str) -> GatewayCallback {
        GatewayCallback {
            order_ref: order_id.to_string(),
            result_code: result_code.to_string(),
            message: String::new(),
            transaction_ref: None,
            signature: None,
        }
    }

    fn order_request(user_id: UserId, showtime_id: ShowtimeId) -> CreateOrderRequest {
        CreateOrderRequest {
            user_id,
            showtime_id,
            seat_ids: None,
            combos: None,
            promotion_code: None,
            loyalty_points: None,
        }
    }

    #[tokio::test]
    async fn preview_applies_capped_promotion() {
        let f = fixture().await;
        let breakdown = f
            .coordinator
            .preview(&PreviewRequest {
                showtime_id: f.showtime,
                seat_ids: seats(&["A1", "A2"]),
                promotion_code: Some("tenoff".to_string()),
                ..PreviewRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(breakdown.ticket_subtotal, Money::new(200_000));
        assert_eq!(breakdown.discount, Money::new(15_000));
        assert_eq!(breakdown.total, Money::new(185_000));
    }

    #[tokio::test]
    async fn preview_rejects_unknown_combo_and_code() {
        let f = fixture().await;
        let unknown_combo = f
            .coordinator
            .preview(&PreviewRequest {
                showtime_id: f.showtime,
                seat_ids: seats(&["A1"]),
                combos: vec![ComboLine { combo_id: ComboId::new(), quantity: 1 }],
                ..PreviewRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(unknown_combo, OrderError::UnknownCombo(_)));

        let unknown_code = f
            .coordinator
            .preview(&PreviewRequest {
                showtime_id: f.showtime,
                seat_ids: seats(&["A1"]),
                promotion_code: Some("NOPE".to_string()),
                ..PreviewRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(unknown_code, OrderError::Pricing(PricingError::PromotionInvalid { .. })));
    }

    #[tokio::test]
    async fn order_freezes_session_combos_and_awaits_gateway() {
        let f = fixture().await;
        let user = UserId::new();
        let holds = f.coordinator.holds();
        holds.claim_seats(user, f.showtime, seats(&["A1", "A2"])).await.unwrap();
        holds
            .select_combos(user, f.showtime, vec![ComboLine { combo_id: f.combo, quantity: 2 }])
            .await
            .unwrap();

        let order = f.coordinator.create_order(order_request(user, f.showtime)).await.unwrap();

        assert_eq!(order.status, OrderStatus::AwaitingGateway);
        assert_eq!(order.breakdown.food_subtotal, Money::new(100_000));
        assert_eq!(order.total(), Money::new(300_000));
        assert!(order.redirect_url.is_some());
        assert!(order.external_ref.as_deref().unwrap().starts_with("mock_txn_"));
    }

    #[tokio::test]
    async fn second_order_for_same_session_is_in_progress() {
        let f = fixture().await;
        let user = UserId::new();
        f.coordinator.holds().claim_seats(user, f.showtime, seats(&["A1"])).await.unwrap();

        let first = f.coordinator.create_order(order_request(user, f.showtime)).await.unwrap();
        let err = f.coordinator.create_order(order_request(user, f.showtime)).await.unwrap_err();

        assert_eq!(err, OrderError::OrderInProgress { order_id: first.order_id });
    }

    #[tokio::test]
    async fn mismatched_seats_are_rejected() {
        let f = fixture().await;
        let user = UserId::new();
        f.coordinator.holds().claim_seats(user, f.showtime, seats(&["A1", "A2"])).await.unwrap();

        let mut request = order_request(user, f.showtime);
        request.seat_ids = Some(seats(&["A1"]));
        assert!(matches!(
            f.coordinator.create_order(request).await,
            Err(OrderError::SeatsMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn success_callback_confirms_and_redeems_points() {
        let f = fixture().await;
        let user = UserId::new();
        f.loyalty.set_balance(user, 100).await;
        f.coordinator.holds().claim_seats(user, f.showtime, seats(&["A1", "A2"])).await.unwrap();

        let mut request = order_request(user, f.showtime);
        request.loyalty_points = Some(20);
        let order = f.coordinator.create_order(request).await.unwrap();
        assert_eq!(order.breakdown.loyalty_discount, Money::new(20_000));

        let outcome = f
            .coordinator
            .handle_gateway_callback(&callback(order.order_id, "0"))
            .await
            .unwrap();

        assert!(!outcome.duplicate);
        assert_eq!(outcome.order.status, OrderStatus::Confirmed);
        assert_eq!(outcome.order.tickets.len(), 2);
        assert_eq!(f.loyalty.balance(user).await.unwrap(), 80);
        assert!(f.coordinator.holds().session(user, f.showtime).await.is_none());
    }

    #[tokio::test]
    async fn callback_resolves_by_external_reference() {
        let f = fixture().await;
        let user = UserId::new();
        f.coordinator.holds().claim_seats(user, f.showtime, seats(&["B1"])).await.unwrap();
        let order = f.coordinator.create_order(order_request(user, f.showtime)).await.unwrap();

        let mut by_ref = callback(order.order_id, "24");
        by_ref.order_ref = order.external_ref.clone().unwrap();
        by_ref.message = "Cancelled by customer".to_string();
        let outcome = f.coordinator.handle_gateway_callback(&by_ref).await.unwrap();

        assert_eq!(outcome.order.status, OrderStatus::Failed);
        assert_eq!(outcome.order.failure_reason.as_deref(), Some("Cancelled by customer"));
        assert!(f.coordinator.holds().session(user, f.showtime).await.is_none());
    }

    #[tokio::test]
    async fn unknown_order_reference_is_not_found() {
        let f = fixture().await;
        let err = f
            .coordinator
            .handle_gateway_callback(&callback(OrderId::new(), "0"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::NotFound(_)));
    }
}
