//! Engine wiring.
//!
//! Builds the hold manager, coordinator and bus from [`Config`], with the
//! catalog taken from a seed document (or built-in demo data) and orders
//! stored in memory or `PostgreSQL`.

use crate::config::{Config, OrderStoreKind};
use crate::persistence::{self, PostgresOrderRepository};
use crate::server::state::{AppState, WebSocketSettings};
use anyhow::Context;
use marquee_core::environment::{Clock, SystemClock};
use marquee_core::types::{ComboId, InvalidSeatId, Money, Seat, SeatId, SeatLayout, SeatType, ShowtimeId};
use marquee_engine::catalog::{CatalogSeed, Combo, InMemoryCatalog, InMemoryLoyaltyLedger};
use marquee_engine::orders::{
    CoordinatorEnvironment, InMemoryOrderRepository, LedgerFinalizer, OrderRepository,
};
use marquee_engine::pricing::{DiscountRule, Promotion, PromotionScope};
use marquee_engine::{
    ExpirySweeper, HoldManager, MockPaymentGateway, NotificationBus, OrderCoordinator,
    PaymentGateway, PricingEngine,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Showtime of the built-in demo catalog
pub const DEMO_SHOWTIME_ID: ShowtimeId =
    ShowtimeId::from_uuid(Uuid::from_u128(0x0192_5a3c_0000_7000_8000_0000_0000_0001));

/// Second, smaller showtime of the demo catalog
pub const DEMO_LATE_SHOWTIME_ID: ShowtimeId =
    ShowtimeId::from_uuid(Uuid::from_u128(0x0192_5a3c_0000_7000_8000_0000_0000_0002));

/// Running engine components.
pub struct Services {
    /// Seat holds
    pub holds: Arc<HoldManager>,
    /// Orders
    pub coordinator: Arc<OrderCoordinator>,
    /// Notifications
    pub bus: NotificationBus,
    /// Seat layouts, combos and promotions
    pub catalog: Arc<InMemoryCatalog>,
    /// Loyalty balances
    pub loyalty: Arc<InMemoryLoyaltyLedger>,
    /// Order database when `ORDER_STORE=postgres`
    pub database: Option<PgPool>,
}

impl Services {
    /// Build everything the configuration asks for.
    ///
    /// # Errors
    ///
    /// Returns error if the seed file cannot be read or parsed, or the order
    /// database cannot be reached or migrated.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let seed = load_seed(config.catalog_seed_path.as_deref())?;

        let (orders, database): (Arc<dyn OrderRepository>, Option<PgPool>) =
            match config.orders.kind {
                OrderStoreKind::Memory => {
                    info!("Storing orders in memory");
                    (Arc::new(InMemoryOrderRepository::new()), None)
                }
                OrderStoreKind::Postgres => {
                    let pool = persistence::connect(&config.orders).await?;
                    (
                        Arc::new(PostgresOrderRepository::new(pool.clone())),
                        Some(pool),
                    )
                }
            };

        let gateway = MockPaymentGateway::shared(config.gateway.redirect_base_url.clone());
        Ok(Self::assemble(
            config,
            &seed,
            orders,
            gateway,
            Arc::new(SystemClock),
            database,
        ))
    }

    /// Build from explicit collaborators.
    #[must_use]
    pub fn assemble(
        config: &Config,
        seed: &CatalogSeed,
        orders: Arc<dyn OrderRepository>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        database: Option<PgPool>,
    ) -> Self {
        let catalog = Arc::new(InMemoryCatalog::from_seed(seed));
        let loyalty = Arc::new(InMemoryLoyaltyLedger::from_seed(seed));
        let bus = NotificationBus::new(config.holds.bus_channel_capacity);

        let holds = Arc::new(HoldManager::new(
            catalog.clone(),
            bus.clone(),
            Arc::clone(&clock),
            config.hold_policy(),
        ));

        let env = CoordinatorEnvironment {
            holds: Arc::clone(&holds),
            orders,
            gateway,
            seats: catalog.clone(),
            combos: catalog.clone(),
            promotions: catalog.clone(),
            loyalty: loyalty.clone(),
            finalizer: Arc::new(LedgerFinalizer::new(loyalty.clone())),
            clock,
        };
        let coordinator = Arc::new(OrderCoordinator::new(
            env,
            PricingEngine::new(config.loyalty_policy()),
            config.coordinator_config(),
        ));

        info!(
            showtimes = seed.showtimes.len(),
            combos = seed.combos.len(),
            promotions = seed.promotions.len(),
            "Engine assembled"
        );

        Self {
            holds,
            coordinator,
            bus,
            catalog,
            loyalty,
            database,
        }
    }

    /// Handler state
    #[must_use]
    pub fn app_state(&self, config: &Config) -> AppState {
        AppState::new(
            Arc::clone(&self.holds),
            Arc::clone(&self.coordinator),
            self.bus.clone(),
            self.database.clone(),
            WebSocketSettings::from(&config.websocket),
        )
    }

    /// Background expiry sweeper
    #[must_use]
    pub fn sweeper(&self, config: &Config) -> ExpirySweeper {
        ExpirySweeper::new(
            Arc::clone(&self.holds),
            Arc::clone(&self.coordinator),
            self.bus.clone(),
            config.sweep_interval(),
        )
    }
}

/// Read a JSON seed document, or fall back to the demo catalog.
///
/// # Errors
///
/// Returns error if the file cannot be read or is not a valid seed.
pub fn load_seed(path: Option<&str>) -> anyhow::Result<CatalogSeed> {
    let Some(path) = path else {
        info!(showtime_id = %DEMO_SHOWTIME_ID, "No catalog seed configured, using demo data");
        return demo_seed().context("Failed to build demo catalog");
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog seed {path}"))?;
    let seed: CatalogSeed = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse catalog seed {path}"))?;
    info!(path, showtimes = seed.showtimes.len(), "Catalog seed loaded");
    Ok(seed)
}

fn room(
    showtime_id: ShowtimeId,
    name: &str,
    rows: &[&str],
    per_row: u16,
    base_price: Money,
) -> Result<SeatLayout, InvalidSeatId> {
    let vip_row = rows.last().copied();
    let mut seats = Vec::with_capacity(rows.len() * usize::from(per_row));
    for row in rows {
        for number in 1..=per_row {
            seats.push(Seat {
                seat_id: SeatId::parse(&format!("{row}{number}"))?,
                row: (*row).to_string(),
                number,
                seat_type: (Some(*row) == vip_row).then(|| "VIP".to_string()),
                enabled: true,
            });
        }
    }

    Ok(SeatLayout {
        showtime_id,
        room: name.to_string(),
        base_price,
        seats,
        seat_types: vec![SeatType {
            code: "VIP".to_string(),
            name: "VIP".to_string(),
            price_offset: Money::new(30_000),
        }],
    })
}

/// Built-in catalog for local runs.
///
/// Two showtimes (rows A-H and A-E, back row VIP), two combos and two
/// promotions: `TENOFF` (10% of the bill, at most 15000) and `SNACK20`
/// (20000 off food from 50000).
///
/// # Errors
///
/// Never in practice; seat labels are generated.
pub fn demo_seed() -> Result<CatalogSeed, InvalidSeatId> {
    let rows = ["A", "B", "C", "D", "E", "F", "G", "H"];
    Ok(CatalogSeed {
        showtimes: vec![
            room(DEMO_SHOWTIME_ID, "Room 1", &rows, 12, Money::new(90_000))?,
            room(DEMO_LATE_SHOWTIME_ID, "Room 2", &rows[..5], 10, Money::new(75_000))?,
        ],
        combos: vec![
            Combo {
                combo_id: ComboId::from_uuid(Uuid::from_u128(0x0192_5a3c_0000_7000_8000_0000_0000_0101)),
                name: "Popcorn + Drink".to_string(),
                price: Money::new(65_000),
            },
            Combo {
                combo_id: ComboId::from_uuid(Uuid::from_u128(0x0192_5a3c_0000_7000_8000_0000_0000_0102)),
                name: "Nachos".to_string(),
                price: Money::new(55_000),
            },
        ],
        promotions: vec![
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
            },
            Promotion {
                code: "SNACK20".to_string(),
                scope: PromotionScope::Food,
                rule: DiscountRule::Fixed {
                    amount: Money::new(20_000),
                },
                min_order_amount: Money::new(50_000),
                active: true,
                starts_at: None,
                ends_at: None,
            },
        ],
        loyalty: Vec::new(),
    })
}
