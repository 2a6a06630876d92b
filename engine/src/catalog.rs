//! External collaborators consulted by the engine.
//!
//! The seat catalog, combo menu, promotion catalog and loyalty ledger are
//! owned by the surrounding CRUD platform. The engine only reads them, except
//! for the loyalty decrement that runs after a successful commit.
//!
//! In-memory implementations back tests and the demo server; they can be
//! populated from a [`CatalogSeed`] JSON document.

use crate::pricing::Promotion;
use async_trait::async_trait;
use marquee_core::types::{ComboId, Money, SeatId, SeatLayout, ShowtimeId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Collaborator failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Backing service unreachable or failed
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    /// Loyalty decrement exceeds the balance
    #[error("user {user_id} has {balance} points, cannot redeem {requested}")]
    InsufficientPoints {
        /// User
        user_id: UserId,
        /// Current balance
        balance: u64,
        /// Requested decrement
        requested: u64,
    },
}

/// A food and drink item on the menu.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combo {
    /// Identifier
    pub combo_id: ComboId,
    /// Display name
    pub name: String,
    /// Unit price
    pub price: Money,
}

/// Source of seat layout snapshots.
#[async_trait]
pub trait SeatCatalog: Send + Sync {
    /// Layout and prices for a showtime, `None` if the showtime is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Unavailable`] when the catalog cannot be read.
    async fn seat_layout(&self, showtime_id: ShowtimeId) -> Result<Option<SeatLayout>, CatalogError>;
}

/// Source of combo prices.
#[async_trait]
pub trait ComboMenu: Send + Sync {
    /// Look up a combo.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Unavailable`] when the menu cannot be read.
    async fn combo(&self, combo_id: ComboId) -> Result<Option<Combo>, CatalogError>;
}

/// Source of promotion rules.
#[async_trait]
pub trait PromotionCatalog: Send + Sync {
    /// Look up a promotion by code (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Unavailable`] when the catalog cannot be read.
    async fn promotion(&self, code: &str) -> Result<Option<Promotion>, CatalogError>;
}

/// Loyalty point balances.
#[async_trait]
pub trait LoyaltyLedger: Send + Sync {
    /// Current balance of a user.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Unavailable`] when the ledger cannot be read.
    async fn balance(&self, user_id: UserId) -> Result<u64, CatalogError>;

    /// Decrement a balance.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InsufficientPoints`] when the balance is too
    /// small, or [`CatalogError::Unavailable`] on infrastructure failure.
    async fn redeem(&self, user_id: UserId, points: u64) -> Result<(), CatalogError>;
}

// ============================================================================
// Seed document
// ============================================================================

/// Loyalty balance entry of a seed document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyBalance {
    /// User
    pub user_id: UserId,
    /// Points
    pub points: u64,
}

/// Reference data used to populate the in-memory collaborators.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSeed {
    /// Showtime layouts
    pub showtimes: Vec<SeatLayout>,
    /// Menu
    pub combos: Vec<Combo>,
    /// Promotions
    pub promotions: Vec<Promotion>,
    /// Loyalty balances
    pub loyalty: Vec<LoyaltyBalance>,
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// In-memory seat catalog, combo menu and promotion catalog.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    layouts: RwLock<HashMap<ShowtimeId, SeatLayout>>,
    combos: RwLock<HashMap<ComboId, Combo>>,
    promotions: RwLock<HashMap<String, Promotion>>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog from a seed document
    #[must_use]
    pub fn from_seed(seed: &CatalogSeed) -> Self {
        Self {
            layouts: RwLock::new(
                seed.showtimes
                    .iter()
                    .map(|layout| (layout.showtime_id, layout.clone()))
                    .collect(),
            ),
            combos: RwLock::new(
                seed.combos
                    .iter()
                    .map(|combo| (combo.combo_id, combo.clone()))
                    .collect(),
            ),
            promotions: RwLock::new(
                seed.promotions
                    .iter()
                    .map(|promotion| (promotion.code.to_uppercase(), promotion.clone()))
                    .collect(),
            ),
        }
    }

    /// Insert or replace a showtime layout
    pub async fn put_layout(&self, layout: SeatLayout) {
        self.layouts.write().await.insert(layout.showtime_id, layout);
    }

    /// Enable or disable a seat; returns `false` if the seat is unknown
    pub async fn set_seat_enabled(
        &self,
        showtime_id: ShowtimeId,
        seat_id: &SeatId,
        enabled: bool,
    ) -> bool {
        let mut layouts = self.layouts.write().await;
        let Some(seat) = layouts
            .get_mut(&showtime_id)
            .and_then(|layout| layout.seats.iter_mut().find(|seat| &seat.seat_id == seat_id))
        else {
            return false;
        };
        seat.enabled = enabled;
        true
    }

    /// Insert or replace a combo
    pub async fn put_combo(&self, combo: Combo) {
        self.combos.write().await.insert(combo.combo_id, combo);
    }

    /// Insert or replace a promotion
    pub async fn put_promotion(&self, promotion: Promotion) {
        self.promotions
            .write()
            .await
            .insert(promotion.code.to_uppercase(), promotion);
    }
}

#[async_trait]
impl SeatCatalog for InMemoryCatalog {
    async fn seat_layout(&self, showtime_id: ShowtimeId) -> Result<Option<SeatLayout>, CatalogError> {
        Ok(self.layouts.read().await.get(&showtime_id).cloned())
    }
}

#[async_trait]
impl ComboMenu for InMemoryCatalog {
    async fn combo(&self, combo_id: ComboId) -> Result<Option<Combo>, CatalogError> {
        Ok(self.combos.read().await.get(&combo_id).cloned())
    }
}

#[async_trait]
impl PromotionCatalog for InMemoryCatalog {
    async fn promotion(&self, code: &str) -> Result<Option<Promotion>, CatalogError> {
        Ok(self
            .promotions
            .read()
            .await
            .get(&code.trim().to_uppercase())
            .cloned())
    }
}

/// In-memory loyalty ledger.
#[derive(Debug, Default)]
pub struct InMemoryLoyaltyLedger {
    balances: RwLock<HashMap<UserId, u64>>,
}

impl InMemoryLoyaltyLedger {
    /// Creates an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger from a seed document
    #[must_use]
    pub fn from_seed(seed: &CatalogSeed) -> Self {
        Self {
            balances: RwLock::new(
                seed.loyalty
                    .iter()
                    .map(|entry| (entry.user_id, entry.points))
                    .collect(),
            ),
        }
    }

    /// Set a balance
    pub async fn set_balance(&self, user_id: UserId, points: u64) {
        self.balances.write().await.insert(user_id, points);
    }
}

#[async_trait]
impl LoyaltyLedger for InMemoryLoyaltyLedger {
    async fn balance(&self, user_id: UserId) -> Result<u64, CatalogError> {
        Ok(self.balances.read().await.get(&user_id).copied().unwrap_or(0))
    }

    async fn redeem(&self, user_id: UserId, points: u64) -> Result<(), CatalogError> {
        let mut balances = self.balances.write().await;
        let balance = balances.entry(user_id).or_insert(0);
        if *balance < points {
            return Err(CatalogError::InsufficientPoints {
                user_id,
                balance: *balance,
                requested: points,
            });
        }
        *balance -= points;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pricing::{DiscountRule, PromotionScope};

    #[tokio::test]
    async fn promotion_lookup_ignores_case() {
        let catalog = InMemoryCatalog::new();
        catalog
            .put_promotion(Promotion {
                code: "Summer".to_string(),
                scope: PromotionScope::TotalBill,
                rule: DiscountRule::Fixed {
                    amount: Money::new(10_000),
                },
                min_order_amount: Money::ZERO,
                active: true,
                starts_at: None,
                ends_at: None,
            })
            .await;

        assert!(catalog.promotion(" summer ").await.unwrap().is_some());
        assert!(catalog.promotion("winter").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn redeem_rejects_overdraft() {
        let ledger = InMemoryLoyaltyLedger::new();
        let user = UserId::new();
        ledger.set_balance(user, 30).await;

        ledger.redeem(user, 20).await.unwrap();
        assert_eq!(ledger.balance(user).await.unwrap(), 10);
        assert!(matches!(
            ledger.redeem(user, 20).await,
            Err(CatalogError::InsufficientPoints { balance: 10, .. })
        ));
    }

    #[test]
    fn seed_document_parses_with_missing_sections() {
        let seed: CatalogSeed = serde_json::from_str(r#"{"combos": []}"#).unwrap();
        assert!(seed.showtimes.is_empty());
        assert!(seed.loyalty.is_empty());
    }
}
