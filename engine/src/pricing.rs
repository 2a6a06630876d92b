//! Pricing engine.
//!
//! One pure function turns a resolved selection into a [`PriceBreakdown`]:
//!
//! ```text
//! ticket_subtotal = Σ (base_price + seat_type.price_offset)
//! food_subtotal   = Σ (combo.price × quantity)
//! discount        = promotion applied to its scope (ticket, food or both)
//! loyalty         = points × point_value, at most half of ticket + food
//! total           = max(0, ticket + food − discount − loyalty)
//! ```
//!
//! The same function prices the client preview and the frozen order snapshot,
//! so the amount a user is shown is the amount sent to the gateway.

use chrono::{DateTime, Utc};
use marquee_core::error::ErrorCode;
use marquee_core::types::{ComboId, Money, SeatId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Promotions and loyalty
// ============================================================================

/// Which subtotal a promotion discounts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionScope {
    /// Tickets only
    Ticket,
    /// Food and drinks only
    Food,
    /// Tickets plus food
    TotalBill,
}

/// How a promotion computes its discount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscountRule {
    /// Whole-number percentage with an optional cap
    Percentage {
        /// 1..=100
        percent: u8,
        /// Upper bound on the discount
        max_discount: Option<Money>,
    },
    /// Flat amount, never more than the eligible subtotal
    Fixed {
        /// Discount amount
        amount: Money,
    },
}

/// Promotion reference data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    /// Code typed by the customer
    pub code: String,
    /// Subtotal the rule applies to
    pub scope: PromotionScope,
    /// Discount rule
    pub rule: DiscountRule,
    /// Eligible subtotal must be at least this much
    pub min_order_amount: Money,
    /// Switched off promotions are rejected
    pub active: bool,
    /// Not valid before
    pub starts_at: Option<DateTime<Utc>>,
    /// Not valid at or after
    pub ends_at: Option<DateTime<Utc>>,
}

impl Promotion {
    fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.active
            && self.starts_at.is_none_or(|start| at >= start)
            && self.ends_at.is_none_or(|end| at < end)
    }
}

/// Conversion rules for loyalty points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyPolicy {
    /// Money value of one point
    pub point_value: Money,
    /// Smallest redeemable number of points
    pub min_redeem_points: u64,
}

impl Default for LoyaltyPolicy {
    fn default() -> Self {
        Self {
            point_value: Money::new(1_000),
            min_redeem_points: 20,
        }
    }
}

/// Points a user wants to spend, with the balance they have.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyRedemption {
    /// Points to spend
    pub points: u64,
    /// Current balance
    pub balance: u64,
}

// ============================================================================
// Request and result
// ============================================================================

/// A seat with its resolved price offset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedSeat {
    /// Seat
    pub seat_id: SeatId,
    /// Seat-type offset, `None` when the seat has no matching type
    pub price_offset: Option<Money>,
}

/// A combo line with its resolved unit price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedCombo {
    /// Combo
    pub combo_id: ComboId,
    /// Menu price
    pub unit_price: Money,
    /// Quantity ordered
    pub quantity: u32,
}

/// Fully resolved pricing input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRequest {
    /// Showtime base ticket price
    pub base_price: Money,
    /// Seats being bought
    pub seats: Vec<PricedSeat>,
    /// Food and drinks
    pub combos: Vec<PricedCombo>,
    /// At most one promotion
    pub promotion: Option<Promotion>,
    /// Optional loyalty redemption
    pub loyalty: Option<LoyaltyRedemption>,
    /// Instant used to check promotion validity
    pub at: DateTime<Utc>,
}

/// Priced line for one seat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatLine {
    /// Seat
    pub seat_id: SeatId,
    /// Base price plus offset
    pub price: Money,
}

/// Priced line for one combo.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComboLineTotal {
    /// Combo
    pub combo_id: ComboId,
    /// Quantity
    pub quantity: u32,
    /// Unit price × quantity
    pub amount: Money,
}

/// Output of the pricing engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    /// Sum of seat prices
    pub ticket_subtotal: Money,
    /// Sum of combo lines
    pub food_subtotal: Money,
    /// Promotion discount
    pub discount: Money,
    /// Loyalty discount
    pub loyalty_discount: Money,
    /// Amount to charge
    pub total: Money,
    /// Applied promotion code
    pub promotion_code: Option<String>,
    /// Points redeemed
    pub loyalty_points: u64,
    /// Per-seat prices
    pub seats: Vec<SeatLine>,
    /// Per-combo amounts
    pub combos: Vec<ComboLineTotal>,
}

/// Pricing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    /// Promotion cannot be applied
    #[error("promotion {code} is not applicable: {reason}")]
    PromotionInvalid {
        /// Code that was rejected
        code: String,
        /// Why
        reason: String,
    },
    /// Loyalty redemption rejected
    #[error("loyalty redemption rejected: {reason}")]
    LoyaltyRedemptionInvalid {
        /// Why
        reason: String,
    },
    /// A price sum did not fit in the money type
    #[error("price overflow")]
    Overflow,
}

impl PricingError {
    /// Client-visible code
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::PromotionInvalid { .. } => ErrorCode::PromotionInvalid,
            Self::LoyaltyRedemptionInvalid { .. } => ErrorCode::LoyaltyRedemptionInvalid,
            Self::Overflow => ErrorCode::ValidationError,
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Stateless pricing engine parameterised by the loyalty policy.
#[derive(Clone, Copy, Debug, Default)]
pub struct PricingEngine {
    loyalty: LoyaltyPolicy,
}

impl PricingEngine {
    /// Creates an engine with the given loyalty policy
    #[must_use]
    pub const fn new(loyalty: LoyaltyPolicy) -> Self {
        Self { loyalty }
    }

    /// Loyalty policy in use
    #[must_use]
    pub const fn loyalty_policy(&self) -> LoyaltyPolicy {
        self.loyalty
    }

    /// Price a resolved selection.
    ///
    /// # Errors
    ///
    /// - [`PricingError::PromotionInvalid`] when the promotion is inactive,
    ///   outside its window, or its eligible subtotal is below the minimum
    /// - [`PricingError::LoyaltyRedemptionInvalid`] when the points are below
    ///   the minimum, above the balance or worth more than half of
    ///   ticket + food
    /// - [`PricingError::Overflow`] when sums overflow
    pub fn price(&self, request: &PricingRequest) -> Result<PriceBreakdown, PricingError> {
        let seats = request
            .seats
            .iter()
            .map(|seat| {
                let price = match seat.price_offset {
                    Some(offset) => request.base_price.checked_add(offset),
                    None => Some(request.base_price),
                };
                price
                    .map(|price| SeatLine {
                        seat_id: seat.seat_id.clone(),
                        price,
                    })
                    .ok_or(PricingError::Overflow)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let combos = request
            .combos
            .iter()
            .filter(|combo| combo.quantity > 0)
            .map(|combo| {
                combo
                    .unit_price
                    .checked_mul(u64::from(combo.quantity))
                    .map(|amount| ComboLineTotal {
                        combo_id: combo.combo_id,
                        quantity: combo.quantity,
                        amount,
                    })
                    .ok_or(PricingError::Overflow)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let ticket_subtotal =
            Money::checked_sum(seats.iter().map(|line| line.price)).ok_or(PricingError::Overflow)?;
        let food_subtotal = Money::checked_sum(combos.iter().map(|line| line.amount))
            .ok_or(PricingError::Overflow)?;
        let gross = ticket_subtotal
            .checked_add(food_subtotal)
            .ok_or(PricingError::Overflow)?;

        let discount = match &request.promotion {
            Some(promotion) => {
                Self::promotion_discount(promotion, ticket_subtotal, food_subtotal, gross, request.at)?
            }
            None => Money::ZERO,
        };

        let (loyalty_points, loyalty_discount) = match request.loyalty {
            Some(redemption) if redemption.points > 0 => {
                (redemption.points, self.loyalty_discount(redemption, gross)?)
            }
            _ => (0, Money::ZERO),
        };

        let total = gross.saturating_sub(discount).saturating_sub(loyalty_discount);

        Ok(PriceBreakdown {
            ticket_subtotal,
            food_subtotal,
            discount,
            loyalty_discount,
            total,
            promotion_code: request.promotion.as_ref().map(|p| p.code.clone()),
            loyalty_points,
            seats,
            combos,
        })
    }

    fn promotion_discount(
        promotion: &Promotion,
        ticket: Money,
        food: Money,
        gross: Money,
        at: DateTime<Utc>,
    ) -> Result<Money, PricingError> {
        let invalid = |reason: String| PricingError::PromotionInvalid {
            code: promotion.code.clone(),
            reason,
        };

        if !promotion.is_valid_at(at) {
            return Err(invalid("promotion is not active".to_string()));
        }

        let eligible = match promotion.scope {
            PromotionScope::Ticket => ticket,
            PromotionScope::Food => food,
            PromotionScope::TotalBill => gross,
        };

        if eligible < promotion.min_order_amount {
            return Err(invalid(format!(
                "order amount {eligible} is below the minimum {}",
                promotion.min_order_amount
            )));
        }

        let discount = match promotion.rule {
            DiscountRule::Percentage { percent, max_discount } => {
                if percent == 0 || percent > 100 {
                    return Err(invalid(format!("percentage {percent} out of range")));
                }
                let raw = eligible.percent(percent);
                max_discount.map_or(raw, |cap| raw.min(cap))
            }
            DiscountRule::Fixed { amount } => amount.min(eligible),
        };

        Ok(discount)
    }

    fn loyalty_discount(
        &self,
        redemption: LoyaltyRedemption,
        gross: Money,
    ) -> Result<Money, PricingError> {
        let invalid = |reason: String| PricingError::LoyaltyRedemptionInvalid { reason };

        if redemption.points < self.loyalty.min_redeem_points {
            return Err(invalid(format!(
                "at least {} points must be redeemed",
                self.loyalty.min_redeem_points
            )));
        }
        if redemption.points > redemption.balance {
            return Err(invalid(format!(
                "balance is {} points, {} requested",
                redemption.balance, redemption.points
            )));
        }

        let value = self
            .loyalty
            .point_value
            .checked_mul(redemption.points)
            .ok_or(PricingError::Overflow)?;
        let cap = gross.half();
        if value > cap {
            return Err(invalid(format!(
                "points are worth {value}, more than half of the order ({cap})"
            )));
        }

        Ok(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn seat(label: &str, offset: Option<u64>) -> PricedSeat {
        PricedSeat {
            seat_id: SeatId::parse(label).unwrap(),
            price_offset: offset.map(Money::new),
        }
    }

    fn request(seats: Vec<PricedSeat>) -> PricingRequest {
        PricingRequest {
            base_price: Money::new(100_000),
            seats,
            combos: Vec::new(),
            promotion: None,
            loyalty: None,
            at: Utc::now(),
        }
    }

    fn ten_percent_tickets() -> Promotion {
        Promotion {
            code: "MOVIE10".to_string(),
            scope: PromotionScope::Ticket,
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

    #[test]
    fn seat_price_adds_offset() {
        let breakdown = PricingEngine::default()
            .price(&request(vec![seat("A1", Some(20_000)), seat("A2", None)]))
            .unwrap();
        assert_eq!(breakdown.seats[0].price, Money::new(120_000));
        assert_eq!(breakdown.seats[1].price, Money::new(100_000));
        assert_eq!(breakdown.ticket_subtotal, Money::new(220_000));
        assert_eq!(breakdown.total, Money::new(220_000));
    }

    #[test]
    fn percentage_promotion_is_capped() {
        let mut req = request(vec![seat("A1", None), seat("A2", None)]);
        req.promotion = Some(ten_percent_tickets());

        let breakdown = PricingEngine::default().price(&req).unwrap();
        assert_eq!(breakdown.ticket_subtotal, Money::new(200_000));
        assert_eq!(breakdown.discount, Money::new(15_000));
        assert_eq!(breakdown.total, Money::new(185_000));
        assert_eq!(breakdown.promotion_code.as_deref(), Some("MOVIE10"));
    }

    #[test]
    fn food_scope_ignores_tickets() {
        let mut req = request(vec![seat("A1", None)]);
        req.combos = vec![PricedCombo {
            combo_id: ComboId::new(),
            unit_price: Money::new(60_000),
            quantity: 2,
        }];
        req.promotion = Some(Promotion {
            scope: PromotionScope::Food,
            rule: DiscountRule::Percentage {
                percent: 50,
                max_discount: None,
            },
            ..ten_percent_tickets()
        });

        let breakdown = PricingEngine::default().price(&req).unwrap();
        assert_eq!(breakdown.food_subtotal, Money::new(120_000));
        assert_eq!(breakdown.discount, Money::new(60_000));
        assert_eq!(breakdown.total, Money::new(160_000));
    }

    #[test]
    fn minimum_order_rejects_instead_of_clamping() {
        let mut req = request(vec![seat("A1", None)]);
        req.promotion = Some(Promotion {
            min_order_amount: Money::new(150_000),
            ..ten_percent_tickets()
        });

        let err = PricingEngine::default().price(&req).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PromotionInvalid);
    }

    #[test]
    fn expired_promotion_is_invalid() {
        let mut req = request(vec![seat("A1", None)]);
        req.promotion = Some(Promotion {
            ends_at: Some(req.at - Duration::hours(1)),
            ..ten_percent_tickets()
        });
        assert!(matches!(
            PricingEngine::default().price(&req),
            Err(PricingError::PromotionInvalid { .. })
        ));
    }

    #[test]
    fn fixed_promotion_never_exceeds_eligible_amount() {
        let mut req = request(vec![seat("A1", None)]);
        req.promotion = Some(Promotion {
            scope: PromotionScope::TotalBill,
            rule: DiscountRule::Fixed {
                amount: Money::new(500_000),
            },
            ..ten_percent_tickets()
        });
        let breakdown = PricingEngine::default().price(&req).unwrap();
        assert_eq!(breakdown.discount, Money::new(100_000));
        assert_eq!(breakdown.total, Money::ZERO);
    }

    #[test]
    fn loyalty_rules() {
        let engine = PricingEngine::default();
        let mut req = request(vec![seat("A1", None), seat("A2", None)]);

        req.loyalty = Some(LoyaltyRedemption { points: 10, balance: 500 });
        assert!(matches!(
            engine.price(&req),
            Err(PricingError::LoyaltyRedemptionInvalid { .. })
        ));

        req.loyalty = Some(LoyaltyRedemption { points: 50, balance: 40 });
        assert!(engine.price(&req).is_err());

        // 200_000 gross, cap 100_000 = 100 points
        req.loyalty = Some(LoyaltyRedemption { points: 101, balance: 500 });
        assert!(engine.price(&req).is_err());

        req.loyalty = Some(LoyaltyRedemption { points: 100, balance: 500 });
        let breakdown = engine.price(&req).unwrap();
        assert_eq!(breakdown.loyalty_discount, Money::new(100_000));
        assert_eq!(breakdown.loyalty_points, 100);
        assert_eq!(breakdown.total, Money::new(100_000));
    }

    #[test]
    fn zero_points_means_no_redemption() {
        let mut req = request(vec![seat("A1", None)]);
        req.loyalty = Some(LoyaltyRedemption { points: 0, balance: 0 });
        let breakdown = PricingEngine::default().price(&req).unwrap();
        assert_eq!(breakdown.loyalty_discount, Money::ZERO);
    }

    proptest! {
        #[test]
        fn total_matches_components(
            base in 0u64..500_000,
            offsets in proptest::collection::vec(proptest::option::of(0u64..100_000), 0..8),
            quantity in 0u32..5,
            percent in 1u8..=100,
            cap in proptest::option::of(0u64..200_000),
        ) {
            let seats = offsets
                .iter()
                .enumerate()
                .map(|(i, offset)| seat(&format!("A{}", i + 1), *offset))
                .collect();
            let mut req = request(seats);
            req.base_price = Money::new(base);
            req.combos = vec![PricedCombo {
                combo_id: ComboId::new(),
                unit_price: Money::new(45_000),
                quantity,
            }];
            req.promotion = Some(Promotion {
                scope: PromotionScope::TotalBill,
                rule: DiscountRule::Percentage { percent, max_discount: cap.map(Money::new) },
                ..ten_percent_tickets()
            });

            let b = PricingEngine::default().price(&req).unwrap();
            let gross = b.ticket_subtotal.amount() + b.food_subtotal.amount();
            prop_assert!(b.discount.amount() <= gross);
            prop_assert_eq!(
                b.total.amount(),
                gross.saturating_sub(b.discount.amount() + b.loyalty_discount.amount())
            );
        }

        #[test]
        fn loyalty_never_exceeds_half(points in 0u64..1_000, seats in 1usize..6) {
            let mut req = request(
                (0..seats).map(|i| seat(&format!("B{}", i + 1), None)).collect(),
            );
            req.loyalty = Some(LoyaltyRedemption { points, balance: 1_000 });
            if let Ok(b) = PricingEngine::default().price(&req) {
                let gross = b.ticket_subtotal.amount() + b.food_subtotal.amount();
                prop_assert!(b.loyalty_discount.amount() * 2 <= gross);
            }
        }
    }
}
