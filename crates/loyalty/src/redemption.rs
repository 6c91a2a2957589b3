//! Redemption cap and point-for-discount exchange at checkout.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rewards_core::loyalty::{floor_points, LedgerEntryId, UserId, VersionedRewardsConfig};
use rewards_core::order::Order;
use rewards_core::{RewardsError, RewardsResult};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ledger::{Consumption, PointsLedger};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedemptionQuote {
    pub user_id: UserId,
    pub order_id: String,
    /// Order amount the cap applies to.
    pub base: Decimal,
    pub cap_points: i64,
    pub available: i64,
    pub max_points: i64,
    /// Currency value of `max_points`, rounded down to cents.
    pub discount: Decimal,
    pub config_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedemptionReceipt {
    pub user_id: UserId,
    pub order_id: String,
    pub points_redeemed: i64,
    pub discount: Decimal,
    pub entry_ids: Vec<LedgerEntryId>,
    pub balance_after: i64,
    pub config_version: u64,
}

pub struct RedemptionCalculator {
    ledger: Arc<PointsLedger>,
}

impl RedemptionCalculator {
    pub fn new(ledger: Arc<PointsLedger>) -> Self {
        Self { ledger }
    }

    pub fn max_redeemable(
        &self,
        user_id: &str,
        order: &Order,
        config: &VersionedRewardsConfig,
        now: DateTime<Utc>,
    ) -> RewardsResult<RedemptionQuote> {
        check_owner(user_id, order)?;
        let available = self.ledger.balance(user_id, now)?;
        quote(user_id, order, available, config)
    }

    /// Spend `points` against `order`. The cap and balance are checked again
    /// under the user's ledger lock, so a stale quote cannot overdraw.
    pub fn redeem(
        &self,
        user_id: &str,
        points: i64,
        order: &Order,
        config: &VersionedRewardsConfig,
        now: DateTime<Utc>,
    ) -> RewardsResult<RedemptionReceipt> {
        if points <= 0 {
            return Err(RewardsError::InvalidEntry(format!(
                "redeemed points must be positive, got {}",
                points
            )));
        }
        check_owner(user_id, order)?;

        let consumption = Consumption::redeem(order.order_id.clone()).with_config_version(config.version);
        let (entry_ids, balance_after) =
            self.ledger
                .consume_checked(user_id, points, &consumption, now, |available| {
                    let q = quote(user_id, order, available, config)?;
                    if points <= q.max_points {
                        Ok(())
                    } else if points > q.cap_points || available < config.config.min_points_to_redeem {
                        Err(RewardsError::RedemptionExceedsCap {
                            requested: points,
                            max_redeemable: q.max_points,
                        })
                    } else {
                        Err(RewardsError::InsufficientPoints {
                            requested: points,
                            available,
                        })
                    }
                })?;

        let discount = to_cents(config.config.amount_for_points(points));
        info!(
            user_id = %user_id,
            order_id = %order.order_id,
            points = points,
            discount = %discount,
            balance_after = balance_after,
            "Points redeemed"
        );
        Ok(RedemptionReceipt {
            user_id: user_id.to_string(),
            order_id: order.order_id.clone(),
            points_redeemed: points,
            discount,
            entry_ids,
            balance_after,
            config_version: config.version,
        })
    }
}

fn check_owner(user_id: &str, order: &Order) -> RewardsResult<()> {
    if order.user_id != user_id {
        return Err(RewardsError::InvalidEntry(format!(
            "order {} does not belong to user {}",
            order.order_id, user_id
        )));
    }
    Ok(())
}

fn quote(
    user_id: &str,
    order: &Order,
    available: i64,
    config: &VersionedRewardsConfig,
) -> RewardsResult<RedemptionQuote> {
    let rules = &config.config;
    let base = order.points_base(rules)?;
    let cap_points = base
        .checked_mul(rules.max_redeemable_fraction)
        .and_then(|capped| capped.checked_mul(rules.points_per_currency_unit))
        .map(floor_points)
        .ok_or_else(|| {
            RewardsError::InvalidEntry(format!(
                "order {} amount {} is too large to redeem against",
                order.order_id, base
            ))
        })?;
    let max_points = if available < rules.min_points_to_redeem {
        0
    } else {
        cap_points.min(available).max(0)
    };
    Ok(RedemptionQuote {
        user_id: user_id.to_string(),
        order_id: order.order_id.clone(),
        base,
        cap_points,
        available,
        max_points,
        discount: to_cents(rules.amount_for_points(max_points)),
        config_version: config.version,
    })
}

fn to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::ToZero)
}
