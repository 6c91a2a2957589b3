//! Data supplied by the order and user-profile collaborators.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::RewardsResult;
use crate::loyalty::{amount_overflow, RewardsConfig, UserId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Statuses that trigger purchase earning.
    pub fn is_qualifying(&self) -> bool {
        matches!(self, OrderStatus::Completed)
    }

    /// Statuses that reverse points earned from the order.
    pub fn is_reversal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub order_id: String,
    pub user_id: UserId,
    pub subtotal: Decimal,
    #[serde(default)]
    pub tax: Decimal,
    #[serde(default)]
    pub shipping: Decimal,
    pub status: OrderStatus,
}

impl Order {
    /// Amount the redemption cap is computed against.
    pub fn points_base(&self, config: &RewardsConfig) -> RewardsResult<Decimal> {
        let mut base = self.subtotal;
        if config.include_tax_in_base {
            base = base.checked_add(self.tax).ok_or_else(|| amount_overflow(self.tax))?;
        }
        if config.include_shipping_in_base {
            base = base
                .checked_add(self.shipping)
                .ok_or_else(|| amount_overflow(self.shipping))?;
        }
        Ok(base.max(Decimal::ZERO))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub user_id: UserId,
    pub signed_up_at: DateTime<Utc>,
    pub birthday: Option<NaiveDate>,
}
