//! Points ledger and rewards configuration domain types.
//!
//! Points are integers. Currency amounts are exact decimals so that budget
//! and redemption-cap arithmetic never drifts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RewardsError, RewardsResult};

pub type UserId = String;
pub type LedgerEntryId = Uuid;

/// Largest point movement a single ledger entry may carry.
pub const MAX_ENTRY_POINTS: i64 = 1_000_000_000_000;

// ─── Ledger ─────────────────────────────────────────────────────────────────

/// Kind of point movement. Only `Earn` carries a positive amount.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Earn,
    Redeem,
    Reverse,
    Expire,
}

impl EntryType {
    pub fn is_credit(&self) -> bool {
        matches!(self, EntryType::Earn)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Earn => "earn",
            EntryType::Redeem => "redeem",
            EntryType::Reverse => "reverse",
            EntryType::Expire => "expire",
        }
    }
}

/// Where a lot of points came from. Serialized as `purchase`, `referral`,
/// ..., or `campaign:<uuid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PointsSource {
    Purchase,
    Referral,
    Review,
    SocialFollow,
    Share,
    Welcome,
    Birthday,
    Campaign(Uuid),
}

impl fmt::Display for PointsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointsSource::Purchase => write!(f, "purchase"),
            PointsSource::Referral => write!(f, "referral"),
            PointsSource::Review => write!(f, "review"),
            PointsSource::SocialFollow => write!(f, "social_follow"),
            PointsSource::Share => write!(f, "share"),
            PointsSource::Welcome => write!(f, "welcome"),
            PointsSource::Birthday => write!(f, "birthday"),
            PointsSource::Campaign(id) => write!(f, "campaign:{}", id),
        }
    }
}

impl FromStr for PointsSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(PointsSource::Purchase),
            "referral" => Ok(PointsSource::Referral),
            "review" => Ok(PointsSource::Review),
            "social_follow" => Ok(PointsSource::SocialFollow),
            "share" => Ok(PointsSource::Share),
            "welcome" => Ok(PointsSource::Welcome),
            "birthday" => Ok(PointsSource::Birthday),
            other => match other.strip_prefix("campaign:") {
                Some(id) => Uuid::parse_str(id)
                    .map(PointsSource::Campaign)
                    .map_err(|e| format!("invalid campaign source `{}`: {}", other, e)),
                None => Err(format!("unknown points source `{}`", other)),
            },
        }
    }
}

impl From<PointsSource> for String {
    fn from(source: PointsSource) -> Self {
        source.to_string()
    }
}

impl TryFrom<String> for PointsSource {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Immutable ledger row. Corrections are new rows, never edits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointsLedgerEntry {
    pub id: LedgerEntryId,
    pub user_id: UserId,
    /// Signed points: positive for earn, negative otherwise.
    pub amount: i64,
    pub entry_type: EntryType,
    pub source: PointsSource,
    pub related_order_id: Option<String>,
    pub campaign_id: Option<Uuid>,
    /// Earn lot this entry draws from. Always set on negative entries.
    pub consumes_entry_id: Option<LedgerEntryId>,
    pub config_version: Option<u64>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Only set on earn entries.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Request to append a ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub user_id: UserId,
    pub amount: i64,
    pub entry_type: EntryType,
    pub source: PointsSource,
    #[serde(default)]
    pub related_order_id: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<Uuid>,
    #[serde(default)]
    pub consumes_entry_id: Option<LedgerEntryId>,
    #[serde(default)]
    pub config_version: Option<u64>,
    #[serde(default)]
    pub reason: Option<String>,
    /// Defaults to now when absent.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl NewLedgerEntry {
    pub fn earn(user_id: impl Into<String>, amount: i64, source: PointsSource) -> Self {
        Self {
            user_id: user_id.into(),
            amount,
            entry_type: EntryType::Earn,
            source,
            related_order_id: None,
            campaign_id: None,
            consumes_entry_id: None,
            config_version: None,
            reason: None,
            created_at: None,
        }
    }

    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.related_order_id = Some(order_id.into());
        self
    }

    pub fn with_campaign(mut self, campaign_id: Uuid) -> Self {
        self.campaign_id = Some(campaign_id);
        self
    }

    pub fn with_config_version(mut self, version: u64) -> Self {
        self.config_version = Some(version);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Sign must agree with the entry type and zero is never valid.
    pub fn validate(&self) -> RewardsResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(RewardsError::InvalidEntry("user_id must not be empty".into()));
        }
        if self.amount == 0 {
            return Err(RewardsError::InvalidEntry("amount must not be zero".into()));
        }
        if self.amount.unsigned_abs() > MAX_ENTRY_POINTS.unsigned_abs() {
            return Err(RewardsError::InvalidEntry(format!(
                "amount {} exceeds the per-entry limit of {} points",
                self.amount, MAX_ENTRY_POINTS
            )));
        }
        match (self.entry_type.is_credit(), self.amount > 0) {
            (true, false) => Err(RewardsError::InvalidEntry(format!(
                "earn entries must be positive, got {}",
                self.amount
            ))),
            (false, true) => Err(RewardsError::InvalidEntry(format!(
                "{} entries must be negative, got {}",
                self.entry_type.as_str(),
                self.amount
            ))),
            _ => Ok(()),
        }
    }
}

/// Remaining-balance view of a single earn entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointsLot {
    pub entry_id: LedgerEntryId,
    pub source: PointsSource,
    pub amount: i64,
    pub remaining: i64,
    pub related_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ─── Rewards configuration ──────────────────────────────────────────────────

/// How purchases earn points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EarningType {
    /// A percentage of the order subtotal, converted to points.
    #[default]
    Percentage,
    /// A flat number of points per qualifying purchase.
    Fixed,
}

/// Global conversion and redemption parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RewardsConfig {
    pub earning_type: EarningType,
    pub earning_percentage: Decimal,
    pub earning_fixed_amount: i64,
    pub points_per_currency_unit: Decimal,
    /// Share of an order payable with points, e.g. 0.02 = 2%.
    pub max_redeemable_fraction: Decimal,
    pub min_points_to_redeem: i64,
    pub include_tax_in_base: bool,
    pub include_shipping_in_base: bool,
    pub show_points_in_header: bool,
    pub show_points_on_product: bool,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            earning_type: EarningType::Percentage,
            earning_percentage: Decimal::ONE,
            earning_fixed_amount: 0,
            points_per_currency_unit: Decimal::from(1000),
            max_redeemable_fraction: Decimal::new(2, 2),
            min_points_to_redeem: 0,
            include_tax_in_base: false,
            include_shipping_in_base: false,
            show_points_in_header: true,
            show_points_on_product: true,
        }
    }
}

impl RewardsConfig {
    pub fn validate(&self) -> RewardsResult<()> {
        match self.earning_type {
            EarningType::Percentage => {
                if self.earning_percentage < Decimal::ZERO
                    || self.earning_percentage > Decimal::ONE_HUNDRED
                {
                    return Err(RewardsError::InvalidConfig(format!(
                        "earning_percentage must be within [0, 100], got {}",
                        self.earning_percentage
                    )));
                }
            }
            EarningType::Fixed => {
                if !(0..=MAX_ENTRY_POINTS).contains(&self.earning_fixed_amount) {
                    return Err(RewardsError::InvalidConfig(format!(
                        "earning_fixed_amount must be within [0, {}], got {}",
                        MAX_ENTRY_POINTS,
                        self.earning_fixed_amount
                    )));
                }
            }
        }
        if self.points_per_currency_unit <= Decimal::ZERO {
            return Err(RewardsError::InvalidConfig(format!(
                "points_per_currency_unit must be > 0, got {}",
                self.points_per_currency_unit
            )));
        }
        if self.max_redeemable_fraction < Decimal::ZERO
            || self.max_redeemable_fraction > Decimal::ONE
        {
            return Err(RewardsError::InvalidConfig(format!(
                "max_redeemable_fraction must be within [0, 1], got {}",
                self.max_redeemable_fraction
            )));
        }
        if self.min_points_to_redeem < 0 {
            return Err(RewardsError::InvalidConfig(format!(
                "min_points_to_redeem must be >= 0, got {}",
                self.min_points_to_redeem
            )));
        }
        Ok(())
    }

    /// Whole points worth `amount` currency units, rounded down.
    pub fn points_for_amount(&self, amount: Decimal) -> RewardsResult<i64> {
        amount
            .checked_mul(self.points_per_currency_unit)
            .map(floor_points)
            .ok_or_else(|| amount_overflow(amount))
    }

    /// Currency value of `points`. Exact; callers round for display.
    pub fn amount_for_points(&self, points: i64) -> Decimal {
        Decimal::from(points) / self.points_per_currency_unit
    }

    /// Base points earned by a purchase with the given subtotal.
    pub fn purchase_points(&self, subtotal: Decimal) -> RewardsResult<i64> {
        if subtotal <= Decimal::ZERO {
            return Ok(0);
        }
        match self.earning_type {
            EarningType::Percentage => {
                let earned = subtotal
                    .checked_mul(self.earning_percentage)
                    .ok_or_else(|| amount_overflow(subtotal))?;
                self.points_for_amount(earned / Decimal::ONE_HUNDRED)
            }
            EarningType::Fixed => Ok(self.earning_fixed_amount),
        }
    }
}

/// One immutable version of the rewards configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionedRewardsConfig {
    pub version: u64,
    pub config: RewardsConfig,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

/// Truncate a non-negative decimal to whole points; negatives clamp to 0.
pub(crate) fn amount_overflow(amount: Decimal) -> RewardsError {
    RewardsError::InvalidEntry(format!("amount {} is too large to convert to points", amount))
}

pub fn floor_points(value: Decimal) -> i64 {
    if value <= Decimal::ZERO {
        return 0;
    }
    value.floor().to_i64().unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_points_source_round_trip_through_string() {
        let id = Uuid::new_v4();
        let source = PointsSource::Campaign(id);
        assert_eq!(source.to_string(), format!("campaign:{}", id));
        assert_eq!("social_follow".parse::<PointsSource>(), Ok(PointsSource::SocialFollow));
        assert!("campaign:not-a-uuid".parse::<PointsSource>().is_err());
        assert!("coupon".parse::<PointsSource>().is_err());

        let json = serde_json::to_string(&source).unwrap();
        assert_eq!(json, format!("\"campaign:{}\"", id));
    }

    #[test]
    fn test_entry_sign_validation() {
        let earn = NewLedgerEntry::earn("u1", 100, PointsSource::Purchase);
        assert!(earn.validate().is_ok());

        let negative_earn = NewLedgerEntry::earn("u1", -5, PointsSource::Purchase);
        assert!(matches!(negative_earn.validate(), Err(RewardsError::InvalidEntry(_))));

        let mut positive_redeem = NewLedgerEntry::earn("u1", 5, PointsSource::Purchase);
        positive_redeem.entry_type = EntryType::Redeem;
        assert!(matches!(positive_redeem.validate(), Err(RewardsError::InvalidEntry(_))));

        let zero = NewLedgerEntry::earn("u1", 0, PointsSource::Purchase);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_percentage_purchase_earning() {
        let config = RewardsConfig {
            points_per_currency_unit: dec!(1000),
            earning_type: EarningType::Percentage,
            earning_percentage: dec!(1),
            ..Default::default()
        };
        // 1% of $100 = $1 = 1000 points
        assert_eq!(config.purchase_points(dec!(100)).unwrap(), 1000);
        assert_eq!(config.purchase_points(dec!(0.05)).unwrap(), 0);
        assert_eq!(config.purchase_points(dec!(-10)).unwrap(), 0);
    }

    #[test]
    fn test_fixed_purchase_earning() {
        let config = RewardsConfig {
            earning_type: EarningType::Fixed,
            earning_fixed_amount: 250,
            ..Default::default()
        };
        assert_eq!(config.purchase_points(dec!(3.50)).unwrap(), 250);
        assert_eq!(config.purchase_points(Decimal::ZERO).unwrap(), 0);
    }

    #[test]
    fn test_config_validation() {
        assert!(RewardsConfig::default().validate().is_ok());

        let bad_pct = RewardsConfig {
            earning_percentage: dec!(101),
            ..Default::default()
        };
        assert!(matches!(bad_pct.validate(), Err(RewardsError::InvalidConfig(_))));

        // Percentage bound is irrelevant under fixed earning.
        let fixed = RewardsConfig {
            earning_type: EarningType::Fixed,
            earning_percentage: dec!(101),
            ..Default::default()
        };
        assert!(fixed.validate().is_ok());

        let zero_rate = RewardsConfig {
            points_per_currency_unit: Decimal::ZERO,
            ..Default::default()
        };
        assert!(zero_rate.validate().is_err());

        let big_fraction = RewardsConfig {
            max_redeemable_fraction: dec!(1.01),
            ..Default::default()
        };
        assert!(big_fraction.validate().is_err());

        let negative_min = RewardsConfig {
            min_points_to_redeem: -1,
            ..Default::default()
        };
        assert!(negative_min.validate().is_err());
    }

    #[test]
    fn test_amount_for_points() {
        let config = RewardsConfig::default();
        assert_eq!(config.amount_for_points(500), dec!(0.5));
        assert_eq!(config.points_for_amount(dec!(0.5)).unwrap(), 500);
    }

    #[test]
    fn test_oversized_amounts_are_rejected() {
        let config = RewardsConfig::default();
        assert!(matches!(
            config.purchase_points(Decimal::MAX),
            Err(RewardsError::InvalidEntry(_))
        ));
        assert!(matches!(
            config.points_for_amount(dec!(70000000000000000000000000000)),
            Err(RewardsError::InvalidEntry(_))
        ));

        let huge = NewLedgerEntry::earn("u1", MAX_ENTRY_POINTS + 1, PointsSource::Purchase);
        assert!(matches!(huge.validate(), Err(RewardsError::InvalidEntry(_))));
        assert!(NewLedgerEntry::earn("u1", MAX_ENTRY_POINTS, PointsSource::Purchase)
            .validate()
            .is_ok());

        let fixed = RewardsConfig {
            earning_type: EarningType::Fixed,
            earning_fixed_amount: MAX_ENTRY_POINTS + 1,
            ..Default::default()
        };
        assert!(matches!(fixed.validate(), Err(RewardsError::InvalidConfig(_))));
    }
}
