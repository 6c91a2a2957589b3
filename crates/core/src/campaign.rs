//! Earning campaigns: budgeted, time-boxed rules that award points for a
//! specific customer behaviour.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{RewardsError, RewardsResult};
use crate::loyalty::{LedgerEntryId, PointsSource, UserId, MAX_ENTRY_POINTS};

// ─── Enums ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    Welcome,
    Review,
    Referral,
    Purchase,
    Birthday,
    Share,
    SocialFollow,
    Custom,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// `reward_value` is a point count.
    Fixed,
    /// `reward_value` is a percentage of the order subtotal.
    Percentage,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Once,
    Daily,
    PerEvent,
    Unlimited,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    /// Terminal.
    Ended,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Ended => "ended",
        }
    }

    pub fn can_transition(&self, to: CampaignStatus) -> bool {
        matches!(
            (self, to),
            (CampaignStatus::Active, CampaignStatus::Paused)
                | (CampaignStatus::Paused, CampaignStatus::Active)
                | (CampaignStatus::Active, CampaignStatus::Ended)
                | (CampaignStatus::Paused, CampaignStatus::Ended)
        )
    }
}

// ─── Campaign ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub campaign_type: CampaignType,
    pub reward_value: Decimal,
    pub value_type: ValueType,
    pub frequency: Frequency,
    /// `None` means unlimited.
    pub budget_limit_dollars: Option<Decimal>,
    pub budget_spent_dollars: Decimal,
    pub max_uses_per_user: Option<u32>,
    pub max_uses_total: Option<u64>,
    pub current_uses: u64,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub auto_pause_on_budget: bool,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn from_request(req: NewCampaign, now: DateTime<Utc>) -> RewardsResult<Self> {
        let campaign = Self {
            id: Uuid::new_v4(),
            name: req.name,
            description: req.description,
            campaign_type: req.campaign_type,
            reward_value: req.reward_value,
            value_type: req.value_type,
            frequency: req.frequency,
            budget_limit_dollars: req.budget_limit_dollars,
            budget_spent_dollars: Decimal::ZERO,
            max_uses_per_user: req.max_uses_per_user,
            max_uses_total: req.max_uses_total,
            current_uses: 0,
            start_date: req.start_date.unwrap_or(now),
            end_date: req.end_date,
            auto_pause_on_budget: req.auto_pause_on_budget,
            status: CampaignStatus::Active,
            created_at: now,
            updated_at: now,
        };
        campaign.validate()?;
        Ok(campaign)
    }

    pub fn validate(&self) -> RewardsResult<()> {
        if self.name.trim().is_empty() {
            return Err(RewardsError::InvalidCampaign("name must not be empty".into()));
        }
        if self.reward_value <= Decimal::ZERO {
            return Err(RewardsError::InvalidCampaign(format!(
                "reward_value must be > 0, got {}",
                self.reward_value
            )));
        }
        match self.value_type {
            ValueType::Fixed if !self.reward_value.fract().is_zero() => {
                return Err(RewardsError::InvalidCampaign(format!(
                    "fixed reward_value must be a whole number of points, got {}",
                    self.reward_value
                )));
            }
            ValueType::Fixed if self.reward_value > Decimal::from(MAX_ENTRY_POINTS) => {
                return Err(RewardsError::InvalidCampaign(format!(
                    "fixed reward_value must be <= {} points, got {}",
                    MAX_ENTRY_POINTS, self.reward_value
                )));
            }
            ValueType::Percentage if self.reward_value > Decimal::ONE_HUNDRED => {
                return Err(RewardsError::InvalidCampaign(format!(
                    "percentage reward_value must be <= 100, got {}",
                    self.reward_value
                )));
            }
            _ => {}
        }
        if let Some(limit) = self.budget_limit_dollars {
            if limit < Decimal::ZERO {
                return Err(RewardsError::InvalidCampaign(format!(
                    "budget_limit_dollars must be >= 0, got {}",
                    limit
                )));
            }
            if self.budget_spent_dollars > limit {
                return Err(RewardsError::InvalidCampaign(format!(
                    "budget_limit_dollars {} is below the amount already spent ({})",
                    limit, self.budget_spent_dollars
                )));
            }
        }
        if let Some(max_total) = self.max_uses_total {
            if self.current_uses > max_total {
                return Err(RewardsError::InvalidCampaign(format!(
                    "max_uses_total {} is below current uses ({})",
                    max_total, self.current_uses
                )));
            }
        }
        if let Some(end) = self.end_date {
            if end <= self.start_date {
                return Err(RewardsError::InvalidCampaign(
                    "end_date must be after start_date".into(),
                ));
            }
        }
        Ok(())
    }

    /// Whether `at` falls inside `[start_date, end_date]`.
    pub fn is_within_window(&self, at: DateTime<Utc>) -> bool {
        at >= self.start_date && self.end_date.map(|end| at <= end).unwrap_or(true)
    }

    pub fn has_ended_by(&self, at: DateTime<Utc>) -> bool {
        self.end_date.map(|end| at > end).unwrap_or(false)
    }

    /// Dollars left before the budget is exhausted; `None` when unlimited.
    pub fn budget_remaining(&self) -> Option<Decimal> {
        self.budget_limit_dollars
            .map(|limit| (limit - self.budget_spent_dollars).max(Decimal::ZERO))
    }

    /// Apply an admin patch, then re-validate against the campaign's own
    /// invariants.
    pub fn apply(&mut self, update: CampaignUpdate, now: DateTime<Utc>) -> RewardsResult<()> {
        let mut next = self.clone();
        if let Some(name) = update.name { next.name = name; }
        if let Some(description) = update.description { next.description = Some(description); }
        if let Some(reward_value) = update.reward_value { next.reward_value = reward_value; }
        if let Some(value_type) = update.value_type { next.value_type = value_type; }
        if let Some(frequency) = update.frequency { next.frequency = frequency; }
        if let Some(limit) = update.budget_limit_dollars { next.budget_limit_dollars = limit; }
        if let Some(max) = update.max_uses_per_user { next.max_uses_per_user = max; }
        if let Some(max) = update.max_uses_total { next.max_uses_total = max; }
        if let Some(start) = update.start_date { next.start_date = start; }
        if let Some(end) = update.end_date { next.end_date = end; }
        if let Some(auto_pause) = update.auto_pause_on_budget { next.auto_pause_on_budget = auto_pause; }
        next.validate()?;
        next.updated_at = now;
        *self = next;
        Ok(())
    }

    pub fn budget_view(&self) -> CampaignBudgetView {
        CampaignBudgetView {
            campaign_id: self.id,
            name: self.name.clone(),
            campaign_type: self.campaign_type,
            budget_spent_dollars: self.budget_spent_dollars,
            budget_limit_dollars: self.budget_limit_dollars,
            current_uses: self.current_uses,
            max_uses_total: self.max_uses_total,
            status: self.status,
        }
    }
}

/// Admin request to create a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub campaign_type: CampaignType,
    pub reward_value: Decimal,
    pub value_type: ValueType,
    pub frequency: Frequency,
    #[serde(default)]
    pub budget_limit_dollars: Option<Decimal>,
    #[serde(default)]
    pub max_uses_per_user: Option<u32>,
    #[serde(default)]
    pub max_uses_total: Option<u64>,
    /// Defaults to creation time.
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auto_pause_on_budget: bool,
}

/// Admin patch. Nullable fields use a nested option: an absent field is
/// left alone, an explicit `null` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub reward_value: Option<Decimal>,
    pub value_type: Option<ValueType>,
    pub frequency: Option<Frequency>,
    #[serde(deserialize_with = "nullable")]
    pub budget_limit_dollars: Option<Option<Decimal>>,
    #[serde(deserialize_with = "nullable")]
    pub max_uses_per_user: Option<Option<u32>>,
    #[serde(deserialize_with = "nullable")]
    pub max_uses_total: Option<Option<u64>>,
    pub start_date: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "nullable")]
    pub end_date: Option<Option<DateTime<Utc>>>,
    pub auto_pause_on_budget: Option<bool>,
}

fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Append-only record of one successful award.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignUsageRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,
    /// Recipient of the points.
    pub user_id: UserId,
    /// Identity the frequency rule is keyed on.
    pub claim_key: String,
    pub event_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub points_awarded: i64,
    pub dollar_cost: Decimal,
    pub ledger_entry_id: LedgerEntryId,
    pub config_version: u64,
}

/// Dashboard projection of a campaign's meters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignBudgetView {
    pub campaign_id: Uuid,
    pub name: String,
    pub campaign_type: CampaignType,
    pub budget_spent_dollars: Decimal,
    pub budget_limit_dollars: Option<Decimal>,
    pub current_uses: u64,
    pub max_uses_total: Option<u64>,
    pub status: CampaignStatus,
}

// ─── Events ─────────────────────────────────────────────────────────────────

/// A qualifying customer behaviour, resolved before any award is attempted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Signup,
    Purchase {
        order_id: String,
        subtotal: Decimal,
    },
    /// A referred user's qualifying purchase, credited to the referrer.
    Referral {
        referred_id: UserId,
        order_id: String,
        subtotal: Decimal,
    },
    Review {
        review_id: String,
    },
    Birthday {
        year: i32,
    },
    Share {
        target: String,
    },
    SocialFollow {
        platform: String,
    },
    Custom {
        name: String,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Signup => "signup",
            EventKind::Purchase { .. } => "purchase",
            EventKind::Referral { .. } => "referral",
            EventKind::Review { .. } => "review",
            EventKind::Birthday { .. } => "birthday",
            EventKind::Share { .. } => "share",
            EventKind::SocialFollow { .. } => "social_follow",
            EventKind::Custom { .. } => "custom",
        }
    }

    /// Whether a campaign of `campaign_type` may award for this event.
    /// Custom campaigns accept any event.
    pub fn applies_to(&self, campaign_type: CampaignType) -> bool {
        match campaign_type {
            CampaignType::Welcome => matches!(self, EventKind::Signup),
            CampaignType::Review => matches!(self, EventKind::Review { .. }),
            CampaignType::Referral => matches!(self, EventKind::Referral { .. }),
            CampaignType::Purchase => matches!(self, EventKind::Purchase { .. }),
            CampaignType::Birthday => matches!(self, EventKind::Birthday { .. }),
            CampaignType::Share => matches!(self, EventKind::Share { .. }),
            CampaignType::SocialFollow => matches!(self, EventKind::SocialFollow { .. }),
            CampaignType::Custom => true,
        }
    }

    pub fn order_subtotal(&self) -> Option<Decimal> {
        match self {
            EventKind::Purchase { subtotal, .. } | EventKind::Referral { subtotal, .. } => {
                Some(*subtotal)
            }
            _ => None,
        }
    }

    pub fn order_id(&self) -> Option<&str> {
        match self {
            EventKind::Purchase { order_id, .. } | EventKind::Referral { order_id, .. } => {
                Some(order_id.as_str())
            }
            _ => None,
        }
    }

    /// Natural idempotency key of the event, used for `per_event` dedup.
    pub fn natural_key(&self) -> Option<String> {
        match self {
            EventKind::Signup => Some("signup".to_string()),
            EventKind::Purchase { order_id, .. } => Some(format!("order:{}", order_id)),
            EventKind::Referral { referred_id, .. } => Some(format!("referred:{}", referred_id)),
            EventKind::Review { review_id } => Some(format!("review:{}", review_id)),
            EventKind::Birthday { year } => Some(format!("birthday:{}", year)),
            EventKind::Share { target } => Some(format!("share:{}", target)),
            EventKind::SocialFollow { platform } => Some(format!("follow:{}", platform)),
            EventKind::Custom { .. } => None,
        }
    }

    /// Source tag for points that are not attributed to a campaign.
    pub fn points_source(&self) -> Option<PointsSource> {
        match self {
            EventKind::Signup => Some(PointsSource::Welcome),
            EventKind::Purchase { .. } => Some(PointsSource::Purchase),
            EventKind::Referral { .. } => Some(PointsSource::Referral),
            EventKind::Review { .. } => Some(PointsSource::Review),
            EventKind::Birthday { .. } => Some(PointsSource::Birthday),
            EventKind::Share { .. } => Some(PointsSource::Share),
            EventKind::SocialFollow { .. } => Some(PointsSource::SocialFollow),
            EventKind::Custom { .. } => None,
        }
    }
}

/// Everything `try_award` needs to know about the triggering event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventContext {
    pub kind: EventKind,
    /// Caller-supplied idempotency key; overrides the event's natural key.
    #[serde(default)]
    pub event_id: Option<String>,
}

impl EventContext {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            event_id: None,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn idempotency_key(&self) -> Option<String> {
        self.event_id.clone().or_else(|| self.kind.natural_key())
    }

    /// Referral awards are keyed by the referred account so one referrer
    /// cannot farm repeat purchases from the same referred user.
    pub fn claim_key(&self, recipient: &str) -> String {
        match &self.kind {
            EventKind::Referral { referred_id, .. } => format!("referred:{}", referred_id),
            _ => recipient.to_string(),
        }
    }
}

/// Result of a successful `try_award`. `awarded_points` may be zero when the
/// campaign auto-paused on budget exhaustion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AwardOutcome {
    pub campaign_id: Uuid,
    pub user_id: UserId,
    pub awarded_points: i64,
    pub requested_points: i64,
    pub dollar_cost: Decimal,
    pub auto_paused: bool,
    pub status: CampaignStatus,
    pub ledger_entry_id: Option<LedgerEntryId>,
    pub usage_id: Option<Uuid>,
}
