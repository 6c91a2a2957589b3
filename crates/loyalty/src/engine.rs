//! Loyalty engine facade: wires the ledger, settings, campaigns, redemption,
//! referrals and the sweeper together and reacts to order and user events.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rewards_core::campaign::{AwardOutcome, EventContext, EventKind};
use rewards_core::config::{AppConfig, LoyaltyConfig};
use rewards_core::loyalty::{LedgerEntryId, NewLedgerEntry, PointsSource, UserId, VersionedRewardsConfig};
use rewards_core::order::{Order, OrderStatus};
use rewards_core::referral::{Referral, ReferralCode};
use rewards_core::{ErrorKind, RewardsError, RewardsResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::campaign::CampaignEngine;
use crate::collaborators::UserDirectory;
use crate::ledger::{PointsLedger, ReversalOutcome};
use crate::locking::LockPolicy;
use crate::redemption::{RedemptionCalculator, RedemptionQuote, RedemptionReceipt};
use crate::referral::ReferralTracker;
use crate::settings::RewardsSettings;
use crate::sweeper::{ExpirationSweeper, SweepReport};

/// A campaign that declined to award for an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignRejection {
    pub campaign_id: Uuid,
    pub reason: String,
    pub message: String,
}

impl CampaignRejection {
    fn new(campaign_id: Uuid, error: &RewardsError) -> Self {
        Self {
            campaign_id,
            reason: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRewardsOutcome {
    pub user_id: UserId,
    pub event: String,
    pub config_version: u64,
    pub awards: Vec<AwardOutcome>,
    pub rejections: Vec<CampaignRejection>,
}

impl EventRewardsOutcome {
    pub fn points_awarded(&self) -> i64 {
        self.awards.iter().map(|a| a.awarded_points).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderRewardsOutcome {
    pub order_id: String,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub config_version: u64,
    /// False when this order status had already been processed.
    pub processed: bool,
    pub base_points_earned: i64,
    pub base_entry_id: Option<LedgerEntryId>,
    pub campaign_awards: Vec<AwardOutcome>,
    pub campaign_rejections: Vec<CampaignRejection>,
    pub referral: Option<AwardOutcome>,
    pub reversal: Option<ReversalOutcome>,
    /// The referrer's bonus taken back when this order had converted a
    /// referral.
    pub referral_reversal: Option<ReversalOutcome>,
}

impl OrderRewardsOutcome {
    fn new(order: &Order, config_version: u64) -> Self {
        Self {
            order_id: order.order_id.clone(),
            user_id: order.user_id.clone(),
            status: order.status,
            config_version,
            processed: false,
            base_points_earned: 0,
            base_entry_id: None,
            campaign_awards: Vec::new(),
            campaign_rejections: Vec::new(),
            referral: None,
            reversal: None,
            referral_reversal: None,
        }
    }
}

pub struct LoyaltyEngine {
    config: LoyaltyConfig,
    users: Arc<dyn UserDirectory>,
    settings: Arc<RewardsSettings>,
    ledger: Arc<PointsLedger>,
    campaigns: Arc<CampaignEngine>,
    redemption: RedemptionCalculator,
    referrals: ReferralTracker,
    sweeper: Arc<ExpirationSweeper>,
    /// Orders whose purchase points were already credited.
    earned_orders: DashMap<String, i64>,
}

impl LoyaltyEngine {
    pub fn new(config: &AppConfig, users: Arc<dyn UserDirectory>) -> RewardsResult<Self> {
        let locks = LockPolicy::from_config(&config.engine);
        let settings = Arc::new(RewardsSettings::new(config.rewards.clone(), Utc::now())?);
        let ledger = Arc::new(PointsLedger::new(users.clone(), &config.loyalty, locks.clone()));
        let campaigns = Arc::new(CampaignEngine::new(ledger.clone(), locks));
        let referrals = ReferralTracker::new(
            campaigns.clone(),
            ledger.clone(),
            &config.loyalty.referral_code_prefix,
        );

        info!(
            enabled = config.loyalty.enabled,
            lifetime_months = config.loyalty.points_lifetime_months,
            lock_timeout_ms = config.engine.lock_timeout_ms,
            "Loyalty engine initialized"
        );

        Ok(Self {
            config: config.loyalty.clone(),
            users,
            settings,
            redemption: RedemptionCalculator::new(ledger.clone()),
            sweeper: Arc::new(ExpirationSweeper::new(ledger.clone())),
            referrals,
            campaigns,
            ledger,
            earned_orders: DashMap::new(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn settings(&self) -> &Arc<RewardsSettings> {
        &self.settings
    }

    pub fn ledger(&self) -> &Arc<PointsLedger> {
        &self.ledger
    }

    pub fn campaigns(&self) -> &Arc<CampaignEngine> {
        &self.campaigns
    }

    pub fn referrals(&self) -> &ReferralTracker {
        &self.referrals
    }

    pub fn sweeper(&self) -> &Arc<ExpirationSweeper> {
        &self.sweeper
    }

    // ─── Balance & redemption ───────────────────────────────────────────

    pub fn balance(&self, user_id: &str) -> RewardsResult<i64> {
        self.ledger.balance(user_id, Utc::now())
    }

    pub fn balance_at(&self, user_id: &str, as_of: DateTime<Utc>) -> RewardsResult<i64> {
        self.ledger.balance(user_id, as_of)
    }

    pub fn max_redeemable(&self, user_id: &str, order: &Order) -> RewardsResult<RedemptionQuote> {
        let config = self.settings.current();
        self.redemption.max_redeemable(user_id, order, &config, Utc::now())
    }

    pub fn redeem(&self, user_id: &str, points: i64, order: &Order) -> RewardsResult<RedemptionReceipt> {
        let config = self.settings.current();
        self.redemption.redeem(user_id, points, order, &config, Utc::now())
    }

    // ─── Campaigns & referrals ──────────────────────────────────────────

    pub fn try_award(&self, campaign_id: Uuid, user_id: &str, ctx: &EventContext) -> RewardsResult<AwardOutcome> {
        let config = self.settings.current();
        self.campaigns.try_award(campaign_id, user_id, ctx, &config, Utc::now())
    }

    pub fn issue_referral_code(&self, referrer_id: &str) -> RewardsResult<ReferralCode> {
        self.referrals.issue_code(referrer_id, Utc::now())
    }

    pub fn register_referral(&self, code: &str, referred_id: &str) -> RewardsResult<Referral> {
        self.referrals.register_referral(code, referred_id, Utc::now())
    }

    pub fn on_qualifying_purchase(&self, referred_id: &str, order: &Order) -> RewardsResult<Option<AwardOutcome>> {
        let config = self.settings.current();
        self.referrals
            .on_qualifying_purchase(referred_id, order, &config, Utc::now())
    }

    // ─── Collaborator hooks ─────────────────────────────────────────────

    pub fn on_order_status_changed(&self, order: &Order) -> RewardsResult<OrderRewardsOutcome> {
        self.on_order_status_changed_at(order, Utc::now())
    }

    /// Completed orders earn purchase points, trigger purchase campaigns and
    /// the referral bonus. Cancelled or refunded orders reverse what the
    /// order earned. Other statuses are ignored.
    pub fn on_order_status_changed_at(
        &self,
        order: &Order,
        now: DateTime<Utc>,
    ) -> RewardsResult<OrderRewardsOutcome> {
        self.ledger.ensure_user(&order.user_id)?;
        let config = self.settings.current();
        let mut outcome = OrderRewardsOutcome::new(order, config.version);
        if !self.config.enabled {
            debug!(order_id = %order.order_id, "Loyalty disabled, order ignored");
            return Ok(outcome);
        }

        if order.status.is_qualifying() {
            let slot = match self.earned_orders.entry(order.order_id.clone()) {
                Entry::Occupied(_) => {
                    debug!(order_id = %order.order_id, "Order already credited");
                    return Ok(outcome);
                }
                Entry::Vacant(slot) => slot,
            };
            let points = config.config.purchase_points(order.subtotal)?;
            if points > 0 {
                let entry = NewLedgerEntry::earn(&order.user_id, points, PointsSource::Purchase)
                    .with_order(order.order_id.clone())
                    .with_config_version(config.version)
                    .with_reason("purchase")
                    .at(now);
                outcome.base_entry_id = Some(self.ledger.append_at(entry, now)?);
            }
            slot.insert(points);
            outcome.base_points_earned = points;
            outcome.processed = true;

            let ctx = EventContext::new(EventKind::Purchase {
                order_id: order.order_id.clone(),
                subtotal: order.subtotal,
            });
            let (awards, mut rejections) = self.evaluate(&order.user_id, &ctx, &config, now)?;
            outcome.campaign_awards = awards;

            match self
                .referrals
                .on_qualifying_purchase(&order.user_id, order, &config, now)
            {
                Ok(referral) => outcome.referral = referral,
                Err(e) if e.kind() == ErrorKind::Internal => return Err(e),
                Err(e) => {
                    debug!(order_id = %order.order_id, reason = e.code(), "Referral bonus not paid");
                    let campaign_id = match &e {
                        RewardsError::CampaignNotActive { campaign_id, .. }
                        | RewardsError::BudgetExceeded { campaign_id, .. }
                        | RewardsError::UserCapReached { campaign_id, .. } => *campaign_id,
                        RewardsError::CampaignCapReached(id) => *id,
                        _ => Uuid::nil(),
                    };
                    rejections.push(CampaignRejection::new(campaign_id, &e));
                }
            }
            outcome.campaign_rejections = rejections;

            info!(
                order_id = %order.order_id,
                user_id = %order.user_id,
                points = points,
                campaign_awards = outcome.campaign_awards.len(),
                referral = outcome.referral.is_some(),
                "Order rewards credited"
            );
        } else if order.status.is_reversal() {
            let reversal = self.ledger.reverse_order(&order.user_id, &order.order_id, now)?;
            outcome.processed = reversal.lots_reversed > 0;
            outcome.reversal = Some(reversal);

            // The referrer's ledger is locked only after the buyer's is released.
            if let Some(referrer_id) = self.referrals.on_order_reversed(&order.user_id, &order.order_id) {
                let bonus = self.ledger.reverse_order(&referrer_id, &order.order_id, now)?;
                outcome.processed |= bonus.lots_reversed > 0;
                outcome.referral_reversal = Some(bonus);
            }
        }
        Ok(outcome)
    }

    pub fn on_signup(&self, user_id: &str) -> RewardsResult<EventRewardsOutcome> {
        self.record_event_at(user_id, &EventContext::new(EventKind::Signup), Utc::now())
    }

    /// Birthday campaigns fire on the user's birthday, keyed by year. A
    /// 29 February birthday is celebrated on 28 February in common years.
    pub fn on_birthday(&self, user_id: &str, today: NaiveDate) -> RewardsResult<EventRewardsOutcome> {
        self.on_birthday_at(user_id, today, Utc::now())
    }

    pub fn on_birthday_at(
        &self,
        user_id: &str,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> RewardsResult<EventRewardsOutcome> {
        let profile = self
            .users
            .profile(user_id)
            .ok_or_else(|| RewardsError::UnknownUser(user_id.to_string()))?;
        let ctx = EventContext::new(EventKind::Birthday { year: today.year() });
        match profile.birthday {
            Some(birthday) if is_birthday(birthday, today) => self.record_event_at(user_id, &ctx, now),
            _ => Ok(self.empty_outcome(user_id, &ctx)),
        }
    }

    /// Reviews, shares, follows and custom events.
    pub fn record_event(&self, user_id: &str, ctx: &EventContext) -> RewardsResult<EventRewardsOutcome> {
        self.record_event_at(user_id, ctx, Utc::now())
    }

    pub fn record_event_at(
        &self,
        user_id: &str,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> RewardsResult<EventRewardsOutcome> {
        match ctx.kind {
            EventKind::Purchase { .. } | EventKind::Referral { .. } => {
                return Err(RewardsError::InvalidEntry(format!(
                    "{} events are derived from order status changes",
                    ctx.kind.name()
                )));
            }
            EventKind::Signup
            | EventKind::Review { .. }
            | EventKind::Birthday { .. }
            | EventKind::Share { .. }
            | EventKind::SocialFollow { .. }
            | EventKind::Custom { .. } => {}
        }
        self.ledger.ensure_user(user_id)?;
        if !self.config.enabled {
            return Ok(self.empty_outcome(user_id, ctx));
        }

        let config = self.settings.current();
        let (awards, rejections) = self.evaluate(user_id, ctx, &config, now)?;
        let outcome = EventRewardsOutcome {
            user_id: user_id.to_string(),
            event: ctx.kind.name().to_string(),
            config_version: config.version,
            awards,
            rejections,
        };
        debug!(
            user_id = %user_id,
            event = ctx.kind.name(),
            points = outcome.points_awarded(),
            "Event evaluated"
        );
        Ok(outcome)
    }

    fn empty_outcome(&self, user_id: &str, ctx: &EventContext) -> EventRewardsOutcome {
        EventRewardsOutcome {
            user_id: user_id.to_string(),
            event: ctx.kind.name().to_string(),
            config_version: self.settings.current().version,
            awards: Vec::new(),
            rejections: Vec::new(),
        }
    }

    /// Offer the event to every active campaign it fans out to. Only
    /// infrastructure failures abort; everything else is a per-campaign
    /// rejection.
    fn evaluate(
        &self,
        user_id: &str,
        ctx: &EventContext,
        config: &VersionedRewardsConfig,
        now: DateTime<Utc>,
    ) -> RewardsResult<(Vec<AwardOutcome>, Vec<CampaignRejection>)> {
        let mut awards = Vec::new();
        let mut rejections = Vec::new();
        for campaign_id in self.campaigns.active_for(&ctx.kind, now)? {
            match self.campaigns.try_award(campaign_id, user_id, ctx, config, now) {
                Ok(outcome) => awards.push(outcome),
                Err(e) if e.kind() == ErrorKind::Internal => return Err(e),
                Err(e) => {
                    if e.kind() == ErrorKind::Transient {
                        warn!(campaign_id = %campaign_id, user_id = %user_id, error = %e, "Campaign award skipped");
                    }
                    rejections.push(CampaignRejection::new(campaign_id, &e));
                }
            }
        }
        Ok((awards, rejections))
    }

    pub fn run_sweep(&self) -> SweepReport {
        self.sweeper.run(Utc::now())
    }
}

fn is_birthday(birthday: NaiveDate, today: NaiveDate) -> bool {
    if birthday.month() == today.month() && birthday.day() == today.day() {
        return true;
    }
    let leap_day = birthday.month() == 2 && birthday.day() == 29;
    let common_year = NaiveDate::from_ymd_opt(today.year(), 2, 29).is_none();
    leap_day && common_year && today.month() == 2 && today.day() == 28
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryUserDirectory;
    use chrono::{Duration, TimeZone};
    use rewards_core::campaign::{CampaignType, Frequency, NewCampaign, ValueType};
    use rewards_core::loyalty::RewardsConfig;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 10, 12, 0, 0).unwrap()
    }

    fn engine() -> LoyaltyEngine {
        let users = InMemoryUserDirectory::new();
        users.register("alice", now(), NaiveDate::from_ymd_opt(1992, 5, 10));
        users.register("bob", now(), NaiveDate::from_ymd_opt(2000, 2, 29));
        users.register("carol", now(), None);
        LoyaltyEngine::new(&AppConfig::default(), Arc::new(users)).unwrap()
    }

    fn order(id: &str, user: &str, subtotal: Decimal, status: OrderStatus) -> Order {
        Order {
            order_id: id.into(),
            user_id: user.into(),
            subtotal,
            tax: Decimal::ZERO,
            shipping: Decimal::ZERO,
            status,
        }
    }

    fn campaign(engine: &LoyaltyEngine, campaign_type: CampaignType, points: Decimal) -> Uuid {
        engine
            .campaigns()
            .create(
                NewCampaign {
                    name: format!("{:?} bonus", campaign_type),
                    description: None,
                    campaign_type,
                    reward_value: points,
                    value_type: ValueType::Fixed,
                    frequency: Frequency::Once,
                    budget_limit_dollars: None,
                    max_uses_per_user: None,
                    max_uses_total: None,
                    start_date: Some(now() - Duration::days(1)),
                    end_date: None,
                    auto_pause_on_budget: false,
                },
                now(),
            )
            .unwrap()
            .id
    }

    #[test]
    fn test_hundred_dollar_purchase_earns_thousand_points() {
        let engine = engine();
        let outcome = engine
            .on_order_status_changed_at(&order("o-1", "alice", dec!(100), OrderStatus::Completed), now())
            .unwrap();
        assert!(outcome.processed);
        assert_eq!(outcome.base_points_earned, 1000);
        assert_eq!(engine.balance_at("alice", now()).unwrap(), 1000);

        let repeat = engine
            .on_order_status_changed_at(&order("o-1", "alice", dec!(100), OrderStatus::Completed), now())
            .unwrap();
        assert!(!repeat.processed);
        assert_eq!(engine.balance_at("alice", now()).unwrap(), 1000);
    }

    #[test]
    fn test_earn_then_cancel_nets_to_zero() {
        let engine = engine();
        let purchase_bonus = campaign(&engine, CampaignType::Purchase, dec!(250));
        let completed = engine
            .on_order_status_changed_at(&order("o-7", "carol", dec!(80), OrderStatus::Completed), now())
            .unwrap();
        assert_eq!(completed.campaign_awards.len(), 1);
        assert_eq!(completed.campaign_awards[0].campaign_id, purchase_bonus);
        assert_eq!(engine.balance_at("carol", now()).unwrap(), 800 + 250);

        let cancelled = engine
            .on_order_status_changed_at(&order("o-7", "carol", dec!(80), OrderStatus::Cancelled), now())
            .unwrap();
        let reversal = cancelled.reversal.unwrap();
        assert_eq!(reversal.lots_reversed, 2);
        assert_eq!(reversal.points_reversed, 1050);
        assert_eq!(engine.balance_at("carol", now()).unwrap(), 0);
    }

    #[test]
    fn test_non_terminal_status_is_ignored() {
        let engine = engine();
        let outcome = engine
            .on_order_status_changed_at(&order("o-2", "alice", dec!(10), OrderStatus::Shipped), now())
            .unwrap();
        assert!(!outcome.processed);
        assert_eq!(engine.balance_at("alice", now()).unwrap(), 0);
    }

    #[test]
    fn test_referral_bonus_on_referred_purchase() {
        let engine = engine();
        campaign(&engine, CampaignType::Referral, dec!(1500));
        let code = engine.issue_referral_code("alice").unwrap();
        engine.register_referral(&code.code, "carol").unwrap();

        let outcome = engine
            .on_order_status_changed_at(&order("o-3", "carol", dec!(20), OrderStatus::Completed), now())
            .unwrap();
        assert_eq!(outcome.referral.as_ref().map(|r| r.awarded_points), Some(1500));
        assert_eq!(engine.balance_at("alice", now()).unwrap(), 1500);
        assert_eq!(engine.balance_at("carol", now()).unwrap(), 200);
    }

    #[test]
    fn test_cancelled_referred_order_reverses_referrer_bonus() {
        let engine = engine();
        campaign(&engine, CampaignType::Referral, dec!(1500));
        let code = engine.issue_referral_code("alice").unwrap();
        engine.register_referral(&code.code, "carol").unwrap();
        engine
            .on_order_status_changed_at(&order("o-3", "carol", dec!(20), OrderStatus::Completed), now())
            .unwrap();
        assert_eq!(engine.balance_at("alice", now()).unwrap(), 1500);

        let cancelled = engine
            .on_order_status_changed_at(&order("o-3", "carol", dec!(20), OrderStatus::Cancelled), now())
            .unwrap();
        assert!(cancelled.processed);
        assert_eq!(cancelled.reversal.unwrap().points_reversed, 200);
        let bonus = cancelled.referral_reversal.unwrap();
        assert_eq!(bonus.user_id, "alice");
        assert_eq!(bonus.points_reversed, 1500);
        assert_eq!(engine.balance_at("alice", now()).unwrap(), 0);
        assert_eq!(engine.balance_at("carol", now()).unwrap(), 0);
        assert!(engine.ledger().lots("alice", now()).unwrap().is_empty());
        assert_eq!(engine.referrals().referral_for("carol").unwrap().reward_earned, 0);

        let again = engine
            .on_order_status_changed_at(&order("o-3", "carol", dec!(20), OrderStatus::Refunded), now())
            .unwrap();
        assert!(!again.processed);
        assert_eq!(again.referral_reversal.unwrap().lots_reversed, 0);
    }

    #[test]
    fn test_unrelated_cancellation_leaves_referrer_bonus() {
        let engine = engine();
        campaign(&engine, CampaignType::Referral, dec!(1500));
        let code = engine.issue_referral_code("alice").unwrap();
        engine.register_referral(&code.code, "carol").unwrap();
        engine
            .on_order_status_changed_at(&order("o-3", "carol", dec!(20), OrderStatus::Completed), now())
            .unwrap();
        engine
            .on_order_status_changed_at(&order("o-4", "carol", dec!(30), OrderStatus::Completed), now())
            .unwrap();

        let cancelled = engine
            .on_order_status_changed_at(&order("o-4", "carol", dec!(30), OrderStatus::Cancelled), now())
            .unwrap();
        assert!(cancelled.referral_reversal.is_none());
        assert_eq!(engine.balance_at("alice", now()).unwrap(), 1500);
    }

    #[test]
    fn test_signup_and_birthday_campaigns() {
        let engine = engine();
        campaign(&engine, CampaignType::Welcome, dec!(100));
        campaign(&engine, CampaignType::Birthday, dec!(300));

        let signup = engine.record_event_at("carol", &EventContext::new(EventKind::Signup), now()).unwrap();
        assert_eq!(signup.points_awarded(), 100);
        let again = engine.record_event_at("carol", &EventContext::new(EventKind::Signup), now()).unwrap();
        assert_eq!(again.points_awarded(), 0);
        assert_eq!(again.rejections[0].reason, "already_claimed");

        let today = now().date_naive();
        assert_eq!(engine.on_birthday_at("alice", today, now()).unwrap().points_awarded(), 300);
        let not_today = engine.on_birthday_at("carol", today, now()).unwrap();
        assert!(not_today.awards.is_empty() && not_today.rejections.is_empty());
    }

    #[test]
    fn test_leap_day_birthday() {
        let feb_28_2025 = NaiveDate::from_ymd_opt(2025, 2, 28).unwrap();
        let feb_28_2024 = NaiveDate::from_ymd_opt(2024, 2, 28).unwrap();
        let leap = NaiveDate::from_ymd_opt(2000, 2, 29).unwrap();
        assert!(is_birthday(leap, feb_28_2025));
        assert!(!is_birthday(leap, feb_28_2024));
        assert!(is_birthday(leap, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));
    }

    #[test]
    fn test_purchase_events_rejected_on_engagement_path() {
        let engine = engine();
        let ctx = EventContext::new(EventKind::Purchase {
            order_id: "o".into(),
            subtotal: dec!(1),
        });
        assert!(matches!(
            engine.record_event_at("alice", &ctx, now()),
            Err(RewardsError::InvalidEntry(_))
        ));
    }

    #[test]
    fn test_config_update_applies_to_next_order() {
        let engine = engine();
        engine
            .settings()
            .update(
                RewardsConfig {
                    earning_percentage: dec!(2),
                    ..Default::default()
                },
                "ops",
                now(),
            )
            .unwrap();
        let outcome = engine
            .on_order_status_changed_at(&order("o-4", "alice", dec!(100), OrderStatus::Completed), now())
            .unwrap();
        assert_eq!(outcome.config_version, 2);
        assert_eq!(outcome.base_points_earned, 2000);
    }

    #[test]
    fn test_disabled_loyalty_ignores_events() {
        let users = InMemoryUserDirectory::new();
        users.register("alice", now(), None);
        let mut config = AppConfig::default();
        config.loyalty.enabled = false;
        let engine = LoyaltyEngine::new(&config, Arc::new(users)).unwrap();
        let outcome = engine
            .on_order_status_changed_at(&order("o-1", "alice", dec!(100), OrderStatus::Completed), now())
            .unwrap();
        assert!(!outcome.processed);
        assert_eq!(engine.balance_at("alice", now()).unwrap(), 0);
    }
}
