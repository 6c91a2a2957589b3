//! Campaign registry, lifecycle transitions and the award critical section.
//!
//! An award checks status, frequency, caps and budget and then writes the
//! ledger entry, usage record and counters while holding the campaign lock
//! followed by the recipient's ledger lock. Nothing takes those two locks in
//! the opposite order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rewards_core::campaign::*;
use rewards_core::loyalty::{floor_points, NewLedgerEntry, PointsSource, RewardsConfig, VersionedRewardsConfig};
use rewards_core::{RewardsError, RewardsResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ledger::PointsLedger;
use crate::locking::LockPolicy;

pub(crate) struct CampaignState {
    campaign: Campaign,
    usage: Vec<CampaignUsageRecord>,
}

/// Counters recomputed from the usage log next to the stored ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconcileReport {
    pub campaign_id: Uuid,
    pub usage_records: usize,
    pub recorded_uses: u64,
    pub recomputed_uses: u64,
    pub recorded_spent_dollars: Decimal,
    pub recomputed_spent_dollars: Decimal,
    pub in_sync: bool,
}

pub struct CampaignEngine {
    campaigns: DashMap<Uuid, Arc<Mutex<CampaignState>>>,
    ledger: Arc<PointsLedger>,
    locks: LockPolicy,
}

impl CampaignEngine {
    pub fn new(ledger: Arc<PointsLedger>, locks: LockPolicy) -> Self {
        Self {
            campaigns: DashMap::new(),
            ledger,
            locks,
        }
    }

    fn state(&self, campaign_id: Uuid) -> RewardsResult<Arc<Mutex<CampaignState>>> {
        self.campaigns
            .get(&campaign_id)
            .map(|r| r.value().clone())
            .ok_or(RewardsError::CampaignNotFound(campaign_id))
    }

    fn resource(campaign_id: Uuid) -> String {
        format!("campaign:{}", campaign_id)
    }

    /// A campaign found past its end date is ended on the spot.
    fn end_if_past(campaign: &mut Campaign, now: DateTime<Utc>) {
        if campaign.status != CampaignStatus::Ended && campaign.has_ended_by(now) {
            campaign.status = CampaignStatus::Ended;
            campaign.updated_at = now;
            info!(campaign_id = %campaign.id, "Campaign ended after end_date");
        }
    }

    // ─── Admin ──────────────────────────────────────────────────────────

    pub fn create(&self, request: NewCampaign, now: DateTime<Utc>) -> RewardsResult<Campaign> {
        let campaign = Campaign::from_request(request, now)?;
        info!(
            campaign_id = %campaign.id,
            name = %campaign.name,
            campaign_type = ?campaign.campaign_type,
            budget = ?campaign.budget_limit_dollars,
            "Campaign created"
        );
        self.campaigns.insert(
            campaign.id,
            Arc::new(Mutex::new(CampaignState {
                campaign: campaign.clone(),
                usage: Vec::new(),
            })),
        );
        Ok(campaign)
    }

    pub fn update(
        &self,
        campaign_id: Uuid,
        update: CampaignUpdate,
        now: DateTime<Utc>,
    ) -> RewardsResult<Campaign> {
        let handle = self.state(campaign_id)?;
        let mut state = self.locks.acquire(&handle, &Self::resource(campaign_id))?;
        Self::end_if_past(&mut state.campaign, now);
        if state.campaign.status == CampaignStatus::Ended {
            return Err(RewardsError::InvalidCampaign(format!(
                "campaign {} has ended and can no longer be modified",
                campaign_id
            )));
        }
        state.campaign.apply(update, now)?;
        info!(campaign_id = %campaign_id, "Campaign updated");
        Ok(state.campaign.clone())
    }

    pub fn pause(&self, campaign_id: Uuid, now: DateTime<Utc>) -> RewardsResult<Campaign> {
        self.transition(campaign_id, CampaignStatus::Paused, now)
    }

    pub fn resume(&self, campaign_id: Uuid, now: DateTime<Utc>) -> RewardsResult<Campaign> {
        self.transition(campaign_id, CampaignStatus::Active, now)
    }

    pub fn end(&self, campaign_id: Uuid, now: DateTime<Utc>) -> RewardsResult<Campaign> {
        self.transition(campaign_id, CampaignStatus::Ended, now)
    }

    fn transition(
        &self,
        campaign_id: Uuid,
        to: CampaignStatus,
        now: DateTime<Utc>,
    ) -> RewardsResult<Campaign> {
        let handle = self.state(campaign_id)?;
        let mut state = self.locks.acquire(&handle, &Self::resource(campaign_id))?;
        Self::end_if_past(&mut state.campaign, now);

        let from = state.campaign.status;
        if !from.can_transition(to) {
            return Err(RewardsError::InvalidTransition {
                campaign_id,
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        state.campaign.status = to;
        state.campaign.updated_at = now;
        info!(
            campaign_id = %campaign_id,
            from = from.as_str(),
            to = to.as_str(),
            "Campaign status changed"
        );
        Ok(state.campaign.clone())
    }

    pub fn get(&self, campaign_id: Uuid) -> RewardsResult<Campaign> {
        let handle = self.state(campaign_id)?;
        let state = self.locks.acquire(&handle, &Self::resource(campaign_id))?;
        Ok(state.campaign.clone())
    }

    /// All campaigns, oldest start first.
    pub fn list(&self) -> RewardsResult<Vec<Campaign>> {
        let handles: Vec<_> = self
            .campaigns
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect();
        let mut campaigns = Vec::with_capacity(handles.len());
        for (id, handle) in &handles {
            let state = self.locks.acquire(handle, &Self::resource(*id))?;
            campaigns.push(state.campaign.clone());
        }
        campaigns.sort_by_key(|c| (c.start_date, c.created_at));
        Ok(campaigns)
    }

    pub fn usage(&self, campaign_id: Uuid) -> RewardsResult<Vec<CampaignUsageRecord>> {
        let handle = self.state(campaign_id)?;
        let state = self.locks.acquire(&handle, &Self::resource(campaign_id))?;
        Ok(state.usage.clone())
    }

    pub fn budget_snapshot(&self) -> RewardsResult<Vec<CampaignBudgetView>> {
        Ok(self.list()?.iter().map(Campaign::budget_view).collect())
    }

    pub fn reconcile(&self, campaign_id: Uuid) -> RewardsResult<ReconcileReport> {
        let handle = self.state(campaign_id)?;
        let state = self.locks.acquire(&handle, &Self::resource(campaign_id))?;

        let recomputed_uses = state.usage.len() as u64;
        let recomputed_spent: Decimal = state.usage.iter().map(|r| r.dollar_cost).sum();
        let report = ReconcileReport {
            campaign_id,
            usage_records: state.usage.len(),
            recorded_uses: state.campaign.current_uses,
            recomputed_uses,
            recorded_spent_dollars: state.campaign.budget_spent_dollars,
            recomputed_spent_dollars: recomputed_spent,
            in_sync: recomputed_uses == state.campaign.current_uses
                && recomputed_spent == state.campaign.budget_spent_dollars,
        };
        if !report.in_sync {
            warn!(
                campaign_id = %campaign_id,
                recorded_uses = report.recorded_uses,
                recomputed_uses = report.recomputed_uses,
                recorded_spent = %report.recorded_spent_dollars,
                recomputed_spent = %report.recomputed_spent_dollars,
                "Campaign counters drifted from usage log"
            );
        }
        Ok(report)
    }

    /// Active campaigns an event fans out to automatically, oldest first.
    /// Custom campaigns only receive custom events here; any other event
    /// reaches them through an explicit award.
    pub fn active_for(&self, kind: &EventKind, now: DateTime<Utc>) -> RewardsResult<Vec<Uuid>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|c| c.status == CampaignStatus::Active && c.is_within_window(now))
            .filter(|c| match kind {
                EventKind::Custom { .. } => c.campaign_type == CampaignType::Custom,
                _ => c.campaign_type != CampaignType::Custom && kind.applies_to(c.campaign_type),
            })
            .map(|c| c.id)
            .collect())
    }

    // ─── Award ──────────────────────────────────────────────────────────

    pub fn try_award(
        &self,
        campaign_id: Uuid,
        user_id: &str,
        ctx: &EventContext,
        config: &VersionedRewardsConfig,
        now: DateTime<Utc>,
    ) -> RewardsResult<AwardOutcome> {
        let result = self.award(campaign_id, user_id, ctx, config, now);
        match &result {
            Ok(outcome) if outcome.awarded_points > 0 => {
                metrics::counter!("rewards.campaign_awards").increment(1);
                info!(
                    campaign_id = %campaign_id,
                    user_id = %user_id,
                    points = outcome.awarded_points,
                    cost = %outcome.dollar_cost,
                    auto_paused = outcome.auto_paused,
                    "Campaign points awarded"
                );
            }
            Ok(_) => {}
            Err(e) if e.is_rejection() => {
                metrics::counter!("rewards.award_rejections", "reason" => e.code()).increment(1);
                debug!(
                    campaign_id = %campaign_id,
                    user_id = %user_id,
                    event = ctx.kind.name(),
                    reason = e.code(),
                    "Campaign award rejected"
                );
            }
            Err(e) => {
                debug!(campaign_id = %campaign_id, user_id = %user_id, error = %e, "Campaign award failed");
            }
        }
        result
    }

    fn award(
        &self,
        campaign_id: Uuid,
        user_id: &str,
        ctx: &EventContext,
        config: &VersionedRewardsConfig,
        now: DateTime<Utc>,
    ) -> RewardsResult<AwardOutcome> {
        self.ledger.ensure_user(user_id)?;
        let handle = self.state(campaign_id)?;
        let mut guard = self.locks.acquire(&handle, &Self::resource(campaign_id))?;
        let state = &mut *guard;

        Self::end_if_past(&mut state.campaign, now);
        if state.campaign.status != CampaignStatus::Active || !state.campaign.is_within_window(now) {
            return Err(RewardsError::CampaignNotActive {
                campaign_id,
                at: now,
            });
        }
        if !ctx.kind.applies_to(state.campaign.campaign_type) {
            return Err(RewardsError::EventNotApplicable {
                campaign_id,
                event: ctx.kind.name().to_string(),
            });
        }

        let requested = candidate_points(&state.campaign, &ctx.kind, &config.config)?;
        if requested == 0 {
            return Ok(outcome(&state.campaign, user_id, 0, 0, Decimal::ZERO, false));
        }

        let claim_key = ctx.claim_key(user_id);
        check_frequency(state, &claim_key, ctx, now)?;

        if let Some(max) = state.campaign.max_uses_per_user {
            let used = state.usage.iter().filter(|r| r.user_id == user_id).count();
            if used >= max as usize {
                return Err(RewardsError::UserCapReached {
                    campaign_id,
                    user_id: user_id.to_string(),
                });
            }
        }
        if let Some(max) = state.campaign.max_uses_total {
            if state.campaign.current_uses >= max {
                return Err(RewardsError::CampaignCapReached(campaign_id));
            }
        }

        let ledger_handle = self.ledger.handle(user_id)?;
        let mut ledger = self
            .ledger
            .locks()
            .acquire(&ledger_handle, &PointsLedger::resource(user_id))?;

        let rate = config.config.points_per_currency_unit;
        let mut awarded = requested;
        let mut cost = Decimal::from(requested) / rate;
        let mut auto_paused = false;
        if let Some(remaining) = state.campaign.budget_remaining() {
            if cost > remaining {
                if !state.campaign.auto_pause_on_budget {
                    return Err(RewardsError::BudgetExceeded {
                        campaign_id,
                        cost,
                        remaining,
                    });
                }
                let affordable = remaining.checked_mul(rate).map_or(i64::MAX, floor_points);
                awarded = requested.min(affordable);
                cost = (Decimal::from(awarded) / rate).min(remaining);
                auto_paused = true;
            }
        }

        if awarded == 0 {
            // Nothing left to spend: pause without a usage record.
            state.campaign.status = CampaignStatus::Paused;
            state.campaign.updated_at = now;
            metrics::counter!("rewards.campaign_auto_paused").increment(1);
            info!(campaign_id = %campaign_id, "Campaign auto-paused on exhausted budget");
            return Ok(outcome(&state.campaign, user_id, 0, requested, Decimal::ZERO, true));
        }

        let mut entry = NewLedgerEntry::earn(user_id, awarded, PointsSource::Campaign(campaign_id))
            .with_campaign(campaign_id)
            .with_config_version(config.version)
            .with_reason(format!("campaign {}", state.campaign.name))
            .at(now);
        if let Some(order_id) = ctx.kind.order_id() {
            entry = entry.with_order(order_id);
        }
        let ledger_entry_id = ledger.append(entry, self.ledger.lifetime(), now)?;
        drop(ledger);

        let record = CampaignUsageRecord {
            id: Uuid::new_v4(),
            campaign_id,
            user_id: user_id.to_string(),
            claim_key,
            event_id: ctx.idempotency_key(),
            occurred_at: now,
            points_awarded: awarded,
            dollar_cost: cost,
            ledger_entry_id,
            config_version: config.version,
        };
        let usage_id = record.id;
        state.usage.push(record);
        state.campaign.current_uses += 1;
        state.campaign.budget_spent_dollars += cost;
        state.campaign.updated_at = now;
        if auto_paused {
            state.campaign.status = CampaignStatus::Paused;
            metrics::counter!("rewards.campaign_auto_paused").increment(1);
            info!(
                campaign_id = %campaign_id,
                spent = %state.campaign.budget_spent_dollars,
                "Campaign auto-paused on exhausted budget"
            );
        }

        let mut result = outcome(&state.campaign, user_id, awarded, requested, cost, auto_paused);
        result.ledger_entry_id = Some(ledger_entry_id);
        result.usage_id = Some(usage_id);
        Ok(result)
    }
}

fn outcome(
    campaign: &Campaign,
    user_id: &str,
    awarded_points: i64,
    requested_points: i64,
    dollar_cost: Decimal,
    auto_paused: bool,
) -> AwardOutcome {
    AwardOutcome {
        campaign_id: campaign.id,
        user_id: user_id.to_string(),
        awarded_points,
        requested_points,
        dollar_cost,
        auto_paused,
        status: campaign.status,
        ledger_entry_id: None,
        usage_id: None,
    }
}

fn candidate_points(campaign: &Campaign, kind: &EventKind, config: &RewardsConfig) -> RewardsResult<i64> {
    match campaign.value_type {
        ValueType::Fixed => Ok(floor_points(campaign.reward_value)),
        ValueType::Percentage => {
            let subtotal = kind.order_subtotal().ok_or_else(|| {
                RewardsError::InvalidEntry(format!(
                    "percentage campaign {} needs an order subtotal, got a {} event",
                    campaign.id,
                    kind.name()
                ))
            })?;
            let share = subtotal.checked_mul(campaign.reward_value).ok_or_else(|| {
                RewardsError::InvalidEntry(format!("order subtotal {} is too large to reward", subtotal))
            })?;
            config.points_for_amount(share / Decimal::ONE_HUNDRED)
        }
    }
}

fn check_frequency(
    state: &CampaignState,
    claim_key: &str,
    ctx: &EventContext,
    now: DateTime<Utc>,
) -> RewardsResult<()> {
    let mut claims = state.usage.iter().filter(|r| r.claim_key == claim_key);
    let already = match state.campaign.frequency {
        Frequency::Once => claims.next().is_some(),
        Frequency::Daily => {
            let today = now.date_naive();
            claims.any(|r| r.occurred_at.date_naive() == today)
        }
        Frequency::PerEvent => {
            let key = ctx.idempotency_key().ok_or_else(|| {
                RewardsError::InvalidEntry(format!(
                    "per_event campaign {} needs an event id for {} events",
                    state.campaign.id,
                    ctx.kind.name()
                ))
            })?;
            claims.any(|r| r.event_id.as_deref() == Some(key.as_str()))
        }
        Frequency::Unlimited => false,
    };
    if already {
        return Err(RewardsError::AlreadyClaimed {
            campaign_id: state.campaign.id,
            claim_key: claim_key.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryUserDirectory;
    use chrono::{Duration, TimeZone};
    use rewards_core::config::LoyaltyConfig;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    fn setup() -> (CampaignEngine, Arc<PointsLedger>, VersionedRewardsConfig) {
        let users = InMemoryUserDirectory::new();
        for user in ["alice", "bob", "carol"] {
            users.register(user, t0(), None);
        }
        let ledger = Arc::new(PointsLedger::new(
            Arc::new(users),
            &LoyaltyConfig::default(),
            LockPolicy::default(),
        ));
        let config = VersionedRewardsConfig {
            version: 1,
            config: RewardsConfig::default(),
            updated_at: t0(),
            updated_by: "test".into(),
        };
        (
            CampaignEngine::new(ledger.clone(), LockPolicy::default()),
            ledger,
            config,
        )
    }

    fn request(campaign_type: CampaignType, frequency: Frequency) -> NewCampaign {
        NewCampaign {
            name: "Bonus".into(),
            description: None,
            campaign_type,
            reward_value: dec!(500),
            value_type: ValueType::Fixed,
            frequency,
            budget_limit_dollars: None,
            max_uses_per_user: None,
            max_uses_total: None,
            start_date: Some(t0()),
            end_date: None,
            auto_pause_on_budget: false,
        }
    }

    fn review(id: &str) -> EventContext {
        EventContext::new(EventKind::Review {
            review_id: id.into(),
        })
    }

    #[test]
    fn test_twenty_first_award_auto_pauses_with_zero() {
        let (engine, ledger, config) = setup();
        let mut req = request(CampaignType::Review, Frequency::Unlimited);
        req.budget_limit_dollars = Some(dec!(10));
        req.auto_pause_on_budget = true;
        let campaign = engine.create(req, t0()).unwrap();

        for i in 0..20 {
            let outcome = engine
                .try_award(campaign.id, "alice", &review(&format!("r{}", i)), &config, t0())
                .unwrap();
            assert_eq!(outcome.awarded_points, 500);
            assert_eq!(outcome.dollar_cost, dec!(0.5));
            assert!(!outcome.auto_paused);
        }

        let outcome = engine
            .try_award(campaign.id, "alice", &review("r20"), &config, t0())
            .unwrap();
        assert_eq!(outcome.awarded_points, 0);
        assert!(outcome.auto_paused);
        assert_eq!(outcome.status, CampaignStatus::Paused);
        assert!(outcome.ledger_entry_id.is_none());

        let campaign = engine.get(campaign.id).unwrap();
        assert_eq!(campaign.budget_spent_dollars, dec!(10));
        assert_eq!(campaign.current_uses, 20);
        assert_eq!(ledger.balance("alice", t0()).unwrap(), 10_000);

        let err = engine
            .try_award(campaign.id, "alice", &review("r21"), &config, t0())
            .unwrap_err();
        assert!(matches!(err, RewardsError::CampaignNotActive { .. }));
    }

    #[test]
    fn test_auto_pause_clamps_partial_award() {
        let (engine, ledger, config) = setup();
        let mut req = request(CampaignType::Review, Frequency::Unlimited);
        req.budget_limit_dollars = Some(dec!(0.75));
        req.auto_pause_on_budget = true;
        let campaign = engine.create(req, t0()).unwrap();

        engine.try_award(campaign.id, "bob", &review("a"), &config, t0()).unwrap();
        let outcome = engine.try_award(campaign.id, "bob", &review("b"), &config, t0()).unwrap();
        assert_eq!(outcome.awarded_points, 250);
        assert_eq!(outcome.requested_points, 500);
        assert!(outcome.auto_paused);
        assert!(outcome.usage_id.is_some());
        assert_eq!(engine.get(campaign.id).unwrap().budget_spent_dollars, dec!(0.75));
        assert_eq!(ledger.balance("bob", t0()).unwrap(), 750);
    }

    #[test]
    fn test_budget_exceeded_without_auto_pause_changes_nothing() {
        let (engine, ledger, config) = setup();
        let mut req = request(CampaignType::Review, Frequency::Unlimited);
        req.budget_limit_dollars = Some(dec!(0.4));
        let campaign = engine.create(req, t0()).unwrap();

        let err = engine
            .try_award(campaign.id, "alice", &review("r1"), &config, t0())
            .unwrap_err();
        assert!(matches!(err, RewardsError::BudgetExceeded { .. }));
        assert_eq!(ledger.balance("alice", t0()).unwrap(), 0);
        assert!(engine.usage(campaign.id).unwrap().is_empty());
        assert_eq!(engine.get(campaign.id).unwrap().status, CampaignStatus::Active);
    }

    #[test]
    fn test_once_frequency() {
        let (engine, _, config) = setup();
        let campaign = engine
            .create(request(CampaignType::Welcome, Frequency::Once), t0())
            .unwrap();
        let signup = EventContext::new(EventKind::Signup);
        engine.try_award(campaign.id, "alice", &signup, &config, t0()).unwrap();
        let err = engine
            .try_award(campaign.id, "alice", &signup.clone().with_event_id("x"), &config, t0())
            .unwrap_err();
        assert!(matches!(err, RewardsError::AlreadyClaimed { .. }));
        engine.try_award(campaign.id, "bob", &signup, &config, t0()).unwrap();
    }

    #[test]
    fn test_daily_frequency_resets_at_utc_midnight() {
        let (engine, _, config) = setup();
        let campaign = engine
            .create(request(CampaignType::Share, Frequency::Daily), t0())
            .unwrap();
        let share = |t: &str| EventContext::new(EventKind::Share { target: t.into() });

        engine.try_award(campaign.id, "alice", &share("p1"), &config, t0()).unwrap();
        let later_same_day = t0() + Duration::hours(10);
        assert!(engine
            .try_award(campaign.id, "alice", &share("p2"), &config, later_same_day)
            .is_err());
        let next_day = t0() + Duration::hours(16);
        engine
            .try_award(campaign.id, "alice", &share("p3"), &config, next_day)
            .unwrap();
    }

    #[test]
    fn test_per_event_frequency_keys_on_event_id() {
        let (engine, _, config) = setup();
        let campaign = engine
            .create(request(CampaignType::Review, Frequency::PerEvent), t0())
            .unwrap();
        engine.try_award(campaign.id, "alice", &review("r1"), &config, t0()).unwrap();
        assert!(matches!(
            engine.try_award(campaign.id, "alice", &review("r1"), &config, t0()),
            Err(RewardsError::AlreadyClaimed { .. })
        ));
        engine.try_award(campaign.id, "alice", &review("r2"), &config, t0()).unwrap();

        let custom = engine
            .create(request(CampaignType::Custom, Frequency::PerEvent), t0())
            .unwrap();
        let quiz = EventContext::new(EventKind::Custom { name: "quiz".into() });
        assert!(matches!(
            engine.try_award(custom.id, "alice", &quiz, &config, t0()),
            Err(RewardsError::InvalidEntry(_))
        ));
        engine
            .try_award(custom.id, "alice", &quiz.with_event_id("quiz-1"), &config, t0())
            .unwrap();
    }

    #[test]
    fn test_usage_caps() {
        let (engine, _, config) = setup();
        let mut req = request(CampaignType::Review, Frequency::Unlimited);
        req.max_uses_per_user = Some(1);
        req.max_uses_total = Some(2);
        let campaign = engine.create(req, t0()).unwrap();

        engine.try_award(campaign.id, "alice", &review("1"), &config, t0()).unwrap();
        assert!(matches!(
            engine.try_award(campaign.id, "alice", &review("2"), &config, t0()),
            Err(RewardsError::UserCapReached { .. })
        ));
        engine.try_award(campaign.id, "bob", &review("3"), &config, t0()).unwrap();
        assert!(matches!(
            engine.try_award(campaign.id, "carol", &review("4"), &config, t0()),
            Err(RewardsError::CampaignCapReached(_))
        ));
    }

    #[test]
    fn test_inactive_and_inapplicable() {
        let (engine, _, config) = setup();
        let mut req = request(CampaignType::Review, Frequency::Unlimited);
        req.start_date = Some(t0() + Duration::days(1));
        req.end_date = Some(t0() + Duration::days(2));
        let campaign = engine.create(req, t0()).unwrap();

        assert!(matches!(
            engine.try_award(campaign.id, "alice", &review("1"), &config, t0()),
            Err(RewardsError::CampaignNotActive { .. })
        ));
        assert!(matches!(
            engine.try_award(
                campaign.id,
                "alice",
                &EventContext::new(EventKind::Signup),
                &config,
                t0() + Duration::hours(30)
            ),
            Err(RewardsError::EventNotApplicable { .. })
        ));

        let after_end = t0() + Duration::days(3);
        assert!(engine
            .try_award(campaign.id, "alice", &review("1"), &config, after_end)
            .is_err());
        assert_eq!(engine.get(campaign.id).unwrap().status, CampaignStatus::Ended);
        assert!(matches!(
            engine.try_award(campaign.id, "mallory", &review("1"), &config, t0()),
            Err(RewardsError::UnknownUser(_))
        ));
        assert!(matches!(
            engine.try_award(Uuid::new_v4(), "alice", &review("1"), &config, t0()),
            Err(RewardsError::CampaignNotFound(_))
        ));
    }

    #[test]
    fn test_percentage_award_uses_subtotal() {
        let (engine, ledger, config) = setup();
        let mut req = request(CampaignType::Purchase, Frequency::PerEvent);
        req.value_type = ValueType::Percentage;
        req.reward_value = dec!(5);
        let campaign = engine.create(req, t0()).unwrap();

        let purchase = EventContext::new(EventKind::Purchase {
            order_id: "o-1".into(),
            subtotal: dec!(40),
        });
        // 5% of $40 = $2 = 2000 points
        let outcome = engine.try_award(campaign.id, "carol", &purchase, &config, t0()).unwrap();
        assert_eq!(outcome.awarded_points, 2000);
        assert_eq!(outcome.dollar_cost, dec!(2));

        let entries = ledger.entries("carol").unwrap();
        assert_eq!(entries[0].source, PointsSource::Campaign(campaign.id));
        assert_eq!(entries[0].related_order_id.as_deref(), Some("o-1"));
        assert_eq!(entries[0].config_version, Some(1));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let (engine, _, _) = setup();
        let campaign = engine
            .create(request(CampaignType::Review, Frequency::Once), t0())
            .unwrap();
        assert!(matches!(
            engine.resume(campaign.id, t0()),
            Err(RewardsError::InvalidTransition { .. })
        ));
        assert_eq!(engine.pause(campaign.id, t0()).unwrap().status, CampaignStatus::Paused);
        assert_eq!(engine.resume(campaign.id, t0()).unwrap().status, CampaignStatus::Active);
        assert_eq!(engine.end(campaign.id, t0()).unwrap().status, CampaignStatus::Ended);
        assert!(engine.resume(campaign.id, t0()).is_err());
        assert!(engine
            .update(campaign.id, CampaignUpdate::default(), t0())
            .is_err());
    }

    #[test]
    fn test_active_for_and_reconcile() {
        let (engine, _, config) = setup();
        let review_campaign = engine
            .create(request(CampaignType::Review, Frequency::PerEvent), t0())
            .unwrap();
        let custom = engine
            .create(request(CampaignType::Custom, Frequency::Unlimited), t0())
            .unwrap();

        let review_kind = EventKind::Review { review_id: "r".into() };
        assert_eq!(engine.active_for(&review_kind, t0()).unwrap(), vec![review_campaign.id]);
        let quiz = EventKind::Custom { name: "quiz".into() };
        assert_eq!(engine.active_for(&quiz, t0()).unwrap(), vec![custom.id]);

        engine
            .try_award(review_campaign.id, "alice", &review("r"), &config, t0())
            .unwrap();
        let report = engine.reconcile(review_campaign.id).unwrap();
        assert!(report.in_sync);
        assert_eq!(report.recomputed_uses, 1);
        assert_eq!(report.recomputed_spent_dollars, dec!(0.5));
        assert_eq!(engine.budget_snapshot().unwrap().len(), 2);
    }

    #[test]
    fn test_listing_a_locked_campaign_reports_contention() {
        let (_, ledger, _) = setup();
        let policy = LockPolicy::new(
            std::time::Duration::from_millis(1),
            0,
            std::time::Duration::from_millis(1),
        );
        let engine = CampaignEngine::new(ledger, policy);
        let campaign = engine
            .create(request(CampaignType::Review, Frequency::Once), t0())
            .unwrap();

        let handle = engine.state(campaign.id).unwrap();
        let held = handle.lock();
        assert!(matches!(engine.list(), Err(RewardsError::Contention { .. })));
        assert!(matches!(
            engine.active_for(&EventKind::Review { review_id: "r".into() }, t0()),
            Err(RewardsError::Contention { .. })
        ));
        drop(held);
        assert_eq!(engine.list().unwrap().len(), 1);
    }
}
