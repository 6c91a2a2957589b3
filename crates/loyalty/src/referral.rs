//! Referral codes, referrer/referred links and the referral bonus trigger.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rewards_core::campaign::{AwardOutcome, CampaignType, EventContext, EventKind};
use rewards_core::loyalty::{UserId, VersionedRewardsConfig};
use rewards_core::order::Order;
use rewards_core::referral::{Referral, ReferralCode, ReferralStatus};
use rewards_core::{RewardsError, RewardsResult};
use tracing::{debug, info};
use uuid::Uuid;

use crate::campaign::CampaignEngine;
use crate::ledger::PointsLedger;

const CODE_SUFFIX_LEN: usize = 8;

pub struct ReferralTracker {
    codes: DashMap<String, ReferralCode>,
    codes_by_owner: DashMap<UserId, String>,
    /// Keyed by the referred user; a user is referred at most once.
    referrals: DashMap<UserId, Referral>,
    referral_campaign: RwLock<Option<Uuid>>,
    campaigns: Arc<CampaignEngine>,
    ledger: Arc<PointsLedger>,
    code_prefix: String,
}

impl ReferralTracker {
    pub fn new(campaigns: Arc<CampaignEngine>, ledger: Arc<PointsLedger>, code_prefix: &str) -> Self {
        Self {
            codes: DashMap::new(),
            codes_by_owner: DashMap::new(),
            referrals: DashMap::new(),
            referral_campaign: RwLock::new(None),
            campaigns,
            ledger,
            code_prefix: code_prefix.trim().to_uppercase(),
        }
    }

    /// The referrer's code, created on first request.
    pub fn issue_code(&self, referrer_id: &str, now: DateTime<Utc>) -> RewardsResult<ReferralCode> {
        self.ledger.ensure_user(referrer_id)?;

        match self.codes_by_owner.entry(referrer_id.to_string()) {
            Entry::Occupied(existing) => self
                .codes
                .get(existing.get())
                .map(|r| r.value().clone())
                .ok_or_else(|| {
                    RewardsError::Internal(anyhow::anyhow!(
                        "referral code {} of {} is missing",
                        existing.get(),
                        referrer_id
                    ))
                }),
            Entry::Vacant(slot) => {
                let code = loop {
                    let candidate = ReferralCode {
                        code: self.generate_code(),
                        owner_id: referrer_id.to_string(),
                        created_at: now,
                    };
                    if let Entry::Vacant(free) = self.codes.entry(candidate.code.clone()) {
                        free.insert(candidate.clone());
                        break candidate;
                    }
                };
                slot.insert(code.code.clone());
                info!(user_id = %referrer_id, code = %code.code, "Referral code issued");
                Ok(code)
            }
        }
    }

    fn generate_code(&self) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CODE_SUFFIX_LEN)
            .map(char::from)
            .collect();
        format!("{}-{}", self.code_prefix, suffix.to_uppercase())
    }

    pub fn register_referral(
        &self,
        code: &str,
        referred_id: &str,
        now: DateTime<Utc>,
    ) -> RewardsResult<Referral> {
        let owner = self
            .codes
            .get(&code.trim().to_uppercase())
            .map(|r| r.value().clone())
            .ok_or_else(|| RewardsError::InvalidCode(code.to_string()))?;
        self.ledger.ensure_user(referred_id)?;
        if owner.owner_id == referred_id {
            return Err(RewardsError::SelfReferral(referred_id.to_string()));
        }

        match self.referrals.entry(referred_id.to_string()) {
            Entry::Occupied(_) => Err(RewardsError::AlreadyReferred(referred_id.to_string())),
            Entry::Vacant(slot) => {
                let referral = Referral {
                    referrer_id: owner.owner_id.clone(),
                    referred_id: referred_id.to_string(),
                    referral_code: owner.code.clone(),
                    created_at: now,
                    reward_earned: 0,
                    status: ReferralStatus::Pending,
                    converted_at: None,
                    converting_order_id: None,
                };
                slot.insert(referral.clone());
                metrics::counter!("rewards.referrals_registered").increment(1);
                info!(
                    referrer_id = %referral.referrer_id,
                    referred_id = %referred_id,
                    "Referral registered"
                );
                Ok(referral)
            }
        }
    }

    /// Pin the campaign that pays referral bonuses. `None` falls back to the
    /// earliest active referral campaign.
    pub fn set_referral_campaign(&self, campaign_id: Option<Uuid>) -> RewardsResult<()> {
        if let Some(id) = campaign_id {
            let campaign = self.campaigns.get(id)?;
            if campaign.campaign_type != CampaignType::Referral {
                return Err(RewardsError::InvalidCampaign(format!(
                    "campaign {} is a {:?} campaign, not a referral campaign",
                    id, campaign.campaign_type
                )));
            }
        }
        *self.referral_campaign.write() = campaign_id;
        Ok(())
    }

    /// Credit the referrer for the referred user's qualifying purchase.
    /// `Ok(None)` means there was nothing to do.
    pub fn on_qualifying_purchase(
        &self,
        referred_id: &str,
        order: &Order,
        config: &VersionedRewardsConfig,
        now: DateTime<Utc>,
    ) -> RewardsResult<Option<AwardOutcome>> {
        let referral = match self.referrals.get(referred_id) {
            Some(r) if r.status == ReferralStatus::Pending => r.value().clone(),
            _ => return Ok(None),
        };

        let ctx = EventContext::new(EventKind::Referral {
            referred_id: referred_id.to_string(),
            order_id: order.order_id.clone(),
            subtotal: order.subtotal,
        });
        let pinned = *self.referral_campaign.read();
        let fallback = match pinned {
            Some(_) => None,
            None => self.campaigns.active_for(&ctx.kind, now)?.first().copied(),
        };
        let campaign_id = match pinned.or(fallback) {
            Some(id) => id,
            None => {
                debug!(referred_id = %referred_id, "No referral campaign to credit");
                return Ok(None);
            }
        };

        let outcome = match self
            .campaigns
            .try_award(campaign_id, &referral.referrer_id, &ctx, config, now)
        {
            Ok(outcome) => outcome,
            Err(RewardsError::AlreadyClaimed { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        if outcome.awarded_points > 0 {
            if let Some(mut stored) = self.referrals.get_mut(referred_id) {
                stored.reward_earned = outcome.awarded_points;
                stored.status = ReferralStatus::Converted;
                stored.converted_at = Some(now);
                stored.converting_order_id = Some(order.order_id.clone());
            }
            info!(
                referrer_id = %referral.referrer_id,
                referred_id = %referred_id,
                points = outcome.awarded_points,
                "Referral converted"
            );
        }
        Ok(Some(outcome))
    }

    /// The referrer paid for `order_id`, if that order converted the
    /// referral. The displayed reward is cleared; the claim stays used.
    pub fn on_order_reversed(&self, referred_id: &str, order_id: &str) -> Option<UserId> {
        let mut referral = self.referrals.get_mut(referred_id)?;
        if referral.converting_order_id.as_deref() != Some(order_id) {
            return None;
        }
        referral.reward_earned = 0;
        Some(referral.referrer_id.clone())
    }

    pub fn referral_for(&self, referred_id: &str) -> Option<Referral> {
        self.referrals.get(referred_id).map(|r| r.value().clone())
    }

    pub fn referrals_by(&self, referrer_id: &str) -> Vec<Referral> {
        let mut referrals: Vec<Referral> = self
            .referrals
            .iter()
            .filter(|r| r.referrer_id == referrer_id)
            .map(|r| r.value().clone())
            .collect();
        referrals.sort_by_key(|r| r.created_at);
        referrals
    }
}
