//! Append-only points ledger. Every earn entry opens a lot; every negative
//! entry draws from exactly one lot, so balances, expiry and reversals are
//! all derived from lot lineage rather than from an algebraic sum.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rewards_core::config::LoyaltyConfig;
use rewards_core::loyalty::*;
use rewards_core::{RewardsError, RewardsResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::collaborators::UserDirectory;
use crate::locking::LockPolicy;

/// Why points leave a balance.
#[derive(Debug, Clone)]
pub struct Consumption {
    pub entry_type: EntryType,
    pub related_order_id: Option<String>,
    pub reason: String,
    pub config_version: Option<u64>,
}

impl Consumption {
    pub fn redeem(order_id: impl Into<String>) -> Self {
        Self {
            entry_type: EntryType::Redeem,
            related_order_id: Some(order_id.into()),
            reason: "redemption".to_string(),
            config_version: None,
        }
    }

    pub fn reverse(order_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            entry_type: EntryType::Reverse,
            related_order_id: Some(order_id.into()),
            reason: reason.into(),
            config_version: None,
        }
    }

    pub fn with_config_version(mut self, version: u64) -> Self {
        self.config_version = Some(version);
        self
    }
}

/// Effect of reversing the points earned by a cancelled or refunded order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReversalOutcome {
    pub user_id: UserId,
    pub order_id: String,
    pub lots_reversed: usize,
    /// Unspent points taken back from the order's own lots.
    pub points_reversed: i64,
    /// Already-redeemed order points recovered from other lots.
    pub points_clawed_back: i64,
    /// Redeemed order points the balance could not cover.
    pub unrecovered_points: i64,
    pub entry_ids: Vec<LedgerEntryId>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpiredLots {
    pub lots: usize,
    pub points: i64,
}

#[derive(Debug, Clone)]
struct Lot {
    entry_id: LedgerEntryId,
    source: PointsSource,
    campaign_id: Option<Uuid>,
    amount: i64,
    remaining: i64,
    related_order_id: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    reversed: bool,
}

impl Lot {
    fn view(&self) -> PointsLot {
        PointsLot {
            entry_id: self.entry_id,
            source: self.source,
            amount: self.amount,
            remaining: self.remaining,
            related_order_id: self.related_order_id.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// One user's rows. Only ever touched under that user's lock.
#[derive(Debug)]
pub(crate) struct UserLedger {
    user_id: UserId,
    entries: Vec<PointsLedgerEntry>,
    /// Oldest first; FIFO consumption walks this order.
    lots: Vec<Lot>,
}

impl UserLedger {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            entries: Vec::new(),
            lots: Vec::new(),
        }
    }

    /// Points spendable at `at`.
    pub(crate) fn available(&self, at: DateTime<Utc>) -> i64 {
        self.lots
            .iter()
            .filter(|lot| lot.created_at <= at && lot.expires_at > at)
            .fold(0i64, |total, lot| total.saturating_add(lot.remaining))
    }

    /// Historical balance: lots alive at `as_of`, less what had been drawn
    /// from each of them by then.
    fn balance_as_of(&self, as_of: DateTime<Utc>) -> i64 {
        let mut drawn: HashMap<LedgerEntryId, i64> = HashMap::new();
        for entry in &self.entries {
            if let Some(lot_id) = entry.consumes_entry_id {
                if entry.created_at <= as_of {
                    let total = drawn.entry(lot_id).or_default();
                    *total = total.saturating_sub(entry.amount);
                }
            }
        }
        self.lots
            .iter()
            .filter(|lot| lot.created_at <= as_of && lot.expires_at > as_of)
            .map(|lot| lot.amount - drawn.get(&lot.entry_id).copied().unwrap_or(0))
            .fold(0i64, i64::saturating_add)
    }

    pub(crate) fn append(
        &mut self,
        entry: NewLedgerEntry,
        lifetime: Months,
        now: DateTime<Utc>,
    ) -> RewardsResult<LedgerEntryId> {
        entry.validate()?;
        if let Some(created_at) = entry.created_at.filter(|at| *at > now) {
            return Err(RewardsError::InvalidEntry(format!(
                "entry dated {} is in the future (now {})",
                created_at, now
            )));
        }
        if entry.entry_type.is_credit() {
            self.append_earn(entry, lifetime, now)
        } else {
            self.append_debit(entry, now)
        }
    }

    fn append_earn(
        &mut self,
        entry: NewLedgerEntry,
        lifetime: Months,
        now: DateTime<Utc>,
    ) -> RewardsResult<LedgerEntryId> {
        let created_at = entry.created_at.unwrap_or(now);
        let expires_at = created_at.checked_add_months(lifetime).ok_or_else(|| {
            RewardsError::InvalidEntry(format!("expiry of entry created at {} overflows", created_at))
        })?;

        let record = PointsLedgerEntry {
            id: Uuid::new_v4(),
            user_id: self.user_id.clone(),
            amount: entry.amount,
            entry_type: EntryType::Earn,
            source: entry.source,
            related_order_id: entry.related_order_id,
            campaign_id: entry.campaign_id,
            consumes_entry_id: None,
            config_version: entry.config_version,
            reason: entry.reason,
            created_at,
            expires_at: Some(expires_at),
        };
        let lot = Lot {
            entry_id: record.id,
            source: record.source,
            campaign_id: record.campaign_id,
            amount: record.amount,
            remaining: record.amount,
            related_order_id: record.related_order_id.clone(),
            created_at,
            expires_at,
            reversed: false,
        };
        let pos = self
            .lots
            .partition_point(|l| (l.created_at, l.expires_at) <= (created_at, expires_at));
        self.lots.insert(pos, lot);

        let id = record.id;
        metrics::counter!("rewards.points_earned").increment(record.amount as u64);
        self.entries.push(record);
        Ok(id)
    }

    /// A negative entry appended directly must name its lot and fit in it.
    fn append_debit(&mut self, entry: NewLedgerEntry, now: DateTime<Utc>) -> RewardsResult<LedgerEntryId> {
        let created_at = entry.created_at.unwrap_or(now);
        let lot_id = entry.consumes_entry_id.ok_or_else(|| {
            RewardsError::InvalidEntry(format!(
                "{} entries must reference the earn entry they consume",
                entry.entry_type.as_str()
            ))
        })?;
        let idx = self
            .lots
            .iter()
            .position(|l| l.entry_id == lot_id)
            .ok_or_else(|| RewardsError::InvalidEntry(format!("unknown earn entry {}", lot_id)))?;

        let requested = -entry.amount;
        let lot = &self.lots[idx];
        let expired = lot.expires_at <= created_at;
        match entry.entry_type {
            EntryType::Expire if !expired => {
                return Err(RewardsError::InvalidEntry(format!(
                    "earn entry {} does not expire until {}",
                    lot_id, lot.expires_at
                )));
            }
            EntryType::Redeem | EntryType::Reverse if expired => {
                return Err(RewardsError::InsufficientPoints {
                    requested,
                    available: 0,
                });
            }
            _ => {}
        }
        if lot.remaining < requested {
            return Err(RewardsError::InsufficientPoints {
                requested,
                available: lot.remaining,
            });
        }

        Ok(self.debit(
            idx,
            requested,
            entry.entry_type,
            entry.related_order_id,
            entry.reason,
            entry.config_version,
            created_at,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn debit(
        &mut self,
        lot_idx: usize,
        points: i64,
        entry_type: EntryType,
        related_order_id: Option<String>,
        reason: Option<String>,
        config_version: Option<u64>,
        at: DateTime<Utc>,
    ) -> LedgerEntryId {
        let lot = &mut self.lots[lot_idx];
        lot.remaining -= points;
        let record = PointsLedgerEntry {
            id: Uuid::new_v4(),
            user_id: self.user_id.clone(),
            amount: -points,
            entry_type,
            source: lot.source,
            related_order_id,
            campaign_id: lot.campaign_id,
            consumes_entry_id: Some(lot.entry_id),
            config_version,
            reason,
            created_at: at,
            expires_at: None,
        };
        let id = record.id;
        self.entries.push(record);
        id
    }

    /// Walk unexpired lots oldest-first. Caller guarantees `amount` is
    /// covered by `available(now)`.
    fn consume_fifo(&mut self, amount: i64, consumption: &Consumption, now: DateTime<Utc>) -> Vec<LedgerEntryId> {
        let mut left = amount;
        let mut ids = Vec::new();
        for idx in 0..self.lots.len() {
            if left == 0 {
                break;
            }
            let lot = &self.lots[idx];
            if lot.remaining == 0 || lot.created_at > now || lot.expires_at <= now {
                continue;
            }
            let take = lot.remaining.min(left);
            ids.push(self.debit(
                idx,
                take,
                consumption.entry_type,
                consumption.related_order_id.clone(),
                Some(consumption.reason.clone()),
                consumption.config_version,
                now,
            ));
            left -= take;
        }
        ids
    }

    pub(crate) fn consume(
        &mut self,
        amount: i64,
        consumption: &Consumption,
        now: DateTime<Utc>,
    ) -> RewardsResult<Vec<LedgerEntryId>> {
        if amount <= 0 {
            return Err(RewardsError::InvalidEntry(format!(
                "consumed amount must be positive, got {}",
                amount
            )));
        }
        if consumption.entry_type.is_credit() {
            return Err(RewardsError::InvalidEntry("cannot consume with an earn entry".into()));
        }
        let available = self.available(now);
        if available < amount {
            return Err(RewardsError::InsufficientPoints {
                requested: amount,
                available,
            });
        }
        Ok(self.consume_fifo(amount, consumption, now))
    }

    fn expire_due(&mut self, now: DateTime<Utc>) -> ExpiredLots {
        let mut expired = ExpiredLots::default();
        for idx in 0..self.lots.len() {
            let lot = &self.lots[idx];
            if lot.remaining == 0 || lot.expires_at > now {
                continue;
            }
            let points = lot.remaining;
            self.debit(
                idx,
                points,
                EntryType::Expire,
                None,
                Some("points expired".to_string()),
                None,
                now,
            );
            expired.lots += 1;
            expired.points += points;
        }
        expired
    }

    fn reverse_order(&mut self, order_id: &str, now: DateTime<Utc>) -> ReversalOutcome {
        let mut outcome = ReversalOutcome {
            user_id: self.user_id.clone(),
            order_id: order_id.to_string(),
            ..Default::default()
        };

        let targets: Vec<usize> = self
            .lots
            .iter()
            .enumerate()
            .filter(|(_, lot)| !lot.reversed && lot.related_order_id.as_deref() == Some(order_id))
            .map(|(idx, _)| idx)
            .collect();

        let mut shortfall = 0i64;
        for idx in targets {
            self.lots[idx].reversed = true;
            outcome.lots_reversed += 1;

            let lot_id = self.lots[idx].entry_id;
            let redeemed = self
                .entries
                .iter()
                .filter(|e| e.consumes_entry_id == Some(lot_id) && e.entry_type == EntryType::Redeem)
                .fold(0i64, |total, e| total.saturating_sub(e.amount));
            shortfall = shortfall.saturating_add(redeemed);

            let remaining = self.lots[idx].remaining;
            // Expired remainders belong to the sweeper.
            if remaining > 0 && self.lots[idx].expires_at > now {
                let id = self.debit(
                    idx,
                    remaining,
                    EntryType::Reverse,
                    Some(order_id.to_string()),
                    Some("order reversed".to_string()),
                    None,
                    now,
                );
                outcome.points_reversed += remaining;
                outcome.entry_ids.push(id);
            }
        }

        if shortfall > 0 {
            let recoverable = shortfall.min(self.available(now));
            if recoverable > 0 {
                let clawback = Consumption::reverse(order_id, "clawback of redeemed order points");
                let ids = self.consume_fifo(recoverable, &clawback, now);
                outcome.entry_ids.extend(ids);
            }
            outcome.points_clawed_back = recoverable;
            outcome.unrecovered_points = shortfall - recoverable;
        }
        outcome
    }
}

// ─── PointsLedger ───────────────────────────────────────────────────────────

/// Ledger for all users. Rows are partitioned per user; each partition has
/// its own lock so unrelated users never contend.
pub struct PointsLedger {
    users: Arc<dyn UserDirectory>,
    ledgers: DashMap<UserId, Arc<Mutex<UserLedger>>>,
    lifetime: Months,
    locks: LockPolicy,
}

impl PointsLedger {
    pub fn new(users: Arc<dyn UserDirectory>, config: &LoyaltyConfig, locks: LockPolicy) -> Self {
        info!(
            lifetime_months = config.points_lifetime_months,
            "Points ledger initialized"
        );
        Self {
            users,
            ledgers: DashMap::new(),
            lifetime: Months::new(config.points_lifetime_months),
            locks,
        }
    }

    pub fn lifetime(&self) -> Months {
        self.lifetime
    }

    pub(crate) fn locks(&self) -> &LockPolicy {
        &self.locks
    }

    pub fn ensure_user(&self, user_id: &str) -> RewardsResult<()> {
        if self.users.contains(user_id) {
            Ok(())
        } else {
            Err(RewardsError::UnknownUser(user_id.to_string()))
        }
    }

    pub(crate) fn handle(&self, user_id: &str) -> RewardsResult<Arc<Mutex<UserLedger>>> {
        if let Some(existing) = self.ledgers.get(user_id) {
            return Ok(existing.value().clone());
        }
        self.ensure_user(user_id)?;
        Ok(self
            .ledgers
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(UserLedger::new(user_id))))
            .value()
            .clone())
    }

    pub(crate) fn resource(user_id: &str) -> String {
        format!("ledger:{}", user_id)
    }

    pub fn append(&self, entry: NewLedgerEntry) -> RewardsResult<LedgerEntryId> {
        self.append_at(entry, Utc::now())
    }

    pub fn append_at(&self, entry: NewLedgerEntry, now: DateTime<Utc>) -> RewardsResult<LedgerEntryId> {
        entry.validate()?;
        let handle = self.handle(&entry.user_id)?;
        let mut ledger = self.locks.acquire(&handle, &Self::resource(&entry.user_id))?;
        let entry_type = entry.entry_type;
        let amount = entry.amount;
        let id = ledger.append(entry, self.lifetime, now)?;
        debug!(
            user_id = %ledger.user_id,
            entry_id = %id,
            entry_type = entry_type.as_str(),
            amount = amount,
            "Ledger entry appended"
        );
        Ok(id)
    }

    /// FIFO-consumable balance as of `as_of`.
    pub fn balance(&self, user_id: &str, as_of: DateTime<Utc>) -> RewardsResult<i64> {
        let handle = self.handle(user_id)?;
        let ledger = self.locks.acquire(&handle, &Self::resource(user_id))?;
        Ok(ledger.balance_as_of(as_of))
    }

    pub fn consume(
        &self,
        user_id: &str,
        amount: i64,
        consumption: &Consumption,
        now: DateTime<Utc>,
    ) -> RewardsResult<Vec<LedgerEntryId>> {
        self.consume_checked(user_id, amount, consumption, now, |_| Ok(()))
            .map(|(ids, _)| ids)
    }

    /// Consume after `guard` approves the amount against the balance seen
    /// under the user's lock. Returns the new entries and the balance after.
    pub fn consume_checked<F>(
        &self,
        user_id: &str,
        amount: i64,
        consumption: &Consumption,
        now: DateTime<Utc>,
        guard: F,
    ) -> RewardsResult<(Vec<LedgerEntryId>, i64)>
    where
        F: FnOnce(i64) -> RewardsResult<()>,
    {
        let handle = self.handle(user_id)?;
        let mut ledger = self.locks.acquire(&handle, &Self::resource(user_id))?;
        guard(ledger.available(now))?;
        let ids = ledger.consume(amount, consumption, now)?;
        let balance_after = ledger.available(now);

        if consumption.entry_type == EntryType::Redeem {
            metrics::counter!("rewards.points_redeemed").increment(amount as u64);
        }
        debug!(
            user_id = %user_id,
            amount = amount,
            lots = ids.len(),
            balance_after = balance_after,
            entry_type = consumption.entry_type.as_str(),
            "Points consumed"
        );
        Ok((ids, balance_after))
    }

    /// Reverse every earn lot tied to `order_id`. Safe to call repeatedly.
    pub fn reverse_order(
        &self,
        user_id: &str,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> RewardsResult<ReversalOutcome> {
        let handle = self.handle(user_id)?;
        let mut ledger = self.locks.acquire(&handle, &Self::resource(user_id))?;
        let outcome = ledger.reverse_order(order_id, now);
        if outcome.lots_reversed > 0 {
            info!(
                user_id = %user_id,
                order_id = %order_id,
                reversed = outcome.points_reversed,
                clawed_back = outcome.points_clawed_back,
                unrecovered = outcome.unrecovered_points,
                "Order points reversed"
            );
        }
        Ok(outcome)
    }

    /// Expire the unconsumed remainder of every lot due at `now`.
    pub fn expire_due(&self, user_id: &str, now: DateTime<Utc>) -> RewardsResult<ExpiredLots> {
        let handle = self.handle(user_id)?;
        let mut ledger = self.locks.acquire(&handle, &Self::resource(user_id))?;
        let expired = ledger.expire_due(now);
        if expired.points > 0 {
            metrics::counter!("rewards.points_expired").increment(expired.points as u64);
        }
        Ok(expired)
    }

    pub fn entries(&self, user_id: &str) -> RewardsResult<Vec<PointsLedgerEntry>> {
        let handle = self.handle(user_id)?;
        let ledger = self.locks.acquire(&handle, &Self::resource(user_id))?;
        Ok(ledger.entries.clone())
    }

    /// Lots still holding points at `at`, oldest first.
    pub fn lots(&self, user_id: &str, at: DateTime<Utc>) -> RewardsResult<Vec<PointsLot>> {
        let handle = self.handle(user_id)?;
        let ledger = self.locks.acquire(&handle, &Self::resource(user_id))?;
        Ok(ledger
            .lots
            .iter()
            .filter(|lot| lot.remaining > 0 && lot.created_at <= at && !lot.is_expired_at(at))
            .map(Lot::view)
            .collect())
    }

    /// Users with at least one ledger row.
    pub fn user_ids(&self) -> Vec<UserId> {
        self.ledgers.iter().map(|r| r.key().clone()).collect()
    }
}

impl Lot {
    fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at <= at
    }
}
