//! Parallel awards and redemptions against shared campaign and ledger state.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rewards_core::campaign::*;
use rewards_core::config::LoyaltyConfig;
use rewards_core::loyalty::{NewLedgerEntry, PointsSource, RewardsConfig, VersionedRewardsConfig};
use rewards_core::RewardsError;
use rewards_loyalty::{CampaignEngine, Consumption, InMemoryUserDirectory, LockPolicy, PointsLedger};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const USERS: usize = 8;
const THREADS: usize = 16;
const ATTEMPTS_PER_THREAD: usize = 10;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 1, 8, 0, 0).unwrap()
}

fn patient_locks() -> LockPolicy {
    LockPolicy::new(Duration::from_secs(2), 5, Duration::from_millis(1))
}

fn ledger() -> Arc<PointsLedger> {
    let users = InMemoryUserDirectory::new();
    for i in 0..USERS {
        users.register(&format!("user-{}", i), now(), None);
    }
    Arc::new(PointsLedger::new(
        Arc::new(users),
        &LoyaltyConfig::default(),
        patient_locks(),
    ))
}

fn config() -> VersionedRewardsConfig {
    VersionedRewardsConfig {
        version: 1,
        config: RewardsConfig::default(),
        updated_at: now(),
        updated_by: "test".into(),
    }
}

fn budgeted_campaign(engine: &CampaignEngine, budget: Decimal, auto_pause: bool) -> Campaign {
    engine
        .create(
            NewCampaign {
                name: "Flash reviews".into(),
                description: None,
                campaign_type: CampaignType::Review,
                reward_value: dec!(500),
                value_type: ValueType::Fixed,
                frequency: Frequency::Unlimited,
                budget_limit_dollars: Some(budget),
                max_uses_per_user: None,
                max_uses_total: None,
                start_date: Some(now()),
                end_date: None,
                auto_pause_on_budget: auto_pause,
            },
            now(),
        )
        .unwrap()
}

fn hammer(engine: Arc<CampaignEngine>, campaign_id: uuid::Uuid) -> (usize, i64) {
    let awarded = Arc::new(AtomicUsize::new(0));
    let points = Arc::new(AtomicI64::new(0));
    let config = Arc::new(config());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let engine = engine.clone();
            let awarded = awarded.clone();
            let points = points.clone();
            let config = config.clone();
            thread::spawn(move || {
                for i in 0..ATTEMPTS_PER_THREAD {
                    let user = format!("user-{}", (t + i) % USERS);
                    let ctx = EventContext::new(EventKind::Review {
                        review_id: format!("{}-{}", t, i),
                    });
                    match engine.try_award(campaign_id, &user, &ctx, &config, now()) {
                        Ok(outcome) if outcome.awarded_points > 0 => {
                            awarded.fetch_add(1, Ordering::SeqCst);
                            points.fetch_add(outcome.awarded_points, Ordering::SeqCst);
                        }
                        Ok(_) => {}
                        Err(RewardsError::BudgetExceeded { .. })
                        | Err(RewardsError::CampaignNotActive { .. }) => {}
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    (awarded.load(Ordering::SeqCst), points.load(Ordering::SeqCst))
}

#[test]
fn parallel_awards_never_overspend_budget() {
    let ledger = ledger();
    let engine = Arc::new(CampaignEngine::new(ledger.clone(), patient_locks()));
    // Room for exactly 25 awards of $0.50.
    let campaign = budgeted_campaign(&engine, dec!(12.5), false);

    let (awarded, points) = hammer(engine.clone(), campaign.id);
    assert_eq!(awarded, 25);
    assert_eq!(points, 25 * 500);

    let stored = engine.get(campaign.id).unwrap();
    assert_eq!(stored.budget_spent_dollars, dec!(12.5));
    assert_eq!(stored.current_uses, 25);
    assert_eq!(engine.usage(campaign.id).unwrap().len(), 25);
    assert!(engine.reconcile(campaign.id).unwrap().in_sync);

    let total: i64 = (0..USERS)
        .map(|i| ledger.balance(&format!("user-{}", i), now()).unwrap())
        .sum();
    assert_eq!(total, 25 * 500);
}

#[test]
fn parallel_awards_with_auto_pause_stop_at_budget() {
    let ledger = ledger();
    let engine = Arc::new(CampaignEngine::new(ledger.clone(), patient_locks()));
    let campaign = budgeted_campaign(&engine, dec!(10.25), true);

    let (awarded, points) = hammer(engine.clone(), campaign.id);
    // 20 full awards plus one clamped 250-point award.
    assert_eq!(awarded, 21);
    assert_eq!(points, 20 * 500 + 250);

    let stored = engine.get(campaign.id).unwrap();
    assert_eq!(stored.status, CampaignStatus::Paused);
    assert_eq!(stored.budget_spent_dollars, dec!(10.25));
    assert!(stored.budget_spent_dollars <= dec!(10.25));
}

#[test]
fn parallel_redemptions_never_overdraw() {
    let ledger = ledger();
    ledger
        .append_at(NewLedgerEntry::earn("user-0", 600, PointsSource::Purchase), now())
        .unwrap();
    ledger
        .append_at(NewLedgerEntry::earn("user-0", 400, PointsSource::Review), now())
        .unwrap();

    let succeeded = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..20)
        .map(|i| {
            let ledger = ledger.clone();
            let succeeded = succeeded.clone();
            thread::spawn(move || {
                match ledger.consume("user-0", 100, &Consumption::redeem(format!("o-{}", i)), now()) {
                    Ok(_) => {
                        succeeded.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(RewardsError::InsufficientPoints { .. }) => {}
                    Err(e) => panic!("unexpected error: {}", e),
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(succeeded.load(Ordering::SeqCst), 10);
    assert_eq!(ledger.balance("user-0", now()).unwrap(), 0);
    assert!(ledger.lots("user-0", now()).unwrap().is_empty());
}
