//! Periodic expiry of points past their lifetime.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::ledger::PointsLedger;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SweepFailure {
    pub user_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub users_scanned: usize,
    pub lots_expired: usize,
    pub points_expired: i64,
    pub failures: Vec<SweepFailure>,
}

pub struct ExpirationSweeper {
    ledger: Arc<PointsLedger>,
}

impl ExpirationSweeper {
    pub fn new(ledger: Arc<PointsLedger>) -> Self {
        Self { ledger }
    }

    /// Expire every due lot. A user whose ledger cannot be locked is skipped
    /// and picked up again by the next run.
    pub fn run(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport {
            started_at: now,
            users_scanned: 0,
            lots_expired: 0,
            points_expired: 0,
            failures: Vec::new(),
        };

        for user_id in self.ledger.user_ids() {
            report.users_scanned += 1;
            match self.ledger.expire_due(&user_id, now) {
                Ok(expired) => {
                    report.lots_expired += expired.lots;
                    report.points_expired += expired.points;
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Expiry sweep skipped user");
                    report.failures.push(SweepFailure {
                        user_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            users = report.users_scanned,
            lots = report.lots_expired,
            points = report.points_expired,
            failures = report.failures.len(),
            "Expiry sweep complete"
        );
        report
    }

    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let sweeper = self.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || sweeper.run(Utc::now())).await {
                    error!(error = %e, "Expiry sweep task panicked");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryUserDirectory;
    use crate::ledger::Consumption;
    use crate::locking::LockPolicy;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use rewards_core::config::LoyaltyConfig;
    use rewards_core::loyalty::{NewLedgerEntry, PointsSource};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 29, 10, 0, 0).unwrap()
    }

    fn ledger() -> Arc<PointsLedger> {
        let users = InMemoryUserDirectory::new();
        users.register("alice", t0(), None);
        users.register("bob", t0(), None);
        Arc::new(PointsLedger::new(
            Arc::new(users),
            &LoyaltyConfig::default(),
            LockPolicy::default(),
        ))
    }

    #[test]
    fn test_sweep_twice_same_day_equals_once() {
        let ledger = ledger();
        ledger
            .append_at(NewLedgerEntry::earn("alice", 300, PointsSource::Review), t0())
            .unwrap();
        ledger
            .append_at(NewLedgerEntry::earn("bob", 100, PointsSource::Share), t0())
            .unwrap();
        ledger
            .consume("bob", 100, &Consumption::redeem("o-1"), t0())
            .unwrap();
        let fresh = t0() + ChronoDuration::days(200);
        ledger
            .append_at(NewLedgerEntry::earn("alice", 50, PointsSource::Review), fresh)
            .unwrap();

        let sweeper = ExpirationSweeper::new(ledger.clone());
        let day = t0() + ChronoDuration::days(367);
        let first = sweeper.run(day);
        assert_eq!(first.users_scanned, 2);
        assert_eq!(first.lots_expired, 1);
        assert_eq!(first.points_expired, 300);
        assert!(first.failures.is_empty());

        let second = sweeper.run(day + ChronoDuration::hours(5));
        assert_eq!(second.lots_expired, 0);
        assert_eq!(second.points_expired, 0);
        assert_eq!(ledger.balance("alice", day).unwrap(), 50);
    }

    #[test]
    fn test_leap_day_lot_expires_end_of_february() {
        let ledger = ledger();
        ledger
            .append_at(NewLedgerEntry::earn("alice", 10, PointsSource::Birthday), t0())
            .unwrap();
        let sweeper = ExpirationSweeper::new(ledger.clone());

        let before = Utc.with_ymd_and_hms(2025, 2, 28, 9, 59, 59).unwrap();
        assert_eq!(sweeper.run(before).points_expired, 0);
        let at = Utc.with_ymd_and_hms(2025, 2, 28, 10, 0, 0).unwrap();
        assert_eq!(sweeper.run(at).points_expired, 10);
    }

    #[test]
    fn test_locked_user_is_reported_and_batch_continues() {
        let users = InMemoryUserDirectory::new();
        users.register("alice", t0(), None);
        users.register("bob", t0(), None);
        let policy = LockPolicy::new(
            std::time::Duration::from_millis(1),
            0,
            std::time::Duration::from_millis(1),
        );
        let ledger = Arc::new(PointsLedger::new(Arc::new(users), &LoyaltyConfig::default(), policy));
        ledger
            .append_at(NewLedgerEntry::earn("alice", 40, PointsSource::Review), t0())
            .unwrap();
        ledger
            .append_at(NewLedgerEntry::earn("bob", 70, PointsSource::Share), t0())
            .unwrap();

        let sweeper = ExpirationSweeper::new(ledger.clone());
        let day = t0() + ChronoDuration::days(400);
        let bob = ledger.handle("bob").unwrap();
        let held = bob.lock();
        let report = sweeper.run(day);
        drop(held);

        assert_eq!(report.users_scanned, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].user_id, "bob");
        assert_eq!(report.lots_expired, 1);
        assert_eq!(report.points_expired, 40);

        let retry = sweeper.run(day);
        assert!(retry.failures.is_empty());
        assert_eq!(retry.points_expired, 70);
    }
}
