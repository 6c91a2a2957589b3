//! Versioned global rewards configuration.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rewards_core::loyalty::{RewardsConfig, VersionedRewardsConfig};
use rewards_core::{RewardsError, RewardsResult};
use rust_decimal::Decimal;
use tracing::info;

struct SettingsState {
    current: Arc<VersionedRewardsConfig>,
    history: Vec<Arc<VersionedRewardsConfig>>,
}

/// Holds every accepted version. Readers take a snapshot `Arc` and compute
/// against it, so a concurrent update never changes a calculation midway.
pub struct RewardsSettings {
    state: RwLock<SettingsState>,
}

impl RewardsSettings {
    pub fn new(initial: RewardsConfig, now: DateTime<Utc>) -> RewardsResult<Self> {
        initial.validate()?;
        let first = Arc::new(VersionedRewardsConfig {
            version: 1,
            config: initial,
            updated_at: now,
            updated_by: "system".to_string(),
        });
        Ok(Self {
            state: RwLock::new(SettingsState {
                current: first.clone(),
                history: vec![first],
            }),
        })
    }

    pub fn current(&self) -> Arc<VersionedRewardsConfig> {
        self.state.read().current.clone()
    }

    pub fn version(&self, version: u64) -> Option<Arc<VersionedRewardsConfig>> {
        let state = self.state.read();
        // Versions are dense and start at 1.
        let idx = usize::try_from(version.checked_sub(1)?).ok()?;
        state.history.get(idx).cloned()
    }

    pub fn history(&self) -> Vec<Arc<VersionedRewardsConfig>> {
        self.state.read().history.clone()
    }

    pub fn update(
        &self,
        config: RewardsConfig,
        actor: &str,
        now: DateTime<Utc>,
    ) -> RewardsResult<Arc<VersionedRewardsConfig>> {
        config.validate()?;
        if actor.trim().is_empty() {
            return Err(RewardsError::InvalidConfig("updated_by must not be empty".into()));
        }

        let mut state = self.state.write();
        let next = Arc::new(VersionedRewardsConfig {
            version: state.current.version + 1,
            config,
            updated_at: now,
            updated_by: actor.to_string(),
        });
        state.history.push(next.clone());
        state.current = next.clone();

        info!(
            version = next.version,
            updated_by = %actor,
            earning_type = ?next.config.earning_type,
            points_per_currency_unit = %next.config.points_per_currency_unit,
            "Rewards config updated"
        );
        Ok(next)
    }

    /// Base purchase points for `subtotal` under the given version, or the
    /// current one when `version` is `None`.
    pub fn purchase_points(&self, subtotal: Decimal, version: Option<u64>) -> RewardsResult<i64> {
        let snapshot = match version {
            Some(v) => self
                .version(v)
                .ok_or_else(|| RewardsError::InvalidConfig(format!("unknown config version {}", v)))?,
            None => self.current(),
        };
        snapshot.config.purchase_points(subtotal)
    }
}
