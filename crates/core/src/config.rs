use crate::loyalty::RewardsConfig;
use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `REWARDS_ENGINE__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub loyalty: LoyaltyConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Seed for the first rewards configuration version. Later versions
    /// come from the admin update operation, not from here.
    #[serde(default)]
    pub rewards: RewardsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            loyalty: LoyaltyConfig::default(),
            engine: EngineConfig::default(),
            rewards: RewardsConfig::default(),
        }
    }
}

// ─── Loyalty Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LoyaltyConfig {
    #[serde(default = "default_loyalty_enabled")]
    pub enabled: bool,
    /// Lifetime of earned points before the sweeper expires them.
    #[serde(default = "default_points_lifetime_months")]
    pub points_lifetime_months: u32,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_referral_code_prefix")]
    pub referral_code_prefix: String,
}

fn default_loyalty_enabled() -> bool { true }
fn default_points_lifetime_months() -> u32 { 12 }
fn default_sweep_interval_secs() -> u64 { 3600 }
fn default_referral_code_prefix() -> String { "REF".to_string() }

impl Default for LoyaltyConfig {
    fn default() -> Self {
        Self {
            enabled: default_loyalty_enabled(),
            points_lifetime_months: default_points_lifetime_months(),
            sweep_interval_secs: default_sweep_interval_secs(),
            referral_code_prefix: default_referral_code_prefix(),
        }
    }
}

// ─── Engine Config ──────────────────────────────────────────────────────────

/// Lock acquisition tuning for the ledger and campaign critical sections.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_max_lock_retries")]
    pub max_lock_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_lock_timeout_ms() -> u64 { 50 }
fn default_max_lock_retries() -> u32 { 3 }
fn default_retry_backoff_ms() -> u64 { 5 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            max_lock_retries: default_max_lock_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables only.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from an optional file, overlaid by environment
    /// variables (`REWARDS_ENGINE__LOYALTY__POINTS_LIFETIME_MONTHS=6`).
    pub fn load_from(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("REWARDS_ENGINE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
