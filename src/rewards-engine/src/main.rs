//! Rewards Engine: loyalty points, campaign budgets and redemption service.
//!
//! Main entry point that initializes the engine and starts the server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rewards_api::ApiServer;
use rewards_core::config::AppConfig;
use rewards_core::order::UserProfile;
use rewards_loyalty::{InMemoryUserDirectory, LoyaltyEngine};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "rewards-engine")]
#[command(about = "Loyalty points and campaign budget engine")]
#[command(version)]
struct Cli {
    /// Optional config file, overlaid by REWARDS_ENGINE__* variables
    #[arg(long, short = 'c', env = "REWARDS_ENGINE_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "REWARDS_ENGINE__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "REWARDS_ENGINE__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Metrics port (overrides config)
    #[arg(long, env = "REWARDS_ENGINE__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Expiry sweep interval in seconds (overrides config)
    #[arg(long, env = "REWARDS_ENGINE__LOYALTY__SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: Option<u64>,

    /// JSON array of user profiles to seed the in-memory directory with
    #[arg(long)]
    users: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rewards_engine=info,rewards_loyalty=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Rewards Engine starting up");

    // Load configuration
    let mut config = AppConfig::load_from(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    if let Some(secs) = cli.sweep_interval_secs {
        config.loyalty.sweep_interval_secs = secs;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        lifetime_months = config.loyalty.points_lifetime_months,
        sweep_interval_secs = config.loyalty.sweep_interval_secs,
        "Configuration loaded"
    );

    // User directory
    let users = InMemoryUserDirectory::new();
    if let Some(path) = &cli.users {
        let raw = std::fs::read_to_string(path)?;
        let profiles: Vec<UserProfile> = serde_json::from_str(&raw)?;
        for profile in profiles {
            users.upsert(profile);
        }
        info!(path = %path.display(), users = users.len(), "User directory seeded");
    }

    let engine = Arc::new(LoyaltyEngine::new(&config, Arc::new(users))?);

    // Start API server
    let api_server = ApiServer::new(config.clone(), engine.clone());

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    // Spawn expiry sweeper
    if config.loyalty.enabled && config.loyalty.sweep_interval_secs > 0 {
        engine
            .sweeper()
            .clone()
            .spawn(Duration::from_secs(config.loyalty.sweep_interval_secs));
        info!(interval_secs = config.loyalty.sweep_interval_secs, "Expiry sweeper scheduled");
    }

    info!("Rewards Engine is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}
