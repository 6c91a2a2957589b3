//! API server: REST routes plus the Prometheus exporter.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use rewards_core::config::AppConfig;
use rewards_loyalty::LoyaltyEngine;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::rest::{self, AppState};
use crate::{admin_rest, loyalty_rest};

pub struct ApiServer {
    config: AppConfig,
    engine: Arc<LoyaltyEngine>,
}

/// All REST routes with middleware applied.
pub fn router(state: AppState) -> Router {
    let customer = Router::new()
        .route("/balance/:user_id", get(loyalty_rest::handle_balance))
        .route("/max-redeemable", post(loyalty_rest::handle_max_redeemable))
        .route("/redeem", post(loyalty_rest::handle_redeem))
        .route("/campaigns/:id/award", post(loyalty_rest::handle_award))
        .route("/referrals/code", post(loyalty_rest::handle_referral_code))
        .route("/referrals", post(loyalty_rest::handle_register_referral))
        .route("/referrals/:user_id", get(loyalty_rest::handle_referrals_by))
        .route("/orders/status", post(loyalty_rest::handle_order_status))
        .route("/events", post(loyalty_rest::handle_event));

    let admin = Router::new()
        .route(
            "/config",
            get(admin_rest::handle_get_config).put(admin_rest::handle_update_config),
        )
        .route("/config/history", get(admin_rest::handle_config_history))
        .route(
            "/campaigns",
            get(admin_rest::handle_list_campaigns).post(admin_rest::handle_create_campaign),
        )
        .route("/campaigns/budgets", get(admin_rest::handle_budget_snapshot))
        .route(
            "/campaigns/:id",
            get(admin_rest::handle_get_campaign).patch(admin_rest::handle_update_campaign),
        )
        .route("/campaigns/:id/pause", post(admin_rest::handle_pause_campaign))
        .route("/campaigns/:id/resume", post(admin_rest::handle_resume_campaign))
        .route("/campaigns/:id/end", post(admin_rest::handle_end_campaign))
        .route("/campaigns/:id/usage", get(admin_rest::handle_campaign_usage))
        .route("/campaigns/:id/reconcile", get(admin_rest::handle_reconcile_campaign))
        .route(
            "/referrals/campaign",
            axum::routing::put(admin_rest::handle_set_referral_campaign),
        )
        .route("/sweep", post(admin_rest::handle_sweep));

    Router::new()
        .nest("/v1/rewards", customer)
        .nest("/v1/admin/rewards", admin)
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl ApiServer {
    pub fn new(config: AppConfig, engine: Arc<LoyaltyEngine>) -> Self {
        Self { config, engine }
    }

    /// Start the HTTP REST server. Runs until the listener fails.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let state = AppState::new(self.engine.clone(), self.config.node_id.clone());
        let app = router(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);
        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
