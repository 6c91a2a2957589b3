//! Admin endpoints: rewards configuration, campaign management and manual
//! sweeps.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use rewards_core::campaign::{Campaign, CampaignBudgetView, CampaignUpdate, CampaignUsageRecord, NewCampaign};
use rewards_core::loyalty::{RewardsConfig, VersionedRewardsConfig};
use rewards_loyalty::{ReconcileReport, SweepReport};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::rest::{blocking, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    pub updated_by: String,
    pub config: RewardsConfig,
}

#[derive(Debug, Deserialize)]
pub struct ReferralCampaignRequest {
    pub campaign_id: Option<Uuid>,
}

/// GET /v1/admin/rewards/config
pub async fn handle_get_config(State(state): State<AppState>) -> Result<Json<VersionedRewardsConfig>, ApiError> {
    let config = blocking(&state, |engine| Ok(engine.settings().current().as_ref().clone())).await?;
    Ok(Json(config))
}

/// PUT /v1/admin/rewards/config
pub async fn handle_update_config(
    State(state): State<AppState>,
    Json(request): Json<UpdateConfigRequest>,
) -> Result<Json<VersionedRewardsConfig>, ApiError> {
    let updated = blocking(&state, move |engine| {
        engine
            .settings()
            .update(request.config, &request.updated_by, Utc::now())
            .map(|v| v.as_ref().clone())
    })
    .await?;
    Ok(Json(updated))
}

/// GET /v1/admin/rewards/config/history
pub async fn handle_config_history(
    State(state): State<AppState>,
) -> Result<Json<Vec<VersionedRewardsConfig>>, ApiError> {
    let history: Vec<VersionedRewardsConfig> = blocking(&state, |engine| {
        Ok(engine
            .settings()
            .history()
            .iter()
            .map(|v| v.as_ref().clone())
            .collect())
    })
    .await?;
    Ok(Json(history))
}

/// GET /v1/admin/rewards/campaigns
pub async fn handle_list_campaigns(State(state): State<AppState>) -> Result<Json<Vec<Campaign>>, ApiError> {
    let campaigns = blocking(&state, |engine| engine.campaigns().list()).await?;
    Ok(Json(campaigns))
}

/// POST /v1/admin/rewards/campaigns
pub async fn handle_create_campaign(
    State(state): State<AppState>,
    Json(request): Json<NewCampaign>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    let campaign = blocking(&state, move |engine| engine.campaigns().create(request, Utc::now())).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

/// GET /v1/admin/rewards/campaigns/:id
pub async fn handle_get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    let campaign = blocking(&state, move |engine| engine.campaigns().get(id)).await?;
    Ok(Json(campaign))
}

/// PATCH /v1/admin/rewards/campaigns/:id
pub async fn handle_update_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<CampaignUpdate>,
) -> Result<Json<Campaign>, ApiError> {
    let campaign = blocking(&state, move |engine| engine.campaigns().update(id, update, Utc::now())).await?;
    Ok(Json(campaign))
}

/// POST /v1/admin/rewards/campaigns/:id/pause
pub async fn handle_pause_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    let campaign = blocking(&state, move |engine| engine.campaigns().pause(id, Utc::now())).await?;
    Ok(Json(campaign))
}

/// POST /v1/admin/rewards/campaigns/:id/resume
pub async fn handle_resume_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    let campaign = blocking(&state, move |engine| engine.campaigns().resume(id, Utc::now())).await?;
    Ok(Json(campaign))
}

/// POST /v1/admin/rewards/campaigns/:id/end
pub async fn handle_end_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    let campaign = blocking(&state, move |engine| engine.campaigns().end(id, Utc::now())).await?;
    Ok(Json(campaign))
}

/// GET /v1/admin/rewards/campaigns/:id/usage
pub async fn handle_campaign_usage(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<CampaignUsageRecord>>, ApiError> {
    let usage = blocking(&state, move |engine| engine.campaigns().usage(id)).await?;
    Ok(Json(usage))
}

/// GET /v1/admin/rewards/campaigns/:id/reconcile
pub async fn handle_reconcile_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReconcileReport>, ApiError> {
    let report = blocking(&state, move |engine| engine.campaigns().reconcile(id)).await?;
    Ok(Json(report))
}

/// GET /v1/admin/rewards/campaigns/budgets: budget dashboard.
pub async fn handle_budget_snapshot(
    State(state): State<AppState>,
) -> Result<Json<Vec<CampaignBudgetView>>, ApiError> {
    let budgets = blocking(&state, |engine| engine.campaigns().budget_snapshot()).await?;
    Ok(Json(budgets))
}

/// PUT /v1/admin/rewards/referrals/campaign: pin the referral campaign.
pub async fn handle_set_referral_campaign(
    State(state): State<AppState>,
    Json(request): Json<ReferralCampaignRequest>,
) -> Result<StatusCode, ApiError> {
    blocking(&state, move |engine| {
        engine.referrals().set_referral_campaign(request.campaign_id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/admin/rewards/sweep: run the expiry sweep now.
pub async fn handle_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, ApiError> {
    let report = blocking(&state, |engine| Ok(engine.run_sweep())).await?;
    info!(
        points_expired = report.points_expired,
        failures = report.failures.len(),
        "Manual expiry sweep"
    );
    Ok(Json(report))
}
