//! Customer-facing rewards endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use rewards_core::campaign::{AwardOutcome, EventContext, EventKind};
use rewards_core::loyalty::PointsLot;
use rewards_core::order::{Order, OrderStatus};
use rewards_core::referral::{Referral, ReferralCode};
use rewards_loyalty::{EventRewardsOutcome, OrderRewardsOutcome, RedemptionQuote, RedemptionReceipt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rest::{blocking, ApiError, AppState};

/// Order amounts as seen at checkout.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutOrder {
    pub order_id: String,
    pub subtotal: Decimal,
    #[serde(default)]
    pub tax: Decimal,
    #[serde(default)]
    pub shipping: Decimal,
}

impl CheckoutOrder {
    fn into_order(self, user_id: &str) -> Order {
        Order {
            order_id: self.order_id,
            user_id: user_id.to_string(),
            subtotal: self.subtotal,
            tax: self.tax,
            shipping: self.shipping,
            status: OrderStatus::Pending,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MaxRedeemableRequest {
    pub user_id: String,
    pub order: CheckoutOrder,
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub user_id: String,
    pub points: i64,
    pub order: CheckoutOrder,
}

#[derive(Debug, Deserialize)]
pub struct AwardRequest {
    pub user_id: String,
    pub event: EventKind,
    #[serde(default)]
    pub event_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReferralCodeRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterReferralRequest {
    pub code: String,
    pub referred_id: String,
}

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub user_id: String,
    pub event: EventKind,
    #[serde(default)]
    pub event_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: String,
    pub balance: i64,
    pub lots: Vec<PointsLot>,
    pub config_version: u64,
    pub show_points_in_header: bool,
    pub show_points_on_product: bool,
}

/// GET /v1/rewards/balance/:user_id
pub async fn handle_balance(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let response = blocking(&state, move |engine| {
        let now = Utc::now();
        let balance = engine.ledger().balance(&user_id, now)?;
        let lots = engine.ledger().lots(&user_id, now)?;
        let config = engine.settings().current();
        Ok(BalanceResponse {
            user_id,
            balance,
            lots,
            config_version: config.version,
            show_points_in_header: config.config.show_points_in_header,
            show_points_on_product: config.config.show_points_on_product,
        })
    })
    .await?;
    Ok(Json(response))
}

/// POST /v1/rewards/max-redeemable
pub async fn handle_max_redeemable(
    State(state): State<AppState>,
    Json(request): Json<MaxRedeemableRequest>,
) -> Result<Json<RedemptionQuote>, ApiError> {
    let quote = blocking(&state, move |engine| {
        let order = request.order.into_order(&request.user_id);
        engine.max_redeemable(&request.user_id, &order)
    })
    .await?;
    Ok(Json(quote))
}

/// POST /v1/rewards/redeem
pub async fn handle_redeem(
    State(state): State<AppState>,
    Json(request): Json<RedeemRequest>,
) -> Result<Json<RedemptionReceipt>, ApiError> {
    let receipt = blocking(&state, move |engine| {
        let order = request.order.into_order(&request.user_id);
        engine.redeem(&request.user_id, request.points, &order)
    })
    .await?;
    metrics::counter!("rewards.api.redemptions").increment(1);
    Ok(Json(receipt))
}

/// POST /v1/rewards/campaigns/:id/award
pub async fn handle_award(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
    Json(request): Json<AwardRequest>,
) -> Result<Json<AwardOutcome>, ApiError> {
    let outcome = blocking(&state, move |engine| {
        let mut ctx = EventContext::new(request.event);
        ctx.event_id = request.event_id;
        engine.try_award(campaign_id, &request.user_id, &ctx)
    })
    .await?;
    Ok(Json(outcome))
}

/// POST /v1/rewards/referrals/code
pub async fn handle_referral_code(
    State(state): State<AppState>,
    Json(request): Json<ReferralCodeRequest>,
) -> Result<Json<ReferralCode>, ApiError> {
    let code = blocking(&state, move |engine| engine.issue_referral_code(&request.user_id)).await?;
    Ok(Json(code))
}

/// POST /v1/rewards/referrals
pub async fn handle_register_referral(
    State(state): State<AppState>,
    Json(request): Json<RegisterReferralRequest>,
) -> Result<(StatusCode, Json<Referral>), ApiError> {
    let referral = blocking(&state, move |engine| {
        engine.register_referral(&request.code, &request.referred_id)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(referral)))
}

/// GET /v1/rewards/referrals/:user_id: referrals made by a user.
pub async fn handle_referrals_by(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Referral>>, ApiError> {
    let referrals = blocking(&state, move |engine| {
        engine.ledger().ensure_user(&user_id)?;
        Ok(engine.referrals().referrals_by(&user_id))
    })
    .await?;
    Ok(Json(referrals))
}

/// POST /v1/rewards/orders/status: order collaborator hook.
pub async fn handle_order_status(
    State(state): State<AppState>,
    Json(order): Json<Order>,
) -> Result<Json<OrderRewardsOutcome>, ApiError> {
    let outcome = blocking(&state, move |engine| engine.on_order_status_changed(&order)).await?;
    metrics::counter!(
        "rewards.api.order_events",
        "status" => format!("{:?}", outcome.status).to_lowercase()
    )
    .increment(1);
    Ok(Json(outcome))
}

/// POST /v1/rewards/events: signup, birthday and engagement events.
pub async fn handle_event(
    State(state): State<AppState>,
    Json(request): Json<EventRequest>,
) -> Result<Json<EventRewardsOutcome>, ApiError> {
    let outcome = blocking(&state, move |engine| match request.event {
        EventKind::Signup => engine.on_signup(&request.user_id),
        EventKind::Birthday { .. } => engine.on_birthday(&request.user_id, Utc::now().date_naive()),
        event => {
            let mut ctx = EventContext::new(event);
            ctx.event_id = request.event_id;
            engine.record_event(&request.user_id, &ctx)
        }
    })
    .await?;
    metrics::counter!("rewards.api.events", "event" => outcome.event.clone()).increment(1);
    Ok(Json(outcome))
}
