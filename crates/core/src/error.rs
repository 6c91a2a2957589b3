use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

pub type RewardsResult<T> = Result<T, RewardsError>;

#[derive(Error, Debug)]
pub enum RewardsError {
    // ─── Validation ─────────────────────────────────────────────────────────
    #[error("Invalid ledger entry: {0}")]
    InvalidEntry(String),

    #[error("Invalid rewards configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid campaign: {0}")]
    InvalidCampaign(String),

    // ─── Business rejections ────────────────────────────────────────────────
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Campaign {0} not found")]
    CampaignNotFound(Uuid),

    #[error("Campaign {campaign_id} is not active at {at}")]
    CampaignNotActive { campaign_id: Uuid, at: DateTime<Utc> },

    #[error("Campaign {campaign_id} does not apply to {event} events")]
    EventNotApplicable { campaign_id: Uuid, event: String },

    #[error("Campaign {campaign_id} already claimed for {claim_key}")]
    AlreadyClaimed { campaign_id: Uuid, claim_key: String },

    #[error("User {user_id} reached the usage cap of campaign {campaign_id}")]
    UserCapReached { campaign_id: Uuid, user_id: String },

    #[error("Campaign {0} reached its total usage cap")]
    CampaignCapReached(Uuid),

    #[error("Campaign {campaign_id} budget exceeded: cost ${cost}, remaining ${remaining}")]
    BudgetExceeded {
        campaign_id: Uuid,
        cost: Decimal,
        remaining: Decimal,
    },

    #[error("Insufficient points: need {requested}, have {available}")]
    InsufficientPoints { requested: i64, available: i64 },

    #[error("Redemption of {requested} points exceeds the cap of {max_redeemable}")]
    RedemptionExceedsCap { requested: i64, max_redeemable: i64 },

    #[error("Invalid referral code: {0}")]
    InvalidCode(String),

    #[error("User {0} cannot refer themselves")]
    SelfReferral(String),

    #[error("User {0} has already been referred")]
    AlreadyReferred(String),

    #[error("Campaign {campaign_id} cannot move from {from} to {to}")]
    InvalidTransition {
        campaign_id: Uuid,
        from: String,
        to: String,
    },

    // ─── Transient ──────────────────────────────────────────────────────────
    #[error("Contention on {resource} after {attempts} attempts")]
    Contention { resource: String, attempts: u32 },

    // ─── Infrastructure ─────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Coarse classification used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any mutation; surface verbatim.
    Validation,
    /// Expected business outcome; normal control flow.
    Rejected,
    NotFound,
    /// Safe to retry.
    Transient,
    Internal,
}

impl RewardsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidEntry(_) | Self::InvalidConfig(_) | Self::InvalidCampaign(_) => {
                ErrorKind::Validation
            }
            Self::UnknownUser(_) | Self::CampaignNotFound(_) => ErrorKind::NotFound,
            Self::CampaignNotActive { .. }
            | Self::EventNotApplicable { .. }
            | Self::AlreadyClaimed { .. }
            | Self::UserCapReached { .. }
            | Self::CampaignCapReached(_)
            | Self::BudgetExceeded { .. }
            | Self::InsufficientPoints { .. }
            | Self::RedemptionExceedsCap { .. }
            | Self::InvalidCode(_)
            | Self::SelfReferral(_)
            | Self::AlreadyReferred(_)
            | Self::InvalidTransition { .. } => ErrorKind::Rejected,
            Self::Contention { .. } => ErrorKind::Transient,
            Self::Config(_) | Self::Serialization(_) | Self::Io(_) | Self::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Stable snake_case code for API bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidEntry(_) => "invalid_entry",
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidCampaign(_) => "invalid_campaign",
            Self::UnknownUser(_) => "unknown_user",
            Self::CampaignNotFound(_) => "campaign_not_found",
            Self::CampaignNotActive { .. } => "campaign_not_active",
            Self::EventNotApplicable { .. } => "event_not_applicable",
            Self::AlreadyClaimed { .. } => "already_claimed",
            Self::UserCapReached { .. } => "user_cap_reached",
            Self::CampaignCapReached(_) => "campaign_cap_reached",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::InsufficientPoints { .. } => "insufficient_points",
            Self::RedemptionExceedsCap { .. } => "redemption_exceeds_cap",
            Self::InvalidCode(_) => "invalid_code",
            Self::SelfReferral(_) => "self_referral",
            Self::AlreadyReferred(_) => "already_referred",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Contention { .. } => "contention",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn is_rejection(&self) -> bool {
        self.kind() == ErrorKind::Rejected
    }
}
