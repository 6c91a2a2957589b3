use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::loyalty::UserId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    /// Waiting for the referred user's first qualifying purchase.
    Pending,
    Converted,
}

/// Referrer → referred relationship.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Referral {
    pub referrer_id: UserId,
    pub referred_id: UserId,
    pub referral_code: String,
    pub created_at: DateTime<Utc>,
    /// Points credited to the referrer. Display copy of the ledger entry.
    pub reward_earned: i64,
    pub status: ReferralStatus,
    pub converted_at: Option<DateTime<Utc>>,
    pub converting_order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferralCode {
    pub code: String,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
}
