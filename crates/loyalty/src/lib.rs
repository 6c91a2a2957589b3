//! Points ledger, campaign budgets, redemption and referrals.

pub mod campaign;
pub mod collaborators;
pub mod engine;
pub mod ledger;
pub mod locking;
pub mod redemption;
pub mod referral;
pub mod settings;
pub mod sweeper;

pub use campaign::{CampaignEngine, ReconcileReport};
pub use collaborators::{InMemoryUserDirectory, UserDirectory};
pub use engine::{CampaignRejection, EventRewardsOutcome, LoyaltyEngine, OrderRewardsOutcome};
pub use ledger::{Consumption, ExpiredLots, PointsLedger, ReversalOutcome};
pub use locking::LockPolicy;
pub use redemption::{RedemptionCalculator, RedemptionQuote, RedemptionReceipt};
pub use referral::ReferralTracker;
pub use settings::RewardsSettings;
pub use sweeper::{ExpirationSweeper, SweepFailure, SweepReport};
