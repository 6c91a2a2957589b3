pub mod campaign;
pub mod config;
pub mod error;
pub mod loyalty;
pub mod order;
pub mod referral;

pub use config::AppConfig;
pub use error::{ErrorKind, RewardsError, RewardsResult};
