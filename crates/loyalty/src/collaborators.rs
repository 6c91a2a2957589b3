//! Seams to the user-profile collaborator.

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use rewards_core::loyalty::UserId;
use rewards_core::order::UserProfile;

/// Read access to the user/profile service.
pub trait UserDirectory: Send + Sync {
    fn profile(&self, user_id: &str) -> Option<UserProfile>;

    fn contains(&self, user_id: &str) -> bool {
        self.profile(user_id).is_some()
    }
}

/// In-memory directory for development and tests.
///
/// Production: back this with the profile service client.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    profiles: DashMap<UserId, UserProfile>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, profile: UserProfile) {
        self.profiles.insert(profile.user_id.clone(), profile);
    }

    pub fn register(&self, user_id: &str, signed_up_at: DateTime<Utc>, birthday: Option<NaiveDate>) {
        self.upsert(UserProfile {
            user_id: user_id.to_string(),
            signed_up_at,
            birthday,
        });
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn profile(&self, user_id: &str) -> Option<UserProfile> {
        self.profiles.get(user_id).map(|r| r.value().clone())
    }
}
