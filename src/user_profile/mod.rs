//! Sticky bucketing: remembering which variation a user was bucketed into.
mod tracker;

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

pub(crate) use tracker::UserProfileTracker;

/// Variation a user was bucketed into for one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Id of the assigned variation.
    pub variation_id: String,
}

/// Persisted assignments of a user. The serialized shape (`user_id`, `experiment_bucket_map`,
/// `variation_id`) is shared with other SDKs reading the same store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserProfile {
    /// User the profile belongs to.
    pub user_id: String,
    /// Experiment id to assigned variation.
    #[serde(default)]
    pub experiment_bucket_map: HashMap<String, Bucket>,
}

impl UserProfile {
    /// Empty profile for `user_id`.
    pub fn new(user_id: impl Into<String>) -> UserProfile {
        UserProfile {
            user_id: user_id.into(),
            experiment_bucket_map: HashMap::new(),
        }
    }

    /// Variation id assigned for the experiment, if any.
    pub fn variation_id(&self, experiment_id: &str) -> Option<&str> {
        self.experiment_bucket_map
            .get(experiment_id)
            .map(|b| b.variation_id.as_str())
    }
}

/// External store for user profiles.
///
/// Implementations decide where profiles live (memory, disk, remote). The decision service looks
/// a profile up at most once per decision call and saves it at most once.
pub trait UserProfileService: Send + Sync {
    /// Profile of `user_id`, if any.
    fn lookup(&self, user_id: &str) -> Option<UserProfile>;
    /// Persist `profile`, replacing any previous profile of the same user.
    fn save(&self, profile: UserProfile);
}

/// [`UserProfileService`] keeping profiles in process memory.
#[derive(Debug, Default)]
pub struct InMemoryUserProfileService {
    profiles: RwLock<HashMap<String, UserProfile>>,
}

impl InMemoryUserProfileService {
    /// Create an empty store.
    pub fn new() -> InMemoryUserProfileService {
        InMemoryUserProfileService::default()
    }
}

impl UserProfileService for InMemoryUserProfileService {
    fn lookup(&self, user_id: &str) -> Option<UserProfile> {
        self.profiles
            .read()
            .expect("thread holding profile lock should not panic")
            .get(user_id)
            .cloned()
    }

    fn save(&self, profile: UserProfile) {
        self.profiles
            .write()
            .expect("thread holding profile lock should not panic")
            .insert(profile.user_id.clone(), profile);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_shape() {
        let mut profile = UserProfile::new("user");
        profile.experiment_bucket_map.insert(
            "exp".to_owned(),
            Bucket {
                variation_id: "var".to_owned(),
            },
        );

        assert_eq!(
            serde_json::to_value(&profile).unwrap(),
            serde_json::json!({
                "user_id": "user",
                "experiment_bucket_map": {"exp": {"variation_id": "var"}}
            })
        );
    }

    #[test]
    fn in_memory_service() {
        let service = InMemoryUserProfileService::new();
        assert!(service.lookup("user").is_none());

        let mut profile = UserProfile::new("user");
        profile.experiment_bucket_map.insert(
            "exp".to_owned(),
            Bucket {
                variation_id: "var".to_owned(),
            },
        );
        service.save(profile.clone());

        assert_eq!(service.lookup("user"), Some(profile));
        assert_eq!(
            service.lookup("user").unwrap().variation_id("exp"),
            Some("var")
        );
    }
}
