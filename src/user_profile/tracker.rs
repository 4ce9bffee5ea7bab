use std::sync::{Mutex, PoisonError};

use super::{Bucket, UserProfile, UserProfileService};

/// Serializes profile writes across every tracker in the process, so that decision calls sharing
/// one store don't interleave their saves.
static SAVE_LOCK: Mutex<()> = Mutex::new(());

/// Per-call view of a user profile: loaded once, updated in memory, saved once.
pub(crate) struct UserProfileTracker<'a> {
    user_id: &'a str,
    service: &'a dyn UserProfileService,
    profile: Option<UserProfile>,
    updated: bool,
}

impl<'a> UserProfileTracker<'a> {
    pub(crate) fn new(
        user_id: &'a str,
        service: &'a dyn UserProfileService,
    ) -> UserProfileTracker<'a> {
        UserProfileTracker {
            user_id,
            service,
            profile: None,
            updated: false,
        }
    }

    pub(crate) fn load(&mut self) {
        self.profile = self.service.lookup(self.user_id);
        if self.profile.is_none() {
            log::debug!(target: "decision_core", user_id = self.user_id; "no user profile found");
        }
    }

    /// Variation id remembered for the experiment, including updates from this call.
    pub(crate) fn variation_id(&self, experiment_id: &str) -> Option<&str> {
        self.profile.as_ref()?.variation_id(experiment_id)
    }

    pub(crate) fn update(&mut self, experiment_id: &str, variation_id: &str) {
        log::debug!(target: "decision_core", user_id = self.user_id, experiment_id, variation_id; "updating user profile");
        self.profile
            .get_or_insert_with(|| UserProfile::new(self.user_id))
            .experiment_bucket_map
            .insert(
                experiment_id.to_owned(),
                Bucket {
                    variation_id: variation_id.to_owned(),
                },
            );
        self.updated = true;
    }

    /// Persist the profile if this call updated it.
    pub(crate) fn save(self) {
        let (true, Some(profile)) = (self.updated, self.profile) else {
            return;
        };

        let _guard = SAVE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        self.service.save(profile);
        log::debug!(target: "decision_core", user_id = self.user_id; "saved user profile");
    }
}
