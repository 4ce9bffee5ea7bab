use std::fs::File;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    datafile::Datafile,
    user_profile::{InMemoryUserProfileService, UserProfile, UserProfileService},
    Attributes, ProjectConfig, UserContext,
};

pub(crate) fn load_datafile() -> ProjectConfig {
    let datafile: Datafile =
        serde_json::from_reader(File::open("tests/data/datafile.json").unwrap()).unwrap();
    ProjectConfig::new(datafile)
}

pub(crate) fn user(user_id: &str, attributes: &[(&str, crate::AttributeValue)]) -> UserContext {
    let attributes: Attributes = attributes
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    UserContext::new(user_id, attributes)
}

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// In-memory profile store counting how often it is read and written.
#[derive(Default)]
pub(crate) struct CountingProfileService {
    inner: InMemoryUserProfileService,
    lookups: AtomicUsize,
    saves: AtomicUsize,
}

impl CountingProfileService {
    pub(crate) fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub(crate) fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl UserProfileService for CountingProfileService {
    fn lookup(&self, user_id: &str) -> Option<UserProfile> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.lookup(user_id)
    }

    fn save(&self, profile: UserProfile) {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(profile)
    }
}
