//! Decision service: the precedence chain deciding experiments and feature flags.
//!
//! For an experiment, the chain is: running check, runtime forced variation, whitelist, sticky
//! assignment, audience, then bucketing (or the CMAB service for contextual-bandit experiments).
//! For a flag: flag-level forced decision, holdouts, feature tests, then rollout rules.
mod experiment;
mod feature;
mod options;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use derive_more::Display;
use serde::Serialize;

pub use options::DecideOptions;

use crate::{
    bucketer::Bucketer,
    cmab::CmabService,
    datafile::{Experiment, Holdout, Rule, Variation},
    error::DecisionError,
    sharder::{Murmur3Sharder, Sharder},
    user_profile::{UserProfileService, UserProfileTracker},
    UserContext,
};

/// Outcome of a decision: `Ok(None)` when the user gets no variation, `Err` when the decision
/// could not be made.
pub type DecisionResult<T> = std::result::Result<Option<T>, DecisionError>;

/// Where a flag decision comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionSource {
    /// An experiment of the flag, or a forced decision.
    #[display("feature-test")]
    FeatureTest,
    /// A rollout rule of the flag.
    #[display("rollout")]
    Rollout,
    /// A holdout covering the flag.
    #[display("holdout")]
    Holdout,
}

/// The rule a flag decision was made by.
#[derive(Debug, Clone, Copy)]
pub enum RuleRef<'a> {
    /// An experiment or rollout rule.
    Experiment(&'a Experiment),
    /// A holdout.
    Holdout(&'a Holdout),
}

impl<'a> RuleRef<'a> {
    /// Id of the rule.
    pub fn id(&self) -> &'a str {
        match self {
            RuleRef::Experiment(experiment) => &experiment.id,
            RuleRef::Holdout(holdout) => &holdout.id,
        }
    }

    /// Key of the rule.
    pub fn key(&self) -> &'a str {
        match self {
            RuleRef::Experiment(experiment) => experiment.key(),
            RuleRef::Holdout(holdout) => holdout.key(),
        }
    }
}

/// Variation picked for a user in an experiment.
#[derive(Debug, Clone)]
pub struct VariationDecision<'a> {
    /// The variation the user is assigned to.
    pub variation: &'a Variation,
    /// Correlation id of the prediction when the variation was picked by a contextual bandit.
    pub cmab_uuid: Option<String>,
}

/// Variation picked for a user in a feature flag.
#[derive(Debug, Clone)]
pub struct FeatureDecision<'a> {
    /// Deciding rule. `None` for flag-level forced decisions.
    pub rule: Option<RuleRef<'a>>,
    /// The variation the user is assigned to.
    pub variation: &'a Variation,
    /// What produced the decision.
    pub source: DecisionSource,
    /// Correlation id of the prediction when the variation was picked by a contextual bandit.
    pub cmab_uuid: Option<String>,
}

/// Configuration for [`DecisionService`].
#[derive(Clone)]
pub struct DecisionServiceConfig<S = Murmur3Sharder> {
    sharder: S,
    user_profile_service: Option<Arc<dyn UserProfileService>>,
    cmab_service: Option<Arc<dyn CmabService>>,
    default_options: DecideOptions,
}

impl DecisionServiceConfig {
    /// Create a configuration without a user profile service or a CMAB service.
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use decision_core::{DecisionServiceConfig, InMemoryUserProfileService};
    /// let service = DecisionServiceConfig::new()
    ///     .user_profile_service(Arc::new(InMemoryUserProfileService::new()))
    ///     .to_decision_service();
    /// ```
    pub fn new() -> DecisionServiceConfig {
        DecisionServiceConfig {
            sharder: Murmur3Sharder,
            user_profile_service: None,
            cmab_service: None,
            default_options: DecideOptions::default(),
        }
    }
}

impl Default for DecisionServiceConfig {
    fn default() -> Self {
        DecisionServiceConfig::new()
    }
}

impl<S: Sharder + Clone> DecisionServiceConfig<S> {
    /// Set the store for sticky assignments. Without one, every decision is bucketed anew.
    pub fn user_profile_service(&mut self, service: Arc<dyn UserProfileService>) -> &mut Self {
        self.user_profile_service = Some(service);
        self
    }

    /// Set the service deciding contextual-bandit experiments. Without one, CMAB decisions fail.
    pub fn cmab_service(&mut self, service: Arc<dyn CmabService>) -> &mut Self {
        self.cmab_service = Some(service);
        self
    }

    /// Options applied to every call in addition to the per-call ones.
    pub fn default_options(&mut self, options: DecideOptions) -> &mut Self {
        self.default_options = options;
        self
    }

    /// Replace the hash function used for bucketing. Assignments are only reproducible across
    /// SDKs with the default sharder.
    pub fn sharder<T: Sharder + Clone>(self, sharder: T) -> DecisionServiceConfig<T> {
        DecisionServiceConfig {
            sharder,
            user_profile_service: self.user_profile_service,
            cmab_service: self.cmab_service,
            default_options: self.default_options,
        }
    }

    /// Create a new [`DecisionService`] using this configuration.
    pub fn to_decision_service(&self) -> DecisionService<S> {
        DecisionService::new(self.clone())
    }
}

/// Decides experiments and feature flags for users.
///
/// The service holds no configuration: every call takes the [`ProjectConfig`](crate::ProjectConfig)
/// snapshot to decide against. It is safe to share between threads.
pub struct DecisionService<S = Murmur3Sharder> {
    bucketer: Bucketer<S>,
    user_profile_service: Option<Arc<dyn UserProfileService>>,
    cmab_service: Option<Arc<dyn CmabService>>,
    default_options: DecideOptions,
    /// Runtime forced variations: experiment key to user id to variation id.
    forced_variations: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl<S: Sharder> DecisionService<S> {
    /// Create a new `DecisionService` using the specified configuration.
    pub fn new(config: DecisionServiceConfig<S>) -> DecisionService<S> {
        DecisionService {
            bucketer: Bucketer::new(config.sharder),
            user_profile_service: config.user_profile_service,
            cmab_service: config.cmab_service,
            default_options: config.default_options,
            forced_variations: RwLock::new(HashMap::new()),
        }
    }

    fn options(&self, options: &DecideOptions) -> DecideOptions {
        self.default_options.merge(options)
    }

    /// Tracker with the user's profile loaded, unless sticky assignments are off for this call.
    fn profile_tracker<'s>(
        &'s self,
        user: &'s UserContext,
        options: &DecideOptions,
    ) -> Option<UserProfileTracker<'s>> {
        if options.ignore_user_profile_service {
            return None;
        }
        let service = self.user_profile_service.as_deref()?;
        let mut tracker = UserProfileTracker::new(user.user_id(), service);
        tracker.load();
        Some(tracker)
    }
}
