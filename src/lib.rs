//! Decision core of a feature experimentation SDK.
//!
//! # Overview
//!
//! Given a [`ProjectConfig`] (experiments, feature flags, audiences, rollouts, holdouts and
//! mutual exclusion groups parsed from a datafile) and a [`UserContext`], the
//! [`DecisionService`] decides which variation, if any, the user is assigned to.
//!
//! Bucketing is deterministic: the same user, configuration and bucketing id always produce the
//! same assignment, here and in sibling SDKs sharing the hash function (MurmurHash3, seed 1,
//! 10 000 traffic slots).
//!
//! Every decision comes as a [`DecisionResponse`] carrying [`DecisionReasons`]: the anomalies
//! met while deciding and, on request, a step-by-step trace of the decision.
//!
//! Sticky bucketing is provided through a pluggable [`UserProfileService`]. Contextual-bandit
//! experiments are decided by a pluggable [`cmab::CmabService`].
//!
//! # Error Handling
//!
//! Failures of collaborators (network, I/O, malformed payloads) are represented by the [`Error`]
//! enum. Decisions themselves never fail on bad input: anomalies are recorded as error reasons
//! and the affected branch evaluates to "no decision". Only a failed contextual-bandit decision is
//! surfaced as a [`DecisionError`].
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages, with the `decision_core` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into decisions.
//!
//! # Examples
//!
//! ```
//! # use decision_core::{DecideOptions, DecisionServiceConfig, ProjectConfig, UserContext};
//! let config = ProjectConfig::from_json(r#"{
//!     "featureFlags": [{"id": "1", "key": "flag", "rolloutId": "r"}],
//!     "rollouts": [{"id": "r", "experiments": [{
//!         "id": "2", "key": "everyone_else", "status": "Running",
//!         "variations": [{"id": "3", "key": "on", "featureEnabled": true}],
//!         "trafficAllocation": [{"entityId": "3", "endOfRange": 10000}]
//!     }]}]
//! }"#).unwrap();
//!
//! let service = DecisionServiceConfig::new().to_decision_service();
//! let user = UserContext::new("user-1", Default::default());
//! let flag = config.get_flag("flag").unwrap();
//!
//! let response = service.get_decision_for_flag(&config, flag, &user, &DecideOptions::default(), false);
//! assert_eq!(response.result.unwrap().unwrap().variation.key, "on");
//! ```

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod attributes;
pub mod audience;
pub mod bucketer;
pub mod cmab;
pub mod datafile;
mod decision;
mod error;
pub mod lru_cache;
mod messages;
mod reasons;
pub mod sharder;
mod user_context;
mod user_profile;

#[cfg(test)]
mod test_support;

pub use attributes::{AttributeValue, Attributes, BUCKETING_ID_ATTRIBUTE};
pub use datafile::ProjectConfig;
pub use decision::{
    DecideOptions, DecisionResult, DecisionService, DecisionServiceConfig, DecisionSource,
    FeatureDecision, RuleRef, VariationDecision,
};
pub use error::{DecisionError, Error, EvaluationError, Result};
pub use reasons::{DecisionReasons, DecisionResponse};
pub use user_context::{ForcedDecisionKey, UserContext};
pub use user_profile::{Bucket, InMemoryUserProfileService, UserProfile, UserProfileService};
