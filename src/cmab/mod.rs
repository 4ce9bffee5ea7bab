//! Contextual multi-armed bandit (CMAB) decisions.
//!
//! Variations of CMAB experiments are not bucketed locally. They are predicted by a remote service
//! from a subset of the user's attributes. [`CmabService`] is the seam the decision service calls;
//! [`DefaultCmabService`] adds attribute filtering and a decision cache on top of a
//! [`CmabClient`].
mod client;
mod service;

pub use client::{CmabClient, CmabClientConfig, HttpCmabClient, RetryConfig};
pub use service::DefaultCmabService;

use crate::{decision::DecideOptions, ProjectConfig, Result, UserContext};

/// A variation predicted for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmabDecision {
    /// Id of the predicted variation.
    pub variation_id: String,
    /// Correlation id of the prediction, forwarded with impression events.
    pub cmab_uuid: String,
}

/// Provides CMAB decisions to the decision service.
pub trait CmabService: Send + Sync {
    /// Predict a variation of the CMAB experiment `rule_id` for `user`.
    fn get_decision(
        &self,
        config: &ProjectConfig,
        user: &UserContext,
        rule_id: &str,
        options: &DecideOptions,
    ) -> Result<CmabDecision>;
}
