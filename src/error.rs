use std::sync::Arc;

/// Represents a result type for fallible operations of this crate.
///
/// The error variant is the crate-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by collaborators of the decision service (network, I/O, malformed payloads).
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The configuration payload could not be parsed.
    #[error("error parsing configuration")]
    ConfigurationParseError(#[source] Arc<serde_json::Error>),

    /// Invalid prediction endpoint configuration.
    #[error("invalid prediction endpoint configuration")]
    InvalidEndpoint(#[source] url::ParseError),

    /// The prediction service answered with a non-success status.
    #[error("CMAB request failed with status {status}")]
    CmabRequestFailed {
        /// HTTP status returned by the service.
        status: u16,
    },

    /// The prediction service answered with a body that does not carry a variation.
    #[error("invalid CMAB fetch response")]
    CmabInvalidResponse,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::ConfigurationParseError(Arc::new(value))
    }
}

/// Terminal failure of a decision. Unlike "no decision", these stop the flag precedence chain and
/// are surfaced to the caller as the decision result.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecisionError {
    /// Contextual-bandit rules can only be decided from callers that may block.
    #[error("CMAB is not supported in sync mode.")]
    CmabNotSupportedInSyncMode,

    /// The contextual-bandit service failed to produce a decision.
    #[error("Failed to fetch CMAB data for experiment: {experiment_key}.")]
    CmabFetchFailed {
        /// Key of the experiment being decided.
        experiment_key: String,
    },
}

/// Recoverable anomalies met while evaluating conditions or bucketing. They are recorded as error
/// reasons while evaluation of sibling branches continues.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EvaluationError {
    /// Condition tree does not follow the expected shape.
    #[error("Condition has an invalid format: {0}.")]
    ConditionInvalidFormat(&'static str),

    /// Audience id referenced by a condition is not in the configuration.
    #[error("Audience ({0}) is not in datafile.")]
    AudienceNotFound(String),

    /// Leaf condition type is not supported.
    #[error("Audience condition ({0}) uses an unknown condition type. You may need to upgrade to a newer release of the SDK.")]
    UnknownConditionType(String),

    /// Leaf condition match type is not supported.
    #[error("Audience condition ({0}) uses an unknown match type. You may need to upgrade to a newer release of the SDK.")]
    UnknownMatchType(String),

    /// Leaf condition has no attribute name.
    #[error("Audience condition ({0}) has an invalid attribute name.")]
    InvalidAttributeName(String),

    /// Expected value of the condition is missing.
    #[error("Audience condition ({0}) evaluated to UNKNOWN because the condition value is null.")]
    MissingConditionValue(String),

    /// Expected value of the condition is not usable with its match type.
    #[error("Audience condition ({0}) has an unsupported condition value. You may need to upgrade to a newer release of the SDK.")]
    InvalidConditionValue(String),

    /// User has no value for the attribute the condition reads.
    #[error("Audience condition ({condition}) evaluated to UNKNOWN because no value was passed for user attribute \"{name}\".")]
    MissingAttributeValue {
        /// Serialized condition.
        condition: String,
        /// Attribute name.
        name: String,
    },

    /// User attribute value is null.
    #[error("Audience condition ({condition}) evaluated to UNKNOWN because a null value was passed for user attribute \"{name}\".")]
    NullAttributeValue {
        /// Serialized condition.
        condition: String,
        /// Attribute name.
        name: String,
    },

    /// User attribute type does not match the condition value type.
    #[error("Audience condition ({condition}) evaluated to UNKNOWN because a value of an unexpected type was passed for user attribute \"{name}\".")]
    InvalidAttributeType {
        /// Serialized condition.
        condition: String,
        /// Attribute name.
        name: String,
    },

    /// Numeric user attribute is outside the safely representable integer range.
    #[error("Audience condition ({condition}) evaluated to UNKNOWN because the number value for user attribute \"{name}\" is not in the range [-2^53, +2^53].")]
    AttributeValueOutOfRange {
        /// Serialized condition.
        condition: String,
        /// Attribute name.
        name: String,
    },

    /// Version string could not be parsed.
    #[error("Attribute or value is not a valid version: {0}.")]
    InvalidSemanticVersion(String),

    /// Whitelisted variation key does not exist in the experiment.
    #[error("Variation \"{variation_key}\" is not in experiment \"{experiment_key}\".")]
    VariationKeyNotFound {
        /// Experiment key.
        experiment_key: String,
        /// Variation key.
        variation_key: String,
    },

    /// Bucketed variation id does not exist in the rule.
    #[error("Variation ID \"{variation_id}\" is not in rule \"{rule_key}\".")]
    VariationIdNotFound {
        /// Rule key.
        rule_key: String,
        /// Variation id.
        variation_id: String,
    },

    /// Experiment has no traffic allocation.
    #[error("Experiment \"{0}\" has no traffic allocation.")]
    ExperimentHasNoTrafficAllocation(String),

    /// Mutual exclusion group has no traffic allocation.
    #[error("Group \"{0}\" has no traffic allocation.")]
    GroupHasNoTrafficAllocation(String),

    /// Flag points at a rollout that is not in the configuration.
    #[error("Invalid rollout ID \"{rollout_id}\" attached to feature \"{flag_key}\".")]
    RolloutNotFound {
        /// Rollout id.
        rollout_id: String,
        /// Flag key.
        flag_key: String,
    },

    /// Flag points at an experiment that is not in the configuration.
    #[error("Experiment ID \"{0}\" is not in datafile.")]
    ExperimentIdNotFound(String),
}
