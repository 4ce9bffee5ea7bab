//! Informational messages recorded into decision reasons.
use std::fmt;

use derive_more::Display;

use crate::{audience::ConditionHolder, user_context::ForcedDecisionKey};

/// What an audience evaluation is run for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub(crate) enum EvaluationKind {
    #[display("experiment")]
    Experiment,
    #[display("rule")]
    Rule,
    #[display("holdout")]
    Holdout,
}

/// Tri-state result rendered the way reasons spell it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TriState(pub Option<bool>);

impl fmt::Display for TriState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self.0 {
            Some(true) => "TRUE",
            Some(false) => "FALSE",
            None => "UNKNOWN",
        })
    }
}

#[derive(Debug, Clone, Display)]
pub(crate) enum Info<'a> {
    #[display("Experiment \"{_0}\" is not running.")]
    ExperimentNotRunning(&'a str),

    #[display("Holdout \"{_0}\" is not running.")]
    HoldoutNotRunning(&'a str),

    #[display("Variation \"{variation_key}\" is mapped to experiment \"{experiment_key}\" and user \"{user_id}\" in the forced variation map.")]
    ForcedVariationFound {
        variation_key: &'a str,
        experiment_key: &'a str,
        user_id: &'a str,
    },

    #[display("Variation ID \"{variation_id}\" forced for user \"{user_id}\" is not in experiment \"{experiment_key}\".")]
    ForcedVariationNotInExperiment {
        variation_id: &'a str,
        experiment_key: &'a str,
        user_id: &'a str,
    },

    #[display("User \"{user_id}\" is forced in variation \"{variation_key}\".")]
    UserForcedInVariation {
        user_id: &'a str,
        variation_key: &'a str,
    },

    #[display("Returning previously activated variation \"{variation_key}\" of experiment \"{experiment_key}\" for user \"{user_id}\" from user profile.")]
    SavedVariationFound {
        variation_key: &'a str,
        experiment_key: &'a str,
        user_id: &'a str,
    },

    #[display("User \"{user_id}\" was previously bucketed into variation with ID \"{variation_id}\" for experiment \"{experiment_key}\", but no matching variation was found.")]
    SavedVariationInvalid {
        user_id: &'a str,
        variation_id: &'a str,
        experiment_key: &'a str,
    },

    #[display("Evaluating audiences for {kind} \"{key}\": {conditions}.")]
    EvaluatingAudiences {
        kind: EvaluationKind,
        key: &'a str,
        conditions: &'a ConditionHolder,
    },

    #[display("Audiences for {kind} \"{key}\" collectively evaluated to {result}.")]
    AudiencesEvaluated {
        kind: EvaluationKind,
        key: &'a str,
        result: TriState,
    },

    #[display("Starting to evaluate audience \"{id}\" with conditions: {conditions}.")]
    EvaluatingAudience {
        id: &'a str,
        conditions: &'a ConditionHolder,
    },

    #[display("Audience \"{id}\" evaluated to {result}.")]
    AudienceEvaluated { id: &'a str, result: TriState },

    #[display("User \"{user_id}\" does not meet conditions to be in {kind} \"{key}\".")]
    UserDoesNotMeetConditions {
        user_id: &'a str,
        kind: EvaluationKind,
        key: &'a str,
    },

    #[display("Using bucketing ID \"{_0}\" from user attributes.")]
    BucketingIdFromAttributes(&'a str),

    #[display("Bucketing ID attribute is not a string. Defaulted to user ID.")]
    BucketingIdNotString,

    #[display("User with bucketing ID \"{bucketing_id}\" is in variation \"{variation_key}\" of \"{rule_key}\".")]
    UserBucketedIntoVariation {
        bucketing_id: &'a str,
        variation_key: &'a str,
        rule_key: &'a str,
    },

    #[display("User with bucketing ID \"{bucketing_id}\" is in no variation of \"{rule_key}\".")]
    UserNotBucketedIntoVariation {
        bucketing_id: &'a str,
        rule_key: &'a str,
    },

    #[display("User with bucketing ID \"{bucketing_id}\" is in experiment \"{experiment_key}\" of group \"{group_id}\".")]
    UserBucketedIntoExperimentInGroup {
        bucketing_id: &'a str,
        experiment_key: &'a str,
        group_id: &'a str,
    },

    #[display("User with bucketing ID \"{bucketing_id}\" is not in experiment \"{experiment_key}\" of group \"{group_id}\".")]
    UserNotBucketedIntoExperimentInGroup {
        bucketing_id: &'a str,
        experiment_key: &'a str,
        group_id: &'a str,
    },

    #[display("User with bucketing ID \"{bucketing_id}\" is not in any experiment of group \"{group_id}\".")]
    UserNotBucketedIntoAnyExperimentInGroup {
        bucketing_id: &'a str,
        group_id: &'a str,
    },

    #[display("User \"{user_id}\" not in CMAB experiment \"{experiment_key}\" due to traffic allocation.")]
    UserNotInCmabExperiment {
        user_id: &'a str,
        experiment_key: &'a str,
    },

    #[display("CMAB decision fetched for user \"{user_id}\" and rule \"{rule_key}\".")]
    CmabDecisionFetched { user_id: &'a str, rule_key: &'a str },

    #[display("Variation ({variation_key}) is mapped to {target} and user ({user_id}) in the forced decision map.")]
    ForcedDecisionFound {
        variation_key: &'a str,
        target: ForcedDecisionKey,
        user_id: &'a str,
    },

    #[display("Invalid variation is mapped to {target} and user ({user_id}) in the forced decision map.")]
    ForcedDecisionInvalid {
        target: ForcedDecisionKey,
        user_id: &'a str,
    },

    #[display("The user \"{user_id}\" is bucketed into experiment \"{experiment_key}\" of feature \"{flag_key}\".")]
    UserInFeatureExperiment {
        user_id: &'a str,
        experiment_key: &'a str,
        flag_key: &'a str,
    },

    #[display("The user \"{user_id}\" is not bucketed into any of the experiments on the feature \"{flag_key}\".")]
    UserNotInFeatureExperiment { user_id: &'a str, flag_key: &'a str },

    #[display("The user \"{user_id}\" is bucketed into holdout \"{holdout_key}\" for feature flag \"{flag_key}\".")]
    UserInHoldout {
        user_id: &'a str,
        holdout_key: &'a str,
        flag_key: &'a str,
    },

    #[display("The feature flag \"{_0}\" is not used in a rollout.")]
    FlagNotInRollout(&'a str),

    #[display("User \"{user_id}\" meets conditions for targeting rule \"{rule}\".")]
    UserMeetsConditionsForTargetingRule { user_id: &'a str, rule: &'a str },

    #[display("User \"{user_id}\" does not meet conditions for targeting rule \"{rule}\".")]
    UserDoesNotMeetConditionsForTargetingRule { user_id: &'a str, rule: &'a str },

    #[display("User \"{user_id}\" bucketed into a targeting rule \"{rule}\".")]
    UserBucketedIntoTargetingRule { user_id: &'a str, rule: &'a str },

    #[display("User \"{user_id}\" not bucketed into a targeting rule \"{rule}\". Checking \"Everyone Else\" rule now.")]
    UserNotBucketedIntoTargetingRule { user_id: &'a str, rule: &'a str },

    #[display("User \"{user_id}\" bucketed into \"Everyone Else\" rule.")]
    UserBucketedIntoEveryoneElse { user_id: &'a str },

    #[display("User \"{user_id}\" not bucketed into \"Everyone Else\" rule.")]
    UserNotBucketedIntoEveryoneElse { user_id: &'a str },

    #[display("User \"{user_id}\" is in the rollout for feature flag \"{flag_key}\".")]
    UserInRollout { user_id: &'a str, flag_key: &'a str },

    #[display("User \"{user_id}\" is not in the rollout for feature flag \"{flag_key}\".")]
    UserNotInRollout { user_id: &'a str, flag_key: &'a str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_messages() {
        assert_eq!(
            Info::ExperimentNotRunning("exp").to_string(),
            "Experiment \"exp\" is not running."
        );
        assert_eq!(
            Info::AudiencesEvaluated {
                kind: EvaluationKind::Rule,
                key: "1",
                result: TriState(None),
            }
            .to_string(),
            "Audiences for rule \"1\" collectively evaluated to UNKNOWN."
        );
        assert_eq!(
            Info::ForcedDecisionFound {
                variation_key: "v",
                target: ForcedDecisionKey::new("f", None),
                user_id: "u",
            }
            .to_string(),
            "Variation (v) is mapped to flag (f) and user (u) in the forced decision map."
        );
    }
}
