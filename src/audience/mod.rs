//! Audience condition evaluation.
//!
//! Conditions are three-valued: a leaf that can't be evaluated (missing attribute, type mismatch,
//! unknown match type) evaluates to unknown (`None`) instead of false, and unknown propagates
//! through logical operators.
mod condition;
mod semantic_version;
mod user_attribute;

pub use condition::{ConditionHolder, ConditionLeaf, LogicalOp};
pub use user_attribute::{ConditionValue, UserAttribute};

use crate::{
    datafile::Rule,
    messages::{EvaluationKind, Info, TriState},
    reasons::DecisionReasons,
    ProjectConfig, UserContext,
};

/// Whether the user passes the audience targeting of `rule`.
///
/// A condition tree takes priority over the legacy audience id list, and an empty tree matches
/// everyone. Without a tree, a non-empty id list is an `or` over the audiences. Only a definite
/// `true` passes.
pub(crate) fn does_meet_audience_conditions<R: Rule + ?Sized>(
    config: &ProjectConfig,
    rule: &R,
    user: &UserContext,
    kind: EvaluationKind,
    logging_key: &str,
    reasons: &mut DecisionReasons,
) -> bool {
    let legacy;
    let conditions = match rule.audience_conditions() {
        Some(ConditionHolder::Array(items)) if items.is_empty() => None,
        Some(conditions) => Some(conditions),
        None if !rule.audience_ids().is_empty() => {
            legacy = ConditionHolder::from_audience_ids(rule.audience_ids());
            Some(&legacy)
        }
        None => None,
    };

    let result = match conditions {
        Some(conditions) => {
            reasons.add_info(Info::EvaluatingAudiences {
                kind,
                key: logging_key,
                conditions,
            });
            conditions.evaluate(config, user, reasons)
        }
        None => Some(true),
    };

    reasons.add_info(Info::AudiencesEvaluated {
        kind,
        key: logging_key,
        result: TriState(result),
    });

    result == Some(true)
}
