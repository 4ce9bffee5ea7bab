use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    messages::{Info, TriState},
    reasons::DecisionReasons,
    EvaluationError, ProjectConfig, UserContext,
};

use super::UserAttribute;

/// Logical operator heading a condition array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// False if any operand is false, else unknown if any is unknown, else true.
    And,
    /// True if any operand is true, else unknown if any is unknown, else false.
    Or,
    /// Negates the first operand. Further operands are ignored.
    Not,
}

impl LogicalOp {
    fn parse(s: &str) -> Option<LogicalOp> {
        match s {
            "and" => Some(LogicalOp::And),
            "or" => Some(LogicalOp::Or),
            "not" => Some(LogicalOp::Not),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            LogicalOp::And => "and",
            LogicalOp::Or => "or",
            LogicalOp::Not => "not",
        }
    }

    fn apply(
        self,
        operands: &[ConditionHolder],
        config: &ProjectConfig,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> Option<bool> {
        match self {
            LogicalOp::And => {
                if operands.is_empty() {
                    reasons.add_error(EvaluationError::ConditionInvalidFormat(
                        "\"and\" has no operands",
                    ));
                    return None;
                }
                let mut saw_unknown = false;
                for operand in operands {
                    match operand.evaluate(config, user, reasons) {
                        Some(false) => return Some(false),
                        None => saw_unknown = true,
                        Some(true) => {}
                    }
                }
                if saw_unknown {
                    None
                } else {
                    Some(true)
                }
            }
            LogicalOp::Or => {
                let mut saw_unknown = false;
                for operand in operands {
                    match operand.evaluate(config, user, reasons) {
                        Some(true) => return Some(true),
                        None => saw_unknown = true,
                        Some(false) => {}
                    }
                }
                if saw_unknown {
                    None
                } else {
                    Some(false)
                }
            }
            LogicalOp::Not => match operands.first() {
                Some(operand) => operand.evaluate(config, user, reasons).map(|r| !r),
                None => {
                    reasons.add_error(EvaluationError::ConditionInvalidFormat(
                        "\"not\" has no operand",
                    ));
                    None
                }
            },
        }
    }
}

/// Leaf of a condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionLeaf {
    /// Reference to an audience defined in the project configuration.
    AudienceId(String),
    /// Condition over a user attribute.
    Attribute(UserAttribute),
}

/// Recursive audience condition tree.
///
/// An array whose first element is a logical operator applies it to the remaining elements. An
/// array starting with a leaf is an implicit `or` over all its elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCondition", into = "RawCondition")]
pub enum ConditionHolder {
    /// `and`, `or` or `not`, leading an array.
    LogicalOp(LogicalOp),
    /// A user attribute condition or an audience id.
    Leaf(ConditionLeaf),
    /// An operator followed by its operands. Without a leading operator, `or` applies.
    Array(Vec<ConditionHolder>),
}

/// Wire shape of a condition tree node.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawCondition {
    Text(String),
    Array(Vec<ConditionHolder>),
    Attribute(UserAttribute),
}

impl From<RawCondition> for ConditionHolder {
    fn from(raw: RawCondition) -> Self {
        match raw {
            RawCondition::Text(text) => match LogicalOp::parse(&text) {
                Some(op) => ConditionHolder::LogicalOp(op),
                None => ConditionHolder::Leaf(ConditionLeaf::AudienceId(text)),
            },
            RawCondition::Array(items) => ConditionHolder::Array(items),
            RawCondition::Attribute(attribute) => {
                ConditionHolder::Leaf(ConditionLeaf::Attribute(attribute))
            }
        }
    }
}

impl From<ConditionHolder> for RawCondition {
    fn from(holder: ConditionHolder) -> Self {
        match holder {
            ConditionHolder::LogicalOp(op) => RawCondition::Text(op.as_str().to_owned()),
            ConditionHolder::Leaf(ConditionLeaf::AudienceId(id)) => RawCondition::Text(id),
            ConditionHolder::Leaf(ConditionLeaf::Attribute(attribute)) => {
                RawCondition::Attribute(attribute)
            }
            ConditionHolder::Array(items) => RawCondition::Array(items),
        }
    }
}

impl fmt::Display for ConditionHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl ConditionHolder {
    /// Tree equivalent to a legacy flat audience list.
    pub fn from_audience_ids(ids: &[String]) -> ConditionHolder {
        ConditionHolder::Array(
            std::iter::once(ConditionHolder::LogicalOp(LogicalOp::Or))
                .chain(
                    ids.iter()
                        .map(|id| ConditionHolder::Leaf(ConditionLeaf::AudienceId(id.clone()))),
                )
                .collect(),
        )
    }

    /// Evaluate the tree for the user.
    ///
    /// Returns `None` when the result is unknown: an audience is missing, a leaf can't be
    /// evaluated or the tree is malformed. Each of these records an error reason but doesn't stop
    /// evaluation of sibling branches.
    pub fn evaluate(
        &self,
        config: &ProjectConfig,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> Option<bool> {
        match self {
            ConditionHolder::Leaf(leaf) => leaf.evaluate(config, user, reasons),
            ConditionHolder::Array(items) => match items.split_first() {
                None => {
                    reasons.add_error(EvaluationError::ConditionInvalidFormat(
                        "empty condition array",
                    ));
                    None
                }
                Some((ConditionHolder::LogicalOp(op), operands)) => {
                    op.apply(operands, config, user, reasons)
                }
                Some((ConditionHolder::Leaf(_), _)) => {
                    LogicalOp::Or.apply(items, config, user, reasons)
                }
                Some((ConditionHolder::Array(_), _)) => {
                    reasons.add_error(EvaluationError::ConditionInvalidFormat(
                        "array must start with an operator or a condition",
                    ));
                    None
                }
            },
            ConditionHolder::LogicalOp(_) => {
                reasons.add_error(EvaluationError::ConditionInvalidFormat(
                    "operator outside of an array",
                ));
                None
            }
        }
    }
}

impl ConditionLeaf {
    fn evaluate(
        &self,
        config: &ProjectConfig,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> Option<bool> {
        match self {
            ConditionLeaf::Attribute(attribute) => attribute.evaluate(user, reasons),
            ConditionLeaf::AudienceId(id) => {
                let Some(audience) = config.get_audience(id) else {
                    reasons.add_error(EvaluationError::AudienceNotFound(id.clone()));
                    return None;
                };
                reasons.add_info(Info::EvaluatingAudience {
                    id,
                    conditions: &audience.conditions,
                });
                let result = audience.conditions.evaluate(config, user, reasons);
                reasons.add_info(Info::AudienceEvaluated {
                    id,
                    result: TriState(result),
                });
                result
            }
        }
    }
}
