use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{reasons::DecisionReasons, AttributeValue, EvaluationError, UserContext};

use super::semantic_version::compare_versions;

const CUSTOM_ATTRIBUTE: &str = "custom_attribute";
const THIRD_PARTY_DIMENSION: &str = "third_party_dimension";

/// Largest integer magnitude that is exactly representable as `f64`.
const MAX_SAFE_INTEGER: u64 = 1 << 53;
const MAX_SAFE_NUMBER: f64 = MAX_SAFE_INTEGER as f64;

/// Expected value of a leaf condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum ConditionValue {
    /// A string value.
    String(String),
    /// An integral number.
    Integer(i64),
    /// A floating point number.
    Double(f64),
    /// A boolean.
    Boolean(bool),
    /// Any value this crate does not know how to match against.
    Unrecognized(serde_json::Value),
}

impl From<serde_json::Value> for ConditionValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => ConditionValue::String(s),
            serde_json::Value::Bool(b) => ConditionValue::Boolean(b),
            serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => ConditionValue::Integer(i),
                (None, Some(d)) => ConditionValue::Double(d),
                (None, None) => ConditionValue::Unrecognized(serde_json::Value::Number(n)),
            },
            other => ConditionValue::Unrecognized(other),
        }
    }
}

impl From<ConditionValue> for serde_json::Value {
    fn from(value: ConditionValue) -> Self {
        match value {
            ConditionValue::String(s) => s.into(),
            ConditionValue::Integer(i) => i.into(),
            ConditionValue::Double(d) => d.into(),
            ConditionValue::Boolean(b) => b.into(),
            ConditionValue::Unrecognized(v) => v,
        }
    }
}

impl ConditionValue {
    fn is_finite_number(&self) -> bool {
        match self {
            ConditionValue::Integer(_) => true,
            ConditionValue::Double(d) => d.is_finite(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchType {
    Exact,
    Exists,
    Substring,
    Lt,
    Le,
    Gt,
    Ge,
    SemverEq,
    SemverLt,
    SemverLe,
    SemverGt,
    SemverGe,
    Qualified,
}

impl MatchType {
    fn parse(s: &str) -> Option<MatchType> {
        Some(match s {
            "exact" => MatchType::Exact,
            "exists" => MatchType::Exists,
            "substring" => MatchType::Substring,
            "lt" => MatchType::Lt,
            "le" => MatchType::Le,
            "gt" => MatchType::Gt,
            "ge" => MatchType::Ge,
            "semver_eq" => MatchType::SemverEq,
            "semver_lt" => MatchType::SemverLt,
            "semver_le" => MatchType::SemverLe,
            "semver_gt" => MatchType::SemverGt,
            "semver_ge" => MatchType::SemverGe,
            "qualified" => MatchType::Qualified,
            _ => return None,
        })
    }

    /// Whether `ordering` (actual compared to expected) satisfies an ordering match.
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            MatchType::Lt | MatchType::SemverLt => ordering.is_lt(),
            MatchType::Le | MatchType::SemverLe => ordering.is_le(),
            MatchType::Gt | MatchType::SemverGt => ordering.is_gt(),
            MatchType::Ge | MatchType::SemverGe => ordering.is_ge(),
            _ => ordering.is_eq(),
        }
    }
}

/// Leaf condition over a single user attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAttribute {
    /// Attribute name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Condition type. Only `custom_attribute` and `third_party_dimension` are evaluated.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Match type. A missing match type means `exact`.
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<String>,
    /// Expected value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ConditionValue>,
}

impl fmt::Display for UserAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl UserAttribute {
    /// Evaluate against the user. `None` means the result is unknown, and an error reason
    /// explains why.
    pub(crate) fn evaluate(
        &self,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> Option<bool> {
        let result = self.try_evaluate(user);
        if let Err(err) = &result {
            reasons.add_error(err);
        }
        result.ok()
    }

    fn try_evaluate(&self, user: &UserContext) -> Result<bool, EvaluationError> {
        let condition = || self.to_string();

        match self.kind.as_deref() {
            Some(CUSTOM_ATTRIBUTE | THIRD_PARTY_DIMENSION) => {}
            _ => return Err(EvaluationError::UnknownConditionType(condition())),
        }

        let match_type = match self.match_type.as_deref() {
            None => MatchType::Exact,
            Some(s) => {
                MatchType::parse(s).ok_or_else(|| EvaluationError::UnknownMatchType(condition()))?
            }
        };

        let name = self
            .name
            .as_deref()
            .ok_or_else(|| EvaluationError::InvalidAttributeName(condition()))?;

        let actual = user.attributes().get(name);
        let invalid_type = || EvaluationError::InvalidAttributeType {
            condition: condition(),
            name: name.to_owned(),
        };

        match match_type {
            MatchType::Qualified => {
                let Some(ConditionValue::String(segment)) = &self.value else {
                    return Err(EvaluationError::InvalidConditionValue(condition()));
                };
                Ok(user.is_qualified_for(segment))
            }
            MatchType::Exists => Ok(actual.is_some_and(|v| !v.is_null())),
            MatchType::Exact => {
                let (expected, actual) = self.operands(name, actual)?;
                match (expected, actual) {
                    (ConditionValue::String(e), AttributeValue::String(a)) => Ok(e == a),
                    (ConditionValue::Boolean(e), AttributeValue::Boolean(b)) => Ok(e == b),
                    (
                        ConditionValue::Integer(_) | ConditionValue::Double(_),
                        AttributeValue::Integer(_) | AttributeValue::Double(_),
                    ) => Ok(self.compare_numbers(expected, actual, name)?.is_eq()),
                    (ConditionValue::Unrecognized(_), _) => {
                        Err(EvaluationError::InvalidConditionValue(condition()))
                    }
                    (ConditionValue::Double(d), _) if !d.is_finite() => {
                        Err(EvaluationError::InvalidConditionValue(condition()))
                    }
                    _ => Err(invalid_type()),
                }
            }
            MatchType::Substring => {
                let (expected, actual) = self.operands(name, actual)?;
                let ConditionValue::String(e) = expected else {
                    return Err(EvaluationError::InvalidConditionValue(condition()));
                };
                let AttributeValue::String(a) = actual else {
                    return Err(invalid_type());
                };
                Ok(a.contains(e.as_str()))
            }
            MatchType::Lt | MatchType::Le | MatchType::Gt | MatchType::Ge => {
                let (expected, actual) = self.operands(name, actual)?;
                if !expected.is_finite_number() {
                    return Err(EvaluationError::InvalidConditionValue(condition()));
                }
                if actual.as_f64().is_none() {
                    return Err(invalid_type());
                }
                Ok(match_type.accepts(self.compare_numbers(expected, actual, name)?))
            }
            MatchType::SemverEq
            | MatchType::SemverLt
            | MatchType::SemverLe
            | MatchType::SemverGt
            | MatchType::SemverGe => {
                let (expected, actual) = self.operands(name, actual)?;
                let ConditionValue::String(target) = expected else {
                    return Err(EvaluationError::InvalidConditionValue(condition()));
                };
                let AttributeValue::String(version) = actual else {
                    return Err(invalid_type());
                };
                Ok(match_type.accepts(compare_versions(version, target)?))
            }
        }
    }

    /// The condition value and the user's value for a comparison. Both must be present, and the
    /// user's value must not be null.
    fn operands<'s, 'u>(
        &'s self,
        name: &str,
        actual: Option<&'u AttributeValue>,
    ) -> Result<(&'s ConditionValue, &'u AttributeValue), EvaluationError> {
        let expected = self
            .value
            .as_ref()
            .ok_or_else(|| EvaluationError::MissingConditionValue(self.to_string()))?;
        let actual = actual.ok_or_else(|| EvaluationError::MissingAttributeValue {
            condition: self.to_string(),
            name: name.to_owned(),
        })?;
        if actual.is_null() {
            return Err(EvaluationError::NullAttributeValue {
                condition: self.to_string(),
                name: name.to_owned(),
            });
        }
        Ok((expected, actual))
    }

    /// Compare numeric `actual` to numeric `expected`.
    fn compare_numbers(
        &self,
        expected: &ConditionValue,
        actual: &AttributeValue,
        name: &str,
    ) -> Result<Ordering, EvaluationError> {
        if !expected.is_finite_number() {
            return Err(EvaluationError::InvalidConditionValue(self.to_string()));
        }

        let out_of_range = || EvaluationError::AttributeValueOutOfRange {
            condition: self.to_string(),
            name: name.to_owned(),
        };

        match (expected, actual) {
            (ConditionValue::Integer(e), AttributeValue::Integer(a)) => {
                if a.unsigned_abs() > MAX_SAFE_INTEGER {
                    return Err(out_of_range());
                }
                Ok(a.cmp(e))
            }
            _ => {
                let a = actual.as_f64().ok_or_else(|| EvaluationError::InvalidAttributeType {
                    condition: self.to_string(),
                    name: name.to_owned(),
                })?;
                if !a.is_finite() || a.abs() > MAX_SAFE_NUMBER {
                    return Err(out_of_range());
                }
                let e = match expected {
                    ConditionValue::Integer(i) => *i as f64,
                    ConditionValue::Double(d) => *d,
                    _ => return Err(EvaluationError::InvalidConditionValue(self.to_string())),
                };
                a.partial_cmp(&e).ok_or_else(out_of_range)
            }
        }
    }
}
