use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Reserved attribute whose string value replaces the user id as the bucketing key.
pub const BUCKETING_ID_ATTRIBUTE: &str = "$opt_bucketing_id";

/// Type alias for a HashMap representing key-value pairs of user attributes.
///
/// # Examples
/// ```
/// # use decision_core::{Attributes, AttributeValue};
/// let attributes = [
///     ("age".to_owned(), 30.into()),
///     ("is_premium_member".to_owned(), true.into()),
///     ("username".to_owned(), "john_doe".into()),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// Enum representing possible values of a user attribute.
///
/// Integers and doubles are kept apart so that exact matches on whole numbers don't go through a
/// floating point conversion, but they compare with each other numerically.
#[derive(Debug, Serialize, Deserialize, PartialEq, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// An integer value.
    Integer(i64),
    /// A floating point value.
    Double(f64),
    /// A boolean value.
    Boolean(bool),
    /// A null value or absence of value.
    #[from(ignore)]
    Null,
}

impl AttributeValue {
    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        if let AttributeValue::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }

    /// Returns the numeric payload widened to `f64`, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Integer(i) => Some(*i as f64),
            AttributeValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns `true` for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_numbers_by_kind() {
        let attributes: Attributes =
            serde_json::from_str(r#"{"a": 42, "b": 4.5, "c": "x", "d": true, "e": null}"#)
                .unwrap();

        assert_eq!(attributes["a"], AttributeValue::Integer(42));
        assert_eq!(attributes["b"], AttributeValue::Double(4.5));
        assert_eq!(attributes["c"], AttributeValue::String("x".to_owned()));
        assert_eq!(attributes["d"], AttributeValue::Boolean(true));
        assert_eq!(attributes["e"], AttributeValue::Null);
    }

    #[test]
    fn widens_integers() {
        assert_eq!(AttributeValue::from(3).as_f64(), Some(3.0));
        assert_eq!(AttributeValue::from("3").as_f64(), None);
    }
}
