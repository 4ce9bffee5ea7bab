use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::{AttributeValue, Attributes};

/// Key of a forced decision: a flag, optionally narrowed to one of its rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForcedDecisionKey {
    /// Flag key.
    pub flag_key: String,
    /// Rule key. `None` forces the decision for the whole flag.
    pub rule_key: Option<String>,
}

impl ForcedDecisionKey {
    /// Key for `flag_key`, or for one of its rules when `rule_key` is set.
    pub fn new(flag_key: impl Into<String>, rule_key: Option<&str>) -> ForcedDecisionKey {
        ForcedDecisionKey {
            flag_key: flag_key.into(),
            rule_key: rule_key.map(str::to_owned),
        }
    }
}

impl fmt::Display for ForcedDecisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rule_key {
            Some(rule_key) => write!(f, "flag ({}), rule ({})", self.flag_key, rule_key),
            None => write!(f, "flag ({})", self.flag_key),
        }
    }
}

/// The user a decision is made for: identity, attributes, per-user forced decisions and
/// qualified audience segments.
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    user_id: String,
    attributes: Attributes,
    forced_decisions: HashMap<ForcedDecisionKey, String>,
    qualified_segments: Option<HashSet<String>>,
}

impl UserContext {
    /// Create a context for `user_id` with the given attributes.
    ///
    /// ```
    /// # use decision_core::UserContext;
    /// let user = UserContext::new("user-1", [("age".to_owned(), 30.into())].into());
    /// assert_eq!(user.user_id(), "user-1");
    /// ```
    pub fn new(user_id: impl Into<String>, attributes: Attributes) -> UserContext {
        UserContext {
            user_id: user_id.into(),
            attributes,
            ..Default::default()
        }
    }

    /// Id of the user.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Attributes of the user.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Set or replace a single attribute.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Force `variation_key` for the flag (or one of its rules) for this user.
    pub fn set_forced_decision(
        &mut self,
        flag_key: &str,
        rule_key: Option<&str>,
        variation_key: impl Into<String>,
    ) {
        self.forced_decisions.insert(
            ForcedDecisionKey::new(flag_key, rule_key),
            variation_key.into(),
        );
    }

    /// Variation key forced for the flag (or rule), if any.
    pub fn get_forced_decision(&self, flag_key: &str, rule_key: Option<&str>) -> Option<&str> {
        self.forced_decisions
            .get(&ForcedDecisionKey::new(flag_key, rule_key))
            .map(String::as_str)
    }

    /// Returns `true` if a forced decision was removed.
    pub fn remove_forced_decision(&mut self, flag_key: &str, rule_key: Option<&str>) -> bool {
        self.forced_decisions
            .remove(&ForcedDecisionKey::new(flag_key, rule_key))
            .is_some()
    }

    /// Drop every forced decision.
    pub fn remove_all_forced_decisions(&mut self) {
        self.forced_decisions.clear();
    }

    /// Replace the audience segments the user is qualified for.
    pub fn set_qualified_segments(&mut self, segments: Option<Vec<String>>) {
        self.qualified_segments = segments.map(|s| s.into_iter().collect());
    }

    /// Whether the user is a member of `segment`. Always `false` when segments were never set.
    pub fn is_qualified_for(&self, segment: &str) -> bool {
        self.qualified_segments
            .as_ref()
            .is_some_and(|segments| segments.contains(segment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_decisions_are_keyed_by_flag_and_rule() {
        let mut user = UserContext::new("user", Attributes::new());
        user.set_forced_decision("flag", None, "on");
        user.set_forced_decision("flag", Some("rule"), "off");

        assert_eq!(user.get_forced_decision("flag", None), Some("on"));
        assert_eq!(user.get_forced_decision("flag", Some("rule")), Some("off"));
        assert_eq!(user.get_forced_decision("flag", Some("other")), None);

        assert!(user.remove_forced_decision("flag", None));
        assert!(!user.remove_forced_decision("flag", None));
        user.remove_all_forced_decisions();
        assert_eq!(user.get_forced_decision("flag", Some("rule")), None);
    }

    #[test]
    fn qualified_segments() {
        let mut user = UserContext::new("user", Attributes::new());
        assert!(!user.is_qualified_for("odp-segment-1"));

        user.set_qualified_segments(Some(vec!["odp-segment-1".to_owned()]));
        assert!(user.is_qualified_for("odp-segment-1"));
        assert!(!user.is_qualified_for("odp-segment-2"));
    }

    #[test]
    fn forced_decision_key_display() {
        assert_eq!(
            ForcedDecisionKey::new("f", Some("r")).to_string(),
            "flag (f), rule (r)"
        );
        assert_eq!(ForcedDecisionKey::new("f", None).to_string(), "flag (f)");
    }
}
