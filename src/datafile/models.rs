use std::collections::HashMap;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize};

use crate::audience::ConditionHolder;

/// Project datafile. Only the sections the decision core reads are modeled; unknown fields are
/// ignored.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Datafile {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
    #[serde(default)]
    pub audiences: Vec<Audience>,
    /// Typed audiences take priority over `audiences` with the same id.
    #[serde(default)]
    pub typed_audiences: Vec<Audience>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub feature_flags: Vec<FeatureFlag>,
    #[serde(default)]
    pub rollouts: Vec<Rollout>,
    #[serde(default)]
    pub holdouts: Vec<Holdout>,
}

/// Common shape of everything that can be bucketed into: experiments, rollout rules and holdouts.
pub trait Rule {
    /// Rule id. Used as the bucketing salt.
    fn id(&self) -> &str;
    /// Rule key.
    fn key(&self) -> &str;
    /// Variations of the rule.
    fn variations(&self) -> &[Variation];
    /// Ordered traffic allocation table.
    fn traffic_allocation(&self) -> &[TrafficAllocation];
    /// Legacy flat audience list.
    fn audience_ids(&self) -> &[String];
    /// Audience condition tree. When present, `audience_ids` is ignored.
    fn audience_conditions(&self) -> Option<&ConditionHolder>;

    /// Find a variation by id.
    fn variation_by_id(&self, id: &str) -> Option<&Variation> {
        self.variations().iter().find(|v| v.id == id)
    }

    /// Find a variation by key.
    fn variation_by_key(&self, key: &str) -> Option<&Variation> {
        self.variations().iter().find(|v| v.key == key)
    }
}

/// Experiment status. Only `Running` experiments are decided.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ExperimentStatus {
    Running,
    Launched,
    Paused,
    #[serde(rename = "Not started")]
    NotStarted,
    Archived,
}

/// Experiment or rollout rule.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Experiment {
    pub id: String,
    pub key: String,
    pub status: ExperimentStatus,
    #[serde(default)]
    pub layer_id: String,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    #[serde(default)]
    pub audience_ids: Vec<String>,
    #[serde(default)]
    pub audience_conditions: Option<ConditionHolder>,
    /// Whitelist: user id to variation key.
    #[serde(default)]
    pub forced_variations: HashMap<String, String>,
    /// Present for contextual-bandit experiments.
    #[serde(default)]
    pub cmab: Option<Cmab>,
}

impl Experiment {
    /// Whether the experiment is eligible for decisions.
    pub fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running
    }

    /// Whether variations are picked by a contextual bandit.
    pub fn is_cmab(&self) -> bool {
        self.cmab.is_some()
    }
}

impl Rule for Experiment {
    fn id(&self) -> &str {
        &self.id
    }
    fn key(&self) -> &str {
        &self.key
    }
    fn variations(&self) -> &[Variation] {
        &self.variations
    }
    fn traffic_allocation(&self) -> &[TrafficAllocation] {
        &self.traffic_allocation
    }
    fn audience_ids(&self) -> &[String] {
        &self.audience_ids
    }
    fn audience_conditions(&self) -> Option<&ConditionHolder> {
        self.audience_conditions.as_ref()
    }
}

/// Contextual-bandit descriptor of an experiment.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cmab {
    /// Share of traffic (out of 10000) that is routed to the bandit.
    pub traffic_allocation: u32,
    /// Attribute ids the bandit is allowed to see.
    #[serde(default)]
    pub attribute_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Variation {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub feature_enabled: bool,
    #[serde(default)]
    pub variables: Vec<VariableUsage>,
}

/// Variable value override carried by a variation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct VariableUsage {
    pub id: String,
    pub value: String,
}

/// One slot of a traffic allocation table. Entries are ordered by `end_of_range`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct TrafficAllocation {
    pub entity_id: String,
    pub end_of_range: u32,
}

/// Mutual exclusion policy of a group.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// Users are bucketed into at most one experiment of the group.
    Random,
    /// Experiments of the group are bucketed independently.
    Overlapping,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Group {
    pub id: String,
    pub policy: GroupPolicy,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct FeatureFlag {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub experiment_ids: Vec<String>,
    /// Empty when the flag has no rollout.
    #[serde(default)]
    pub rollout_id: String,
    #[serde(default)]
    pub variables: Vec<FeatureVariable>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct FeatureVariable {
    pub id: String,
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub sub_type: Option<String>,
    pub default_value: String,
}

/// Ordered delivery rules of a flag. The last rule is the "Everyone Else" rule.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[allow(missing_docs)]
pub struct Rollout {
    pub id: String,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum HoldoutStatus {
    Draft,
    Running,
    Concluded,
    Archived,
}

/// Holdout: a slice of traffic withheld from the flags it applies to.
///
/// Without included or excluded flags, a holdout is global. With included flags, it applies only
/// to those. With excluded flags only, it applies to every flag except those.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Holdout {
    pub id: String,
    pub key: String,
    pub status: HoldoutStatus,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    #[serde(default)]
    pub audience_ids: Vec<String>,
    #[serde(default)]
    pub audience_conditions: Option<ConditionHolder>,
    #[serde(default)]
    pub included_flags: Vec<String>,
    #[serde(default)]
    pub excluded_flags: Vec<String>,
}

impl Holdout {
    /// Whether the holdout is live.
    pub fn is_running(&self) -> bool {
        self.status == HoldoutStatus::Running
    }

    /// Global holdouts list neither included nor excluded flags.
    pub fn is_global(&self) -> bool {
        self.included_flags.is_empty() && self.excluded_flags.is_empty()
    }
}

impl Rule for Holdout {
    fn id(&self) -> &str {
        &self.id
    }
    fn key(&self) -> &str {
        &self.key
    }
    fn variations(&self) -> &[Variation] {
        &self.variations
    }
    fn traffic_allocation(&self) -> &[TrafficAllocation] {
        &self.traffic_allocation
    }
    fn audience_ids(&self) -> &[String] {
        &self.audience_ids
    }
    fn audience_conditions(&self) -> Option<&ConditionHolder> {
        self.audience_conditions.as_ref()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[allow(missing_docs)]
pub struct Audience {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Legacy audiences carry their tree as a JSON string; typed audiences carry it inline.
    #[serde(deserialize_with = "deserialize_conditions")]
    pub conditions: ConditionHolder,
}

fn deserialize_conditions<'de, D>(deserializer: D) -> Result<ConditionHolder, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawConditions {
        Stringified(String),
        Structured(ConditionHolder),
    }

    match RawConditions::deserialize(deserializer)? {
        RawConditions::Stringified(s) => serde_json::from_str(&s).map_err(D::Error::custom),
        RawConditions::Structured(conditions) => Ok(conditions),
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[allow(missing_docs)]
pub struct Attribute {
    pub id: String,
    pub key: String,
}
