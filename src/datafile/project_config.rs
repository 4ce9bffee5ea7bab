use std::collections::HashMap;

use crate::Result;

use super::{
    holdout_config::HoldoutConfig, Attribute, Audience, Datafile, Experiment, FeatureFlag, Group,
    Holdout, Rollout, Rule, Variation,
};

/// Immutable snapshot of a project configuration with O(1) lookups by id and key.
///
/// A snapshot is shared read-only between concurrent decisions. Swapping configurations is up to
/// the caller (e.g., keep an `Arc<ProjectConfig>` and replace it).
#[derive(Debug)]
pub struct ProjectConfig {
    revision: String,
    /// Top-level and group experiments.
    experiments: Vec<Experiment>,
    experiment_id_index: HashMap<String, usize>,
    experiment_key_index: HashMap<String, usize>,
    /// Experiment id to owning group id.
    experiment_groups: HashMap<String, String>,
    groups: HashMap<String, Group>,
    audiences: HashMap<String, Audience>,
    attributes: HashMap<String, Attribute>,
    flags: HashMap<String, FeatureFlag>,
    /// Flag key to every variation reachable through its experiments and rollout rules.
    flag_variations: HashMap<String, Vec<Variation>>,
    rollouts: HashMap<String, Rollout>,
    holdouts: HoldoutConfig,
}

impl ProjectConfig {
    /// Build lookup tables from a parsed datafile.
    pub fn new(datafile: Datafile) -> ProjectConfig {
        let Datafile {
            revision,
            experiments: top_level,
            audiences,
            typed_audiences,
            groups,
            attributes,
            feature_flags,
            rollouts,
            holdouts,
            ..
        } = datafile;

        let mut experiments = top_level;
        let mut experiment_groups = HashMap::new();
        for group in &groups {
            for experiment in &group.experiments {
                experiment_groups.insert(experiment.id.clone(), group.id.clone());
                experiments.push(experiment.clone());
            }
        }

        let experiment_id_index = experiments
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
        let experiment_key_index = experiments
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key.clone(), i))
            .collect();

        // Typed audiences are inserted last so they win over legacy audiences.
        let audiences = audiences
            .into_iter()
            .chain(typed_audiences)
            .map(|a| (a.id.clone(), a))
            .collect();

        let rollouts: HashMap<String, Rollout> =
            rollouts.into_iter().map(|r| (r.id.clone(), r)).collect();

        let mut config = ProjectConfig {
            revision,
            experiments,
            experiment_id_index,
            experiment_key_index,
            experiment_groups,
            groups: groups.into_iter().map(|g| (g.id.clone(), g)).collect(),
            audiences,
            attributes: attributes.into_iter().map(|a| (a.id.clone(), a)).collect(),
            flags: HashMap::new(),
            flag_variations: HashMap::new(),
            rollouts,
            holdouts: HoldoutConfig::new(holdouts),
        };

        for flag in feature_flags {
            let variations = config.collect_flag_variations(&flag);
            config.flag_variations.insert(flag.key.clone(), variations);
            config.flags.insert(flag.key.clone(), flag);
        }

        config
    }

    /// Parse a JSON datafile and build a snapshot from it.
    pub fn from_json(json: &str) -> Result<ProjectConfig> {
        let datafile: Datafile = serde_json::from_str(json)?;
        Ok(ProjectConfig::new(datafile))
    }

    fn collect_flag_variations(&self, flag: &FeatureFlag) -> Vec<Variation> {
        let rules = flag
            .experiment_ids
            .iter()
            .filter_map(|id| self.get_experiment_by_id(id))
            .chain(
                self.get_rollout(&flag.rollout_id)
                    .into_iter()
                    .flat_map(|r| r.experiments.iter()),
            );

        let mut variations: Vec<Variation> = Vec::new();
        for rule in rules {
            for variation in rule.variations() {
                if !variations.iter().any(|v| v.id == variation.id) {
                    variations.push(variation.clone());
                }
            }
        }
        variations
    }

    /// Revision of the datafile this snapshot was built from.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Experiment with this id, including group members.
    pub fn get_experiment_by_id(&self, id: &str) -> Option<&Experiment> {
        self.experiment_id_index
            .get(id)
            .map(|&i| &self.experiments[i])
    }

    /// Experiment with this key, including group members.
    pub fn get_experiment_by_key(&self, key: &str) -> Option<&Experiment> {
        self.experiment_key_index
            .get(key)
            .map(|&i| &self.experiments[i])
    }

    /// Mutual exclusion group the experiment belongs to, if any.
    pub fn get_group_for_experiment(&self, experiment_id: &str) -> Option<&Group> {
        self.experiment_groups
            .get(experiment_id)
            .and_then(|group_id| self.groups.get(group_id))
    }

    /// Audience with this id. A typed audience shadows a legacy one with the same id.
    pub fn get_audience(&self, id: &str) -> Option<&Audience> {
        self.audiences.get(id)
    }

    /// Attribute with this id.
    pub fn get_attribute(&self, id: &str) -> Option<&Attribute> {
        self.attributes.get(id)
    }

    /// Feature flag with this key.
    pub fn get_flag(&self, key: &str) -> Option<&FeatureFlag> {
        self.flags.get(key)
    }

    /// Variations of every rule of the flag, deduplicated by id.
    pub fn get_flag_variations(&self, flag_key: &str) -> &[Variation] {
        self.flag_variations
            .get(flag_key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns `None` for an empty or unknown rollout id.
    pub fn get_rollout(&self, id: &str) -> Option<&Rollout> {
        self.rollouts.get(id)
    }

    /// Holdout with this id.
    pub fn get_holdout(&self, id: &str) -> Option<&Holdout> {
        self.holdouts.get(id)
    }

    /// Holdouts applying to the flag, in evaluation order.
    pub fn get_holdouts_for_flag(&self, flag_id: &str) -> Vec<&Holdout> {
        self.holdouts.for_flag(flag_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::load_datafile;

    #[test]
    fn indexes_group_experiments() {
        let config = load_datafile();

        let experiment = config.get_experiment_by_key("group_exp_1").unwrap();
        assert_eq!(experiment.id, "10390977673");
        assert_eq!(
            config.get_group_for_experiment(&experiment.id).map(|g| g.id.as_str()),
            Some("13142870430")
        );
        assert!(config.get_group_for_experiment("10390977714").is_none());
    }

    #[test]
    fn typed_audiences_take_priority() {
        let config = load_datafile();

        let audience = config.get_audience("3468206642").unwrap();
        assert_eq!(audience.name, "exactString");
    }

    #[test]
    fn collects_flag_variations() {
        let config = load_datafile();

        let keys: Vec<&str> = config
            .get_flag_variations("feature_1")
            .iter()
            .map(|v| v.key.as_str())
            .collect();
        assert_eq!(keys, vec!["a", "b", "rollout_on", "rollout_off"]);
        assert!(config.get_flag_variations("missing").is_empty());
    }

    #[test]
    fn empty_rollout_id() {
        let config = load_datafile();

        assert!(config.get_rollout("").is_none());
        assert!(config.get_flag("feature_no_rollout").is_some());
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(ProjectConfig::from_json("{not json").is_err());
    }
}
