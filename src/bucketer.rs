//! Deterministic assignment of bucketing keys to traffic slots.
use crate::{
    datafile::{Experiment, GroupPolicy, Rule, TrafficAllocation, Variation},
    messages::Info,
    reasons::DecisionReasons,
    sharder::{Murmur3Sharder, Sharder},
    EvaluationError, ProjectConfig,
};

/// Number of traffic slots. Allocation tables partition `[0, MAX_TRAFFIC_VALUE)`.
pub const MAX_TRAFFIC_VALUE: u64 = 10_000;

/// Entity of the first slot whose end of range is above `bucket_value`.
pub fn allocate_traffic(table: &[TrafficAllocation], bucket_value: u32) -> Option<&str> {
    table
        .iter()
        .find(|allocation| bucket_value < allocation.end_of_range)
        .map(|allocation| allocation.entity_id.as_str())
}

/// Buckets users into experiments, groups and variations.
///
/// The same bucketing id and entity id always produce the same bucket value, so assignments are
/// stable across calls, processes and sibling SDKs sharing the hash function.
#[derive(Debug, Clone)]
pub struct Bucketer<S = Murmur3Sharder> {
    sharder: S,
}

impl Default for Bucketer {
    fn default() -> Self {
        Bucketer::new(Murmur3Sharder)
    }
}

impl<S: Sharder> Bucketer<S> {
    /// Create a bucketer hashing with `sharder`.
    pub fn new(sharder: S) -> Bucketer<S> {
        Bucketer { sharder }
    }

    /// Bucket value in `[0, 10000)` for a hash input (bucketing id followed by entity id).
    pub fn generate_bucket_value(&self, bucketing_key: &str) -> u32 {
        // get_shard() is < MAX_TRAFFIC_VALUE, so it fits.
        self.sharder.get_shard(bucketing_key, MAX_TRAFFIC_VALUE) as u32
    }

    /// Bucket into `experiment`, honoring its mutual exclusion group.
    pub fn bucket_experiment<'a>(
        &self,
        config: &ProjectConfig,
        experiment: &'a Experiment,
        bucketing_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        if !self.passes_group(config, experiment, bucketing_id, reasons) {
            return None;
        }
        self.bucket_to_variation(experiment, bucketing_id, reasons)
    }

    /// Bucket directly into a variation of `rule`, ignoring groups.
    pub fn bucket_to_variation<'a, R: Rule + ?Sized>(
        &self,
        rule: &'a R,
        bucketing_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let table = rule.traffic_allocation();
        if table.is_empty() {
            reasons.add_error(EvaluationError::ExperimentHasNoTrafficAllocation(
                rule.key().to_owned(),
            ));
            return None;
        }

        let bucket_value = self.generate_bucket_value(&format!("{bucketing_id}{}", rule.id()));
        log::trace!(target: "decision_core", bucketing_id, rule_id = rule.id(), bucket_value; "assigned bucket");

        let Some(variation_id) = allocate_traffic(table, bucket_value) else {
            reasons.add_info(Info::UserNotBucketedIntoVariation {
                bucketing_id,
                rule_key: rule.key(),
            });
            return None;
        };

        match rule.variation_by_id(variation_id) {
            Some(variation) => {
                reasons.add_info(Info::UserBucketedIntoVariation {
                    bucketing_id,
                    variation_key: &variation.key,
                    rule_key: rule.key(),
                });
                Some(variation)
            }
            None => {
                reasons.add_error(EvaluationError::VariationIdNotFound {
                    rule_key: rule.key().to_owned(),
                    variation_id: variation_id.to_owned(),
                });
                None
            }
        }
    }

    /// Bucket into a caller-supplied table keyed by the experiment id, honoring the experiment's
    /// mutual exclusion group. Returns the allocated entity id.
    pub fn bucket_to_entity_id(
        &self,
        config: &ProjectConfig,
        experiment: &Experiment,
        bucketing_id: &str,
        table: &[TrafficAllocation],
        reasons: &mut DecisionReasons,
    ) -> Option<String> {
        if !self.passes_group(config, experiment, bucketing_id, reasons) {
            return None;
        }

        let bucket_value = self.generate_bucket_value(&format!("{bucketing_id}{}", experiment.id));
        allocate_traffic(table, bucket_value).map(str::to_owned)
    }

    /// Whether the user is allowed into `experiment` by its group. Always true outside of
    /// `random` groups.
    fn passes_group(
        &self,
        config: &ProjectConfig,
        experiment: &Experiment,
        bucketing_id: &str,
        reasons: &mut DecisionReasons,
    ) -> bool {
        let Some(group) = config.get_group_for_experiment(&experiment.id) else {
            return true;
        };
        if group.policy == GroupPolicy::Overlapping {
            return true;
        }

        if group.traffic_allocation.is_empty() {
            reasons.add_error(EvaluationError::GroupHasNoTrafficAllocation(
                group.id.clone(),
            ));
            return false;
        }

        let bucket_value = self.generate_bucket_value(&format!("{bucketing_id}{}", group.id));
        match allocate_traffic(&group.traffic_allocation, bucket_value) {
            Some(experiment_id) if experiment_id == experiment.id => {
                reasons.add_info(Info::UserBucketedIntoExperimentInGroup {
                    bucketing_id,
                    experiment_key: &experiment.key,
                    group_id: &group.id,
                });
                true
            }
            Some(_) => {
                reasons.add_info(Info::UserNotBucketedIntoExperimentInGroup {
                    bucketing_id,
                    experiment_key: &experiment.key,
                    group_id: &group.id,
                });
                false
            }
            None => {
                reasons.add_info(Info::UserNotBucketedIntoAnyExperimentInGroup {
                    bucketing_id,
                    group_id: &group.id,
                });
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{datafile::ExperimentStatus, test_support::load_datafile};

    fn allocation(entity_id: &str, end_of_range: u32) -> TrafficAllocation {
        TrafficAllocation {
            entity_id: entity_id.to_owned(),
            end_of_range,
        }
    }

    fn variation(id: &str, key: &str) -> Variation {
        Variation {
            id: id.to_owned(),
            key: key.to_owned(),
            feature_enabled: true,
            variables: Vec::new(),
        }
    }

    fn experiment(id: &str, traffic_allocation: Vec<TrafficAllocation>) -> Experiment {
        Experiment {
            id: id.to_owned(),
            key: id.to_owned(),
            status: ExperimentStatus::Running,
            layer_id: String::new(),
            variations: vec![variation("a", "a"), variation("b", "b")],
            traffic_allocation,
            audience_ids: Vec::new(),
            audience_conditions: None,
            forced_variations: Default::default(),
            cmab: None,
        }
    }

    #[test]
    fn bucket_values() {
        let bucketer: Bucketer = Bucketer::default();
        assert_eq!(bucketer.generate_bucket_value("ppid11886780721"), 5254);
        assert_eq!(bucketer.generate_bucket_value("ppid21886780721"), 4299);
        assert_eq!(bucketer.generate_bucket_value("ppid21886780722"), 2434);
        assert_eq!(bucketer.generate_bucket_value("ppid31886780721"), 5439);
    }

    #[test]
    fn allocation_boundaries() {
        let table = vec![
            allocation("1000", 0),
            allocation("1001", 3000),
            allocation("1002", 6000),
        ];

        assert_eq!(allocate_traffic(&table, 0), Some("1001"));
        assert_eq!(allocate_traffic(&table, 2999), Some("1001"));
        assert_eq!(allocate_traffic(&table, 3000), Some("1002"));
        assert_eq!(allocate_traffic(&table, 5999), Some("1002"));
        assert_eq!(allocate_traffic(&table, 6000), None);
        assert_eq!(allocate_traffic(&table, 7000), None);
    }

    #[test]
    fn buckets_into_variation() {
        let bucketer: Bucketer = Bucketer::default();
        let experiment = experiment(
            "exp_with_audience",
            vec![allocation("a", 5000), allocation("b", 10000)],
        );
        let mut reasons = DecisionReasons::new(true);

        // "11111exp_with_audience" hashes to bucket 9179.
        let variation = bucketer.bucket_to_variation(&experiment, "11111", &mut reasons);
        assert_eq!(variation.map(|v| v.key.as_str()), Some("b"));
        assert!(reasons.errors().is_empty());
    }

    #[test]
    fn bucketing_is_deterministic() {
        let bucketer: Bucketer = Bucketer::default();
        let experiment = experiment("1886780721", vec![allocation("a", 5000), allocation("b", 10000)]);
        let mut reasons = DecisionReasons::new(false);

        for user in ["ppid1", "ppid2", "ppid3", "ppid4"] {
            let first = bucketer.bucket_to_variation(&experiment, user, &mut reasons);
            let second = bucketer.bucket_to_variation(&experiment, user, &mut reasons);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn empty_allocation_is_an_error() {
        let bucketer: Bucketer = Bucketer::default();
        let experiment = experiment("1", Vec::new());
        let mut reasons = DecisionReasons::new(false);

        assert!(bucketer.bucket_to_variation(&experiment, "user", &mut reasons).is_none());
        assert_eq!(
            reasons.errors(),
            ["Experiment \"1\" has no traffic allocation.".to_owned()]
        );
    }

    #[test]
    fn unknown_variation_id_is_an_error() {
        let bucketer: Bucketer = Bucketer::default();
        let experiment = experiment("1", vec![allocation("missing", 10000)]);
        let mut reasons = DecisionReasons::new(false);

        assert!(bucketer.bucket_to_variation(&experiment, "user", &mut reasons).is_none());
        assert_eq!(reasons.errors().len(), 1);
    }

    #[test]
    fn random_group_selects_one_experiment() {
        let config = load_datafile();
        let bucketer: Bucketer = Bucketer::default();
        let group_exp_1 = config.get_experiment_by_key("group_exp_1").unwrap();
        let group_exp_2 = config.get_experiment_by_key("group_exp_2").unwrap();
        let mut reasons = DecisionReasons::new(true);

        // "user_2" lands on slot 3314 of the group, "user_1" on 5923.
        assert_eq!(
            bucketer
                .bucket_experiment(&config, group_exp_1, "user_2", &mut reasons)
                .map(|v| v.key.as_str()),
            Some("g1_a")
        );
        assert!(bucketer
            .bucket_experiment(&config, group_exp_2, "user_2", &mut reasons)
            .is_none());
        assert!(bucketer
            .bucket_experiment(&config, group_exp_1, "user_1", &mut reasons)
            .is_none());
        assert_eq!(
            bucketer
                .bucket_experiment(&config, group_exp_2, "user_1", &mut reasons)
                .map(|v| v.key.as_str()),
            Some("g2_a")
        );
        assert!(reasons
            .infos()
            .contains(&"User with bucketing ID \"user_2\" is not in experiment \"group_exp_2\" of group \"13142870430\".".to_owned()));
    }

    #[test]
    fn random_group_is_mutually_exclusive() {
        let config = load_datafile();
        let bucketer: Bucketer = Bucketer::default();
        let group_exp_1 = config.get_experiment_by_key("group_exp_1").unwrap();
        let group_exp_2 = config.get_experiment_by_key("group_exp_2").unwrap();
        let mut reasons = DecisionReasons::new(false);

        for i in 0..10_000 {
            let user = format!("user_{i}");
            let in_1 = bucketer
                .bucket_experiment(&config, group_exp_1, &user, &mut reasons)
                .is_some();
            let in_2 = bucketer
                .bucket_experiment(&config, group_exp_2, &user, &mut reasons)
                .is_some();
            assert!(in_1 != in_2, "{user} is in {in_1} / {in_2}");
        }
    }

    #[test]
    fn overlapping_group_is_not_checked() {
        let config = load_datafile();
        let bucketer: Bucketer = Bucketer::default();
        let experiment = config.get_experiment_by_key("overlapping_exp").unwrap();
        let mut reasons = DecisionReasons::new(false);

        for user in ["user_1", "user_2", "user_3"] {
            assert!(bucketer
                .bucket_experiment(&config, experiment, user, &mut reasons)
                .is_some());
        }
    }

    #[test]
    fn bucket_to_entity_id() {
        let config = load_datafile();
        let bucketer: Bucketer = Bucketer::default();
        let experiment = config.get_experiment_by_key("cmab_exp").unwrap();
        let mut reasons = DecisionReasons::new(false);

        assert_eq!(
            bucketer.bucket_to_entity_id(
                &config,
                experiment,
                "user_1",
                &[allocation("$", 10000)],
                &mut reasons
            ),
            Some("$".to_owned())
        );
        assert_eq!(
            bucketer.bucket_to_entity_id(
                &config,
                experiment,
                "user_1",
                &[allocation("$", 0)],
                &mut reasons
            ),
            None
        );
    }

    #[test]
    fn bucket_to_entity_id_respects_groups() {
        let config = load_datafile();
        let bucketer: Bucketer = Bucketer::default();
        let group_exp_2 = config.get_experiment_by_key("group_exp_2").unwrap();
        let mut reasons = DecisionReasons::new(false);

        assert_eq!(
            bucketer.bucket_to_entity_id(
                &config,
                group_exp_2,
                "user_2",
                &[allocation("$", 10000)],
                &mut reasons
            ),
            None
        );
    }

    struct ConstantSharder(u64);

    impl Sharder for ConstantSharder {
        fn get_shard(&self, _input: impl AsRef<[u8]>, _total_shards: u64) -> u64 {
            self.0
        }
    }

    #[test]
    fn custom_sharder() {
        let experiment = experiment("1", vec![allocation("a", 5000), allocation("b", 10000)]);
        let mut reasons = DecisionReasons::new(false);

        let low = Bucketer::new(ConstantSharder(4999));
        let high = Bucketer::new(ConstantSharder(5000));
        assert_eq!(
            low.bucket_to_variation(&experiment, "u", &mut reasons).map(|v| v.key.as_str()),
            Some("a")
        );
        assert_eq!(
            high.bucket_to_variation(&experiment, "u", &mut reasons).map(|v| v.key.as_str()),
            Some("b")
        );
    }
}
