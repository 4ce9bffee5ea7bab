use crate::{
    audience::does_meet_audience_conditions,
    datafile::{FeatureFlag, Holdout, Variation},
    messages::{EvaluationKind, Info},
    reasons::{DecisionReasons, DecisionResponse},
    sharder::Sharder,
    user_context::ForcedDecisionKey,
    user_profile::UserProfileTracker,
    EvaluationError, ProjectConfig, UserContext,
};

use super::{
    experiment::bucketing_id, DecideOptions, DecisionResult, DecisionService, DecisionSource,
    FeatureDecision, RuleRef,
};

const EVERYONE_ELSE: &str = "Everyone Else";

impl<S: Sharder> DecisionService<S> {
    /// Decide `flag` for `user`.
    ///
    /// See [`get_variation`](Self::get_variation) for `is_async`. A failed contextual-bandit
    /// decision stops the chain: later experiments and the rollout are not tried.
    pub fn get_decision_for_flag<'a>(
        &self,
        config: &'a ProjectConfig,
        flag: &'a FeatureFlag,
        user: &UserContext,
        options: &DecideOptions,
        is_async: bool,
    ) -> DecisionResponse<DecisionResult<FeatureDecision<'a>>> {
        let mut decisions = self.get_decisions_for_flags(config, &[flag], user, options, is_async);
        decisions
            .pop()
            .unwrap_or_else(|| DecisionResponse::new(Ok(None), DecisionReasons::new(false)))
    }

    /// Decide several flags for `user`, in order.
    ///
    /// The user profile is loaded once before the first flag and saved at most once after the
    /// last one.
    pub fn get_decisions_for_flags<'a>(
        &self,
        config: &'a ProjectConfig,
        flags: &[&'a FeatureFlag],
        user: &UserContext,
        options: &DecideOptions,
        is_async: bool,
    ) -> Vec<DecisionResponse<DecisionResult<FeatureDecision<'a>>>> {
        let options = self.options(options);
        let mut tracker = self.profile_tracker(user, &options);

        let decisions = flags
            .iter()
            .map(|&flag| {
                let mut reasons = DecisionReasons::new(options.include_reasons);
                let result = self.resolve_flag(
                    config,
                    flag,
                    user,
                    &options,
                    is_async,
                    tracker.as_mut(),
                    &mut reasons,
                );
                log::trace!(target: "decision_core",
                    flag_key = flag.key.as_str(),
                    user_id = user.user_id(),
                    decided = matches!(result, Ok(Some(_)));
                    "decided flag");
                DecisionResponse::new(result, reasons)
            })
            .collect();

        if let Some(tracker) = tracker {
            tracker.save();
        }

        decisions
    }

    fn resolve_flag<'a>(
        &self,
        config: &'a ProjectConfig,
        flag: &'a FeatureFlag,
        user: &UserContext,
        options: &DecideOptions,
        is_async: bool,
        mut tracker: Option<&mut UserProfileTracker>,
        reasons: &mut DecisionReasons,
    ) -> DecisionResult<FeatureDecision<'a>> {
        let user_id = user.user_id();

        if let Some(variation) = forced_decision(config, flag, None, user, reasons) {
            return Ok(Some(FeatureDecision {
                rule: None,
                variation,
                source: DecisionSource::FeatureTest,
                cmab_uuid: None,
            }));
        }

        for holdout in config.get_holdouts_for_flag(&flag.id) {
            if let Some(variation) = self.holdout_variation(config, holdout, user, reasons) {
                reasons.add_info(Info::UserInHoldout {
                    user_id,
                    holdout_key: &holdout.key,
                    flag_key: &flag.key,
                });
                return Ok(Some(FeatureDecision {
                    rule: Some(RuleRef::Holdout(holdout)),
                    variation,
                    source: DecisionSource::Holdout,
                    cmab_uuid: None,
                }));
            }
        }

        for experiment_id in &flag.experiment_ids {
            let Some(experiment) = config.get_experiment_by_id(experiment_id) else {
                reasons.add_error(EvaluationError::ExperimentIdNotFound(
                    experiment_id.clone(),
                ));
                continue;
            };

            let forced = forced_decision(config, flag, Some(experiment.key.as_str()), user, reasons);
            let decision = match forced {
                Some(variation) => Some(variation.into()),
                None => self.resolve_variation(
                    config,
                    experiment,
                    user,
                    options,
                    is_async,
                    tracker.as_deref_mut(),
                    reasons,
                )?,
            };

            if let Some(decision) = decision {
                reasons.add_info(Info::UserInFeatureExperiment {
                    user_id,
                    experiment_key: &experiment.key,
                    flag_key: &flag.key,
                });
                return Ok(Some(FeatureDecision {
                    rule: Some(RuleRef::Experiment(experiment)),
                    variation: decision.variation,
                    source: DecisionSource::FeatureTest,
                    cmab_uuid: decision.cmab_uuid,
                }));
            }
        }
        reasons.add_info(Info::UserNotInFeatureExperiment {
            user_id,
            flag_key: &flag.key,
        });

        let decision = self.rollout_decision(config, flag, user, reasons);
        if decision.is_some() {
            reasons.add_info(Info::UserInRollout {
                user_id,
                flag_key: &flag.key,
            });
        } else {
            reasons.add_info(Info::UserNotInRollout {
                user_id,
                flag_key: &flag.key,
            });
        }
        Ok(decision)
    }

    fn holdout_variation<'a>(
        &self,
        config: &ProjectConfig,
        holdout: &'a Holdout,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        if !holdout.is_running() {
            reasons.add_info(Info::HoldoutNotRunning(&holdout.key));
            return None;
        }

        if !does_meet_audience_conditions(
            config,
            holdout,
            user,
            EvaluationKind::Holdout,
            &holdout.key,
            reasons,
        ) {
            reasons.add_info(Info::UserDoesNotMeetConditions {
                user_id: user.user_id(),
                kind: EvaluationKind::Holdout,
                key: &holdout.key,
            });
            return None;
        }

        let bucketing_id = bucketing_id(user, reasons);
        self.bucketer
            .bucket_to_variation(holdout, bucketing_id, reasons)
    }

    /// Walk the rollout rules. A rule whose audience matches but whose traffic misses the user
    /// sends the user straight to the last ("Everyone Else") rule.
    fn rollout_decision<'a>(
        &self,
        config: &'a ProjectConfig,
        flag: &'a FeatureFlag,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> Option<FeatureDecision<'a>> {
        let user_id = user.user_id();
        let rollout_id = flag.rollout_id.trim();
        if rollout_id.is_empty() {
            reasons.add_info(Info::FlagNotInRollout(&flag.key));
            return None;
        }

        let Some(rollout) = config.get_rollout(rollout_id) else {
            reasons.add_error(EvaluationError::RolloutNotFound {
                rollout_id: rollout_id.to_owned(),
                flag_key: flag.key.clone(),
            });
            return None;
        };

        let rules = &rollout.experiments;
        let last = rules.len().checked_sub(1)?;
        let bucketing_id = bucketing_id(user, reasons);

        let mut index = 0;
        while index <= last {
            let rule = &rules[index];
            let is_everyone_else = index == last;
            let decision = |variation| FeatureDecision {
                rule: Some(RuleRef::Experiment(rule)),
                variation,
                source: DecisionSource::Rollout,
                cmab_uuid: None,
            };

            if let Some(variation) = forced_decision(config, flag, Some(rule.key.as_str()), user, reasons) {
                return Some(decision(variation));
            }

            let logging_key = if is_everyone_else {
                EVERYONE_ELSE.to_owned()
            } else {
                (index + 1).to_string()
            };

            if !does_meet_audience_conditions(
                config,
                rule,
                user,
                EvaluationKind::Rule,
                &logging_key,
                reasons,
            ) {
                reasons.add_info(Info::UserDoesNotMeetConditionsForTargetingRule {
                    user_id,
                    rule: &logging_key,
                });
                index += 1;
                continue;
            }
            reasons.add_info(Info::UserMeetsConditionsForTargetingRule {
                user_id,
                rule: &logging_key,
            });

            let variation = self
                .bucketer
                .bucket_experiment(config, rule, bucketing_id, reasons);
            match (variation, is_everyone_else) {
                (Some(variation), true) => {
                    reasons.add_info(Info::UserBucketedIntoEveryoneElse { user_id });
                    return Some(decision(variation));
                }
                (Some(variation), false) => {
                    reasons.add_info(Info::UserBucketedIntoTargetingRule {
                        user_id,
                        rule: &logging_key,
                    });
                    return Some(decision(variation));
                }
                (None, true) => {
                    reasons.add_info(Info::UserNotBucketedIntoEveryoneElse { user_id });
                    return None;
                }
                (None, false) => {
                    reasons.add_info(Info::UserNotBucketedIntoTargetingRule {
                        user_id,
                        rule: &logging_key,
                    });
                    index = last;
                }
            }
        }

        None
    }
}

/// Variation forced for the flag (`rule_key` of `None`) or one of its rules. The forced key must
/// name one of the flag's variations.
fn forced_decision<'a>(
    config: &'a ProjectConfig,
    flag: &FeatureFlag,
    rule_key: Option<&str>,
    user: &UserContext,
    reasons: &mut DecisionReasons,
) -> Option<&'a Variation> {
    let variation_key = user.get_forced_decision(&flag.key, rule_key)?;
    let target = ForcedDecisionKey::new(&flag.key, rule_key);

    match config
        .get_flag_variations(&flag.key)
        .iter()
        .find(|variation| variation.key == variation_key)
    {
        Some(variation) => {
            reasons.add_info(Info::ForcedDecisionFound {
                variation_key,
                target,
                user_id: user.user_id(),
            });
            Some(variation)
        }
        None => {
            reasons.add_info(Info::ForcedDecisionInvalid {
                target,
                user_id: user.user_id(),
            });
            None
        }
    }
}
