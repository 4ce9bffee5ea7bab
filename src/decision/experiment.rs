use crate::{
    attributes::BUCKETING_ID_ATTRIBUTE,
    audience::does_meet_audience_conditions,
    datafile::{Cmab, Experiment, Rule, TrafficAllocation, Variation},
    error::DecisionError,
    messages::{EvaluationKind, Info},
    reasons::{DecisionReasons, DecisionResponse},
    sharder::Sharder,
    user_profile::UserProfileTracker,
    AttributeValue, EvaluationError, ProjectConfig, UserContext,
};

use super::{DecideOptions, DecisionResult, DecisionService, VariationDecision};

/// Entity id of the single-slot table gating traffic into CMAB experiments.
const CMAB_DUMMY_ENTITY_ID: &str = "$";

/// Bucketing id of the user: the `$opt_bucketing_id` attribute if it is a string, else the user
/// id.
pub(super) fn bucketing_id<'u>(user: &'u UserContext, reasons: &mut DecisionReasons) -> &'u str {
    match user.attributes().get(BUCKETING_ID_ATTRIBUTE) {
        Some(AttributeValue::String(bucketing_id)) => {
            reasons.add_info(Info::BucketingIdFromAttributes(bucketing_id));
            bucketing_id
        }
        Some(_) => {
            reasons.add_info(Info::BucketingIdNotString);
            user.user_id()
        }
        None => user.user_id(),
    }
}

impl<S: Sharder> DecisionService<S> {
    /// Decide the variation of `experiment` for `user`.
    ///
    /// `is_async` tells whether the caller may block on network I/O. Contextual-bandit experiments
    /// can only be decided when it is set, and fail with
    /// [`DecisionError::CmabNotSupportedInSyncMode`] otherwise.
    ///
    /// A new assignment is saved to the user profile service before returning.
    pub fn get_variation<'a>(
        &self,
        config: &'a ProjectConfig,
        experiment: &'a Experiment,
        user: &UserContext,
        options: &DecideOptions,
        is_async: bool,
    ) -> DecisionResponse<DecisionResult<VariationDecision<'a>>> {
        let options = self.options(options);
        let mut reasons = DecisionReasons::new(options.include_reasons);

        // CMAB experiments don't use sticky assignments.
        let mut tracker = if experiment.is_cmab() {
            None
        } else {
            self.profile_tracker(user, &options)
        };

        let result = self.resolve_variation(
            config,
            experiment,
            user,
            &options,
            is_async,
            tracker.as_mut(),
            &mut reasons,
        );

        if let Some(tracker) = tracker {
            tracker.save();
        }

        DecisionResponse::new(result, reasons)
    }

    pub(super) fn resolve_variation<'a>(
        &self,
        config: &'a ProjectConfig,
        experiment: &'a Experiment,
        user: &UserContext,
        options: &DecideOptions,
        is_async: bool,
        mut tracker: Option<&mut UserProfileTracker>,
        reasons: &mut DecisionReasons,
    ) -> DecisionResult<VariationDecision<'a>> {
        let user_id = user.user_id();

        if !experiment.is_running() {
            reasons.add_info(Info::ExperimentNotRunning(&experiment.key));
            return Ok(None);
        }

        if let Some(variation) = self.runtime_forced_variation(experiment, user_id, reasons) {
            return Ok(Some(variation.into()));
        }

        if let Some(variation) = whitelisted_variation(experiment, user_id, reasons) {
            return Ok(Some(variation.into()));
        }

        if experiment.is_cmab() {
            tracker = None;
        }

        if let Some(tracker) = tracker.as_deref() {
            if let Some(variation) = saved_variation(tracker, experiment, user_id, reasons) {
                return Ok(Some(variation.into()));
            }
        }

        if !does_meet_audience_conditions(
            config,
            experiment,
            user,
            EvaluationKind::Experiment,
            &experiment.key,
            reasons,
        ) {
            reasons.add_info(Info::UserDoesNotMeetConditions {
                user_id,
                kind: EvaluationKind::Experiment,
                key: &experiment.key,
            });
            return Ok(None);
        }

        let bucketing_id = bucketing_id(user, reasons);

        if let Some(cmab) = &experiment.cmab {
            return self.cmab_variation(
                config,
                experiment,
                cmab,
                user,
                bucketing_id,
                options,
                is_async,
                reasons,
            );
        }

        let variation = self
            .bucketer
            .bucket_experiment(config, experiment, bucketing_id, reasons);

        if let (Some(variation), Some(tracker)) = (variation, tracker) {
            tracker.update(&experiment.id, &variation.id);
        }

        Ok(variation.map(VariationDecision::from))
    }

    fn cmab_variation<'a>(
        &self,
        config: &'a ProjectConfig,
        experiment: &'a Experiment,
        cmab: &Cmab,
        user: &UserContext,
        bucketing_id: &str,
        options: &DecideOptions,
        is_async: bool,
        reasons: &mut DecisionReasons,
    ) -> DecisionResult<VariationDecision<'a>> {
        if !is_async {
            let error = DecisionError::CmabNotSupportedInSyncMode;
            reasons.add_error(&error);
            return Err(error);
        }

        let table = [TrafficAllocation {
            entity_id: CMAB_DUMMY_ENTITY_ID.to_owned(),
            end_of_range: cmab.traffic_allocation,
        }];
        if self
            .bucketer
            .bucket_to_entity_id(config, experiment, bucketing_id, &table, reasons)
            .is_none()
        {
            reasons.add_info(Info::UserNotInCmabExperiment {
                user_id: user.user_id(),
                experiment_key: &experiment.key,
            });
            return Ok(None);
        }

        let fetch_failed = || DecisionError::CmabFetchFailed {
            experiment_key: experiment.key.clone(),
        };

        let Some(cmab_service) = &self.cmab_service else {
            log::warn!(target: "decision_core", experiment_key = experiment.key.as_str(); "no CMAB service configured");
            let error = fetch_failed();
            reasons.add_error(&error);
            return Err(error);
        };

        let decision = match cmab_service.get_decision(config, user, &experiment.id, options) {
            Ok(decision) => decision,
            Err(err) => {
                log::warn!(target: "decision_core", experiment_key = experiment.key.as_str(), user_id = user.user_id(); "CMAB decision failed: {err}");
                let error = fetch_failed();
                reasons.add_error(&error);
                return Err(error);
            }
        };

        let Some(variation) = experiment.variation_by_id(&decision.variation_id) else {
            reasons.add_error(EvaluationError::VariationIdNotFound {
                rule_key: experiment.key.clone(),
                variation_id: decision.variation_id,
            });
            return Ok(None);
        };

        reasons.add_info(Info::CmabDecisionFetched {
            user_id: user.user_id(),
            rule_key: &experiment.key,
        });
        Ok(Some(VariationDecision {
            variation,
            cmab_uuid: Some(decision.cmab_uuid),
        }))
    }

    /// Force `user_id` into a variation of the experiment, or clear the forced variation with
    /// `None`. Returns `false` if the experiment or the variation does not exist.
    pub fn set_forced_variation(
        &self,
        config: &ProjectConfig,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> bool {
        let Some(experiment) = config.get_experiment_by_key(experiment_key) else {
            log::warn!(target: "decision_core", experiment_key; "experiment is not in datafile");
            return false;
        };

        let mut forced_variations = self
            .forced_variations
            .write()
            .expect("thread holding forced variations lock should not panic");

        let Some(variation_key) = variation_key else {
            if let Some(users) = forced_variations.get_mut(experiment_key) {
                users.remove(user_id);
            }
            log::debug!(target: "decision_core", experiment_key, user_id; "cleared forced variation");
            return true;
        };

        let Some(variation) = experiment.variation_by_key(variation_key) else {
            log::warn!(target: "decision_core", experiment_key, variation_key; "variation is not in experiment");
            return false;
        };

        forced_variations
            .entry(experiment_key.to_owned())
            .or_default()
            .insert(user_id.to_owned(), variation.id.clone());
        log::debug!(target: "decision_core", experiment_key, user_id, variation_key; "set forced variation");
        true
    }

    /// Variation `user_id` was forced into with [`set_forced_variation`](Self::set_forced_variation).
    pub fn get_forced_variation<'a>(
        &self,
        config: &'a ProjectConfig,
        experiment_key: &str,
        user_id: &str,
    ) -> Option<&'a Variation> {
        let experiment = config.get_experiment_by_key(experiment_key)?;
        let mut reasons = DecisionReasons::new(false);
        self.runtime_forced_variation(experiment, user_id, &mut reasons)
    }

    fn runtime_forced_variation<'a>(
        &self,
        experiment: &'a Experiment,
        user_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let variation_id = self
            .forced_variations
            .read()
            .expect("thread holding forced variations lock should not panic")
            .get(&experiment.key)?
            .get(user_id)?
            .clone();

        match experiment.variation_by_id(&variation_id) {
            Some(variation) => {
                reasons.add_info(Info::ForcedVariationFound {
                    variation_key: &variation.key,
                    experiment_key: &experiment.key,
                    user_id,
                });
                Some(variation)
            }
            None => {
                reasons.add_info(Info::ForcedVariationNotInExperiment {
                    variation_id: &variation_id,
                    experiment_key: &experiment.key,
                    user_id,
                });
                None
            }
        }
    }
}

fn whitelisted_variation<'a>(
    experiment: &'a Experiment,
    user_id: &str,
    reasons: &mut DecisionReasons,
) -> Option<&'a Variation> {
    let variation_key = experiment.forced_variations.get(user_id)?;
    match experiment.variation_by_key(variation_key) {
        Some(variation) => {
            reasons.add_info(Info::UserForcedInVariation {
                user_id,
                variation_key,
            });
            Some(variation)
        }
        None => {
            reasons.add_error(EvaluationError::VariationKeyNotFound {
                experiment_key: experiment.key.clone(),
                variation_key: variation_key.clone(),
            });
            None
        }
    }
}

fn saved_variation<'a>(
    tracker: &UserProfileTracker,
    experiment: &'a Experiment,
    user_id: &str,
    reasons: &mut DecisionReasons,
) -> Option<&'a Variation> {
    let variation_id = tracker.variation_id(&experiment.id)?;
    match experiment.variation_by_id(variation_id) {
        Some(variation) => {
            reasons.add_info(Info::SavedVariationFound {
                variation_key: &variation.key,
                experiment_key: &experiment.key,
                user_id,
            });
            Some(variation)
        }
        None => {
            reasons.add_info(Info::SavedVariationInvalid {
                user_id,
                variation_id,
                experiment_key: &experiment.key,
            });
            None
        }
    }
}

impl<'a> From<&'a Variation> for VariationDecision<'a> {
    fn from(variation: &'a Variation) -> Self {
        VariationDecision {
            variation,
            cmab_uuid: None,
        }
    }
}
