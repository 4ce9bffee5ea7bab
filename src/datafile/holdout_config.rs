use std::collections::HashMap;

use super::Holdout;

/// Indexes holdouts by the flags they apply to.
#[derive(Debug, Default)]
pub(crate) struct HoldoutConfig {
    holdouts: Vec<Holdout>,
    id_index: HashMap<String, usize>,
    global: Vec<usize>,
    /// Holdouts that only list excluded flags.
    others: Vec<usize>,
    included: HashMap<String, Vec<usize>>,
    excluded: HashMap<String, Vec<usize>>,
}

impl HoldoutConfig {
    pub(crate) fn new(holdouts: Vec<Holdout>) -> HoldoutConfig {
        let mut config = HoldoutConfig {
            id_index: holdouts
                .iter()
                .enumerate()
                .map(|(i, h)| (h.id.clone(), i))
                .collect(),
            ..Default::default()
        };

        for (i, holdout) in holdouts.iter().enumerate() {
            if holdout.is_global() {
                config.global.push(i);
            } else if !holdout.included_flags.is_empty() {
                for flag_id in &holdout.included_flags {
                    config.included.entry(flag_id.clone()).or_default().push(i);
                }
            } else {
                config.others.push(i);
                for flag_id in &holdout.excluded_flags {
                    config.excluded.entry(flag_id.clone()).or_default().push(i);
                }
            }
        }

        config.holdouts = holdouts;
        config
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Holdout> {
        self.id_index.get(id).map(|&i| &self.holdouts[i])
    }

    /// Holdouts applying to the flag: global ones first, then the ones including the flag or,
    /// if there are none, the ones not excluding it.
    pub(crate) fn for_flag(&self, flag_id: &str) -> Vec<&Holdout> {
        let scoped: Vec<usize> = match self.included.get(flag_id) {
            Some(included) if !included.is_empty() => included.clone(),
            _ => {
                let excluded = self.excluded.get(flag_id);
                self.others
                    .iter()
                    .copied()
                    .filter(|i| !excluded.is_some_and(|e| e.contains(i)))
                    .collect()
            }
        };

        self.global
            .iter()
            .chain(scoped.iter())
            .map(|&i| &self.holdouts[i])
            .collect()
    }
}
