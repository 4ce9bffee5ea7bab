use std::time::Duration;

use crate::{
    decision::DecideOptions, lru_cache::LruCache, sharder::murmur3_hash, AttributeValue,
    Attributes, ProjectConfig, Result, UserContext,
};

use super::{CmabClient, CmabDecision, CmabService};

#[derive(Debug, Clone, PartialEq, Eq)]
struct CachedDecision {
    attributes_hash: String,
    variation_id: String,
    cmab_uuid: String,
}

/// [`CmabService`] fetching predictions through a [`CmabClient`] and caching them per user and
/// rule.
///
/// A cached prediction is reused only while the user's relevant attributes are unchanged.
pub struct DefaultCmabService<C> {
    client: C,
    cache: LruCache<String, CachedDecision>,
}

impl<C: CmabClient> DefaultCmabService<C> {
    /// Default number of cached predictions.
    pub const DEFAULT_CACHE_SIZE: usize = 100;

    /// Default lifetime of a cached prediction.
    pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

    /// Create a service with the default cache settings.
    pub fn new(client: C) -> DefaultCmabService<C> {
        DefaultCmabService::with_cache(
            client,
            Self::DEFAULT_CACHE_SIZE,
            Self::DEFAULT_CACHE_TIMEOUT,
        )
    }

    /// Create a service caching at most `cache_size` predictions for `cache_timeout` each. A zero
    /// `cache_size` disables caching.
    pub fn with_cache(
        client: C,
        cache_size: usize,
        cache_timeout: Duration,
    ) -> DefaultCmabService<C> {
        DefaultCmabService {
            client,
            cache: LruCache::new(cache_size, cache_timeout),
        }
    }

    fn fetch_decision(
        &self,
        rule_id: &str,
        user_id: &str,
        attributes: &Attributes,
    ) -> Result<CmabDecision> {
        let cmab_uuid = uuid::Uuid::new_v4().to_string();
        let variation_id = self
            .client
            .fetch_decision(rule_id, user_id, attributes, &cmab_uuid)
            .map_err(|err| {
                log::warn!(target: "decision_core", rule_id, user_id; "failed to fetch CMAB decision: {err}");
                err
            })?;

        log::debug!(target: "decision_core", rule_id, user_id, variation_id = variation_id.as_str(); "fetched CMAB decision");
        Ok(CmabDecision {
            variation_id,
            cmab_uuid,
        })
    }
}

impl<C: CmabClient> CmabService for DefaultCmabService<C> {
    fn get_decision(
        &self,
        config: &ProjectConfig,
        user: &UserContext,
        rule_id: &str,
        options: &DecideOptions,
    ) -> Result<CmabDecision> {
        let attributes = filter_attributes(config, user, rule_id);
        let user_id = user.user_id();

        if options.ignore_cmab_cache {
            log::debug!(target: "decision_core", rule_id, user_id; "ignoring CMAB cache");
            return self.fetch_decision(rule_id, user_id, &attributes);
        }

        if options.reset_cmab_cache {
            log::debug!(target: "decision_core", "resetting CMAB cache");
            self.cache.reset();
        }

        let key = cache_key(user_id, rule_id);
        if options.invalidate_user_cmab_cache {
            log::debug!(target: "decision_core", rule_id, user_id; "invalidating user CMAB cache");
            self.cache.remove(&key);
        }

        let attributes_hash = hash_attributes(&attributes);
        match self.cache.lookup(&key) {
            Some(cached) if cached.attributes_hash == attributes_hash => {
                log::debug!(target: "decision_core", rule_id, user_id; "returning cached CMAB decision");
                return Ok(CmabDecision {
                    variation_id: cached.variation_id,
                    cmab_uuid: cached.cmab_uuid,
                });
            }
            Some(_) => {
                self.cache.remove(&key);
            }
            None => {}
        }

        let decision = self.fetch_decision(rule_id, user_id, &attributes)?;
        self.cache.save(
            key,
            CachedDecision {
                attributes_hash,
                variation_id: decision.variation_id.clone(),
                cmab_uuid: decision.cmab_uuid.clone(),
            },
        );
        Ok(decision)
    }
}

/// Length-prefixed so that user ids containing `-` can't collide.
fn cache_key(user_id: &str, rule_id: &str) -> String {
    format!("{}-{user_id}-{rule_id}", user_id.chars().count())
}

/// User attributes the CMAB experiment `rule_id` declares as relevant. Empty if the rule is not a
/// CMAB experiment.
fn filter_attributes(config: &ProjectConfig, user: &UserContext, rule_id: &str) -> Attributes {
    let Some(cmab) = config
        .get_experiment_by_id(rule_id)
        .and_then(|experiment| experiment.cmab.as_ref())
    else {
        return Attributes::new();
    };

    cmab.attribute_ids
        .iter()
        .filter_map(|id| config.get_attribute(id))
        .filter_map(|attribute| {
            let value = user.attributes().get(&attribute.key)?;
            Some((attribute.key.clone(), value.clone()))
        })
        .collect()
}

/// Order-independent fingerprint of `attributes`: MurmurHash3 of the JSON array of `[key, value]`
/// pairs sorted by key, as 8 hex digits.
fn hash_attributes(attributes: &Attributes) -> String {
    let mut pairs: Vec<(&String, &AttributeValue)> = attributes.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    // Attribute values always serialize (non-finite numbers become null).
    let json = serde_json::to_vec(&pairs).unwrap_or_default();
    format!("{:08x}", murmur3_hash(&json))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::{
        test_support::{load_datafile, user},
        Error,
    };

    const CMAB_EXP_ID: &str = "10420810913";

    /// Answers with `variation_ids` in turn and records the attributes it was called with.
    #[derive(Default)]
    struct MockClient {
        variation_ids: Vec<&'static str>,
        calls: AtomicUsize,
        seen_attributes: Mutex<Vec<Attributes>>,
        fail: bool,
    }

    impl MockClient {
        fn answering(variation_ids: &[&'static str]) -> MockClient {
            MockClient {
                variation_ids: variation_ids.to_vec(),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CmabClient for MockClient {
        fn fetch_decision(
            &self,
            _rule_id: &str,
            _user_id: &str,
            attributes: &Attributes,
            _cmab_uuid: &str,
        ) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_attributes
                .lock()
                .unwrap()
                .push(attributes.clone());
            if self.fail {
                return Err(Error::CmabRequestFailed { status: 500 });
            }
            Ok(self.variation_ids[call % self.variation_ids.len()].to_owned())
        }
    }

    impl CmabClient for &MockClient {
        fn fetch_decision(
            &self,
            rule_id: &str,
            user_id: &str,
            attributes: &Attributes,
            cmab_uuid: &str,
        ) -> Result<String> {
            (**self).fetch_decision(rule_id, user_id, attributes, cmab_uuid)
        }
    }

    fn options() -> DecideOptions {
        DecideOptions::default()
    }

    #[test]
    fn cache_key_is_length_prefixed() {
        assert_eq!(cache_key("user-1", "rule"), "6-user-1-rule");
    }

    #[test]
    fn attribute_hash_ignores_insertion_order() {
        let a: Attributes = [
            ("a".to_owned(), 1.into()),
            ("b".to_owned(), "x".into()),
        ]
        .into();
        let b: Attributes = [
            ("b".to_owned(), "x".into()),
            ("a".to_owned(), 1.into()),
        ]
        .into();
        let c: Attributes = [("a".to_owned(), 2.into())].into();

        assert_eq!(hash_attributes(&a), hash_attributes(&b));
        assert_ne!(hash_attributes(&a), hash_attributes(&c));
        assert_eq!(hash_attributes(&a).len(), 8);
    }

    #[test]
    fn filters_attributes_by_cmab_attribute_ids() {
        let config = load_datafile();
        let user = user(
            "user",
            &[("house", "Gryffindor".into()), ("age", 30.into())],
        );

        let filtered = filter_attributes(&config, &user, CMAB_EXP_ID);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.get("house"), Some(&"Gryffindor".into()));

        assert!(filter_attributes(&config, &user, "10390977714").is_empty());
    }

    #[test]
    fn caches_decision_per_user_and_rule() {
        let config = load_datafile();
        let client = MockClient::answering(&["cmab_var_a", "cmab_var_b"]);
        let service = DefaultCmabService::new(&client);
        let user = user("user", &[("house", "Gryffindor".into())]);

        let first = service
            .get_decision(&config, &user, CMAB_EXP_ID, &options())
            .unwrap();
        let second = service
            .get_decision(&config, &user, CMAB_EXP_ID, &options())
            .unwrap();

        assert_eq!(first.variation_id, "cmab_var_a");
        assert_eq!(first, second);
        assert_eq!(client.calls(), 1);
        assert_eq!(
            client.seen_attributes.lock().unwrap()[0].get("house"),
            Some(&"Gryffindor".into())
        );
    }

    #[test]
    fn refetches_when_relevant_attributes_change() {
        let config = load_datafile();
        let client = MockClient::answering(&["cmab_var_a", "cmab_var_b"]);
        let service = DefaultCmabService::new(&client);

        let first = service
            .get_decision(
                &config,
                &user("user", &[("house", "Gryffindor".into())]),
                CMAB_EXP_ID,
                &options(),
            )
            .unwrap();
        // `age` is not a CMAB attribute of the rule, so it doesn't invalidate the cache.
        let same = service
            .get_decision(
                &config,
                &user(
                    "user",
                    &[("house", "Gryffindor".into()), ("age", 5.into())],
                ),
                CMAB_EXP_ID,
                &options(),
            )
            .unwrap();
        let changed = service
            .get_decision(
                &config,
                &user("user", &[("house", "Slytherin".into())]),
                CMAB_EXP_ID,
                &options(),
            )
            .unwrap();

        assert_eq!(first, same);
        assert_eq!(changed.variation_id, "cmab_var_b");
        assert_ne!(first.cmab_uuid, changed.cmab_uuid);
        assert_eq!(client.calls(), 2);
    }

    #[test]
    fn cache_options() {
        let config = load_datafile();
        let client = MockClient::answering(&["cmab_var_a"]);
        let service = DefaultCmabService::new(&client);
        let user = user("user", &[]);

        service
            .get_decision(&config, &user, CMAB_EXP_ID, &options())
            .unwrap();
        assert_eq!(client.calls(), 1);

        let ignore = DecideOptions {
            ignore_cmab_cache: true,
            ..options()
        };
        service
            .get_decision(&config, &user, CMAB_EXP_ID, &ignore)
            .unwrap();
        assert_eq!(client.calls(), 2);

        // Cached entry is still in place after ignoring the cache.
        service
            .get_decision(&config, &user, CMAB_EXP_ID, &options())
            .unwrap();
        assert_eq!(client.calls(), 2);

        let invalidate = DecideOptions {
            invalidate_user_cmab_cache: true,
            ..options()
        };
        service
            .get_decision(&config, &user, CMAB_EXP_ID, &invalidate)
            .unwrap();
        assert_eq!(client.calls(), 3);

        let reset = DecideOptions {
            reset_cmab_cache: true,
            ..options()
        };
        service
            .get_decision(&config, &user, CMAB_EXP_ID, &reset)
            .unwrap();
        assert_eq!(client.calls(), 4);
    }

    #[test]
    fn reset_clears_other_users() {
        let config = load_datafile();
        let client = MockClient::answering(&["cmab_var_a"]);
        let service = DefaultCmabService::new(&client);

        service
            .get_decision(&config, &user("user_1", &[]), CMAB_EXP_ID, &options())
            .unwrap();
        let reset = DecideOptions {
            reset_cmab_cache: true,
            ..options()
        };
        service
            .get_decision(&config, &user("user_2", &[]), CMAB_EXP_ID, &reset)
            .unwrap();
        service
            .get_decision(&config, &user("user_1", &[]), CMAB_EXP_ID, &options())
            .unwrap();

        assert_eq!(client.calls(), 3);
    }

    #[test]
    fn failures_are_not_cached() {
        let config = load_datafile();
        let client = MockClient {
            fail: true,
            ..MockClient::answering(&["cmab_var_a"])
        };
        let service = DefaultCmabService::new(&client);
        let user = user("user", &[]);

        assert!(service
            .get_decision(&config, &user, CMAB_EXP_ID, &options())
            .is_err());
        assert!(service
            .get_decision(&config, &user, CMAB_EXP_ID, &options())
            .is_err());
        assert_eq!(client.calls(), 2);
    }
}
