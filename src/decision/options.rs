/// Per-call switches of a decision.
///
/// Options passed to a call are combined with the service-wide defaults configured through
/// [`DecisionServiceConfig::default_options`](super::DecisionServiceConfig::default_options): a
/// switch is on if it is on in either.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecideOptions {
    /// Keep informational messages in the decision reasons. Errors are always kept.
    pub include_reasons: bool,
    /// Neither read nor write sticky assignments.
    pub ignore_user_profile_service: bool,
    /// Fetch CMAB decisions without consulting or updating the CMAB cache.
    pub ignore_cmab_cache: bool,
    /// Drop every cached CMAB decision before deciding.
    pub reset_cmab_cache: bool,
    /// Drop the cached CMAB decision of this user and rule before deciding.
    pub invalidate_user_cmab_cache: bool,
}

impl DecideOptions {
    /// Options with every switch that is on in `self` or in `other`.
    pub fn merge(&self, other: &DecideOptions) -> DecideOptions {
        DecideOptions {
            include_reasons: self.include_reasons || other.include_reasons,
            ignore_user_profile_service: self.ignore_user_profile_service
                || other.ignore_user_profile_service,
            ignore_cmab_cache: self.ignore_cmab_cache || other.ignore_cmab_cache,
            reset_cmab_cache: self.reset_cmab_cache || other.reset_cmab_cache,
            invalidate_user_cmab_cache: self.invalidate_user_cmab_cache
                || other.invalidate_user_cmab_cache,
        }
    }
}
