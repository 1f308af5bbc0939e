use std::convert::TryFrom;

use crate::error::ConfigError;
use crate::{CONCURRENCY_PARAM, MAX_PARALLELISM, REPLICATION_PARAM};

/// The stop conditions and parallelism of a lookup.
///
/// A lookup converges after `direct_hits` direct hits or `max_success` successful probes, aborts
/// once more than `max_failures` probes failed, and is exhausted after
/// `max_no_new_info(minimum_results)` successful probes in a row brought no closer peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RoutingConfig {
    direct_hits: usize,
    max_no_new_info_diff: usize,
    max_failures: usize,
    max_success: usize,
    parallelism: usize,
    force_tcp: bool,
}

impl RoutingConfig {
    /// Constructs a new `RoutingConfig` with unbounded direct hits, a success tolerance of
    /// `REPLICATION_PARAM` and UDP probes.
    pub fn new(
        max_no_new_info_diff: usize,
        max_failures: usize,
        parallelism: usize,
    ) -> Result<Self, ConfigError> {
        if parallelism > MAX_PARALLELISM {
            return Err(ConfigError::ParallelismTooLarge {
                parallelism,
                max: MAX_PARALLELISM,
            });
        }
        Ok(RoutingConfig {
            direct_hits: usize::max_value(),
            max_no_new_info_diff,
            max_failures,
            max_success: REPLICATION_PARAM,
            parallelism,
            force_tcp: false,
        })
    }

    /// Stops the lookup once `direct_hits` peers answered as the target itself.
    pub fn with_direct_hits(mut self, direct_hits: usize) -> Self {
        self.direct_hits = direct_hits;
        self
    }

    /// Stops the lookup once `max_success` probes succeeded.
    pub fn with_max_success(mut self, max_success: usize) -> Self {
        self.max_success = max_success;
        self
    }

    /// Probes over TCP instead of UDP.
    pub fn with_force_tcp(mut self, force_tcp: bool) -> Self {
        self.force_tcp = force_tcp;
        self
    }

    pub fn direct_hits(&self) -> usize {
        self.direct_hits
    }

    /// The number of probes without progress tolerated beyond `minimum_results`.
    pub fn max_no_new_info_diff(&self) -> usize {
        self.max_no_new_info_diff
    }

    /// The number of probes without progress after which a lookup needing `minimum_results`
    /// results stops. The budget grows with `minimum_results` so that finding the closest peer by
    /// chance early does not end the search before enough peers were seen.
    pub fn max_no_new_info(&self, minimum_results: usize) -> usize {
        self.max_no_new_info_diff.saturating_add(minimum_results)
    }

    pub fn max_failures(&self) -> usize {
        self.max_failures
    }

    pub fn max_success(&self) -> usize {
        self.max_success
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn force_tcp(&self) -> bool {
        self.force_tcp
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig {
            direct_hits: usize::max_value(),
            max_no_new_info_diff: 5,
            max_failures: 10,
            max_success: REPLICATION_PARAM,
            parallelism: CONCURRENCY_PARAM,
            force_tcp: false,
        }
    }
}

/// A routing configuration as read from an external source, before validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRoutingConfig {
    pub direct_hits: Option<i64>,
    pub max_no_new_info_diff: i64,
    pub max_failures: i64,
    pub max_success: Option<i64>,
    pub parallelism: i64,
    #[serde(default)]
    pub force_tcp: bool,
}

fn non_negative(value: i64, field: &'static str) -> Result<usize, ConfigError> {
    if value < 0 {
        return Err(ConfigError::Negative { field });
    }
    Ok(usize::try_from(value).unwrap_or_else(|_| usize::max_value()))
}

impl TryFrom<RawRoutingConfig> for RoutingConfig {
    type Error = ConfigError;

    fn try_from(raw: RawRoutingConfig) -> Result<Self, Self::Error> {
        let direct_hits = match raw.direct_hits {
            Some(direct_hits) => non_negative(direct_hits, "direct_hits")?,
            None => usize::max_value(),
        };
        let max_success = match raw.max_success {
            Some(max_success) => non_negative(max_success, "max_success")?,
            None => REPLICATION_PARAM,
        };
        let config = RoutingConfig::new(
            non_negative(raw.max_no_new_info_diff, "max_no_new_info_diff")?,
            non_negative(raw.max_failures, "max_failures")?,
            non_negative(raw.parallelism, "parallelism")?,
        )?;
        Ok(config
            .with_direct_hits(direct_hits)
            .with_max_success(max_success)
            .with_force_tcp(raw.force_tcp))
    }
}
