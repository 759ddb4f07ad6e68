//! Resolver tunables.

use crate::error::{ResolverError, Result};
use crate::scorer::DEFAULT_EVALUATOR_TIMEOUT;
use std::time::Duration;

/// Identifiers requested from the catalog per strategy.
pub const DEFAULT_MAX_RESULTS: usize = 20;
/// Deadline for each catalog search or fetch.
pub const DEFAULT_CATALOG_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for one [`crate::Resolver`].
///
/// Confidence thresholds are fixed (see [`crate::classify`]); only the
/// resource limits are configurable.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    pub max_results: usize,
    pub catalog_timeout: Duration,
    pub evaluator_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            catalog_timeout: DEFAULT_CATALOG_TIMEOUT,
            evaluator_timeout: DEFAULT_EVALUATOR_TIMEOUT,
        }
    }
}

impl ResolverConfig {
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_catalog_timeout(mut self, timeout: Duration) -> Self {
        self.catalog_timeout = timeout;
        self
    }

    pub fn with_evaluator_timeout(mut self, timeout: Duration) -> Self {
        self.evaluator_timeout = timeout;
        self
    }

    /// Reject settings under which no strategy could ever succeed.
    pub fn validate(&self) -> Result<()> {
        if self.max_results == 0 {
            return Err(ResolverError::Config(
                "max_results must be at least 1".to_string(),
            ));
        }
        if self.catalog_timeout.is_zero() {
            return Err(ResolverError::Config(
                "catalog_timeout must be non-zero".to_string(),
            ));
        }
        if self.evaluator_timeout.is_zero() {
            return Err(ResolverError::Config(
                "evaluator_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ResolverConfig::default();
        assert_eq!(config.max_results, 20);
        assert_eq!(config.catalog_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let config = ResolverConfig::default().with_max_results(0);
        assert!(matches!(config.validate(), Err(ResolverError::Config(_))));
        let config = ResolverConfig::default().with_catalog_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
