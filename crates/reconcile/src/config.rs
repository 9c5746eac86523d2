//! Controller tuning knobs. Populated by the binary from flags/env.

use std::time::Duration;

use kaudit_core::ResourceKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("workers must be at least 1")]
    NoWorkers,
    #[error("backoff base ({base:?}) exceeds cap ({cap:?})")]
    BackoffInverted { base: Duration, cap: Duration },
    #[error("reconcile timeout must be non-zero")]
    ZeroTimeout,
    #[error("no kinds selected")]
    NoKinds,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerConfig {
    pub workers: usize,
    pub reconcile_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Consecutive transient failures after which a key is logged as degraded.
    pub degraded_after: u32,
    pub shutdown_grace: Duration,
    pub kinds: Vec<ResourceKind>,
    pub namespace: Option<String>,
    pub cache_shards: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            reconcile_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(300),
            degraded_after: 10,
            shutdown_grace: Duration::from_secs(10),
            kinds: ResourceKind::ALL.to_vec(),
            namespace: None,
            cache_shards: 16,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 { return Err(ConfigError::NoWorkers); }
        if self.backoff_base > self.backoff_cap {
            return Err(ConfigError::BackoffInverted { base: self.backoff_base, cap: self.backoff_cap });
        }
        if self.reconcile_timeout.is_zero() { return Err(ConfigError::ZeroTimeout); }
        if self.kinds.is_empty() { return Err(ConfigError::NoKinds); }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ControllerConfig::default();
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.kinds.len(), 4);
    }

    #[test]
    fn rejects_bad_values() {
        let cfg = ControllerConfig { workers: 0, ..Default::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::NoWorkers));
        let cfg = ControllerConfig { backoff_base: Duration::from_secs(10), backoff_cap: Duration::from_secs(1), ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::BackoffInverted { .. })));
    }
}
