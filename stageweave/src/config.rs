//! Typed orchestrator configuration.
//!
//! Configuration is an explicit struct with named sections. Values come from
//! defaults, optionally a YAML file, and finally a [`ConfigOverrides`] overlay
//! (typically built from CLI flags) applied with [`OrchestratorConfig::merge`].

use crate::errors::ConfigError;
use crate::pipeline::{ApprovalMode, BackoffStrategy, JitterStrategy, RetryConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of parallel stages running at once.
    pub max_concurrent_stages: usize,
    /// Deadline for a single stage attempt, in milliseconds.
    pub stage_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_stages: 4,
            stage_timeout_ms: 10 * 60 * 1000,
        }
    }
}

impl SchedulerConfig {
    /// Returns the per-attempt stage timeout.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }
}

/// Lock manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease length of an acquired lock, in milliseconds.
    pub ttl_ms: u64,
    /// How far past expiry a lock must be before it may be stolen.
    pub steal_threshold_ms: u64,
    /// Whether to ask the holder to release before stealing.
    pub cooperative_release: bool,
    /// How long to wait for a cooperative release. Defaults to half the
    /// steal threshold.
    pub cooperative_timeout_ms: Option<u64>,
    /// Poll interval while waiting for a cooperative release.
    pub poll_interval_ms: u64,
    /// Backoff between contended acquisition attempts.
    pub retry: RetryConfig,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 30_000,
            steal_threshold_ms: 5_000,
            cooperative_release: true,
            cooperative_timeout_ms: None,
            poll_interval_ms: 50,
            retry: RetryConfig::new()
                .with_max_retries(10)
                .with_base_delay_ms(25)
                .with_max_delay_ms(1_000)
                .with_backoff(BackoffStrategy::Exponential)
                .with_jitter(JitterStrategy::Full),
        }
    }
}

impl LockConfig {
    /// Returns the lease length.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Returns the steal threshold.
    #[must_use]
    pub fn steal_threshold(&self) -> Duration {
        Duration::from_millis(self.steal_threshold_ms)
    }

    /// Returns the effective cooperative release timeout.
    #[must_use]
    pub fn cooperative_timeout(&self) -> Duration {
        Duration::from_millis(
            self.cooperative_timeout_ms
                .unwrap_or(self.steal_threshold_ms / 2),
        )
    }

    /// Returns the poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable compact lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Full orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Root directory of the shared state store.
    pub store_root: PathBuf,
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Stage retry policy.
    pub retry: RetryConfig,
    /// Lock manager settings.
    pub lock: LockConfig,
    /// Approval gate policy.
    pub approval: ApprovalMode,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from(".stageweave"),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            lock: LockConfig::default(),
            approval: ApprovalMode::Auto,
            logging: LoggingConfig::default(),
        }
    }
}

/// Field-by-field overrides applied on top of a base configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    /// Overrides `store_root`.
    pub store_root: Option<PathBuf>,
    /// Overrides `scheduler.max_concurrent_stages`.
    pub max_concurrent_stages: Option<usize>,
    /// Overrides `scheduler.stage_timeout_ms`.
    pub stage_timeout_ms: Option<u64>,
    /// Overrides `retry.max_retries`.
    pub max_retries: Option<usize>,
    /// Overrides `retry.base_delay_ms`.
    pub base_delay_ms: Option<u64>,
    /// Overrides `retry.max_delay_ms`.
    pub max_delay_ms: Option<u64>,
    /// Overrides `lock.ttl_ms`.
    pub lock_ttl_ms: Option<u64>,
    /// Overrides `lock.steal_threshold_ms`.
    pub steal_threshold_ms: Option<u64>,
    /// Overrides `lock.cooperative_release`.
    pub cooperative_release: Option<bool>,
    /// Overrides `lock.cooperative_timeout_ms`.
    pub cooperative_timeout_ms: Option<u64>,
    /// Overrides `approval`.
    pub approval: Option<ApprovalMode>,
    /// Overrides `logging.level`.
    pub log_level: Option<String>,
    /// Overrides `logging.format`.
    pub log_format: Option<LogFormat>,
}

impl OrchestratorConfig {
    /// Parses a configuration from YAML. Missing fields take defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Overlays every set override on this configuration.
    #[must_use]
    pub fn merge(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(ref root) = overrides.store_root {
            self.store_root.clone_from(root);
        }
        if let Some(value) = overrides.max_concurrent_stages {
            self.scheduler.max_concurrent_stages = value;
        }
        if let Some(value) = overrides.stage_timeout_ms {
            self.scheduler.stage_timeout_ms = value;
        }
        if let Some(value) = overrides.max_retries {
            self.retry.max_retries = value;
        }
        if let Some(value) = overrides.base_delay_ms {
            self.retry.base_delay_ms = value;
        }
        if let Some(value) = overrides.max_delay_ms {
            self.retry.max_delay_ms = value;
        }
        if let Some(value) = overrides.lock_ttl_ms {
            self.lock.ttl_ms = value;
        }
        if let Some(value) = overrides.steal_threshold_ms {
            self.lock.steal_threshold_ms = value;
        }
        if let Some(value) = overrides.cooperative_release {
            self.lock.cooperative_release = value;
        }
        if let Some(value) = overrides.cooperative_timeout_ms {
            self.lock.cooperative_timeout_ms = Some(value);
        }
        if let Some(value) = overrides.approval {
            self.approval = value;
        }
        if let Some(ref level) = overrides.log_level {
            self.logging.level.clone_from(level);
        }
        if let Some(value) = overrides.log_format {
            self.logging.format = value;
        }
        self
    }

    /// Checks cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_concurrent_stages == 0 {
            return Err(ConfigError::invalid(
                "scheduler.max_concurrent_stages",
                "must be at least 1",
            ));
        }
        if self.scheduler.stage_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "scheduler.stage_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        if self.lock.ttl_ms == 0 {
            return Err(ConfigError::invalid("lock.ttl_ms", "must be greater than zero"));
        }
        if self.lock.retry.base_delay_ms > self.lock.retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "lock.retry.base_delay_ms",
                "must not exceed lock.retry.max_delay_ms",
            ));
        }
        if let Some(timeout) = self.lock.cooperative_timeout_ms {
            if self.lock.steal_threshold_ms > 0 && timeout >= self.lock.steal_threshold_ms {
                return Err(ConfigError::invalid(
                    "lock.cooperative_timeout_ms",
                    "must be below lock.steal_threshold_ms",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lock.cooperative_timeout(), Duration::from_millis(2_500));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r"
store_root: /var/lib/stageweave
scheduler:
  max_concurrent_stages: 8
retry:
  max_retries: 1
";
        let config = OrchestratorConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.store_root, PathBuf::from("/var/lib/stageweave"));
        assert_eq!(config.scheduler.max_concurrent_stages, 8);
        assert_eq!(config.scheduler.stage_timeout_ms, SchedulerConfig::default().stage_timeout_ms);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.lock, LockConfig::default());
    }

    #[test]
    fn test_merge_overlays_only_set_fields() {
        let overrides = ConfigOverrides {
            max_concurrent_stages: Some(2),
            approval: Some(ApprovalMode::Critical),
            log_format: Some(LogFormat::Json),
            ..ConfigOverrides::default()
        };

        let merged = OrchestratorConfig::default().merge(&overrides);

        assert_eq!(merged.scheduler.max_concurrent_stages, 2);
        assert_eq!(merged.approval, ApprovalMode::Critical);
        assert_eq!(merged.logging.format, LogFormat::Json);
        assert_eq!(merged.retry, RetryConfig::default());
        assert_eq!(merged.store_root, PathBuf::from(".stageweave"));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = OrchestratorConfig::default().merge(&ConfigOverrides {
            max_concurrent_stages: Some(0),
            ..ConfigOverrides::default()
        });

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrent_stages"));
    }

    #[test]
    fn test_validate_rejects_cooperative_timeout_above_threshold() {
        let config = OrchestratorConfig::default().merge(&ConfigOverrides {
            steal_threshold_ms: Some(1_000),
            cooperative_timeout_ms: Some(1_000),
            ..ConfigOverrides::default()
        });

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_yaml_is_parse_error() {
        let err = OrchestratorConfig::from_yaml_str("scheduler: [1, 2]").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
