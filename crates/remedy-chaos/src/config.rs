//! Harness configuration.
//!
//! Loaded from environment variables with defaults matching a standard CI
//! run. The CLI layers its flags over the unvalidated `parse_*` result and
//! validates once at the end, so a flag can correct a bad variable.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

// ===== Chaos run defaults =====

/// Default wall-clock duration of the chaos phase in seconds.
pub const DEFAULT_RUN_DURATION_SECONDS: u64 = 600;

/// Default bounds for the service-churn actor's sleep in seconds.
pub const DEFAULT_SVC_MIN_SLEEP_SECONDS: u64 = 20;
pub const DEFAULT_SVC_MAX_SLEEP_SECONDS: u64 = 180;

/// Default bounds for services created per churn iteration.
pub const DEFAULT_MIN_SVC_COUNT: usize = 5;
pub const DEFAULT_MAX_SVC_COUNT: usize = 20;

/// Default bounds for the orphaned-ip actor's sleep in seconds.
pub const DEFAULT_ORPHANED_IP_MIN_SLEEP_SECONDS: u64 = 60;
pub const DEFAULT_ORPHANED_IP_MAX_SLEEP_SECONDS: u64 = 70;

/// Default time the controller gets to settle before the final leak check.
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD_SECONDS: u64 = 900;

/// Default namespace for services and custom resources.
pub const DEFAULT_NAMESPACE: &str = "default";

// ===== Failed-VM check defaults =====

pub const DEFAULT_FAILED_VM_REQUIRED_ATTEMPTS: u32 = 5;
pub const DEFAULT_FAILED_VM_CHECK_INTERVAL_SECONDS: u64 = 10;
pub const DEFAULT_FAILED_VM_RUN_DURATION_SECONDS: u64 = 600;
pub const DEFAULT_FAILED_VM_WORKER_GROUP: &str = "fail-me";
pub const DEFAULT_FAILED_VM_NAMESPACE: &str = "kube-system";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Chaos orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaosConfig {
    /// How long both actors keep starting new iterations.
    pub run_duration: Duration,

    pub svc_min_sleep: Duration,
    pub svc_max_sleep: Duration,

    pub min_svc_count: usize,
    pub max_svc_count: usize,

    pub orphaned_ip_min_sleep: Duration,
    pub orphaned_ip_max_sleep: Duration,

    /// Wait between the end of the chaos phase and the final leak check.
    pub shutdown_grace_period: Duration,

    /// Namespace for churn services and custom resources.
    pub namespace: String,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            run_duration: Duration::from_secs(DEFAULT_RUN_DURATION_SECONDS),
            svc_min_sleep: Duration::from_secs(DEFAULT_SVC_MIN_SLEEP_SECONDS),
            svc_max_sleep: Duration::from_secs(DEFAULT_SVC_MAX_SLEEP_SECONDS),
            min_svc_count: DEFAULT_MIN_SVC_COUNT,
            max_svc_count: DEFAULT_MAX_SVC_COUNT,
            orphaned_ip_min_sleep: Duration::from_secs(DEFAULT_ORPHANED_IP_MIN_SLEEP_SECONDS),
            orphaned_ip_max_sleep: Duration::from_secs(DEFAULT_ORPHANED_IP_MAX_SLEEP_SECONDS),
            shutdown_grace_period: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_PERIOD_SECONDS),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl ChaosConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let config = Self::parse_vars(vars)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse the variables without checking the ranges.
    pub fn parse_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Ok(ChaosConfig {
            run_duration: seconds(vars, "CHAOS_RUN_DURATION_SECONDS", DEFAULT_RUN_DURATION_SECONDS)?,
            svc_min_sleep: seconds(
                vars,
                "CHAOS_SVC_MIN_SLEEP_SECONDS",
                DEFAULT_SVC_MIN_SLEEP_SECONDS,
            )?,
            svc_max_sleep: seconds(
                vars,
                "CHAOS_SVC_MAX_SLEEP_SECONDS",
                DEFAULT_SVC_MAX_SLEEP_SECONDS,
            )?,
            min_svc_count: number(vars, "CHAOS_MIN_SVC_COUNT", DEFAULT_MIN_SVC_COUNT)?,
            max_svc_count: number(vars, "CHAOS_MAX_SVC_COUNT", DEFAULT_MAX_SVC_COUNT)?,
            orphaned_ip_min_sleep: seconds(
                vars,
                "CHAOS_ORPHANED_IP_MIN_SLEEP_SECONDS",
                DEFAULT_ORPHANED_IP_MIN_SLEEP_SECONDS,
            )?,
            orphaned_ip_max_sleep: seconds(
                vars,
                "CHAOS_ORPHANED_IP_MAX_SLEEP_SECONDS",
                DEFAULT_ORPHANED_IP_MAX_SLEEP_SECONDS,
            )?,
            shutdown_grace_period: seconds(
                vars,
                "CHAOS_SHUTDOWN_GRACE_PERIOD_SECONDS",
                DEFAULT_SHUTDOWN_GRACE_PERIOD_SECONDS,
            )?,
            namespace: vars
                .get("CHAOS_NAMESPACE")
                .cloned()
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
        })
    }

    /// Check the min/max pairs and the service count bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.svc_min_sleep > self.svc_max_sleep {
            return Err(ConfigError::InvalidRange(format!(
                "service sleep minimum {:?} exceeds maximum {:?}",
                self.svc_min_sleep, self.svc_max_sleep
            )));
        }
        if self.orphaned_ip_min_sleep > self.orphaned_ip_max_sleep {
            return Err(ConfigError::InvalidRange(format!(
                "orphaned IP sleep minimum {:?} exceeds maximum {:?}",
                self.orphaned_ip_min_sleep, self.orphaned_ip_max_sleep
            )));
        }
        if self.min_svc_count == 0 {
            return Err(ConfigError::InvalidRange(
                "minimum service count must be at least 1".to_string(),
            ));
        }
        if self.min_svc_count > self.max_svc_count {
            return Err(ConfigError::InvalidRange(format!(
                "minimum service count {} exceeds maximum {}",
                self.min_svc_count, self.max_svc_count
            )));
        }
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Failed-VM remediation check configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedVmConfig {
    /// Reapply attempts the controller must have recorded for a pass.
    pub required_attempts: u32,
    pub check_interval: Duration,
    pub run_duration: Duration,
    /// Worker pool whose nodes may be failed.
    pub worker_group: String,
    /// Namespace holding the `virtualmachines` objects.
    pub namespace: String,
}

impl Default for FailedVmConfig {
    fn default() -> Self {
        Self {
            required_attempts: DEFAULT_FAILED_VM_REQUIRED_ATTEMPTS,
            check_interval: Duration::from_secs(DEFAULT_FAILED_VM_CHECK_INTERVAL_SECONDS),
            run_duration: Duration::from_secs(DEFAULT_FAILED_VM_RUN_DURATION_SECONDS),
            worker_group: DEFAULT_FAILED_VM_WORKER_GROUP.to_string(),
            namespace: DEFAULT_FAILED_VM_NAMESPACE.to_string(),
        }
    }
}

impl FailedVmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let config = Self::parse_vars(vars)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse the variables without checking the ranges.
    pub fn parse_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Ok(FailedVmConfig {
            required_attempts: number(
                vars,
                "FAILED_VM_REQUIRED_ATTEMPTS",
                DEFAULT_FAILED_VM_REQUIRED_ATTEMPTS,
            )?,
            check_interval: seconds(
                vars,
                "FAILED_VM_CHECK_INTERVAL_SECONDS",
                DEFAULT_FAILED_VM_CHECK_INTERVAL_SECONDS,
            )?,
            run_duration: seconds(
                vars,
                "FAILED_VM_RUN_DURATION_SECONDS",
                DEFAULT_FAILED_VM_RUN_DURATION_SECONDS,
            )?,
            worker_group: vars
                .get("FAILED_VM_WORKER_GROUP")
                .cloned()
                .unwrap_or_else(|| DEFAULT_FAILED_VM_WORKER_GROUP.to_string()),
            namespace: vars
                .get("FAILED_VM_NAMESPACE")
                .cloned()
                .unwrap_or_else(|| DEFAULT_FAILED_VM_NAMESPACE.to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval.is_zero() {
            return Err(ConfigError::InvalidRange(
                "check interval must be greater than 0".to_string(),
            ));
        }
        if self.worker_group.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "worker group must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn number<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(key) {
        Some(value_str) => value_str.trim().parse().map_err(|e| {
            ConfigError::InvalidNumber(format!(
                "{key} must be a valid non-negative integer, got '{value_str}': {e}"
            ))
        }),
        None => Ok(default),
    }
}

fn seconds(
    vars: &HashMap<String, String>,
    key: &str,
    default_seconds: u64,
) -> Result<Duration, ConfigError> {
    number(vars, key, default_seconds).map(Duration::from_secs)
}
