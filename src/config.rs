//! Typed configuration values for the routing memory core.
//!
//! Parsing a configuration *file* is an external collaborator's job (out of
//! scope per the specification); these structs only describe the shape a
//! host process hands in after it has already parsed TOML/YAML/env itself.
//! `Default` on every struct matches the documented defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the memory manager and its stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// When `false`, every mutating call is a no-op and every read returns
    /// an empty-but-well-formed result.
    pub enabled: bool,
    /// Base directory under which the `memory/` tree is created.
    pub base_dir: std::path::PathBuf,
    /// How many days of daily logs to retain before cleanup deletes them.
    pub retention_days: u32,
    /// Soft cap used to decide when a daily log file is due for rotation
    /// outside the normal calendar-day boundary.
    pub max_log_size_mb: u64,
    /// Whether rotated daily logs are gzip-compressed.
    pub compression: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_dir: std::path::PathBuf::from("./data"),
            retention_days: 90,
            max_log_size_mb: 100,
            compression: true,
        }
    }
}

/// Configuration for the heartbeat monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Whether the monitor may be started at all.
    pub enabled: bool,
    /// Interval between check cycles.
    #[serde(with = "duration_millis")]
    pub interval: Duration,
    /// Per-check timeout.
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Whether checkers that support model auto-discovery should run it.
    pub auto_discovery: bool,
    /// Ratio of `used/limit` quota usage at which a warning event is emitted.
    pub quota_warning_threshold: f64,
    /// Ratio of `used/limit` quota usage at which a critical event is emitted.
    pub quota_critical_threshold: f64,
    /// Maximum number of provider checks running concurrently.
    pub max_concurrent_checks: usize,
    /// Number of retries after an initial failed check attempt.
    pub retry_attempts: u32,
    /// Delay between retry attempts.
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_mins(5),
            timeout: Duration::from_secs(5),
            auto_discovery: false,
            quota_warning_threshold: 0.80,
            quota_critical_threshold: 0.95,
            max_concurrent_checks: 10,
            retry_attempts: 2,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Configuration for the recovery manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Whether the recovery manager reacts to heartbeat events at all.
    pub enabled: bool,
    /// Number of `provider_unavailable` events tolerated before disabling a provider.
    pub max_recovery_attempts: u32,
    /// Minimum spacing required between recovery attempts for the same provider.
    #[serde(with = "duration_millis")]
    pub recovery_backoff: Duration,
    /// Number of unavailable events (at the configured backoff spacing) after
    /// which a provider is auto-disabled.
    pub auto_disable_threshold: u32,
    /// How long a disabled provider stays disabled before it is eligible for
    /// auto re-enable.
    #[serde(with = "duration_millis")]
    pub auto_enable_delay: Duration,
    /// Whether `provider_unavailable`/`provider_degraded` events should flip
    /// the fallback-routing flag.
    pub enable_fallback_routing: bool,
    /// Whether disable actions should additionally notify an administrator hook.
    pub notify_admin_on_failure: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_recovery_attempts: 3,
            recovery_backoff: Duration::from_secs(30),
            auto_disable_threshold: 3,
            auto_enable_delay: Duration::from_mins(5),
            enable_fallback_routing: true,
            notify_admin_on_failure: false,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        u64::try_from(d.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_config_defaults_match_spec() {
        let cfg = MemoryConfig::default();
        assert!(!cfg.enabled);
        assert_eq!(cfg.retention_days, 90);
        assert!(cfg.compression);
    }

    #[test]
    fn heartbeat_config_defaults_match_spec() {
        let cfg = HeartbeatConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.interval, Duration::from_mins(5));
        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert_eq!(cfg.max_concurrent_checks, 10);
        assert_eq!(cfg.retry_attempts, 2);
        assert!((cfg.quota_warning_threshold - 0.80).abs() < f64::EPSILON);
        assert!((cfg.quota_critical_threshold - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = HeartbeatConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: HeartbeatConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.interval, cfg.interval);
    }
}
