use std::time::Duration;

use chrono::{DateTime, Utc};
use pvreclaim_core::marker::parse_marker;
use pvreclaim_core::types::{
    AnnotationKeys, DEFAULT_DELETION_MARKER_KEY, DEFAULT_GRACE_PERIOD_KEY,
    DEFAULT_IMMEDIATE_RECLAIM_KEY,
};
use pvreclaim_core::EngineConfig;
use pvreclaim_store::{KubeConfig, StoreError};

/// Storage class governed when `STORAGE_CLASS_NAME` is not set.
pub const DEFAULT_STORAGE_CLASS: &str = "cephfs";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reclaimer configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ReclaimerConfig {
    /// Target storage class and annotation keys.
    pub engine: EngineConfig,
    /// Evaluate and log without writing anything.
    pub dry_run: bool,
    /// `None` runs a single pass and exits; `Some` runs a pass on every tick.
    pub run_interval: Option<Duration>,
    /// Pins the pass clock. Testing aid.
    pub now_override: Option<DateTime<Utc>>,
    pub kube: KubeConfig,
}

impl ReclaimerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    ///
    /// | Env Var                        | Default                              |
    /// |--------------------------------|--------------------------------------|
    /// | `STORAGE_CLASS_NAME`           | `cephfs`                             |
    /// | `GRACE_PERIOD_ANNOTATION`      | `reclaim-volumes.cern.ch/deletion-grace-period-after-release` |
    /// | `IMMEDIATE_RECLAIM_ANNOTATION` | `reclaim-volumes.cern.ch/no-grace-period-if-time-since-creation-is-less-than` |
    /// | `DELETION_MARKER_ANNOTATION`   | `volume-ready-to-delete.cern.ch/delete-volume` |
    /// | `DRY_RUN`                      | `false`                              |
    /// | `RUN_INTERVAL_SECS`            | unset (single pass)                  |
    /// | `RECLAIM_NOW`                  | unset (wall clock)                   |
    ///
    /// Kubernetes connection variables are documented on [`KubeConfig`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let storage_class =
            non_empty("STORAGE_CLASS_NAME").unwrap_or_else(|| DEFAULT_STORAGE_CLASS.into());

        let keys = AnnotationKeys {
            grace_period: non_empty("GRACE_PERIOD_ANNOTATION")
                .unwrap_or_else(|| DEFAULT_GRACE_PERIOD_KEY.into()),
            immediate_reclaim_threshold: non_empty("IMMEDIATE_RECLAIM_ANNOTATION")
                .unwrap_or_else(|| DEFAULT_IMMEDIATE_RECLAIM_KEY.into()),
            deletion_marker: non_empty("DELETION_MARKER_ANNOTATION")
                .unwrap_or_else(|| DEFAULT_DELETION_MARKER_KEY.into()),
        };

        let dry_run = match non_empty("DRY_RUN") {
            Some(raw) => parse_bool(&raw).ok_or(ConfigError::Invalid {
                name: "DRY_RUN",
                expected: "a boolean",
                value: raw,
            })?,
            None => false,
        };

        let run_interval = match non_empty("RUN_INTERVAL_SECS") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs)
                    .ok_or(ConfigError::Invalid {
                        name: "RUN_INTERVAL_SECS",
                        expected: "a positive number of seconds",
                        value: raw,
                    })?,
            ),
            None => None,
        };

        let now_override = match non_empty("RECLAIM_NOW") {
            Some(raw) => Some(parse_marker(&raw).map_err(|_| ConfigError::Invalid {
                name: "RECLAIM_NOW",
                expected: "an RFC3339 timestamp",
                value: raw.clone(),
            })?),
            None => None,
        };

        let kube = KubeConfig::from_lookup(&lookup)?;

        Ok(Self {
            engine: EngineConfig {
                storage_class,
                keys,
            },
            dry_run,
            run_interval,
            now_override,
            kube,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<ReclaimerConfig, ConfigError> {
        let mut map: HashMap<String, String> = HashMap::from([(
            "KUBE_API_URL".to_string(),
            "http://127.0.0.1:8001".to_string(),
        )]);
        map.extend(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        ReclaimerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.engine.storage_class, "cephfs");
        assert_eq!(config.engine.keys, AnnotationKeys::default());
        assert!(!config.dry_run);
        assert_eq!(config.run_interval, None);
        assert_eq!(config.now_override, None);
        assert_eq!(config.kube.api_url, "http://127.0.0.1:8001");
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("STORAGE_CLASS_NAME", "manila"),
            ("DELETION_MARKER_ANNOTATION", "example.com/delete-at"),
            ("DRY_RUN", "yes"),
            ("RUN_INTERVAL_SECS", "600"),
            ("RECLAIM_NOW", "2026-10-17T09:00:00Z"),
        ])
        .unwrap();
        assert_eq!(config.engine.storage_class, "manila");
        assert_eq!(config.engine.keys.deletion_marker, "example.com/delete-at");
        assert_eq!(config.engine.keys.grace_period, DEFAULT_GRACE_PERIOD_KEY);
        assert!(config.dry_run);
        assert_eq!(config.run_interval, Some(Duration::from_secs(600)));
        assert_eq!(
            config.now_override,
            Some(Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[("STORAGE_CLASS_NAME", "  "), ("DRY_RUN", "")]).unwrap();
        assert_eq!(config.engine.storage_class, "cephfs");
        assert!(!config.dry_run);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_matches!(
            load(&[("DRY_RUN", "maybe")]),
            Err(ConfigError::Invalid { name: "DRY_RUN", .. })
        );
        assert_matches!(
            load(&[("RUN_INTERVAL_SECS", "0")]),
            Err(ConfigError::Invalid { name: "RUN_INTERVAL_SECS", .. })
        );
        assert_matches!(
            load(&[("RECLAIM_NOW", "noon")]),
            Err(ConfigError::Invalid { name: "RECLAIM_NOW", .. })
        );
    }

    #[test]
    fn missing_cluster_address_is_a_store_error() {
        let result = ReclaimerConfig::from_lookup(|_| None);
        assert_matches!(result, Err(ConfigError::Store(StoreError::Config(_))));
    }
}
