//! Controller configuration.
//!
//! Two sources:
//! - [`Settings`]: process settings from environment variables
//! - [`PolicyConfig`]: the YAML policy file naming which resource kinds to watch

use crate::error::ControllerError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Policy file used when `CLEANER_CONFIG` is not set.
pub const DEFAULT_CONFIG_FILE: &str = "k8sCleaner-config.yaml";

/// Which resource kinds the cleaner should watch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Per-kind watch flags
    pub resource: ResourceFlags,
}

/// Per-kind watch flags. Missing keys default to `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceFlags {
    /// `deployment`
    pub deployment: bool,
    /// `rc`
    #[serde(rename = "rc")]
    pub replication_controller: bool,
    /// `rs`
    #[serde(rename = "rs")]
    pub replica_set: bool,
    /// `ds`
    #[serde(rename = "ds")]
    pub daemon_set: bool,
    /// `svc`
    #[serde(rename = "svc")]
    pub services: bool,
    /// `pod`, the only kind watched today
    pub pod: bool,
    /// `job`
    pub job: bool,
    /// `pv`
    #[serde(rename = "pv")]
    pub persistent_volume: bool,
}

impl ResourceFlags {
    /// Enabled kinds this controller does not implement yet.
    #[must_use]
    pub fn unsupported_enabled(&self) -> Vec<&'static str> {
        [
            (self.deployment, "deployment"),
            (self.replication_controller, "rc"),
            (self.replica_set, "rs"),
            (self.daemon_set, "ds"),
            (self.services, "svc"),
            (self.job, "job"),
            (self.persistent_volume, "pv"),
        ]
        .into_iter()
        .filter_map(|(enabled, kind)| enabled.then_some(kind))
        .collect()
    }
}

impl PolicyConfig {
    /// Parses a policy document. An empty document enables nothing.
    pub fn from_yaml(contents: &str) -> Result<Self, ControllerError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Reads and parses the policy file at `path`.
    pub fn load(path: &Path) -> Result<Self, ControllerError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ControllerError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents)
    }
}

/// Process settings loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Policy file path (`CLEANER_CONFIG`)
    pub config_path: PathBuf,
    /// Namespace to watch (`WATCH_NAMESPACE`), all namespaces when unset
    pub namespace: Option<String>,
    /// Label selector for list/watch (`WATCH_LABEL_SELECTOR`)
    pub label_selector: Option<String>,
    /// Field selector for list/watch (`WATCH_FIELD_SELECTOR`)
    pub field_selector: Option<String>,
    /// Number of reconciliation workers (`WORKER_COUNT`)
    pub workers: usize,
    /// Bound on the initial cache sync (`CACHE_SYNC_TIMEOUT_SECS`)
    pub sync_timeout: Duration,
    /// Rate-limited requeues before an item is dropped (`MAX_RETRIES`)
    pub max_retries: u32,
    /// Metrics and probe listener (`PROBE_ADDR`)
    pub probe_addr: SocketAddr,
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads settings through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let workers: usize = parse_or(var("WORKER_COUNT"), "WORKER_COUNT", 1)?;
        if workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "WORKER_COUNT must be at least 1".to_string(),
            ));
        }
        let sync_timeout_secs: u64 =
            parse_or(var("CACHE_SYNC_TIMEOUT_SECS"), "CACHE_SYNC_TIMEOUT_SECS", 60)?;
        if sync_timeout_secs == 0 {
            return Err(ControllerError::InvalidConfig(
                "CACHE_SYNC_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            config_path: var("CLEANER_CONFIG")
                .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from),
            namespace: var("WATCH_NAMESPACE"),
            label_selector: var("WATCH_LABEL_SELECTOR"),
            field_selector: var("WATCH_FIELD_SELECTOR"),
            workers,
            sync_timeout: Duration::from_secs(sync_timeout_secs),
            max_retries: parse_or(var("MAX_RETRIES"), "MAX_RETRIES", 5)?,
            probe_addr: parse_or(
                var("PROBE_ADDR"),
                "PROBE_ADDR",
                SocketAddr::from(([0, 0, 0, 0], 8080)),
            )?,
        })
    }
}

fn parse_or<T>(value: Option<String>, name: &str, default: T) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("{name}={raw:?} is invalid: {e}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_policy_parses_resource_flags() {
        let yaml = r"
resource:
  pod: true
  svc: true
  deployment: false
";
        let policy = PolicyConfig::from_yaml(yaml).unwrap();
        assert!(policy.resource.pod);
        assert!(policy.resource.services);
        assert!(!policy.resource.deployment);
        assert!(!policy.resource.job);
        assert_eq!(policy.resource.unsupported_enabled(), vec!["svc"]);
    }

    #[test]
    fn test_empty_policy_enables_nothing() {
        let policy = PolicyConfig::from_yaml("  \n").unwrap();
        assert_eq!(policy, PolicyConfig::default());
        assert!(!policy.resource.pod);
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let result = PolicyConfig::from_yaml("resource:\n  pod: maybe\n");
        assert!(matches!(result, Err(ControllerError::ConfigParse(_))));
    }

    #[test]
    fn test_missing_policy_file() {
        let result = PolicyConfig::load(Path::new("/nonexistent/k8sCleaner-config.yaml"));
        assert!(matches!(result, Err(ControllerError::ConfigRead { .. })));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.config_path, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert_eq!(settings.namespace, None);
        assert_eq!(settings.workers, 1);
        assert_eq!(settings.sync_timeout, Duration::from_secs(60));
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.probe_addr, SocketAddr::from(([0, 0, 0, 0], 8080)));
    }

    #[test]
    fn test_settings_overrides() {
        let settings = settings(&[
            ("CLEANER_CONFIG", "/etc/cleaner/policy.yaml"),
            ("WATCH_NAMESPACE", "apps"),
            ("WATCH_LABEL_SELECTOR", "app=web"),
            ("WORKER_COUNT", "4"),
            ("CACHE_SYNC_TIMEOUT_SECS", "15"),
            ("MAX_RETRIES", "10"),
            ("PROBE_ADDR", "127.0.0.1:9090"),
        ])
        .unwrap();
        assert_eq!(settings.config_path, PathBuf::from("/etc/cleaner/policy.yaml"));
        assert_eq!(settings.namespace.as_deref(), Some("apps"));
        assert_eq!(settings.label_selector.as_deref(), Some("app=web"));
        assert_eq!(settings.field_selector, None);
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.sync_timeout, Duration::from_secs(15));
        assert_eq!(settings.max_retries, 10);
        assert_eq!(settings.probe_addr, SocketAddr::from(([127, 0, 0, 1], 9090)));
    }

    #[test]
    fn test_empty_namespace_means_all() {
        let settings = settings(&[("WATCH_NAMESPACE", "")]).unwrap();
        assert_eq!(settings.namespace, None);
    }

    #[test]
    fn test_settings_reject_bad_values() {
        for vars in [
            [("WORKER_COUNT", "0")],
            [("WORKER_COUNT", "many")],
            [("CACHE_SYNC_TIMEOUT_SECS", "0")],
            [("MAX_RETRIES", "-1")],
            [("PROBE_ADDR", "localhost")],
        ] {
            assert!(
                matches!(settings(&vars), Err(ControllerError::InvalidConfig(_))),
                "{vars:?} should be rejected"
            );
        }
    }
}
