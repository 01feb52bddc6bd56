//! TOML configuration: monitor tuning, runtime intervals and the source list.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use scorewatch_core::{RetryPolicy, SourceConfig};
use scorewatch_monitor::{LiveOptions, MonitorOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub name: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub reconcile_interval_secs: u64,
    pub debounce_ms: u64,
    pub initial_digest_delay_ms: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            name: "live-scores".to_string(),
            max_retries: 3,
            retry_delay_ms: 1_000,
            reconcile_interval_secs: 30 * 60,
            debounce_ms: 500,
            initial_digest_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub status_interval_secs: u64,
    pub refetch_interval_secs: u64,
    pub restart_interval_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            status_interval_secs: 60,
            refetch_interval_secs: 60 * 60,
            restart_interval_secs: 6 * 60 * 60,
            shutdown_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.name.trim().is_empty() {
            return Err(ConfigError::Invalid("monitor.name must not be empty".into()));
        }
        let intervals = [
            ("monitor.reconcile_interval_secs", self.monitor.reconcile_interval_secs),
            ("runtime.status_interval_secs", self.runtime.status_interval_secs),
            ("runtime.refetch_interval_secs", self.runtime.refetch_interval_secs),
            ("runtime.restart_interval_secs", self.runtime.restart_interval_secs),
            ("runtime.shutdown_timeout_secs", self.runtime.shutdown_timeout_secs),
        ];
        if let Some((field, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Invalid(format!("{field} must be positive")));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            let key = source.key.trim();
            if key.is_empty() {
                return Err(ConfigError::Invalid("source key must not be empty".into()));
            }
            if !seen.insert(key) {
                return Err(ConfigError::Invalid(format!("duplicate source key '{key}'")));
            }
        }
        Ok(())
    }

    /// Keys of sources flagged active.
    pub fn active_keys(&self) -> BTreeSet<String> {
        self.sources
            .iter()
            .filter(|s| s.active)
            .map(|s| s.key.clone())
            .collect()
    }

    pub fn source(&self, key: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.key == key)
    }

    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            retry: RetryPolicy::new(
                self.monitor.max_retries,
                Duration::from_millis(self.monitor.retry_delay_ms),
            ),
            ..MonitorOptions::default()
        }
    }

    pub fn live_options(&self) -> LiveOptions {
        LiveOptions {
            reconcile_interval: Duration::from_secs(self.monitor.reconcile_interval_secs),
            debounce_window: Duration::from_millis(self.monitor.debounce_ms),
            initial_digest_delay: Duration::from_millis(self.monitor.initial_digest_delay_ms),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime.shutdown_timeout_secs)
    }
}

/// Resolve a relative target against the directory holding the config file.
pub fn resolve_target(config_path: &Path, target: &str) -> PathBuf {
    let target = Path::new(target);
    if target.is_absolute() {
        return target.to_path_buf();
    }
    config_path
        .parent()
        .map_or_else(|| target.to_path_buf(), |dir| dir.join(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[monitor]
name = "tennis"
max_retries = 5

[runtime]
refetch_interval_secs = 600

[[sources]]
key = "wimbledon-atp"
target = "feeds/wimbledon-atp.json"
tags = { sport = "Tennis", league = "Wimbledon" }

[[sources]]
key = "wimbledon-wta"
target = "feeds/wimbledon-wta.json"
active = false
"#;

    fn parse(text: &str) -> AppConfig {
        toml::from_str(text).expect("valid toml")
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let config = parse(SAMPLE);
        assert_eq!(config.monitor.name, "tennis");
        assert_eq!(config.monitor.max_retries, 5);
        assert_eq!(config.monitor.retry_delay_ms, 1_000);
        assert_eq!(config.monitor.debounce_ms, 500);
        assert_eq!(config.runtime.refetch_interval_secs, 600);
        assert_eq!(config.runtime.restart_interval_secs, 21_600);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(
            config.sources[0].tags.get("league").map(String::as_str),
            Some("Wimbledon")
        );
        config.validate().expect("valid");
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = parse("");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.monitor.name, "live-scores");
        assert_eq!(config.live_options().reconcile_interval, Duration::from_secs(1_800));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn active_keys_skip_inactive_sources() {
        let keys: Vec<String> = parse(SAMPLE).active_keys().into_iter().collect();
        assert_eq!(keys, vec!["wimbledon-atp"]);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let config = parse(
            r#"
[[sources]]
key = "a"
target = "a.json"
[[sources]]
key = "a"
target = "b.json"
"#,
        );
        let err = config.validate().expect_err("duplicate");
        assert!(err.to_string().contains("duplicate source key 'a'"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = parse("[runtime]\nstatus_interval_secs = 0\n");
        let err = config.validate().expect_err("zero interval");
        assert!(err.to_string().contains("runtime.status_interval_secs"));
    }

    #[test]
    fn retry_policy_comes_from_monitor_section() {
        let options = parse(SAMPLE).monitor_options();
        assert_eq!(options.retry.max_retries, 5);
        assert_eq!(options.retry.base_delay, Duration::from_millis(1_000));
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            AppConfig::load(&missing),
            Err(ConfigError::Read { .. })
        ));

        let broken = dir.path().join("broken.toml");
        let mut file = std::fs::File::create(&broken).expect("create");
        writeln!(file, "[monitor\nname = 1").expect("write");
        assert!(matches!(
            AppConfig::load(&broken),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn relative_targets_resolve_against_config_dir() {
        let config_path = Path::new("/etc/scorewatch/scorewatch.toml");
        assert_eq!(
            resolve_target(config_path, "feeds/atp.json"),
            PathBuf::from("/etc/scorewatch/feeds/atp.json")
        );
        assert_eq!(
            resolve_target(config_path, "/var/feeds/atp.json"),
            PathBuf::from("/var/feeds/atp.json")
        );
    }
}
