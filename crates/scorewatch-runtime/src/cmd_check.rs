//! `scorewatch check`: validate the config and print what would be watched.

use std::path::Path;

use scorewatch_monitor::{Schedule, SourceResolver};
use serde::Serialize;

use crate::config::AppConfig;
use crate::feeds::{ConfigResolver, ConfigSchedule};

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub monitor: String,
    pub schedule: Vec<String>,
    pub sources: Vec<SourceReport>,
}

#[derive(Debug, Serialize)]
pub struct SourceReport {
    pub key: String,
    pub target: String,
    pub active: bool,
    pub exists: bool,
}

pub async fn build_report(config_path: &Path) -> anyhow::Result<CheckReport> {
    let config = AppConfig::load(config_path)?;
    let schedule = ConfigSchedule::new(config_path).active_source_keys().await?;
    let resolver = ConfigResolver::new(config_path);

    let mut sources = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        let Some(resolved) = resolver.resolve(&source.key).await? else {
            continue;
        };
        sources.push(SourceReport {
            exists: Path::new(&resolved.target).is_file(),
            key: resolved.key,
            target: resolved.target,
            active: resolved.active,
        });
    }

    Ok(CheckReport {
        monitor: config.monitor.name,
        schedule: schedule.into_iter().collect(),
        sources,
    })
}

pub async fn cmd_check(config_path: &Path) -> anyhow::Result<()> {
    let report = build_report(config_path).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn report_lists_sources_and_schedule() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("scorewatch.toml");
        std::fs::write(
            &config_path,
            r#"
[monitor]
name = "tennis"

[[sources]]
key = "atp"
target = "atp.json"

[[sources]]
key = "wta"
target = "wta.json"
active = false
"#,
        )
        .expect("write config");
        std::fs::write(dir.path().join("atp.json"), "[]").expect("write feed");

        let report = build_report(&config_path).await.expect("report");
        assert_eq!(report.monitor, "tennis");
        assert_eq!(report.schedule, vec!["atp"]);
        assert_eq!(report.sources.len(), 2);
        assert!(report.sources[0].exists);
        assert!(!report.sources[1].exists);
        assert!(!report.sources[1].active);
    }

    #[tokio::test]
    async fn invalid_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("scorewatch.toml");
        std::fs::write(&config_path, "[runtime]\nrestart_interval_secs = 0\n").expect("write");
        assert!(build_report(&config_path).await.is_err());
    }
}
