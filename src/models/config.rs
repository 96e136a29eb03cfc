// 运行时配置（由 AppSettings 解析而来，启动后不再修改）

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

use super::settings::{AppSettings, DebugSettings};
use super::target::{expand_tilde, generate_targets, Target};

/// 配置错误（启动前，致命）
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid target pattern '{format}': {reason}")]
    InvalidPattern { format: String, reason: String },

    #[error("Invalid process filter '{pattern}': {source}")]
    InvalidFilter {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

/// 已解析的运行时配置
#[derive(Clone, Debug)]
pub struct Config {
    pub username: String,
    pub key_path: PathBuf,
    pub jump_host: String,
    pub timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_count_max: u32,
    pub targets: Vec<Target>,
    pub refresh_interval: Duration,
    pub process_filter: Regex,
    pub debug: DebugSettings,
}

impl Config {
    /// 从配置文件结构解析出运行时配置
    pub fn resolve(settings: &AppSettings) -> Result<Self, ConfigError> {
        if settings.ssh.jump_host.trim().is_empty() {
            return Err(ConfigError::Missing("ssh.jump_host"));
        }

        let process_filter =
            Regex::new(&settings.display.process_filter).map_err(|source| {
                ConfigError::InvalidFilter {
                    pattern: settings.display.process_filter.clone(),
                    source,
                }
            })?;

        Ok(Self {
            username: settings.ssh.username.clone(),
            key_path: expand_tilde(&settings.ssh.key_path),
            jump_host: settings.ssh.jump_host.clone(),
            timeout: Duration::from_secs(settings.ssh.timeout.max(1)),
            keepalive_interval: Duration::from_secs(settings.ssh.keepalive_interval),
            keepalive_count_max: settings.ssh.keepalive_count_max,
            targets: generate_targets(&settings.targets, &settings.ssh)?,
            refresh_interval: Duration::from_secs(settings.display.refresh_rate),
            process_filter,
            debug: settings.debug.clone(),
        })
    }

    /// 所有目标主机名（保持配置顺序）
    pub fn hosts(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.host.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::settings::IndividualTarget;

    fn settings() -> AppSettings {
        let mut settings = AppSettings::default();
        settings.ssh.jump_host = "jump.example.org".to_string();
        settings.ssh.key_path = "/keys/id_ed25519".to_string();
        settings.targets.individual = vec![IndividualTarget::Host("gpu01".to_string())];
        settings
    }

    #[test]
    fn test_resolve() {
        let config = Config::resolve(&settings()).unwrap();
        assert_eq!(config.jump_host, "jump.example.org");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.refresh_interval, Duration::from_secs(5));
        assert_eq!(config.hosts(), vec!["gpu01".to_string()]);
        assert_eq!(config.targets[0].key_path, PathBuf::from("/keys/id_ed25519"));
        assert!(config.process_filter.is_match("anything"));
    }

    #[test]
    fn test_resolve_requires_jump_host() {
        let mut s = settings();
        s.ssh.jump_host.clear();
        assert!(matches!(
            Config::resolve(&s),
            Err(ConfigError::Missing("ssh.jump_host"))
        ));
    }

    #[test]
    fn test_resolve_rejects_bad_filter() {
        let mut s = settings();
        s.display.process_filter = "(".to_string();
        assert!(matches!(
            Config::resolve(&s),
            Err(ConfigError::InvalidFilter { .. })
        ));
    }
}
