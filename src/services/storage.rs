// 配置文件加载服务

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::cli::Cli;
use crate::models::settings::{IndividualTarget, TargetSettings};
use crate::models::{AppSettings, ConfigError};

const APP_DIR: &str = "ssh-gpu-monitor";
const CONFIG_FILE: &str = "config.yaml";

/// 获取默认配置文件路径
/// macOS: ~/Library/Application Support/ssh-gpu-monitor/config.yaml
/// Linux: ~/.config/ssh-gpu-monitor/config.yaml
/// Windows: C:\Users\<用户名>\AppData\Roaming\ssh-gpu-monitor\config.yaml
pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("无法获取系统配置目录")?;
    Ok(config_dir.join(APP_DIR).join(CONFIG_FILE))
}

/// 加载配置
///
/// 显式指定的文件必须存在；默认位置的文件不存在时使用内置默认值。
pub fn load_settings(path: Option<&Path>) -> Result<AppSettings> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let path = default_config_path()?;
            if !path.exists() {
                debug!("[Config] {} not found, using defaults", path.display());
                return Ok(AppSettings::default());
            }
            path
        }
    };

    let settings = read_settings(&path)?;
    debug!("[Config] Loaded {}", path.display());
    Ok(settings)
}

fn read_settings(path: &Path) -> Result<AppSettings, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(AppSettings::default());
    }
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// 将命令行覆盖项写入配置
pub fn apply_overrides(settings: &mut AppSettings, cli: &Cli) {
    if let Some(username) = &cli.ssh_username {
        settings.ssh.username = username.clone();
    }
    if let Some(key_path) = &cli.ssh_key_path {
        settings.ssh.key_path = key_path.clone();
    }
    if let Some(jump_host) = &cli.ssh_jump_host {
        settings.ssh.jump_host = jump_host.clone();
    }
    if let Some(timeout) = cli.ssh_timeout {
        settings.ssh.timeout = timeout;
    }
    if let Some(hosts) = &cli.targets {
        // 命令行目标替换全部配置目标，使用默认用户名与密钥
        settings.targets = TargetSettings {
            individual: hosts.iter().cloned().map(IndividualTarget::Host).collect(),
            patterns: Vec::new(),
        };
    }
    if let Some(refresh_rate) = cli.display_refresh_rate {
        settings.display.refresh_rate = refresh_rate;
    }
    if cli.debug_enabled {
        settings.debug.enabled = true;
    }
    if let Some(log_dir) = &cli.debug_log_dir {
        settings.debug.log_dir = log_dir.clone();
    }
    if let Some(log_file) = &cli.debug_log_file {
        settings.debug.log_file = log_file.clone();
    }
}
