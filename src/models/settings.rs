// Settings 配置数据结构（对应 YAML 配置文件）

use serde::{Deserialize, Serialize};

// ======================== 主配置结构 ========================

/// 应用设置（从配置文件加载）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub ssh: SshSettings,
    pub targets: TargetSettings,
    pub display: DisplaySettings,
    pub debug: DebugSettings,
}

// ======================== SSH 设置 ========================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub username: String,
    pub key_path: String,
    pub jump_host: String,
    /// 连接/命令超时（秒）
    pub timeout: u64,
    pub keepalive_interval: u64,
    pub keepalive_count_max: u32,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            username: std::env::var("USER").unwrap_or_default(),
            key_path: "~/.ssh/id_rsa".to_string(),
            jump_host: String::new(),
            timeout: 10,
            keepalive_interval: 30,
            keepalive_count_max: 5,
        }
    }
}

// ======================== 目标主机设置 ========================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    pub individual: Vec<IndividualTarget>,
    pub patterns: Vec<TargetPattern>,
}

/// 单个目标：可以是纯主机名，也可以带用户名/密钥覆盖
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndividualTarget {
    Host(String),
    Detailed {
        host: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_path: Option<String>,
    },
}

/// 按编号批量生成的目标，例如 gpu01..gpu30
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetPattern {
    pub prefix: String,
    pub format: String,
    pub start: u32,
    pub end: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
}

// ======================== 显示设置 ========================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// 刷新间隔（秒）
    pub refresh_rate: u64,
    /// 统计进程数时使用的进程名正则
    pub process_filter: String,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            refresh_rate: 5,
            process_filter: ".*".to_string(),
        }
    }
}

// ======================== 调试日志设置 ========================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    pub enabled: bool,
    pub log_dir: String,
    pub log_file: String,
    pub log_max_size: u64,
    pub log_backup_count: u32,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            log_dir: "logs".to_string(),
            log_file: "gpu_monitor.log".to_string(),
            log_max_size: 1024 * 1024,
            log_backup_count: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
ssh:
  username: alice
  jump_host: shell.example.org
targets:
  individual:
    - gpuA
    - host: gpuB
      username: bob
  patterns:
    - prefix: gpu
      format: "{prefix}{number:02}"
      start: 1
      end: 3
"#;
        let settings: AppSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.ssh.username, "alice");
        assert_eq!(settings.ssh.timeout, 10);
        assert_eq!(settings.display.refresh_rate, 5);
        assert!(!settings.debug.enabled);
        assert_eq!(
            settings.targets.individual[0],
            IndividualTarget::Host("gpuA".to_string())
        );
        assert_eq!(
            settings.targets.individual[1],
            IndividualTarget::Detailed {
                host: "gpuB".to_string(),
                username: Some("bob".to_string()),
                key_path: None,
            }
        );
        assert_eq!(settings.targets.patterns[0].end, 3);
    }

    #[test]
    fn test_empty_document_is_default() {
        let settings: AppSettings = serde_yaml::from_str("{}").unwrap();
        assert_eq!(settings, AppSettings::default());
    }
}
