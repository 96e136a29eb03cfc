// SSH 连接配置

use std::path::PathBuf;
use std::time::Duration;

use crate::models::{Config, Target};

/// SSH 连接配置
#[derive(Clone, Debug)]
pub struct SshConfig {
    /// 目标主机
    pub host: String,
    /// 端口
    pub port: u16,
    /// 用户名
    pub username: String,
    /// 认证方式
    pub auth: AuthMethod,
    /// 连接超时
    pub connect_timeout: Duration,
    /// 心跳配置
    pub keepalive: KeepaliveConfig,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            auth: AuthMethod::PublicKey {
                key_path: PathBuf::new(),
            },
            connect_timeout: Duration::from_secs(10),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

/// 认证方式
#[derive(Clone, Debug)]
pub enum AuthMethod {
    /// 公钥认证
    PublicKey {
        /// 私钥文件路径（不支持带密码的私钥）
        key_path: PathBuf,
    },
}

/// 心跳配置
#[derive(Clone, Debug)]
pub struct KeepaliveConfig {
    /// 是否启用心跳
    pub enabled: bool,
    /// 心跳间隔
    pub interval: Duration,
    /// 最大未响应次数
    pub max_retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            max_retries: 5,
        }
    }
}

impl KeepaliveConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: !config.keepalive_interval.is_zero(),
            interval: config.keepalive_interval,
            max_retries: config.keepalive_count_max,
        }
    }
}

impl SshConfig {
    /// 跳板机连接配置
    pub fn for_jump_host(config: &Config) -> Self {
        let (host, port) = split_host_port(&config.jump_host);
        Self {
            host,
            port,
            username: config.username.clone(),
            auth: AuthMethod::PublicKey {
                key_path: config.key_path.clone(),
            },
            connect_timeout: config.timeout,
            keepalive: KeepaliveConfig::from_config(config),
        }
    }

    /// 经跳板机转发的目标主机配置
    pub fn for_target(target: &Target, config: &Config) -> Self {
        Self {
            host: target.host.clone(),
            port: 22,
            username: target.username.clone(),
            auth: AuthMethod::PublicKey {
                key_path: target.key_path.clone(),
            },
            connect_timeout: config.timeout / 2,
            keepalive: KeepaliveConfig::from_config(config),
        }
    }

    /// 构建 russh 配置
    pub fn to_russh_config(&self) -> russh::client::Config {
        let mut config = russh::client::Config::default();
        // 空闲断开交给心跳判断
        config.inactivity_timeout = None;
        if self.keepalive.enabled {
            config.keepalive_interval = Some(self.keepalive.interval);
            config.keepalive_max = self.keepalive.max_retries as usize;
        }
        config
    }
}

/// 解析 `host[:port]`，缺省端口 22
fn split_host_port(value: &str) -> (String, u16) {
    if let Some((host, port)) = value.rsplit_once(':') {
        if let Ok(port) = port.parse::<u16>() {
            if !host.contains(':') {
                return (host.to_string(), port);
            }
        }
    }
    (value.to_string(), 22)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::settings::IndividualTarget;
    use crate::models::AppSettings;

    #[test]
    fn test_target_uses_own_key_and_half_timeout() {
        let mut settings = AppSettings::default();
        settings.ssh.jump_host = "jump.example.org:2222".to_string();
        settings.ssh.key_path = "/keys/id_rsa".to_string();
        settings.targets.individual = vec![IndividualTarget::Detailed {
            host: "gpu01".to_string(),
            username: Some("bob".to_string()),
            key_path: Some("/keys/bob_ed25519".to_string()),
        }];
        let config = Config::resolve(&settings).unwrap();

        let jump = SshConfig::for_jump_host(&config);
        assert_eq!((jump.host.as_str(), jump.port), ("jump.example.org", 2222));
        let AuthMethod::PublicKey { key_path } = &jump.auth;
        assert_eq!(key_path, &PathBuf::from("/keys/id_rsa"));

        let target = SshConfig::for_target(&config.targets[0], &config);
        assert_eq!(target.username, "bob");
        assert_eq!(target.port, 22);
        assert_eq!(target.connect_timeout, Duration::from_secs(5));
        let AuthMethod::PublicKey { key_path } = &target.auth;
        assert_eq!(key_path, &PathBuf::from("/keys/bob_ed25519"));
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("shell.example.org"), ("shell.example.org".to_string(), 22));
        assert_eq!(split_host_port("shell.example.org:2222"), ("shell.example.org".to_string(), 2222));
        assert_eq!(split_host_port("::1"), ("::1".to_string(), 22));
    }

    #[test]
    fn test_keepalive_disabled_when_interval_zero() {
        let config = SshConfig {
            keepalive: KeepaliveConfig {
                enabled: false,
                interval: Duration::ZERO,
                max_retries: 5,
            },
            ..Default::default()
        };
        let russh_config = config.to_russh_config();
        assert!(russh_config.keepalive_interval.is_none());
    }

    #[test]
    fn test_keepalive_applied() {
        let russh_config = SshConfig::default().to_russh_config();
        assert_eq!(russh_config.keepalive_interval, Some(Duration::from_secs(30)));
        assert_eq!(russh_config.keepalive_max, 5);
    }
}
