// 目标主机模型与生成逻辑

use std::collections::HashSet;
use std::path::PathBuf;

use super::config::ConfigError;
use super::settings::{IndividualTarget, SshSettings, TargetSettings};

/// 监控目标（构建后不可变）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub username: String,
    pub key_path: PathBuf,
}

/// 展开路径开头的 `~`
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// 根据配置生成目标列表
///
/// 先单个目标、后模式目标；主机名重复时保留第一次出现的条目。
pub fn generate_targets(
    targets: &TargetSettings,
    ssh: &SshSettings,
) -> Result<Vec<Target>, ConfigError> {
    let mut all = Vec::new();

    for entry in &targets.individual {
        let target = match entry {
            IndividualTarget::Host(host) => Target {
                host: host.clone(),
                username: ssh.username.clone(),
                key_path: expand_tilde(&ssh.key_path),
            },
            IndividualTarget::Detailed {
                host,
                username,
                key_path,
            } => Target {
                host: host.clone(),
                username: username.clone().unwrap_or_else(|| ssh.username.clone()),
                key_path: expand_tilde(key_path.as_deref().unwrap_or(&ssh.key_path)),
            },
        };
        all.push(target);
    }

    for pattern in &targets.patterns {
        let username = pattern.username.as_ref().unwrap_or(&ssh.username);
        let key_path = expand_tilde(pattern.key_path.as_deref().unwrap_or(&ssh.key_path));
        for number in pattern.start..=pattern.end {
            all.push(Target {
                host: format_host(&pattern.format, &pattern.prefix, number)?,
                username: username.clone(),
                key_path: key_path.clone(),
            });
        }
    }

    let mut seen = HashSet::new();
    all.retain(|t| seen.insert(t.host.clone()));
    Ok(all)
}

/// 按模式格式化主机名
///
/// 支持 `{prefix}`、`{number}` 以及 `{number:02}` / `{number:03d}` 这类零填充宽度，
/// `{{` 和 `}}` 表示字面量花括号。
pub fn format_host(format: &str, prefix: &str, number: u32) -> Result<String, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidPattern {
        format: format.to_string(),
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(format.len() + prefix.len());
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(invalid("single '}' encountered")),
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => return Err(invalid("unclosed '{'")),
                    }
                }
                let (name, spec) = match field.split_once(':') {
                    Some((name, spec)) => (name, Some(spec)),
                    None => (field.as_str(), None),
                };
                let value = match name {
                    "prefix" => prefix.to_string(),
                    "number" => number.to_string(),
                    other => return Err(invalid(&format!("unknown field '{}'", other))),
                };
                match spec {
                    None | Some("") => out.push_str(&value),
                    Some(spec) => out.push_str(&apply_spec(&value, spec).ok_or_else(|| {
                        invalid(&format!("unsupported format spec '{}'", spec))
                    })?),
                }
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

/// 只支持 `[0][width][d]` 形式的格式说明
fn apply_spec(value: &str, spec: &str) -> Option<String> {
    let spec = spec.strip_suffix('d').unwrap_or(spec);
    let (zero, width) = match spec.strip_prefix('0') {
        Some(rest) => (true, rest),
        None => (false, spec),
    };
    let width: usize = if width.is_empty() {
        0
    } else {
        width.parse().ok()?
    };
    Some(if zero {
        format!("{:0>width$}", value, width = width)
    } else {
        format!("{:>width$}", value, width = width)
    })
}
