// 命令行参数
// 点号形式的长参数直接对应配置文件中的字段

use std::path::PathBuf;

use clap::Parser;

/// Monitor GPUs on remote hosts reached through an SSH jump host
#[derive(Parser, Debug, Default)]
#[command(name = "ssh-gpu-monitor")]
#[command(author, version, about = "Monitor GPUs on remote hosts through an SSH jump host")]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the default configuration file path and exit
    #[arg(long)]
    pub get_config_path: bool,

    /// SSH username used for the jump host and targets
    #[arg(long = "ssh.username", value_name = "USER")]
    pub ssh_username: Option<String>,

    /// Private key file used for authentication
    #[arg(long = "ssh.key_path", value_name = "PATH")]
    pub ssh_key_path: Option<String>,

    /// Jump host address (host or host:port)
    #[arg(long = "ssh.jump_host", value_name = "HOST")]
    pub ssh_jump_host: Option<String>,

    /// Connection and command timeout in seconds
    #[arg(long = "ssh.timeout", value_name = "SECS")]
    pub ssh_timeout: Option<u64>,

    /// Replace all configured targets with these hosts
    #[arg(long, num_args = 1.., value_name = "HOST")]
    pub targets: Option<Vec<String>>,

    /// Table refresh interval in seconds
    #[arg(long = "display.refresh_rate", value_name = "SECS")]
    pub display_refresh_rate: Option<u64>,

    /// Write debug logs to a file
    #[arg(long = "debug.enabled")]
    pub debug_enabled: bool,

    /// Directory for debug logs
    #[arg(long = "debug.log_dir", value_name = "DIR")]
    pub debug_log_dir: Option<String>,

    /// Debug log file name
    #[arg(long = "debug.log_file", value_name = "FILE")]
    pub debug_log_file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotted_overrides() {
        let cli = Cli::try_parse_from([
            "ssh-gpu-monitor",
            "-c",
            "/tmp/monitor.yaml",
            "--ssh.username",
            "alice",
            "--ssh.timeout",
            "3",
            "--targets",
            "gpu01",
            "gpu02",
            "--debug.enabled",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/monitor.yaml")));
        assert_eq!(cli.ssh_username.as_deref(), Some("alice"));
        assert_eq!(cli.ssh_timeout, Some(3));
        assert_eq!(
            cli.targets,
            Some(vec!["gpu01".to_string(), "gpu02".to_string()])
        );
        assert!(cli.debug_enabled);
        assert!(!cli.get_config_path);
        assert_eq!(cli.display_refresh_rate, None);
    }

    #[test]
    fn test_rejects_non_numeric_timeout() {
        assert!(Cli::try_parse_from(["ssh-gpu-monitor", "--ssh.timeout", "soon"]).is_err());
    }
}
