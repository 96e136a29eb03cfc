// SSH 会话管理
// 连接成功后的会话对象，提供执行通道与转发通道

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::ChannelMsg;
use tokio::sync::Mutex;

use super::error::SshError;
use super::handler::SshClientHandler;

/// 断开连接时等待对端确认的上限
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// 可执行远程命令的会话
///
/// 轮询与关闭流程只依赖这个接口，测试中可以替换为假会话。
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// 远端主机名
    fn host(&self) -> &str;

    /// 执行单条命令并收集输出
    async fn run(&self, command: &str) -> Result<CommandOutput, SshError>;

    /// 关闭会话
    async fn close(&self) -> Result<(), SshError>;
}

/// SSH 会话（连接成功后）
/// 内部持有 Handle，支持并发打开多个通道
pub struct SshSession {
    /// 共享的 russh Handle（Arc 包装）
    handle: Arc<Handle<SshClientHandler>>,
    /// 服务器主机名
    host: String,
    /// 用户名
    username: String,
    /// 连接状态
    is_connected: AtomicBool,
}

impl SshSession {
    /// 创建新的会话
    pub fn new(handle: Arc<Handle<SshClientHandler>>, host: String, username: String) -> Self {
        Self {
            handle,
            host,
            username,
            is_connected: AtomicBool::new(true),
        }
    }

    /// 获取用户名
    pub fn username(&self) -> &str {
        &self.username
    }

    /// 检查会话是否活跃
    pub fn is_alive(&self) -> bool {
        self.is_connected.load(Ordering::Relaxed) && !self.handle.is_closed()
    }

    /// 标记会话断开
    pub fn mark_disconnected(&self) {
        self.is_connected.store(false, Ordering::Relaxed);
    }

    fn ensure_alive(&self) -> Result<(), SshError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(SshError::Disconnected(format!(
                "Session to {} is disconnected",
                self.host
            )))
        }
    }

    /// 打开执行通道
    pub async fn open_exec(&self) -> Result<ExecChannel, SshError> {
        self.ensure_alive()?;

        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        Ok(ExecChannel::new(channel))
    }

    /// 打开到 `host:port` 的 direct-tcpip 转发通道
    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u16,
    ) -> Result<russh::Channel<Msg>, SshError> {
        self.ensure_alive()?;

        self.handle
            .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
            .await
            .map_err(|e| {
                SshError::JumpHost(format!(
                    "Failed to open tunnel to {}:{} through {}: {}",
                    host, port, self.host, e
                ))
            })
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, SshError> {
        let exec = self.open_exec().await?;
        let result = exec.exec(command).await;
        if result.is_err() && self.handle.is_closed() {
            self.mark_disconnected();
        }
        result
    }

    async fn close(&self) -> Result<(), SshError> {
        if !self.is_connected.swap(false, Ordering::Relaxed) {
            return Ok(());
        }
        if self.handle.is_closed() {
            return Ok(());
        }

        match tokio::time::timeout(
            DISCONNECT_TIMEOUT,
            self.handle
                .disconnect(russh::Disconnect::ByApplication, "", "en"),
        )
        .await
        {
            Ok(result) => result.map_err(SshError::from),
            Err(_) => Err(SshError::timeout(DISCONNECT_TIMEOUT)),
        }
    }
}

// 使用 russh::client::Msg 作为消息类型
type RusshChannel = russh::Channel<Msg>;

/// 执行通道（执行单个命令）
pub struct ExecChannel {
    channel: Mutex<RusshChannel>,
}

impl ExecChannel {
    fn new(channel: RusshChannel) -> Self {
        Self {
            channel: Mutex::new(channel),
        }
    }

    /// 执行命令并获取输出
    pub async fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        let mut channel = self.channel.lock().await;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        let mut collector = OutputCollector::default();
        // Eof 之后仍可能收到 ExitStatus，读到 Close 或通道结束为止
        while let Some(channel_msg) = channel.wait().await {
            match channel_msg {
                ChannelMsg::Data { data } => collector.stdout(&data),
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == 1 {
                        // stderr
                        collector.stderr(&data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => collector.exit_status(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    collector.exit_signal(format!("{:?}", signal_name))
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        collector.finish()
    }
}

/// 被信号终止时使用的退出码
const SIGNAL_EXIT_CODE: u32 = 255;

/// 汇总执行通道上的输出与退出状态
#[derive(Debug, Default)]
pub(crate) struct OutputCollector {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
    exit_signal: Option<String>,
}

impl OutputCollector {
    pub(crate) fn stdout(&mut self, data: &[u8]) {
        self.stdout.extend_from_slice(data);
    }

    pub(crate) fn stderr(&mut self, data: &[u8]) {
        self.stderr.extend_from_slice(data);
    }

    pub(crate) fn exit_status(&mut self, code: u32) {
        self.exit_status = Some(code);
    }

    pub(crate) fn exit_signal(&mut self, signal: String) {
        self.exit_signal = Some(signal);
    }

    /// 没有退出状态说明通道中途断开，输出不完整
    pub(crate) fn finish(mut self) -> Result<CommandOutput, SshError> {
        let exit_code = match (self.exit_signal.take(), self.exit_status) {
            (Some(signal), _) => {
                if self.stderr.iter().all(u8::is_ascii_whitespace) {
                    self.stderr = format!("terminated by signal {}", signal).into_bytes();
                }
                SIGNAL_EXIT_CODE
            }
            (None, Some(code)) => code,
            (None, None) => {
                return Err(SshError::Disconnected(
                    "channel closed before the command exited".to_string(),
                ))
            }
        };

        Ok(CommandOutput {
            stdout: self.stdout,
            stderr: self.stderr,
            exit_code,
        })
    }
}

/// 命令输出
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// 标准输出
    pub stdout: Vec<u8>,
    /// 标准错误
    pub stderr: Vec<u8>,
    /// 退出码
    pub exit_code: u32,
}

impl CommandOutput {
    /// 获取标准输出字符串
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// 获取标准错误字符串
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// 检查命令是否成功
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_helpers() {
        let output = CommandOutput {
            stdout: b"<xml/>".to_vec(),
            stderr: b"NVIDIA-SMI has failed\n".to_vec(),
            exit_code: 9,
        };
        assert_eq!(output.stdout_string(), "<xml/>");
        assert_eq!(output.stderr_string(), "NVIDIA-SMI has failed");
        assert!(!output.is_success());
        assert!(CommandOutput::default().is_success());
    }

    #[test]
    fn test_collector_with_exit_status() {
        let mut collector = OutputCollector::default();
        collector.stdout(b"<nvidia_smi_log>");
        collector.stdout(b"</nvidia_smi_log>");
        collector.exit_status(0);

        let output = collector.finish().unwrap();
        assert!(output.is_success());
        assert_eq!(output.stdout_string(), "<nvidia_smi_log></nvidia_smi_log>");
    }

    #[test]
    fn test_collector_without_exit_status_is_disconnect() {
        let mut collector = OutputCollector::default();
        collector.stdout(b"<nvidia_smi_log><gpu>");

        let err = collector.finish().unwrap_err();
        assert!(matches!(err, SshError::Disconnected(_)));
        assert_eq!(
            err.to_string(),
            "Session disconnected: channel closed before the command exited"
        );
    }

    #[test]
    fn test_collector_signal_is_command_failure() {
        let mut collector = OutputCollector::default();
        collector.stdout(b"<nvidia_smi_log>");
        collector.exit_signal("KILL".to_string());

        let output = collector.finish().unwrap();
        assert!(!output.is_success());
        assert_eq!(output.stderr_string(), "terminated by signal KILL");

        let mut collector = OutputCollector::default();
        collector.stderr(b"Segmentation fault\n");
        collector.exit_signal("SEGV".to_string());
        collector.exit_status(0);
        let output = collector.finish().unwrap();
        assert_eq!(output.exit_code, SIGNAL_EXIT_CODE);
        assert_eq!(output.stderr_string(), "Segmentation fault");
    }
}
