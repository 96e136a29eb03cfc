// SSH 客户端核心实现

use std::path::Path;
use std::sync::Arc;

use russh::client::Handle;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::config::{AuthMethod, SshConfig};
use super::error::SshError;
use super::handler::SshClientHandler;
use super::session::{RemoteSession, SshSession};

/// SSH 客户端
/// 负责建立 SSH 连接并返回 SshSession
pub struct SshClient {
    /// 连接配置
    config: SshConfig,
}

impl SshClient {
    /// 创建新的 SSH 客户端
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// 直连（用于跳板机）
    pub async fn connect(&self) -> Result<SshSession, SshError> {
        let connect_timeout = self.config.connect_timeout;
        debug!(
            "[SSH] Connecting to {}@{}:{}",
            self.config.username, self.config.host, self.config.port
        );

        // 解析地址
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let socket_addr = timeout(connect_timeout, tokio::net::lookup_host(addr))
            .await
            .map_err(|_| SshError::timeout(connect_timeout))?
            .map_err(|e| SshError::Config(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::Config("No valid address found".to_string()))?;

        // TCP 连接
        let tcp_stream = timeout(connect_timeout, TcpStream::connect(socket_addr))
            .await
            .map_err(|_| SshError::timeout(connect_timeout))?
            .map_err(SshError::Io)?;

        debug!("[SSH] TCP connection to {} established", socket_addr);

        // 握手 + 认证
        let handle = timeout(connect_timeout, self.establish(tcp_stream))
            .await
            .map_err(|_| SshError::timeout(connect_timeout))??;

        Ok(SshSession::new(
            Arc::new(handle),
            self.config.host.clone(),
            self.config.username.clone(),
        ))
    }

    /// 经跳板机的 direct-tcpip 通道连接目标主机
    ///
    /// 转发通道建立与嵌套会话认证各自受 `connect_timeout` 限制。
    pub async fn connect_via(&self, jump: &SshSession) -> Result<SshSession, SshError> {
        let connect_timeout = self.config.connect_timeout;

        let channel = timeout(
            connect_timeout,
            jump.open_direct_tcpip(&self.config.host, self.config.port),
        )
        .await
        .map_err(|_| SshError::timeout(connect_timeout))??;

        debug!(
            "[SSH] Forwarded channel to {}:{} opened via {}",
            self.config.host,
            self.config.port,
            jump.host()
        );

        let handle = timeout(connect_timeout, self.establish(channel.into_stream()))
            .await
            .map_err(|_| SshError::timeout(connect_timeout))??;

        Ok(SshSession::new(
            Arc::new(handle),
            self.config.host.clone(),
            self.config.username.clone(),
        ))
    }

    /// 在给定传输流上完成 SSH 握手与认证
    async fn establish<S>(&self, stream: S) -> Result<Handle<SshClientHandler>, SshError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let russh_config = Arc::new(self.config.to_russh_config());
        let handler = SshClientHandler::new(self.config.host.clone());

        let mut handle = russh::client::connect_stream(russh_config, stream, handler)
            .await
            .map_err(SshError::from)?;

        debug!("[SSH] Handshake with {} completed", self.config.host);

        self.authenticate(&mut handle).await?;

        debug!(
            "[SSH] Authenticated to {} as '{}'",
            self.config.host, self.config.username
        );
        Ok(handle)
    }

    /// 执行认证
    async fn authenticate(&self, handle: &mut Handle<SshClientHandler>) -> Result<(), SshError> {
        use russh::client::AuthResult;

        match &self.config.auth {
            AuthMethod::PublicKey { key_path } => {
                let key = load_private_key(key_path).await?;

                // RSA 密钥需要协商签名哈希算法
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .ok()
                    .flatten()
                    .flatten();
                let key_with_alg = russh::keys::PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);

                let auth_result = handle
                    .authenticate_publickey(&self.config.username, key_with_alg)
                    .await
                    .map_err(SshError::from)?;

                match auth_result {
                    AuthResult::Success => Ok(()),
                    AuthResult::Failure {
                        remaining_methods,
                        partial_success,
                    } => {
                        if partial_success {
                            return Err(SshError::Auth(
                                "Partial authentication - additional auth required".to_string(),
                            ));
                        }
                        Err(SshError::Auth(format!(
                            "Public key authentication failed for '{}'. Server suggests: {:?}",
                            self.config.username, remaining_methods
                        )))
                    }
                }
            }
        }
    }
}

/// 加载私钥文件
async fn load_private_key(key_path: &Path) -> Result<russh::keys::PrivateKey, SshError> {
    let key_data = tokio::fs::read(key_path)
        .await
        .map_err(|e| SshError::Key(format!("Failed to read key file {:?}: {}", key_path, e)))?;

    russh::keys::decode_secret_key(&String::from_utf8_lossy(&key_data), None)
        .map_err(|e| SshError::Key(format!("Failed to decode key {:?}: {}", key_path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_missing_key_is_key_error() {
        let err = load_private_key(Path::new("/nonexistent/id_rsa"))
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::Key(_)));
    }

    #[tokio::test]
    async fn test_garbage_key_is_key_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "not a key").unwrap();
        let err = load_private_key(file.path()).await.unwrap_err();
        assert!(matches!(err, SshError::Key(_)));
    }

    #[tokio::test]
    async fn test_unresolvable_host_fails_without_panic() {
        let client = SshClient::new(SshConfig {
            host: "host.invalid".to_string(),
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        });
        assert!(client.connect().await.is_err());
    }
}
