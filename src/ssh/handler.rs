// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait

use russh::keys::PublicKey;
use std::future::Future;
use tracing::debug;

/// SSH 客户端 Handler
pub struct SshClientHandler {
    /// 服务器主机名（用于日志）
    host: String,
}

impl SshClientHandler {
    /// 创建新的 Handler
    pub fn new(host: String) -> Self {
        Self { host }
    }
}

impl russh::client::Handler for SshClientHandler {
    type Error = russh::Error;

    /// 检查服务器公钥
    /// 集群内主机经跳板机访问，主机密钥频繁轮换，这里只记录指纹
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let fingerprint = server_public_key.fingerprint(russh::keys::ssh_key::HashAlg::Sha256);

        debug!(
            "[SSH] {} server key {} ({})",
            self.host,
            fingerprint,
            server_public_key.algorithm()
        );

        async { Ok(true) }
    }
}
