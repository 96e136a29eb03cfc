// 跳板机隧道管理
//
// 持有唯一的跳板机会话，并为每个目标主机经 direct-tcpip 通道建立嵌套会话

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::models::{Config, HostStatus, Target};

use super::client::SshClient;
use super::config::SshConfig;
use super::error::SshError;
use super::session::{RemoteSession, SshSession};

/// 单个目标的连接状态
///
/// 只会从 Pending 变为 Connected 或 Failed，不会回退。
#[derive(Clone)]
pub enum ConnectionState {
    Pending,
    Connected(Arc<dyn RemoteSession>),
    Failed(String),
}

impl ConnectionState {
    pub fn session(&self) -> Option<&Arc<dyn RemoteSession>> {
        match self {
            Self::Connected(session) => Some(session),
            _ => None,
        }
    }

    /// 对应的初始显示状态
    pub fn to_status(&self) -> HostStatus {
        match self {
            Self::Pending => HostStatus::Pending,
            Self::Connected(_) => HostStatus::Connected,
            Self::Failed(reason) => HostStatus::failed(reason.clone()),
        }
    }
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Connected(session) => write!(f, "Connected({})", session.host()),
            Self::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}

/// 隧道管理器
pub struct TunnelManager {
    /// 跳板机会话
    jump: Option<Arc<SshSession>>,
    /// 主机名 -> 连接状态
    connections: BTreeMap<String, ConnectionState>,
}

impl TunnelManager {
    /// 所有目标以 Pending 状态登记
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            jump: None,
            connections: hosts
                .into_iter()
                .map(|h| (h.into(), ConnectionState::Pending))
                .collect(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_states(connections: BTreeMap<String, ConnectionState>) -> Self {
        Self {
            jump: None,
            connections,
        }
    }

    pub fn connections(&self) -> &BTreeMap<String, ConnectionState> {
        &self.connections
    }

    /// 建立跳板机会话（带心跳）
    pub async fn connect_jump(&mut self, config: &Config) -> Result<(), SshError> {
        let ssh_config = SshConfig::for_jump_host(config);
        info!(
            "[Tunnel] Connecting to jump host {}:{}",
            ssh_config.host, ssh_config.port
        );

        let session = SshClient::new(ssh_config).connect().await?;
        info!(
            "[Tunnel] Connected to jump host {} as '{}'",
            config.jump_host,
            session.username()
        );
        self.jump = Some(Arc::new(session));
        Ok(())
    }

    /// 经跳板机连接单个目标；任何失败都转为 Failed
    pub async fn open_target(jump: &SshSession, target: &Target, config: &Config) -> ConnectionState {
        debug!("[Tunnel] Opening connection to {}", target.host);

        let client = SshClient::new(SshConfig::for_target(target, config));
        match client.connect_via(jump).await {
            Ok(session) => {
                debug!("[Tunnel] Connected to {}", target.host);
                ConnectionState::Connected(Arc::new(session))
            }
            Err(SshError::Timeout(_)) => {
                debug!("[Tunnel] Timeout connecting to {}", target.host);
                ConnectionState::Failed("Connection timeout".to_string())
            }
            Err(e) => {
                debug!("[Tunnel] Error connecting to {}: {}", target.host, e);
                ConnectionState::Failed(format!("Connection error: {}", e))
            }
        }
    }

    /// 并发连接所有目标，返回各主机的初始状态
    pub async fn connect_all(&mut self, config: &Config) -> BTreeMap<String, HostStatus> {
        let Some(jump) = self.jump.clone() else {
            warn!("[Tunnel] connect_all called without a jump session");
            let results = config
                .targets
                .iter()
                .map(|t| (t.host.clone(), ConnectionState::Failed("No jump session".to_string())))
                .collect();
            return self.apply(results);
        };

        info!("[Tunnel] Opening {} target connections", config.targets.len());
        let results = fan_out(&config.targets, |target| {
            let jump = jump.clone();
            async move { Self::open_target(&jump, target, config).await }
        })
        .await;

        let statuses = self.apply(results);
        let connected = statuses
            .values()
            .filter(|s| matches!(s, HostStatus::Connected))
            .count();
        info!(
            "[Tunnel] {}/{} targets connected",
            connected,
            statuses.len()
        );
        statuses
    }

    /// 记录连接结果，只接受 Pending 状态的转换
    fn apply(&mut self, results: Vec<(String, ConnectionState)>) -> BTreeMap<String, HostStatus> {
        let mut statuses = BTreeMap::new();
        for (host, state) in results {
            match self.connections.get_mut(&host) {
                Some(slot) if matches!(slot, ConnectionState::Pending) => {
                    statuses.insert(host, state.to_status());
                    *slot = state;
                }
                Some(existing) => {
                    warn!(
                        "[Tunnel] Ignoring state change for {} (already {:?})",
                        host, existing
                    );
                }
                None => warn!("[Tunnel] Ignoring unknown host {}", host),
            }
        }
        statuses
    }

    /// 关闭所有目标会话，再关闭跳板机；错误只记录不传播
    pub async fn close_all(&mut self) {
        let connections = std::mem::take(&mut self.connections);
        let sessions: Vec<_> = connections
            .into_values()
            .filter_map(|state| state.session().cloned())
            .collect();

        info!("[Tunnel] Closing {} target sessions", sessions.len());
        join_all(sessions.iter().map(|session| async move {
            if let Err(e) = session.close().await {
                debug!("[Tunnel] Error closing {}: {}", session.host(), e);
            }
        }))
        .await;

        if let Some(jump) = self.jump.take() {
            if let Err(e) = jump.close().await {
                debug!("[Tunnel] Error closing jump host {}: {}", jump.host(), e);
            }
        }
        info!("[Tunnel] All connections closed");
    }
}

/// 为每个目标同时启动连接，全部完成后返回
async fn fan_out<'a, F, Fut>(targets: &'a [Target], open: F) -> Vec<(String, ConnectionState)>
where
    F: Fn(&'a Target) -> Fut,
    Fut: Future<Output = ConnectionState>,
{
    let futures = targets.iter().map(|target| {
        let fut = open(target);
        async move { (target.host.clone(), fut.await) }
    });
    join_all(futures).await
}
