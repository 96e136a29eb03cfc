// GPU 轮询服务
// 每一轮对所有已连接主机并发执行查询命令，单台主机的失败不影响其他主机

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use regex::Regex;
use tracing::{debug, trace, warn};

use crate::models::{Config, HostStatus};
use crate::ssh::{ConnectionState, RemoteSession};

use super::telemetry::{self, GPU_QUERY_COMMAND};

/// 轮询引擎
pub struct PollingEngine {
    command: String,
    timeout: Duration,
    process_filter: Regex,
}

impl PollingEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            command: GPU_QUERY_COMMAND.to_string(),
            timeout: config.timeout,
            process_filter: config.process_filter.clone(),
        }
    }

    /// 执行一轮轮询
    ///
    /// 所有主机的命令同时发出，本轮耗时受单主机超时限制。
    pub async fn poll_once(
        &self,
        connections: &BTreeMap<String, ConnectionState>,
    ) -> BTreeMap<String, HostStatus> {
        debug!("[Poller] Starting a new round for {} hosts", connections.len());

        let tasks = connections.iter().map(|(host, state)| async move {
            let status = match state.session() {
                Some(session) => self.poll_host(host, session.as_ref()).await,
                None => {
                    trace!("[Poller] No connection for {}", host);
                    HostStatus::failed("No connection")
                }
            };
            (host.clone(), status)
        });

        join_all(tasks).await.into_iter().collect()
    }

    /// 查询单台主机
    async fn poll_host(&self, host: &str, session: &dyn RemoteSession) -> HostStatus {
        trace!("[Poller] Running '{}' on {}", self.command, host);

        let output = match tokio::time::timeout(self.timeout, session.run(&self.command)).await {
            Err(_) => {
                debug!("[Poller] Timeout while querying {}", host);
                return HostStatus::failed("Timeout");
            }
            Ok(Err(e)) => {
                debug!("[Poller] SSH error for {}: {}", host, e);
                return HostStatus::failed(e.to_string());
            }
            Ok(Ok(output)) => output,
        };

        if !output.is_success() {
            warn!(
                "[Poller] Command failed on {} with status {}",
                host, output.exit_code
            );
            return HostStatus::failed(format!("Command failed: {}", output.stderr_string()));
        }

        match telemetry::parse(host, &output.stdout_string(), &self.process_filter) {
            Ok(devices) => HostStatus::Devices(devices),
            Err(e) => HostStatus::failed(e.to_string()),
        }
    }
}
