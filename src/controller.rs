// 监控主流程
// Starting -> Connecting -> Polling -> ShuttingDown -> Stopped

use std::time::Duration;

use ratatui::backend::Backend;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::display::TableDisplay;
use crate::models::{initial_snapshot, merge_round, Config, Snapshot};
use crate::services::PollingEngine;
use crate::ssh::{SshError, TunnelManager};

/// 单轮出错后的等待时间
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// 运行阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Connecting,
    Polling,
    ShuttingDown,
    Stopped,
}

/// 正常结束的方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// 用户中断后正常退出
    Finished,
    /// 私钥不存在，未发起任何连接
    MissingKey,
}

/// 监控控制器
///
/// 快照只在 await 之间由控制器修改，渲染总是基于完整的一轮结果。
pub struct Controller<B: Backend> {
    config: Config,
    display: TableDisplay<B>,
    tunnels: TunnelManager,
    poller: PollingEngine,
    snapshot: Snapshot,
    phase: Phase,
    cancel: CancellationToken,
}

impl<B: Backend> Controller<B> {
    pub fn new(config: Config, display: TableDisplay<B>, cancel: CancellationToken) -> Self {
        let hosts = config.hosts();
        Self {
            tunnels: TunnelManager::new(hosts.iter().cloned()),
            poller: PollingEngine::new(&config),
            snapshot: initial_snapshot(hosts),
            phase: Phase::Starting,
            config,
            display,
            cancel,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// 收回显示器（用于退出时恢复终端）
    pub fn into_display(self) -> TableDisplay<B> {
        self.display
    }

    fn enter(&mut self, phase: Phase) {
        debug!("[Controller] {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// 运行直到被取消
    ///
    /// 只有跳板机连接失败会返回错误；其他错误都体现在表格中。
    pub async fn run(&mut self) -> Result<RunOutcome, SshError> {
        if !self.config.key_path.exists() {
            println!(
                "SSH key not found at {}. Please check your configuration.",
                self.config.key_path.display()
            );
            self.enter(Phase::Stopped);
            return Ok(RunOutcome::MissingKey);
        }

        self.enter(Phase::Connecting);
        self.render();

        if let Err(e) = self.tunnels.connect_jump(&self.config).await {
            error!("[Controller] Failed to connect to jump host: {}", e);
            self.enter(Phase::Stopped);
            return Err(e);
        }

        let statuses = self.tunnels.connect_all(&self.config).await;
        merge_round(&mut self.snapshot, statuses);
        self.render();

        self.enter(Phase::Polling);
        self.poll_loop().await;

        self.shutdown().await;
        Ok(RunOutcome::Finished)
    }

    fn render(&mut self) {
        if let Err(e) = self.display.render(&self.snapshot) {
            warn!("[Controller] Render failed: {}", e);
        }
    }

    /// 轮询循环，取消令牌触发后返回
    async fn poll_loop(&mut self) {
        let mut round = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            round += 1;
            let results = self.poller.poll_once(self.tunnels.connections()).await;
            merge_round(&mut self.snapshot, results);

            let delay = match self.display.render(&self.snapshot) {
                Ok(()) => {
                    debug!("[Controller] Round {} rendered", round);
                    self.config.refresh_interval
                }
                Err(e) => {
                    error!("[Controller] Error in round {}: {}", round, e);
                    ERROR_BACKOFF
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => break,
            }
        }
        info!("[Controller] Polling stopped after {} rounds", round);
    }

    /// 显示告别面板并关闭所有连接
    async fn shutdown(&mut self) {
        self.enter(Phase::ShuttingDown);
        if let Err(e) = self.display.show_farewell() {
            warn!("[Controller] Failed to show farewell: {}", e);
        }
        self.tunnels.close_all().await;
        self.enter(Phase::Stopped);
    }
}
