// SSH GPU Monitor
// 应用入口：经跳板机连接所有 GPU 节点，并在终端中实时显示 nvidia-smi 状态

use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::cursor::{Hide, MoveTo};
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod cli;
mod controller;
mod display;
mod models;
mod services;
mod ssh;

use cli::Cli;
use controller::Controller;
use display::TableDisplay;
use models::Config;
use services::{logging, storage};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    if cli.get_config_path {
        println!("{}", storage::default_config_path()?.display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut settings = storage::load_settings(cli.config.as_deref())?;
    storage::apply_overrides(&mut settings, &cli);
    let config = Config::resolve(&settings)?;

    // 表格占用终端，日志只写入文件或丢弃
    logging::setup_logging(&config.debug)?;
    info!(
        "[Main] Monitoring {} hosts via {}",
        config.targets.len(),
        config.jump_host
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("无法创建 tokio 运行时")?;
    runtime.block_on(monitor(config))
}

async fn monitor(config: Config) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("[Main] Interrupt received, shutting down");
                trigger.cancel();
            }
            Err(e) => warn!("[Main] Failed to listen for Ctrl-C: {}", e),
        }
    });

    // 不进入备用屏幕，退出后告别面板保留在终端中
    let mut stdout = io::stdout();
    execute!(stdout, Clear(ClearType::All), MoveTo(0, 0), Hide).context("无法初始化终端")?;
    let terminal = Terminal::new(CrosstermBackend::new(stdout)).context("无法初始化终端")?;

    let mut controller = Controller::new(config, TableDisplay::new(terminal), cancel);
    let result = controller.run().await;

    if let Err(e) = controller.into_display().restore() {
        warn!("[Main] Failed to restore cursor: {}", e);
    }

    match result {
        Ok(outcome) => {
            info!("[Main] Finished: {:?}", outcome);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Failed to connect to jump host: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
