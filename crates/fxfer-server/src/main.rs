//! fxfer 服务器
//!
//! 在指定端口监听，每个连接由独立的 worker 处理，
//! 从根目录向客户端提供文件。Ctrl-C 停止接受连接并等待进行中的会话结束。

use anyhow::Result;
use clap::Parser;
use fxfer_core::{LogContext, LogLevel, Settings, Supervisor, parse_port};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fxfer-server", version, about = "fxfer 文件服务器")]
struct Cli {
    /// 监听端口
    port: String,
    /// 监听地址
    #[arg(long)]
    bind: Option<String>,
    /// 对外提供文件的目录
    #[arg(long)]
    root: Option<PathBuf>,
    /// 等待客户端消息的超时时间 (秒)
    #[arg(long)]
    timeout: Option<u64>,
    /// 监听队列长度
    #[arg(long)]
    backlog: Option<u32>,
    /// 配置文件路径
    #[arg(long)]
    config: Option<PathBuf>,
    /// 将合并后的设置写入配置文件
    #[arg(long)]
    write_config: bool,
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<LogLevel>,
}

fn init_tracing(level: Option<LogLevel>) {
    // 桥接 log crate（fxfer-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let filter = match level {
        Some(level) => EnvFilter::new(level.filter_directive()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LogLevel::Info.filter_directive())),
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// 等待 Ctrl-C；无法注册信号处理时永不返回
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Ctrl-C received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    let port = parse_port(&cli.port)?;
    let config_path = cli.config.clone().unwrap_or_else(Settings::config_path);
    let mut settings = Settings::load_from(&config_path);

    if let Some(bind) = cli.bind {
        settings.server.bind_addr = bind;
    }
    if let Some(root) = cli.root {
        settings.server.root_dir = root;
    }
    if let Some(secs) = cli.timeout {
        settings.server.read_timeout_secs = secs;
    }
    if let Some(backlog) = cli.backlog {
        settings.server.backlog = backlog;
    }
    settings.validate()?;

    if cli.write_config {
        settings.save(&config_path)?;
        tracing::info!("Settings written to {:?}", config_path);
    }

    tracing::info!("fxfer-server starting on port {}", port);

    let supervisor = Supervisor::bind(port, settings.server, LogContext::new("fxfer-server")).await?;
    supervisor.run_until(shutdown_signal()).await?;

    Ok(())
}
