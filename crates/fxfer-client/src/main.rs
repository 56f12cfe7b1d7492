//! fxfer 客户端
//!
//! 连接服务器，按顺序下载一个或多个文件，保存到本地目录。
//!
//! 退出码：0 全部接收成功，1 服务器拒绝了某个文件，2 配置错误（未进行任何网络操作），3 传输出错。

mod console;

use anyhow::Result;
use clap::Parser;
use fxfer_core::{
    Client, ErrorKind, LogContext, LogLevel, NoopCallback, SessionReport, Settings, TransferError,
    parse_port,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fxfer", version, about = "从 fxfer 服务器下载文件")]
struct Cli {
    /// 服务器地址 (IP 或主机名)
    address: String,
    /// 服务器端口
    port: String,
    /// 要下载的文件名
    #[arg(required = true)]
    files: Vec<String>,
    /// 连接超时时间 (秒)
    #[arg(long)]
    connect_timeout: Option<u64>,
    /// 读取超时时间 (秒)
    #[arg(long)]
    read_timeout: Option<u64>,
    /// 保存目录
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// 配置文件路径
    #[arg(long)]
    config: Option<PathBuf>,
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<LogLevel>,
    /// 以 JSON 输出结果
    #[arg(long)]
    json: bool,
}

fn init_tracing(level: Option<LogLevel>) {
    // 桥接 log crate（fxfer-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let filter = match level {
        Some(level) => EnvFilter::new(level.filter_directive()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LogLevel::Warn.filter_directive())),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// 合并配置文件与命令行参数
fn load_settings(cli: &Cli) -> fxfer_core::Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };

    if let Some(secs) = cli.connect_timeout {
        settings.client.connect_timeout_secs = secs;
    }
    if let Some(secs) = cli.read_timeout {
        settings.client.read_timeout_secs = secs;
    }
    if let Some(dir) = &cli.output_dir {
        settings.client.output_dir.clone_from(dir);
    }

    settings.validate()?;
    parse_port(&cli.port)?;
    Ok(settings)
}

fn print_report(report: &SessionReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else if report.is_complete() {
        eprintln!("🎉 完成，共接收 {} 个文件", report.files.len());
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = load_settings(&cli)?;
    tracing::debug!(
        "Fetching {} file(s) from {}:{}",
        cli.files.len(),
        cli.address,
        cli.port
    );
    let client = Client::new(settings.client, LogContext::new("fxfer"));

    let report = if cli.json {
        client
            .fetch(&cli.address, &cli.port, &cli.files, &NoopCallback)
            .await?
    } else {
        client
            .fetch(
                &cli.address,
                &cli.port,
                &cli.files,
                &console::ConsoleCallback::new(),
            )
            .await?
    };

    print_report(&report, cli.json)?;

    if report.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

/// 按错误分类选择退出码和提示前缀
fn failure(err: &anyhow::Error) -> (u8, &'static str) {
    match err.downcast_ref::<TransferError>().map(TransferError::kind) {
        Some(ErrorKind::Configuration) => (2, "配置错误"),
        Some(ErrorKind::Connect) => (3, "连接失败"),
        Some(ErrorKind::Protocol) => (3, "协议错误"),
        Some(ErrorKind::Resource) => (3, "资源不足"),
        Some(ErrorKind::Io) | None => (3, "传输失败"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            let (code, prefix) = failure(&e);
            eprintln!("fxfer: {prefix}: {e:#}");
            ExitCode::from(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_codes() {
        let config = anyhow::Error::from(TransferError::InvalidPort("0".into()));
        assert_eq!(failure(&config), (2, "配置错误"));

        let refused = anyhow::Error::from(TransferError::ConnectRefused(
            std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        ));
        assert_eq!(failure(&refused).0, 3);

        let other = anyhow::anyhow!("disk full");
        assert_eq!(failure(&other).0, 3);
    }

    #[test]
    fn test_invalid_port_fails_before_connecting() {
        let cli = Cli::parse_from([
            "fxfer",
            "--config",
            "/nonexistent/fxfer/settings.toml",
            "127.0.0.1",
            "http",
            "a.txt",
        ]);
        let err = load_settings(&cli).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
