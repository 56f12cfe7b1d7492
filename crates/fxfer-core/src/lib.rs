//! Fxfer Core Library
//!
//! 基于 TCP 的极简文件传输协议：客户端逐个请求文件，服务器以二进制头部加文件内容应答。
//!
//! # 模块
//!
//! - **protocol**: 线路格式、命令解析、文件名校验
//! - **transport**: 带超时的可靠收发原语
//! - **client**: 连接建立与客户端传输状态机
//! - **server**: 服务器会话状态机与并发调度器
//! - **config**: 设置的加载与保存
//! - **logging**: 诊断上下文与日志级别
//!
//! # 使用示例
//!
//! ## 下载文件
//!
//! ```ignore
//! use fxfer_core::{Client, LogContext, NoopCallback, Settings};
//!
//! let settings = Settings::load();
//! let client = Client::new(settings.client, LogContext::new("fxfer"));
//! let files = vec!["a.txt".to_string()];
//! let report = client.fetch("127.0.0.1", "2121", &files, &NoopCallback).await?;
//! ```
//!
//! ## 提供文件
//!
//! ```ignore
//! use fxfer_core::{LogContext, Settings, Supervisor};
//!
//! let settings = Settings::load();
//! let server = Supervisor::bind(2121, settings.server, LogContext::new("fxfer-server")).await?;
//! server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod transport;

// Client re-exports
pub use client::{
    Client, ClientCallback, ClientEvent, ClientSession, NoopCallback, ReceivedFile,
    SessionOptions, SessionReport, SimpleClientCallback,
};

// Server re-exports
pub use server::{ServerSession, SessionEnd, Supervisor};

// Common re-exports
pub use config::{ClientSettings, ServerSettings, Settings, parse_port};
pub use error::{ErrorKind, Result, TransferError};
pub use logging::{LogContext, LogLevel};
pub use transport::Connection;
