//! 客户端
//!
//! - **establish**: 解析地址并建立带超时的 TCP 连接
//! - **session**: 逐个请求文件的传输状态机

pub mod establish;
pub mod session;

pub use establish::{connect, establish, resolve};
pub use session::{
    ClientCallback, ClientEvent, ClientSession, NoopCallback, ReceivedFile, SessionOptions,
    SessionReport, SimpleClientCallback,
};

use crate::config::ClientSettings;
use crate::error::Result;
use crate::logging::LogContext;
use crate::transport::Connection;

/// 文件下载客户端
pub struct Client {
    settings: ClientSettings,
    ctx: LogContext,
}

impl Client {
    pub fn new(settings: ClientSettings, ctx: LogContext) -> Self {
        Self { settings, ctx }
    }

    /// 连接服务器并按顺序下载 `files`
    ///
    /// 设置无效时直接返回 [`TransferError::InvalidConfig`](crate::TransferError::InvalidConfig)，不进行任何网络操作。
    pub async fn fetch<C: ClientCallback>(
        &self,
        address: &str,
        port: &str,
        files: &[String],
        callback: &C,
    ) -> Result<SessionReport> {
        self.settings.validate()?;
        let stream = establish(address, port, self.settings.connect_timeout(), &self.ctx).await?;
        let conn = Connection::from_tcp(stream, self.settings.read_timeout());

        let options = SessionOptions {
            chunk_size: self.settings.chunk_size,
            output_dir: self.settings.output_dir.clone(),
        };
        ClientSession::new(conn, options, &self.ctx)
            .run(files, callback)
            .await
    }
}
