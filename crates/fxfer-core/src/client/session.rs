//! 客户端传输状态机
//!
//! 对每个文件名依次执行:
//!
//! ```text
//! SendRequest -> AwaitSigil -> AwaitBody(+|-) -> ReceivePayload -> Done
//! ```
//!
//! 任一步骤失败都会关闭连接并终止整个会话，不做重试。
//! 收到 `-ERR` 时同样结束整个会话，剩余文件不再请求。

use crate::error::{Result, TransferError};
use crate::logging::LogContext;
use crate::protocol::{QUIT_LINE, ReplyHeader, Sigil, request_line, validate_filename};
use crate::transport::Connection;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// 接收事件回调
pub trait ClientCallback: Send + Sync {
    /// 即将请求某个文件
    fn on_request(&self, name: &str);

    /// 进度更新
    fn on_progress(&self, name: &str, received: u64, total: u64);

    /// 单个文件接收完成
    fn on_complete(&self, file: &ReceivedFile);

    /// 服务器拒绝了请求
    fn on_rejected(&self, name: &str);

    /// 会话失败
    fn on_error(&self, error: &TransferError);
}

/// 不做任何处理的回调
pub struct NoopCallback;

impl ClientCallback for NoopCallback {
    fn on_request(&self, _name: &str) {}
    fn on_progress(&self, _name: &str, _received: u64, _total: u64) {}
    fn on_complete(&self, _file: &ReceivedFile) {}
    fn on_rejected(&self, _name: &str) {}
    fn on_error(&self, _error: &TransferError) {}
}

/// 已接收的文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceivedFile {
    pub name: String,
    pub size: u32,
    /// 服务器端的最后修改时间（Unix 秒）
    pub mtime: u32,
    pub path: PathBuf,
}

/// 会话结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub files: Vec<ReceivedFile>,
    /// 被服务器拒绝的文件名，此后会话已结束
    pub rejected: Option<String>,
}

impl SessionReport {
    /// 是否所有请求都已成功
    pub fn is_complete(&self) -> bool {
        self.rejected.is_none()
    }
}

/// 单个请求的状态
enum Step {
    SendRequest,
    AwaitSigil,
    AwaitBody(Sigil),
    ReceivePayload(ReplyHeader),
    Done(Reply),
}

/// 单个请求的结果
enum Reply {
    Received(ReceivedFile),
    Rejected,
}

/// 客户端会话选项
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// 每次读取的最大字节数
    pub chunk_size: usize,
    /// 文件保存目录
    pub output_dir: PathBuf,
}

/// 客户端会话，独占一个连接
pub struct ClientSession<S> {
    conn: Connection<S>,
    options: SessionOptions,
    ctx: LogContext,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ClientSession<S> {
    pub fn new(conn: Connection<S>, options: SessionOptions, ctx: &LogContext) -> Self {
        let ctx = ctx.session(conn.peer());
        Self { conn, options, ctx }
    }

    /// 按顺序请求 `files`，结束后关闭连接
    pub async fn run<C: ClientCallback>(
        mut self,
        files: &[String],
        callback: &C,
    ) -> Result<SessionReport> {
        let result = self.process(files, callback).await;

        match &result {
            Ok(report) if report.is_complete() => {
                info!("{}: session finished, {} file(s)", self.ctx, report.files.len());
            }
            Ok(report) => {
                warn!(
                    "{}: session ended after server rejected {:?}",
                    self.ctx, report.rejected
                );
            }
            Err(e) => {
                error!("{}: session aborted: {}", self.ctx, e);
                callback.on_error(e);
            }
        }

        let ctx = self.ctx;
        if let Err(e) = self.conn.close().await {
            debug!("{}: close failed: {}", ctx, e);
        }
        result
    }

    async fn process<C: ClientCallback>(
        &mut self,
        files: &[String],
        callback: &C,
    ) -> Result<SessionReport> {
        if self.options.chunk_size == 0 {
            return Err(TransferError::InvalidConfig(
                "chunk_size must be at least 1".to_string(),
            ));
        }

        let mut report = SessionReport::default();

        for name in files {
            validate_filename(name)?;
            callback.on_request(name);

            match self.fetch(name, callback).await? {
                Reply::Received(file) => {
                    callback.on_complete(&file);
                    report.files.push(file);
                }
                Reply::Rejected => {
                    callback.on_rejected(name);
                    report.rejected = Some(name.clone());
                    return Ok(report);
                }
            }
        }

        self.conn.send_all(QUIT_LINE, "QUIT").await?;
        debug!("{}: sent QUIT", self.ctx);
        Ok(report)
    }

    /// 请求单个文件
    async fn fetch<C: ClientCallback>(&mut self, name: &str, callback: &C) -> Result<Reply> {
        let mut step = Step::SendRequest;

        loop {
            step = match step {
                Step::SendRequest => {
                    self.conn.send_all(&request_line(name), "GET request").await?;
                    debug!("{}: sent GET {}", self.ctx, name);
                    Step::AwaitSigil
                }
                Step::AwaitSigil => {
                    let byte = self.conn.read_u8("reply").await?;
                    let sigil = Sigil::from_byte(byte).ok_or_else(|| {
                        TransferError::Protocol(format!("unexpected reply byte 0x{byte:02x}"))
                    })?;
                    Step::AwaitBody(sigil)
                }
                Step::AwaitBody(sigil) => {
                    let expected = sigil.body();
                    let mut body = vec![0u8; expected.len()];
                    self.conn.read_exact(&mut body, "reply body").await?;
                    if body != expected {
                        return Err(TransferError::Protocol(format!(
                            "malformed {sigil:?} reply: {:?}",
                            String::from_utf8_lossy(&body)
                        )));
                    }

                    match sigil {
                        Sigil::Ok => {
                            let mut raw = [0u8; ReplyHeader::LEN];
                            self.conn.read_exact(&mut raw, "file header").await?;
                            Step::ReceivePayload(ReplyHeader::decode(raw))
                        }
                        Sigil::Err => {
                            warn!("{}: server refused {}", self.ctx, name);
                            Step::Done(Reply::Rejected)
                        }
                    }
                }
                Step::ReceivePayload(header) => {
                    let file = self.receive_payload(name, header, callback).await?;
                    Step::Done(Reply::Received(file))
                }
                Step::Done(reply) => return Ok(reply),
            };
        }
    }

    /// 接收文件内容并写入本地，中断时删除不完整的文件
    async fn receive_payload<C: ClientCallback>(
        &mut self,
        name: &str,
        header: ReplyHeader,
        callback: &C,
    ) -> Result<ReceivedFile> {
        let path = self.options.output_dir.join(name);
        let mut file = File::create(&path).await?;

        let result = self.copy_payload(&mut file, name, header, callback).await;
        drop(file);

        if let Err(e) = result {
            if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                debug!(
                    "{}: failed to remove partial file {:?}: {}",
                    self.ctx, path, remove_err
                );
            }
            return Err(e);
        }

        info!(
            "{}: received {} ({} bytes, mtime {})",
            self.ctx, name, header.size, header.mtime
        );

        Ok(ReceivedFile {
            name: name.to_string(),
            size: header.size,
            mtime: header.mtime,
            path,
        })
    }

    async fn copy_payload<C: ClientCallback>(
        &mut self,
        file: &mut File,
        name: &str,
        header: ReplyHeader,
        callback: &C,
    ) -> Result<()> {
        let total = u64::from(header.size);
        let mut buffer = vec![0u8; self.options.chunk_size];
        let mut received: u64 = 0;

        while received < total {
            // 不读取超出文件大小的字节
            let want = usize::try_from(total - received)
                .map_or(buffer.len(), |remaining| remaining.min(buffer.len()));
            let n = self
                .conn
                .read_some(&mut buffer[..want], "file content")
                .await?;
            file.write_all(&buffer[..n]).await?;
            received += n as u64;
            callback.on_progress(name, received, total);
        }

        file.flush().await?;
        Ok(())
    }
}

/// 客户端事件
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Request(String),
    Progress {
        name: String,
        received: u64,
        total: u64,
    },
    Complete(ReceivedFile),
    Rejected(String),
    Error(String),
}

/// 通过 channel 转发事件的回调实现
pub struct SimpleClientCallback {
    tx: mpsc::Sender<ClientEvent>,
}

impl SimpleClientCallback {
    pub fn new() -> (Self, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (Self { tx }, rx)
    }
}

impl ClientCallback for SimpleClientCallback {
    fn on_request(&self, name: &str) {
        let _ = self.tx.try_send(ClientEvent::Request(name.to_string()));
    }

    fn on_progress(&self, name: &str, received: u64, total: u64) {
        let _ = self.tx.try_send(ClientEvent::Progress {
            name: name.to_string(),
            received,
            total,
        });
    }

    fn on_complete(&self, file: &ReceivedFile) {
        let _ = self.tx.try_send(ClientEvent::Complete(file.clone()));
    }

    fn on_rejected(&self, name: &str) {
        let _ = self.tx.try_send(ClientEvent::Rejected(name.to_string()));
    }

    fn on_error(&self, error: &TransferError) {
        let _ = self.tx.try_send(ClientEvent::Error(error.to_string()));
    }
}
