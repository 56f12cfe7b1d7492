//! 服务器端传输状态机（每个连接一个实例）
//!
//! 循环读取命令:
//! - `QUIT` 结束会话
//! - `GET <name>` 校验文件名、打开文件、发送 `+OK` + 头部 + 内容
//! - 其他命令回复 `-ERR` 并结束会话
//!
//! 头部发送之前的失败会尽力回复 `-ERR`；头部发送之后的失败直接断开。

use crate::config::ServerSettings;
use crate::error::{Result, TransferError};
use crate::logging::LogContext;
use crate::protocol::{Command, ERR_REPLY, OK_REPLY, ReplyHeader, validate_filename};
use crate::transport::Connection;
use log::{debug, info, warn};
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite};

/// 会话结束原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// 客户端发送了 QUIT
    Quit,
    /// 客户端关闭了连接
    PeerClosed,
    /// 等待命令超时
    TimedOut,
    /// 已回复 `-ERR`
    Rejected(String),
}

enum Flow {
    Continue,
    End(SessionEnd),
}

/// 服务器会话，独占一个连接以及其打开的文件
pub struct ServerSession<S> {
    conn: Connection<S>,
    root_dir: PathBuf,
    chunk_size: usize,
    max_line_len: usize,
    ctx: LogContext,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ServerSession<S> {
    pub fn new(conn: Connection<S>, settings: &ServerSettings, ctx: LogContext) -> Self {
        Self {
            conn,
            root_dir: settings.root_dir.clone(),
            chunk_size: settings.chunk_size,
            max_line_len: settings.max_line_len,
            ctx,
        }
    }

    /// 处理命令直到会话结束，然后关闭连接
    pub async fn run(mut self) -> Result<SessionEnd> {
        let result = self.serve().await;

        match &result {
            Ok(end) => info!("{}: session ended: {:?}", self.ctx, end),
            Err(e) => warn!("{}: session aborted: {}", self.ctx, e),
        }

        let ctx = self.ctx;
        if let Err(e) = self.conn.close().await {
            debug!("{}: close failed: {}", ctx, e);
        }
        result
    }

    async fn serve(&mut self) -> Result<SessionEnd> {
        loop {
            let line = match self.conn.read_line(self.max_line_len, "command").await {
                Ok(line) => line,
                Err(TransferError::Timeout(_)) => {
                    warn!("{}: no command received within {:?}", self.ctx, self.conn.io_timeout());
                    return Ok(SessionEnd::TimedOut);
                }
                Err(e) => {
                    warn!("{}: failed to read command: {}", self.ctx, e);
                    self.reply_err().await;
                    return Err(e);
                }
            };

            if line.is_empty() {
                return Ok(SessionEnd::PeerClosed);
            }

            let flow = match Command::parse(&line) {
                Command::Quit => {
                    debug!("{}: QUIT received", self.ctx);
                    Flow::End(SessionEnd::Quit)
                }
                Command::Get(name) => self.handle_get(&name).await?,
                Command::Invalid => {
                    warn!(
                        "{}: invalid command {:?}",
                        self.ctx,
                        String::from_utf8_lossy(&line)
                    );
                    self.reply_err().await;
                    Flow::End(SessionEnd::Rejected("invalid command".to_string()))
                }
            };

            if let Flow::End(end) = flow {
                return Ok(end);
            }
        }
    }

    async fn handle_get(&mut self, name: &str) -> Result<Flow> {
        info!("{}: GET {}", self.ctx, name);

        let (file, header) = match self.open_requested(name).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!("{}: cannot serve {:?}: {}", self.ctx, name, e);
                self.reply_err().await;
                return Ok(Flow::End(SessionEnd::Rejected(e.to_string())));
            }
        };

        // 头部发送失败时连接已不可用，直接中止
        self.conn.send_all(OK_REPLY, "OK reply").await?;
        self.conn.send_all(&header.encode(), "file header").await?;

        self.stream_file(file, header.size).await?;
        info!("{}: sent {} ({} bytes)", self.ctx, name, header.size);
        Ok(Flow::Continue)
    }

    /// 校验并打开请求的文件，读取大小和修改时间
    async fn open_requested(&self, name: &str) -> Result<(File, ReplyHeader)> {
        validate_filename(name)?;

        let path = self.root_dir.join(name);
        let file = File::open(&path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(TransferError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }

        let size = u32::try_from(metadata.len())
            .map_err(|_| TransferError::FileTooLarge(metadata.len()))?;
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| u32::try_from(elapsed.as_secs()).unwrap_or(u32::MAX));

        Ok((file, ReplyHeader { size, mtime }))
    }

    /// 按固定大小分块发送文件内容
    ///
    /// `size` 只在发送头部时读取一次，保证头部与内容一致。
    async fn stream_file(&mut self, mut file: File, size: u32) -> Result<()> {
        let total = u64::from(size);
        let mut buffer = vec![0u8; self.chunk_size];
        let mut sent: u64 = 0;

        while sent < total {
            file.seek(SeekFrom::Start(sent)).await?;
            let want = usize::try_from(total - sent)
                .map_or(buffer.len(), |remaining| remaining.min(buffer.len()));
            let n = file.read(&mut buffer[..want]).await?;
            if n == 0 {
                return Err(TransferError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("file shrank to {sent} of {total} bytes while sending"),
                )));
            }

            self.conn.send_all(&buffer[..n], "file content").await?;
            sent += n as u64;
        }

        Ok(())
    }

    /// 尽力回复 `-ERR`，失败只记录日志
    async fn reply_err(&mut self) {
        if let Err(e) = self.conn.send_all(ERR_REPLY, "ERR reply").await {
            warn!("{}: failed to send ERR reply: {}", self.ctx, e);
        }
    }
}
