//! 带超时的可靠收发原语
//!
//! 每个操作要么完整完成，要么失败；所有等待都受 `io_timeout` 限制。

use crate::error::{Result, TransferError};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;

/// 单个会话独占的连接
///
/// 只能被一个状态机实例持有，`close` 按值消费，保证只关闭一次。
pub struct Connection<S> {
    stream: BufReader<S>,
    peer: String,
    io_timeout: Duration,
}

impl Connection<TcpStream> {
    /// 包装已建立的 TCP 连接，对端地址作为标识
    pub fn from_tcp(stream: TcpStream, io_timeout: Duration) -> Self {
        let peer = stream
            .peer_addr()
            .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());
        Self::new(stream, peer, io_timeout)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(stream: S, peer: impl Into<String>, io_timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            peer: peer.into(),
            io_timeout,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// 精确读取 `buf.len()` 字节
    pub async fn read_exact(&mut self, buf: &mut [u8], what: &'static str) -> Result<()> {
        let limit = self.io_timeout;
        with_timeout(limit, what, self.stream.read_exact(buf)).await?;
        Ok(())
    }

    pub async fn read_u8(&mut self, what: &'static str) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte, what).await?;
        Ok(byte[0])
    }

    /// 读取 1..=`buf.len()` 字节，对端关闭时返回 [`TransferError::PeerClosed`]
    pub async fn read_some(&mut self, buf: &mut [u8], what: &'static str) -> Result<usize> {
        let limit = self.io_timeout;
        let n = with_timeout(limit, what, self.stream.read(buf)).await?;
        if n == 0 && !buf.is_empty() {
            return Err(TransferError::PeerClosed);
        }
        Ok(n)
    }

    /// 读取一行（包含 `\n`），最多 `max_len` 字节
    ///
    /// 在读到任何字节之前对端关闭时返回空 `Vec`。
    pub async fn read_line(&mut self, max_len: usize, what: &'static str) -> Result<Vec<u8>> {
        let limit = self.io_timeout;
        let mut line = Vec::new();
        let mut bounded = (&mut self.stream).take(max_len as u64);
        with_timeout(limit, what, bounded.read_until(b'\n', &mut line)).await?;
        Ok(line)
    }

    /// 完整发送 `bytes` 并刷新
    pub async fn send_all(&mut self, bytes: &[u8], what: &'static str) -> Result<()> {
        let limit = self.io_timeout;
        let stream = &mut self.stream;
        with_timeout(limit, what, async move {
            stream.write_all(bytes).await?;
            stream.flush().await
        })
        .await
    }

    /// 关闭写方向并释放连接
    pub async fn close(mut self) -> Result<()> {
        let limit = self.io_timeout;
        with_timeout(limit, "shutdown", self.stream.shutdown()).await
    }
}

async fn with_timeout<T, F>(limit: Duration, what: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Err(TransferError::PeerClosed),
        Ok(Err(e)) => Err(TransferError::Io(e)),
        Err(_) => Err(TransferError::Timeout(what)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const SHORT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn test_read_exact_and_u8() {
        let (a, mut b) = duplex(64);
        let mut conn = Connection::new(a, "test", SHORT);

        b.write_all(b"+OK\r\n").await.unwrap();
        assert_eq!(conn.read_u8("sigil").await.unwrap(), b'+');
        let mut body = [0u8; 4];
        conn.read_exact(&mut body, "body").await.unwrap();
        assert_eq!(&body, b"OK\r\n");
    }

    #[tokio::test]
    async fn test_read_exact_short_is_peer_closed() {
        let (a, mut b) = duplex(64);
        let mut conn = Connection::new(a, "test", SHORT);

        b.write_all(b"OK").await.unwrap();
        drop(b);
        let mut body = [0u8; 4];
        let err = conn.read_exact(&mut body, "body").await.unwrap_err();
        assert!(matches!(err, TransferError::PeerClosed));
    }

    #[tokio::test]
    async fn test_read_times_out() {
        let (a, _b) = duplex(64);
        let mut conn = Connection::new(a, "test", SHORT);

        let err = conn.read_u8("sigil").await.unwrap_err();
        assert!(matches!(err, TransferError::Timeout("sigil")));
    }

    #[tokio::test]
    async fn test_read_line() {
        let (a, mut b) = duplex(64);
        let mut conn = Connection::new(a, "test", SHORT);

        b.write_all(b"GET a.txt\r\nQUIT\r\n").await.unwrap();
        assert_eq!(conn.read_line(64, "cmd").await.unwrap(), b"GET a.txt\r\n");
        assert_eq!(conn.read_line(64, "cmd").await.unwrap(), b"QUIT\r\n");

        drop(b);
        assert!(conn.read_line(64, "cmd").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_line_is_bounded() {
        let (a, mut b) = duplex(64);
        let mut conn = Connection::new(a, "test", SHORT);

        b.write_all(b"GET 0123456789\r\n").await.unwrap();
        let line = conn.read_line(8, "cmd").await.unwrap();
        assert_eq!(line, b"GET 0123");
    }

    #[tokio::test]
    async fn test_read_some_peer_closed() {
        let (a, b) = duplex(64);
        let mut conn = Connection::new(a, "test", SHORT);
        drop(b);

        let mut buf = [0u8; 16];
        let err = conn.read_some(&mut buf, "payload").await.unwrap_err();
        assert!(matches!(err, TransferError::PeerClosed));
    }

    #[tokio::test]
    async fn test_send_all() {
        let (a, mut b) = duplex(64);
        let mut conn = Connection::new(a, "test", SHORT);

        conn.send_all(b"QUIT\r\n", "quit").await.unwrap();
        conn.close().await.unwrap();

        let mut received = Vec::new();
        b.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"QUIT\r\n");
    }
}
