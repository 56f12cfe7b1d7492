//! 错误类型
//!
//! 所有会话级错误都只影响单个连接；只有 [`ErrorKind::Configuration`]
//! 会在启动阶段导致进程退出。

use std::io;
use std::time::Duration;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 地址/端口/参数错误，在建立任何连接之前发生
    Configuration,
    /// 连接建立失败（仅客户端）
    Connect,
    /// 对端发送了不符合协议的数据
    Protocol,
    /// 会话期间的收发、文件读写或超时错误
    Io,
    /// 套接字、文件描述符或 worker 资源耗尽
    Resource,
}

/// 传输错误
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Socket creation failed: {0}")]
    SocketFailure(#[source] io::Error),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Connection refused: {0}")]
    ConnectRefused(#[source] io::Error),

    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Connection closed by peer")]
    PeerClosed,

    #[error("File too large for a 32-bit size header: {0} bytes")]
    FileTooLarge(u64),

    #[error("Resource exhausted: {0}")]
    Resource(#[source] io::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    /// 错误所属的分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::InvalidAddress(_)
            | TransferError::InvalidPort(_)
            | TransferError::InvalidConfig(_) => ErrorKind::Configuration,
            TransferError::SocketFailure(_)
            | TransferError::ConnectTimeout(_)
            | TransferError::ConnectRefused(_) => ErrorKind::Connect,
            TransferError::InvalidFilename(_) | TransferError::Protocol(_) => ErrorKind::Protocol,
            TransferError::Timeout(_)
            | TransferError::PeerClosed
            | TransferError::FileTooLarge(_)
            | TransferError::Io(_) => ErrorKind::Io,
            TransferError::Resource(_) => ErrorKind::Resource,
        }
    }

    /// 是否为资源耗尽类 IO 错误
    pub fn is_resource_exhaustion(err: &io::Error) -> bool {
        matches!(
            err.raw_os_error(),
            Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
        ) || err.kind() == io::ErrorKind::OutOfMemory
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
