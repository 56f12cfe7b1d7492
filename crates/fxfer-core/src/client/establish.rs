//! 建立到服务器的连接
//!
//! 流程:
//! 1. 解析地址和端口（失败立即返回，不做任何网络操作）
//! 2. 创建套接字
//! 3. 发起非阻塞连接，等待时间受 `connect_timeout` 限制
//!
//! tokio 的连接本身就是非阻塞的：若连接立即完成，第一次 poll 就会返回，不需要等待。

use crate::config::parse_port;
use crate::error::{Result, TransferError};
use crate::logging::LogContext;
use log::{debug, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};

/// 解析目标地址，支持 IP 字面量和主机名
pub async fn resolve(address: &str, port: &str, lookup_timeout: Duration) -> Result<SocketAddr> {
    let port = parse_port(port)?;

    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    if address.is_empty() {
        return Err(TransferError::InvalidAddress(address.to_string()));
    }

    let lookup = tokio::net::lookup_host((address, port));
    match tokio::time::timeout(lookup_timeout, lookup).await {
        Ok(Ok(mut addrs)) => addrs
            .next()
            .ok_or_else(|| TransferError::InvalidAddress(address.to_string())),
        Ok(Err(e)) => {
            debug!("Failed to resolve {}: {}", address, e);
            Err(TransferError::InvalidAddress(address.to_string()))
        }
        Err(_) => Err(TransferError::InvalidAddress(address.to_string())),
    }
}

/// 连接到 `address:port`
pub async fn establish(
    address: &str,
    port: &str,
    connect_timeout: Duration,
    ctx: &LogContext,
) -> Result<TcpStream> {
    let target = resolve(address, port, connect_timeout).await?;
    connect(target, connect_timeout, ctx).await
}

/// 对已解析的地址发起带超时的连接
pub async fn connect(
    target: SocketAddr,
    connect_timeout: Duration,
    ctx: &LogContext,
) -> Result<TcpStream> {
    let socket = match target {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(|e| {
        if TransferError::is_resource_exhaustion(&e) {
            TransferError::Resource(e)
        } else {
            TransferError::SocketFailure(e)
        }
    })?;

    info!("{}: connecting to {}", ctx, target);

    let stream = match tokio::time::timeout(connect_timeout, socket.connect(target)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("{}: connection to {} failed: {}", ctx, target, e);
            return Err(TransferError::ConnectRefused(e));
        }
        Err(_) => {
            warn!(
                "{}: no answer from {} within {:?}",
                ctx, target, connect_timeout
            );
            return Err(TransferError::ConnectTimeout(connect_timeout));
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!("{}: failed to set TCP_NODELAY: {}", ctx, e);
    }

    info!("{}: connected to {}", ctx, target);
    Ok(stream)
}
