//! 并发调度器
//!
//! 监听一次，随后无限接受连接。每个连接交给独立的 worker（tokio 任务），
//! worker 独占该连接直到会话结束。worker 结束时通过 channel 发送通知，
//! 调度器收到通知后以非阻塞方式回收已结束的 worker。

use crate::config::ServerSettings;
use crate::error::{Result, TransferError};
use crate::logging::LogContext;
use crate::server::session::{ServerSession, SessionEnd};
use crate::transport::Connection;
use log::{debug, error, info, warn};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

/// 文件描述符等资源耗尽时，暂停接受连接的时间
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

type WorkerResult = (u64, Result<SessionEnd>);
type Joined = std::result::Result<WorkerResult, JoinError>;

/// worker 结束通知，在 drop 时发送，panic 时同样会触发
struct CompletionNotice {
    id: u64,
    tx: mpsc::UnboundedSender<u64>,
}

impl Drop for CompletionNotice {
    fn drop(&mut self) {
        let _ = self.tx.send(self.id);
    }
}

/// 进行中的 worker 集合
///
/// 通知在任务返回值写入 `JoinSet` 之前发出，所以收到通知时
/// `try_join_next` 可能还取不到结果；`finished` 同时等待 `join_next`，
/// 这样的 worker 会在下一轮被回收。
struct WorkerPool {
    workers: JoinSet<WorkerResult>,
    done_tx: mpsc::UnboundedSender<u64>,
    done_rx: mpsc::UnboundedReceiver<u64>,
    next_id: u64,
}

impl WorkerPool {
    fn new() -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            workers: JoinSet::new(),
            done_tx,
            done_rx,
            next_id: 0,
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn active(&self) -> usize {
        self.workers.len()
    }

    fn spawn<F>(&mut self, id: u64, session: F)
    where
        F: Future<Output = Result<SessionEnd>> + Send + 'static,
    {
        let notice = CompletionNotice {
            id,
            tx: self.done_tx.clone(),
        };
        self.workers.spawn(async move {
            let _notice = notice;
            (id, session.await)
        });
    }

    /// 等待结束通知或某个 worker 的返回值
    async fn finished(&mut self, ctx: &LogContext) -> Option<Joined> {
        tokio::select! {
            Some(id) = self.done_rx.recv() => {
                debug!("{}: worker #{} finished", ctx, id);
                None
            }
            Some(joined) = self.workers.join_next() => Some(joined),
            else => None,
        }
    }

    /// 回收所有已结束的 worker，不阻塞
    fn reap(&mut self, ctx: &LogContext) {
        while let Some(joined) = self.workers.try_join_next() {
            log_outcome(joined, ctx);
        }
        debug!("{}: {} session(s) active", ctx, self.active());
    }

    /// 等待所有 worker 结束
    async fn drain(&mut self, ctx: &LogContext) {
        while let Some(joined) = self.workers.join_next().await {
            log_outcome(joined, ctx);
        }
    }
}

/// 文件服务器
pub struct Supervisor {
    listener: TcpListener,
    settings: ServerSettings,
    ctx: LogContext,
}

impl Supervisor {
    /// 在 `settings.bind_addr:port` 上监听
    pub async fn bind(port: u16, settings: ServerSettings, ctx: LogContext) -> Result<Self> {
        settings.validate()?;
        let ip: IpAddr = settings
            .bind_addr
            .parse()
            .map_err(|_| TransferError::InvalidAddress(settings.bind_addr.clone()))?;
        let addr = SocketAddr::new(ip, port);

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(TransferError::SocketFailure)?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(settings.backlog)?;

        info!(
            "{}: listening on {} (backlog {}, serving {:?})",
            ctx,
            listener.local_addr()?,
            settings.backlog,
            settings.root_dir
        );

        Ok(Self {
            listener,
            settings,
            ctx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 接受连接直到 `shutdown` 完成，随后等待所有进行中的会话结束
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Supervisor {
            listener,
            settings,
            ctx,
        } = self;
        let mut pool = WorkerPool::new();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("{}: shutting down, {} session(s) in flight", ctx, pool.active());
                    break;
                }
                joined = pool.finished(&ctx), if pool.active() > 0 => {
                    if let Some(joined) = joined {
                        log_outcome(joined, &ctx);
                    }
                    pool.reap(&ctx);
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = pool.next_id();
                        let worker_ctx = ctx.worker(id, peer.to_string());
                        info!("{}: accepted connection", worker_ctx);
                        pool.spawn(id, serve_connection(stream, peer, settings.clone(), worker_ctx));
                    }
                    Err(e) if TransferError::is_resource_exhaustion(&e) => {
                        warn!("{}: accept failed, out of resources: {}", ctx, e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    Err(e) => {
                        // ECONNABORTED、EINTR 等只影响单次 accept
                        warn!("{}: accept failed: {}, retrying", ctx, e);
                    }
                },
            }
        }

        drop(listener);
        pool.drain(&ctx).await;
        info!("{}: stopped", ctx);
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    settings: ServerSettings,
    ctx: LogContext,
) -> Result<SessionEnd> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("{}: failed to set TCP_NODELAY: {}", ctx, e);
    }
    let conn = Connection::new(stream, peer.to_string(), settings.read_timeout());
    ServerSession::new(conn, &settings, ctx).run().await
}

fn log_outcome(joined: Joined, ctx: &LogContext) {
    match joined {
        Ok((id, Ok(end))) => debug!("{}: worker #{} done: {:?}", ctx, id, end),
        Ok((id, Err(e))) => debug!("{}: worker #{} failed: {}", ctx, id, e),
        Err(e) => error!("{}: worker terminated abnormally: {}", ctx, e),
    }
}
