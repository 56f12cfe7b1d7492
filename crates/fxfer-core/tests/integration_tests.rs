//! 集成测试 - 客户端与服务器端到端传输
//!
//! 在 127.0.0.1 的随机端口上启动真实的 Supervisor，用 Client 下载文件。

use fxfer_core::{
    Client, ClientSettings, LogContext, NoopCallback, ServerSettings, Supervisor, TransferError,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// 运行中的测试服务器
struct TestServer {
    addr: SocketAddr,
    root: TempDir,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<fxfer_core::Result<()>>,
}

impl TestServer {
    async fn start(chunk_size: usize, read_timeout_secs: u64) -> Self {
        let root = tempfile::tempdir().unwrap();
        let settings = ServerSettings {
            bind_addr: "127.0.0.1".to_string(),
            root_dir: root.path().to_path_buf(),
            chunk_size,
            read_timeout_secs,
            ..ServerSettings::default()
        };

        let supervisor = Supervisor::bind(0, settings, LogContext::new("test-server"))
            .await
            .unwrap();
        let addr = supervisor.local_addr().unwrap();
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(supervisor.run_until(async {
            let _ = stop_rx.await;
        }));

        Self {
            addr,
            root,
            stop: Some(stop),
            handle,
        }
    }

    fn put(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.root.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn port(&self) -> String {
        self.addr.port().to_string()
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

fn client(output_dir: &Path, chunk_size: usize) -> Client {
    let settings = ClientSettings {
        connect_timeout_secs: 5,
        read_timeout_secs: 5,
        chunk_size,
        output_dir: output_dir.to_path_buf(),
    };
    Client::new(settings, LogContext::new("test-client"))
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| u8::try_from((i * 31 + 7) % 256).unwrap()).collect()
}

fn mtime_secs(path: &Path) -> u32 {
    let secs = std::fs::metadata(path)
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    u32::try_from(secs).unwrap()
}

/// 空文件、恰好一个分块、多个分块加余数，客户端写出的文件与源文件逐字节一致
#[tokio::test]
async fn test_round_trip_fidelity() {
    let chunk = 4097;
    let server = TestServer::start(chunk, 5).await;

    let sizes = [0, chunk, chunk * 5 + 123];
    let mut sources = Vec::new();
    for size in sizes {
        let name = format!("file_{size}.bin");
        let content = pattern(size);
        let path = server.put(&name, &content);
        sources.push((name, content, path));
    }

    let out = tempfile::tempdir().unwrap();
    let files: Vec<String> = sources.iter().map(|(name, _, _)| name.clone()).collect();
    let report = client(out.path(), 4098)
        .fetch("127.0.0.1", &server.port(), &files, &NoopCallback)
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.files.len(), sources.len());
    for ((name, content, path), received) in sources.iter().zip(&report.files) {
        assert_eq!(&received.name, name);
        assert_eq!(received.size as usize, content.len());
        assert_eq!(received.mtime, mtime_secs(path));
        assert_eq!(&std::fs::read(out.path().join(name)).unwrap(), content);
    }

    server.stop().await;
}

/// 请求 ["a.txt", "missing.txt", "b.txt"]：a.txt 完整写出，
/// missing.txt 收到 -ERR 后整个会话结束，b.txt 不再请求
#[tokio::test]
async fn test_missing_file_ends_session() {
    let server = TestServer::start(4097, 5).await;
    server.put("a.txt", b"first file");
    server.put("b.txt", b"never requested");

    let out = tempfile::tempdir().unwrap();
    let report = client(out.path(), 4098)
        .fetch(
            "127.0.0.1",
            &server.port(),
            &names(&["a.txt", "missing.txt", "b.txt"]),
            &NoopCallback,
        )
        .await
        .unwrap();

    assert_eq!(report.files.len(), 1);
    assert_eq!(report.rejected.as_deref(), Some("missing.txt"));
    assert_eq!(
        std::fs::read(out.path().join("a.txt")).unwrap(),
        b"first file"
    );
    assert!(!out.path().join("missing.txt").exists());
    assert!(!out.path().join("b.txt").exists());

    server.stop().await;
}

/// 非法文件名在客户端发送前就被拒绝
#[tokio::test]
async fn test_client_rejects_traversal() {
    let server = TestServer::start(4097, 5).await;
    server.put("ok.txt", b"ok");

    let out = tempfile::tempdir().unwrap();
    let err = client(out.path(), 4098)
        .fetch(
            "127.0.0.1",
            &server.port(),
            &names(&["ok.txt", "../etc/passwd"]),
            &NoopCallback,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::InvalidFilename(_)));
    // 之前的文件已经完成
    assert!(out.path().join("ok.txt").exists());

    server.stop().await;
}

/// 服务器对手工构造的越界请求回复 -ERR
#[tokio::test]
async fn test_server_rejects_traversal() {
    let server = TestServer::start(4097, 5).await;

    for request in ["GET ../x\r\n", "GET .profile\r\n", "GET ~user\r\n", "GET a/b\r\n"] {
        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"-ERR\r\n", "request {request:?}");
    }

    server.stop().await;
}

/// 多个客户端同时下载，互不影响；其中一个连接空闲不影响其他连接
#[tokio::test]
async fn test_concurrent_sessions() {
    let server = TestServer::start(1024, 5).await;
    let content = pattern(256 * 1024);
    server.put("shared.bin", &content);

    // 一个只连接不发送的客户端
    let idle = TcpStream::connect(server.addr).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let port = server.port();
        tasks.push(tokio::spawn(async move {
            let out = tempfile::tempdir().unwrap();
            let report = client(out.path(), 512)
                .fetch("127.0.0.1", &port, &names(&["shared.bin"]), &NoopCallback)
                .await
                .unwrap();
            assert!(report.is_complete());
            std::fs::read(out.path().join("shared.bin")).unwrap()
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), content);
    }

    drop(idle);
    server.stop().await;
}

/// 客户端长时间不发送命令时，服务器关闭连接且不发送任何数据
#[tokio::test]
async fn test_idle_connection_is_closed() {
    let server = TestServer::start(4097, 1).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let mut reply = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut reply)).await;

    assert!(read.is_ok(), "server kept the idle connection open");
    assert!(reply.is_empty());

    server.stop().await;
}

/// 零长度接收缓冲区在连接之前就被拒绝，不会空转
#[tokio::test]
async fn test_zero_chunk_size_fails_fast() {
    let server = TestServer::start(4097, 5).await;
    server.put("a.txt", b"hello");

    let out = tempfile::tempdir().unwrap();
    let settings = ClientSettings {
        connect_timeout_secs: 5,
        read_timeout_secs: 2,
        chunk_size: 0,
        output_dir: out.path().to_path_buf(),
    };
    let client = Client::new(settings, LogContext::new("test-client"));
    let port = server.port();
    let file_names = names(&["a.txt"]);
    let fetch = client.fetch("127.0.0.1", &port, &file_names, &NoopCallback);
    let err = tokio::time::timeout(Duration::from_secs(5), fetch)
        .await
        .expect("fetch with a zero chunk size did not return")
        .unwrap_err();

    assert!(matches!(err, TransferError::InvalidConfig(_)));
    assert!(!out.path().join("a.txt").exists());

    server.stop().await;
}

/// 连接到无人监听的端口
#[tokio::test]
async fn test_connect_refused() {
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let out = tempfile::tempdir().unwrap();
    let err = client(out.path(), 4098)
        .fetch("127.0.0.1", &port.to_string(), &names(&["a"]), &NoopCallback)
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::ConnectRefused(_)));
}

/// 地址或端口无效时不进行任何网络操作
#[tokio::test]
async fn test_invalid_configuration() {
    let out = tempfile::tempdir().unwrap();
    let c = client(out.path(), 4098);

    let err = c
        .fetch("127.0.0.1", "not-a-port", &names(&["a"]), &NoopCallback)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::InvalidPort(_)));
    assert_eq!(err.kind(), fxfer_core::ErrorKind::Configuration);
}
