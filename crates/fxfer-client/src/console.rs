//! 终端输出
//!
//! 状态信息写到 stderr，stdout 留给 `--json` 报告。

use fxfer_core::{ClientCallback, ReceivedFile, TransferError};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// 进度按百分比节流，每前进 10% 输出一次
const PROGRESS_STEP: u64 = 10;

#[derive(Default)]
pub struct ConsoleCallback {
    last_percent: AtomicU64,
}

impl ConsoleCallback {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientCallback for ConsoleCallback {
    fn on_request(&self, name: &str) {
        self.last_percent.store(0, Ordering::Relaxed);
        eprintln!("📥 请求文件: {name}");
    }

    fn on_progress(&self, _name: &str, received: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = received * 100 / total;
        let last = self.last_percent.load(Ordering::Relaxed);
        if percent >= last + PROGRESS_STEP || (percent == 100 && last < 100) {
            self.last_percent.store(percent, Ordering::Relaxed);
            eprint!("\r   进度: {percent:>3}% ({received}/{total} 字节)");
            let _ = std::io::stderr().flush();
        }
    }

    fn on_complete(&self, file: &ReceivedFile) {
        if file.size > 0 {
            eprintln!();
        }
        eprintln!(
            "✅ 已保存: {} ({} 字节, mtime {})",
            file.path.display(),
            file.size,
            file.mtime
        );
    }

    fn on_rejected(&self, name: &str) {
        eprintln!("⛔ 服务器拒绝: {name}，会话结束");
    }

    fn on_error(&self, error: &TransferError) {
        eprintln!();
        eprintln!("❌ 传输失败: {error}");
    }
}
