//! 服务器
//!
//! - **session**: 单个连接的命令处理状态机
//! - **supervisor**: 接受连接并为每个连接启动独立的 worker

pub mod session;
pub mod supervisor;

pub use session::{ServerSession, SessionEnd};
pub use supervisor::Supervisor;
