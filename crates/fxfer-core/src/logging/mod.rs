//! 日志模块
//!
//! 提供诊断信息的上下文标识和日志级别定义。
//!
//! [`LogContext`] 在启动时创建一次，按引用传给每个需要输出诊断的组件，
//! 会话和 worker 在其基础上派生出更具体的标识。

use std::fmt;

/// 日志级别
///
/// 实现了 `PartialOrd` 以便过滤。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    /// 获取显示名称
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    /// 生成 `EnvFilter` 指令，核心库与二进制使用同一级别
    pub fn filter_directive(&self) -> String {
        let level = self.name().to_lowercase();
        format!("{level},fxfer_core={level}")
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ERROR" => Ok(LogLevel::Error),
            "WARN" => Ok(LogLevel::Warn),
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            "TRACE" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 诊断上下文
///
/// 显示为 `program`、`program[peer]` 或 `program#worker[peer]`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    program: String,
    worker: Option<u64>,
    peer: Option<String>,
}

impl LogContext {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            worker: None,
            peer: None,
        }
    }

    /// 派生出某个连接的上下文
    pub fn session(&self, peer: impl Into<String>) -> Self {
        Self {
            program: self.program.clone(),
            worker: self.worker,
            peer: Some(peer.into()),
        }
    }

    /// 派生出服务器 worker 的上下文
    pub fn worker(&self, id: u64, peer: impl Into<String>) -> Self {
        Self {
            program: self.program.clone(),
            worker: Some(id),
            peer: Some(peer.into()),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        if let Some(id) = self.worker {
            write!(f, "#{id}")?;
        }
        if let Some(peer) = &self.peer {
            write!(f, "[{peer}]")?;
        }
        Ok(())
    }
}
