//! 应用配置和持久化
//!
//! 提供超时、分块大小、监听参数等设置的存储和读取。
//! 配置文件: `<config_dir>/fxfer/settings.toml`，缺失或解析失败时使用默认值。

use crate::error::{Result, TransferError};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 客户端设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// 建立连接的超时时间（秒）
    pub connect_timeout_secs: u64,
    /// 每次读取的超时时间（秒）
    pub read_timeout_secs: u64,
    /// 接收缓冲区大小
    pub chunk_size: usize,
    /// 文件保存目录
    pub output_dir: PathBuf,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 50,
            read_timeout_secs: 60,
            chunk_size: 4098,
            output_dir: PathBuf::from("."),
        }
    }
}

impl ClientSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// 零值超时或零长度缓冲区视为配置错误
    pub fn validate(&self) -> Result<()> {
        check_fields(&[
            (self.connect_timeout_secs == 0, "client.connect_timeout_secs"),
            (self.read_timeout_secs == 0, "client.read_timeout_secs"),
            (self.chunk_size == 0, "client.chunk_size"),
        ])
    }
}

/// 服务器设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// 监听地址
    pub bind_addr: String,
    /// 等待客户端消息的超时时间（秒）
    pub read_timeout_secs: u64,
    /// 发送缓冲区大小
    pub chunk_size: usize,
    /// 监听队列长度
    pub backlog: u32,
    /// 命令行最大长度
    pub max_line_len: usize,
    /// 对外提供文件的目录
    pub root_dir: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            read_timeout_secs: 60,
            chunk_size: 4097,
            backlog: 1024,
            max_line_len: 4098,
            root_dir: PathBuf::from("."),
        }
    }
}

impl ServerSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        check_fields(&[
            (self.read_timeout_secs == 0, "server.read_timeout_secs"),
            (self.chunk_size == 0, "server.chunk_size"),
            (self.backlog == 0, "server.backlog"),
            (self.max_line_len < 8, "server.max_line_len"),
        ])
    }
}

fn check_fields(checks: &[(bool, &str)]) -> Result<()> {
    match checks.iter().find(|(bad, _)| *bad) {
        Some((_, field)) => Err(TransferError::InvalidConfig(format!(
            "{field} is out of range"
        ))),
        None => Ok(()),
    }
}

/// 应用设置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub client: ClientSettings,
    pub server: ServerSettings,
}

impl Settings {
    /// 获取默认配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fxfer");
        config_dir.join("settings.toml")
    }

    /// 从默认路径加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// 从指定路径加载设置
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// 检查取值是否可用
    pub fn validate(&self) -> Result<()> {
        self.client.validate()?;
        self.server.validate()
    }
}

/// 解析端口号，0 和非数字均视为无效
pub fn parse_port(text: &str) -> Result<u16> {
    match text.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(TransferError::InvalidPort(text.to_string())),
    }
}
