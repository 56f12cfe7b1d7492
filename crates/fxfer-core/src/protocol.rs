//! 文件传输线路协议
//!
//! 控制行以 CRLF 结尾，二进制字段使用网络字节序（大端）:
//!
//! | 方向 | 消息 |
//! |---|---|
//! | 客户端 → 服务器 | `GET <filename>\r\n` |
//! | 客户端 → 服务器 | `QUIT\r\n` |
//! | 服务器 → 客户端 | `+OK\r\n` + u32 size + u32 mtime + size 字节内容 |
//! | 服务器 → 客户端 | `-ERR\r\n` |

use crate::error::{Result, TransferError};

pub const CRLF: &[u8] = b"\r\n";
pub const GET_PREFIX: &[u8] = b"GET ";
pub const QUIT_LINE: &[u8] = b"QUIT\r\n";
pub const OK_REPLY: &[u8] = b"+OK\r\n";
pub const ERR_REPLY: &[u8] = b"-ERR\r\n";

/// 应答首字节之后剩余的字面量
pub const OK_BODY: &[u8] = b"OK\r\n";
pub const ERR_BODY: &[u8] = b"ERR\r\n";

/// 检查请求的文件名
///
/// 不允许以 `.` 或 `~` 开头、包含路径分隔符或控制字符，防止访问工作目录之外的文件。
/// 客户端发送前和服务器打开文件前使用同一规则。
pub fn validate_filename(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.starts_with('~')
        || name.chars().any(std::path::is_separator)
        || name.chars().any(char::is_control);

    if invalid {
        return Err(TransferError::InvalidFilename(name.to_string()));
    }
    Ok(())
}

/// 构造 `GET <filename>\r\n` 请求行
pub fn request_line(name: &str) -> Vec<u8> {
    let mut line = Vec::with_capacity(GET_PREFIX.len() + name.len() + CRLF.len());
    line.extend_from_slice(GET_PREFIX);
    line.extend_from_slice(name.as_bytes());
    line.extend_from_slice(CRLF);
    line
}

/// 服务器收到的命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get(String),
    Quit,
    Invalid,
}

impl Command {
    /// 解析一行原始命令（包含行尾）
    pub fn parse(line: &[u8]) -> Self {
        if line == QUIT_LINE {
            return Command::Quit;
        }

        let Some(rest) = line.strip_prefix(GET_PREFIX) else {
            return Command::Invalid;
        };
        let Some(name) = rest.strip_suffix(CRLF) else {
            return Command::Invalid;
        };

        match std::str::from_utf8(name) {
            Ok(name) => Command::Get(name.to_string()),
            Err(_) => Command::Invalid,
        }
    }
}

/// 应答首字节
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sigil {
    Ok,
    Err,
}

impl Sigil {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'+' => Some(Sigil::Ok),
            b'-' => Some(Sigil::Err),
            _ => None,
        }
    }

    /// 首字节之后应出现的字面量
    pub fn body(self) -> &'static [u8] {
        match self {
            Sigil::Ok => OK_BODY,
            Sigil::Err => ERR_BODY,
        }
    }
}

/// `+OK` 之后的文件头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    /// 文件大小（字节）
    pub size: u32,
    /// 最后修改时间（Unix 秒）
    pub mtime: u32,
}

impl ReplyHeader {
    pub const LEN: usize = 8;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[..4].copy_from_slice(&self.size.to_be_bytes());
        out[4..].copy_from_slice(&self.mtime.to_be_bytes());
        out
    }

    pub fn decode(bytes: [u8; Self::LEN]) -> Self {
        let [s0, s1, s2, s3, m0, m1, m2, m3] = bytes;
        Self {
            size: u32::from_be_bytes([s0, s1, s2, s3]),
            mtime: u32::from_be_bytes([m0, m1, m2, m3]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("a.txt").is_ok());
        assert!(validate_filename("report-2024.tar.gz").is_ok());
        assert!(validate_filename("no_ext").is_ok());

        for bad in [
            "",
            ".hidden",
            "..",
            "../etc/passwd",
            "~root",
            "dir/file",
            "/etc/passwd",
            "line\r\nbreak",
            "nul\0byte",
        ] {
            assert!(
                matches!(
                    validate_filename(bad),
                    Err(TransferError::InvalidFilename(_))
                ),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_request_line() {
        assert_eq!(request_line("a.txt"), b"GET a.txt\r\n");
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(b"QUIT\r\n"), Command::Quit);
        assert_eq!(
            Command::parse(b"GET a.txt\r\n"),
            Command::Get("a.txt".to_string())
        );
        assert_eq!(Command::parse(b"GET \r\n"), Command::Get(String::new()));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        // QUIT 必须完全匹配
        assert_eq!(Command::parse(b"QUIT now\r\n"), Command::Invalid);
        assert_eq!(Command::parse(b"QUIT\n"), Command::Invalid);
        // GET 需要 CRLF 结尾
        assert_eq!(Command::parse(b"GET a.txt\n"), Command::Invalid);
        assert_eq!(Command::parse(b"GET a.txt"), Command::Invalid);
        assert_eq!(Command::parse(b"get a.txt\r\n"), Command::Invalid);
        assert_eq!(Command::parse(b"PUT a.txt\r\n"), Command::Invalid);
        assert_eq!(Command::parse(b"GET \xff\xfe\r\n"), Command::Invalid);
    }

    #[test]
    fn test_sigil() {
        assert_eq!(Sigil::from_byte(b'+'), Some(Sigil::Ok));
        assert_eq!(Sigil::from_byte(b'-'), Some(Sigil::Err));
        assert_eq!(Sigil::from_byte(b'O'), None);
        assert_eq!(Sigil::Ok.body(), b"OK\r\n");
        assert_eq!(Sigil::Err.body(), b"ERR\r\n");
    }

    #[test]
    fn test_header_is_big_endian() {
        let header = ReplyHeader {
            size: 0x0102_0304,
            mtime: 0xA0B0_C0D0,
        };
        assert_eq!(
            header.encode(),
            [0x01, 0x02, 0x03, 0x04, 0xA0, 0xB0, 0xC0, 0xD0]
        );
        assert_eq!(ReplyHeader::decode(header.encode()), header);
    }
}
