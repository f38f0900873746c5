use std::io;

/// FTP 传输层错误
#[derive(Debug, thiserror::Error)]
pub enum FtpError {
    #[error("网络错误: {0}")]
    Io(#[from] io::Error),

    /// 服务器回应不符合协议（无法解析的回应、PASV 地址等）
    #[error("协议错误: {0}")]
    Protocol(String),

    #[error("登录失败: {code} {text}")]
    Auth { code: u16, text: String },

    /// 远程操作被服务器拒绝
    #[error("{command} 被拒绝: {code} {text}")]
    Rejected {
        command: String,
        code: u16,
        text: String,
    },
}

pub type FtpResult<T> = Result<T, FtpError>;
