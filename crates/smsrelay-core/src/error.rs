//! 错误类型定义
//!
//! 预期内的业务结果（例如链接限流拒绝）不走本错误类型，
//! 由各模块的封闭原因枚举表达（见 `throttle::DenyReason`）。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SmsRelayError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),
}

pub type Result<T> = std::result::Result<T, SmsRelayError>;
