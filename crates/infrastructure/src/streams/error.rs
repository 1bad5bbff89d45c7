//! Redis 事件总线错误类型定义

use application::PublishError;
use thiserror::Error;

/// 事件总线操作错误
#[derive(Error, Debug)]
pub enum BrokerError {
    /// 连接错误
    #[error("Redis 连接错误: {message}")]
    Connection { message: String },

    /// 命令执行错误
    #[error("Redis 命令错误: {message}")]
    Command { message: String },

    /// 超时错误
    #[error("操作超时: {operation} ({timeout_ms}ms)")]
    Timeout { operation: String, timeout_ms: u64 },

    /// 配置错误
    #[error("配置错误: {message}")]
    Config { message: String },
}

/// 事件总线结果类型
pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}

impl From<redis::RedisError> for BrokerError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            return BrokerError::Connection {
                message: err.to_string(),
            };
        }
        match err.kind() {
            redis::ErrorKind::InvalidClientConfig => BrokerError::Config {
                message: err.to_string(),
            },
            _ => BrokerError::Command {
                message: err.to_string(),
            },
        }
    }
}

impl From<BrokerError> for PublishError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Connection { message } => PublishError::Connection(message),
            BrokerError::Timeout { timeout_ms, .. } => PublishError::Timeout { timeout_ms },
            BrokerError::Command { message } | BrokerError::Config { message } => {
                PublishError::Rejected(message)
            }
        }
    }
}
