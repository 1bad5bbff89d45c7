//! 事件发布端口
//!
//! 发布必须等到代理确认持久化之后才返回成功；连接失败要如实返回，
//! 由调用方决定重试还是记录后继续。

use async_trait::async_trait;
use thiserror::Error;

use crate::integration::RoutingKey;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("broker connection failed: {0}")]
    Connection(String),
    #[error("broker did not confirm within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("broker rejected the event: {0}")]
    Rejected(String),
    #[error("event serialization failed: {0}")]
    Serialization(String),
}

impl PublishError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// 连接失败和确认超时值得重试，其余重试也不会成功
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout { .. })
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// 发布一条已序列化的集成事件，返回前代理已确认收到
    async fn publish(&self, routing_key: RoutingKey, body: String) -> Result<(), PublishError>;

    /// 声明拓扑（流、消费组等），可重复调用
    async fn declare_topology(&self) -> Result<(), PublishError>;
}
