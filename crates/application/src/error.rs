use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::publisher::PublishError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

/// 面向调用方的错误分类，HTTP 层据此映射状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    Policy,
    Forbidden,
    RateLimited,
    NotFound,
    /// 存储或消息代理不可用，调用方可以稍后重试
    Transient,
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ApplicationError::Domain(err) => match err {
                DomainError::Validation { .. } => FailureKind::Validation,
                DomainError::Forbidden { .. } => FailureKind::Forbidden,
                DomainError::RateLimited { .. } => FailureKind::RateLimited,
                DomainError::NotFound { .. } => FailureKind::NotFound,
                DomainError::NotParticipant { .. } | DomainError::PolicyViolation { .. } => {
                    FailureKind::Policy
                }
            },
            ApplicationError::Repository(RepositoryError::NotFound) => FailureKind::NotFound,
            ApplicationError::Repository(_)
            | ApplicationError::Publish(_)
            | ApplicationError::Infrastructure(_) => FailureKind::Transient,
        }
    }
}
