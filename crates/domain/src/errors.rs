//! 领域模型错误定义
//!
//! 区分输入校验失败、业务规则违反和资源不存在三类错误，
//! 上层据此决定是否重试以及映射成什么样的状态码。

use thiserror::Error;

/// 错误的粗粒度分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 输入形状或格式错误，不可重试
    Validation,
    /// 业务规则拒绝，不可重试
    Policy,
    /// 引用的聚合不存在
    NotFound,
}

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 验证错误
    #[error("验证失败: {field}: {message}")]
    Validation { field: String, message: String },

    /// 操作者不是聚合的参与者
    #[error("用户 {user_id} 不是参与者")]
    NotParticipant { user_id: String },

    /// 业务规则违反错误
    #[error("业务规则违反: {rule}")]
    PolicyViolation { rule: String },

    /// 发送频率超限
    #[error("发送过于频繁: 每 {window_secs} 秒最多 {limit} 条")]
    RateLimited { limit: u32, window_secs: u64 },

    /// 权限错误
    #[error("权限不足: {action}")]
    Forbidden { action: String },

    /// 资源不存在错误
    #[error("资源不存在: {resource} {id}")]
    NotFound { resource: String, id: String },
}

impl DomainError {
    /// 创建验证错误
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_participant(user_id: impl Into<String>) -> Self {
        Self::NotParticipant {
            user_id: user_id.into(),
        }
    }

    /// 创建业务规则违反错误
    pub fn policy(rule: impl Into<String>) -> Self {
        Self::PolicyViolation { rule: rule.into() }
    }

    /// 创建权限错误
    pub fn forbidden(action: impl Into<String>) -> Self {
        Self::Forbidden {
            action: action.into(),
        }
    }

    /// 创建资源不存在错误
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NotParticipant { .. }
            | Self::PolicyViolation { .. }
            | Self::RateLimited { .. }
            | Self::Forbidden { .. } => ErrorKind::Policy,
        }
    }
}

/// 仓储错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("记录不存在")]
    NotFound,
    #[error("记录冲突")]
    Conflict,
    #[error("存储错误: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
