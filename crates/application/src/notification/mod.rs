//! 实时通知
//!
//! 通知是一次性的值：只投递给此刻在线的接收方，不排队、不重放。

pub mod registry;
pub mod router;
pub mod service;

use async_trait::async_trait;
use domain::{Timestamp, UserId};
use serde_json::{json, Value};
use thiserror::Error;

pub use registry::{ClientConnection, ConnectionRegistry, PushError};
pub use router::{NotificationRouter, RouteError, RouteOutcome, NOTIFICATION_ROUTING_KEYS};
pub use service::{LikeNotification, MatchNotification, NotificationService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Like,
    Match,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Like => "LIKE",
            NotificationKind::Match => "MATCH",
        }
    }
}

/// 通知（封闭集合）
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// 有人喜欢了接收方
    Like {
        recipient: UserId,
        from_user_id: UserId,
        is_super_like: bool,
        occurred_at: Timestamp,
    },
    /// 配对成立，双方都会收到
    Match {
        match_id: String,
        user1_id: UserId,
        user2_id: UserId,
        matched_at: Option<Timestamp>,
        is_super_like: bool,
        occurred_at: Timestamp,
    },
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::Like { .. } => NotificationKind::Like,
            Notification::Match { .. } => NotificationKind::Match,
        }
    }

    /// 接收方列表，构造上保证非空
    pub fn recipients(&self) -> Vec<&UserId> {
        match self {
            Notification::Like { recipient, .. } => vec![recipient],
            Notification::Match {
                user1_id, user2_id, ..
            } => vec![user1_id, user2_id],
        }
    }

    pub fn occurred_at(&self) -> Timestamp {
        match self {
            Notification::Like { occurred_at, .. } | Notification::Match { occurred_at, .. } => {
                *occurred_at
            }
        }
    }

    /// 推送给客户端的 `{type, data}` 信封
    pub fn envelope(&self) -> Value {
        let data = match self {
            Notification::Like {
                from_user_id,
                is_super_like,
                ..
            } => json!({
                "fromUserId": from_user_id,
                "isSuperLike": is_super_like,
            }),
            Notification::Match {
                match_id,
                matched_at,
                is_super_like,
                ..
            } => json!({
                "matchId": match_id,
                "matchedAt": matched_at,
                "isSuperLike": is_super_like,
            }),
        };
        json!({ "type": self.kind().as_str(), "data": data })
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.envelope())
    }
}

/// 一次扇出的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub recipients: usize,
    pub delivered: usize,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("notification encoding failed: {0}")]
    Encode(String),
}

/// 扇出发送端口
///
/// 离线或连接已关闭的接收方直接跳过，不算错误。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<FanOutReport, SendError>;
}
