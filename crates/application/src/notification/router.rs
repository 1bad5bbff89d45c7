//! 通知路由
//!
//! 消费端拿到的每条消息都经过这里：解码、校验必填字段、分发到对应的通知用例。
//! 解码或校验失败是毒消息，不能重新入队；其余失败按瞬时错误处理，等待重投。

use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use super::service::{LikeNotification, MatchNotification, NotificationService};
use super::FanOutReport;
use crate::error::FailureKind;
use crate::integration::{LikePayload, MatchCreatedPayload, RoutingKey};

/// 通知管道订阅的路由键
pub const NOTIFICATION_ROUTING_KEYS: [RoutingKey; 3] = [
    RoutingKey::LikeSent,
    RoutingKey::SuperLikeSent,
    RoutingKey::MatchCreated,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered(FanOutReport),
    /// 不属于通知管道的消息，直接确认
    Ignored,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("poison message: {0}")]
    Poison(String),
    #[error("transient failure: {0}")]
    Transient(String),
}

impl RouteError {
    pub fn is_poison(&self) -> bool {
        matches!(self, RouteError::Poison(_))
    }
}

pub struct NotificationRouter {
    notifications: Arc<NotificationService>,
}

impl NotificationRouter {
    pub fn new(notifications: Arc<NotificationService>) -> Self {
        Self { notifications }
    }

    pub async fn route(&self, routing_key: &str, body: &[u8]) -> Result<RouteOutcome, RouteError> {
        let Some(key) = RoutingKey::parse(routing_key) else {
            warn!(routing_key, "未知的路由键，忽略");
            return Ok(RouteOutcome::Ignored);
        };

        let result = match key {
            RoutingKey::LikeSent | RoutingKey::SuperLikeSent => {
                let payload: LikePayload = decode(body)?;
                self.notifications
                    .notify_like(LikeNotification {
                        from_user_id: payload.from_user_id,
                        to_user_id: payload.to_user_id,
                        is_super_like: payload.is_super_like || key == RoutingKey::SuperLikeSent,
                    })
                    .await
            }
            RoutingKey::MatchCreated => {
                let payload: MatchCreatedPayload = decode(body)?;
                self.notifications
                    .notify_match(MatchNotification {
                        match_id: payload.match_id,
                        user1_id: payload.user1_id,
                        user2_id: payload.user2_id,
                        matched_at: payload.matched_at,
                        is_super_like: payload.is_super_like,
                    })
                    .await
            }
            RoutingKey::DislikeSent
            | RoutingKey::MessageSent
            | RoutingKey::MessageDelivered
            | RoutingKey::MessageRead => {
                debug!(routing_key = %key, "该路由键不产生通知");
                return Ok(RouteOutcome::Ignored);
            }
        };

        match result {
            Ok(report) => Ok(RouteOutcome::Delivered(report)),
            Err(err) if err.kind() == FailureKind::Validation => {
                Err(RouteError::Poison(err.to_string()))
            }
            Err(err) => Err(RouteError::Transient(err.to_string())),
        }
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, RouteError> {
    serde_json::from_slice(body).map_err(|err| RouteError::Poison(format!("invalid payload: {err}")))
}
