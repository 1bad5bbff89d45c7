//! WebSocket 连接注册表与通知扇出实现

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use application::{
    ClientConnection, ConnectionRegistry, FanOutReport, Notification, NotificationSender,
    PushError, SendError,
};
use async_trait::async_trait;
use domain::UserId;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 内存中的连接注册表
///
/// 每个用户一条连接，后登记的覆盖先登记的。
#[derive(Default)]
pub struct InMemoryConnectionRegistry {
    connections: RwLock<HashMap<UserId, ClientConnection>>,
}

impl InMemoryConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionRegistry for InMemoryConnectionRegistry {
    fn register(&self, user_id: UserId, connection: ClientConnection) -> Option<ClientConnection> {
        let connection_id = connection.id();
        let previous = self
            .connections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(user_id.clone(), connection);

        info!(user_id = %user_id, connection_id = %connection_id, replaced = previous.is_some(), "连接已登记");
        previous
    }

    fn unregister(&self, user_id: &UserId) -> Option<ClientConnection> {
        let removed = self
            .connections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(user_id);
        if removed.is_some() {
            info!(user_id = %user_id, "连接已注销");
        }
        removed
    }

    fn release(&self, user_id: &UserId, connection_id: Uuid) -> bool {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match connections.get(user_id) {
            Some(current) if current.id() == connection_id => {
                connections.remove(user_id);
                debug!(user_id = %user_id, connection_id = %connection_id, "连接已释放");
                true
            }
            _ => false,
        }
    }

    fn get(&self, user_id: &UserId) -> Option<ClientConnection> {
        self.connections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(user_id)
            .cloned()
    }

    fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// 通过 WebSocket 连接扇出通知
///
/// 帧只编码一次；推送时不持有注册表的锁。
pub struct WebSocketNotificationSender {
    registry: Arc<dyn ConnectionRegistry>,
}

impl WebSocketNotificationSender {
    pub fn new(registry: Arc<dyn ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl NotificationSender for WebSocketNotificationSender {
    async fn send(&self, notification: &Notification) -> Result<FanOutReport, SendError> {
        let frame = notification
            .to_frame()
            .map_err(|err| SendError::Encode(err.to_string()))?;
        let recipients = notification.recipients();

        let mut report = FanOutReport {
            recipients: recipients.len(),
            delivered: 0,
        };

        for user_id in recipients {
            let Some(connection) = self.registry.get(user_id) else {
                debug!(user_id = %user_id, "接收方不在线，跳过");
                continue;
            };
            if !connection.is_open() {
                self.registry.release(user_id, connection.id());
                continue;
            }

            match connection.push(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(PushError::Closed) => {
                    self.registry.release(user_id, connection.id());
                    debug!(user_id = %user_id, "连接已关闭，跳过");
                }
                Err(PushError::Full) => {
                    warn!(user_id = %user_id, "连接发送队列已满，丢弃通知");
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn match_notification() -> Notification {
        Notification::Match {
            match_id: "m1".to_string(),
            user1_id: user("u1"),
            user2_id: user("u2"),
            matched_at: Some(Utc::now()),
            is_super_like: false,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_register_replaces_and_release_checks_identity() {
        let registry = InMemoryConnectionRegistry::new();
        let (first, _rx1) = ClientConnection::channel(4);
        let (second, _rx2) = ClientConnection::channel(4);
        let first_id = first.id();

        assert!(registry.register(user("u1"), first).is_none());
        let replaced = registry.register(user("u1"), second.clone()).unwrap();
        assert_eq!(replaced.id(), first_id);

        // 旧连接断开时不能把新连接注销掉
        assert!(!registry.release(&user("u1"), first_id));
        assert_eq!(registry.get(&user("u1")).unwrap().id(), second.id());

        assert!(registry.release(&user("u1"), second.id()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_match_fans_out_to_online_users_only() {
        let registry = Arc::new(InMemoryConnectionRegistry::new());
        let (conn, mut rx) = ClientConnection::channel(4);
        registry.register(user("u1"), conn);
        let sender = WebSocketNotificationSender::new(registry.clone());

        let report = sender.send(&match_notification()).await.unwrap();
        assert_eq!(report, FanOutReport { recipients: 2, delivered: 1 });

        let frame = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "MATCH");
        assert_eq!(value["data"]["matchId"], "m1");
    }

    #[tokio::test]
    async fn test_closed_connection_is_skipped_and_released() {
        let registry = Arc::new(InMemoryConnectionRegistry::new());
        let (conn, rx) = ClientConnection::channel(4);
        registry.register(user("u2"), conn);
        drop(rx);
        let sender = WebSocketNotificationSender::new(registry.clone());

        let report = sender.send(&match_notification()).await.unwrap();
        assert_eq!(report.delivered, 0);
        assert!(registry.get(&user("u2")).is_none());
    }
}
