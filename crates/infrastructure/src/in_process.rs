//! 进程内事件总线
//!
//! 没有配置 Redis 时使用：发布即把消息体交给通知路由，
//! 与消费者走同一条解码、校验、分发路径。至多一次，不落盘。

use std::sync::Arc;

use application::{EventPublisher, NotificationRouter, PublishError, RouteError, RoutingKey};
use async_trait::async_trait;
use tracing::{debug, warn};

pub struct InProcessBroker {
    router: Arc<NotificationRouter>,
}

impl InProcessBroker {
    pub fn new(router: Arc<NotificationRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl EventPublisher for InProcessBroker {
    async fn publish(&self, routing_key: RoutingKey, body: String) -> Result<(), PublishError> {
        match self.router.route(routing_key.as_str(), body.as_bytes()).await {
            Ok(outcome) => {
                debug!(routing_key = %routing_key, ?outcome, "事件已在进程内路由");
                Ok(())
            }
            Err(RouteError::Poison(reason)) => {
                warn!(routing_key = %routing_key, reason = %reason, "进程内路由拒绝了事件");
                Err(PublishError::rejected(reason))
            }
            Err(RouteError::Transient(reason)) => {
                warn!(routing_key = %routing_key, reason = %reason, "进程内通知发送失败");
                Err(PublishError::connection(reason))
            }
        }
    }

    async fn declare_topology(&self) -> Result<(), PublishError> {
        Ok(())
    }
}
