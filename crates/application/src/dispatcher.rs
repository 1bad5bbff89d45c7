//! 事件分发
//!
//! 状态变更提交并释放锁之后调用：把领域事件翻译成集成事件并交给发布端口。
//! 发布失败不会回滚已提交的状态，只记录 error 日志并在结果里标出。

use std::sync::Arc;

use domain::DomainEvent;
use tracing::{debug, error};

use crate::clock::Clock;
use crate::integration::{translate, RoutingKey};
use crate::publisher::{EventPublisher, PublishError};
use crate::retry::{retry_async, RetryConfig};

/// 一批事件的发布结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub published: Vec<RoutingKey>,
    pub unpublished: Vec<RoutingKey>,
}

impl DispatchReport {
    pub fn is_complete(&self) -> bool {
        self.unpublished.is_empty()
    }
}

pub struct EventDispatcher {
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl EventDispatcher {
    pub fn new(publisher: Arc<dyn EventPublisher>, clock: Arc<dyn Clock>, retry: RetryConfig) -> Self {
        Self {
            publisher,
            clock,
            retry,
        }
    }

    pub async fn dispatch(&self, events: Vec<DomainEvent>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for event in events {
            let integration = translate(&event, self.clock.now());
            let routing_key = integration.routing_key;

            let body = match integration.to_json() {
                Ok(body) => body,
                Err(err) => {
                    error!(
                        routing_key = %routing_key,
                        event_id = %integration.event_id,
                        error = %err,
                        "集成事件序列化失败"
                    );
                    report.unpublished.push(routing_key);
                    continue;
                }
            };

            let result = retry_async(&self.retry, PublishError::is_transient, || {
                self.publisher.publish(routing_key, body.clone())
            })
            .await;

            match result {
                Ok(()) => {
                    debug!(
                        routing_key = %routing_key,
                        event_id = %integration.event_id,
                        aggregate_id = %integration.aggregate_id,
                        "集成事件已发布"
                    );
                    report.published.push(routing_key);
                }
                Err(err) => {
                    error!(
                        routing_key = %routing_key,
                        event_id = %integration.event_id,
                        aggregate_id = %integration.aggregate_id,
                        error = %err,
                        "状态已提交，但事件发布失败"
                    );
                    report.unpublished.push(routing_key);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::publisher::MockEventPublisher;
    use chrono::Utc;
    use domain::{Match, UserId};
    use std::time::Duration;

    fn like_event() -> DomainEvent {
        let (a, b) = (UserId::parse("a").unwrap(), UserId::parse("b").unwrap());
        let mut m = Match::open(&a, &b, Utc::now()).unwrap();
        let (_, mut events) = m.like(&a, false, Utc::now()).unwrap();
        events.remove(0)
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let mut publisher = MockEventPublisher::new();
        let mut seq = mockall::Sequence::new();
        publisher
            .expect_publish()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(PublishError::connection("refused")));
        publisher
            .expect_publish()
            .withf(|key, body| *key == RoutingKey::LikeSent && body.contains("\"fromUserId\":\"a\""))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let dispatcher = EventDispatcher::new(
            Arc::new(publisher),
            Arc::new(SystemClock),
            RetryConfig::new(3, Duration::from_millis(1)),
        );
        let report = dispatcher.dispatch(vec![like_event()]).await;
        assert_eq!(report.published, vec![RoutingKey::LikeSent]);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_rejected_event_is_reported_not_retried() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .returning(|_, _| Err(PublishError::rejected("stream is read-only")));

        let dispatcher = EventDispatcher::new(
            Arc::new(publisher),
            Arc::new(SystemClock),
            RetryConfig::new(3, Duration::from_millis(1)),
        );
        let report = dispatcher.dispatch(vec![like_event()]).await;
        assert_eq!(report.unpublished, vec![RoutingKey::LikeSent]);
        assert!(report.published.is_empty());
    }
}
