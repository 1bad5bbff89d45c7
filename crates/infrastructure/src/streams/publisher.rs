//! Redis Streams 事件发布者
//!
//! 每个路由键对应一条流，发布即 `XADD`，拿到条目 ID 才算成功。

use application::{EventPublisher, PublishError, RoutingKey, NOTIFICATION_ROUTING_KEYS};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::{BrokerError, BrokerResult};
use crate::config::StreamBrokerConfig;

/// Redis Streams 发布者
///
/// 多路复用连接按需建立并缓存，任何错误都会丢弃它，下一次发布重新连接。
pub struct RedisStreamPublisher {
    client: Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    config: StreamBrokerConfig,
}

impl RedisStreamPublisher {
    /// 创建发布者，此时不会建立连接
    pub fn new(config: StreamBrokerConfig) -> BrokerResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| BrokerError::Config {
            message: format!("创建 Redis 客户端失败: {}", e),
        })?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
            config,
        })
    }

    pub fn config(&self) -> &StreamBrokerConfig {
        &self.config
    }

    async fn connection(&self) -> BrokerResult<MultiplexedConnection> {
        let mut cached = self.connection.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self.client.get_multiplexed_async_connection().await?;
        info!(url = %self.config.url, "Redis 发布连接已建立");
        *cached = Some(conn.clone());
        Ok(conn)
    }

    async fn reset_connection(&self) {
        self.connection.lock().await.take();
    }

    async fn xadd(&self, routing_key: RoutingKey, body: &str) -> BrokerResult<String> {
        let mut conn = self.connection().await?;
        let stream = self.config.stream_key(routing_key.as_str());

        let entry_id: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_stream_len)
            .arg("*")
            .arg("routing_key")
            .arg(routing_key.as_str())
            .arg("body")
            .arg(body)
            .query_async(&mut conn)
            .await?;

        Ok(entry_id)
    }

    /// 为通知管道订阅的每条流创建消费者组
    pub async fn ensure_consumer_groups(&self) -> BrokerResult<()> {
        let mut conn = self.connection().await?;
        for routing_key in NOTIFICATION_ROUTING_KEYS {
            let stream = self.config.stream_key(routing_key.as_str());
            create_group(&mut conn, &stream, &self.config.consumer_group).await?;
        }
        Ok(())
    }
}

/// 创建消费者组，组已存在视为成功
pub(crate) async fn create_group(
    conn: &mut MultiplexedConnection,
    stream: &str,
    group: &str,
) -> BrokerResult<()> {
    let result: Result<String, redis::RedisError> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(stream)
        .arg(group)
        .arg("0")
        .arg("MKSTREAM")
        .query_async(conn)
        .await;

    match result {
        Ok(_) => {
            info!(stream_name = %stream, group = %group, "消费者组已创建");
            Ok(())
        }
        Err(e) if e.code() == Some("BUSYGROUP") => {
            debug!(stream_name = %stream, group = %group, "消费者组已存在");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl EventPublisher for RedisStreamPublisher {
    async fn publish(&self, routing_key: RoutingKey, body: String) -> Result<(), PublishError> {
        let limit = self.config.publish_timeout();
        let result = match timeout(limit, self.xadd(routing_key, &body)).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::timeout("XADD", self.config.publish_timeout_ms)),
        };

        match result {
            Ok(entry_id) => {
                debug!(routing_key = %routing_key, entry_id = %entry_id, "事件已写入流");
                Ok(())
            }
            Err(err) => {
                warn!(routing_key = %routing_key, error = %err, "事件写入流失败");
                self.reset_connection().await;
                Err(err.into())
            }
        }
    }

    async fn declare_topology(&self) -> Result<(), PublishError> {
        let limit = self.config.publish_timeout();
        match timeout(limit, self.ensure_consumer_groups()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.reset_connection().await;
                Err(err.into())
            }
            Err(_) => {
                self.reset_connection().await;
                Err(BrokerError::timeout("XGROUP CREATE", self.config.publish_timeout_ms).into())
            }
        }
    }
}
