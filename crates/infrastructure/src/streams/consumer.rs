//! Redis Streams 通知消费者
//!
//! 作为消费者组成员读取通知相关的流：
//! - 处理成功或被忽略的消息立即 `XACK`
//! - 毒消息连同原因写入死信流后 `XACK`，不再重投
//! - 瞬时失败不确认，留在待处理列表里，空闲超时后重新认领；
//!   投递次数达到上限后按毒消息处理

use std::sync::Arc;
use std::time::Duration;

use application::{NotificationRouter, RouteError, RouteOutcome, NOTIFICATION_ROUTING_KEYS};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::Client;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{BrokerError, BrokerResult};
use super::publisher::create_group;
use crate::config::StreamBrokerConfig;

/// 消息处理器 trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, routing_key: &str, body: &[u8]) -> Result<RouteOutcome, RouteError>;
}

#[async_trait]
impl MessageHandler for NotificationRouter {
    async fn handle(&self, routing_key: &str, body: &[u8]) -> Result<RouteOutcome, RouteError> {
        self.route(routing_key, body).await
    }
}

/// 一条消息的处理结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    DeadLetter(String),
    Retry,
}

/// 把处理结果折算成确认动作
pub fn disposition(result: Result<Result<RouteOutcome, RouteError>, tokio::time::error::Elapsed>) -> Disposition {
    match result {
        Ok(Ok(_)) => Disposition::Ack,
        Ok(Err(RouteError::Poison(reason))) => Disposition::DeadLetter(reason),
        Ok(Err(RouteError::Transient(_))) | Err(_) => Disposition::Retry,
    }
}

/// 单批处理统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub acked: usize,
    pub dead_lettered: usize,
    pub retried: usize,
}

pub struct RedisStreamConsumer {
    client: Client,
    handler: Arc<dyn MessageHandler>,
    config: StreamBrokerConfig,
    streams: Vec<String>,
}

impl RedisStreamConsumer {
    pub fn new(config: StreamBrokerConfig, handler: Arc<dyn MessageHandler>) -> BrokerResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| BrokerError::Config {
            message: format!("创建 Redis 客户端失败: {}", e),
        })?;
        let streams = NOTIFICATION_ROUTING_KEYS
            .iter()
            .map(|key| config.stream_key(key.as_str()))
            .collect();

        Ok(Self {
            client,
            handler,
            config,
            streams,
        })
    }

    /// 启动消费者主循环，直到收到关闭信号
    pub async fn run(&self, shutdown: CancellationToken) -> BrokerResult<()> {
        info!(
            streams = ?self.streams,
            consumer_group = %self.config.consumer_group,
            consumer_name = %self.config.consumer_name,
            "通知消费者开始运行"
        );

        let mut conn = self.connect_with_groups().await?;

        while !shutdown.is_cancelled() {
            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.poll_once(&mut conn) => result,
            };

            match result {
                Ok(stats) => {
                    if stats != BatchStats::default() {
                        debug!(
                            acked = stats.acked,
                            dead_lettered = stats.dead_lettered,
                            retried = stats.retried,
                            "已处理事件批次"
                        );
                    }
                }
                Err(e) => {
                    error!(error = %e, "处理批次时发生错误");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                    match self.connect_with_groups().await {
                        Ok(fresh) => conn = fresh,
                        Err(e) => warn!(error = %e, "重新连接 Redis 失败"),
                    }
                }
            }
        }

        info!("通知消费者已停止");
        Ok(())
    }

    async fn connect_with_groups(&self) -> BrokerResult<MultiplexedConnection> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        for stream in &self.streams {
            create_group(&mut conn, stream, &self.config.consumer_group).await?;
        }
        Ok(conn)
    }

    /// 先认领超时未确认的消息，再读取新消息
    pub async fn poll_once(&self, conn: &mut MultiplexedConnection) -> BrokerResult<BatchStats> {
        let mut stats = BatchStats::default();
        for stream in &self.streams {
            let reclaimed = self.reclaim(conn, stream).await?;
            merge(&mut stats, self.process(conn, stream, reclaimed).await);
        }

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(self.config.prefetch)
            .arg("BLOCK")
            .arg(self.config.block_ms)
            .arg("STREAMS")
            .arg(&self.streams)
            .arg(vec![">"; self.streams.len()])
            .query_async(conn)
            .await?;

        if let Some(reply) = reply {
            for stream_key in reply.keys {
                merge(&mut stats, self.process(conn, &stream_key.key, stream_key.ids).await);
            }
        }

        Ok(stats)
    }

    /// 认领空闲超时的待处理消息，超过投递上限的直接转入死信流
    async fn reclaim(
        &self,
        conn: &mut MultiplexedConnection,
        stream: &str,
    ) -> BrokerResult<Vec<StreamId>> {
        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(stream)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(self.config.reclaim_idle_ms)
            .arg("-")
            .arg("+")
            .arg(self.config.prefetch)
            .query_async(conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = pending.ids.iter().map(|p| p.id.as_str()).collect();
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(stream)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg(self.config.reclaim_idle_ms)
            .arg(&ids)
            .query_async(conn)
            .await?;

        let mut redeliver = Vec::with_capacity(claimed.ids.len());
        for entry in claimed.ids {
            let attempts = pending
                .ids
                .iter()
                .find(|p| p.id == entry.id)
                .map(|p| p.times_delivered as u64)
                .unwrap_or(0);
            if attempts >= self.config.max_deliveries {
                let reason = format!("exceeded {} deliveries", self.config.max_deliveries);
                warn!(stream_name = %stream, message_id = %entry.id, attempts, "投递次数超限，转入死信流");
                self.dead_letter(conn, stream, &entry, &reason).await?;
            } else {
                redeliver.push(entry);
            }
        }

        if !redeliver.is_empty() {
            info!(stream_name = %stream, count = redeliver.len(), "重新投递未确认消息");
        }
        Ok(redeliver)
    }

    async fn process(
        &self,
        conn: &MultiplexedConnection,
        stream: &str,
        entries: Vec<StreamId>,
    ) -> BatchStats {
        let routing_key = stream
            .strip_prefix(&format!("{}:", self.config.stream_prefix))
            .unwrap_or(stream)
            .to_string();

        let outcomes: Vec<(String, BrokerResult<Disposition>)> = futures::stream::iter(entries)
            .map(|entry| {
                let mut conn = conn.clone();
                let routing_key = routing_key.clone();
                async move {
                    let id = entry.id.clone();
                    let result = self.handle_entry(&mut conn, stream, &routing_key, &entry).await;
                    (id, result)
                }
            })
            .buffer_unordered(self.config.prefetch.max(1))
            .collect()
            .await;

        let mut stats = BatchStats::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(Disposition::Ack) => stats.acked += 1,
                Ok(Disposition::DeadLetter(_)) => stats.dead_lettered += 1,
                Ok(Disposition::Retry) => stats.retried += 1,
                Err(e) => {
                    error!(stream_name = %stream, message_id = %id, error = %e, "确认消息失败");
                    stats.retried += 1;
                }
            }
        }
        stats
    }

    async fn handle_entry(
        &self,
        conn: &mut MultiplexedConnection,
        stream: &str,
        routing_key: &str,
        entry: &StreamId,
    ) -> BrokerResult<Disposition> {
        let Some(body) = entry.get::<Vec<u8>>("body") else {
            let reason = "missing body field".to_string();
            self.dead_letter(conn, stream, entry, &reason).await?;
            return Ok(Disposition::DeadLetter(reason));
        };

        let result = timeout(
            self.config.handler_timeout(),
            self.handler.handle(routing_key, &body),
        )
        .await;
        let disposition = disposition(result);

        match &disposition {
            Disposition::Ack => self.ack(conn, stream, &entry.id).await?,
            Disposition::DeadLetter(reason) => {
                warn!(stream_name = %stream, message_id = %entry.id, reason = %reason, "毒消息转入死信流");
                self.dead_letter(conn, stream, entry, reason).await?;
            }
            Disposition::Retry => {
                warn!(stream_name = %stream, message_id = %entry.id, "处理失败，等待重新投递");
            }
        }
        Ok(disposition)
    }

    async fn ack(
        &self,
        conn: &mut MultiplexedConnection,
        stream: &str,
        id: &str,
    ) -> BrokerResult<()> {
        let _: i64 = redis::cmd("XACK")
            .arg(stream)
            .arg(&self.config.consumer_group)
            .arg(id)
            .query_async(conn)
            .await?;
        Ok(())
    }

    async fn dead_letter(
        &self,
        conn: &mut MultiplexedConnection,
        stream: &str,
        entry: &StreamId,
        reason: &str,
    ) -> BrokerResult<()> {
        let body = entry.get::<Vec<u8>>("body").unwrap_or_default();
        let _: String = redis::cmd("XADD")
            .arg(self.config.dead_letter_key())
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_stream_len)
            .arg("*")
            .arg("source_stream")
            .arg(stream)
            .arg("source_id")
            .arg(&entry.id)
            .arg("reason")
            .arg(reason)
            .arg("body")
            .arg(body)
            .query_async(conn)
            .await?;
        self.ack(conn, stream, &entry.id).await
    }
}

fn merge(total: &mut BatchStats, batch: BatchStats) {
    total.acked += batch.acked;
    total.dead_lettered += batch.dead_lettered;
    total.retried += batch.retried;
}
