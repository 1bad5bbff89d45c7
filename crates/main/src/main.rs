//! 主应用程序入口
//!
//! 按配置装配仓储与事件总线，启动通知消费者和 Axum Web API 服务。

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use application::{
    repository::memory::{InMemoryChatStore, InMemoryMatchRepository},
    AggregateLocks, Clock, ConnectionRegistry, ConversationRepository, ConversationService,
    ConversationServiceDependencies, EventDispatcher, EventPublisher, MatchRepository,
    MatchService, MatchServiceDependencies, MessageRepository, NotificationRouter,
    NotificationService, RetryConfig, SystemClock,
};
use config::{AppConfig, BrokerConfig};
use infrastructure::{
    connect_storage, DatabaseConfig, InMemoryConnectionRegistry, InProcessBroker,
    RedisStreamConsumer, RedisStreamPublisher, StreamBrokerConfig, WebSocketNotificationSender,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

struct Repositories {
    matches: Arc<dyn MatchRepository>,
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    tracing::info!(config = %config.sanitize(), "配置已加载");

    let repositories = build_repositories(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let connections: Arc<dyn ConnectionRegistry> = Arc::new(InMemoryConnectionRegistry::default());
    let sender = Arc::new(WebSocketNotificationSender::new(connections.clone()));
    let notification_service = Arc::new(NotificationService::new(sender, clock.clone()));
    let notification_router = Arc::new(NotificationRouter::new(notification_service.clone()));

    let shutdown = CancellationToken::new();
    let (publisher, consumer_task) =
        build_event_bus(&config, notification_router, shutdown.clone()).await?;

    let retry = RetryConfig::new(
        config.publish_retry.max_attempts,
        Duration::from_millis(config.publish_retry.base_delay_ms),
    );
    let dispatcher = Arc::new(EventDispatcher::new(publisher, clock.clone(), retry));
    let locks = AggregateLocks::new();

    let match_service = Arc::new(MatchService::new(MatchServiceDependencies {
        match_repository: repositories.matches,
        dispatcher: dispatcher.clone(),
        clock: clock.clone(),
        locks: locks.clone(),
    }));
    let conversation_service = Arc::new(ConversationService::new(ConversationServiceDependencies {
        conversation_repository: repositories.conversations,
        message_repository: repositories.messages,
        dispatcher,
        clock,
        locks,
        policy: config.chat_policy(),
    }));

    let state = AppState::new(
        match_service,
        conversation_service,
        notification_service,
        connections,
    );

    let app = router(state);
    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("监听 {address} 失败"))?;
    tracing::info!(address = %address, "服务器已启动");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "监听退出信号失败");
            }
            tracing::info!("收到退出信号，开始关闭");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(task) = consumer_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "通知消费者任务异常退出");
        }
    }
    tracing::info!("服务器已关闭");
    Ok(())
}

/// 配置了数据库时使用 PostgreSQL，否则全部放在内存里
async fn build_repositories(config: &AppConfig) -> anyhow::Result<Repositories> {
    match &config.database.url {
        Some(url) => {
            let storage = connect_storage(&DatabaseConfig {
                url: url.clone(),
                max_connections: config.database.max_connections,
            })
            .await
            .context("连接数据库失败")?;
            tracing::info!("使用 PostgreSQL 存储");
            Ok(Repositories {
                matches: storage.match_repository,
                conversations: storage.chat_store.clone(),
                messages: storage.chat_store,
            })
        }
        None => {
            tracing::warn!("未配置数据库，使用内存存储");
            let chat_store = Arc::new(InMemoryChatStore::new());
            Ok(Repositories {
                matches: Arc::new(InMemoryMatchRepository::new()),
                conversations: chat_store.clone(),
                messages: chat_store,
            })
        }
    }
}

/// 配置了 Redis 时发布到 Redis Streams 并启动消费者，否则在进程内直接路由
async fn build_event_bus(
    config: &AppConfig,
    notification_router: Arc<NotificationRouter>,
    shutdown: CancellationToken,
) -> anyhow::Result<(Arc<dyn EventPublisher>, Option<JoinHandle<()>>)> {
    let Some(url) = &config.broker.redis_url else {
        tracing::warn!("未配置 Redis，事件在进程内路由");
        let publisher: Arc<dyn EventPublisher> = Arc::new(InProcessBroker::new(notification_router));
        publisher.declare_topology().await?;
        return Ok((publisher, None));
    };

    let stream_config = stream_broker_config(url, &config.broker);
    let publisher: Arc<dyn EventPublisher> =
        Arc::new(RedisStreamPublisher::new(stream_config.clone())?);
    publisher
        .declare_topology()
        .await
        .context("创建 Redis 消费者组失败")?;

    let consumer = RedisStreamConsumer::new(stream_config, notification_router)?;
    let task = tokio::spawn(async move {
        if let Err(e) = consumer.run(shutdown).await {
            tracing::error!(error = %e, "通知消费者停止运行");
        }
    });
    tracing::info!("使用 Redis Streams 事件总线");
    Ok((publisher, Some(task)))
}

fn stream_broker_config(url: &str, broker: &BrokerConfig) -> StreamBrokerConfig {
    StreamBrokerConfig {
        url: url.to_string(),
        stream_prefix: broker.stream_prefix.clone(),
        publish_timeout_ms: broker.publish_timeout_ms,
        max_stream_len: broker.max_stream_len,
        consumer_group: broker.consumer_group.clone(),
        consumer_name: broker.consumer_name.clone(),
        prefetch: broker.prefetch,
        block_ms: broker.block_ms,
        handler_timeout_ms: broker.handler_timeout_ms,
        reclaim_idle_ms: broker.reclaim_idle_ms,
        max_deliveries: broker.max_deliveries,
    }
}
