use std::sync::Arc;
use std::time::Duration;

use application::{
    ClientConnection, ConnectionRegistry, EventPublisher, NotificationRouter, NotificationService,
    RoutingKey, SystemClock,
};
use domain::UserId;
use infrastructure::{
    InMemoryConnectionRegistry, RedisStreamConsumer, RedisStreamPublisher, StreamBrokerConfig,
    WebSocketNotificationSender,
};
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::Redis;
use tokio_util::sync::CancellationToken;

fn broker_config(port: u16) -> StreamBrokerConfig {
    StreamBrokerConfig {
        url: format!("redis://127.0.0.1:{port}"),
        stream_prefix: "it".to_string(),
        block_ms: 200,
        reclaim_idle_ms: 200,
        max_deliveries: 2,
        ..StreamBrokerConfig::default()
    }
}

fn router_for(registry: Arc<InMemoryConnectionRegistry>) -> Arc<NotificationRouter> {
    let sender = Arc::new(WebSocketNotificationSender::new(registry));
    let service = Arc::new(NotificationService::new(sender, Arc::new(SystemClock)));
    Arc::new(NotificationRouter::new(service))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires local docker daemon"]
async fn redis_stream_like_reaches_connected_user() {
    let node = Redis::default().start().await.expect("start redis");
    let port = node.get_host_port_ipv4(6379u16).await.expect("port");
    let config = broker_config(port);

    let registry = Arc::new(InMemoryConnectionRegistry::new());
    let (conn, mut rx) = ClientConnection::channel(8);
    registry.register(UserId::parse("u2").unwrap(), conn);

    let publisher = RedisStreamPublisher::new(config.clone()).expect("publisher");
    publisher.declare_topology().await.expect("declare");

    let consumer =
        RedisStreamConsumer::new(config.clone(), router_for(registry.clone())).expect("consumer");
    let shutdown = CancellationToken::new();
    let task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.run(shutdown).await })
    };

    publisher
        .publish(
            RoutingKey::MatchCreated,
            r#"{"eventId":"1-abc","routingKey":"match.match_created","matchId":"m1","user1Id":"u1","user2Id":"u2","isSuperLike":false}"#.to_string(),
        )
        .await
        .expect("publish");

    let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("frame in time")
        .expect("frame");
    assert!(frame.contains("\"type\":\"MATCH\""));
    assert!(frame.contains("\"matchId\":\"m1\""));

    shutdown.cancel();
    task.await.expect("join").expect("consumer stopped cleanly");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires local docker daemon"]
async fn redis_stream_poison_goes_to_dead_letter() {
    let node = Redis::default().start().await.expect("start redis");
    let port = node.get_host_port_ipv4(6379u16).await.expect("port");
    let config = broker_config(port);

    let publisher = RedisStreamPublisher::new(config.clone()).expect("publisher");
    publisher.declare_topology().await.expect("declare");
    let consumer = RedisStreamConsumer::new(
        config.clone(),
        router_for(Arc::new(InMemoryConnectionRegistry::new())),
    )
    .expect("consumer");
    let shutdown = CancellationToken::new();
    let task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.run(shutdown).await })
    };

    publisher
        .publish(RoutingKey::LikeSent, "not json".to_string())
        .await
        .expect("publish");

    let client = redis::Client::open(config.url.as_str()).expect("client");
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .expect("connection");

    let mut dead_letters = 0i64;
    for _ in 0..50 {
        dead_letters = redis::cmd("XLEN")
            .arg(config.dead_letter_key())
            .query_async(&mut conn)
            .await
            .expect("xlen");
        if dead_letters > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(dead_letters, 1);

    shutdown.cancel();
    task.await.expect("join").expect("consumer stopped cleanly");
}
