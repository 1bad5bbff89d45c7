#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use application::{
    repository::memory::{InMemoryChatStore, InMemoryMatchRepository},
    AggregateLocks, Clock, ConnectionRegistry, ConversationService,
    ConversationServiceDependencies, EventDispatcher, MatchService, MatchServiceDependencies,
    NotificationRouter, NotificationService, RetryConfig, SystemClock,
};
use axum::Router;
use domain::{ChatPolicy, UserId};
use infrastructure::{InMemoryConnectionRegistry, InProcessBroker, WebSocketNotificationSender};
use tokio::{net::TcpListener, sync::oneshot};
use web_api::{router, AppState};

/// 全内存装配：内存仓储 + 进程内事件总线 + 真实的连接表
pub struct TestApp {
    pub router: Router,
    pub connections: Arc<dyn ConnectionRegistry>,
}

pub fn build_app() -> TestApp {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let connections: Arc<dyn ConnectionRegistry> = Arc::new(InMemoryConnectionRegistry::default());
    let sender = Arc::new(WebSocketNotificationSender::new(connections.clone()));
    let notification_service = Arc::new(NotificationService::new(sender, clock.clone()));
    let broker = Arc::new(InProcessBroker::new(Arc::new(NotificationRouter::new(
        notification_service.clone(),
    ))));
    let dispatcher = Arc::new(EventDispatcher::new(broker, clock.clone(), RetryConfig::none()));
    let locks = AggregateLocks::new();
    let chat_store = Arc::new(InMemoryChatStore::new());

    let match_service = Arc::new(MatchService::new(MatchServiceDependencies {
        match_repository: Arc::new(InMemoryMatchRepository::new()),
        dispatcher: dispatcher.clone(),
        clock: clock.clone(),
        locks: locks.clone(),
    }));
    let conversation_service = Arc::new(ConversationService::new(ConversationServiceDependencies {
        conversation_repository: chat_store.clone(),
        message_repository: chat_store,
        dispatcher,
        clock,
        locks,
        policy: ChatPolicy::default(),
    }));

    let state = AppState::new(
        match_service,
        conversation_service,
        notification_service,
        connections.clone(),
    );

    TestApp {
        router: router(state),
        connections,
    }
}

/// 在随机端口上启动服务，返回地址和关闭信号
pub async fn spawn_server(router: Router) -> (std::net::SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    (addr, shutdown_tx)
}

/// 等到连接在服务端登记完成
pub async fn wait_until_online(connections: &Arc<dyn ConnectionRegistry>, user_id: &str) {
    let user_id = UserId::parse(user_id).expect("user id");
    for _ in 0..100 {
        if connections.get(&user_id).is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("user {user_id} never came online");
}
