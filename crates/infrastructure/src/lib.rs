//! 基础设施层实现。
//!
//! 提供 PostgreSQL 仓储、Redis Streams 事件总线、进程内事件总线
//! 以及 WebSocket 连接注册表与通知扇出，实现应用层定义的端口。

pub mod builder;
pub mod config;
pub mod in_process;
pub mod migrations;
pub mod streams;
pub mod repository;
pub mod websocket;

pub use builder::{connect_storage, InfrastructureError};
pub use config::{DatabaseConfig, StreamBrokerConfig};
pub use in_process::InProcessBroker;
pub use migrations::MIGRATOR;
pub use streams::{BrokerError, MessageHandler, RedisStreamConsumer, RedisStreamPublisher};
pub use repository::{create_pg_pool, PgChatStore, PgMatchRepository, PgStorage};
pub use websocket::{InMemoryConnectionRegistry, WebSocketNotificationSender};
