//! Redis Streams 事件总线
//!
//! 提供话题式的事件发布（每个路由键一条流）以及通知消费者组。

pub mod consumer;
pub mod error;
pub mod publisher;

pub use consumer::{BatchStats, Disposition, MessageHandler, RedisStreamConsumer};
pub use error::{BrokerError, BrokerResult};
pub use publisher::RedisStreamPublisher;
