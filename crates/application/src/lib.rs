//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：配对、会话消息与实时通知，
//! 负责输入校验、聚合级串行化、事务边界，以及对外部适配器
//! （持久化、消息代理、客户端连接）的抽象。

pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod integration;
pub mod lock;
pub mod notification;
pub mod publisher;
pub mod repository;
pub mod retry;
pub mod services;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{DispatchReport, EventDispatcher};
pub use error::{ApplicationError, FailureKind};
pub use integration::{translate, IntegrationEvent, IntegrationPayload, RoutingKey};
pub use lock::AggregateLocks;
pub use notification::{
    ClientConnection, ConnectionRegistry, FanOutReport, LikeNotification, MatchNotification,
    Notification, NotificationRouter, NotificationSender, NotificationService, PushError,
    RouteError, RouteOutcome, SendError, NOTIFICATION_ROUTING_KEYS,
};
pub use publisher::{EventPublisher, PublishError};
pub use repository::{ConversationRepository, MatchRepository, MessageRepository};
pub use retry::RetryConfig;
pub use services::{
    ConversationService, ConversationServiceDependencies, CreateConversationRequest,
    DislikeRequest, EditMessageRequest, LikeRequest, MarkAsReadRequest, MatchDecision,
    MatchService, MatchServiceDependencies, MessageReceipt, SendMessageRequest,
};
