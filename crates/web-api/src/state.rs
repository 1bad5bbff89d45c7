use std::sync::Arc;

use application::{ConnectionRegistry, ConversationService, MatchService, NotificationService};

#[derive(Clone)]
pub struct AppState {
    pub match_service: Arc<MatchService>,
    pub conversation_service: Arc<ConversationService>,
    pub notification_service: Arc<NotificationService>,
    pub connections: Arc<dyn ConnectionRegistry>,
    /// 每条 WebSocket 连接的待发送帧上限
    pub outbound_buffer: usize,
}

impl AppState {
    pub fn new(
        match_service: Arc<MatchService>,
        conversation_service: Arc<ConversationService>,
        notification_service: Arc<NotificationService>,
        connections: Arc<dyn ConnectionRegistry>,
    ) -> Self {
        Self {
            match_service,
            conversation_service,
            notification_service,
            connections,
            outbound_buffer: 64,
        }
    }
}
