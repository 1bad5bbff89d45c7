mod conversation_service;
mod match_service;

pub use conversation_service::{
    ConversationService, ConversationServiceDependencies, CreateConversationRequest,
    EditMessageRequest, MarkAsReadRequest, MessageReceipt, SendMessageRequest, MAX_HISTORY_LIMIT,
};
pub use match_service::{
    DislikeRequest, LikeRequest, MatchDecision, MatchService, MatchServiceDependencies,
};
