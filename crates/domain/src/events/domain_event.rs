//! 配对与聊天的领域事件

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::message::Recipient;
use crate::value_objects::{MatchId, MessageContent, MessageId, RoomId, Timestamp, UserId};

/// 领域事件
///
/// `aggregate_id` 对配对是配对ID，对聊天是房间ID。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: Uuid,
    pub aggregate_id: String,
    pub recorded_at: Timestamp,
    pub kind: DomainEventKind,
}

impl DomainEvent {
    pub fn new(aggregate_id: impl Into<String>, kind: DomainEventKind, recorded_at: Timestamp) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_id: aggregate_id.into(),
            recorded_at,
            kind,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// 领域事件的具体种类（封闭集合）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainEventKind {
    /// 普通喜欢
    LikeSent {
        from_user_id: UserId,
        to_user_id: UserId,
    },

    /// 超级喜欢
    SuperLikeSent {
        from_user_id: UserId,
        to_user_id: UserId,
    },

    /// 不喜欢
    DislikeSent {
        from_user_id: UserId,
        to_user_id: UserId,
    },

    /// 双方互相喜欢，配对成立
    MatchCreated {
        match_id: MatchId,
        user1_id: UserId,
        user2_id: UserId,
        matched_at: Timestamp,
        is_super_like: bool,
    },

    /// 消息已发送
    MessageSent {
        message_id: MessageId,
        room_id: RoomId,
        sender_id: UserId,
        recipient: Recipient,
        content: MessageContent,
        sent_at: Timestamp,
        reply_to: Option<MessageId>,
    },

    /// 消息已送达
    MessageDelivered {
        message_id: MessageId,
        room_id: RoomId,
        receiver_id: UserId,
        delivered_at: Timestamp,
    },

    /// 消息已读
    MessageRead {
        message_id: MessageId,
        room_id: RoomId,
        reader_id: UserId,
        read_at: Timestamp,
    },
}

impl DomainEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LikeSent { .. } => "LikeSent",
            Self::SuperLikeSent { .. } => "SuperLikeSent",
            Self::DislikeSent { .. } => "DislikeSent",
            Self::MatchCreated { .. } => "MatchCreated",
            Self::MessageSent { .. } => "MessageSent",
            Self::MessageDelivered { .. } => "MessageDelivered",
            Self::MessageRead { .. } => "MessageRead",
        }
    }
}
