//! 集成事件
//!
//! 领域事件跨出进程边界时的唯一形态：带稳定的路由键、事件ID和
//! 发生时间，负载字段平铺在同一个 JSON 对象里。

use std::fmt;

use chrono::SecondsFormat;
use domain::{DomainEvent, DomainEventKind, Recipient, Timestamp};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

const EVENT_ID_SUFFIX_LEN: usize = 12;

/// 路由键（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingKey {
    #[serde(rename = "message.sent")]
    MessageSent,
    #[serde(rename = "message.delivered")]
    MessageDelivered,
    #[serde(rename = "message.read")]
    MessageRead,
    #[serde(rename = "match.match_created")]
    MatchCreated,
    #[serde(rename = "match.like_sent")]
    LikeSent,
    #[serde(rename = "match.super_like_sent")]
    SuperLikeSent,
    #[serde(rename = "match.dislike_sent")]
    DislikeSent,
}

impl RoutingKey {
    pub const ALL: [RoutingKey; 7] = [
        RoutingKey::MessageSent,
        RoutingKey::MessageDelivered,
        RoutingKey::MessageRead,
        RoutingKey::MatchCreated,
        RoutingKey::LikeSent,
        RoutingKey::SuperLikeSent,
        RoutingKey::DislikeSent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingKey::MessageSent => "message.sent",
            RoutingKey::MessageDelivered => "message.delivered",
            RoutingKey::MessageRead => "message.read",
            RoutingKey::MatchCreated => "match.match_created",
            RoutingKey::LikeSent => "match.like_sent",
            RoutingKey::SuperLikeSent => "match.super_like_sent",
            RoutingKey::DislikeSent => "match.dislike_sent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == value)
    }

    pub fn for_event(kind: &DomainEventKind) -> Self {
        match kind {
            DomainEventKind::LikeSent { .. } => RoutingKey::LikeSent,
            DomainEventKind::SuperLikeSent { .. } => RoutingKey::SuperLikeSent,
            DomainEventKind::DislikeSent { .. } => RoutingKey::DislikeSent,
            DomainEventKind::MatchCreated { .. } => RoutingKey::MatchCreated,
            DomainEventKind::MessageSent { .. } => RoutingKey::MessageSent,
            DomainEventKind::MessageDelivered { .. } => RoutingKey::MessageDelivered,
            DomainEventKind::MessageRead { .. } => RoutingKey::MessageRead,
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikePayload {
    pub from_user_id: String,
    pub to_user_id: String,
    #[serde(default)]
    pub is_super_like: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DislikePayload {
    pub from_user_id: String,
    pub to_user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCreatedPayload {
    pub match_id: String,
    pub user1_id: String,
    pub user2_id: String,
    #[serde(default)]
    pub matched_at: Option<Timestamp>,
    #[serde(default)]
    pub is_super_like: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSentPayload {
    pub message_id: String,
    pub chat_room_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub sent_at: Timestamp,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeliveredPayload {
    pub message_id: String,
    pub chat_room_id: String,
    pub receiver_id: String,
    pub delivered_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReadPayload {
    pub message_id: String,
    pub chat_room_id: String,
    pub reader_id: String,
    pub read_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IntegrationPayload {
    Like(LikePayload),
    Dislike(DislikePayload),
    MatchCreated(MatchCreatedPayload),
    MessageSent(MessageSentPayload),
    MessageDelivered(MessageDeliveredPayload),
    MessageRead(MessageReadPayload),
}

/// 集成事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationEvent {
    pub event_id: String,
    pub routing_key: RoutingKey,
    pub aggregate_id: String,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub occurred_at: Timestamp,
    #[serde(flatten)]
    pub payload: IntegrationPayload,
}

fn serialize_rfc3339<S>(value: &Timestamp, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl IntegrationEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// 事件ID：毫秒时间戳前缀加随机后缀
pub fn new_event_id(now: Timestamp) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(EVENT_ID_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}-{}", now.timestamp_millis(), suffix)
}

/// 领域事件到集成事件的转换
///
/// `occurred_at` 取转换时刻而不是领域事件的记录时刻，以反映发布延迟。
pub fn translate(event: &DomainEvent, occurred_at: Timestamp) -> IntegrationEvent {
    let payload = match &event.kind {
        DomainEventKind::LikeSent {
            from_user_id,
            to_user_id,
        } => IntegrationPayload::Like(LikePayload {
            from_user_id: from_user_id.to_string(),
            to_user_id: to_user_id.to_string(),
            is_super_like: false,
        }),
        DomainEventKind::SuperLikeSent {
            from_user_id,
            to_user_id,
        } => IntegrationPayload::Like(LikePayload {
            from_user_id: from_user_id.to_string(),
            to_user_id: to_user_id.to_string(),
            is_super_like: true,
        }),
        DomainEventKind::DislikeSent {
            from_user_id,
            to_user_id,
        } => IntegrationPayload::Dislike(DislikePayload {
            from_user_id: from_user_id.to_string(),
            to_user_id: to_user_id.to_string(),
        }),
        DomainEventKind::MatchCreated {
            match_id,
            user1_id,
            user2_id,
            matched_at,
            is_super_like,
        } => IntegrationPayload::MatchCreated(MatchCreatedPayload {
            match_id: match_id.to_string(),
            user1_id: user1_id.to_string(),
            user2_id: user2_id.to_string(),
            matched_at: Some(*matched_at),
            is_super_like: *is_super_like,
        }),
        DomainEventKind::MessageSent {
            message_id,
            room_id,
            sender_id,
            recipient,
            content,
            sent_at,
            reply_to,
        } => IntegrationPayload::MessageSent(MessageSentPayload {
            message_id: message_id.to_string(),
            chat_room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: match recipient {
                Recipient::Direct(user_id) => user_id.to_string(),
                Recipient::Group(room_id) => room_id.to_string(),
            },
            content: content.to_string(),
            sent_at: *sent_at,
            reply_to: reply_to.as_ref().map(|id| id.to_string()),
        }),
        DomainEventKind::MessageDelivered {
            message_id,
            room_id,
            receiver_id,
            delivered_at,
        } => IntegrationPayload::MessageDelivered(MessageDeliveredPayload {
            message_id: message_id.to_string(),
            chat_room_id: room_id.to_string(),
            receiver_id: receiver_id.to_string(),
            delivered_at: *delivered_at,
        }),
        DomainEventKind::MessageRead {
            message_id,
            room_id,
            reader_id,
            read_at,
        } => IntegrationPayload::MessageRead(MessageReadPayload {
            message_id: message_id.to_string(),
            chat_room_id: room_id.to_string(),
            reader_id: reader_id.to_string(),
            read_at: *read_at,
        }),
    };

    IntegrationEvent {
        event_id: new_event_id(occurred_at),
        routing_key: RoutingKey::for_event(&event.kind),
        aggregate_id: event.aggregate_id.clone(),
        occurred_at,
        payload,
    }
}
