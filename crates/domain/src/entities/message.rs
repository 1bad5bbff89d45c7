//! 消息实体定义
//!
//! 消息状态只能前进：sent → delivered → read，允许从 sent 直接到 read。

use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::events::{DomainEvent, DomainEventKind};
use crate::value_objects::{MessageContent, MessageId, RoomId, Timestamp, UserId};

/// 消息状态枚举
///
/// 声明顺序即推进顺序，比较大小就能判断是否回退。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// 已发送
    Sent,
    /// 已送达
    Delivered,
    /// 已读
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            other => Err(DomainError::validation(
                "status",
                format!("未知的消息状态: {other}"),
            )),
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 消息接收方：私聊是对方用户，群聊是整个房间
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Recipient {
    Direct(UserId),
    Group(RoomId),
}

impl Recipient {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Direct(user_id) => user_id.as_str(),
            Self::Group(room_id) => room_id.as_str(),
        }
    }
}

/// 消息实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub recipient: Recipient,
    pub content: MessageContent,
    pub status: MessageStatus,
    pub sent_at: Timestamp,
    pub delivered_at: Option<Timestamp>,
    pub read_at: Option<Timestamp>,
    /// 回复的消息ID（可选）
    pub reply_to: Option<MessageId>,
    pub edited_at: Option<Timestamp>,
}

impl Message {
    pub fn new(
        room_id: RoomId,
        sender_id: UserId,
        recipient: Recipient,
        content: MessageContent,
        reply_to: Option<MessageId>,
        sent_at: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            room_id,
            sender_id,
            recipient,
            content,
            status: MessageStatus::Sent,
            sent_at,
            delivered_at: None,
            read_at: None,
            reply_to,
            edited_at: None,
        }
    }

    /// 判断用户是否为该消息的接收方
    ///
    /// 群聊中除发送者以外的任一参与者都算接收方。
    pub fn is_receiver(&self, user_id: &UserId, participants: &[UserId]) -> bool {
        match &self.recipient {
            Recipient::Direct(receiver) => receiver == user_id,
            Recipient::Group(_) => &self.sender_id != user_id && participants.contains(user_id),
        }
    }

    pub fn sent_event(&self) -> DomainEvent {
        DomainEvent::new(
            self.room_id.as_str(),
            DomainEventKind::MessageSent {
                message_id: self.id.clone(),
                room_id: self.room_id.clone(),
                sender_id: self.sender_id.clone(),
                recipient: self.recipient.clone(),
                content: self.content.clone(),
                sent_at: self.sent_at,
                reply_to: self.reply_to.clone(),
            },
            self.sent_at,
        )
    }

    /// 标记为已送达，已送达或已读时什么都不做
    pub fn mark_delivered(
        &mut self,
        receiver_id: &UserId,
        participants: &[UserId],
        delivered_at: Timestamp,
    ) -> DomainResult<Option<DomainEvent>> {
        if self.status >= MessageStatus::Delivered {
            return Ok(None);
        }
        if !self.is_receiver(receiver_id, participants) {
            return Err(DomainError::forbidden("只有接收方可以确认送达"));
        }
        if delivered_at < self.sent_at {
            return Err(DomainError::validation(
                "delivered_at",
                "送达时间不能早于发送时间",
            ));
        }

        self.status = MessageStatus::Delivered;
        self.delivered_at = Some(delivered_at);

        Ok(Some(DomainEvent::new(
            self.room_id.as_str(),
            DomainEventKind::MessageDelivered {
                message_id: self.id.clone(),
                room_id: self.room_id.clone(),
                receiver_id: receiver_id.clone(),
                delivered_at,
            },
            delivered_at,
        )))
    }

    /// 标记为已读，必要时顺带补上送达时间
    pub fn mark_as_read(
        &mut self,
        reader_id: &UserId,
        participants: &[UserId],
        read_at: Timestamp,
    ) -> DomainResult<Option<DomainEvent>> {
        if self.status == MessageStatus::Read {
            return Ok(None);
        }
        if !self.is_receiver(reader_id, participants) {
            return Err(DomainError::forbidden("只有接收方可以标记已读"));
        }
        if read_at < self.sent_at {
            return Err(DomainError::validation("read_at", "已读时间不能早于发送时间"));
        }
        if self.delivered_at.is_some_and(|delivered_at| read_at < delivered_at) {
            return Err(DomainError::validation("read_at", "已读时间不能早于送达时间"));
        }

        if self.delivered_at.is_none() {
            self.delivered_at = Some(read_at);
        }
        self.status = MessageStatus::Read;
        self.read_at = Some(read_at);

        Ok(Some(DomainEvent::new(
            self.room_id.as_str(),
            DomainEventKind::MessageRead {
                message_id: self.id.clone(),
                room_id: self.room_id.clone(),
                reader_id: reader_id.clone(),
                read_at,
            },
            read_at,
        )))
    }

    /// 编辑消息内容，仅限发送者、未送达且在编辑时限内
    pub fn edit(
        &mut self,
        editor_id: &UserId,
        content: MessageContent,
        edit_window: Duration,
        now: Timestamp,
    ) -> DomainResult<()> {
        if &self.sender_id != editor_id {
            return Err(DomainError::forbidden("只有发送者可以编辑消息"));
        }
        if self.status != MessageStatus::Sent {
            return Err(DomainError::policy("消息已送达，不能再编辑"));
        }
        if now - self.sent_at > edit_window {
            return Err(DomainError::policy("已超过消息编辑时限"));
        }

        self.content = content;
        self.edited_at = Some(now);
        Ok(())
    }
}
