//! 会话聚合
//!
//! 负责参与者校验、发送频率限制和消息数量上限；消息状态迁移
//! 通过会话进行，以便群聊时按参与者判断接收方。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::business_rules::ChatPolicy;
use crate::entities::message::{Message, Recipient};
use crate::errors::{DomainError, DomainResult};
use crate::events::DomainEvent;
use crate::value_objects::{MessageContent, MessageId, RoomId, Timestamp, UserId};

/// 发送消息的请求
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub sender_id: UserId,
    /// 私聊时可显式指定接收方，必须是另一位参与者
    pub receiver_id: Option<UserId>,
    pub content: String,
    pub reply_to: Option<MessageId>,
}

/// 会话实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: RoomId,
    pub participants: Vec<UserId>,
    pub is_group: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub last_message_id: Option<MessageId>,
    pub message_count: usize,
    /// 正在输入的用户，只是界面提示，不落库
    #[serde(skip)]
    pub typing: BTreeSet<UserId>,
}

impl Conversation {
    /// 创建私聊会话
    pub fn direct(a: &UserId, b: &UserId, now: Timestamp) -> DomainResult<Self> {
        if a == b {
            return Err(DomainError::validation(
                "participants",
                "私聊需要两个不同的用户",
            ));
        }
        let mut participants = vec![a.clone(), b.clone()];
        participants.sort();
        Ok(Self::with_participants(
            RoomId::direct(a, b),
            participants,
            false,
            now,
        ))
    }

    /// 创建群聊会话，参与者去重后至少两人
    pub fn group(participants: Vec<UserId>, policy: &ChatPolicy, now: Timestamp) -> DomainResult<Self> {
        let mut unique: Vec<UserId> = Vec::with_capacity(participants.len());
        for user_id in participants {
            if !unique.contains(&user_id) {
                unique.push(user_id);
            }
        }
        if unique.len() < 2 {
            return Err(DomainError::validation("participants", "群聊至少需要两个参与者"));
        }
        if unique.len() > policy.max_participants {
            return Err(DomainError::policy("群聊参与者数量超过上限"));
        }
        Ok(Self::with_participants(RoomId::group(), unique, true, now))
    }

    fn with_participants(
        id: RoomId,
        participants: Vec<UserId>,
        is_group: bool,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            participants,
            is_group,
            created_at: now,
            updated_at: now,
            last_message_id: None,
            message_count: 0,
            typing: BTreeSet::new(),
        }
    }

    pub fn is_participant(&self, user_id: &UserId) -> bool {
        self.participants.contains(user_id)
    }

    fn ensure_participant(&self, user_id: &UserId) -> DomainResult<()> {
        if !self.is_participant(user_id) {
            return Err(DomainError::not_participant(user_id.as_str()));
        }
        Ok(())
    }

    fn ensure_owns(&self, message: &Message) -> DomainResult<()> {
        if message.room_id != self.id {
            return Err(DomainError::not_found("message", message.id.as_str()));
        }
        Ok(())
    }

    /// 追加一条消息
    ///
    /// `recent_sends` 是该发送者在频率窗口内已经发出的消息数。
    /// 任何一项校验失败都不会改动会话，也不会产生事件。
    pub fn add_message(
        &mut self,
        draft: MessageDraft,
        recent_sends: usize,
        policy: &ChatPolicy,
        now: Timestamp,
    ) -> DomainResult<(Message, DomainEvent)> {
        self.ensure_participant(&draft.sender_id)?;

        let recipient = if self.is_group {
            if draft.receiver_id.is_some() {
                return Err(DomainError::policy("群聊消息不能指定单个接收方"));
            }
            Recipient::Group(self.id.clone())
        } else {
            let other = self
                .participants
                .iter()
                .find(|p| **p != draft.sender_id)
                .cloned()
                .ok_or_else(|| DomainError::policy("私聊缺少另一位参与者"))?;
            if let Some(receiver) = &draft.receiver_id {
                if *receiver != other {
                    return Err(DomainError::policy("接收方必须是会话的另一位参与者"));
                }
            }
            Recipient::Direct(other)
        };

        let content = policy.validate_content(&draft.content)?;

        if self.message_count >= policy.max_messages_per_conversation {
            return Err(DomainError::policy("会话消息数量已达上限"));
        }
        policy.check_rate(recent_sends)?;

        let message = Message::new(
            self.id.clone(),
            draft.sender_id,
            recipient,
            content,
            draft.reply_to,
            now,
        );
        self.message_count += 1;
        self.last_message_id = Some(message.id.clone());
        self.updated_at = now;
        self.typing.remove(&message.sender_id);

        let event = message.sent_event();
        Ok((message, event))
    }

    pub fn mark_as_delivered(
        &self,
        message: &mut Message,
        receiver_id: &UserId,
        delivered_at: Timestamp,
    ) -> DomainResult<Option<DomainEvent>> {
        self.ensure_owns(message)?;
        message.mark_delivered(receiver_id, &self.participants, delivered_at)
    }

    pub fn mark_as_read(
        &self,
        message: &mut Message,
        reader_id: &UserId,
        read_at: Timestamp,
    ) -> DomainResult<Option<DomainEvent>> {
        self.ensure_owns(message)?;
        message.mark_as_read(reader_id, &self.participants, read_at)
    }

    pub fn edit_message(
        &self,
        message: &mut Message,
        editor_id: &UserId,
        raw_content: &str,
        policy: &ChatPolicy,
        now: Timestamp,
    ) -> DomainResult<()> {
        self.ensure_owns(message)?;
        self.ensure_participant(editor_id)?;
        let content: MessageContent = policy.validate_content(raw_content)?;
        message.edit(editor_id, content, policy.edit_window(), now)
    }

    pub fn mark_user_typing(&mut self, user_id: &UserId) -> DomainResult<()> {
        self.ensure_participant(user_id)?;
        self.typing.insert(user_id.clone());
        Ok(())
    }

    pub fn mark_user_stopped_typing(&mut self, user_id: &UserId) -> DomainResult<()> {
        self.ensure_participant(user_id)?;
        self.typing.remove(user_id);
        Ok(())
    }

    pub fn typing_users(&self) -> impl Iterator<Item = &UserId> {
        self.typing.iter()
    }

    /// 群聊加人，已在群内时不做改动
    pub fn add_participant(
        &mut self,
        user_id: UserId,
        policy: &ChatPolicy,
        now: Timestamp,
    ) -> DomainResult<()> {
        if !self.is_group {
            return Err(DomainError::policy("私聊不能增加参与者"));
        }
        if self.is_participant(&user_id) {
            return Ok(());
        }
        if self.participants.len() >= policy.max_participants {
            return Err(DomainError::policy("群聊参与者数量超过上限"));
        }
        self.participants.push(user_id);
        self.updated_at = now;
        Ok(())
    }

    /// 群聊移除参与者，不能少于两人
    pub fn remove_participant(&mut self, user_id: &UserId, now: Timestamp) -> DomainResult<()> {
        if !self.is_group {
            return Err(DomainError::policy("私聊不能移除参与者"));
        }
        self.ensure_participant(user_id)?;
        if self.participants.len() <= 2 {
            return Err(DomainError::policy("群聊参与者不能少于两人"));
        }
        self.participants.retain(|p| p != user_id);
        self.typing.remove(user_id);
        self.updated_at = now;
        Ok(())
    }
}
