//! 对外的 JSON 表示，字段统一使用 camelCase

use application::{DispatchReport, FanOutReport, MatchDecision, MessageReceipt};
use domain::{Conversation, Match, Message, Recipient, Timestamp};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDto {
    pub id: String,
    pub user1_id: String,
    pub user2_id: String,
    pub user1_liked: bool,
    pub user2_liked: bool,
    pub is_super_like: bool,
    pub matched_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<&Match> for MatchDto {
    fn from(record: &Match) -> Self {
        Self {
            id: record.id.to_string(),
            user1_id: record.user1_id.to_string(),
            user2_id: record.user2_id.to_string(),
            user1_liked: record.user1_liked,
            user2_liked: record.user2_liked,
            is_super_like: record.is_super_like,
            matched_at: record.matched_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDecisionDto {
    pub outcome: &'static str,
    #[serde(rename = "match")]
    pub record: MatchDto,
    /// 已提交但未能发布的事件
    pub unpublished: Vec<&'static str>,
}

impl From<MatchDecision> for MatchDecisionDto {
    fn from(decision: MatchDecision) -> Self {
        Self {
            outcome: decision.outcome.as_str(),
            record: MatchDto::from(&decision.record),
            unpublished: unpublished(&decision.dispatch),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDto {
    pub id: String,
    pub participants: Vec<String>,
    pub is_group: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub last_message_id: Option<String>,
    pub message_count: usize,
    pub typing_users: Vec<String>,
}

impl From<&Conversation> for ConversationDto {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id.to_string(),
            participants: conversation
                .participants
                .iter()
                .map(ToString::to_string)
                .collect(),
            is_group: conversation.is_group,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            last_message_id: conversation
                .last_message_id
                .as_ref()
                .map(ToString::to_string),
            message_count: conversation.message_count,
            typing_users: conversation.typing_users().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    /// 私聊时为对方用户
    pub receiver_id: Option<String>,
    pub content: String,
    pub status: &'static str,
    pub sent_at: Timestamp,
    pub delivered_at: Option<Timestamp>,
    pub read_at: Option<Timestamp>,
    pub reply_to: Option<String>,
    pub edited_at: Option<Timestamp>,
}

impl From<&Message> for MessageDto {
    fn from(message: &Message) -> Self {
        let receiver_id = match &message.recipient {
            Recipient::Direct(user_id) => Some(user_id.to_string()),
            Recipient::Group(_) => None,
        };
        Self {
            id: message.id.to_string(),
            room_id: message.room_id.to_string(),
            sender_id: message.sender_id.to_string(),
            receiver_id,
            content: message.content.as_str().to_string(),
            status: message.status.as_str(),
            sent_at: message.sent_at,
            delivered_at: message.delivered_at,
            read_at: message.read_at,
            reply_to: message.reply_to.as_ref().map(ToString::to_string),
            edited_at: message.edited_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceiptDto {
    pub message: MessageDto,
    pub unpublished: Vec<&'static str>,
}

impl From<MessageReceipt> for MessageReceiptDto {
    fn from(receipt: MessageReceipt) -> Self {
        Self {
            message: MessageDto::from(&receipt.message),
            unpublished: unpublished(&receipt.dispatch),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingDto {
    pub room_id: String,
    pub typing_users: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyResponse {
    pub success: bool,
    pub recipients: usize,
    pub delivered: usize,
}

impl From<FanOutReport> for NotifyResponse {
    fn from(report: FanOutReport) -> Self {
        Self {
            success: true,
            recipients: report.recipients,
            delivered: report.delivered,
        }
    }
}

fn unpublished(report: &DispatchReport) -> Vec<&'static str> {
    report.unpublished.iter().map(|key| key.as_str()).collect()
}
