//! 仓储端口
//!
//! 只保留状态机真正用到的操作，每次保存对单个聚合是原子的。

use async_trait::async_trait;
use domain::{
    Conversation, Match, Message, MessageId, RepositoryError, RoomId, Timestamp, UserId,
};

pub mod memory;

#[async_trait]
pub trait MatchRepository: Send + Sync {
    async fn find_between_users(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Option<Match>, RepositoryError>;

    /// 保存配对并返回存储后的记录；已写入的 `matched_at` 不会被覆盖
    async fn save(&self, record: &Match) -> Result<Match, RepositoryError>;

    /// 用户已成立的配对，按配对时间倒序
    async fn list_confirmed(&self, user_id: &UserId) -> Result<Vec<Match>, RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_id(&self, id: &RoomId) -> Result<Option<Conversation>, RepositoryError>;

    async fn save(&self, conversation: &Conversation) -> Result<(), RepositoryError>;

    // 新消息和会话的计数/最后消息指针一起落库
    async fn append_message(
        &self,
        conversation: &Conversation,
        message: &Message,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, RepositoryError>;

    /// 房间内最近的 `limit` 条消息，按发送时间升序
    async fn find_by_room_id(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn save(&self, message: &Message) -> Result<(), RepositoryError>;

    /// 发送者在该房间内自 `since` 起发出的消息数，用于滑动窗口限流
    async fn count_sent_since(
        &self,
        room_id: &RoomId,
        sender_id: &UserId,
        since: Timestamp,
    ) -> Result<usize, RepositoryError>;
}
