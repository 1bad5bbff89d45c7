//! 内存仓储
//!
//! 没有配置数据库时使用，语义与 PostgreSQL 实现保持一致。

use std::collections::HashMap;

use async_trait::async_trait;
use domain::{
    Conversation, Match, Message, MessageId, RepositoryError, RoomId, Timestamp, UserId,
};
use tokio::sync::RwLock;

use super::{ConversationRepository, MatchRepository, MessageRepository};

#[derive(Debug, Default)]
pub struct InMemoryMatchRepository {
    rows: RwLock<HashMap<(UserId, UserId), Match>>,
}

impl InMemoryMatchRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn pair(a: &UserId, b: &UserId) -> (UserId, UserId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

#[async_trait]
impl MatchRepository for InMemoryMatchRepository {
    async fn find_between_users(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Option<Match>, RepositoryError> {
        Ok(self.rows.read().await.get(&pair(a, b)).cloned())
    }

    async fn save(&self, record: &Match) -> Result<Match, RepositoryError> {
        let mut rows = self.rows.write().await;
        let key = pair(&record.user1_id, &record.user2_id);
        let mut stored = record.clone();
        if let Some(existing) = rows.get(&key) {
            stored.id = existing.id;
            stored.created_at = existing.created_at;
            stored.matched_at = existing.matched_at.or(record.matched_at);
        }
        rows.insert(key, stored.clone());
        Ok(stored)
    }

    async fn list_confirmed(&self, user_id: &UserId) -> Result<Vec<Match>, RepositoryError> {
        let rows = self.rows.read().await;
        let mut confirmed: Vec<Match> = rows
            .values()
            .filter(|m| m.is_participant(user_id) && m.is_matched())
            .cloned()
            .collect();
        confirmed.sort_by(|a, b| b.matched_at.cmp(&a.matched_at));
        Ok(confirmed)
    }
}

#[derive(Debug, Default)]
struct ChatState {
    conversations: HashMap<RoomId, Conversation>,
    messages: HashMap<MessageId, Message>,
}

/// 会话和消息共用一份状态，`append_message` 才能一次性写入
#[derive(Debug, Default)]
pub struct InMemoryChatStore {
    state: RwLock<ChatState>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryChatStore {
    async fn find_by_id(&self, id: &RoomId) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.state.read().await.conversations.get(id).cloned())
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        self.state
            .write()
            .await
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn append_message(
        &self,
        conversation: &Conversation,
        message: &Message,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.messages.contains_key(&message.id) {
            return Err(RepositoryError::Conflict);
        }
        state
            .messages
            .insert(message.id.clone(), message.clone());
        state
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for InMemoryChatStore {
    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, RepositoryError> {
        Ok(self.state.read().await.messages.get(id).cloned())
    }

    async fn find_by_room_id(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|m| &m.room_id == room_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }

    async fn save(&self, message: &Message) -> Result<(), RepositoryError> {
        self.state
            .write()
            .await
            .messages
            .insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn count_sent_since(
        &self,
        room_id: &RoomId,
        sender_id: &UserId,
        since: Timestamp,
    ) -> Result<usize, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .values()
            .filter(|m| &m.room_id == room_id && &m.sender_id == sender_id && m.sent_at >= since)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_match_save_keeps_first_matched_at() {
        let repo = InMemoryMatchRepository::new();
        let (a, b) = (user("a"), user("b"));
        let first = Utc::now();

        let mut m = Match::open(&a, &b, first).unwrap();
        m.matched_at = Some(first);
        repo.save(&m).await.unwrap();

        m.matched_at = Some(first + Duration::hours(1));
        let stored = repo.save(&m).await.unwrap();
        assert_eq!(stored.matched_at, Some(first));

        let found = repo.find_between_users(&b, &a).await.unwrap().unwrap();
        assert_eq!(found.matched_at, Some(first));
        assert_eq!(repo.list_confirmed(&a).await.unwrap().len(), 1);
        assert!(repo.list_confirmed(&user("c")).await.unwrap().is_empty());
    }
}
