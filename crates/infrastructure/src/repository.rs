use std::collections::BTreeSet;
use std::sync::Arc;

use application::{ConversationRepository, MatchRepository, MessageRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Conversation, Match, MatchId, Message, MessageContent, MessageId, MessageStatus, Recipient,
    RepositoryError, RoomId, Timestamp, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return RepositoryError::Conflict;
        }
    }
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

fn parse_user(value: String) -> Result<UserId, RepositoryError> {
    UserId::parse(value).map_err(|err| invalid_data(err.to_string()))
}

#[derive(Debug, FromRow)]
struct MatchRecord {
    id: Uuid,
    user1_id: String,
    user2_id: String,
    user1_liked: bool,
    user2_liked: bool,
    is_super_like: bool,
    matched_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MatchRecord> for Match {
    type Error = RepositoryError;

    fn try_from(value: MatchRecord) -> Result<Self, Self::Error> {
        Ok(Match {
            id: MatchId::from(value.id),
            user1_id: parse_user(value.user1_id)?,
            user2_id: parse_user(value.user2_id)?,
            user1_liked: value.user1_liked,
            user2_liked: value.user2_liked,
            is_super_like: value.is_super_like,
            matched_at: value.matched_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: String,
    participants: Vec<String>,
    is_group: bool,
    last_message_id: Option<String>,
    message_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConversationRecord> for Conversation {
    type Error = RepositoryError;

    fn try_from(value: ConversationRecord) -> Result<Self, Self::Error> {
        let participants = value
            .participants
            .into_iter()
            .map(parse_user)
            .collect::<Result<Vec<_>, _>>()?;
        let last_message_id = value
            .last_message_id
            .map(MessageId::parse)
            .transpose()
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(Conversation {
            id: RoomId::parse(value.id).map_err(|err| invalid_data(err.to_string()))?,
            participants,
            is_group: value.is_group,
            created_at: value.created_at,
            updated_at: value.updated_at,
            last_message_id,
            message_count: usize::try_from(value.message_count)
                .map_err(|err| invalid_data(err.to_string()))?,
            typing: BTreeSet::new(),
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: String,
    room_id: String,
    sender_id: String,
    recipient_kind: String,
    recipient_id: String,
    content: String,
    status: String,
    sent_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
    reply_to: Option<String>,
    edited_at: Option<DateTime<Utc>>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let invalid = |err: domain::DomainError| invalid_data(err.to_string());
        let recipient = match value.recipient_kind.as_str() {
            "direct" => Recipient::Direct(parse_user(value.recipient_id)?),
            "group" => Recipient::Group(RoomId::parse(value.recipient_id).map_err(invalid)?),
            other => return Err(invalid_data(format!("unknown recipient kind: {other}"))),
        };

        Ok(Message {
            id: MessageId::parse(value.id).map_err(invalid)?,
            room_id: RoomId::parse(value.room_id).map_err(invalid)?,
            sender_id: parse_user(value.sender_id)?,
            recipient,
            // 落库前已校验过长度，这里只要求非空
            content: MessageContent::parse(value.content, usize::MAX).map_err(invalid)?,
            status: MessageStatus::parse(&value.status).map_err(invalid)?,
            sent_at: value.sent_at,
            delivered_at: value.delivered_at,
            read_at: value.read_at,
            reply_to: value.reply_to.map(MessageId::parse).transpose().map_err(invalid)?,
            edited_at: value.edited_at,
        })
    }
}

fn recipient_columns(recipient: &Recipient) -> (&'static str, &str) {
    match recipient {
        Recipient::Direct(user_id) => ("direct", user_id.as_str()),
        Recipient::Group(room_id) => ("group", room_id.as_str()),
    }
}

const MATCH_COLUMNS: &str = "id, user1_id, user2_id, user1_liked, user2_liked, is_super_like, matched_at, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, room_id, sender_id, recipient_kind, recipient_id, content, status, sent_at, delivered_at, read_at, reply_to, edited_at";

#[derive(Clone)]
pub struct PgMatchRepository {
    pool: PgPool,
}

impl PgMatchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MatchRepository for PgMatchRepository {
    async fn find_between_users(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Option<Match>, RepositoryError> {
        let (user1, user2) = if a < b { (a, b) } else { (b, a) };
        let record = sqlx::query_as::<_, MatchRecord>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE user1_id = $1 AND user2_id = $2"
        ))
        .bind(user1.as_str())
        .bind(user2.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Match::try_from).transpose()
    }

    async fn save(&self, record: &Match) -> Result<Match, RepositoryError> {
        // matched_at 一旦写入就保持不变
        let stored = sqlx::query_as::<_, MatchRecord>(&format!(
            r#"
            INSERT INTO matches ({MATCH_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user1_id, user2_id) DO UPDATE SET
                user1_liked = EXCLUDED.user1_liked,
                user2_liked = EXCLUDED.user2_liked,
                is_super_like = matches.is_super_like OR EXCLUDED.is_super_like,
                matched_at = COALESCE(matches.matched_at, EXCLUDED.matched_at),
                updated_at = EXCLUDED.updated_at
            RETURNING {MATCH_COLUMNS}
            "#
        ))
        .bind(Uuid::from(record.id))
        .bind(record.user1_id.as_str())
        .bind(record.user2_id.as_str())
        .bind(record.user1_liked)
        .bind(record.user2_liked)
        .bind(record.is_super_like)
        .bind(record.matched_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Match::try_from(stored)
    }

    async fn list_confirmed(&self, user_id: &UserId) -> Result<Vec<Match>, RepositoryError> {
        let records = sqlx::query_as::<_, MatchRecord>(&format!(
            r#"
            SELECT {MATCH_COLUMNS} FROM matches
            WHERE (user1_id = $1 OR user2_id = $1) AND matched_at IS NOT NULL
            ORDER BY matched_at DESC
            "#
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Match::try_from).collect()
    }
}

/// 会话与消息共用一个连接池，追加消息时在同一事务里写两张表
#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_conversation(
        tx: &mut Transaction<'_, Postgres>,
        conversation: &Conversation,
    ) -> Result<(), RepositoryError> {
        let participants: Vec<&str> = conversation
            .participants
            .iter()
            .map(UserId::as_str)
            .collect();
        let message_count =
            i64::try_from(conversation.message_count).map_err(|err| invalid_data(err.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, participants, is_group, last_message_id, message_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                participants = EXCLUDED.participants,
                last_message_id = EXCLUDED.last_message_id,
                message_count = EXCLUDED.message_count,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(conversation.id.as_str())
        .bind(&participants)
        .bind(conversation.is_group)
        .bind(conversation.last_message_id.as_ref().map(MessageId::as_str))
        .bind(message_count)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }
}

#[async_trait]
impl ConversationRepository for PgChatStore {
    async fn find_by_id(&self, id: &RoomId) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"SELECT id, participants, is_group, last_message_id, message_count, created_at, updated_at FROM conversations WHERE id = $1"#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Conversation::try_from).transpose()
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        Self::upsert_conversation(&mut tx, conversation).await?;
        tx.commit().await.map_err(map_sqlx_err)
    }

    async fn append_message(
        &self,
        conversation: &Conversation,
        message: &Message,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        Self::upsert_conversation(&mut tx, conversation).await?;

        let (recipient_kind, recipient_id) = recipient_columns(&message.recipient);
        sqlx::query(&format!(
            r#"
            INSERT INTO messages ({MESSAGE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#
        ))
        .bind(message.id.as_str())
        .bind(message.room_id.as_str())
        .bind(message.sender_id.as_str())
        .bind(recipient_kind)
        .bind(recipient_id)
        .bind(message.content.as_str())
        .bind(message.status.as_str())
        .bind(message.sent_at)
        .bind(message.delivered_at)
        .bind(message.read_at)
        .bind(message.reply_to.as_ref().map(MessageId::as_str))
        .bind(message.edited_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)
    }
}

#[async_trait]
impl MessageRepository for PgChatStore {
    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn find_by_room_id(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM (
                SELECT {MESSAGE_COLUMNS} FROM messages
                WHERE room_id = $1
                ORDER BY sent_at DESC
                LIMIT $2
            ) recent
            ORDER BY sent_at ASC
            "#
        ))
        .bind(room_id.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }

    async fn save(&self, message: &Message) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET content = $2, status = $3, delivered_at = $4, read_at = $5, edited_at = $6
            WHERE id = $1
            "#,
        )
        .bind(message.id.as_str())
        .bind(message.content.as_str())
        .bind(message.status.as_str())
        .bind(message.delivered_at)
        .bind(message.read_at)
        .bind(message.edited_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn count_sent_since(
        &self,
        room_id: &RoomId,
        sender_id: &UserId,
        since: Timestamp,
    ) -> Result<usize, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM messages WHERE room_id = $1 AND sender_id = $2 AND sent_at >= $3"#,
        )
        .bind(room_id.as_str())
        .bind(sender_id.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        usize::try_from(count).map_err(|err| invalid_data(err.to_string()))
    }
}

/// PostgreSQL 仓储集合
#[derive(Clone)]
pub struct PgStorage {
    pub match_repository: Arc<PgMatchRepository>,
    pub chat_store: Arc<PgChatStore>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            match_repository: Arc::new(PgMatchRepository::new(pool.clone())),
            chat_store: Arc::new(PgChatStore::new(pool)),
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
