use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use domain::{
    ChatPolicy, Conversation, DomainError, Message, MessageDraft, MessageId, RoomId, Timestamp,
    UserId,
};
use tracing::{info, warn};

use crate::{
    clock::Clock,
    dispatcher::{DispatchReport, EventDispatcher},
    error::ApplicationError,
    lock::AggregateLocks,
    repository::{ConversationRepository, MessageRepository},
};

/// 单次查询消息的上限
pub const MAX_HISTORY_LIMIT: usize = 200;

#[derive(Debug, Clone)]
pub struct CreateConversationRequest {
    pub creator_id: String,
    pub participant_ids: Vec<String>,
    pub is_group: bool,
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub room_id: String,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub content: String,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MarkAsReadRequest {
    pub message_id: String,
    pub reader_id: String,
    /// 缺省为当前时间
    pub read_at: Option<Timestamp>,
}

#[derive(Debug, Clone)]
pub struct EditMessageRequest {
    pub message_id: String,
    pub editor_id: String,
    pub content: String,
}

/// 已提交的消息以及事件发布情况
#[derive(Debug, Clone)]
pub struct MessageReceipt {
    pub message: Message,
    pub dispatch: DispatchReport,
}

pub struct ConversationServiceDependencies {
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub dispatcher: Arc<EventDispatcher>,
    pub clock: Arc<dyn Clock>,
    pub locks: Arc<AggregateLocks>,
    pub policy: ChatPolicy,
}

pub struct ConversationService {
    deps: ConversationServiceDependencies,
    // 输入状态只保存在内存里，不随会话落库
    typing: Mutex<HashMap<RoomId, BTreeSet<UserId>>>,
}

impl ConversationService {
    pub fn new(deps: ConversationServiceDependencies) -> Self {
        Self {
            deps,
            typing: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &ChatPolicy {
        &self.deps.policy
    }

    /// 创建会话；私聊会话已存在时直接返回
    pub async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<Conversation, ApplicationError> {
        let creator = UserId::parse(request.creator_id)?;
        let mut participants = vec![creator];
        for raw in request.participant_ids {
            let user_id = UserId::parse(raw)?;
            if !participants.contains(&user_id) {
                participants.push(user_id);
            }
        }
        let now = self.deps.clock.now();

        if !request.is_group {
            return self.open_direct(participants, now).await;
        }

        let conversation = Conversation::group(participants, &self.deps.policy, now)?;
        self.deps.conversation_repository.save(&conversation).await?;
        info!(
            room_id = %conversation.id,
            participants = conversation.participants.len(),
            "群聊会话已创建"
        );
        Ok(conversation)
    }

    async fn open_direct(
        &self,
        participants: Vec<UserId>,
        now: Timestamp,
    ) -> Result<Conversation, ApplicationError> {
        let [a, b] = participants.as_slice() else {
            return Err(DomainError::validation("participant_ids", "私聊必须恰好两个参与者").into());
        };
        let room_id = RoomId::direct(a, b);

        let _guard = self.deps.locks.acquire(room_lock(&room_id)).await;
        if let Some(existing) = self
            .deps
            .conversation_repository
            .find_by_id(&room_id)
            .await?
        {
            return Ok(self.hydrate(existing));
        }
        let conversation = Conversation::direct(a, b, now)?;
        self.deps.conversation_repository.save(&conversation).await?;
        info!(room_id = %conversation.id, "私聊会话已创建");
        Ok(conversation)
    }

    pub async fn get_conversation(
        &self,
        room_id: &str,
        requester_id: &str,
    ) -> Result<Conversation, ApplicationError> {
        let room_id = RoomId::parse(room_id)?;
        let requester = UserId::parse(requester_id)?;
        let conversation = self.load_conversation(&room_id).await?;
        ensure_member(&conversation, &requester)?;
        Ok(conversation)
    }

    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<MessageReceipt, ApplicationError> {
        let room_id = RoomId::parse(request.room_id)?;
        let sender_id = UserId::parse(request.sender_id)?;
        let receiver_id = request.receiver_id.map(UserId::parse).transpose()?;
        let reply_to = request.reply_to.map(MessageId::parse).transpose()?;

        let (message, event) = {
            let _guard = self.deps.locks.acquire(room_lock(&room_id)).await;
            let mut conversation = self.load_conversation(&room_id).await?;

            if let Some(reply_to) = &reply_to {
                let original = self.deps.message_repository.find_by_id(reply_to).await?;
                if !original.is_some_and(|m| m.room_id == room_id) {
                    return Err(DomainError::validation("reply_to", "回复的消息不在该会话中").into());
                }
            }

            let now = self.deps.clock.now();
            let recent_sends = self
                .deps
                .message_repository
                .count_sent_since(&room_id, &sender_id, now - self.deps.policy.rate_limit_window())
                .await?;

            let draft = MessageDraft {
                sender_id,
                receiver_id,
                content: request.content,
                reply_to,
            };
            let (message, event) =
                conversation.add_message(draft, recent_sends, &self.deps.policy, now)?;
            self.deps
                .conversation_repository
                .append_message(&conversation, &message)
                .await?;
            self.store_typing(&conversation);
            (message, event)
        };

        info!(
            room_id = %message.room_id,
            message_id = %message.id,
            sender_id = %message.sender_id,
            "消息已保存"
        );

        let dispatch = self.deps.dispatcher.dispatch(vec![event]).await;
        Ok(MessageReceipt { message, dispatch })
    }

    pub async fn list_messages(
        &self,
        room_id: &str,
        requester_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ApplicationError> {
        let conversation = self.get_conversation(room_id, requester_id).await?;
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        Ok(self
            .deps
            .message_repository
            .find_by_room_id(&conversation.id, limit)
            .await?)
    }

    pub async fn mark_as_delivered(
        &self,
        message_id: &str,
        receiver_id: &str,
    ) -> Result<MessageReceipt, ApplicationError> {
        let message_id = MessageId::parse(message_id)?;
        let receiver_id = UserId::parse(receiver_id)?;
        let room_id = self.room_of(&message_id).await?;

        let (message, events) = {
            let _guard = self.deps.locks.acquire(room_lock(&room_id)).await;
            let conversation = self.load_conversation(&room_id).await?;
            let mut message = self.load_message(&message_id).await?;
            let now = self.deps.clock.now();
            let event = conversation.mark_as_delivered(&mut message, &receiver_id, now)?;
            if event.is_some() {
                self.deps.message_repository.save(&message).await?;
            }
            (message, event.into_iter().collect::<Vec<_>>())
        };

        let dispatch = self.deps.dispatcher.dispatch(events).await;
        Ok(MessageReceipt { message, dispatch })
    }

    pub async fn mark_as_read(
        &self,
        request: MarkAsReadRequest,
    ) -> Result<MessageReceipt, ApplicationError> {
        let message_id = MessageId::parse(request.message_id)?;
        let reader_id = UserId::parse(request.reader_id)?;
        let room_id = self.room_of(&message_id).await?;

        let (message, events) = {
            let _guard = self.deps.locks.acquire(room_lock(&room_id)).await;
            let conversation = self.load_conversation(&room_id).await?;
            let mut message = self.load_message(&message_id).await?;
            let read_at = request.read_at.unwrap_or_else(|| self.deps.clock.now());
            let event = conversation.mark_as_read(&mut message, &reader_id, read_at)?;
            if event.is_some() {
                self.deps.message_repository.save(&message).await?;
            }
            (message, event.into_iter().collect::<Vec<_>>())
        };

        if events.is_empty() {
            info!(message_id = %message.id, "消息已是已读状态");
        }
        let dispatch = self.deps.dispatcher.dispatch(events).await;
        Ok(MessageReceipt { message, dispatch })
    }

    pub async fn edit_message(&self, request: EditMessageRequest) -> Result<Message, ApplicationError> {
        let message_id = MessageId::parse(request.message_id)?;
        let editor_id = UserId::parse(request.editor_id)?;
        let room_id = self.room_of(&message_id).await?;

        let _guard = self.deps.locks.acquire(room_lock(&room_id)).await;
        let conversation = self.load_conversation(&room_id).await?;
        let mut message = self.load_message(&message_id).await?;
        let now = self.deps.clock.now();
        conversation.edit_message(
            &mut message,
            &editor_id,
            &request.content,
            &self.deps.policy,
            now,
        )?;
        self.deps.message_repository.save(&message).await?;
        Ok(message)
    }

    /// 更新输入状态，返回当前正在输入的用户
    pub async fn set_typing(
        &self,
        room_id: &str,
        user_id: &str,
        is_typing: bool,
    ) -> Result<Vec<UserId>, ApplicationError> {
        let room_id = RoomId::parse(room_id)?;
        let user_id = UserId::parse(user_id)?;

        let _guard = self.deps.locks.acquire(room_lock(&room_id)).await;
        let mut conversation = self.load_conversation(&room_id).await?;
        if is_typing {
            conversation.mark_user_typing(&user_id)?;
        } else {
            conversation.mark_user_stopped_typing(&user_id)?;
        }
        self.store_typing(&conversation);
        Ok(conversation.typing_users().cloned().collect())
    }

    pub async fn add_participant(
        &self,
        room_id: &str,
        actor_id: &str,
        user_id: &str,
    ) -> Result<Conversation, ApplicationError> {
        let room_id = RoomId::parse(room_id)?;
        let actor_id = UserId::parse(actor_id)?;
        let user_id = UserId::parse(user_id)?;

        let _guard = self.deps.locks.acquire(room_lock(&room_id)).await;
        let mut conversation = self.load_conversation(&room_id).await?;
        ensure_member(&conversation, &actor_id)?;
        conversation.add_participant(user_id, &self.deps.policy, self.deps.clock.now())?;
        self.deps.conversation_repository.save(&conversation).await?;
        Ok(conversation)
    }

    pub async fn remove_participant(
        &self,
        room_id: &str,
        actor_id: &str,
        user_id: &str,
    ) -> Result<Conversation, ApplicationError> {
        let room_id = RoomId::parse(room_id)?;
        let actor_id = UserId::parse(actor_id)?;
        let user_id = UserId::parse(user_id)?;

        let _guard = self.deps.locks.acquire(room_lock(&room_id)).await;
        let mut conversation = self.load_conversation(&room_id).await?;
        ensure_member(&conversation, &actor_id)?;
        conversation.remove_participant(&user_id, self.deps.clock.now())?;
        self.deps.conversation_repository.save(&conversation).await?;
        self.store_typing(&conversation);
        Ok(conversation)
    }

    async fn load_conversation(&self, room_id: &RoomId) -> Result<Conversation, ApplicationError> {
        let conversation = self
            .deps
            .conversation_repository
            .find_by_id(room_id)
            .await?
            .ok_or_else(|| DomainError::not_found("conversation", room_id.as_str()))?;
        Ok(self.hydrate(conversation))
    }

    async fn load_message(&self, message_id: &MessageId) -> Result<Message, ApplicationError> {
        Ok(self
            .deps
            .message_repository
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| DomainError::not_found("message", message_id.as_str()))?)
    }

    async fn room_of(&self, message_id: &MessageId) -> Result<RoomId, ApplicationError> {
        Ok(self.load_message(message_id).await?.room_id)
    }

    fn hydrate(&self, mut conversation: Conversation) -> Conversation {
        let typing = self.typing.lock().unwrap_or_else(|p| p.into_inner());
        conversation.typing = typing.get(&conversation.id).cloned().unwrap_or_default();
        conversation
    }

    fn store_typing(&self, conversation: &Conversation) {
        let mut typing = self.typing.lock().unwrap_or_else(|p| p.into_inner());
        if conversation.typing.is_empty() {
            typing.remove(&conversation.id);
        } else {
            typing.insert(conversation.id.clone(), conversation.typing.clone());
        }
    }
}

fn room_lock(room_id: &RoomId) -> String {
    format!("room:{room_id}")
}

fn ensure_member(conversation: &Conversation, user_id: &UserId) -> Result<(), ApplicationError> {
    if !conversation.is_participant(user_id) {
        warn!(room_id = %conversation.id, user_id = %user_id, "非参与者访问会话");
        return Err(DomainError::not_participant(user_id.as_str()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::FailureKind;
    use crate::integration::RoutingKey;
    use crate::publisher::MockEventPublisher;
    use crate::repository::memory::InMemoryChatStore;
    use crate::retry::RetryConfig;
    use chrono::{Duration, Utc};
    use domain::MessageStatus;

    struct Fixture {
        service: ConversationService,
        store: Arc<InMemoryChatStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture(publisher: MockEventPublisher) -> Fixture {
        let store = Arc::new(InMemoryChatStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::new(publisher),
            clock.clone(),
            RetryConfig::none(),
        ));
        let service = ConversationService::new(ConversationServiceDependencies {
            conversation_repository: store.clone(),
            message_repository: store.clone(),
            dispatcher,
            clock: clock.clone(),
            locks: AggregateLocks::new(),
            policy: ChatPolicy::default(),
        });
        Fixture {
            service,
            store,
            clock,
        }
    }

    fn accepting_publisher() -> MockEventPublisher {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().returning(|_, _| Ok(()));
        publisher
    }

    async fn direct_room(service: &ConversationService) -> Conversation {
        service
            .create_conversation(CreateConversationRequest {
                creator_id: "u1".to_string(),
                participant_ids: vec!["u2".to_string()],
                is_group: false,
            })
            .await
            .unwrap()
    }

    fn send(room: &RoomId, from: &str, content: &str) -> SendMessageRequest {
        SendMessageRequest {
            room_id: room.to_string(),
            sender_id: from.to_string(),
            receiver_id: None,
            content: content.to_string(),
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn test_direct_conversation_is_reused() {
        let fx = fixture(accepting_publisher());
        let first = direct_room(&fx.service).await;
        let second = fx
            .service
            .create_conversation(CreateConversationRequest {
                creator_id: "u2".to_string(),
                participant_ids: vec!["u1".to_string()],
                is_group: false,
            })
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.id.as_str(), "direct_u1_u2");
    }

    #[tokio::test]
    async fn test_direct_conversation_rejects_ambiguous_user_ids() {
        let fx = fixture(MockEventPublisher::new());
        let err = fx
            .service
            .create_conversation(CreateConversationRequest {
                creator_id: "a_b".to_string(),
                participant_ids: vec!["c".to_string()],
                is_group: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);

        let err = fx
            .service
            .create_conversation(CreateConversationRequest {
                creator_id: "a".to_string(),
                participant_ids: vec!["b_c".to_string()],
                is_group: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);
        let stored = ConversationRepository::find_by_id(
            fx.store.as_ref(),
            &RoomId::parse("direct_a_b_c").unwrap(),
        )
        .await
        .unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn test_send_message_publishes_message_sent() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|key, body| *key == RoutingKey::MessageSent && body.contains("\"receiverId\":\"u2\""))
            .times(1)
            .returning(|_, _| Ok(()));
        let fx = fixture(publisher);
        let room = direct_room(&fx.service).await;

        let receipt = fx.service.send_message(send(&room.id, "u1", "hello")).await.unwrap();
        assert_eq!(receipt.message.status, MessageStatus::Sent);
        assert_eq!(receipt.dispatch.published, vec![RoutingKey::MessageSent]);

        let stored = fx.service.get_conversation(room.id.as_str(), "u2").await.unwrap();
        assert_eq!(stored.message_count, 1);
        assert_eq!(stored.last_message_id, Some(receipt.message.id));
    }

    #[tokio::test]
    async fn test_whitespace_content_writes_nothing() {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().never();
        let fx = fixture(publisher);
        let room = direct_room(&fx.service).await;

        let err = fx.service.send_message(send(&room.id, "u1", "   ")).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);

        let messages = fx.store.find_by_room_id(&room.id, 10).await.unwrap();
        assert!(messages.is_empty());
        let stored = fx.service.get_conversation(room.id.as_str(), "u1").await.unwrap();
        assert_eq!(stored.message_count, 0);
    }

    #[tokio::test]
    async fn test_eleventh_message_in_window_is_rate_limited() {
        let fx = fixture(accepting_publisher());
        let room = direct_room(&fx.service).await;

        for i in 0..10 {
            fx.service
                .send_message(send(&room.id, "u1", &format!("message {i}")))
                .await
                .unwrap();
            fx.clock.advance(Duration::seconds(1));
        }

        let err = fx.service.send_message(send(&room.id, "u1", "one more")).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::RateLimited);
        assert_eq!(fx.store.find_by_room_id(&room.id, 50).await.unwrap().len(), 10);

        // 另一位参与者不受影响
        fx.service.send_message(send(&room.id, "u2", "hi")).await.unwrap();

        // 窗口滑过之后可以继续发送
        fx.clock.advance(Duration::seconds(60));
        fx.service.send_message(send(&room.id, "u1", "later")).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_by_non_receiver_is_forbidden() {
        let fx = fixture(accepting_publisher());
        let room = direct_room(&fx.service).await;
        let receipt = fx.service.send_message(send(&room.id, "u1", "hi")).await.unwrap();

        let err = fx
            .service
            .mark_as_read(MarkAsReadRequest {
                message_id: receipt.message.id.to_string(),
                reader_id: "u1".to_string(),
                read_at: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Forbidden);

        let stored = MessageRepository::find_by_id(fx.store.as_ref(), &receipt.message.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn test_delivered_then_read_and_idempotent_read() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|key, _| *key == RoutingKey::MessageSent)
            .times(1)
            .returning(|_, _| Ok(()));
        publisher
            .expect_publish()
            .withf(|key, _| *key == RoutingKey::MessageDelivered)
            .times(1)
            .returning(|_, _| Ok(()));
        publisher
            .expect_publish()
            .withf(|key, _| *key == RoutingKey::MessageRead)
            .times(1)
            .returning(|_, _| Ok(()));
        let fx = fixture(publisher);
        let room = direct_room(&fx.service).await;
        let sent = fx.service.send_message(send(&room.id, "u1", "hi")).await.unwrap();
        let id = sent.message.id.to_string();

        let delivered = fx.service.mark_as_delivered(&id, "u2").await.unwrap();
        assert_eq!(delivered.message.status, MessageStatus::Delivered);

        let read_request = MarkAsReadRequest {
            message_id: id.clone(),
            reader_id: "u2".to_string(),
            read_at: None,
        };
        let read = fx.service.mark_as_read(read_request.clone()).await.unwrap();
        assert_eq!(read.message.status, MessageStatus::Read);

        let again = fx.service.mark_as_read(read_request).await.unwrap();
        assert_eq!(again.message.read_at, read.message.read_at);
        assert!(again.dispatch.published.is_empty());
    }

    #[tokio::test]
    async fn test_edit_within_window_only() {
        let fx = fixture(accepting_publisher());
        let room = direct_room(&fx.service).await;
        let sent = fx.service.send_message(send(&room.id, "u1", "helo")).await.unwrap();
        let edit = |content: &str| EditMessageRequest {
            message_id: sent.message.id.to_string(),
            editor_id: "u1".to_string(),
            content: content.to_string(),
        };

        let edited = fx.service.edit_message(edit("hello")).await.unwrap();
        assert_eq!(edited.content.as_str(), "hello");

        fx.clock.advance(Duration::minutes(3));
        let err = fx.service.edit_message(edit("hello!")).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Policy);
    }

    #[tokio::test]
    async fn test_typing_and_group_membership() {
        let fx = fixture(accepting_publisher());
        let group = fx
            .service
            .create_conversation(CreateConversationRequest {
                creator_id: "u1".to_string(),
                participant_ids: vec!["u2".to_string(), "u3".to_string()],
                is_group: true,
            })
            .await
            .unwrap();
        let room = group.id.to_string();

        let typing = fx.service.set_typing(&room, "u2", true).await.unwrap();
        assert_eq!(typing, vec![UserId::parse("u2").unwrap()]);
        let loaded = fx.service.get_conversation(&room, "u1").await.unwrap();
        assert_eq!(loaded.typing_users().count(), 1);

        let err = fx.service.set_typing(&room, "u9", true).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Policy);

        fx.service.remove_participant(&room, "u1", "u3").await.unwrap();
        let err = fx.service.remove_participant(&room, "u1", "u2").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Policy);

        let updated = fx.service.add_participant(&room, "u2", "u4").await.unwrap();
        assert_eq!(updated.participants.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_room_is_not_found() {
        let fx = fixture(accepting_publisher());
        let err = fx
            .service
            .send_message(send(&RoomId::parse("direct_x_y").unwrap(), "x", "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotFound);
    }
}
