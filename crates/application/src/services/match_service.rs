use std::sync::Arc;

use domain::{Match, MatchOutcome, UserId};
use tracing::info;

use crate::{
    clock::Clock,
    dispatcher::{DispatchReport, EventDispatcher},
    error::ApplicationError,
    lock::AggregateLocks,
    repository::MatchRepository,
};

#[derive(Debug, Clone)]
pub struct LikeRequest {
    pub user_id: String,
    pub target_user_id: String,
    pub is_super_like: bool,
}

#[derive(Debug, Clone)]
pub struct DislikeRequest {
    pub user_id: String,
    pub target_user_id: String,
}

/// 一次喜欢/不喜欢的结果：已提交的配对记录以及事件发布情况
#[derive(Debug, Clone)]
pub struct MatchDecision {
    pub outcome: MatchOutcome,
    pub record: Match,
    pub dispatch: DispatchReport,
}

pub struct MatchServiceDependencies {
    pub match_repository: Arc<dyn MatchRepository>,
    pub dispatcher: Arc<EventDispatcher>,
    pub clock: Arc<dyn Clock>,
    pub locks: Arc<AggregateLocks>,
}

pub struct MatchService {
    deps: MatchServiceDependencies,
}

impl MatchService {
    pub fn new(deps: MatchServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn like(&self, request: LikeRequest) -> Result<MatchDecision, ApplicationError> {
        let actor = UserId::parse(request.user_id)?;
        let target = UserId::parse(request.target_user_id)?;
        let (user1, user2) = Match::pair_key(&actor, &target)?;

        let (outcome, record, events) = {
            let _guard = self.deps.locks.acquire(lock_key(&user1, &user2)).await;
            let now = self.deps.clock.now();
            let mut record = self.load_or_open(&user1, &user2, now).await?;
            let (outcome, events) = record.like(&actor, request.is_super_like, now)?;
            let record = self.deps.match_repository.save(&record).await?;
            (outcome, record, events)
        };

        info!(
            user_id = %actor,
            target_user_id = %target,
            outcome = outcome.as_str(),
            "喜欢操作已提交"
        );

        let dispatch = self.deps.dispatcher.dispatch(events).await;
        Ok(MatchDecision {
            outcome,
            record,
            dispatch,
        })
    }

    pub async fn dislike(&self, request: DislikeRequest) -> Result<MatchDecision, ApplicationError> {
        let actor = UserId::parse(request.user_id)?;
        let target = UserId::parse(request.target_user_id)?;
        let (user1, user2) = Match::pair_key(&actor, &target)?;

        let (outcome, record, events) = {
            let _guard = self.deps.locks.acquire(lock_key(&user1, &user2)).await;
            let now = self.deps.clock.now();
            let mut record = self.load_or_open(&user1, &user2, now).await?;
            let (outcome, events) = record.dislike(&actor, now)?;
            let record = self.deps.match_repository.save(&record).await?;
            (outcome, record, events)
        };

        info!(user_id = %actor, target_user_id = %target, "不喜欢操作已提交");

        let dispatch = self.deps.dispatcher.dispatch(events).await;
        Ok(MatchDecision {
            outcome,
            record,
            dispatch,
        })
    }

    /// 用户已成立的配对
    pub async fn list_confirmed(&self, user_id: &str) -> Result<Vec<Match>, ApplicationError> {
        let user_id = UserId::parse(user_id)?;
        Ok(self.deps.match_repository.list_confirmed(&user_id).await?)
    }

    async fn load_or_open(
        &self,
        user1: &UserId,
        user2: &UserId,
        now: domain::Timestamp,
    ) -> Result<Match, ApplicationError> {
        let existing = self
            .deps
            .match_repository
            .find_between_users(user1, user2)
            .await?;
        match existing {
            Some(record) => Ok(record),
            None => Ok(Match::open(user1, user2, now)?),
        }
    }
}

fn lock_key(user1: &UserId, user2: &UserId) -> String {
    format!("match:{user1}:{user2}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::integration::RoutingKey;
    use crate::publisher::{MockEventPublisher, PublishError};
    use crate::repository::memory::InMemoryMatchRepository;
    use crate::retry::RetryConfig;
    use domain::DomainError;

    fn service_with(publisher: MockEventPublisher) -> (MatchService, Arc<InMemoryMatchRepository>) {
        let repository = Arc::new(InMemoryMatchRepository::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::new(publisher),
            clock.clone(),
            RetryConfig::none(),
        ));
        let service = MatchService::new(MatchServiceDependencies {
            match_repository: repository.clone(),
            dispatcher,
            clock,
            locks: AggregateLocks::new(),
        });
        (service, repository)
    }

    fn like(from: &str, to: &str, is_super_like: bool) -> LikeRequest {
        LikeRequest {
            user_id: from.to_string(),
            target_user_id: to.to_string(),
            is_super_like,
        }
    }

    #[tokio::test]
    async fn test_mutual_like_publishes_match_created_once() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|key, _| *key == RoutingKey::LikeSent)
            .times(1)
            .returning(|_, _| Ok(()));
        publisher
            .expect_publish()
            .withf(|key, body| {
                *key == RoutingKey::MatchCreated
                    && body.contains("\"user1Id\":\"u1\"")
                    && body.contains("\"user2Id\":\"u2\"")
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let (service, _) = service_with(publisher);

        let first = service.like(like("u1", "u2", false)).await.unwrap();
        assert_eq!(first.outcome, MatchOutcome::LikeSent);
        assert!(first.record.matched_at.is_none());

        let second = service.like(like("u2", "u1", false)).await.unwrap();
        assert_eq!(second.outcome, MatchOutcome::Created);
        let matched_at = second.record.matched_at;
        assert!(matched_at.is_some());
        assert_eq!(second.dispatch.published, vec![RoutingKey::MatchCreated]);

        // 再次喜欢不会产生第二次配对事件
        let third = service.like(like("u1", "u2", false)).await.unwrap();
        assert_eq!(third.outcome, MatchOutcome::AlreadyMatched);
        assert_eq!(third.record.matched_at, matched_at);
        assert!(third.dispatch.published.is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_committed_state() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .returning(|_, _| Err(PublishError::connection("broker down")));
        let (service, repository) = service_with(publisher);

        let decision = service.like(like("u1", "u2", true)).await.unwrap();
        assert_eq!(decision.outcome, MatchOutcome::SuperLikeSent);
        assert_eq!(decision.dispatch.unpublished, vec![RoutingKey::SuperLikeSent]);

        let stored = repository
            .find_between_users(&UserId::parse("u1").unwrap(), &UserId::parse("u2").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(stored.user1_liked);
        assert!(stored.is_super_like);
    }

    #[tokio::test]
    async fn test_dislike_after_match_keeps_it_confirmed() {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().returning(|_, _| Ok(()));
        let (service, _) = service_with(publisher);

        service.like(like("u1", "u2", false)).await.unwrap();
        service.like(like("u2", "u1", false)).await.unwrap();
        let decision = service
            .dislike(DislikeRequest {
                user_id: "u2".to_string(),
                target_user_id: "u1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(decision.outcome, MatchOutcome::DislikeSent);
        assert_eq!(decision.dispatch.published, vec![RoutingKey::DislikeSent]);
        assert!(decision.record.matched_at.is_some());

        let confirmed = service.list_confirmed("u1").await.unwrap();
        assert_eq!(confirmed.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_input_publishes_nothing() {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().never();
        let (service, _) = service_with(publisher);

        let err = service.like(like("u1", "u1", false)).await.unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::Validation { .. })
        ));
        let err = service.like(like("u1", " ", false)).await.unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_likes_on_same_pair_match_exactly_once() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|key, _| *key == RoutingKey::MatchCreated)
            .times(1)
            .returning(|_, _| Ok(()));
        publisher
            .expect_publish()
            .withf(|key, _| *key != RoutingKey::MatchCreated)
            .returning(|_, _| Ok(()));
        let (service, _) = service_with(publisher);
        let service = Arc::new(service);

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    let request = if i % 2 == 0 {
                        like("u1", "u2", false)
                    } else {
                        like("u2", "u1", false)
                    };
                    service.like(request).await.unwrap().outcome
                })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            if task.await.unwrap() == MatchOutcome::Created {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }
}
