use std::sync::Arc;

use domain::{DomainError, Timestamp, UserId};
use tracing::info;

use super::{FanOutReport, Notification, NotificationSender};
use crate::{clock::Clock, error::ApplicationError};

#[derive(Debug, Clone)]
pub struct LikeNotification {
    pub from_user_id: String,
    pub to_user_id: String,
    pub is_super_like: bool,
}

#[derive(Debug, Clone)]
pub struct MatchNotification {
    pub match_id: String,
    pub user1_id: String,
    pub user2_id: String,
    pub matched_at: Option<Timestamp>,
    pub is_super_like: bool,
}

pub struct NotificationService {
    sender: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
}

impl NotificationService {
    pub fn new(sender: Arc<dyn NotificationSender>, clock: Arc<dyn Clock>) -> Self {
        Self { sender, clock }
    }

    /// 通知被喜欢的一方
    pub async fn notify_like(&self, input: LikeNotification) -> Result<FanOutReport, ApplicationError> {
        let from_user_id = UserId::parse(input.from_user_id)?;
        let recipient = UserId::parse(input.to_user_id)?;

        let notification = Notification::Like {
            recipient,
            from_user_id,
            is_super_like: input.is_super_like,
            occurred_at: self.clock.now(),
        };
        self.deliver(notification).await
    }

    /// 通知配对双方
    pub async fn notify_match(&self, input: MatchNotification) -> Result<FanOutReport, ApplicationError> {
        let match_id = input.match_id.trim().to_string();
        if match_id.is_empty() {
            return Err(DomainError::validation("matchId", "配对ID不能为空").into());
        }
        let user1_id = UserId::parse(input.user1_id)?;
        let user2_id = UserId::parse(input.user2_id)?;
        if user1_id == user2_id {
            return Err(DomainError::validation("user2Id", "配对双方不能是同一用户").into());
        }

        let notification = Notification::Match {
            match_id,
            user1_id,
            user2_id,
            matched_at: input.matched_at,
            is_super_like: input.is_super_like,
            occurred_at: self.clock.now(),
        };
        self.deliver(notification).await
    }

    async fn deliver(&self, notification: Notification) -> Result<FanOutReport, ApplicationError> {
        let report = self
            .sender
            .send(&notification)
            .await
            .map_err(|err| ApplicationError::infrastructure(err.to_string()))?;
        info!(
            notification_type = notification.kind().as_str(),
            recipients = report.recipients,
            delivered = report.delivered,
            "通知已扇出"
        );
        Ok(report)
    }
}
