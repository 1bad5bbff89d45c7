//! 配对聚合
//!
//! 一对用户之间只有一条记录，双方的喜欢标记都在这条记录上。
//! 两个标记第一次同时为真时写入 `matched_at`，之后再也不会清空。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::events::{DomainEvent, DomainEventKind};
use crate::value_objects::{MatchId, Timestamp, UserId};

/// 一次喜欢/不喜欢操作的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    #[serde(rename = "MATCH_CREATED")]
    Created,
    #[serde(rename = "MATCH_SUPER_LIKE_SENT")]
    SuperLikeSent,
    #[serde(rename = "MATCH_LIKE_SENT")]
    LikeSent,
    #[serde(rename = "MATCH_DISLIKE_SENT")]
    DislikeSent,
    /// 配对早已成立，本次喜欢不产生任何事件
    #[serde(rename = "ALREADY_MATCHED")]
    AlreadyMatched,
}

impl MatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "MATCH_CREATED",
            Self::SuperLikeSent => "MATCH_SUPER_LIKE_SENT",
            Self::LikeSent => "MATCH_LIKE_SENT",
            Self::DislikeSent => "MATCH_DISLIKE_SENT",
            Self::AlreadyMatched => "ALREADY_MATCHED",
        }
    }
}

/// 配对实体
///
/// `user1_id < user2_id` 恒成立，谁先操作都落到同一条记录上。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub user1_id: UserId,
    pub user2_id: UserId,
    pub user1_liked: bool,
    pub user2_liked: bool,
    /// 只要有一方超级喜欢过就保持为真
    pub is_super_like: bool,
    pub matched_at: Option<Timestamp>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Match {
    /// 按排序后的用户对创建一条空记录
    pub fn open(a: &UserId, b: &UserId, now: Timestamp) -> DomainResult<Self> {
        let (user1_id, user2_id) = Self::pair_key(a, b)?;
        Ok(Self {
            id: MatchId::generate(),
            user1_id,
            user2_id,
            user1_liked: false,
            user2_liked: false,
            is_super_like: false,
            matched_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// 规范化的用户对，自己对自己操作视为输入错误
    pub fn pair_key(a: &UserId, b: &UserId) -> DomainResult<(UserId, UserId)> {
        if a == b {
            return Err(DomainError::validation(
                "target_user_id",
                "不能对自己进行操作",
            ));
        }
        if a < b {
            Ok((a.clone(), b.clone()))
        } else {
            Ok((b.clone(), a.clone()))
        }
    }

    pub fn is_participant(&self, user_id: &UserId) -> bool {
        &self.user1_id == user_id || &self.user2_id == user_id
    }

    pub fn is_matched(&self) -> bool {
        self.matched_at.is_some()
    }

    /// 另一方
    pub fn counterpart(&self, user_id: &UserId) -> &UserId {
        if &self.user1_id == user_id {
            &self.user2_id
        } else {
            &self.user1_id
        }
    }

    /// 喜欢对方
    ///
    /// 结果按优先级判定：双方都喜欢时为配对成立（仅第一次），
    /// 否则按是否超级喜欢区分。
    pub fn like(
        &mut self,
        actor: &UserId,
        is_super_like: bool,
        now: Timestamp,
    ) -> DomainResult<(MatchOutcome, Vec<DomainEvent>)> {
        self.ensure_participant(actor)?;
        let target = self.counterpart(actor).clone();

        // 已配对且双方仍互相喜欢时重复喜欢，不改动任何字段
        if self.matched_at.is_some() && self.user1_liked && self.user2_liked {
            return Ok((MatchOutcome::AlreadyMatched, Vec::new()));
        }

        self.set_flag(actor, true);
        if is_super_like {
            self.is_super_like = true;
        }
        self.updated_at = now;

        if self.user1_liked && self.user2_liked {
            if self.matched_at.is_some() {
                return Ok((MatchOutcome::AlreadyMatched, Vec::new()));
            }
            self.matched_at = Some(now);
            let event = DomainEvent::new(
                self.id.to_string(),
                DomainEventKind::MatchCreated {
                    match_id: self.id,
                    user1_id: self.user1_id.clone(),
                    user2_id: self.user2_id.clone(),
                    matched_at: now,
                    is_super_like: self.is_super_like,
                },
                now,
            );
            return Ok((MatchOutcome::Created, vec![event]));
        }

        let (outcome, kind) = if is_super_like {
            (
                MatchOutcome::SuperLikeSent,
                DomainEventKind::SuperLikeSent {
                    from_user_id: actor.clone(),
                    to_user_id: target,
                },
            )
        } else {
            (
                MatchOutcome::LikeSent,
                DomainEventKind::LikeSent {
                    from_user_id: actor.clone(),
                    to_user_id: target,
                },
            )
        };
        Ok((outcome, vec![DomainEvent::new(self.id.to_string(), kind, now)]))
    }

    /// 不喜欢对方，不会影响已经成立的配对时间
    pub fn dislike(
        &mut self,
        actor: &UserId,
        now: Timestamp,
    ) -> DomainResult<(MatchOutcome, Vec<DomainEvent>)> {
        self.ensure_participant(actor)?;
        let target = self.counterpart(actor).clone();

        self.set_flag(actor, false);
        self.updated_at = now;

        let event = DomainEvent::new(
            self.id.to_string(),
            DomainEventKind::DislikeSent {
                from_user_id: actor.clone(),
                to_user_id: target,
            },
            now,
        );
        Ok((MatchOutcome::DislikeSent, vec![event]))
    }

    fn set_flag(&mut self, actor: &UserId, liked: bool) {
        if &self.user1_id == actor {
            self.user1_liked = liked;
        } else {
            self.user2_liked = liked;
        }
    }

    fn ensure_participant(&self, user_id: &UserId) -> DomainResult<()> {
        if !self.is_participant(user_id) {
            return Err(DomainError::not_participant(user_id.as_str()));
        }
        Ok(())
    }
}
