//! 内部通知入口：上游服务直接推送喜欢/配对通知，绕过消息代理

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use tracing::warn;

use application::{ApplicationError, FailureKind, LikeNotification, MatchNotification};
use domain::Timestamp;

use crate::{dto::NotifyResponse, error::ApiError, state::AppState};

/// 同时接受 snake_case 与 camelCase 字段名
#[derive(Debug, Default, Deserialize)]
struct MatchFields {
    #[serde(alias = "matchId")]
    id: Option<String>,
    #[serde(alias = "user1Id")]
    user1_id: Option<String>,
    #[serde(alias = "user2Id")]
    user2_id: Option<String>,
    #[serde(alias = "matchedAt")]
    matched_at: Option<Timestamp>,
    #[serde(alias = "isSuperLike")]
    is_super_like: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LikeNotifyPayload {
    user_id: Option<String>,
    target_user_id: Option<String>,
    is_super_like: Option<bool>,
    #[serde(rename = "match")]
    match_fields: Option<MatchFields>,
}

impl LikeNotifyPayload {
    /// 逐个字段解析：顶层字段优先，缺失时回退到 `match` 对象
    fn resolve(self) -> Option<LikeNotification> {
        let fields = self.match_fields.unwrap_or_default();
        let from_user_id = present(self.user_id).or_else(|| present(fields.user1_id))?;
        let to_user_id = present(self.target_user_id).or_else(|| present(fields.user2_id))?;
        Some(LikeNotification {
            from_user_id,
            to_user_id,
            is_super_like: self
                .is_super_like
                .or(fields.is_super_like)
                .unwrap_or(false),
        })
    }
}

#[derive(Debug, Deserialize)]
struct MatchNotifyPayload {
    #[serde(rename = "match")]
    match_fields: Option<MatchFields>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/notify/like", post(notify_like))
        .route("/notify/match", post(notify_match))
}

async fn notify_like(
    State(state): State<AppState>,
    payload: Result<Json<LikeNotifyPayload>, JsonRejection>,
) -> Result<Json<NotifyResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    let Some(notification) = payload.resolve() else {
        return Err(ApiError::bad_request("Missing like notification data"));
    };

    let report = state
        .notification_service
        .notify_like(notification)
        .await
        .map_err(notify_error)?;

    Ok(Json(report.into()))
}

async fn notify_match(
    State(state): State<AppState>,
    payload: Result<Json<MatchNotifyPayload>, JsonRejection>,
) -> Result<Json<NotifyResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let Some(fields) = payload.match_fields else {
        return Err(ApiError::bad_request("Missing match data"));
    };

    let (Some(match_id), Some(user1_id), Some(user2_id)) = (
        present(fields.id),
        present(fields.user1_id),
        present(fields.user2_id),
    ) else {
        return Err(ApiError::bad_request("Invalid match data"));
    };

    let report = state
        .notification_service
        .notify_match(MatchNotification {
            match_id,
            user1_id,
            user2_id,
            matched_at: fields.matched_at,
            is_super_like: fields.is_super_like.unwrap_or(false),
        })
        .await
        .map_err(notify_error)?;

    Ok(Json(report.into()))
}

/// 空白字符串视同缺失
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn notify_error(error: ApplicationError) -> ApiError {
    match error.kind() {
        FailureKind::Validation => ApiError::bad_request(error.to_string()),
        _ => {
            warn!(error = %error, "通知投递失败");
            ApiError::internal_server_error("Failed to deliver notification")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_fields_accept_both_casings() {
        let snake: MatchNotifyPayload = serde_json::from_str(
            r#"{"match":{"id":"m1","user1_id":"a","user2_id":"b","is_super_like":true}}"#,
        )
        .unwrap();
        let camel: MatchNotifyPayload = serde_json::from_str(
            r#"{"match":{"matchId":"m1","user1Id":"a","user2Id":"b","matchedAt":"2024-05-01T10:00:00Z"}}"#,
        )
        .unwrap();

        let snake = snake.match_fields.unwrap();
        assert_eq!(snake.id.as_deref(), Some("m1"));
        assert_eq!(snake.is_super_like, Some(true));

        let camel = camel.match_fields.unwrap();
        assert_eq!(camel.user2_id.as_deref(), Some("b"));
        assert!(camel.matched_at.is_some());
    }

    fn like_payload(json: &str) -> LikeNotifyPayload {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_like_fields_prefer_top_level_then_match() {
        let resolved = like_payload(
            r#"{"userId":"a","isSuperLike":false,"match":{"user1_id":"x","user2_id":"b","is_super_like":true}}"#,
        )
        .resolve()
        .unwrap();
        assert_eq!(resolved.from_user_id, "a");
        assert_eq!(resolved.to_user_id, "b");
        assert!(!resolved.is_super_like);

        let resolved = like_payload(
            r#"{"userId":"  ","targetUserId":"c","match":{"user1Id":"a","isSuperLike":true}}"#,
        )
        .resolve()
        .unwrap();
        assert_eq!(resolved.from_user_id, "a");
        assert_eq!(resolved.to_user_id, "c");
        assert!(resolved.is_super_like);

        assert!(like_payload(r#"{"targetUserId":"c","match":{}}"#)
            .resolve()
            .is_none());
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        assert_eq!(present(Some("  ".to_string())), None);
        assert_eq!(present(Some("u1".to_string())), Some("u1".to_string()));
    }
}
