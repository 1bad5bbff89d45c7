use application::{ApplicationError, FailureKind};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::DomainError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        let message = error.to_string();
        match error.kind() {
            FailureKind::Validation => {
                ApiError::new(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", message)
            }
            FailureKind::Policy => {
                let code = match error {
                    ApplicationError::Domain(DomainError::NotParticipant { .. }) => {
                        "NOT_PARTICIPANT"
                    }
                    _ => "POLICY_VIOLATION",
                };
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
            }
            FailureKind::Forbidden => ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", message),
            FailureKind::RateLimited => {
                ApiError::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", message)
            }
            FailureKind::NotFound => ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", message),
            FailureKind::Transient => {
                tracing::error!(error = %message, "请求处理时依赖不可用");
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::RepositoryError;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ApplicationError, StatusCode)> = vec![
            (
                DomainError::validation("content", "empty").into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                DomainError::not_participant("u9").into(),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (DomainError::forbidden("read").into(), StatusCode::FORBIDDEN),
            (
                DomainError::RateLimited {
                    limit: 10,
                    window_secs: 60,
                }
                .into(),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                DomainError::not_found("conversation", "x").into(),
                StatusCode::NOT_FOUND,
            ),
            (
                RepositoryError::storage("down").into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status(), expected);
        }
    }
}
