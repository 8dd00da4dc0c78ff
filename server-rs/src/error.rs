use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

/// Errors surfaced at the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) | AppError::Jwt(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_) | AppError::Redis(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::RateLimited(msg) => msg.clone(),
            AppError::Jwt(_) => "Invalid token".to_string(),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                "Internal server error".to_string()
            }
            AppError::Redis(e) => {
                tracing::error!("Redis error: {e}");
                "Internal server error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                "Internal server error".to_string()
            }
        };

        let body = json!({ "success": false, "message": message });
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Domain failures of the comment core.
#[derive(Debug, thiserror::Error)]
pub enum CommentError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Comment content cannot be empty")]
    EmptyContent,

    #[error("Comment exceeds {max} characters")]
    ContentTooLong { max: usize },

    #[error("Parent comment {0} not found")]
    ParentNotFound(Uuid),

    #[error("Comment {0} not found")]
    CommentNotFound(Uuid),

    #[error("Comment {0} has no reports")]
    NoOpenReport(Uuid),

    #[error("Only the author can edit a comment, within the edit window")]
    NotOwnerOrExpired,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Comment has already been removed")]
    AlreadyRemoved,

    #[error("Comment is not active")]
    CommentNotActive,

    #[error("You cannot flag your own comment")]
    SelfFlagNotAllowed,

    #[error("You have already flagged this comment")]
    AlreadyFlagged,

    #[error("Invalid moderation action: {0}")]
    InvalidAction(String),

    #[error("Cannot move comment from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("No level-1 ancestor found for comment {0}")]
    ParentResolution(Uuid),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CommentResult<T> = Result<T, CommentError>;

impl From<CommentError> for AppError {
    fn from(err: CommentError) -> Self {
        let message = err.to_string();
        match err {
            CommentError::InvalidTarget(_)
            | CommentError::EmptyContent
            | CommentError::ContentTooLong { .. }
            | CommentError::InvalidAction(_) => AppError::BadRequest(message),
            CommentError::ParentNotFound(_)
            | CommentError::CommentNotFound(_)
            | CommentError::NoOpenReport(_) => AppError::NotFound(message),
            CommentError::NotOwnerOrExpired
            | CommentError::PermissionDenied(_)
            | CommentError::SelfFlagNotAllowed => AppError::Forbidden(message),
            CommentError::AlreadyRemoved
            | CommentError::CommentNotActive
            | CommentError::AlreadyFlagged
            | CommentError::InvalidTransition { .. } => AppError::Conflict(message),
            CommentError::ParentResolution(_) | CommentError::InvariantViolation(_) => {
                AppError::Internal(message)
            }
            CommentError::Database(e) => AppError::Database(e),
            CommentError::Serialization(e) => AppError::Internal(e.to_string()),
        }
    }
}

/// Failure of a best-effort side effect (counter bump, notification).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{effect} failed: {message}")]
pub struct SideEffectError {
    pub effect: &'static str,
    pub message: String,
}

impl SideEffectError {
    pub fn new(effect: &'static str, message: impl Into<String>) -> Self {
        Self {
            effect,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_errors_map_to_http_kinds() {
        let cases = [
            (CommentError::ContentTooLong { max: 2000 }, StatusCode::BAD_REQUEST),
            (CommentError::ParentNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (CommentError::SelfFlagNotAllowed, StatusCode::FORBIDDEN),
            (CommentError::AlreadyRemoved, StatusCode::CONFLICT),
            (CommentError::ParentResolution(Uuid::nil()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }
}
