use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::services::moderation::{caps_ratio, special_char_ratio};
use crate::AppState;

const MAX_GUARDED_BODY: usize = 64 * 1024;

#[derive(Deserialize)]
struct ContentBody {
    content: Option<String>,
}

/// Buffers the body and pulls out `content`; the request is rebuilt untouched.
async fn take_content(req: Request) -> Result<(Request, Option<String>), AppError> {
    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_GUARDED_BODY)
        .await
        .map_err(|_| AppError::BadRequest("Request body too large".into()))?;
    let content = serde_json::from_slice::<ContentBody>(&bytes)
        .ok()
        .and_then(|b| b.content);
    Ok((Request::from_parts(parts, Body::from(bytes)), content))
}

/// Stateless shape checks on comment text.
pub fn check_content(content: &str, max_length: usize) -> Result<(), AppError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("Comment content cannot be empty".into()));
    }
    let len = trimmed.chars().count();
    if len > max_length {
        return Err(AppError::BadRequest(format!(
            "Comment exceeds {max_length} characters"
        )));
    }
    if len > 10 && caps_ratio(trimmed) > 0.7 {
        return Err(AppError::BadRequest(
            "Please avoid writing in all capital letters".into(),
        ));
    }
    if special_char_ratio(trimmed) > 0.5 {
        return Err(AppError::BadRequest(
            "Comment contains too many special characters".into(),
        ));
    }
    Ok(())
}

/// Middleware: content guard for create and edit.
pub async fn content_guard(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (req, content) = take_content(req).await?;
    // missing or malformed bodies are left to the handler's extractor
    if let Some(content) = content {
        check_content(&content, state.config.comments.max_length)?;
    }
    Ok(next.run(req).await)
}

/// Middleware: per-author posting velocity and duplicate-content guard.
pub async fn velocity_guard(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(user) = req.extensions().get::<AuthUser>().copied() else {
        return Ok(next.run(req).await);
    };
    if user.role.is_admin() {
        return Ok(next.run(req).await);
    }

    let (req, content) = take_content(req).await?;
    let store = state.comments.store();
    let limits = &state.config.rate_limit;
    let now = Utc::now();

    match store
        .count_recent_by_author(user.id, now - Duration::hours(1))
        .await
    {
        Ok(count) if count >= i64::from(limits.velocity_max_per_hour) => {
            tracing::info!(user_id = %user.id, count, "posting velocity exceeded");
            return Err(AppError::RateLimited(
                "You are posting too quickly, please try again later".into(),
            ));
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("velocity guard skipped: {e}"),
    }

    if let Some(content) = content {
        let since = now - Duration::seconds(limits.duplicate_window_secs);
        match store
            .has_recent_duplicate(user.id, content.trim(), since)
            .await
        {
            Ok(true) => {
                return Err(AppError::RateLimited(
                    "Duplicate comment detected, please wait before reposting".into(),
                ))
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("duplicate guard skipped: {e}"),
        }
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_guard_rejects_bad_shapes() {
        assert!(check_content("   ", 2000).is_err());
        assert!(check_content(&"a".repeat(2001), 2000).is_err());
        assert!(check_content("THIS IS ALL SHOUTING", 2000).is_err());
        assert!(check_content("!!!???###$$$ ok", 2000).is_err());
    }

    #[test]
    fn content_guard_accepts_normal_text() {
        assert!(check_content("Loved the twist in this chapter!", 2000).is_ok());
        assert!(check_content("OK", 2000).is_ok());
    }
}
