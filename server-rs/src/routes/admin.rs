use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::models::comment::*;
use crate::routes::{parse_id, AppJson, AppQuery, PageQuery};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ReportedQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// pending, resolved, dismissed or escalated; open reports when unset.
    pub status: Option<String>,
}

pub async fn moderation_queue(
    State(state): State<AppState>,
    AppQuery(q): AppQuery<PageQuery>,
) -> AppResult<Json<Value>> {
    let (comments, pagination) = state
        .comments
        .moderation_queue(q.page.unwrap_or(1), q.limit.unwrap_or(0))
        .await?;
    Ok(Json(json!({
        "success": true,
        "data": comments,
        "pagination": pagination,
    })))
}

pub async fn moderate_comment(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<String>,
    AppJson(body): AppJson<ModerateRequest>,
) -> AppResult<Json<Value>> {
    let id = parse_id(&id, "comment")?;
    let comment = state
        .comments
        .moderate(id, admin.id, &body.action, body.reason)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Comment {}", comment.moderation.status),
        "data": comment,
    })))
}

pub async fn bulk_moderate(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    AppJson(body): AppJson<BulkModerateRequest>,
) -> AppResult<Json<Value>> {
    let cap = state.config.comments.bulk_limit;
    if body.comment_ids.is_empty() {
        return Err(AppError::BadRequest("commentIds must not be empty".into()));
    }
    if body.comment_ids.len() > cap {
        return Err(AppError::BadRequest(format!(
            "At most {cap} comments can be moderated at once"
        )));
    }

    let outcome = state
        .comments
        .bulk_moderate(&body.comment_ids, admin.id, &body.action, body.reason)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": format!(
            "{} moderated, {} failed",
            outcome.successful.len(),
            outcome.failed.len()
        ),
        "data": outcome,
    })))
}

pub async fn auto_moderate(
    State(state): State<AppState>,
    body: Option<AppJson<AutoModerateRequest>>,
) -> AppResult<Json<Value>> {
    let req = body.map(|AppJson(b)| b).unwrap_or_default();
    let report = state.comments.auto_moderate(&req).await?;
    Ok(Json(json!({ "success": true, "data": report })))
}

pub async fn reported(
    State(state): State<AppState>,
    AppQuery(q): AppQuery<ReportedQuery>,
) -> AppResult<Json<Value>> {
    let resolution = q
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<FlagResolution>)
        .transpose()
        .map_err(AppError::BadRequest)?;
    let (comments, pagination) = state
        .comments
        .reported(resolution, q.page.unwrap_or(1), q.limit.unwrap_or(0))
        .await?;
    Ok(Json(json!({
        "success": true,
        "data": comments,
        "pagination": pagination,
    })))
}

pub async fn resolve_report(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Option<AppJson<ResolveReportRequest>>,
) -> AppResult<Json<Value>> {
    let id = parse_id(&id, "comment")?;
    let req = body.map(|AppJson(b)| b).unwrap_or_default();
    let comment = state.comments.resolve_report(id, admin.id, req).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Report resolved",
        "data": comment,
    })))
}

pub async fn dismiss_report(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let id = parse_id(&id, "comment")?;
    let comment = state.comments.dismiss_report(id, admin.id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Report dismissed",
        "data": comment,
    })))
}

pub async fn hard_delete(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Option<AppJson<HardDeleteRequest>>,
) -> AppResult<Json<Value>> {
    let id = parse_id(&id, "comment")?;
    let reason = body.and_then(|AppJson(b)| b.reason);
    let deleted = state.comments.hard_delete(id, admin.id, reason).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Comment permanently deleted",
        "data": { "id": deleted.comment.id },
    })))
}

pub async fn audit_log(
    State(state): State<AppState>,
    AppQuery(q): AppQuery<PageQuery>,
) -> AppResult<Json<Value>> {
    let (records, pagination) = state
        .comments
        .audit_log(q.page.unwrap_or(1), q.limit.unwrap_or(0))
        .await?;
    Ok(Json(json!({
        "success": true,
        "data": records,
        "pagination": pagination,
    })))
}
