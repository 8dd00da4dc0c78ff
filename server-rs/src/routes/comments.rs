use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::rate_limit::ip_from_parts;
use crate::models::comment::*;
use crate::routes::{parse_id, parse_optional_id, AppJson, AppQuery};
use crate::services::comment_service::ClientInfo;
use crate::services::store::{ListQuery, ListSort};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(alias = "storyId")]
    pub story_id: Option<String>,
    #[serde(alias = "chapterId")]
    pub chapter_id: Option<String>,
    #[serde(alias = "parentId")]
    pub parent_id: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort: Option<String>,
    #[serde(alias = "includeReplies")]
    pub include_replies: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    #[serde(alias = "storyId")]
    pub story_id: Option<String>,
}

fn parse_sort(raw: Option<&str>) -> AppResult<ListSort> {
    match raw {
        None | Some("") | Some("newest") => Ok(ListSort::Newest),
        Some("oldest") => Ok(ListSort::Oldest),
        Some("popular") => Ok(ListSort::Popular),
        Some(other) => Err(AppError::BadRequest(format!("Unknown sort '{other}'"))),
    }
}

fn require_story(raw: Option<&str>) -> AppResult<uuid::Uuid> {
    parse_optional_id(raw, "story")?
        .ok_or_else(|| AppError::BadRequest("story_id is required".into()))
}

pub async fn list_comments(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    AppQuery(q): AppQuery<ListParams>,
) -> AppResult<Json<Value>> {
    let query = ListQuery {
        story_id: require_story(q.story_id.as_deref())?,
        chapter_id: parse_optional_id(q.chapter_id.as_deref(), "chapter")?,
        parent_id: parse_optional_id(q.parent_id.as_deref(), "parent")?,
        page: q.page.unwrap_or(1),
        limit: q.limit.unwrap_or(0),
        sort: parse_sort(q.sort.as_deref())?,
    };
    let viewer = user.map(|Extension(u)| u.viewer());

    let page = state
        .comments
        .list_comments(query, q.include_replies.unwrap_or(false), viewer)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": page.comments,
        "pagination": page.pagination,
    })))
}

pub async fn comment_stats(
    State(state): State<AppState>,
    AppQuery(q): AppQuery<StatsParams>,
) -> AppResult<Json<Value>> {
    let story_id = require_story(q.story_id.as_deref())?;
    let stats = state.comments.comment_stats(story_id).await?;
    Ok(Json(json!({ "success": true, "data": stats })))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    AppJson(body): AppJson<CreateCommentRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let client = ClientInfo {
        ip: ip_from_parts(connect.map(|ConnectInfo(addr)| addr), &headers),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    };

    let created = state
        .comments
        .create_comment(user.id, body, &client)
        .await?;

    let message = if created.quote.is_some() {
        "Reply added as a quote"
    } else {
        "Comment created"
    };
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": message,
            "data": {
                "comment": created.comment,
                "quote": created.quote,
            },
        })),
    ))
}

pub async fn update_comment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(comment_id): Path<String>,
    AppJson(body): AppJson<UpdateCommentRequest>,
) -> AppResult<Json<Value>> {
    let id = parse_id(&comment_id, "comment")?;
    let comment = state.comments.update_comment(id, user.id, body).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Comment updated",
        "data": comment,
    })))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(comment_id): Path<String>,
    body: Option<AppJson<DeleteCommentRequest>>,
) -> AppResult<Json<Value>> {
    let id = parse_id(&comment_id, "comment")?;
    let reason = body.and_then(|AppJson(b)| b.reason);
    let deleted = state
        .comments
        .delete_comment(id, user.viewer(), reason)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Comment deleted",
        "data": { "id": deleted.comment.id, "status": deleted.comment.moderation.status },
    })))
}

pub async fn react(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(comment_id): Path<String>,
    AppJson(body): AppJson<ReactRequest>,
) -> AppResult<Json<Value>> {
    let id = parse_id(&comment_id, "comment")?;
    let outcome = state
        .comments
        .toggle_reaction(id, user.id, body.action)
        .await?;
    Ok(Json(json!({
        "success": true,
        "data": {
            "likes": outcome.engagement.likes.count,
            "dislikes": outcome.engagement.dislikes.count,
            "score": outcome.engagement.score,
            "userReaction": outcome.user_reaction,
        },
    })))
}

pub async fn flag(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(comment_id): Path<String>,
    AppJson(body): AppJson<FlagRequest>,
) -> AppResult<Json<Value>> {
    let id = parse_id(&comment_id, "comment")?;
    let flags = state
        .comments
        .flag_comment(id, user.id, body.reason, body.description)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Comment reported",
        "data": { "flagCount": flags.count },
    })))
}

pub async fn get_thread(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Path(root_id): Path<String>,
) -> AppResult<Json<Value>> {
    let root_id = parse_id(&root_id, "comment")?;
    let viewer = user.map(|Extension(u)| u.viewer());
    let thread = state.comments.get_comment_thread(root_id, viewer).await?;
    Ok(Json(json!({ "success": true, "data": thread })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_defaults_to_newest() {
        assert_eq!(parse_sort(None).unwrap(), ListSort::Newest);
        assert_eq!(parse_sort(Some("popular")).unwrap(), ListSort::Popular);
        assert!(parse_sort(Some("random")).is_err());
    }
}
