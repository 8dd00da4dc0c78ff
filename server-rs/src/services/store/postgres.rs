use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::BTreeSet;
use uuid::Uuid;

use super::{
    AutoModerationCriteria, CommentStats, CommentStore, ListQuery, ListSort, StatusChange,
};
use crate::error::{CommentError, CommentResult};
use crate::services::quote;
use crate::models::comment::{
    AutoModeration, Comment, CommentContent, EditRecord, Engagement, FlagEntry, FlagResolution,
    Flags, Hierarchy, Metadata, Moderation, ModerationStatus, QuoteData, ReactionAction,
    ReactionSet, ReplyStats, Target, TargetKind,
};

const COLUMNS: &str = r#"id, author_id, story_id, chapter_id, target_type,
    content_original, content_sanitized, mentions, quote,
    parent_id, level, root_id, path,
    likes_count, liked_by, dislikes_count, disliked_by, replies_count, last_reply_at, score,
    status, flags_count, flag_entries, flag_resolution,
    spam_score, toxicity_score, checked_at, moderated_by, moderated_at, moderation_reason,
    ip_hash, user_agent_hash, edit_history, chapter_position, created_at, updated_at"#;

const ENGAGEMENT_COLUMNS: &str =
    "likes_count, liked_by, dislikes_count, disliked_by, replies_count, last_reply_at, score";

#[derive(Debug, sqlx::FromRow)]
struct CommentRow {
    id: Uuid,
    author_id: Uuid,
    story_id: Uuid,
    chapter_id: Option<Uuid>,
    target_type: String,
    content_original: String,
    content_sanitized: String,
    mentions: Vec<String>,
    quote: Option<Json<QuoteData>>,
    parent_id: Option<Uuid>,
    level: i16,
    root_id: Uuid,
    path: String,
    likes_count: i32,
    liked_by: Vec<Uuid>,
    dislikes_count: i32,
    disliked_by: Vec<Uuid>,
    replies_count: i32,
    last_reply_at: Option<DateTime<Utc>>,
    score: f64,
    status: String,
    flags_count: i32,
    flag_entries: Json<Vec<FlagEntry>>,
    flag_resolution: Option<String>,
    spam_score: f64,
    toxicity_score: f64,
    checked_at: Option<DateTime<Utc>>,
    moderated_by: Option<Uuid>,
    moderated_at: Option<DateTime<Utc>>,
    moderation_reason: Option<String>,
    ip_hash: Option<String>,
    user_agent_hash: Option<String>,
    edit_history: Json<Vec<EditRecord>>,
    chapter_position: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct EngagementRow {
    likes_count: i32,
    liked_by: Vec<Uuid>,
    dislikes_count: i32,
    disliked_by: Vec<Uuid>,
    replies_count: i32,
    last_reply_at: Option<DateTime<Utc>>,
    score: f64,
}

impl From<EngagementRow> for Engagement {
    fn from(r: EngagementRow) -> Self {
        Engagement {
            likes: ReactionSet {
                count: r.likes_count,
                users: r.liked_by.into_iter().collect::<BTreeSet<_>>(),
            },
            dislikes: ReactionSet {
                count: r.dislikes_count,
                users: r.disliked_by.into_iter().collect::<BTreeSet<_>>(),
            },
            replies: ReplyStats {
                count: r.replies_count,
                last_reply_at: r.last_reply_at,
            },
            score: r.score,
        }
    }
}

impl TryFrom<CommentRow> for Comment {
    type Error = CommentError;

    fn try_from(r: CommentRow) -> Result<Self, Self::Error> {
        let kind: TargetKind = r
            .target_type
            .parse()
            .map_err(CommentError::InvariantViolation)?;
        let status: ModerationStatus = r.status.parse().map_err(CommentError::InvariantViolation)?;
        let resolution = r
            .flag_resolution
            .as_deref()
            .map(str::parse::<FlagResolution>)
            .transpose()
            .map_err(CommentError::InvariantViolation)?;
        let level = u8::try_from(r.level)
            .map_err(|_| CommentError::InvariantViolation(format!("bad level {}", r.level)))?;

        Ok(Comment {
            id: r.id,
            author_id: r.author_id,
            target: Target {
                story_id: r.story_id,
                chapter_id: r.chapter_id,
                kind,
            },
            content: CommentContent {
                original: r.content_original,
                sanitized: r.content_sanitized,
                mentions: r.mentions,
                quote: r.quote.map(|q| q.0),
            },
            hierarchy: Hierarchy {
                parent_id: r.parent_id,
                level,
                root_id: r.root_id,
                path: r.path,
            },
            engagement: EngagementRow {
                likes_count: r.likes_count,
                liked_by: r.liked_by,
                dislikes_count: r.dislikes_count,
                disliked_by: r.disliked_by,
                replies_count: r.replies_count,
                last_reply_at: r.last_reply_at,
                score: r.score,
            }
            .into(),
            moderation: Moderation {
                status,
                flags: Flags {
                    count: r.flags_count,
                    entries: r.flag_entries.0,
                    resolution,
                },
                auto_moderation: AutoModeration {
                    spam_score: r.spam_score,
                    toxicity_score: r.toxicity_score,
                    checked_at: r.checked_at,
                },
                moderated_by: r.moderated_by,
                moderated_at: r.moderated_at,
                reason: r.moderation_reason,
            },
            metadata: Metadata {
                ip_hash: r.ip_hash,
                user_agent_hash: r.user_agent_hash,
                edit_history: r.edit_history.0,
                chapter_position: r.chapter_position,
            },
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn into_comments(rows: Vec<CommentRow>) -> CommentResult<Vec<Comment>> {
    rows.into_iter().map(Comment::try_from).collect()
}

/// SQL expressions for the new `liked_by` / `disliked_by` arrays.
fn reaction_arrays(action: ReactionAction) -> (&'static str, &'static str) {
    const ADD_LIKE: &str =
        "CASE WHEN $2 = ANY(liked_by) THEN liked_by ELSE array_append(liked_by, $2) END";
    const ADD_DISLIKE: &str =
        "CASE WHEN $2 = ANY(disliked_by) THEN disliked_by ELSE array_append(disliked_by, $2) END";
    const DROP_LIKE: &str = "array_remove(liked_by, $2)";
    const DROP_DISLIKE: &str = "array_remove(disliked_by, $2)";

    match action {
        ReactionAction::Like => (ADD_LIKE, DROP_DISLIKE),
        ReactionAction::Dislike => (DROP_LIKE, ADD_DISLIKE),
        ReactionAction::Remove => (DROP_LIKE, DROP_DISLIKE),
    }
}

fn order_by(sort: ListSort) -> &'static str {
    match sort {
        ListSort::Newest => "created_at DESC",
        ListSort::Oldest => "created_at ASC",
        ListSort::Popular => "score DESC, created_at DESC",
    }
}

#[derive(Clone)]
pub struct PgCommentStore {
    db: PgPool,
}

impl PgCommentStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CommentStore for PgCommentStore {
    async fn insert(&self, c: &Comment) -> CommentResult<()> {
        let liked: Vec<Uuid> = c.engagement.likes.users.iter().copied().collect();
        let disliked: Vec<Uuid> = c.engagement.dislikes.users.iter().copied().collect();

        sqlx::query(&format!(
            "INSERT INTO comments ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
             $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, \
             $27, $28, $29, $30, $31, $32, $33, $34, $35, $36)"
        ))
        .bind(c.id)
        .bind(c.author_id)
        .bind(c.target.story_id)
        .bind(c.target.chapter_id)
        .bind(c.target.kind.as_str())
        .bind(&c.content.original)
        .bind(&c.content.sanitized)
        .bind(&c.content.mentions)
        .bind(c.content.quote.clone().map(Json))
        .bind(c.hierarchy.parent_id)
        .bind(c.hierarchy.level as i16)
        .bind(c.hierarchy.root_id)
        .bind(&c.hierarchy.path)
        .bind(c.engagement.likes.count)
        .bind(liked)
        .bind(c.engagement.dislikes.count)
        .bind(disliked)
        .bind(c.engagement.replies.count)
        .bind(c.engagement.replies.last_reply_at)
        .bind(c.engagement.score)
        .bind(c.moderation.status.as_str())
        .bind(c.moderation.flags.count)
        .bind(Json(&c.moderation.flags.entries))
        .bind(c.moderation.flags.resolution.map(|r| r.as_str()))
        .bind(c.moderation.auto_moderation.spam_score)
        .bind(c.moderation.auto_moderation.toxicity_score)
        .bind(c.moderation.auto_moderation.checked_at)
        .bind(c.moderation.moderated_by)
        .bind(c.moderation.moderated_at)
        .bind(&c.moderation.reason)
        .bind(&c.metadata.ip_hash)
        .bind(&c.metadata.user_agent_hash)
        .bind(Json(&c.metadata.edit_history))
        .bind(c.metadata.chapter_position)
        .bind(c.created_at)
        .bind(c.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> CommentResult<Option<Comment>> {
        let row: Option<CommentRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM comments WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.db)
                .await?;
        row.map(Comment::try_from).transpose()
    }

    async fn update_content(
        &self,
        id: Uuid,
        content: &CommentContent,
        edit: EditRecord,
    ) -> CommentResult<Option<Comment>> {
        let edited_at = edit.edited_at;
        let row: Option<CommentRow> = sqlx::query_as(&format!(
            r#"UPDATE comments SET content_original = $2, content_sanitized = $3, mentions = $4,
                edit_history = edit_history || $5::jsonb, updated_at = $6
            WHERE id = $1 RETURNING {COLUMNS}"#
        ))
        .bind(id)
        .bind(&content.original)
        .bind(&content.sanitized)
        .bind(&content.mentions)
        .bind(Json(vec![edit]))
        .bind(edited_at)
        .fetch_optional(&self.db)
        .await?;
        row.map(Comment::try_from).transpose()
    }

    async fn apply_reaction(
        &self,
        id: Uuid,
        user_id: Uuid,
        action: ReactionAction,
    ) -> CommentResult<Option<Engagement>> {
        let (liked, disliked) = reaction_arrays(action);
        let row: Option<EngagementRow> = sqlx::query_as(&format!(
            r#"UPDATE comments SET
                liked_by = {liked}, likes_count = cardinality({liked}),
                disliked_by = {disliked}, dislikes_count = cardinality({disliked}),
                updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            RETURNING {ENGAGEMENT_COLUMNS}"#
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Engagement::from))
    }

    async fn set_score(&self, id: Uuid, score: f64) -> CommentResult<()> {
        sqlx::query("UPDATE comments SET score = $2 WHERE id = $1")
            .bind(id)
            .bind(score)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn record_reply(
        &self,
        parent_id: Uuid,
        at: DateTime<Utc>,
    ) -> CommentResult<Option<Engagement>> {
        let row: Option<EngagementRow> = sqlx::query_as(&format!(
            r#"UPDATE comments SET replies_count = replies_count + 1, last_reply_at = $2
            WHERE id = $1 RETURNING {ENGAGEMENT_COLUMNS}"#
        ))
        .bind(parent_id)
        .bind(at)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Engagement::from))
    }

    async fn set_status(&self, id: Uuid, change: &StatusChange) -> CommentResult<Option<Comment>> {
        let row: Option<CommentRow> = sqlx::query_as(&format!(
            r#"UPDATE comments SET status = $2, moderated_by = $3, moderation_reason = $4,
                moderated_at = $5, updated_at = $5
            WHERE id = $1 RETURNING {COLUMNS}"#
        ))
        .bind(id)
        .bind(change.status.as_str())
        .bind(change.moderated_by)
        .bind(&change.reason)
        .bind(change.at)
        .fetch_optional(&self.db)
        .await?;
        row.map(Comment::try_from).transpose()
    }

    async fn cascade_status(
        &self,
        path: &str,
        exclude: Uuid,
        change: &StatusChange,
    ) -> CommentResult<u64> {
        let result = sqlx::query(
            r#"UPDATE comments SET status = $3, moderated_by = $4, moderation_reason = $5,
                moderated_at = $6, updated_at = $6
            WHERE path LIKE $1 || '%' AND id <> $2 AND status IN ('active', 'pending')"#,
        )
        .bind(path)
        .bind(exclude)
        .bind(change.status.as_str())
        .bind(change.moderated_by)
        .bind(&change.reason)
        .bind(change.at)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_auto_moderation(
        &self,
        id: Uuid,
        analysis: &AutoModeration,
    ) -> CommentResult<()> {
        sqlx::query(
            "UPDATE comments SET spam_score = $2, toxicity_score = $3, checked_at = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(analysis.spam_score)
        .bind(analysis.toxicity_score)
        .bind(analysis.checked_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn add_flag(&self, id: Uuid, entry: FlagEntry) -> CommentResult<Option<Flags>> {
        let user_filter = serde_json::json!([{ "userId": entry.user_id }]);
        let row: Option<(i32, Json<Vec<FlagEntry>>, Option<String>)> = sqlx::query_as(
            r#"UPDATE comments SET flags_count = flags_count + 1,
                flag_entries = flag_entries || $2::jsonb,
                flag_resolution = COALESCE(flag_resolution, 'pending')
            WHERE id = $1 AND NOT (flag_entries @> $3::jsonb)
            RETURNING flags_count, flag_entries, flag_resolution"#,
        )
        .bind(id)
        .bind(Json(vec![entry]))
        .bind(user_filter)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some((count, entries, resolution)) => Ok(Some(Flags {
                count,
                entries: entries.0,
                resolution: resolution.as_deref().and_then(|r| r.parse().ok()),
            })),
            None => {
                let exists: Option<i32> =
                    sqlx::query_scalar("SELECT 1 FROM comments WHERE id = $1")
                        .bind(id)
                        .fetch_optional(&self.db)
                        .await?;
                match exists {
                    Some(_) => Err(CommentError::AlreadyFlagged),
                    None => Ok(None),
                }
            }
        }
    }

    async fn set_flag_resolution(
        &self,
        id: Uuid,
        resolution: FlagResolution,
    ) -> CommentResult<Option<Flags>> {
        let row: Option<(i32, Json<Vec<FlagEntry>>)> = sqlx::query_as(
            r#"UPDATE comments SET flag_resolution = $2 WHERE id = $1
            RETURNING flags_count, flag_entries"#,
        )
        .bind(id)
        .bind(resolution.as_str())
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|(count, entries)| Flags {
            count,
            entries: entries.0,
            resolution: Some(resolution),
        }))
    }

    async fn hard_delete(&self, id: Uuid) -> CommentResult<bool> {
        let result = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, query: &ListQuery) -> CommentResult<(Vec<Comment>, i64)> {
        let filter = r#"status = 'active' AND story_id = $1
            AND (($2::uuid IS NULL AND target_type = 'story') OR chapter_id = $2)
            AND (($3::uuid IS NULL AND level = 0) OR parent_id = $3)"#;

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*)::bigint FROM comments WHERE {filter}"))
                .bind(query.story_id)
                .bind(query.chapter_id)
                .bind(query.parent_id)
                .fetch_one(&self.db)
                .await?;

        let rows: Vec<CommentRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM comments WHERE {filter} ORDER BY {} LIMIT $4 OFFSET $5",
            order_by(query.sort)
        ))
        .bind(query.story_id)
        .bind(query.chapter_id)
        .bind(query.parent_id)
        .bind(query.limit)
        .bind((query.page - 1).max(0) * query.limit)
        .fetch_all(&self.db)
        .await?;

        Ok((into_comments(rows)?, total))
    }

    async fn replies_of(&self, parent_ids: &[Uuid]) -> CommentResult<Vec<Comment>> {
        let rows: Vec<CommentRow> = sqlx::query_as(&format!(
            r#"SELECT {COLUMNS} FROM comments
            WHERE parent_id = ANY($1) AND status = 'active' ORDER BY created_at ASC"#
        ))
        .bind(parent_ids)
        .fetch_all(&self.db)
        .await?;
        into_comments(rows)
    }

    async fn thread(&self, root_id: Uuid) -> CommentResult<Vec<Comment>> {
        let rows: Vec<CommentRow> = sqlx::query_as(&format!(
            r#"SELECT {COLUMNS} FROM comments
            WHERE id = $1 OR (root_id = $1 AND status = 'active')
            ORDER BY created_at ASC"#
        ))
        .bind(root_id)
        .fetch_all(&self.db)
        .await?;
        into_comments(rows)
    }

    async fn count_active_descendants(
        &self,
        id: Uuid,
        path: &str,
        level: u8,
    ) -> CommentResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*)::bigint FROM comments
            WHERE path LIKE $1 || '%' AND level > $2 AND id <> $3 AND status = 'active'"#,
        )
        .bind(path)
        .bind(level as i16)
        .bind(id)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    async fn count_recent_by_author(
        &self,
        author_id: Uuid,
        since: DateTime<Utc>,
    ) -> CommentResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::bigint FROM comments WHERE author_id = $1 AND created_at >= $2",
        )
        .bind(author_id)
        .bind(since)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    async fn has_recent_duplicate(
        &self,
        author_id: Uuid,
        content: &str,
        since: DateTime<Utc>,
    ) -> CommentResult<bool> {
        let exact: bool = sqlx::query_scalar(
            r#"SELECT EXISTS(SELECT 1 FROM comments
            WHERE author_id = $1 AND created_at >= $2 AND content_original = $3)"#,
        )
        .bind(author_id)
        .bind(since)
        .bind(content)
        .fetch_one(&self.db)
        .await?;
        if exact {
            return Ok(true);
        }

        // quoted replies store the preamble in front of the body
        let rows: Vec<CommentRow> = sqlx::query_as(&format!(
            r#"SELECT {COLUMNS} FROM comments
            WHERE author_id = $1 AND created_at >= $2 AND quote IS NOT NULL
              AND right(content_original, char_length($3)) = $3"#
        ))
        .bind(author_id)
        .bind(since)
        .bind(content)
        .fetch_all(&self.db)
        .await?;
        Ok(into_comments(rows)?
            .iter()
            .any(|c| quote::body_without_quote(c).trim() == content))
    }

    async fn moderation_queue(&self, limit: i64, offset: i64) -> CommentResult<Vec<Comment>> {
        let rows: Vec<CommentRow> = sqlx::query_as(&format!(
            r#"SELECT {COLUMNS} FROM comments
            WHERE status = 'pending'
               OR (status = 'active' AND flags_count > 0
                   AND COALESCE(flag_resolution, 'pending') IN ('pending', 'escalated'))
            ORDER BY flags_count DESC, created_at DESC LIMIT $1 OFFSET $2"#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        into_comments(rows)
    }

    async fn reported(
        &self,
        resolution: Option<FlagResolution>,
        limit: i64,
        offset: i64,
    ) -> CommentResult<Vec<Comment>> {
        let rows: Vec<CommentRow> = sqlx::query_as(&format!(
            r#"SELECT {COLUMNS} FROM comments
            WHERE flags_count > 0
              AND (($1::text IS NULL AND COALESCE(flag_resolution, 'pending') IN ('pending', 'escalated'))
                   OR flag_resolution = $1)
            ORDER BY flags_count DESC, created_at DESC LIMIT $2 OFFSET $3"#
        ))
        .bind(resolution.map(|r| r.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        into_comments(rows)
    }

    async fn auto_moderation_candidates(
        &self,
        criteria: &AutoModerationCriteria,
    ) -> CommentResult<Vec<Comment>> {
        let rows: Vec<CommentRow> = sqlx::query_as(&format!(
            r#"SELECT {COLUMNS} FROM comments
            WHERE status = 'active'
              AND (spam_score >= $1 OR toxicity_score >= $2 OR flags_count >= $3)
            ORDER BY created_at ASC LIMIT $4"#
        ))
        .bind(criteria.spam_threshold)
        .bind(criteria.toxicity_threshold)
        .bind(criteria.flag_threshold)
        .bind(criteria.limit)
        .fetch_all(&self.db)
        .await?;
        into_comments(rows)
    }

    async fn stats(&self, story_id: Uuid) -> CommentResult<CommentStats> {
        let (total, top_level, replies, flagged, pending): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"SELECT
                    COUNT(*) FILTER (WHERE status = 'active')::bigint,
                    COUNT(*) FILTER (WHERE status = 'active' AND level = 0)::bigint,
                    COUNT(*) FILTER (WHERE status = 'active' AND level > 0)::bigint,
                    COUNT(*) FILTER (WHERE status = 'active' AND flags_count > 0)::bigint,
                    COUNT(*) FILTER (WHERE status = 'pending')::bigint
                FROM comments WHERE story_id = $1"#,
            )
            .bind(story_id)
            .fetch_one(&self.db)
            .await?;
        Ok(CommentStats {
            total,
            top_level,
            replies,
            flagged,
            pending,
        })
    }

    async fn health_check(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.db)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_adds_like_and_drops_dislike() {
        let (liked, disliked) = reaction_arrays(ReactionAction::Like);
        assert!(liked.contains("array_append(liked_by"));
        assert!(disliked.starts_with("array_remove(disliked_by"));
    }

    #[test]
    fn remove_drops_both_sides() {
        let (liked, disliked) = reaction_arrays(ReactionAction::Remove);
        assert!(liked.starts_with("array_remove"));
        assert!(disliked.starts_with("array_remove"));
    }
}
