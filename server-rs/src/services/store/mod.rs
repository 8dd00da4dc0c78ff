//! Comment persistence.
//!
//! Every engagement mutation is a single conditional update so concurrent
//! toggles from one user cannot double count.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CommentResult;
use crate::models::comment::{
    AutoModeration, Comment, CommentContent, EditRecord, Engagement, FlagEntry, FlagResolution,
    Flags, ModerationStatus, ReactionAction,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryCommentStore;
pub use postgres::PgCommentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListSort {
    #[default]
    Newest,
    Oldest,
    Popular,
}

impl ListSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListSort::Newest => "newest",
            ListSort::Oldest => "oldest",
            ListSort::Popular => "popular",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListQuery {
    pub story_id: Uuid,
    pub chapter_id: Option<Uuid>,
    /// Direct replies of this comment; top-level comments when unset.
    pub parent_id: Option<Uuid>,
    /// 1-based.
    pub page: i64,
    pub limit: i64,
    pub sort: ListSort,
}

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub status: ModerationStatus,
    pub moderated_by: Option<Uuid>,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct AutoModerationCriteria {
    pub spam_threshold: f64,
    pub toxicity_threshold: f64,
    pub flag_threshold: i32,
    pub limit: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentStats {
    pub total: i64,
    #[serde(rename = "topLevel")]
    pub top_level: i64,
    pub replies: i64,
    pub flagged: i64,
    pub pending: i64,
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn insert(&self, comment: &Comment) -> CommentResult<()>;

    async fn get(&self, id: Uuid) -> CommentResult<Option<Comment>>;

    async fn update_content(
        &self,
        id: Uuid,
        content: &CommentContent,
        edit: EditRecord,
    ) -> CommentResult<Option<Comment>>;

    /// Applies a reaction in one step; `None` when the comment is missing or not active.
    async fn apply_reaction(
        &self,
        id: Uuid,
        user_id: Uuid,
        action: ReactionAction,
    ) -> CommentResult<Option<Engagement>>;

    async fn set_score(&self, id: Uuid, score: f64) -> CommentResult<()>;

    /// Atomically bumps the reply counter of `parent_id`.
    async fn record_reply(
        &self,
        parent_id: Uuid,
        at: DateTime<Utc>,
    ) -> CommentResult<Option<Engagement>>;

    async fn set_status(&self, id: Uuid, change: &StatusChange) -> CommentResult<Option<Comment>>;

    /// Moves active or pending descendants under `path` (excluding `exclude`) to `change.status`.
    async fn cascade_status(
        &self,
        path: &str,
        exclude: Uuid,
        change: &StatusChange,
    ) -> CommentResult<u64>;

    async fn set_auto_moderation(&self, id: Uuid, analysis: &AutoModeration)
        -> CommentResult<()>;

    /// Fails with `AlreadyFlagged` when `entry.user_id` flagged this comment before.
    async fn add_flag(&self, id: Uuid, entry: FlagEntry) -> CommentResult<Option<Flags>>;

    async fn set_flag_resolution(
        &self,
        id: Uuid,
        resolution: FlagResolution,
    ) -> CommentResult<Option<Flags>>;

    async fn hard_delete(&self, id: Uuid) -> CommentResult<bool>;

    /// Active comments matching the query plus the total match count.
    async fn list(&self, query: &ListQuery) -> CommentResult<(Vec<Comment>, i64)>;

    /// Active direct replies of the given parents, oldest first.
    async fn replies_of(&self, parent_ids: &[Uuid]) -> CommentResult<Vec<Comment>>;

    /// Root plus every active descendant, oldest first.
    async fn thread(&self, root_id: Uuid) -> CommentResult<Vec<Comment>>;

    async fn count_active_descendants(
        &self,
        id: Uuid,
        path: &str,
        level: u8,
    ) -> CommentResult<i64>;

    async fn count_recent_by_author(
        &self,
        author_id: Uuid,
        since: DateTime<Utc>,
    ) -> CommentResult<i64>;

    /// Matches `content` against what the author typed, ignoring any quote preamble.
    async fn has_recent_duplicate(
        &self,
        author_id: Uuid,
        content: &str,
        since: DateTime<Utc>,
    ) -> CommentResult<bool>;

    /// Pending comments and active comments carrying unresolved flags.
    async fn moderation_queue(&self, limit: i64, offset: i64) -> CommentResult<Vec<Comment>>;

    async fn reported(
        &self,
        resolution: Option<FlagResolution>,
        limit: i64,
        offset: i64,
    ) -> CommentResult<Vec<Comment>>;

    async fn auto_moderation_candidates(
        &self,
        criteria: &AutoModerationCriteria,
    ) -> CommentResult<Vec<Comment>>;

    async fn stats(&self, story_id: Uuid) -> CommentResult<CommentStats>;

    async fn health_check(&self) -> bool;
}
