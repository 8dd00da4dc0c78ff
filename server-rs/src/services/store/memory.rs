use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AutoModerationCriteria, CommentStats, CommentStore, ListQuery, ListSort, StatusChange,
};
use crate::error::{CommentError, CommentResult};
use crate::services::quote;
use crate::models::comment::{
    AutoModeration, Comment, CommentContent, EditRecord, Engagement, FlagEntry, FlagResolution,
    Flags, ModerationStatus, ReactionAction, TargetKind,
};

/// Process-local store used by tests and single-node development runs.
#[derive(Clone, Default)]
pub struct MemoryCommentStore {
    comments: Arc<RwLock<HashMap<Uuid, Comment>>>,
}

impl MemoryCommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.comments.read().await.len()
    }
}

fn has_open_flags(c: &Comment) -> bool {
    c.moderation.flags.count > 0
        && matches!(
            c.moderation.flags.resolution,
            None | Some(FlagResolution::Pending) | Some(FlagResolution::Escalated)
        )
}

fn sort_comments(comments: &mut [Comment], sort: ListSort) {
    match sort {
        ListSort::Newest => comments.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        ListSort::Oldest => comments.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        ListSort::Popular => comments.sort_by(|a, b| {
            b.engagement
                .score
                .partial_cmp(&a.engagement.score)
                .unwrap_or(Ordering::Equal)
                .then(b.created_at.cmp(&a.created_at))
        }),
    }
}

fn apply_change(c: &mut Comment, change: &StatusChange) {
    c.moderation.status = change.status;
    c.moderation.moderated_by = change.moderated_by;
    c.moderation.moderated_at = Some(change.at);
    c.moderation.reason = change.reason.clone();
    c.updated_at = change.at;
}

#[async_trait]
impl CommentStore for MemoryCommentStore {
    async fn insert(&self, comment: &Comment) -> CommentResult<()> {
        let mut comments = self.comments.write().await;
        comments.insert(comment.id, comment.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> CommentResult<Option<Comment>> {
        Ok(self.comments.read().await.get(&id).cloned())
    }

    async fn update_content(
        &self,
        id: Uuid,
        content: &CommentContent,
        edit: EditRecord,
    ) -> CommentResult<Option<Comment>> {
        let mut comments = self.comments.write().await;
        Ok(comments.get_mut(&id).map(|c| {
            c.updated_at = edit.edited_at;
            c.content = content.clone();
            c.metadata.edit_history.push(edit);
            c.clone()
        }))
    }

    async fn apply_reaction(
        &self,
        id: Uuid,
        user_id: Uuid,
        action: ReactionAction,
    ) -> CommentResult<Option<Engagement>> {
        let mut comments = self.comments.write().await;
        let Some(c) = comments.get_mut(&id).filter(|c| c.is_active()) else {
            return Ok(None);
        };

        let e = &mut c.engagement;
        match action {
            ReactionAction::Like => {
                e.dislikes.users.remove(&user_id);
                e.likes.users.insert(user_id);
            }
            ReactionAction::Dislike => {
                e.likes.users.remove(&user_id);
                e.dislikes.users.insert(user_id);
            }
            ReactionAction::Remove => {
                e.likes.users.remove(&user_id);
                e.dislikes.users.remove(&user_id);
            }
        }
        e.likes.count = e.likes.users.len() as i32;
        e.dislikes.count = e.dislikes.users.len() as i32;
        c.updated_at = Utc::now();
        Ok(Some(c.engagement.clone()))
    }

    async fn set_score(&self, id: Uuid, score: f64) -> CommentResult<()> {
        if let Some(c) = self.comments.write().await.get_mut(&id) {
            c.engagement.score = score;
        }
        Ok(())
    }

    async fn record_reply(
        &self,
        parent_id: Uuid,
        at: DateTime<Utc>,
    ) -> CommentResult<Option<Engagement>> {
        let mut comments = self.comments.write().await;
        Ok(comments.get_mut(&parent_id).map(|c| {
            c.engagement.replies.count += 1;
            c.engagement.replies.last_reply_at = Some(at);
            c.engagement.clone()
        }))
    }

    async fn set_status(&self, id: Uuid, change: &StatusChange) -> CommentResult<Option<Comment>> {
        let mut comments = self.comments.write().await;
        Ok(comments.get_mut(&id).map(|c| {
            apply_change(c, change);
            c.clone()
        }))
    }

    async fn cascade_status(
        &self,
        path: &str,
        exclude: Uuid,
        change: &StatusChange,
    ) -> CommentResult<u64> {
        let mut comments = self.comments.write().await;
        let mut moved = 0;
        for c in comments.values_mut() {
            if c.id != exclude
                && c.hierarchy.path.starts_with(path)
                && matches!(
                    c.moderation.status,
                    ModerationStatus::Active | ModerationStatus::Pending
                )
            {
                apply_change(c, change);
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn set_auto_moderation(
        &self,
        id: Uuid,
        analysis: &AutoModeration,
    ) -> CommentResult<()> {
        if let Some(c) = self.comments.write().await.get_mut(&id) {
            c.moderation.auto_moderation = analysis.clone();
        }
        Ok(())
    }

    async fn add_flag(&self, id: Uuid, entry: FlagEntry) -> CommentResult<Option<Flags>> {
        let mut comments = self.comments.write().await;
        let Some(c) = comments.get_mut(&id) else {
            return Ok(None);
        };
        let flags = &mut c.moderation.flags;
        if flags.flagged_by(entry.user_id) {
            return Err(CommentError::AlreadyFlagged);
        }
        flags.entries.push(entry);
        flags.count += 1;
        if flags.resolution.is_none() {
            flags.resolution = Some(FlagResolution::Pending);
        }
        Ok(Some(flags.clone()))
    }

    async fn set_flag_resolution(
        &self,
        id: Uuid,
        resolution: FlagResolution,
    ) -> CommentResult<Option<Flags>> {
        let mut comments = self.comments.write().await;
        Ok(comments.get_mut(&id).map(|c| {
            c.moderation.flags.resolution = Some(resolution);
            c.moderation.flags.clone()
        }))
    }

    async fn hard_delete(&self, id: Uuid) -> CommentResult<bool> {
        Ok(self.comments.write().await.remove(&id).is_some())
    }

    async fn list(&self, query: &ListQuery) -> CommentResult<(Vec<Comment>, i64)> {
        let comments = self.comments.read().await;
        let mut matched: Vec<Comment> = comments
            .values()
            .filter(|c| c.is_active() && c.target.story_id == query.story_id)
            .filter(|c| match query.chapter_id {
                Some(ch) => c.target.chapter_id == Some(ch),
                None => c.target.kind == TargetKind::Story,
            })
            .filter(|c| match query.parent_id {
                Some(p) => c.hierarchy.parent_id == Some(p),
                None => c.hierarchy.level == 0,
            })
            .cloned()
            .collect();

        let total = matched.len() as i64;
        sort_comments(&mut matched, query.sort);
        let page = matched
            .into_iter()
            .skip(((query.page - 1).max(0) * query.limit) as usize)
            .take(query.limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn replies_of(&self, parent_ids: &[Uuid]) -> CommentResult<Vec<Comment>> {
        let comments = self.comments.read().await;
        let mut replies: Vec<Comment> = comments
            .values()
            .filter(|c| c.is_active())
            .filter(|c| c.hierarchy.parent_id.is_some_and(|p| parent_ids.contains(&p)))
            .cloned()
            .collect();
        sort_comments(&mut replies, ListSort::Oldest);
        Ok(replies)
    }

    async fn thread(&self, root_id: Uuid) -> CommentResult<Vec<Comment>> {
        let comments = self.comments.read().await;
        let mut thread: Vec<Comment> = comments
            .values()
            .filter(|c| c.id == root_id || (c.hierarchy.root_id == root_id && c.is_active()))
            .cloned()
            .collect();
        sort_comments(&mut thread, ListSort::Oldest);
        Ok(thread)
    }

    async fn count_active_descendants(
        &self,
        id: Uuid,
        path: &str,
        level: u8,
    ) -> CommentResult<i64> {
        let comments = self.comments.read().await;
        Ok(comments
            .values()
            .filter(|c| {
                c.id != id
                    && c.is_active()
                    && c.hierarchy.level > level
                    && c.hierarchy.path.starts_with(path)
            })
            .count() as i64)
    }

    async fn count_recent_by_author(
        &self,
        author_id: Uuid,
        since: DateTime<Utc>,
    ) -> CommentResult<i64> {
        let comments = self.comments.read().await;
        Ok(comments
            .values()
            .filter(|c| c.author_id == author_id && c.created_at >= since)
            .count() as i64)
    }

    async fn has_recent_duplicate(
        &self,
        author_id: Uuid,
        content: &str,
        since: DateTime<Utc>,
    ) -> CommentResult<bool> {
        let comments = self.comments.read().await;
        Ok(comments.values().any(|c| {
            c.author_id == author_id
                && c.created_at >= since
                && quote::body_without_quote(c).trim() == content
        }))
    }

    async fn moderation_queue(&self, limit: i64, offset: i64) -> CommentResult<Vec<Comment>> {
        let comments = self.comments.read().await;
        let mut queue: Vec<Comment> = comments
            .values()
            .filter(|c| {
                c.moderation.status == ModerationStatus::Pending
                    || (c.is_active() && has_open_flags(c))
            })
            .cloned()
            .collect();
        queue.sort_by(|a, b| {
            b.moderation
                .flags
                .count
                .cmp(&a.moderation.flags.count)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(queue
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn reported(
        &self,
        resolution: Option<FlagResolution>,
        limit: i64,
        offset: i64,
    ) -> CommentResult<Vec<Comment>> {
        let comments = self.comments.read().await;
        let mut reported: Vec<Comment> = comments
            .values()
            .filter(|c| c.moderation.flags.count > 0)
            .filter(|c| match resolution {
                Some(r) => c.moderation.flags.resolution == Some(r),
                None => has_open_flags(c),
            })
            .cloned()
            .collect();
        reported.sort_by(|a, b| {
            b.moderation
                .flags
                .count
                .cmp(&a.moderation.flags.count)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(reported
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn auto_moderation_candidates(
        &self,
        criteria: &AutoModerationCriteria,
    ) -> CommentResult<Vec<Comment>> {
        let comments = self.comments.read().await;
        let mut found: Vec<Comment> = comments
            .values()
            .filter(|c| c.is_active())
            .filter(|c| {
                let auto = &c.moderation.auto_moderation;
                auto.spam_score >= criteria.spam_threshold
                    || auto.toxicity_score >= criteria.toxicity_threshold
                    || c.moderation.flags.count >= criteria.flag_threshold
            })
            .cloned()
            .collect();
        sort_comments(&mut found, ListSort::Oldest);
        found.truncate(criteria.limit.max(0) as usize);
        Ok(found)
    }

    async fn stats(&self, story_id: Uuid) -> CommentResult<CommentStats> {
        let comments = self.comments.read().await;
        let mut stats = CommentStats::default();
        for c in comments.values().filter(|c| c.target.story_id == story_id) {
            match c.moderation.status {
                ModerationStatus::Active => {
                    stats.total += 1;
                    if c.hierarchy.level == 0 {
                        stats.top_level += 1;
                    } else {
                        stats.replies += 1;
                    }
                    if c.moderation.flags.count > 0 {
                        stats.flagged += 1;
                    }
                }
                ModerationStatus::Pending => stats.pending += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn health_check(&self) -> bool {
        true
    }
}
