//! Orchestrates comment operations over the store, the moderation engine,
//! the cache and the best-effort collaborators.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{CommentConfig, ModerationConfig};
use crate::error::{CommentError, CommentResult, SideEffectError};
use crate::models::comment::{
    AuditRecord, AutoModerateRequest, Comment, CommentContent, CreateCommentRequest, EditRecord,
    Engagement, FlagReason, FlagResolution, Flags, Metadata, Moderation, ModerationStatus,
    QuoteData, ReactionAction, ReactionKind, ResolveReportRequest, Target, TargetKind,
    UpdateCommentRequest, UserRole,
};
use crate::services::collaborators::{
    audit_record, AdminNotifier, Notifier, TargetStats, UserDirectory,
};
use crate::services::comment_cache::CommentCache;
use crate::services::engagement::score_for;
use crate::services::hierarchy;
use crate::services::moderation::{
    Actor, AutoModerationReport, BulkOutcome, ModerationEngine, ReportOutcome,
};
use crate::services::quote;
use crate::services::sanitizer;
use crate::services::store::{AutoModerationCriteria, CommentStats, CommentStore, ListQuery};
use crate::services::SideEffects;

const UNKNOWN_AUTHOR: &str = "anonymous";
const MAX_AUTO_MODERATION_BATCH: i64 = 1000;

/// The authenticated caller, as far as comments care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub id: Uuid,
    pub role: UserRole,
}

impl Viewer {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// Request-derived identifiers. Only their salted hashes are stored.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone)]
pub struct Collaborators {
    pub users: Arc<dyn UserDirectory>,
    pub targets: Arc<dyn TargetStats>,
    pub notifier: Arc<dyn Notifier>,
    pub admin: Arc<dyn AdminNotifier>,
}

impl Collaborators {
    /// One value serving every collaborator role.
    pub fn shared<T>(inner: Arc<T>) -> Self
    where
        T: UserDirectory + TargetStats + Notifier + AdminNotifier + 'static,
    {
        Self {
            users: inner.clone(),
            targets: inner.clone(),
            notifier: inner.clone(),
            admin: inner,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewerState {
    #[serde(rename = "canEdit")]
    pub can_edit: bool,
    #[serde(rename = "canDelete")]
    pub can_delete: bool,
    #[serde(rename = "userReaction")]
    pub user_reaction: Option<ReactionKind>,
}

/// A comment as rendered: nested replies and, with a viewer, their permissions.
#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: Comment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer: Option<ViewerState>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<CommentView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    #[serde(rename = "totalPages", skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<i64>,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if limit > 0 { (total + limit - 1) / limit } else { 0 };
        Self {
            page,
            limit,
            total: Some(total),
            total_pages: Some(total_pages),
            has_more: page < total_pages,
        }
    }

    /// For listings without a total count.
    pub fn open_ended(page: i64, limit: i64, returned: usize) -> Self {
        Self {
            page,
            limit,
            total: None,
            total_pages: None,
            has_more: returned as i64 >= limit,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentPage {
    pub comments: Vec<CommentView>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedPage {
    comments: Vec<Comment>,
    replies: Vec<Comment>,
    total: i64,
}

#[derive(Debug, Clone)]
pub struct Created {
    pub comment: Comment,
    /// Set when the reply was flattened into a quoted level-2 reply.
    pub quote: Option<QuoteData>,
    pub side_effects: SideEffects,
}

#[derive(Debug, Clone)]
pub struct Deleted {
    pub comment: Comment,
    pub side_effects: SideEffects,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReactionOutcome {
    pub engagement: Engagement,
    #[serde(rename = "userReaction")]
    pub user_reaction: Option<ReactionKind>,
}

/// Author of an active comment, inside the edit window.
pub fn can_edit(comment: &Comment, user_id: Uuid, now: DateTime<Utc>, window_minutes: i64) -> bool {
    comment.author_id == user_id
        && comment.is_active()
        && now - comment.created_at <= Duration::minutes(window_minutes)
}

pub fn can_delete(comment: &Comment, viewer: &Viewer) -> bool {
    comment.is_active() && (comment.author_id == viewer.id || viewer.is_admin())
}

pub fn validate_target(target: &Target) -> CommentResult<()> {
    if target.story_id.is_nil() {
        return Err(CommentError::InvalidTarget("storyId is required".into()));
    }
    match (target.kind, target.chapter_id) {
        (TargetKind::Chapter, None) => Err(CommentError::InvalidTarget(
            "chapterId is required for chapter comments".into(),
        )),
        (TargetKind::Story, Some(_)) => Err(CommentError::InvalidTarget(
            "chapterId is only allowed on chapter comments".into(),
        )),
        _ => Ok(()),
    }
}

#[derive(Clone)]
pub struct CommentService {
    store: Arc<dyn CommentStore>,
    collab: Collaborators,
    moderation: ModerationEngine,
    cache: CommentCache,
    config: CommentConfig,
}

impl CommentService {
    pub fn new(
        store: Arc<dyn CommentStore>,
        collab: Collaborators,
        cache: CommentCache,
        config: CommentConfig,
        moderation: ModerationConfig,
    ) -> Self {
        let moderation = ModerationEngine::new(store.clone(), collab.admin.clone(), moderation);
        Self {
            store,
            collab,
            moderation,
            cache,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn CommentStore> {
        &self.store
    }

    pub fn moderation(&self) -> &ModerationEngine {
        &self.moderation
    }

    pub fn cache(&self) -> &CommentCache {
        &self.cache
    }

    pub fn config(&self) -> &CommentConfig {
        &self.config
    }

    pub fn validate_content(&self, content: &str) -> CommentResult<()> {
        if content.trim().is_empty() {
            return Err(CommentError::EmptyContent);
        }
        if content.chars().count() > self.config.max_length {
            return Err(CommentError::ContentTooLong {
                max: self.config.max_length,
            });
        }
        Ok(())
    }

    /// The stored text, quote preamble included, must fit as well.
    fn check_stored_length(&self, original: &str) -> CommentResult<()> {
        if original.chars().count() > self.config.max_length {
            return Err(CommentError::ContentTooLong {
                max: self.config.max_length,
            });
        }
        Ok(())
    }

    async fn require(&self, id: Uuid) -> CommentResult<Comment> {
        self.store
            .get(id)
            .await?
            .ok_or(CommentError::CommentNotFound(id))
    }

    pub async fn create_comment(
        &self,
        author_id: Uuid,
        req: CreateCommentRequest,
        client: &ClientInfo,
    ) -> CommentResult<Created> {
        validate_target(&req.target)?;
        self.validate_content(&req.content)?;

        let id = Uuid::new_v4();
        let parent_id = req.hierarchy.as_ref().and_then(|h| h.parent_id);
        let placement = hierarchy::assign(self.store.as_ref(), id, parent_id).await?;
        if let Some(parent) = &placement.parent {
            if parent.target.story_id != req.target.story_id
                || parent.target.chapter_id != req.target.chapter_id
            {
                return Err(CommentError::InvalidTarget(
                    "reply must target the same story and chapter as its parent".into(),
                ));
            }
        }

        let mut effects = SideEffects::default();
        let (original, quote) = match &placement.quoted {
            Some(quoted) => {
                let name = self.author_name(quoted.author_id, &mut effects).await;
                let quote = quote::build_quote(quoted, &name);
                let original = quote::format_with_quote(&name, &quote.quoted_text, &req.content);
                (original, Some(quote))
            }
            None => (req.content.trim().to_string(), None),
        };
        self.check_stored_length(&original)?;

        let clean = sanitizer::sanitize(&original);
        let salt = &self.config.hash_salt;
        let now = Utc::now();
        let comment = Comment {
            id,
            author_id,
            target: req.target,
            content: CommentContent {
                original,
                sanitized: clean.sanitized,
                mentions: clean.mentions,
                quote: quote.clone(),
            },
            hierarchy: placement.hierarchy,
            engagement: Engagement::default(),
            moderation: Moderation::default(),
            metadata: Metadata {
                ip_hash: client
                    .ip
                    .as_deref()
                    .map(|ip| sanitizer::hash_identifier(salt, ip)),
                user_agent_hash: client
                    .user_agent
                    .as_deref()
                    .map(|ua| sanitizer::hash_identifier(salt, ua)),
                edit_history: Vec::new(),
                chapter_position: req.metadata.and_then(|m| m.chapter_position),
            },
            created_at: now,
            updated_at: now,
        };

        self.store.insert(&comment).await?;
        tracing::info!(
            comment_id = %comment.id,
            author = %author_id,
            level = comment.hierarchy.level,
            converted = quote.is_some(),
            "comment created"
        );

        let comment = match self.moderation.screen(comment.clone()).await {
            Ok(screened) => screened,
            Err(e) => {
                tracing::warn!(comment_id = %comment.id, error = %e, "comment screening failed");
                comment
            }
        };

        if let Some(parent) = &placement.parent {
            effects.record(self.bump_reply_count(parent, now).await);
        }
        effects.record(
            self.collab
                .users
                .increment_comment_count(author_id, 1)
                .await,
        );
        self.bump_targets(&comment.target, 1, &mut effects).await;
        self.notify_created(
            &comment,
            placement.parent.as_ref(),
            placement.quoted.as_ref(),
            &mut effects,
        )
        .await;

        self.cache.invalidate_for(&comment).await;
        Ok(Created {
            comment,
            quote,
            side_effects: effects,
        })
    }

    async fn author_name(&self, user_id: Uuid, effects: &mut SideEffects) -> String {
        match self.collab.users.display_name(user_id).await {
            Ok(Some(name)) => name,
            Ok(None) => UNKNOWN_AUTHOR.to_string(),
            Err(e) => {
                effects.record(Err(e));
                UNKNOWN_AUTHOR.to_string()
            }
        }
    }

    async fn bump_reply_count(
        &self,
        parent: &Comment,
        at: DateTime<Utc>,
    ) -> Result<(), SideEffectError> {
        let stats = self
            .store
            .record_reply(parent.id, at)
            .await
            .map_err(|e| SideEffectError::new("parent_reply_count", e.to_string()))?;
        let Some(stats) = stats else {
            return Ok(());
        };
        self.store
            .set_score(parent.id, score_for(&stats, parent.created_at, at))
            .await
            .map_err(|e| SideEffectError::new("parent_score", e.to_string()))
    }

    async fn bump_targets(&self, target: &Target, delta: i32, effects: &mut SideEffects) {
        effects.record(
            self.collab
                .targets
                .increment_story_comment_count(target.story_id, delta)
                .await,
        );
        if let Some(chapter_id) = target.chapter_id {
            effects.record(
                self.collab
                    .targets
                    .increment_chapter_comment_count(chapter_id, delta)
                    .await,
            );
        }
    }

    async fn notify_created(
        &self,
        comment: &Comment,
        parent: Option<&Comment>,
        quoted: Option<&Comment>,
        effects: &mut SideEffects,
    ) {
        let author = comment.author_id;
        let notifier = &self.collab.notifier;

        if let Some(quoted) = quoted {
            if quoted.author_id != author {
                effects.record(notifier.quoted_reply(quoted.author_id, comment, quoted.id).await);
            }
        }
        if let Some(parent) = parent {
            let told_as_quoted = quoted.is_some_and(|q| q.author_id == parent.author_id);
            if parent.author_id != author && !told_as_quoted {
                effects.record(notifier.comment_reply(parent.author_id, comment, parent.id).await);
            }
        }

        let quoted_name = comment
            .content
            .quote
            .as_ref()
            .map(|q| q.quoted_username.as_str());
        let names: Vec<String> = comment
            .content
            .mentions
            .iter()
            .filter(|m| Some(m.as_str()) != quoted_name)
            .cloned()
            .collect();
        if names.is_empty() {
            return;
        }
        match self.collab.users.find_by_usernames(&names).await {
            Ok(found) => {
                for (_, user_id) in found.into_iter().filter(|(_, id)| *id != author) {
                    effects.record(notifier.mention(user_id, comment).await);
                }
            }
            Err(e) => effects.record(Err(e)),
        }
    }

    pub async fn update_comment(
        &self,
        id: Uuid,
        user_id: Uuid,
        req: UpdateCommentRequest,
    ) -> CommentResult<Comment> {
        let comment = self.require(id).await?;
        let now = Utc::now();
        if !can_edit(&comment, user_id, now, self.config.edit_window_minutes) {
            return Err(CommentError::NotOwnerOrExpired);
        }
        self.validate_content(&req.content)?;

        let original = match &comment.content.quote {
            Some(q) => quote::format_with_quote(&q.quoted_username, &q.quoted_text, &req.content),
            None => req.content.trim().to_string(),
        };
        self.check_stored_length(&original)?;
        let clean = sanitizer::sanitize(&original);
        let content = CommentContent {
            original,
            sanitized: clean.sanitized,
            mentions: clean.mentions,
            quote: comment.content.quote.clone(),
        };
        let edit = EditRecord {
            previous_content: comment.content.original.clone(),
            edited_at: now,
            edit_reason: req.edit_reason,
        };

        let updated = self
            .store
            .update_content(id, &content, edit)
            .await?
            .ok_or(CommentError::CommentNotFound(id))?;
        let updated = match self.moderation.screen(updated.clone()).await {
            Ok(screened) => screened,
            Err(e) => {
                tracing::warn!(comment_id = %id, error = %e, "comment screening failed");
                updated
            }
        };

        tracing::info!(comment_id = %id, edits = updated.metadata.edit_history.len(), "comment edited");
        self.cache.invalidate_for(&updated).await;
        Ok(updated)
    }

    pub async fn delete_comment(
        &self,
        id: Uuid,
        viewer: Viewer,
        reason: Option<String>,
    ) -> CommentResult<Deleted> {
        let comment = self.require(id).await?;
        let is_owner = comment.author_id == viewer.id;
        if !is_owner && !viewer.is_admin() {
            return Err(CommentError::PermissionDenied(
                "only the author or an administrator can delete this comment".into(),
            ));
        }
        if !comment.is_active() {
            return Err(CommentError::AlreadyRemoved);
        }

        let actor = if is_owner { Actor::Owner } else { Actor::Moderator };
        let deleted = self
            .moderation
            .transition(
                comment,
                ModerationStatus::Deleted,
                actor,
                Some(viewer.id),
                reason.clone(),
            )
            .await?;

        let mut effects = SideEffects::default();
        effects.record(
            self.collab
                .users
                .increment_comment_count(deleted.author_id, -1)
                .await,
        );
        self.bump_targets(&deleted.target, -1, &mut effects).await;

        if !is_owner {
            effects.record(
                self.collab
                    .admin
                    .comment_deletion(deleted.author_id, &deleted, viewer.id, reason.as_deref())
                    .await,
            );
            effects.record(
                self.collab
                    .admin
                    .log_admin_action(&audit_record(
                        viewer.id,
                        "delete_comment",
                        Some(id),
                        reason,
                        None,
                    ))
                    .await,
            );
        }

        tracing::info!(comment_id = %id, by = %viewer.id, admin = !is_owner, "comment deleted");
        self.cache.invalidate_for(&deleted).await;
        Ok(Deleted {
            comment: deleted,
            side_effects: effects,
        })
    }

    pub async fn toggle_reaction(
        &self,
        id: Uuid,
        user_id: Uuid,
        action: ReactionAction,
    ) -> CommentResult<ReactionOutcome> {
        let comment = self.require(id).await?;
        if !comment.is_active() {
            return Err(CommentError::CommentNotActive);
        }

        let mut stats = self
            .store
            .apply_reaction(id, user_id, action)
            .await?
            .ok_or(CommentError::CommentNotActive)?;
        stats.score = score_for(&stats, comment.created_at, Utc::now());
        self.store.set_score(id, stats.score).await?;

        let user_reaction = match action {
            ReactionAction::Like => Some(ReactionKind::Like),
            ReactionAction::Dislike => Some(ReactionKind::Dislike),
            ReactionAction::Remove => None,
        };
        self.cache.invalidate_for(&comment).await;
        Ok(ReactionOutcome {
            engagement: stats,
            user_reaction,
        })
    }

    pub async fn flag_comment(
        &self,
        id: Uuid,
        user_id: Uuid,
        reason: FlagReason,
        description: Option<String>,
    ) -> CommentResult<Flags> {
        let comment = self.require(id).await?;
        if comment.moderation.status.is_terminal() {
            return Err(CommentError::CommentNotActive);
        }
        let flags = self
            .moderation
            .add_flag(&comment, user_id, reason, description)
            .await?;
        tracing::info!(comment_id = %id, reason = ?reason, flags = flags.count, "comment flagged");
        self.cache.invalidate_for(&comment).await;
        Ok(flags)
    }

    /// Root plus its nested replies; reply counts come from the thread itself.
    pub async fn get_comment_thread(
        &self,
        root_id: Uuid,
        viewer: Option<Viewer>,
    ) -> CommentResult<CommentView> {
        let comments: Vec<Comment> = match self.cache.get_thread(root_id).await {
            Some(cached) => cached,
            None => {
                let thread = self.store.thread(root_id).await?;
                let root_ok = thread
                    .iter()
                    .any(|c| c.id == root_id && c.is_active() && c.hierarchy.level == 0);
                if !root_ok {
                    return Err(CommentError::CommentNotFound(root_id));
                }
                self.cache.put_thread(root_id, &thread).await;
                thread
            }
        };

        let mut counts: HashMap<Uuid, i32> = HashMap::new();
        for c in comments.iter().filter(|c| c.id != root_id && c.is_active()) {
            for ancestor in c.hierarchy.ancestors() {
                *counts.entry(ancestor).or_insert(0) += 1;
            }
        }

        let mut root = None;
        let mut children: HashMap<Uuid, Vec<Comment>> = HashMap::new();
        for c in comments {
            if c.id == root_id {
                root = Some(c);
            } else if let Some(parent_id) = c.hierarchy.parent_id {
                children.entry(parent_id).or_default().push(c);
            }
        }
        let root = root.ok_or(CommentError::CommentNotFound(root_id))?;
        Ok(self.attach(root, &mut children, &counts, viewer.as_ref()))
    }

    fn attach(
        &self,
        mut comment: Comment,
        children: &mut HashMap<Uuid, Vec<Comment>>,
        counts: &HashMap<Uuid, i32>,
        viewer: Option<&Viewer>,
    ) -> CommentView {
        comment.engagement.replies.count = counts.get(&comment.id).copied().unwrap_or(0);
        let replies = children
            .remove(&comment.id)
            .unwrap_or_default()
            .into_iter()
            .map(|c| self.attach(c, children, counts, viewer))
            .collect();
        self.view(comment, viewer, replies)
    }

    fn view(&self, comment: Comment, viewer: Option<&Viewer>, replies: Vec<CommentView>) -> CommentView {
        let viewer = viewer.map(|v| ViewerState {
            can_edit: can_edit(&comment, v.id, Utc::now(), self.config.edit_window_minutes),
            can_delete: can_delete(&comment, v),
            user_reaction: comment.reaction_of(v.id),
        });
        CommentView {
            comment,
            viewer,
            replies,
        }
    }

    /// Overwrites `engagement.replies.count` with the number of active descendants.
    pub async fn add_reply_counts(&self, comments: &mut [Comment]) -> CommentResult<()> {
        for c in comments.iter_mut() {
            let count = self
                .store
                .count_active_descendants(c.id, &c.hierarchy.path, c.hierarchy.level)
                .await?;
            c.engagement.replies.count = i32::try_from(count).unwrap_or(i32::MAX);
        }
        Ok(())
    }

    pub fn normalize(&self, mut query: ListQuery) -> ListQuery {
        query.page = query.page.max(1);
        query.limit = if query.limit <= 0 {
            self.config.page_size
        } else {
            query.limit.min(self.config.max_page_size)
        };
        query
    }

    pub async fn list_comments(
        &self,
        query: ListQuery,
        include_replies: bool,
        viewer: Option<Viewer>,
    ) -> CommentResult<CommentPage> {
        let query = self.normalize(query);
        let page: CachedPage = match self.cache.get_list(&query, include_replies).await {
            Some(cached) => cached,
            None => {
                let (mut comments, total) = self.store.list(&query).await?;
                self.add_reply_counts(&mut comments).await?;
                let mut replies = if include_replies && !comments.is_empty() {
                    let ids: Vec<Uuid> = comments.iter().map(|c| c.id).collect();
                    self.store.replies_of(&ids).await?
                } else {
                    Vec::new()
                };
                self.add_reply_counts(&mut replies).await?;
                let page = CachedPage {
                    comments,
                    replies,
                    total,
                };
                self.cache.put_list(&query, include_replies, &page).await;
                page
            }
        };

        let mut by_parent: HashMap<Uuid, Vec<Comment>> = HashMap::new();
        for reply in page.replies {
            if let Some(parent_id) = reply.hierarchy.parent_id {
                by_parent.entry(parent_id).or_default().push(reply);
            }
        }
        let viewer = viewer.as_ref();
        let comments = page
            .comments
            .into_iter()
            .map(|c| {
                let replies = by_parent
                    .remove(&c.id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|r| self.view(r, viewer, Vec::new()))
                    .collect();
                self.view(c, viewer, replies)
            })
            .collect();

        Ok(CommentPage {
            comments,
            pagination: Pagination::new(query.page, query.limit, page.total),
        })
    }

    pub async fn comment_stats(&self, story_id: Uuid) -> CommentResult<CommentStats> {
        if let Some(stats) = self.cache.get_stats(story_id).await {
            return Ok(stats);
        }
        let stats = self.store.stats(story_id).await?;
        self.cache.put_stats(story_id, &stats).await;
        Ok(stats)
    }

    // Admin

    pub async fn moderate(
        &self,
        id: Uuid,
        moderator_id: Uuid,
        action: &str,
        reason: Option<String>,
    ) -> CommentResult<Comment> {
        let comment = self
            .moderation
            .moderate_comment(id, moderator_id, action, reason)
            .await?;
        self.cache.invalidate_all().await;
        Ok(comment)
    }

    pub async fn bulk_moderate(
        &self,
        ids: &[Uuid],
        moderator_id: Uuid,
        action: &str,
        reason: Option<String>,
    ) -> CommentResult<BulkOutcome> {
        let outcome = self
            .moderation
            .bulk_moderate(ids, moderator_id, action, reason)
            .await?;
        self.cache.invalidate_all().await;
        Ok(outcome)
    }

    pub async fn auto_moderate(
        &self,
        req: &AutoModerateRequest,
    ) -> CommentResult<AutoModerationReport> {
        let defaults = self.moderation.default_criteria();
        let criteria = AutoModerationCriteria {
            spam_threshold: req.spam_threshold.unwrap_or(defaults.spam_threshold),
            toxicity_threshold: req.toxicity_threshold.unwrap_or(defaults.toxicity_threshold),
            flag_threshold: req.flag_threshold.unwrap_or(defaults.flag_threshold),
            limit: req
                .limit
                .unwrap_or(defaults.limit)
                .clamp(1, MAX_AUTO_MODERATION_BATCH),
        };
        let report = self.moderation.auto_moderate(&criteria).await?;
        if !report.actions.is_empty() {
            self.cache.invalidate_all().await;
        }
        Ok(report)
    }

    pub async fn moderation_queue(
        &self,
        page: i64,
        limit: i64,
    ) -> CommentResult<(Vec<Comment>, Pagination)> {
        let (page, limit) = self.page_window(page, limit);
        let comments = self
            .store
            .moderation_queue(limit, (page - 1) * limit)
            .await?;
        let pagination = Pagination::open_ended(page, limit, comments.len());
        Ok((comments, pagination))
    }

    pub async fn reported(
        &self,
        resolution: Option<FlagResolution>,
        page: i64,
        limit: i64,
    ) -> CommentResult<(Vec<Comment>, Pagination)> {
        let (page, limit) = self.page_window(page, limit);
        let comments = self
            .store
            .reported(resolution, limit, (page - 1) * limit)
            .await?;
        let pagination = Pagination::open_ended(page, limit, comments.len());
        Ok((comments, pagination))
    }

    pub async fn resolve_report(
        &self,
        id: Uuid,
        moderator_id: Uuid,
        req: ResolveReportRequest,
    ) -> CommentResult<Comment> {
        let outcome = if req.escalate {
            ReportOutcome::Escalated
        } else {
            ReportOutcome::Resolved
        };
        let comment = self
            .moderation
            .resolve_report(id, moderator_id, outcome, req.action.as_deref(), req.note)
            .await?;
        self.cache.invalidate_all().await;
        Ok(comment)
    }

    pub async fn dismiss_report(&self, id: Uuid, moderator_id: Uuid) -> CommentResult<Comment> {
        let comment = self.moderation.dismiss_report(id, moderator_id).await?;
        self.cache.invalidate_all().await;
        Ok(comment)
    }

    pub async fn hard_delete(
        &self,
        id: Uuid,
        moderator_id: Uuid,
        reason: Option<String>,
    ) -> CommentResult<Deleted> {
        let comment = self.moderation.hard_delete(id, moderator_id, reason).await?;

        let mut effects = SideEffects::default();
        if comment.is_active() {
            effects.record(
                self.collab
                    .users
                    .increment_comment_count(comment.author_id, -1)
                    .await,
            );
            self.bump_targets(&comment.target, -1, &mut effects).await;
        }
        self.cache.invalidate_all().await;
        Ok(Deleted {
            comment,
            side_effects: effects,
        })
    }

    pub async fn audit_log(&self, page: i64, limit: i64) -> CommentResult<(Vec<AuditRecord>, Pagination)> {
        let (page, limit) = self.page_window(page, limit);
        let records = self
            .collab
            .admin
            .recent_actions(limit, (page - 1) * limit)
            .await?;
        let pagination = Pagination::open_ended(page, limit, records.len());
        Ok((records, pagination))
    }

    fn page_window(&self, page: i64, limit: i64) -> (i64, i64) {
        let limit = if limit <= 0 {
            self.config.page_size
        } else {
            limit.min(self.config.max_page_size)
        };
        (page.max(1), limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::comment::{CommentContent, Hierarchy};

    fn comment(author: Uuid, created_at: DateTime<Utc>) -> Comment {
        let id = Uuid::new_v4();
        Comment {
            id,
            author_id: author,
            target: Target {
                story_id: Uuid::new_v4(),
                chapter_id: None,
                kind: TargetKind::Story,
            },
            content: CommentContent {
                original: "hi".into(),
                sanitized: "hi".into(),
                mentions: vec![],
                quote: None,
            },
            hierarchy: Hierarchy::root(id),
            engagement: Engagement::default(),
            moderation: Moderation::default(),
            metadata: Metadata::default(),
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn edit_window_closes_after_configured_minutes() {
        let author = Uuid::new_v4();
        let now = Utc::now();
        let fresh = comment(author, now - Duration::minutes(29));
        let stale = comment(author, now - Duration::minutes(31));

        assert!(can_edit(&fresh, author, now, 30));
        assert!(!can_edit(&stale, author, now, 30));
        assert!(!can_edit(&fresh, Uuid::new_v4(), now, 30));
    }

    #[test]
    fn admins_can_delete_any_active_comment() {
        let c = comment(Uuid::new_v4(), Utc::now());
        let admin = Viewer {
            id: Uuid::new_v4(),
            role: UserRole::Admin,
        };
        let stranger = Viewer {
            id: Uuid::new_v4(),
            role: UserRole::User,
        };
        assert!(can_delete(&c, &admin));
        assert!(!can_delete(&c, &stranger));
    }

    #[test]
    fn chapter_target_requires_chapter_id() {
        let mut target = Target {
            story_id: Uuid::new_v4(),
            chapter_id: None,
            kind: TargetKind::Chapter,
        };
        assert!(matches!(
            validate_target(&target),
            Err(CommentError::InvalidTarget(_))
        ));
        target.chapter_id = Some(Uuid::new_v4());
        assert!(validate_target(&target).is_ok());
    }

    #[test]
    fn pagination_reports_remaining_pages() {
        let p = Pagination::new(1, 20, 45);
        assert_eq!(p.total_pages, Some(3));
        assert!(p.has_more);
        assert!(!Pagination::new(3, 20, 45).has_more);
    }
}
