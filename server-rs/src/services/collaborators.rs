//! Services the comment core calls into but does not own.
//!
//! Every call is best effort: failures come back as [`SideEffectError`] and the
//! caller records them instead of failing the primary operation.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{CommentResult, SideEffectError};
use crate::models::comment::{AuditRecord, Comment};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn increment_comment_count(&self, user_id: Uuid, delta: i32)
        -> Result<(), SideEffectError>;

    async fn display_name(&self, user_id: Uuid) -> Result<Option<String>, SideEffectError>;

    /// Resolves usernames to ids; unknown names are omitted.
    async fn find_by_usernames(
        &self,
        usernames: &[String],
    ) -> Result<Vec<(String, Uuid)>, SideEffectError>;
}

#[async_trait]
pub trait TargetStats: Send + Sync {
    async fn increment_story_comment_count(
        &self,
        story_id: Uuid,
        delta: i32,
    ) -> Result<(), SideEffectError>;

    async fn increment_chapter_comment_count(
        &self,
        chapter_id: Uuid,
        delta: i32,
    ) -> Result<(), SideEffectError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn comment_reply(
        &self,
        recipient: Uuid,
        reply: &Comment,
        parent_id: Uuid,
    ) -> Result<(), SideEffectError>;

    async fn quoted_reply(
        &self,
        recipient: Uuid,
        reply: &Comment,
        quoted_comment_id: Uuid,
    ) -> Result<(), SideEffectError>;

    async fn mention(&self, recipient: Uuid, comment: &Comment) -> Result<(), SideEffectError>;
}

#[async_trait]
pub trait AdminNotifier: Send + Sync {
    async fn comment_deletion(
        &self,
        owner: Uuid,
        comment: &Comment,
        admin_id: Uuid,
        reason: Option<&str>,
    ) -> Result<(), SideEffectError>;

    async fn log_admin_action(&self, record: &AuditRecord) -> Result<(), SideEffectError>;

    async fn recent_actions(&self, limit: i64, offset: i64) -> CommentResult<Vec<AuditRecord>>;
}

fn notification_payload(comment: &Comment) -> Value {
    json!({
        "commentId": comment.id,
        "authorId": comment.author_id,
        "storyId": comment.target.story_id,
        "chapterId": comment.target.chapter_id,
        "preview": crate::services::quote::truncate(&comment.content.sanitized, 80),
    })
}

/// Postgres-backed collaborators sharing the comment pool.
#[derive(Clone)]
pub struct PgCollaborators {
    db: PgPool,
}

impl PgCollaborators {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn notify(
        &self,
        effect: &'static str,
        user_id: Uuid,
        payload: Value,
    ) -> Result<(), SideEffectError> {
        sqlx::query("INSERT INTO notifications (user_id, kind, payload, created_at) VALUES ($1, $2, $3, NOW())")
            .bind(user_id)
            .bind(effect)
            .bind(payload)
            .execute(&self.db)
            .await
            .map(|_| ())
            .map_err(|e| SideEffectError::new(effect, e.to_string()))
    }
}

#[async_trait]
impl UserDirectory for PgCollaborators {
    async fn increment_comment_count(
        &self,
        user_id: Uuid,
        delta: i32,
    ) -> Result<(), SideEffectError> {
        sqlx::query("UPDATE users SET comment_count = GREATEST(comment_count + $2, 0) WHERE id = $1")
            .bind(user_id)
            .bind(delta)
            .execute(&self.db)
            .await
            .map(|_| ())
            .map_err(|e| SideEffectError::new("user_comment_count", e.to_string()))
    }

    async fn display_name(&self, user_id: Uuid) -> Result<Option<String>, SideEffectError> {
        sqlx::query_scalar("SELECT username FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| SideEffectError::new("user_lookup", e.to_string()))
    }

    async fn find_by_usernames(
        &self,
        usernames: &[String],
    ) -> Result<Vec<(String, Uuid)>, SideEffectError> {
        if usernames.is_empty() {
            return Ok(vec![]);
        }
        sqlx::query_as("SELECT username, id FROM users WHERE username = ANY($1)")
            .bind(usernames)
            .fetch_all(&self.db)
            .await
            .map_err(|e| SideEffectError::new("mention_lookup", e.to_string()))
    }
}

#[async_trait]
impl TargetStats for PgCollaborators {
    async fn increment_story_comment_count(
        &self,
        story_id: Uuid,
        delta: i32,
    ) -> Result<(), SideEffectError> {
        sqlx::query("UPDATE stories SET comment_count = GREATEST(comment_count + $2, 0) WHERE id = $1")
            .bind(story_id)
            .bind(delta)
            .execute(&self.db)
            .await
            .map(|_| ())
            .map_err(|e| SideEffectError::new("story_comment_count", e.to_string()))
    }

    async fn increment_chapter_comment_count(
        &self,
        chapter_id: Uuid,
        delta: i32,
    ) -> Result<(), SideEffectError> {
        sqlx::query("UPDATE chapters SET comment_count = GREATEST(comment_count + $2, 0) WHERE id = $1")
            .bind(chapter_id)
            .bind(delta)
            .execute(&self.db)
            .await
            .map(|_| ())
            .map_err(|e| SideEffectError::new("chapter_comment_count", e.to_string()))
    }
}

#[async_trait]
impl Notifier for PgCollaborators {
    async fn comment_reply(
        &self,
        recipient: Uuid,
        reply: &Comment,
        parent_id: Uuid,
    ) -> Result<(), SideEffectError> {
        let mut payload = notification_payload(reply);
        payload["parentId"] = json!(parent_id);
        self.notify("comment_reply", recipient, payload).await
    }

    async fn quoted_reply(
        &self,
        recipient: Uuid,
        reply: &Comment,
        quoted_comment_id: Uuid,
    ) -> Result<(), SideEffectError> {
        let mut payload = notification_payload(reply);
        payload["quotedCommentId"] = json!(quoted_comment_id);
        self.notify("quoted_reply", recipient, payload).await
    }

    async fn mention(&self, recipient: Uuid, comment: &Comment) -> Result<(), SideEffectError> {
        self.notify("comment_mention", recipient, notification_payload(comment))
            .await
    }
}

#[async_trait]
impl AdminNotifier for PgCollaborators {
    async fn comment_deletion(
        &self,
        owner: Uuid,
        comment: &Comment,
        admin_id: Uuid,
        reason: Option<&str>,
    ) -> Result<(), SideEffectError> {
        let mut payload = notification_payload(comment);
        payload["adminId"] = json!(admin_id);
        payload["reason"] = json!(reason);
        self.notify("comment_deleted_by_admin", owner, payload).await
    }

    async fn log_admin_action(&self, record: &AuditRecord) -> Result<(), SideEffectError> {
        sqlx::query(
            "INSERT INTO moderation_log (id, admin_id, action, comment_id, reason, snapshot, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id)
        .bind(record.admin_id)
        .bind(&record.action)
        .bind(record.comment_id)
        .bind(&record.reason)
        .bind(&record.snapshot)
        .bind(record.created_at)
        .execute(&self.db)
        .await
        .map(|_| ())
        .map_err(|e| SideEffectError::new("admin_action_log", e.to_string()))
    }

    async fn recent_actions(&self, limit: i64, offset: i64) -> CommentResult<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditRecord>(
            r#"SELECT id, admin_id, action, comment_id, reason, snapshot, created_at
            FROM moderation_log ORDER BY created_at DESC LIMIT $1 OFFSET $2"#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentNotification {
    pub kind: &'static str,
    pub recipient: Uuid,
    pub comment_id: Uuid,
}

/// In-process collaborators for the memory backend; they keep what they receive.
#[derive(Clone, Default)]
pub struct InMemoryCollaborators {
    usernames: Arc<RwLock<HashMap<Uuid, String>>>,
    user_counts: Arc<RwLock<HashMap<Uuid, i32>>>,
    target_counts: Arc<RwLock<HashMap<Uuid, i32>>>,
    notifications: Arc<RwLock<Vec<SentNotification>>>,
    audit: Arc<RwLock<Vec<AuditRecord>>>,
    fail_notifications: Arc<AtomicBool>,
    fail_counters: Arc<AtomicBool>,
}

impl InMemoryCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_user(&self, id: Uuid, username: &str) {
        self.usernames.write().await.insert(id, username.to_string());
    }

    pub async fn user_comment_count(&self, id: Uuid) -> i32 {
        self.user_counts.read().await.get(&id).copied().unwrap_or(0)
    }

    pub async fn target_comment_count(&self, id: Uuid) -> i32 {
        self.target_counts.read().await.get(&id).copied().unwrap_or(0)
    }

    pub async fn notifications(&self) -> Vec<SentNotification> {
        self.notifications.read().await.clone()
    }

    pub async fn audit_log(&self) -> Vec<AuditRecord> {
        self.audit.read().await.clone()
    }

    /// Makes notification and audit writes fail, for exercising best-effort paths.
    pub fn set_fail_notifications(&self, fail: bool) {
        self.fail_notifications.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_counters(&self, fail: bool) {
        self.fail_counters.store(fail, Ordering::SeqCst);
    }

    async fn push(
        &self,
        kind: &'static str,
        recipient: Uuid,
        comment_id: Uuid,
    ) -> Result<(), SideEffectError> {
        if self.fail_notifications.load(Ordering::SeqCst) {
            return Err(SideEffectError::new(kind, "notification backend unavailable"));
        }
        self.notifications.write().await.push(SentNotification {
            kind,
            recipient,
            comment_id,
        });
        Ok(())
    }

    async fn bump(
        &self,
        map: &RwLock<HashMap<Uuid, i32>>,
        effect: &'static str,
        id: Uuid,
        delta: i32,
    ) -> Result<(), SideEffectError> {
        if self.fail_counters.load(Ordering::SeqCst) {
            return Err(SideEffectError::new(effect, "counter backend unavailable"));
        }
        let mut counts = map.write().await;
        let entry = counts.entry(id).or_insert(0);
        *entry = (*entry + delta).max(0);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryCollaborators {
    async fn increment_comment_count(
        &self,
        user_id: Uuid,
        delta: i32,
    ) -> Result<(), SideEffectError> {
        self.bump(&self.user_counts, "user_comment_count", user_id, delta)
            .await
    }

    async fn display_name(&self, user_id: Uuid) -> Result<Option<String>, SideEffectError> {
        Ok(self.usernames.read().await.get(&user_id).cloned())
    }

    async fn find_by_usernames(
        &self,
        usernames: &[String],
    ) -> Result<Vec<(String, Uuid)>, SideEffectError> {
        let users = self.usernames.read().await;
        Ok(users
            .iter()
            .filter(|(_, name)| usernames.contains(name))
            .map(|(id, name)| (name.clone(), *id))
            .collect())
    }
}

#[async_trait]
impl TargetStats for InMemoryCollaborators {
    async fn increment_story_comment_count(
        &self,
        story_id: Uuid,
        delta: i32,
    ) -> Result<(), SideEffectError> {
        self.bump(&self.target_counts, "story_comment_count", story_id, delta)
            .await
    }

    async fn increment_chapter_comment_count(
        &self,
        chapter_id: Uuid,
        delta: i32,
    ) -> Result<(), SideEffectError> {
        self.bump(&self.target_counts, "chapter_comment_count", chapter_id, delta)
            .await
    }
}

#[async_trait]
impl Notifier for InMemoryCollaborators {
    async fn comment_reply(
        &self,
        recipient: Uuid,
        reply: &Comment,
        _parent_id: Uuid,
    ) -> Result<(), SideEffectError> {
        self.push("comment_reply", recipient, reply.id).await
    }

    async fn quoted_reply(
        &self,
        recipient: Uuid,
        reply: &Comment,
        _quoted_comment_id: Uuid,
    ) -> Result<(), SideEffectError> {
        self.push("quoted_reply", recipient, reply.id).await
    }

    async fn mention(&self, recipient: Uuid, comment: &Comment) -> Result<(), SideEffectError> {
        self.push("comment_mention", recipient, comment.id).await
    }
}

#[async_trait]
impl AdminNotifier for InMemoryCollaborators {
    async fn comment_deletion(
        &self,
        owner: Uuid,
        comment: &Comment,
        _admin_id: Uuid,
        _reason: Option<&str>,
    ) -> Result<(), SideEffectError> {
        self.push("comment_deleted_by_admin", owner, comment.id).await
    }

    async fn log_admin_action(&self, record: &AuditRecord) -> Result<(), SideEffectError> {
        if self.fail_notifications.load(Ordering::SeqCst) {
            return Err(SideEffectError::new(
                "admin_action_log",
                "audit backend unavailable",
            ));
        }
        self.audit.write().await.push(record.clone());
        Ok(())
    }

    async fn recent_actions(&self, limit: i64, offset: i64) -> CommentResult<Vec<AuditRecord>> {
        let audit = self.audit.read().await;
        Ok(audit
            .iter()
            .rev()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

pub fn audit_record(
    admin_id: Uuid,
    action: &str,
    comment_id: Option<Uuid>,
    reason: Option<String>,
    snapshot: Option<Value>,
) -> AuditRecord {
    AuditRecord {
        id: Uuid::new_v4(),
        admin_id,
        action: action.to_string(),
        comment_id,
        reason,
        snapshot,
        created_at: Utc::now(),
    }
}
