use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Story,
    Chapter,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Story => "story",
            TargetKind::Chapter => "chapter",
        }
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "story" => Ok(TargetKind::Story),
            "chapter" => Ok(TargetKind::Chapter),
            other => Err(format!("unknown target type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(rename = "storyId")]
    pub story_id: Uuid,
    #[serde(rename = "chapterId", default)]
    pub chapter_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: TargetKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteData {
    #[serde(rename = "quotedCommentId")]
    pub quoted_comment_id: Uuid,
    #[serde(rename = "quotedUsername")]
    pub quoted_username: String,
    #[serde(rename = "quotedText")]
    pub quoted_text: String,
    #[serde(rename = "quotedFullText")]
    pub quoted_full_text: String,
    #[serde(rename = "isLevelConversion")]
    pub is_level_conversion: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentContent {
    pub original: String,
    pub sanitized: String,
    pub mentions: Vec<String>,
    pub quote: Option<QuoteData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hierarchy {
    #[serde(rename = "parentId")]
    pub parent_id: Option<Uuid>,
    pub level: u8,
    #[serde(rename = "rootId")]
    pub root_id: Uuid,
    pub path: String,
}

impl Hierarchy {
    pub fn root(id: Uuid) -> Self {
        Self {
            parent_id: None,
            level: 0,
            root_id: id,
            path: format!("/{id}/"),
        }
    }

    /// Ancestor ids from the root down, excluding self.
    pub fn ancestors(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .path
            .split('/')
            .filter(|s| !s.is_empty())
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect();
        ids.pop();
        ids
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReactionSet {
    pub count: i32,
    pub users: BTreeSet<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyStats {
    pub count: i32,
    #[serde(rename = "lastReplyAt")]
    pub last_reply_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    pub likes: ReactionSet,
    pub dislikes: ReactionSet,
    pub replies: ReplyStats,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    Active,
    Pending,
    Hidden,
    Deleted,
    Spam,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Active => "active",
            ModerationStatus::Pending => "pending",
            ModerationStatus::Hidden => "hidden",
            ModerationStatus::Deleted => "deleted",
            ModerationStatus::Spam => "spam",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ModerationStatus::Hidden | ModerationStatus::Deleted | ModerationStatus::Spam
        )
    }
}

impl fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModerationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ModerationStatus::Active),
            "pending" => Ok(ModerationStatus::Pending),
            "hidden" => Ok(ModerationStatus::Hidden),
            "deleted" => Ok(ModerationStatus::Deleted),
            "spam" => Ok(ModerationStatus::Spam),
            other => Err(format!("unknown moderation status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    Spam,
    Harassment,
    HateSpeech,
    Inappropriate,
    Spoiler,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagResolution {
    Pending,
    Resolved,
    Dismissed,
    Escalated,
}

impl FlagResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagResolution::Pending => "pending",
            FlagResolution::Resolved => "resolved",
            FlagResolution::Dismissed => "dismissed",
            FlagResolution::Escalated => "escalated",
        }
    }
}

impl FromStr for FlagResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FlagResolution::Pending),
            "resolved" => Ok(FlagResolution::Resolved),
            "dismissed" => Ok(FlagResolution::Dismissed),
            "escalated" => Ok(FlagResolution::Escalated),
            other => Err(format!("unknown flag resolution '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagEntry {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub reason: FlagReason,
    pub description: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flags {
    pub count: i32,
    pub entries: Vec<FlagEntry>,
    pub resolution: Option<FlagResolution>,
}

impl Flags {
    pub fn flagged_by(&self, user_id: Uuid) -> bool {
        self.entries.iter().any(|e| e.user_id == user_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoModeration {
    #[serde(rename = "spamScore")]
    pub spam_score: f64,
    #[serde(rename = "toxicityScore")]
    pub toxicity_score: f64,
    #[serde(rename = "checkedAt")]
    pub checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Moderation {
    pub status: ModerationStatus,
    pub flags: Flags,
    #[serde(rename = "autoModeration")]
    pub auto_moderation: AutoModeration,
    #[serde(rename = "moderatedBy")]
    pub moderated_by: Option<Uuid>,
    #[serde(rename = "moderatedAt")]
    pub moderated_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl Default for Moderation {
    fn default() -> Self {
        Self {
            status: ModerationStatus::Active,
            flags: Flags::default(),
            auto_moderation: AutoModeration::default(),
            moderated_by: None,
            moderated_at: None,
            reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditRecord {
    #[serde(rename = "previousContent")]
    pub previous_content: String,
    #[serde(rename = "editedAt")]
    pub edited_at: DateTime<Utc>,
    #[serde(rename = "editReason")]
    pub edit_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "ipHash")]
    pub ip_hash: Option<String>,
    #[serde(rename = "userAgentHash")]
    pub user_agent_hash: Option<String>,
    #[serde(rename = "editHistory")]
    pub edit_history: Vec<EditRecord>,
    #[serde(rename = "chapterPosition")]
    pub chapter_position: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    #[serde(rename = "authorId")]
    pub author_id: Uuid,
    pub target: Target,
    pub content: CommentContent,
    pub hierarchy: Hierarchy,
    pub engagement: Engagement,
    pub moderation: Moderation,
    pub metadata: Metadata,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl Comment {
    pub fn is_active(&self) -> bool {
        self.moderation.status == ModerationStatus::Active
    }

    pub fn reaction_of(&self, user_id: Uuid) -> Option<ReactionKind> {
        if self.engagement.likes.users.contains(&user_id) {
            Some(ReactionKind::Like)
        } else if self.engagement.dislikes.users.contains(&user_id) {
            Some(ReactionKind::Dislike)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Dislike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Like,
    Dislike,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Author,
    Admin,
}

impl UserRole {
    pub fn parse(role: Option<&str>) -> Self {
        match role {
            Some("admin") => UserRole::Admin,
            Some("author") => UserRole::Author,
            _ => UserRole::User,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

/// Audit trail entry written for admin actions; hard deletes carry a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditRecord {
    pub id: Uuid,
    pub admin_id: Uuid,
    pub action: String,
    pub comment_id: Option<Uuid>,
    pub reason: Option<String>,
    pub snapshot: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

// Requests

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HierarchyInput {
    #[serde(rename = "parentId")]
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataInput {
    #[serde(rename = "chapterPosition")]
    pub chapter_position: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
    pub target: Target,
    #[serde(default)]
    pub hierarchy: Option<HierarchyInput>,
    #[serde(default)]
    pub metadata: Option<MetadataInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCommentRequest {
    pub content: String,
    #[serde(rename = "edit_reason", alias = "editReason")]
    pub edit_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteCommentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactRequest {
    pub action: ReactionAction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagRequest {
    pub reason: FlagReason,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModerateRequest {
    pub action: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkModerateRequest {
    #[serde(rename = "commentIds", alias = "ids")]
    pub comment_ids: Vec<Uuid>,
    pub action: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutoModerateRequest {
    #[serde(rename = "spamThreshold")]
    pub spam_threshold: Option<f64>,
    #[serde(rename = "toxicityThreshold")]
    pub toxicity_threshold: Option<f64>,
    #[serde(rename = "flagThreshold")]
    pub flag_threshold: Option<i32>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolveReportRequest {
    /// Optional moderation action applied while resolving.
    pub action: Option<String>,
    #[serde(default)]
    pub escalate: bool,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HardDeleteRequest {
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestors_exclude_self() {
        let root = Uuid::new_v4();
        let mid = Uuid::new_v4();
        let me = Uuid::new_v4();
        let h = Hierarchy {
            parent_id: Some(mid),
            level: 2,
            root_id: root,
            path: format!("/{root}/{mid}/{me}/"),
        };
        assert_eq!(h.ancestors(), vec![root, mid]);
        assert!(Hierarchy::root(root).ancestors().is_empty());
    }

    #[test]
    fn target_deserializes_from_wire_shape() {
        let story = Uuid::new_v4();
        let t: Target =
            serde_json::from_value(serde_json::json!({"storyId": story, "type": "story"}))
                .unwrap();
        assert_eq!(t.kind, TargetKind::Story);
        assert!(t.chapter_id.is_none());
    }
}
