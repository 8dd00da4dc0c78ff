use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ModerationConfig;
use crate::error::{CommentError, CommentResult};
use crate::models::comment::{
    AuditRecord, AutoModeration, Comment, FlagEntry, FlagReason, FlagResolution, Flags, ModerationStatus,
};
use crate::services::collaborators::{audit_record, AdminNotifier};
use crate::services::quote;
use crate::services::store::{AutoModerationCriteria, CommentStore, StatusChange};

static URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(https?://|www\.)\S+").expect("static regex"));
static SPAM_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(https?://|www\.)\S+",
        r"(?i)\b(buy|order|shop) now\b",
        r"(?i)\bclick (here|this link)\b",
        r"(?i)\b(free|easy|fast) (money|cash|coins)\b",
        r"(?i)\b(earn|make) \$?\d+",
        r"(?i)\b(telegram|whatsapp|discord\.gg)\b",
        r"(?i)\b(check out|visit|follow) my (channel|page|profile|site)\b",
        r"(?i)\b(crypto|bitcoin|nft) (giveaway|airdrop)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});
static SHOUTED_PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[!?]{3,}").expect("static regex"));

const SHORT_TEXT_LEN: usize = 50;
const LONG_TEXT_LEN: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Analysis {
    #[serde(rename = "spamScore")]
    pub spam_score: f64,
    #[serde(rename = "toxicityScore")]
    pub toxicity_score: f64,
}

/// Share of uppercase letters among alphabetic characters.
pub fn caps_ratio(text: &str) -> f64 {
    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    if letters == 0 {
        return 0.0;
    }
    let upper = text.chars().filter(|c| c.is_uppercase()).count();
    upper as f64 / letters as f64
}

/// Share of characters that are neither alphanumeric nor whitespace.
pub fn special_char_ratio(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let special = text
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count();
    special as f64 / total as f64
}

pub fn longest_run(text: &str) -> usize {
    let mut best = 0;
    let mut run = 0;
    let mut prev: Option<char> = None;
    for ch in text.chars() {
        if Some(ch) == prev {
            run += 1;
        } else {
            run = 1;
            prev = Some(ch);
        }
        best = best.max(run);
    }
    best
}

pub fn spam_score(text: &str) -> f64 {
    let len = text.chars().count();
    let mut score = 0.0;

    if len > 10 && caps_ratio(text) > 0.7 {
        score += 0.3;
    }
    if special_char_ratio(text) > 0.5 {
        score += 0.3;
    }
    if longest_run(text) >= 5 {
        score += 0.2;
    }
    score += 0.2 * SPAM_PATTERNS.iter().filter(|p| p.is_match(text)).count() as f64;
    if len > LONG_TEXT_LEN {
        score += 0.1;
    }
    if len < SHORT_TEXT_LEN && URL.is_match(text) {
        score += 0.4;
    }

    clamp_score(score)
}

pub fn toxicity_score(text: &str, blocked_terms: &[String]) -> f64 {
    let lowered = text.to_lowercase();
    let hits = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .filter(|token| blocked_terms.iter().any(|t| t == token))
        .count();
    let mut score = 0.2 * hits as f64;

    if SHOUTED_PUNCTUATION.is_match(text) {
        score += 0.1;
    }
    let shouted_words = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphabetic()))
        .filter(|w| w.chars().count() >= 4 && w.chars().all(|c| c.is_alphabetic() && c.is_uppercase()))
        .count();
    if shouted_words > 2 {
        score += 0.2;
    }

    clamp_score(score)
}

fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Who is asking for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Automatic,
    Owner,
    Moderator,
}

pub fn can_transition(from: ModerationStatus, to: ModerationStatus, actor: Actor) -> bool {
    use ModerationStatus::*;
    match actor {
        Actor::Moderator => true,
        Actor::Owner => matches!((from, to), (Active | Pending, Deleted)),
        Actor::Automatic => matches!(
            (from, to),
            (Active, Hidden | Deleted | Spam | Pending) | (Pending, Active | Hidden | Deleted | Spam)
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Approve,
    Hide,
    Delete,
    Spam,
}

impl ModerationAction {
    pub fn target_status(&self) -> ModerationStatus {
        match self {
            ModerationAction::Approve => ModerationStatus::Active,
            ModerationAction::Hide => ModerationStatus::Hidden,
            ModerationAction::Delete => ModerationStatus::Deleted,
            ModerationAction::Spam => ModerationStatus::Spam,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationAction::Approve => "approve",
            ModerationAction::Hide => "hide",
            ModerationAction::Delete => "delete",
            ModerationAction::Spam => "spam",
        }
    }
}

impl FromStr for ModerationAction {
    type Err = CommentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" | "restore" => Ok(ModerationAction::Approve),
            "hide" => Ok(ModerationAction::Hide),
            "delete" => Ok(ModerationAction::Delete),
            "spam" => Ok(ModerationAction::Spam),
            other => Err(CommentError::InvalidAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkFailure {
    pub id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkOutcome {
    pub successful: Vec<Uuid>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoAction {
    pub id: Uuid,
    pub status: ModerationStatus,
    pub rule: &'static str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AutoModerationReport {
    pub scanned: usize,
    pub actions: Vec<AutoAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Resolved,
    Escalated,
}

/// Owns every write to `moderation.status`.
#[derive(Clone)]
pub struct ModerationEngine {
    store: Arc<dyn CommentStore>,
    admin: Arc<dyn AdminNotifier>,
    config: ModerationConfig,
}

impl ModerationEngine {
    pub fn new(
        store: Arc<dyn CommentStore>,
        admin: Arc<dyn AdminNotifier>,
        config: ModerationConfig,
    ) -> Self {
        Self {
            store,
            admin,
            config,
        }
    }

    pub fn config(&self) -> &ModerationConfig {
        &self.config
    }

    pub fn analyze(&self, text: &str) -> Analysis {
        Analysis {
            spam_score: spam_score(text),
            toxicity_score: toxicity_score(text, &self.config.blocked_terms),
        }
    }

    /// Scores the comment text and parks an active comment as pending when either score is high.
    pub async fn screen(&self, comment: Comment) -> CommentResult<Comment> {
        let analysis = self.analyze(quote::body_without_quote(&comment));
        let auto = AutoModeration {
            spam_score: analysis.spam_score,
            toxicity_score: analysis.toxicity_score,
            checked_at: Some(Utc::now()),
        };
        self.store.set_auto_moderation(comment.id, &auto).await?;

        let threshold = self.config.pending_threshold;
        let mut comment = comment;
        comment.moderation.auto_moderation = auto;
        let flagged = analysis.spam_score >= threshold || analysis.toxicity_score >= threshold;
        if flagged && comment.is_active() {
            tracing::info!(
                comment_id = %comment.id,
                spam = analysis.spam_score,
                toxicity = analysis.toxicity_score,
                "comment held for review"
            );
            comment = self
                .transition(
                    comment,
                    ModerationStatus::Pending,
                    Actor::Automatic,
                    None,
                    Some("automatic screening".to_string()),
                )
                .await?;
        }
        Ok(comment)
    }

    /// Applies a status change after checking the state machine.
    pub async fn transition(
        &self,
        comment: Comment,
        to: ModerationStatus,
        actor: Actor,
        moderator: Option<Uuid>,
        reason: Option<String>,
    ) -> CommentResult<Comment> {
        let from = comment.moderation.status;
        if !can_transition(from, to, actor) {
            return Err(CommentError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let change = StatusChange {
            status: to,
            moderated_by: moderator,
            reason,
            at: Utc::now(),
        };
        let updated = self
            .store
            .set_status(comment.id, &change)
            .await?
            .ok_or(CommentError::CommentNotFound(comment.id))?;

        if matches!(to, ModerationStatus::Deleted | ModerationStatus::Spam) {
            let cascade = StatusChange {
                status: ModerationStatus::Deleted,
                reason: Some(format!("ancestor {} removed", comment.id)),
                ..change
            };
            let moved = self
                .store
                .cascade_status(&updated.hierarchy.path, updated.id, &cascade)
                .await?;
            if moved > 0 {
                tracing::debug!(comment_id = %updated.id, moved, "cascaded removal to replies");
            }
        }
        Ok(updated)
    }

    pub async fn moderate_comment(
        &self,
        id: Uuid,
        moderator_id: Uuid,
        action: &str,
        reason: Option<String>,
    ) -> CommentResult<Comment> {
        let action: ModerationAction = action.parse()?;
        let comment = self
            .store
            .get(id)
            .await?
            .ok_or(CommentError::CommentNotFound(id))?;

        let updated = self
            .transition(
                comment,
                action.target_status(),
                Actor::Moderator,
                Some(moderator_id),
                reason.clone(),
            )
            .await?;

        tracing::info!(comment_id = %id, moderator = %moderator_id, action = action.as_str(), "comment moderated");
        self.audit(audit_record(
            moderator_id,
            &format!("moderate_{}", action.as_str()),
            Some(id),
            reason,
            None,
        ))
        .await;
        Ok(updated)
    }

    /// Moderates each id independently; one failure never stops the batch.
    pub async fn bulk_moderate(
        &self,
        ids: &[Uuid],
        moderator_id: Uuid,
        action: &str,
        reason: Option<String>,
    ) -> CommentResult<BulkOutcome> {
        action.parse::<ModerationAction>()?;

        let mut outcome = BulkOutcome::default();
        for &id in ids {
            match self
                .moderate_comment(id, moderator_id, action, reason.clone())
                .await
            {
                Ok(_) => outcome.successful.push(id),
                Err(e) => outcome.failed.push(BulkFailure {
                    id,
                    error: e.to_string(),
                }),
            }
        }
        tracing::info!(
            moderator = %moderator_id,
            ok = outcome.successful.len(),
            failed = outcome.failed.len(),
            "bulk moderation finished"
        );
        Ok(outcome)
    }

    /// First matching rule wins: spam, then toxicity, then flag count.
    pub fn auto_rule(
        comment: &Comment,
        criteria: &AutoModerationCriteria,
    ) -> Option<(ModerationStatus, &'static str)> {
        let auto = &comment.moderation.auto_moderation;
        if auto.spam_score >= criteria.spam_threshold {
            Some((ModerationStatus::Spam, "spam_score"))
        } else if auto.toxicity_score >= criteria.toxicity_threshold {
            Some((ModerationStatus::Hidden, "toxicity_score"))
        } else if comment.moderation.flags.count >= criteria.flag_threshold {
            Some((ModerationStatus::Pending, "flag_count"))
        } else {
            None
        }
    }

    pub fn default_criteria(&self) -> AutoModerationCriteria {
        AutoModerationCriteria {
            spam_threshold: self.config.spam_threshold,
            toxicity_threshold: self.config.toxicity_threshold,
            flag_threshold: self.config.flag_threshold,
            limit: self.config.auto_limit,
        }
    }

    pub async fn auto_moderate(
        &self,
        criteria: &AutoModerationCriteria,
    ) -> CommentResult<AutoModerationReport> {
        let candidates = self.store.auto_moderation_candidates(criteria).await?;
        let mut report = AutoModerationReport {
            scanned: candidates.len(),
            actions: Vec::new(),
        };

        for comment in candidates {
            let Some((status, rule)) = Self::auto_rule(&comment, criteria) else {
                continue;
            };
            let id = comment.id;
            match self
                .transition(
                    comment,
                    status,
                    Actor::Automatic,
                    None,
                    Some(format!("auto-moderation: {rule}")),
                )
                .await
            {
                Ok(_) => report.actions.push(AutoAction { id, status, rule }),
                Err(e) => tracing::warn!(comment_id = %id, error = %e, "auto-moderation skipped"),
            }
        }

        tracing::info!(
            scanned = report.scanned,
            applied = report.actions.len(),
            "auto-moderation sweep"
        );
        Ok(report)
    }

    /// Records a user flag. Never changes the comment's status.
    pub async fn add_flag(
        &self,
        comment: &Comment,
        user_id: Uuid,
        reason: FlagReason,
        description: Option<String>,
    ) -> CommentResult<Flags> {
        if comment.author_id == user_id {
            return Err(CommentError::SelfFlagNotAllowed);
        }
        let entry = FlagEntry {
            user_id,
            reason,
            description,
            created_at: Utc::now(),
        };
        let flags = self
            .store
            .add_flag(comment.id, entry)
            .await?
            .ok_or(CommentError::CommentNotFound(comment.id))?;

        if flags.count >= self.config.flag_threshold {
            tracing::warn!(comment_id = %comment.id, flags = flags.count, "comment crossed flag threshold");
        }
        Ok(flags)
    }

    pub async fn resolve_report(
        &self,
        id: Uuid,
        moderator_id: Uuid,
        outcome: ReportOutcome,
        action: Option<&str>,
        note: Option<String>,
    ) -> CommentResult<Comment> {
        let action = action.map(str::parse::<ModerationAction>).transpose()?;
        self.require_report(id).await?;

        if let Some(action) = action {
            self.moderate_comment(id, moderator_id, action.as_str(), note.clone())
                .await?;
        }
        let resolution = match outcome {
            ReportOutcome::Resolved => FlagResolution::Resolved,
            ReportOutcome::Escalated => FlagResolution::Escalated,
        };
        self.store.set_flag_resolution(id, resolution).await?;

        self.audit(audit_record(
            moderator_id,
            &format!("report_{}", resolution.as_str()),
            Some(id),
            note,
            None,
        ))
        .await;
        self.store
            .get(id)
            .await?
            .ok_or(CommentError::CommentNotFound(id))
    }

    pub async fn dismiss_report(&self, id: Uuid, moderator_id: Uuid) -> CommentResult<Comment> {
        self.require_report(id).await?;
        self.store
            .set_flag_resolution(id, FlagResolution::Dismissed)
            .await?;

        self.audit(audit_record(moderator_id, "report_dismissed", Some(id), None, None))
            .await;
        self.store
            .get(id)
            .await?
            .ok_or(CommentError::CommentNotFound(id))
    }

    async fn audit(&self, record: AuditRecord) {
        if let Err(e) = self.admin.log_admin_action(&record).await {
            tracing::warn!(action = %record.action, error = %e, "admin action not logged");
        }
    }

    async fn require_report(&self, id: Uuid) -> CommentResult<Comment> {
        let comment = self
            .store
            .get(id)
            .await?
            .ok_or(CommentError::CommentNotFound(id))?;
        if comment.moderation.flags.count == 0 {
            return Err(CommentError::NoOpenReport(id));
        }
        Ok(comment)
    }

    /// Permanently removes a comment. The audit record is written first and is mandatory.
    pub async fn hard_delete(
        &self,
        id: Uuid,
        moderator_id: Uuid,
        reason: Option<String>,
    ) -> CommentResult<Comment> {
        let comment = self
            .store
            .get(id)
            .await?
            .ok_or(CommentError::CommentNotFound(id))?;

        let snapshot = serde_json::to_value(&comment)?;
        let record = audit_record(moderator_id, "hard_delete", Some(id), reason, Some(snapshot));
        self.admin.log_admin_action(&record).await.map_err(|e| {
            CommentError::InvariantViolation(format!("audit log unavailable: {e}"))
        })?;

        if !self.store.hard_delete(id).await? {
            return Err(CommentError::CommentNotFound(id));
        }
        tracing::warn!(comment_id = %id, moderator = %moderator_id, "comment hard-deleted");
        Ok(comment)
    }
}
