use uuid::Uuid;

use crate::error::{CommentError, CommentResult};
use crate::models::comment::{Comment, ModerationStatus, QuoteData};
use crate::services::store::CommentStore;

pub const MAX_STORED_LEVEL: u8 = 2;
pub const QUOTE_PREVIEW_LEN: usize = 50;

/// Upper bound on parent hops; stored trees are at most three levels deep.
const MAX_ANCESTOR_HOPS: usize = 8;

pub fn should_convert(target_level: u8, parent: &Comment) -> bool {
    target_level > MAX_STORED_LEVEL || parent.hierarchy.level >= MAX_STORED_LEVEL
}

/// Shortens `text` to at most `max_len` characters, ending in `...`.
///
/// Prefers breaking on whitespace inside the last 30% of the window.
pub fn truncate(text: &str, max_len: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    if chars.len() <= max_len {
        return text.to_string();
    }
    if max_len <= 3 {
        return ".".repeat(max_len);
    }

    let hard_cut = max_len - 3;
    let window_start = max_len - (max_len * 3 / 10);
    let cut = chars[..=hard_cut]
        .iter()
        .rposition(|c| c.is_whitespace())
        .filter(|&pos| pos >= window_start.min(hard_cut) && pos > 0)
        .unwrap_or(hard_cut);

    let mut out: String = chars[..cut].iter().collect();
    out = out.trim_end().to_string();
    out.push_str("...");
    out
}

/// Text the user actually wrote, without a quote preamble added on creation.
pub fn body_without_quote(comment: &Comment) -> &str {
    let original = comment.content.original.as_str();
    match &comment.content.quote {
        Some(q) => strip_preamble(original, &q.quoted_username, &q.quoted_text),
        None => original,
    }
}

/// Removes exactly the `@user: quoted` line written by [`format_with_quote`].
pub fn strip_preamble<'a>(original: &'a str, username: &str, quoted_text: &str) -> &'a str {
    match original.strip_prefix(&format!("@{username}: {quoted_text}")) {
        Some(rest) => rest.strip_prefix("\n\n").unwrap_or(rest),
        None => original,
    }
}

pub fn build_quote(parent: &Comment, parent_author: &str) -> QuoteData {
    let full = body_without_quote(parent).trim().to_string();
    QuoteData {
        quoted_comment_id: parent.id,
        quoted_username: parent_author.to_string(),
        quoted_text: truncate(&full, QUOTE_PREVIEW_LEN),
        quoted_full_text: full,
        is_level_conversion: true,
    }
}

pub fn format_with_quote(username: &str, quoted_text: &str, new_content: &str) -> String {
    let quote_line = format!("@{username}: {quoted_text}");
    let body = new_content.trim();
    if body.is_empty() {
        quote_line
    } else {
        format!("{quote_line}\n\n{body}")
    }
}

/// Finds the level-1 ancestor a flattened reply is attached to.
///
/// Level-0 and level-1 comments are already valid parents and come back as is.
pub async fn resolve_reply_parent(
    store: &dyn CommentStore,
    original_parent: Comment,
) -> CommentResult<Comment> {
    let origin = original_parent.id;
    let mut current = original_parent;

    for _ in 0..MAX_ANCESTOR_HOPS {
        if current.hierarchy.level <= 1 {
            if matches!(
                current.moderation.status,
                ModerationStatus::Deleted | ModerationStatus::Spam
            ) {
                return Err(CommentError::ParentNotFound(origin));
            }
            return Ok(current);
        }
        let next_id: Uuid = match current.hierarchy.parent_id {
            Some(pid) if pid != current.id => pid,
            _ if current.hierarchy.root_id != current.id => current.hierarchy.root_id,
            _ => return Err(CommentError::ParentResolution(origin)),
        };
        current = store
            .get(next_id)
            .await?
            .ok_or(CommentError::ParentResolution(origin))?;
    }

    Err(CommentError::ParentResolution(origin))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_returned_unchanged() {
        let text = "a reply that fits";
        assert_eq!(truncate(text, 50), text);
        let exact = "x".repeat(50);
        assert_eq!(truncate(&exact, 50), exact);
    }

    #[test]
    fn empty_text_truncates_to_empty() {
        assert_eq!(truncate("", 50), "");
    }

    #[test]
    fn long_text_breaks_on_late_whitespace() {
        let text = "The quick brown fox jumps over the lazy dog and keeps on running far away";
        let out = truncate(text, 50);
        assert!(out.chars().count() <= 50);
        assert!(out.ends_with("..."));
        assert_eq!(out, "The quick brown fox jumps over the lazy dog and...");
    }

    #[test]
    fn long_text_without_whitespace_is_hard_cut() {
        let text = "y".repeat(80);
        let out = truncate(&text, 50);
        assert_eq!(out.chars().count(), 50);
        assert_eq!(&out[..47], &"y".repeat(47));
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let text = "가".repeat(60);
        let out = truncate(&text, 50);
        assert_eq!(out.chars().count(), 50);
    }

    fn quoted_reply(parent_text: &str, body: &str) -> Comment {
        use crate::models::comment::{
            CommentContent, Engagement, Hierarchy, Metadata, Moderation, Target, TargetKind,
        };
        let id = Uuid::new_v4();
        let quoted_text = truncate(parent_text, QUOTE_PREVIEW_LEN);
        let now = chrono::Utc::now();
        Comment {
            id,
            author_id: Uuid::new_v4(),
            target: Target {
                story_id: Uuid::new_v4(),
                chapter_id: None,
                kind: TargetKind::Story,
            },
            content: CommentContent {
                original: format_with_quote("amy", &quoted_text, body),
                sanitized: String::new(),
                mentions: vec![],
                quote: Some(QuoteData {
                    quoted_comment_id: Uuid::new_v4(),
                    quoted_username: "amy".into(),
                    quoted_text,
                    quoted_full_text: parent_text.into(),
                    is_level_conversion: true,
                }),
            },
            hierarchy: Hierarchy::root(id),
            engagement: Engagement::default(),
            moderation: Moderation::default(),
            metadata: Metadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn quote_body_survives_blank_lines_in_the_quote() {
        let reply = quoted_reply("Hi\n\nthere friend", "my answer");
        assert_eq!(body_without_quote(&reply), "my answer");

        let empty = quoted_reply("Hi\n\nthere friend", "");
        assert_eq!(body_without_quote(&empty), "");
    }

    #[test]
    fn quote_formatting() {
        assert_eq!(
            format_with_quote("bob", "earlier words", "my answer"),
            "@bob: earlier words\n\nmy answer"
        );
        assert_eq!(format_with_quote("bob", "earlier words", "  "), "@bob: earlier words");
    }
}
