use uuid::Uuid;

use crate::error::{CommentError, CommentResult};
use crate::models::comment::{Comment, Hierarchy, ModerationStatus};
use crate::services::quote::{self, MAX_STORED_LEVEL};
use crate::services::store::CommentStore;

/// Where a new comment lands in its thread.
#[derive(Debug, Clone)]
pub struct Placement {
    pub hierarchy: Hierarchy,
    /// The comment stored as `parent_id`, if any.
    pub parent: Option<Comment>,
    /// Set when the reply was flattened into a quoted level-2 reply.
    pub quoted: Option<Comment>,
}

pub async fn assign(
    store: &dyn CommentStore,
    self_id: Uuid,
    parent_id: Option<Uuid>,
) -> CommentResult<Placement> {
    let Some(parent_id) = parent_id else {
        return Ok(Placement {
            hierarchy: Hierarchy::root(self_id),
            parent: None,
            quoted: None,
        });
    };

    let parent = store
        .get(parent_id)
        .await?
        .filter(|p| {
            !matches!(
                p.moderation.status,
                ModerationStatus::Deleted | ModerationStatus::Spam
            )
        })
        .ok_or(CommentError::ParentNotFound(parent_id))?;

    let target_level = parent.hierarchy.level + 1;
    let (stored_parent, quoted) = if quote::should_convert(target_level, &parent) {
        let resolved = quote::resolve_reply_parent(store, parent.clone()).await?;
        (resolved, Some(parent))
    } else {
        (parent, None)
    };

    let hierarchy = child_of(&stored_parent, self_id)?;
    Ok(Placement {
        hierarchy,
        parent: Some(stored_parent),
        quoted,
    })
}

fn child_of(parent: &Comment, self_id: Uuid) -> CommentResult<Hierarchy> {
    let level = parent.hierarchy.level + 1;
    if level > MAX_STORED_LEVEL {
        return Err(CommentError::InvariantViolation(format!(
            "computed level {level} under parent {}",
            parent.id
        )));
    }
    let root_id = if parent.hierarchy.level == 0 {
        parent.id
    } else {
        parent.hierarchy.root_id
    };
    Ok(Hierarchy {
        parent_id: Some(parent.id),
        level,
        root_id,
        path: format!("{}{}/", parent.hierarchy.path, self_id),
    })
}
