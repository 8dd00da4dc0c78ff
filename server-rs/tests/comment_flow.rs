mod common;

use chrono::Utc;
use uuid::Uuid;

use common::harness;
use story_comments_api::error::CommentError;
use story_comments_api::models::comment::{
    AutoModerateRequest, AutoModeration, CreateCommentRequest, FlagReason, FlagResolution,
    HierarchyInput, ModerationStatus, ReactionAction, ReactionKind, ResolveReportRequest, Target,
    TargetKind, UpdateCommentRequest, UserRole,
};
use story_comments_api::services::comment_service::{ClientInfo, Viewer};
use story_comments_api::services::quote::body_without_quote;
use story_comments_api::services::store::{CommentStore, ListQuery, ListSort};

#[tokio::test]
async fn replies_never_go_deeper_than_level_two() {
    let h = harness();
    let (alice, bob, carol, dave) = (
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
    );
    h.collab.register_user(carol, "carol").await;

    let a = h.post(alice, "Great opening chapter", None).await.comment;
    let b = h.post(bob, "Agreed, the pacing works", Some(a.id)).await.comment;
    let c = h.post(carol, "The second half drags a bit", Some(b.id)).await.comment;
    assert_eq!(b.hierarchy.level, 1);
    assert_eq!(c.hierarchy.level, 2);
    assert!(c.content.quote.is_none());

    let created = h.post(dave, "I disagree with that", Some(c.id)).await;
    let d = created.comment;
    assert_eq!(d.hierarchy.level, 2);
    assert_eq!(d.hierarchy.parent_id, Some(b.id));
    assert_eq!(d.hierarchy.root_id, a.id);
    assert!(d.content.original.starts_with("@carol: "));

    let quote = created.quote.expect("reply is converted to a quote");
    assert_eq!(quote.quoted_comment_id, c.id);
    assert_eq!(quote.quoted_username, "carol");
    assert!(quote.is_level_conversion);

    let notified: Vec<_> = h.collab.notifications().await;
    assert!(notified
        .iter()
        .any(|n| n.kind == "quoted_reply" && n.recipient == carol && n.comment_id == d.id));
}

#[tokio::test]
async fn reply_to_removed_parent_is_rejected() {
    let h = harness();
    let author = Uuid::new_v4();
    let a = h.post(author, "Soon to be gone", None).await.comment;
    h.state
        .comments
        .delete_comment(a.id, Viewer { id: author, role: UserRole::User }, None)
        .await
        .expect("owner delete");

    let err = h
        .state
        .comments
        .create_comment(
            Uuid::new_v4(),
            h.request("Replying anyway", Some(a.id)),
            &Default::default(),
        )
        .await
        .expect_err("parent is deleted");
    assert!(matches!(err, CommentError::ParentNotFound(id) if id == a.id));
}

#[tokio::test]
async fn reactions_are_mutually_exclusive() {
    let h = harness();
    let user = Uuid::new_v4();
    let c = h.post(Uuid::new_v4(), "React to me", None).await.comment;
    let svc = &h.state.comments;

    let liked = svc.toggle_reaction(c.id, user, ReactionAction::Like).await.unwrap();
    assert_eq!(liked.engagement.likes.count, 1);
    assert_eq!(liked.user_reaction, Some(ReactionKind::Like));

    let disliked = svc.toggle_reaction(c.id, user, ReactionAction::Dislike).await.unwrap();
    assert_eq!(disliked.engagement.likes.count, 0);
    assert_eq!(disliked.engagement.dislikes.count, 1);
    assert!(!disliked.engagement.likes.users.contains(&user));

    let again = svc.toggle_reaction(c.id, user, ReactionAction::Dislike).await.unwrap();
    assert_eq!(again.engagement.dislikes.count, 1);

    let removed = svc.toggle_reaction(c.id, user, ReactionAction::Remove).await.unwrap();
    assert_eq!(removed.engagement.likes.count, 0);
    assert_eq!(removed.engagement.dislikes.count, 0);
    assert_eq!(removed.user_reaction, None);
}

#[tokio::test]
async fn authors_cannot_flag_their_own_comments() {
    let h = harness();
    let author = Uuid::new_v4();
    let c = h.post(author, "My own words", None).await.comment;

    let err = h
        .state
        .comments
        .flag_comment(c.id, author, FlagReason::Spam, None)
        .await
        .expect_err("self flag");
    assert!(matches!(err, CommentError::SelfFlagNotAllowed));

    let reporter = Uuid::new_v4();
    let flags = h
        .state
        .comments
        .flag_comment(c.id, reporter, FlagReason::Harassment, Some("rude".into()))
        .await
        .unwrap();
    assert_eq!(flags.count, 1);

    let dup = h
        .state
        .comments
        .flag_comment(c.id, reporter, FlagReason::Spam, None)
        .await
        .expect_err("duplicate flag");
    assert!(matches!(dup, CommentError::AlreadyFlagged));

    let stored = h.store.get(c.id).await.unwrap().unwrap();
    assert_eq!(stored.moderation.status, ModerationStatus::Active);
}

#[tokio::test]
async fn reply_counts_follow_active_descendants() {
    let h = harness();
    let root = h.post(Uuid::new_v4(), "Thread starter", None).await.comment;
    let first = h.post(Uuid::new_v4(), "First reply", Some(root.id)).await.comment;
    let nested = h.post(Uuid::new_v4(), "Nested reply", Some(first.id)).await.comment;
    let second_author = Uuid::new_v4();
    let second = h.post(second_author, "Second reply", Some(root.id)).await.comment;

    let thread = h.state.comments.get_comment_thread(root.id, None).await.unwrap();
    assert_eq!(thread.comment.engagement.replies.count, 3);
    assert_eq!(thread.replies.len(), 2);

    h.state
        .comments
        .delete_comment(second.id, Viewer { id: second_author, role: UserRole::User }, None)
        .await
        .unwrap();

    let thread = h.state.comments.get_comment_thread(root.id, None).await.unwrap();
    assert_eq!(thread.comment.engagement.replies.count, 2);
    let first_view = thread
        .replies
        .iter()
        .find(|r| r.comment.id == first.id)
        .expect("first reply present");
    assert_eq!(first_view.comment.engagement.replies.count, 1);
    assert_eq!(first_view.replies[0].comment.id, nested.id);
}

#[tokio::test]
async fn auto_moderation_prefers_spam_over_flags() {
    let h = harness();
    let c = h.post(Uuid::new_v4(), "Looks harmless", None).await.comment;
    h.store
        .set_auto_moderation(
            c.id,
            &AutoModeration {
                spam_score: 0.9,
                toxicity_score: 0.0,
                checked_at: Some(Utc::now()),
            },
        )
        .await
        .unwrap();
    for _ in 0..10 {
        h.state
            .comments
            .flag_comment(c.id, Uuid::new_v4(), FlagReason::Spam, None)
            .await
            .unwrap();
    }

    let report = h
        .state
        .comments
        .auto_moderate(&AutoModerateRequest::default())
        .await
        .unwrap();
    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.actions[0].status, ModerationStatus::Spam);

    let stored = h.store.get(c.id).await.unwrap().unwrap();
    assert_eq!(stored.moderation.status, ModerationStatus::Spam);
}

#[tokio::test]
async fn hard_delete_leaves_an_audit_snapshot() {
    let h = harness();
    let admin = Uuid::new_v4();
    let c = h.post(Uuid::new_v4(), "Delete me for good", None).await.comment;

    h.state
        .comments
        .hard_delete(c.id, admin, Some("legal request".into()))
        .await
        .unwrap();

    assert!(h.store.get(c.id).await.unwrap().is_none());
    let audit = h.collab.audit_log().await;
    let record = audit
        .iter()
        .find(|r| r.action == "hard_delete")
        .expect("audit record");
    assert_eq!(record.comment_id, Some(c.id));
    assert_eq!(record.admin_id, admin);
    let snapshot = record.snapshot.as_ref().expect("snapshot");
    assert_eq!(snapshot["id"], serde_json::json!(c.id));
}

#[tokio::test]
async fn hard_delete_aborts_without_audit() {
    let h = harness();
    let c = h.post(Uuid::new_v4(), "Still here", None).await.comment;
    h.collab.set_fail_notifications(true);

    let err = h
        .state
        .comments
        .hard_delete(c.id, Uuid::new_v4(), None)
        .await
        .expect_err("audit unavailable");
    assert!(matches!(err, CommentError::InvariantViolation(_)));
    assert!(h.store.get(c.id).await.unwrap().is_some());
}

#[tokio::test]
async fn notification_failures_do_not_block_creation() {
    let h = harness();
    let parent_author = Uuid::new_v4();
    let parent = h.post(parent_author, "Parent comment", None).await.comment;
    h.collab.set_fail_notifications(true);

    let created = h.post(Uuid::new_v4(), "A reply", Some(parent.id)).await;
    assert!(!created.side_effects.is_clean());
    assert!(h.store.get(created.comment.id).await.unwrap().is_some());
    assert!(h.collab.notifications().await.is_empty());
}

#[tokio::test]
async fn owners_delete_and_counters_follow() {
    let h = harness();
    let author = Uuid::new_v4();
    let c = h.post(author, "Counting on it", None).await.comment;
    assert_eq!(h.collab.user_comment_count(author).await, 1);
    assert_eq!(h.collab.target_comment_count(h.story_id).await, 1);

    let stranger = Viewer { id: Uuid::new_v4(), role: UserRole::User };
    let err = h
        .state
        .comments
        .delete_comment(c.id, stranger, None)
        .await
        .expect_err("not the owner");
    assert!(matches!(err, CommentError::PermissionDenied(_)));

    let owner = Viewer { id: author, role: UserRole::User };
    h.state.comments.delete_comment(c.id, owner, None).await.unwrap();
    assert_eq!(h.collab.user_comment_count(author).await, 0);
    assert_eq!(h.collab.target_comment_count(h.story_id).await, 0);

    let again = h
        .state
        .comments
        .delete_comment(c.id, owner, None)
        .await
        .expect_err("already deleted");
    assert!(matches!(again, CommentError::AlreadyRemoved));
}

fn edit(content: &str) -> UpdateCommentRequest {
    UpdateCommentRequest {
        content: content.to_string(),
        edit_reason: Some("typo".into()),
    }
}

fn admin() -> Viewer {
    Viewer {
        id: Uuid::new_v4(),
        role: UserRole::Admin,
    }
}

#[tokio::test]
async fn quoted_reply_must_fit_with_its_preamble() {
    let h = harness();
    let (_, _, c) = h.three_levels().await;

    let err = h
        .state
        .comments
        .create_comment(
            Uuid::new_v4(),
            h.request(&"a".repeat(2000), Some(c.id)),
            &ClientInfo::default(),
        )
        .await
        .expect_err("preamble pushes it over the limit");
    assert!(matches!(err, CommentError::ContentTooLong { max: 2000 }));

    let fits = h.post(Uuid::new_v4(), &"b".repeat(1900), Some(c.id)).await.comment;
    assert!(fits.content.original.chars().count() <= 2000);
}

#[tokio::test]
async fn edits_keep_the_quote_and_respect_the_limit() {
    let h = harness();
    let (_, _, c) = h.three_levels().await;
    let author = Uuid::new_v4();
    let d = h.post(author, "First take", Some(c.id)).await.comment;

    let updated = h
        .state
        .comments
        .update_comment(d.id, author, edit("Second take"))
        .await
        .unwrap();
    assert!(updated.content.original.starts_with("@carol: "));
    assert_eq!(body_without_quote(&updated), "Second take");
    assert_eq!(updated.metadata.edit_history.len(), 1);
    assert_eq!(updated.metadata.edit_history[0].previous_content, d.content.original);
    assert_eq!(updated.metadata.edit_history[0].edit_reason.as_deref(), Some("typo"));

    let too_long = h
        .state
        .comments
        .update_comment(d.id, author, edit(&"c".repeat(1990)))
        .await
        .expect_err("composed text too long");
    assert!(matches!(too_long, CommentError::ContentTooLong { .. }));

    let stored = h.store.get(d.id).await.unwrap().unwrap();
    assert!(stored.content.original.chars().count() <= 2000);
}

#[tokio::test]
async fn only_the_author_can_edit() {
    let h = harness();
    let author = Uuid::new_v4();
    let c = h.post(author, "Mine to change", None).await.comment;

    let err = h
        .state
        .comments
        .update_comment(c.id, Uuid::new_v4(), edit("Hijacked"))
        .await
        .expect_err("not the author");
    assert!(matches!(err, CommentError::NotOwnerOrExpired));

    let stored = h.store.get(c.id).await.unwrap().unwrap();
    assert_eq!(stored.content.original, "Mine to change");
    assert!(stored.metadata.edit_history.is_empty());
}

#[tokio::test]
async fn spammy_comments_are_held_for_review() {
    let h = harness();
    let created = h
        .post(Uuid::new_v4(), "Buy now at https://spam.example", None)
        .await
        .comment;
    assert_eq!(created.moderation.status, ModerationStatus::Pending);
    assert!(created.moderation.auto_moderation.spam_score >= 0.7);

    let stored = h.store.get(created.id).await.unwrap().unwrap();
    assert_eq!(stored.moderation.status, ModerationStatus::Pending);
    assert!(stored.moderation.auto_moderation.checked_at.is_some());
}

#[tokio::test]
async fn removing_a_comment_removes_its_replies() {
    let h = harness();
    let (a, b, c) = h.three_levels().await;
    let moderator = admin();

    h.state
        .comments
        .moderate(a.id, moderator.id, "spam", Some("link farm".into()))
        .await
        .unwrap();

    let root = h.store.get(a.id).await.unwrap().unwrap();
    assert_eq!(root.moderation.status, ModerationStatus::Spam);
    for id in [b.id, c.id] {
        let reply = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(reply.moderation.status, ModerationStatus::Deleted);
    }
}

#[tokio::test]
async fn admin_delete_notifies_owner_and_is_audited() {
    let h = harness();
    let author = Uuid::new_v4();
    let c = h.post(author, "Borderline remark", None).await.comment;
    let moderator = admin();

    let deleted = h
        .state
        .comments
        .delete_comment(c.id, moderator, Some("off topic".into()))
        .await
        .unwrap();
    assert_eq!(deleted.comment.moderation.status, ModerationStatus::Deleted);
    assert!(deleted.side_effects.is_clean());

    let notified = h.collab.notifications().await;
    assert!(notified.iter().any(|n| n.kind == "comment_deleted_by_admin"
        && n.recipient == author
        && n.comment_id == c.id));

    let audit = h.collab.audit_log().await;
    let record = audit
        .iter()
        .find(|r| r.action == "delete_comment")
        .expect("audit record");
    assert_eq!(record.admin_id, moderator.id);
    assert_eq!(record.reason.as_deref(), Some("off topic"));
}

#[tokio::test]
async fn reports_are_resolved_or_dismissed() {
    let h = harness();
    let moderator = admin();
    let reported = h.post(Uuid::new_v4(), "Reported remark", None).await.comment;
    let other = h.post(Uuid::new_v4(), "Another reported remark", None).await.comment;
    let quiet = h.post(Uuid::new_v4(), "Nobody minds this", None).await.comment;
    for id in [reported.id, other.id] {
        h.state
            .comments
            .flag_comment(id, Uuid::new_v4(), FlagReason::Harassment, None)
            .await
            .unwrap();
    }

    let resolved = h
        .state
        .comments
        .resolve_report(
            reported.id,
            moderator.id,
            ResolveReportRequest {
                action: Some("hide".into()),
                escalate: false,
                note: Some("confirmed".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(resolved.moderation.flags.resolution, Some(FlagResolution::Resolved));
    assert_eq!(resolved.moderation.status, ModerationStatus::Hidden);

    let dismissed = h.state.comments.dismiss_report(other.id, moderator.id).await.unwrap();
    assert_eq!(dismissed.moderation.flags.resolution, Some(FlagResolution::Dismissed));
    assert_eq!(dismissed.moderation.status, ModerationStatus::Active);

    let err = h
        .state
        .comments
        .dismiss_report(quiet.id, moderator.id)
        .await
        .expect_err("no flags");
    assert!(matches!(err, CommentError::NoOpenReport(id) if id == quiet.id));
    let err = h
        .state
        .comments
        .resolve_report(quiet.id, moderator.id, ResolveReportRequest::default())
        .await
        .expect_err("no flags");
    assert!(matches!(err, CommentError::NoOpenReport(_)));
}

#[tokio::test]
async fn bulk_moderation_reports_partial_failures() {
    let h = harness();
    let c = h.post(Uuid::new_v4(), "Hide me", None).await.comment;
    let missing = Uuid::new_v4();

    let outcome = h
        .state
        .comments
        .bulk_moderate(&[c.id, missing], admin().id, "hide", None)
        .await
        .unwrap();
    assert_eq!(outcome.successful, vec![c.id]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].id, missing);

    let stored = h.store.get(c.id).await.unwrap().unwrap();
    assert_eq!(stored.moderation.status, ModerationStatus::Hidden);
}

#[tokio::test]
async fn reads_after_writes_are_fresh() {
    let h = harness();
    let query = || ListQuery {
        story_id: h.story_id,
        chapter_id: None,
        parent_id: None,
        page: 1,
        limit: 0,
        sort: ListSort::Newest,
    };
    let first = h.post(Uuid::new_v4(), "First in line", None).await.comment;

    let page = h.state.comments.list_comments(query(), true, None).await.unwrap();
    assert_eq!(page.comments.len(), 1);
    assert_eq!(page.comments[0].comment.engagement.likes.count, 0);

    h.state
        .comments
        .toggle_reaction(first.id, Uuid::new_v4(), ReactionAction::Like)
        .await
        .unwrap();
    h.post(Uuid::new_v4(), "Second in line", None).await;
    h.post(Uuid::new_v4(), "A reply", Some(first.id)).await;

    let page = h.state.comments.list_comments(query(), true, None).await.unwrap();
    assert_eq!(page.comments.len(), 2);
    let first_view = page
        .comments
        .iter()
        .find(|v| v.comment.id == first.id)
        .expect("first comment listed");
    assert_eq!(first_view.comment.engagement.likes.count, 1);
    assert_eq!(first_view.replies.len(), 1);

    let thread = h.state.comments.get_comment_thread(first.id, None).await.unwrap();
    assert_eq!(thread.replies.len(), 1);
    h.post(Uuid::new_v4(), "Another reply", Some(first.id)).await;
    let thread = h.state.comments.get_comment_thread(first.id, None).await.unwrap();
    assert_eq!(thread.replies.len(), 2);
    assert_eq!(thread.comment.engagement.replies.count, 2);
}

#[tokio::test]
async fn replies_stay_on_their_parents_chapter() {
    let h = harness();
    let chapter_id = Uuid::new_v4();
    let chapter_target = Target {
        story_id: h.story_id,
        chapter_id: Some(chapter_id),
        kind: TargetKind::Chapter,
    };
    let root = h
        .state
        .comments
        .create_comment(
            Uuid::new_v4(),
            CreateCommentRequest {
                content: "About this chapter".into(),
                target: chapter_target.clone(),
                hierarchy: None,
                metadata: None,
            },
            &ClientInfo::default(),
        )
        .await
        .unwrap()
        .comment;

    let story_level = h
        .state
        .comments
        .create_comment(
            Uuid::new_v4(),
            h.request("Reply aimed at the story", Some(root.id)),
            &ClientInfo::default(),
        )
        .await
        .expect_err("story target under a chapter comment");
    assert!(matches!(story_level, CommentError::InvalidTarget(_)));

    let other_chapter = h
        .state
        .comments
        .create_comment(
            Uuid::new_v4(),
            CreateCommentRequest {
                content: "Reply aimed at another chapter".into(),
                target: Target {
                    chapter_id: Some(Uuid::new_v4()),
                    ..chapter_target.clone()
                },
                hierarchy: Some(HierarchyInput {
                    parent_id: Some(root.id),
                }),
                metadata: None,
            },
            &ClientInfo::default(),
        )
        .await
        .expect_err("different chapter");
    assert!(matches!(other_chapter, CommentError::InvalidTarget(_)));
    assert_eq!(h.collab.target_comment_count(chapter_id).await, 1);
}

#[tokio::test]
async fn quote_conversion_skips_removed_ancestors() {
    let h = harness();
    let (_, b, c) = h.three_levels().await;
    let moderator = admin();

    h.state
        .comments
        .moderate(c.id, moderator.id, "hide", None)
        .await
        .unwrap();
    h.state
        .comments
        .delete_comment(
            b.id,
            Viewer {
                id: b.author_id,
                role: UserRole::User,
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(
        h.store.get(c.id).await.unwrap().unwrap().moderation.status,
        ModerationStatus::Hidden
    );

    let err = h
        .state
        .comments
        .create_comment(
            Uuid::new_v4(),
            h.request("Replying under a removed branch", Some(c.id)),
            &ClientInfo::default(),
        )
        .await
        .expect_err("level-1 ancestor is deleted");
    assert!(matches!(err, CommentError::ParentNotFound(id) if id == c.id));
}
