#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use uuid::Uuid;

use story_comments_api::cache::Cache;
use story_comments_api::config::Config;
use story_comments_api::middleware::auth::Claims;
use story_comments_api::models::comment::{
    Comment, CreateCommentRequest, HierarchyInput, Target, TargetKind,
};
use story_comments_api::services::collaborators::InMemoryCollaborators;
use story_comments_api::services::comment_service::{ClientInfo, Collaborators, Created};
use story_comments_api::services::store::MemoryCommentStore;
use story_comments_api::AppState;

pub const SECRET: &str = "integration-secret";

pub struct Harness {
    pub state: AppState,
    pub collab: Arc<InMemoryCollaborators>,
    pub store: Arc<MemoryCommentStore>,
    pub story_id: Uuid,
}

pub fn harness() -> Harness {
    let mut config = Config::from_env();
    config.jwt.secret = SECRET.to_string();
    config.cors_origins = vec!["*".to_string()];

    let store = Arc::new(MemoryCommentStore::new());
    let collab = Arc::new(InMemoryCollaborators::new());
    let state = AppState::new(
        config,
        store.clone(),
        Collaborators::shared(collab.clone()),
        Cache::in_memory("test:"),
    );
    Harness {
        state,
        collab,
        store,
        story_id: Uuid::new_v4(),
    }
}

impl Harness {
    pub fn request(&self, content: &str, parent_id: Option<Uuid>) -> CreateCommentRequest {
        CreateCommentRequest {
            content: content.to_string(),
            target: Target {
                story_id: self.story_id,
                chapter_id: None,
                kind: TargetKind::Story,
            },
            hierarchy: parent_id.map(|id| HierarchyInput { parent_id: Some(id) }),
            metadata: None,
        }
    }

    pub async fn post(&self, author: Uuid, content: &str, parent_id: Option<Uuid>) -> Created {
        self.state
            .comments
            .create_comment(author, self.request(content, parent_id), &ClientInfo::default())
            .await
            .expect("create comment")
    }
}

impl Harness {
    /// Root, level-1 reply and level-2 reply; the level-2 author is "carol".
    pub async fn three_levels(&self) -> (Comment, Comment, Comment) {
        let carol = Uuid::new_v4();
        self.collab.register_user(carol, "carol").await;
        let a = self.post(Uuid::new_v4(), "Great opening chapter", None).await.comment;
        let b = self
            .post(Uuid::new_v4(), "Agreed, the pacing works", Some(a.id))
            .await
            .comment;
        let c = self
            .post(carol, "The second half drags a bit", Some(b.id))
            .await
            .comment;
        (a, b, c)
    }
}

pub fn token(user_id: Uuid, role: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        role: Some(role.to_string()),
        token_type: Some("access".to_string()),
        exp: now + 3600,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("encode token")
}
