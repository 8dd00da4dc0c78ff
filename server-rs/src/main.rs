use std::net::SocketAddr;
use std::sync::Arc;

use story_comments_api::cache::Cache;
use story_comments_api::config::{Config, StorageBackend};
use story_comments_api::db;
use story_comments_api::services::collaborators::{InMemoryCollaborators, PgCollaborators};
use story_comments_api::services::comment_service::Collaborators;
use story_comments_api::services::store::{CommentStore, MemoryCommentStore, PgCommentStore};
use story_comments_api::{build_router, spawn_sweeper, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .json()
        .init();

    let cache = Cache::from_config(&config).await;
    let (store, collaborators): (Arc<dyn CommentStore>, Collaborators) = match config.storage {
        StorageBackend::Postgres => {
            let pool = db::create_pool(&config).await?;
            (
                Arc::new(PgCommentStore::new(pool.clone())),
                Collaborators::shared(Arc::new(PgCollaborators::new(pool))),
            )
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory comment store; data is lost on restart");
            (
                Arc::new(MemoryCommentStore::new()),
                Collaborators::shared(Arc::new(InMemoryCollaborators::new())),
            )
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        store = config.storage.as_str(),
        cache = cache.backend_name(),
        env = %config.node_env,
        "Story comments API initialized"
    );

    let state = AppState::new(config, store, collaborators, cache);
    spawn_sweeper(state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
