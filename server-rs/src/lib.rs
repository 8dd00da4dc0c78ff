use axum::{
    http::HeaderValue,
    middleware as axum_mw,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use cache::Cache;
use config::Config;
use middleware::rate_limit::RateLimiters;
use services::comment_cache::CommentCache;
use services::comment_service::{Collaborators, CommentService};
use services::store::CommentStore;

#[derive(Clone)]
pub struct AppState {
    pub comments: CommentService,
    pub config: Arc<Config>,
    pub limiters: RateLimiters,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn CommentStore>,
        collaborators: Collaborators,
        cache: Cache,
    ) -> Self {
        let comments = CommentService::new(
            store,
            collaborators,
            CommentCache::new(cache, config.cache.clone()),
            config.comments.clone(),
            config.moderation.clone(),
        );
        Self {
            comments,
            limiters: RateLimiters::from_config(&config.rate_limit),
            config: Arc::new(config),
        }
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let allow_origin = if origins.is_empty() || config.cors_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let auth = || axum_mw::from_fn_with_state(state.clone(), middleware::auth::authenticate);

    // --- Public comment API (optional auth, general limiter) ---
    let comment_routes = Router::new()
        .route(
            "/",
            post(routes::comments::create_comment)
                .layer(axum_mw::from_fn_with_state(
                    state.clone(),
                    middleware::guards::velocity_guard,
                ))
                .layer(axum_mw::from_fn_with_state(
                    state.clone(),
                    middleware::guards::content_guard,
                ))
                .layer(axum_mw::from_fn_with_state(
                    state.clone(),
                    middleware::rate_limit::create_rate_limit,
                ))
                .layer(auth())
                .get(routes::comments::list_comments),
        )
        .route("/stats", get(routes::comments::comment_stats))
        .route("/thread/:rootId", get(routes::comments::get_thread))
        .route(
            "/:commentId",
            put(routes::comments::update_comment)
                .layer(axum_mw::from_fn_with_state(
                    state.clone(),
                    middleware::guards::content_guard,
                ))
                .delete(routes::comments::delete_comment)
                .layer(auth()),
        )
        .route(
            "/:commentId/react",
            post(routes::comments::react)
                .layer(axum_mw::from_fn_with_state(
                    state.clone(),
                    middleware::rate_limit::react_rate_limit,
                ))
                .layer(auth()),
        )
        .route(
            "/:commentId/flag",
            post(routes::comments::flag)
                .layer(axum_mw::from_fn_with_state(
                    state.clone(),
                    middleware::rate_limit::flag_rate_limit,
                ))
                .layer(auth()),
        )
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::general_rate_limit,
        ))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth::optional_auth,
        ));

    // --- Admin moderation ---
    let admin_routes = Router::new()
        .route("/queue", get(routes::admin::moderation_queue))
        .route("/bulk-moderate", post(routes::admin::bulk_moderate))
        .route("/auto-moderate", post(routes::admin::auto_moderate))
        .route("/reported", get(routes::admin::reported))
        .route(
            "/reported/:commentId/resolve",
            post(routes::admin::resolve_report),
        )
        .route(
            "/reported/:commentId/dismiss",
            delete(routes::admin::dismiss_report),
        )
        .route("/audit", get(routes::admin::audit_log))
        .route(
            "/:commentId/moderate",
            post(routes::admin::moderate_comment),
        )
        .route("/:commentId/hard", delete(routes::admin::hard_delete))
        .layer(axum_mw::from_fn(middleware::admin::require_admin))
        .layer(auth());

    let api = Router::new()
        .nest("/comments", comment_routes)
        .nest("/admin/comments", admin_routes);

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(routes::health::health))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

/// Periodically drops expired cache entries and idle limiter windows.
pub fn spawn_sweeper(state: AppState) -> tokio::task::JoinHandle<()> {
    let every = Duration::from_secs(state.config.cache.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let cached = state.comments.cache().inner().sweep().await;
            let windows = state.limiters.sweep().await;
            if cached + windows > 0 {
                tracing::debug!(cached, windows, "sweep removed stale entries");
            }
        }
    })
}
