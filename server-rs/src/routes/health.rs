use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let store_ok = state.comments.store().health_check().await;
    let cache = state.comments.cache().inner();
    let cache_ok = cache.health_check().await;

    let status = if store_ok && cache_ok { "healthy" } else { "degraded" };
    Json(json!({
        "status": status,
        "store": state.config.storage.as_str(),
        "storeOk": store_ok,
        "cache": cache.backend_name(),
        "cacheOk": cache_ok,
        "timestamp": chrono::Utc::now(),
    }))
}
