use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::RateLimitConfig;
use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::AppState;

/// Sliding-window limiter: at most `max_requests` hits per key in any `window`.
#[derive(Clone)]
pub struct RateLimiter {
    name: &'static str,
    hits: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(name: &'static str, max_requests: u32, window_secs: u64) -> Self {
        Self {
            name,
            hits: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now()).await
    }

    async fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut hits = self.hits.lock().await;
        let window = hits.entry(key.to_string()).or_default();
        while window
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
        {
            window.pop_front();
        }
        if window.len() >= self.max_requests as usize {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Forgets keys whose every hit has left the window.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut hits = self.hits.lock().await;
        let before = hits.len();
        hits.retain(|_, window| {
            window
                .back()
                .is_some_and(|t| now.saturating_duration_since(*t) < self.window)
        });
        before - hits.len()
    }
}

#[derive(Clone)]
pub struct RateLimiters {
    pub general: RateLimiter,
    pub create: RateLimiter,
    pub react: RateLimiter,
    pub flag: RateLimiter,
}

impl RateLimiters {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            general: RateLimiter::new("general", config.general.0, config.general.1),
            create: RateLimiter::new("create", config.create.0, config.create.1),
            react: RateLimiter::new("react", config.react.0, config.react.1),
            flag: RateLimiter::new("flag", config.flag.0, config.flag.1),
        }
    }

    pub async fn sweep(&self) -> usize {
        let mut removed = 0;
        for limiter in [&self.general, &self.create, &self.react, &self.flag] {
            removed += limiter.sweep().await;
        }
        removed
    }
}

pub fn client_key(req: &Request) -> String {
    // Use user ID if authenticated, otherwise IP
    if let Some(user) = req.extensions().get::<AuthUser>() {
        return format!("user:{}", user.id);
    }
    if let Some(ip) = client_ip(req) {
        return format!("ip:{ip}");
    }
    "ip:unknown".to_string()
}

pub fn client_ip(req: &Request) -> Option<String> {
    let addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    ip_from_parts(addr, req.headers())
}

/// Peer address when known, else the first `x-forwarded-for` hop.
pub fn ip_from_parts(addr: Option<SocketAddr>, headers: &HeaderMap) -> Option<String> {
    if let Some(addr) = addr {
        return Some(addr.ip().to_string());
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_admin(req: &Request) -> bool {
    req.extensions()
        .get::<AuthUser>()
        .is_some_and(|u| u.role.is_admin())
}

async fn enforce(
    limiter: &RateLimiter,
    req: Request,
    next: Next,
    message: &str,
) -> Result<Response, AppError> {
    if !is_admin(&req) {
        let key = format!("{}:{}", limiter.name(), client_key(&req));
        if !limiter.check(&key).await {
            tracing::info!(limiter = limiter.name(), key = %key, "rate limit exceeded");
            return Err(AppError::RateLimited(message.to_string()));
        }
    }
    Ok(next.run(req).await)
}

/// Middleware: comment API as a whole.
pub async fn general_rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    enforce(
        &state.limiters.general,
        req,
        next,
        "Too many requests, please try again later",
    )
    .await
}

pub async fn create_rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    enforce(
        &state.limiters.create,
        req,
        next,
        "Too many comments, please wait a minute before posting again",
    )
    .await
}

pub async fn react_rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    enforce(
        &state.limiters.react,
        req,
        next,
        "Too many reactions, please slow down",
    )
    .await
}

pub async fn flag_rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    enforce(
        &state.limiters.flag,
        req,
        next,
        "Too many reports, please try again later",
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn window_slides_instead_of_resetting() {
        let limiter = RateLimiter::new("test", 2, 60);
        let start = Instant::now();
        assert!(limiter.check_at("k", start).await);
        assert!(limiter.check_at("k", start + Duration::from_secs(30)).await);
        assert!(!limiter.check_at("k", start + Duration::from_secs(59)).await);
        // first hit has left the window, second has not
        assert!(limiter.check_at("k", start + Duration::from_secs(61)).await);
        assert!(!limiter.check_at("k", start + Duration::from_secs(62)).await);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new("test", 1, 60);
        assert!(limiter.check("a").await);
        assert!(!limiter.check("a").await);
        assert!(limiter.check("b").await);
    }
}
