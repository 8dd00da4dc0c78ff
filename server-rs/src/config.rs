use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub node_env: String,
    pub cors_origins: Vec<String>,
    pub storage: StorageBackend,
    pub db: DbConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    pub comments: CommentConfig,
    pub moderation: ModerationConfig,
    pub cache: CacheConfig,
}

/// Where comments live. `memory` runs without PostgreSQL, for local development.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Postgres => "postgres",
            StorageBackend::Memory => "memory",
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub pool_min: u32,
    pub pool_max: u32,
}

#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u8,
    pub key_prefix: String,
}

#[derive(Clone, Debug)]
pub struct JwtConfig {
    pub secret: String,
}

/// Sliding-window limits, as (max requests, window seconds).
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub general: (u32, u64),
    pub create: (u32, u64),
    pub react: (u32, u64),
    pub flag: (u32, u64),
    pub velocity_max_per_hour: u32,
    pub duplicate_window_secs: i64,
}

#[derive(Clone, Debug)]
pub struct CommentConfig {
    pub max_length: usize,
    pub edit_window_minutes: i64,
    pub page_size: i64,
    pub max_page_size: i64,
    pub bulk_limit: usize,
    pub hash_salt: String,
}

#[derive(Clone, Debug)]
pub struct ModerationConfig {
    /// Either analysis score at or above this marks a new comment pending.
    pub pending_threshold: f64,
    pub spam_threshold: f64,
    pub toxicity_threshold: f64,
    pub flag_threshold: i32,
    pub auto_limit: i64,
    pub blocked_terms: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub list_ttl_secs: u64,
    pub thread_ttl_secs: u64,
    pub stats_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    env_or(key, default)
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

const DEFAULT_BLOCKED_TERMS: &str =
    "fuck,shit,bitch,asshole,bastard,cunt,dick,retard,faggot,nigger,whore,slut";

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_or_parse("PORT", 3000),
            node_env: env_or("NODE_ENV", "development"),
            cors_origins: env_list("CORS_ORIGINS", "http://localhost:3000,http://localhost:8080"),
            storage: env_or_parse("COMMENT_STORE", StorageBackend::Postgres),
            db: DbConfig {
                host: env_or("DB_HOST", "localhost"),
                port: env_or_parse("DB_PORT", 5432),
                database: env_or("DB_NAME", "story_platform"),
                user: env_or("DB_USER", "story_admin"),
                password: env_or("DB_PASSWORD", ""),
                pool_min: env_or_parse("DB_POOL_MIN", 2),
                pool_max: env_or_parse("DB_POOL_MAX", 20),
            },
            redis: RedisConfig {
                enabled: env_or_parse("REDIS_ENABLED", true),
                host: env_or("REDIS_HOST", "localhost"),
                port: env_or_parse("REDIS_PORT", 6379),
                password: env::var("REDIS_PASSWORD").ok().filter(|s| !s.is_empty()),
                db: env_or_parse("REDIS_DB", 0),
                key_prefix: env_or("REDIS_KEY_PREFIX", "stories:"),
            },
            jwt: JwtConfig {
                secret: env_or("JWT_SECRET", "change-me-to-a-secure-random-string"),
            },
            rate_limit: RateLimitConfig {
                general: (env_or_parse("RATE_LIMIT_GENERAL", 50), 15 * 60),
                create: (env_or_parse("RATE_LIMIT_CREATE", 5), 60),
                react: (env_or_parse("RATE_LIMIT_REACT", 30), 60),
                flag: (env_or_parse("RATE_LIMIT_FLAG", 10), 5 * 60),
                velocity_max_per_hour: env_or_parse("SPAM_MAX_PER_HOUR", 20),
                duplicate_window_secs: env_or_parse("SPAM_DUPLICATE_WINDOW_SEC", 5 * 60),
            },
            comments: CommentConfig {
                max_length: 2000,
                edit_window_minutes: env_or_parse("COMMENT_EDIT_WINDOW_MIN", 30),
                page_size: env_or_parse("COMMENT_PAGE_SIZE", 20),
                max_page_size: 50,
                bulk_limit: 100,
                hash_salt: env_or("COMMENT_HASH_SALT", "story-comments-default-salt"),
            },
            moderation: ModerationConfig {
                pending_threshold: env_or_parse("MODERATION_PENDING_THRESHOLD", 0.7),
                spam_threshold: env_or_parse("MODERATION_SPAM_THRESHOLD", 0.8),
                toxicity_threshold: env_or_parse("MODERATION_TOXICITY_THRESHOLD", 0.8),
                flag_threshold: env_or_parse("MODERATION_FLAG_THRESHOLD", 5),
                auto_limit: env_or_parse("MODERATION_AUTO_LIMIT", 100),
                blocked_terms: env_list("MODERATION_BLOCKED_TERMS", DEFAULT_BLOCKED_TERMS),
            },
            cache: CacheConfig {
                list_ttl_secs: env_or_parse("CACHE_LIST_TTL_SEC", 60),
                thread_ttl_secs: env_or_parse("CACHE_THREAD_TTL_SEC", 300),
                stats_ttl_secs: env_or_parse("CACHE_STATS_TTL_SEC", 900),
                sweep_interval_secs: env_or_parse("CACHE_SWEEP_INTERVAL_SEC", 60),
            },
        }
    }

    pub fn database_url(&self) -> String {
        if let Ok(url) = env::var("DATABASE_URL") {
            return url;
        }
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db.user, self.db.password, self.db.host, self.db.port, self.db.database
        )
    }

    pub fn redis_url(&self) -> String {
        if let Ok(url) = env::var("REDIS_URL") {
            return url;
        }
        match &self.redis.password {
            Some(pw) if !pw.is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                pw, self.redis.host, self.redis.port, self.redis.db
            ),
            _ => format!(
                "redis://{}:{}/{}",
                self.redis.host, self.redis.port, self.redis.db
            ),
        }
    }
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            pending_threshold: 0.7,
            spam_threshold: 0.8,
            toxicity_threshold: 0.8,
            flag_threshold: 5,
            auto_limit: 100,
            blocked_terms: DEFAULT_BLOCKED_TERMS
                .split(',')
                .map(String::from)
                .collect(),
        }
    }
}

impl Default for CommentConfig {
    fn default() -> Self {
        Self {
            max_length: 2000,
            edit_window_minutes: 30,
            page_size: 20,
            max_page_size: 50,
            bulk_limit: 100,
            hash_salt: "story-comments-default-salt".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            list_ttl_secs: 60,
            thread_ttl_secs: 300,
            stats_ttl_secs: 900,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general: (50, 15 * 60),
            create: (5, 60),
            react: (30, 60),
            flag: (10, 5 * 60),
            velocity_max_per_hour: 20,
            duplicate_window_secs: 5 * 60,
        }
    }
}
