use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Rest,
    Mongo,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Writes run in a spawned task; the caller never waits for the store.
    Background,
    /// Writes are awaited and their failure is reported in the response.
    Blocking,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub rest_url: String,
    pub rest_api_key: String,
    pub mongo_uri: String,
    pub mongo_database: String,
    pub request_timeout_ms: u64,
    /// Rows per paged read; keep at or below PostgREST `max-rows`.
    pub page_size: usize,
}

impl StoreConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_uri: String,
    pub session_ttl_seconds: u64,
}

impl CacheConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub mode: SyncMode,
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub audience: String,
}

/// Tunables of the quiz engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizSettings {
    pub default_question_count: u32,
    pub max_question_count: u32,
    pub simulated_exam_questions: u32,
    pub simulated_exam_minutes: u32,
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            default_question_count: 20,
            max_question_count: 200,
            simulated_exam_questions: 80,
            simulated_exam_minutes: 300,
        }
    }
}

/// Timer stream pacing.
#[derive(Debug, Clone)]
pub struct SseConfig {
    pub tick_interval_ms: u64,
    pub max_stream_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub auth: AuthConfig,
    pub quiz: QuizSettings,
    pub sse: SseConfig,
    pub metrics_auth: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first (repository layout), then the crate directory
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/{env}.toml, overridden by APP__SECTION__KEY variables
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let string = |key: &str, var: &str, default: &str| -> String {
            settings
                .get_string(key)
                .or_else(|_| env::var(var))
                .unwrap_or_else(|_| default.to_string())
        };
        let number = |key: &str, var: &str, default: i64| -> i64 {
            settings
                .get_int(key)
                .ok()
                .or_else(|| env::var(var).ok().and_then(|v| v.parse().ok()))
                .unwrap_or(default)
        };

        let store_backend = parse_choice(
            &string("store.backend", "STORE_BACKEND", "memory"),
            &[
                ("rest", StoreBackend::Rest),
                ("supabase", StoreBackend::Rest),
                ("mongo", StoreBackend::Mongo),
                ("memory", StoreBackend::Memory),
            ],
            "store.backend",
        )?;
        let cache_backend = parse_choice(
            &string("cache.backend", "CACHE_BACKEND", "memory"),
            &[("redis", CacheBackend::Redis), ("memory", CacheBackend::Memory)],
            "cache.backend",
        )?;
        let sync_mode = parse_choice(
            &string("sync.mode", "SYNC_MODE", "background"),
            &[
                ("background", SyncMode::Background),
                ("blocking", SyncMode::Blocking),
            ],
            "sync.mode",
        )?;

        let rest_api_key = string("store.rest_api_key", "SUPABASE_SERVICE_KEY", "");
        if store_backend == StoreBackend::Rest && rest_api_key.is_empty() {
            return Err(config::ConfigError::Message(
                "SUPABASE_SERVICE_KEY (store.rest_api_key) must be set for the rest store".into(),
            ));
        }

        let jwt_secret = string("auth.jwt_secret", "SUPABASE_JWT_SECRET", "");
        let jwt_secret = if jwt_secret.is_empty() {
            if app_env == "prod" {
                return Err(config::ConfigError::Message(
                    "SUPABASE_JWT_SECRET must be set in production".into(),
                ));
            }
            tracing::warn!("Using default JWT secret (dev mode only)");
            "dev-secret-only-for-local-testing".to_string()
        } else {
            jwt_secret
        };

        let defaults = QuizSettings::default();

        Ok(Config {
            bind_addr: string("server.bind_addr", "BIND_ADDR", "0.0.0.0:8081"),
            store: StoreConfig {
                backend: store_backend,
                rest_url: string("store.rest_url", "SUPABASE_URL", "http://localhost:54321"),
                rest_api_key,
                mongo_uri: string("store.mongo_uri", "MONGO_URI", "mongodb://localhost:27017"),
                mongo_database: string("store.mongo_database", "MONGO_DATABASE", "oab_quiz"),
                request_timeout_ms: number("store.request_timeout_ms", "STORE_TIMEOUT_MS", 5000)
                    .max(1) as u64,
                page_size: number("store.page_size", "STORE_PAGE_SIZE", 1000).max(1) as usize,
            },
            cache: CacheConfig {
                backend: cache_backend,
                redis_uri: string("cache.redis_uri", "REDIS_URI", "redis://127.0.0.1:6379/0"),
                session_ttl_seconds: number("cache.session_ttl_seconds", "SESSION_TTL_SECONDS", 21600)
                    .max(60) as u64,
            },
            sync: SyncConfig {
                mode: sync_mode,
                max_attempts: number("sync.max_attempts", "SYNC_MAX_ATTEMPTS", 3).max(1) as usize,
                base_backoff_ms: number("sync.base_backoff_ms", "SYNC_BACKOFF_MS", 50).max(0) as u64,
            },
            auth: AuthConfig {
                jwt_secret,
                audience: string("auth.audience", "JWT_AUDIENCE", "authenticated"),
            },
            quiz: QuizSettings {
                default_question_count: number(
                    "quiz.default_question_count",
                    "QUIZ_DEFAULT_QUESTIONS",
                    defaults.default_question_count.into(),
                )
                .max(1) as u32,
                max_question_count: number(
                    "quiz.max_question_count",
                    "QUIZ_MAX_QUESTIONS",
                    defaults.max_question_count.into(),
                )
                .max(1) as u32,
                simulated_exam_questions: number(
                    "quiz.simulated_exam_questions",
                    "SIMULATED_EXAM_QUESTIONS",
                    defaults.simulated_exam_questions.into(),
                )
                .max(1) as u32,
                simulated_exam_minutes: number(
                    "quiz.simulated_exam_minutes",
                    "SIMULATED_EXAM_MINUTES",
                    defaults.simulated_exam_minutes.into(),
                )
                .max(1) as u32,
            },
            sse: SseConfig {
                tick_interval_ms: number("sse.tick_interval_ms", "SSE_TICK_INTERVAL_MS", 1000).max(10)
                    as u64,
                max_stream_seconds: number("sse.max_stream_seconds", "SSE_MAX_STREAM_SECONDS", 3600)
                    .max(1) as u64,
            },
            metrics_auth: string("metrics.basic_auth", "METRICS_AUTH", "admin:changeme"),
        })
    }

    /// Configuration wired to the in-memory store and cache.
    pub fn in_memory(jwt_secret: &str) -> Self {
        Config {
            bind_addr: "127.0.0.1:0".to_string(),
            store: StoreConfig {
                backend: StoreBackend::Memory,
                rest_url: String::new(),
                rest_api_key: String::new(),
                mongo_uri: String::new(),
                mongo_database: String::new(),
                request_timeout_ms: 5000,
                page_size: 1000,
            },
            cache: CacheConfig {
                backend: CacheBackend::Memory,
                redis_uri: String::new(),
                session_ttl_seconds: 3600,
            },
            sync: SyncConfig {
                mode: SyncMode::Background,
                max_attempts: 1,
                base_backoff_ms: 1,
            },
            auth: AuthConfig {
                jwt_secret: jwt_secret.to_string(),
                audience: "authenticated".to_string(),
            },
            quiz: QuizSettings::default(),
            sse: SseConfig {
                tick_interval_ms: 1000,
                max_stream_seconds: 3600,
            },
            metrics_auth: "admin:changeme".to_string(),
        }
    }
}

fn parse_choice<T: Copy>(
    value: &str,
    options: &[(&str, T)],
    key: &str,
) -> Result<T, config::ConfigError> {
    let normalized = value.trim().to_ascii_lowercase();
    options
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, choice)| *choice)
        .ok_or_else(|| {
            config::ConfigError::Message(format!("unsupported value '{}' for {}", value, key))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn parse_choice_is_case_insensitive() {
        let parsed = parse_choice(
            " Supabase ",
            &[("supabase", StoreBackend::Rest), ("memory", StoreBackend::Memory)],
            "store.backend",
        )
        .unwrap();
        assert_eq!(parsed, StoreBackend::Rest);
        assert!(parse_choice("sqlite", &[("memory", StoreBackend::Memory)], "store.backend").is_err());
    }

    #[test]
    #[serial]
    fn load_reads_environment_overrides() {
        std::env::set_var("SKIP_ROOT_ENV", "1");
        std::env::set_var("APP_ENV", "test-no-file");
        std::env::set_var("STORE_BACKEND", "memory");
        std::env::set_var("SYNC_MODE", "blocking");
        std::env::set_var("SIMULATED_EXAM_QUESTIONS", "10");

        let config = Config::load().unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.sync.mode, SyncMode::Blocking);
        assert_eq!(config.quiz.simulated_exam_questions, 10);
        assert_eq!(config.auth.audience, "authenticated");
        assert_eq!(config.sse.tick_interval_ms, 1000);

        for var in ["SKIP_ROOT_ENV", "APP_ENV", "STORE_BACKEND", "SYNC_MODE", "SIMULATED_EXAM_QUESTIONS"] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn rest_backend_requires_service_key() {
        std::env::set_var("SKIP_ROOT_ENV", "1");
        std::env::set_var("APP_ENV", "test-no-file");
        std::env::set_var("STORE_BACKEND", "rest");
        std::env::remove_var("SUPABASE_SERVICE_KEY");

        assert!(Config::load().is_err());

        for var in ["SKIP_ROOT_ENV", "APP_ENV", "STORE_BACKEND"] {
            std::env::remove_var(var);
        }
    }
}
