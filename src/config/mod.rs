use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub api: ApiConfig,
    pub rate_limit: RateLimitConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// URL prefix the resource paths are mounted under
    pub path_prefix: String,
    /// Header consulted when the path carries no version segment
    pub version_header: String,
    /// Request parameter holding the comma-separated field allow-list
    pub field_limit_param: String,
    pub default_formatter: String,
    pub default_range: u32,
    pub max_range: u32,
    pub max_embed_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enable_global: bool,
    pub global_limit: i64,
    pub global_period_secs: i64,
    pub store: CounterStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterStore {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub session_cookie: String,
    pub csrf_header: String,
    pub token_header: String,
    pub token_query_param: String,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub token_expiry_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enable_render_cache: bool,
    pub render_cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then overlay the optional file and env vars
        let base = Self::for_environment(environment);
        let base = match env::var("RESTFUL_CONFIG_FILE") {
            Ok(path) => match Self::from_file(&path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Ignoring config file: {}", e);
                    base
                }
            },
            Err(_) => base,
        };

        base.with_env_overrides()
    }

    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
    }

    /// Load a complete configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Read {
            path: path_str.clone(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path_str,
            source,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    fn with_env_overrides(mut self) -> Self {
        // API overrides
        if let Ok(v) = env::var("API_PATH_PREFIX") {
            self.api.path_prefix = v;
        }
        if let Ok(v) = env::var("API_VERSION_HEADER") {
            self.api.version_header = v;
        }
        if let Ok(v) = env::var("API_FIELD_LIMIT_PARAM") {
            self.api.field_limit_param = v;
        }
        if let Ok(v) = env::var("API_DEFAULT_FORMATTER") {
            self.api.default_formatter = v;
        }
        if let Ok(v) = env::var("API_DEFAULT_RANGE") {
            self.api.default_range = v.parse().unwrap_or(self.api.default_range);
        }
        if let Ok(v) = env::var("API_MAX_RANGE") {
            self.api.max_range = v.parse().unwrap_or(self.api.max_range);
        }
        if let Ok(v) = env::var("API_MAX_EMBED_DEPTH") {
            self.api.max_embed_depth = v.parse().unwrap_or(self.api.max_embed_depth);
        }

        // Rate limit overrides
        if let Ok(v) = env::var("RATE_LIMIT_ENABLE_GLOBAL") {
            self.rate_limit.enable_global = v.parse().unwrap_or(self.rate_limit.enable_global);
        }
        if let Ok(v) = env::var("RATE_LIMIT_GLOBAL_LIMIT") {
            self.rate_limit.global_limit = v.parse().unwrap_or(self.rate_limit.global_limit);
        }
        if let Ok(v) = env::var("RATE_LIMIT_GLOBAL_PERIOD_SECS") {
            self.rate_limit.global_period_secs =
                v.parse().unwrap_or(self.rate_limit.global_period_secs);
        }
        if let Ok(v) = env::var("RATE_LIMIT_STORE") {
            match v.as_str() {
                "postgres" => self.rate_limit.store = CounterStore::Postgres,
                "memory" => self.rate_limit.store = CounterStore::Memory,
                other => tracing::warn!("Unknown RATE_LIMIT_STORE '{}', keeping default", other),
            }
        }

        // Auth overrides
        if let Ok(v) = env::var("AUTH_SESSION_COOKIE") {
            self.auth.session_cookie = v;
        }
        if let Ok(v) = env::var("AUTH_CSRF_HEADER") {
            self.auth.csrf_header = v;
        }
        if let Ok(v) = env::var("AUTH_TOKEN_HEADER") {
            self.auth.token_header = v;
        }
        if let Ok(v) = env::var("AUTH_TOKEN_QUERY_PARAM") {
            self.auth.token_query_param = v;
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Ok(v) = env::var("JWT_ISSUER") {
            self.auth.jwt_issuer = v;
        }
        if let Ok(v) = env::var("AUTH_TOKEN_EXPIRY_HOURS") {
            self.auth.token_expiry_hours = v.parse().unwrap_or(self.auth.token_expiry_hours);
        }

        // Cache overrides
        if let Ok(v) = env::var("CACHE_ENABLE_RENDER_CACHE") {
            self.cache.enable_render_cache = v.parse().unwrap_or(self.cache.enable_render_cache);
        }
        if let Ok(v) = env::var("CACHE_RENDER_CACHE_TTL_SECS") {
            self.cache.render_cache_ttl_secs =
                v.parse().unwrap_or(self.cache.render_cache_ttl_secs);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            api: ApiConfig {
                path_prefix: "/api".to_string(),
                version_header: "X-API-Version".to_string(),
                field_limit_param: "fields".to_string(),
                default_formatter: "json".to_string(),
                default_range: 50,
                max_range: 1000,
                max_embed_depth: 8,
            },
            rate_limit: RateLimitConfig {
                enable_global: false,
                global_limit: 1000,
                global_period_secs: 3600,
                store: CounterStore::Memory,
            },
            auth: AuthConfig {
                session_cookie: "SESSION".to_string(),
                csrf_header: "X-CSRF-Token".to_string(),
                token_header: "access-token".to_string(),
                token_query_param: "access_token".to_string(),
                jwt_secret: "development-secret-change-me".to_string(),
                jwt_issuer: "restful-api-rust".to_string(),
                token_expiry_hours: 24 * 7, // 1 week
            },
            cache: CacheConfig {
                enable_render_cache: false,
                render_cache_ttl_secs: 300,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ],
            },
        }
    }

    pub fn staging() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Staging;
        config.api.max_range = 500;
        config.api.max_embed_depth = 5;
        config.rate_limit.enable_global = true;
        config.rate_limit.global_limit = 600;
        config.rate_limit.store = CounterStore::Postgres;
        config.auth.jwt_secret = String::new();
        config.auth.token_expiry_hours = 24;
        config.cache.enable_render_cache = true;
        config.security.cors_origins = vec!["https://staging.example.com".to_string()];
        config
    }

    pub fn production() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Production;
        config.api.default_range = 25;
        config.api.max_range = 100;
        config.api.max_embed_depth = 3;
        config.rate_limit.enable_global = true;
        config.rate_limit.global_limit = 300;
        config.rate_limit.store = CounterStore::Postgres;
        config.auth.jwt_secret = String::new();
        config.auth.token_expiry_hours = 4;
        config.cache.enable_render_cache = true;
        config.cache.render_cache_ttl_secs = 900;
        config.security.cors_origins = vec!["https://app.example.com".to_string()];
        config
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::development()
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

// Helper macros for common checks
#[macro_export]
macro_rules! is_development {
    () => {
        matches!(
            $crate::config::CONFIG.environment,
            $crate::config::Environment::Development
        )
    };
}

#[macro_export]
macro_rules! is_production {
    () => {
        matches!(
            $crate::config::CONFIG.environment,
            $crate::config::Environment::Production
        )
    };
}
