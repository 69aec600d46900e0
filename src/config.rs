use std::path::PathBuf;

use crate::rate_limit::RateLimitConfig;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

/// Process configuration, read once from the environment at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub storage: StorageBackend,
    pub database_url: String,
    /// Snapshot directory for the memory backend; `None` keeps it purely in memory.
    pub data_dir: Option<PathBuf>,
    pub bind_addr: String,
    pub port: u16,
    pub frontend_url: Option<String>,
    pub seed_default_communities: bool,
    pub enable_hsts: bool,
    pub rate_limits_enabled: bool,
    pub rate_limits: RateLimitConfig,
}

pub(crate) fn bool_env(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"),
        Err(_) => default,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let storage = match std::env::var("STORAGE").map(|v| v.to_ascii_lowercase()).as_deref() {
            Ok("memory") | Ok("inmem") => StorageBackend::Memory,
            _ => StorageBackend::Sqlite,
        };
        Self {
            storage,
            database_url: std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/agora.db".into()),
            data_dir: std::env::var("AGORA_DATA_DIR").ok().map(PathBuf::from),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(3001),
            frontend_url: std::env::var("FRONTEND_URL").ok().filter(|v| !v.is_empty()),
            seed_default_communities: bool_env("SEED_DEFAULT_COMMUNITIES", true),
            enable_hsts: bool_env("ENABLE_HSTS", false),
            rate_limits_enabled: bool_env("RL_ENABLED", true),
            rate_limits: RateLimitConfig::from_env(),
        }
    }
}
