use std::path::PathBuf;

use tracing::warn;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;
const DEFAULT_SESSION_TTL_DAYS: i64 = 30;

/// Runtime settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. When unset the server runs on the in-memory store.
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub skip_migrations: bool,
    pub debug_mode: bool,
    pub allowed_origins: Vec<String>,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub session_ttl_days: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let flag = |key: &str| {
            lookup(key)
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false)
        };

        let port = match lookup("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| anyhow::anyhow!("PORT must be a valid number: {}", e))?,
            None => 5000,
        };

        let max_upload_bytes = match lookup("MAX_UPLOAD_BYTES") {
            Some(raw) => raw.parse::<usize>().unwrap_or_else(|_| {
                warn!("⚠️ Invalid MAX_UPLOAD_BYTES '{}', using default", raw);
                DEFAULT_MAX_UPLOAD_BYTES
            }),
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let session_ttl_days = match lookup("SESSION_TTL_DAYS") {
            Some(raw) => match raw.parse::<i64>() {
                Ok(days) if days > 0 => days,
                _ => {
                    warn!("⚠️ Invalid SESSION_TTL_DAYS '{}', using default", raw);
                    DEFAULT_SESSION_TTL_DAYS
                }
            },
            None => DEFAULT_SESSION_TTL_DAYS,
        };

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            skip_migrations: flag("SKIP_MIGRATIONS"),
            debug_mode: flag("DEBUG_MODE"),
            allowed_origins,
            upload_dir: lookup("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            max_upload_bytes,
            session_ttl_days,
        })
    }
}
