use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub upload_dir: PathBuf,
    pub rotation_sweep: Duration,
    pub store_timeout: Duration,
    pub max_upload_bytes: usize,
    pub token_ttl: chrono::Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup; unset keys take their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("SHAVER_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("SHAVER_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let number = |key: &str, default: u64| -> Result<u64> {
            match get(key) {
                Some(v) => v
                    .trim()
                    .parse()
                    .with_context(|| format!("{} must be a non-negative integer, got '{}'", key, v)),
                None => Ok(default),
            }
        };

        let host = or("SHAVER_HOST", "0.0.0.0");
        let port = or("SHAVER_PORT", "8000");
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let rotation_secs = number("SHAVER_ROTATION_SWEEP_SECS", 60)?;
        if rotation_secs == 0 {
            bail!("SHAVER_ROTATION_SWEEP_SECS must be at least 1");
        }
        let token_days = number("SHAVER_TOKEN_TTL_DAYS", 30)?;
        if token_days == 0 {
            bail!("SHAVER_TOKEN_TTL_DAYS must be at least 1");
        }

        Ok(Self {
            jwt_secret,
            db_path: or("SHAVER_DB_PATH", "shaver.db").into(),
            addr,
            upload_dir: or("SHAVER_UPLOAD_DIR", "./uploads").into(),
            rotation_sweep: Duration::from_secs(rotation_secs),
            store_timeout: Duration::from_millis(number("SHAVER_STORE_TIMEOUT_MS", 5000)?),
            max_upload_bytes: number("SHAVER_MAX_UPLOAD_MB", 10)? as usize * 1024 * 1024,
            token_ttl: chrono::Duration::days(token_days as i64),
        })
    }
}
