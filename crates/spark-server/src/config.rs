use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder session secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub session_secret: String,
    pub cookie_name: String,
    pub session_ttl: chrono::Duration,
    pub secure_cookies: bool,
}

impl Config {
    /// Reads `SPARK_*` variables. Call after loading `.env`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let session_secret = lookup("SPARK_SESSION_SECRET").unwrap_or_default();
        if session_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&session_secret.as_str()) {
            bail!("SPARK_SESSION_SECRET is unset or still a placeholder");
        }

        let port = var("SPARK_PORT", "3000")
            .parse()
            .context("SPARK_PORT must be a port number")?;
        let ttl_hours: i64 = var("SPARK_SESSION_TTL_HOURS", "168")
            .parse()
            .context("SPARK_SESSION_TTL_HOURS must be a whole number of hours")?;
        if ttl_hours <= 0 {
            bail!("SPARK_SESSION_TTL_HOURS must be positive");
        }
        let secure_cookies = var("SPARK_SECURE_COOKIES", "false")
            .parse()
            .context("SPARK_SECURE_COOKIES must be true or false")?;

        Ok(Self {
            host: var("SPARK_HOST", "0.0.0.0"),
            port,
            db_path: var("SPARK_DB_PATH", "spark.db").into(),
            session_secret,
            cookie_name: var("SPARK_SESSION_COOKIE", "spark.sid"),
            session_ttl: chrono::Duration::hours(ttl_hours),
            secure_cookies,
        })
    }
}
