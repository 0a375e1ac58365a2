use std::path::PathBuf;

use anyhow::{Context, bail};

use healthbridge_api::auth::MAX_TOKEN_TTL_HOURS;
use healthbridge_api::retention::{DEFAULT_ARCHIVE_HOUR, DEFAULT_RETENTION_DAYS, MAX_RETENTION_DAYS};
use healthbridge_api::state::Settings;

const DEV_SECRET: &str = "dev-secret-change-me";

/// Placeholder JWT secrets that MUST NOT be used in production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", DEV_SECRET];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub production: bool,
    pub retention_days: i64,
    pub archive_hour: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let production = var("HEALTHBRIDGE_ENV", "development").eq_ignore_ascii_case("production");

        let jwt_secret = var("HEALTHBRIDGE_JWT_SECRET", DEV_SECRET);
        if production && (jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str())) {
            bail!("HEALTHBRIDGE_JWT_SECRET is unset or still a placeholder");
        }

        let port = var("HEALTHBRIDGE_PORT", "5001")
            .parse()
            .context("HEALTHBRIDGE_PORT must be a port number")?;
        let token_ttl_hours: i64 = var("HEALTHBRIDGE_JWT_TTL_HOURS", "24")
            .parse()
            .context("HEALTHBRIDGE_JWT_TTL_HOURS must be an integer")?;
        if !(1..=MAX_TOKEN_TTL_HOURS).contains(&token_ttl_hours) {
            bail!("HEALTHBRIDGE_JWT_TTL_HOURS must be within 1..={}, got {}", MAX_TOKEN_TTL_HOURS, token_ttl_hours);
        }
        let retention_days: i64 = var("HEALTHBRIDGE_RETENTION_DAYS", &DEFAULT_RETENTION_DAYS.to_string())
            .parse()
            .context("HEALTHBRIDGE_RETENTION_DAYS must be an integer")?;
        if !(1..=MAX_RETENTION_DAYS).contains(&retention_days) {
            bail!("HEALTHBRIDGE_RETENTION_DAYS must be within 1..={}, got {}", MAX_RETENTION_DAYS, retention_days);
        }
        let archive_hour: u32 = var("HEALTHBRIDGE_ARCHIVE_HOUR", &DEFAULT_ARCHIVE_HOUR.to_string())
            .parse()
            .context("HEALTHBRIDGE_ARCHIVE_HOUR must be an integer")?;
        if archive_hour > 23 {
            bail!("HEALTHBRIDGE_ARCHIVE_HOUR must be within 0..=23, got {}", archive_hour);
        }

        Ok(Self {
            host: var("HEALTHBRIDGE_HOST", "0.0.0.0"),
            port,
            db_path: var("HEALTHBRIDGE_DB_PATH", "healthbridge.db").into(),
            jwt_secret,
            token_ttl_hours,
            production,
            retention_days,
            archive_hour,
        })
    }

    pub fn settings(&self) -> Settings {
        Settings {
            jwt_secret: self.jwt_secret.clone(),
            token_ttl_hours: self.token_ttl_hours,
            retention_days: self.retention_days,
            expose_error_detail: !self.production,
        }
    }

    pub fn uses_placeholder_secret(&self) -> bool {
        PLACEHOLDER_SECRETS.contains(&self.jwt_secret.as_str())
    }
}
