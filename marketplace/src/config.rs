//! Configuration Management
//!
//! Values start from `Config::default()` and are overridden by environment
//! variables (a `.env` file is loaded first when present).
//!
//! ## Configuration Variables
//!
//! - `DATABASE_URL`: SQLite database (default: `sqlite://analog-society.db`)
//! - `BIND_ADDRESS`: HTTP server bind address (default: `0.0.0.0:3045`)
//! - `UPLOADS_DIR`: Directory served under `/uploads` (default: `public/uploads`)
//! - `SECURE_COOKIES`: Mark the session cookie `Secure` (default: `false`)
//! - `SESSION_TTL_DAYS`: Session lifetime in days (default: `7`)
//! - `MAX_UPLOAD_MB`: Per-image size cap in megabytes (default: `10`)
//! - `MAX_UPLOAD_FILES`: Images accepted per item (default: `5`)

use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub uploads_dir: PathBuf,
    pub secure_cookies: bool,
    pub session_ttl_days: i64,
    pub max_upload_mb: usize,
    pub max_upload_files: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://analog-society.db".to_string(),
            bind_address: "0.0.0.0:3045".to_string(),
            uploads_dir: PathBuf::from("public/uploads"),
            secure_cookies: false,
            session_ttl_days: 7,
            max_upload_mb: 10,
            max_upload_files: 5,
        }
    }
}

impl Config {
    /// Defaults overridden by whatever the environment provides.
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            info!("No .env file loaded: {}", e);
        }

        let defaults = Self::default();
        Self {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            bind_address: env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            uploads_dir: env::var("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.uploads_dir),
            secure_cookies: parse_var("SECURE_COOKIES", defaults.secure_cookies),
            session_ttl_days: parse_var("SESSION_TTL_DAYS", defaults.session_ttl_days),
            max_upload_mb: parse_var("MAX_UPLOAD_MB", defaults.max_upload_mb),
            max_upload_files: parse_var("MAX_UPLOAD_FILES", defaults.max_upload_files),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_days.max(0) as u64 * 24 * 60 * 60)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }

    /// Body limit for multipart item submissions: every image at full size plus form fields.
    pub fn max_item_body_bytes(&self) -> usize {
        self.max_upload_bytes() * self.max_upload_files + 1024 * 1024
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> T
where
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits() {
        let config = Config::default();
        assert_eq!(config.max_upload_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.session_ttl(), Duration::from_secs(7 * 24 * 60 * 60));
        assert!(!config.secure_cookies);
        assert!(config.max_item_body_bytes() > 5 * config.max_upload_bytes());
    }
}
