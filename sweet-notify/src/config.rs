//! Process configuration, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::notification::channels::{
    DEFAULT_DELIVERY_TIMEOUT, ExpoPushConfig, SmtpConfig, WebPushConfig,
};
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:sweet.db?mode=rwc";
const DEFAULT_WEB_PUSH_CONCURRENCY: usize = 16;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// When set, logs are also written to a daily rolling file here.
    pub dir: Option<PathBuf>,
}

/// Everything the binary needs to run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// `None` disables web push.
    pub web_push: Option<WebPushConfig>,
    /// `None` disables mobile push.
    pub expo: Option<ExpoPushConfig>,
    /// `None` disables mention emails.
    pub smtp: Option<SmtpConfig>,
    pub push_timeout: Duration,
    pub web_push_concurrency: usize,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            web_push: None,
            expo: Some(ExpoPushConfig::default()),
            smtp: None,
            push_timeout: DEFAULT_DELIVERY_TIMEOUT,
            web_push_concurrency: DEFAULT_WEB_PUSH_CONCURRENCY,
            log: LogConfig::default(),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    env_var(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| Error::config(format!("Invalid {}: {}", key, raw)))
        })
        .transpose()
}

impl AppConfig {
    /// Load configuration from environment variables. Call after
    /// `dotenvy::dotenv()` so `.env` values are visible.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let push_timeout = parse_env::<u64>("PUSH_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.push_timeout);
        if push_timeout.is_zero() {
            return Err(Error::config("PUSH_TIMEOUT_SECS must be greater than 0"));
        }

        let web_push_concurrency =
            parse_env::<usize>("WEB_PUSH_CONCURRENCY")?.unwrap_or(defaults.web_push_concurrency);
        if web_push_concurrency == 0 {
            return Err(Error::config("WEB_PUSH_CONCURRENCY must be greater than 0"));
        }

        Ok(Self {
            database_url: env_var("DATABASE_URL").unwrap_or(defaults.database_url),
            web_push: WebPushConfig::from_env()?,
            expo: ExpoPushConfig::from_env()?,
            smtp: SmtpConfig::from_env()?,
            push_timeout,
            web_push_concurrency,
            log: LogConfig {
                format: parse_env::<LogFormat>("LOG_FORMAT")?.unwrap_or_default(),
                dir: env_var("LOG_DIR").map(PathBuf::from),
            },
        })
    }
}
