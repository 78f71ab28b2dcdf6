use std::{env, path::PathBuf, time::Duration};

use crate::{errors::Error, Result};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Typed configuration for the polling engine.
///
/// An explicit struct threaded through the dispatcher and the transport
/// adapter, instead of process-wide mutable fields.
#[derive(Clone, Debug)]
pub struct Config {
    pub token: String,
    pub api_base: String,
    /// Sleep between poll iterations; zero disables the sleep.
    pub poll_interval: Duration,
    /// Max updates per fetch. The Bot API caps this at 100.
    pub poll_limit: i64,
    /// Long-poll timeout in seconds handed to the service.
    pub poll_timeout: i64,
    pub worker_count: usize,
    /// Backing file for the session store.
    pub session_file: PathBuf,
}

impl Config {
    /// Programmatic configuration with defaults matching [`Config::load`].
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            poll_interval: Duration::from_secs(1),
            poll_limit: 100,
            poll_timeout: 30,
            worker_count: 1,
            session_file: PathBuf::from("sessions.json"),
        }
    }

    /// Load configuration from the environment.
    ///
    /// `TELEGRAM_BOT_TOKEN` is required; everything else is defaulted.
    pub fn load() -> Result<Self> {
        let token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let mut cfg = Self::new(token);
        if let Some(base) = env_str("TELEGRAM_API_BASE") {
            cfg.api_base = base;
        }
        if let Some(secs) = env_u64("POLL_INTERVAL_SECS") {
            cfg.poll_interval = Duration::from_secs(secs);
        }
        if let Some(v) = env_u64("POLL_LIMIT") {
            cfg.poll_limit = v.clamp(1, 100) as i64;
        }
        if let Some(v) = env_u64("POLL_TIMEOUT_SECS") {
            cfg.poll_timeout = v as i64;
        }
        if let Some(v) = env_u64("WORKER_COUNT") {
            cfg.worker_count = (v as usize).max(1);
        }
        if let Some(p) = env_str("SESSION_FILE") {
            cfg.session_file = PathBuf::from(p);
        }
        Ok(cfg)
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
