//! Environment-driven defaults.
//!
//! Values come from the process environment, after loading `.env` from the
//! working directory if one exists. CLI flags override them.
//!
//! - `REFINE_POLL_MS`: how often `--watch` rescans the profile folder
//! - `REFINE_REFRESH_MS`: monitor redraw tick
//! - `REFINE_MAX_QUEUE`: per-window sample cap (unset or 0 means unbounded)

use std::time::Duration;

use crate::error::AppError;

pub const POLL_MS_VAR: &str = "REFINE_POLL_MS";
pub const REFRESH_MS_VAR: &str = "REFINE_REFRESH_MS";
pub const MAX_QUEUE_VAR: &str = "REFINE_MAX_QUEUE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub poll_interval: Duration,
    pub refresh: Duration,
    pub max_queue: Option<usize>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            refresh: Duration::from_millis(100),
            max_queue: None,
        }
    }
}

impl EnvConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(ms) = parse_u64(&lookup, POLL_MS_VAR)? {
            config.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = parse_u64(&lookup, REFRESH_MS_VAR)? {
            config.refresh = Duration::from_millis(ms.max(1));
        }
        if let Some(n) = parse_u64(&lookup, MAX_QUEUE_VAR)? {
            config.max_queue = (n > 0).then_some(n as usize);
        }
        Ok(config)
    }
}

fn parse_u64<F>(lookup: &F, key: &str) -> Result<Option<u64>, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| AppError::Config(format!("{key} must be a non-negative integer, got '{raw}'")))
}
