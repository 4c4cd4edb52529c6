//! Run configuration, validated before any network or disk access.

use chrono::NaiveDate;
use shared::DateRange;
use std::{path::PathBuf, time::Duration};

use crate::{
    cache::DEFAULT_COMPACTION_INTERVAL,
    error::{DedupError, Result},
};

/// Date format accepted for `from` / `to`.
pub const INPUT_DAY_FORMAT: &str = "%d-%m-%Y";

pub const DEFAULT_DUPLICATE_THRESHOLD: u8 = 90;
pub const DEFAULT_COMPLETE_THRESHOLD: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheKind {
    InMemory,
    #[default]
    File,
    Redis,
}

impl std::str::FromStr for CacheKind {
    type Err = DedupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inmemory" | "memory" => Ok(CacheKind::InMemory),
            "file" => Ok(CacheKind::File),
            "redis" => Ok(CacheKind::Redis),
            other => Err(DedupError::Config(format!("unsupported cache type: {other}"))),
        }
    }
}

/// Percentages of the track length, both in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// A same-track replay below this completion is a duplicate.
    pub duplicate: u8,
    /// A play below this completion is incomplete. Zero disables the check.
    pub complete: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            duplicate: DEFAULT_DUPLICATE_THRESHOLD,
            complete: DEFAULT_COMPLETE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub username: String,
    /// Without a password the library is browsed anonymously (dry run only).
    pub password: Option<String>,
    pub can_delete: bool,
    pub start_page: Option<u32>,
    pub range: DateRange,
    pub cache_kind: CacheKind,
    pub redis_url: Option<String>,
    pub thresholds: Thresholds,
    pub data_dir: PathBuf,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub compaction_interval: Duration,
}

impl RunConfig {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
            can_delete: false,
            start_page: None,
            range: DateRange::default(),
            cache_kind: CacheKind::default(),
            redis_url: None,
            thresholds: Thresholds::default(),
            data_dir: PathBuf::from("."),
            telegram_bot_token: None,
            telegram_chat_id: None,
            compaction_interval: DEFAULT_COMPACTION_INTERVAL,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(DedupError::Config(message.to_string()));

        if self.username.trim().is_empty() {
            return invalid("username must be set");
        }
        if self.cache_kind == CacheKind::Redis && self.redis_url.as_deref().unwrap_or("").is_empty() {
            return invalid("redis-url must be set when cache-type is redis");
        }
        if self.start_page.is_some() && !self.range.is_unbounded() {
            return invalid(r#"start-page and "from" / "to" dates must not be set at the same time"#);
        }
        if self.start_page == Some(0) {
            return invalid("start-page must be at least 1");
        }
        if let (Some(from), Some(to)) = (self.range.from, self.range.to) {
            if from > to {
                return invalid(r#""to" date must be after "from" date"#);
            }
        }
        if self.thresholds.duplicate > 100 {
            return invalid("duplicate-threshold must be between 0 and 100");
        }
        if self.thresholds.complete > 100 {
            return invalid("complete-threshold must be between 0 and 100");
        }
        if self.telegram_bot_token.is_some() != self.telegram_chat_id.is_some() {
            return invalid("telegram-bot-token and telegram-chat-id must both be set");
        }
        if self.can_delete && self.password.is_none() {
            return invalid("deleting scrobbles requires a password");
        }
        Ok(())
    }
}

/// Parses a `DD-MM-YYYY` day.
pub fn parse_day(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), INPUT_DAY_FORMAT).map_err(|e| DedupError::Parse {
        what: "date",
        message: format!("{value:?} (expected DD-MM-YYYY): {e}"),
    })
}
