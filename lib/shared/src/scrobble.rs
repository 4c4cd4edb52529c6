use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A library row as returned by the scraper, in the site's own order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawScrobble {
    pub artist: String,
    pub track: String,
    pub timestamp_raw: String,
    pub url: Option<String>,
}

/// A single play in the listening history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scrobble {
    pub artist: String,
    pub track: String,
    pub timestamp: DateTime<Utc>,
    /// Identifier the delete form matches on. Never reformatted.
    pub timestamp_raw: String,
    pub track_duration: Option<Duration>,
    /// Track page, only used for the fallback duration lookup.
    pub source_url: Option<String>,
}

impl Scrobble {
    pub fn same_track(&self, other: &Scrobble) -> bool {
        self.artist == other.artist && self.track == other.track
    }
}

/// Error returned when a raw row carries an unusable timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrobbleParseError {
    pub timestamp_raw: String,
}

impl std::fmt::Display for ScrobbleParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid scrobble timestamp: {:?}", self.timestamp_raw)
    }
}

impl std::error::Error for ScrobbleParseError {}

impl TryFrom<RawScrobble> for Scrobble {
    type Error = ScrobbleParseError;

    fn try_from(raw: RawScrobble) -> Result<Self, Self::Error> {
        let timestamp = raw
            .timestamp_raw
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .ok_or_else(|| ScrobbleParseError {
                timestamp_raw: raw.timestamp_raw.clone(),
            })?;

        Ok(Scrobble {
            artist: raw.artist,
            track: raw.track,
            timestamp,
            timestamp_raw: raw.timestamp_raw,
            track_duration: None,
            source_url: raw.url,
        })
    }
}

/// One recording returned by a metadata search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationCandidate {
    pub title: String,
    pub artist: String,
    pub duration_ms: Option<u32>,
}

impl DurationCandidate {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.duration_ms.unwrap_or(0)))
    }
}

/// Optional day bounds applied to the library listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// Query parameters understood by the library page (`YYYY-MM-DD`).
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(from) = self.from {
            pairs.push(("from", from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = self.to {
            pairs.push(("to", to.format("%Y-%m-%d").to_string()));
        }
        pairs
    }
}
