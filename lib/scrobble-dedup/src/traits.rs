use async_trait::async_trait;
use shared::{DateRange, DurationCandidate, RawScrobble};
use std::time::Duration;

use crate::error::Result;

/// Paginated listening history, newest page first.
#[async_trait]
pub trait ScrobbleSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of library pages for the range. Zero means no scrobbles.
    async fn page_count(&self, range: &DateRange) -> Result<u32>;

    /// Rows of one page in the site's order (newest first).
    async fn fetch_page(&self, page: u32, range: &DateRange) -> Result<Vec<RawScrobble>>;
}

#[async_trait]
pub trait ScrobbleDeleter: Send + Sync {
    /// Removes the scrobble addressed by its raw timestamp. `select_last`
    /// picks the last row when several share the same timestamp.
    async fn delete_by_timestamp(&self, timestamp_raw: &str, select_last: bool) -> Result<()>;
}

/// Primary duration source, searched by artist and track title.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// May return an empty list without erroring.
    async fn search_recordings(&self, artist: &str, track: &str) -> Result<Vec<DurationCandidate>>;
}

/// Slower single-shot lookup keyed by the scrobble's track page.
#[async_trait]
pub trait DurationLookup: Send + Sync {
    fn name(&self) -> &'static str;

    async fn duration_by_url(&self, url: &str) -> Result<Option<Duration>>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, message: &str) -> Result<()>;
}
