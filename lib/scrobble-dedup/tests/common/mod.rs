#![allow(dead_code)]

use async_trait::async_trait;
use scrobble_dedup::{
    cache::InMemoryCache, retry::RetryPolicy, DedupError, DurationLookup, MetadataProvider,
    Notifier, Result, RunConfig, RunController, ScrobbleDeleter, ScrobbleSource,
};
use shared::{DateRange, DurationCandidate, RawScrobble};
use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

pub const T0: i64 = 1_700_000_000;

pub fn raw(artist: &str, track: &str, offset_secs: i64) -> RawScrobble {
    RawScrobble {
        artist: artist.to_string(),
        track: track.to_string(),
        timestamp_raw: (T0 + offset_secs).to_string(),
        url: Some(format!("https://www.last.fm/music/{artist}/_/{track}")),
    }
}

pub fn ts(offset_secs: i64) -> String {
    (T0 + offset_secs).to_string()
}

/// Library pages keyed by page number, page 1 being the newest. Rows are
/// listed newest first like the website.
#[derive(Default)]
pub struct FakeLibrary {
    pages: Vec<Vec<RawScrobble>>,
    failing_pages: HashSet<u32>,
    stalled_pages: HashSet<u32>,
    fail_deletes: bool,
    missing_rows: bool,
    stalled_deletes: bool,
    track_pages: HashMap<String, Duration>,
    pub deletes: Mutex<Vec<(String, bool)>>,
    pub delete_attempts: Mutex<u32>,
    pub fetched: Mutex<Vec<u32>>,
}

impl FakeLibrary {
    pub fn new(pages: Vec<Vec<RawScrobble>>) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }

    pub fn failing_page(mut self, page: u32) -> Self {
        self.failing_pages.insert(page);
        self
    }

    pub fn stalled_page(mut self, page: u32) -> Self {
        self.stalled_pages.insert(page);
        self
    }

    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    /// Deletes fail as if the row was not on the retained pages.
    pub fn missing_rows(mut self) -> Self {
        self.missing_rows = true;
        self
    }

    pub fn stalled_deletes(mut self) -> Self {
        self.stalled_deletes = true;
        self
    }

    pub fn track_page(mut self, url: &str, duration: Duration) -> Self {
        self.track_pages.insert(url.to_string(), duration);
        self
    }

    pub fn deleted_timestamps(&self) -> Vec<(String, bool)> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScrobbleSource for FakeLibrary {
    fn name(&self) -> &'static str {
        "fake library"
    }

    async fn page_count(&self, _range: &DateRange) -> Result<u32> {
        Ok(self.pages.len() as u32)
    }

    async fn fetch_page(&self, page: u32, _range: &DateRange) -> Result<Vec<RawScrobble>> {
        self.fetched.lock().unwrap().push(page);
        if self.stalled_pages.contains(&page) {
            std::future::pending::<()>().await;
        }
        if self.failing_pages.contains(&page) {
            return Err(DedupError::Api {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(self.pages[(page - 1) as usize].clone())
    }
}

#[async_trait]
impl ScrobbleDeleter for FakeLibrary {
    async fn delete_by_timestamp(&self, timestamp_raw: &str, select_last: bool) -> Result<()> {
        *self.delete_attempts.lock().unwrap() += 1;
        if self.stalled_deletes {
            std::future::pending::<()>().await;
        }
        if self.missing_rows {
            return Err(DedupError::ScrobbleNotFound(timestamp_raw.to_string()));
        }
        if self.fail_deletes {
            return Err(DedupError::Api {
                status: 404,
                message: "no such scrobble".to_string(),
            });
        }
        self.deletes
            .lock()
            .unwrap()
            .push((timestamp_raw.to_string(), select_last));
        Ok(())
    }
}

#[async_trait]
impl DurationLookup for FakeLibrary {
    fn name(&self) -> &'static str {
        "fake track page"
    }

    async fn duration_by_url(&self, url: &str) -> Result<Option<Duration>> {
        Ok(self.track_pages.get(url).copied())
    }
}

/// Recording lengths by (artist, track). Unlisted tracks have no results.
#[derive(Default)]
pub struct FakeMetadata {
    lengths: HashMap<(String, String), u32>,
    pub searches: Mutex<u32>,
}

impl FakeMetadata {
    pub fn with(mut self, artist: &str, track: &str, length: Duration) -> Self {
        self.lengths.insert(
            (artist.to_string(), track.to_string()),
            length.as_millis() as u32,
        );
        self
    }

    pub fn search_count(&self) -> u32 {
        *self.searches.lock().unwrap()
    }
}

#[async_trait]
impl MetadataProvider for FakeMetadata {
    fn name(&self) -> &'static str {
        "fake metadata"
    }

    async fn search_recordings(&self, artist: &str, track: &str) -> Result<Vec<DurationCandidate>> {
        *self.searches.lock().unwrap() += 1;
        let candidates = self
            .lengths
            .get(&(artist.to_string(), track.to_string()))
            .map(|ms| {
                vec![DurationCandidate {
                    title: track.to_string(),
                    artist: artist.to_string(),
                    duration_ms: Some(*ms),
                }]
            })
            .unwrap_or_default();
        Ok(candidates)
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for FakeNotifier {
    fn name(&self) -> &'static str {
        "fake notifier"
    }

    async fn send(&self, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

pub fn live_config(data_dir: &Path) -> RunConfig {
    RunConfig {
        password: Some("hunter2".to_string()),
        can_delete: true,
        data_dir: data_dir.to_path_buf(),
        ..RunConfig::new("someone")
    }
}

pub fn dry_config(data_dir: &Path) -> RunConfig {
    RunConfig {
        data_dir: data_dir.to_path_buf(),
        ..RunConfig::new("someone")
    }
}

fn quick(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts).with_base_delay(Duration::ZERO)
}

pub fn controller(
    config: RunConfig,
    library: Arc<FakeLibrary>,
    metadata: Arc<FakeMetadata>,
    notifier: Option<Arc<FakeNotifier>>,
) -> RunController {
    let mut builder = RunController::builder(config)
        .cache(Arc::new(InMemoryCache::new()))
        .web_client(library)
        .metadata(metadata)
        .retry_policies(quick(2), quick(3), quick(2));
    if let Some(notifier) = notifier {
        builder = builder.notifier(notifier);
    }
    builder.build().unwrap()
}

pub fn export_files(dir: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("deleted-scrobbles-") && n.ends_with(".csv"))
        })
        .collect()
}
