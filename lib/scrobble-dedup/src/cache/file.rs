use async_trait::async_trait;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs,
    io::AsyncWriteExt,
    sync::Mutex,
    task::JoinHandle,
    time::{interval_at, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::Cache;
use crate::error::Result;

pub const CACHE_FILE_NAME: &str = "cache.db";

/// How often the background task rewrites the cache file.
pub const DEFAULT_COMPACTION_INTERVAL: Duration = Duration::from_secs(30);

struct Inner {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
    /// Serializes compactions so the timer and `close` never race on the temp file.
    compaction: Mutex<()>,
}

impl Inner {
    /// Writes the current entries to a temp file, syncs it, then renames it
    /// over the cache file. The entry map is only locked while cloning.
    async fn compact(&self) -> Result<()> {
        let _guard = self.compaction.lock().await;
        let snapshot = self.entries.lock().await.clone();

        let mut contents = String::new();
        for (key, value) in &snapshot {
            contents.push_str(key);
            contents.push('=');
            contents.push_str(value);
            contents.push('\n');
        }

        let tmp_path = self.path.with_extension("db.tmp");
        let mut tmp = fs::File::create(&tmp_path).await?;
        tmp.write_all(contents.as_bytes()).await?;
        tmp.sync_all().await?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path).await?;
        debug!(entries = snapshot.len(), path = %self.path.display(), "Compacted cache file");
        Ok(())
    }
}

/// Parses `key=value` lines. Later lines win over earlier ones.
fn parse_entries(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Cache persisted as `key=value` lines in a single file.
///
/// Reads and writes only touch the in-memory map. A background task compacts
/// the map to disk on a fixed interval and `close` compacts one last time.
pub struct FileCache {
    inner: Arc<Inner>,
    cancellation_token: CancellationToken,
    compactor: Mutex<Option<JoinHandle<()>>>,
}

impl FileCache {
    pub async fn open(path: &Path, compaction_interval: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::write(path, "").await?;
                String::new()
            }
            Err(e) => return Err(e.into()),
        };
        let entries = parse_entries(&contents);
        info!(entries = entries.len(), path = %path.display(), "Loaded file cache");

        let inner = Arc::new(Inner {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
            compaction: Mutex::new(()),
        });
        let cancellation_token = CancellationToken::new();
        let compactor = spawn_compactor(inner.clone(), cancellation_token.clone(), compaction_interval);

        Ok(Self {
            inner,
            cancellation_token,
            compactor: Mutex::new(Some(compactor)),
        })
    }
}

fn spawn_compactor(
    inner: Arc<Inner>,
    cancellation_token: CancellationToken,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = inner.compact().await {
                        error!(error = %e, "Periodic cache compaction failed");
                    }
                }
            }
        }
    })
}

#[async_trait]
impl Cache for FileCache {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // Physically gone from disk at the next compaction.
        self.inner.entries.lock().await.remove(key);
        Ok(())
    }

    async fn close(&self) {
        self.cancellation_token.cancel();
        if let Some(handle) = self.compactor.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Cache compaction task failed");
            }
        }
        if let Err(e) = self.inner.compact().await {
            error!(error = %e, "Failed to flush file cache");
        }
    }
}

impl Drop for FileCache {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
