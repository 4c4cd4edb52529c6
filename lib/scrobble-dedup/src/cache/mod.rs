//! Key/value store for resolved track durations.
//!
//! Three interchangeable backends share the [`Cache`] trait: an in-memory map,
//! a file-backed log compacted in the background, and a Redis server.

mod file;
mod memory;
mod remote;

pub use file::{FileCache, CACHE_FILE_NAME, DEFAULT_COMPACTION_INTERVAL};
pub use memory::InMemoryCache;
pub use remote::RedisCache;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::{path::Path, sync::Arc, time::Duration};
use tracing::info;

use crate::{config::CacheKind, error::Result};

#[async_trait]
pub trait Cache: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` on a miss, whatever the backend.
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Flushes pending state and releases the backend. Errors are logged.
    async fn close(&self);
}

/// Cache key for a duration lookup of (artist, track).
pub fn duration_key(artist: &str, track: &str) -> String {
    let query = format!(r#"artist:"{artist}" AND recording:"{track}""#);
    let digest = Sha256::digest(query.as_bytes());
    format!("mbquery:{digest:x}")
}

/// Opens the backend selected by configuration.
pub async fn open(
    kind: CacheKind,
    data_dir: &Path,
    redis_url: Option<&str>,
    compaction_interval: Duration,
) -> Result<Arc<dyn Cache>> {
    match kind {
        CacheKind::InMemory => {
            info!("Using in-memory cache");
            Ok(Arc::new(InMemoryCache::new()))
        }
        CacheKind::File => {
            let path = data_dir.join(CACHE_FILE_NAME);
            info!(path = %path.display(), "Using file cache");
            Ok(Arc::new(FileCache::open(&path, compaction_interval).await?))
        }
        CacheKind::Redis => {
            let url = redis_url.ok_or_else(|| {
                crate::error::DedupError::Config("redis cache requires a redis URL".to_string())
            })?;
            info!("Using Redis cache");
            Ok(Arc::new(RedisCache::connect(url).await?))
        }
    }
}
