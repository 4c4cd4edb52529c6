//! Track duration lookup: overrides, known-unknowns, cache, MusicBrainz, Last.fm.

use shared::Scrobble;
use std::{
    future::Future,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
    cache::{duration_key, Cache},
    durations::{format_duration, parse_cached, parse_duration, CachedDuration},
    error::DedupError,
    retry::RetryPolicy,
    run::RunState,
    traits::{DurationLookup, MetadataProvider},
};

#[derive(Debug, Error)]
pub enum ResolveError {
    /// No duration exists for this track. The pair is in the unknown set and
    /// the scrobble must be skipped.
    #[error("no duration for {artist} - {track}")]
    Unresolved {
        artist: String,
        track: String,
        /// The pair was already known to be unresolvable before this call.
        already_known: bool,
    },
    /// Lookup failed after retries. Nothing is recorded for the pair.
    #[error("duration lookup failed: {0}")]
    Transient(#[from] DedupError),
}

/// Deadline for a single cache call.
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DurationResolver<'a> {
    cache: &'a dyn Cache,
    metadata: &'a dyn MetadataProvider,
    fallback: &'a dyn DurationLookup,
    search_retry: RetryPolicy,
    cache_timeout: Duration,
}

impl<'a> DurationResolver<'a> {
    pub fn new(
        cache: &'a dyn Cache,
        metadata: &'a dyn MetadataProvider,
        fallback: &'a dyn DurationLookup,
    ) -> Self {
        Self {
            cache,
            metadata,
            fallback,
            search_retry: RetryPolicy::metadata_search(),
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
        }
    }

    pub fn with_search_retry(mut self, policy: RetryPolicy) -> Self {
        self.search_retry = policy;
        self
    }

    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    /// Bounds a cache call. An elapsed deadline is a retryable timeout.
    async fn cache_call<T>(
        &self,
        operation: &str,
        call: impl Future<Output = crate::error::Result<T>>,
    ) -> crate::error::Result<T> {
        tokio::time::timeout(self.cache_timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(DedupError::Timeout {
                    operation: format!("{} cache {operation}", self.cache.name()),
                    timeout: self.cache_timeout,
                })
            })
    }

    /// Fills `scrobble.track_duration`. The first source with an answer wins.
    pub async fn resolve(
        &self,
        scrobble: &mut Scrobble,
        state: &mut RunState,
    ) -> Result<Duration, ResolveError> {
        if let Some(duration) = self.from_overrides(scrobble, state) {
            scrobble.track_duration = Some(duration);
            return Ok(duration);
        }

        if state.unknown.contains(&scrobble.artist, &scrobble.track) {
            return Err(ResolveError::Unresolved {
                artist: scrobble.artist.clone(),
                track: scrobble.track.clone(),
                already_known: true,
            });
        }

        let key = duration_key(&scrobble.artist, &scrobble.track);
        let started = Instant::now();
        let cached = self.cache_call("get", self.cache.get(&key)).await?;
        debug!(key = %key, took = ?started.elapsed(), "cache get");

        if let Some(value) = cached {
            match parse_cached(&value) {
                Ok(CachedDuration::Known(duration)) => {
                    state.stats.cache_hits += 1;
                    debug!(artist = %scrobble.artist, track = %scrobble.track, ?duration, "cache hit");
                    scrobble.track_duration = Some(duration);
                    return Ok(duration);
                }
                Ok(CachedDuration::NotFound) => {
                    state.stats.cache_hits += 1;
                    if let Err(e) = self.cache_call("delete", self.cache.delete(&key)).await {
                        warn!(key = %key, error = %e, "Failed to delete negative cache entry");
                    }
                    return Err(register_unknown(scrobble, state));
                }
                Err(e) => {
                    warn!(key = %key, value = %value, error = %e, "Ignoring unreadable cache entry");
                }
            }
        }

        state.stats.cache_misses += 1;
        debug!(artist = %scrobble.artist, track = %scrobble.track, "cache miss");

        let mut duration = self.search(scrobble).await?;
        if duration.is_zero() {
            duration = self.lookup_fallback(scrobble).await;
        }
        if duration.is_zero() {
            return Err(register_unknown(scrobble, state));
        }

        scrobble.track_duration = Some(duration);
        self.store(&key, duration).await;
        debug!(artist = %scrobble.artist, track = %scrobble.track, ?duration, "track duration found");
        Ok(duration)
    }

    fn from_overrides(&self, scrobble: &Scrobble, state: &RunState) -> Option<Duration> {
        let value = state.overrides.get(&scrobble.artist, &scrobble.track)?;
        match parse_duration(value) {
            Ok(duration) if !duration.is_zero() => {
                debug!(artist = %scrobble.artist, track = %scrobble.track, ?duration, "duration from overrides");
                Some(duration)
            }
            Ok(_) => {
                warn!(artist = %scrobble.artist, track = %scrobble.track, "Ignoring zero override duration");
                None
            }
            Err(e) => {
                error!(artist = %scrobble.artist, track = %scrobble.track, error = %e, "Failed to parse override duration");
                None
            }
        }
    }

    /// Zero when the search succeeded without a usable candidate.
    async fn search(&self, scrobble: &Scrobble) -> Result<Duration, ResolveError> {
        let operation = format!("{} recording search", self.metadata.name());
        let candidates = self
            .search_retry
            .run(&operation, || {
                self.metadata
                    .search_recordings(&scrobble.artist, &scrobble.track)
            })
            .await?;

        let Some(first) = candidates.first() else {
            debug!(artist = %scrobble.artist, track = %scrobble.track, "no recordings found");
            return Ok(Duration::ZERO);
        };

        if candidates.len() > 1 {
            debug!(
                artist = %scrobble.artist,
                track = %scrobble.track,
                count = candidates.len(),
                "multiple recordings found, using the first one"
            );
            for (index, candidate) in candidates.iter().enumerate() {
                debug!(index, artist = %candidate.artist, title = %candidate.title, duration_ms = ?candidate.duration_ms, "recording");
            }
        }

        Ok(first.duration())
    }

    async fn lookup_fallback(&self, scrobble: &Scrobble) -> Duration {
        let Some(url) = scrobble.source_url.as_deref() else {
            return Duration::ZERO;
        };

        match self.fallback.duration_by_url(url).await {
            Ok(Some(duration)) => {
                debug!(url, ?duration, source = self.fallback.name(), "duration from fallback lookup");
                duration
            }
            Ok(None) => Duration::ZERO,
            Err(e) => {
                warn!(url, error = %e, source = self.fallback.name(), "Fallback duration lookup failed");
                Duration::ZERO
            }
        }
    }

    async fn store(&self, key: &str, duration: Duration) {
        let started = Instant::now();
        let value = format_duration(duration);
        let result = self.cache_call("set", self.cache.set(key, &value)).await;
        debug!(key, took = ?started.elapsed(), "cache set");
        if let Err(e) = result {
            error!(key, error = %e, "Failed to cache track duration");
        }
    }
}

/// Records the pair as unknown for the rest of the run.
fn register_unknown(scrobble: &Scrobble, state: &mut RunState) -> ResolveError {
    let inserted = state.unknown.insert_unknown(&scrobble.artist, &scrobble.track);
    if inserted {
        state.stats.unknown_track_durations += 1;
    }
    ResolveError::Unresolved {
        artist: scrobble.artist.clone(),
        track: scrobble.track.clone(),
        already_known: !inserted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::error::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use shared::{DurationCandidate, TrackDurations};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Records every call and answers from a fixed script.
    #[derive(Default)]
    struct FakeMetadata {
        durations_ms: Vec<Option<u32>>,
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MetadataProvider for FakeMetadata {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn search_recordings(&self, artist: &str, track: &str) -> Result<Vec<DurationCandidate>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(DedupError::Api {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(self
                .durations_ms
                .iter()
                .map(|duration_ms| DurationCandidate {
                    title: track.to_string(),
                    artist: artist.to_string(),
                    duration_ms: *duration_ms,
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeLookup {
        duration: Option<Duration>,
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DurationLookup for FakeLookup {
        fn name(&self) -> &'static str {
            "fake page"
        }

        async fn duration_by_url(&self, url: &str) -> Result<Option<Duration>> {
            self.urls.lock().unwrap().push(url.to_string());
            Ok(self.duration)
        }
    }

    /// Counts backend calls on top of an in-memory map.
    #[derive(Default)]
    struct CountingCache {
        inner: InMemoryCache,
        gets: AtomicU32,
        deletes: AtomicU32,
    }

    #[async_trait]
    impl Cache for CountingCache {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(key).await
        }

        async fn close(&self) {}
    }

    fn scrobble(artist: &str, track: &str) -> Scrobble {
        Scrobble {
            artist: artist.to_string(),
            track: track.to_string(),
            timestamp: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            timestamp_raw: "1700000000".to_string(),
            track_duration: None,
            source_url: Some(format!("https://www.last.fm/music/{artist}/_/{track}")),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3).with_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn override_wins_without_touching_cache() {
        let cache = CountingCache::default();
        let metadata = FakeMetadata::default();
        let lookup = FakeLookup::default();
        let resolver = DurationResolver::new(&cache, &metadata, &lookup);

        let mut overrides = TrackDurations::new();
        overrides.insert("Low", "Words", "5m06s");
        let mut state = RunState::new(overrides);
        let mut s = scrobble("Low", "Words");

        let duration = resolver.resolve(&mut s, &mut state).await.unwrap();
        assert_eq!(duration, Duration::from_secs(306));
        assert_eq!(s.track_duration, Some(duration));
        assert_eq!(cache.gets.load(Ordering::SeqCst), 0);
        assert_eq!(state.stats.cache_hits + state.stats.cache_misses, 0);
    }

    #[tokio::test]
    async fn bad_override_falls_through_to_lookup() {
        let cache = CountingCache::default();
        let metadata = FakeMetadata {
            durations_ms: vec![Some(200_000)],
            ..Default::default()
        };
        let lookup = FakeLookup::default();
        let resolver = DurationResolver::new(&cache, &metadata, &lookup);

        let mut overrides = TrackDurations::new();
        overrides.insert("Low", "Words", "five minutes-ish");
        let mut state = RunState::new(overrides);
        let mut s = scrobble("Low", "Words");

        let duration = resolver.resolve(&mut s, &mut state).await.unwrap();
        assert_eq!(duration, Duration::from_secs(200));
        assert_eq!(state.stats.cache_misses, 1);
    }

    #[tokio::test]
    async fn miss_searches_then_caches_first_candidate() {
        let cache = CountingCache::default();
        let metadata = FakeMetadata {
            durations_ms: vec![Some(243_000), Some(500_000)],
            ..Default::default()
        };
        let lookup = FakeLookup::default();
        let resolver = DurationResolver::new(&cache, &metadata, &lookup);
        let mut state = RunState::default();

        let mut s = scrobble("Slowdive", "Alison");
        let duration = resolver.resolve(&mut s, &mut state).await.unwrap();
        assert_eq!(duration, Duration::from_secs(243));
        assert_eq!(state.stats.cache_misses, 1);
        assert_eq!(
            cache.get(&duration_key("Slowdive", "Alison")).await.unwrap().as_deref(),
            Some("4m 3s")
        );

        let mut again = scrobble("Slowdive", "Alison");
        resolver.resolve(&mut again, &mut state).await.unwrap();
        assert_eq!(state.stats.cache_hits, 1);
        assert_eq!(metadata.calls.load(Ordering::SeqCst), 1);
        assert!(lookup.urls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_search_uses_fallback_once() {
        let cache = CountingCache::default();
        let metadata = FakeMetadata::default();
        let lookup = FakeLookup {
            duration: Some(Duration::from_secs(181)),
            ..Default::default()
        };
        let resolver = DurationResolver::new(&cache, &metadata, &lookup).with_search_retry(fast_retry());
        let mut state = RunState::default();

        let mut s = scrobble("Duster", "Inside Out");
        let duration = resolver.resolve(&mut s, &mut state).await.unwrap();
        assert_eq!(duration, Duration::from_secs(181));
        // An empty result is not a failure, so the search is not retried.
        assert_eq!(metadata.calls.load(Ordering::SeqCst), 1);
        assert_eq!(lookup.urls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn candidate_without_length_uses_fallback() {
        let cache = CountingCache::default();
        let metadata = FakeMetadata {
            durations_ms: vec![None],
            ..Default::default()
        };
        let lookup = FakeLookup::default();
        let resolver = DurationResolver::new(&cache, &metadata, &lookup);
        let mut state = RunState::default();

        let mut s = scrobble("Duster", "Inside Out");
        let err = resolver.resolve(&mut s, &mut state).await.unwrap_err();
        assert!(matches!(err, ResolveError::Unresolved { already_known: false, .. }));
        assert_eq!(lookup.urls.lock().unwrap().len(), 1);
        assert!(state.unknown.contains("Duster", "Inside Out"));
        assert_eq!(state.stats.unknown_track_durations, 1);
    }

    #[tokio::test]
    async fn transient_search_failures_are_retried() {
        let cache = CountingCache::default();
        let metadata = FakeMetadata {
            durations_ms: vec![Some(100_000)],
            failures_before_success: 2,
            ..Default::default()
        };
        let lookup = FakeLookup::default();
        let resolver = DurationResolver::new(&cache, &metadata, &lookup).with_search_retry(fast_retry());
        let mut state = RunState::default();

        let mut s = scrobble("Cocteau Twins", "Lorelei");
        assert_eq!(
            resolver.resolve(&mut s, &mut state).await.unwrap(),
            Duration::from_secs(100)
        );
        assert_eq!(metadata.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_are_transient_and_not_recorded() {
        let cache = CountingCache::default();
        let metadata = FakeMetadata {
            durations_ms: vec![Some(100_000)],
            failures_before_success: 10,
            ..Default::default()
        };
        let lookup = FakeLookup::default();
        let resolver = DurationResolver::new(&cache, &metadata, &lookup).with_search_retry(fast_retry());
        let mut state = RunState::default();

        let mut s = scrobble("Cocteau Twins", "Lorelei");
        let err = resolver.resolve(&mut s, &mut state).await.unwrap_err();
        assert!(matches!(err, ResolveError::Transient(_)));
        assert!(state.unknown.is_empty());
        assert!(lookup.urls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn negative_cache_entry_is_deleted_and_recorded_once() {
        let cache = CountingCache::default();
        let key = duration_key("Galaxie 500", "Tugboat");
        cache.set(&key, "0s").await.unwrap();
        let metadata = FakeMetadata::default();
        let lookup = FakeLookup::default();
        let resolver = DurationResolver::new(&cache, &metadata, &lookup);
        let mut state = RunState::default();

        let mut first = scrobble("Galaxie 500", "Tugboat");
        let err = resolver.resolve(&mut first, &mut state).await.unwrap_err();
        assert!(matches!(err, ResolveError::Unresolved { already_known: false, .. }));
        assert_eq!(cache.get(&key).await.unwrap(), None);
        assert_eq!(cache.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(state.stats.unknown_track_durations, 1);
        assert_eq!(state.unknown.len(), 1);

        let gets_before = cache.gets.load(Ordering::SeqCst);
        let stats_before = state.stats.clone();

        let mut second = scrobble("Galaxie 500", "Tugboat");
        let err = resolver.resolve(&mut second, &mut state).await.unwrap_err();
        assert!(matches!(err, ResolveError::Unresolved { already_known: true, .. }));
        assert_eq!(cache.gets.load(Ordering::SeqCst), gets_before);
        assert_eq!(metadata.calls.load(Ordering::SeqCst), 0);
        assert_eq!(state.stats, stats_before);
        assert_eq!(state.unknown.len(), 1);
    }

    #[tokio::test]
    async fn legacy_negative_sentinel_counts_as_not_found() {
        let cache = CountingCache::default();
        cache.set(&duration_key("Lush", "Sweetness and Light"), "-1").await.unwrap();
        let metadata = FakeMetadata::default();
        let lookup = FakeLookup::default();
        let resolver = DurationResolver::new(&cache, &metadata, &lookup);
        let mut state = RunState::default();

        let mut s = scrobble("Lush", "Sweetness and Light");
        assert!(resolver.resolve(&mut s, &mut state).await.is_err());
        assert!(state.unknown.contains("Lush", "Sweetness and Light"));
        assert_eq!(metadata.calls.load(Ordering::SeqCst), 0);
    }

    /// Never answers, like a Redis server that stopped responding.
    struct StalledCache;

    #[async_trait]
    impl Cache for StalledCache {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn get(&self, _key: &str) -> Result<Option<String>> {
            std::future::pending().await
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<()> {
            std::future::pending().await
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            std::future::pending().await
        }

        async fn close(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_cache_times_out_as_transient() {
        let cache = StalledCache;
        let metadata = FakeMetadata {
            durations_ms: vec![Some(200_000)],
            ..Default::default()
        };
        let lookup = FakeLookup::default();
        let resolver =
            DurationResolver::new(&cache, &metadata, &lookup).with_cache_timeout(Duration::from_secs(1));
        let mut state = RunState::default();

        let mut s = scrobble("Codeine", "D");
        let err = resolver.resolve(&mut s, &mut state).await.unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Transient(DedupError::Timeout { ref operation, .. }) if operation == "stalled cache get"
        ));
        assert!(!state.unknown.contains("Codeine", "D"));
        assert_eq!(metadata.calls.load(Ordering::SeqCst), 0);
        assert_eq!(s.track_duration, None);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_cache_write_does_not_block_resolution() {
        let cache = StallingWrites::default();
        let metadata = FakeMetadata {
            durations_ms: vec![Some(200_000)],
            ..Default::default()
        };
        let lookup = FakeLookup::default();
        let resolver =
            DurationResolver::new(&cache, &metadata, &lookup).with_cache_timeout(Duration::from_secs(1));
        let mut state = RunState::default();

        let mut s = scrobble("Codeine", "D");
        let duration = resolver.resolve(&mut s, &mut state).await.unwrap();
        assert_eq!(duration, Duration::from_secs(200));
    }

    /// Reads miss immediately, writes never finish.
    #[derive(Default)]
    struct StallingWrites {
        inner: InMemoryCache,
    }

    #[async_trait]
    impl Cache for StallingWrites {
        fn name(&self) -> &'static str {
            "stalling writes"
        }

        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<()> {
            std::future::pending().await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }

        async fn close(&self) {}
    }
}
