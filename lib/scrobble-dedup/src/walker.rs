//! Sequential scan of the library, oldest page first.

use shared::{DateRange, Scrobble};
use tracing::{debug, info, warn};

use crate::{
    classifier::classify,
    config::Thresholds,
    error::{DedupError, Result},
    resolver::{DurationResolver, ResolveError},
    retry::RetryPolicy,
    run::RunState,
    traits::{ScrobbleDeleter, ScrobbleSource},
};

pub struct PageWalker<'a> {
    source: &'a dyn ScrobbleSource,
    deleter: &'a dyn ScrobbleDeleter,
    resolver: DurationResolver<'a>,
    thresholds: Thresholds,
    can_delete: bool,
    page_retry: RetryPolicy,
    delete_retry: RetryPolicy,
}

impl<'a> PageWalker<'a> {
    pub fn new(
        source: &'a dyn ScrobbleSource,
        deleter: &'a dyn ScrobbleDeleter,
        resolver: DurationResolver<'a>,
        thresholds: Thresholds,
        can_delete: bool,
    ) -> Self {
        Self {
            source,
            deleter,
            resolver,
            thresholds,
            can_delete,
            page_retry: RetryPolicy::page_fetch(),
            delete_retry: RetryPolicy::delete(),
        }
    }

    pub fn with_retry_policies(mut self, page_retry: RetryPolicy, delete_retry: RetryPolicy) -> Self {
        self.page_retry = page_retry;
        self.delete_retry = delete_retry;
        self
    }

    /// Page to start from: the oldest page, or `requested` when given.
    pub async fn start_page(&self, requested: Option<u32>, range: &DateRange) -> Result<u32> {
        let total_pages = self
            .page_retry
            .run("page count", || self.source.page_count(range))
            .await?;
        if total_pages == 0 {
            return Err(DedupError::NoScrobbles);
        }
        info!(pages = total_pages, "Total pages found");

        let start = match requested {
            Some(page) if page > total_pages => {
                return Err(DedupError::Config(format!(
                    "start page {page} exceeds total pages {total_pages}"
                )))
            }
            Some(page) => page,
            None => total_pages,
        };
        info!(page = start, "Starting on page");
        Ok(start)
    }

    /// Walks pages `start_page..=1`. A page that cannot be fetched after
    /// retries aborts the walk; everything else is skipped and counted.
    pub async fn walk(&self, start_page: u32, range: &DateRange, state: &mut RunState) -> Result<()> {
        let mut previous: Option<Scrobble> = None;

        for page in (1..=start_page).rev() {
            info!(page, "Processing page");
            let rows = self
                .page_retry
                .run("page fetch", || self.source.fetch_page(page, range))
                .await?;
            info!(page, count = rows.len(), "Scrobbles found on page");

            // Pages list the newest play first.
            for raw in rows.into_iter().rev() {
                let current = match Scrobble::try_from(raw) {
                    Ok(scrobble) => scrobble,
                    Err(e) => {
                        warn!(page, error = %e, "Skipping unreadable scrobble");
                        continue;
                    }
                };
                debug!(artist = %current.artist, track = %current.track, timestamp = %current.timestamp, "scrobble");

                previous = Some(self.process(previous.take(), current, state).await);
                state.stats.processed_scrobbles += 1;
            }
        }

        info!("Processing complete");
        Ok(())
    }

    /// Compares `current` with `previous` and returns the scrobble that
    /// `current`'s successor must be compared with.
    async fn process(
        &self,
        previous: Option<Scrobble>,
        mut current: Scrobble,
        state: &mut RunState,
    ) -> Scrobble {
        if let Err(e) = self.resolver.resolve(&mut current, state).await {
            match &e {
                ResolveError::Unresolved { already_known: true, .. } => {
                    debug!(error = %e, "duration previously unresolved, skipping scrobble");
                }
                _ => warn!(error = %e, "Failed to get track duration, skipping scrobble"),
            }
            state.stats.skipped_unknown_duration += 1;
            return current;
        }

        let Some(previous) = previous else {
            return current;
        };

        let verdict = classify(&previous, &current, self.thresholds);
        if verdict.removes_previous() {
            self.remove(&previous, false, state).await;
            current
        } else if verdict.removes_current() {
            self.remove(&current, true, state).await;
            previous
        } else {
            current
        }
    }

    /// Records the scrobble for export and deletes it when allowed. A failed
    /// delete is counted and the walk goes on.
    async fn remove(&self, scrobble: &Scrobble, select_last: bool, state: &mut RunState) {
        if !self.can_delete {
            debug!(timestamp = %scrobble.timestamp_raw, "dry run, scrobble kept");
            state.deleted.push(scrobble.clone());
            return;
        }

        let result = self
            .delete_retry
            .run("scrobble delete", || {
                self.deleter
                    .delete_by_timestamp(&scrobble.timestamp_raw, select_last)
            })
            .await;

        // Only recorded once the delete settled; an interrupted one is not exported.
        state.deleted.push(scrobble.clone());
        match result {
            Ok(()) => info!(
                artist = %scrobble.artist,
                track = %scrobble.track,
                timestamp = %scrobble.timestamp,
                "Scrobble deleted"
            ),
            Err(e) => {
                state.stats.delete_failures += 1;
                warn!(
                    artist = %scrobble.artist,
                    track = %scrobble.track,
                    timestamp = %scrobble.timestamp,
                    error = %e,
                    "Failed to delete scrobble"
                );
            }
        }
    }
}
