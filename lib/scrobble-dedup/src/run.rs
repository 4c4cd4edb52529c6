//! Wires the collaborators together and owns the run-scoped state.

use chrono::{DateTime, Local};
use shared::{Scrobble, TrackDurations};
use std::{future::Future, path::PathBuf, sync::Arc, time::Instant};
use tracing::{error, info, warn};

use crate::{
    cache::{self, Cache},
    config::RunConfig,
    durations::{load_track_durations, save_unknown_track_durations},
    error::{DedupError, Result},
    export::export_scrobbles,
    lastfm::LastFmClient,
    musicbrainz::MusicBrainzProvider,
    notify::TelegramNotifier,
    resolver::DurationResolver,
    retry::RetryPolicy,
    stats::RunStats,
    traits::{DurationLookup, MetadataProvider, Notifier, ScrobbleDeleter, ScrobbleSource},
    walker::PageWalker,
};

/// Accumulators shared by reference with the walker and the resolver.
#[derive(Debug, Default)]
pub struct RunState {
    /// Durations from the user's file. Read only during the run.
    pub overrides: TrackDurations,
    /// Pairs no source could resolve in this run.
    pub unknown: TrackDurations,
    pub stats: RunStats,
    /// Scrobbles selected for removal, deleted or not.
    pub deleted: Vec<Scrobble>,
}

impl RunState {
    pub fn new(overrides: TrackDurations) -> Self {
        Self {
            overrides,
            ..Default::default()
        }
    }
}

/// What a finished run leaves behind.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stats: RunStats,
    pub deleted: Vec<Scrobble>,
    pub export_file: Option<PathBuf>,
}

pub struct RunController {
    config: RunConfig,
    cache: Arc<dyn Cache>,
    source: Arc<dyn ScrobbleSource>,
    deleter: Arc<dyn ScrobbleDeleter>,
    metadata: Arc<dyn MetadataProvider>,
    fallback: Arc<dyn DurationLookup>,
    notifier: Option<Arc<dyn Notifier>>,
    search_retry: RetryPolicy,
    page_retry: RetryPolicy,
    delete_retry: RetryPolicy,
}

impl RunController {
    pub fn builder(config: RunConfig) -> RunControllerBuilder {
        RunControllerBuilder::new(config)
    }

    /// Builds the production collaborators: the configured cache backend,
    /// MusicBrainz, the Last.fm website and the optional Telegram chat.
    pub async fn connect(config: RunConfig) -> Result<Self> {
        config.validate()?;

        let cache = cache::open(
            config.cache_kind,
            &config.data_dir,
            config.redis_url.as_deref(),
            config.compaction_interval,
        )
        .await?;

        let lastfm = Arc::new(LastFmClient::new(&config.username)?);
        if let Some(password) = &config.password {
            lastfm.login(password).await?;
        } else {
            info!("No password given, browsing the library anonymously");
        }

        let notifier = match (&config.telegram_bot_token, &config.telegram_chat_id) {
            (Some(token), Some(chat_id)) => Some(TelegramNotifier::new(token, chat_id)?),
            _ => None,
        };

        let mut builder = RunControllerBuilder::new(config)
            .cache(cache)
            .web_client(lastfm)
            .metadata(Arc::new(MusicBrainzProvider::new()?));
        if let Some(notifier) = notifier {
            builder = builder.notifier(Arc::new(notifier));
        }
        builder.build()
    }

    /// Runs the scan until it ends or `shutdown` resolves. Either way the
    /// report is logged and the accumulated state persisted before returning.
    pub async fn execute<F>(&self, shutdown: F) -> Result<RunReport>
    where
        F: Future,
    {
        let started = Instant::now();
        let started_at = Local::now();

        if let Err(e) = self.config.validate() {
            self.cache.close().await;
            return Err(e);
        }

        let overrides = match load_track_durations(&self.config.data_dir).await {
            Ok(overrides) => overrides,
            Err(e) => {
                self.cache.close().await;
                return Err(e);
            }
        };
        if !overrides.is_empty() {
            info!(tracks = overrides.len(), "Loaded track durations file");
        }
        let mut state = RunState::new(overrides);

        let outcome = tokio::select! {
            result = self.scan(&mut state) => result,
            _ = shutdown => {
                warn!("Interrupt received, saving progress");
                Err(DedupError::Interrupted)
            }
        };

        if let Err(e) = &outcome {
            error!(error = %e, "Run stopped early");
        }

        let report = self.finalize(state, started, started_at).await;
        outcome.map(|()| report)
    }

    async fn scan(&self, state: &mut RunState) -> Result<()> {
        let resolver = DurationResolver::new(
            self.cache.as_ref(),
            self.metadata.as_ref(),
            self.fallback.as_ref(),
        )
        .with_search_retry(self.search_retry);

        let walker = PageWalker::new(
            self.source.as_ref(),
            self.deleter.as_ref(),
            resolver,
            self.config.thresholds,
            self.config.can_delete,
        )
        .with_retry_policies(self.page_retry, self.delete_retry);

        let start_page = walker
            .start_page(self.config.start_page, &self.config.range)
            .await?;
        walker.walk(start_page, &self.config.range, state).await
    }

    async fn finalize(
        &self,
        mut state: RunState,
        started: Instant,
        started_at: DateTime<Local>,
    ) -> RunReport {
        state.stats.elapsed = started.elapsed();
        let can_delete = self.config.can_delete;
        state.stats.log(can_delete, state.deleted.len());

        if let Some(notifier) = &self.notifier {
            let mut message = format!("Run of {}\n", started_at.to_rfc2822());
            for line in state.stats.summary_lines(can_delete, state.deleted.len()) {
                message.push('\n');
                message.push_str(&line);
            }
            match notifier.send(&message).await {
                Ok(()) => info!(notifier = notifier.name(), "Sent run report"),
                Err(e) => warn!(notifier = notifier.name(), error = %e, "Failed to send run report"),
            }
        }

        if !state.unknown.is_empty() {
            if let Err(e) = save_unknown_track_durations(&self.config.data_dir, &state.unknown).await {
                error!(error = %e, "Failed to save unknown track durations");
            }
        }

        let export_file = if state.deleted.is_empty() {
            info!("No scrobbles selected for deletion");
            None
        } else {
            export_scrobbles(&self.config.data_dir, started_at, &state.deleted, can_delete)
        };

        self.cache.close().await;

        RunReport {
            stats: state.stats,
            deleted: state.deleted,
            export_file,
        }
    }
}

pub struct RunControllerBuilder {
    config: RunConfig,
    cache: Option<Arc<dyn Cache>>,
    source: Option<Arc<dyn ScrobbleSource>>,
    deleter: Option<Arc<dyn ScrobbleDeleter>>,
    metadata: Option<Arc<dyn MetadataProvider>>,
    fallback: Option<Arc<dyn DurationLookup>>,
    notifier: Option<Arc<dyn Notifier>>,
    search_retry: RetryPolicy,
    page_retry: RetryPolicy,
    delete_retry: RetryPolicy,
}

impl RunControllerBuilder {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            cache: None,
            source: None,
            deleter: None,
            metadata: None,
            fallback: None,
            notifier: None,
            search_retry: RetryPolicy::metadata_search(),
            page_retry: RetryPolicy::page_fetch(),
            delete_retry: RetryPolicy::delete(),
        }
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn source(mut self, source: Arc<dyn ScrobbleSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn deleter(mut self, deleter: Arc<dyn ScrobbleDeleter>) -> Self {
        self.deleter = Some(deleter);
        self
    }

    pub fn metadata(mut self, metadata: Arc<dyn MetadataProvider>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn fallback(mut self, fallback: Arc<dyn DurationLookup>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Uses one client as history source, deleter and fallback lookup.
    pub fn web_client<C>(self, client: Arc<C>) -> Self
    where
        C: ScrobbleSource + ScrobbleDeleter + DurationLookup + 'static,
    {
        self.source(client.clone())
            .deleter(client.clone())
            .fallback(client)
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn retry_policies(mut self, search: RetryPolicy, page: RetryPolicy, delete: RetryPolicy) -> Self {
        self.search_retry = search;
        self.page_retry = page;
        self.delete_retry = delete;
        self
    }

    pub fn build(self) -> Result<RunController> {
        let missing = |what: &str| DedupError::Config(format!("{what} required"));

        Ok(RunController {
            cache: self.cache.ok_or_else(|| missing("a cache"))?,
            source: self.source.ok_or_else(|| missing("a scrobble source"))?,
            deleter: self.deleter.ok_or_else(|| missing("a scrobble deleter"))?,
            metadata: self.metadata.ok_or_else(|| missing("a metadata provider"))?,
            fallback: self.fallback.ok_or_else(|| missing("a fallback duration lookup"))?,
            notifier: self.notifier,
            search_retry: self.search_retry,
            page_retry: self.page_retry,
            delete_retry: self.delete_retry,
            config: self.config,
        })
    }
}
