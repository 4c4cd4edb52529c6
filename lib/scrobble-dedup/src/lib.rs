pub mod cache;
pub mod classifier;
pub mod config;
pub mod durations;
pub mod error;
pub mod export;
pub mod lastfm;
pub mod musicbrainz;
pub mod notify;
pub mod resolver;
pub mod retry;
pub mod run;
pub mod stats;
pub mod traits;
pub mod walker;

pub use config::{CacheKind, RunConfig, Thresholds};
pub use error::{DedupError, Result};
pub use run::{RunController, RunControllerBuilder, RunReport, RunState};
pub use traits::{DurationLookup, MetadataProvider, Notifier, ScrobbleDeleter, ScrobbleSource};
