use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("MusicBrainz error: {0}")]
    MusicBrainz(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("{operation} timed out after {}s", .timeout.as_secs())]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse {what}: {message}")]
    Parse { what: &'static str, message: String },

    #[error("CSRF token not found on page")]
    CsrfNotFound,

    #[error("login failed: {0}")]
    Login(String),

    #[error("no scrobble with timestamp {0} on the loaded pages")]
    ScrobbleNotFound(String),

    #[error("no scrobbles found for the selected period")]
    NoScrobbles,

    #[error("run interrupted")]
    Interrupted,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to read track durations: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("failed to write track durations: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl DedupError {
    /// Whether a retry loop should try the operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            DedupError::Timeout { .. } => true,
            DedupError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e
                        .status()
                        .is_some_and(|s| s.is_server_error() || s.as_u16() == 429)
            }
            DedupError::Api { status, .. } => *status >= 500 || *status == 429,
            DedupError::MusicBrainz(message) => is_transient_message(message),
            // A stale token is dropped on 403, so the next attempt fetches a new one.
            DedupError::Cache(_) | DedupError::CsrfNotFound => true,
            _ => false,
        }
    }
}

/// MusicBrainz errors only surface as text, so sniff the usual transient markers.
fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();

    let client_error = ["400", "401", "403", "404", "bad request", "not found", "unauthorized"]
        .iter()
        .any(|marker| lower.contains(marker));
    if client_error && !lower.contains("429") {
        return false;
    }

    true
}

pub type Result<T> = std::result::Result<T, DedupError>;
