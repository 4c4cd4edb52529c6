pub mod durations;
pub mod scrobble;

pub use durations::TrackDurations;
pub use scrobble::{DateRange, DurationCandidate, RawScrobble, Scrobble, ScrobbleParseError};
