//! Decides whether two adjacent scrobbles are a duplicate or an early cut.

use shared::Scrobble;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Thresholds;

/// Outcome of comparing a scrobble with the one right before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Unrelated,
    /// Same track started again too early: `previous` is removed.
    Duplicate,
    /// The next play began before `current` could finish: `current` is removed.
    Incomplete,
}

impl Verdict {
    pub fn removes_previous(self) -> bool {
        self == Verdict::Duplicate
    }

    pub fn removes_current(self) -> bool {
        self == Verdict::Incomplete
    }
}

/// `min(100, 100 * elapsed / duration)`. A zero duration counts as complete.
pub fn completion_percent(elapsed: chrono::Duration, duration: Duration) -> f64 {
    if duration.is_zero() {
        return 100.0;
    }
    let elapsed_secs = elapsed.num_milliseconds() as f64 / 1000.0;
    (100.0 * elapsed_secs / duration.as_secs_f64()).min(100.0)
}

fn current_completion(previous: &Scrobble, current: &Scrobble) -> f64 {
    let elapsed = current.timestamp - previous.timestamp;
    completion_percent(elapsed, current.track_duration.unwrap_or_default())
}

pub fn is_duplicate(previous: &Scrobble, current: &Scrobble, duplicate_threshold: u8) -> bool {
    if !current.same_track(previous) || current.timestamp == previous.timestamp {
        return false;
    }
    let completion = current_completion(previous, current);
    let duplicate = completion < f64::from(duplicate_threshold);
    debug!(
        previous = %previous.timestamp,
        current = %current.timestamp,
        duration = ?current.track_duration,
        completion,
        duplicate_threshold,
        duplicate,
        "duplicate check"
    );
    duplicate
}

pub fn is_incomplete(previous: &Scrobble, current: &Scrobble, complete_threshold: u8) -> bool {
    if complete_threshold == 0 {
        return false;
    }
    let completion = current_completion(previous, current);
    let incomplete = completion < f64::from(complete_threshold);
    debug!(
        previous = %previous.timestamp,
        current = %current.timestamp,
        duration = ?current.track_duration,
        completion,
        complete_threshold,
        incomplete,
        "incomplete check"
    );
    incomplete
}

/// Classifies `current` against the chronologically preceding `previous`.
/// Duplicate detection wins over incomplete detection.
pub fn classify(previous: &Scrobble, current: &Scrobble, thresholds: Thresholds) -> Verdict {
    if is_duplicate(previous, current, thresholds.duplicate) {
        info!(
            artist = %current.artist,
            track = %current.track,
            removed = %previous.timestamp.to_rfc2822(),
            "🎯 Duplicate scrobble detected"
        );
        return Verdict::Duplicate;
    }
    if is_incomplete(previous, current, thresholds.complete) {
        info!(
            artist = %current.artist,
            track = %current.track,
            previous = %previous.timestamp,
            removed = %current.timestamp,
            "⏳ Incomplete scrobble detected"
        );
        return Verdict::Incomplete;
    }
    Verdict::Unrelated
}
