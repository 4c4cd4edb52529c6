//! Duration strings and the user-editable track durations file.

use shared::TrackDurations;
use std::{path::Path, time::Duration};
use tracing::{info, warn};

use crate::error::{DedupError, Result};

pub const TRACK_DURATIONS_FILE: &str = "track-durations.toml";

const TRACK_DURATIONS_HEADER: &str = "\
# Tracks for which no duration could be found on MusicBrainz or Last.fm.
# Scrobbles of a track with an unknown duration are never deleted.
# Fill in each duration (examples: \"4m3s\", \"4m 3s\", \"4:03\") and run again.
# Entries also override the looked-up duration of a track; artist and track
# names must match the scrobble exactly.

";

/// Parses `4m3s`, `4m 3s`, `1h2m`, `4:03` or `1:02:03`.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    if value.contains(':') {
        return parse_clock(value);
    }
    humantime::parse_duration(value).map_err(|e| DedupError::Parse {
        what: "duration",
        message: format!("{value:?}: {e}"),
    })
}

/// Parses `m:ss` or `h:mm:ss` as shown on track pages.
pub fn parse_clock(value: &str) -> Result<Duration> {
    let invalid = || DedupError::Parse {
        what: "clock duration",
        message: format!("{value:?}"),
    };

    let parts = value
        .trim()
        .split(':')
        .map(|part| part.trim().parse::<u64>().map_err(|_| invalid()))
        .collect::<Result<Vec<_>>>()?;

    let seconds = match parts.as_slice() {
        [minutes, seconds] => minutes.checked_mul(60).and_then(|m| m.checked_add(*seconds)),
        [hours, minutes, seconds] => hours
            .checked_mul(3600)
            .and_then(|h| minutes.checked_mul(60).and_then(|m| h.checked_add(m)))
            .and_then(|hm| hm.checked_add(*seconds)),
        _ => return Err(invalid()),
    };
    seconds.map(Duration::from_secs).ok_or_else(invalid)
}

pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

/// What a cache value says about a track's duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedDuration {
    Known(Duration),
    /// Looked up earlier without success.
    NotFound,
}

/// Interprets a cache value. Plain integers are legacy millisecond values;
/// anything negative or zero is a negative entry.
pub fn parse_cached(value: &str) -> Result<CachedDuration> {
    let value = value.trim();
    if value.starts_with('-') {
        return Ok(CachedDuration::NotFound);
    }

    let duration = match value.parse::<u64>() {
        Ok(millis) => Duration::from_millis(millis),
        Err(_) => parse_duration(value)?,
    };

    if duration.is_zero() {
        Ok(CachedDuration::NotFound)
    } else {
        Ok(CachedDuration::Known(duration))
    }
}

/// Loads the durations file from `data_dir`. A missing file is an empty map.
pub async fn load_track_durations(data_dir: &Path) -> Result<TrackDurations> {
    let path = data_dir.join(TRACK_DURATIONS_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) if contents.trim().is_empty() => Ok(TrackDurations::new()),
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TrackDurations::new()),
        Err(e) => Err(e.into()),
    }
}

pub fn render_track_durations(durations: &TrackDurations) -> Result<String> {
    let body = toml::to_string(durations)?;
    Ok(format!("{TRACK_DURATIONS_HEADER}{body}"))
}

/// Writes the unknown tracks back to the durations file, keeping every entry
/// already present there (its values win over the new empty ones).
pub async fn save_unknown_track_durations(data_dir: &Path, unknown: &TrackDurations) -> Result<()> {
    let existing = load_track_durations(data_dir).await?;
    let mut merged = unknown.clone();
    merged.overlay(&existing);

    let contents = render_track_durations(&merged)?;
    let path = data_dir.join(TRACK_DURATIONS_FILE);

    match tokio::fs::write(&path, &contents).await {
        Ok(()) => {
            info!(file = %path.display(), tracks = unknown.len(), "Unknown track durations saved");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            warn!(file = %path.display(), error = %e, "Cannot write track durations file");
            info!(
                "Save the following in a file named \"{}\" in the data directory and fill in the durations",
                TRACK_DURATIONS_FILE
            );
            println!("\n{contents}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
