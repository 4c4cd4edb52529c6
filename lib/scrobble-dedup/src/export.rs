use chrono::{DateTime, Local, SecondsFormat};
use shared::Scrobble;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::Result;

pub const EXPORT_FILE_PREFIX: &str = "deleted-scrobbles";
const HEADER: [&str; 4] = ["Artist", "Track", "Timestamp", "TimestampString"];

/// Writes the rows (sorted by timestamp) as CSV to any writer.
pub fn write_csv<W: std::io::Write>(writer: W, scrobbles: &[Scrobble]) -> Result<()> {
    let mut sorted: Vec<&Scrobble> = scrobbles.iter().collect();
    sorted.sort_by_key(|s| s.timestamp);

    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(HEADER)?;
    for s in sorted {
        let timestamp = s.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
        csv.write_record([
            s.artist.as_str(),
            s.track.as_str(),
            timestamp.as_str(),
            s.timestamp_raw.as_str(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

pub fn export_file_name(started_at: DateTime<Local>) -> String {
    format!("{EXPORT_FILE_PREFIX}-{}.csv", started_at.format("%Y%m%d-%H%M%S"))
}

/// Saves the selected scrobbles in `data_dir`. When the file cannot be
/// written the CSV goes to stdout instead, so nothing is lost.
pub fn export_scrobbles(
    data_dir: &Path,
    started_at: DateTime<Local>,
    scrobbles: &[Scrobble],
    can_delete: bool,
) -> Option<PathBuf> {
    let path = data_dir.join(export_file_name(started_at));

    let written = std::fs::File::create(&path)
        .map_err(Into::into)
        .and_then(|file| write_csv(file, scrobbles));

    match written {
        Ok(()) => {
            if can_delete {
                info!(file = %path.display(), "Deleted scrobbles saved to file");
            } else {
                info!(file = %path.display(), "Would-be deleted scrobbles saved to file");
            }
            Some(path)
        }
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Could not write scrobble file, printing CSV instead");
            let mut buffer = Vec::new();
            if write_csv(&mut buffer, scrobbles).is_ok() {
                println!("Scrobbles CSV:\n{}", String::from_utf8_lossy(&buffer));
            }
            None
        }
    }
}
