use std::time::Duration;
use tracing::info;

/// Counters for one run. Each field is only bumped by the component that
/// observed the event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub processed_scrobbles: u64,
    pub unknown_track_durations: u64,
    pub skipped_unknown_duration: u64,
    pub delete_failures: u64,
    pub elapsed: Duration,
}

impl RunStats {
    /// Human readable summary, one statistic per line.
    pub fn summary_lines(&self, can_delete: bool, selected: usize) -> Vec<String> {
        let selected_line = if can_delete {
            format!("Scrobbles deleted: {selected}")
        } else {
            format!("Scrobbles that would be deleted: {selected}")
        };

        vec![
            "Run statistics:".to_string(),
            selected_line,
            format!("Duration cache hits: {}", self.cache_hits),
            format!("Duration cache misses: {}", self.cache_misses),
            format!("Scrobbles processed: {}", self.processed_scrobbles),
            format!("Unknown duration track count: {}", self.unknown_track_durations),
            format!(
                "Scrobbles skipped due to unknown track duration: {}",
                self.skipped_unknown_duration
            ),
            format!("Scrobbles not deleted due to error: {}", self.delete_failures),
            format!("Elapsed time: {}", humantime::format_duration(truncate_millis(self.elapsed))),
        ]
    }

    pub fn log(&self, can_delete: bool, selected: usize) {
        for line in self.summary_lines(can_delete, selected) {
            info!("{}", line);
        }
    }
}

fn truncate_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
