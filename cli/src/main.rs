use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use scrobble_dedup::{
    config::parse_day, CacheKind, DedupError, RunConfig, RunController, Thresholds,
};
use shared::DateRange;
use std::{path::PathBuf, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scrobble-dedup")]
#[command(about = "Finds and removes duplicate or incomplete Last.fm scrobbles")]
#[command(version)]
struct Args {
    /// Last.fm username
    #[arg(long, env = "LASTFM_USERNAME")]
    username: String,

    /// Last.fm password, needed to delete scrobbles
    #[arg(long, env = "LASTFM_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Delete the selected scrobbles instead of only reporting them
    #[arg(long)]
    delete: bool,

    /// Library page to start from, counting from the newest
    #[arg(long, conflicts_with_all = ["from", "to"])]
    start_page: Option<u32>,

    /// First day to scan (DD-MM-YYYY)
    #[arg(long, value_parser = parse_day)]
    from: Option<NaiveDate>,

    /// Last day to scan (DD-MM-YYYY)
    #[arg(long, value_parser = parse_day)]
    to: Option<NaiveDate>,

    /// Duration cache backend: inmemory, file or redis
    #[arg(long, default_value = "file")]
    cache_type: CacheKind,

    /// Redis connection URL, e.g. redis://localhost:6379
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// How often the file cache is rewritten to disk
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    cache_compaction_interval: Duration,

    /// Log filter, e.g. "info" or "scrobble_dedup=debug". RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Same-track replays below this percentage of the track are duplicates
    #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u8).range(0..=100))]
    duplicate_threshold: u8,

    /// Plays below this percentage of the track are incomplete (0 disables)
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
    complete_threshold: u8,

    /// Directory holding the cache, track durations and CSV exports
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Telegram bot token for run reports
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true, requires = "telegram_chat_id")]
    telegram_bot_token: Option<String>,

    /// Telegram chat receiving run reports
    #[arg(long, env = "TELEGRAM_CHAT_ID", requires = "telegram_bot_token")]
    telegram_chat_id: Option<String>,
}

impl Args {
    fn into_config(self) -> RunConfig {
        RunConfig {
            password: self.password,
            can_delete: self.delete,
            start_page: self.start_page,
            range: DateRange {
                from: self.from,
                to: self.to,
            },
            cache_kind: self.cache_type,
            redis_url: self.redis_url,
            thresholds: Thresholds {
                duplicate: self.duplicate_threshold,
                complete: self.complete_threshold,
            },
            data_dir: self.data_dir,
            telegram_bot_token: self.telegram_bot_token,
            telegram_chat_id: self.telegram_chat_id,
            compaction_interval: self.cache_compaction_interval,
            ..RunConfig::new(self.username)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&args.log_level)
            .with_context(|| format!("invalid log level: {}", args.log_level))?,
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .init();

    let config = args.into_config();
    config.validate()?;
    info!(
        username = %config.username,
        delete = config.can_delete,
        cache = ?config.cache_kind,
        "Starting scrobble-dedup"
    );

    let controller = RunController::connect(config)
        .await
        .context("failed to set up run")?;

    match controller.execute(tokio::signal::ctrl_c()).await {
        Ok(report) => {
            if let Some(file) = report.export_file {
                info!(file = %file.display(), "Run finished");
            }
            Ok(())
        }
        Err(DedupError::NoScrobbles) => {
            info!("Nothing to do, no scrobbles in the selected period");
            Ok(())
        }
        Err(DedupError::Interrupted) => {
            info!("Run interrupted, progress saved");
            std::process::exit(130);
        }
        Err(e) => Err(e.into()),
    }
}
