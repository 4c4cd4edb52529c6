//! Last.fm website client: library pages, deletion and track pages.

mod client;
mod parsing;

pub use client::{LastFmClient, LASTFM_BASE_URL};
pub use parsing::{parse_csrf_token, parse_library_rows, parse_page_count, parse_track_length};
