//! HTML extraction for Last.fm library and track pages.

use scraper::{ElementRef, Html, Selector};
use shared::RawScrobble;
use std::{sync::OnceLock, time::Duration};
use tracing::{debug, warn};
use url::Url;

use crate::durations::parse_clock;

struct Selectors {
    row: Selector,
    artist: Selector,
    track: Selector,
    timestamp: Selector,
    link: Selector,
    no_data: Selector,
    pagination: Selector,
    csrf: Selector,
    metadata_heading: Selector,
}

fn selectors() -> &'static Selectors {
    static SELECTORS: OnceLock<Selectors> = OnceLock::new();
    SELECTORS.get_or_init(|| {
        let parse = |css: &str| Selector::parse(css).unwrap_or_else(|e| panic!("bad selector {css}: {e}"));
        Selectors {
            row: parse("tr.chartlist-row"),
            artist: parse("input[name='artist_name']"),
            track: parse("input[name='track_name']"),
            timestamp: parse("input[name='timestamp']"),
            link: parse("td.chartlist-name a"),
            no_data: parse("p.no-data-message"),
            pagination: parse(".pagination-page"),
            csrf: parse("input[name='csrfmiddlewaretoken']"),
            metadata_heading: parse(".catalogue-metadata-heading"),
        }
    })
}

fn input_value(row: &ElementRef, selector: &Selector) -> Option<String> {
    row.select(selector)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(|value| value.trim().to_string())
}

fn element_text(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Parses one chartlist row; `None` when a required field is missing.
fn parse_row(row: &ElementRef, base_url: &Url) -> Option<RawScrobble> {
    let s = selectors();
    let artist = input_value(row, &s.artist)?;
    let track = input_value(row, &s.track)?;
    let timestamp_raw = input_value(row, &s.timestamp)?;
    let url = row
        .select(&s.link)
        .next()
        .and_then(|link| link.value().attr("href"))
        .and_then(|href| base_url.join(href.trim()).ok())
        .map(String::from);

    Some(RawScrobble {
        artist,
        track,
        timestamp_raw,
        url,
    })
}

/// Library rows in page order (newest first). Broken rows are skipped.
pub fn parse_library_rows(html: &str, base_url: &Url) -> Vec<RawScrobble> {
    let document = Html::parse_document(html);
    let mut rows = Vec::new();
    for row in document.select(&selectors().row) {
        match parse_row(&row, base_url) {
            Some(scrobble) => rows.push(scrobble),
            None => warn!("Skipping library row without artist, track or timestamp"),
        }
    }
    debug!(count = rows.len(), "parsed library rows");
    rows
}

/// Total number of library pages shown on a library page.
pub fn parse_page_count(html: &str) -> u32 {
    let document = Html::parse_document(html);
    let s = selectors();

    if document.select(&s.no_data).next().is_some() {
        return 0;
    }

    let last_page = document
        .select(&s.pagination)
        .filter_map(|page| {
            element_text(&page)
                .split_whitespace()
                .next()
                .and_then(|n| n.replace(',', "").parse::<u32>().ok())
        })
        .max();

    match last_page {
        Some(pages) => pages,
        None if document.select(&s.row).next().is_some() => 1,
        None => 0,
    }
}

pub fn parse_csrf_token(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let token = document
        .select(&selectors().csrf)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(str::to_string);
    token
}

/// The "Length" entry of a track page's catalogue metadata.
pub fn parse_track_length(html: &str) -> Option<Duration> {
    let document = Html::parse_document(html);
    let heading = document
        .select(&selectors().metadata_heading)
        .find(|heading| element_text(heading) == "Length")?;

    let value = heading
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .next()
        .map(|element| element_text(&element))?;

    match parse_clock(&value) {
        Ok(duration) => Some(duration),
        Err(e) => {
            warn!(value = %value, error = %e, "Unreadable track length");
            None
        }
    }
}
