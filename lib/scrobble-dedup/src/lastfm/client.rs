use async_trait::async_trait;
use reqwest::{header, Client, Response};
use shared::{DateRange, RawScrobble};
use std::{collections::VecDeque, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::parsing::{parse_csrf_token, parse_library_rows, parse_page_count, parse_track_length};
use crate::{
    error::{DedupError, Result},
    traits::{DurationLookup, ScrobbleDeleter, ScrobbleSource},
};

pub const LASTFM_BASE_URL: &str = "https://www.last.fm";

const USER_AGENT: &str = concat!("scrobble-dedup/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Deletions address rows of the current or the previously walked page.
const RETAINED_PAGES: usize = 2;

/// Scrapes a user's library on the Last.fm website.
pub struct LastFmClient {
    client: Client,
    base_url: Url,
    username: String,
    recent_pages: Mutex<VecDeque<Vec<RawScrobble>>>,
    csrf_token: Mutex<Option<String>>,
}

impl LastFmClient {
    pub fn new(username: &str) -> Result<Self> {
        Self::with_base_url(LASTFM_BASE_URL, username)
    }

    pub fn with_base_url(base_url: &str, username: &str) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            username: username.to_string(),
            recent_pages: Mutex::new(VecDeque::with_capacity(RETAINED_PAGES)),
            csrf_token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn library_url(&self, page: Option<u32>, range: &DateRange) -> Result<Url> {
        let mut url = self.url(&format!("/user/{}/library", self.username))?;
        let mut pairs = range.query_pairs();
        if let Some(page) = page {
            pairs.push(("page", page.to_string()));
        }
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }

    /// Signs in with the site's login form. The session lives in the cookie store.
    #[instrument(skip(self, password), fields(username = %self.username))]
    pub async fn login(&self, password: &str) -> Result<()> {
        let login_url = self.url("/login")?;
        let page = self.get_html(login_url.clone()).await?;
        let token = parse_csrf_token(&page).ok_or(DedupError::CsrfNotFound)?;

        let next = format!("/user/{}", self.username);
        let form = [
            ("csrfmiddlewaretoken", token.as_str()),
            ("username_or_email", self.username.as_str()),
            ("password", password),
            ("next", next.as_str()),
        ];

        let response = self
            .client
            .post(login_url.clone())
            .header(header::REFERER, login_url.as_str())
            .form(&form)
            .send()
            .await?;
        let response = check_status(response).await?;

        if response.url().path().starts_with("/login") {
            return Err(DedupError::Login(
                "still on the login page, check username and password".to_string(),
            ));
        }

        info!("Logged in to Last.fm");
        Ok(())
    }

    async fn get_html(&self, url: Url) -> Result<String> {
        debug!(%url, "GET");
        let response = self.client.get(url).send().await?;
        let response = check_status(response).await?;
        Ok(response.text().await?)
    }

    async fn fresh_csrf_token(&self) -> Result<String> {
        if let Some(token) = self.csrf_token.lock().await.clone() {
            return Ok(token);
        }
        let page = self
            .get_html(self.library_url(None, &DateRange::default())?)
            .await?;
        let token = parse_csrf_token(&page).ok_or(DedupError::CsrfNotFound)?;
        *self.csrf_token.lock().await = Some(token.clone());
        Ok(token)
    }

    async fn remember_page(&self, rows: Vec<RawScrobble>) {
        let mut pages = self.recent_pages.lock().await;
        if pages.len() == RETAINED_PAGES {
            pages.pop_front();
        }
        pages.push_back(rows);
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Could not read error body".to_string());
    Err(DedupError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Finds the row to delete among the retained pages.
///
/// Pages are walked backwards, so the most recent fetch sits above the
/// previous one on the site. Rows are searched in the site's order.
fn select_row<'a>(
    pages: &'a VecDeque<Vec<RawScrobble>>,
    timestamp_raw: &str,
    select_last: bool,
) -> Option<&'a RawScrobble> {
    let mut matches = pages
        .iter()
        .rev()
        .flatten()
        .filter(|row| row.timestamp_raw == timestamp_raw);

    if select_last {
        matches.last()
    } else {
        matches.next()
    }
}

#[async_trait]
impl ScrobbleSource for LastFmClient {
    fn name(&self) -> &'static str {
        "lastfm"
    }

    async fn page_count(&self, range: &DateRange) -> Result<u32> {
        let page = self.get_html(self.library_url(None, range)?).await?;
        if let Some(token) = parse_csrf_token(&page) {
            *self.csrf_token.lock().await = Some(token);
        }
        Ok(parse_page_count(&page))
    }

    async fn fetch_page(&self, page: u32, range: &DateRange) -> Result<Vec<RawScrobble>> {
        let html = self.get_html(self.library_url(Some(page), range)?).await?;
        if let Some(token) = parse_csrf_token(&html) {
            *self.csrf_token.lock().await = Some(token);
        }

        let rows = parse_library_rows(&html, &self.base_url);
        self.remember_page(rows.clone()).await;
        Ok(rows)
    }
}

#[async_trait]
impl ScrobbleDeleter for LastFmClient {
    #[instrument(skip(self))]
    async fn delete_by_timestamp(&self, timestamp_raw: &str, select_last: bool) -> Result<()> {
        let row = {
            let pages = self.recent_pages.lock().await;
            select_row(&pages, timestamp_raw, select_last)
                .cloned()
                .ok_or_else(|| DedupError::ScrobbleNotFound(timestamp_raw.to_string()))?
        };

        let token = self.fresh_csrf_token().await?;
        let delete_url = self.url(&format!("/user/{}/library/delete", self.username))?;
        let referer = self.url(&format!("/user/{}", self.username))?;
        let form = [
            ("csrfmiddlewaretoken", token.as_str()),
            ("artist_name", row.artist.as_str()),
            ("track_name", row.track.as_str()),
            ("timestamp", row.timestamp_raw.as_str()),
            ("ajax", "1"),
        ];

        let response = self
            .client
            .post(delete_url)
            .header(header::REFERER, referer.as_str())
            .header("X-Requested-With", "XMLHttpRequest")
            .form(&form)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::FORBIDDEN {
            // Stale token; the next attempt fetches a new one.
            *self.csrf_token.lock().await = None;
            warn!("Delete rejected, refreshing CSRF token");
            return Err(DedupError::CsrfNotFound);
        }
        check_status(response).await?;

        debug!(artist = %row.artist, track = %row.track, "Deleted scrobble");
        Ok(())
    }
}

#[async_trait]
impl DurationLookup for LastFmClient {
    fn name(&self) -> &'static str {
        "lastfm track page"
    }

    async fn duration_by_url(&self, url: &str) -> Result<Option<Duration>> {
        let html = self.get_html(Url::parse(url)?).await?;
        Ok(parse_track_length(&html))
    }
}
