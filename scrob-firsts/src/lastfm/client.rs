//! Last.fm API client
//!
//! Thin HTTP layer: one call = one request. Retry, delays and batching
//! live in the fetcher and scheduler.
//!
//! API Documentation: https://www.last.fm/api/show/user.getRecentTracks

use super::types::{RecentTracksResponse, UserInfoResponse};
use crate::types::{FetchError, PageOutcome, PageSource, RunQuery};
use async_trait::async_trait;
use reqwest::Client;
use scrob_common::config::{get_user_agent, FetchSettings};
use std::time::Duration;
use tracing::{debug, warn};

const LASTFM_API_URL: &str = "https://ws.audioscrobbler.com/2.0/";

/// Connection timeout, independent of the configured total timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Last.fm API client
///
/// The underlying `reqwest::Client` pools connections and is shared by
/// every concurrent request of a run.
#[derive(Debug, Clone)]
pub struct LastFmClient {
    http_client: Client,
    base_url: String,
    api_key: String,
}

impl LastFmClient {
    /// Create a client with the configured request timeout
    pub fn new(api_key: String, settings: &FetchSettings) -> Result<Self, FetchError> {
        let http_client = Client::builder()
            .user_agent(get_user_agent())
            .timeout(settings.request_timeout())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: LASTFM_API_URL.to_string(),
            api_key,
        })
    }

    /// Point the client at another endpoint (local mock servers in tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Query parameters for one `user.getRecentTracks` page
    fn recent_tracks_params(&self, query: &RunQuery, page: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("method", "user.getRecentTracks".to_string()),
            ("user", query.username.clone()),
            ("api_key", self.api_key.clone()),
            ("format", "json".to_string()),
            ("limit", query.page_size.to_string()),
            ("page", page.to_string()),
        ];
        if let Some(from) = query.from {
            params.push(("from", from.to_string()));
        }
        params
    }

    /// Fetch one page of scrobbles
    ///
    /// # Classification
    /// - non-2xx → `FetchError::HttpStatus`
    /// - body is not JSON → `FetchError::Parse`
    /// - body carries a non-null `error` of any shape → `FetchError::Api`
    /// - JSON without `recenttracks` → `PageOutcome::MissingSection`
    pub async fn recent_tracks(
        &self,
        query: &RunQuery,
        page: u32,
    ) -> Result<PageOutcome, FetchError> {
        debug!(user = %query.username, page, "Requesting recent tracks");

        let response = self
            .http_client
            .get(&self.base_url)
            .query(&self.recent_tracks_params(query, page))
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: RecentTracksResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::Parse(format!("Invalid recent tracks payload: {}", e)))?;

        if let Some((code, message)) = parsed.api_error() {
            return Err(FetchError::Api { code, message });
        }

        let Some(section) = parsed.recenttracks else {
            warn!(page, "Unexpected response format: no recenttracks section");
            return Ok(PageOutcome::MissingSection);
        };

        let total_pages = section
            .attr
            .total_pages
            .and_then(|n| u32::try_from(n).ok());
        let entries = section.entries();

        debug!(
            page,
            entries = entries.len(),
            total_pages = ?total_pages,
            "Recent tracks page received"
        );

        Ok(PageOutcome::Tracks {
            entries,
            total_pages,
        })
    }

    /// Registration time of `username` (Unix seconds) via `user.getInfo`
    pub async fn registration_timestamp(&self, username: &str) -> Result<i64, FetchError> {
        let response = self
            .http_client
            .get(&self.base_url)
            .query(&[
                ("method", "user.getInfo"),
                ("user", username),
                ("api_key", self.api_key.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: UserInfoResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::Parse(format!("Invalid user info payload: {}", e)))?;

        if let Some((code, message)) = parsed.api_error() {
            return Err(FetchError::Api { code, message });
        }

        let unixtime = parsed
            .user
            .and_then(|u| u.registered)
            .and_then(|r| r.unixtime)
            .ok_or_else(|| FetchError::Parse("user.registered.unixtime missing".to_string()))?;

        debug!(user = %username, registered = unixtime, "Registration timestamp received");
        Ok(unixtime)
    }
}

#[async_trait]
impl PageSource for LastFmClient {
    async fn fetch_page(&self, query: &RunQuery, page: u32) -> Result<PageOutcome, FetchError> {
        self.recent_tracks(query, page).await
    }
}
