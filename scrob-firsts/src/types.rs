//! Core types for the retrieval pipeline
//!
//! Request parameters, page payloads, normalized event records, the
//! aggregate entry and the error taxonomy shared by fetcher, scheduler
//! and driver.

use crate::lastfm::types::TrackEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One scrobble after normalization
///
/// `key` is the grouping identity (artist). Text fields are never empty;
/// missing values become `"Unknown"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub key: String,
    pub label: String,
    pub group: String,
    /// Unix time, seconds, UTC
    pub timestamp: i64,
}

/// Fixed query parameters for every page of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunQuery {
    pub username: String,
    /// Records per page (`limit`)
    pub page_size: u32,
    /// Server-side lower bound (`from`), Unix seconds
    pub from: Option<i64>,
}

impl RunQuery {
    pub fn new(username: impl Into<String>, page_size: u32) -> Self {
        Self {
            username: username.into(),
            page_size,
            from: None,
        }
    }

    pub fn with_from(mut self, from: Option<i64>) -> Self {
        self.from = from;
        self
    }
}

/// What a single successful HTTP exchange produced
#[derive(Debug, Clone)]
pub enum PageOutcome {
    /// Well-formed page
    Tracks {
        entries: Vec<TrackEntry>,
        total_pages: Option<u32>,
    },
    /// Well-formed JSON without the `recenttracks` section
    MissingSection,
}

/// A successfully fetched page
///
/// Pages are created once by the fetcher and only read afterwards.
#[derive(Debug, Clone)]
pub struct PagePayload {
    /// 1-based page number
    pub page: u32,
    /// Raw entries in page order (not yet filtered)
    pub entries: Vec<TrackEntry>,
    /// Size of the result set, as reported with this page
    pub total_pages: Option<u32>,
    /// The page degraded to empty because the expected section was absent
    pub degraded: bool,
    /// HTTP attempts spent on this page
    pub attempts: u32,
}

impl PagePayload {
    pub(crate) fn from_outcome(page: u32, outcome: PageOutcome, attempts: u32) -> Self {
        match outcome {
            PageOutcome::Tracks {
                entries,
                total_pages,
            } => Self {
                page,
                entries,
                total_pages,
                degraded: false,
                attempts,
            },
            PageOutcome::MissingSection => Self {
                page,
                entries: Vec::new(),
                total_pages: None,
                degraded: true,
                attempts,
            },
        }
    }
}

/// Earliest scrobble seen for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateEntry {
    pub timestamp: i64,
    pub label: String,
    pub group: String,
}

/// One paginated read endpoint
///
/// Implemented by `LastFmClient`; tests substitute scripted sources.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Issue exactly one request for `page`
    async fn fetch_page(&self, query: &RunQuery, page: u32) -> Result<PageOutcome, FetchError>;
}

/// Failure of a single fetch attempt (always retryable)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Transport failure (connect, timeout, body read)
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx HTTP status
    #[error("API returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Body was not the JSON shape expected
    #[error("Parse error: {0}")]
    Parse(String),

    /// API-reported error payload
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },
}

/// Run-level failure; no aggregate is produced
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Page 1 could not be fetched or did not report the result set size
    #[error("Cannot determine result set size: {reason}")]
    DiscoveryFailed {
        reason: String,
        #[source]
        source: Option<FetchError>,
    },

    /// One page failed after its retry budget was spent
    #[error("Page {page} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        page: u32,
        attempts: u32,
        #[source]
        source: FetchError,
    },

    /// Registration lookup failed
    #[error("Registration lookup failed: {0}")]
    Registration(#[source] FetchError),

    /// Invalid run configuration
    #[error(transparent)]
    Config(#[from] scrob_common::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
