//! Local stand-in for the Last.fm `2.0/` endpoint
//!
//! Serves scripted `user.getRecentTracks` pages and `user.getInfo` from an
//! axum router bound to an ephemeral port.

#![allow(dead_code)]

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use scrob_common::config::FetchSettings;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockInner {
    pages: HashMap<u32, Value>,
    /// Remaining HTTP 500 answers before the page is served
    failures: HashMap<u32, u32>,
    /// Fixed raw answers (status, body), served after any failures
    raw: HashMap<u32, (u16, String)>,
    registered: Option<i64>,
    requests: Vec<HashMap<String, String>>,
}

#[derive(Clone, Default)]
pub struct MockLastFm {
    inner: Arc<Mutex<MockInner>>,
}

/// `(artist, track, album, uts)`
pub type Scrobble<'a> = (&'a str, &'a str, &'a str, i64);

pub fn track_json((artist, track, album, uts): Scrobble<'_>) -> Value {
    json!({
        "artist": {"mbid": "", "#text": artist},
        "name": track,
        "album": {"mbid": "", "#text": album},
        "date": {"uts": uts.to_string(), "#text": "ignored"}
    })
}

pub fn page_json(page: u32, total_pages: u32, tracks: Vec<Value>) -> Value {
    json!({
        "recenttracks": {
            "track": tracks,
            "@attr": {
                "user": "rj",
                "page": page.to_string(),
                "perPage": "2",
                "totalPages": total_pages.to_string(),
                "total": (total_pages * 2).to_string()
            }
        }
    })
}

impl MockLastFm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, page: u32, body: Value) -> Self {
        self.inner.lock().unwrap().pages.insert(page, body);
        self
    }

    pub fn scrobbles(self, page: u32, total_pages: u32, scrobbles: &[Scrobble<'_>]) -> Self {
        let tracks = scrobbles.iter().copied().map(track_json).collect();
        self.page(page, page_json(page, total_pages, tracks))
    }

    pub fn fail_times(self, page: u32, times: u32) -> Self {
        self.inner.lock().unwrap().failures.insert(page, times);
        self
    }

    pub fn raw(self, page: u32, status: u16, body: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .raw
            .insert(page, (status, body.to_string()));
        self
    }

    pub fn registered(self, unixtime: i64) -> Self {
        self.inner.lock().unwrap().registered = Some(unixtime);
        self
    }

    /// Number of `user.getRecentTracks` requests for `page`
    pub fn requests_for(&self, page: u32) -> usize {
        let page = page.to_string();
        self.inner
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| {
                r.get("method").map(String::as_str) == Some("user.getRecentTracks")
                    && r.get("page") == Some(&page)
            })
            .count()
    }

    pub fn requests(&self) -> Vec<HashMap<String, String>> {
        self.inner.lock().unwrap().requests.clone()
    }

    /// Bind to an ephemeral port and serve; returns the base URL
    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/2.0/", get(handle))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/2.0/", addr)
    }
}

async fn handle(
    State(mock): State<MockLastFm>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut inner = mock.inner.lock().unwrap();
    inner.requests.push(params.clone());

    match params.get("method").map(String::as_str) {
        Some("user.getInfo") => match inner.registered {
            Some(ts) => Json(json!({
                "user": {"name": "rj", "registered": {"unixtime": ts.to_string(), "#text": ts}}
            }))
            .into_response(),
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({"error": 6, "message": "User not found"})),
            )
                .into_response(),
        },
        Some("user.getRecentTracks") => {
            let page: u32 = params
                .get("page")
                .and_then(|p| p.parse().ok())
                .unwrap_or(1);

            if let Some(remaining) = inner.failures.get_mut(&page) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return (StatusCode::INTERNAL_SERVER_ERROR, "upstream hiccup").into_response();
                }
            }

            if let Some((status, body)) = inner.raw.get(&page) {
                let status = StatusCode::from_u16(*status).unwrap();
                return (status, body.clone()).into_response();
            }

            match inner.pages.get(&page) {
                Some(body) => Json(body.clone()).into_response(),
                None => Json(page_json(page, 0, Vec::new())).into_response(),
            }
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": 3, "message": "Invalid Method"})),
        )
            .into_response(),
    }
}

/// Settings with every delay removed
pub fn fast_settings() -> FetchSettings {
    FetchSettings {
        page_size: 2,
        max_retries: 3,
        rate_limit_delay_ms: 0,
        retry_backoff_unit_ms: 0,
        batch_size: 2,
        batch_delay_ms: 0,
        request_timeout_secs: 5,
        ..Default::default()
    }
}
