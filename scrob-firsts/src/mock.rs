//! Scripted page source for unit tests

use crate::lastfm::types::TrackEntry;
use crate::types::{FetchError, PageOutcome, PageSource, RunQuery};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Response = Result<PageOutcome, FetchError>;

/// Scrobble entry with track/album derived from the artist
pub fn entry(artist: &str, uts: i64) -> TrackEntry {
    full_entry(artist, &format!("{} track", artist), &format!("{} album", artist), uts)
}

pub fn full_entry(artist: &str, track: &str, album: &str, uts: i64) -> TrackEntry {
    serde_json::from_value(json!({
        "artist": {"mbid": "", "#text": artist},
        "name": track,
        "album": {"mbid": "", "#text": album},
        "date": {"uts": uts.to_string()}
    }))
    .unwrap()
}

/// Entry flagged as currently playing (no date)
pub fn now_playing(artist: &str) -> TrackEntry {
    serde_json::from_value(json!({
        "artist": {"#text": artist},
        "name": "Playing now",
        "album": {"#text": "Live"},
        "@attr": {"nowplaying": "true"}
    }))
    .unwrap()
}

pub fn tracks(entries: Vec<TrackEntry>, total_pages: Option<u32>) -> PageOutcome {
    PageOutcome::Tracks {
        entries,
        total_pages,
    }
}

/// Page source answering from per-page scripts
///
/// Each request for a page consumes the next scripted response; the last
/// response repeats once the script runs out. Unscripted pages answer
/// with an empty page.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<u32, Vec<Response>>>,
    latency: HashMap<u32, Duration>,
    calls: Mutex<Vec<u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, page: u32, entries: Vec<TrackEntry>, total_pages: Option<u32>) -> Self {
        self.with_script(page, vec![Ok(tracks(entries, total_pages))])
    }

    pub fn with_script(self, page: u32, script: Vec<Response>) -> Self {
        self.scripts.lock().unwrap().insert(page, script);
        self
    }

    /// Delay the answer for `page` (forces out-of-order completion)
    pub fn with_latency(mut self, page: u32, latency: Duration) -> Self {
        self.latency.insert(page, latency);
        self
    }

    /// Pages requested, in request order
    pub fn calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, page: u32) -> usize {
        self.calls.lock().unwrap().iter().filter(|p| **p == page).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, page: u32) -> Response {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&page) {
            Some(script) if script.len() > 1 => script.remove(0),
            Some(script) if !script.is_empty() => script[0].clone(),
            _ => Ok(tracks(Vec::new(), None)),
        }
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch_page(&self, _query: &RunQuery, page: u32) -> Result<PageOutcome, FetchError> {
        self.calls.lock().unwrap().push(page);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.latency.get(&page) {
            tokio::time::sleep(*latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.next_response(page)
    }
}
