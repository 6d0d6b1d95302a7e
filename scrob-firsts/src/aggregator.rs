//! First-occurrence aggregation
//!
//! Folds normalized scrobbles into `key → earliest entry`. Minimum is
//! order-independent, so pages are consumed in whatever order they
//! arrived. On equal timestamps the record folded first is kept.

use crate::lastfm::types::TrackEntry;
use crate::types::{AggregateEntry, EventRecord, PagePayload};
use scrob_common::config::MalformedTimestampPolicy;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Mapping from grouping key to its earliest scrobble
///
/// At most one entry per key. Only `fold` mutates it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregate {
    entries: HashMap<String, AggregateEntry>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record; returns `true` if the aggregate changed
    ///
    /// Unseen key → insert. Seen key → replace only on a strictly earlier
    /// timestamp.
    pub fn fold(&mut self, record: EventRecord) -> bool {
        match self.entries.get_mut(&record.key) {
            Some(existing) if record.timestamp < existing.timestamp => {
                existing.timestamp = record.timestamp;
                existing.label = record.label;
                existing.group = record.group;
                true
            }
            Some(_) => false,
            None => {
                self.entries.insert(
                    record.key,
                    AggregateEntry {
                        timestamp: record.timestamp,
                        label: record.label,
                        group: record.group,
                    },
                );
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&AggregateEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AggregateEntry)> {
        self.entries.iter()
    }

    /// Entries by ascending timestamp, ties by key
    ///
    /// Presentation order only; the mapping itself is unordered.
    pub fn sorted_by_timestamp(&self) -> Vec<(&str, &AggregateEntry)> {
        let mut sorted: Vec<(&str, &AggregateEntry)> =
            self.entries.iter().map(|(k, v)| (k.as_str(), v)).collect();
        sorted.sort_by(|(ka, a), (kb, b)| a.timestamp.cmp(&b.timestamp).then_with(|| ka.cmp(kb)));
        sorted
    }

    pub fn into_inner(self) -> HashMap<String, AggregateEntry> {
        self.entries
    }
}

/// Counters collected while reducing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregationStats {
    pub pages: usize,
    /// Pages that degraded to empty (missing section)
    pub degraded_pages: usize,
    pub entries_seen: usize,
    pub now_playing_skipped: usize,
    pub below_bound_skipped: usize,
    /// Entries without a usable timestamp (skipped or coerced, per policy)
    pub malformed_timestamps: usize,
    pub folded: usize,
}

/// Why an entry did not become an `EventRecord`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NowPlaying,
    MalformedTimestamp,
}

/// Normalize one API entry
///
/// Now-playing entries never become records. Entries without a usable
/// timestamp are rejected or pinned to 0 according to `policy`.
pub fn normalize(
    entry: &TrackEntry,
    policy: MalformedTimestampPolicy,
) -> Result<EventRecord, Rejection> {
    if entry.is_now_playing() {
        return Err(Rejection::NowPlaying);
    }

    let timestamp = match (entry.timestamp(), policy) {
        (Some(ts), _) => ts,
        (None, MalformedTimestampPolicy::CoerceToZero) => 0,
        (None, MalformedTimestampPolicy::Skip) => return Err(Rejection::MalformedTimestamp),
    };

    Ok(EventRecord {
        key: entry.artist_name(),
        label: entry.track_name(),
        group: entry.album_name(),
        timestamp,
    })
}

/// Result of a full reduction
#[derive(Debug, Clone, Default)]
pub struct Reduction {
    pub aggregate: Aggregate,
    pub stats: AggregationStats,
}

/// Single-pass reducer over fetched pages
pub struct ResultAggregator {
    lower_bound: Option<i64>,
    policy: MalformedTimestampPolicy,
    aggregate: Aggregate,
    stats: AggregationStats,
}

impl ResultAggregator {
    pub fn new(lower_bound: Option<i64>, policy: MalformedTimestampPolicy) -> Self {
        Self {
            lower_bound,
            policy,
            aggregate: Aggregate::new(),
            stats: AggregationStats::default(),
        }
    }

    /// Reduce `pages` (in delivery order) into a finished aggregate
    pub fn reduce<'a>(mut self, pages: impl IntoIterator<Item = &'a PagePayload>) -> Reduction {
        for page in pages {
            self.consume_page(page);
        }
        self.finish()
    }

    /// Fold every entry of one page
    pub fn consume_page(&mut self, page: &PagePayload) {
        self.stats.pages += 1;
        if page.degraded {
            self.stats.degraded_pages += 1;
            warn!(page = page.page, "Skipping page without recenttracks section");
            return;
        }

        debug!(page = page.page, entries = page.entries.len(), "Processing page");
        for entry in &page.entries {
            self.consume_entry(entry);
        }
    }

    fn consume_entry(&mut self, entry: &TrackEntry) {
        self.stats.entries_seen += 1;

        let record = match normalize(entry, self.policy) {
            Ok(record) => {
                if entry.timestamp().is_none() {
                    self.stats.malformed_timestamps += 1;
                }
                record
            }
            Err(Rejection::NowPlaying) => {
                self.stats.now_playing_skipped += 1;
                return;
            }
            Err(Rejection::MalformedTimestamp) => {
                self.stats.malformed_timestamps += 1;
                debug!(artist = %entry.artist_name(), "Skipping scrobble without valid timestamp");
                return;
            }
        };

        if let Some(bound) = self.lower_bound {
            if record.timestamp < bound {
                self.stats.below_bound_skipped += 1;
                return;
            }
        }

        self.stats.folded += 1;
        self.aggregate.fold(record);
    }

    pub fn finish(self) -> Reduction {
        Reduction {
            aggregate: self.aggregate,
            stats: self.stats,
        }
    }
}
