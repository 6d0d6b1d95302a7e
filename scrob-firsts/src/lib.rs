//! scrob-firsts library interface
//!
//! Retrieves a Last.fm user's complete scrobble history and reduces it to
//! the first scrobble of every artist.
//!
//! Exposes public APIs for the binary and for integration testing.

pub mod aggregator;
pub mod export;
pub mod fetcher;
pub mod lastfm;
pub mod pipeline;
pub mod scheduler;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use crate::aggregator::{Aggregate, AggregationStats, ResultAggregator};
pub use crate::fetcher::{PageFetcher, RetryPolicy};
pub use crate::lastfm::LastFmClient;
pub use crate::pipeline::{LowerBound, Pipeline, RunOutcome, RunStats};
pub use crate::scheduler::BatchScheduler;
pub use crate::types::{
    AggregateEntry, EventRecord, FetchError, PagePayload, PageSource, PipelineError,
    PipelineResult, RunQuery,
};
