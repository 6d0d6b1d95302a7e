//! Pipeline driver
//!
//! **Run sequence:**
//! 1. Fetch page 1 to learn `totalPages` (failure aborts the run)
//! 2. Fetch pages `1..=totalPages` in batches, reusing page 1
//! 3. Reduce all pages into the first-occurrence aggregate
//! 4. Hand the aggregate back to the caller for export
//!
//! Nothing is returned on failure: no partial aggregate exists outside
//! a successful run.

use crate::aggregator::{Aggregate, AggregationStats, ResultAggregator};
use crate::fetcher::PageFetcher;
use crate::lastfm::LastFmClient;
use crate::scheduler::BatchScheduler;
use crate::types::{PagePayload, PageSource, PipelineError, PipelineResult, RunQuery};
use chrono::Utc;
use scrob_common::config::FetchSettings;
use scrob_common::events::{EventBus, ProgressEvent};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// How the lower time bound of a run is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowerBound {
    /// Whole history
    None,
    /// The user's registration time (`user.getInfo`)
    Registration,
    /// Explicit Unix timestamp
    Since(i64),
}

/// Turn a `LowerBound` choice into a concrete timestamp
pub async fn resolve_lower_bound(
    client: &LastFmClient,
    username: &str,
    bound: LowerBound,
) -> PipelineResult<Option<i64>> {
    match bound {
        LowerBound::None => Ok(None),
        LowerBound::Since(ts) => Ok(Some(ts)),
        LowerBound::Registration => {
            let registered = client
                .registration_timestamp(username)
                .await
                .map_err(PipelineError::Registration)?;
            info!(user = %username, registered, "Using registration time as lower bound");
            Ok(Some(registered))
        }
    }
}

/// Statistics of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub total_pages: u32,
    pub pages_fetched: usize,
    /// HTTP attempts across all pages, retries included
    pub http_attempts: u64,
    pub aggregation: AggregationStats,
    pub elapsed: Duration,
}

/// Finished run: frozen aggregate plus statistics
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub username: String,
    pub lower_bound: Option<i64>,
    pub aggregate: Aggregate,
    pub stats: RunStats,
}

/// Orchestrates fetcher, scheduler and aggregator for one user at a time
pub struct Pipeline {
    fetcher: Arc<PageFetcher>,
    settings: FetchSettings,
    event_bus: EventBus,
}

impl Pipeline {
    /// # Errors
    /// `PipelineError::Config` if `settings` fail validation
    pub fn new(
        source: Arc<dyn PageSource>,
        settings: FetchSettings,
        event_bus: EventBus,
    ) -> PipelineResult<Self> {
        settings.validate()?;
        let fetcher = Arc::new(PageFetcher::from_settings(source, &settings));
        Ok(Self {
            fetcher,
            settings,
            event_bus,
        })
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Retrieve the full history of `username` and reduce it
    ///
    /// `lower_bound` is sent as the `from` query parameter and applied
    /// again as a filter on every record.
    pub async fn run(
        &self,
        username: &str,
        lower_bound: Option<i64>,
    ) -> PipelineResult<RunOutcome> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();

        info!(%run_id, user = %username, lower_bound = ?lower_bound, "Starting retrieval run");
        self.event_bus.emit_lossy(ProgressEvent::RunStarted {
            run_id,
            username: username.to_string(),
            lower_bound,
            timestamp: Utc::now(),
        });

        match self.execute(run_id, username, lower_bound, started).await {
            Ok(outcome) => {
                self.event_bus.emit_lossy(ProgressEvent::RunCompleted {
                    run_id,
                    distinct_keys: outcome.aggregate.len(),
                    timestamp: Utc::now(),
                });
                Ok(outcome)
            }
            Err(err) => {
                error!(%run_id, error = %err, "Retrieval run failed");
                self.event_bus.emit_lossy(ProgressEvent::RunFailed {
                    run_id,
                    error: err.to_string(),
                    timestamp: Utc::now(),
                });
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        run_id: Uuid,
        username: &str,
        lower_bound: Option<i64>,
        started: Instant,
    ) -> PipelineResult<RunOutcome> {
        let query = RunQuery::new(username, self.settings.page_size).with_from(lower_bound);

        let first_page = self.discover(&query).await?;
        let total_pages = match first_page.total_pages {
            Some(0) => {
                info!("Result set is empty");
                1
            }
            Some(n) => n,
            None => {
                return Err(PipelineError::DiscoveryFailed {
                    reason: "page 1 did not report totalPages".to_string(),
                    source: None,
                })
            }
        };

        info!(total_pages, "Total pages to process");
        self.event_bus.emit_lossy(ProgressEvent::TotalPagesDiscovered {
            run_id,
            total_pages,
            timestamp: Utc::now(),
        });

        let scheduler = BatchScheduler::new(
            Arc::clone(&self.fetcher),
            self.settings.batch_size,
            self.settings.batch_delay(),
            self.event_bus.clone(),
            run_id,
        );
        let pages = scheduler
            .fetch_all(&query, total_pages, Some(first_page))
            .await?;

        let http_attempts = pages.iter().map(|p| u64::from(p.attempts)).sum();
        let reduction = ResultAggregator::new(lower_bound, self.settings.malformed_timestamps)
            .reduce(&pages);

        let stats = RunStats {
            total_pages,
            pages_fetched: pages.len(),
            http_attempts,
            aggregation: reduction.stats,
            elapsed: started.elapsed(),
        };

        if stats.aggregation.degraded_pages > 0 {
            warn!(
                degraded_pages = stats.aggregation.degraded_pages,
                "Some pages had an unexpected format and were treated as empty"
            );
        }
        info!(
            %run_id,
            distinct_keys = reduction.aggregate.len(),
            pages = stats.pages_fetched,
            http_attempts = stats.http_attempts,
            entries = stats.aggregation.entries_seen,
            now_playing_skipped = stats.aggregation.now_playing_skipped,
            below_bound_skipped = stats.aggregation.below_bound_skipped,
            malformed_timestamps = stats.aggregation.malformed_timestamps,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Retrieval run complete"
        );

        Ok(RunOutcome {
            run_id,
            username: username.to_string(),
            lower_bound,
            aggregate: reduction.aggregate,
            stats,
        })
    }

    /// Step 1: page 1 alone
    async fn discover(&self, query: &RunQuery) -> PipelineResult<PagePayload> {
        let first_page = self.fetcher.fetch(query, 1).await.map_err(|err| match err {
            PipelineError::RetriesExhausted {
                attempts, source, ..
            } => PipelineError::DiscoveryFailed {
                reason: format!("page 1 failed after {} attempts", attempts),
                source: Some(source),
            },
            other => other,
        })?;

        if first_page.degraded {
            return Err(PipelineError::DiscoveryFailed {
                reason: "page 1 has no recenttracks section".to_string(),
                source: None,
            });
        }

        Ok(first_page)
    }
}
