//! Batch scheduler
//!
//! Splits pages `1..=total_pages` into consecutive batches of `batch_size`
//! and runs each batch's fetches concurrently on the current task
//! (`FuturesUnordered`, no spawning). Batches are strictly sequential and
//! separated by `batch_delay`.
//!
//! All-or-nothing: a page that exhausts its retries fails the whole call,
//! but only after every sibling in its batch has resolved, so no request
//! is left in flight.

use crate::fetcher::PageFetcher;
use crate::types::{PagePayload, PipelineError, PipelineResult, RunQuery};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use scrob_common::events::{EventBus, ProgressEvent};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Partition `1..=total_pages` into consecutive ranges of at most `batch_size` pages
pub fn plan_batches(total_pages: u32, batch_size: usize) -> Vec<RangeInclusive<u32>> {
    let size = u32::try_from(batch_size.max(1)).unwrap_or(u32::MAX);
    let mut batches = Vec::new();
    let mut first = 1u32;

    while first <= total_pages {
        let last = first.saturating_add(size - 1).min(total_pages);
        batches.push(first..=last);
        if last == u32::MAX {
            break;
        }
        first = last + 1;
    }

    batches
}

pub struct BatchScheduler {
    fetcher: Arc<PageFetcher>,
    batch_size: usize,
    batch_delay: Duration,
    event_bus: EventBus,
    run_id: Uuid,
}

impl BatchScheduler {
    pub fn new(
        fetcher: Arc<PageFetcher>,
        batch_size: usize,
        batch_delay: Duration,
        event_bus: EventBus,
        run_id: Uuid,
    ) -> Self {
        Self {
            fetcher,
            batch_size: batch_size.max(1),
            batch_delay,
            event_bus,
            run_id,
        }
    }

    /// Fetch every page of the result set
    ///
    /// `first_page`, when given, is reused as page 1 instead of being
    /// requested again. It still counts toward the first batch and the
    /// progress total.
    ///
    /// # Returns
    /// Pages in completion order (not page order).
    ///
    /// # Errors
    /// The first terminal page failure of the failing batch.
    pub async fn fetch_all(
        &self,
        query: &RunQuery,
        total_pages: u32,
        first_page: Option<PagePayload>,
    ) -> PipelineResult<Vec<PagePayload>> {
        let batches = plan_batches(total_pages, self.batch_size);
        let mut prefetched = first_page.filter(|p| p.page == 1);
        let mut results = Vec::with_capacity(total_pages as usize);
        let mut completed: u32 = 0;

        info!(
            total_pages,
            batches = batches.len(),
            batch_size = self.batch_size,
            "Starting batched retrieval"
        );

        for (index, range) in batches.into_iter().enumerate() {
            let batch = index + 1;

            if index > 0 && !self.batch_delay.is_zero() {
                debug!(batch, delay_ms = self.batch_delay.as_millis() as u64, "Inter-batch delay");
                tokio::time::sleep(self.batch_delay).await;
            }

            self.event_bus.emit_lossy(ProgressEvent::BatchStarted {
                run_id: self.run_id,
                batch,
                first_page: *range.start(),
                last_page: *range.end(),
                timestamp: Utc::now(),
            });

            let mut in_flight = FuturesUnordered::new();
            for page in range.clone() {
                if page == 1 {
                    if let Some(payload) = prefetched.take() {
                        debug!(page, "Reusing discovery page");
                        completed += 1;
                        self.page_completed(&payload, completed, total_pages);
                        results.push(payload);
                        continue;
                    }
                }
                in_flight.push(self.fetcher.fetch(query, page));
            }

            let mut failure: Option<PipelineError> = None;
            while let Some(result) = in_flight.next().await {
                match result {
                    Ok(payload) => {
                        completed += 1;
                        self.page_completed(&payload, completed, total_pages);
                        results.push(payload);
                    }
                    Err(err) => {
                        error!(batch, error = %err, "Page failed terminally, draining batch");
                        if failure.is_none() {
                            failure = Some(err);
                        }
                    }
                }
            }

            if let Some(err) = failure {
                error!(batch, completed, total_pages, "Aborting retrieval");
                return Err(err);
            }

            self.event_bus.emit_lossy(ProgressEvent::BatchCompleted {
                run_id: self.run_id,
                batch,
                completed,
                total_pages,
                timestamp: Utc::now(),
            });
            info!(batch, "Processed {} / {} pages", completed, total_pages);
        }

        Ok(results)
    }

    fn page_completed(&self, payload: &PagePayload, completed: u32, total_pages: u32) {
        self.event_bus.emit_lossy(ProgressEvent::PageCompleted {
            run_id: self.run_id,
            page: payload.page,
            completed,
            total_pages,
            records: payload.entries.len(),
            timestamp: Utc::now(),
        });
    }
}
