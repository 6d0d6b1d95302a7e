//! Page fetcher with bounded retry
//!
//! Fetches one page from a `PageSource`:
//! 1. Sleep the fixed per-request delay (every attempt, retries included)
//! 2. Wait for the optional requests-per-second limiter
//! 3. Issue exactly one request
//! 4. On failure, if retries remain: sleep `unit * base^retry`, go to 1
//! 5. Otherwise fail terminally with `PipelineError::RetriesExhausted`
//!
//! A page whose JSON lacks the `recenttracks` section is a success with
//! zero entries and is not retried.

use crate::types::{PagePayload, PageSource, PipelineError, PipelineResult, RunQuery};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use scrob_common::config::FetchSettings;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Retry and pacing parameters for one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Fixed pause before every attempt
    pub rate_limit_delay: Duration,
    /// Exponential base for backoff
    pub backoff_base: u32,
    /// Duration of one backoff unit (1s in production)
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &FetchSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            rate_limit_delay: settings.rate_limit_delay(),
            backoff_base: settings.retry_backoff_base,
            backoff_unit: settings.backoff_unit(),
        }
    }

    /// Delay before retry number `retry + 1` (`retry` = retries already made)
    ///
    /// Saturates instead of overflowing for absurd retry counts.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = self.backoff_base.saturating_pow(retry);
        self.backoff_unit.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&FetchSettings::default())
    }
}

/// Fetches single pages with retry, backoff and per-request pacing
///
/// Holds no per-page state; the same fetcher serves every concurrent
/// page of a run.
pub struct PageFetcher {
    source: Arc<dyn PageSource>,
    policy: RetryPolicy,
    /// Aggregate ceiling shared by all in-flight requests
    limiter: Option<DefaultDirectRateLimiter>,
}

impl PageFetcher {
    pub fn new(source: Arc<dyn PageSource>, policy: RetryPolicy) -> Self {
        Self {
            source,
            policy,
            limiter: None,
        }
    }

    /// Build from configuration, installing the governor limiter when
    /// `requests_per_second` is set
    pub fn from_settings(source: Arc<dyn PageSource>, settings: &FetchSettings) -> Self {
        let fetcher = Self::new(source, RetryPolicy::from_settings(settings));
        match settings.requests_per_second.and_then(NonZeroU32::new) {
            Some(rps) => fetcher.with_requests_per_second(rps),
            None => fetcher,
        }
    }

    pub fn with_requests_per_second(mut self, rps: NonZeroU32) -> Self {
        self.limiter = Some(RateLimiter::direct(Quota::per_second(rps)));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `page`, retrying transient failures
    ///
    /// # Errors
    /// `PipelineError::RetriesExhausted` once `max_retries + 1` attempts
    /// have failed. The last attempt's error is attached.
    pub async fn fetch(&self, query: &RunQuery, page: u32) -> PipelineResult<PagePayload> {
        let mut retry: u32 = 0;

        loop {
            tokio::time::sleep(self.policy.rate_limit_delay).await;
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            let attempt = retry + 1;
            debug!(page, attempt, "Fetching page");

            match self.source.fetch_page(query, page).await {
                Ok(outcome) => {
                    let payload = PagePayload::from_outcome(page, outcome, attempt);
                    if payload.degraded {
                        warn!(page, attempt, "Page has no recenttracks section, treating as empty");
                    } else if retry > 0 {
                        info!(
                            page,
                            attempt,
                            entries = payload.entries.len(),
                            "Page fetched after retry"
                        );
                    } else {
                        debug!(page, entries = payload.entries.len(), "Page fetched");
                    }
                    return Ok(payload);
                }
                Err(err) => {
                    error!(page, attempt, error = %err, "Error fetching page");

                    if retry >= self.policy.max_retries {
                        error!(
                            page,
                            attempts = attempt,
                            "Retry budget exhausted, giving up on page"
                        );
                        return Err(PipelineError::RetriesExhausted {
                            page,
                            attempts: attempt,
                            source: err,
                        });
                    }

                    let backoff = self.policy.backoff_delay(retry);
                    info!(
                        page,
                        retry = retry + 1,
                        max_retries = self.policy.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Retrying page"
                    );
                    tokio::time::sleep(backoff).await;
                    retry += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{entry, tracks, ScriptedSource};
    use crate::types::{FetchError, PageOutcome};
    use tokio::time::Instant;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            rate_limit_delay: Duration::ZERO,
            backoff_base: 2,
            backoff_unit: Duration::ZERO,
        }
    }

    fn query() -> RunQuery {
        RunQuery::new("rj", 2)
    }

    fn server_error() -> FetchError {
        FetchError::HttpStatus {
            status: 500,
            body: "Internal Server Error".to_string(),
        }
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = RetryPolicy {
            backoff_unit: Duration::from_secs(1),
            ..fast_policy(3)
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy {
            backoff_unit: Duration::from_secs(1),
            ..fast_policy(3)
        };
        assert!(policy.backoff_delay(200) >= Duration::from_secs(u32::MAX as u64));
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let source = Arc::new(ScriptedSource::new().with_page(1, vec![entry("A", 100)], Some(1)));
        let fetcher = PageFetcher::new(source.clone(), fast_policy(3));

        let payload = fetcher.fetch(&query(), 1).await.unwrap();
        assert_eq!(payload.page, 1);
        assert_eq!(payload.entries.len(), 1);
        assert_eq!(payload.total_pages, Some(1));
        assert_eq!(payload.attempts, 1);
        assert_eq!(source.calls_for(1), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        // Fails N = 2 times (< max_retries = 3), then succeeds
        let source = Arc::new(ScriptedSource::new().with_script(
            3,
            vec![
                Err(server_error()),
                Err(FetchError::Parse("truncated body".to_string())),
                Ok(tracks(vec![entry("B", 50)], Some(5))),
            ],
        ));
        let fetcher = PageFetcher::new(source.clone(), fast_policy(3));

        let payload = fetcher.fetch(&query(), 3).await.unwrap();
        assert_eq!(payload.entries.len(), 1);
        assert_eq!(payload.entries[0].artist_name(), "B");
        assert_eq!(payload.attempts, 3);
        assert_eq!(source.calls_for(3), 3, "N+1 attempts expected");
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let source = Arc::new(ScriptedSource::new().with_script(
            2,
            vec![Err(FetchError::Api {
                code: 8,
                message: "Operation failed".to_string(),
            })],
        ));
        let fetcher = PageFetcher::new(source.clone(), fast_policy(3));

        let err = fetcher.fetch(&query(), 2).await.unwrap_err();
        match err {
            PipelineError::RetriesExhausted {
                page,
                attempts,
                source: cause,
            } => {
                assert_eq!(page, 2);
                assert_eq!(attempts, 4);
                assert!(matches!(cause, FetchError::Api { code: 8, .. }));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(source.calls_for(2), 4, "MAX_RETRIES + 1 attempts expected");
    }

    #[tokio::test]
    async fn test_zero_retries_fails_on_first_error() {
        let source = Arc::new(ScriptedSource::new().with_script(1, vec![Err(server_error())]));
        let fetcher = PageFetcher::new(source.clone(), fast_policy(0));

        assert!(fetcher.fetch(&query(), 1).await.is_err());
        assert_eq!(source.calls_for(1), 1);
    }

    #[tokio::test]
    async fn test_missing_section_is_empty_without_retry() {
        let source = Arc::new(
            ScriptedSource::new().with_script(7, vec![Ok(PageOutcome::MissingSection)]),
        );
        let fetcher = PageFetcher::new(source.clone(), fast_policy(3));

        let payload = fetcher.fetch(&query(), 7).await.unwrap();
        assert!(payload.entries.is_empty());
        assert!(payload.degraded);
        assert_eq!(source.calls_for(7), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_before_each_attempt_and_between_retries() {
        let source = Arc::new(ScriptedSource::new().with_script(
            1,
            vec![
                Err(server_error()),
                Err(server_error()),
                Ok(tracks(vec![], Some(1))),
            ],
        ));
        let policy = RetryPolicy {
            max_retries: 3,
            rate_limit_delay: Duration::from_millis(250),
            backoff_base: 2,
            backoff_unit: Duration::from_secs(1),
        };
        let fetcher = PageFetcher::new(source, policy);

        let start = Instant::now();
        fetcher.fetch(&query(), 1).await.unwrap();

        // 3 x 250ms pacing + 1s + 2s backoff
        assert_eq!(start.elapsed(), Duration::from_millis(3 * 250 + 1000 + 2000));
    }

    #[test]
    fn test_from_settings_installs_limiter_only_when_configured() {
        let source = Arc::new(ScriptedSource::new());
        let plain = PageFetcher::from_settings(source.clone(), &FetchSettings::default());
        assert!(plain.limiter.is_none());

        let limited = PageFetcher::from_settings(
            source,
            &FetchSettings {
                requests_per_second: Some(5),
                ..Default::default()
            },
        );
        assert!(limited.limiter.is_some());
        assert_eq!(limited.policy().max_retries, 3);
    }

    // governor keeps its own clock, so this runs on wall time
    #[tokio::test]
    async fn test_requests_per_second_paces_concurrent_fetches() {
        let source = Arc::new(ScriptedSource::new());
        let fetcher = PageFetcher::new(source.clone(), fast_policy(0))
            .with_requests_per_second(NonZeroU32::new(5).unwrap());
        let query = query();

        let started = std::time::Instant::now();
        let results = futures::future::join_all((1..=7).map(|page| fetcher.fetch(&query, page))).await;
        let elapsed = started.elapsed();

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(source.calls().len(), 7);
        // Burst of 5, then one cell every 200ms for pages 6 and 7
        assert!(
            elapsed >= Duration::from_millis(350),
            "7 requests at 5/s finished in {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_without_limiter_concurrent_fetches_are_not_paced() {
        let source = Arc::new(ScriptedSource::new());
        let fetcher = PageFetcher::new(source.clone(), fast_policy(0));
        let query = query();

        let started = std::time::Instant::now();
        futures::future::join_all((1..=7).map(|page| fetcher.fetch(&query, page))).await;

        assert_eq!(source.calls().len(), 7);
        assert!(started.elapsed() < Duration::from_millis(350));
    }
}
