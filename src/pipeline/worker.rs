//! Fetch Pool
//!
//! Runs independent fetches on a bounded set of tasks. Every target gets
//! its own outcome; a failing fetch never affects the others. Time limits
//! belong to the HTTP client, so a fetch queued behind a rate limiter is
//! never cut short here.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use tokio::sync::Semaphore;
use tracing::{debug, warn, Instrument};

use crate::error::{IngestionError, Result};

/// Result of one target's fetch
#[derive(Debug)]
pub struct FetchOutcome<T, R> {
    pub target: T,
    pub result: Result<R>,
}

#[derive(Debug, Clone)]
pub struct FetchPool {
    workers: usize,
    max_retries: u32,
    retry_delay: Duration,
}

impl Default for FetchPool {
    fn default() -> Self {
        Self::new(8)
    }
}

impl FetchPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            max_retries: 0,
            retry_delay: Duration::from_millis(500),
        }
    }

    /// Retries transient failures up to `max_retries` times
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Fetches every target; outcomes come back in input order
    pub async fn run<T, R, F, Fut>(&self, targets: Vec<T>, fetch: F) -> Vec<FetchOutcome<T, R>>
    where
        T: Clone + Display + Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        debug!(targets = targets.len(), workers = self.workers, "Starting fetch pool");

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let fetch = Arc::new(fetch);
        let mut handles = Vec::with_capacity(targets.len());

        for target in targets {
            let semaphore = semaphore.clone();
            let fetch = fetch.clone();
            let pool = self.clone();
            let task_target = target.clone();
            let span = tracing::debug_span!("fetch", item = %target);

            let handle = tokio::spawn(
                async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| IngestionError::TaskFailed("fetch pool closed".to_string()))?;
                    pool.fetch_with_retry(&task_target, fetch.as_ref()).await
                }
                .instrument(span),
            );
            handles.push((target, handle));
        }

        let (targets, handles): (Vec<T>, Vec<_>) = handles.into_iter().unzip();
        let joined = join_all(handles).await;

        targets
            .into_iter()
            .zip(joined)
            .map(|(target, joined)| {
                let result = match joined {
                    Ok(result) => result,
                    Err(e) => Err(IngestionError::TaskFailed(format!("{target}: {e}"))),
                };
                FetchOutcome { target, result }
            })
            .collect()
    }

    async fn fetch_with_retry<T, R, F, Fut>(&self, target: &T, fetch: &F) -> Result<R>
    where
        T: Clone + Display,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let mut attempt = 0;
        loop {
            match fetch(target.clone()).await {
                Err(e) if attempt < self.max_retries && e.is_transient() => {
                    let delay = self.backoff(attempt);
                    warn!(
                        item = %target,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient fetch failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Exponential delay with up to 50% jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.retry_delay.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = (base.as_millis() as u64) / 2;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        base + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_outcomes_keep_input_order() {
        let pool = FetchPool::new(3);
        let targets: Vec<u32> = (0..10).collect();

        let outcomes = pool
            .run(targets, |n| async move {
                // Later targets finish first.
                tokio::time::sleep(Duration::from_millis(u64::from(10 - n) * 5)).await;
                Ok(n * 2)
            })
            .await;

        assert_eq!(outcomes.len(), 10);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.target, i as u32);
            assert_eq!(*outcome.result.as_ref().unwrap(), i as u32 * 2);
        }
    }

    #[tokio::test]
    async fn test_one_failure_is_isolated() {
        let pool = FetchPool::new(4);
        let outcomes = pool
            .run((0..10).collect::<Vec<u32>>(), |n| async move {
                if n == 3 {
                    Err(IngestionError::Parse("boom".to_string()))
                } else {
                    Ok(n)
                }
            })
            .await;

        let failed: Vec<_> = outcomes.iter().filter(|o| o.result.is_err()).map(|o| o.target).collect();
        assert_eq!(failed, vec![3]);
        assert_eq!(outcomes.iter().filter(|o| o.result.is_ok()).count(), 9);
    }

    #[tokio::test]
    async fn test_queued_fetches_have_no_deadline() {
        let pool = FetchPool::new(1);
        let started = std::time::Instant::now();

        let outcomes = pool
            .run((0..5).collect::<Vec<u32>>(), |n| async move {
                tokio::time::sleep(Duration::from_millis(60)).await;
                Ok(n)
            })
            .await;

        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = FetchPool::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (a, p) = (active.clone(), peak.clone());
        pool.run((0..8).collect::<Vec<u32>>(), move |n| {
            let (active, peak) = (a.clone(), p.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(n)
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let pool = FetchPool::new(1).with_retries(2, Duration::from_millis(1));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let outcomes = pool
            .run(vec![7u32], move |n| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(IngestionError::FetchStatus {
                            url: "http://localhost".to_string(),
                            status: 503,
                            body: String::new(),
                        })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(*outcomes[0].result.as_ref().unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_by_default() {
        let pool = FetchPool::new(1);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let outcomes = pool
            .run(vec![1u32], move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(IngestionError::FetchTimeout {
                        url: "http://localhost".to_string(),
                        after: Duration::from_secs(1),
                    })
                }
            })
            .await;

        assert!(outcomes[0].result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
