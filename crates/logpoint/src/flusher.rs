// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::batch::Batch;
use crate::constants::{DEFAULT_RETRY_BASE_MS, DEFAULT_RETRY_MAX_MS};
use crate::pipeline::PipelineStats;
use crate::store::StoreClient;

/// Delay between failed writes of the same batch. Attempts are never abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    /// Retry right away.
    Immediate,
    /// Double the delay after every failure, starting at `base_ms` and capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Exponential {
            base_ms: DEFAULT_RETRY_BASE_MS,
            max_ms: DEFAULT_RETRY_MAX_MS,
        }
    }
}

impl RetryStrategy {
    /// Delay to wait after the `failures`-th consecutive failure.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            RetryStrategy::Immediate => Duration::ZERO,
            RetryStrategy::Exponential { base_ms, max_ms } => {
                let factor = 1u64
                    .checked_shl(failures.saturating_sub(1))
                    .unwrap_or(u64::MAX);
                Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
            }
        }
    }
}

pub struct Flusher<C> {
    client: Arc<C>,
    retry_strategy: RetryStrategy,
    stats: Arc<PipelineStats>,
}

impl<C: StoreClient> Flusher<C> {
    pub fn new(client: Arc<C>, retry_strategy: RetryStrategy, stats: Arc<PipelineStats>) -> Self {
        Flusher {
            client,
            retry_strategy,
            stats,
        }
    }

    /// Writes `batch` and only returns once the store accepted it.
    ///
    /// Returns the number of failed attempts.
    pub async fn flush(&self, batch: &Batch) -> u32 {
        if batch.is_empty() {
            return 0;
        }
        let n_points = batch.len();
        debug!("Flushing {} points to {}", n_points, self.client.address());

        let mut failures: u32 = 0;
        loop {
            match self.client.write(batch).await {
                Ok(()) => {
                    self.stats.record_write(n_points);
                    if failures > 0 {
                        info!("Wrote {n_points} points after {failures} failed attempts");
                    } else {
                        debug!("Successfully flushed {n_points} points");
                    }
                    return failures;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    self.stats.record_failure();
                    error!("Failed to write {n_points} points (attempt {failures}): {e}");

                    let delay = self.retry_strategy.delay(failures);
                    if delay.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        debug!("Retrying write in {delay:?}");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use crate::point::Point;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    struct FlakyStore {
        failures_left: AtomicUsize,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl StoreClient for FlakyStore {
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn verify_database(&self, _database: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn write(&self, _batch: &Batch) -> Result<(), StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Status {
                    status: 500,
                    body: "Internal Server Error".to_string(),
                });
            }
            Ok(())
        }

        fn address(&self) -> String {
            "flaky".to_string()
        }
    }

    fn flaky(failures: usize) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        })
    }

    fn batch_of(n: usize) -> Batch {
        (0..n)
            .map(|i| {
                Point::new(format!("p{i}"), BTreeMap::new(), BTreeMap::new(), Utc::now()).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_immediate_has_no_delay() {
        let strategy = RetryStrategy::Immediate;
        assert_eq!(strategy.delay(1), Duration::ZERO);
        assert_eq!(strategy.delay(100), Duration::ZERO);
    }

    #[test]
    fn test_exponential_doubles_and_caps() {
        let strategy = RetryStrategy::Exponential {
            base_ms: 100,
            max_ms: 1_000,
        };
        assert_eq!(strategy.delay(1), Duration::from_millis(100));
        assert_eq!(strategy.delay(2), Duration::from_millis(200));
        assert_eq!(strategy.delay(3), Duration::from_millis(400));
        assert_eq!(strategy.delay(4), Duration::from_millis(800));
        assert_eq!(strategy.delay(5), Duration::from_millis(1_000));
        assert_eq!(strategy.delay(200), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_flush_empty_batch_does_not_write() {
        let store = flaky(0);
        let stats = Arc::new(PipelineStats::default());
        let flusher = Flusher::new(Arc::clone(&store), RetryStrategy::Immediate, stats);

        assert_eq!(flusher.flush(&Batch::default()).await, 0);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_flush_retries_until_success() {
        let store = flaky(3);
        let stats = Arc::new(PipelineStats::default());
        let flusher = Flusher::new(
            Arc::clone(&store),
            RetryStrategy::Exponential {
                base_ms: 10,
                max_ms: 20,
            },
            Arc::clone(&stats),
        );

        let failures = flusher.flush(&batch_of(5)).await;
        assert_eq!(failures, 3);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 4);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.write_failures, 3);
        assert_eq!(snapshot.batches_written, 1);
        assert_eq!(snapshot.points_written, 5);
        assert!(logs_contain("Failed to write 5 points (attempt 3)"));
    }
}
