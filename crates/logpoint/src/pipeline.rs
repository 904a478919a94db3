// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery pipeline between point producers and the store.
//!
//! ```text
//!    ┌──────────────┐
//!    │ PointSender  │ (cloneable, one per producer)
//!    └──────┬───────┘
//!           │ bounded queue, send waits while full
//!           v
//!    ┌──────────────┐
//!    │DeliveryService│ (single worker task)
//!    └──────┬───────┘
//!           │ batch full, or flush period elapsed with points pending
//!           v
//!    ┌──────────────┐
//!    │   Flusher    │ (retries the same batch until written)
//!    └──────────────┘
//! ```
//!
//! Producers only ever observe backpressure, write failures stay inside the worker.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::batch::Batch;
use crate::config::PipelineConfig;
use crate::errors::{Creation, SendError, StoreError};
use crate::flusher::Flusher;
use crate::point::{FieldValue, Point};
use crate::store::StoreClient;

/// Delivery counters, shared by the worker and every sender.
#[derive(Debug, Default)]
pub struct PipelineStats {
    points_accepted: AtomicU64,
    points_written: AtomicU64,
    batches_written: AtomicU64,
    write_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub points_accepted: u64,
    pub points_written: u64,
    pub batches_written: u64,
    pub write_failures: u64,
}

impl PipelineStats {
    pub(crate) fn record_accept(&self) {
        self.points_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self, points: usize) {
        self.points_written
            .fetch_add(points as u64, Ordering::Relaxed);
        self.batches_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            points_accepted: self.points_accepted.load(Ordering::Relaxed),
            points_written: self.points_written.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Producer side of the pipeline. Cheap to clone.
#[derive(Clone, Debug)]
pub struct PointSender {
    tx: mpsc::Sender<Point>,
    stats: Arc<PipelineStats>,
}

impl PointSender {
    /// Builds a point and queues it, waiting while the queue is full.
    pub async fn send(
        &self,
        key: impl Into<String>,
        tags: BTreeMap<String, String>,
        fields: BTreeMap<String, FieldValue>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SendError> {
        let point = Point::new(key, tags, fields, timestamp)?;
        self.send_point(point).await
    }

    /// Queues a point, waiting while the queue is full.
    pub async fn send_point(&self, point: Point) -> Result<(), SendError> {
        self.tx.send(point).await.map_err(|_| SendError::Closed)?;
        self.stats.record_accept();
        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

pub(crate) fn channel(
    capacity: usize,
) -> (PointSender, mpsc::Receiver<Point>, Arc<PipelineStats>) {
    let (tx, rx) = mpsc::channel(capacity);
    let stats = Arc::new(PipelineStats::default());
    let sender = PointSender {
        tx,
        stats: Arc::clone(&stats),
    };
    (sender, rx, stats)
}

/// The single background worker that batches queued points and writes them.
pub struct DeliveryService<C> {
    flusher: Flusher<C>,
    rx: mpsc::Receiver<Point>,
    batch: Batch,
    config: PipelineConfig,
    cancel_token: CancellationToken,
}

impl<C: StoreClient> DeliveryService<C> {
    /// Checks the store is reachable and `database` exists, then sets up the queue.
    ///
    /// Zero sizes or a zero flush period in `config` are replaced with the defaults. The service
    /// does nothing until [`DeliveryService::run`] is spawned.
    pub async fn new(
        client: C,
        database: &str,
        config: PipelineConfig,
        cancel_token: CancellationToken,
    ) -> Result<(Self, PointSender), Creation> {
        client.ping().await.map_err(|source| Creation::Ping {
            host: client.address(),
            source,
        })?;

        client
            .verify_database(database)
            .await
            .map_err(|e| match e {
                StoreError::DatabaseNotFound(name) => Creation::DatabaseNotFound(name),
                other => Creation::Store(other),
            })?;

        let config = config.normalized();
        let (sender, rx, stats) = channel(config.queue_size);
        let flusher = Flusher::new(Arc::new(client), config.retry_strategy, stats);

        let service = DeliveryService {
            flusher,
            rx,
            batch: Batch::with_capacity(config.batch_size),
            config,
            cancel_token,
        };
        Ok((service, sender))
    }

    /// Runs until every [`PointSender`] is dropped or the cancel token fires, then flushes the
    /// points still queued.
    pub async fn run(mut self) {
        debug!(
            "Delivery service started: batch size {}, queue size {}, flush period {:?}",
            self.config.batch_size, self.config.queue_size, self.config.flush_period
        );

        let mut ticker = interval(self.config.flush_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    debug!("Delivery service cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if self.batch.is_empty() {
                        continue;
                    }
                    trace!("Flush period elapsed with {} points pending", self.batch.len());
                }
                point = self.rx.recv() => match point {
                    Some(point) => {
                        self.batch.push(point);
                        if !self.batch.is_full(self.config.batch_size) {
                            continue;
                        }
                    }
                    None => {
                        debug!("All senders dropped");
                        break;
                    }
                },
            }
            self.flush().await;
        }

        self.drain().await;
        info!("Delivery service stopped");
    }

    async fn flush(&mut self) {
        self.flusher.flush(&self.batch).await;
        self.batch.clear();
    }

    async fn drain(&mut self) {
        self.rx.close();
        while let Some(point) = self.rx.recv().await {
            self.batch.push(point);
            if self.batch.is_full(self.config.batch_size) {
                self.flush().await;
            }
        }
        if !self.batch.is_empty() {
            debug!("Flushing {} points before shutdown", self.batch.len());
            self.flush().await;
        }
    }
}
