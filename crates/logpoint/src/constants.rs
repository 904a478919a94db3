// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Number of points written to the store in one request
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Capacity of the queue between producers and the delivery worker
pub const DEFAULT_QUEUE_SIZE: usize = 8192;

/// Seconds between time-triggered flushes
pub const DEFAULT_FLUSH_PERIOD_SECS: u64 = 60;

pub const PING_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_INFLUX_PORT: u16 = 8086;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

// Write retries double from the base delay up to the cap and never give up.
pub const DEFAULT_RETRY_BASE_MS: u64 = 100;
pub const DEFAULT_RETRY_MAX_MS: u64 = 30_000;

// Guards against pattern definitions that reference each other in a cycle.
pub const MAX_PATTERN_DEPTH: usize = 32;
