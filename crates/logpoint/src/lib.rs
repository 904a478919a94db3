// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log-line to time-series pipeline.
//!
//! Lines are matched with grok patterns, refined by an ordered chain of secondary rules,
//! translated into typed [`point::Point`]s and handed to a background
//! [`pipeline::DeliveryService`] that batches them and writes them to InfluxDB.
//!
//! ```text
//! line --> Grok --> filter chain --> build_point --> PointSender --> queue --> Batch --> StoreClient
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch;
pub mod config;
pub mod constants;
pub mod errors;
pub mod flusher;
pub mod grok;
pub mod influx;
pub mod parser;
pub mod pipeline;
pub mod point;
pub mod store;
pub mod translate;
pub mod util;
