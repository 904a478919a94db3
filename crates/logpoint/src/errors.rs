// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Failures while starting the delivery pipeline. The pipeline never runs after one of these.
#[derive(Debug, Error)]
pub enum Creation {
    #[error("can't ping host {host}: {source}")]
    Ping { host: String, source: StoreError },
    #[error("database {0} does not exist")]
    DatabaseNotFound(String),
    #[error("unable to verify database: {0}")]
    Store(#[from] StoreError),
}

/// Failures of the pattern matcher itself. A line that does not match is not an error.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("pattern %{{{0}}} is not defined")]
    UnknownPattern(String),
    #[error("pattern {pattern} does not compile: {source}")]
    Compile {
        pattern: String,
        source: regex::Error,
    },
    #[error("pattern {0} is nested too deeply, definitions are probably recursive")]
    RecursionLimit(String),
}

/// Failures that abort the processing of a single line.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("matcher error: {0}")]
    Match(#[from] MatchError),
    #[error("can't parse timestamp {value:?} with layout {layout:?}")]
    Timestamp { value: String, layout: String },
    #[error("can't enqueue point: {0}")]
    Send(#[from] SendError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("point key must not be empty")]
    EmptyKey,
    #[error("delivery worker has shut down")]
    Closed,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("database {0} does not exist")]
    DatabaseNotFound(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("can't parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{0} must not be empty")]
    Missing(&'static str),
}
