// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, trace};

use crate::errors::{ParseError, SendError};
use crate::grok::{PatternMatcher, Record};
use crate::pipeline::PointSender;
use crate::translate::{
    apply_filters, build_point, ChainOutcome, FilterSpec, NoMatchPolicy, TranslationSpec,
};

/// What happened to a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// A point was queued for delivery.
    Emitted,
    /// The primary pattern did not match.
    Unmatched,
    /// A filter rule did not validate and the line was dropped.
    Skipped,
}

/// Counters for one pass over an input stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseSummary {
    pub lines: u64,
    pub emitted: u64,
    pub unmatched: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Drives lines through match, filter chain and translation, then queues the points.
pub struct LineParser {
    matcher: Arc<dyn PatternMatcher>,
    translation: TranslationSpec,
    filters: Vec<FilterSpec>,
    tags: BTreeMap<String, String>,
    sender: PointSender,
    no_match: NoMatchPolicy,
    debug: bool,
}

impl LineParser {
    pub fn new(
        matcher: Arc<dyn PatternMatcher>,
        translation: TranslationSpec,
        filters: Vec<FilterSpec>,
        tags: BTreeMap<String, String>,
        sender: PointSender,
    ) -> Self {
        LineParser {
            matcher,
            translation,
            filters,
            tags,
            sender,
            no_match: NoMatchPolicy::default(),
            debug: false,
        }
    }

    #[must_use]
    pub fn with_no_match(mut self, no_match: NoMatchPolicy) -> Self {
        self.no_match = no_match;
        self
    }

    /// Logs every captured field of every record.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub async fn process_line(&self, line: &str) -> Result<LineOutcome, ParseError> {
        match self.matcher.parse(&self.translation.pattern, line)? {
            Some(record) => self.process_record(record).await,
            None => {
                debug!("Line does not match {}: {}", self.translation.pattern, line);
                Ok(LineOutcome::Unmatched)
            }
        }
    }

    /// Runs a record captured by the primary pattern through the rest of the pipeline.
    pub async fn process_record(&self, mut record: Record) -> Result<LineOutcome, ParseError> {
        if self.debug {
            let sorted: BTreeMap<_, _> = record.iter().collect();
            for (name, value) in sorted {
                info!("{}: {}", name, value);
            }
        }

        let fields = match apply_filters(
            self.matcher.as_ref(),
            &mut record,
            &self.translation,
            &self.filters,
            self.no_match,
        )? {
            ChainOutcome::Emit(fields) => fields,
            ChainOutcome::Skip { rule } => {
                debug!("Filter rule {} did not validate, skipping line", rule);
                return Ok(LineOutcome::Skipped);
            }
        };

        let point = build_point(&record, &self.translation, &fields, &self.tags)?;
        trace!("Queueing point {}", point.key);
        self.sender.send_point(point).await?;
        Ok(LineOutcome::Emitted)
    }

    /// Processes every line of `reader` until end of input.
    ///
    /// Failing lines, including lines that are not valid UTF-8, are logged and counted, and
    /// processing carries on with the next line. Only a
    /// stopped delivery worker ends the loop early since nothing could be delivered anymore.
    pub async fn parse<R>(&self, reader: R) -> io::Result<ParseSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut summary = ParseSummary::default();
        let mut reader = reader;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = match std::str::from_utf8(raw) {
                Ok(line) => line,
                Err(e) => {
                    summary.lines += 1;
                    summary.failed += 1;
                    error!(
                        "Failed to process line {}: not valid UTF-8: {}",
                        summary.lines, e
                    );
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            summary.lines += 1;

            match self.process_line(line).await {
                Ok(LineOutcome::Emitted) => summary.emitted += 1,
                Ok(LineOutcome::Unmatched) => summary.unmatched += 1,
                Ok(LineOutcome::Skipped) => summary.skipped += 1,
                Err(ParseError::Send(SendError::Closed)) => {
                    summary.failed += 1;
                    error!(
                        "Delivery worker has shut down, stopping after {} lines",
                        summary.lines
                    );
                    break;
                }
                Err(e) => {
                    summary.failed += 1;
                    error!("Failed to process line {}: {}", summary.lines, e);
                }
            }
        }

        debug!("Parsed input: {:?}", summary);
        Ok(summary)
    }
}
