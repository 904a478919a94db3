// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logpoint::{
    config::Config, grok::Grok, influx::InfluxClient, parser::LineParser,
    pipeline::DeliveryService,
};
use tokio_util::sync::CancellationToken;

const DEFAULT_CONFIG_PATH: &str = "logpoint.json";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOGPOINT_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config_path = env::var("LOGPOINT_CONFIG").unwrap_or(DEFAULT_CONFIG_PATH.to_string());
    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!("Error loading config from {config_path}: {e}");
            return;
        }
    };

    let mut grok = Grok::new();
    grok.add_patterns(config.patterns.clone());

    let client = match InfluxClient::new(&config.influx) {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating InfluxDB client: {e}");
            return;
        }
    };

    let cancel_token = CancellationToken::new();
    let (service, sender) = match DeliveryService::new(
        client,
        &config.influx.database,
        config.pipeline(),
        cancel_token.clone(),
    )
    .await
    {
        Ok(s) => s,
        Err(e) => {
            error!("Error starting delivery service: {e}");
            return;
        }
    };
    let worker = tokio::spawn(service.run());

    let parser = LineParser::new(
        Arc::new(grok),
        config.translation,
        config.filters,
        config.tags,
        sender.clone(),
    )
    .with_no_match(config.no_match)
    .with_debug(config.debug);

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match env::var("LOGPOINT_INPUT") {
        Ok(path) => match tokio::fs::File::open(&path).await {
            Ok(file) => Box::new(BufReader::new(file)),
            Err(e) => {
                error!("Error opening input {path}: {e}");
                cancel_token.cancel();
                let _ = worker.await;
                return;
            }
        },
        Err(_) => Box::new(BufReader::new(tokio::io::stdin())),
    };

    info!("Reading log lines, writing to {}", config.influx.database);

    tokio::select! {
        result = parser.parse(reader) => match result {
            Ok(summary) => info!(
                "Input finished: {} lines, {} points, {} unmatched, {} skipped, {} failed",
                summary.lines, summary.emitted, summary.unmatched, summary.skipped, summary.failed
            ),
            Err(e) => error!("Error reading input: {e}"),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, flushing pending points");
        }
    }

    // Cancelling drains the queue, so points already accepted are still written.
    cancel_token.cancel();
    drop(parser);
    if let Err(e) = worker.await {
        error!("Delivery service failed: {e}");
        return;
    }
    let stats = sender.stats();
    info!(
        "Delivered {} of {} points in {} batches, {} failed writes",
        stats.points_written, stats.points_accepted, stats.batches_written, stats.write_failures
    );
}

fn load_config(path: &str) -> Result<Config, logpoint::errors::ConfigError> {
    let mut config = Config::from_file(path)?;
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}
