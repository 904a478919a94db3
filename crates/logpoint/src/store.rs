// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::batch::Batch;
use crate::errors::StoreError;

/// Capability the delivery pipeline needs from a time-series store.
#[async_trait]
pub trait StoreClient: Send + Sync + 'static {
    /// Checks the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Fails with [`StoreError::DatabaseNotFound`] when `database` does not exist.
    async fn verify_database(&self, database: &str) -> Result<(), StoreError>;

    /// Writes every point of the batch in one request.
    async fn write(&self, batch: &Batch) -> Result<(), StoreError>;

    /// Human readable address, used in logs and errors.
    fn address(&self) -> String;
}
