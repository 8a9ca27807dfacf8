// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock store clients that capture the prepared queries and serve canned
//! rows.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use jaeger_adx_storage::client::{
    IngestClient, IngestRecord, PreparedQuery, QueryClient, Row, RowStream,
};
use jaeger_adx_storage::error::StorageError;

/// Query client returning the same canned rows for every call and
/// recording each prepared query.
#[derive(Default)]
pub struct MockQueryClient {
    pub rows: Mutex<Vec<Row>>,
    pub captured: Mutex<Vec<PreparedQuery>>,
    /// When set, `execute` fails with `QueryRejected` carrying this text.
    pub reject_with: Mutex<Option<String>>,
    /// When set, the returned stream never ends after the canned rows.
    pub hang_after_rows: bool,
}

impl MockQueryClient {
    pub fn with_rows(rows: Vec<Row>) -> Self {
        MockQueryClient {
            rows: Mutex::new(rows),
            ..Default::default()
        }
    }

    pub fn last_query(&self) -> PreparedQuery {
        self.captured
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no query was executed")
    }
}

#[async_trait]
impl QueryClient for MockQueryClient {
    async fn execute(
        &self,
        query: PreparedQuery,
        _token: CancellationToken,
    ) -> Result<RowStream, StorageError> {
        self.captured.lock().unwrap().push(query);
        if let Some(message) = self.reject_with.lock().unwrap().clone() {
            return Err(StorageError::QueryRejected(message));
        }
        let rows = self.rows.lock().unwrap().clone();
        let canned = futures::stream::iter(rows.into_iter().map(Ok));
        if self.hang_after_rows {
            Ok(Box::pin(canned.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(canned))
        }
    }
}

/// Ingestion client recording every accepted record.
#[derive(Default)]
pub struct MockIngestClient {
    pub records: Mutex<Vec<IngestRecord>>,
}

#[async_trait]
impl IngestClient for MockIngestClient {
    async fn ingest(
        &self,
        record: IngestRecord,
        _token: CancellationToken,
    ) -> Result<(), StorageError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}
