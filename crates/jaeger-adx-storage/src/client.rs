// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Seams to the analytic store.
//!
//! The storage backend never talks to a cluster directly; the host wires
//! in implementations of [`QueryClient`] and [`IngestClient`]. Both are
//! shared, thread-safe objects taken as `Arc<dyn …>` by the facades. The
//! test suite substitutes mock implementations that capture the prepared
//! queries.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;
use crate::params::ParamValue;

/// One result row: a JSON-shaped object keyed by the projected column
/// names. Dynamic columns arrive as their JSON value (or, for known
/// server-side malformations, as text).
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Async iterator over result rows. Yielding an `Err` terminates the
/// read; the reader surfaces store errors unchanged.
pub type RowStream = Pin<Box<dyn Stream<Item = Result<Row, StorageError>> + Send>>;

/// Client-request options forwarded with every read. These alter
/// transport behavior only and never appear in query text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientRequestOptions {
    /// Ask the store not to truncate large result sets.
    pub no_truncation: bool,
    /// Ask the store not to apply its default request timeout.
    pub no_request_timeout: bool,
}

/// A fully prepared read: query text, the named-parameter map in
/// declaration order, and transport options.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    /// Short operation label, for logs.
    pub operation: &'static str,
    pub text: String,
    pub parameters: Vec<(String, ParamValue)>,
    pub options: ClientRequestOptions,
}

impl PreparedQuery {
    /// Looks up a bound parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// The 12-field positional record handed to streaming ingestion, in
/// column order:
/// `TraceID, SpanID, OperationName, References, Flags, StartTime,
/// Duration, Tags, Logs, ProcessServiceName, ProcessTags, ProcessID`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRecord {
    pub fields: [String; 12],
}

impl IngestRecord {
    /// CSV-shaped line for clients that ingest textual payloads. Fields
    /// containing commas, quotes or newlines are double-quoted.
    pub fn to_csv_line(&self) -> String {
        self.fields
            .iter()
            .map(|field| {
                if field.contains(',') || field.contains('"') || field.contains('\n') {
                    format!("\"{}\"", field.replace('"', "\"\""))
                } else {
                    field.clone()
                }
            })
            .collect::<Vec<String>>()
            .join(",")
    }
}

/// Executes parameterized analytic queries.
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn execute(
        &self,
        query: PreparedQuery,
        token: CancellationToken,
    ) -> Result<RowStream, StorageError>;
}

/// Streams rows into the configured ingestion table.
#[async_trait]
pub trait IngestClient: Send + Sync {
    async fn ingest(
        &self,
        record: IngestRecord,
        token: CancellationToken,
    ) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_line_quotes_embedded_commas() {
        let mut fields: [String; 12] = Default::default();
        fields[0] = "abc".to_string();
        fields[3] = r#"[{"refType":"CHILD_OF"}]"#.to_string();
        let record = IngestRecord { fields };
        let line = record.to_csv_line();
        assert!(line.starts_with("abc,,,\"[{\"\"refType\"\":\"\"CHILD_OF\"\"}]\","));
    }

    #[test]
    fn test_parameter_lookup() {
        let query = PreparedQuery {
            operation: "GetTrace",
            text: "T".to_string(),
            parameters: vec![(
                "ParamTraceID".to_string(),
                ParamValue::String("abc".to_string()),
            )],
            options: ClientRequestOptions::default(),
        };
        assert_eq!(
            query.parameter("ParamTraceID"),
            Some(&ParamValue::String("abc".to_string()))
        );
        assert!(query.parameter("ParamSpanName").is_none());
    }
}
