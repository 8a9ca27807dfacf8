// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Read facade: the five span-retrieval operations the host invokes.
//!
//! The reader is stateless and safe for unlimited concurrent use; each
//! call builds its query, executes it through the shared store client,
//! and streams rows through the decoder. Store failures surface
//! unchanged. Per-row decode failures are logged with their trace and
//! span ids and drop only the offending row.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use jaeger_adx_model::{
    Operation, OperationQueryParameters, Span, Trace, TraceId, TraceQueryParameters,
};

use crate::client::{PreparedQuery, QueryClient, Row};
use crate::config::AdxConfig;
use crate::decode;
use crate::error::StorageError;
use crate::query::TraceQueryBuilder;

/// One reader per process; cheap to clone behind the shared client.
pub struct AdxSpanReader {
    client: Arc<dyn QueryClient>,
    builder: TraceQueryBuilder,
}

impl AdxSpanReader {
    pub fn new(client: Arc<dyn QueryClient>, config: &AdxConfig) -> Result<Self, StorageError> {
        Ok(AdxSpanReader {
            builder: TraceQueryBuilder::new(config)?,
            client,
        })
    }

    /// Executes a prepared query and decodes each row, observing
    /// cancellation at the store call and between rows. Row-scoped decode
    /// failures skip the row; anything else aborts the read.
    async fn collect_rows<T, F>(
        &self,
        query: PreparedQuery,
        token: &CancellationToken,
        decode_row: F,
    ) -> Result<Vec<T>, StorageError>
    where
        F: Fn(&Row) -> Result<T, StorageError>,
    {
        let operation = query.operation;
        debug!(operation, query = %query.text, "prepared query");

        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(StorageError::Cancelled),
            result = self.client.execute(query, token.clone()) => result?,
        };

        let mut items = Vec::new();
        let mut skipped = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(StorageError::Cancelled),
                next = stream.next() => next,
            };
            match next {
                None => break,
                Some(Err(err)) => return Err(err),
                Some(Ok(row)) => match decode_row(&row) {
                    Ok(item) => items.push(item),
                    Err(err) if err.is_row_scoped() => {
                        error!(operation, "dropping row: {err}");
                        skipped += 1;
                    }
                    Err(err) => return Err(err),
                },
            }
        }
        if skipped > 0 {
            warn!(operation, skipped, "dropped malformed rows");
        }
        Ok(items)
    }

    /// All spans of one trace, or `None` when the store has no rows for
    /// the id.
    pub async fn get_trace(
        &self,
        token: &CancellationToken,
        trace_id: TraceId,
    ) -> Result<Option<Trace>, StorageError> {
        let spans = self
            .collect_rows(self.builder.get_trace(&trace_id), token, decode::decode_span_row)
            .await?;
        if spans.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Trace { spans }))
        }
    }

    /// Distinct service names, in the store's ascending sort order.
    pub async fn get_services(
        &self,
        token: &CancellationToken,
    ) -> Result<Vec<String>, StorageError> {
        self.collect_rows(self.builder.get_services(), token, decode::decode_service_row)
            .await
    }

    /// Operation summaries for a service.
    pub async fn get_operations(
        &self,
        token: &CancellationToken,
        query: &OperationQueryParameters,
    ) -> Result<Vec<Operation>, StorageError> {
        self.collect_rows(
            self.builder.get_operations(query),
            token,
            decode::decode_operation_row,
        )
        .await
    }

    /// Trace ids matching the search specification.
    pub async fn find_trace_ids(
        &self,
        token: &CancellationToken,
        query: &TraceQueryParameters,
    ) -> Result<Vec<TraceId>, StorageError> {
        self.collect_rows(
            self.builder.find_trace_ids(query),
            token,
            decode::decode_trace_id_row,
        )
        .await
    }

    /// Trace bundles matching the search specification, grouped by trace
    /// id in first-seen order.
    pub async fn find_traces(
        &self,
        token: &CancellationToken,
        query: &TraceQueryParameters,
    ) -> Result<Vec<Trace>, StorageError> {
        let spans = self
            .collect_rows(self.builder.find_traces(query), token, decode::decode_span_row)
            .await?;
        Ok(group_spans_by_trace(spans))
    }
}

/// Groups decoded spans into trace bundles, preserving the order in
/// which trace ids first appeared in the row stream.
fn group_spans_by_trace(spans: Vec<Span>) -> Vec<Trace> {
    let mut traces: Vec<Trace> = Vec::new();
    let mut index_by_id: HashMap<TraceId, usize> = HashMap::new();
    for span in spans {
        match index_by_id.get(&span.trace_id) {
            Some(&at) => traces[at].spans.push(span),
            None => {
                index_by_id.insert(span.trace_id, traces.len());
                traces.push(Trace { spans: vec![span] });
            }
        }
    }
    traces
}

#[cfg(test)]
mod tests {
    use super::*;
    use jaeger_adx_model::Process;
    use time::macros::datetime;

    fn span(trace: u128, span: u64) -> Span {
        Span {
            trace_id: TraceId::new(trace),
            span_id: jaeger_adx_model::SpanId::new(span),
            operation_name: "op".to_string(),
            references: Vec::new(),
            flags: 0,
            start_time: datetime!(2023-01-29 06:00 UTC),
            duration: std::time::Duration::from_micros(1),
            tags: Vec::new(),
            logs: Vec::new(),
            process: Process::default(),
            process_id: String::new(),
        }
    }

    #[test]
    fn test_grouping_preserves_first_seen_order() {
        let traces = group_spans_by_trace(vec![
            span(2, 1),
            span(1, 2),
            span(2, 3),
            span(3, 4),
            span(1, 5),
        ]);
        let ids: Vec<u128> = traces
            .iter()
            .map(|t| t.spans[0].trace_id.to_u128())
            .collect();
        assert_eq!(ids, vec![2, 1, 3]);
        assert_eq!(traces[0].spans.len(), 2);
        assert_eq!(traces[1].spans.len(), 2);
        assert_eq!(traces[2].spans.len(), 1);
        // span order within a bundle follows row order
        assert_eq!(traces[0].spans[1].span_id.to_u64(), 3);
    }
}
