// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Service-call-graph reader.
//!
//! Runs the dependency aggregation and materializes
//! `{parent, child, callCount}` links. Same-service edges are rejected
//! and at most one link per ordered pair is returned, regardless of what
//! the store hands back.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use jaeger_adx_model::DependencyLink;

use crate::client::QueryClient;
use crate::config::AdxConfig;
use crate::decode::{decode_dependency_row, DependencyRow};
use crate::error::StorageError;
use crate::query::TraceQueryBuilder;

pub struct AdxDependencyReader {
    client: Arc<dyn QueryClient>,
    builder: TraceQueryBuilder,
}

impl AdxDependencyReader {
    pub fn new(client: Arc<dyn QueryClient>, config: &AdxConfig) -> Result<Self, StorageError> {
        Ok(AdxDependencyReader {
            builder: TraceQueryBuilder::new(config)?,
            client,
        })
    }

    /// Aggregated call edges for the window `(end_time - lookback,
    /// end_time)`.
    pub async fn get_dependencies(
        &self,
        token: &CancellationToken,
        end_time: OffsetDateTime,
        lookback: Duration,
    ) -> Result<Vec<DependencyLink>, StorageError> {
        let query = self.builder.get_dependencies(end_time, lookback);
        debug!(operation = query.operation, query = %query.text, "prepared query");

        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(StorageError::Cancelled),
            result = self.client.execute(query, token.clone()) => result?,
        };

        let mut rows = Vec::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(StorageError::Cancelled),
                next = stream.next() => next,
            };
            match next {
                None => break,
                Some(Err(err)) => return Err(err),
                Some(Ok(row)) => match decode_dependency_row(&row) {
                    Ok(dependency) => rows.push(dependency),
                    Err(err) => {
                        warn!("dropping dependency row: {err}");
                    }
                },
            }
        }
        Ok(collapse_links(rows))
    }
}

/// Drops self-edges and keeps the first link seen per ordered
/// `(parent, child)` pair.
fn collapse_links(rows: Vec<DependencyRow>) -> Vec<DependencyLink> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut links = Vec::with_capacity(rows.len());
    for row in rows {
        if row.parent == row.child {
            warn!(service = %row.parent, "dropping self-referential dependency edge");
            continue;
        }
        if !seen.insert((row.parent.clone(), row.child.clone())) {
            continue;
        }
        links.push(DependencyLink {
            parent: row.parent,
            child: row.child,
            call_count: row.call_count,
        });
    }
    links
}
