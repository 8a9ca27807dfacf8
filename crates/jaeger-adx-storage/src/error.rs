// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced by the storage backend.
///
/// Store-level failures (`StoreUnavailable`, `QueryRejected`) propagate to
/// the host unchanged. The per-row kinds (`RowMalformed`,
/// `ProcessTagsMalformed`, `ReferencesMalformed`) abort only the row that
/// produced them; the reader logs them and keeps consuming the stream.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Transport or authorization failure talking to the analytic store.
    #[error("analytic store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store rejected the query (server-side syntax or limits).
    #[error("query rejected by store: {0}")]
    QueryRejected(String),

    /// The decoder could not produce a span from a result row.
    #[error("malformed row: {0}")]
    RowMalformed(String),

    /// The process-tags payload could not be normalized into an object.
    #[error("malformed process tags: {0}")]
    ProcessTagsMalformed(String),

    /// The references payload could not be decoded.
    #[error("malformed references: {0}")]
    ReferencesMalformed(String),

    /// The caller's context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Rejected configuration value, e.g. an invalid table identifier or
    /// a zero-sized worker pool.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl StorageError {
    /// True for the kinds that abort a single row rather than the whole
    /// read operation.
    pub fn is_row_scoped(&self) -> bool {
        matches!(
            self,
            StorageError::RowMalformed(_)
                | StorageError::ProcessTagsMalformed(_)
                | StorageError::ReferencesMalformed(_)
        )
    }
}
