// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use serde::Deserialize;

use crate::error::StorageError;
use crate::params;

const DEFAULT_WRITER_WORKERS: usize = 5;
const DEFAULT_WRITER_QUEUE_DEPTH: usize = 100;

fn default_writer_workers() -> usize {
    DEFAULT_WRITER_WORKERS
}

fn default_writer_queue_depth() -> usize {
    DEFAULT_WRITER_QUEUE_DEPTH
}

/// Backend configuration, loaded from a JSON file.
///
/// The endpoint and database are opaque to the core; they are handed to
/// whatever store client the host wires in. The table identifier is the
/// one value that is inlined into query text, so it is validated here,
/// before any query is built.
#[derive(Debug, Clone, Deserialize)]
pub struct AdxConfig {
    /// Cluster URI of the analytic store.
    pub endpoint: String,
    /// Database holding the trace table.
    pub database: String,
    /// Source table of OpenTelemetry-formatted trace rows.
    pub trace_table: String,
    /// Ask the store not to truncate large result sets.
    #[serde(default)]
    pub read_no_truncation: bool,
    /// Ask the store not to apply its default request timeout.
    #[serde(default)]
    pub read_no_timeout: bool,
    /// Number of ingestion workers; zero is rejected.
    #[serde(default = "default_writer_workers")]
    pub writer_workers: usize,
    /// Bound of the write submission channel; zero is rejected.
    #[serde(default = "default_writer_queue_depth")]
    pub writer_queue_depth: usize,
}

impl AdxConfig {
    /// Reads and validates a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<AdxConfig, StorageError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            StorageError::ConfigInvalid(format!(
                "cannot read config file {}: {err}",
                path.as_ref().display()
            ))
        })?;
        let config: AdxConfig = serde_json::from_str(&raw)
            .map_err(|err| StorageError::ConfigInvalid(format!("cannot parse config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects identifiers and sizes that must never reach the query
    /// builder or the worker pool.
    pub fn validate(&self) -> Result<(), StorageError> {
        params::validate_table_identifier(&self.trace_table)?;
        if self.writer_workers == 0 {
            return Err(StorageError::ConfigInvalid(
                "writer_workers must be greater than zero".to_string(),
            ));
        }
        if self.writer_queue_depth == 0 {
            return Err(StorageError::ConfigInvalid(
                "writer_queue_depth must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
