// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Write facade: a bounded worker pool feeding the ingestion client.
//!
//! Spans are submitted with the caller's cancellation token and queue on
//! a bounded channel; submission blocks when the pool is saturated,
//! observing cancellation. N stateless workers each encode one span and
//! hand the record to the ingestion client. A write is acknowledged only
//! after the client accepts the row.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use jaeger_adx_model::Span;

use crate::client::IngestClient;
use crate::config::AdxConfig;
use crate::encode::encode_span;
use crate::error::StorageError;

struct WriteJob {
    span: Span,
    token: CancellationToken,
    ack: oneshot::Sender<Result<(), StorageError>>,
}

/// Worker pool writing spans to the ingestion client.
#[derive(Debug)]
pub struct AdxSpanWriter {
    submit: mpsc::Sender<WriteJob>,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl AdxSpanWriter {
    /// Spawns the configured number of workers. Pool and queue sizes of
    /// zero are rejected.
    pub fn new(client: Arc<dyn IngestClient>, config: &AdxConfig) -> Result<Self, StorageError> {
        config.validate()?;

        let (submit, receiver) = mpsc::channel::<WriteJob>(config.writer_queue_depth);
        let receiver = Arc::new(Mutex::new(receiver));
        let shutdown = CancellationToken::new();

        let mut workers = Vec::with_capacity(config.writer_workers);
        for worker_id in 0..config.writer_workers {
            let client = Arc::clone(&client);
            let receiver = Arc::clone(&receiver);
            let shutdown = shutdown.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(worker_id, client, receiver, shutdown).await;
            }));
        }

        Ok(AdxSpanWriter {
            submit,
            shutdown,
            workers,
        })
    }

    /// Submits one span and waits for the ingestion acknowledgement.
    /// Returns `Cancelled` without acknowledgement when the caller's
    /// token fires first, whether the job was still queued or in flight.
    pub async fn write_span(
        &self,
        token: &CancellationToken,
        span: Span,
    ) -> Result<(), StorageError> {
        let (ack, acked) = oneshot::channel();
        let job = WriteJob {
            span,
            token: token.clone(),
            ack,
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(StorageError::Cancelled),
            sent = self.submit.send(job) => {
                sent.map_err(|_| {
                    StorageError::StoreUnavailable("span writer pool is stopped".to_string())
                })?;
            }
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(StorageError::Cancelled),
            acked = acked => acked.unwrap_or_else(|_| {
                Err(StorageError::StoreUnavailable(
                    "span writer pool dropped the write".to_string(),
                ))
            }),
        }
    }

    /// Stops the workers. Queued but unstarted jobs are acknowledged
    /// with `Cancelled` once their submitters observe the dropped
    /// channel; in-flight ingestions run to completion.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        drop(self.submit);
        for worker in self.workers {
            if let Err(err) = worker.await {
                error!("span writer worker panicked: {err}");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    client: Arc<dyn IngestClient>,
    receiver: Arc<Mutex<mpsc::Receiver<WriteJob>>>,
    shutdown: CancellationToken,
) {
    loop {
        // hold the receiver lock only while dequeuing
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                job = receiver.recv() => job,
            }
        };
        let Some(job) = job else {
            debug!(worker_id, "span writer worker stopping");
            return;
        };

        if job.token.is_cancelled() {
            let _ = job.ack.send(Err(StorageError::Cancelled));
            continue;
        }

        let record = match encode_span(&job.span) {
            Ok(record) => record,
            Err(err) => {
                error!(worker_id, trace_id = %job.span.trace_id, "cannot encode span: {err}");
                let _ = job.ack.send(Err(err));
                continue;
            }
        };

        let result = tokio::select! {
            biased;
            _ = job.token.cancelled() => Err(StorageError::Cancelled),
            result = client.ingest(record, job.token.clone()) => result,
        };
        let _ = job.ack.send(result);
    }
}
