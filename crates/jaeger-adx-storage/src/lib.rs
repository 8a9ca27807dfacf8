// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Azure Data Explorer span-storage backend.
//!
//! This crate translates the tracing collector's remote-storage contract
//! into parameterized analytic queries over an OpenTelemetry-formatted
//! trace table, and mirrors the write path as a worker pool feeding a
//! streaming-ingestion client.
//!
//! The layering is strict:
//! - [`params`] is the only producer of query text that embeds user data;
//! - [`query`] composes per-operation pipelines out of fixed stages and
//!   bound parameter names;
//! - [`decode`] and [`encode`] convert between result rows / ingestion
//!   records and the canonical domain span;
//! - [`reader`], [`writer`] and [`dependencies`] are the facades the host
//!   invokes, driving the store-client seams declared in [`client`].

pub mod client;
pub mod config;
pub mod decode;
pub mod dependencies;
pub mod encode;
pub mod error;
pub mod params;
pub mod query;
pub mod reader;
pub mod writer;

pub use config::AdxConfig;
pub use error::StorageError;
