// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Canonical trace domain model.
//!
//! These types are the contract between the tracing host and the storage
//! backend: spans flow in through the writer as [`Span`] values and come
//! back out of the reader as [`Trace`] bundles. Identifiers render as
//! lowercase hex strings, timestamps are absolute UTC instants, and span
//! durations are microsecond-precision.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;

/// Errors produced when parsing trace or span identifiers from their hex
/// string rendering.
#[derive(Debug, thiserror::Error)]
pub enum IdParseError {
    #[error("invalid trace id {0:?}: expected 1-32 hex characters")]
    TraceId(String),

    #[error("invalid span id {0:?}: expected 1-16 hex characters")]
    SpanId(String),
}

/// 128-bit trace identifier, rendered as a lowercase hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

impl TraceId {
    pub const fn new(raw: u128) -> Self {
        TraceId(raw)
    }

    pub const fn to_u128(self) -> u128 {
        self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for TraceId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 32 {
            return Err(IdParseError::TraceId(s.to_string()));
        }
        u128::from_str_radix(s, 16)
            .map(TraceId)
            .map_err(|_| IdParseError::TraceId(s.to_string()))
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TraceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// 64-bit span identifier, rendered as a lowercase hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl SpanId {
    pub const fn new(raw: u64) -> Self {
        SpanId(raw)
    }

    pub const fn to_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 16 {
            return Err(IdParseError::SpanId(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(SpanId)
            .map_err(|_| IdParseError::SpanId(s.to_string()))
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SpanId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Typed edge between two spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefType {
    #[serde(rename = "CHILD_OF")]
    ChildOf,
    #[serde(rename = "FOLLOWS_FROM")]
    FollowsFrom,
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefType::ChildOf => f.write_str("CHILD_OF"),
            RefType::FollowsFrom => f.write_str("FOLLOWS_FROM"),
        }
    }
}

/// A reference from one span to another, e.g. the synthesized CHILD_OF
/// edge pointing at a span's parent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpanRef {
    #[serde(rename = "refType")]
    pub ref_type: RefType,
    #[serde(rename = "traceID")]
    pub trace_id: TraceId,
    #[serde(rename = "spanID")]
    pub span_id: SpanId,
}

/// Tag value variants. The concrete variant of a decoded tag is chosen
/// from the runtime type the JSON decoder reports; no cross-row schema is
/// assumed.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    String(String),
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Binary(Vec<u8>),
}

impl TagValue {
    /// Lower-case name of the concrete value type, as recorded in typed
    /// key-value wire renderings.
    pub fn type_name(&self) -> &'static str {
        match self {
            TagValue::String(_) => "string",
            TagValue::Bool(_) => "bool",
            TagValue::Int64(_) => "int64",
            TagValue::Float64(_) => "float64",
            TagValue::Binary(_) => "binary",
        }
    }

    /// JSON rendering used for dynamic-column payloads. Binary values are
    /// hex encoded since JSON has no byte-string type.
    pub fn to_json_value(&self) -> serde_json::Value {
        match self {
            TagValue::String(s) => serde_json::Value::String(s.clone()),
            TagValue::Bool(b) => serde_json::Value::Bool(*b),
            TagValue::Int64(i) => serde_json::Value::from(*i),
            TagValue::Float64(f) => serde_json::Value::from(*f),
            TagValue::Binary(b) => {
                serde_json::Value::String(data_encoding::HEXLOWER.encode(b))
            }
        }
    }

    /// Inverse of [`TagValue::to_json_value`] for the scalar variants.
    /// JSON arrays and objects are replaced by their textual form; null
    /// has no tag representation and yields `None`.
    pub fn from_json_value(value: &serde_json::Value) -> Option<TagValue> {
        match value {
            serde_json::Value::String(s) => Some(TagValue::String(s.clone())),
            serde_json::Value::Bool(b) => Some(TagValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(TagValue::Int64(i))
                } else {
                    n.as_f64().map(TagValue::Float64)
                }
            }
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                Some(TagValue::String(value.to_string()))
            }
            serde_json::Value::Null => None,
        }
    }
}

/// Typed key-value pair used for span tags, process tags and log fields.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: TagValue,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: TagValue) -> Self {
        KeyValue {
            key: key.into(),
            value,
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        KeyValue::new(key, TagValue::String(value.into()))
    }
}

/// One timed event on a span. The first field of a decoded log carries
/// the event name under the key `event`.
#[derive(Debug, Clone, PartialEq)]
pub struct Log {
    /// Microseconds since the Unix epoch; zero when the source timestamp
    /// was absent or unparseable.
    pub timestamp_micros: u64,
    pub fields: Vec<KeyValue>,
}

/// The service context a span was produced in.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Process {
    pub service_name: String,
    pub tags: Vec<KeyValue>,
}

impl Process {
    pub fn new(service_name: impl Into<String>, tags: Vec<KeyValue>) -> Self {
        Process {
            service_name: service_name.into(),
            tags,
        }
    }
}

/// One operation in a distributed trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub operation_name: String,
    pub references: Vec<SpanRef>,
    pub flags: u32,
    pub start_time: OffsetDateTime,
    pub duration: Duration,
    pub tags: Vec<KeyValue>,
    pub logs: Vec<Log>,
    pub process: Process,
    /// Process identifier carried on the ingestion record; empty when the
    /// producing host did not assign one.
    pub process_id: String,
}

/// The set of spans sharing a trace id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trace {
    pub spans: Vec<Span>,
}

/// Operation summary returned by the operation listing: a span name plus
/// the kind it was recorded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub name: String,
    pub span_kind: String,
}

/// Aggregated service-call-graph edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyLink {
    pub parent: String,
    pub child: String,
    pub call_count: u64,
}

/// Trace search specification.
///
/// Empty strings mean "unset" for the service and operation filters, as
/// do `None` duration bounds; the time window is always present. Tags are
/// ordered so the generated query text is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceQueryParameters {
    pub service_name: String,
    pub operation_name: String,
    pub start_time_min: OffsetDateTime,
    pub start_time_max: OffsetDateTime,
    pub duration_min: Option<Duration>,
    pub duration_max: Option<Duration>,
    pub tags: BTreeMap<String, String>,
    pub num_traces: u32,
}

impl Default for TraceQueryParameters {
    fn default() -> Self {
        TraceQueryParameters {
            service_name: String::new(),
            operation_name: String::new(),
            start_time_min: OffsetDateTime::UNIX_EPOCH,
            start_time_max: OffsetDateTime::UNIX_EPOCH,
            duration_min: None,
            duration_max: None,
            tags: BTreeMap::new(),
            num_traces: 0,
        }
    }
}

/// Inputs to the operation listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperationQueryParameters {
    pub service_name: String,
    /// Optional span-kind filter; empty means "all kinds".
    pub span_kind: String,
}
