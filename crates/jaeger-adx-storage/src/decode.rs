// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Result row to domain span.
//!
//! Rows arrive with the projected column names (`TraceID`, `SpanID`,
//! `SpanName`, `StartTime`, `Duration`, `References`, `Tags`, `Logs`,
//! `ProcessServiceName`, `ProcessTags`). Dynamic columns are JSON values,
//! except `ProcessTags`, which by server-side convention can carry
//! pathological embedded arrays and is normalized as text before
//! parsing. Decoding is deterministic: the same row bytes always produce
//! the same span.

use std::time::Duration;

use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

use jaeger_adx_model::{
    KeyValue, Log, Operation, Process, Span, SpanRef, TagValue, TraceId,
};

use crate::client::Row;
use crate::encode::restore_tag_dots;
use crate::error::StorageError;

/// One span row as projected by the trace queries. Columns absent from
/// the stored schema (`Flags`, `ProcessID`) default to their zero values.
#[derive(Debug, Clone, Deserialize)]
pub struct SpanRow {
    #[serde(rename = "TraceID")]
    pub trace_id: String,
    #[serde(rename = "SpanID")]
    pub span_id: String,
    #[serde(rename = "SpanName", default)]
    pub span_name: String,
    #[serde(rename = "StartTime")]
    pub start_time: String,
    #[serde(rename = "Duration", default)]
    pub duration_micros: i64,
    #[serde(rename = "Flags", default)]
    pub flags: u32,
    #[serde(rename = "References", default)]
    pub references: serde_json::Value,
    #[serde(rename = "Tags", default)]
    pub tags: serde_json::Value,
    #[serde(rename = "Logs", default)]
    pub logs: serde_json::Value,
    #[serde(rename = "ProcessServiceName", default)]
    pub process_service_name: String,
    #[serde(rename = "ProcessTags", default)]
    pub process_tags: serde_json::Value,
    #[serde(rename = "ProcessID", default)]
    pub process_id: String,
}

#[derive(Debug, Deserialize)]
struct EventRow {
    #[serde(rename = "EventName", default)]
    event_name: String,
    #[serde(rename = "Timestamp", default)]
    timestamp: String,
    #[serde(rename = "EventAttributes", default)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

/// Service-call-graph row produced by the dependency aggregation.
#[derive(Debug, Clone, Deserialize)]
pub struct DependencyRow {
    #[serde(rename = "Parent")]
    pub parent: String,
    #[serde(rename = "Child")]
    pub child: String,
    #[serde(rename = "CallCount", default)]
    pub call_count: u64,
}

/// Normalization pass for the `ProcessTags` payload, reproducing the
/// upstream emitter workaround byte for byte:
/// 1. within `[ … ]` regions every `"` becomes `'`;
/// 2. `:[` becomes `:"[` and `],` becomes `]",`, turning embedded arrays
///    into string literals;
/// 3. `.` and `\` are stripped.
pub fn normalize_process_tags(raw: &str) -> String {
    let mut bytes = raw.as_bytes().to_vec();
    let mut inside_brackets = false;
    for byte in &mut bytes {
        match *byte {
            b'[' => inside_brackets = true,
            b']' => inside_brackets = false,
            b'"' if inside_brackets => *byte = b'\'',
            _ => {}
        }
    }

    let mut out = Vec::with_capacity(bytes.len() + 8);
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b":[") {
            out.extend_from_slice(b":\"[");
            i += 2;
        } else if bytes[i..].starts_with(b"],") {
            out.extend_from_slice(b"]\",");
            i += 2;
        } else if bytes[i] == b'.' || bytes[i] == b'\\' {
            i += 1;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Resolves a dynamic column that may arrive either as a JSON value or
/// as JSON text.
fn dynamic_value(value: &serde_json::Value) -> Result<serde_json::Value, serde_json::Error> {
    match value {
        serde_json::Value::String(text) => serde_json::from_str(text),
        other => Ok(other.clone()),
    }
}

/// Textual form of a dynamic column, as needed by the process-tags
/// normalization.
fn dynamic_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn decode_references(row: &SpanRow) -> Result<Vec<SpanRef>, StorageError> {
    if row.references.is_null() {
        return Ok(Vec::new());
    }
    let value = dynamic_value(&row.references).map_err(|err| {
        StorageError::ReferencesMalformed(format!(
            "trace {} span {}: {err}",
            row.trace_id, row.span_id
        ))
    })?;
    serde_json::from_value(value).map_err(|err| {
        StorageError::ReferencesMalformed(format!(
            "trace {} span {}: {err}",
            row.trace_id, row.span_id
        ))
    })
}

/// Key-value decoding shared by span tags and process tags: keys get the
/// inverse dot substitution, JSON array (and object) values are replaced
/// by their textual form, scalars keep their native type. Null values
/// have no tag representation and are dropped.
fn object_to_tags(object: &serde_json::Map<String, serde_json::Value>) -> Vec<KeyValue> {
    let mut tags = Vec::with_capacity(object.len());
    for (key, value) in object {
        if let Some(tag_value) = TagValue::from_json_value(value) {
            tags.push(KeyValue::new(restore_tag_dots(key), tag_value));
        }
    }
    tags
}

fn decode_tags(row: &SpanRow) -> Result<Vec<KeyValue>, StorageError> {
    if row.tags.is_null() {
        return Ok(Vec::new());
    }
    let value = dynamic_value(&row.tags).map_err(|err| {
        StorageError::RowMalformed(format!(
            "tags of trace {} span {}: {err}",
            row.trace_id, row.span_id
        ))
    })?;
    match value {
        serde_json::Value::Object(object) => Ok(object_to_tags(&object)),
        other => Err(StorageError::RowMalformed(format!(
            "tags of trace {} span {} are not an object: {other}",
            row.trace_id, row.span_id
        ))),
    }
}

fn decode_logs(row: &SpanRow) -> Result<Vec<Log>, StorageError> {
    if row.logs.is_null() {
        return Ok(Vec::new());
    }
    let value = dynamic_value(&row.logs).map_err(|err| {
        StorageError::RowMalformed(format!(
            "logs of trace {} span {}: {err}",
            row.trace_id, row.span_id
        ))
    })?;
    let events: Vec<EventRow> = serde_json::from_value(value).map_err(|err| {
        StorageError::RowMalformed(format!(
            "logs of trace {} span {}: {err}",
            row.trace_id, row.span_id
        ))
    })?;

    let mut logs = Vec::with_capacity(events.len());
    for event in events {
        let mut timestamp_micros = 0u64;
        if !event.timestamp.is_empty() {
            match OffsetDateTime::parse(&event.timestamp, &Rfc3339) {
                Ok(ts) => {
                    timestamp_micros = (ts.unix_timestamp_nanos() / 1_000).max(0) as u64;
                }
                Err(err) => {
                    warn!(
                        trace_id = %row.trace_id,
                        span_id = %row.span_id,
                        timestamp = %event.timestamp,
                        "cannot parse log timestamp: {err}"
                    );
                }
            }
        }

        let mut fields = Vec::with_capacity(event.attributes.len() + 1);
        fields.push(KeyValue::string("event", event.event_name));
        for (key, value) in &event.attributes {
            if let Some(tag_value) = TagValue::from_json_value(value) {
                fields.push(KeyValue::new(key.clone(), tag_value));
            }
        }
        logs.push(Log {
            timestamp_micros,
            fields,
        });
    }
    Ok(logs)
}

fn decode_process_tags(row: &SpanRow) -> Result<Vec<KeyValue>, StorageError> {
    if row.process_tags.is_null() {
        return Ok(Vec::new());
    }
    let normalized = normalize_process_tags(&dynamic_text(&row.process_tags));
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&normalized)
        .map_err(|err| {
            StorageError::ProcessTagsMalformed(format!(
                "trace {} span {}: {err} (normalized: {normalized})",
                row.trace_id, row.span_id
            ))
        })?;
    Ok(object_to_tags(&object))
}

/// Decodes one result row into a canonical span.
pub fn decode_span_row(row: &Row) -> Result<Span, StorageError> {
    let raw: SpanRow = serde_json::from_value(serde_json::Value::Object(row.clone()))
        .map_err(|err| StorageError::RowMalformed(format!("unexpected row shape: {err}")))?;
    decode_span(&raw)
}

/// Decodes an already-typed span row.
pub fn decode_span(row: &SpanRow) -> Result<Span, StorageError> {
    let trace_id: TraceId = row
        .trace_id
        .parse()
        .map_err(|err| StorageError::RowMalformed(format!("{err}")))?;
    let span_id = row
        .span_id
        .parse()
        .map_err(|err| StorageError::RowMalformed(format!("trace {}: {err}", row.trace_id)))?;
    let start_time = OffsetDateTime::parse(&row.start_time, &Rfc3339).map_err(|err| {
        StorageError::RowMalformed(format!(
            "start time of trace {} span {}: {err}",
            row.trace_id, row.span_id
        ))
    })?;

    let references = decode_references(row)?;
    let tags = decode_tags(row)?;
    let logs = decode_logs(row)?;
    let process_tags = decode_process_tags(row)?;

    Ok(Span {
        trace_id,
        span_id,
        operation_name: row.span_name.clone(),
        references,
        flags: row.flags,
        start_time,
        duration: Duration::from_micros(row.duration_micros.max(0) as u64),
        tags,
        logs,
        process: Process::new(row.process_service_name.clone(), process_tags),
        process_id: row.process_id.clone(),
    })
}

/// Decodes a `GetServices` row.
pub fn decode_service_row(row: &Row) -> Result<String, StorageError> {
    match row.get("ProcessServiceName") {
        Some(serde_json::Value::String(name)) => Ok(name.clone()),
        other => Err(StorageError::RowMalformed(format!(
            "unexpected service row: {other:?}"
        ))),
    }
}

/// Decodes a `GetOperations` row.
pub fn decode_operation_row(row: &Row) -> Result<Operation, StorageError> {
    let name = match row.get("OperationName") {
        Some(serde_json::Value::String(name)) => name.clone(),
        other => {
            return Err(StorageError::RowMalformed(format!(
                "unexpected operation row: {other:?}"
            )))
        }
    };
    let span_kind = match row.get("SpanKind") {
        Some(serde_json::Value::String(kind)) => kind.clone(),
        _ => String::new(),
    };
    Ok(Operation { name, span_kind })
}

/// Decodes a `FindTraceIDs` row.
pub fn decode_trace_id_row(row: &Row) -> Result<TraceId, StorageError> {
    match row.get("TraceID") {
        Some(serde_json::Value::String(id)) => id
            .parse()
            .map_err(|err| StorageError::RowMalformed(format!("{err}"))),
        other => Err(StorageError::RowMalformed(format!(
            "unexpected trace id row: {other:?}"
        ))),
    }
}

/// Decodes a `GetDependencies` row.
pub fn decode_dependency_row(row: &Row) -> Result<DependencyRow, StorageError> {
    serde_json::from_value(serde_json::Value::Object(row.clone()))
        .map_err(|err| StorageError::RowMalformed(format!("unexpected dependency row: {err}")))
}
