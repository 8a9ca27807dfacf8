// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Domain span to ingestion record.
//!
//! The writer hands each span to [`encode_span`], which renders the
//! 12-field positional record for streaming ingestion. Tag and process
//! tag keys containing `.` are substituted with the fixed replacement
//! character; the inverse mapping happens on read.

use std::time::Duration;

use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use jaeger_adx_model::{KeyValue, Log, Span, TagValue};

use crate::client::IngestRecord;
use crate::error::StorageError;

/// Replacement character for `.` in tag keys stored in dynamic columns.
pub const TAG_DOT_REPLACEMENT: char = '_';

/// Substitutes the dot-replacement character into a tag key at encode
/// time.
pub fn replace_tag_dots(key: &str) -> String {
    key.replace('.', &TAG_DOT_REPLACEMENT.to_string())
}

/// Inverse substitution applied when materializing decoded tag keys.
pub fn restore_tag_dots(key: &str) -> String {
    key.replace(TAG_DOT_REPLACEMENT, ".")
}

/// Renders a duration as an analytic timespan literal:
/// `[d.]hh:mm:ss[.fffffff]`, fractional part in 100ns ticks, days prefix
/// only when at least one full day.
pub fn format_timespan(duration: Duration) -> String {
    let ticks = duration.as_nanos() / 100;
    let fraction = (ticks % 10_000_000) as u64;
    let total_seconds = (ticks / 10_000_000) as u64;
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days}."));
    }
    out.push_str(&format!("{hours:02}:{minutes:02}:{seconds:02}"));
    if fraction > 0 {
        out.push_str(&format!(".{fraction:07}"));
    }
    out
}

fn format_rfc3339(ts: OffsetDateTime) -> Result<String, StorageError> {
    ts.to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .map_err(|err| StorageError::RowMalformed(format!("unrepresentable timestamp: {err}")))
}

/// Typed key-values rendered as a JSON object, with dot-substituted keys.
fn tags_object(tags: &[KeyValue]) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    for tag in tags {
        object.insert(replace_tag_dots(&tag.key), tag.value.to_json_value());
    }
    serde_json::Value::Object(object)
}

/// Logs rendered in the event shape the read path decodes: the synthetic
/// `event` field becomes `EventName`, the rest become `EventAttributes`.
fn logs_array(logs: &[Log]) -> Result<serde_json::Value, StorageError> {
    let mut events = Vec::with_capacity(logs.len());
    for log in logs {
        let event_name = match log.fields.first() {
            Some(KeyValue {
                key,
                value: TagValue::String(name),
            }) if key == "event" => Some(name.clone()),
            _ => None,
        };
        let attributes = if event_name.is_some() {
            &log.fields[1..]
        } else {
            &log.fields[..]
        };
        let mut attribute_object = serde_json::Map::new();
        for field in attributes {
            attribute_object.insert(field.key.clone(), field.value.to_json_value());
        }
        let timestamp = if log.timestamp_micros == 0 {
            String::new()
        } else {
            let nanos = i128::from(log.timestamp_micros) * 1_000;
            let ts = OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(|err| {
                StorageError::RowMalformed(format!("unrepresentable log timestamp: {err}"))
            })?;
            format_rfc3339(ts)?
        };
        events.push(serde_json::json!({
            "EventName": event_name.unwrap_or_default(),
            "Timestamp": timestamp,
            "EventAttributes": serde_json::Value::Object(attribute_object),
        }));
    }
    Ok(serde_json::Value::Array(events))
}

/// Encodes one span into the positional ingestion record. The input span
/// is borrowed and never mutated.
pub fn encode_span(span: &Span) -> Result<IngestRecord, StorageError> {
    let references = serde_json::Value::Array(
        span.references
            .iter()
            .map(|reference| {
                serde_json::json!({
                    "refType": reference.ref_type.to_string(),
                    "traceID": reference.trace_id.to_string(),
                    "spanID": reference.span_id.to_string(),
                })
            })
            .collect(),
    );

    let fields = [
        span.trace_id.to_string(),
        span.span_id.to_string(),
        span.operation_name.clone(),
        references.to_string(),
        span.flags.to_string(),
        format_rfc3339(span.start_time)?,
        format_timespan(span.duration),
        tags_object(&span.tags).to_string(),
        logs_array(&span.logs)?.to_string(),
        span.process.service_name.clone(),
        tags_object(&span.process.tags).to_string(),
        span.process_id.clone(),
    ];
    Ok(IngestRecord { fields })
}
