// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use time::macros::datetime;

use jaeger_adx_model::{
    KeyValue, Log, Process, Span, SpanId, TagValue, TraceQueryParameters,
};
use jaeger_adx_storage::client::Row;
use jaeger_adx_storage::config::AdxConfig;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn test_config() -> AdxConfig {
    AdxConfig {
        endpoint: "https://cluster.region.kusto.windows.net".to_string(),
        database: "tracesdb".to_string(),
        trace_table: "OTELTraces".to_string(),
        read_no_truncation: false,
        read_no_timeout: false,
        writer_workers: 2,
        writer_queue_depth: 8,
    }
}

/// The search window used by the scenario tests.
pub fn search_params() -> TraceQueryParameters {
    TraceQueryParameters {
        start_time_min: datetime!(2023-01-29 06:00 UTC),
        start_time_max: datetime!(2023-01-30 23:00 UTC),
        num_traces: 20,
        ..Default::default()
    }
}

/// A fully populated span whose tag keys contain neither dots nor
/// underscores, so the encode/decode pair is an exact inverse.
pub fn round_trippable_span() -> Span {
    Span {
        trace_id: "3f6d8f4c5008352055c14804949d1e57".parse().unwrap(),
        span_id: "55c14804949d1e57".parse().unwrap(),
        operation_name: "HTTP GET /dispatch".to_string(),
        references: vec![jaeger_adx_model::SpanRef {
            ref_type: jaeger_adx_model::RefType::ChildOf,
            trace_id: "3f6d8f4c5008352055c14804949d1e57".parse().unwrap(),
            span_id: SpanId::new(0x1234),
        }],
        flags: 0,
        start_time: datetime!(2023-01-29 06:00:00.000001 UTC),
        duration: Duration::from_micros(1_500),
        tags: vec![
            KeyValue::string("region", "eu"),
            KeyValue::new("sampled", TagValue::Bool(true)),
            KeyValue::new("retries", TagValue::Int64(2)),
        ],
        logs: vec![Log {
            timestamp_micros: 1_674_972_001_000_000,
            fields: vec![
                KeyValue::string("event", "redis timeout"),
                KeyValue::new("attempt", TagValue::Int64(1)),
            ],
        }],
        process: Process::new("frontend", vec![KeyValue::string("hostname", "node-1")]),
        process_id: String::new(),
    }
}

/// One span row as the trace queries project it.
pub fn span_row(trace_id: &str, span_id: &str, service: &str) -> Row {
    serde_json::json!({
        "TraceID": trace_id,
        "SpanID": span_id,
        "SpanName": "HTTP GET /dispatch",
        "StartTime": "2023-01-29T06:00:00Z",
        "Duration": 1500,
        "References": [],
        "Tags": {"http_method": "GET"},
        "Logs": [],
        "ProcessServiceName": service,
        "ProcessTags": {"hostname": "node-1"},
    })
    .as_object()
    .unwrap()
    .clone()
}
