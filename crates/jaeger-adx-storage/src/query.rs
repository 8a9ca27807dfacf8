// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-operation analytic query composition.
//!
//! Each read operation has a fixed pipeline skeleton; predicate stages
//! are appended only when their input is non-empty, so an empty predicate
//! never widens the result set. All user values flow through the
//! [`ParamBinder`]; the only text inlined verbatim is the table
//! identifier (validated at construction) and, for tag predicates, the
//! escaped key/value literals of the tag disjunction.

use time::OffsetDateTime;

use jaeger_adx_model::{OperationQueryParameters, TraceId, TraceQueryParameters};

use crate::client::{ClientRequestOptions, PreparedQuery};
use crate::config::AdxConfig;
use crate::error::StorageError;
use crate::params::{
    ParamBinder, ParamValue, PARAM_DURATION_MAX, PARAM_DURATION_MIN, PARAM_END_TS,
    PARAM_LOOK_BACK, PARAM_NUM_TRACES, PARAM_PROCESS_SERVICE_NAME, PARAM_SPAN_KIND,
    PARAM_SPAN_NAME, PARAM_START_TIME_MAX, PARAM_START_TIME_MIN, PARAM_TRACE_ID,
};
use crate::params::validate_table_identifier;

/// Result-cache hint prefixed to the listing queries; service and
/// operation inventories tolerate five minutes of staleness.
const CACHE_HINT: &str = "set query_results_cache_max_age = time(5m);";

const STAGE_EXTEND_DURATION_AND_SERVICE: &str =
    "extend Duration=datetime_diff('microsecond',EndTime,StartTime), \
     ProcessServiceName=tostring(ResourceAttributes.['service.name'])";

const STAGE_EXTEND_SERVICE: &str =
    "extend ProcessServiceName=tostring(ResourceAttributes.['service.name'])";

const STAGE_PROJECT_RENAME: &str =
    "project-rename Tags=TraceAttributes, Logs=Events, ProcessTags=ResourceAttributes";

/// References are synthesized from `ParentID`: absent parent means an
/// empty array, otherwise exactly one CHILD_OF edge.
const STAGE_SYNTHESIZE_REFERENCES: &str =
    "extend References=iff(isempty(ParentID), todynamic(\"[]\"), \
     pack_array(bag_pack(\"refType\",\"CHILD_OF\",\"traceID\",TraceID,\"spanID\",ParentID)))";

/// Ordered list of pipeline stages joined with the pipeline operator.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<String>,
}

impl Pipeline {
    pub fn from_table(table: &str) -> Self {
        Pipeline {
            stages: vec![table.to_string()],
        }
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stages.push(stage.into());
        self
    }

    pub fn render(self) -> String {
        self.stages.join(" | ")
    }
}

/// Escapes a value for inclusion in a single-quoted analytic string
/// literal. Only the tag disjunction uses this; every other user value is
/// a named parameter.
fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Builds the per-operation queries against one validated trace table.
#[derive(Debug, Clone)]
pub struct TraceQueryBuilder {
    table: String,
    options: ClientRequestOptions,
}

impl TraceQueryBuilder {
    pub fn new(config: &AdxConfig) -> Result<Self, StorageError> {
        validate_table_identifier(&config.trace_table)?;
        Ok(TraceQueryBuilder {
            table: config.trace_table.clone(),
            options: ClientRequestOptions {
                no_truncation: config.read_no_truncation,
                no_request_timeout: config.read_no_timeout,
            },
        })
    }

    fn finish(
        &self,
        operation: &'static str,
        cache_hint: bool,
        binder: ParamBinder,
        body: String,
    ) -> PreparedQuery {
        let mut statements = Vec::with_capacity(3);
        if cache_hint {
            statements.push(CACHE_HINT.to_string());
        }
        if let Some(prologue) = binder.prologue() {
            statements.push(prologue);
        }
        statements.push(body);
        PreparedQuery {
            operation,
            text: statements.join(" "),
            parameters: binder.into_parameters(),
            options: self.options,
        }
    }

    /// All spans of one trace, with synthesized references.
    pub fn get_trace(&self, trace_id: &TraceId) -> PreparedQuery {
        let mut binder = ParamBinder::new();
        let id = binder.bind(PARAM_TRACE_ID, ParamValue::String(trace_id.to_string()));
        let body = Pipeline::from_table(&self.table)
            .stage(format!("where TraceID == {id}"))
            .stage(STAGE_EXTEND_DURATION_AND_SERVICE)
            .stage(STAGE_PROJECT_RENAME)
            .stage(STAGE_SYNTHESIZE_REFERENCES)
            .render();
        self.finish("GetTrace", false, binder, body)
    }

    /// Distinct non-empty service names, ascending.
    pub fn get_services(&self) -> PreparedQuery {
        let body = Pipeline::from_table(&self.table)
            .stage(STAGE_EXTEND_SERVICE)
            .stage("where ProcessServiceName != \"\"")
            .stage("summarize by ProcessServiceName")
            .stage("sort by ProcessServiceName asc")
            .render();
        self.finish("GetServices", true, ParamBinder::new(), body)
    }

    /// Operation summaries for a service, optionally narrowed by span
    /// kind. Both filters are omitted when their input is empty.
    pub fn get_operations(&self, query: &OperationQueryParameters) -> PreparedQuery {
        let mut binder = ParamBinder::new();
        let mut pipeline = Pipeline::from_table(&self.table).stage(STAGE_EXTEND_SERVICE);
        if !query.service_name.is_empty() {
            let service = binder.bind(
                PARAM_PROCESS_SERVICE_NAME,
                ParamValue::String(query.service_name.clone()),
            );
            pipeline = pipeline.stage(format!("where ProcessServiceName == {service}"));
        }
        if !query.span_kind.is_empty() {
            let kind = binder.bind(PARAM_SPAN_KIND, ParamValue::String(query.span_kind.clone()));
            pipeline = pipeline.stage(format!("where SpanKind == {kind}"));
        }
        let body = pipeline
            .stage("summarize count() by SpanName, SpanKind")
            .stage("sort by count_")
            .stage("project OperationName=SpanName, SpanKind")
            .render();
        self.finish("GetOperations", true, binder, body)
    }

    /// Candidate-set stage shared by FindTraces and FindTraceIDs:
    /// filter, deduplicate to trace ids, and sample down to the requested
    /// size. DurationMin compares with `>`, DurationMax with `<`.
    fn candidate_trace_ids(
        &self,
        query: &TraceQueryParameters,
        binder: &mut ParamBinder,
    ) -> Pipeline {
        let mut pipeline =
            Pipeline::from_table(&self.table).stage(STAGE_EXTEND_DURATION_AND_SERVICE);
        if !query.service_name.is_empty() {
            let service = binder.bind(
                PARAM_PROCESS_SERVICE_NAME,
                ParamValue::String(query.service_name.clone()),
            );
            pipeline = pipeline.stage(format!("where ProcessServiceName == {service}"));
        }
        if !query.operation_name.is_empty() {
            let span_name = binder.bind(
                PARAM_SPAN_NAME,
                ParamValue::String(query.operation_name.clone()),
            );
            pipeline = pipeline.stage(format!("where SpanName == {span_name}"));
        }
        for (key, value) in &query.tags {
            let key = escape_literal(key);
            let value = escape_literal(value);
            pipeline = pipeline.stage(format!(
                "where TraceAttributes['{key}'] == '{value}' \
                 or ResourceAttributes['{key}'] == '{value}'"
            ));
        }
        let min = binder.bind(
            PARAM_START_TIME_MIN,
            ParamValue::DateTime(query.start_time_min),
        );
        pipeline = pipeline.stage(format!("where StartTime > {min}"));
        let max = binder.bind(
            PARAM_START_TIME_MAX,
            ParamValue::DateTime(query.start_time_max),
        );
        pipeline = pipeline.stage(format!("where StartTime < {max}"));
        if let Some(duration_min) = query.duration_min {
            let bound = binder.bind(
                PARAM_DURATION_MIN,
                ParamValue::Long(duration_min.as_micros() as i64),
            );
            pipeline = pipeline.stage(format!("where Duration > {bound}"));
        }
        if let Some(duration_max) = query.duration_max {
            let bound = binder.bind(
                PARAM_DURATION_MAX,
                ParamValue::Long(duration_max.as_micros() as i64),
            );
            pipeline = pipeline.stage(format!("where Duration < {bound}"));
        }
        let sample = binder.bind(
            PARAM_NUM_TRACES,
            ParamValue::Long(i64::from(query.num_traces)),
        );
        pipeline
            .stage("summarize by TraceID")
            .stage(format!("sample {sample}"))
    }

    /// Two-stage search: compute the candidate trace-id set, then join
    /// all spans for those ids within the same time window.
    pub fn find_traces(&self, query: &TraceQueryParameters) -> PreparedQuery {
        let mut binder = ParamBinder::new();
        let candidates = self.candidate_trace_ids(query, &mut binder).render();
        let spans = Pipeline::from_table(&self.table)
            .stage(STAGE_EXTEND_DURATION_AND_SERVICE)
            .stage(format!("where StartTime > {PARAM_START_TIME_MIN}"))
            .stage(format!("where StartTime < {PARAM_START_TIME_MAX}"))
            .stage("where TraceID in (TraceIDs)")
            .stage(STAGE_PROJECT_RENAME)
            .stage(STAGE_SYNTHESIZE_REFERENCES)
            .render();
        let body = format!("let TraceIDs = ({candidates}); {spans}");
        self.finish("FindTraces", false, binder, body)
    }

    /// The candidate-set stage alone, yielding trace ids.
    pub fn find_trace_ids(&self, query: &TraceQueryParameters) -> PreparedQuery {
        let mut binder = ParamBinder::new();
        let body = self.candidate_trace_ids(query, &mut binder).render();
        self.finish("FindTraceIDs", false, binder, body)
    }

    /// Service-call-graph aggregation: self-join child spans to their
    /// parents' services, discard same-service edges, and count calls per
    /// ordered pair.
    pub fn get_dependencies(
        &self,
        end_time: OffsetDateTime,
        lookback: std::time::Duration,
    ) -> PreparedQuery {
        let mut binder = ParamBinder::new();
        let end = binder.bind(PARAM_END_TS, ParamValue::DateTime(end_time));
        let look_back = binder.bind(PARAM_LOOK_BACK, ParamValue::Timespan(lookback));
        let parent_side = Pipeline::from_table(&self.table)
            .stage("extend ParentService=tostring(ResourceAttributes.['service.name'])")
            .stage("project ChildOfSpanId=SpanID, ParentService")
            .render();
        let body = Pipeline::from_table(&self.table)
            .stage(format!("where StartTime < {end} and StartTime > {end} - {look_back}"))
            .stage(STAGE_EXTEND_SERVICE)
            .stage("project ProcessServiceName, SpanID, ChildOfSpanId=ParentID")
            .stage(format!("join kind=inner ({parent_side}) on ChildOfSpanId"))
            .stage("where ProcessServiceName != ParentService")
            .stage("extend Call=bag_pack(\"Parent\", ParentService, \"Child\", ProcessServiceName)")
            .stage("summarize CallCount=count() by tostring(Call)")
            .stage("extend CallPair=parse_json(Call)")
            .stage("project Parent=tostring(CallPair.Parent), Child=tostring(CallPair.Child), CallCount")
            .render();
        self.finish("GetDependencies", true, binder, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use time::macros::datetime;

    fn builder() -> TraceQueryBuilder {
        let config = AdxConfig {
            endpoint: "https://cluster.kusto.windows.net".to_string(),
            database: "tracesdb".to_string(),
            trace_table: "OTELTraces".to_string(),
            read_no_truncation: false,
            read_no_timeout: false,
            writer_workers: 1,
            writer_queue_depth: 1,
        };
        TraceQueryBuilder::new(&config).unwrap()
    }

    fn search_window() -> TraceQueryParameters {
        TraceQueryParameters {
            start_time_min: datetime!(2023-01-29 06:00 UTC),
            start_time_max: datetime!(2023-01-30 23:00 UTC),
            num_traces: 20,
            ..Default::default()
        }
    }

    #[test]
    fn test_get_trace_stage_chain() {
        let trace_id: TraceId = "3f6d8f4c5008352055c14804949d1e57".parse().unwrap();
        let query = builder().get_trace(&trace_id);
        assert_eq!(
            query.text,
            "declare query_parameters(ParamTraceID:string); \
             OTELTraces \
             | where TraceID == ParamTraceID \
             | extend Duration=datetime_diff('microsecond',EndTime,StartTime), \
             ProcessServiceName=tostring(ResourceAttributes.['service.name']) \
             | project-rename Tags=TraceAttributes, Logs=Events, ProcessTags=ResourceAttributes \
             | extend References=iff(isempty(ParentID), todynamic(\"[]\"), \
             pack_array(bag_pack(\"refType\",\"CHILD_OF\",\"traceID\",TraceID,\"spanID\",ParentID)))"
        );
        assert_eq!(
            query.parameter(PARAM_TRACE_ID),
            Some(&ParamValue::String(
                "3f6d8f4c5008352055c14804949d1e57".to_string()
            ))
        );
        // the trace id must never appear inline
        assert!(!query.text.contains("3f6d8f4c"));
    }

    #[test]
    fn test_get_services_cache_hint_and_sort() {
        let query = builder().get_services();
        assert!(query.text.starts_with("set query_results_cache_max_age = time(5m); "));
        assert!(query.text.ends_with("sort by ProcessServiceName asc"));
        assert!(query.text.contains("| where ProcessServiceName != \"\""));
        assert!(query.parameters.is_empty());
        assert!(!query.text.contains("declare query_parameters"));
    }

    #[test]
    fn test_get_operations_with_service() {
        let query = builder().get_operations(&OperationQueryParameters {
            service_name: "frontend".to_string(),
            span_kind: String::new(),
        });
        assert!(query.text.contains("declare query_parameters(ParamProcessServiceName:string);"));
        assert!(query.text.contains("| where ProcessServiceName == ParamProcessServiceName"));
        assert!(query.text.contains("| project OperationName=SpanName, SpanKind"));
        assert!(!query.text.contains("ParamSpanKind"));
        assert!(!query.text.contains("frontend"));
    }

    #[test]
    fn test_get_operations_empty_service_omits_filter() {
        let query = builder().get_operations(&OperationQueryParameters::default());
        assert!(!query.text.contains("where ProcessServiceName =="));
        assert!(!query.text.contains("declare query_parameters"));
        assert!(query.parameters.is_empty());
    }

    #[test]
    fn test_get_operations_span_kind_filter() {
        let query = builder().get_operations(&OperationQueryParameters {
            service_name: "frontend".to_string(),
            span_kind: "server".to_string(),
        });
        assert!(query.text.contains(
            "declare query_parameters(ParamProcessServiceName:string, ParamSpanKind:string);"
        ));
        assert!(query.text.contains("| where SpanKind == ParamSpanKind"));
    }

    #[test]
    fn test_find_traces_two_stage_skeleton() {
        let mut params = search_window();
        params.service_name = "my-service".to_string();
        params.tags.insert("http_method".to_string(), "GET".to_string());
        let query = builder().find_traces(&params);

        assert!(query.text.contains("let TraceIDs = (OTELTraces |"));
        assert!(query.text.contains("| summarize by TraceID | sample ParamNumTraces); OTELTraces |"));
        assert!(query.text.contains(
            "where TraceAttributes['http_method'] == 'GET' \
             or ResourceAttributes['http_method'] == 'GET'"
        ));
        assert!(query.text.contains("| where TraceID in (TraceIDs)"));
        assert!(query.text.contains("| where ProcessServiceName == ParamProcessServiceName"));
        assert!(!query.text.contains("my-service"));
        assert_eq!(query.parameter(PARAM_NUM_TRACES), Some(&ParamValue::Long(20)));
    }

    #[test]
    fn test_find_traces_duration_bound_directions() {
        let mut params = search_window();
        params.duration_min = Some(Duration::from_millis(100));
        params.duration_max = Some(Duration::from_millis(500));
        let query = builder().find_traces(&params);

        assert!(query.text.contains("| where Duration > ParamDurationMin"));
        assert!(query.text.contains("| where Duration < ParamDurationMax"));
        assert!(!query.text.contains("Duration < ParamDurationMin"));
        assert!(!query.text.contains("Duration > ParamDurationMax"));
        assert_eq!(
            query.parameter(PARAM_DURATION_MIN),
            Some(&ParamValue::Long(100_000))
        );
        assert_eq!(
            query.parameter(PARAM_DURATION_MAX),
            Some(&ParamValue::Long(500_000))
        );
    }

    #[test]
    fn test_find_traces_omits_unset_predicates() {
        let query = builder().find_traces(&search_window());
        assert!(!query.text.contains("ParamProcessServiceName"));
        assert!(!query.text.contains("ParamSpanName"));
        assert!(!query.text.contains("ParamDurationMin"));
        assert!(!query.text.contains("ParamDurationMax"));
        assert!(query.text.contains("| where StartTime > ParamStartTimeMin"));
        assert!(query.text.contains("| where StartTime < ParamStartTimeMax"));
    }

    #[test]
    fn test_find_trace_ids_is_candidate_stage_only() {
        let query = builder().find_trace_ids(&search_window());
        assert!(!query.text.contains("let TraceIDs"));
        assert!(!query.text.contains("project-rename"));
        assert!(query.text.ends_with("| summarize by TraceID | sample ParamNumTraces"));
    }

    #[test]
    fn test_tag_literals_are_escaped() {
        let mut params = search_window();
        params
            .tags
            .insert("quote".to_string(), "o'clock \\ back".to_string());
        let query = builder().find_traces(&params);
        assert!(query.text.contains("== 'o\\'clock \\\\ back'"));
    }

    #[test]
    fn test_get_dependencies_join_and_aggregate() {
        let query = builder().get_dependencies(
            datetime!(2023-01-30 23:00 UTC),
            Duration::from_secs(168 * 3600),
        );
        assert!(query.text.starts_with("set query_results_cache_max_age = time(5m); "));
        assert!(query.text.contains(
            "declare query_parameters(ParamEndTs:datetime, ParamLookBack:timespan);"
        ));
        assert!(query.text.contains("where StartTime < ParamEndTs and StartTime > ParamEndTs - ParamLookBack"));
        assert!(query.text.contains("join kind=inner ("));
        assert!(query.text.contains(") on ChildOfSpanId"));
        assert!(query.text.contains("| where ProcessServiceName != ParentService"));
        assert!(query.text.contains("| summarize CallCount=count() by tostring(Call)"));
    }

    #[test]
    fn test_every_declared_parameter_is_referenced() {
        let mut params = search_window();
        params.service_name = "svc".to_string();
        params.operation_name = "op".to_string();
        params.duration_min = Some(Duration::from_millis(1));
        params.duration_max = Some(Duration::from_millis(2));
        for query in [
            builder().find_traces(&params),
            builder().find_trace_ids(&params),
            builder().get_trace(&"ab".parse().unwrap()),
            builder().get_operations(&OperationQueryParameters {
                service_name: "svc".to_string(),
                span_kind: "client".to_string(),
            }),
            builder().get_dependencies(datetime!(2023-01-30 23:00 UTC), Duration::from_secs(60)),
        ] {
            for (name, _) in &query.parameters {
                // once in the prologue, at least once in the body
                assert!(
                    query.text.matches(name.as_str()).count() >= 2,
                    "{}: parameter {name} declared but not referenced",
                    query.operation
                );
            }
        }
    }
}
