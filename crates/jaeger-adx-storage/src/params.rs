// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed named parameters for analytic queries.
//!
//! The binder is the only place user values become query artifacts: every
//! value is declared in the `declare query_parameters(...)` prologue and
//! shipped beside the query text, never concatenated into it. Builder
//! code refers to values exclusively by the `Param*` names exported here.

use std::fmt;
use std::time::Duration;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::encode::format_timespan;
use crate::error::StorageError;

pub const PARAM_TRACE_ID: &str = "ParamTraceID";
pub const PARAM_PROCESS_SERVICE_NAME: &str = "ParamProcessServiceName";
pub const PARAM_SPAN_NAME: &str = "ParamSpanName";
pub const PARAM_SPAN_KIND: &str = "ParamSpanKind";
pub const PARAM_START_TIME_MIN: &str = "ParamStartTimeMin";
pub const PARAM_START_TIME_MAX: &str = "ParamStartTimeMax";
pub const PARAM_DURATION_MIN: &str = "ParamDurationMin";
pub const PARAM_DURATION_MAX: &str = "ParamDurationMax";
pub const PARAM_NUM_TRACES: &str = "ParamNumTraces";
pub const PARAM_END_TS: &str = "ParamEndTs";
pub const PARAM_LOOK_BACK: &str = "ParamLookBack";

/// Declared analytic parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KustoType {
    String,
    DateTime,
    Timespan,
    Int,
    Long,
    Dynamic,
}

impl KustoType {
    pub fn as_str(self) -> &'static str {
        match self {
            KustoType::String => "string",
            KustoType::DateTime => "datetime",
            KustoType::Timespan => "timespan",
            KustoType::Int => "int",
            KustoType::Long => "long",
            KustoType::Dynamic => "dynamic",
        }
    }
}

/// A typed parameter value, shipped to the store beside the query text.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    DateTime(OffsetDateTime),
    Timespan(Duration),
    Int(i32),
    Long(i64),
    Dynamic(serde_json::Value),
}

impl ParamValue {
    pub fn kusto_type(&self) -> KustoType {
        match self {
            ParamValue::String(_) => KustoType::String,
            ParamValue::DateTime(_) => KustoType::DateTime,
            ParamValue::Timespan(_) => KustoType::Timespan,
            ParamValue::Int(_) => KustoType::Int,
            ParamValue::Long(_) => KustoType::Long,
            ParamValue::Dynamic(_) => KustoType::Dynamic,
        }
    }
}

impl fmt::Display for ParamValue {
    /// Analytic literal form, used when serializing the parameter map and
    /// in debug logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::String(s) => {
                write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            }
            ParamValue::DateTime(dt) => {
                let rendered = dt
                    .to_offset(time::UtcOffset::UTC)
                    .format(&Rfc3339)
                    .map_err(|_| fmt::Error)?;
                write!(f, "datetime({rendered})")
            }
            ParamValue::Timespan(d) => write!(f, "timespan({})", format_timespan(*d)),
            ParamValue::Int(i) => write!(f, "int({i})"),
            ParamValue::Long(l) => write!(f, "long({l})"),
            ParamValue::Dynamic(v) => write!(f, "dynamic({v})"),
        }
    }
}

/// Accumulates `(name, type, value)` declarations for one query.
#[derive(Debug, Default)]
pub struct ParamBinder {
    decls: Vec<(&'static str, ParamValue)>,
}

impl ParamBinder {
    pub fn new() -> Self {
        ParamBinder { decls: Vec::new() }
    }

    /// Declares a parameter and returns its name for use in predicate
    /// text. Names are fixed per operation; binding the same name twice
    /// is a builder bug and keeps the first declaration.
    pub fn bind(&mut self, name: &'static str, value: ParamValue) -> &'static str {
        if !self.decls.iter().any(|(n, _)| *n == name) {
            self.decls.push((name, value));
        }
        name
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    /// Renders the declaration prologue, or `None` when nothing is bound
    /// (a prologue declaring unused parameters is rejected server-side).
    pub fn prologue(&self) -> Option<String> {
        if self.decls.is_empty() {
            return None;
        }
        let decls = self
            .decls
            .iter()
            .map(|(name, value)| format!("{name}:{}", value.kusto_type().as_str()))
            .collect::<Vec<String>>()
            .join(", ");
        Some(format!("declare query_parameters({decls});"))
    }

    /// Consumes the binder into the named-parameter map, in declaration
    /// order.
    pub fn into_parameters(self) -> Vec<(String, ParamValue)> {
        self.decls
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }
}

/// Table names are not parameters; they are inlined verbatim and must
/// therefore match the identifier charset exactly. Anything else is
/// rejected before query construction.
pub fn validate_table_identifier(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StorageError::ConfigInvalid(format!(
            "invalid table identifier {name:?}: must match [A-Za-z_][A-Za-z0-9_]*"
        )))
    }
}
