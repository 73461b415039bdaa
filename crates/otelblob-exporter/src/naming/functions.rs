//! Template lookup functions
//!
//! Every lookup is total: out-of-range indexes, absent attributes and wrong
//! argument types all yield [`Value::Missing`] instead of failing.

use std::collections::BTreeMap;

use opentelemetry_proto::tonic::common::v1::{InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::logs::v1::LogRecord;
use opentelemetry_proto::tonic::metrics::v1::metric::Data;
use opentelemetry_proto::tonic::metrics::v1::number_data_point::Value as NumberValue;
use opentelemetry_proto::tonic::metrics::v1::{Metric, NumberDataPoint};
use opentelemetry_proto::tonic::trace::v1::Span;
use otelblob_common::TelemetryBatch;
use serde_json::{json, Map as JsonMap, Value as Json};

use crate::attributes::{id_hex, lookup, value_json, value_string};

/// Result of evaluating a template expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Missing,
    Int(i64),
    Str(String),
    /// A span, log record, metric or data point; select a field to print it
    Record(JsonMap<String, Json>),
}

impl Value {
    fn index(&self) -> Option<usize> {
        match self {
            Value::Int(i) => usize::try_from(*i).ok(),
            _ => None,
        }
    }

    fn text(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Field of a record; anything else has no fields
    pub fn field(&self, name: &str) -> Value {
        match self {
            Value::Record(fields) => match fields.get(name) {
                None | Some(Json::Null) => Value::Missing,
                Some(Json::String(s)) => Value::Str(s.clone()),
                Some(Json::Number(n)) => n
                    .as_i64()
                    .map_or_else(|| Value::Str(n.to_string()), Value::Int),
                Some(Json::Object(map)) => Value::Record(map.clone()),
                Some(other) => Value::Str(other.to_string()),
            },
            _ => Value::Missing,
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Value::Missing => true,
            Value::Str(s) => s.is_empty(),
            _ => false,
        }
    }
}

/// What a template can see while rendering
pub struct Env<'a> {
    pub batch: &'a TelemetryBatch,
    pub params: &'a BTreeMap<String, String>,
}

pub const VARIABLES: [&str; 3] = ["signal", "resource_count", "record_count"];

pub fn variable(name: &str, env: &Env<'_>) -> Value {
    match name {
        "signal" => Value::Str(env.batch.signal().as_str().to_string()),
        "resource_count" => Value::Int(saturating_i64(env.batch.resource_count())),
        "record_count" => Value::Int(saturating_i64(env.batch.record_count())),
        _ => Value::Missing,
    }
}

fn saturating_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Number of arguments a function takes, `None` for unknown functions
pub fn arity(name: &str) -> Option<usize> {
    let arity = match name {
        "param" | "lower" | "upper" => 1,
        "resource_attr" | "scope_name" | "scope_version" | "default" => 2,
        "scope_attr" | "span" | "log_record" | "metric" => 3,
        "record_attr" | "data_point" => 4,
        "data_point_attr" => 5,
        _ => return None,
    };
    Some(arity)
}

/// Apply a function to evaluated arguments. Arity was checked at parse time.
pub fn call(name: &str, args: &[Value], env: &Env<'_>) -> Value {
    apply(name, args, env).unwrap_or(Value::Missing)
}

fn apply(name: &str, args: &[Value], env: &Env<'_>) -> Option<Value> {
    let batch = env.batch;
    let idx = |i: usize| args.get(i).and_then(Value::index);
    let key = |i: usize| args.get(i).and_then(Value::text);

    let value = match name {
        "resource_attr" => Value::Str(attr(resource(batch, idx(0)?)?, key(1)?)?),
        "scope_attr" => {
            let scope = scope(batch, idx(0)?, idx(1)?)?;
            Value::Str(attr(&scope.attributes, key(2)?)?)
        }
        "scope_name" => Value::Str(scope(batch, idx(0)?, idx(1)?)?.name.clone()),
        "scope_version" => Value::Str(scope(batch, idx(0)?, idx(1)?)?.version.clone()),
        "record_attr" => {
            let attributes = record_attributes(batch, idx(0)?, idx(1)?, idx(2)?)?;
            Value::Str(attr(attributes, key(3)?)?)
        }
        "data_point_attr" => {
            let metric = metric(batch, idx(0)?, idx(1)?, idx(2)?)?;
            Value::Str(attr(point(metric, idx(3)?)?.attributes, key(4)?)?)
        }
        "span" => Value::Record(span_view(span(batch, idx(0)?, idx(1)?, idx(2)?)?)),
        "log_record" => Value::Record(log_view(log_record(batch, idx(0)?, idx(1)?, idx(2)?)?)),
        "metric" => Value::Record(metric_view(metric(batch, idx(0)?, idx(1)?, idx(2)?)?)),
        "data_point" => {
            let metric = metric(batch, idx(0)?, idx(1)?, idx(2)?)?;
            Value::Record(point(metric, idx(3)?)?.view())
        }
        "param" => Value::Str(env.params.get(key(0)?)?.clone()),
        "lower" => map_text(args.first()?, str::to_lowercase),
        "upper" => map_text(args.first()?, str::to_uppercase),
        "default" => match args {
            [fallback, value] if value.is_blank() => fallback.clone(),
            [_, value] => value.clone(),
            _ => return None,
        },
        _ => return None,
    };
    Some(value)
}

fn map_text(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::Str(s) => Value::Str(f(s)),
        Value::Int(i) => Value::Str(i.to_string()),
        _ => Value::Missing,
    }
}

fn attr(attributes: &[KeyValue], key: &str) -> Option<String> {
    lookup(attributes, key).map(|kv| value_string(kv.value.as_ref()))
}

// ============================================================================
// Positional Access
// ============================================================================

fn resource(batch: &TelemetryBatch, group: usize) -> Option<&[KeyValue]> {
    let resource = match batch {
        TelemetryBatch::Traces(req) => req.resource_spans.get(group)?.resource.as_ref(),
        TelemetryBatch::Logs(req) => req.resource_logs.get(group)?.resource.as_ref(),
        TelemetryBatch::Metrics(req) => req.resource_metrics.get(group)?.resource.as_ref(),
    };
    resource.map(|r| r.attributes.as_slice())
}

fn scope(batch: &TelemetryBatch, group: usize, index: usize) -> Option<&InstrumentationScope> {
    match batch {
        TelemetryBatch::Traces(req) => req
            .resource_spans
            .get(group)?
            .scope_spans
            .get(index)?
            .scope
            .as_ref(),
        TelemetryBatch::Logs(req) => req
            .resource_logs
            .get(group)?
            .scope_logs
            .get(index)?
            .scope
            .as_ref(),
        TelemetryBatch::Metrics(req) => req
            .resource_metrics
            .get(group)?
            .scope_metrics
            .get(index)?
            .scope
            .as_ref(),
    }
}

fn span(batch: &TelemetryBatch, group: usize, scope: usize, index: usize) -> Option<&Span> {
    match batch {
        TelemetryBatch::Traces(req) => req
            .resource_spans
            .get(group)?
            .scope_spans
            .get(scope)?
            .spans
            .get(index),
        _ => None,
    }
}

fn log_record(
    batch: &TelemetryBatch,
    group: usize,
    scope: usize,
    index: usize,
) -> Option<&LogRecord> {
    match batch {
        TelemetryBatch::Logs(req) => req
            .resource_logs
            .get(group)?
            .scope_logs
            .get(scope)?
            .log_records
            .get(index),
        _ => None,
    }
}

fn metric(batch: &TelemetryBatch, group: usize, scope: usize, index: usize) -> Option<&Metric> {
    match batch {
        TelemetryBatch::Metrics(req) => req
            .resource_metrics
            .get(group)?
            .scope_metrics
            .get(scope)?
            .metrics
            .get(index),
        _ => None,
    }
}

/// Attributes of a span or log record; for metrics, of the first data point
fn record_attributes(
    batch: &TelemetryBatch,
    group: usize,
    scope: usize,
    index: usize,
) -> Option<&[KeyValue]> {
    match batch {
        TelemetryBatch::Traces(_) => Some(&span(batch, group, scope, index)?.attributes),
        TelemetryBatch::Logs(_) => Some(&log_record(batch, group, scope, index)?.attributes),
        TelemetryBatch::Metrics(_) => {
            Some(point(metric(batch, group, scope, index)?, 0)?.attributes)
        }
    }
}

struct PointRef<'a> {
    attributes: &'a [KeyValue],
    time: u64,
    start_time: u64,
    value: Json,
}

impl PointRef<'_> {
    fn view(&self) -> JsonMap<String, Json> {
        let mut view = JsonMap::new();
        view.insert("time_unix_nano".into(), json!(self.time));
        view.insert("start_time_unix_nano".into(), json!(self.start_time));
        view.insert("value".into(), self.value.clone());
        view
    }
}

fn point(metric: &Metric, index: usize) -> Option<PointRef<'_>> {
    let point = match metric.data.as_ref()? {
        Data::Gauge(g) => number_point(g.data_points.get(index)?),
        Data::Sum(s) => number_point(s.data_points.get(index)?),
        Data::Histogram(h) => {
            let p = h.data_points.get(index)?;
            PointRef {
                attributes: &p.attributes,
                time: p.time_unix_nano,
                start_time: p.start_time_unix_nano,
                value: p.sum.map_or(Json::Null, |s| json!(s)),
            }
        }
        Data::ExponentialHistogram(h) => {
            let p = h.data_points.get(index)?;
            PointRef {
                attributes: &p.attributes,
                time: p.time_unix_nano,
                start_time: p.start_time_unix_nano,
                value: p.sum.map_or(Json::Null, |s| json!(s)),
            }
        }
        Data::Summary(s) => {
            let p = s.data_points.get(index)?;
            PointRef {
                attributes: &p.attributes,
                time: p.time_unix_nano,
                start_time: p.start_time_unix_nano,
                value: json!(p.sum),
            }
        }
    };
    Some(point)
}

fn number_point(p: &NumberDataPoint) -> PointRef<'_> {
    PointRef {
        attributes: &p.attributes,
        time: p.time_unix_nano,
        start_time: p.start_time_unix_nano,
        value: match p.value {
            Some(NumberValue::AsInt(i)) => json!(i),
            Some(NumberValue::AsDouble(d)) => json!(d),
            None => Json::Null,
        },
    }
}

// ============================================================================
// Record Views
// ============================================================================

fn insert_id(view: &mut JsonMap<String, Json>, key: &str, id: &[u8]) {
    if let Some(hex) = id_hex(id) {
        view.insert(key.to_string(), Json::String(hex));
    }
}

fn span_view(span: &Span) -> JsonMap<String, Json> {
    let mut view = JsonMap::new();
    view.insert("name".into(), json!(span.name));
    insert_id(&mut view, "trace_id", &span.trace_id);
    insert_id(&mut view, "span_id", &span.span_id);
    insert_id(&mut view, "parent_span_id", &span.parent_span_id);
    view.insert("kind".into(), json!(span.kind));
    view.insert(
        "status_code".into(),
        json!(span.status.as_ref().map_or(0, |s| s.code)),
    );
    view.insert("start_time_unix_nano".into(), json!(span.start_time_unix_nano));
    view.insert("end_time_unix_nano".into(), json!(span.end_time_unix_nano));
    view
}

fn log_view(record: &LogRecord) -> JsonMap<String, Json> {
    let mut view = JsonMap::new();
    view.insert("severity_text".into(), json!(record.severity_text));
    view.insert("severity_number".into(), json!(record.severity_number));
    view.insert("body".into(), value_json(record.body.as_ref()));
    insert_id(&mut view, "trace_id", &record.trace_id);
    insert_id(&mut view, "span_id", &record.span_id);
    view.insert("time_unix_nano".into(), json!(record.time_unix_nano));
    view
}

fn metric_view(metric: &Metric) -> JsonMap<String, Json> {
    let kind = match metric.data {
        Some(Data::Gauge(_)) => json!("gauge"),
        Some(Data::Sum(_)) => json!("sum"),
        Some(Data::Histogram(_)) => json!("histogram"),
        Some(Data::ExponentialHistogram(_)) => json!("exponential_histogram"),
        Some(Data::Summary(_)) => json!("summary"),
        None => Json::Null,
    };
    let mut view = JsonMap::new();
    view.insert("name".into(), json!(metric.name));
    view.insert("description".into(), json!(metric.description));
    view.insert("unit".into(), json!(metric.unit));
    view.insert("type".into(), kind);
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
    use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
    use opentelemetry_proto::tonic::common::v1::any_value::Value as AnyValueKind;
    use opentelemetry_proto::tonic::common::v1::AnyValue;
    use opentelemetry_proto::tonic::metrics::v1::{Gauge, ResourceMetrics, ScopeMetrics};
    use opentelemetry_proto::tonic::resource::v1::Resource;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans};

    fn kv(key: &str, value: &str) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(AnyValueKind::StringValue(value.to_string())),
            }),
        }
    }

    fn traces() -> TelemetryBatch {
        TelemetryBatch::Traces(ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![kv("service.name", "checkout")],
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    scope: Some(InstrumentationScope {
                        name: "http".to_string(),
                        version: "2.1".to_string(),
                        attributes: vec![kv("team", "payments")],
                        ..Default::default()
                    }),
                    spans: vec![Span {
                        name: "POST /pay".to_string(),
                        trace_id: vec![0xaa; 16],
                        attributes: vec![kv("http.route", "/pay")],
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        })
    }

    fn eval(name: &str, args: &[Value], batch: &TelemetryBatch) -> Value {
        let params = BTreeMap::from([("region".to_string(), "eu".to_string())]);
        call(name, args, &Env { batch, params: &params })
    }

    fn s(v: &str) -> Value {
        Value::Str(v.to_string())
    }

    #[test]
    fn test_attribute_lookups() {
        let batch = traces();
        assert_eq!(
            eval("resource_attr", &[Value::Int(0), s("service.name")], &batch),
            s("checkout")
        );
        assert_eq!(
            eval("scope_attr", &[Value::Int(0), Value::Int(0), s("team")], &batch),
            s("payments")
        );
        assert_eq!(
            eval("scope_version", &[Value::Int(0), Value::Int(0)], &batch),
            s("2.1")
        );
        assert_eq!(
            eval(
                "record_attr",
                &[Value::Int(0), Value::Int(0), Value::Int(0), s("http.route")],
                &batch
            ),
            s("/pay")
        );
        assert_eq!(eval("param", &[s("region")], &batch), s("eu"));
    }

    #[test]
    fn test_lookups_are_total() {
        let batch = traces();
        for args in [
            vec![Value::Int(5), s("service.name")],
            vec![Value::Int(-1), s("service.name")],
            vec![s("zero"), s("service.name")],
            vec![Value::Int(0), s("absent")],
        ] {
            assert_eq!(eval("resource_attr", &args, &batch), Value::Missing);
        }
        assert_eq!(
            eval("metric", &[Value::Int(0), Value::Int(0), Value::Int(0)], &batch),
            Value::Missing
        );
        assert_eq!(eval("param", &[s("absent")], &batch), Value::Missing);
    }

    #[test]
    fn test_span_record_fields() {
        let batch = traces();
        let span = eval("span", &[Value::Int(0), Value::Int(0), Value::Int(0)], &batch);
        assert_eq!(span.field("name"), s("POST /pay"));
        assert_eq!(span.field("trace_id"), s(&"aa".repeat(16)));
        assert_eq!(span.field("span_id"), Value::Missing);
        assert_eq!(span.field("kind"), Value::Int(0));
    }

    #[test]
    fn test_metric_points() {
        let batch = TelemetryBatch::Metrics(ExportMetricsServiceRequest {
            resource_metrics: vec![ResourceMetrics {
                scope_metrics: vec![ScopeMetrics {
                    metrics: vec![Metric {
                        name: "cpu".to_string(),
                        data: Some(Data::Gauge(Gauge {
                            data_points: vec![NumberDataPoint {
                                attributes: vec![kv("core", "3")],
                                value: Some(NumberValue::AsInt(90)),
                                ..Default::default()
                            }],
                        })),
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        });
        let zero = Value::Int(0);
        assert_eq!(
            eval("metric", &[zero.clone(), zero.clone(), zero.clone()], &batch).field("type"),
            s("gauge")
        );
        assert_eq!(
            eval(
                "data_point",
                &[zero.clone(), zero.clone(), zero.clone(), zero.clone()],
                &batch
            )
            .field("value"),
            Value::Int(90)
        );
        assert_eq!(
            eval(
                "record_attr",
                &[zero.clone(), zero.clone(), zero.clone(), s("core")],
                &batch
            ),
            s("3")
        );
        assert_eq!(
            eval(
                "data_point_attr",
                &[zero.clone(), zero.clone(), zero.clone(), Value::Int(1), s("core")],
                &batch
            ),
            Value::Missing
        );
    }

    #[test]
    fn test_string_helpers() {
        let batch = traces();
        assert_eq!(eval("upper", &[s("eu")], &batch), s("EU"));
        assert_eq!(eval("lower", &[Value::Int(7)], &batch), s("7"));
        assert_eq!(eval("default", &[s("none"), Value::Missing], &batch), s("none"));
        assert_eq!(eval("default", &[s("none"), s("")], &batch), s("none"));
        assert_eq!(eval("default", &[s("none"), s("x")], &batch), s("x"));
    }

    #[test]
    fn test_arity_table() {
        assert_eq!(arity("resource_attr"), Some(2));
        assert_eq!(arity("data_point_attr"), Some(5));
        assert_eq!(arity("getSpan"), None);
    }
}
