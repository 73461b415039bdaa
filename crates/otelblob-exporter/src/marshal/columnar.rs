//! Parquet encoding
//!
//! One row per leaf record. Resource and scope context is denormalized onto
//! every row and attribute maps are flattened to `map<string, string>`.
//!
//! Column order:
//! - spans: `trace_id`, `span_id`, `parent_span_id`, `name`, `kind`,
//!   `start_time_unix_nano`, `end_time_unix_nano`, `status_code`,
//!   `status_message`, `resource_attributes`, `span_attributes`,
//!   `scope_name`, `scope_version`
//! - logs: `timestamp_unix_nano`, `observed_timestamp_unix_nano`,
//!   `severity_number`, `severity_text`, `body`, `trace_id`, `span_id`,
//!   `flags`, `resource_attributes`, `log_attributes`, `scope_name`,
//!   `scope_version`
//! - metrics, one row per data point: `name`, `description`, `unit`, `type`,
//!   `time_unix_nano`, `value_type`, `int_value`, `double_value`,
//!   `resource_attributes`, `metric_attributes`, `scope_name`,
//!   `scope_version`, `is_monotonic`, `aggregation_temporality`,
//!   `start_time_unix_nano`

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int32Builder, Int64Builder, MapBuilder,
    StringBuilder, UInt32Builder,
};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::KeyValue;
use opentelemetry_proto::tonic::metrics::v1::metric::Data;
use opentelemetry_proto::tonic::metrics::v1::number_data_point::Value as NumberValue;
use opentelemetry_proto::tonic::metrics::v1::{Metric, NumberDataPoint};
use otelblob_common::error::MarshalError;
use otelblob_common::FormatType;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use super::Marshaller;
use crate::attributes::{
    flatten, id_hex, resource_attributes, scope_identity, value_string, FlatAttributes,
};

const COMPRESSION: Compression = Compression::SNAPPY;

#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetMarshaller;

impl ParquetMarshaller {
    fn write(&self, batch: &RecordBatch) -> Result<Bytes, MarshalError> {
        let props = WriterProperties::builder()
            .set_compression(COMPRESSION)
            .build();

        let mut buf = Vec::new();
        let mut writer =
            ArrowWriter::try_new(&mut buf, batch.schema(), Some(props)).map_err(parquet_error)?;
        writer.write(batch).map_err(parquet_error)?;
        writer.close().map_err(parquet_error)?;
        Ok(Bytes::from(buf))
    }
}

impl Marshaller for ParquetMarshaller {
    fn format(&self) -> FormatType {
        FormatType::Parquet
    }

    fn marshal_traces(&self, request: &ExportTraceServiceRequest) -> Result<Bytes, MarshalError> {
        let batch = traces_to_record_batch(request).map_err(arrow_error)?;
        self.write(&batch)
    }

    fn marshal_logs(&self, request: &ExportLogsServiceRequest) -> Result<Bytes, MarshalError> {
        let batch = logs_to_record_batch(request).map_err(arrow_error)?;
        self.write(&batch)
    }

    fn marshal_metrics(
        &self,
        request: &ExportMetricsServiceRequest,
    ) -> Result<Bytes, MarshalError> {
        let batch = metrics_to_record_batch(request).map_err(arrow_error)?;
        self.write(&batch)
    }
}

fn arrow_error(e: ArrowError) -> MarshalError {
    MarshalError::Parquet(e.to_string())
}

fn parquet_error(e: parquet::errors::ParquetError) -> MarshalError {
    MarshalError::Parquet(e.to_string())
}

/// Nanosecond timestamps beyond `i64::MAX` saturate.
fn nanos(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// ============================================================================
// Shared Columns
// ============================================================================

struct AttributeColumn {
    builder: MapBuilder<StringBuilder, StringBuilder>,
}

impl Default for AttributeColumn {
    fn default() -> Self {
        Self {
            builder: MapBuilder::new(None, StringBuilder::new(), StringBuilder::new()),
        }
    }
}

impl AttributeColumn {
    fn append(&mut self, attributes: &FlatAttributes) -> Result<(), ArrowError> {
        for (key, value) in attributes {
            self.builder.keys().append_value(key);
            self.builder.values().append_value(value);
        }
        self.builder.append(true)
    }

    fn finish(&mut self) -> ArrayRef {
        Arc::new(self.builder.finish())
    }
}

/// Resource and scope context repeated on every row of a group
struct Context<'a> {
    resource: &'a FlatAttributes,
    scope_name: &'a str,
    scope_version: &'a str,
}

#[derive(Default)]
struct ContextColumns {
    resource_attributes: AttributeColumn,
    scope_name: StringBuilder,
    scope_version: StringBuilder,
}

impl ContextColumns {
    fn append(&mut self, ctx: &Context<'_>) -> Result<(), ArrowError> {
        self.resource_attributes.append(ctx.resource)?;
        self.scope_name.append_value(ctx.scope_name);
        self.scope_version.append_value(ctx.scope_version);
        Ok(())
    }
}

// ============================================================================
// Spans
// ============================================================================

#[derive(Default)]
struct SpanColumns {
    trace_id: StringBuilder,
    span_id: StringBuilder,
    parent_span_id: StringBuilder,
    name: StringBuilder,
    kind: Int32Builder,
    start_time: Int64Builder,
    end_time: Int64Builder,
    status_code: Int32Builder,
    status_message: StringBuilder,
    span_attributes: AttributeColumn,
    context: ContextColumns,
}

fn traces_to_record_batch(request: &ExportTraceServiceRequest) -> Result<RecordBatch, ArrowError> {
    let mut cols = SpanColumns::default();

    for resource_spans in &request.resource_spans {
        let resource = resource_attributes(resource_spans.resource.as_ref());
        for scope_spans in &resource_spans.scope_spans {
            let (scope_name, scope_version) = scope_identity(scope_spans.scope.as_ref());
            let ctx = Context {
                resource: &resource,
                scope_name,
                scope_version,
            };
            for span in &scope_spans.spans {
                cols.trace_id
                    .append_value(id_hex(&span.trace_id).unwrap_or_default());
                cols.span_id
                    .append_value(id_hex(&span.span_id).unwrap_or_default());
                cols.parent_span_id
                    .append_option(id_hex(&span.parent_span_id));
                cols.name.append_value(&span.name);
                cols.kind.append_value(span.kind);
                cols.start_time.append_value(nanos(span.start_time_unix_nano));
                cols.end_time.append_value(nanos(span.end_time_unix_nano));
                let (code, message) = span
                    .status
                    .as_ref()
                    .map_or((0, ""), |s| (s.code, s.message.as_str()));
                cols.status_code.append_value(code);
                cols.status_message.append_value(message);
                cols.span_attributes.append(&flatten(&span.attributes))?;
                cols.context.append(&ctx)?;
            }
        }
    }

    RecordBatch::try_from_iter_with_nullable(vec![
        column("trace_id", &mut cols.trace_id, false),
        column("span_id", &mut cols.span_id, false),
        column("parent_span_id", &mut cols.parent_span_id, true),
        column("name", &mut cols.name, false),
        ("kind", Arc::new(cols.kind.finish()) as ArrayRef, false),
        ("start_time_unix_nano", Arc::new(cols.start_time.finish()) as ArrayRef, false),
        ("end_time_unix_nano", Arc::new(cols.end_time.finish()) as ArrayRef, false),
        ("status_code", Arc::new(cols.status_code.finish()) as ArrayRef, false),
        column("status_message", &mut cols.status_message, false),
        ("resource_attributes", cols.context.resource_attributes.finish(), false),
        ("span_attributes", cols.span_attributes.finish(), false),
        column("scope_name", &mut cols.context.scope_name, false),
        column("scope_version", &mut cols.context.scope_version, false),
    ])
}

fn column<'a>(
    name: &'a str,
    builder: &mut StringBuilder,
    nullable: bool,
) -> (&'a str, ArrayRef, bool) {
    (name, Arc::new(builder.finish()), nullable)
}

// ============================================================================
// Logs
// ============================================================================

#[derive(Default)]
struct LogColumns {
    timestamp: Int64Builder,
    observed_timestamp: Int64Builder,
    severity_number: Int32Builder,
    severity_text: StringBuilder,
    body: StringBuilder,
    trace_id: StringBuilder,
    span_id: StringBuilder,
    flags: UInt32Builder,
    log_attributes: AttributeColumn,
    context: ContextColumns,
}

fn logs_to_record_batch(request: &ExportLogsServiceRequest) -> Result<RecordBatch, ArrowError> {
    let mut cols = LogColumns::default();

    for resource_logs in &request.resource_logs {
        let resource = resource_attributes(resource_logs.resource.as_ref());
        for scope_logs in &resource_logs.scope_logs {
            let (scope_name, scope_version) = scope_identity(scope_logs.scope.as_ref());
            let ctx = Context {
                resource: &resource,
                scope_name,
                scope_version,
            };
            for record in &scope_logs.log_records {
                cols.timestamp.append_value(nanos(record.time_unix_nano));
                cols.observed_timestamp
                    .append_value(nanos(record.observed_time_unix_nano));
                cols.severity_number.append_value(record.severity_number);
                cols.severity_text.append_value(&record.severity_text);
                cols.body.append_value(value_string(record.body.as_ref()));
                cols.trace_id.append_option(id_hex(&record.trace_id));
                cols.span_id.append_option(id_hex(&record.span_id));
                cols.flags.append_value(record.flags);
                cols.log_attributes.append(&flatten(&record.attributes))?;
                cols.context.append(&ctx)?;
            }
        }
    }

    RecordBatch::try_from_iter_with_nullable(vec![
        (
            "timestamp_unix_nano",
            Arc::new(cols.timestamp.finish()) as ArrayRef,
            false,
        ),
        (
            "observed_timestamp_unix_nano",
            Arc::new(cols.observed_timestamp.finish()) as ArrayRef,
            false,
        ),
        ("severity_number", Arc::new(cols.severity_number.finish()) as ArrayRef, false),
        column("severity_text", &mut cols.severity_text, false),
        column("body", &mut cols.body, false),
        column("trace_id", &mut cols.trace_id, true),
        column("span_id", &mut cols.span_id, true),
        ("flags", Arc::new(cols.flags.finish()) as ArrayRef, false),
        ("resource_attributes", cols.context.resource_attributes.finish(), false),
        ("log_attributes", cols.log_attributes.finish(), false),
        column("scope_name", &mut cols.context.scope_name, false),
        column("scope_version", &mut cols.context.scope_version, false),
    ])
}

// ============================================================================
// Metrics
// ============================================================================

enum PointValue {
    Int(i64),
    Double(f64),
    Absent,
}

impl From<Option<&NumberValue>> for PointValue {
    fn from(value: Option<&NumberValue>) -> Self {
        match value {
            Some(NumberValue::AsInt(i)) => PointValue::Int(*i),
            Some(NumberValue::AsDouble(d)) => PointValue::Double(*d),
            None => PointValue::Absent,
        }
    }
}

impl From<Option<f64>> for PointValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(PointValue::Absent, PointValue::Double)
    }
}

/// Per-metric fields shared by all of its data points
struct Series<'a> {
    metric: &'a Metric,
    kind: &'static str,
    is_monotonic: Option<bool>,
    temporality: Option<&'static str>,
}

struct Point<'a> {
    time: u64,
    start_time: u64,
    attributes: &'a [KeyValue],
    value: PointValue,
}

fn temporality(value: i32) -> &'static str {
    match value {
        1 => "delta",
        2 => "cumulative",
        _ => "unspecified",
    }
}

fn number_point(point: &NumberDataPoint) -> Point<'_> {
    Point {
        time: point.time_unix_nano,
        start_time: point.start_time_unix_nano,
        attributes: &point.attributes,
        value: point.value.as_ref().into(),
    }
}

#[derive(Default)]
struct MetricColumns {
    name: StringBuilder,
    description: StringBuilder,
    unit: StringBuilder,
    kind: StringBuilder,
    time: Int64Builder,
    value_type: StringBuilder,
    int_value: Int64Builder,
    double_value: Float64Builder,
    metric_attributes: AttributeColumn,
    is_monotonic: BooleanBuilder,
    aggregation_temporality: StringBuilder,
    start_time: Int64Builder,
    context: ContextColumns,
}

impl MetricColumns {
    fn append(
        &mut self,
        ctx: &Context<'_>,
        series: &Series<'_>,
        point: Point<'_>,
    ) -> Result<(), ArrowError> {
        self.name.append_value(&series.metric.name);
        self.description.append_value(&series.metric.description);
        self.unit.append_value(&series.metric.unit);
        self.kind.append_value(series.kind);
        self.time.append_value(nanos(point.time));

        let (value_type, int_value, double_value) = match point.value {
            PointValue::Int(i) => ("int", Some(i), None),
            PointValue::Double(d) => ("double", None, Some(d)),
            PointValue::Absent => ("none", None, None),
        };
        self.value_type.append_value(value_type);
        self.int_value.append_option(int_value);
        self.double_value.append_option(double_value);

        self.metric_attributes.append(&flatten(point.attributes))?;
        self.is_monotonic.append_option(series.is_monotonic);
        self.aggregation_temporality
            .append_option(series.temporality);
        self.start_time
            .append_option((point.start_time != 0).then(|| nanos(point.start_time)));
        self.context.append(ctx)
    }

    fn append_metric(&mut self, ctx: &Context<'_>, metric: &Metric) -> Result<(), ArrowError> {
        let Some(data) = metric.data.as_ref() else {
            return Ok(());
        };

        match data {
            Data::Gauge(gauge) => {
                let series = Series {
                    metric,
                    kind: "gauge",
                    is_monotonic: None,
                    temporality: None,
                };
                for point in &gauge.data_points {
                    self.append(ctx, &series, number_point(point))?;
                }
            }
            Data::Sum(sum) => {
                let series = Series {
                    metric,
                    kind: "sum",
                    is_monotonic: Some(sum.is_monotonic),
                    temporality: Some(temporality(sum.aggregation_temporality)),
                };
                for point in &sum.data_points {
                    self.append(ctx, &series, number_point(point))?;
                }
            }
            Data::Histogram(histogram) => {
                let series = Series {
                    metric,
                    kind: "histogram",
                    is_monotonic: None,
                    temporality: Some(temporality(histogram.aggregation_temporality)),
                };
                for point in &histogram.data_points {
                    let row = Point {
                        time: point.time_unix_nano,
                        start_time: point.start_time_unix_nano,
                        attributes: &point.attributes,
                        value: point.sum.into(),
                    };
                    self.append(ctx, &series, row)?;
                }
            }
            Data::ExponentialHistogram(histogram) => {
                let series = Series {
                    metric,
                    kind: "exponential_histogram",
                    is_monotonic: None,
                    temporality: Some(temporality(histogram.aggregation_temporality)),
                };
                for point in &histogram.data_points {
                    let row = Point {
                        time: point.time_unix_nano,
                        start_time: point.start_time_unix_nano,
                        attributes: &point.attributes,
                        value: point.sum.into(),
                    };
                    self.append(ctx, &series, row)?;
                }
            }
            Data::Summary(summary) => {
                let series = Series {
                    metric,
                    kind: "summary",
                    is_monotonic: None,
                    temporality: None,
                };
                for point in &summary.data_points {
                    let row = Point {
                        time: point.time_unix_nano,
                        start_time: point.start_time_unix_nano,
                        attributes: &point.attributes,
                        value: PointValue::Double(point.sum),
                    };
                    self.append(ctx, &series, row)?;
                }
            }
        }
        Ok(())
    }
}

fn metrics_to_record_batch(
    request: &ExportMetricsServiceRequest,
) -> Result<RecordBatch, ArrowError> {
    let mut cols = MetricColumns::default();

    for resource_metrics in &request.resource_metrics {
        let resource = resource_attributes(resource_metrics.resource.as_ref());
        for scope_metrics in &resource_metrics.scope_metrics {
            let (scope_name, scope_version) = scope_identity(scope_metrics.scope.as_ref());
            let ctx = Context {
                resource: &resource,
                scope_name,
                scope_version,
            };
            for metric in &scope_metrics.metrics {
                cols.append_metric(&ctx, metric)?;
            }
        }
    }

    RecordBatch::try_from_iter_with_nullable(vec![
        column("name", &mut cols.name, false),
        column("description", &mut cols.description, false),
        column("unit", &mut cols.unit, false),
        column("type", &mut cols.kind, false),
        (
            "time_unix_nano",
            Arc::new(cols.time.finish()) as ArrayRef,
            false,
        ),
        column("value_type", &mut cols.value_type, false),
        ("int_value", Arc::new(cols.int_value.finish()) as ArrayRef, true),
        ("double_value", Arc::new(cols.double_value.finish()) as ArrayRef, true),
        ("resource_attributes", cols.context.resource_attributes.finish(), false),
        ("metric_attributes", cols.metric_attributes.finish(), false),
        column("scope_name", &mut cols.context.scope_name, false),
        column("scope_version", &mut cols.context.scope_version, false),
        ("is_monotonic", Arc::new(cols.is_monotonic.finish()) as ArrayRef, true),
        column("aggregation_temporality", &mut cols.aggregation_temporality, true),
        ("start_time_unix_nano", Arc::new(cols.start_time.finish()) as ArrayRef, true),
    ])
}
