//! Common type definitions for otelblob

use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::metrics::v1::metric::Data;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Signals
// ============================================================================

/// The three telemetry signal kinds the exporter persists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Traces,
    Logs,
    Metrics,
}

impl SignalKind {
    pub const ALL: [SignalKind; 3] = [SignalKind::Traces, SignalKind::Logs, SignalKind::Metrics];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Traces => "traces",
            SignalKind::Logs => "logs",
            SignalKind::Metrics => "metrics",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "traces" | "trace" => Ok(SignalKind::Traces),
            "logs" | "log" => Ok(SignalKind::Logs),
            "metrics" | "metric" => Ok(SignalKind::Metrics),
            other => Err(format!("unknown signal: {other}")),
        }
    }
}

// ============================================================================
// Output Formats
// ============================================================================

/// Encoding of the blob payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatType {
    /// OTLP JSON
    Json,
    /// OTLP protobuf
    Proto,
    /// Row-per-record parquet with Snappy compression
    Parquet,
}

impl FormatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatType::Json => "json",
            FormatType::Proto => "proto",
            FormatType::Parquet => "parquet",
        }
    }

    /// Conventional file extension for the format
    pub fn extension(&self) -> &'static str {
        match self {
            FormatType::Json => "json",
            FormatType::Proto => "pb",
            FormatType::Parquet => "parquet",
        }
    }

    /// MIME type sent as the blob content type
    pub fn content_type(&self) -> &'static str {
        match self {
            FormatType::Json => "application/json",
            FormatType::Proto => "application/x-protobuf",
            FormatType::Parquet => "application/vnd.apache.parquet",
        }
    }
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(FormatType::Json),
            "proto" => Ok(FormatType::Proto),
            "parquet" => Ok(FormatType::Parquet),
            other => Err(format!("unknown format type: {other}")),
        }
    }
}

// ============================================================================
// Telemetry Batches
// ============================================================================

/// A homogeneous batch of telemetry handed to the exporter
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryBatch {
    Traces(ExportTraceServiceRequest),
    Logs(ExportLogsServiceRequest),
    Metrics(ExportMetricsServiceRequest),
}

impl TelemetryBatch {
    pub fn signal(&self) -> SignalKind {
        match self {
            TelemetryBatch::Traces(_) => SignalKind::Traces,
            TelemetryBatch::Logs(_) => SignalKind::Logs,
            TelemetryBatch::Metrics(_) => SignalKind::Metrics,
        }
    }

    /// Number of resource groups in the batch
    pub fn resource_count(&self) -> usize {
        match self {
            TelemetryBatch::Traces(req) => req.resource_spans.len(),
            TelemetryBatch::Logs(req) => req.resource_logs.len(),
            TelemetryBatch::Metrics(req) => req.resource_metrics.len(),
        }
    }

    /// Number of leaf records: spans, log records or metric data points
    pub fn record_count(&self) -> usize {
        match self {
            TelemetryBatch::Traces(req) => req
                .resource_spans
                .iter()
                .flat_map(|rs| &rs.scope_spans)
                .map(|ss| ss.spans.len())
                .sum(),
            TelemetryBatch::Logs(req) => req
                .resource_logs
                .iter()
                .flat_map(|rl| &rl.scope_logs)
                .map(|sl| sl.log_records.len())
                .sum(),
            TelemetryBatch::Metrics(req) => req
                .resource_metrics
                .iter()
                .flat_map(|rm| &rm.scope_metrics)
                .flat_map(|sm| &sm.metrics)
                .map(|m| data_point_count(m.data.as_ref()))
                .sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }
}

/// Number of data points carried by a metric payload
pub fn data_point_count(data: Option<&Data>) -> usize {
    match data {
        Some(Data::Gauge(g)) => g.data_points.len(),
        Some(Data::Sum(s)) => s.data_points.len(),
        Some(Data::Histogram(h)) => h.data_points.len(),
        Some(Data::ExponentialHistogram(h)) => h.data_points.len(),
        Some(Data::Summary(s)) => s.data_points.len(),
        None => 0,
    }
}

impl From<ExportTraceServiceRequest> for TelemetryBatch {
    fn from(req: ExportTraceServiceRequest) -> Self {
        TelemetryBatch::Traces(req)
    }
}

impl From<ExportLogsServiceRequest> for TelemetryBatch {
    fn from(req: ExportLogsServiceRequest) -> Self {
        TelemetryBatch::Logs(req)
    }
}

impl From<ExportMetricsServiceRequest> for TelemetryBatch {
    fn from(req: ExportMetricsServiceRequest) -> Self {
        TelemetryBatch::Metrics(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::metrics::v1::{
        Gauge, Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics,
    };

    #[test]
    fn test_format_type_parsing() {
        assert_eq!("json".parse::<FormatType>(), Ok(FormatType::Json));
        assert_eq!("parquet".parse::<FormatType>(), Ok(FormatType::Parquet));
        assert!("avro".parse::<FormatType>().is_err());
    }

    #[test]
    fn test_signal_parsing() {
        assert_eq!("Traces".parse::<SignalKind>(), Ok(SignalKind::Traces));
        assert_eq!(SignalKind::Metrics.to_string(), "metrics");
    }

    #[test]
    fn test_metric_record_count_is_data_points() {
        let metric = Metric {
            name: "cpu".into(),
            data: Some(Data::Gauge(Gauge {
                data_points: vec![NumberDataPoint::default(), NumberDataPoint::default()],
            })),
            ..Default::default()
        };
        let batch = TelemetryBatch::from(ExportMetricsServiceRequest {
            resource_metrics: vec![ResourceMetrics {
                scope_metrics: vec![ScopeMetrics {
                    metrics: vec![metric.clone(), metric],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        });

        assert_eq!(batch.signal(), SignalKind::Metrics);
        assert_eq!(batch.resource_count(), 1);
        assert_eq!(batch.record_count(), 4);
    }
}
