//! CLI utilities

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use otelblob_common::{SignalKind, TelemetryBatch};
use prost::Message;

/// Encoding of an input batch file
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// OTLP/JSON
    Json,
    /// OTLP protobuf
    Proto,
}

impl InputFormat {
    /// `.pb`, `.proto` and `.bin` files are protobuf, anything else JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("pb" | "proto" | "bin") => InputFormat::Proto,
            _ => InputFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Read one OTLP export request for `signal` from `path`.
pub async fn read_batch(
    path: &Path,
    signal: SignalKind,
    format: Option<InputFormat>,
) -> Result<TelemetryBatch> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read input file {}", path.display()))?;
    let format = format.unwrap_or_else(|| InputFormat::from_path(path));
    decode_batch(&data, signal, format)
        .with_context(|| format!("Failed to decode {signal} batch from {}", path.display()))
}

pub fn decode_batch(data: &[u8], signal: SignalKind, format: InputFormat) -> Result<TelemetryBatch> {
    if data.is_empty() {
        bail!("input is empty");
    }

    let batch = match (signal, format) {
        (SignalKind::Traces, InputFormat::Json) => {
            serde_json::from_slice::<ExportTraceServiceRequest>(data)?.into()
        }
        (SignalKind::Logs, InputFormat::Json) => {
            serde_json::from_slice::<ExportLogsServiceRequest>(data)?.into()
        }
        (SignalKind::Metrics, InputFormat::Json) => {
            serde_json::from_slice::<ExportMetricsServiceRequest>(data)?.into()
        }
        (SignalKind::Traces, InputFormat::Proto) => ExportTraceServiceRequest::decode(data)?.into(),
        (SignalKind::Logs, InputFormat::Proto) => ExportLogsServiceRequest::decode(data)?.into(),
        (SignalKind::Metrics, InputFormat::Proto) => {
            ExportMetricsServiceRequest::decode(data)?.into()
        }
    };
    Ok(batch)
}
