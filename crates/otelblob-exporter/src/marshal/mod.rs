//! Payload encoders
//!
//! One [`Marshaller`] per output format, chosen once from configuration and
//! shared across concurrent exports.

mod columnar;
mod json;
mod proto;

pub use self::columnar::ParquetMarshaller;
pub use self::json::JsonMarshaller;
pub use self::proto::ProtoMarshaller;

use bytes::Bytes;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use otelblob_common::error::MarshalError;
use otelblob_common::{FormatType, TelemetryBatch};

/// Encodes telemetry batches into blob payloads
pub trait Marshaller: Send + Sync {
    fn format(&self) -> FormatType;

    fn marshal_traces(&self, request: &ExportTraceServiceRequest) -> Result<Bytes, MarshalError>;

    fn marshal_logs(&self, request: &ExportLogsServiceRequest) -> Result<Bytes, MarshalError>;

    fn marshal_metrics(&self, request: &ExportMetricsServiceRequest)
        -> Result<Bytes, MarshalError>;

    fn marshal(&self, batch: &TelemetryBatch) -> Result<Bytes, MarshalError> {
        match batch {
            TelemetryBatch::Traces(req) => self.marshal_traces(req),
            TelemetryBatch::Logs(req) => self.marshal_logs(req),
            TelemetryBatch::Metrics(req) => self.marshal_metrics(req),
        }
    }
}

pub fn new_marshaller(format: FormatType) -> Box<dyn Marshaller> {
    match format {
        FormatType::Json => Box::new(JsonMarshaller),
        FormatType::Proto => Box::new(ProtoMarshaller),
        FormatType::Parquet => Box::new(ParquetMarshaller::default()),
    }
}

/// Marshaller for a format name as written in configuration
pub fn marshaller_for(format: &str) -> Result<Box<dyn Marshaller>, MarshalError> {
    format
        .parse::<FormatType>()
        .map(new_marshaller)
        .map_err(|_| MarshalError::UnsupportedFormat(format.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshaller_selection() {
        for format in [FormatType::Json, FormatType::Proto, FormatType::Parquet] {
            assert_eq!(new_marshaller(format).format(), format);
        }
        assert_eq!(marshaller_for("parquet").unwrap().format(), FormatType::Parquet);
    }

    #[test]
    fn test_unknown_format_rejected() {
        match marshaller_for("avro") {
            Err(MarshalError::UnsupportedFormat(name)) => assert_eq!(name, "avro"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("avro should not be supported"),
        }
    }

    #[test]
    fn test_empty_batches_encode_in_every_format() {
        let batches = [
            TelemetryBatch::Traces(ExportTraceServiceRequest::default()),
            TelemetryBatch::Logs(ExportLogsServiceRequest::default()),
            TelemetryBatch::Metrics(ExportMetricsServiceRequest::default()),
        ];
        for format in [FormatType::Json, FormatType::Proto, FormatType::Parquet] {
            let marshaller = new_marshaller(format);
            for batch in &batches {
                assert!(marshaller.marshal(batch).is_ok(), "{format} {}", batch.signal());
            }
        }
    }
}
