//! OTLP JSON encoding

use bytes::Bytes;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use otelblob_common::error::MarshalError;
use otelblob_common::FormatType;
use serde::Serialize;

use super::Marshaller;

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMarshaller;

fn encode<T: Serialize>(request: &T) -> Result<Bytes, MarshalError> {
    serde_json::to_vec(request)
        .map(Bytes::from)
        .map_err(|e| MarshalError::Json(e.to_string()))
}

impl Marshaller for JsonMarshaller {
    fn format(&self) -> FormatType {
        FormatType::Json
    }

    fn marshal_traces(&self, request: &ExportTraceServiceRequest) -> Result<Bytes, MarshalError> {
        encode(request)
    }

    fn marshal_logs(&self, request: &ExportLogsServiceRequest) -> Result<Bytes, MarshalError> {
        encode(request)
    }

    fn marshal_metrics(
        &self,
        request: &ExportMetricsServiceRequest,
    ) -> Result<Bytes, MarshalError> {
        encode(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};

    #[test]
    fn test_traces_roundtrip_through_serde() {
        let request = ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                scope_spans: vec![ScopeSpans {
                    spans: vec![Span {
                        name: "GET /cart".to_string(),
                        trace_id: vec![1; 16],
                        span_id: vec![2; 8],
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        };

        let bytes = JsonMarshaller.marshal_traces(&request).unwrap();
        let decoded: ExportTraceServiceRequest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, request);
    }
}
