//! OTLP protobuf encoding

use bytes::Bytes;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use otelblob_common::error::MarshalError;
use otelblob_common::FormatType;
use prost::Message;

use super::Marshaller;

#[derive(Debug, Default, Clone, Copy)]
pub struct ProtoMarshaller;

impl Marshaller for ProtoMarshaller {
    fn format(&self) -> FormatType {
        FormatType::Proto
    }

    fn marshal_traces(&self, request: &ExportTraceServiceRequest) -> Result<Bytes, MarshalError> {
        Ok(request.encode_to_vec().into())
    }

    fn marshal_logs(&self, request: &ExportLogsServiceRequest) -> Result<Bytes, MarshalError> {
        Ok(request.encode_to_vec().into())
    }

    fn marshal_metrics(
        &self,
        request: &ExportMetricsServiceRequest,
    ) -> Result<Bytes, MarshalError> {
        Ok(request.encode_to_vec().into())
    }
}
