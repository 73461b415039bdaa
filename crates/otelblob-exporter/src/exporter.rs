//! Export orchestration
//!
//! One call per batch: marshal, name, then write under the caller's context
//! with the configured backoff. Components are built once and shared by
//! concurrent calls.

use std::sync::Arc;

use chrono::Utc;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use otelblob_common::metrics::{self, ExportTimer};
use otelblob_common::{ExporterConfig, Result, SignalKind, TelemetryBatch};
use otelblob_storage::{BlobClient, CredentialResolver};

use crate::context::ExportContext;
use crate::marshal::{new_marshaller, Marshaller};
use crate::naming::BlobNameGenerator;
use crate::retry::BackoffPolicy;
use crate::writer::WriteStrategy;

/// Where a batch ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub container: String,
    pub blob_name: String,
    pub bytes: usize,
}

pub struct BlobExporter {
    config: ExporterConfig,
    client: Arc<dyn BlobClient>,
    marshaller: Box<dyn Marshaller>,
    names: BlobNameGenerator,
    writer: WriteStrategy,
    backoff: BackoffPolicy,
}

impl BlobExporter {
    /// Validate `config` and connect using its authentication settings.
    pub fn new(config: ExporterConfig) -> Result<Self> {
        let client = CredentialResolver::new()?.resolve(&config)?;
        Self::build(config, client)
    }

    /// Use an already constructed storage client.
    pub fn with_client(config: ExporterConfig, client: Arc<dyn BlobClient>) -> Result<Self> {
        config.validate()?;
        Self::build(config, client)
    }

    fn build(config: ExporterConfig, client: Arc<dyn BlobClient>) -> Result<Self> {
        let format = config.format_type()?;
        let writer = WriteStrategy::from(&config.append_blob);
        let backoff = BackoffPolicy::from(&config.retry_on_failure);

        tracing::info!(
            url = client.url(),
            format = %format,
            write_mode = writer.as_str(),
            template_enabled = config.blob_name_format.template_enabled,
            retry = backoff.is_enabled(),
            "Blob exporter ready"
        );

        Ok(Self {
            names: BlobNameGenerator::new(&config.blob_name_format),
            marshaller: new_marshaller(format),
            client,
            writer,
            backoff,
            config,
        })
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<dyn BlobClient> {
        &self.client
    }

    pub async fn export_traces(
        &self,
        ctx: &ExportContext,
        request: ExportTraceServiceRequest,
    ) -> Result<ExportOutcome> {
        self.export(ctx, &TelemetryBatch::Traces(request)).await
    }

    pub async fn export_logs(
        &self,
        ctx: &ExportContext,
        request: ExportLogsServiceRequest,
    ) -> Result<ExportOutcome> {
        self.export(ctx, &TelemetryBatch::Logs(request)).await
    }

    pub async fn export_metrics(
        &self,
        ctx: &ExportContext,
        request: ExportMetricsServiceRequest,
    ) -> Result<ExportOutcome> {
        self.export(ctx, &TelemetryBatch::Metrics(request)).await
    }

    /// Persist one batch as (part of) a blob.
    pub async fn export(&self, ctx: &ExportContext, batch: &TelemetryBatch) -> Result<ExportOutcome> {
        let signal = batch.signal();
        let _timer = ExportTimer::new(signal);

        match self.write_batch(ctx, signal, batch).await {
            Ok(outcome) => {
                metrics::record_export(
                    signal,
                    self.marshaller.format().as_str(),
                    outcome.bytes as u64,
                );
                metrics::record_exported_records(signal, batch.record_count() as u64);
                Ok(outcome)
            }
            Err(e) => {
                let retryable = e.is_retryable();
                metrics::record_export_failure(signal, retryable);
                tracing::error!(signal = %signal, retryable, error = %e, "Export failed");
                Err(e)
            }
        }
    }

    async fn write_batch(
        &self,
        ctx: &ExportContext,
        signal: SignalKind,
        batch: &TelemetryBatch,
    ) -> Result<ExportOutcome> {
        let data = self.marshaller.marshal(batch)?;
        let blob_name = self.names.generate(signal, batch, Utc::now())?;
        let container = self.config.container.for_signal(signal);
        let content_type = self.marshaller.format().content_type();
        let size = data.len();

        let client = self.client.as_ref();
        let writer = &self.writer;
        let name = blob_name.as_str();
        self.backoff
            .run(ctx, signal, move || {
                writer.write(client, container, name, data.clone(), content_type)
            })
            .await?;

        tracing::debug!(
            account = client.url(),
            container,
            blob = name,
            size,
            records = batch.record_count(),
            "Exported telemetry blob"
        );

        Ok(ExportOutcome {
            container: container.to_string(),
            blob_name,
            bytes: size,
        })
    }
}
