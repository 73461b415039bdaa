//! Metrics for the export stage
//!
//! Thin wrappers over the `metrics` facade; the host process installs the
//! recorder.
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]

use metrics::{counter, histogram};
use std::time::Instant;

use crate::types::SignalKind;

// ============================================================================
// Export Metrics
// ============================================================================

/// Record a blob successfully written
pub fn record_export(signal: SignalKind, format: &str, bytes: u64) {
    counter!("otelblob_exported_blobs_total", "signal" => signal.as_str(), "format" => format.to_string())
        .increment(1);
    counter!("otelblob_exported_bytes_total", "signal" => signal.as_str()).increment(bytes);
}

/// Record leaf records carried by an exported blob
pub fn record_exported_records(signal: SignalKind, records: u64) {
    counter!("otelblob_exported_records_total", "signal" => signal.as_str()).increment(records);
}

/// Record a failed export call
pub fn record_export_failure(signal: SignalKind, retryable: bool) {
    counter!(
        "otelblob_export_failures_total",
        "signal" => signal.as_str(),
        "retryable" => retryable.to_string()
    )
    .increment(1);
}

/// Record export call latency
pub fn record_export_duration(signal: SignalKind, duration_secs: f64) {
    histogram!("otelblob_export_duration_seconds", "signal" => signal.as_str())
        .record(duration_secs);
}

/// Record a template render that fell back to the static pattern
pub fn record_template_fallback(signal: SignalKind) {
    counter!("otelblob_blob_name_template_fallbacks_total", "signal" => signal.as_str())
        .increment(1);
}

// ============================================================================
// Storage Metrics
// ============================================================================

/// Record a retried storage call
pub fn record_retry(signal: SignalKind, attempt: u32) {
    counter!("otelblob_export_retries_total", "signal" => signal.as_str()).increment(1);
    histogram!("otelblob_export_retry_attempt", "signal" => signal.as_str())
        .record(f64::from(attempt));
}

/// Record the source a default credential chain settled on
pub fn record_credential_selected(credential: &'static str) {
    counter!("otelblob_credential_selections_total", "credential" => credential).increment(1);
}

// ============================================================================
// Timer
// ============================================================================

/// Measures one export call and records it on drop
pub struct ExportTimer {
    start: Instant,
    signal: SignalKind,
}

impl ExportTimer {
    #[must_use]
    pub fn new(signal: SignalKind) -> Self {
        Self {
            start: Instant::now(),
            signal,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for ExportTimer {
    fn drop(&mut self) {
        record_export_duration(self.signal, self.start.elapsed().as_secs_f64());
    }
}
