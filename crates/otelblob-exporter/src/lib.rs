//! otelblob Exporter - telemetry batches to blob storage
//!
//! - [`marshal`]: JSON, protobuf and parquet encodings of OTLP batches
//! - [`naming`]: static and templated blob names
//! - [`writer`]: stream (block blob) and append writes
//! - [`retry`] and [`context`]: backoff, cancellation and deadlines
//! - [`BlobExporter`]: the per-batch pipeline tying them together

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod attributes;
pub mod context;
pub mod exporter;
pub mod marshal;
pub mod naming;
pub mod retry;
pub mod writer;

pub use context::ExportContext;
pub use exporter::{BlobExporter, ExportOutcome};
pub use marshal::{marshaller_for, new_marshaller, Marshaller};
pub use naming::BlobNameGenerator;
pub use retry::BackoffPolicy;
pub use writer::WriteStrategy;
