//! otelblob Common - Shared configuration and types
//!
//! This crate provides functionality used across all otelblob components:
//! - Error types and retry classification
//! - Exporter configuration and validation
//! - Metrics helpers
//! - Signal, format and batch type definitions

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::ExporterConfig;
pub use error::{Error, Result};
pub use types::*;
