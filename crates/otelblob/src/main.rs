//! otelblob - OTLP telemetry to Azure Blob Storage
//!
//! Single binary that can:
//! - Validate an exporter configuration without touching the network
//! - Export a traces, logs or metrics batch file as a blob
//! - Dry-run an export against an in-memory store to preview blob names

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use otelblob_common::{ExporterConfig, SignalKind};
use otelblob_exporter::{BackoffPolicy, BlobExporter, ExportContext};
use otelblob_storage::MemoryBlobClient;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod cli;

use cli::{InputFormat, LogFormat};

#[derive(Parser)]
#[command(name = "otelblob")]
#[command(author, version, about = "Export OTLP telemetry to Azure Blob Storage", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "text", env = "OTELBLOB_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long, env = "OTELBLOB_CONFIG")]
        config: PathBuf,
    },

    /// Export one batch file
    Export {
        /// Configuration file path
        #[arg(short, long, env = "OTELBLOB_CONFIG")]
        config: PathBuf,

        /// Signal contained in the input (traces, logs, metrics)
        #[arg(short, long)]
        signal: SignalKind,

        /// OTLP export request file
        #[arg(short, long)]
        input: PathBuf,

        /// Input encoding, guessed from the file extension when omitted
        #[arg(long, value_enum)]
        input_format: Option<InputFormat>,

        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Make a single attempt regardless of retry_on_failure
        #[arg(long)]
        no_retry: bool,

        /// Write to an in-memory store instead of the configured account
        #[arg(long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("otelblob=info".parse()?)
        .add_directive("otelblob_exporter=info".parse()?)
        .add_directive("otelblob_storage=info".parse()?);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Commands::Validate { config } => {
            let config = ExporterConfig::load(&config).await?;
            config.validate()?;
            println!(
                "Configuration OK: auth={}, format={}, append_blob={}",
                config.auth.kind(),
                config.format,
                config.append_blob.enabled
            );
        }

        Commands::Export {
            config,
            signal,
            input,
            input_format,
            timeout_ms,
            no_retry,
            dry_run,
        } => {
            let config = ExporterConfig::load(&config).await?;
            let batch = cli::read_batch(&input, signal, input_format).await?;

            let mut exporter = if dry_run {
                BlobExporter::with_client(config, Arc::new(MemoryBlobClient::new()))?
            } else {
                BlobExporter::new(config)?
            };
            if no_retry {
                exporter = exporter.with_backoff(BackoffPolicy::disabled());
            }

            let shutdown = CancellationToken::new();
            let mut ctx = ExportContext::with_token(shutdown.clone());
            if let Some(ms) = timeout_ms {
                ctx = ctx.timeout(Duration::from_millis(ms));
            }

            // Handle shutdown gracefully
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown signal received, cancelling export");
                    shutdown.cancel();
                }
            });

            let outcome = exporter.export(&ctx, &batch).await?;

            info!(
                container = %outcome.container,
                blob = %outcome.blob_name,
                bytes = outcome.bytes,
                records = batch.record_count(),
                dry_run,
                "Export complete"
            );
            println!("{}/{}", outcome.container, outcome.blob_name);
        }

        Commands::Version => {
            println!("otelblob version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
