//! otelblob Storage - blob clients and credentials
//!
//! - [`BlobClient`]: the object operations the exporter writes through
//! - [`AzureBlobClient`]: Azure Blob Storage over `object_store`, plus direct
//!   append blob requests
//! - [`CredentialResolver`]: authentication strategy to client
//! - [`MemoryBlobClient`]: in-process store for tests and dry runs

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod azure;
pub mod client;
pub mod connection_string;
pub mod credential;
pub mod memory;
pub mod resolver;
pub mod shared_key;

pub use azure::AzureBlobClient;
pub use client::{BlobClient, BlobProperties, BlobType};
pub use memory::MemoryBlobClient;
pub use resolver::CredentialResolver;
