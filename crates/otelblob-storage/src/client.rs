//! Blob client abstraction
//!
//! The write strategy only needs four object operations; everything that
//! talks to a real storage account implements [`BlobClient`].

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

use otelblob_common::Result;

/// Kind of an existing blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobType {
    Block,
    Append,
    Page,
}

impl BlobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobType::Block => "BlockBlob",
            BlobType::Append => "AppendBlob",
            BlobType::Page => "PageBlob",
        }
    }
}

impl fmt::Display for BlobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlobType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "BlockBlob" => Ok(BlobType::Block),
            "AppendBlob" => Ok(BlobType::Append),
            "PageBlob" => Ok(BlobType::Page),
            other => Err(format!("unknown blob type: {other}")),
        }
    }
}

/// Properties of an existing blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    pub blob_type: BlobType,
    pub content_length: u64,
}

/// Object operations against a blob storage account
#[async_trait]
pub trait BlobClient: Send + Sync {
    /// Account endpoint, used for logging
    fn url(&self) -> &str;

    /// Create or overwrite a block blob with `data`
    async fn put_block_blob(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<()>;

    /// Properties of `name`, or `None` if it does not exist
    async fn blob_properties(&self, container: &str, name: &str)
        -> Result<Option<BlobProperties>>;

    /// Create an empty append blob unless one already exists
    async fn create_append_blob(&self, container: &str, name: &str, content_type: &str)
        -> Result<()>;

    /// Append `data` to an existing append blob
    async fn append_block(&self, container: &str, name: &str, data: Bytes) -> Result<()>;
}
