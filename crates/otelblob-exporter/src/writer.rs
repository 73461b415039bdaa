//! Write strategies
//!
//! Stream mode writes each payload as its own block blob. Append mode grows
//! an append blob, putting the separator between consecutive payloads.
//! Appends from independent exporters to the same blob are not serialized.

use bytes::{BufMut, Bytes, BytesMut};
use otelblob_common::config::AppendBlobConfig;
use otelblob_common::error::UploadError;
use otelblob_common::Result;
use otelblob_storage::{BlobClient, BlobType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStrategy {
    Stream,
    Append { separator: Bytes },
}

impl From<&AppendBlobConfig> for WriteStrategy {
    fn from(config: &AppendBlobConfig) -> Self {
        if config.enabled {
            WriteStrategy::Append {
                separator: Bytes::from(config.separator.clone()),
            }
        } else {
            WriteStrategy::Stream
        }
    }
}

impl WriteStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteStrategy::Stream => "stream",
            WriteStrategy::Append { .. } => "append",
        }
    }

    pub async fn write(
        &self,
        client: &dyn BlobClient,
        container: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<()> {
        match self {
            WriteStrategy::Stream => {
                client
                    .put_block_blob(container, name, data, content_type)
                    .await
            }
            WriteStrategy::Append { separator } => {
                append(client, container, name, data, content_type, separator).await
            }
        }
    }
}

async fn append(
    client: &dyn BlobClient,
    container: &str,
    name: &str,
    data: Bytes,
    content_type: &str,
    separator: &Bytes,
) -> Result<()> {
    let existing = match client.blob_properties(container, name).await? {
        Some(props) => props,
        None => {
            client
                .create_append_blob(container, name, content_type)
                .await?;
            // Another writer may have created it first.
            client
                .blob_properties(container, name)
                .await?
                .ok_or_else(|| {
                    UploadError::InvalidRequest(format!(
                        "append blob {container}/{name} missing after create"
                    ))
                })?
        }
    };

    if existing.blob_type != BlobType::Append {
        return Err(UploadError::NotAppendBlob(format!("{container}/{name}")).into());
    }
    if data.is_empty() {
        return Ok(());
    }

    let block = if existing.content_length > 0 && !separator.is_empty() {
        let mut buf = BytesMut::with_capacity(separator.len() + data.len());
        buf.put_slice(separator);
        buf.put_slice(&data);
        buf.freeze()
    } else {
        data
    };

    client.append_block(container, name, block).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use otelblob_common::Error;
    use otelblob_storage::MemoryBlobClient;

    fn append_mode(separator: &str) -> WriteStrategy {
        WriteStrategy::from(&AppendBlobConfig {
            enabled: true,
            separator: separator.to_string(),
        })
    }

    #[tokio::test]
    async fn test_append_puts_separator_between_payloads() {
        let client = MemoryBlobClient::new();
        let strategy = append_mode("\n");
        for payload in ["A", "B"] {
            strategy
                .write(&client, "logs", "day.json", Bytes::from(payload), "application/json")
                .await
                .unwrap();
        }
        assert_eq!(client.get("logs", "day.json").await.unwrap(), Bytes::from("A\nB"));
        assert_eq!(
            client.blob("logs", "day.json").await.unwrap().blob_type,
            BlobType::Append
        );
    }

    #[tokio::test]
    async fn test_append_without_separator_concatenates() {
        let client = MemoryBlobClient::new();
        let strategy = append_mode("");
        for payload in ["A", "B"] {
            strategy
                .write(&client, "c", "n", Bytes::from(payload), "text/plain")
                .await
                .unwrap();
        }
        assert_eq!(client.get("c", "n").await.unwrap(), Bytes::from("AB"));
    }

    #[tokio::test]
    async fn test_empty_payload_creates_blob_only() {
        let client = MemoryBlobClient::new();
        let strategy = append_mode("\n");
        strategy
            .write(&client, "c", "n", Bytes::new(), "text/plain")
            .await
            .unwrap();
        strategy
            .write(&client, "c", "n", Bytes::from("A"), "text/plain")
            .await
            .unwrap();
        assert_eq!(client.get("c", "n").await.unwrap(), Bytes::from("A"));
    }

    #[tokio::test]
    async fn test_append_to_block_blob_is_permanent_error() {
        let client = MemoryBlobClient::new();
        client
            .put_block_blob("c", "n", Bytes::from("x"), "text/plain")
            .await
            .unwrap();

        let err = append_mode("\n")
            .write(&client, "c", "n", Bytes::from("A"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upload(UploadError::NotAppendBlob(_))));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_stream_overwrites() {
        let client = MemoryBlobClient::new();
        let strategy = WriteStrategy::from(&AppendBlobConfig::default());
        assert_eq!(strategy, WriteStrategy::Stream);
        for payload in ["A", "B"] {
            strategy
                .write(&client, "c", "n", Bytes::from(payload), "text/plain")
                .await
                .unwrap();
        }
        assert_eq!(client.get("c", "n").await.unwrap(), Bytes::from("B"));
    }
}
