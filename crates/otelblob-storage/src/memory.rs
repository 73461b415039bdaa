//! In-memory blob store
//!
//! Backed by `object_store`'s [`InMemory`] with one path prefix per
//! container. Mirrors the blob semantics the exporter relies on (overwrite,
//! append blob creation, blob type conflicts) without a network.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    Attribute, Attributes, ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion,
};
use parking_lot::RwLock;
use std::collections::HashSet;

use otelblob_common::error::{Error, UploadError};
use otelblob_common::Result;

use crate::azure::store_error;
use crate::client::{BlobClient, BlobProperties, BlobType};

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub blob_type: BlobType,
    pub content_type: String,
    pub data: Bytes,
}

/// Blob client over an in-process object store
#[derive(Debug, Default)]
pub struct MemoryBlobClient {
    store: InMemory,
    /// Paths created as append blobs; everything else is a block blob
    append_blobs: RwLock<HashSet<Path>>,
}

impl MemoryBlobClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content of a stored blob
    pub async fn get(&self, container: &str, name: &str) -> Option<Bytes> {
        self.blob(container, name).await.map(|b| b.data)
    }

    pub async fn blob(&self, container: &str, name: &str) -> Option<StoredBlob> {
        let path = blob_path(container, name).ok()?;
        let result = self.store.get(&path).await.ok()?;
        let content_type = result
            .attributes
            .get(&Attribute::ContentType)
            .map(|value| {
                let value: &str = value.as_ref();
                value.to_string()
            })
            .unwrap_or_default();
        let data = result.bytes().await.ok()?;
        Some(StoredBlob {
            blob_type: self.blob_type(&path),
            content_type,
            data,
        })
    }

    /// Names of every blob in `container`, sorted
    pub async fn blob_names(&self, container: &str) -> Vec<String> {
        let prefix = format!("{container}/");
        let mut names: Vec<String> = self
            .store
            .list(Some(&Path::from(container)))
            .map_ok(|meta| {
                let location = meta.location.to_string();
                location
                    .strip_prefix(prefix.as_str())
                    .unwrap_or(&location)
                    .to_string()
            })
            .try_collect()
            .await
            .unwrap_or_default();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.store
            .list(None)
            .try_collect::<Vec<_>>()
            .await
            .map_or(0, |blobs| blobs.len())
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn blob_type(&self, path: &Path) -> BlobType {
        if self.append_blobs.read().contains(path) {
            BlobType::Append
        } else {
            BlobType::Block
        }
    }
}

fn blob_path(container: &str, name: &str) -> Result<Path> {
    Path::parse(format!("{container}/{name}"))
        .map_err(|e| UploadError::InvalidRequest(e.to_string()).into())
}

fn content_type_attributes(content_type: &str) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert(Attribute::ContentType, content_type.to_string().into());
    attributes
}

fn not_found(container: &str, name: &str) -> Error {
    UploadError::Service {
        status: 404,
        code: Some("BlobNotFound".to_string()),
        message: format!("{container}/{name} does not exist"),
    }
    .into()
}

#[async_trait]
impl BlobClient for MemoryBlobClient {
    fn url(&self) -> &str {
        "memory://"
    }

    async fn put_block_blob(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<()> {
        let path = blob_path(container, name)?;
        let options = PutOptions {
            attributes: content_type_attributes(content_type),
            ..Default::default()
        };
        self.store
            .put_opts(&path, PutPayload::from(data), options)
            .await
            .map_err(store_error)?;
        self.append_blobs.write().remove(&path);
        Ok(())
    }

    async fn blob_properties(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<BlobProperties>> {
        let path = blob_path(container, name)?;
        match self.store.head(&path).await {
            Ok(meta) => Ok(Some(BlobProperties {
                blob_type: self.blob_type(&path),
                content_length: meta.size as u64,
            })),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(store_error(e)),
        }
    }

    async fn create_append_blob(
        &self,
        container: &str,
        name: &str,
        content_type: &str,
    ) -> Result<()> {
        let path = blob_path(container, name)?;
        let options = PutOptions {
            mode: PutMode::Create,
            attributes: content_type_attributes(content_type),
            ..Default::default()
        };
        match self.store.put_opts(&path, PutPayload::new(), options).await {
            Ok(_) => {
                self.append_blobs.write().insert(path);
                Ok(())
            }
            // Already there: left as it is, like the service's If-None-Match
            Err(object_store::Error::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(store_error(e)),
        }
    }

    async fn append_block(&self, container: &str, name: &str, data: Bytes) -> Result<()> {
        let path = blob_path(container, name)?;
        loop {
            let current = match self.store.get(&path).await {
                Ok(current) => current,
                Err(object_store::Error::NotFound { .. }) => return Err(not_found(container, name)),
                Err(e) => return Err(store_error(e)),
            };
            if self.blob_type(&path) != BlobType::Append {
                return Err(UploadError::Service {
                    status: 409,
                    code: Some("InvalidBlobType".to_string()),
                    message: format!("{container}/{name} is a {}", BlobType::Block),
                }
                .into());
            }

            let version = UpdateVersion {
                e_tag: current.meta.e_tag.clone(),
                version: current.meta.version.clone(),
            };
            let attributes = current.attributes.clone();
            let existing = current.bytes().await.map_err(store_error)?;
            let mut combined = BytesMut::with_capacity(existing.len() + data.len());
            combined.extend_from_slice(&existing);
            combined.extend_from_slice(&data);

            let options = PutOptions {
                mode: PutMode::Update(version),
                attributes,
                ..Default::default()
            };
            match self
                .store
                .put_opts(&path, PutPayload::from(combined.freeze()), options)
                .await
            {
                Ok(_) => return Ok(()),
                // A concurrent append won; read again and reapply
                Err(object_store::Error::Precondition { .. }) => continue,
                Err(e) => return Err(store_error(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_overwrites() {
        let client = MemoryBlobClient::new();
        client
            .put_block_blob("c", "a.json", Bytes::from_static(b"one"), "application/json")
            .await
            .unwrap();
        client
            .put_block_blob("c", "a.json", Bytes::from_static(b"two"), "application/json")
            .await
            .unwrap();
        assert_eq!(
            client.get("c", "a.json").await.unwrap(),
            Bytes::from_static(b"two")
        );
        assert_eq!(client.len().await, 1);

        let blob = client.blob("c", "a.json").await.unwrap();
        assert_eq!(blob.content_type, "application/json");
        assert_eq!(blob.blob_type, BlobType::Block);
    }

    #[tokio::test]
    async fn test_create_append_blob_keeps_existing_content() {
        let client = MemoryBlobClient::new();
        client.create_append_blob("c", "log", "text/plain").await.unwrap();
        client.append_block("c", "log", Bytes::from_static(b"x")).await.unwrap();
        client.create_append_blob("c", "log", "text/plain").await.unwrap();

        let props = client.blob_properties("c", "log").await.unwrap().unwrap();
        assert_eq!(props.blob_type, BlobType::Append);
        assert_eq!(props.content_length, 1);
        assert_eq!(client.blob("c", "log").await.unwrap().content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_append_to_block_blob_fails() {
        let client = MemoryBlobClient::new();
        client
            .put_block_blob("c", "b", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap();
        let err = client
            .append_block("c", "b", Bytes::from_static(b"y"))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_append_to_missing_blob_is_not_found() {
        let client = MemoryBlobClient::new();
        let err = client
            .append_block("c", "missing", Bytes::from_static(b"y"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Upload(UploadError::Service { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_appends_all_land() {
        let client = std::sync::Arc::new(MemoryBlobClient::new());
        client.create_append_blob("c", "log", "text/plain").await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move {
                    client
                        .append_block("c", "log", Bytes::from_static(b"ab"))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(client.get("c", "log").await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_blob_names_are_per_container() {
        let client = MemoryBlobClient::new();
        for (container, name) in [("a", "2024/x.json"), ("a", "1.json"), ("b", "y.json")] {
            client
                .put_block_blob(container, name, Bytes::from_static(b"{}"), "application/json")
                .await
                .unwrap();
        }
        assert_eq!(client.blob_names("a").await, vec!["1.json", "2024/x.json"]);
        assert_eq!(client.blob_names("b").await, vec!["y.json"]);
        assert!(client.blob_names("c").await.is_empty());
        assert!(!client.is_empty().await);
    }
}
