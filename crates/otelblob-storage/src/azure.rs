//! Azure Blob Storage client
//!
//! Block blob uploads go through one `object_store` [`MicrosoftAzure`] store
//! per container, which signs requests and refreshes tokens. Get Blob
//! Properties, append blob creation and Append Block have no `object_store`
//! counterpart; they are sent over `reqwest` and authorized with the
//! credential the stores share.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use object_store::azure::{
    AzureCredential, AzureCredentialProvider, MicrosoftAzure, MicrosoftAzureBuilder,
};
use object_store::path::Path;
use object_store::{
    Attribute, Attributes, ClientOptions, CredentialProvider, ObjectStore, PutOptions, PutPayload,
    RetryConfig,
};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, IF_NONE_MATCH};
use reqwest::{Method, Request, Response, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use otelblob_common::error::{CredentialError, Error, UploadError};
use otelblob_common::Result;

use crate::client::{BlobClient, BlobProperties, BlobType};
use crate::shared_key::SharedKeyCredential;

/// Service version sent on direct requests; allows 100 MiB append blocks
pub const STORAGE_API_VERSION: &str = "2022-11-02";
/// Largest payload a single Append Block call accepts
pub const MAX_APPEND_BLOCK_BYTES: usize = 100 * 1024 * 1024;

const MS_VERSION: &str = "x-ms-version";
const MS_DATE: &str = "x-ms-date";
const MS_BLOB_TYPE: &str = "x-ms-blob-type";
const MS_ERROR_CODE: &str = "x-ms-error-code";
const STORE_NAME: &str = "MicrosoftAzure";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builder preset shared by every store: the exporter's own backoff policy
/// does the retrying, so `object_store` makes a single attempt.
pub fn store_builder(account: &str, endpoint: &str) -> MicrosoftAzureBuilder {
    let options = ClientOptions::new()
        .with_timeout(REQUEST_TIMEOUT)
        .with_connect_timeout(CONNECT_TIMEOUT)
        .with_allow_http(endpoint.starts_with("http://"));
    MicrosoftAzureBuilder::new()
        .with_account(account)
        .with_endpoint(endpoint.trim_end_matches('/').to_string())
        .with_client_options(options)
        .with_retry(RetryConfig {
            max_retries: 0,
            ..Default::default()
        })
}

pub struct AzureBlobClient {
    endpoint: Url,
    endpoint_str: String,
    http: reqwest::Client,
    stores: HashMap<String, MicrosoftAzure>,
    credentials: AzureCredentialProvider,
    /// Account key for direct requests; `object_store` keeps its copy private
    shared_key: Option<SharedKeyCredential>,
}

impl AzureBlobClient {
    /// Build a store for each of `containers` from `builder`. Every store
    /// after the first reuses the first one's credential so tokens are
    /// fetched and cached once.
    pub fn new(
        http: reqwest::Client,
        endpoint: &str,
        builder: MicrosoftAzureBuilder,
        containers: &[&str],
        shared_key: Option<SharedKeyCredential>,
    ) -> Result<Self> {
        let trimmed = endpoint.trim_end_matches('/');
        let endpoint = Url::parse(trimmed)
            .map_err(|e| Error::Config(format!("invalid storage url {trimmed:?}: {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::Config(format!("invalid storage url {trimmed:?}")));
        }

        let mut stores = HashMap::with_capacity(containers.len());
        let mut credentials: Option<AzureCredentialProvider> = None;
        for container in containers {
            if stores.contains_key(*container) {
                continue;
            }
            let mut container_builder = builder.clone().with_container_name(*container);
            if let Some(shared) = &credentials {
                container_builder = container_builder.with_credentials(shared.clone());
            }
            let store = container_builder.build().map_err(|e| {
                Error::Config(format!("invalid storage configuration for {container:?}: {e}"))
            })?;
            if credentials.is_none() {
                credentials = Some(store.credentials().clone());
            }
            stores.insert((*container).to_string(), store);
        }
        let credentials = credentials
            .ok_or_else(|| Error::Config("at least one container is required".to_string()))?;

        Ok(Self {
            endpoint,
            endpoint_str: trimmed.to_string(),
            http,
            stores,
            credentials,
            shared_key,
        })
    }

    /// Default HTTP client for direct storage requests
    pub fn http_client() -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))
    }

    /// Containers this client has a store for
    pub fn containers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stores.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn store(&self, container: &str) -> Result<&MicrosoftAzure> {
        self.stores.get(container).ok_or_else(|| {
            UploadError::InvalidRequest(format!("container {container:?} is not configured")).into()
        })
    }

    /// URL of a blob, with each path segment percent-encoded
    pub fn blob_url(&self, container: &str, name: &str, comp: Option<&str>) -> Result<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                Error::Upload(UploadError::InvalidRequest(format!(
                    "storage url {} cannot have a path",
                    self.endpoint_str
                )))
            })?;
            segments.pop_if_empty().push(container);
            segments.extend(name.split('/'));
        }
        if let Some(comp) = comp {
            url.query_pairs_mut().append_pair("comp", comp);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> Request {
        let mut request = Request::new(method, url);
        let headers = request.headers_mut();
        headers.insert(MS_VERSION, HeaderValue::from_static(STORAGE_API_VERSION));
        if let Ok(date) =
            HeaderValue::from_str(&Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        {
            headers.insert(MS_DATE, date);
        }
        request
    }

    fn put_request(&self, url: Url, body: Bytes, content_type: &str) -> Request {
        let mut request = self.request(Method::PUT, url);
        let headers = request.headers_mut();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        *request.body_mut() = Some(body.into());
        request
    }

    /// Authorize a direct request with the stores' current credential.
    async fn authorize(&self, request: &mut Request) -> Result<()> {
        let credential = self
            .credentials
            .get_credential()
            .await
            .map_err(credential_error)?;
        match credential.as_ref() {
            AzureCredential::AccessKey(_) => {
                let key = self.shared_key.as_ref().ok_or(CredentialError::Unavailable {
                    credential: "AccessKey",
                    message: "account key is not available for direct requests".to_string(),
                })?;
                key.sign(request)?;
            }
            AzureCredential::SASToken(pairs) => {
                request.url_mut().query_pairs_mut().extend_pairs(pairs.iter());
            }
            AzureCredential::BearerToken(token) => {
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| CredentialError::InvalidResponse(e.to_string()))?;
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            #[allow(unreachable_patterns)]
            _ => {
                return Err(CredentialError::Unavailable {
                    credential: STORE_NAME,
                    message: "unsupported credential kind".to_string(),
                }
                .into())
            }
        }
        Ok(())
    }

    async fn execute(&self, mut request: Request) -> Result<Response> {
        self.authorize(&mut request).await?;
        self.http
            .execute(request)
            .await
            .map_err(|e| transport_error(&e).into())
    }
}

#[async_trait]
impl BlobClient for AzureBlobClient {
    fn url(&self) -> &str {
        &self.endpoint_str
    }

    async fn put_block_blob(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<()> {
        let store = self.store(container)?;
        let path = Path::parse(name).map_err(|e| UploadError::InvalidRequest(e.to_string()))?;
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        store
            .put_opts(&path, PutPayload::from(data), options)
            .await
            .map(|_| ())
            .map_err(store_error)
    }

    async fn blob_properties(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<BlobProperties>> {
        let url = self.blob_url(container, name, None)?;
        let request = self.request(Method::HEAD, url);
        let response = self.execute(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response).await?;

        let headers = response.headers();
        let blob_type = headers
            .get(MS_BLOB_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(BlobType::Block.as_str())
            .parse::<BlobType>()
            .map_err(|e| Error::Upload(UploadError::InvalidRequest(e)))?;
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        Ok(Some(BlobProperties {
            blob_type,
            content_length,
        }))
    }

    async fn create_append_blob(
        &self,
        container: &str,
        name: &str,
        content_type: &str,
    ) -> Result<()> {
        let url = self.blob_url(container, name, None)?;
        let mut request = self.put_request(url, Bytes::new(), content_type);
        let headers = request.headers_mut();
        headers.insert(MS_BLOB_TYPE, HeaderValue::from_static(BlobType::Append.as_str()));
        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("*"));

        let response = self.execute(request).await?;
        match response.status() {
            // Lost a creation race, or it was already there
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => Ok(()),
            _ => check(response).await.map(|_| ()),
        }
    }

    async fn append_block(&self, container: &str, name: &str, data: Bytes) -> Result<()> {
        // One call per export: a partial multi-block append cannot be retried safely
        if data.len() > MAX_APPEND_BLOCK_BYTES {
            return Err(UploadError::InvalidRequest(format!(
                "append of {} bytes exceeds the {MAX_APPEND_BLOCK_BYTES} byte block limit",
                data.len()
            ))
            .into());
        }
        let url = self.blob_url(container, name, Some("appendblock"))?;
        let request = self.put_request(url, data, "application/octet-stream");
        let response = self.execute(request).await?;
        check(response).await.map(|_| ())
    }
}

fn transport_error(e: &reqwest::Error) -> UploadError {
    if e.is_timeout() {
        UploadError::TimedOut(e.to_string())
    } else {
        UploadError::Transport(e.to_string())
    }
}

/// Credential failures surface from `object_store` as generic errors; keep
/// our own credential errors (the default chain's) intact.
fn credential_error(e: object_store::Error) -> Error {
    if let object_store::Error::Generic { source, .. } = &e {
        if let Some(inner) = source.downcast_ref::<CredentialError>() {
            return inner.clone().into();
        }
    }
    CredentialError::TokenRequest {
        credential: STORE_NAME,
        message: e.to_string(),
        transient: true,
    }
    .into()
}

/// Map an `object_store` failure onto the upload error taxonomy.
pub(crate) fn store_error(e: object_store::Error) -> Error {
    use object_store::Error as StoreError;

    let status = match &e {
        StoreError::Generic { source, .. } if source.is::<CredentialError>() => {
            return credential_error(e);
        }
        StoreError::NotFound { .. } => 404,
        StoreError::AlreadyExists { .. } => 409,
        StoreError::Precondition { .. } => 412,
        StoreError::NotModified { .. } => 304,
        StoreError::InvalidPath { .. }
        | StoreError::NotSupported { .. }
        | StoreError::NotImplemented
        | StoreError::UnknownConfigurationKey { .. } => {
            return UploadError::InvalidRequest(e.to_string()).into();
        }
        _ => return UploadError::Transport(e.to_string()).into(),
    };
    UploadError::Service {
        status,
        code: None,
        message: e.to_string(),
    }
    .into()
}

/// Pass successful responses through; map the rest to a service error.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let code = response
        .headers()
        .get(MS_ERROR_CODE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    let message = xml_element(&body, "Message")
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| "request failed".to_string());

    Err(UploadError::Service {
        status: status.as_u16(),
        code,
        message,
    }
    .into())
}

/// Text of the first `<tag>` element in an error body
fn xml_element(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].trim().to_string())
}
