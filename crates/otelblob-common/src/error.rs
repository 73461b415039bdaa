//! Error types for otelblob
//!
//! Every failure the export stage can report is one variant of [`Error`].
//! Startup-class failures (configuration, connection-string parsing) abort
//! startup; everything else is returned to the caller of a single export.

use thiserror::Error;

/// Result type alias using otelblob's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for otelblob
#[derive(Error, Debug)]
pub enum Error {
    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Credential Errors
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    // Encoding Errors
    #[error("Marshal error: {0}")]
    Marshal(#[from] MarshalError),

    // Naming Errors
    #[error("Blob name error: {0}")]
    Naming(#[from] NamingError),

    // Storage Errors
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Export cancelled")]
    Cancelled,

    #[error("Export timed out after {0}ms")]
    Timeout(u64),

    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal Errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a wrapping retry policy may try the same call again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Upload(e) => e.is_retryable(),
            Error::Credential(e) => e.is_retryable(),
            Error::Timeout(_) => true,
            _ => false,
        }
    }

    /// Whether the error can only occur while building the exporter.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::Credential(
                    CredentialError::InvalidConnectionString(_)
                        | CredentialError::InvalidAccountKey(_)
                )
        )
    }
}

/// Credential acquisition errors
#[derive(Error, Debug, Clone)]
pub enum CredentialError {
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Invalid account key: {0}")]
    InvalidAccountKey(String),

    #[error("{credential} token request failed: {message}")]
    TokenRequest {
        credential: &'static str,
        message: String,
        transient: bool,
    },

    #[error("{credential} is unavailable: {message}")]
    Unavailable {
        credential: &'static str,
        message: String,
    },

    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    #[error("No credential source succeeded: {}", .0.join("; "))]
    ChainExhausted(Vec<String>),
}

impl CredentialError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CredentialError::TokenRequest { transient: true, .. })
    }
}

/// Encoding errors
#[derive(Error, Debug)]
pub enum MarshalError {
    #[error("JSON encoding failed: {0}")]
    Json(String),

    #[error("Protobuf encoding failed: {0}")]
    Proto(String),

    #[error("Parquet encoding failed: {0}")]
    Parquet(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Blob name generation errors
#[derive(Error, Debug)]
pub enum NamingError {
    #[error("No blob name pattern configured for {0}")]
    MissingPattern(String),

    #[error("Invalid time format in blob name pattern {0:?}")]
    InvalidTimeFormat(String),

    #[error("Serial number range must be positive, got {0}")]
    InvalidSerialRange(i64),
}

/// Blob storage errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    TimedOut(String),

    #[error("Storage service returned {status}{}: {message}", code_suffix(.code))]
    Service {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Blob {0} exists and is not an append blob")]
    NotAppendBlob(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl UploadError {
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Transport(_) | UploadError::TimedOut(_) => true,
            UploadError::Service { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            UploadError::NotAppendBlob(_) | UploadError::InvalidRequest(_) => false,
        }
    }

    /// HTTP status reported by the storage service, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            UploadError::Service { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(status: u16) -> Error {
        Error::Upload(UploadError::Service {
            status,
            code: None,
            message: "x".to_string(),
        })
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(service(status).is_retryable(), "status {status}");
        }
        assert!(Error::Upload(UploadError::Transport("reset".into())).is_retryable());
        assert!(Error::Timeout(100).is_retryable());
    }

    #[test]
    fn auth_and_client_errors_are_permanent() {
        for status in [400, 401, 403, 404, 409, 412] {
            assert!(!service(status).is_retryable(), "status {status}");
        }
        assert!(!Error::Upload(UploadError::NotAppendBlob("a".into())).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());
    }

    #[test]
    fn service_error_display_includes_code() {
        let err = UploadError::Service {
            status: 403,
            code: Some("AuthorizationFailure".into()),
            message: "denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "Storage service returned 403 (AuthorizationFailure): denied"
        );
    }

    #[test]
    fn malformed_credentials_are_startup_errors() {
        assert!(Error::Credential(CredentialError::InvalidAccountKey("bad base64".into())).is_startup());
        assert!(Error::Credential(CredentialError::InvalidConnectionString("x".into())).is_startup());
        assert!(!Error::Credential(CredentialError::ChainExhausted(vec![])).is_startup());
        assert!(!service(403).is_startup());
    }

    #[test]
    fn chain_exhausted_lists_every_source() {
        let err = CredentialError::ChainExhausted(vec!["env: missing".into(), "cli: missing".into()]);
        assert_eq!(
            err.to_string(),
            "No credential source succeeded: env: missing; cli: missing"
        );
    }
}
