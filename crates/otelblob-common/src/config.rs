//! Configuration management for otelblob

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{FormatType, SignalKind};

pub const DEFAULT_TRACES_FORMAT: &str = "%Y/%m/%d/traces_%H_%M_%S.json";
pub const DEFAULT_LOGS_FORMAT: &str = "%Y/%m/%d/logs_%H_%M_%S.json";
pub const DEFAULT_METRICS_FORMAT: &str = "%Y/%m/%d/metrics_%H_%M_%S.json";

/// Main configuration structure for the blob exporter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Storage account endpoint, e.g. `https://account.blob.core.windows.net`.
    /// May be empty only when authenticating with a connection string.
    #[serde(default)]
    pub url: String,

    /// Destination container per signal
    #[serde(default)]
    pub container: ContainerConfig,

    /// Authentication strategy
    #[serde(default)]
    pub auth: AuthConfig,

    /// Blob naming
    #[serde(default)]
    pub blob_name_format: BlobNameFormat,

    /// Payload encoding: json, proto or parquet
    #[serde(default = "default_format")]
    pub format: String,

    /// Append blob behaviour
    #[serde(default)]
    pub append_blob: AppendBlobConfig,

    /// Backoff applied by the retry wrapper
    #[serde(default)]
    pub retry_on_failure: BackOffConfig,
}

fn default_format() -> String {
    FormatType::Json.as_str().to_string()
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            container: ContainerConfig::default(),
            auth: AuthConfig::default(),
            blob_name_format: BlobNameFormat::default(),
            format: default_format(),
            append_blob: AppendBlobConfig::default(),
            retry_on_failure: BackOffConfig::default(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a YAML/TOML/JSON file.
    ///
    /// `${VAR}` and `${env:VAR}` references are expanded from the process
    /// environment before parsing.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        let content = expand_env(&content);

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        match extension {
            "toml" => toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse TOML config: {}", e))),
            "yaml" | "yml" => Self::from_yaml(&content),
            _ => serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e))),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))
    }

    /// The configured payload format.
    pub fn format_type(&self) -> Result<FormatType> {
        self.format.parse().map_err(Error::Config)
    }

    /// Check every startup invariant. No network access happens here.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() && !matches!(self.auth, AuthConfig::ConnectionString { .. }) {
            return Err(Error::Config(
                "url cannot be empty when auth type is not connection_string".to_string(),
            ));
        }

        self.auth.validate()?;
        self.format_type()?;
        self.blob_name_format.validate()?;

        if self.append_blob.enabled && self.format_type()? == FormatType::Parquet {
            tracing::warn!("append_blob with parquet format produces blobs that parquet readers cannot open");
        }

        self.retry_on_failure.validate()
    }
}

/// Container names per signal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub traces: String,
    pub logs: String,
    pub metrics: String,
}

impl ContainerConfig {
    pub fn for_signal(&self, signal: SignalKind) -> &str {
        match signal {
            SignalKind::Traces => &self.traces,
            SignalKind::Logs => &self.logs,
            SignalKind::Metrics => &self.metrics,
        }
    }

    /// Every configured container, without duplicates, in signal order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::with_capacity(3);
        for name in [&self.traces, &self.logs, &self.metrics] {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            traces: "traces".to_string(),
            logs: "logs".to_string(),
            metrics: "metrics".to_string(),
        }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Authentication strategy, discriminated by `type`
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    ConnectionString {
        #[serde(default)]
        connection_string: String,
    },
    ServicePrincipal {
        #[serde(default)]
        tenant_id: String,
        #[serde(default)]
        client_id: String,
        #[serde(default)]
        client_secret: String,
    },
    SystemManagedIdentity,
    UserManagedIdentity {
        #[serde(default)]
        client_id: String,
    },
    WorkloadIdentity {
        #[serde(default)]
        tenant_id: String,
        #[serde(default)]
        client_id: String,
        #[serde(default)]
        federated_token_file: String,
    },
    #[serde(alias = "default_credential_chain")]
    DefaultCredentials,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig::ConnectionString {
            connection_string: String::new(),
        }
    }
}

impl AuthConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthConfig::ConnectionString { .. } => "connection_string",
            AuthConfig::ServicePrincipal { .. } => "service_principal",
            AuthConfig::SystemManagedIdentity => "system_managed_identity",
            AuthConfig::UserManagedIdentity { .. } => "user_managed_identity",
            AuthConfig::WorkloadIdentity { .. } => "workload_identity",
            AuthConfig::DefaultCredentials => "default_credentials",
        }
    }

    /// Required-field checks for the selected variant.
    pub fn validate(&self) -> Result<()> {
        match self {
            AuthConfig::ConnectionString { connection_string } => {
                if connection_string.is_empty() {
                    return Err(Error::Config(
                        "connection_string cannot be empty when auth type is connection_string"
                            .to_string(),
                    ));
                }
            }
            AuthConfig::ServicePrincipal {
                tenant_id,
                client_id,
                client_secret,
            } => {
                if tenant_id.is_empty() || client_id.is_empty() || client_secret.is_empty() {
                    return Err(Error::Config(
                        "tenant_id, client_id and client_secret cannot be empty when auth type is service_principal"
                            .to_string(),
                    ));
                }
            }
            AuthConfig::UserManagedIdentity { client_id } => {
                if client_id.is_empty() {
                    return Err(Error::Config(
                        "client_id cannot be empty when auth type is user_managed_identity"
                            .to_string(),
                    ));
                }
            }
            AuthConfig::WorkloadIdentity {
                tenant_id,
                client_id,
                federated_token_file,
            } => {
                if tenant_id.is_empty() || client_id.is_empty() || federated_token_file.is_empty()
                {
                    return Err(Error::Config(
                        "tenant_id, client_id and federated_token_file cannot be empty when auth type is workload_identity"
                            .to_string(),
                    ));
                }
            }
            AuthConfig::SystemManagedIdentity | AuthConfig::DefaultCredentials => {}
        }
        Ok(())
    }
}

const REDACTED: &str = "***";

fn redact(value: &str) -> &str {
    if value.is_empty() {
        ""
    } else {
        REDACTED
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthConfig::ConnectionString { connection_string } => f
                .debug_struct("ConnectionString")
                .field("connection_string", &redact(connection_string))
                .finish(),
            AuthConfig::ServicePrincipal {
                tenant_id,
                client_id,
                client_secret,
            } => f
                .debug_struct("ServicePrincipal")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .field("client_secret", &redact(client_secret))
                .finish(),
            AuthConfig::SystemManagedIdentity => f.write_str("SystemManagedIdentity"),
            AuthConfig::UserManagedIdentity { client_id } => f
                .debug_struct("UserManagedIdentity")
                .field("client_id", client_id)
                .finish(),
            AuthConfig::WorkloadIdentity {
                tenant_id,
                client_id,
                federated_token_file,
            } => f
                .debug_struct("WorkloadIdentity")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .field("federated_token_file", federated_token_file)
                .finish(),
            AuthConfig::DefaultCredentials => f.write_str("DefaultCredentials"),
        }
    }
}

// ============================================================================
// Blob Naming
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobNameFormat {
    /// strftime pattern, or a template when `template_enabled` is set
    pub traces_format: String,
    pub logs_format: String,
    pub metrics_format: String,
    /// Exclusive upper bound of the random serial suffix
    pub serial_num_range: i64,
    /// Put the suffix before the file extension instead of at the end
    pub serial_num_before_extension: bool,
    pub template_enabled: bool,
    /// Values exposed to templates through `param("key")`
    pub params: BTreeMap<String, String>,
}

impl Default for BlobNameFormat {
    fn default() -> Self {
        Self {
            traces_format: DEFAULT_TRACES_FORMAT.to_string(),
            logs_format: DEFAULT_LOGS_FORMAT.to_string(),
            metrics_format: DEFAULT_METRICS_FORMAT.to_string(),
            serial_num_range: 10000,
            serial_num_before_extension: false,
            template_enabled: false,
            params: BTreeMap::new(),
        }
    }
}

impl BlobNameFormat {
    pub fn pattern_for(&self, signal: SignalKind) -> &str {
        match signal {
            SignalKind::Traces => &self.traces_format,
            SignalKind::Logs => &self.logs_format,
            SignalKind::Metrics => &self.metrics_format,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.serial_num_range <= 0 {
            return Err(Error::Config(format!(
                "serial_num_range must be positive, got {}",
                self.serial_num_range
            )));
        }

        for signal in SignalKind::ALL {
            let pattern = self.pattern_for(signal);
            if pattern.is_empty() {
                continue;
            }
            let static_pattern = if self.template_enabled {
                strip_template_actions(pattern)
            } else {
                pattern.to_string()
            };
            if !is_valid_time_format(&static_pattern) {
                return Err(Error::Config(format!(
                    "{}_format is not a valid time format: {:?}",
                    signal, pattern
                )));
            }
        }
        Ok(())
    }
}

/// Whether chrono accepts every directive in `pattern`.
pub fn is_valid_time_format(pattern: &str) -> bool {
    !StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error))
}

/// The pattern with every `{{ ... }}` action removed; used as the static
/// fallback for a template. An unterminated action is kept verbatim.
pub fn strip_template_actions(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(start) = rest.find("{{") {
        match rest[start + 2..].find("}}") {
            Some(end) => {
                out.push_str(&rest[..start]);
                rest = &rest[start + 2 + end + 2..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

// ============================================================================
// Write Behaviour
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppendBlobConfig {
    pub enabled: bool,
    /// Written between consecutive payloads of the same blob; empty
    /// unless configured, so payloads are concatenated as-is
    pub separator: String,
}

impl Default for AppendBlobConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            separator: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackOffConfig {
    pub enabled: bool,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    /// Zero retries forever
    pub max_elapsed_time_ms: u64,
    pub multiplier: f64,
    pub randomization_factor: f64,
}

impl Default for BackOffConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_interval_ms: 5_000,
            max_interval_ms: 30_000,
            max_elapsed_time_ms: 300_000, // 5 minutes
            multiplier: 1.5,
            randomization_factor: 0.5,
        }
    }
}

impl BackOffConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.multiplier < 1.0 {
            return Err(Error::Config(
                "retry_on_failure.multiplier must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.randomization_factor) {
            return Err(Error::Config(
                "retry_on_failure.randomization_factor must be within [0, 1]".to_string(),
            ));
        }
        if self.max_interval_ms < self.initial_interval_ms {
            return Err(Error::Config(
                "retry_on_failure.max_interval_ms must not be below initial_interval_ms"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Environment Expansion
// ============================================================================

/// Replace `${VAR}` and `${env:VAR}` with the variable's value. Unset
/// variables expand to the empty string.
pub fn expand_env(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                let name = name.strip_prefix("env:").unwrap_or(name);
                out.push_str(&std::env::var(name).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
