//! Credential resolution
//!
//! Turns the configured authentication strategy into a ready storage client.
//! Runs once at startup: configuration, connection-string and account key
//! problems fail here, while identity tokens are fetched on first use.

use std::sync::Arc;
use url::Url;

use otelblob_common::config::{AuthConfig, ExporterConfig};
use otelblob_common::{Error, Result};

use crate::azure::{store_builder, AzureBlobClient};
use crate::client::BlobClient;
use crate::connection_string::{ConnectionAuth, ConnectionString};
use crate::credential::{identity_builder, process_env};
use crate::shared_key::SharedKeyCredential;

pub struct CredentialResolver {
    http: reqwest::Client,
}

impl CredentialResolver {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: AzureBlobClient::http_client()?,
        })
    }

    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Validate the configuration and build the storage client.
    pub fn resolve(&self, config: &ExporterConfig) -> Result<Arc<dyn BlobClient>> {
        config.validate()?;
        let containers = config.container.names();
        let client = self.azure_client(&config.url, &config.auth, &containers)?;
        tracing::info!(
            auth_type = config.auth.kind(),
            url = client.url(),
            containers = ?client.containers(),
            "Storage client created"
        );
        Ok(Arc::new(client))
    }

    fn azure_client(
        &self,
        url: &str,
        auth: &AuthConfig,
        containers: &[&str],
    ) -> Result<AzureBlobClient> {
        if let AuthConfig::ConnectionString { connection_string } = auth {
            return self.connection_string_client(connection_string, containers);
        }

        let account = account_name(url)?;
        let container = containers.first().copied().unwrap_or_default();
        let base = store_builder(&account, url);
        let builder = identity_builder(base, auth, container, &process_env)?;
        AzureBlobClient::new(self.http.clone(), url, builder, containers, None)
    }

    fn connection_string_client(
        &self,
        connection_string: &str,
        containers: &[&str],
    ) -> Result<AzureBlobClient> {
        let parsed = ConnectionString::parse(connection_string)?;
        let account = match &parsed.account_name {
            Some(name) => name.clone(),
            None => account_name(&parsed.blob_endpoint)?,
        };
        let base = store_builder(&account, &parsed.blob_endpoint);

        let (builder, shared_key) = match parsed.auth {
            ConnectionAuth::SharedKey {
                account_name,
                account_key,
            } => {
                // Decoded here so a bad key is a startup error
                let shared_key = SharedKeyCredential::new(account_name, &account_key)?;
                (base.with_access_key(account_key), Some(shared_key))
            }
            ConnectionAuth::SharedAccessSignature(sas) => {
                (base.with_sas_authorization(sas_pairs(&sas)), None)
            }
        };
        let builder = if parsed.development_storage {
            builder.with_use_emulator(true)
        } else {
            builder
        };

        AzureBlobClient::new(
            self.http.clone(),
            &parsed.blob_endpoint,
            builder,
            containers,
            shared_key,
        )
    }
}

/// Decoded query pairs of a SAS token
fn sas_pairs(sas: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(sas.trim_start_matches('?').as_bytes())
        .into_owned()
        .collect()
}

/// Storage account of a service URL: the first host label of
/// `https://{account}.blob.core.windows.net`, or the first path segment of
/// an emulator-style `http://127.0.0.1:10000/{account}`.
fn account_name(url: &str) -> Result<String> {
    let parsed =
        Url::parse(url).map_err(|e| Error::Config(format!("invalid storage url {url:?}: {e}")))?;
    let path_style = match parsed.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(_) => true,
        None => false,
    };

    let account = if path_style {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next())
            .unwrap_or_default()
    } else {
        parsed
            .host_str()
            .and_then(|host| host.split('.').next())
            .unwrap_or_default()
    };
    if account.is_empty() {
        return Err(Error::Config(format!(
            "cannot determine the storage account from {url:?}"
        )));
    }
    Ok(account.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use otelblob_common::error::CredentialError;

    fn config(url: &str, auth: AuthConfig) -> ExporterConfig {
        ExporterConfig {
            url: url.to_string(),
            auth,
            ..Default::default()
        }
    }

    fn resolver() -> CredentialResolver {
        CredentialResolver::with_http_client(reqwest::Client::new())
    }

    #[test]
    fn test_connection_string_uses_its_endpoint() {
        let client = resolver()
            .resolve(&config(
                "",
                AuthConfig::ConnectionString {
                    connection_string: "AccountName=acct;AccountKey=a2V5".to_string(),
                },
            ))
            .unwrap();
        assert_eq!(client.url(), "https://acct.blob.core.windows.net");
    }

    #[test]
    fn test_sas_connection_string() {
        let client = resolver()
            .resolve(&config(
                "",
                AuthConfig::ConnectionString {
                    connection_string:
                        "BlobEndpoint=https://acct.blob.core.windows.net/;SharedAccessSignature=sv=2022-11-02&sig=abc%3D"
                            .to_string(),
                },
            ))
            .unwrap();
        assert_eq!(client.url(), "https://acct.blob.core.windows.net");
    }

    #[test]
    fn test_development_storage_connection_string() {
        let client = resolver()
            .resolve(&config(
                "",
                AuthConfig::ConnectionString {
                    connection_string: "UseDevelopmentStorage=true".to_string(),
                },
            ))
            .unwrap();
        assert_eq!(client.url(), "http://127.0.0.1:10000/devstoreaccount1");
    }

    #[test]
    fn test_malformed_connection_string_fails_at_startup() {
        let err = resolver()
            .resolve(&config(
                "",
                AuthConfig::ConnectionString {
                    connection_string: "AccountName=acct".to_string(),
                },
            ))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Credential(CredentialError::InvalidConnectionString(_))
        ));
        assert!(err.is_startup());
    }

    #[test]
    fn test_malformed_account_key_fails_at_startup() {
        let err = resolver()
            .resolve(&config(
                "",
                AuthConfig::ConnectionString {
                    connection_string: "AccountName=acct;AccountKey=not base64!".to_string(),
                },
            ))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Credential(CredentialError::InvalidAccountKey(_))
        ));
        assert!(err.is_startup());
    }

    #[test]
    fn test_empty_secret_fails_before_network() {
        let err = resolver()
            .resolve(&config(
                "https://acct.blob.core.windows.net",
                AuthConfig::ServicePrincipal {
                    tenant_id: "t".into(),
                    client_id: "c".into(),
                    client_secret: String::new(),
                },
            ))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_identity_variants_resolve_lazily() {
        let url = "https://acct.blob.core.windows.net";
        for auth in [
            AuthConfig::ServicePrincipal {
                tenant_id: "t".into(),
                client_id: "c".into(),
                client_secret: "s".into(),
            },
            AuthConfig::SystemManagedIdentity,
            AuthConfig::UserManagedIdentity {
                client_id: "c".into(),
            },
            AuthConfig::WorkloadIdentity {
                tenant_id: "t".into(),
                client_id: "c".into(),
                federated_token_file: "/nonexistent".into(),
            },
            AuthConfig::DefaultCredentials,
        ] {
            let client = resolver().resolve(&config(url, auth.clone())).unwrap();
            assert_eq!(client.url(), url, "{}", auth.kind());
        }
    }

    #[test]
    fn test_account_name_from_url() {
        assert_eq!(
            account_name("https://acct.blob.core.windows.net").unwrap(),
            "acct"
        );
        assert_eq!(
            account_name("http://127.0.0.1:10000/devstoreaccount1").unwrap(),
            "devstoreaccount1"
        );
        assert_eq!(account_name("http://localhost:10000/dev").unwrap(), "dev");
        assert!(account_name("http://127.0.0.1:10000").is_err());
        assert!(account_name("not a url").is_err());
    }

    #[test]
    fn test_sas_pairs_are_decoded() {
        assert_eq!(
            sas_pairs("?sv=2022-11-02&sig=abc%3D"),
            vec![
                ("sv".to_string(), "2022-11-02".to_string()),
                ("sig".to_string(), "abc=".to_string()),
            ]
        );
    }
}
