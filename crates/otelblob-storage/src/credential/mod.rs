//! Identity credentials for storage access
//!
//! Each identity strategy is a configuration of the `object_store` Azure
//! builder, which fetches bearer tokens and refreshes them ahead of expiry.
//! [`ChainedCredential`] tries several of those configurations in order.

pub mod chain;

use object_store::azure::{AzureCredentialProvider, MicrosoftAzureBuilder};
use std::sync::Arc;

use otelblob_common::config::AuthConfig;
use otelblob_common::{Error, Result};

pub use chain::ChainedCredential;

pub const TENANT_ID_ENV: &str = "AZURE_TENANT_ID";
pub const CLIENT_ID_ENV: &str = "AZURE_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "AZURE_CLIENT_SECRET";
pub const FEDERATED_TOKEN_FILE_ENV: &str = "AZURE_FEDERATED_TOKEN_FILE";
pub const AUTHORITY_HOST_ENV: &str = "AZURE_AUTHORITY_HOST";
/// Managed identity endpoint injected by App Service and Functions
pub const IDENTITY_ENDPOINT_ENV: &str = "IDENTITY_ENDPOINT";

/// Environment lookup; unset and empty variables are both `None`
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Apply the authority host and managed identity endpoint overrides.
pub fn with_environment(
    mut builder: MicrosoftAzureBuilder,
    env: EnvLookup<'_>,
) -> MicrosoftAzureBuilder {
    if let Some(host) = env(AUTHORITY_HOST_ENV) {
        builder = builder.with_authority_host(host);
    }
    if let Some(endpoint) = env(IDENTITY_ENDPOINT_ENV) {
        builder = builder.with_msi_endpoint(endpoint);
    }
    builder
}

/// Configure `base` for one of the identity strategies. `container` is only
/// used to materialize the default chain's sources.
pub fn identity_builder(
    base: MicrosoftAzureBuilder,
    auth: &AuthConfig,
    container: &str,
    env: EnvLookup<'_>,
) -> Result<MicrosoftAzureBuilder> {
    let base = with_environment(base, env);
    let builder = match auth {
        AuthConfig::ServicePrincipal {
            tenant_id,
            client_id,
            client_secret,
        } => base.with_client_secret_authorization(client_id, client_secret, tenant_id),
        AuthConfig::SystemManagedIdentity => base,
        AuthConfig::UserManagedIdentity { client_id } => base.with_client_id(client_id),
        AuthConfig::WorkloadIdentity {
            tenant_id,
            client_id,
            federated_token_file,
        } => base
            .with_tenant_id(tenant_id)
            .with_client_id(client_id)
            .with_federated_token_file(federated_token_file),
        AuthConfig::DefaultCredentials => {
            let chain = ChainedCredential::from_env(&base, container, env)?;
            tracing::info!(sources = ?chain.source_names(), "Using default credential chain");
            base.with_credentials(Arc::new(chain))
        }
        AuthConfig::ConnectionString { .. } => {
            return Err(Error::Config(
                "connection strings do not use identity credentials".to_string(),
            ))
        }
    };
    Ok(builder)
}

/// Credential provider of a store built from `builder`.
pub(crate) fn provider(
    builder: MicrosoftAzureBuilder,
    container: &str,
) -> Result<AzureCredentialProvider> {
    builder
        .with_container_name(container)
        .build()
        .map(|store| store.credentials().clone())
        .map_err(|e| Error::Config(format!("invalid credential configuration: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::store_builder;
    use object_store::azure::AzureCredential;
    use object_store::CredentialProvider;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[tokio::test]
    async fn test_connection_free_identities_build() {
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
            let base = store_builder("acct", "https://acct.blob.core.windows.net");
            let builder = identity_builder(base, &auth, "logs", &no_env).unwrap();
            assert!(provider(builder, "logs").is_ok(), "{}", auth.kind());
        }
    }

    #[tokio::test]
    async fn test_missing_federated_token_file_fails_on_first_use() {
        let base = store_builder("acct", "https://acct.blob.core.windows.net");
        let auth = AuthConfig::WorkloadIdentity {
            tenant_id: "t".into(),
            client_id: "c".into(),
            federated_token_file: "/nonexistent/token".into(),
        };
        let builder = identity_builder(base, &auth, "logs", &no_env).unwrap();
        let provider = provider(builder, "logs").unwrap();
        let result: object_store::Result<Arc<AzureCredential>> = provider.get_credential().await;
        assert!(result.is_err());
    }

    #[test]
    fn test_connection_string_is_not_an_identity() {
        let base = store_builder("acct", "https://acct.blob.core.windows.net");
        let auth = AuthConfig::ConnectionString {
            connection_string: "AccountName=a;AccountKey=a2V5".into(),
        };
        assert!(matches!(
            identity_builder(base, &auth, "logs", &no_env),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_empty_variables_are_unset() {
        std::env::set_var("OTELBLOB_TEST_EMPTY_VAR", "");
        assert_eq!(process_env("OTELBLOB_TEST_EMPTY_VAR"), None);
        std::env::remove_var("OTELBLOB_TEST_EMPTY_VAR");
    }
}
