//! Ordered credential chain
//!
//! Sources are tried strictly in order. The first one that returns a
//! credential is remembered and used exclusively afterwards.

use async_trait::async_trait;
use object_store::azure::{AzureCredential, AzureCredentialProvider, MicrosoftAzureBuilder};
use object_store::CredentialProvider;
use parking_lot::Mutex;
use std::sync::Arc;

use otelblob_common::error::CredentialError;
use otelblob_common::{metrics, Result};

use super::{
    provider, EnvLookup, CLIENT_ID_ENV, CLIENT_SECRET_ENV, FEDERATED_TOKEN_FILE_ENV,
    TENANT_ID_ENV,
};

const STORE_NAME: &str = "MicrosoftAzure";

#[derive(Debug)]
pub struct ChainedCredential {
    sources: Vec<(&'static str, AzureCredentialProvider)>,
    selected: Mutex<Option<usize>>,
}

impl ChainedCredential {
    pub fn new(sources: Vec<(&'static str, AzureCredentialProvider)>) -> Self {
        Self {
            sources,
            selected: Mutex::new(None),
        }
    }

    /// Environment service principal, workload identity, managed identity,
    /// then Azure CLI. The first two are only included when their variables
    /// are set.
    pub fn from_env(
        base: &MicrosoftAzureBuilder,
        container: &str,
        env: EnvLookup<'_>,
    ) -> Result<Self> {
        let mut sources = Vec::with_capacity(4);

        let tenant_id = env(TENANT_ID_ENV);
        let client_id = env(CLIENT_ID_ENV);
        if let (Some(tenant), Some(client), Some(secret)) =
            (&tenant_id, &client_id, env(CLIENT_SECRET_ENV))
        {
            let builder = base
                .clone()
                .with_client_secret_authorization(client, secret, tenant);
            sources.push(("EnvironmentCredential", provider(builder, container)?));
        }
        match (&tenant_id, &client_id, env(FEDERATED_TOKEN_FILE_ENV)) {
            (Some(tenant), Some(client), Some(token_file)) => {
                let builder = base
                    .clone()
                    .with_tenant_id(tenant)
                    .with_client_id(client)
                    .with_federated_token_file(token_file);
                sources.push(("WorkloadIdentityCredential", provider(builder, container)?));
            }
            _ => tracing::debug!("Skipping workload identity in credential chain"),
        }
        sources.push(("ManagedIdentityCredential", provider(base.clone(), container)?));
        sources.push((
            "AzureCliCredential",
            provider(base.clone().with_use_azure_cli(true), container)?,
        ));

        Ok(Self::new(sources))
    }

    /// Names of the sources in the order they are tried
    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|(name, _)| *name).collect()
    }

    /// Name of the remembered source, once one has succeeded
    pub fn selected_source(&self) -> Option<&'static str> {
        let selected = *self.selected.lock();
        selected.map(|i| self.sources[i].0)
    }
}

#[async_trait]
impl CredentialProvider for ChainedCredential {
    type Credential = AzureCredential;

    async fn get_credential(&self) -> object_store::Result<Arc<AzureCredential>> {
        let selected = *self.selected.lock();
        if let Some(index) = selected {
            return self.sources[index].1.get_credential().await;
        }

        let mut failures = Vec::with_capacity(self.sources.len());
        for (index, (name, source)) in self.sources.iter().enumerate() {
            let name = *name;
            match source.get_credential().await {
                Ok(credential) => {
                    tracing::info!(credential = name, "Credential chain selected source");
                    metrics::record_credential_selected(name);
                    *self.selected.lock() = Some(index);
                    return Ok(credential);
                }
                Err(e) => {
                    tracing::warn!(credential = name, error = %e, "Credential source failed");
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        Err(object_store::Error::Generic {
            store: STORE_NAME,
            source: Box::new(CredentialError::ChainExhausted(failures)),
        })
    }
}
