//! Storage account connection strings
//!
//! `Key=Value` pairs separated by `;`. Values may themselves contain `=`
//! (account keys, SAS tokens), so each pair splits on the first one only.

use std::collections::HashMap;

use otelblob_common::error::CredentialError;

/// Well-known Azurite account used by `UseDevelopmentStorage=true`
pub const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
pub const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
pub const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// How requests made with a connection string authenticate
#[derive(Clone, PartialEq, Eq)]
pub enum ConnectionAuth {
    SharedKey { account_name: String, account_key: String },
    SharedAccessSignature(String),
}

impl std::fmt::Debug for ConnectionAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionAuth::SharedKey { account_name, .. } => f
                .debug_struct("SharedKey")
                .field("account_name", account_name)
                .field("account_key", &"***")
                .finish(),
            ConnectionAuth::SharedAccessSignature(_) => f.write_str("SharedAccessSignature(***)"),
        }
    }
}

/// Parsed connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// Blob service endpoint without a trailing slash
    pub blob_endpoint: String,
    pub account_name: Option<String>,
    pub auth: ConnectionAuth,
    /// `UseDevelopmentStorage=true`: the local Azurite emulator
    pub development_storage: bool,
}

impl ConnectionString {
    pub fn parse(input: &str) -> Result<Self, CredentialError> {
        let mut pairs: HashMap<String, String> = HashMap::new();
        for segment in input.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                CredentialError::InvalidConnectionString(format!(
                    "segment {segment:?} is not a key=value pair"
                ))
            })?;
            pairs.insert(key.trim().to_string(), value.trim().to_string());
        }

        if pairs
            .get("UseDevelopmentStorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return Ok(Self {
                blob_endpoint: DEV_BLOB_ENDPOINT.to_string(),
                account_name: Some(DEV_ACCOUNT_NAME.to_string()),
                auth: ConnectionAuth::SharedKey {
                    account_name: DEV_ACCOUNT_NAME.to_string(),
                    account_key: DEV_ACCOUNT_KEY.to_string(),
                },
                development_storage: true,
            });
        }

        let account_name = pairs.get("AccountName").cloned();
        let blob_endpoint = match pairs.get("BlobEndpoint") {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => {
                let account = account_name.as_deref().ok_or_else(|| {
                    CredentialError::InvalidConnectionString(
                        "either BlobEndpoint or AccountName is required".to_string(),
                    )
                })?;
                let protocol = pairs
                    .get("DefaultEndpointsProtocol")
                    .map_or("https", String::as_str);
                let suffix = pairs
                    .get("EndpointSuffix")
                    .map_or("core.windows.net", String::as_str);
                format!("{protocol}://{account}.blob.{suffix}")
            }
        };

        let auth = if let Some(sas) = pairs.get("SharedAccessSignature") {
            ConnectionAuth::SharedAccessSignature(sas.trim_start_matches('?').to_string())
        } else {
            match (account_name.as_ref(), pairs.get("AccountKey")) {
                (Some(name), Some(key)) if !key.is_empty() => ConnectionAuth::SharedKey {
                    account_name: name.clone(),
                    account_key: key.clone(),
                },
                _ => {
                    return Err(CredentialError::InvalidConnectionString(
                        "AccountName with AccountKey, or SharedAccessSignature, is required"
                            .to_string(),
                    ))
                }
            }
        };

        Ok(Self {
            blob_endpoint,
            account_name,
            auth,
            development_storage: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_key_connection_string() {
        let cs = ConnectionString::parse(
            "DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=a2V5PT0=;EndpointSuffix=core.windows.net",
        )
        .unwrap();
        assert_eq!(cs.blob_endpoint, "https://acct.blob.core.windows.net");
        assert_eq!(
            cs.auth,
            ConnectionAuth::SharedKey {
                account_name: "acct".into(),
                account_key: "a2V5PT0=".into(),
            }
        );
    }

    #[test]
    fn test_sas_with_explicit_endpoint() {
        let cs = ConnectionString::parse(
            "BlobEndpoint=https://acct.blob.core.windows.net/;SharedAccessSignature=sv=2021-12-02&sig=abc%3D",
        )
        .unwrap();
        assert_eq!(cs.blob_endpoint, "https://acct.blob.core.windows.net");
        assert_eq!(
            cs.auth,
            ConnectionAuth::SharedAccessSignature("sv=2021-12-02&sig=abc%3D".into())
        );
    }

    #[test]
    fn test_development_storage() {
        let cs = ConnectionString::parse("UseDevelopmentStorage=true").unwrap();
        assert_eq!(cs.blob_endpoint, DEV_BLOB_ENDPOINT);
        assert_eq!(cs.account_name.as_deref(), Some(DEV_ACCOUNT_NAME));
        assert!(cs.development_storage);
    }

    #[test]
    fn test_sovereign_cloud_suffix() {
        let cs = ConnectionString::parse(
            "AccountName=acct;AccountKey=a2V5;EndpointSuffix=core.chinacloudapi.cn;DefaultEndpointsProtocol=http",
        )
        .unwrap();
        assert_eq!(cs.blob_endpoint, "http://acct.blob.core.chinacloudapi.cn");
    }

    #[test]
    fn test_invalid_connection_strings() {
        assert!(ConnectionString::parse("garbage").is_err());
        assert!(ConnectionString::parse("AccountName=acct").is_err());
        assert!(ConnectionString::parse("AccountKey=abc").is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let cs = ConnectionString::parse("AccountName=acct;AccountKey=c2VjcmV0").unwrap();
        assert!(!format!("{:?}", cs).contains("c2VjcmV0"));
    }
}
