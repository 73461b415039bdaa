//! Storage Shared Key request signing
//!
//! Signs a fully built request: HMAC-SHA256 over the canonical string of
//! standard headers, `x-ms-*` headers and the canonicalized resource.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Request;
use sha2::Sha256;

use otelblob_common::error::CredentialError;

type HmacSha256 = Hmac<Sha256>;

/// Standard headers in string-to-sign order; `Date` is always empty since
/// requests carry `x-ms-date`.
const SIGNED_STANDARD_HEADERS: [&str; 11] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

#[derive(Clone)]
pub struct SharedKeyCredential {
    account_name: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account_name", &self.account_name)
            .finish_non_exhaustive()
    }
}

impl SharedKeyCredential {
    /// `account_key` is the base64 key from the portal or connection string
    pub fn new(account_name: impl Into<String>, account_key: &str) -> Result<Self, CredentialError> {
        let key = STANDARD
            .decode(account_key.trim())
            .map_err(|e| CredentialError::InvalidAccountKey(e.to_string()))?;
        Ok(Self {
            account_name: account_name.into(),
            key,
        })
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    /// Add the `Authorization` header to `request`.
    pub fn sign(&self, request: &mut Request) -> Result<(), CredentialError> {
        let string_to_sign = string_to_sign(&self.account_name, request);
        let signature = self.signature(&string_to_sign)?;
        let value = HeaderValue::from_str(&format!("SharedKey {}:{}", self.account_name, signature))
            .map_err(|e| CredentialError::InvalidAccountKey(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }

    fn signature(&self, string_to_sign: &str) -> Result<String, CredentialError> {
        let digest = hmac_sha256(&self.key, string_to_sign.as_bytes())?;
        Ok(STANDARD.encode(digest))
    }
}

/// Canonical string for a request, as defined by the Shared Key scheme.
pub fn string_to_sign(account_name: &str, request: &Request) -> String {
    let headers = request.headers();
    let mut out = String::new();
    out.push_str(request.method().as_str());
    out.push('\n');

    for name in SIGNED_STANDARD_HEADERS {
        let value = header_str(headers, name);
        // Zero length is signed as empty
        if name == "content-length" && value == "0" {
            out.push('\n');
            continue;
        }
        out.push_str(value);
        out.push('\n');
    }

    out.push_str(&canonicalized_headers(headers));
    out.push_str(&canonicalized_resource(account_name, request.url()));
    out
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn canonicalized_headers(headers: &HeaderMap) -> String {
    let mut ms_headers: Vec<(String, String)> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or("").trim().to_string(),
            )
        })
        .collect();
    ms_headers.sort();

    let mut out = String::new();
    for (name, value) in ms_headers {
        out.push_str(&name);
        out.push(':');
        out.push_str(&value);
        out.push('\n');
    }
    out
}

fn canonicalized_resource(account_name: &str, url: &url::Url) -> String {
    let mut out = format!("/{}{}", account_name, url.path());

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_lowercase(), v.into_owned()))
        .collect();
    params.sort();

    // Repeated parameters join their values with commas
    let mut merged: Vec<(String, Vec<String>)> = Vec::new();
    for (key, value) in params {
        match merged.last_mut() {
            Some((last, values)) if *last == key => values.push(value),
            _ => merged.push((key, vec![value])),
        }
    }
    for (key, values) in merged {
        out.push('\n');
        out.push_str(&key);
        out.push(':');
        out.push_str(&values.join(","));
    }
    out
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CredentialError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CredentialError::InvalidAccountKey(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
    use reqwest::Method;

    fn request(method: Method, url: &str, length: &str) -> Request {
        let mut req = Request::new(method, url.parse().unwrap());
        let headers = req.headers_mut();
        headers.insert("x-ms-version", HeaderValue::from_static("2021-12-02"));
        headers.insert(
            "x-ms-date",
            HeaderValue::from_static("Mon, 01 Jan 2024 00:00:00 GMT"),
        );
        headers.insert("x-ms-blob-type", HeaderValue::from_static("AppendBlob"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_str(length).unwrap());
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        req
    }

    #[test]
    fn test_string_to_sign_layout() {
        let req = request(
            Method::PUT,
            "https://acct.blob.core.windows.net/logs/a%20b.json?comp=appendblock",
            "12",
        );
        let expected = "PUT\n\n\n12\n\ntext/plain\n\n\n\n\n\n\n\
             x-ms-blob-type:AppendBlob\n\
             x-ms-date:Mon, 01 Jan 2024 00:00:00 GMT\n\
             x-ms-version:2021-12-02\n\
             /acct/logs/a%20b.json\ncomp:appendblock";
        assert_eq!(string_to_sign("acct", &req), expected);
    }

    #[test]
    fn test_zero_content_length_is_empty() {
        let req = request(Method::PUT, "https://acct.blob.core.windows.net/c/b", "0");
        let sts = string_to_sign("acct", &req);
        assert!(sts.starts_with("PUT\n\n\n\n\ntext/plain\n"));
    }

    #[test]
    fn test_query_parameters_sorted_and_lowercased() {
        let url: url::Url = "https://acct.blob.core.windows.net/c?restype=container&Comp=list"
            .parse()
            .unwrap();
        assert_eq!(
            canonicalized_resource("acct", &url),
            "/acct/c\ncomp:list\nrestype:container"
        );
    }

    #[test]
    fn test_sign_sets_authorization() {
        let credential = SharedKeyCredential::new("acct", "c2VjcmV0LWtleQ==").unwrap();
        let mut req = request(Method::HEAD, "https://acct.blob.core.windows.net/c/b", "0");
        credential.sign(&mut req).unwrap();

        let auth = req.headers()[AUTHORIZATION].to_str().unwrap().to_string();
        assert!(auth.starts_with("SharedKey acct:"));
        // base64 of a 32-byte digest
        assert_eq!(auth.len(), "SharedKey acct:".len() + 44);

        let mut again = request(Method::HEAD, "https://acct.blob.core.windows.net/c/b", "0");
        credential.sign(&mut again).unwrap();
        assert_eq!(again.headers()[AUTHORIZATION], req.headers()[AUTHORIZATION]);
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(SharedKeyCredential::new("acct", "not base64!").is_err());
    }
}
