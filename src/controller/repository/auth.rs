//! # Repository Credentials
//!
//! Basic auth and TLS material read from the Secret a Repository references.
//! Credentials are wiped from memory when dropped and never printed.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Credentials for one repository
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RepositoryAuth {
    pub username: Option<String>,
    pub password: Option<String>,
    /// PEM CA bundle used to verify the server
    pub ca_data: Option<Vec<u8>>,
    /// PEM client certificate
    pub cert_data: Option<Vec<u8>>,
    /// PEM client key
    pub key_data: Option<Vec<u8>>,
}

impl fmt::Debug for RepositoryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("ca_data", &self.ca_data.as_ref().map(Vec::len))
            .field("cert_data", &self.cert_data.as_ref().map(Vec::len))
            .field("key_data", &self.key_data.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl RepositoryAuth {
    /// Build from Secret data keys `username`, `password`, `cadata`, `certdata`, `keydata`
    pub fn from_secret_data(data: &BTreeMap<String, Vec<u8>>) -> Self {
        let text = |key: &str| {
            data.get(key)
                .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let bytes = |key: &str| data.get(key).filter(|b| !b.is_empty()).cloned();
        Self {
            username: text("username"),
            password: text("password"),
            ca_data: bytes("cadata"),
            cert_data: bytes("certdata"),
            key_data: bytes("keydata"),
        }
    }

    pub fn has_basic_auth(&self) -> bool {
        self.username.is_some()
    }

    /// Client certificate and key are both present
    pub fn has_client_identity(&self) -> bool {
        self.cert_data.is_some() && self.key_data.is_some()
    }
}

/// Lookup of repository credentials by Secret name
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// `Ok(None)` when the Secret does not exist
    async fn load(&self, namespace: &str, name: &str) -> Result<Option<RepositoryAuth>, kube::Error>;
}

/// Reads credentials from cluster Secrets
#[derive(Clone)]
pub struct KubeCredentialSource {
    client: Client,
}

impl fmt::Debug for KubeCredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeCredentialSource").finish_non_exhaustive()
    }
}

impl KubeCredentialSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialSource for KubeCredentialSource {
    async fn load(&self, namespace: &str, name: &str) -> Result<Option<RepositoryAuth>, kube::Error> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = secrets.get_opt(name).await? else {
            return Ok(None);
        };
        let mut data: BTreeMap<String, Vec<u8>> = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect();
        for (k, v) in secret.string_data.unwrap_or_default() {
            data.entry(k).or_insert_with(|| v.into_bytes());
        }
        let auth = RepositoryAuth::from_secret_data(&data);
        data.values_mut().for_each(Zeroize::zeroize);
        Ok(Some(auth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_secret_data_and_redaction() {
        let data = BTreeMap::from([
            ("username".to_string(), b"admin\n".to_vec()),
            ("password".to_string(), b"s3cret".to_vec()),
            ("cadata".to_string(), b"-----BEGIN CERTIFICATE-----".to_vec()),
            ("keydata".to_string(), Vec::new()),
        ]);
        let auth = RepositoryAuth::from_secret_data(&data);
        assert_eq!(auth.username.as_deref(), Some("admin"));
        assert!(auth.has_basic_auth());
        assert!(!auth.has_client_identity());
        assert!(auth.key_data.is_none());
        let printed = format!("{auth:?}");
        assert!(!printed.contains("s3cret"));
    }
}
