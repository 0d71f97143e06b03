//! # Index Fetcher
//!
//! Downloads and parses a chart repository `index.yaml` over HTTP(S), with
//! optional basic auth and TLS material from the repository Secret.

use super::auth::RepositoryAuth;
use crate::crd::Maintainer;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn, Instrument};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("GET {url} failed after {attempts} attempt(s): {message}")]
    Request {
        url: String,
        attempts: u32,
        message: String,
    },
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("failed to parse index from {url}: {message}")]
    Parse { url: String, message: String },
}

impl FetchError {
    /// Worth retrying within the same poll
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Request { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Client(_) | FetchError::Parse { .. } => false,
        }
    }
}

/// Parsed `index.yaml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFile {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<ChartVersion>>,
    #[serde(default)]
    pub generated: Option<String>,
}

/// One entry of `index.yaml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartVersion {
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "scalar_string")]
    pub version: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub app_version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub home: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub maintainers: Vec<Maintainer>,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Accept unquoted numeric scalars (`version: 1.0`) as strings
fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected a scalar, found {other:?}"
        ))),
    }
}

impl IndexFile {
    pub fn parse(url: &str, body: &str) -> Result<Self, FetchError> {
        serde_yaml::from_str(body).map_err(|e| FetchError::Parse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// Fetch settings of one repository
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    /// Total attempts, at least one
    pub retry: u32,
    pub retry_backoff: Duration,
    pub insecure: bool,
}

/// HTTP client for one repository
#[derive(Debug, Clone)]
pub struct IndexFetcher {
    client: reqwest::Client,
    auth: Option<(String, Option<String>)>,
    options: FetchOptions,
}

impl IndexFetcher {
    pub fn new(options: FetchOptions, auth: Option<&RepositoryAuth>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(options.insecure);

        if let Some(auth) = auth {
            if let Some(ca) = &auth.ca_data {
                let certificate = reqwest::Certificate::from_pem(ca)
                    .map_err(|e| FetchError::Client(format!("invalid cadata: {e}")))?;
                builder = builder.add_root_certificate(certificate);
            }
            if let (Some(cert), Some(key)) = (&auth.cert_data, &auth.key_data) {
                let mut pem = cert.clone();
                pem.push(b'\n');
                pem.extend_from_slice(key);
                let identity = reqwest::Identity::from_pem(&pem)
                    .map_err(|e| FetchError::Client(format!("invalid certdata/keydata: {e}")));
                zeroize::Zeroize::zeroize(&mut pem);
                builder = builder.identity(identity?);
            }
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self {
            client,
            auth: auth.and_then(|a| a.username.clone().map(|u| (u, a.password.clone()))),
            options,
        })
    }

    /// GET and parse `url`, retrying transient failures with a fixed pause
    pub async fn fetch_index(&self, url: &str) -> Result<IndexFile, FetchError> {
        let span = tracing::info_span!("repository.fetch_index", url = %url);
        async {
            let attempts = self.options.retry.max(1);
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.fetch_once(url, attempt).await {
                    Ok(body) => return IndexFile::parse(url, &body),
                    Err(e) if e.is_transient() && attempt < attempts => {
                        warn!(
                            "Index fetch attempt {}/{} failed: {}, retrying in {}ms",
                            attempt,
                            attempts,
                            e,
                            self.options.retry_backoff.as_millis()
                        );
                        tokio::time::sleep(self.options.retry_backoff).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn fetch_once(&self, url: &str, attempt: u32) -> Result<String, FetchError> {
        let mut request = self.client.get(url);
        if let Some((username, password)) = &self.auth {
            request = request.basic_auth(username, password.as_ref());
        }
        let response = request.send().await.map_err(|e| FetchError::Request {
            url: url.to_string(),
            attempts: attempt,
            message: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await.map_err(|e| FetchError::Request {
            url: url.to_string(),
            attempts: attempt,
            message: e.to_string(),
        })?;
        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_index() {
        let index = IndexFile::parse(
            "http://example.com/index.yaml",
            r#"
apiVersion: v1
entries:
  nginx:
    - name: nginx
      version: 15.0.2
      appVersion: 1.25.0
      digest: abc
      created: "2024-01-02T03:04:05Z"
      maintainers:
        - name: team
          email: team@example.com
    - name: nginx
      version: 15.0.1
      deprecated: true
generated: "2024-01-02T03:04:05Z"
"#,
        )
        .unwrap();
        let nginx = &index.entries["nginx"];
        assert_eq!(nginx.len(), 2);
        assert_eq!(nginx[0].app_version, "1.25.0");
        assert_eq!(nginx[0].maintainers[0].email, "team@example.com");
        assert!(nginx[1].deprecated);
    }

    #[test]
    fn test_numeric_versions_are_strings() {
        let index = IndexFile::parse("u", "entries:\n  app:\n    - version: 2\n      appVersion: 1.5\n").unwrap();
        assert_eq!(index.entries["app"][0].version, "2");
        assert_eq!(index.entries["app"][0].app_version, "1.5");
    }

    #[test]
    fn test_parse_error() {
        let err = IndexFile::parse("u", "entries: [").unwrap_err();
        assert!(matches!(err, FetchError::Parse { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_status_classification() {
        let err = FetchError::Status { url: "u".into(), status: 503 };
        assert!(err.is_transient());
        let err = FetchError::Status { url: "u".into(), status: 404 };
        assert!(!err.is_transient());
    }
}
