//! Remote index transport - catalog listing and metadata fetch
//!
//! The sync reconciler talks to the upstream index through the
//! [`IndexTransport`] trait so tests can substitute a canned upstream.
//! The HTTP implementation hits three JSON endpoints:
//!
//! - `GET {base}/last-serial` -> `{"last_serial": N}`
//! - `GET {base}/packages` -> `{"packages": {"name": serial, ...}}`
//! - `GET {base}/pypi/{name}/json` -> the per-package metadata document
//!
//! Every request carries the configured timeout; a timed-out request is
//! indistinguishable from any other transport failure.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::metadata::UpstreamMetadata;

/// Per-package fetch failure taxonomy. All variants are non-fatal to a
/// reconciliation pass; the package is marked ignored and the run
/// continues.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Upstream has no release data for this package.
    #[error("not found upstream")]
    NotFound,
    /// Network failure or timeout.
    #[error("transport error: {0}")]
    Transport(String),
    /// Malformed metadata document or requirement string.
    #[error("parse error: {0}")]
    Parse(String),
    /// Local store constraint violation while applying the record.
    #[error("store integrity error: {0}")]
    Integrity(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// The remote catalog/metadata interface consumed by the reconciler.
#[async_trait]
pub trait IndexTransport: Send + Sync {
    /// The upstream global change serial.
    async fn last_serial(&self) -> Result<i64, FetchError>;

    /// The full current catalog: package name -> change serial.
    async fn list_packages(&self) -> Result<Vec<(String, i64)>, FetchError>;

    /// The metadata document for one package.
    async fn fetch_metadata(&self, name: &str) -> Result<UpstreamMetadata, FetchError>;
}

/// Artifact download interface, used only by the download driver.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch_file(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct LastSerialResponse {
    last_serial: i64,
}

#[derive(Debug, Deserialize)]
struct PackageListResponse {
    packages: BTreeMap<String, i64>,
}

/// HTTP transport against a real index.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !response.status().is_success() {
            return Err(FetchError::Transport(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Parse(e.to_string()))
    }
}

#[async_trait]
impl IndexTransport for HttpTransport {
    async fn last_serial(&self) -> Result<i64, FetchError> {
        let resp: LastSerialResponse = self
            .get_json(&format!("{}/last-serial", self.base_url))
            .await?;
        Ok(resp.last_serial)
    }

    async fn list_packages(&self) -> Result<Vec<(String, i64)>, FetchError> {
        let resp: PackageListResponse =
            self.get_json(&format!("{}/packages", self.base_url)).await?;
        Ok(resp.packages.into_iter().collect())
    }

    async fn fetch_metadata(&self, name: &str) -> Result<UpstreamMetadata, FetchError> {
        self.get_json(&format!("{}/pypi/{}/json", self.base_url, name))
            .await
    }
}

#[async_trait]
impl ArtifactFetcher for HttpTransport {
    async fn fetch_file(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !response.status().is_success() {
            return Err(FetchError::Transport(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}
