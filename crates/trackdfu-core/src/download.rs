//! Firmware package download.
//!
//! Catalog entries name their package by a site-relative path such as
//! `/firmware/mc4seb/mc4seb-2-ab87abb.zip`. [`HttpSource`] resolves it
//! against a configured base URL and fetches the bytes.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Download timeout for a single package.
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Server answered with a non-2xx status.
    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    /// Request never got a response.
    #[error("{0}")]
    Network(String),

    #[error("Invalid firmware location {location}: {message}")]
    InvalidLocation { location: String, message: String },
}

/// Source of firmware package bytes.
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Fetch the package named by a catalog `filename`.
    async fn fetch(&self, filename: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetches packages over HTTP(S).
pub struct HttpSource {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpSource {
    pub fn new(base_url: Option<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, base_url })
    }

    /// Absolute URL for `filename`.
    pub fn resolve(&self, filename: &str) -> Result<reqwest::Url, FetchError> {
        let invalid = |message: String| FetchError::InvalidLocation {
            location: filename.to_string(),
            message,
        };

        if filename.starts_with("http://") || filename.starts_with("https://") {
            return reqwest::Url::parse(filename).map_err(|e| invalid(e.to_string()));
        }

        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| invalid("relative path and no base URL configured".into()))?;
        let url = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            filename.trim_start_matches('/')
        );
        reqwest::Url::parse(&url).map_err(|e| invalid(e.to_string()))
    }
}

#[async_trait]
impl PackageSource for HttpSource {
    #[instrument(skip(self))]
    async fn fetch(&self, filename: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.resolve(filename)?;
        debug!(url = %url, "Fetching firmware package");

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Firmware download failed");
            FetchError::Network(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Firmware download rejected");
            return Err(FetchError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        info!(url = %url, size = bytes.len(), "Downloaded firmware package");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative() {
        let source = HttpSource::new(Some("https://dfu.slimetora.dev/".into())).unwrap();
        assert_eq!(
            source
                .resolve("/firmware/mc3s/mc3_sensor_20250430_5398332.zip")
                .unwrap()
                .as_str(),
            "https://dfu.slimetora.dev/firmware/mc3s/mc3_sensor_20250430_5398332.zip"
        );
    }

    #[test]
    fn test_resolve_absolute() {
        let source = HttpSource::new(None).unwrap();
        assert_eq!(
            source.resolve("http://localhost:8080/a.zip").unwrap().as_str(),
            "http://localhost:8080/a.zip"
        );
    }

    #[test]
    fn test_resolve_without_base() {
        let source = HttpSource::new(None).unwrap();
        assert!(matches!(
            source.resolve("/firmware/a.zip"),
            Err(FetchError::InvalidLocation { .. })
        ));
    }
}
