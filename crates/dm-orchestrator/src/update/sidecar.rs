//! Self-update sidecar client

use std::time::Duration;
use thiserror::Error;

const SIDECAR_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum SidecarError {
    #[error("sidecar request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("sidecar at {url} answered {status}")]
    Status { url: String, status: u16 },
}

/// Asks the external updater to replace dockman's own container
#[derive(Debug, Clone)]
pub struct SidecarClient {
    base_url: String,
    http: reqwest::Client,
}

impl SidecarClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET {base_url}/{container_id}`
    pub async fn trigger(&self, container_id: &str) -> Result<(), SidecarError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), container_id);
        tracing::info!("Triggering self-update via {}", url);

        let response = self
            .http
            .get(&url)
            .timeout(SIDECAR_TIMEOUT)
            .send()
            .await
            .map_err(|source| SidecarError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SidecarError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
