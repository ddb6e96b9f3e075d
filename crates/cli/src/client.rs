//! API client for communicating with the outlier agent

use anyhow::{Context, Result};
use outlier_lib::{DetectionResult, HealthResponse};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Error reported by the agent API
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message} ({status}): {detail}")]
    Status {
        status: StatusCode,
        message: String,
        detail: String,
    },
}

/// Error body returned by the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: bool,
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// API client for the outlier agent
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request with query parameters
    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            return Err(api_error(response).await.into());
        }

        response.json().await.context("Failed to parse response")
    }

    /// Run detection for one site
    pub async fn detect(&self, site_id: &str) -> Result<Vec<DetectionResult>> {
        self.get("api/detect_outliers", &[("siteId", site_id)]).await
    }

    /// Component health. An unhealthy agent answers 503 with the same body.
    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.base_url.join("healthz").context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        match response.status() {
            s if s.is_success() || s == StatusCode::SERVICE_UNAVAILABLE => {
                response.json().await.context("Failed to parse response")
            }
            _ => Err(api_error(response).await.into()),
        }
    }
}

async fn api_error(response: Response) -> ApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) => ApiError::Status {
            status,
            message: err.message,
            detail: err.error.unwrap_or_default(),
        },
        Err(_) => ApiError::Status {
            status,
            message: "API error".to_string(),
            detail: body,
        },
    }
}
