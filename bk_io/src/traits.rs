//! Trait abstractions for network I/O, so tests can inject mock clients.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
#[cfg(test)]
use mockall::automock;

use bk_core::FetchError;

/// HTTP client trait for abstracting network operations.
///
/// Tests inject mock clients to simulate network failures, missing files
/// and specific payloads.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Perform a GET request and return the response body as bytes.
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError>;

    /// Perform a GET request with a timeout.
    async fn get_with_timeout(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError>;
}

/// Real HTTP client implementation using reqwest.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(concat!("brewkit/", env!("CARGO_PKG_VERSION")))
                .pool_max_idle_per_host(4)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn read_body(&self, url: &str, response: reqwest::Response) -> Result<Vec<u8>, FetchError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::NetworkFailure {
                url: url.to_string(),
                message: format!("HTTP {}", status),
            });
        }

        let mut body = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::NetworkFailure {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::NetworkFailure {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        self.read_body(url, response).await
    }

    async fn get_with_timeout(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::NetworkFailure {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        self.read_body(url, response).await
    }
}
