// Copyright (c) 2025 ADBC Drivers Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! reqwest implementation of [`HttpRequester`].
//!
//! One pooled client serves the account endpoint and chunk storage. Timeouts
//! are set per request (a login may have none) and every await point honors
//! the caller's cancellation token.

use crate::client::{HttpRequester, RestRequest};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub connect_timeout: Duration,
    /// Resends after the first attempt.
    pub max_retries: u32,
    /// First backoff; doubles on every further retry.
    pub retry_delay: Duration,
    pub max_connections_per_host: usize,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            max_retries: 5,
            retry_delay: Duration::from_millis(1500),
            max_connections_per_host: 100,
            user_agent: format!("SnowflakeRustDriver/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP client for communicating with the account endpoint and chunk storage.
///
/// Request timeouts are applied per request rather than on the client so a
/// login can run without one.
#[derive(Debug)]
pub struct RestHttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl RestHttpClient {
    /// Creates a new HTTP client with the given configuration.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.max_connections_per_host)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| Error::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    fn build(&self, method: Method, request: &RestRequest) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, &request.url)
            .header("Accept", "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }

    /// Send `request`, retrying while [`Error::is_retryable`] holds for the
    /// failure and attempts remain. The first 2xx response is returned.
    async fn execute(
        &self,
        method: Method,
        request: &RestRequest,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let target = redact_query(&request.url);
        let allowed = self.config.max_retries + 1;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!("{} {} attempt {} of {}", method, target, attempt, allowed);

            let send = self.build(method.clone(), request).send();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = send => outcome,
            };

            let failure = match outcome {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = read_body(response, cancel).await.unwrap_or_default();
                    Error::http_status(status, String::from_utf8_lossy(&body))
                }
                // Only failures before a response was received are worth resending.
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                    Error::network(e.to_string())
                }
                Err(e) => return Err(Error::network(e.to_string())),
            };

            if !failure.is_retryable() || attempt >= allowed {
                return Err(failure);
            }
            warn!("{} {} failed: {}; will retry", method, target, failure);
            self.backoff(attempt, cancel).await?;
        }
    }

    /// Sleep `retry_delay * 2^(attempt - 1)` unless cancelled first.
    async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> Result<()> {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let delay = self.config.retry_delay.saturating_mul(factor);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

async fn read_body(response: Response, cancel: &CancellationToken) -> Result<Vec<u8>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        body = response.bytes() => body
            .map(|b| b.to_vec())
            .map_err(|e| Error::network(format!("Failed to read response body: {}", e))),
    }
}

#[async_trait]
impl HttpRequester for RestHttpClient {
    async fn post(
        &self,
        request: RestRequest,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        let response = self.execute(Method::POST, &request, cancel).await?;
        let body = read_body(response, cancel).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn get(&self, request: RestRequest, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let response = self.execute(Method::GET, &request, cancel).await?;
        read_body(response, cancel).await
    }
}

/// Strip the query string so presigned URLs are not logged.
fn redact_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
