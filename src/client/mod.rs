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

//! HTTP transport used by the session controller and the chunk downloaders.
//!
//! This module provides:
//! - `HttpRequester` trait: the POST/GET capability everything else consumes
//! - `RestHttpClient`: reqwest implementation with retry logic
//! - `post_typed`: helper that decodes the response envelope

pub mod http;

use crate::error::Result;
use crate::types::session::ServerResponse;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use http::{HttpClientConfig, RestHttpClient};

/// A single outbound request.
#[derive(Debug, Clone, Default)]
pub struct RestRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
    /// Per-request timeout. `None` disables the timeout.
    pub timeout: Option<Duration>,
}

impl RestRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: &HashMap<String, String>) -> Self {
        self.headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// POST/GET capability with timeout and cancellation.
///
/// Implementations return `Error::Transport` for non-success HTTP statuses and
/// network failures, and `Error::Cancelled` when `cancel` fires first.
#[async_trait]
pub trait HttpRequester: Send + Sync + std::fmt::Debug {
    /// POST a JSON body and return the decoded JSON response.
    async fn post(&self, request: RestRequest, cancel: &CancellationToken)
        -> Result<serde_json::Value>;

    /// GET raw bytes.
    async fn get(&self, request: RestRequest, cancel: &CancellationToken) -> Result<Vec<u8>>;
}

/// POST and decode the `{data, code, message, success}` envelope.
pub async fn post_typed<T: DeserializeOwned>(
    requester: &dyn HttpRequester,
    request: RestRequest,
    cancel: &CancellationToken,
) -> Result<ServerResponse<T>> {
    let value = requester.post(request, cancel).await?;
    Ok(serde_json::from_value(value)?)
}

/// Authorization header value for a session or master token.
pub fn token_header(token: &str) -> String {
    format!("Snowflake Token=\"{}\"", token)
}

/// Append a fresh `requestId` query parameter to `url`.
pub(crate) fn with_request_id(url: String) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}requestId={}", url, separator, uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_request_builder() {
        let extra = HashMap::from([("x-amz-server-side-encryption-customer-key".to_string(), "k".to_string())]);
        let request = RestRequest::new("https://example.com/path")
            .header("Authorization", "Snowflake Token=\"t\"")
            .headers(&extra)
            .json(serde_json::json!({"a": 1}))
            .timeout(Some(Duration::from_secs(5)));

        assert_eq!(request.headers.len(), 2);
        assert_eq!(request.body.unwrap()["a"], 1);
        assert_eq!(request.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_token_header() {
        assert_eq!(token_header("abc"), "Snowflake Token=\"abc\"");
    }

    #[test]
    fn test_with_request_id() {
        let url = with_request_id("https://h:443/session/heartbeat".to_string());
        assert!(url.starts_with("https://h:443/session/heartbeat?requestId="));

        let url = with_request_id("https://h:443/session?delete=true".to_string());
        assert!(url.contains("?delete=true&requestId="));
    }
}
