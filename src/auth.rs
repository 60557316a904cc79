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

//! Authentication providers.
//!
//! An [`Authenticator`] performs the login exchange and returns the server's
//! login response. The session controller owns everything that happens after
//! that (token storage, renewal, heartbeats).

use crate::client::{post_typed, with_request_id, HttpRequester, RestRequest};
use crate::error::{Error, Result};
use crate::types::session::{LoginRequest, LoginRequestData, LoginResponseData, LOGIN_PATH};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Everything an authenticator needs to reach the login endpoint.
#[derive(Debug)]
pub struct LoginContext<'a> {
    pub http: &'a dyn HttpRequester,
    pub base_url: &'a str,
    /// `None` when login timeouts are disabled.
    pub timeout: Option<Duration>,
    pub cancel: &'a CancellationToken,
}

/// Pluggable login capability.
///
/// Implementations return [`Error::AuthenticationFailed`] for any failure,
/// carrying the server code and message when the server supplied them.
#[async_trait]
pub trait Authenticator: Send + Sync + std::fmt::Debug {
    async fn authenticate(&self, context: &LoginContext<'_>) -> Result<LoginResponseData>;
}

/// Client application id reported at login unless overridden.
pub const DEFAULT_CLIENT_APP_ID: &str = "SnowflakeRustDriver";

/// Username/password login.
#[derive(Clone)]
pub struct PasswordAuthenticator {
    account: String,
    user: String,
    password: String,
    client_app_id: String,
    client_app_version: String,
    session_parameters: HashMap<String, serde_json::Value>,
}

impl std::fmt::Debug for PasswordAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordAuthenticator")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("client_app_id", &self.client_app_id)
            .field("client_app_version", &self.client_app_version)
            .finish()
    }
}

impl PasswordAuthenticator {
    pub fn new(
        account: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            user: user.into(),
            password: password.into(),
            client_app_id: DEFAULT_CLIENT_APP_ID.to_string(),
            client_app_version: env!("CARGO_PKG_VERSION").to_string(),
            session_parameters: HashMap::new(),
        }
    }

    /// Report a different client application to the server, e.g. when this
    /// crate is embedded in another driver.
    pub fn with_client_app(mut self, id: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_app_id = id.into();
        self.client_app_version = version.into();
        self
    }

    /// Session parameters to request at login.
    pub fn with_session_parameter(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.session_parameters.insert(name.into(), value.into());
        self
    }

    fn login_request(&self) -> LoginRequest {
        LoginRequest {
            data: LoginRequestData {
                client_app_id: self.client_app_id.clone(),
                client_app_version: self.client_app_version.clone(),
                account_name: self.account.clone(),
                login_name: self.user.clone(),
                password: self.password.clone(),
                session_parameters: self.session_parameters.clone(),
            },
        }
    }
}

#[async_trait]
impl Authenticator for PasswordAuthenticator {
    async fn authenticate(&self, context: &LoginContext<'_>) -> Result<LoginResponseData> {
        let url = with_request_id(format!("{}{}", context.base_url, LOGIN_PATH));
        let request = RestRequest::new(url)
            .json(serde_json::to_value(self.login_request())?)
            .timeout(context.timeout);

        debug!("Authenticating user {} on account {}", self.user, self.account);

        let response = post_typed::<LoginResponseData>(context.http, request, context.cancel)
            .await
            .map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                other => Error::AuthenticationFailed {
                    code: None,
                    message: other.to_string(),
                },
            })?;

        match response.data {
            Some(data) if response.success => Ok(data),
            _ => Err(Error::AuthenticationFailed {
                code: response.code,
                message: response
                    .message
                    .unwrap_or_else(|| "Login rejected by server".to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug)]
    struct ScriptedHttp {
        response: serde_json::Value,
        last_body: Mutex<Option<serde_json::Value>>,
    }

    #[async_trait]
    impl HttpRequester for ScriptedHttp {
        async fn post(
            &self,
            request: RestRequest,
            _cancel: &CancellationToken,
        ) -> Result<serde_json::Value> {
            assert!(request.url.contains(LOGIN_PATH));
            *self.last_body.lock() = request.body;
            Ok(self.response.clone())
        }

        async fn get(&self, _request: RestRequest, _cancel: &CancellationToken) -> Result<Vec<u8>> {
            unreachable!("login never issues GET")
        }
    }

    async fn run(response: serde_json::Value) -> (Result<LoginResponseData>, serde_json::Value) {
        let http = ScriptedHttp {
            response,
            last_body: Mutex::new(None),
        };
        let cancel = CancellationToken::new();
        let context = LoginContext {
            http: &http,
            base_url: "https://acct.example.com:443",
            timeout: None,
            cancel: &cancel,
        };
        let auth = PasswordAuthenticator::new("acct", "alice", "secret")
            .with_session_parameter("CLIENT_SESSION_KEEP_ALIVE", true);
        let result = auth.authenticate(&context).await;
        let body = http.last_body.lock().take().unwrap();
        (result, body)
    }

    #[tokio::test]
    async fn test_password_login_success() {
        let (result, body) = run(serde_json::json!({
            "data": {"token": "t", "masterToken": "m", "sessionId": 7},
            "success": true
        }))
        .await;

        let data = result.unwrap();
        assert_eq!(data.token, "t");
        assert_eq!(data.session_id, Some(7));
        assert_eq!(body["data"]["LOGIN_NAME"], "alice");
        assert_eq!(body["data"]["ACCOUNT_NAME"], "acct");
        assert_eq!(body["data"]["SESSION_PARAMETERS"]["CLIENT_SESSION_KEEP_ALIVE"], true);
    }

    #[tokio::test]
    async fn test_password_login_rejected() {
        let (result, _) = run(serde_json::json!({
            "data": null,
            "code": "390100",
            "message": "Incorrect username or password was specified.",
            "success": false
        }))
        .await;

        match result {
            Err(Error::AuthenticationFailed { code, message }) => {
                assert_eq!(code.as_deref(), Some("390100"));
                assert!(message.contains("Incorrect username"));
            }
            other => panic!("expected AuthenticationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_client_app_is_reported_at_login() {
        let default = serde_json::to_value(
            PasswordAuthenticator::new("acct", "alice", "secret").login_request(),
        )
        .unwrap();
        assert_eq!(default["data"]["CLIENT_APP_ID"], DEFAULT_CLIENT_APP_ID);
        assert_eq!(
            default["data"]["CLIENT_APP_VERSION"],
            env!("CARGO_PKG_VERSION")
        );

        let custom = serde_json::to_value(
            PasswordAuthenticator::new("acct", "alice", "secret")
                .with_client_app("EmbeddingDriver", "9.1.0")
                .login_request(),
        )
        .unwrap();
        assert_eq!(custom["data"]["CLIENT_APP_ID"], "EmbeddingDriver");
        assert_eq!(custom["data"]["CLIENT_APP_VERSION"], "9.1.0");
    }

    #[test]
    fn test_debug_redacts_password() {
        let auth = PasswordAuthenticator::new("acct", "alice", "secret");
        assert!(!format!("{:?}", auth).contains("secret"));
    }
}
