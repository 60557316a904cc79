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

//! Session request/response types.
//!
//! These types map directly to the JSON bodies exchanged with the session
//! endpoints. Every response shares the `{data, code, message, success}`
//! envelope.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Error code returned when the session token has expired.
pub const SESSION_EXPIRED_CODE: &str = "390112";

pub const LOGIN_PATH: &str = "/session/v1/login-request";
pub const TOKEN_REQUEST_PATH: &str = "/session/token-request";
pub const HEARTBEAT_PATH: &str = "/session/heartbeat";
pub const CLOSE_PATH: &str = "/session?delete=true";

/// Envelope shared by all session responses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerResponse<T> {
    pub data: Option<T>,
    #[serde(default, deserialize_with = "deserialize_code")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub success: bool,
}

impl<T> ServerResponse<T> {
    /// Whether the server reported the session token as expired.
    pub fn is_session_expired(&self) -> bool {
        self.code.as_deref() == Some(SESSION_EXPIRED_CODE)
    }
}

/// Codes arrive as either strings or numbers depending on the endpoint.
fn deserialize_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// A server-pushed session parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameValueParameter {
    pub name: String,
    pub value: serde_json::Value,
}

impl NameValueParameter {
    pub fn new(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Body of the login request.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub data: LoginRequestData,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct LoginRequestData {
    pub client_app_id: String,
    pub client_app_version: String,
    pub account_name: String,
    pub login_name: String,
    pub password: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub session_parameters: HashMap<String, serde_json::Value>,
}

impl std::fmt::Debug for LoginRequestData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequestData")
            .field("client_app_id", &self.client_app_id)
            .field("account_name", &self.account_name)
            .field("login_name", &self.login_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// `data` of a successful login response.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponseData {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub master_token: String,
    #[serde(default)]
    pub session_id: Option<i64>,
    /// Validity of the session token. Zero or absent means the server default.
    #[serde(default)]
    pub validity_in_seconds: u64,
    /// Validity of the master token. Zero or absent means the server default.
    #[serde(default)]
    pub master_validity_in_seconds: u64,
    #[serde(default)]
    pub parameters: Vec<NameValueParameter>,
}

impl std::fmt::Debug for LoginResponseData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginResponseData")
            .field("session_id", &self.session_id)
            .field("validity_in_seconds", &self.validity_in_seconds)
            .field(
                "master_validity_in_seconds",
                &self.master_validity_in_seconds,
            )
            .field("parameters", &self.parameters.len())
            .finish()
    }
}

/// Body of the token renewal request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewSessionRequest {
    pub old_session_token: String,
    pub request_type: String,
}

impl RenewSessionRequest {
    pub fn renew(old_session_token: impl Into<String>) -> Self {
        Self {
            old_session_token: old_session_token.into(),
            request_type: "RENEW".to_string(),
        }
    }
}

/// `data` of a successful renewal response.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewSessionResponseData {
    pub session_token: String,
    #[serde(default)]
    pub master_token: String,
    #[serde(default, rename = "validityInSecondsST")]
    pub session_token_validity_in_seconds: u64,
    #[serde(default, rename = "validityInSecondsMT")]
    pub master_token_validity_in_seconds: u64,
}

impl std::fmt::Debug for RenewSessionResponseData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewSessionResponseData")
            .field(
                "session_token_validity_in_seconds",
                &self.session_token_validity_in_seconds,
            )
            .finish()
    }
}

/// A single entry of the server's query context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryContextResponseEntry {
    pub id: u64,
    pub timestamp: i64,
    pub priority: u64,
    #[serde(default)]
    pub context: Option<String>,
}

/// `queryContext` attached to query responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryContextResponse {
    #[serde(default)]
    pub entries: Vec<QueryContextResponseEntry>,
}

/// Opaque context payload as sent back to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryContextValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryContextRequestEntry {
    pub id: u64,
    pub timestamp: i64,
    pub priority: u64,
    pub context: QueryContextValue,
}

/// `queryContextDTO` attached to outgoing query requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryContextRequest {
    pub entries: Vec<QueryContextRequestEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_response_deserialization() {
        let json = r#"{
            "data": {
                "token": "session-token",
                "masterToken": "master-token",
                "sessionId": 1234,
                "validityInSeconds": 3600,
                "masterValidityInSeconds": 14400,
                "parameters": [
                    {"name": "CLIENT_PREFETCH_THREADS", "value": 8},
                    {"name": "CLIENT_SESSION_KEEP_ALIVE", "value": true}
                ]
            },
            "code": null,
            "message": null,
            "success": true
        }"#;

        let response: ServerResponse<LoginResponseData> = serde_json::from_str(json).unwrap();
        assert!(response.success);
        let data = response.data.unwrap();
        assert_eq!(data.token, "session-token");
        assert_eq!(data.session_id, Some(1234));
        assert_eq!(data.master_validity_in_seconds, 14400);
        assert_eq!(data.parameters.len(), 2);
    }

    #[test]
    fn test_failure_envelope_numeric_code() {
        let json = r#"{"data": null, "code": 390112, "message": "Session expired", "success": false}"#;
        let response: ServerResponse<serde_json::Value> = serde_json::from_str(json).unwrap();
        assert!(!response.success);
        assert!(response.is_session_expired());
    }

    #[test]
    fn test_failure_envelope_string_code() {
        let json = r#"{"code": "390100", "message": "Incorrect username or password", "success": false}"#;
        let response: ServerResponse<LoginResponseData> = serde_json::from_str(json).unwrap();
        assert_eq!(response.code.as_deref(), Some("390100"));
        assert!(response.data.is_none());
        assert!(!response.is_session_expired());
    }

    #[test]
    fn test_renew_request_serialization() {
        let json = serde_json::to_value(RenewSessionRequest::renew("old")).unwrap();
        assert_eq!(json["oldSessionToken"], "old");
        assert_eq!(json["requestType"], "RENEW");
    }

    #[test]
    fn test_renew_response_deserialization() {
        let json = r#"{"sessionToken": "s2", "masterToken": "m2", "validityInSecondsST": 3600, "validityInSecondsMT": 14400}"#;
        let data: RenewSessionResponseData = serde_json::from_str(json).unwrap();
        assert_eq!(data.session_token, "s2");
        assert_eq!(data.master_token, "m2");
        assert_eq!(data.session_token_validity_in_seconds, 3600);
    }

    #[test]
    fn test_login_request_debug_redacts_password() {
        let data = LoginRequestData {
            client_app_id: "app".to_string(),
            client_app_version: "1".to_string(),
            account_name: "acct".to_string(),
            login_name: "user".to_string(),
            password: "hunter2".to_string(),
            session_parameters: HashMap::new(),
        };
        let debug = format!("{:?}", data);
        assert!(!debug.contains("hunter2"));

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["LOGIN_NAME"], "user");
        assert!(json.get("SESSION_PARAMETERS").is_none());
    }

    #[test]
    fn test_query_context_request_serialization() {
        let request = QueryContextRequest {
            entries: vec![QueryContextRequestEntry {
                id: 0,
                timestamp: 42,
                priority: 0,
                context: QueryContextValue {
                    base64_data: Some("abc".to_string()),
                },
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["entries"][0]["context"]["base64Data"], "abc");
    }
}
