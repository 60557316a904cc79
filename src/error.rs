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

//! Error types for the Snowflake driver core.
//!
//! Every fallible operation in this crate returns [`Result<T>`]. Server-side
//! failures keep the Snowflake error code (when the server supplied one) so
//! callers can map them onto their own API surface.

use thiserror::Error;

/// Message carried by [`Error::UnsupportedChunkDownloaderVersion`].
pub const UNSUPPORTED_DOWNLOADER_MESSAGE: &str =
    "Unsupported chunk downloader version specified in the configuration";

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the session controller and the chunk retrieval engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Login was rejected or could not be completed. Not retried.
    #[error("Authentication failed (code {}): {message}", display_code(.code))]
    AuthenticationFailed {
        code: Option<String>,
        message: String,
    },

    /// Token renewal with the master token failed.
    #[error("Session renewal failed (code {}): {message}", display_code(.code))]
    SessionRenewalFailed {
        code: Option<String>,
        message: String,
    },

    /// The configured chunk downloader version does not map to a strategy.
    #[error("Unsupported chunk downloader version specified in the configuration: {0}")]
    UnsupportedChunkDownloaderVersion(String),

    /// A chunk could not be downloaded within the strategy's retry policy.
    #[error("Failed to download chunk {chunk_index}: {message}")]
    ChunkDownloadFailed { chunk_index: usize, message: String },

    /// Decoded row count does not match the row count the server declared.
    #[error("Chunk {chunk_index} integrity error: expected {expected} rows, decoded {actual}")]
    ChunkIntegrity {
        chunk_index: usize,
        expected: i64,
        actual: i64,
    },

    /// The operation was cancelled through its cancellation token.
    #[error("Operation cancelled")]
    Cancelled,

    /// HTTP-level failure. `status` is `None` for network errors and timeouts.
    #[error("HTTP request failed{}: {message}", display_status(.status))]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// Decompression or row decoding failed.
    #[error("Failed to decode chunk data: {0}")]
    Decode(String),

    /// A configuration option was unknown or had an invalid value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The operation is not valid in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn display_code(code: &Option<String>) -> &str {
    code.as_deref().unwrap_or("none")
}

fn display_status(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" with HTTP {}", s),
        None => String::new(),
    }
}

impl Error {
    /// Shorthand for a transport error without an HTTP status.
    pub fn network(message: impl Into<String>) -> Self {
        Error::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Shorthand for a transport error with an HTTP status.
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Error::Transport {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Whether the failure is worth retrying: network errors, timeouts,
    /// 408, 429 and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { status: None, .. } => true,
            Error::Transport {
                status: Some(status),
                ..
            } => matches!(*status, 408 | 429) || (500..600).contains(status),
            _ => false,
        }
    }

    /// Whether the failure is an HTTP 401/403.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Error::Transport {
                status: Some(401 | 403),
                ..
            }
        )
    }
}
