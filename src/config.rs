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

//! Client configuration.
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `snowflake.scheme` | https | Endpoint scheme |
//! | `snowflake.host` | (required) | Account host |
//! | `snowflake.port` | 443 | Endpoint port |
//! | `snowflake.request_timeout_secs` | 60 | Timeout for ordinary requests and chunk GETs |
//! | `snowflake.login_timeout_secs` | 300 | Timeout for login and renewal |
//! | `snowflake.disable_login_timeout` | false | Never time out login and renewal |
//! | `snowflake.client_session_keep_alive` | false | Register for heartbeats |
//! | `snowflake.query_context_cache.enabled` | true | Replay query context |
//! | `snowflake.query_context_cache.size` | 5 | Query context capacity |
//! | `snowflake.chunk_downloader.use_v2` | false | Force the prefetch pool |
//! | `snowflake.chunk_downloader.version` | 3 | 1, 2 or 3 |
//! | `snowflake.chunk_downloader.prefetch_threads` | 4 | Prefetch width |
//! | `snowflake.chunk_downloader.max_retries` | 5 | Download retry attempts |
//! | `snowflake.chunk_downloader.retry_delay_ms` | 1500 | Retry delay in ms |
//! | `snowflake.chunk_downloader.max_refresh_retries` | 3 | Session renewals per chunk |
//! | `snowflake.chunk_downloader.speed_threshold_mbps` | 0.1 | Slow download warning threshold |
//! | `snowflake.log_level` | (RUST_LOG) | Log level |
//! | `snowflake.log_file` | (stderr) | Log file |

use crate::error::{Error, Result};
use crate::logging::LogConfig;
use crate::reader::strategy::{select_downloader_kind, ChunkDownloaderKind};
use std::time::Duration;

/// Default query-context cache capacity.
pub const DEFAULT_QUERY_CONTEXT_CACHE_SIZE: usize = 5;

/// Default prefetch width (matches the server default for `CLIENT_PREFETCH_THREADS`).
pub const DEFAULT_PREFETCH_THREADS: usize = 4;

/// Configuration for chunk retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDownloaderConfig {
    /// When true the Bounded-Prefetch-Pool strategy is used regardless of `version`.
    pub use_v2: bool,
    /// Raw downloader version as configured. Resolved by [`Self::downloader_kind`].
    pub version: String,
    /// Maximum number of chunks downloading ahead of the consumer.
    pub prefetch_threads: usize,
    /// Maximum number of retry attempts for failed downloads.
    pub max_retries: u32,
    /// Delay between retry attempts.
    pub retry_delay: Duration,
    /// Maximum number of session renewals triggered by one chunk.
    pub max_refresh_retries: u32,
    /// Timeout for a single chunk GET. A session replaces it with
    /// [`ClientConfig::request_timeout`].
    pub request_timeout: Duration,
    /// Log warning if download speed falls below this threshold (MB/s).
    pub speed_threshold_mbps: f64,
}

impl Default for ChunkDownloaderConfig {
    fn default() -> Self {
        Self {
            use_v2: false,
            version: "3".to_string(),
            prefetch_threads: DEFAULT_PREFETCH_THREADS,
            max_retries: 5,
            retry_delay: Duration::from_millis(1500),
            max_refresh_retries: 3,
            request_timeout: Duration::from_secs(60),
            speed_threshold_mbps: 0.1,
        }
    }
}

impl ChunkDownloaderConfig {
    /// Resolve the configured strategy.
    ///
    /// `use_v2` wins over `version`. Otherwise `version` must be an integer
    /// mapping to a known strategy; anything else (including non-numeric
    /// values) is [`Error::UnsupportedChunkDownloaderVersion`].
    pub fn downloader_kind(&self) -> Result<ChunkDownloaderKind> {
        if self.use_v2 {
            return Ok(ChunkDownloaderKind::PrefetchPool);
        }
        let version = self
            .version
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::UnsupportedChunkDownloaderVersion(self.version.clone()))?;
        select_downloader_kind(false, version)
    }
}

/// Configuration for a session and the queries it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub scheme: String,
    pub host: Option<String>,
    pub port: u16,
    /// Timeout for heartbeat, close and other ordinary requests.
    pub request_timeout: Duration,
    /// Timeout for login and renewal. `None` disables the timeout.
    pub login_timeout: Option<Duration>,
    /// Register the session for background heartbeats.
    pub client_session_keep_alive: bool,
    pub query_context_cache_enabled: bool,
    pub query_context_cache_size: usize,
    pub chunk_downloader: ChunkDownloaderConfig,
    pub log: LogConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            host: None,
            port: 443,
            request_timeout: Duration::from_secs(60),
            login_timeout: Some(Duration::from_secs(300)),
            client_session_keep_alive: false,
            query_context_cache_enabled: true,
            query_context_cache_size: DEFAULT_QUERY_CONTEXT_CACHE_SIZE,
            chunk_downloader: ChunkDownloaderConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from key/value pairs.
    pub fn from_options<'a, I>(options: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in options {
            config.set_option(key, value)?;
        }
        Ok(config)
    }

    /// Base URL of the account endpoint, e.g. `https://acct.snowflakecomputing.com:443`.
    pub fn base_url(&self) -> Result<String> {
        let host = self
            .host
            .as_deref()
            .ok_or_else(|| Error::InvalidConfig("snowflake.host is required".to_string()))?;
        Ok(format!("{}://{}:{}", self.scheme, host, self.port))
    }

    /// Set a single option.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "snowflake.scheme" => match value.to_lowercase().as_str() {
                s @ ("http" | "https") => self.scheme = s.to_string(),
                _ => return Err(invalid(key, value)),
            },
            "snowflake.host" => {
                if value.is_empty() {
                    return Err(invalid(key, value));
                }
                self.host = Some(value.to_string());
            }
            "snowflake.port" => {
                self.port = value.parse().map_err(|_| invalid(key, value))?;
            }
            "snowflake.request_timeout_secs" => {
                self.request_timeout = Duration::from_secs(parse_int(key, value)?);
                self.chunk_downloader.request_timeout = self.request_timeout;
            }
            "snowflake.login_timeout_secs" => {
                if self.login_timeout.is_some() {
                    self.login_timeout = Some(Duration::from_secs(parse_int(key, value)?));
                }
            }
            "snowflake.disable_login_timeout" => {
                if parse_bool(key, value)? {
                    self.login_timeout = None;
                } else if self.login_timeout.is_none() {
                    self.login_timeout = ClientConfig::default().login_timeout;
                }
            }
            "snowflake.client_session_keep_alive" => {
                self.client_session_keep_alive = parse_bool(key, value)?;
            }
            "snowflake.query_context_cache.enabled" => {
                self.query_context_cache_enabled = parse_bool(key, value)?;
            }
            "snowflake.query_context_cache.size" => {
                self.query_context_cache_size = parse_int(key, value)? as usize;
            }
            "snowflake.chunk_downloader.use_v2" => {
                self.chunk_downloader.use_v2 = parse_bool(key, value)?;
            }
            "snowflake.chunk_downloader.version" => {
                // Resolved lazily so `use_v2` can still override an unmapped value.
                self.chunk_downloader.version = value.to_string();
            }
            "snowflake.chunk_downloader.prefetch_threads" => {
                let threads = parse_int(key, value)? as usize;
                if threads == 0 {
                    return Err(invalid(key, value));
                }
                self.chunk_downloader.prefetch_threads = threads;
            }
            "snowflake.chunk_downloader.max_retries" => {
                self.chunk_downloader.max_retries = parse_u32(key, value)?;
            }
            "snowflake.chunk_downloader.retry_delay_ms" => {
                self.chunk_downloader.retry_delay = Duration::from_millis(parse_int(key, value)?);
            }
            "snowflake.chunk_downloader.max_refresh_retries" => {
                self.chunk_downloader.max_refresh_retries = parse_u32(key, value)?;
            }
            "snowflake.chunk_downloader.speed_threshold_mbps" => {
                self.chunk_downloader.speed_threshold_mbps =
                    value.parse().map_err(|_| invalid(key, value))?;
            }
            "snowflake.log_level" => self.log.level = Some(value.to_string()),
            "snowflake.log_file" => self.log.file = Some(value.to_string()),
            _ => {
                return Err(Error::InvalidConfig(format!("Unknown option: {}", key)));
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str) -> Error {
    Error::InvalidConfig(format!("Invalid value '{}' for option {}", value, key))
}

/// Parse a boolean option value.
pub(crate) fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

/// Parse a non-negative integer option value.
pub(crate) fn parse_int(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32> {
    u32::try_from(parse_int(key, value)?).map_err(|_| invalid(key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.scheme, "https");
        assert_eq!(config.port, 443);
        assert_eq!(config.login_timeout, Some(Duration::from_secs(300)));
        assert!(config.query_context_cache_enabled);
        assert_eq!(config.query_context_cache_size, 5);
        assert_eq!(config.chunk_downloader.prefetch_threads, 4);
        assert!(!config.chunk_downloader.use_v2);
        assert_eq!(config.chunk_downloader.version, "3");
    }

    #[test]
    fn test_set_options() {
        let config = ClientConfig::from_options([
            ("snowflake.host", "acct.snowflakecomputing.com"),
            ("snowflake.port", "8443"),
            ("snowflake.client_session_keep_alive", "true"),
            ("snowflake.query_context_cache.size", "7"),
            ("snowflake.chunk_downloader.prefetch_threads", "8"),
            ("snowflake.chunk_downloader.retry_delay_ms", "10"),
        ])
        .unwrap();

        assert_eq!(
            config.base_url().unwrap(),
            "https://acct.snowflakecomputing.com:8443"
        );
        assert!(config.client_session_keep_alive);
        assert_eq!(config.query_context_cache_size, 7);
        assert_eq!(config.chunk_downloader.prefetch_threads, 8);
        assert_eq!(config.chunk_downloader.retry_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let mut config = ClientConfig::default();
        assert!(matches!(
            config.set_option("snowflake.nope", "1"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(config.set_option("snowflake.port", "not-a-port").is_err());
        assert!(config
            .set_option("snowflake.chunk_downloader.prefetch_threads", "0")
            .is_err());
    }

    #[test]
    fn test_retry_counts_reject_out_of_range_values() {
        let mut config = ClientConfig::default();
        for key in [
            "snowflake.chunk_downloader.max_retries",
            "snowflake.chunk_downloader.max_refresh_retries",
        ] {
            assert!(matches!(
                config.set_option(key, "4294967296"),
                Err(Error::InvalidConfig(_))
            ));
        }
        assert_eq!(config.chunk_downloader.max_retries, 5);
        assert_eq!(config.chunk_downloader.max_refresh_retries, 3);

        config
            .set_option("snowflake.chunk_downloader.max_retries", "4294967295")
            .unwrap();
        assert_eq!(config.chunk_downloader.max_retries, u32::MAX);
    }

    #[test]
    fn test_request_timeout_reaches_chunk_downloads() {
        let config =
            ClientConfig::from_options([("snowflake.request_timeout_secs", "5")]).unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.chunk_downloader.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_disable_login_timeout() {
        let mut config = ClientConfig::default();
        config
            .set_option("snowflake.disable_login_timeout", "true")
            .unwrap();
        assert_eq!(config.login_timeout, None);

        // A timeout value does not re-enable a disabled timeout
        config
            .set_option("snowflake.login_timeout_secs", "10")
            .unwrap();
        assert_eq!(config.login_timeout, None);

        config
            .set_option("snowflake.disable_login_timeout", "false")
            .unwrap();
        assert_eq!(config.login_timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_base_url_requires_host() {
        assert!(ClientConfig::default().base_url().is_err());
    }

    #[test]
    fn test_downloader_kind_resolution() {
        let mut config = ChunkDownloaderConfig::default();
        assert_eq!(
            config.downloader_kind().unwrap(),
            ChunkDownloaderKind::PrefetchPoolV3
        );

        config.version = "1".to_string();
        assert_eq!(
            config.downloader_kind().unwrap(),
            ChunkDownloaderKind::Sequential
        );

        config.version = "two".to_string();
        assert!(matches!(
            config.downloader_kind(),
            Err(Error::UnsupportedChunkDownloaderVersion(_))
        ));

        config.use_v2 = true;
        assert_eq!(
            config.downloader_kind().unwrap(),
            ChunkDownloaderKind::PrefetchPool
        );
    }
}
