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

//! Diagnostics output for sessions and chunk downloads.
//!
//! The first [`crate::SessionController`] created in a process installs a
//! `tracing-subscriber` registry scoped to the `snowflake_driver` target.
//! `snowflake.log_level` wins over `RUST_LOG`; with neither set only
//! warnings are written. `snowflake.log_file` appends to a file instead of
//! stderr.
//!
//! ```bash
//! RUST_LOG=snowflake_driver=trace ./my_app   # per-chunk and heartbeat detail
//! ```

use std::sync::OnceLock;
use tracing_subscriber::{
    fmt::{self, time::SystemTime, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_TARGET: &str = "snowflake_driver";
const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Log settings taken from `snowflake.log_level` and `snowflake.log_file`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogConfig {
    /// `off` or one of `error`..`trace`, any case.
    pub level: Option<String>,
    /// Append to this file instead of stderr.
    pub file: Option<String>,
}

impl LogConfig {
    fn is_off(&self) -> bool {
        self.level
            .as_deref()
            .is_some_and(|level| level.trim().eq_ignore_ascii_case("off"))
    }

    /// Directive for an explicit, recognized level.
    fn directive(&self) -> Option<String> {
        let level = self.level.as_deref()?.trim().to_ascii_lowercase();
        LEVELS
            .contains(&level.as_str())
            .then(|| format!("{}={}", LOG_TARGET, level))
    }

    fn filter(&self) -> EnvFilter {
        match self.directive() {
            Some(directive) => EnvFilter::new(directive),
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("{}=warn", LOG_TARGET))),
        }
    }

    fn writer(&self) -> std::io::Result<(BoxMakeWriter, bool)> {
        match self.file {
            Some(ref path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                Ok((BoxMakeWriter::new(file), false))
            }
            None => Ok((BoxMakeWriter::new(std::io::stderr), true)),
        }
    }
}

/// Install the driver's subscriber once per process.
///
/// A subscriber already installed by the host application is left alone.
pub fn init_logging(config: &LogConfig) {
    INSTALLED.get_or_init(|| {
        if config.is_off() {
            return;
        }

        let (writer, ansi) = match config.writer() {
            Ok(writer) => writer,
            Err(e) => {
                eprintln!(
                    "snowflake-driver: cannot open log file {:?}: {}",
                    config.file, e
                );
                return;
            }
        };

        let installed = tracing_subscriber::registry()
            .with(config.filter())
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_target(false)
                    .with_ansi(ansi)
                    .with_timer(SystemTime),
            )
            .try_init()
            .is_ok();

        if installed && config.level.is_some() && config.directive().is_none() {
            tracing::warn!(
                "Unknown log level {:?}, falling back to RUST_LOG or warn",
                config.level
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_level(level: &str) -> LogConfig {
        LogConfig {
            level: Some(level.to_string()),
            file: None,
        }
    }

    #[test]
    fn test_unset_level_defers_to_environment() {
        let config = LogConfig::default();
        assert!(!config.is_off());
        assert_eq!(config.directive(), None);
    }

    #[test]
    fn test_level_is_scoped_to_driver_target() {
        assert_eq!(
            with_level(" DEBUG ").directive().as_deref(),
            Some("snowflake_driver=debug")
        );
        assert_eq!(with_level("verbose").directive(), None);
        assert!(with_level("Off").is_off());
        assert_eq!(with_level("off").directive(), None);
    }

    #[test]
    fn test_missing_log_directory_is_reported() {
        let config = LogConfig {
            level: None,
            file: Some("/nonexistent-dir/driver.log".to_string()),
        };
        assert!(config.writer().is_err());
    }

    #[test]
    fn test_second_init_is_noop() {
        init_logging(&with_level("off"));
        init_logging(&LogConfig::default());
    }
}
