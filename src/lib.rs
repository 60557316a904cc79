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

//! Snowflake driver core for Rust
//!
//! This crate provides the two pieces of a Snowflake SQL driver that sit
//! underneath statement execution:
//!
//! - [`SessionController`] - login, token renewal, heartbeats and close for
//!   one session, plus the session parameters and query-context cache
//! - [`ChunkRetrievalEngine`] - ordered, cancellable, prefetching download of
//!   the Arrow result chunks of one query
//!
//! ## Features
//!
//! - **Three download strategies**: sequential, bounded prefetch pool and
//!   permit-based prefetch pool (v3), selected by configuration
//! - **Coalesced renewal**: concurrent callers holding the same expired token
//!   trigger a single renewal
//! - **Shared keep-alive**: one [`HeartbeatScheduler`] serves every session
//!   that opted in
//! - **Arrow IPC**: chunk bodies decoded with optional LZ4 frame compression
//!
//! ## Example
//!
//! ```ignore
//! use snowflake_driver::{
//!     ArrowIpcDecoder, ChunkDescriptor, ChunkRetrievalEngine, ClientConfig,
//!     PasswordAuthenticator, RestHttpClient, SessionController,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = ClientConfig::from_options([
//!     ("snowflake.host", "myaccount.snowflakecomputing.com"),
//!     ("snowflake.client_session_keep_alive", "true"),
//! ])?;
//! let http = Arc::new(RestHttpClient::new(Default::default())?);
//! let auth = Arc::new(PasswordAuthenticator::new("myaccount", "me", "secret"));
//! let session = SessionController::new(config, http, auth, None)?;
//! session.open().await?;
//!
//! let downloader_config = session.chunk_downloader_config();
//! let mut engine = ChunkRetrievalEngine::new(
//!     ChunkDescriptor::from_response(&chunks),
//!     chunk_headers,
//!     Arc::clone(&session),
//!     &downloader_config,
//!     Arc::new(ArrowIpcDecoder::default()),
//!     CancellationToken::new(),
//! )?;
//! while let Some(batch) = engine.get_next().await? {
//!     println!("{} rows", batch.num_rows());
//! }
//! session.close().await;
//! ```
//!
//! Configuration options are listed in [`config`].

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod reader;
pub mod session;
pub mod types;

// Re-export main types
pub use error::{Error, Result};
pub use reader::ChunkRetrievalEngine;
pub use session::{SessionController, SessionState};

// Re-export building blocks for advanced users
pub use auth::{Authenticator, LoginContext, PasswordAuthenticator};
pub use client::{HttpClientConfig, HttpRequester, RestHttpClient, RestRequest};
pub use reader::arrow_parser::{ArrowIpcDecoder, ChunkDecoder};
pub use reader::strategy::{select_downloader_kind, ChunkDownloaderKind};
pub use session::heartbeat::{HeartbeatScheduler, HeartbeatTarget};
pub use session::query_context::QueryContextCache;
pub use types::chunk::{ChunkDescriptor, ChunkStatus, CompressionCodec};

// Re-export configuration types
pub use config::{ChunkDownloaderConfig, ClientConfig};
pub use logging::LogConfig;
