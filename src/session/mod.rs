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

//! Session lifecycle.
//!
//! [`SessionController`] owns one authenticated session: login, token
//! renewal, keep-alive registration and teardown. It also owns the session's
//! [`ParameterMap`] and [`QueryContextCache`].
//!
//! ## State machine
//!
//! ```text
//! Unauthenticated -> Authenticating -> Established <-> Renewing
//!        \                 \                \             \
//!         +-----------------+----------------+-------------+--> Closed
//! ```
//!
//! `Closed` is terminal. A closed controller cannot be reopened.
//!
//! ## Renewal
//!
//! Renewals are serialized by an async guard. A caller that observed token
//! `t` only renews if the session token is still `t` once it holds the guard,
//! so concurrent callers that saw the same expired token trigger one renewal
//! between them. Otherwise the last renewal to complete wins.

pub mod heartbeat;
pub mod parameters;
pub mod query_context;

use crate::auth::{Authenticator, LoginContext};
use crate::client::{post_typed, token_header, with_request_id, HttpRequester, RestRequest};
use crate::config::{ChunkDownloaderConfig, ClientConfig};
use crate::error::{Error, Result};
use crate::logging::init_logging;
use crate::types::session::{
    NameValueParameter, QueryContextRequest, QueryContextResponse, RenewSessionRequest,
    RenewSessionResponseData, CLOSE_PATH, HEARTBEAT_PATH, TOKEN_REQUEST_PATH,
};
use async_trait::async_trait;
use heartbeat::{HeartbeatScheduler, HeartbeatTarget};
use parameters::{ParameterMap, ParameterValue, SessionParameter};
use parking_lot::Mutex;
use query_context::QueryContextCache;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Session token validity assumed when the server does not send one.
pub const DEFAULT_SESSION_VALIDITY_SECS: u64 = 3600;

/// Server default for `CLIENT_STAGE_ARRAY_BINDING_THRESHOLD`.
pub const DEFAULT_ARRAY_BIND_THRESHOLD: i64 = 65280;

static NEXT_SESSION_KEY: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticating,
    Established,
    Renewing,
    Closed,
}

#[derive(Default)]
struct SessionInner {
    state: SessionState,
    session_token: String,
    master_token: String,
    session_id: Option<i64>,
    /// Unix seconds at which login completed.
    start_time: Option<i64>,
    token_expires_at: Option<Instant>,
    master_validity_secs: u64,
}

impl SessionInner {
    fn has_token(&self) -> bool {
        !self.session_token.is_empty()
    }

    fn require_open(&self) -> Result<()> {
        match self.state {
            SessionState::Established | SessionState::Renewing if self.has_token() => Ok(()),
            SessionState::Closed => Err(Error::InvalidState("Session is closed".to_string())),
            _ => Err(Error::InvalidState("Session is not open".to_string())),
        }
    }
}

/// Returns the session from a transient state if the future holding it is
/// dropped mid-await. `Closed` is never overwritten.
struct StateRollback<'a> {
    inner: &'a Mutex<SessionInner>,
    transient: SessionState,
    restore: SessionState,
    armed: bool,
}

impl<'a> StateRollback<'a> {
    fn new(inner: &'a Mutex<SessionInner>, transient: SessionState, restore: SessionState) -> Self {
        Self {
            inner,
            transient,
            restore,
            armed: true,
        }
    }

    /// Must be called before `inner` is locked again by the owner.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StateRollback<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.state == self.transient {
            debug!("Abandoned {:?}, back to {:?}", self.transient, self.restore);
            inner.state = self.restore;
        }
    }
}

/// Owns one session against the account endpoint.
pub struct SessionController {
    key: u64,
    self_ref: Weak<SessionController>,
    config: ClientConfig,
    base_url: String,
    http: Arc<dyn HttpRequester>,
    authenticator: Arc<dyn Authenticator>,
    heartbeat: Option<Arc<HeartbeatScheduler>>,

    inner: Mutex<SessionInner>,
    renewal: tokio::sync::Mutex<()>,

    parameters: Mutex<ParameterMap>,
    query_context: QueryContextCache,
    keep_alive: AtomicBool,
    heartbeat_registered: AtomicBool,
    prefetch_threads: AtomicUsize,
    array_bind_threshold: AtomicI64,

    cancel: CancellationToken,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SessionController")
            .field("key", &self.key)
            .field("base_url", &self.base_url)
            .field("state", &inner.state)
            .field("session_id", &inner.session_id)
            .finish()
    }
}

impl SessionController {
    /// Create an unauthenticated session.
    ///
    /// `heartbeat` is the shared keep-alive scheduler; pass `None` to never
    /// register for heartbeats regardless of `CLIENT_SESSION_KEEP_ALIVE`.
    pub fn new(
        config: ClientConfig,
        http: Arc<dyn HttpRequester>,
        authenticator: Arc<dyn Authenticator>,
        heartbeat: Option<Arc<HeartbeatScheduler>>,
    ) -> Result<Arc<Self>> {
        init_logging(&config.log);

        let base_url = config.base_url()?;
        // Surface a bad downloader version before any network activity.
        config.chunk_downloader.downloader_kind()?;

        let capacity = if config.query_context_cache_enabled {
            config.query_context_cache_size
        } else {
            0
        };

        Ok(Arc::new_cyclic(|self_ref| Self {
            key: NEXT_SESSION_KEY.fetch_add(1, Ordering::Relaxed),
            self_ref: self_ref.clone(),
            base_url,
            http,
            authenticator,
            heartbeat,
            inner: Mutex::new(SessionInner::default()),
            renewal: tokio::sync::Mutex::new(()),
            parameters: Mutex::new(ParameterMap::new()),
            query_context: QueryContextCache::new(capacity),
            keep_alive: AtomicBool::new(config.client_session_keep_alive),
            heartbeat_registered: AtomicBool::new(false),
            prefetch_threads: AtomicUsize::new(config.chunk_downloader.prefetch_threads),
            array_bind_threshold: AtomicI64::new(DEFAULT_ARRAY_BIND_THRESHOLD),
            cancel: CancellationToken::new(),
            config,
        }))
    }

    /// Log in and populate the session.
    pub async fn open(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                SessionState::Unauthenticated => inner.state = SessionState::Authenticating,
                SessionState::Closed => {
                    return Err(Error::InvalidState(
                        "Session is closed and cannot be reopened".to_string(),
                    ))
                }
                state => {
                    return Err(Error::InvalidState(format!(
                        "Session cannot be opened in state {:?}",
                        state
                    )))
                }
            }
        }

        let context = LoginContext {
            http: self.http.as_ref(),
            base_url: &self.base_url,
            timeout: self.config.login_timeout,
            cancel: &self.cancel,
        };
        let rollback = StateRollback::new(
            &self.inner,
            SessionState::Authenticating,
            SessionState::Unauthenticated,
        );
        let outcome = self.authenticator.authenticate(&context).await;
        rollback.disarm();

        let data = {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::Closed {
                return Err(Error::InvalidState(
                    "Session was closed during login".to_string(),
                ));
            }
            let data = match outcome {
                Ok(data) if !data.token.is_empty() => data,
                Ok(_) => {
                    inner.state = SessionState::Unauthenticated;
                    return Err(Error::AuthenticationFailed {
                        code: None,
                        message: "Login response carried no session token".to_string(),
                    });
                }
                Err(e) => {
                    inner.state = SessionState::Unauthenticated;
                    return Err(e);
                }
            };

            let validity = non_zero_or(data.validity_in_seconds, DEFAULT_SESSION_VALIDITY_SECS);
            inner.session_token = data.token.clone();
            inner.master_token = data.master_token.clone();
            inner.session_id = data.session_id;
            inner.start_time = Some(chrono::Utc::now().timestamp());
            inner.token_expires_at = Some(Instant::now() + Duration::from_secs(validity));
            inner.master_validity_secs = data.master_validity_in_seconds;
            inner.state = SessionState::Established;
            data
        };

        debug!(
            "Session {} opened (session id {:?})",
            self.key, data.session_id
        );

        self.update_parameters(&data.parameters);
        self.sync_heartbeat_registration();
        Ok(())
    }

    /// Close the session. Never fails; closing twice is a no-op.
    pub async fn close(&self) {
        let token = {
            let mut inner = self.inner.lock();
            let token = std::mem::take(&mut inner.session_token);
            inner.master_token.clear();
            inner.token_expires_at = None;
            inner.state = SessionState::Closed;
            token
        };

        self.deregister_heartbeat();

        if token.is_empty() {
            trace!("Session {} already closed", self.key);
            return;
        }

        let request = RestRequest::new(with_request_id(format!("{}{}", self.base_url, CLOSE_PATH)))
            .header("Authorization", token_header(&token))
            .timeout(Some(self.config.request_timeout));

        match post_typed::<serde_json::Value>(self.http.as_ref(), request, &self.cancel).await {
            Ok(response) if response.success => debug!("Session {} closed", self.key),
            Ok(response) => warn!(
                "Session {} close request rejected (code {:?}): {}",
                self.key,
                response.code,
                response.message.unwrap_or_default()
            ),
            Err(e) => warn!("Session {} close request failed: {}", self.key, e),
        }
    }

    /// Renew the session token with the master token.
    pub async fn renew_session(&self) -> Result<()> {
        let observed = {
            let inner = self.inner.lock();
            inner.require_open()?;
            inner.session_token.clone()
        };
        self.renew_from(&observed).await
    }

    /// Send one keep-alive. Failures are logged, never returned.
    ///
    /// On a session-expired response the token is renewed once and the
    /// heartbeat retried once.
    pub async fn heartbeat(&self) {
        let token = {
            let inner = self.inner.lock();
            if inner.require_open().is_err() {
                trace!("Session {} not open, skipping heartbeat", self.key);
                return;
            }
            inner.session_token.clone()
        };

        match self.send_heartbeat(&token).await {
            Ok(HeartbeatOutcome::Alive) => {
                trace!("Session {} heartbeat ok", self.key);
                return;
            }
            Ok(HeartbeatOutcome::Expired) => {}
            Ok(HeartbeatOutcome::Rejected(message)) => {
                warn!("Session {} heartbeat rejected: {}", self.key, message);
                return;
            }
            Err(e) => {
                warn!("Session {} heartbeat failed: {}", self.key, e);
                return;
            }
        }

        debug!("Session {} token expired during heartbeat, renewing", self.key);
        if let Err(e) = self.renew_from(&token).await {
            warn!("Session {} renewal after heartbeat failed: {}", self.key, e);
            return;
        }

        let token = self.inner.lock().session_token.clone();
        match self.send_heartbeat(&token).await {
            Ok(HeartbeatOutcome::Alive) => trace!("Session {} heartbeat ok after renewal", self.key),
            Ok(HeartbeatOutcome::Expired) => {
                warn!("Session {} heartbeat still expired after renewal", self.key)
            }
            Ok(HeartbeatOutcome::Rejected(message)) => {
                warn!("Session {} heartbeat rejected: {}", self.key, message)
            }
            Err(e) => warn!("Session {} heartbeat failed: {}", self.key, e),
        }
    }

    /// Authorization header for the current session token, renewing first
    /// when the token has passed its validity window.
    pub async fn authorization_header(&self) -> Result<String> {
        let (token, expired) = {
            let inner = self.inner.lock();
            inner.require_open()?;
            let expired = inner
                .token_expires_at
                .map(|at| at <= Instant::now())
                .unwrap_or(false);
            (inner.session_token.clone(), expired)
        };

        if !expired {
            return Ok(token_header(&token));
        }

        debug!("Session {} token expired, renewing", self.key);
        self.renew_from(&token).await?;
        let inner = self.inner.lock();
        inner.require_open()?;
        Ok(token_header(&inner.session_token))
    }

    /// Renew because the server rejected `rejected_header`. Does nothing if
    /// the token has already been replaced since that header was issued.
    pub(crate) async fn renew_rejected(&self, rejected_header: &str) -> Result<()> {
        let observed = {
            let inner = self.inner.lock();
            inner.require_open()?;
            if token_header(&inner.session_token) != rejected_header {
                return Ok(());
            }
            inner.session_token.clone()
        };
        self.renew_from(&observed).await
    }

    /// Merge server-pushed parameters and apply their side effects.
    pub fn update_parameters(&self, parameters: &[NameValueParameter]) {
        let applied = self.parameters.lock().merge(parameters);
        let mut keep_alive_changed = false;

        for (parameter, value) in applied {
            match (parameter, &value) {
                (SessionParameter::QueryContextCacheSize, ParameterValue::Int(size)) if *size >= 0 => {
                    if self.config.query_context_cache_enabled {
                        self.query_context.set_capacity(*size as usize);
                    }
                }
                (SessionParameter::ClientSessionKeepAlive, ParameterValue::Bool(enabled)) => {
                    let previous = self.keep_alive.swap(*enabled, Ordering::SeqCst);
                    keep_alive_changed |= previous != *enabled;
                }
                (SessionParameter::ClientStageArrayBindingThreshold, ParameterValue::Int(n)) => {
                    self.array_bind_threshold.store(*n, Ordering::Relaxed);
                }
                (SessionParameter::ClientPrefetchThreads, ParameterValue::Int(n)) if *n > 0 => {
                    self.prefetch_threads.store(*n as usize, Ordering::Relaxed);
                }
                _ => {
                    warn!(
                        "Ignoring session parameter {} with unusable value {:?}",
                        parameter.name(),
                        value
                    );
                }
            }
        }

        if keep_alive_changed {
            self.sync_heartbeat_registration();
        }
    }

    pub fn is_established(&self) -> bool {
        self.inner.lock().has_token()
    }

    /// True iff the session started at least `timeout_secs` before `now_secs`.
    /// A session that never opened is not expired.
    pub fn is_expired(&self, timeout_secs: i64, now_secs: i64) -> bool {
        match self.inner.lock().start_time {
            Some(start) => start.saturating_add(timeout_secs) <= now_secs,
            None => false,
        }
    }

    /// Query context to attach to the next request.
    pub fn query_context_request(&self) -> Option<QueryContextRequest> {
        if !self.config.query_context_cache_enabled {
            return None;
        }
        self.query_context.request_payload()
    }

    /// Merge the query context of a query response.
    pub fn update_query_context_cache(&self, response: Option<&QueryContextResponse>) {
        if !self.config.query_context_cache_enabled {
            return;
        }
        if let Some(response) = response {
            self.query_context.update(response);
        }
    }

    /// Chunk downloader settings with server-pushed overrides applied.
    pub fn chunk_downloader_config(&self) -> ChunkDownloaderConfig {
        ChunkDownloaderConfig {
            prefetch_threads: self.prefetch_threads.load(Ordering::Relaxed),
            request_timeout: self.config.request_timeout,
            ..self.config.chunk_downloader.clone()
        }
    }

    pub fn open_blocking(&self, runtime: &Runtime) -> Result<()> {
        runtime.block_on(self.open())
    }

    pub fn close_blocking(&self, runtime: &Runtime) {
        runtime.block_on(self.close())
    }

    pub fn renew_session_blocking(&self, runtime: &Runtime) -> Result<()> {
        runtime.block_on(self.renew_session())
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn session_id(&self) -> Option<i64> {
        self.inner.lock().session_id
    }

    /// Unix seconds at which login completed.
    pub fn start_time(&self) -> Option<i64> {
        self.inner.lock().start_time
    }

    /// Master token validity as sent by the server (zero if it sent none).
    pub fn master_validity_secs(&self) -> u64 {
        self.inner.lock().master_validity_secs
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn parameters(&self) -> ParameterMap {
        self.parameters.lock().clone()
    }

    pub fn query_context_cache(&self) -> &QueryContextCache {
        &self.query_context
    }

    pub fn array_bind_threshold(&self) -> i64 {
        self.array_bind_threshold.load(Ordering::Relaxed)
    }

    pub fn is_heartbeat_registered(&self) -> bool {
        self.heartbeat_registered.load(Ordering::SeqCst)
    }

    pub(crate) fn http(&self) -> &Arc<dyn HttpRequester> {
        &self.http
    }

    // --- Internal methods ---

    async fn renew_from(&self, observed: &str) -> Result<()> {
        let _guard = self.renewal.lock().await;

        let master = {
            let mut inner = self.inner.lock();
            inner.require_open()?;
            if inner.session_token != observed {
                trace!("Session {} already renewed by another caller", self.key);
                return Ok(());
            }
            inner.state = SessionState::Renewing;
            inner.master_token.clone()
        };

        let rollback = StateRollback::new(
            &self.inner,
            SessionState::Renewing,
            SessionState::Established,
        );
        let outcome = self.request_renewal(observed, &master).await;
        rollback.disarm();

        let mut inner = self.inner.lock();
        if inner.state == SessionState::Closed {
            return Err(Error::InvalidState(
                "Session was closed during renewal".to_string(),
            ));
        }
        inner.state = SessionState::Established;

        let data = outcome?;
        let validity = non_zero_or(
            data.session_token_validity_in_seconds,
            DEFAULT_SESSION_VALIDITY_SECS,
        );
        inner.session_token = data.session_token;
        if !data.master_token.is_empty() {
            inner.master_token = data.master_token;
        }
        if data.master_token_validity_in_seconds > 0 {
            inner.master_validity_secs = data.master_token_validity_in_seconds;
        }
        inner.token_expires_at = Some(Instant::now() + Duration::from_secs(validity));

        debug!("Session {} token renewed", self.key);
        Ok(())
    }

    async fn request_renewal(
        &self,
        old_token: &str,
        master_token: &str,
    ) -> Result<RenewSessionResponseData> {
        let body = serde_json::to_value(RenewSessionRequest::renew(old_token))?;
        let request = RestRequest::new(with_request_id(format!(
            "{}{}",
            self.base_url, TOKEN_REQUEST_PATH
        )))
        .header("Authorization", token_header(master_token))
        .json(body)
        .timeout(self.config.login_timeout);

        let response =
            post_typed::<RenewSessionResponseData>(self.http.as_ref(), request, &self.cancel)
                .await
                .map_err(|e| match e {
                    Error::Cancelled => Error::Cancelled,
                    other => Error::SessionRenewalFailed {
                        code: None,
                        message: other.to_string(),
                    },
                })?;

        match response.data {
            Some(data) if response.success && !data.session_token.is_empty() => Ok(data),
            _ => Err(Error::SessionRenewalFailed {
                code: response.code,
                message: response
                    .message
                    .unwrap_or_else(|| "Renewal rejected by server".to_string()),
            }),
        }
    }

    async fn send_heartbeat(&self, token: &str) -> Result<HeartbeatOutcome> {
        let request = RestRequest::new(with_request_id(format!(
            "{}{}",
            self.base_url, HEARTBEAT_PATH
        )))
        .header("Authorization", token_header(token))
        .timeout(Some(self.config.request_timeout));

        let response =
            post_typed::<serde_json::Value>(self.http.as_ref(), request, &self.cancel).await?;
        Ok(if response.success {
            HeartbeatOutcome::Alive
        } else if response.is_session_expired() {
            HeartbeatOutcome::Expired
        } else {
            HeartbeatOutcome::Rejected(format!(
                "code {:?}: {}",
                response.code,
                response.message.unwrap_or_default()
            ))
        })
    }

    fn sync_heartbeat_registration(&self) {
        let Some(scheduler) = &self.heartbeat else {
            return;
        };
        let wanted = self.keep_alive.load(Ordering::SeqCst) && self.is_established();

        if wanted {
            if self
                .heartbeat_registered
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                if let Some(this) = self.self_ref.upgrade() {
                    scheduler.add_connection(this, self.master_validity_secs());
                }
            }
        } else {
            self.deregister_heartbeat();
        }
    }

    fn deregister_heartbeat(&self) {
        if let Some(scheduler) = &self.heartbeat {
            if self.heartbeat_registered.swap(false, Ordering::SeqCst) {
                scheduler.remove_connection(self.key);
            }
        }
    }
}

enum HeartbeatOutcome {
    Alive,
    Expired,
    Rejected(String),
}

fn non_zero_or(value: u64, default: u64) -> u64 {
    if value == 0 {
        default
    } else {
        value
    }
}

#[async_trait]
impl HeartbeatTarget for SessionController {
    fn heartbeat_key(&self) -> u64 {
        self.key
    }

    async fn heartbeat(&self) {
        SessionController::heartbeat(self).await
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.deregister_heartbeat();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::session::LoginResponseData;

    #[derive(Debug, Default)]
    struct NoHttp {
        posts: AtomicUsize,
    }

    #[async_trait]
    impl HttpRequester for NoHttp {
        async fn post(
            &self,
            _request: RestRequest,
            _cancel: &CancellationToken,
        ) -> Result<serde_json::Value> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({"success": true}))
        }

        async fn get(&self, _request: RestRequest, _cancel: &CancellationToken) -> Result<Vec<u8>> {
            Err(Error::network("no chunks here"))
        }
    }

    #[derive(Debug)]
    struct FixedLogin(LoginResponseData);

    #[async_trait]
    impl Authenticator for FixedLogin {
        async fn authenticate(&self, _context: &LoginContext<'_>) -> Result<LoginResponseData> {
            Ok(self.0.clone())
        }
    }

    fn config() -> ClientConfig {
        ClientConfig {
            host: Some("acct.example.com".to_string()),
            ..Default::default()
        }
    }

    fn controller(parameters: Vec<NameValueParameter>) -> Arc<SessionController> {
        let login = LoginResponseData {
            token: "session".to_string(),
            master_token: "master".to_string(),
            session_id: Some(42),
            parameters,
            ..Default::default()
        };
        SessionController::new(
            config(),
            Arc::new(NoHttp::default()),
            Arc::new(FixedLogin(login)),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_new_requires_host() {
        let result = SessionController::new(
            ClientConfig::default(),
            Arc::new(NoHttp::default()),
            Arc::new(FixedLogin(LoginResponseData::default())),
            None,
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_new_rejects_bad_downloader_version() {
        let mut config = config();
        config.chunk_downloader.version = "4".to_string();
        let result = SessionController::new(
            config,
            Arc::new(NoHttp::default()),
            Arc::new(FixedLogin(LoginResponseData::default())),
            None,
        );
        assert!(matches!(
            result,
            Err(Error::UnsupportedChunkDownloaderVersion(_))
        ));
    }

    #[tokio::test]
    async fn test_open_applies_login_parameters() {
        let session = controller(vec![
            NameValueParameter::new("CLIENT_PREFETCH_THREADS", 9),
            NameValueParameter::new("QUERY_CONTEXT_CACHE_SIZE", 2),
            NameValueParameter::new("CLIENT_STAGE_ARRAY_BINDING_THRESHOLD", 100),
            NameValueParameter::new("TIMEZONE", "UTC"),
        ]);
        session.open().await.unwrap();

        assert_eq!(session.state(), SessionState::Established);
        assert_eq!(session.session_id(), Some(42));
        assert_eq!(session.chunk_downloader_config().prefetch_threads, 9);
        assert_eq!(session.query_context_cache().capacity(), 2);
        assert_eq!(session.array_bind_threshold(), 100);
        assert_eq!(session.parameters().len(), 3);
    }

    #[tokio::test]
    async fn test_open_twice_is_rejected() {
        let session = controller(vec![]);
        session.open().await.unwrap();
        assert!(matches!(session.open().await, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_closed_session_cannot_reopen() {
        let session = controller(vec![]);
        session.open().await.unwrap();
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.open().await, Err(Error::InvalidState(_))));
        assert!(matches!(
            session.authorization_header().await,
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_is_expired_before_open() {
        let session = controller(vec![]);
        assert!(!session.is_expired(0, i64::MAX));
    }

    #[tokio::test]
    async fn test_query_context_disabled() {
        let mut config = config();
        config.query_context_cache_enabled = false;
        let session = SessionController::new(
            config,
            Arc::new(NoHttp::default()),
            Arc::new(FixedLogin(LoginResponseData {
                token: "t".to_string(),
                ..Default::default()
            })),
            None,
        )
        .unwrap();

        let response = QueryContextResponse {
            entries: vec![crate::types::session::QueryContextResponseEntry {
                id: 0,
                timestamp: 1,
                priority: 0,
                context: None,
            }],
        };
        session.update_query_context_cache(Some(&response));
        assert!(session.query_context_request().is_none());
        assert!(session.query_context_cache().is_empty());
    }

    #[tokio::test]
    async fn test_authorization_header_format() {
        let session = controller(vec![]);
        assert!(session.authorization_header().await.is_err());
        session.open().await.unwrap();
        assert_eq!(
            session.authorization_header().await.unwrap(),
            "Snowflake Token=\"session\""
        );
    }
}
