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

//! Background keep-alive scheduler.
//!
//! One [`HeartbeatScheduler`] is shared by every session that asked for
//! keep-alive. It wakes on a fixed tick and heartbeats each registered
//! session whose last heartbeat is at least a quarter of its validity window
//! old.
//!
//! ## Lifecycle
//!
//! - The background loop starts on the first [`HeartbeatScheduler::add_connection`]
//! - It stops when the last registration is removed, on
//!   [`HeartbeatScheduler::shutdown`], or when the scheduler is dropped
//! - Registrations hold the session weakly; a dropped session is pruned on the
//!   next sweep
//!
//! Registrations may be added and removed while a sweep is running. A session
//! removed mid-sweep is skipped if its heartbeat has not started yet,
//! otherwise its in-flight heartbeat finishes normally.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Validity assumed for a session that did not declare one (4 hours).
pub const DEFAULT_VALIDITY_SECS: u64 = 14400;

/// Default sweep period.
pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

/// Something the scheduler can keep alive.
///
/// `heartbeat` must not fail: implementations log and absorb their own errors.
#[async_trait]
pub trait HeartbeatTarget: Send + Sync {
    /// Stable key identifying this target in the scheduler.
    fn heartbeat_key(&self) -> u64;

    async fn heartbeat(&self);
}

struct Registration {
    target: Weak<dyn HeartbeatTarget>,
    validity_secs: u64,
    interval: Duration,
    last_beat: Instant,
}

struct LoopHandle {
    cancel: CancellationToken,
}

struct SchedulerShared {
    tick: Duration,
    registrations: DashMap<u64, Registration>,
    background: Mutex<Option<LoopHandle>>,
}

impl SchedulerShared {
    async fn sweep(&self) -> usize {
        let now = Instant::now();

        // Snapshot first so no map guard is held across an await.
        let due: Vec<(u64, Weak<dyn HeartbeatTarget>)> = self
            .registrations
            .iter()
            .filter(|r| now.saturating_duration_since(r.last_beat) >= r.interval)
            .map(|r| (*r.key(), r.target.clone()))
            .collect();

        let mut in_flight = JoinSet::new();
        let mut pruned = false;

        for (key, weak) in due {
            let Some(target) = weak.upgrade() else {
                trace!("Pruning dropped heartbeat registration {}", key);
                self.registrations.remove(&key);
                pruned = true;
                continue;
            };

            // Removed since the snapshot was taken.
            match self.registrations.get_mut(&key) {
                Some(mut registration) => registration.last_beat = now,
                None => continue,
            }

            in_flight.spawn(async move {
                target.heartbeat().await;
            });
        }

        let mut beats = 0;
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(()) => beats += 1,
                Err(e) => warn!("Heartbeat task failed: {}", e),
            }
        }

        if pruned {
            self.stop_if_idle();
        }

        trace!("Heartbeat sweep sent {} heartbeats", beats);
        beats
    }

    fn stop_if_idle(&self) {
        let mut background = self.background.lock();
        if self.registrations.is_empty() {
            if let Some(handle) = background.take() {
                debug!("No sessions registered, stopping heartbeat loop");
                handle.cancel.cancel();
            }
        }
    }
}

async fn run_loop(shared: Weak<SchedulerShared>, tick: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.sweep().await;
    }

    debug!("Heartbeat loop exited");
}

/// Periodic keep-alive for registered sessions.
pub struct HeartbeatScheduler {
    shared: Arc<SchedulerShared>,
    runtime: Handle,
}

impl std::fmt::Debug for HeartbeatScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatScheduler")
            .field("tick", &self.shared.tick)
            .field("registered", &self.shared.registrations.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl HeartbeatScheduler {
    /// Create a scheduler that sweeps every `tick` on `runtime`. Nothing runs
    /// until the first registration.
    pub fn new(tick: Duration, runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(SchedulerShared {
                tick,
                registrations: DashMap::new(),
                background: Mutex::new(None),
            }),
            runtime,
        })
    }

    pub fn with_default_tick(runtime: Handle) -> Arc<Self> {
        Self::new(DEFAULT_TICK, runtime)
    }

    /// Register `target` for heartbeats within a `validity_secs` token window.
    /// Zero means [`DEFAULT_VALIDITY_SECS`]. Re-registering replaces the
    /// previous entry.
    pub fn add_connection(&self, target: Arc<dyn HeartbeatTarget>, validity_secs: u64) {
        let validity_secs = if validity_secs == 0 {
            DEFAULT_VALIDITY_SECS
        } else {
            validity_secs
        };
        let key = target.heartbeat_key();
        let interval = Duration::from_secs(validity_secs) / 4;

        self.shared.registrations.insert(
            key,
            Registration {
                target: Arc::downgrade(&target),
                validity_secs,
                interval,
                last_beat: Instant::now(),
            },
        );
        debug!(
            "Registered session {} for heartbeats every {:?}",
            key, interval
        );

        let mut background = self.shared.background.lock();
        if background.is_none() {
            let cancel = CancellationToken::new();
            self.runtime.spawn(run_loop(
                Arc::downgrade(&self.shared),
                self.shared.tick,
                cancel.clone(),
            ));
            *background = Some(LoopHandle { cancel });
            debug!("Heartbeat loop started (tick {:?})", self.shared.tick);
        }
    }

    /// Deregister the target with `key`. Unknown keys are ignored.
    pub fn remove_connection(&self, key: u64) {
        if self.shared.registrations.remove(&key).is_some() {
            debug!("Deregistered session {} from heartbeats", key);
        }
        self.shared.stop_if_idle();
    }

    /// Run one sweep now and return the number of heartbeats sent.
    pub async fn sweep(&self) -> usize {
        self.shared.sweep().await
    }

    /// Drop every registration and stop the loop.
    pub fn shutdown(&self) {
        self.shared.registrations.clear();
        self.shared.stop_if_idle();
    }

    pub fn is_running(&self) -> bool {
        self.shared.background.lock().is_some()
    }

    pub fn registered_count(&self) -> usize {
        self.shared.registrations.len()
    }

    /// Effective validity window of a registration, after defaulting.
    pub fn registered_validity(&self, key: u64) -> Option<u64> {
        self.shared
            .registrations
            .get(&key)
            .map(|r| r.validity_secs)
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.shared.background.lock().take() {
            handle.cancel.cancel();
        }
    }
}
