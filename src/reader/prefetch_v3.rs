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

//! Bounded prefetch pool, revision 3.
//!
//! Same ordering discipline as [`super::prefetch`], with three differences:
//!
//! - **Backpressure by permits.** A semaphore of `prefetch_threads` permits
//!   bounds chunks that are downloading or decoded but not yet taken. A permit
//!   is acquired before a download starts and travels with the
//!   [`DownloadedChunk`] until the consumer takes it.
//! - **Per-chunk tasks and cancellation.** Every chunk runs in its own task
//!   under a child token. Dropping the chunk's handle cancels just that chunk.
//! - **Classified retries.**
//!
//! | Error | Sleep before retry | Limit |
//! |---|---|---|
//! | Network, timeout, 408/429/5xx, undecodable body | `retry_delay * attempt` | `max_retries` |
//! | 401 / 403 | none, renew the session first | `max_refresh_retries` |
//! | Anything else | not retried | |

use crate::config::ChunkDownloaderConfig;
use crate::error::{Error, Result};
use crate::reader::chunk_downloader::ChunkDownloader;
use crate::reader::pipeline_types::{create_chunk_pair, ChunkDownloadTask, ChunkHandle};
use crate::reader::{await_handle, chunk_failure, ChunkDownloadStrategy, DownloadedChunk};
use crate::types::chunk::{ChunkDescriptor, ChunkStatus, ChunkStatusTable};
use arrow_array::RecordBatch;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DownloadErrorKind {
    /// Worth another attempt after a pause.
    Transient,
    /// The session token was rejected; renew and retry immediately.
    Auth,
    Terminal,
}

fn classify_error(error: &Error) -> DownloadErrorKind {
    if error.is_auth_error() {
        DownloadErrorKind::Auth
    } else if error.is_retryable() || matches!(error, Error::Decode(_)) {
        DownloadErrorKind::Transient
    } else {
        DownloadErrorKind::Terminal
    }
}

#[derive(Debug, Clone)]
struct RetryPolicy {
    max_retries: u32,
    retry_delay: Duration,
    max_refresh_retries: u32,
}

impl RetryPolicy {
    /// Linear backoff, saturating at `Duration::MAX`.
    fn delay_for(&self, retry: u32) -> Duration {
        self.retry_delay.saturating_mul(retry)
    }
}

#[derive(Debug)]
pub struct PrefetchPoolV3Downloader {
    result_rx: mpsc::UnboundedReceiver<ChunkHandle>,
    cancel: CancellationToken,
}

impl PrefetchPoolV3Downloader {
    pub fn spawn(
        descriptors: Vec<ChunkDescriptor>,
        downloader: Arc<ChunkDownloader>,
        status: Arc<ChunkStatusTable>,
        config: &ChunkDownloaderConfig,
        cancel: CancellationToken,
        runtime: &Handle,
    ) -> Self {
        let width = config.prefetch_threads.max(1);
        let permits = Arc::new(Semaphore::new(width));
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let policy = RetryPolicy {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            max_refresh_retries: config.max_refresh_retries,
        };

        debug!(
            "Prefetch pool v3: {} chunks, {} permits, {:?}",
            descriptors.len(),
            width,
            policy
        );

        runtime.spawn(scheduler_task(
            descriptors,
            permits,
            downloader,
            status,
            policy,
            result_tx,
            cancel.clone(),
            runtime.clone(),
        ));

        Self { result_rx, cancel }
    }
}

#[async_trait]
impl ChunkDownloadStrategy for PrefetchPoolV3Downloader {
    async fn next_chunk(&mut self) -> Result<Option<DownloadedChunk>> {
        let handle = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            handle = self.result_rx.recv() => handle,
        };
        match handle {
            Some(handle) => await_handle(handle, &self.cancel).await.map(Some),
            None if self.cancel.is_cancelled() => Err(Error::Cancelled),
            None => Ok(None),
        }
    }
}

impl Drop for PrefetchPoolV3Downloader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn scheduler_task(
    descriptors: Vec<ChunkDescriptor>,
    permits: Arc<Semaphore>,
    downloader: Arc<ChunkDownloader>,
    status: Arc<ChunkStatusTable>,
    policy: RetryPolicy,
    result_tx: mpsc::UnboundedSender<ChunkHandle>,
    cancel: CancellationToken,
    runtime: Handle,
) {
    for descriptor in descriptors {
        let chunk_index = descriptor.index;

        let permit = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Scheduler v3 cancelled waiting for a permit for chunk {}", chunk_index);
                return;
            }
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let (task, handle) = create_chunk_pair(descriptor, &cancel);
        if result_tx.send(handle).is_err() {
            debug!("Scheduler v3: consumer gone at chunk {}", chunk_index);
            return;
        }

        runtime.spawn(chunk_task(
            task,
            permit,
            Arc::clone(&downloader),
            Arc::clone(&status),
            policy.clone(),
        ));
        trace!("Scheduler v3: started chunk {}", chunk_index);
    }
    debug!("Scheduler v3: all chunks started");
}

async fn chunk_task(
    task: ChunkDownloadTask,
    permit: OwnedSemaphorePermit,
    downloader: Arc<ChunkDownloader>,
    status: Arc<ChunkStatusTable>,
    policy: RetryPolicy,
) {
    let index = task.chunk_index();
    status.set(index, ChunkStatus::InFlight);

    let result = download_with_retry(&task.descriptor, &downloader, &policy, &task.cancel).await;
    let result = match result {
        Ok(batches) => {
            status.set(index, ChunkStatus::Ready);
            Ok(DownloadedChunk::with_permit(index, batches, permit))
        }
        Err(e) => {
            status.set(index, ChunkStatus::Failed);
            Err(chunk_failure(index, e))
        }
    };

    if task.result_tx.send(result).is_err() {
        trace!("Chunk {}: receiver dropped", index);
    }
}

async fn download_with_retry(
    descriptor: &ChunkDescriptor,
    downloader: &ChunkDownloader,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<RecordBatch>> {
    let mut retry_count: u32 = 0;
    let mut refresh_count: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let header = downloader.authorization(cancel).await?;
        let error = match downloader.fetch(descriptor, &header, cancel).await {
            Ok(batches) => return Ok(batches),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => e,
        };

        match classify_error(&error) {
            DownloadErrorKind::Auth => {
                refresh_count += 1;
                if refresh_count > policy.max_refresh_retries {
                    error!(
                        "Chunk {} exceeded max session refreshes ({})",
                        descriptor.index, policy.max_refresh_retries
                    );
                    return Err(error);
                }
                warn!(
                    "Chunk {} rejected ({}), renewing session (refresh {}/{})",
                    descriptor.index, error, refresh_count, policy.max_refresh_retries
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    renewed = downloader.session().renew_rejected(&header) => renewed?,
                }
            }
            DownloadErrorKind::Transient => {
                retry_count += 1;
                if retry_count > policy.max_retries {
                    error!(
                        "Chunk {} exceeded max retries ({})",
                        descriptor.index, policy.max_retries
                    );
                    return Err(error);
                }
                let sleep = policy.delay_for(retry_count);
                warn!(
                    "Chunk {} transient error (retry {}), sleeping {:?}: {}",
                    descriptor.index, retry_count, sleep, error
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(sleep) => {}
                }
            }
            DownloadErrorKind::Terminal => return Err(error),
        }
    }
}
