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

//! Bounded prefetch pool.
//!
//! ```text
//! [Scheduler] --> download_channel (unbounded) --> [P Download Workers]
//!      |                                                  |
//!      +--> result_channel (bounded, P) --> [Consumer] <--+ oneshot
//! ```
//!
//! ## Backpressure
//!
//! The bounded `result_channel` holds at most `prefetch_threads` handles. When
//! it is full the scheduler waits until the consumer takes one, so at most
//! `prefetch_threads` chunks are downloading or buffered ahead of the consumer.
//!
//! ## Ordering
//!
//! The scheduler sends each `ChunkHandle` to `result_channel` BEFORE sending
//! its `ChunkDownloadTask` to `download_channel`, so handles arrive in chunk
//! order however downloads complete.
//!
//! ## Retry
//!
//! Any failure other than cancellation or a row-count mismatch is retried up
//! to `max_retries` times with a fixed `retry_delay` between attempts.

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
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

#[derive(Debug, Clone)]
struct WorkerConfig {
    max_retries: u32,
    retry_delay: Duration,
}

#[derive(Debug)]
pub struct PrefetchPoolDownloader {
    result_rx: mpsc::Receiver<ChunkHandle>,
    cancel: CancellationToken,
}

impl PrefetchPoolDownloader {
    /// Spawn the scheduler and `config.prefetch_threads` workers on `runtime`.
    pub fn spawn(
        descriptors: Vec<ChunkDescriptor>,
        downloader: Arc<ChunkDownloader>,
        status: Arc<ChunkStatusTable>,
        config: &ChunkDownloaderConfig,
        cancel: CancellationToken,
        runtime: &Handle,
    ) -> Self {
        let width = config.prefetch_threads.max(1);
        let (download_tx, download_rx) = mpsc::unbounded_channel::<ChunkDownloadTask>();
        let (result_tx, result_rx) = mpsc::channel::<ChunkHandle>(width);

        debug!(
            "Prefetch pool: {} chunks, {} workers, max_retries={}, retry_delay={:?}",
            descriptors.len(),
            width,
            config.max_retries,
            config.retry_delay
        );

        runtime.spawn(scheduler_task(
            descriptors,
            download_tx,
            result_tx,
            cancel.clone(),
        ));

        let download_rx = Arc::new(Mutex::new(download_rx));
        let worker_config = WorkerConfig {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        };
        for worker_id in 0..width {
            runtime.spawn(worker_task(
                worker_id,
                Arc::clone(&download_rx),
                Arc::clone(&downloader),
                Arc::clone(&status),
                worker_config.clone(),
                cancel.clone(),
            ));
        }

        Self { result_rx, cancel }
    }
}

#[async_trait]
impl ChunkDownloadStrategy for PrefetchPoolDownloader {
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

impl Drop for PrefetchPoolDownloader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn scheduler_task(
    descriptors: Vec<ChunkDescriptor>,
    download_tx: mpsc::UnboundedSender<ChunkDownloadTask>,
    result_tx: mpsc::Sender<ChunkHandle>,
    cancel: CancellationToken,
) {
    for descriptor in descriptors {
        let chunk_index = descriptor.index;
        let (task, handle) = create_chunk_pair(descriptor, &cancel);

        // Handle first: this is what keeps results in order.
        let sent = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Scheduler cancelled while sending handle for chunk {}", chunk_index);
                return;
            }
            sent = result_tx.send(handle) => sent,
        };
        if sent.is_err() {
            debug!("Scheduler: result channel closed at chunk {}", chunk_index);
            return;
        }

        if download_tx.send(task).is_err() {
            debug!("Scheduler: download channel closed at chunk {}", chunk_index);
            return;
        }
        trace!("Scheduler: enqueued chunk {}", chunk_index);
    }
    debug!("Scheduler: all chunks enqueued");
}

async fn worker_task(
    worker_id: usize,
    download_rx: Arc<Mutex<mpsc::UnboundedReceiver<ChunkDownloadTask>>>,
    downloader: Arc<ChunkDownloader>,
    status: Arc<ChunkStatusTable>,
    config: WorkerConfig,
    cancel: CancellationToken,
) {
    loop {
        let task = {
            let mut rx = download_rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => {
                    trace!("Worker {} cancelled while waiting for task", worker_id);
                    return;
                }
                task = rx.recv() => task,
            }
        };
        let Some(task) = task else {
            trace!("Worker {} exiting: download channel closed", worker_id);
            return;
        };

        let index = task.chunk_index();
        status.set(index, ChunkStatus::InFlight);
        let result = process_task(
            worker_id,
            &task.descriptor,
            &downloader,
            &config,
            &task.cancel,
        )
        .await;
        status.set(
            index,
            if result.is_ok() {
                ChunkStatus::Ready
            } else {
                ChunkStatus::Failed
            },
        );

        let result = result
            .map(|batches| DownloadedChunk::new(index, batches))
            .map_err(|e| chunk_failure(index, e));
        if task.result_tx.send(result).is_err() {
            trace!("Worker {}: receiver dropped for chunk {}", worker_id, index);
        }
    }
}

async fn process_task(
    worker_id: usize,
    descriptor: &ChunkDescriptor,
    downloader: &ChunkDownloader,
    config: &WorkerConfig,
    cancel: &CancellationToken,
) -> Result<Vec<RecordBatch>> {
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let error = match downloader.download(descriptor, cancel).await {
            Ok(batches) => return Ok(batches),
            Err(e @ (Error::Cancelled | Error::ChunkIntegrity { .. })) => return Err(e),
            Err(e) => e,
        };

        attempt += 1;
        if attempt > config.max_retries {
            error!(
                "Worker {}: chunk {} failed after {} retries: {}",
                worker_id, descriptor.index, config.max_retries, error
            );
            return Err(error);
        }
        warn!(
            "Worker {}: chunk {} failed (retry {}/{}): {}",
            worker_id, descriptor.index, attempt, config.max_retries, error
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(config.retry_delay) => {}
        }
    }
}
