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

//! Chunk retrieval.
//!
//! This module provides:
//! - `ChunkRetrievalEngine`: ordered, pull-based row batch sequence over the
//!   chunks of one query
//! - `ChunkDownloadStrategy`: the "next ready chunk, in order" capability the
//!   engine pulls from
//! - Three strategies: `sequential`, `prefetch` and `prefetch_v3`, picked by
//!   `strategy::select_downloader_kind`

pub mod arrow_parser;
pub mod chunk_downloader;
pub mod pipeline_types;
pub mod prefetch;
pub mod prefetch_v3;
pub mod sequential;
pub mod strategy;

use crate::config::ChunkDownloaderConfig;
use crate::error::{Error, Result};
use crate::reader::arrow_parser::ChunkDecoder;
use crate::reader::chunk_downloader::ChunkDownloader;
use crate::reader::pipeline_types::ChunkHandle;
use crate::reader::prefetch::PrefetchPoolDownloader;
use crate::reader::prefetch_v3::PrefetchPoolV3Downloader;
use crate::reader::sequential::SequentialDownloader;
use crate::reader::strategy::ChunkDownloaderKind;
use crate::session::SessionController;
use crate::types::chunk::{ChunkDescriptor, ChunkStatus, ChunkStatusTable};
use arrow_array::RecordBatch;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A decoded chunk on its way to the consumer.
#[derive(Debug)]
pub struct DownloadedChunk {
    pub index: usize,
    pub batches: Vec<RecordBatch>,
    /// Backpressure permit, released when the chunk is dropped.
    _permit: Option<OwnedSemaphorePermit>,
}

impl DownloadedChunk {
    pub fn new(index: usize, batches: Vec<RecordBatch>) -> Self {
        Self {
            index,
            batches,
            _permit: None,
        }
    }

    pub(crate) fn with_permit(
        index: usize,
        batches: Vec<RecordBatch>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            index,
            batches,
            _permit: Some(permit),
        }
    }
}

/// Produces the chunks of a query in descriptor order.
///
/// `Ok(None)` means every chunk has been produced. After an error the
/// strategy must not be polled again.
#[async_trait]
pub trait ChunkDownloadStrategy: Send + std::fmt::Debug {
    async fn next_chunk(&mut self) -> Result<Option<DownloadedChunk>>;
}

/// Wrap a per-chunk failure for the consumer. Cancellation, integrity and
/// session errors keep their own variant.
pub(crate) fn chunk_failure(chunk_index: usize, error: Error) -> Error {
    match error {
        Error::Transport { .. } | Error::Decode(_) | Error::Serialization(_) => {
            Error::ChunkDownloadFailed {
                chunk_index,
                message: error.to_string(),
            }
        }
        other => other,
    }
}

/// Await the result behind a handle, honoring `cancel`.
pub(crate) async fn await_handle(
    handle: ChunkHandle,
    cancel: &CancellationToken,
) -> Result<DownloadedChunk> {
    let chunk_index = handle.chunk_index;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        received = handle.result_rx => match received {
            Ok(result) => result,
            Err(_) if cancel.is_cancelled() => Err(Error::Cancelled),
            Err(_) => Err(Error::ChunkDownloadFailed {
                chunk_index,
                message: "Download task ended without a result".to_string(),
            }),
        },
    }
}

/// Forward-only sequence of row batches over the chunks of one query.
///
/// Batches come out in chunk order whatever order downloads finish in. The
/// sequence cannot be restarted.
///
/// ## Cancellation
///
/// Cancelling the token passed to [`ChunkRetrievalEngine::new`] stops new
/// downloads, aborts in-flight ones and makes every later pull return
/// [`Error::Cancelled`], even if batches were already buffered. Dropping the
/// engine has the same effect on the downloads.
///
/// ## Errors
///
/// A failed chunk surfaces at the point it would have been yielded, after
/// every earlier chunk. The sequence then ends.
pub struct ChunkRetrievalEngine {
    kind: ChunkDownloaderKind,
    strategy: Box<dyn ChunkDownloadStrategy>,
    status: Arc<ChunkStatusTable>,
    buffer: VecDeque<RecordBatch>,
    current_chunk: Option<usize>,
    exhausted: bool,
    cancel: CancellationToken,
    internal: CancellationToken,
}

impl std::fmt::Debug for ChunkRetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkRetrievalEngine")
            .field("kind", &self.kind)
            .field("chunks", &self.status.len())
            .field("current_chunk", &self.current_chunk)
            .field("buffered_batches", &self.buffer.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl ChunkRetrievalEngine {
    /// Start retrieving `descriptors`.
    ///
    /// The strategy is resolved from `config` before anything is spawned, so
    /// an unsupported version fails here with no network activity. Must be
    /// called from within a tokio runtime.
    pub fn new(
        descriptors: Vec<ChunkDescriptor>,
        chunk_headers: HashMap<String, String>,
        session: Arc<SessionController>,
        config: &ChunkDownloaderConfig,
        decoder: Arc<dyn ChunkDecoder>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let kind = config.downloader_kind()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::InvalidState(format!("No tokio runtime available: {}", e)))?;

        let status = Arc::new(ChunkStatusTable::new(descriptors.len()));
        let internal = cancel.child_token();
        let downloader = Arc::new(ChunkDownloader::new(
            session,
            decoder,
            chunk_headers,
            config.request_timeout,
            config.speed_threshold_mbps,
        ));

        debug!(
            "Retrieving {} chunks with {:?} (prefetch_threads={})",
            descriptors.len(),
            kind,
            config.prefetch_threads
        );

        let strategy: Box<dyn ChunkDownloadStrategy> = match kind {
            ChunkDownloaderKind::Sequential => Box::new(SequentialDownloader::new(
                descriptors,
                downloader,
                Arc::clone(&status),
                internal.clone(),
            )),
            ChunkDownloaderKind::PrefetchPool => Box::new(PrefetchPoolDownloader::spawn(
                descriptors,
                downloader,
                Arc::clone(&status),
                config,
                internal.clone(),
                &runtime,
            )),
            ChunkDownloaderKind::PrefetchPoolV3 => Box::new(PrefetchPoolV3Downloader::spawn(
                descriptors,
                downloader,
                Arc::clone(&status),
                config,
                internal.clone(),
                &runtime,
            )),
        };

        Ok(Self {
            kind,
            strategy,
            status,
            buffer: VecDeque::new(),
            current_chunk: None,
            exhausted: false,
            cancel,
            internal,
        })
    }

    /// Whether another batch is available. May wait for the next chunk.
    pub async fn has_next(&mut self) -> Result<bool> {
        self.fill().await?;
        Ok(!self.buffer.is_empty())
    }

    /// Next batch, or `None` at the end of the sequence.
    pub async fn get_next(&mut self) -> Result<Option<RecordBatch>> {
        self.fill().await?;
        let batch = self.buffer.pop_front();
        if batch.is_some() && self.buffer.is_empty() {
            self.mark_current_consumed();
        }
        Ok(batch)
    }

    pub fn kind(&self) -> ChunkDownloaderKind {
        self.kind
    }

    pub fn chunk_count(&self) -> usize {
        self.status.len()
    }

    pub fn chunk_status(&self, index: usize) -> Option<ChunkStatus> {
        self.status.get(index)
    }

    /// Ensure the buffer holds a batch unless the sequence has ended.
    async fn fill(&mut self) -> Result<()> {
        loop {
            // Checked before the buffer: nothing is yielded once cancelled.
            if self.cancel.is_cancelled() {
                self.finish();
                return Err(Error::Cancelled);
            }
            if !self.buffer.is_empty() || self.exhausted {
                return Ok(());
            }

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(Error::Cancelled),
                next = self.strategy.next_chunk() => next,
            };

            match next {
                Ok(Some(chunk)) => {
                    self.status.set(chunk.index, ChunkStatus::Ready);
                    self.current_chunk = Some(chunk.index);
                    let DownloadedChunk { batches, .. } = chunk;
                    self.buffer.extend(batches.into_iter().filter(|b| b.num_rows() > 0));
                    if self.buffer.is_empty() {
                        self.mark_current_consumed();
                    }
                }
                Ok(None) => {
                    debug!("All {} chunks retrieved", self.status.len());
                    self.exhausted = true;
                    return Ok(());
                }
                Err(e) => {
                    self.finish();
                    return Err(e);
                }
            }
        }
    }

    fn mark_current_consumed(&mut self) {
        if let Some(index) = self.current_chunk.take() {
            self.status.set(index, ChunkStatus::Consumed);
        }
    }

    fn finish(&mut self) {
        self.exhausted = true;
        self.buffer.clear();
        self.internal.cancel();
    }
}

impl Drop for ChunkRetrievalEngine {
    fn drop(&mut self) {
        self.internal.cancel();
    }
}
