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

//! Sequential strategy: chunk `i + 1` is requested only when the consumer
//! asks for it, after chunk `i` has been handed over. No overlap and no
//! retries beyond the transport's own.

use crate::error::{Error, Result};
use crate::reader::chunk_downloader::ChunkDownloader;
use crate::reader::{chunk_failure, ChunkDownloadStrategy, DownloadedChunk};
use crate::types::chunk::{ChunkDescriptor, ChunkStatus, ChunkStatusTable};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug)]
pub struct SequentialDownloader {
    pending: VecDeque<ChunkDescriptor>,
    downloader: Arc<ChunkDownloader>,
    status: Arc<ChunkStatusTable>,
    cancel: CancellationToken,
}

impl SequentialDownloader {
    pub fn new(
        descriptors: Vec<ChunkDescriptor>,
        downloader: Arc<ChunkDownloader>,
        status: Arc<ChunkStatusTable>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pending: descriptors.into(),
            downloader,
            status,
            cancel,
        }
    }
}

#[async_trait]
impl ChunkDownloadStrategy for SequentialDownloader {
    async fn next_chunk(&mut self) -> Result<Option<DownloadedChunk>> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let Some(descriptor) = self.pending.pop_front() else {
            return Ok(None);
        };

        trace!("Sequential: fetching chunk {}", descriptor.index);
        self.status.set(descriptor.index, ChunkStatus::InFlight);

        match self.downloader.download(&descriptor, &self.cancel).await {
            Ok(batches) => {
                self.status.set(descriptor.index, ChunkStatus::Ready);
                Ok(Some(DownloadedChunk::new(descriptor.index, batches)))
            }
            Err(e) => {
                self.status.set(descriptor.index, ChunkStatus::Failed);
                self.pending.clear();
                Err(chunk_failure(descriptor.index, e))
            }
        }
    }
}
