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

//! Chunk downloader strategy selection.

use crate::error::{Error, Result};

/// The concurrency strategy used to fetch the chunks of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkDownloaderKind {
    /// One chunk at a time, fetched only when the consumer asks for it.
    Sequential,
    /// Up to `prefetch_threads` chunks in flight ahead of the consumer.
    PrefetchPool,
    /// Prefetch pool with permit-based backpressure, error classification
    /// and per-chunk cancellation.
    PrefetchPoolV3,
}

/// Map the downloader flags to a strategy.
///
/// `use_v2` always selects [`ChunkDownloaderKind::PrefetchPool`]. Otherwise
/// versions 1, 2 and 3 select the three strategies in order and every other
/// value is [`Error::UnsupportedChunkDownloaderVersion`].
pub fn select_downloader_kind(use_v2: bool, version: i64) -> Result<ChunkDownloaderKind> {
    if use_v2 {
        return Ok(ChunkDownloaderKind::PrefetchPool);
    }
    match version {
        1 => Ok(ChunkDownloaderKind::Sequential),
        2 => Ok(ChunkDownloaderKind::PrefetchPool),
        3 => Ok(ChunkDownloaderKind::PrefetchPoolV3),
        other => Err(Error::UnsupportedChunkDownloaderVersion(other.to_string())),
    }
}
