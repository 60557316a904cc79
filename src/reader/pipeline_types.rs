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

//! Task/handle pairs for the prefetch pipelines.
//!
//! ```text
//! [Scheduler] --> download side --> ChunkDownloadTask --> (downloads chunk)
//!      |                                                        |
//!      +--> result channel --> ChunkHandle <-- oneshot ---------+
//!                                  |
//!                              [Consumer]
//! ```
//!
//! The scheduler sends handles in chunk order, so the consumer awaits results
//! in order no matter which download finishes first.
//!
//! Each pair shares a child cancellation token. Dropping the handle cancels
//! the token, which aborts a download nobody will read.

use crate::error::Result;
use crate::reader::DownloadedChunk;
use crate::types::chunk::ChunkDescriptor;
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Work item owned by whoever downloads the chunk.
#[derive(Debug)]
pub struct ChunkDownloadTask {
    pub descriptor: ChunkDescriptor,
    /// Cancelled when the consumer drops the matching handle or the query is
    /// cancelled.
    pub cancel: CancellationToken,
    pub result_tx: oneshot::Sender<Result<DownloadedChunk>>,
}

impl ChunkDownloadTask {
    pub fn chunk_index(&self) -> usize {
        self.descriptor.index
    }
}

/// The consumer's side of a pair.
#[derive(Debug)]
pub struct ChunkHandle {
    pub chunk_index: usize,
    pub result_rx: oneshot::Receiver<Result<DownloadedChunk>>,
    _cancel_on_drop: DropGuard,
}

/// Create a connected (task, handle) pair whose token is a child of `parent`.
pub fn create_chunk_pair(
    descriptor: ChunkDescriptor,
    parent: &CancellationToken,
) -> (ChunkDownloadTask, ChunkHandle) {
    let (result_tx, result_rx) = oneshot::channel();
    let cancel = parent.child_token();

    let handle = ChunkHandle {
        chunk_index: descriptor.index,
        result_rx,
        _cancel_on_drop: cancel.clone().drop_guard(),
    };
    let task = ChunkDownloadTask {
        descriptor,
        cancel,
        result_tx,
    };

    (task, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn descriptor(index: usize) -> ChunkDescriptor {
        ChunkDescriptor::new(index, format!("https://stage.example.com/chunk{}", index), 10, 100)
    }

    #[tokio::test]
    async fn test_pair_delivers_result() {
        let parent = CancellationToken::new();
        let (task, handle) = create_chunk_pair(descriptor(3), &parent);
        assert_eq!(task.chunk_index(), 3);
        assert_eq!(handle.chunk_index, 3);

        task.result_tx
            .send(Ok(DownloadedChunk::new(3, vec![])))
            .unwrap();
        let chunk = handle.result_rx.await.unwrap().unwrap();
        assert_eq!(chunk.index, 3);
    }

    #[tokio::test]
    async fn test_pair_delivers_error() {
        let parent = CancellationToken::new();
        let (task, handle) = create_chunk_pair(descriptor(0), &parent);
        task.result_tx.send(Err(Error::network("reset"))).unwrap();
        assert!(handle.result_rx.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels_task() {
        let parent = CancellationToken::new();
        let (task, handle) = create_chunk_pair(descriptor(0), &parent);
        assert!(!task.cancel.is_cancelled());

        drop(handle);
        assert!(task.cancel.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_task() {
        let parent = CancellationToken::new();
        let (task, _handle) = create_chunk_pair(descriptor(0), &parent);
        parent.cancel();
        assert!(task.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_task_closes_handle() {
        let parent = CancellationToken::new();
        let (task, handle) = create_chunk_pair(descriptor(0), &parent);
        drop(task);
        assert!(handle.result_rx.await.is_err());
    }
}
