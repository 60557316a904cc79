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

//! Result chunk types.
//!
//! A query response lists its remotely stored result chunks. These are
//! converted into [`ChunkDescriptor`]s and handed to the
//! [`ChunkRetrievalEngine`](crate::reader::ChunkRetrievalEngine), which owns
//! their [`ChunkStatus`] for the duration of the fetch.

use parking_lot::Mutex;
use serde::Deserialize;

/// A chunk as listed in the query response (`data.chunks[]`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResultChunk {
    pub url: String,
    pub row_count: i64,
    #[serde(default)]
    pub uncompressed_size: i64,
}

/// Immutable description of a remote chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Position of this chunk in the result set (used for ordering).
    pub index: usize,
    /// Location to download the chunk from.
    pub url: String,
    /// Declared uncompressed size in bytes.
    pub uncompressed_size: i64,
    /// Declared number of rows. Decoded data must match exactly.
    pub row_count: i64,
}

impl ChunkDescriptor {
    pub fn new(index: usize, url: impl Into<String>, row_count: i64, uncompressed_size: i64) -> Self {
        Self {
            index,
            url: url.into(),
            uncompressed_size,
            row_count,
        }
    }

    /// Build ordered descriptors from the chunks listed in a query response.
    pub fn from_response(chunks: &[QueryResultChunk]) -> Vec<Self> {
        chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| {
                Self::new(index, chunk.url.clone(), chunk.row_count, chunk.uncompressed_size)
            })
            .collect()
    }
}

/// State of a chunk in the retrieval pipeline.
///
/// ```text
///   Queued -> InFlight -> Ready -> Consumed
///                \-> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Queued,
    InFlight,
    Ready,
    Consumed,
    Failed,
}

/// Status of every chunk of one query, shared between the consumer and
/// the download tasks.
#[derive(Debug)]
pub struct ChunkStatusTable {
    statuses: Mutex<Vec<ChunkStatus>>,
}

impl ChunkStatusTable {
    pub fn new(chunk_count: usize) -> Self {
        Self {
            statuses: Mutex::new(vec![ChunkStatus::Queued; chunk_count]),
        }
    }

    pub fn get(&self, index: usize) -> Option<ChunkStatus> {
        self.statuses.lock().get(index).copied()
    }

    pub fn set(&self, index: usize, status: ChunkStatus) {
        if let Some(slot) = self.statuses.lock().get_mut(index) {
            *slot = status;
        }
    }

    pub fn len(&self) -> usize {
        self.statuses.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compression codec applied to chunk bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionCodec {
    #[default]
    None,
    Lz4Frame,
}

impl CompressionCodec {
    /// Parse the codec from the query response's `resultCompression` field.
    pub fn from_response(value: Option<&str>) -> Self {
        match value {
            Some("LZ4_FRAME") => Self::Lz4Frame,
            _ => Self::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_result_chunk_deserialization() {
        let json = r#"[
            {"url": "https://stage.example.com/chunk0", "rowCount": 100, "uncompressedSize": 4096},
            {"url": "https://stage.example.com/chunk1", "rowCount": 50}
        ]"#;
        let chunks: Vec<QueryResultChunk> = serde_json::from_str(json).unwrap();
        let descriptors = ChunkDescriptor::from_response(&chunks);

        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].index, 0);
        assert_eq!(descriptors[0].row_count, 100);
        assert_eq!(descriptors[1].index, 1);
        assert_eq!(descriptors[1].uncompressed_size, 0);
    }

    #[test]
    fn test_status_table_transitions() {
        let table = ChunkStatusTable::new(2);
        assert_eq!(table.get(0), Some(ChunkStatus::Queued));

        table.set(0, ChunkStatus::InFlight);
        table.set(0, ChunkStatus::Ready);
        assert_eq!(table.get(0), Some(ChunkStatus::Ready));
        assert_eq!(table.get(1), Some(ChunkStatus::Queued));

        // Out of range is ignored
        table.set(5, ChunkStatus::Failed);
        assert_eq!(table.get(5), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_compression_codec_from_response() {
        assert_eq!(
            CompressionCodec::from_response(Some("LZ4_FRAME")),
            CompressionCodec::Lz4Frame
        );
        assert_eq!(CompressionCodec::from_response(None), CompressionCodec::None);
        assert_eq!(
            CompressionCodec::from_response(Some("GZIP")),
            CompressionCodec::None
        );
    }
}
