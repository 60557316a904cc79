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

//! Chunk body decoding.
//!
//! Chunk bodies are Arrow IPC streams, optionally LZ4-frame compressed.

use crate::error::{Error, Result};
use crate::types::chunk::CompressionCodec;
use arrow_array::RecordBatch;
use arrow_ipc::reader::StreamReader;
use lz4_flex::frame::FrameDecoder;
use std::io::{Cursor, Read};

/// Turns a downloaded chunk body into row batches.
///
/// Runs on a blocking thread, so implementations may be CPU heavy.
pub trait ChunkDecoder: Send + Sync + std::fmt::Debug {
    fn decode(&self, data: &[u8]) -> Result<Vec<RecordBatch>>;
}

/// Arrow IPC stream decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrowIpcDecoder {
    compression: CompressionCodec,
}

impl ArrowIpcDecoder {
    pub fn new(compression: CompressionCodec) -> Self {
        Self { compression }
    }
}

impl ChunkDecoder for ArrowIpcDecoder {
    fn decode(&self, data: &[u8]) -> Result<Vec<RecordBatch>> {
        parse_arrow_ipc(data, self.compression)
    }
}

/// Parse an Arrow IPC stream, decompressing first if needed. A single chunk
/// may contain several batches.
pub fn parse_arrow_ipc(data: &[u8], compression: CompressionCodec) -> Result<Vec<RecordBatch>> {
    let decompressed: Vec<u8>;
    let bytes: &[u8] = match compression {
        CompressionCodec::Lz4Frame => {
            let mut decoder = FrameDecoder::new(Cursor::new(data));
            let mut buf = Vec::new();
            decoder
                .read_to_end(&mut buf)
                .map_err(|e| Error::Decode(format!("LZ4 decompression failed: {}", e)))?;
            decompressed = buf;
            &decompressed
        }
        CompressionCodec::None => data,
    };

    let reader = StreamReader::try_new(Cursor::new(bytes), None)
        .map_err(|e| Error::Decode(format!("Failed to create Arrow IPC reader: {}", e)))?;

    reader
        .into_iter()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Decode(format!("Failed to read Arrow batches: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::Int64Array;
    use arrow_ipc::writer::StreamWriter;
    use arrow_schema::{DataType, Field, Schema};
    use std::sync::Arc;

    fn ipc_bytes(row_counts: &[usize]) -> Vec<u8> {
        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, false)]));
        let mut buffer = Vec::new();
        {
            let mut writer = StreamWriter::try_new(&mut buffer, &schema).unwrap();
            for &rows in row_counts {
                let batch = RecordBatch::try_new(
                    schema.clone(),
                    vec![Arc::new(Int64Array::from_iter_values(0..rows as i64))],
                )
                .unwrap();
                writer.write(&batch).unwrap();
            }
            writer.finish().unwrap();
        }
        buffer
    }

    #[test]
    fn test_decode_uncompressed() {
        let batches = ArrowIpcDecoder::default()
            .decode(&ipc_bytes(&[7, 3]))
            .unwrap();
        let rows: Vec<usize> = batches.iter().map(|b| b.num_rows()).collect();
        assert_eq!(rows, vec![7, 3]);
    }

    #[test]
    fn test_decode_lz4_frame() {
        use lz4_flex::frame::FrameEncoder;
        use std::io::Write;

        let mut compressed = Vec::new();
        {
            let mut encoder = FrameEncoder::new(&mut compressed);
            encoder.write_all(&ipc_bytes(&[100])).unwrap();
            encoder.finish().unwrap();
        }

        let batches = ArrowIpcDecoder::new(CompressionCodec::Lz4Frame)
            .decode(&compressed)
            .unwrap();
        assert_eq!(batches[0].num_rows(), 100);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let result = ArrowIpcDecoder::default().decode(b"definitely not arrow");
        assert!(matches!(result, Err(Error::Decode(_))));

        let result = ArrowIpcDecoder::new(CompressionCodec::Lz4Frame).decode(b"nor lz4");
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_truncated_stream_is_decode_error() {
        let bytes = ipc_bytes(&[50]);
        let result = ArrowIpcDecoder::default().decode(&bytes[..bytes.len() - 20]);
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_empty_stream() {
        let batches = ArrowIpcDecoder::default().decode(&ipc_bytes(&[])).unwrap();
        assert!(batches.is_empty());
    }
}
