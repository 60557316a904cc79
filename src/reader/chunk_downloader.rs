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

//! Single-chunk download pipeline.
//!
//! authorization header -> GET -> decode (blocking thread) -> row count check
//!
//! Every step honors the cancellation token. Retries are the strategies'
//! business; this module makes exactly one attempt.

use crate::client::{HttpRequester, RestRequest};
use crate::error::{Error, Result};
use crate::reader::arrow_parser::ChunkDecoder;
use crate::session::SessionController;
use crate::types::chunk::ChunkDescriptor;
use arrow_array::RecordBatch;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Downloads and decodes chunks for one query.
#[derive(Debug)]
pub struct ChunkDownloader {
    session: Arc<SessionController>,
    http: Arc<dyn HttpRequester>,
    decoder: Arc<dyn ChunkDecoder>,
    chunk_headers: HashMap<String, String>,
    request_timeout: Duration,
    speed_threshold_mbps: f64,
}

impl ChunkDownloader {
    /// # Arguments
    /// * `session` - Source of authorization headers
    /// * `decoder` - Turns chunk bodies into batches
    /// * `chunk_headers` - Extra headers the query response asked for on every chunk GET
    /// * `request_timeout` - Timeout of a single GET
    /// * `speed_threshold_mbps` - Log a warning if a download is slower than this (MB/s)
    pub fn new(
        session: Arc<SessionController>,
        decoder: Arc<dyn ChunkDecoder>,
        chunk_headers: HashMap<String, String>,
        request_timeout: Duration,
        speed_threshold_mbps: f64,
    ) -> Self {
        let http = Arc::clone(session.http());
        Self {
            session,
            http,
            decoder,
            chunk_headers,
            request_timeout,
            speed_threshold_mbps,
        }
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    /// Authorization header for the next attempt. Renews an expired token.
    pub async fn authorization(&self, cancel: &CancellationToken) -> Result<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            header = self.session.authorization_header() => header,
        }
    }

    /// One full attempt: fetch a header, then [`Self::fetch`].
    pub async fn download(
        &self,
        descriptor: &ChunkDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Vec<RecordBatch>> {
        let header = self.authorization(cancel).await?;
        self.fetch(descriptor, &header, cancel).await
    }

    /// GET, decode and verify one chunk using `authorization`.
    pub async fn fetch(
        &self,
        descriptor: &ChunkDescriptor,
        authorization: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RecordBatch>> {
        let start = Instant::now();

        trace!(
            "Downloading chunk {} ({} rows, {} bytes uncompressed)",
            descriptor.index,
            descriptor.row_count,
            descriptor.uncompressed_size
        );

        let request = RestRequest::new(descriptor.url.clone())
            .headers(&self.chunk_headers)
            .header("Authorization", authorization)
            .timeout(Some(self.request_timeout));

        let body = self.http.get(request, cancel).await?;

        let elapsed = start.elapsed();
        let size_mb = body.len() as f64 / 1024.0 / 1024.0;
        let speed_mbps = size_mb / elapsed.as_secs_f64().max(f64::EPSILON);

        debug!(
            "Downloaded chunk {}: {:.2} MB in {:.2}s ({:.2} MB/s)",
            descriptor.index,
            size_mb,
            elapsed.as_secs_f64(),
            speed_mbps
        );

        if speed_mbps < self.speed_threshold_mbps {
            warn!(
                "Chunk download slower than threshold: {:.2} MB/s (threshold: {:.2} MB/s)",
                speed_mbps, self.speed_threshold_mbps
            );
        }

        let decoder = Arc::clone(&self.decoder);
        let decode = tokio::task::spawn_blocking(move || decoder.decode(&body));
        let batches = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            joined = decode => joined
                .map_err(|e| Error::Decode(format!("Decode task failed: {}", e)))??,
        };

        verify_row_count(descriptor, &batches)?;

        trace!(
            "Decoded chunk {}: {} batches",
            descriptor.index,
            batches.len()
        );
        Ok(batches)
    }
}

/// Decoded rows must match the declared row count exactly.
pub fn verify_row_count(descriptor: &ChunkDescriptor, batches: &[RecordBatch]) -> Result<()> {
    let actual: i64 = batches.iter().map(|b| b.num_rows() as i64).sum();
    if actual != descriptor.row_count {
        return Err(Error::ChunkIntegrity {
            chunk_index: descriptor.index,
            expected: descriptor.row_count,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::Int32Array;
    use arrow_schema::{DataType, Field, Schema};

    fn batch(rows: usize) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int32, false)]));
        RecordBatch::try_new(
            schema,
            vec![Arc::new(Int32Array::from_iter_values(0..rows as i32))],
        )
        .unwrap()
    }

    #[test]
    fn test_row_count_matches() {
        let descriptor = ChunkDescriptor::new(0, "u", 5, 0);
        assert!(verify_row_count(&descriptor, &[batch(2), batch(3)]).is_ok());
    }

    #[test]
    fn test_row_count_mismatch_is_integrity_error() {
        let descriptor = ChunkDescriptor::new(4, "u", 2, 0);
        match verify_row_count(&descriptor, &[batch(1)]) {
            Err(Error::ChunkIntegrity {
                chunk_index,
                expected,
                actual,
            }) => {
                assert_eq!(chunk_index, 4);
                assert_eq!(expected, 2);
                assert_eq!(actual, 1);
            }
            other => panic!("expected ChunkIntegrity, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_chunk_with_zero_rows() {
        let descriptor = ChunkDescriptor::new(0, "u", 0, 0);
        assert!(verify_row_count(&descriptor, &[]).is_ok());
    }
}
