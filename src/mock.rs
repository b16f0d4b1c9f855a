use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};

use crate::error::TransferError;
use crate::transport::{Transport, UploadBody, UploadRequest};

/// Internal state for MockTransport, behind a single lock.
#[derive(Default)]
struct MockState {
    /// Every request received, in arrival order
    requests: Vec<UploadRequest>,
    /// Whole-file uploads that should fail, by file name
    fail_files: HashMap<String, u16>,
    /// Remaining forced failures per chunk index
    fail_chunks: HashMap<u64, u32>,
    /// Artificial latency per chunk index
    chunk_delays: HashMap<u64, Duration>,
    /// Replaces the generated response body when set
    response: Option<Value>,
}

/// In-memory Transport for tests.
///
/// Records every request, answers with `{"url": ...}` bodies, and can be told
/// to fail or delay particular uploads to exercise error and reordering paths.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make whole-file uploads of `file_name` answer with `status`
    pub fn fail_file(&self, file_name: impl Into<String>, status: u16) {
        let mut state = self.state.lock().unwrap();
        state.fail_files.insert(file_name.into(), status);
    }

    /// Make the next `times` uploads of chunk `index` fail with a 500
    pub fn fail_chunk(&self, index: u64, times: u32) {
        let mut state = self.state.lock().unwrap();
        state.fail_chunks.insert(index, times);
    }

    /// Hold chunk `index` for `delay` before answering
    pub fn delay_chunk(&self, index: u64, delay: Duration) {
        let mut state = self.state.lock().unwrap();
        state.chunk_delays.insert(index, delay);
    }

    /// Answer every successful request with `body`
    pub fn respond_with(&self, body: Value) {
        let mut state = self.state.lock().unwrap();
        state.response = Some(body);
    }

    pub fn requests(&self) -> Vec<UploadRequest> {
        let state = self.state.lock().unwrap();
        state.requests.clone()
    }

    pub fn request_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.requests.len()
    }

    /// Chunk indices received for `file_id`, in arrival order (retries included)
    pub fn chunk_indices(&self, file_id: &str) -> Vec<u64> {
        let state = self.state.lock().unwrap();
        state
            .requests
            .iter()
            .filter_map(|r| match &r.body {
                UploadBody::Chunk {
                    file_id: id,
                    chunk_index,
                    ..
                } if id == file_id => Some(*chunk_index),
                _ => None,
            })
            .collect()
    }

    /// Bytes of all chunks received for `file_id`, concatenated in index order
    pub fn assembled(&self, file_id: &str) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let mut chunks: Vec<(u64, &Bytes)> = state
            .requests
            .iter()
            .filter_map(|r| match &r.body {
                UploadBody::Chunk {
                    file_id: id,
                    chunk_index,
                    data,
                    ..
                } if id == file_id => Some((*chunk_index, data)),
                _ => None,
            })
            .collect();
        chunks.sort_by_key(|(index, _)| *index);
        chunks.dedup_by_key(|(index, _)| *index);
        chunks
            .into_iter()
            .flat_map(|(_, data)| data.iter().copied())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &UploadRequest) -> Result<Value, TransferError> {
        let delay = match &request.body {
            UploadBody::Chunk { chunk_index, .. } => {
                let state = self.state.lock().unwrap();
                state.chunk_delays.get(chunk_index).copied()
            }
            UploadBody::File { .. } => None,
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        let result = match &request.body {
            UploadBody::File { file_name, .. } => match state.fail_files.get(file_name) {
                Some(&status) => Err(TransferError::Status {
                    status,
                    reason: "Mock Failure".to_string(),
                }),
                None => Ok(json!({
                    "url": format!("https://files.example/{}", file_name),
                    "filename": file_name,
                })),
            },
            UploadBody::Chunk {
                file_id,
                chunk_index,
                ..
            } => match state.fail_chunks.get_mut(chunk_index) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    Err(TransferError::Status {
                        status: 500,
                        reason: "Internal Server Error".to_string(),
                    })
                }
                _ => Ok(json!({
                    "url": format!("https://files.example/{}", file_id),
                    "chunkIndex": chunk_index,
                })),
            },
        };

        match (result, &state.response) {
            (Ok(_), Some(body)) => Ok(body.clone()),
            (result, _) => result,
        }
    }
}
