use crate::error::TransferError;
use crate::models::FileHandle;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// One multipart POST to the upload endpoint.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: UploadBody,
}

#[derive(Clone)]
pub enum UploadBody {
    /// Whole file in the `file` field, streamed from its handle.
    File {
        file_name: String,
        mime_type: String,
        source: FileHandle,
        size: u64,
    },
    /// One chunk in `file`, plus `fileId`, `chunkIndex` and `totalChunks`.
    Chunk {
        file_id: String,
        chunk_index: u64,
        total_chunks: u64,
        data: Bytes,
    },
}

impl UploadBody {
    pub fn len(&self) -> u64 {
        match self {
            UploadBody::File { size, .. } => *size,
            UploadBody::Chunk { data, .. } => data.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadBody::File {
                file_name,
                mime_type,
                source,
                size,
            } => f
                .debug_struct("File")
                .field("file_name", file_name)
                .field("mime_type", mime_type)
                .field("source", source)
                .field("size", size)
                .finish(),
            UploadBody::Chunk {
                file_id,
                chunk_index,
                total_chunks,
                data,
            } => f
                .debug_struct("Chunk")
                .field("file_id", file_id)
                .field("chunk_index", chunk_index)
                .field("total_chunks", total_chunks)
                .field("len", &data.len())
                .finish(),
        }
    }
}

/// Sends upload requests and returns the parsed JSON response body.
///
/// Anything other than a 2xx response with a JSON body is an error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &UploadRequest) -> Result<Value, TransferError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransferError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn build_form(body: &UploadBody) -> Result<Form, TransferError> {
        let form = match body {
            UploadBody::File {
                file_name,
                mime_type,
                source,
                size,
            } => {
                let content = match source {
                    FileHandle::Path(path) => {
                        let file = tokio::fs::File::open(path).await?;
                        Body::wrap_stream(ReaderStream::new(file))
                    }
                    FileHandle::Memory(data) => Body::from(data.clone()),
                };
                let mut part =
                    Part::stream_with_length(content, *size).file_name(file_name.clone());
                if !mime_type.is_empty() {
                    part = part.mime_str(mime_type)?;
                }
                Form::new().part("file", part)
            }
            UploadBody::Chunk {
                file_id,
                chunk_index,
                total_chunks,
                data,
            } => {
                let part = Part::stream_with_length(Body::from(data.clone()), data.len() as u64)
                    .file_name("blob");
                Form::new()
                    .part("file", part)
                    .text("fileId", file_id.clone())
                    .text("chunkIndex", chunk_index.to_string())
                    .text("totalChunks", total_chunks.to_string())
            }
        };
        Ok(form)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &UploadRequest) -> Result<Value, TransferError> {
        let form = Self::build_form(&request.body).await?;

        let mut builder = self.client.post(&request.url).multipart(form);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        debug!(url = %request.url, bytes = request.body.len(), "sending upload request");
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        Ok(response.json::<Value>().await?)
    }
}
