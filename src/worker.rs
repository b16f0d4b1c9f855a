use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, Id, JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::error::TransferError;
use crate::transport::{Transport, UploadBody, UploadRequest};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Orchestrator → worker: upload one chunk of a file.
#[derive(Debug, Clone)]
pub struct UploadChunk {
    pub file_id: String,
    pub chunk_index: u64,
    pub total_chunks: u64,
    pub chunk: Vec<u8>,
    pub upload_url: String,
    pub headers: HashMap<String, String>,
}

/// Worker → orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Progress {
        file_id: String,
        chunk_index: u64,
        progress: u8,
    },
    Success {
        file_id: String,
        chunk_index: u64,
        progress: u8,
        response: Value,
    },
    Error {
        file_id: String,
        chunk_index: u64,
        progress: u8,
        error: String,
    },
}

impl WorkerEvent {
    pub fn file_id(&self) -> &str {
        match self {
            WorkerEvent::Progress { file_id, .. }
            | WorkerEvent::Success { file_id, .. }
            | WorkerEvent::Error { file_id, .. } => file_id,
        }
    }
}

#[derive(Debug)]
enum WorkerControl {
    Cancel {
        file_id: String,
        last_chunk: Option<u64>,
    },
    Forget {
        file_id: String,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    /// Chunk requests in flight at once.
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl From<&UploadConfig> for WorkerOptions {
    fn from(config: &UploadConfig) -> Self {
        Self {
            concurrency: config.worker_concurrency.max(1),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        }
    }
}

/// Dropping the handle aborts the worker and its in-flight requests.
pub struct WorkerHandle {
    commands: mpsc::Sender<UploadChunk>,
    control: mpsc::UnboundedSender<WorkerControl>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn spawn(
        transport: Arc<dyn Transport>,
        options: WorkerOptions,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(options.concurrency * 2);
        let (control, control_rx) = mpsc::unbounded_channel();

        let worker = Worker::new(transport, options, events);
        let task = tokio::spawn(worker.run(command_rx, control_rx));

        Self {
            commands,
            control,
            task,
        }
    }

    pub async fn upload_chunk(&self, chunk: UploadChunk) -> Result<(), TransferError> {
        self.commands
            .send(chunk)
            .await
            .map_err(|_| TransferError::WorkerStopped)
    }

    /// Abandons every queued and in-flight chunk of `file_id`. No further events are sent for it.
    ///
    /// `last_chunk` is the highest index queued for the file, `None` if none was.
    pub fn cancel(&self, file_id: &str, last_chunk: Option<u64>) {
        self.control
            .send(WorkerControl::Cancel {
                file_id: file_id.to_string(),
                last_chunk,
            })
            .ok();
    }

    /// Drops what a `cancel` left behind for a file whose final event was already sent.
    pub fn forget(&self, file_id: &str) {
        self.control
            .send(WorkerControl::Forget {
                file_id: file_id.to_string(),
            })
            .ok();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn terminate(&self) {
        self.task.abort();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct FileState {
    total_chunks: u64,
    // Success needs every index here, whatever order the responses arrive in.
    confirmed: BTreeSet<u64>,
    final_response: Option<Value>,
    halted: bool,
    // Highest index still expected from the orchestrator, and highest seen so far.
    last_chunk: Option<u64>,
    received: Option<u64>,
    tasks: Vec<AbortHandle>,
}

impl FileState {
    fn new(total_chunks: u64) -> Self {
        Self {
            total_chunks,
            confirmed: BTreeSet::new(),
            final_response: None,
            halted: false,
            last_chunk: total_chunks.checked_sub(1),
            received: None,
            tasks: Vec::new(),
        }
    }

    /// No more chunks of this file can arrive.
    fn drained(&self) -> bool {
        match self.last_chunk {
            Some(last) => self.received.is_some_and(|seen| seen >= last),
            None => true,
        }
    }

    fn halt(&mut self) {
        self.halted = true;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

struct Worker {
    transport: Arc<dyn Transport>,
    options: WorkerOptions,
    events: mpsc::UnboundedSender<WorkerEvent>,
    files: HashMap<String, FileState>,
    tasks: JoinSet<Result<Value, TransferError>>,
    task_chunks: HashMap<Id, (String, u64)>,
}

impl Worker {
    fn new(
        transport: Arc<dyn Transport>,
        options: WorkerOptions,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            transport,
            options,
            events,
            files: HashMap::new(),
            tasks: JoinSet::new(),
            task_chunks: HashMap::new(),
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<UploadChunk>,
        mut control: mpsc::UnboundedReceiver<WorkerControl>,
    ) {
        let mut accepting = true;

        loop {
            let has_capacity = self.tasks.len() < self.options.concurrency;

            // Cancellations first, then results, then new work.
            tokio::select! {
                biased;
                Some(control) = control.recv() => match control {
                    WorkerControl::Cancel { file_id, last_chunk } => {
                        self.cancel(file_id, last_chunk);
                    }
                    WorkerControl::Forget { file_id } => self.forget(&file_id),
                },
                Some(joined) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    self.on_joined(joined);
                }
                command = commands.recv(), if accepting && has_capacity => match command {
                    Some(chunk) => self.dispatch(chunk),
                    None => accepting = false,
                },
                else => break,
            }

            if !accepting && self.tasks.is_empty() {
                break;
            }
        }

        debug!("upload worker stopped");
    }

    fn dispatch(&mut self, chunk: UploadChunk) {
        let state = self
            .files
            .entry(chunk.file_id.clone())
            .or_insert_with(|| FileState::new(chunk.total_chunks));
        state.received = state.received.max(Some(chunk.chunk_index));

        if state.halted || state.confirmed.contains(&chunk.chunk_index) {
            debug!(
                file_id = %chunk.file_id,
                chunk_index = chunk.chunk_index,
                "skipping chunk"
            );
            if state.halted && state.drained() {
                self.files.remove(&chunk.file_id);
            }
            return;
        }

        let request = UploadRequest {
            url: chunk.upload_url,
            headers: chunk.headers,
            body: UploadBody::Chunk {
                file_id: chunk.file_id.clone(),
                chunk_index: chunk.chunk_index,
                total_chunks: chunk.total_chunks,
                data: Bytes::from(chunk.chunk),
            },
        };

        let transport = Arc::clone(&self.transport);
        let options = self.options;
        let handle = self
            .tasks
            .spawn(async move { send_with_retry(transport.as_ref(), &request, options).await });

        self.task_chunks
            .insert(handle.id(), (chunk.file_id, chunk.chunk_index));
        state.tasks.push(handle);
    }

    fn on_joined(&mut self, joined: Result<(Id, Result<Value, TransferError>), JoinError>) {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(err) if err.is_cancelled() => {
                self.task_chunks.remove(&err.id());
                return;
            }
            Err(err) => (err.id(), Err(TransferError::Panicked)),
        };

        if let Some((file_id, chunk_index)) = self.task_chunks.remove(&id) {
            self.on_chunk_done(file_id, chunk_index, result);
        }
    }

    fn on_chunk_done(
        &mut self,
        file_id: String,
        chunk_index: u64,
        result: Result<Value, TransferError>,
    ) {
        let Some(state) = self.files.get_mut(&file_id) else {
            return;
        };
        if state.halted {
            return;
        }

        match result {
            Ok(response) => {
                state.confirmed.insert(chunk_index);
                if chunk_index + 1 == state.total_chunks {
                    state.final_response = Some(response.clone());
                }

                let confirmed = state.confirmed.len() as u64;
                if confirmed >= state.total_chunks {
                    let response = state.final_response.take().unwrap_or(response);
                    self.files.remove(&file_id);
                    info!(%file_id, "all chunks uploaded");
                    self.emit(WorkerEvent::Success {
                        file_id,
                        chunk_index,
                        progress: 100,
                        response,
                    });
                } else {
                    let progress = percent(confirmed, state.total_chunks);
                    self.emit(WorkerEvent::Progress {
                        file_id,
                        chunk_index,
                        progress,
                    });
                }
            }
            Err(err) => {
                state.halt();
                if state.drained() {
                    self.files.remove(&file_id);
                }
                warn!(%file_id, chunk_index, error = %err, "chunk upload failed");
                self.emit(WorkerEvent::Error {
                    file_id,
                    chunk_index,
                    progress: 0,
                    error: err.to_string(),
                });
            }
        }
    }

    fn cancel(&mut self, file_id: String, last_chunk: Option<u64>) {
        debug!(%file_id, "cancelling chunked upload");
        let state = self
            .files
            .entry(file_id.clone())
            .or_insert_with(|| FileState::new(0));
        state.last_chunk = last_chunk;
        state.halt();
        if state.drained() {
            self.files.remove(&file_id);
        }
    }

    // A halted file that never saw a chunk can only be a cancel that crossed its final event.
    fn forget(&mut self, file_id: &str) {
        if self
            .files
            .get(file_id)
            .is_some_and(|state| state.halted && state.received.is_none())
        {
            self.files.remove(file_id);
        }
    }

    fn emit(&self, event: WorkerEvent) {
        self.events.send(event).ok();
    }
}

async fn send_with_retry(
    transport: &dyn Transport,
    request: &UploadRequest,
    options: WorkerOptions,
) -> Result<Value, TransferError> {
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match transport.send(request).await {
            Ok(response) => return Ok(response),
            Err(err) if attempt <= options.max_retries && err.is_retryable() => {
                let delay = backoff(options.retry_delay, attempt);
                warn!(
                    attempt,
                    max_retries = options.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying chunk upload"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

// base, 2*base, 4*base, ... capped at MAX_BACKOFF
fn backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// `round(100 * done / total)`, rounding halves up.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 200 + total) / (total * 2)).min(100) as u8
}
