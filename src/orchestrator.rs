use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::chunker::{chunk_count, read_chunk};
use crate::config::UploadConfig;
use crate::entry::{self, DropItem};
use crate::error::{ConfigError, TransferError};
use crate::models::{FileCandidate, Notice, TrackedFile, UploadStatus, UploadSummary};
use crate::observer::UploadObserver;
use crate::transport::{Transport, UploadBody, UploadRequest};
use crate::validation::{ValidationRules, validate_file};
use crate::worker::{UploadChunk, WorkerEvent, WorkerHandle, WorkerOptions};

/// Outcome of one intake call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeReport {
    pub added: Vec<String>,
    pub rejected: usize,
    pub duplicates: usize,
    pub limit_exceeded: bool,
}

pub struct UploadOrchestrator {
    config: Arc<UploadConfig>,
    transport: Arc<dyn Transport>,
    observer: Box<dyn UploadObserver>,
    files: Vec<TrackedFile>,
    worker: Option<WorkerHandle>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    in_flight: HashMap<String, AbortHandle>,
}

impl UploadOrchestrator {
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: UploadConfig,
        transport: Arc<dyn Transport>,
        observer: Box<dyn UploadObserver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let worker = config.enable_chunked_upload.then(|| {
            WorkerHandle::spawn(
                Arc::clone(&transport),
                WorkerOptions::from(&config),
                events_tx.clone(),
            )
        });

        Ok(Self {
            config: Arc::new(config),
            transport,
            observer,
            files: Vec::new(),
            worker,
            events_tx,
            events_rx,
            in_flight: HashMap::new(),
        })
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn files(&self) -> &[TrackedFile] {
        &self.files
    }

    pub fn file(&self, id: &str) -> Option<&TrackedFile> {
        self.files.iter().find(|f| f.id == id)
    }

    pub fn has_active_uploads(&self) -> bool {
        self.files
            .iter()
            .any(|f| f.status == UploadStatus::Uploading)
    }

    pub fn summary(&self) -> UploadSummary {
        UploadSummary {
            total_files: self.files.len(),
            total_size: self.files.iter().map(|f| f.size).sum(),
            success_count: self
                .files
                .iter()
                .filter(|f| f.status == UploadStatus::Success)
                .count(),
            error_count: self
                .files
                .iter()
                .filter(|f| f.status == UploadStatus::Error)
                .count(),
        }
    }

    pub fn add_files(&mut self, candidates: Vec<FileCandidate>) -> IntakeReport {
        let config = Arc::clone(&self.config);
        let rules = ValidationRules::from(config.as_ref());

        let mut accepted = Vec::new();
        let mut rejected = 0;
        for candidate in candidates {
            let validation = validate_file(&candidate, rules);
            if validation.valid {
                accepted.push(TrackedFile::new(candidate, None));
            } else {
                rejected += 1;
                self.observer.on_notice(&Notice::Rejected {
                    name: candidate.name,
                    errors: validation.errors,
                });
            }
        }

        let mut report = self.append(accepted);
        report.rejected = rejected;
        report
    }

    pub async fn add_dropped(&mut self, items: Vec<DropItem>) -> IntakeReport {
        let config = Arc::clone(&self.config);
        let resolved =
            tokio::spawn(async move { entry::resolve(items, config.as_ref()).await }).await;

        match resolved {
            Ok(files) => self.append(files),
            Err(err) => {
                error!(error = %err, "processing dropped items failed");
                self.observer.on_notice(&Notice::ProcessingFailed);
                IntakeReport::default()
            }
        }
    }

    // The whole batch is refused when it does not fit.
    fn append(&mut self, files: Vec<TrackedFile>) -> IntakeReport {
        let mut report = IntakeReport::default();
        let mut fresh: Vec<TrackedFile> = Vec::new();

        for file in files {
            let duplicate = self
                .files
                .iter()
                .chain(fresh.iter())
                .any(|tracked| tracked.is_same_file(&file));
            if duplicate {
                report.duplicates += 1;
            } else {
                fresh.push(file);
            }
        }

        if fresh.is_empty() {
            debug!(duplicates = report.duplicates, "nothing new to add");
            return report;
        }

        if self.files.len() + fresh.len() > self.config.max_files {
            warn!(
                tracked = self.files.len(),
                incoming = fresh.len(),
                max_files = self.config.max_files,
                "too many files"
            );
            report.limit_exceeded = true;
            self.observer.on_notice(&Notice::TooManyFiles {
                max_files: self.config.max_files,
            });
            return report;
        }

        info!(added = fresh.len(), duplicates = report.duplicates, "files added");
        report.added = fresh.iter().map(|f| f.id.clone()).collect();
        self.files.extend(fresh);
        self.notify_list();
        report
    }

    pub async fn start_upload(&mut self, id: &str) -> bool {
        let Some(file) = self.files.iter_mut().find(|f| f.id == id) else {
            return false;
        };
        if file.status != UploadStatus::Pending {
            return false;
        }

        file.status = UploadStatus::Uploading;
        file.progress = 0;
        let file = file.clone();
        self.observer.on_progress(&file.id, 0);
        self.notify_list();

        let chunked = self.config.enable_chunked_upload
            && file.size > self.config.chunk_size
            && self.worker.as_ref().is_some_and(WorkerHandle::is_running);

        if chunked {
            self.upload_chunked(file).await;
        } else {
            self.upload_whole(file);
        }
        true
    }

    pub async fn start_all(&mut self) {
        let pending: Vec<String> = self
            .files
            .iter()
            .filter(|f| f.status == UploadStatus::Pending)
            .map(|f| f.id.clone())
            .collect();

        for id in pending {
            self.start_upload(&id).await;
        }
    }

    async fn upload_chunked(&mut self, file: TrackedFile) {
        let chunk_size = self.config.chunk_size;
        let total_chunks = chunk_count(file.size, chunk_size);

        if let Some(tracked) = self.files.iter_mut().find(|f| f.id == file.id) {
            tracked.total_chunks = Some(total_chunks);
            tracked.chunk_index = Some(0);
        }
        self.notify_list();
        debug!(file_id = %file.id, total_chunks, "starting chunked upload");

        for chunk_index in 0..total_chunks {
            let chunk = match read_chunk(&file.handle, chunk_index, chunk_size, file.size).await {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.abandon_chunks(&file.id, chunk_index.checked_sub(1));
                    self.fail(&file.id, TransferError::from(err).to_string());
                    return;
                }
            };

            let Some(worker) = self.worker.as_ref() else {
                self.fail(&file.id, TransferError::WorkerStopped.to_string());
                return;
            };
            let message = UploadChunk {
                file_id: file.id.clone(),
                chunk_index,
                total_chunks,
                chunk,
                upload_url: self.config.upload_url.clone(),
                headers: self.config.headers.clone(),
            };
            if let Err(err) = worker.upload_chunk(message).await {
                self.fail(&file.id, err.to_string());
                return;
            }
        }
    }

    fn upload_whole(&mut self, file: TrackedFile) {
        let transport = Arc::clone(&self.transport);
        let events = self.events_tx.clone();
        let url = self.config.upload_url.clone();
        let headers = self.config.headers.clone();
        let file_id = file.id.clone();

        let task = tokio::spawn(async move {
            let file_id = file.id.clone();
            let result = AssertUnwindSafe(send_whole(transport.as_ref(), url, headers, file))
                .catch_unwind()
                .await
                .unwrap_or(Err(TransferError::Panicked));
            let event = match result {
                Ok(response) => WorkerEvent::Success {
                    file_id,
                    chunk_index: 0,
                    progress: 100,
                    response,
                },
                Err(err) => WorkerEvent::Error {
                    file_id,
                    chunk_index: 0,
                    progress: 0,
                    error: err.to_string(),
                },
            };
            events.send(event).ok();
        });

        self.in_flight.insert(file_id, task.abort_handle());
    }

    /// Events for unknown files or files that are no longer uploading are ignored.
    pub fn apply_event(&mut self, event: WorkerEvent) {
        let file_id = event.file_id().to_string();
        let is_final = !matches!(event, WorkerEvent::Progress { .. });
        if is_final {
            self.in_flight.remove(&file_id);
        }

        let Some(file) = self.files.iter_mut().find(|f| f.id == file_id) else {
            debug!(%file_id, "event for untracked file");
            if is_final {
                self.forget_chunks(&file_id);
            }
            return;
        };
        if file.status != UploadStatus::Uploading {
            debug!(%file_id, status = %file.status, "event for settled file");
            if is_final {
                self.forget_chunks(&file_id);
            }
            return;
        }

        match event {
            WorkerEvent::Progress {
                chunk_index,
                progress,
                ..
            } => {
                // 100 is reserved for Success.
                let progress = progress.min(99).max(file.progress);
                if let Some(total) = file.total_chunks {
                    let index = chunk_index.min(total.saturating_sub(1));
                    file.chunk_index = Some(file.chunk_index.map_or(index, |i| i.max(index)));
                }
                if progress == file.progress {
                    return;
                }
                file.progress = progress;
                self.observer.on_progress(&file_id, progress);
            }
            WorkerEvent::Success { response, .. } => {
                file.status = UploadStatus::Success;
                file.progress = 100;
                file.remote_url = remote_url(&response);
                if let Some(total) = file.total_chunks {
                    file.chunk_index = Some(total.saturating_sub(1));
                }
                info!(%file_id, name = %file.name, "upload finished");
                self.observer.on_progress(&file_id, 100);
                self.observer.on_success(&file_id, &response);
            }
            WorkerEvent::Error { error, .. } => {
                let error = if error.is_empty() {
                    "Upload failed".to_string()
                } else {
                    error
                };
                warn!(%file_id, name = %file.name, %error, "upload failed");
                file.status = UploadStatus::Error;
                file.progress = 0;
                file.error = Some(error.clone());
                self.observer.on_error(&file_id, &error);
            }
        }

        self.notify_list();
    }

    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        let event = self.events_rx.recv().await?;
        self.apply_event(event.clone());
        Some(event)
    }

    /// Applies events until no file is uploading.
    pub async fn run_until_idle(&mut self) {
        while self.has_active_uploads() {
            if self.next_event().await.is_none() {
                break;
            }
        }
    }

    pub fn cancel_file(&mut self, id: &str) -> bool {
        let Some(file) = self.files.iter_mut().find(|f| f.id == id) else {
            return false;
        };
        if file.status.is_terminal() {
            return false;
        }

        let was_uploading = file.status == UploadStatus::Uploading;
        let total_chunks = file.total_chunks;
        file.status = UploadStatus::Cancelled;
        if was_uploading {
            self.abort_transfer(id, total_chunks);
        }
        self.notify_list();
        true
    }

    pub fn remove_file(&mut self, id: &str) -> bool {
        let Some(index) = self.files.iter().position(|f| f.id == id) else {
            return false;
        };

        let removed = self.files.remove(index);
        if removed.status == UploadStatus::Uploading {
            self.abort_transfer(id, removed.total_chunks);
        }
        self.notify_list();
        true
    }

    pub fn clear_all(&mut self) {
        let uploading: Vec<(String, Option<u64>)> = self
            .files
            .iter()
            .filter(|f| f.status == UploadStatus::Uploading)
            .map(|f| (f.id.clone(), f.total_chunks))
            .collect();
        for (id, total_chunks) in &uploading {
            self.abort_transfer(id, *total_chunks);
        }

        self.files.clear();
        self.notify_list();
    }

    /// Stops the worker and every in-flight transfer. Tracked files keep their state.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.terminate();
        }
        for (_, task) in self.in_flight.drain() {
            task.abort();
        }
    }

    // Chunks are queued in order inside `start_upload`, so once it returns
    // every index up to `total_chunks - 1` has been handed to the worker.
    fn abort_transfer(&mut self, id: &str, total_chunks: Option<u64>) {
        if let Some(task) = self.in_flight.remove(id) {
            task.abort();
        }
        if let Some(total) = total_chunks {
            self.abandon_chunks(id, total.checked_sub(1));
        }
    }

    fn abandon_chunks(&self, id: &str, last_chunk: Option<u64>) {
        if let Some(worker) = &self.worker {
            worker.cancel(id, last_chunk);
        }
    }

    fn forget_chunks(&self, id: &str) {
        if let Some(worker) = &self.worker {
            worker.forget(id);
        }
    }

    fn fail(&mut self, id: &str, error: String) {
        self.apply_event(WorkerEvent::Error {
            file_id: id.to_string(),
            chunk_index: 0,
            progress: 0,
            error,
        });
    }

    fn notify_list(&self) {
        self.observer.on_file_list_change(&self.files);
    }
}

impl Drop for UploadOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn send_whole(
    transport: &dyn Transport,
    url: String,
    headers: HashMap<String, String>,
    file: TrackedFile,
) -> Result<Value, TransferError> {
    let request = UploadRequest {
        url,
        headers,
        body: UploadBody::File {
            file_name: file.name,
            mime_type: file.mime_type,
            source: file.handle,
            size: file.size,
        },
    };
    transport.send(&request).await
}

fn remote_url(response: &Value) -> Option<String> {
    response
        .get("url")
        .and_then(Value::as_str)
        .map(str::to_string)
}
