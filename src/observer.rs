use serde_json::Value;

use crate::models::{Notice, TrackedFile};

/// Receives every change the orchestrator makes. All methods default to no-ops.
pub trait UploadObserver: Send {
    fn on_progress(&self, _file_id: &str, _progress: u8) {}

    fn on_success(&self, _file_id: &str, _response: &Value) {}

    fn on_error(&self, _file_id: &str, _error: &str) {}

    /// Called after every mutation of the tracked set with the full current list.
    fn on_file_list_change(&self, _files: &[TrackedFile]) {}

    fn on_notice(&self, _notice: &Notice) {}
}

pub struct NoopObserver;

impl UploadObserver for NoopObserver {}
