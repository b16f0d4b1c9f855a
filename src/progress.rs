use std::collections::HashMap;
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde_json::Value;

use crate::models::{Notice, TrackedFile};
use crate::observer::UploadObserver;
use crate::validation::format_file_size;

const BAR_TEMPLATE: &str = "{msg:40} {bar:40} {pos:>3}%";

/// Terminal view of the tracked set: one bar per file, kept in sync with the list.
pub struct ProgressObserver {
    mp: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl ProgressObserver {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    pub fn with_target(target: ProgressDrawTarget) -> Self {
        Self {
            mp: MultiProgress::with_draw_target(target),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bar(&self, file_id: &str) -> Option<ProgressBar> {
        let bars = self.bars.lock().ok()?;
        bars.get(file_id).cloned()
    }

    fn new_bar(&self, file: &TrackedFile) -> ProgressBar {
        let pb = self.mp.add(ProgressBar::new(100));
        if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
            pb.set_style(style.progress_chars("=>-"));
        }
        pb.set_message(format!(
            "{} ({})",
            file.display_name(),
            format_file_size(file.size)
        ));
        pb.set_position(file.progress as u64);
        pb
    }

    /// Number of bars currently shown.
    pub fn len(&self) -> usize {
        self.bars.lock().map(|bars| bars.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadObserver for ProgressObserver {
    fn on_progress(&self, file_id: &str, progress: u8) {
        if let Some(pb) = self.bar(file_id) {
            pb.set_position(progress as u64);
        }
    }

    fn on_success(&self, file_id: &str, response: &Value) {
        if let Some(pb) = self.bar(file_id) {
            let message = match response.get("url").and_then(Value::as_str) {
                Some(url) => format!("{} -> {}", pb.message(), url),
                None => pb.message(),
            };
            pb.finish_with_message(message);
        }
    }

    fn on_error(&self, file_id: &str, error: &str) {
        if let Some(pb) = self.bar(file_id) {
            pb.abandon_with_message(format!("{} [{}]", pb.message(), error));
        }
    }

    fn on_file_list_change(&self, files: &[TrackedFile]) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };

        bars.retain(|id, pb| {
            let tracked = files.iter().any(|f| &f.id == id);
            if !tracked {
                self.mp.remove(pb);
            }
            tracked
        });

        for file in files {
            if !bars.contains_key(&file.id) {
                let pb = self.new_bar(file);
                bars.insert(file.id.clone(), pb);
            }
        }
    }

    fn on_notice(&self, notice: &Notice) {
        self.mp.println(notice.to_string()).ok();
    }
}
