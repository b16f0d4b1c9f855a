use crate::models::{TrackedFile, UploadStatus, UploadSummary};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_REPORT_FILE: &str = ".upload_state.json";

/// Final state of one file, as written to the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
    pub size: u64,
    pub status: UploadStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TrackedFile> for FileReport {
    fn from(file: &TrackedFile) -> Self {
        Self {
            name: file.name.clone(),
            folder_path: file.folder_path.clone(),
            size: file.size,
            status: file.status,
            progress: file.progress,
            remote_url: file.remote_url.clone(),
            error: file.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub summary: UploadSummary,
    pub files: Vec<FileReport>,
}

impl SessionReport {
    pub fn new(files: &[TrackedFile], summary: UploadSummary) -> Self {
        Self {
            summary,
            files: files.iter().map(FileReport::from).collect(),
        }
    }
}

pub struct StateManager {
    state_file: PathBuf,
}

impl StateManager {
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
        }
    }

    /// Report in `dir` under the default file name.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(DEFAULT_REPORT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.state_file
    }

    pub fn load_report(&self) -> Result<Option<SessionReport>> {
        if !self.state_file.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.state_file)
            .context("Failed to read state file")?;

        serde_json::from_str(&content)
            .map(Some)
            .context("Failed to parse state file")
    }

    pub fn save_report(&self, report: &SessionReport) -> Result<()> {
        let content = serde_json::to_string_pretty(report)
            .context("Failed to serialize state")?;

        fs::write(&self.state_file, content).context("Failed to write state file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileCandidate;

    #[test]
    fn report_survives_a_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StateManager::in_dir(dir.path());
        assert!(manager.load_report().unwrap().is_none());

        let mut done =
            TrackedFile::new(FileCandidate::from_bytes("a.png", "image/png", 0, vec![0; 4]), None);
        done.status = UploadStatus::Success;
        done.progress = 100;
        done.remote_url = Some("https://x/a.png".into());
        let mut failed = TrackedFile::new(
            FileCandidate::from_bytes("b.png", "image/png", 0, vec![0; 6]),
            Some("sub".into()),
        );
        failed.status = UploadStatus::Error;
        failed.error = Some("Upload failed: 500 Internal Server Error".into());

        let summary = UploadSummary {
            total_files: 2,
            total_size: 10,
            success_count: 1,
            error_count: 1,
        };
        let report = SessionReport::new(&[done, failed], summary);
        manager.save_report(&report).unwrap();

        assert_eq!(manager.load_report().unwrap(), Some(report));
    }

    #[test]
    fn report_uses_camel_case_keys() {
        let file = TrackedFile::new(
            FileCandidate::from_bytes("a.png", "image/png", 0, vec![1]),
            Some(String::new()),
        );
        let report = SessionReport::new(&[file], UploadSummary::default());
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["summary"]["totalFiles"], 0);
        assert_eq!(value["files"][0]["folderPath"], "");
        assert_eq!(value["files"][0]["status"], "pending");
        assert!(value["files"][0].get("remoteUrl").is_none());
    }

    #[test]
    fn corrupt_report_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StateManager::new(dir.path().join("report.json"));
        std::fs::write(manager.path(), "{not json").unwrap();
        assert!(manager.load_report().is_err());
    }
}
