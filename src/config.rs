use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_FILES: usize = 10;
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Settings for one upload session. Immutable once the orchestrator is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadConfig {
    pub max_file_size: Option<u64>,
    pub max_files: usize,
    pub allowed_types: Vec<String>,
    pub chunk_size: u64,
    pub enable_chunked_upload: bool,
    pub enable_folder_upload: bool,
    pub upload_url: String,
    pub headers: HashMap<String, String>,
    pub worker_concurrency: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: Some(DEFAULT_MAX_FILE_SIZE),
            max_files: DEFAULT_MAX_FILES,
            allowed_types: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            enable_chunked_upload: true,
            enable_folder_upload: true,
            upload_url: String::new(),
            headers: HashMap::new(),
            worker_concurrency: 4,
            max_retries: 3,
            retry_delay_ms: 1000,
            request_timeout_secs: 300,
        }
    }
}

impl UploadConfig {
    pub fn new(upload_url: impl Into<String>) -> Self {
        Self {
            upload_url: upload_url.into(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload_url.trim().is_empty() {
            return Err(ConfigError::MissingUploadUrl);
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.worker_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Parses a `NAME=VALUE` header argument.
pub fn parse_header(raw: &str) -> Result<(String, String), ConfigError> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(ConfigError::InvalidHeader(raw.to_string())),
    }
}
