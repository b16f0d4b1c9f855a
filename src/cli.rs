use crate::config::{UploadConfig, parse_header};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chunk-upload")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Files and folders to upload
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Upload endpoint (overrides the config file)
    #[arg(short, long)]
    pub url: Option<String>,

    /// JSON config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Extra request header as NAME=VALUE, repeatable
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Chunk size in bytes
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Always upload files in a single request
    #[arg(long)]
    pub no_chunked: bool,

    /// Skip folders instead of walking them
    #[arg(long)]
    pub no_folder: bool,

    /// Largest accepted file in bytes
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Maximum number of files in the session
    #[arg(long)]
    pub max_files: Option<usize>,

    /// Accepted type: `.ext`, `image/*` or an exact MIME type, repeatable
    #[arg(short, long = "allow")]
    pub allow: Vec<String>,

    /// Number of chunk uploads in flight
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Number of retry attempts per chunk
    #[arg(short, long)]
    pub retries: Option<u32>,

    /// Where to write the session report (default: .upload_state.json)
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Loads the config file, if any, and layers the command line on top.
    pub fn upload_config(&self) -> Result<UploadConfig> {
        let mut config = match &self.config {
            Some(path) => UploadConfig::load(path)?,
            None => UploadConfig::default(),
        };

        if let Some(url) = &self.url {
            config.upload_url = url.clone();
        }
        for raw in &self.headers {
            let (name, value) = parse_header(raw).context("Invalid --header")?;
            config.headers.insert(name, value);
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if self.no_chunked {
            config.enable_chunked_upload = false;
        }
        if self.no_folder {
            config.enable_folder_upload = false;
        }
        if let Some(max_file_size) = self.max_file_size {
            config.max_file_size = Some(max_file_size);
        }
        if let Some(max_files) = self.max_files {
            config.max_files = max_files;
        }
        if !self.allow.is_empty() {
            config.allowed_types = self.allow.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.worker_concurrency = concurrency;
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }

        config.validate().context("Invalid upload configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.json");
        std::fs::write(
            &path,
            r#"{"uploadUrl": "http://from-file/upload", "maxFiles": 3, "chunkSize": 1024,
                "headers": {"X-Token": "file"}}"#,
        )
        .unwrap();

        let args = Args::parse_from([
            "chunk-upload",
            "a.png",
            "--config",
            path.to_str().unwrap(),
            "--url",
            "http://from-flag/upload",
            "-H",
            "X-Token=flag",
            "-H",
            "X-Other=1",
            "--allow",
            "image/*",
            "--no-chunked",
        ]);
        let config = args.upload_config().unwrap();

        assert_eq!(config.upload_url, "http://from-flag/upload");
        assert_eq!(config.max_files, 3);
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.headers["X-Token"], "flag");
        assert_eq!(config.headers["X-Other"], "1");
        assert_eq!(config.allowed_types, vec!["image/*".to_string()]);
        assert!(!config.enable_chunked_upload);
        assert!(config.enable_folder_upload);
    }

    #[test]
    fn missing_url_is_rejected() {
        let args = Args::parse_from(["chunk-upload", "a.png"]);
        assert!(args.upload_config().is_err());
    }

    #[test]
    fn malformed_header_is_rejected() {
        let args = Args::parse_from(["chunk-upload", "a.png", "-u", "http://x", "-H", "nope"]);
        assert!(args.upload_config().is_err());
    }
}
