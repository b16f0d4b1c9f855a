use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

/// Where the bytes of a file live. Cheap to clone; the underlying file is shared.
#[derive(Clone)]
pub enum FileHandle {
    Path(PathBuf),
    Memory(Bytes),
}

impl FileHandle {
    /// Reads `range` from the file. The range must lie within the file.
    pub async fn read_range(&self, range: Range<u64>) -> io::Result<Vec<u8>> {
        let len = (range.end - range.start) as usize;
        match self {
            FileHandle::Path(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(range.start)).await?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf).await?;
                Ok(buf)
            }
            FileHandle::Memory(data) => data
                .get(range.start as usize..range.end as usize)
                .map(|slice| slice.to_vec())
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::UnexpectedEof, "range outside of file")
                }),
        }
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileHandle::Path(path) => f.debug_tuple("Path").field(path).finish(),
            FileHandle::Memory(data) => write!(f, "Memory({} bytes)", data.len()),
        }
    }
}

/// A file offered for intake, before it is tracked.
#[derive(Debug, Clone)]
pub struct FileCandidate {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    /// Milliseconds since the Unix epoch.
    pub last_modified: u64,
    pub handle: FileHandle,
}

impl FileCandidate {
    pub async fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            ));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mime_type = mime_guess::from_path(path)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_default();

        Ok(Self {
            name,
            size: metadata.len(),
            mime_type,
            last_modified,
            handle: FileHandle::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        last_modified: u64,
        data: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            size: data.len() as u64,
            mime_type: mime_type.into(),
            last_modified,
            handle: FileHandle::Memory(data.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Success,
    Error,
    Cancelled,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::Success | UploadStatus::Error | UploadStatus::Cancelled
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            UploadStatus::Pending => "Waiting",
            UploadStatus::Uploading => "Uploading",
            UploadStatus::Success => "Done",
            UploadStatus::Error => "Failed",
            UploadStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One file under management by the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedFile {
    pub id: String,
    #[serde(skip)]
    pub handle: FileHandle,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub last_modified: u64,
    pub status: UploadStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
}

impl TrackedFile {
    pub fn new(candidate: FileCandidate, folder_path: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            handle: candidate.handle,
            name: candidate.name,
            size: candidate.size,
            mime_type: candidate.mime_type,
            last_modified: candidate.last_modified,
            status: UploadStatus::Pending,
            progress: 0,
            error: None,
            remote_url: None,
            chunk_index: None,
            total_chunks: None,
            folder_path,
        }
    }

    /// Same name, size and modification time, in the same folder.
    pub fn is_same_file(&self, other: &TrackedFile) -> bool {
        self.name == other.name
            && self.size == other.size
            && self.last_modified == other.last_modified
            && self.folder_path.as_deref().unwrap_or("")
                == other.folder_path.as_deref().unwrap_or("")
    }

    /// Name including the folder path, for display.
    pub fn display_name(&self) -> String {
        match self.folder_path.as_deref() {
            Some(folder) if !folder.is_empty() => format!("{}/{}", folder, self.name),
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Transient user-facing message from the intake pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Rejected { name: String, errors: Vec<String> },
    TooManyFiles { max_files: usize },
    ProcessingFailed,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Rejected { name, errors } => write!(f, "{}: {}", name, errors.join(", ")),
            Notice::TooManyFiles { max_files } => {
                write!(f, "At most {} files can be uploaded", max_files)
            }
            Notice::ProcessingFailed => f.write_str("Failed to process dropped files"),
        }
    }
}

/// Aggregate counts over the tracked set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub total_files: usize,
    pub total_size: u64,
    pub success_count: usize,
    pub error_count: usize,
}
