pub mod chunker;
pub mod cli;
pub mod config;
pub mod entry;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod models;
pub mod observer;
pub mod orchestrator;
pub mod progress;
pub mod state;
pub mod transport;
pub mod validation;
pub mod worker;

pub use config::UploadConfig;
pub use error::{ConfigError, TransferError};
pub use models::{FileCandidate, Notice, TrackedFile, UploadStatus, UploadSummary};
pub use observer::UploadObserver;
pub use orchestrator::{IntakeReport, UploadOrchestrator};
pub use transport::{HttpTransport, Transport};
