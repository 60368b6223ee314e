/// Error taxonomy for the backup pipelines
///
/// Environment errors abort the run before any work. Operation and integrity
/// errors fail one unit of work (a framework or a collection) without touching
/// its siblings.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Debug, Error)]
pub enum BackupError {
    // Environment
    #[error("required tool '{tool}' not found on PATH")]
    MissingTool { tool: String },

    #[error("unknown framework '{name}' (valid: {valid})")]
    UnknownFramework { name: String, valid: String },

    #[error("Docker is not reachable: {0}")]
    Docker(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    // Availability
    #[error("{service} for {framework} is not available: {reason}")]
    ServiceUnavailable {
        framework: String,
        service: String,
        reason: String,
    },

    // Operation
    #[error("{tool} failed: {detail}")]
    DumpFailed { tool: String, detail: String },

    #[error("snapshot operation failed for collection '{collection}': {detail}")]
    Snapshot { collection: String, detail: String },

    #[error("{method} {endpoint} returned HTTP {status}: {body}")]
    Api {
        method: String,
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    // Integrity
    #[error("integrity check failed for {}: {reason}", path.display())]
    Integrity { path: PathBuf, reason: String },

    #[error("checksum mismatch for {}: expected {expected}, found {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("metadata sidecar not found for {}", .0.display())]
    MissingMetadata(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BackupError {
    /// Errors that mean the run cannot start at all
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            BackupError::MissingTool { .. }
                | BackupError::UnknownFramework { .. }
                | BackupError::Docker(_)
                | BackupError::Config(_)
        )
    }
}

/// Process exit code for an error that ended the run: 2 when the run could not
/// start (environment, config), 1 when an operation such as a restore failed
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<BackupError>() {
        Some(e) if !e.is_environment() => 1,
        _ => 2,
    }
}
