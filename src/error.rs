use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "invalid yt-dlp binary path: {} (must be an executable regular file named yt-dlp*)",
        binary_label(.path)
    )]
    InvalidBinary { path: PathBuf },

    #[error("URL does not match selected site ({site}): {url}")]
    InvalidUrl { site: String, url: String },

    #[error("sandbox violation: {0}")]
    SandboxViolation(String),

    /// The sandbox vetted at startup no longer holds; raised per download.
    #[error("sandbox escape: {0}")]
    SandboxEscape(String),

    #[error("sandbox directory is not writable: {path} ({reason})")]
    SandboxUnwritable { path: PathBuf, reason: String },

    #[error("another download is in progress")]
    AlreadyRunning,

    #[error("failed to start yt-dlp: {0}")]
    SpawnFailure(std::io::Error),

    #[error("config io failure: {0}")]
    ConfigIo(String),

    #[error("unknown site: {0}")]
    UnknownSite(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Sandbox setup failures; the host must exit. A [`EngineError::SandboxEscape`]
    /// only aborts the download that hit it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::SandboxUnwritable { .. } | EngineError::SandboxViolation(_)
        )
    }

    pub fn is_security(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidBinary { .. }
                | EngineError::InvalidUrl { .. }
                | EngineError::SandboxViolation(_)
                | EngineError::SandboxEscape(_)
        )
    }
}

fn binary_label(path: &Path) -> String {
    if path.as_os_str().is_empty() {
        "none selected".to_string()
    } else {
        path.display().to_string()
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
