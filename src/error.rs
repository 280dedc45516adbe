use thiserror::Error;

use crate::tmux::RunError;

/// Failures surfaced by the registry, dispatcher and snapshot layers.
#[derive(Debug, Error)]
pub enum MuxError {
    /// The session, window or pane no longer exists (usually closed externally)
    #[error("not found: {0}")]
    NotFound(String),
    /// Spawn failure, timeout or an unexpected tmux error; safe to retry
    #[error("transient failure: {0}")]
    Transient(String),
    /// A buffer-load/paste sequence did not complete; input may be partial
    #[error("dispatch failed: {0}")]
    DispatchFailed(String),
    #[error("unsupported key: {0}")]
    UnsupportedKey(String),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

impl MuxError {
    /// Short machine-readable name for clients
    pub fn kind(&self) -> &'static str {
        match self {
            MuxError::NotFound(_) => "not_found",
            MuxError::Transient(_) => "transient",
            MuxError::DispatchFailed(_) => "dispatch_failed",
            MuxError::UnsupportedKey(_) => "unsupported_key",
            MuxError::InvalidTarget(_) => "invalid_target",
        }
    }

    /// Classify a failed tmux invocation from its stderr.
    pub fn from_tmux_stderr(target: &str, stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        let missing = [
            "can't find",
            "no such",
            "not found",
            "no server running",
            "no current",
            "error connecting",
        ];
        if missing.iter().any(|m| lower.contains(m)) {
            MuxError::NotFound(target.to_string())
        } else {
            MuxError::Transient(stderr.trim().to_string())
        }
    }
}

impl From<RunError> for MuxError {
    fn from(err: RunError) -> Self {
        MuxError::Transient(err.to_string())
    }
}

pub type MuxResult<T> = std::result::Result<T, MuxError>;
