mod client;
#[cfg(test)]
pub mod fake;
mod heuristics;
mod input;
mod markers;
mod runner;
mod snapshot;
mod turns;

pub use client::TmuxClient;
pub use heuristics::{ActivityDetector, ActivityState, Observation, PermissionMode};
pub use input::{InputDispatcher, Payload, SpecialKey};
pub use markers::Markers;
pub use runner::{ProcessRunner, RunError, TmuxRunner};
pub use snapshot::{capture, Snapshot};
pub use turns::{ConversationTurn, TurnParser};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MuxError, MuxResult};

/// Represents a tmux session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TmuxSession {
    /// Session ID (e.g., "$0")
    pub id: String,
    /// Session name
    pub name: String,
    /// Unix timestamp when session was created
    pub created_at: u64,
    /// Number of attached clients
    pub attached_clients: usize,
    /// Number of windows
    pub windows: usize,
}

/// A window inside a session. The index may shift when siblings close; the id
/// does not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TmuxWindow {
    /// Window ID (e.g., "@3")
    pub id: String,
    pub session: String,
    pub index: u32,
    pub name: String,
    pub active: bool,
    /// False once the user assigned a name
    pub auto_named: bool,
    /// Unix timestamp of last pane activity, as reported by tmux
    pub activity_at: u64,
}

impl TmuxWindow {
    pub fn target(&self) -> WindowTarget {
        WindowTarget {
            session: self.session.clone(),
            index: self.index,
        }
    }
}

/// Explicit address of a window's active pane. Nothing in the crate relies on
/// tmux's notion of the current session or window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowTarget {
    pub session: String,
    pub index: u32,
}

impl WindowTarget {
    pub fn new(session: impl Into<String>, index: u32) -> MuxResult<Self> {
        let session = session.into();
        validate_session_name(&session)?;
        Ok(Self { session, index })
    }

    /// Exact-match target string; a bare name would prefix-match other sessions
    pub fn tmux_target(&self) -> String {
        format!("={}:{}", self.session, self.index)
    }
}

pub(crate) fn exact_session(name: &str) -> String {
    format!("={}", name)
}

impl fmt::Display for WindowTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session, self.index)
    }
}

/// tmux treats ':' and '.' as target separators, so names carrying them
/// cannot be addressed unambiguously.
pub fn validate_session_name(name: &str) -> MuxResult<()> {
    if name.trim().is_empty() {
        return Err(MuxError::InvalidTarget("empty session name".to_string()));
    }
    if name.contains([':', '.']) {
        return Err(MuxError::InvalidTarget(format!(
            "session name '{}' contains ':' or '.'",
            name
        )));
    }
    Ok(())
}
