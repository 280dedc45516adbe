use anyhow::Result;
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::tmux::Markers;

pub const DEFAULT_SESSION: &str = "mobile";
pub const DEFAULT_CAPTURE_LINES: usize = 200;
pub const DEFAULT_POLL_MS: u64 = 1000;
pub const DEFAULT_IDLE_DEBOUNCE_MS: u64 = 2000;
pub const DEFAULT_STALE_GRACE_SECS: u64 = 45;
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_BIND: &str = "0.0.0.0:7681";

/// Settings shared by the server and the dashboard
#[derive(Debug, Clone, Args)]
pub struct RelayConfig {
    /// Session used by the compatibility routes, created at startup
    #[arg(long, env = "MUXRELAY_SESSION", default_value = DEFAULT_SESSION)]
    pub session: String,

    /// Working directory for new sessions and windows [default: home directory]
    #[arg(long, env = "MUXRELAY_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Lines of scrollback captured per snapshot
    #[arg(long, env = "MUXRELAY_CAPTURE_LINES", default_value_t = DEFAULT_CAPTURE_LINES)]
    pub capture_lines: usize,

    #[arg(long, env = "MUXRELAY_POLL_MS", default_value_t = DEFAULT_POLL_MS)]
    pub poll_ms: u64,

    /// How long a window must stay idle before the queue sends to it
    #[arg(long, env = "MUXRELAY_IDLE_DEBOUNCE_MS", default_value_t = DEFAULT_IDLE_DEBOUNCE_MS)]
    pub idle_debounce_ms: u64,

    /// Unchanged output older than this no longer counts as busy
    #[arg(long, env = "MUXRELAY_STALE_GRACE_SECS", default_value_t = DEFAULT_STALE_GRACE_SECS)]
    pub stale_grace_secs: u64,

    /// Timeout for every tmux invocation
    #[arg(long, env = "MUXRELAY_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    #[arg(long, env = "MUXRELAY_TMUX", default_value = "tmux")]
    pub tmux: String,

    /// JSON file overriding the activity and turn markers
    #[arg(long, env = "MUXRELAY_MARKERS")]
    pub markers: Option<PathBuf>,

    #[arg(long, env = "MUXRELAY_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            session: DEFAULT_SESSION.to_string(),
            work_dir: None,
            capture_lines: DEFAULT_CAPTURE_LINES,
            poll_ms: DEFAULT_POLL_MS,
            idle_debounce_ms: DEFAULT_IDLE_DEBOUNCE_MS,
            stale_grace_secs: DEFAULT_STALE_GRACE_SECS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            tmux: "tmux".to_string(),
            markers: None,
            bind: SocketAddr::from(([0, 0, 0, 0], 7681)),
        }
    }
}

impl RelayConfig {
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(100))
    }

    pub fn idle_debounce(&self) -> Duration {
        Duration::from_millis(self.idle_debounce_ms)
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_secs(self.stale_grace_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Built-in markers unless an override file was given
    pub fn load_markers(&self) -> Result<Markers> {
        match &self.markers {
            Some(path) => Markers::load(path),
            None => Ok(Markers::default()),
        }
    }
}
