use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use super::runner::ProcessRunner;
use super::WindowTarget;
use crate::error::{MuxError, MuxResult};

/// Text at or above this many bytes goes through a paste buffer
pub const PASTE_THRESHOLD: usize = 500;

/// Delay between loading the paste buffer and pasting it, and again between
/// the paste and Enter so the agent finishes taking in the paste
const PASTE_SETTLE: Duration = Duration::from_millis(150);

/// Keys a client may send by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialKey {
    Interrupt,
    Up,
    Down,
    Tab,
    Escape,
    Enter,
    Eof,
    Clear,
    Suspend,
}

impl SpecialKey {
    /// Key name in tmux `send-keys` syntax
    pub fn tmux_name(self) -> &'static str {
        match self {
            SpecialKey::Interrupt => "C-c",
            SpecialKey::Up => "Up",
            SpecialKey::Down => "Down",
            SpecialKey::Tab => "Tab",
            SpecialKey::Escape => "Escape",
            SpecialKey::Enter => "Enter",
            SpecialKey::Eof => "C-d",
            SpecialKey::Clear => "C-l",
            SpecialKey::Suspend => "C-z",
        }
    }
}

impl FromStr for SpecialKey {
    type Err = MuxError;

    /// Accepts friendly names and tmux key names
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let key = match name.to_ascii_lowercase().as_str() {
            "interrupt" | "c-c" => SpecialKey::Interrupt,
            "up" | "arrow-up" => SpecialKey::Up,
            "down" | "arrow-down" => SpecialKey::Down,
            "tab" => SpecialKey::Tab,
            "escape" | "esc" => SpecialKey::Escape,
            "enter" => SpecialKey::Enter,
            "eof" | "c-d" => SpecialKey::Eof,
            "clear" | "c-l" => SpecialKey::Clear,
            "suspend" | "c-z" => SpecialKey::Suspend,
            _ => return Err(MuxError::UnsupportedKey(name.to_string())),
        };
        Ok(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Literal text, submitted with Enter
    Text(String),
    Key(SpecialKey),
}

impl Payload {
    pub fn key(name: &str) -> MuxResult<Self> {
        name.parse().map(Payload::Key)
    }

    /// Whether this payload needs the buffered-paste path
    pub fn needs_paste(&self) -> bool {
        match self {
            Payload::Text(text) => text.len() >= PASTE_THRESHOLD || text.contains('\n'),
            Payload::Key(_) => false,
        }
    }
}

/// Delivers input to panes, one dispatch at a time per window.
///
/// Dispatches to different windows run concurrently. A timed-out send may or
/// may not have reached the pane.
pub struct InputDispatcher {
    runner: Arc<dyn ProcessRunner>,
    paste_settle: Duration,
    lanes: Mutex<HashMap<WindowTarget, Arc<tokio::sync::Mutex<()>>>>,
}

impl InputDispatcher {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            paste_settle: PASTE_SETTLE,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_paste_settle(mut self, settle: Duration) -> Self {
        self.paste_settle = settle;
        self
    }

    fn lane(&self, target: &WindowTarget) -> Arc<tokio::sync::Mutex<()>> {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        lanes.entry(target.clone()).or_default().clone()
    }

    /// Drop the send lanes of windows that failed `keep`
    pub fn retain(&self, keep: impl Fn(&WindowTarget) -> bool) {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        lanes.retain(|t, _| keep(t));
    }

    pub async fn send(&self, target: &WindowTarget, payload: &Payload) -> MuxResult<()> {
        let lane = self.lane(target);
        let _exclusive = lane.lock().await;

        match payload {
            Payload::Text(text) if text.is_empty() => Ok(()),
            Payload::Text(text) if payload.needs_paste() => self.paste_text(target, text).await,
            Payload::Text(text) => {
                // `--` so text starting with a dash is not read as flags
                self.send_keys(target, &["-l", "--", text.as_str()]).await?;
                self.submit(target).await
            }
            Payload::Key(key) => self.send_keys(target, &[key.tmux_name()]).await,
        }
    }

    async fn send_keys(&self, target: &WindowTarget, keys: &[&str]) -> MuxResult<()> {
        let pane = target.tmux_target();
        let mut args = vec!["send-keys", "-t", pane.as_str()];
        args.extend_from_slice(keys);

        let output = self.runner.run(&args, None).await?;
        if !output.success() {
            return Err(MuxError::from_tmux_stderr(&target.to_string(), &output.stderr));
        }
        Ok(())
    }

    /// Press Enter after the text already went out; failing here means the
    /// text sits unsubmitted in the pane.
    async fn submit(&self, target: &WindowTarget) -> MuxResult<()> {
        self.send_keys(target, &["Enter"]).await.map_err(|e| match e {
            MuxError::Transient(msg) => {
                MuxError::DispatchFailed(format!("text sent but Enter failed: {}", msg))
            }
            other => other,
        })
    }

    /// Load the text into a named buffer, then bracketed-paste it. The two
    /// tmux calls are separate processes, so the paste waits for the load to
    /// finish and settle, and Enter waits for the paste.
    async fn paste_text(&self, target: &WindowTarget, text: &str) -> MuxResult<()> {
        let buffer = format!("muxrelay-{}-{}", target.session, target.index);
        debug!(%target, bytes = text.len(), "pasting via buffer");

        let loaded = self
            .runner
            .run(&["load-buffer", "-b", buffer.as_str(), "-"], Some(text))
            .await?;
        if !loaded.success() {
            warn!(%target, stderr = %loaded.stderr.trim(), "load-buffer failed, paste skipped");
            return Err(MuxError::DispatchFailed(format!(
                "load-buffer exited with {:?}: {}",
                loaded.exit_code,
                loaded.stderr.trim()
            )));
        }

        tokio::time::sleep(self.paste_settle).await;

        let pasted = self
            .runner
            .run(
                &[
                    "paste-buffer",
                    "-p",
                    "-d",
                    "-b",
                    buffer.as_str(),
                    "-t",
                    target.tmux_target().as_str(),
                ],
                None,
            )
            .await?;
        if !pasted.success() {
            // -d never ran, so the buffer is still around
            let _ = self.runner.run(&["delete-buffer", "-b", buffer.as_str()], None).await;
            return Err(match MuxError::from_tmux_stderr(&target.to_string(), &pasted.stderr) {
                MuxError::NotFound(t) => MuxError::NotFound(t),
                _ => MuxError::DispatchFailed(format!(
                    "paste-buffer failed: {}",
                    pasted.stderr.trim()
                )),
            });
        }

        tokio::time::sleep(self.paste_settle).await;
        self.submit(target).await
    }
}
