use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::time::Instant;

use super::runner::ProcessRunner;
use super::WindowTarget;
use crate::error::{MuxError, MuxResult};

/// Escape sequences emitted by terminal programs.
static ANSI_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\x1b\[[0-9;?<=>!]*[ -/]*[@-~]", // CSI: colors, cursor movement, clears
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)", // OSC ending with BEL or ST
        r"|\x1b[()*+][A-Za-z0-9]",        // character set selection
        r"|\x1b[=>78cDEHMNOPZ\\]",        // single-character escapes
        r"|\x1b",                         // any bare ESC left over
    ))
    .unwrap()
});

/// C0/C1 controls other than tab and newline
static CONTROL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0b-\x1f\x7f-\x9f]").unwrap());

/// Point-in-time capture of a pane
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub target: WindowTarget,
    /// Last K lines as tmux printed them, escape sequences included
    pub raw: String,
    pub normalized: String,
    #[serde(skip)]
    pub captured_at: Instant,
}

impl Snapshot {
    pub fn from_raw(target: WindowTarget, raw: &str, limit: usize) -> Self {
        let raw = last_lines(raw, limit);
        let normalized = normalize(&raw);
        Self {
            target,
            raw,
            normalized,
            captured_at: Instant::now(),
        }
    }

    pub fn lines(&self) -> Vec<&str> {
        if self.normalized.is_empty() {
            return Vec::new();
        }
        self.normalized.split('\n').collect()
    }
}

/// Strip escape sequences and control characters, keeping line boundaries.
///
/// Trailing whitespace is removed from each line and blank lines at either
/// end are dropped. Applying it twice gives the same result as once.
pub fn normalize(text: &str) -> String {
    let text = ANSI_REGEX.replace_all(text, "");
    let text = CONTROL_REGEX.replace_all(&text, "");

    let lines: Vec<&str> = text.split('\n').map(str::trim_end).collect();
    let start = lines.iter().position(|l| !l.is_empty());
    let end = lines.iter().rposition(|l| !l.is_empty());

    match (start, end) {
        (Some(start), Some(end)) => lines[start..=end].join("\n"),
        _ => String::new(),
    }
}

fn last_lines(text: &str, limit: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(limit);
    lines[skip..].join("\n")
}

/// Capture the last `limit` lines of a window's active pane
pub async fn capture(
    runner: &dyn ProcessRunner,
    target: &WindowTarget,
    limit: usize,
) -> MuxResult<Snapshot> {
    let start = format!("-{}", limit);
    let output = runner
        .run(
            &[
                "capture-pane",
                "-p",
                "-e",
                "-t",
                target.tmux_target().as_str(),
                "-S",
                start.as_str(),
            ],
            None,
        )
        .await?;

    if !output.success() {
        return Err(MuxError::from_tmux_stderr(
            &target.to_string(),
            &output.stderr,
        ));
    }

    Ok(Snapshot::from_raw(target.clone(), &output.stdout, limit))
}
