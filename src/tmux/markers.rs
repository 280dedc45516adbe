use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Lines made only of box-drawing characters (prompt box borders, rules)
pub(super) static RE_CHROME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s─━│┃┌┐└┘├┤┬┴┼╭╮╯╰═║╔╗╚╝▀▄█▌▐░▒▓]+$").unwrap());

/// Text patterns the detector and turn parser look for.
///
/// The defaults follow Claude Code's terminal UI. They drift with each release
/// of the agent, so every pattern can be overridden from a JSON file; fields
/// missing from the file keep their default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Markers {
    /// Status-bar hint shown while a request is running => Working
    pub interrupt_hint: String,
    /// Spinner or progress glyph followed by a verb => Thinking
    pub progress_glyph: String,
    /// A bare input prompt => Idle
    pub ready_prompt: String,
    /// Hint lines drawn under the prompt box, skipped when looking for the prompt
    pub footer: String,
    /// Percentage of context left; the first participating group is used
    pub context_remaining: String,
    pub skip_permissions: String,
    pub elevated_permissions: String,
    pub default_permissions: String,
    /// Number of trailing non-blank lines treated as the status area
    pub status_lines: usize,

    /// Banner printed when the agent starts or the screen is cleared
    pub session_banner: String,
    /// Column-0 glyph of a user prompt
    pub user_glyph: String,
    /// Column-0 glyph of assistant output
    pub assistant_glyph: String,
    /// Assistant text that is a tool invocation, e.g. `Bash(ls)`
    pub tool_call: String,
    /// Connector opening a tool result
    pub tool_result: String,
    /// Column-0 status line such as `✻ Worked for 12s`
    pub status_glyph: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            interrupt_hint: r"(?i)\b(?:esc|ctrl\+c) to interrupt\b".to_string(),
            progress_glyph: r"^\s*[·✢✳✶✻✽⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]\s+\w+(?:…|\.\.\.)".to_string(),
            ready_prompt: r#"^\s*(?:│\s*)?[>❯$%]\s*(?:Try ".*")?\s*(?:│\s*)?$"#.to_string(),
            footer: r"(?i)for shortcuts|to cycle\)|auto-compact|context left|permissions on|accept edits on|plan mode on|⏵⏵|⏸".to_string(),
            context_remaining: r"(?i)context left until auto-compact:\s*(\d{1,3})%|(\d{1,3})%\s+context left|ctx:\s*(\d{1,3})%".to_string(),
            skip_permissions: r"(?i)bypass(?:ing)? permissions".to_string(),
            elevated_permissions: r"(?i)accept edits on|auto-accept edits|plan mode on".to_string(),
            default_permissions: r"(?i)\? for shortcuts".to_string(),
            status_lines: 12,

            session_banner: r"(?i)welcome to claude code|claude code v\d+\.\d+".to_string(),
            user_glyph: r"^[>❯](?:\s|$)".to_string(),
            assistant_glyph: r"^[●⏺](?:\s|$)".to_string(),
            tool_call: r"^[A-Z][A-Za-z0-9_]*\(".to_string(),
            tool_result: r"^\s*⎿".to_string(),
            status_glyph: r"^[·✢✳✶✻✽](?:\s|$)".to_string(),
        }
    }
}

impl Markers {
    /// Load overrides from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read markers file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse markers file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_override_keeps_defaults() {
        let markers: Markers =
            serde_json::from_str(r#"{"interrupt_hint": "(?i)press esc", "status_lines": 4}"#)
                .unwrap();
        assert_eq!(markers.interrupt_hint, "(?i)press esc");
        assert_eq!(markers.status_lines, 4);
        assert_eq!(markers.user_glyph, Markers::default().user_glyph);
    }

    #[test]
    fn test_default_patterns_compile() {
        let m = Markers::default();
        for pattern in [
            &m.interrupt_hint,
            &m.progress_glyph,
            &m.ready_prompt,
            &m.footer,
            &m.context_remaining,
            &m.skip_permissions,
            &m.elevated_permissions,
            &m.default_permissions,
            &m.session_banner,
            &m.user_glyph,
            &m.assistant_glyph,
            &m.tool_call,
            &m.tool_result,
            &m.status_glyph,
        ] {
            assert!(regex::Regex::new(pattern).is_ok(), "bad pattern {}", pattern);
        }
    }
}
