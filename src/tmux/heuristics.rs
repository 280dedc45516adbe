use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use super::markers::{Markers, RE_CHROME};

/// Activity of the program running in a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    /// Waiting at a ready prompt
    #[default]
    Idle,
    /// Running a request (interrupt hint visible)
    Working,
    /// Spinner or progress glyph visible
    Thinking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    Default,
    /// Edits auto-accepted or plan mode
    Elevated,
    SkipPermissions,
}

/// Named text predicates, listed in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Signal {
    InterruptHint,
    ProgressGlyph,
    ReadyPrompt,
}

impl Signal {
    pub const PRIORITY: [Signal; 3] = [
        Signal::InterruptHint,
        Signal::ProgressGlyph,
        Signal::ReadyPrompt,
    ];

    pub fn verdict(self) -> ActivityState {
        match self {
            Signal::InterruptHint => ActivityState::Working,
            Signal::ProgressGlyph => ActivityState::Thinking,
            Signal::ReadyPrompt => ActivityState::Idle,
        }
    }
}

/// Detector output for one window, carried into the next poll
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub state: ActivityState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_remaining_percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
    /// Signal that decided the state, if any
    pub signal: Option<Signal>,
    /// True when a busy verdict decayed to Idle because output stopped
    /// changing or polls stopped arriving
    pub stale: bool,
    #[serde(skip)]
    fingerprint: u64,
    #[serde(skip)]
    observed_at: Instant,
    #[serde(skip)]
    content_changed_at: Instant,
    #[serde(skip)]
    state_since: Instant,
}

impl Observation {
    /// How long the window has been Idle; zero when it is not
    pub fn idle_for(&self, now: Instant) -> Duration {
        match self.state {
            ActivityState::Idle => now.saturating_duration_since(self.state_since),
            _ => Duration::ZERO,
        }
    }

    /// Time since the captured text last changed
    pub fn output_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.content_changed_at)
    }
}

/// Engine for inferring agent activity from normalized pane text.
///
/// Detection is recomputed on every call from the text plus the previous
/// observation; it never fails on unexpected text.
pub struct ActivityDetector {
    interrupt_hint: Regex,
    progress_glyph: Regex,
    ready_prompt: Regex,
    footer: Regex,
    context_remaining: Regex,
    skip_permissions: Regex,
    elevated_permissions: Regex,
    default_permissions: Regex,
    status_lines: usize,
    /// How long unchanged output may keep a busy state alive
    stale_grace: Duration,
}

impl ActivityDetector {
    pub fn new(markers: &Markers, stale_grace: Duration) -> Result<Self, regex::Error> {
        Ok(Self {
            interrupt_hint: Regex::new(&markers.interrupt_hint)?,
            progress_glyph: Regex::new(&markers.progress_glyph)?,
            ready_prompt: Regex::new(&markers.ready_prompt)?,
            footer: Regex::new(&markers.footer)?,
            context_remaining: Regex::new(&markers.context_remaining)?,
            skip_permissions: Regex::new(&markers.skip_permissions)?,
            elevated_permissions: Regex::new(&markers.elevated_permissions)?,
            default_permissions: Regex::new(&markers.default_permissions)?,
            status_lines: markers.status_lines.max(1),
            stale_grace,
        })
    }

    /// Trailing non-blank lines, oldest first
    fn status_area<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut lines: Vec<&str> = text
            .lines()
            .rev()
            .filter(|l| !l.trim().is_empty())
            .take(self.status_lines)
            .collect();
        lines.reverse();
        lines
    }

    /// Evaluate one predicate against the status area
    pub fn signal_matches(&self, signal: Signal, status: &[&str]) -> bool {
        match signal {
            Signal::InterruptHint => status.iter().any(|l| self.interrupt_hint.is_match(l)),
            Signal::ProgressGlyph => status.iter().any(|l| self.progress_glyph.is_match(l)),
            Signal::ReadyPrompt => status
                .iter()
                .rev()
                .find(|l| !RE_CHROME.is_match(l) && !self.footer.is_match(l))
                .is_some_and(|l| self.ready_prompt.is_match(l)),
        }
    }

    /// First matching signal in priority order
    pub fn classify(&self, text: &str) -> Option<Signal> {
        let status = self.status_area(text);
        Signal::PRIORITY
            .into_iter()
            .find(|&signal| self.signal_matches(signal, &status))
    }

    pub fn context_remaining(&self, text: &str) -> Option<u8> {
        self.status_area(text).iter().rev().find_map(|line| {
            let caps = self.context_remaining.captures(line)?;
            let percent: u8 = caps
                .iter()
                .skip(1)
                .flatten()
                .next()?
                .as_str()
                .parse()
                .ok()?;
            Some(percent.min(100))
        })
    }

    pub fn permission_mode(&self, text: &str) -> Option<PermissionMode> {
        let status = self.status_area(text);
        let any = |re: &Regex| status.iter().any(|l| re.is_match(l));
        if any(&self.skip_permissions) {
            Some(PermissionMode::SkipPermissions)
        } else if any(&self.elevated_permissions) {
            Some(PermissionMode::Elevated)
        } else if any(&self.default_permissions) {
            Some(PermissionMode::Default)
        } else {
            None
        }
    }

    /// Derive the window's activity from freshly normalized text.
    ///
    /// Without any signal the previous state is held, unless the previous
    /// observation is older than the grace period. A busy state whose output
    /// has not changed for longer than the grace period also decays to Idle.
    /// Either way a missed idle transition cannot wedge the window as busy.
    pub fn observe(&self, prev: Option<&Observation>, text: &str, now: Instant) -> Observation {
        let fingerprint = fingerprint(text);
        let content_changed_at = match prev {
            Some(p) if p.fingerprint == fingerprint => p.content_changed_at,
            _ => now,
        };

        let signal = self.classify(text);
        let mut state = match signal {
            Some(signal) => signal.verdict(),
            None => prev.map(|p| p.state).unwrap_or_default(),
        };

        let missed_polls = signal.is_none()
            && prev.is_some_and(|p| {
                now.saturating_duration_since(p.observed_at) > self.stale_grace
            });
        let unchanged = now.saturating_duration_since(content_changed_at) > self.stale_grace;

        let mut stale = false;
        if state != ActivityState::Idle && (missed_polls || unchanged) {
            state = ActivityState::Idle;
            stale = true;
        }

        let state_since = match prev {
            Some(p) if p.state == state => p.state_since,
            _ => now,
        };

        Observation {
            state,
            context_remaining_percent: self.context_remaining(text),
            permission_mode: self.permission_mode(text),
            signal,
            stale,
            fingerprint,
            observed_at: now,
            content_changed_at,
            state_since,
        }
    }
}

fn fingerprint(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
