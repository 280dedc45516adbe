use regex::Regex;
use serde::Serialize;

use super::markers::{Markers, RE_CHROME};
use super::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    /// Tool call, tool output, diff or status block inside assistant output
    ToolResult,
}

/// One contiguous segment of the conversation on screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub lines: Vec<String>,
    /// Line index of the segment's first line in the normalized snapshot
    pub start: usize,
}

impl ConversationTurn {
    fn new(role: TurnRole, start: usize, first: &str) -> Self {
        Self {
            role,
            lines: vec![first.to_string()],
            start,
        }
    }

    fn is_blank(&self) -> bool {
        self.lines.iter().all(|l| l.trim().is_empty())
    }
}

enum LineKind<'a> {
    User(&'a str),
    Assistant(&'a str),
    ToolCall(&'a str),
    ToolResult,
    Status,
    Chrome,
    Text,
}

/// Splits normalized pane text into conversation turns.
///
/// Stateless: the same text always yields the same turns.
pub struct TurnParser {
    banner: Regex,
    user: Regex,
    assistant: Regex,
    tool_call: Regex,
    tool_result: Regex,
    status: Regex,
}

impl TurnParser {
    pub fn new(markers: &Markers) -> Result<Self, regex::Error> {
        Ok(Self {
            banner: Regex::new(&markers.session_banner)?,
            user: Regex::new(&markers.user_glyph)?,
            assistant: Regex::new(&markers.assistant_glyph)?,
            tool_call: Regex::new(&markers.tool_call)?,
            tool_result: Regex::new(&markers.tool_result)?,
            status: Regex::new(&markers.status_glyph)?,
        })
    }

    pub fn parse(&self, snapshot: &Snapshot) -> Vec<ConversationTurn> {
        self.parse_lines(&snapshot.lines())
    }

    pub fn parse_text(&self, text: &str) -> Vec<ConversationTurn> {
        let lines: Vec<&str> = text.lines().collect();
        self.parse_lines(&lines)
    }

    fn classify<'a>(&self, line: &'a str) -> LineKind<'a> {
        if let Some(m) = self.user.find(line) {
            return LineKind::User(line[m.end()..].trim_start());
        }
        if let Some(m) = self.assistant.find(line) {
            let rest = line[m.end()..].trim_start();
            if self.tool_call.is_match(rest) {
                return LineKind::ToolCall(rest);
            }
            return LineKind::Assistant(rest);
        }
        if self.tool_result.is_match(line) {
            return LineKind::ToolResult;
        }
        if self.status.is_match(line) {
            return LineKind::Status;
        }
        if !line.trim().is_empty() && RE_CHROME.is_match(line) {
            return LineKind::Chrome;
        }
        LineKind::Text
    }

    /// Input prompt line, bare or inside a box
    fn is_prompt(&self, line: &str) -> bool {
        let inner = line.trim_start_matches(|c: char| c == '│' || c.is_whitespace());
        self.user.is_match(inner)
    }

    /// A column-0 rule drawn directly above or below the input prompt
    fn is_prompt_frame(&self, lines: &[&str], at: usize) -> bool {
        if lines[at].starts_with(char::is_whitespace) {
            return false;
        }
        let above = lines[..at].iter().rev().find(|l| !l.trim().is_empty());
        let below = lines[at + 1..].iter().find(|l| !l.trim().is_empty());
        above.into_iter().chain(below).any(|l| self.is_prompt(l))
    }

    fn parse_lines(&self, lines: &[&str]) -> Vec<ConversationTurn> {
        // Only the latest agent session counts; older text may be stale
        let begin = lines
            .iter()
            .rposition(|l| self.banner.is_match(l))
            .map_or(0, |i| i + 1);

        let mut turns = Vec::new();
        let mut current: Option<ConversationTurn> = None;

        for (offset, &line) in lines.iter().enumerate().skip(begin) {
            match self.classify(line) {
                LineKind::User(rest) => {
                    flush(&mut turns, current.take());
                    current = Some(ConversationTurn::new(TurnRole::User, offset, rest));
                }
                LineKind::Assistant(rest) => {
                    flush(&mut turns, current.take());
                    current = Some(ConversationTurn::new(TurnRole::Assistant, offset, rest));
                }
                LineKind::ToolCall(rest) => {
                    flush(&mut turns, current.take());
                    current = Some(ConversationTurn::new(TurnRole::ToolResult, offset, rest));
                }
                LineKind::ToolResult => match current.as_mut() {
                    Some(turn) if turn.role == TurnRole::ToolResult => {
                        turn.lines.push(dedent(line).to_string());
                    }
                    _ => {
                        flush(&mut turns, current.take());
                        current = Some(ConversationTurn::new(
                            TurnRole::ToolResult,
                            offset,
                            line.trim_start(),
                        ));
                    }
                },
                LineKind::Status => {
                    flush(&mut turns, current.take());
                    current = Some(ConversationTurn::new(TurnRole::ToolResult, offset, line));
                }
                LineKind::Chrome => {
                    if self.is_prompt_frame(lines, offset) {
                        flush(&mut turns, current.take());
                    } else if let Some(turn) = current.as_mut() {
                        // tables and rules drawn inside a reply
                        turn.lines.push(dedent(line).to_string());
                    }
                }
                LineKind::Text => {
                    if let Some(turn) = current.as_mut() {
                        turn.lines.push(dedent(line).to_string());
                    }
                }
            }
        }
        flush(&mut turns, current);

        turns
    }
}

/// Close a turn: trailing blank lines belong to the gap, not the turn, and
/// turns without content (the live input prompt) are dropped.
fn flush(turns: &mut Vec<ConversationTurn>, turn: Option<ConversationTurn>) {
    let Some(mut turn) = turn else {
        return;
    };
    while turn.lines.last().is_some_and(|l| l.trim().is_empty()) {
        turn.lines.pop();
    }
    if !turn.is_blank() {
        turns.push(turn);
    }
}

/// Strip the two-space hanging indent under a marker glyph
fn dedent(line: &str) -> &str {
    line.strip_prefix("  ")
        .or_else(|| line.strip_prefix(' '))
        .unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> TurnParser {
        TurnParser::new(&Markers::default()).unwrap()
    }

    fn roles(turns: &[ConversationTurn]) -> Vec<TurnRole> {
        turns.iter().map(|t| t.role).collect()
    }

    const TWO_SESSIONS: &str = "\
╭───────────────────────────────╮
│ ✻ Welcome to Claude Code!     │
╰───────────────────────────────╯
> what is in this repo
● A web server.
╭───────────────────────────────╮
│ ✻ Welcome to Claude Code!     │
╰───────────────────────────────╯

  /help for help, /status for your current setup

> fix the build
● Fixed the missing import.
  Two files changed.

  The build passes now.

───────────────────────────────
>
───────────────────────────────
  ? for shortcuts";

    #[test]
    fn test_only_turns_after_latest_banner() {
        let turns = parser().parse_text(TWO_SESSIONS);
        assert_eq!(roles(&turns), [TurnRole::User, TurnRole::Assistant]);
        assert_eq!(turns[0].lines, ["fix the build"]);
        assert_eq!(turns[0].start, 11);
        assert_eq!(
            turns[1].lines,
            [
                "Fixed the missing import.",
                "Two files changed.",
                "",
                "The build passes now."
            ]
        );
    }

    #[test]
    fn test_parse_is_pure() {
        let p = parser();
        assert_eq!(p.parse_text(TWO_SESSIONS), p.parse_text(TWO_SESSIONS));

        let target = crate::tmux::WindowTarget::new("mobile", 0).unwrap();
        let snap = Snapshot::from_raw(target, TWO_SESSIONS, 200);
        assert_eq!(p.parse(&snap), p.parse(&snap));
    }

    #[test]
    fn test_tool_blocks_are_separate_segments() {
        let text = "\
> run the tests
● I'll run them.
● Bash(cargo test)
  ⎿  running 3 tests
     test a ... ok

● All passed.
  ⎿  Interrupted by user
✻ Worked for 12s";
        let turns = parser().parse_text(text);
        assert_eq!(
            roles(&turns),
            [
                TurnRole::User,
                TurnRole::Assistant,
                TurnRole::ToolResult,
                TurnRole::Assistant,
                TurnRole::ToolResult,
                TurnRole::ToolResult,
            ]
        );
        assert_eq!(
            turns[2].lines,
            ["Bash(cargo test)", "⎿  running 3 tests", "   test a ... ok"]
        );
        assert_eq!(turns[4].lines, ["⎿  Interrupted by user"]);
        assert_eq!(turns[5].lines, ["✻ Worked for 12s"]);
        assert_eq!(turns[5].start, 8);
    }

    #[test]
    fn test_tables_and_rules_stay_in_the_reply() {
        let text = "\
> compare
● Here is the comparison:
  ┌─────┬─────┐
  │ a   │ b   │
  ├─────┼─────┤
  │ 1ms │ 9ms │
  └─────┴─────┘
  Option a is faster.

  ---

  Next steps follow.

───────────────────────────────
> 
───────────────────────────────
  ? for shortcuts";
        let turns = parser().parse_text(text);
        assert_eq!(roles(&turns), [TurnRole::User, TurnRole::Assistant]);
        assert_eq!(
            turns[1].lines,
            [
                "Here is the comparison:",
                "┌─────┬─────┐",
                "│ a   │ b   │",
                "├─────┼─────┤",
                "│ 1ms │ 9ms │",
                "└─────┴─────┘",
                "Option a is faster.",
                "",
                "---",
                "",
                "Next steps follow.",
            ]
        );
    }

    #[test]
    fn test_boxed_prompt_frame_ends_the_reply() {
        let text = "● Done.\n╭────────╮\n│ >      │\n╰────────╯\n  ? for shortcuts";
        let turns = parser().parse_text(text);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].lines, ["Done."]);
    }

    #[test]
    fn test_blank_runs_do_not_start_turns() {
        let text = "> hi\n\n\n\n● hello\n\n\n";
        let turns = parser().parse_text(text);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].lines, ["hi"]);
        assert_eq!(turns[1].lines, ["hello"]);
    }

    #[test]
    fn test_without_banner_parses_everything() {
        let turns = parser().parse_text("preamble\n> one\n● two");
        assert_eq!(roles(&turns), [TurnRole::User, TurnRole::Assistant]);
        assert_eq!(turns[0].start, 1);
    }

    #[test]
    fn test_unexpected_text_yields_no_turns() {
        assert!(parser().parse_text("$ ls\nCargo.toml src").is_empty());
        assert!(parser().parse_text("").is_empty());
    }
}
