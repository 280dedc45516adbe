use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
    Frame,
};

use crate::actions::Action;
use crate::relay::DashboardEntry;
use crate::tmux::{ActivityState, PermissionMode, WindowTarget};

/// Theme colors inspired by Claude Code
pub struct Theme {
    pub fg: Color,
    pub accent: Color,
    pub dim: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            fg: Color::Rgb(220, 220, 220),
            accent: Color::Rgb(217, 119, 87), // Claude orange
            dim: Color::Rgb(100, 100, 100),
            success: Color::Rgb(80, 200, 120),
            warning: Color::Rgb(255, 193, 7),
            error: Color::Rgb(220, 53, 69),
        }
    }
}

/// Input mode for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    /// Typing a line to send to the selected window
    Composing,
    Confirming,
}

/// Dashboard state: one row per window across all sessions
pub struct App {
    pub entries: Vec<DashboardEntry>,
    pub list_state: ListState,
    /// Current message to display (info or error)
    pub status_message: Option<String>,
    pub theme: Theme,
    pub input_mode: InputMode,
    pub input_buffer: String,
    /// Pending action queue
    pub pending_actions: Vec<Action>,
}

impl App {
    pub fn new() -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            entries: Vec::new(),
            list_state,
            status_message: None,
            theme: Theme::default(),
            input_mode: InputMode::Normal,
            input_buffer: String::new(),
            pending_actions: Vec::new(),
        }
    }

    pub fn selected(&self) -> Option<&DashboardEntry> {
        self.list_state.selected().and_then(|i| self.entries.get(i))
    }

    fn selected_target(&self) -> Option<WindowTarget> {
        self.selected().map(DashboardEntry::target)
    }

    /// Take pending actions (drains the queue)
    pub fn take_pending_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.pending_actions)
    }

    /// Handle an action and return whether to quit
    pub fn handle_action(&mut self, action: Action) -> Result<bool> {
        match action {
            Action::KeyPress(key) => self.handle_key(key),
            Action::DashboardUpdated(entries) => {
                // Keep the cursor on the same window when rows shift
                let previous = self.selected_target();
                self.entries = entries;
                let index = previous
                    .and_then(|t| self.entries.iter().position(|e| e.target() == t))
                    .or_else(|| self.list_state.selected())
                    .map(|i| i.min(self.entries.len().saturating_sub(1)));
                self.list_state.select(index);
                Ok(false)
            }
            Action::Error(msg) => {
                self.status_message = Some(msg);
                Ok(false)
            }
            Action::Quit => Ok(true),
            _ => Ok(false),
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        if self.status_message.is_some() && self.input_mode == InputMode::Normal {
            self.status_message = None;
        }

        match self.input_mode {
            InputMode::Normal => self.handle_normal_key(key),
            InputMode::Composing => self.handle_composing_key(key),
            InputMode::Confirming => self.handle_confirming_key(key),
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(true);
            }
            KeyCode::Char('j') | KeyCode::Down => self.next_entry(),
            KeyCode::Char('k') | KeyCode::Up => self.previous_entry(),
            KeyCode::Enter => {
                if let Some(target) = self.selected_target() {
                    self.pending_actions.push(Action::Attach(target));
                }
            }
            KeyCode::Char('s') => {
                if self.selected().is_some() {
                    self.input_mode = InputMode::Composing;
                    self.input_buffer.clear();
                }
            }
            KeyCode::Char('i') => {
                if let Some(target) = self.selected_target() {
                    self.pending_actions.push(Action::Interrupt(target));
                }
            }
            KeyCode::Char('p') => {
                if let Some((target, playing)) = self.selected().map(|e| (e.target(), e.queue_playing)) {
                    self.pending_actions.push(Action::SetPlaying(target, !playing));
                }
            }
            KeyCode::Char('n') => {
                if let Some(target) = self.selected_target() {
                    self.pending_actions.push(Action::NewWindow(target.session));
                }
            }
            KeyCode::Char('d') => {
                if self.selected().is_some() {
                    self.input_mode = InputMode::Confirming;
                }
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_composing_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Enter => {
                let text = std::mem::take(&mut self.input_buffer);
                if let Some(target) = self.selected_target() {
                    if !text.is_empty() {
                        self.pending_actions.push(Action::SendText(target, text));
                    }
                }
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Esc => {
                self.input_buffer.clear();
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char(c) => self.input_buffer.push(c),
            KeyCode::Backspace => {
                self.input_buffer.pop();
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_confirming_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                if let Some(target) = self.selected_target() {
                    self.pending_actions.push(Action::CloseWindow(target));
                }
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
            }
            _ => {}
        }
        Ok(false)
    }

    fn next_entry(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let i = match self.list_state.selected() {
            Some(i) if i + 1 < self.entries.len() => i + 1,
            _ => 0,
        };
        self.list_state.select(Some(i));
    }

    fn previous_entry(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let i = match self.list_state.selected() {
            Some(0) | None => self.entries.len() - 1,
            Some(i) => i - 1,
        };
        self.list_state.select(Some(i));
    }

    fn state_style(&self, state: ActivityState) -> Style {
        Style::default().fg(match state {
            ActivityState::Working => self.theme.warning,
            ActivityState::Thinking => self.theme.accent,
            ActivityState::Idle => self.theme.success,
        })
    }

    pub fn render(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(0),    // Main content
                Constraint::Length(3), // Footer/status
            ])
            .split(frame.area());

        self.render_header(frame, chunks[0]);
        self.render_main(frame, chunks[1]);
        self.render_footer(frame, chunks[2]);

        match self.input_mode {
            InputMode::Composing => self.render_compose_dialog(frame),
            InputMode::Confirming => self.render_confirm_dialog(frame),
            InputMode::Normal => {}
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let busy = self
            .entries
            .iter()
            .filter(|e| e.state != ActivityState::Idle)
            .count();
        let title = Paragraph::new(Line::from(vec![
            Span::styled(
                " muxrelay ",
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("│ {} windows, {} busy", self.entries.len(), busy),
                Style::default().fg(self.theme.dim),
            ),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(title, area);
    }

    fn render_main(&mut self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(area);

        self.render_window_list(frame, chunks[0]);
        self.render_detail_pane(frame, chunks[1]);
    }

    fn render_window_list(&mut self, frame: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = if self.entries.is_empty() {
            vec![ListItem::new(Line::from(Span::styled(
                "  No tmux windows found.",
                Style::default().fg(self.theme.dim),
            )))]
        } else {
            self.entries
                .iter()
                .map(|entry| {
                    let icon = match (&entry.error, entry.state) {
                        (Some(_), _) => Span::styled("✗ ", Style::default().fg(self.theme.error)),
                        (None, ActivityState::Thinking) => {
                            Span::styled("◐ ", self.state_style(entry.state))
                        }
                        (None, state) => Span::styled("● ", self.state_style(state)),
                    };
                    let label = Span::styled(
                        format!("{}:{} {}", entry.session, entry.index, entry.name),
                        Style::default().fg(self.theme.fg),
                    );
                    let mut spans = vec![icon, label];
                    if entry.queue_pending > 0 {
                        let marker = if entry.queue_playing { "▶" } else { "⏸" };
                        spans.push(Span::styled(
                            format!("  {} {}", marker, entry.queue_pending),
                            Style::default().fg(self.theme.dim),
                        ));
                    }
                    ListItem::new(Line::from(spans))
                })
                .collect()
        };

        let list = List::new(items)
            .block(
                Block::default()
                    .title(" Windows ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.dim)),
            )
            .highlight_style(
                Style::default()
                    .bg(Color::Rgb(50, 50, 50))
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");

        frame.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn field<'a>(&self, label: &'a str, value: String, style: Style) -> Line<'a> {
        Line::from(vec![
            Span::styled(label, Style::default().fg(self.theme.dim)),
            Span::styled(value, style),
        ])
    }

    fn render_detail_pane(&self, frame: &mut Frame, area: Rect) {
        let plain = Style::default().fg(self.theme.fg);
        let content = if let Some(entry) = self.selected() {
            let state = if entry.stale {
                format!("{:?} (stale)", entry.state)
            } else {
                format!("{:?}", entry.state)
            };
            let context = entry
                .context_remaining_percent
                .map(|p| format!("{}%", p))
                .unwrap_or_else(|| "-".to_string());
            let permissions = match entry.permission_mode {
                Some(PermissionMode::Default) => "default",
                Some(PermissionMode::Elevated) => "auto-accept / plan",
                Some(PermissionMode::SkipPermissions) => "bypass",
                None => "-",
            };
            let queue = format!(
                "{} pending, {}",
                entry.queue_pending,
                if entry.queue_playing { "playing" } else { "paused" }
            );

            let mut lines = vec![
                self.field("Window: ", format!("{}:{} ({})", entry.session, entry.index, entry.window_id), plain),
                self.field("Name: ", entry.name.clone(), plain),
                self.field("State: ", state, self.state_style(entry.state)),
                self.field("Context left: ", context, plain),
                self.field("Permissions: ", permissions.to_string(), plain),
                self.field("Last output: ", format!("{}s ago", entry.activity_age_secs), plain),
                self.field(
                    "Screen unchanged: ",
                    entry
                        .output_age_secs
                        .map(|s| format!("{}s", s))
                        .unwrap_or_else(|| "-".to_string()),
                    plain,
                ),
                self.field("Queue: ", queue, plain),
            ];
            if let Some(error) = &entry.error {
                lines.push(self.field(
                    "Poll error: ",
                    error.clone(),
                    Style::default().fg(self.theme.error),
                ));
            }
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(
                "Enter: attach │ s: send │ i: interrupt │ p: play/pause queue",
                Style::default().fg(self.theme.dim),
            )));
            lines
        } else {
            vec![Line::from(Span::styled(
                "No window selected",
                Style::default().fg(self.theme.dim),
            ))]
        };

        let detail = Paragraph::new(content).block(
            Block::default()
                .title(" Details ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(detail, area);
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let help_text =
            " q: Quit │ j/k: Navigate │ Enter: Attach │ s: Send │ i: Interrupt │ p: Queue │ n: New │ d: Close ";

        let content = match &self.status_message {
            Some(msg) => Line::from(Span::styled(
                format!(" {} ", msg),
                Style::default().fg(self.theme.error),
            )),
            None => Line::from(Span::styled(help_text, Style::default().fg(self.theme.dim))),
        };

        let footer = Paragraph::new(content).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(footer, area);
    }

    fn render_compose_dialog(&self, frame: &mut Frame) {
        let area = centered_rect(60, 20, frame.area());
        frame.render_widget(Clear, area);

        let title = self
            .selected()
            .map(|e| format!(" Send to {}:{} ", e.session, e.index))
            .unwrap_or_else(|| " Send ".to_string());
        let block = Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.accent));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let text = vec![
            Line::from(""),
            Line::from(Span::styled(
                format!("▶ {}_", self.input_buffer),
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Enter to send, Esc to cancel. Sending pauses the window's queue.",
                Style::default().fg(self.theme.dim),
            )),
        ];
        frame.render_widget(Paragraph::new(text), inner);
    }

    fn render_confirm_dialog(&self, frame: &mut Frame) {
        let area = centered_rect(50, 20, frame.area());
        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(" Close Window ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.error));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let label = self
            .selected()
            .map(|e| format!("{}:{} {}", e.session, e.index, e.name))
            .unwrap_or_else(|| "unknown".to_string());

        let text = vec![
            Line::from(""),
            Line::from(Span::styled(
                format!("Close window '{}'?", label),
                Style::default().fg(self.theme.fg),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Its process is killed and its queue dropped.",
                Style::default().fg(self.theme.warning),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Press 'y' to confirm, 'n' or Esc to cancel",
                Style::default().fg(self.theme.dim),
            )),
        ];
        frame.render_widget(Paragraph::new(text), inner);
    }
}

/// Helper function to create a centered rectangle
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
