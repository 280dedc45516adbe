use crossterm::event::KeyEvent;

use crate::relay::DashboardEntry;
use crate::tmux::WindowTarget;

/// Actions that can be dispatched through the dashboard
#[derive(Debug, Clone)]
pub enum Action {
    /// A key was pressed
    KeyPress(KeyEvent),
    /// Fresh poll of every window
    DashboardUpdated(Vec<DashboardEntry>),
    /// An error occurred
    Error(String),
    /// Request to quit the application
    Quit,
    /// Suspend the dashboard and attach this terminal to a window
    Attach(WindowTarget),
    /// Send a line of text to a window
    SendText(WindowTarget, String),
    /// Send Ctrl-C
    Interrupt(WindowTarget),
    /// Start or pause a window's queue
    SetPlaying(WindowTarget, bool),
    /// Open a window in a session
    NewWindow(String),
    CloseWindow(WindowTarget),
}
