use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::runner::ProcessRunner;
use super::{exact_session, validate_session_name, TmuxSession, TmuxWindow, WindowTarget};
use crate::error::{MuxError, MuxResult};

const SESSION_FORMAT: &str =
    "#{session_id}|#{session_created}|#{session_attached}|#{session_windows}|#{session_name}";
const WINDOW_FORMAT: &str = "#{window_id}|#{window_index}|#{window_active}|#{automatic-rename}|#{window_activity}|#{window_name}";

/// Typed session/window registry over the tmux CLI.
///
/// Holds no copy of tmux state: every call is a fresh query. Window indices
/// may shift after `close_window`, so callers re-resolve targets from
/// `list_windows` after any mutation.
#[derive(Clone)]
pub struct TmuxClient {
    runner: Arc<dyn ProcessRunner>,
    /// Path to tmux binary, only used to build attach commands
    tmux_path: String,
}

impl TmuxClient {
    pub fn new(runner: Arc<dyn ProcessRunner>, tmux_path: impl Into<String>) -> Self {
        Self {
            runner,
            tmux_path: tmux_path.into(),
        }
    }

    /// Run a tmux command, classifying failures against `target`
    async fn tmux(&self, target: &str, args: &[&str]) -> MuxResult<String> {
        let output = self.runner.run(args, None).await?;
        if !output.success() {
            debug!(%target, stderr = %output.stderr.trim(), "tmux command failed");
            return Err(MuxError::from_tmux_stderr(target, &output.stderr));
        }
        Ok(output.stdout)
    }

    /// List all tmux sessions. A missing server means no sessions.
    pub async fn list_sessions(&self) -> MuxResult<Vec<TmuxSession>> {
        let stdout = match self.tmux("server", &["list-sessions", "-F", SESSION_FORMAT]).await {
            Ok(stdout) => stdout,
            Err(MuxError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(stdout.lines().filter_map(parse_session_line).collect())
    }

    pub async fn has_session(&self, name: &str) -> MuxResult<bool> {
        validate_session_name(name)?;
        match self.tmux(name, &["has-session", "-t", exact_session(name).as_str()]).await {
            Ok(_) => Ok(true),
            Err(MuxError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create a detached session sized for a phone screen
    pub async fn create_session(&self, name: &str, cwd: &Path) -> MuxResult<()> {
        validate_session_name(name)?;
        let cwd = cwd.to_string_lossy();
        self.tmux(
            name,
            &["new-session", "-d", "-s", name, "-x", "80", "-y", "50", "-c", &*cwd],
        )
        .await?;
        info!(session = %name, "created session");
        Ok(())
    }

    /// Create the session unless it already exists. Returns true if created.
    pub async fn ensure_session(&self, name: &str, cwd: &Path) -> MuxResult<bool> {
        if self.has_session(name).await? {
            return Ok(false);
        }
        self.create_session(name, cwd).await?;
        Ok(true)
    }

    pub async fn kill_session(&self, name: &str) -> MuxResult<()> {
        validate_session_name(name)?;
        self.tmux(name, &["kill-session", "-t", exact_session(name).as_str()])
            .await?;
        info!(session = %name, "killed session");
        Ok(())
    }

    /// Point attached clients at `name`. Fails with NotFound when no client is
    /// attached.
    pub async fn switch_session(&self, name: &str) -> MuxResult<()> {
        validate_session_name(name)?;
        self.tmux(name, &["switch-client", "-t", exact_session(name).as_str()])
            .await?;
        Ok(())
    }

    pub async fn rename_session(&self, name: &str, new_name: &str) -> MuxResult<()> {
        validate_session_name(name)?;
        validate_session_name(new_name)?;
        self.tmux(name, &["rename-session", "-t", exact_session(name).as_str(), new_name])
            .await?;
        info!(from = %name, to = %new_name, "renamed session");
        Ok(())
    }

    pub async fn list_windows(&self, session: &str) -> MuxResult<Vec<TmuxWindow>> {
        validate_session_name(session)?;
        let stdout = self
            .tmux(
                session,
                &["list-windows", "-t", exact_session(session).as_str(), "-F", WINDOW_FORMAT],
            )
            .await?;

        Ok(stdout
            .lines()
            .filter_map(|line| parse_window_line(session, line))
            .collect())
    }

    /// Create a window without changing the session's current window
    pub async fn create_window(
        &self,
        session: &str,
        name: Option<&str>,
        cwd: &Path,
    ) -> MuxResult<TmuxWindow> {
        validate_session_name(session)?;
        let target = format!("{}:", exact_session(session));
        let cwd = cwd.to_string_lossy();
        let mut args: Vec<&str> = vec![
            "new-window",
            "-d",
            "-P",
            "-F",
            WINDOW_FORMAT,
            "-t",
            target.as_str(),
            "-c",
            &*cwd,
        ];
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            args.extend(["-n", name]);
        }

        let stdout = self.tmux(session, &args).await?;
        let window = stdout
            .lines()
            .find_map(|line| parse_window_line(session, line))
            .ok_or_else(|| MuxError::Transient("new-window printed no window".to_string()))?;
        info!(session = %session, index = window.index, id = %window.id, "created window");
        Ok(window)
    }

    pub async fn select_window(&self, target: &WindowTarget) -> MuxResult<()> {
        self.tmux(&target.to_string(), &["select-window", "-t", target.tmux_target().as_str()])
            .await?;
        Ok(())
    }

    /// Set a manual name; this also turns off automatic renaming in tmux
    pub async fn rename_window(&self, target: &WindowTarget, name: &str) -> MuxResult<()> {
        if name.trim().is_empty() {
            return Err(MuxError::InvalidTarget(
                "window name is empty; reset to automatic naming instead".to_string(),
            ));
        }
        self.tmux(
            &target.to_string(),
            &["rename-window", "-t", target.tmux_target().as_str(), name],
        )
        .await?;
        Ok(())
    }

    /// Hand naming back to tmux rather than storing an empty name
    pub async fn reset_window_name(&self, target: &WindowTarget) -> MuxResult<()> {
        self.tmux(
            &target.to_string(),
            &[
                "set-window-option",
                "-t",
                target.tmux_target().as_str(),
                "automatic-rename",
                "on",
            ],
        )
        .await?;
        Ok(())
    }

    /// Close a window. Later windows in the same session may be renumbered.
    pub async fn close_window(&self, target: &WindowTarget) -> MuxResult<()> {
        self.tmux(&target.to_string(), &["kill-window", "-t", target.tmux_target().as_str()])
            .await?;
        info!(%target, "closed window");
        Ok(())
    }

    /// Get the command to attach to a window (for external execution)
    pub fn attach_command(&self, target: &WindowTarget) -> Vec<String> {
        vec![
            self.tmux_path.clone(),
            "attach-session".to_string(),
            "-t".to_string(),
            target.tmux_target(),
        ]
    }
}

fn parse_session_line(line: &str) -> Option<TmuxSession> {
    let parts: Vec<&str> = line.splitn(5, '|').collect();
    if parts.len() < 5 {
        return None;
    }

    Some(TmuxSession {
        id: parts[0].to_string(),
        created_at: parts[1].parse().unwrap_or(0),
        attached_clients: parts[2].parse().unwrap_or(0),
        windows: parts[3].parse().unwrap_or(0),
        name: parts[4].to_string(),
    })
}

fn parse_window_line(session: &str, line: &str) -> Option<TmuxWindow> {
    let parts: Vec<&str> = line.splitn(6, '|').collect();
    if parts.len() < 6 {
        return None;
    }

    Some(TmuxWindow {
        id: parts[0].to_string(),
        session: session.to_string(),
        index: parts[1].parse().ok()?,
        active: parts[2] == "1",
        auto_named: matches!(parts[3], "1" | "on"),
        activity_at: parts[4].parse().unwrap_or(0),
        name: parts[5].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::fake::FakeRunner;

    fn client(fake: &Arc<FakeRunner>) -> TmuxClient {
        TmuxClient::new(fake.clone(), "tmux")
    }

    #[tokio::test]
    async fn test_list_sessions_parses_names_with_separators() {
        let fake = Arc::new(FakeRunner::new());
        fake.reply("list-sessions", "$0|1700000000|1|3|mobile\n$1|1700000100|0|1|a|b\n");
        let sessions = client(&fake).list_sessions().await.unwrap();

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].name, "mobile");
        assert_eq!(sessions[0].windows, 3);
        assert_eq!(sessions[1].name, "a|b");
        assert_eq!(sessions[1].attached_clients, 0);
    }

    #[tokio::test]
    async fn test_no_server_means_no_sessions() {
        let fake = Arc::new(FakeRunner::new());
        fake.fail("list-sessions", 1, "no server running on /tmp/tmux-501/default\n");
        assert!(client(&fake).list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let fake = Arc::new(FakeRunner::new());
        fake.time_out("list-windows");
        let err = client(&fake).list_windows("mobile").await.unwrap_err();
        assert!(matches!(err, MuxError::Transient(_)));
    }

    #[tokio::test]
    async fn test_list_windows_tracks_auto_naming() {
        let fake = Arc::new(FakeRunner::new());
        fake.reply("list-windows", "@1|0|1|1|1700000000|zsh\n@4|1|0|0|1700000050|agent\n");
        let windows = client(&fake).list_windows("mobile").await.unwrap();

        assert_eq!(windows[0].id, "@1");
        assert!(windows[0].active);
        assert!(windows[0].auto_named);
        assert_eq!(windows[1].name, "agent");
        assert!(!windows[1].auto_named);
        assert_eq!(windows[1].target(), WindowTarget::new("mobile", 1).unwrap());

        let args = &fake.calls()[0].args;
        assert_eq!(args[..3], ["list-windows", "-t", "=mobile"]);
    }

    #[tokio::test]
    async fn test_missing_window_is_not_found() {
        let fake = Arc::new(FakeRunner::new());
        fake.fail("select-window", 1, "can't find window: 7\n");
        let target = WindowTarget::new("mobile", 7).unwrap();
        let err = client(&fake).select_window(&target).await.unwrap_err();
        assert!(matches!(err, MuxError::NotFound(ref t) if t == "mobile:7"));
    }

    #[tokio::test]
    async fn test_reset_name_reenables_automatic_rename() {
        let fake = Arc::new(FakeRunner::new());
        let target = WindowTarget::new("mobile", 1).unwrap();
        let c = client(&fake);

        c.rename_window(&target, "build").await.unwrap();
        c.reset_window_name(&target).await.unwrap();
        assert!(matches!(
            c.rename_window(&target, "  ").await,
            Err(MuxError::InvalidTarget(_))
        ));

        let calls = fake.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args, ["rename-window", "-t", "=mobile:1", "build"]);
        assert_eq!(
            calls[1].args,
            ["set-window-option", "-t", "=mobile:1", "automatic-rename", "on"]
        );
    }

    #[tokio::test]
    async fn test_create_window_is_detached_and_named() {
        let fake = Arc::new(FakeRunner::new());
        fake.reply("new-window", "@9|3|0|0|1700000000|tests\n");
        let window = client(&fake)
            .create_window("mobile", Some("tests"), Path::new("/work"))
            .await
            .unwrap();

        assert_eq!(window.index, 3);
        let args = &fake.calls()[0].args;
        assert!(args.contains(&"-d".to_string()));
        assert!(args.ends_with(&["-n".to_string(), "tests".to_string()]));
    }

    #[tokio::test]
    async fn test_ensure_session_only_creates_when_missing() {
        let fake = Arc::new(FakeRunner::new());
        fake.fail("has-session", 1, "can't find session: mobile\n");
        let c = client(&fake);

        assert!(c.ensure_session("mobile", Path::new("/work")).await.unwrap());
        assert!(!c.ensure_session("mobile", Path::new("/work")).await.unwrap());
        assert_eq!(
            fake.subcommands(),
            ["has-session", "new-session", "has-session"]
        );
    }

    /// Closing window 1 renumbers nothing on its own, but a listing taken
    /// afterwards is the only valid source of indices. Acting on a cached
    /// index is a caller error that surfaces as NotFound or hits a different
    /// window.
    #[tokio::test]
    async fn test_close_window_requires_reresolving_indices() {
        let fake = Arc::new(FakeRunner::new());
        fake.reply("list-windows", "@1|0|1|1|0|zsh\n@2|1|0|1|0|zsh\n@3|2|0|1|0|zsh\n");
        // after closing 1 with renumber-windows on, @3 moves to index 1
        fake.reply("list-windows", "@1|0|1|1|0|zsh\n@3|1|0|1|0|zsh\n");
        fake.fail("send-keys", 1, "can't find window: 2\n");
        let c = client(&fake);

        let before = c.list_windows("mobile").await.unwrap();
        let cached = before.iter().find(|w| w.id == "@3").unwrap().target();
        c.close_window(&WindowTarget::new("mobile", 1).unwrap())
            .await
            .unwrap();

        let after = c.list_windows("mobile").await.unwrap();
        assert_eq!(after.len(), 2);
        assert!(after.iter().all(|w| w.id != "@2"));
        let resolved = after.iter().find(|w| w.id == "@3").unwrap().target();
        assert_ne!(resolved, cached);
        assert_eq!(resolved.index, 1);

        // the stale index no longer exists
        let stale = c
            .tmux(&cached.to_string(), &["send-keys", "-t", cached.tmux_target().as_str(), "Enter"])
            .await;
        assert!(matches!(stale, Err(MuxError::NotFound(_))));
    }

    #[test]
    fn test_attach_command() {
        let fake = Arc::new(FakeRunner::new());
        let target = WindowTarget::new("mobile", 2).unwrap();
        assert_eq!(
            client(&fake).attach_command(&target),
            ["tmux", "attach-session", "-t", "=mobile:2"]
        );
    }
}
