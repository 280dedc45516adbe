use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::error::{MuxError, MuxResult};
use crate::queue::{QueueDraft, QueueItem, QueueScheduler, WindowQueue};
use crate::tmux::{
    capture, ActivityDetector, ActivityState, ConversationTurn, InputDispatcher, Markers,
    Observation, Payload, PermissionMode, ProcessRunner, Snapshot, TmuxClient, TmuxSession,
    TmuxWindow, TurnParser, WindowTarget,
};

/// Snapshot of one window together with what the detector made of it
#[derive(Debug, Clone, Serialize)]
pub struct WindowOutput {
    #[serde(flatten)]
    pub snapshot: Snapshot,
    pub activity: Observation,
    pub queue: WindowQueue,
}

/// One row of the consolidated dashboard
#[derive(Debug, Clone, Serialize)]
pub struct DashboardEntry {
    pub session: String,
    pub index: u32,
    pub window_id: String,
    pub name: String,
    pub active: bool,
    pub state: ActivityState,
    pub stale: bool,
    pub context_remaining_percent: Option<u8>,
    pub permission_mode: Option<PermissionMode>,
    /// Seconds since tmux last saw output in the window
    pub activity_age_secs: u64,
    /// Seconds the captured text has been unchanged, when it was ever captured
    pub output_age_secs: Option<u64>,
    pub queue_pending: usize,
    pub queue_playing: bool,
    /// Set when this round's poll failed; the other fields are then the last known values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DashboardEntry {
    pub fn target(&self) -> WindowTarget {
        WindowTarget {
            session: self.session.clone(),
            index: self.index,
        }
    }
}

/// Ties the registry, dispatcher, detector, parser and queues together.
///
/// The only state held here is derived: the last observation per window and
/// the queues. Everything about sessions and windows is asked of tmux.
pub struct Relay {
    client: TmuxClient,
    runner: Arc<dyn ProcessRunner>,
    dispatcher: InputDispatcher,
    detector: ActivityDetector,
    parser: TurnParser,
    queues: QueueScheduler,
    observations: Mutex<HashMap<WindowTarget, Observation>>,
    default_session: String,
    work_dir: PathBuf,
    capture_lines: usize,
}

impl Relay {
    pub fn new(
        config: &RelayConfig,
        runner: Arc<dyn ProcessRunner>,
        markers: &Markers,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            client: TmuxClient::new(runner.clone(), config.tmux.clone()),
            dispatcher: InputDispatcher::new(runner.clone()),
            runner,
            detector: ActivityDetector::new(markers, config.stale_grace())?,
            parser: TurnParser::new(markers)?,
            queues: QueueScheduler::new(config.idle_debounce()),
            observations: Mutex::new(HashMap::new()),
            default_session: config.session.clone(),
            work_dir: config.work_dir(),
            capture_lines: config.capture_lines,
        })
    }

    pub fn client(&self) -> &TmuxClient {
        &self.client
    }

    pub fn default_session(&self) -> &str {
        &self.default_session
    }

    fn observations(&self) -> MutexGuard<'_, HashMap<WindowTarget, Observation>> {
        self.observations.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_observation(&self, target: &WindowTarget) -> Option<Observation> {
        self.observations().get(target).cloned()
    }

    /// Drop derived state for windows that no longer exist
    pub fn forget(&self, keep: impl Fn(&WindowTarget) -> bool) {
        self.observations().retain(|t, _| keep(t));
        self.dispatcher.retain(&keep);
        self.queues.retain(&keep);
    }

    // Sessions

    pub async fn sessions(&self) -> MuxResult<Vec<TmuxSession>> {
        self.client.list_sessions().await
    }

    pub async fn create_session(&self, name: &str) -> MuxResult<()> {
        self.client.create_session(name, &self.work_dir).await
    }

    pub async fn ensure_default_session(&self) -> MuxResult<bool> {
        let created = self
            .client
            .ensure_session(&self.default_session, &self.work_dir)
            .await?;
        if created {
            info!(session = %self.default_session, dir = %self.work_dir.display(), "created default session");
        }
        Ok(created)
    }

    pub async fn switch_session(&self, name: &str) -> MuxResult<()> {
        self.client.switch_session(name).await
    }

    pub async fn rename_session(&self, name: &str, new_name: &str) -> MuxResult<()> {
        self.client.rename_session(name, new_name).await?;
        {
            let mut observations = self.observations();
            let moved: Vec<WindowTarget> = observations
                .keys()
                .filter(|t| t.session == name)
                .cloned()
                .collect();
            for old in moved {
                if let Some(obs) = observations.remove(&old) {
                    observations.insert(
                        WindowTarget {
                            session: new_name.to_string(),
                            index: old.index,
                        },
                        obs,
                    );
                }
            }
        }
        self.queues.rename_session(name, new_name);
        Ok(())
    }

    pub async fn kill_session(&self, name: &str) -> MuxResult<()> {
        self.client.kill_session(name).await?;
        self.forget(|t| t.session != name);
        Ok(())
    }

    // Windows

    pub async fn windows(&self, session: &str) -> MuxResult<Vec<TmuxWindow>> {
        self.client.list_windows(session).await
    }

    /// Every window of every session. Sessions that vanish mid-listing are skipped.
    pub async fn all_windows(&self) -> MuxResult<Vec<TmuxWindow>> {
        let sessions = self.client.list_sessions().await?;
        let listings = join_all(sessions.iter().map(|s| self.client.list_windows(&s.name))).await;

        let mut windows = Vec::new();
        for listing in listings {
            match listing {
                Ok(mut found) => windows.append(&mut found),
                Err(MuxError::NotFound(session)) => debug!(%session, "session went away while listing"),
                Err(MuxError::InvalidTarget(reason)) => debug!(%reason, "skipping unaddressable session"),
                Err(e) => return Err(e),
            }
        }
        Ok(windows)
    }

    /// Window the session currently shows, resolved explicitly
    pub async fn active_window(&self, session: &str) -> MuxResult<WindowTarget> {
        let windows = self.client.list_windows(session).await?;
        windows
            .iter()
            .find(|w| w.active)
            .or_else(|| windows.first())
            .map(TmuxWindow::target)
            .ok_or_else(|| MuxError::NotFound(format!("{} has no windows", session)))
    }

    pub async fn create_window(&self, session: &str, name: Option<&str>) -> MuxResult<TmuxWindow> {
        self.client.create_window(session, name, &self.work_dir).await
    }

    pub async fn select_window(&self, target: &WindowTarget) -> MuxResult<()> {
        self.client.select_window(target).await
    }

    /// A missing or blank name hands naming back to tmux
    pub async fn rename_window(&self, target: &WindowTarget, name: Option<&str>) -> MuxResult<()> {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => self.client.rename_window(target, name).await,
            None => self.client.reset_window_name(target).await,
        }
    }

    pub async fn close_window(&self, target: &WindowTarget) -> MuxResult<()> {
        self.client.close_window(target).await?;
        self.forget(|t| t != target);
        Ok(())
    }

    // Output

    /// Capture, update the window's observation and give its queue a chance to run
    pub async fn poll(&self, target: &WindowTarget) -> MuxResult<(Snapshot, Observation)> {
        let snapshot = capture(self.runner.as_ref(), target, self.capture_lines).await?;
        let now = Instant::now();
        let observation = {
            let mut observations = self.observations();
            let observation =
                self.detector
                    .observe(observations.get(target), &snapshot.normalized, now);
            observations.insert(target.clone(), observation.clone());
            observation
        };

        // failures are logged and pause the queue; the poll itself succeeded
        if let Ok(Some(item)) = self
            .queues
            .tick(target, &observation, now, &self.dispatcher)
            .await
        {
            debug!(%target, id = item.id, "queue advanced");
        }

        Ok((snapshot, observation))
    }

    pub async fn output(&self, target: &WindowTarget) -> MuxResult<WindowOutput> {
        let (snapshot, activity) = self.poll(target).await?;
        Ok(WindowOutput {
            snapshot,
            activity,
            queue: self.queues.get(target),
        })
    }

    pub async fn turns(&self, target: &WindowTarget) -> MuxResult<Vec<ConversationTurn>> {
        let snapshot = capture(self.runner.as_ref(), target, self.capture_lines).await?;
        Ok(self.parser.parse(&snapshot))
    }

    // Input

    /// Manual input; pauses the window's queue so the two never interleave
    pub async fn send(&self, target: &WindowTarget, payload: &Payload) -> MuxResult<()> {
        self.queues.pause(target);
        self.dispatcher.send(target, payload).await
    }

    // Queue

    pub fn queue(&self, target: &WindowTarget) -> WindowQueue {
        self.queues.get(target)
    }

    pub fn enqueue(&self, target: &WindowTarget, text: String) -> MuxResult<QueueItem> {
        self.queues.push(target, text)
    }

    pub fn dequeue(&self, target: &WindowTarget, id: u64) -> MuxResult<()> {
        self.queues.remove(target, id)
    }

    pub fn replace_queue(&self, target: &WindowTarget, drafts: Vec<QueueDraft>) -> WindowQueue {
        self.queues.replace(target, drafts)
    }

    pub fn clear_done(&self, target: &WindowTarget) -> WindowQueue {
        self.queues.clear_done(target)
    }

    pub fn set_playing(&self, target: &WindowTarget, playing: bool) -> WindowQueue {
        info!(%target, playing, "queue play state");
        self.queues.set_playing(target, playing)
    }

    // Dashboard

    /// Poll every window concurrently. A window whose poll fails keeps its
    /// last known observation and carries the error.
    pub async fn dashboard(&self) -> MuxResult<Vec<DashboardEntry>> {
        let windows = self.all_windows().await?;
        let live: HashSet<WindowTarget> = windows.iter().map(TmuxWindow::target).collect();
        self.forget(|t| live.contains(t));

        let polls = join_all(windows.iter().map(|w| async move {
            let target = w.target();
            let result = self.poll(&target).await;
            (target, result)
        }))
        .await;

        let now = Instant::now();
        let now_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(windows
            .iter()
            .zip(polls)
            .map(|(window, (target, result))| {
                let (observation, error) = match result {
                    Ok((_, observation)) => (Some(observation), None),
                    Err(e) => {
                        debug!(%target, error = %e, "dashboard poll failed");
                        (self.last_observation(&target), Some(e.to_string()))
                    }
                };
                let queue = self.queues.get(&target);
                DashboardEntry {
                    session: window.session.clone(),
                    index: window.index,
                    window_id: window.id.clone(),
                    name: window.name.clone(),
                    active: window.active,
                    state: observation.as_ref().map(|o| o.state).unwrap_or_default(),
                    stale: observation.as_ref().is_some_and(|o| o.stale),
                    context_remaining_percent: observation
                        .as_ref()
                        .and_then(|o| o.context_remaining_percent),
                    permission_mode: observation.as_ref().and_then(|o| o.permission_mode),
                    activity_age_secs: now_unix.saturating_sub(window.activity_at),
                    output_age_secs: observation.as_ref().map(|o| o.output_age(now).as_secs()),
                    queue_pending: queue.pending(),
                    queue_playing: queue.playing,
                    error,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::fake::FakeRunner;

    const IDLE: &str = "● Done.\n\n> \n  ? for shortcuts\n";
    const WORKING: &str = "● Editing.\n✻ Pondering… (esc to interrupt)\n> \n";

    fn relay_with(fake: &Arc<FakeRunner>, config: RelayConfig) -> Relay {
        Relay::new(&config, fake.clone(), &Markers::default()).unwrap()
    }

    fn relay(fake: &Arc<FakeRunner>) -> Relay {
        relay_with(fake, RelayConfig::default())
    }

    fn target(index: u32) -> WindowTarget {
        WindowTarget::new("mobile", index).unwrap()
    }

    #[tokio::test]
    async fn test_manual_send_pauses_queue() {
        let fake = Arc::new(FakeRunner::new());
        let relay = relay(&fake);
        let t = target(0);
        relay.enqueue(&t, "A".to_string()).unwrap();
        relay.set_playing(&t, true);

        relay.send(&t, &Payload::Text("ls".to_string())).await.unwrap();

        assert!(!relay.queue(&t).playing);
        assert_eq!(relay.queue(&t).pending(), 1);
    }

    #[tokio::test]
    async fn test_poll_feeds_queue_when_idle() {
        let fake = Arc::new(FakeRunner::new());
        fake.reply("capture-pane", IDLE);
        let relay = relay_with(
            &fake,
            RelayConfig {
                idle_debounce_ms: 0,
                ..RelayConfig::default()
            },
        );
        let t = target(1);
        relay.enqueue(&t, "run the tests".to_string()).unwrap();
        relay.set_playing(&t, true);

        let (snapshot, observation) = relay.poll(&t).await.unwrap();

        assert_eq!(observation.state, ActivityState::Idle);
        assert!(snapshot.normalized.starts_with("● Done."));
        assert_eq!(fake.subcommands(), ["capture-pane", "send-keys", "send-keys"]);
        assert_eq!(fake.calls()[1].args.last().map(String::as_str), Some("run the tests"));
        assert_eq!(relay.queue(&t).pending(), 0);
    }

    #[tokio::test]
    async fn test_poll_does_not_feed_busy_window() {
        let fake = Arc::new(FakeRunner::new());
        fake.reply("capture-pane", WORKING);
        let relay = relay_with(
            &fake,
            RelayConfig {
                idle_debounce_ms: 0,
                ..RelayConfig::default()
            },
        );
        let t = target(1);
        relay.enqueue(&t, "next".to_string()).unwrap();
        relay.set_playing(&t, true);

        let (_, observation) = relay.poll(&t).await.unwrap();
        assert_eq!(observation.state, ActivityState::Working);
        assert_eq!(fake.subcommands(), ["capture-pane"]);
    }

    #[tokio::test]
    async fn test_dashboard_keeps_last_state_on_failed_poll() {
        let fake = Arc::new(FakeRunner::new());
        let relay = relay(&fake);
        let t = target(0);

        fake.reply("capture-pane", WORKING);
        relay.poll(&t).await.unwrap();

        fake.reply("list-sessions", "$0|1700000000|1|1|mobile\n");
        fake.reply("list-windows", "@1|0|1|1|1700000000|claude\n");
        fake.fail("capture-pane", 1, "server exited unexpectedly\n");
        let entries = relay.dashboard().await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target(), t);
        assert_eq!(entries[0].name, "claude");
        assert_eq!(entries[0].state, ActivityState::Working);
        assert!(entries[0].error.is_some());
    }

    #[tokio::test]
    async fn test_dashboard_reports_status_bar() {
        let fake = Arc::new(FakeRunner::new());
        let relay = relay(&fake);
        fake.reply("list-sessions", "$0|1700000000|1|1|mobile\n");
        fake.reply("list-windows", "@1|0|1|1|1700000000|claude\n");
        fake.reply(
            "capture-pane",
            "● Done.\n>\n  ⏵⏵ bypass permissions on · Context left until auto-compact: 7%\n",
        );

        let entries = relay.dashboard().await.unwrap();
        assert_eq!(entries[0].state, ActivityState::Idle);
        assert_eq!(entries[0].context_remaining_percent, Some(7));
        assert_eq!(entries[0].permission_mode, Some(PermissionMode::SkipPermissions));
        assert!(entries[0].error.is_none());
    }

    #[tokio::test]
    async fn test_closing_a_window_drops_its_queue() {
        let fake = Arc::new(FakeRunner::new());
        let relay = relay(&fake);
        let t = target(2);
        relay.enqueue(&t, "A".to_string()).unwrap();

        relay.close_window(&t).await.unwrap();
        assert!(relay.queue(&t).items.is_empty());
    }

    #[tokio::test]
    async fn test_blank_rename_resets_to_automatic() {
        let fake = Arc::new(FakeRunner::new());
        let relay = relay(&fake);
        relay.rename_window(&target(0), Some("  ")).await.unwrap();
        relay.rename_window(&target(0), Some("build")).await.unwrap();
        assert_eq!(fake.subcommands(), ["set-window-option", "rename-window"]);
    }

    #[tokio::test]
    async fn test_active_window_is_resolved_explicitly() {
        let fake = Arc::new(FakeRunner::new());
        fake.reply("list-windows", "@1|0|0|1|0|zsh\n@2|3|1|1|0|claude\n");
        let relay = relay(&fake);
        assert_eq!(relay.active_window("mobile").await.unwrap(), target(3));

        fake.reply("list-windows", "");
        assert!(matches!(
            relay.active_window("mobile").await,
            Err(MuxError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_session_carries_queues() {
        let fake = Arc::new(FakeRunner::new());
        let relay = relay(&fake);
        relay.enqueue(&target(0), "A".to_string()).unwrap();

        relay.rename_session("mobile", "desk").await.unwrap();
        let moved = WindowTarget::new("desk", 0).unwrap();
        assert_eq!(relay.queue(&moved).pending(), 1);
    }
}
