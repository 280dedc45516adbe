use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::MuxError;
use crate::relay::Relay;
use crate::tmux::{TmuxWindow, WindowTarget};

/// Keeps one polling task per open window so queues advance without a client
/// watching. A slow or hung window only delays its own task.
pub struct Poller {
    relay: Arc<Relay>,
    interval: Duration,
    tasks: HashMap<WindowTarget, JoinHandle<()>>,
}

impl Poller {
    pub fn new(relay: Arc<Relay>, interval: Duration) -> Self {
        Self {
            relay,
            interval,
            tasks: HashMap::new(),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(interval_ms = self.interval.as_millis() as u64, "poller started");
        loop {
            match self.relay.all_windows().await {
                Ok(windows) => self.reconcile(&windows),
                Err(e) => warn!(error = %e, "failed to list windows"),
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Start tasks for new windows and stop tasks whose window is gone, along
    /// with whatever the relay still holds for it
    fn reconcile(&mut self, windows: &[TmuxWindow]) {
        let live: HashSet<WindowTarget> = windows.iter().map(TmuxWindow::target).collect();
        self.relay.forget(|t| live.contains(t));

        self.tasks.retain(|target, task| {
            let keep = live.contains(target) && !task.is_finished();
            if !keep {
                debug!(%target, "stopping window poll");
                task.abort();
            }
            keep
        });

        for target in live {
            if self.tasks.contains_key(&target) {
                continue;
            }
            debug!(%target, "starting window poll");
            let task = tokio::spawn(poll_window(self.relay.clone(), target.clone(), self.interval));
            self.tasks.insert(target, task);
        }
    }

    #[cfg(test)]
    fn watched(&self) -> Vec<WindowTarget> {
        let mut targets: Vec<WindowTarget> = self.tasks.keys().cloned().collect();
        targets.sort();
        targets
    }
}

async fn poll_window(relay: Arc<Relay>, target: WindowTarget, interval: Duration) {
    loop {
        match relay.poll(&target).await {
            Ok(_) => {}
            Err(MuxError::NotFound(_)) => {
                debug!(%target, "window gone, poll task exiting");
                return;
            }
            Err(e) => debug!(%target, error = %e, "poll failed"),
        }
        tokio::time::sleep(interval).await;
    }
}
