use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::{MuxError, MuxResult};
use crate::tmux::{ActivityState, InputDispatcher, Observation, Payload, WindowTarget};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Insertion sequence, unique within the window's queue
    pub id: u64,
    pub text: String,
    pub done: bool,
}

/// Client-supplied item when replacing a whole queue
#[derive(Debug, Clone, Deserialize)]
pub struct QueueDraft {
    pub text: String,
    #[serde(default)]
    pub done: bool,
}

/// Pending commands for one window
#[derive(Debug, Clone, Default, Serialize)]
pub struct WindowQueue {
    pub items: Vec<QueueItem>,
    pub playing: bool,
    #[serde(skip)]
    next_id: u64,
    /// Item currently being sent
    #[serde(skip)]
    in_flight: Option<u64>,
    #[serde(skip)]
    last_dispatch: Option<Instant>,
}

impl WindowQueue {
    fn push(&mut self, text: String, done: bool) -> QueueItem {
        self.next_id += 1;
        let item = QueueItem {
            id: self.next_id,
            text,
            done,
        };
        self.items.push(item.clone());
        item
    }

    /// First item not yet sent
    pub fn head(&self) -> Option<&QueueItem> {
        self.items.iter().find(|i| !i.done)
    }

    pub fn pending(&self) -> usize {
        self.items.iter().filter(|i| !i.done).count()
    }
}

/// Per-window FIFO that feeds the dispatcher whenever the window has been
/// idle long enough.
pub struct QueueScheduler {
    queues: Mutex<HashMap<WindowTarget, WindowQueue>>,
    /// Minimum continuous idleness, and minimum gap after our own dispatch
    debounce: Duration,
}

impl QueueScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            debounce,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WindowTarget, WindowQueue>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, target: &WindowTarget) -> WindowQueue {
        self.lock().get(target).cloned().unwrap_or_default()
    }

    pub fn push(&self, target: &WindowTarget, text: String) -> MuxResult<QueueItem> {
        if text.trim().is_empty() {
            return Err(MuxError::InvalidTarget("queue item is empty".to_string()));
        }
        Ok(self.lock().entry(target.clone()).or_default().push(text, false))
    }

    pub fn remove(&self, target: &WindowTarget, id: u64) -> MuxResult<()> {
        let mut queues = self.lock();
        let queue = queues
            .get_mut(target)
            .ok_or_else(|| MuxError::NotFound(format!("queue for {}", target)))?;
        let before = queue.items.len();
        queue.items.retain(|i| i.id != id);
        if queue.items.len() == before {
            return Err(MuxError::NotFound(format!("queue item {} in {}", id, target)));
        }
        Ok(())
    }

    /// Replace every item; ids are reassigned, the play flag is kept
    pub fn replace(&self, target: &WindowTarget, drafts: Vec<QueueDraft>) -> WindowQueue {
        let mut queues = self.lock();
        let queue = queues.entry(target.clone()).or_default();
        queue.items.clear();
        for draft in drafts.into_iter().filter(|d| !d.text.trim().is_empty()) {
            queue.push(draft.text, draft.done);
        }
        queue.clone()
    }

    pub fn clear_done(&self, target: &WindowTarget) -> WindowQueue {
        let mut queues = self.lock();
        let queue = queues.entry(target.clone()).or_default();
        queue.items.retain(|i| !i.done);
        queue.clone()
    }

    pub fn set_playing(&self, target: &WindowTarget, playing: bool) -> WindowQueue {
        let mut queues = self.lock();
        let queue = queues.entry(target.clone()).or_default();
        queue.playing = playing;
        queue.clone()
    }

    /// Called for input sent outside the queue so the two do not interleave
    pub fn pause(&self, target: &WindowTarget) {
        if let Some(queue) = self.lock().get_mut(target) {
            if queue.playing {
                info!(%target, "manual input, pausing queue");
                queue.playing = false;
            }
        }
    }

    /// Drop the queue of a window that went away
    pub fn forget(&self, target: &WindowTarget) {
        self.lock().remove(target);
    }

    /// Keep only the queues whose window passes `keep`
    pub fn retain(&self, keep: impl Fn(&WindowTarget) -> bool) {
        self.lock().retain(|t, _| keep(t));
    }

    pub fn rename_session(&self, from: &str, to: &str) {
        let mut queues = self.lock();
        let moved: Vec<WindowTarget> = queues.keys().filter(|t| t.session == from).cloned().collect();
        for old in moved {
            if let Some(queue) = queues.remove(&old) {
                let new = WindowTarget {
                    session: to.to_string(),
                    index: old.index,
                };
                queues.insert(new, queue);
            }
        }
    }

    /// Claim the head item if the window is ready for it
    fn claim(&self, target: &WindowTarget, observation: &Observation, now: Instant) -> Option<QueueItem> {
        let mut queues = self.lock();
        let queue = queues.get_mut(target)?;
        if !queue.playing || queue.in_flight.is_some() {
            return None;
        }
        if observation.state != ActivityState::Idle || observation.idle_for(now) < self.debounce {
            return None;
        }
        if queue
            .last_dispatch
            .is_some_and(|at| now.saturating_duration_since(at) < self.debounce)
        {
            return None;
        }

        let item = queue.head()?.clone();
        queue.in_flight = Some(item.id);
        queue.last_dispatch = Some(now);
        Some(item)
    }

    /// One scheduling step for a window, driven by a fresh observation.
    ///
    /// Returns the item that was sent, if any. A failed send leaves the item
    /// pending and pauses the queue.
    pub async fn tick(
        &self,
        target: &WindowTarget,
        observation: &Observation,
        now: Instant,
        dispatcher: &InputDispatcher,
    ) -> MuxResult<Option<QueueItem>> {
        let Some(item) = self.claim(target, observation, now) else {
            return Ok(None);
        };

        let result = dispatcher
            .send(target, &Payload::Text(item.text.clone()))
            .await;

        let mut queues = self.lock();
        let queue = queues.entry(target.clone()).or_default();
        queue.in_flight = None;
        match result {
            Ok(()) => {
                if let Some(sent) = queue.items.iter_mut().find(|i| i.id == item.id) {
                    sent.done = true;
                }
                info!(%target, id = item.id, remaining = queue.pending(), "dispatched queue item");
                Ok(Some(item))
            }
            Err(e) => {
                queue.playing = false;
                warn!(%target, id = item.id, error = %e, "queue dispatch failed, pausing");
                Err(e)
            }
        }
    }
}
