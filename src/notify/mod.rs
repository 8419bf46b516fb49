mod watcher;

pub use watcher::{pending_watcher, PendingWatcher};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::db::Pass;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PassEvent {
    #[serde(rename_all = "camelCase")]
    NewPass {
        pass_id: String,
        code: String,
        name: String,
        pending: bool,
    },
    PendingCountChanged { count: usize },
}

impl PassEvent {
    pub fn new_pass(pass: &Pass) -> Self {
        PassEvent::NewPass {
            pass_id: pass.id.clone(),
            code: pass.code.clone(),
            name: pass.name.clone(),
            pending: pass.status == crate::db::PassStatus::Pending,
        }
    }
}

/// Best-effort fan-out. Slow subscribers lose the oldest events; the
/// pending watcher polls the store for an accurate count.
#[derive(Debug, Clone)]
pub struct PassNotifier {
    sender: broadcast::Sender<PassEvent>,
}

impl PassNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PassEvent> {
        self.sender.subscribe()
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: PassEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for PassNotifier {
    fn default() -> Self {
        Self::new()
    }
}
