//! Ambient connection bookkeeping — logs opens/closes and retains recently
//! closed entries briefly for diagnostics, the way the teacher's own
//! tracker does, just without the actor mailbox: nothing here needs
//! single-owner serialization, so a plain mutex kept outside any `.await`
//! span is simpler than spinning up another actor for it.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::model::SessionState;

struct StreamInfo {
    id: Uuid,
    state: SessionState,
    opened_at: Instant,
    closed_at: Option<Instant>,
}

/// Closed entries older than this are dropped on the next sweep.
const RETENTION: Duration = Duration::from_secs(4);
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

pub struct ConnectionTracker {
    items: Mutex<Vec<StreamInfo>>,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        ConnectionTracker {
            items: Mutex::new(Vec::new()),
        }
    }
}

impl ConnectionTracker {
    pub fn spawn_with_sweeper() -> std::sync::Arc<Self> {
        let tracker = std::sync::Arc::new(Self::default());
        let weak = std::sync::Arc::downgrade(&tracker);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let Some(tracker) = weak.upgrade() else {
                    break;
                };
                tracker.sweep().await;
            }
        });
        tracker
    }

    pub async fn opened(&self, id: Uuid, state: SessionState) {
        info!(connection = %id, state = %state, "connection opened");
        self.items.lock().await.push(StreamInfo {
            id,
            state,
            opened_at: Instant::now(),
            closed_at: None,
        });
    }

    pub async fn transition(&self, id: Uuid, state: SessionState) {
        let mut items = self.items.lock().await;
        if let Some(entry) = items.iter_mut().find(|e| e.id == id) {
            entry.state = state;
        }
    }

    pub async fn closed(&self, id: Uuid) {
        let mut items = self.items.lock().await;
        if let Some(entry) = items.iter_mut().find(|e| e.id == id) {
            entry.closed_at = Some(Instant::now());
        }
    }

    async fn sweep(&self) {
        let mut items = self.items.lock().await;
        items.retain(|e| e.closed_at.map(|t| t.elapsed() < RETENTION).unwrap_or(true));
    }
}
