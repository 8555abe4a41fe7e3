//! Per-axis "previous move finished" tracking.

use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, time::sleep};
use tracing::debug;
use uuid::Uuid;

use crate::protocol::Axis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MonitorState {
    token: Uuid,
    completed: bool,
}

/// Tracks whether the last movement sent on one axis has finished.
///
/// Arming mints a fresh token and starts a fallback timer; the timer may only complete
/// the monitor if its token is still current.
pub struct MovementMonitor {
    axis: Axis,
    fallback: Duration,
    state: watch::Sender<MonitorState>,
}

impl MovementMonitor {
    /// Monitor for `axis`, initially completed.
    pub fn new(axis: Axis, fallback: Duration) -> Arc<Self> {
        let (state, _) = watch::channel(MonitorState {
            token: Uuid::nil(),
            completed: true,
        });
        Arc::new(Self {
            axis,
            fallback,
            state,
        })
    }

    /// Whether the axis is idle.
    pub fn is_completed(&self) -> bool {
        self.state.borrow().completed
    }

    /// Resolve once the axis is idle.
    pub async fn wait_completed(&self) {
        let mut receiver = self.state.subscribe();
        let _ = receiver.wait_for(|state| state.completed).await;
    }

    /// Mark a movement in flight and start its fallback timer.
    pub fn arm(self: &Arc<Self>) -> Uuid {
        let token = Uuid::new_v4();
        self.state.send_replace(MonitorState {
            token,
            completed: false,
        });

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            sleep(monitor.fallback).await;
            if monitor.complete_token(token) {
                debug!(axis = ?monitor.axis, "movement unconfirmed; releasing axis after fallback");
            }
        });
        token
    }

    /// Completion reported by the machine.
    pub fn complete(&self) {
        self.state.send_if_modified(|state| {
            let changed = !state.completed;
            state.completed = true;
            changed
        });
    }

    fn complete_token(&self, token: Uuid) -> bool {
        self.state.send_if_modified(|state| {
            if state.token == token && !state.completed {
                state.completed = true;
                true
            } else {
                false
            }
        })
    }
}
