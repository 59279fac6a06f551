//! Liveness Probe
//!
//! The relay service keeps a persistent notification up for as long as it
//! runs. Its presence in the active notification list is the only signal
//! available without a handshake, so it is treated as best effort: a stale
//! list can report a dead service as alive or the other way round.

use std::sync::Arc;
use tracing::debug;

/// Notification id used by the relay service's foreground indicator
pub const DEFAULT_NOTIFICATION_ID: i32 = 1;

/// Environment view of currently posted notifications
pub trait NotificationSource: Send + Sync {
    /// Ids of all active notifications
    fn active_notification_ids(&self) -> Vec<i32>;
}

/// Answers "is the relay service running?"
#[derive(Clone)]
pub struct LivenessProbe {
    source: Arc<dyn NotificationSource>,
    notification_id: i32,
}

impl LivenessProbe {
    pub fn new(source: Arc<dyn NotificationSource>, notification_id: i32) -> Self {
        Self {
            source,
            notification_id,
        }
    }

    pub fn is_active(&self) -> bool {
        let active = self
            .source
            .active_notification_ids()
            .contains(&self.notification_id);
        debug!("Liveness probe: service {}", if active { "active" } else { "inactive" });
        active
    }

    pub fn notification_id(&self) -> i32 {
        self.notification_id
    }
}

impl std::fmt::Debug for LivenessProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessProbe")
            .field("notification_id", &self.notification_id)
            .finish()
    }
}
