use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;

const WATCHDOG: Duration = Duration::from_secs(30);

/// Per-connection in-flight-operation guard. A second `begin` for the same
/// `(connection, operation)` pair before `end` is refused, so duplicated
/// client events cannot double-apply. The watchdog releases stuck tokens
/// after 30 s; it never reverses side effects.
#[derive(Default)]
pub struct RequestDeduper {
    inflight: Arc<DashMap<(String, String), JoinHandle<()>>>,
}

impl RequestDeduper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, conn_id: &str, op: &str) -> bool {
        let key = (conn_id.to_string(), op.to_string());
        if self.inflight.contains_key(&key) {
            return false;
        }
        let map = Arc::clone(&self.inflight);
        let watch_key = key.clone();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(WATCHDOG).await;
            if map.remove(&watch_key).is_some() {
                tracing::warn!(
                    conn_id = %watch_key.0,
                    op = %watch_key.1,
                    "in-flight token released by watchdog"
                );
            }
        });
        if let Entry::Vacant(slot) = self.inflight.entry(key) {
            slot.insert(watchdog);
            true
        } else {
            // Lost the race to a concurrent begin for the same pair.
            watchdog.abort();
            false
        }
    }

    pub fn end(&self, conn_id: &str, op: &str) {
        let key = (conn_id.to_string(), op.to_string());
        if let Some((_, watchdog)) = self.inflight.remove(&key) {
            watchdog.abort();
        }
    }

    /// Releases every outstanding token for a connection (socket close).
    pub fn cleanup(&self, conn_id: &str) {
        let keys: Vec<_> = self
            .inflight
            .iter()
            .filter(|entry| entry.key().0 == conn_id)
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            if let Some((_, watchdog)) = self.inflight.remove(&key) {
                watchdog.abort();
            }
        }
    }

    #[cfg(test)]
    pub fn outstanding(&self, conn_id: &str) -> usize {
        self.inflight
            .iter()
            .filter(|entry| entry.key().0 == conn_id)
            .count()
    }
}
