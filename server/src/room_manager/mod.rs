use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::judge::JudgeClient;
use crate::store::Store;
use toron_core::clock::Clock;

pub mod battle_flow;
pub mod dedupe;
pub mod fanout;
pub mod referee;
pub mod registry;
pub mod session;
pub mod snapshot;
#[cfg(test)]
pub mod tests;

pub use dedupe::RequestDeduper;
pub use fanout::{Fanout, Tx};
pub use session::{Participant, Room};

/// Process-wide state. Rooms serialise their match through the per-room
/// lock; everything else is short critical sections on the maps.
pub struct AppState {
    pub config: Config,
    pub rooms: DashMap<String, RwLock<Room>>,
    pub fanout: Fanout,
    /// connection id → user id, bound on the first event carrying a userId.
    pub sessions: DashMap<String, String>,
    /// user id → live connection id, rebound on reconnect.
    pub user_conns: DashMap<String, String>,
    pub deduper: RequestDeduper,
    pub store: Arc<dyn Store>,
    pub judge: Arc<dyn JudgeClient>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        judge: Arc<dyn JudgeClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            rooms: DashMap::new(),
            fanout: Fanout::new(),
            sessions: DashMap::new(),
            user_conns: DashMap::new(),
            deduper: RequestDeduper::new(),
            store,
            judge,
            clock,
        }
    }

    /// Binds a connection to a user identity. Later connections for the
    /// same user win, which is what makes mid-match reconnection work.
    pub fn bind_session(&self, conn_id: &str, user_id: &str) {
        self.sessions
            .insert(conn_id.to_string(), user_id.to_string());
        self.user_conns
            .insert(user_id.to_string(), conn_id.to_string());
    }

    /// Socket-close cleanup. The participant slot stays so the user can
    /// rebind through `join_discussion_room`.
    pub fn drop_connection(&self, conn_id: &str) {
        self.deduper.cleanup(conn_id);
        self.fanout.unregister(conn_id);
        if let Some((_, user_id)) = self.sessions.remove(conn_id) {
            // Only clear the reverse binding if it still points here.
            if self
                .user_conns
                .get(&user_id)
                .is_some_and(|c| c.value() == conn_id)
            {
                self.user_conns.remove(&user_id);
            }
        }
    }

    /// Live connection for a user, for targeted events.
    pub fn conn_of_user(&self, user_id: &str) -> Option<String> {
        self.user_conns.get(user_id).map(|c| c.value().clone())
    }
}
