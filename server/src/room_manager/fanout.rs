use std::collections::HashSet;

use dashmap::DashMap;
use shared::ServerMessage;
use tokio::sync::mpsc;

pub type Tx = mpsc::UnboundedSender<ServerMessage>;

/// Connection registry plus per-room subscriber sets. Each connection owns
/// an unbounded channel pumped to its socket by `ws.rs`; ordering per
/// recipient follows send order.
#[derive(Default)]
pub struct Fanout {
    conns: DashMap<String, Tx>,
    channels: DashMap<String, HashSet<String>>,
}

impl Fanout {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conn_id: &str, tx: Tx) {
        self.conns.insert(conn_id.to_string(), tx);
    }

    pub fn unregister(&self, conn_id: &str) {
        self.conns.remove(conn_id);
        for mut channel in self.channels.iter_mut() {
            channel.value_mut().remove(conn_id);
        }
    }

    pub fn join_channel(&self, room_id: &str, conn_id: &str) {
        self.channels
            .entry(room_id.to_string())
            .or_default()
            .insert(conn_id.to_string());
    }

    pub fn leave_channel(&self, room_id: &str, conn_id: &str) {
        if let Some(mut members) = self.channels.get_mut(room_id) {
            members.remove(conn_id);
        }
    }

    pub fn drop_channel(&self, room_id: &str) {
        self.channels.remove(room_id);
    }

    pub fn broadcast(&self, room_id: &str, msg: &ServerMessage) {
        let Some(members) = self.channels.get(room_id) else {
            return;
        };
        for conn_id in members.iter() {
            if let Some(tx) = self.conns.get(conn_id) {
                let _ = tx.send(msg.clone());
            }
        }
    }

    /// Lobby-wide delivery (room list updates).
    pub fn broadcast_all(&self, msg: &ServerMessage) {
        for entry in self.conns.iter() {
            let _ = entry.value().send(msg.clone());
        }
    }

    /// Targeted delivery. Returns false when the connection is gone.
    pub fn send(&self, conn_id: &str, msg: ServerMessage) -> bool {
        match self.conns.get(conn_id) {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }
}
