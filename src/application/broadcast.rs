//! Broadcast Hub: live client registry and named-room fan-out.
//!
//! Producers never block on a slow consumer: each client owns a bounded
//! outbound queue and a full or closed queue drops the client from the
//! registry.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::events::{WsEnvelope, user_alerts_room};

/// Per-client outbound queue depth. A client that falls this far behind is
/// considered dead and dropped.
pub const CLIENT_BUFFER_SIZE: usize = 64;

struct HubInner {
    clients: HashMap<Uuid, mpsc::Sender<WsEnvelope>>,
    rooms: HashMap<String, HashSet<Uuid>>,
}

pub struct BroadcastHub {
    inner: RwLock<HubInner>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HubInner {
                clients: HashMap::new(),
                rooms: HashMap::new(),
            }),
        }
    }

    /// Registers a connection and hands back its id plus the receiving half
    /// of its outbound queue.
    pub async fn register_client(&self) -> (Uuid, mpsc::Receiver<WsEnvelope>) {
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER_SIZE);
        let id = Uuid::new_v4();
        self.inner.write().await.clients.insert(id, tx);
        debug!(client_id = %id, "websocket client registered");
        (id, rx)
    }

    /// Removes a connection from the registry and every room it joined.
    pub async fn unregister_client(&self, client_id: Uuid) {
        let mut inner = self.inner.write().await;
        inner.clients.remove(&client_id);
        inner.rooms.retain(|_, members| {
            members.remove(&client_id);
            !members.is_empty()
        });
        debug!(client_id = %client_id, "websocket client unregistered");
    }

    /// Adds the client to a room. Unknown client ids are ignored.
    pub async fn subscribe(&self, client_id: Uuid, room: &str) {
        let mut inner = self.inner.write().await;
        if !inner.clients.contains_key(&client_id) {
            warn!(client_id = %client_id, room, "subscribe from unknown client ignored");
            return;
        }
        inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(client_id);
        debug!(client_id = %client_id, room, "client subscribed");
    }

    pub async fn unsubscribe(&self, client_id: Uuid, room: &str) {
        let mut inner = self.inner.write().await;
        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(&client_id);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
        debug!(client_id = %client_id, room, "client unsubscribed");
    }

    /// Fans an envelope out to every member of `room` without blocking.
    /// Clients whose queue is full or closed are dropped and logged. Returns
    /// how many clients the message was handed to.
    pub async fn broadcast(&self, room: &str, message_type: &str, data: Value) -> usize {
        let envelope = WsEnvelope::new(message_type, data);

        // Snapshot membership under the read lock, send outside it.
        let targets: Vec<(Uuid, mpsc::Sender<WsEnvelope>)> = {
            let inner = self.inner.read().await;
            match inner.rooms.get(room) {
                Some(members) => members
                    .iter()
                    .filter_map(|id| inner.clients.get(id).map(|tx| (*id, tx.clone())))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut dead: Vec<Uuid> = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client_id = %id, room, "client send buffer full; dropping client");
                    dead.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(client_id = %id, room, "client connection closed; dropping client");
                    dead.push(id);
                }
            }
        }

        for id in dead {
            self.unregister_client(id).await;
        }

        delivered
    }

    /// Broadcasts to the owning user's alert room (`alerts_user:<uid>`).
    pub async fn broadcast_to_user(
        &self,
        user_id: Uuid,
        message_type: &str,
        data: Value,
    ) -> usize {
        self.broadcast(&user_alerts_room(user_id), message_type, data)
            .await
    }

    pub async fn connected_clients(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    /// Room name -> member count for every non-empty room.
    pub async fn rooms(&self) -> HashMap<String, usize> {
        self.inner
            .read()
            .await
            .rooms
            .iter()
            .map(|(name, members)| (name.clone(), members.len()))
            .collect()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_broadcast_reaches_room_members_only() {
        let hub = BroadcastHub::new();
        let (member, mut member_rx) = hub.register_client().await;
        let (_other, mut other_rx) = hub.register_client().await;

        hub.subscribe(member, "crypto:BTCUSDT").await;

        let delivered = hub
            .broadcast("crypto:BTCUSDT", "crypto_data_update", json!({"close": 51000}))
            .await;
        assert_eq!(delivered, 1);

        let envelope = member_rx.recv().await.unwrap();
        assert_eq!(envelope.message_type, "crypto_data_update");
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_to_user_targets_alert_room() {
        let hub = BroadcastHub::new();
        let user_id = Uuid::new_v4();
        let (client, mut rx) = hub.register_client().await;
        hub.subscribe(client, &user_alerts_room(user_id)).await;

        hub.broadcast_to_user(user_id, "alert_triggered", json!({"alert_id": "x"}))
            .await;

        assert_eq!(rx.recv().await.unwrap().message_type, "alert_triggered");
    }

    #[tokio::test]
    async fn test_full_buffer_drops_client() {
        let hub = BroadcastHub::new();
        let (client, _rx) = hub.register_client().await;
        hub.subscribe(client, "system").await;

        // Fill the buffer without draining it; the next broadcast must not
        // block and must evict the client.
        for _ in 0..CLIENT_BUFFER_SIZE {
            hub.broadcast("system", "system_alert", json!({})).await;
        }
        assert_eq!(hub.connected_clients().await, 1);

        let delivered = hub.broadcast("system", "system_alert", json!({})).await;
        assert_eq!(delivered, 0);
        assert_eq!(hub.connected_clients().await, 0);
        assert!(hub.rooms().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_and_cleanup() {
        let hub = BroadcastHub::new();
        let (client, _rx) = hub.register_client().await;
        hub.subscribe(client, "market_summary").await;
        assert_eq!(hub.rooms().await.get("market_summary"), Some(&1));

        hub.unsubscribe(client, "market_summary").await;
        assert!(hub.rooms().await.is_empty());

        hub.unregister_client(client).await;
        assert_eq!(hub.connected_clients().await, 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_evicted_on_next_broadcast() {
        let hub = BroadcastHub::new();
        let (client, rx) = hub.register_client().await;
        hub.subscribe(client, "system").await;
        drop(rx);

        let delivered = hub.broadcast("system", "system_alert", json!({})).await;
        assert_eq!(delivered, 0);
        assert_eq!(hub.connected_clients().await, 0);
    }
}
