use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use healthbridge_types::events::GatewayEvent;
use healthbridge_types::models::MessageView;

pub type ConnectionSender = mpsc::UnboundedSender<GatewayEvent>;

/// Channel registry: every joined connection, grouped by user id.
///
/// A user's channel is the set of their live connections; an event sent to
/// the user reaches all of them. Process-local, rebuilt empty on restart.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// user_id -> (conn_id -> sender)
    user_channels: RwLock<HashMap<i64, HashMap<Uuid, ConnectionSender>>>,
}

/// How many connections a delivery reached on each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub receiver_connections: usize,
    pub sender_connections: usize,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a connection to its user's channel. Returns the connection id
    /// needed to leave again.
    pub async fn register(&self, user_id: i64, tx: ConnectionSender) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner
            .user_channels
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        conn_id
    }

    /// Remove one connection. The user's channel disappears with its last connection.
    pub async fn unregister(&self, user_id: i64, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some(conns) = channels.get_mut(&user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                channels.remove(&user_id);
            }
        }
    }

    /// Send an event to every connection of a user. Returns the number of
    /// connections that accepted it; zero means the user is offline.
    pub async fn send_to_user(&self, user_id: i64, event: GatewayEvent) -> usize {
        let channels = self.inner.user_channels.read().await;
        fan_out(&channels, user_id, &event)
    }

    /// Route a persisted message: to the receiver's channel if they are
    /// connected, then back to the sender's channel. A self-message is
    /// delivered once. Offline receivers are skipped, never queued.
    pub async fn deliver(&self, message: &MessageView) -> DeliveryReport {
        let event = GatewayEvent::MessageCreate(message.clone());
        let channels = self.inner.user_channels.read().await;

        let receiver_connections = fan_out(&channels, message.receiver_id, &event);
        let sender_connections = if message.sender_id == message.receiver_id {
            0
        } else {
            fan_out(&channels, message.sender_id, &event)
        };

        DeliveryReport {
            receiver_connections,
            sender_connections,
        }
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.inner.user_channels.read().await.contains_key(&user_id)
    }

    pub async fn connection_count(&self, user_id: i64) -> usize {
        self.inner
            .user_channels
            .read()
            .await
            .get(&user_id)
            .map_or(0, HashMap::len)
    }

    /// Ids of users with at least one joined connection.
    pub async fn online_user_ids(&self) -> Vec<i64> {
        self.inner.user_channels.read().await.keys().copied().collect()
    }
}

fn fan_out(
    channels: &HashMap<i64, HashMap<Uuid, ConnectionSender>>,
    user_id: i64,
    event: &GatewayEvent,
) -> usize {
    channels.get(&user_id).map_or(0, |conns| {
        conns
            .values()
            .map(|tx| tx.send(event.clone()))
            .filter(Result::is_ok)
            .count()
    })
}
