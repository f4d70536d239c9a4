use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use super::events::ServerEvent;

/// Outbound events buffered per connection before deliveries start dropping.
pub const OUTBOUND_BUFFER: usize = 256;

pub fn conversation_room(conversation_id: &str) -> String {
    format!("conversation:{}", conversation_id)
}

pub fn user_room(user_id: &str) -> String {
    format!("user:{}", user_id)
}

/// One live websocket connection. Fan-out goes through the bounded channel
/// with try_send, so a slow or closed connection drops its own deliveries
/// without blocking anyone else.
pub struct ConnectionHandle {
    pub id: String,
    pub user_id: String,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(user_id: &str, buffer: usize) -> (Arc<Self>, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            tx,
        });
        (handle, rx)
    }

    /// Best-effort delivery; returns false when the event was dropped.
    pub fn push(&self, event: ServerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    connection_id = %self.id,
                    user_id = %self.user_id,
                    "dropped outbound event: {}",
                    e
                );
                false
            }
        }
    }
}

/// Process-local presence and room state. Fully ephemeral: a restart empties
/// it and every user appears offline until they reconnect. All critical
/// sections are short map mutations; nothing inside them touches the store
/// or the network.
#[derive(Default)]
pub struct Registry {
    online: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
    rooms: RwLock<HashMap<String, HashMap<String, Arc<ConnectionHandle>>>>,
    connections: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest login wins: a new connection for the same user replaces the
    /// previous mapping.
    pub async fn register(&self, handle: Arc<ConnectionHandle>) {
        self.connections
            .write()
            .await
            .insert(handle.id.clone(), handle.clone());
        self.online
            .write()
            .await
            .insert(handle.user_id.clone(), handle);
    }

    /// Removes the connection; the online entry goes only if this handle is
    /// still the user's current one. Returns whether it was, so the caller
    /// knows to announce user_offline (a stale disconnect after a newer
    /// login stays silent).
    pub async fn unregister(&self, handle: &ConnectionHandle) -> bool {
        self.connections.write().await.remove(&handle.id);

        let mut online = self.online.write().await;
        match online.get(&handle.user_id) {
            Some(current) if current.id == handle.id => {
                online.remove(&handle.user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn join(&self, handle: &Arc<ConnectionHandle>, room: &str) {
        self.rooms
            .write()
            .await
            .entry(room.to_string())
            .or_default()
            .insert(handle.id.clone(), handle.clone());
    }

    pub async fn leave(&self, handle: &ConnectionHandle, room: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&handle.id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    pub async fn leave_all(&self, handle: &ConnectionHandle) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&handle.id);
            !members.is_empty()
        });
    }

    /// Best-effort fan-out to every connection in the room, optionally
    /// skipping one (the originator of an ephemeral event).
    pub async fn broadcast_room(&self, room: &str, event: &ServerEvent, except: Option<&str>) {
        let members: Vec<Arc<ConnectionHandle>> = {
            let rooms = self.rooms.read().await;
            match rooms.get(room) {
                Some(members) => members.values().cloned().collect(),
                None => return,
            }
        };

        for member in members {
            if except == Some(member.id.as_str()) {
                continue;
            }
            member.push(event.clone());
        }
    }

    pub async fn broadcast_all(&self, event: &ServerEvent, except: Option<&str>) {
        let connections: Vec<Arc<ConnectionHandle>> =
            self.connections.read().await.values().cloned().collect();

        for connection in connections {
            if except == Some(connection.id.as_str()) {
                continue;
            }
            connection.push(event.clone());
        }
    }
}
