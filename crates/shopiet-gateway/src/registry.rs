use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use shopiet_types::events::ChatEvent;

/// Sending half of one connection's outbound queue.
///
/// Each queue is a bounded single-receiver broadcast channel: a reader that
/// falls behind loses the oldest events instead of growing the queue, and a
/// dropped reader makes the next send fail so the handle can be pruned.
pub type ConnectionHandle = broadcast::Sender<ChatEvent>;

/// A connection's seat in a room.
pub struct Membership {
    pub conn_id: Uuid,
    pub events: broadcast::Receiver<ChatEvent>,
}

/// Live connections grouped by canonical room key.
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// room key -> (conn_id -> handle). Mutation and fan-out for one key run
    /// under that key's shard lock.
    rooms: DashMap<String, HashMap<Uuid, ConnectionHandle>>,

    /// Capacity of each connection's outbound queue
    send_buffer: usize,
}

impl RoomRegistry {
    pub fn new(send_buffer: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                rooms: DashMap::new(),
                send_buffer: send_buffer.max(1),
            }),
        }
    }

    /// Register a new connection in `room_key`, creating the room if absent.
    pub fn join(&self, room_key: &str) -> Membership {
        let conn_id = Uuid::new_v4();
        let (tx, events) = broadcast::channel(self.inner.send_buffer);
        self.inner
            .rooms
            .entry(room_key.to_string())
            .or_default()
            .insert(conn_id, tx);
        debug!("Connection {} joined room {}", conn_id, room_key);
        Membership { conn_id, events }
    }

    /// Remove a connection; the room is dropped once its last member leaves.
    /// Returns whether the connection was registered.
    pub fn leave(&self, room_key: &str, conn_id: Uuid) -> bool {
        let Entry::Occupied(mut entry) = self.inner.rooms.entry(room_key.to_string()) else {
            return false;
        };
        let removed = entry.get_mut().remove(&conn_id).is_some();
        if entry.get().is_empty() {
            entry.remove();
        }
        removed
    }

    /// Deliver `event` to every connection in `room_key`. Connections whose
    /// receiver is gone are pruned; the rest still get the event. Returns the
    /// number of connections it was queued for.
    pub fn broadcast(&self, room_key: &str, event: ChatEvent) -> usize {
        let Entry::Occupied(mut entry) = self.inner.rooms.entry(room_key.to_string()) else {
            return 0;
        };

        let mut delivered = 0;
        entry.get_mut().retain(|conn_id, tx| match tx.send(event.clone()) {
            Ok(_) => {
                delivered += 1;
                true
            }
            Err(_) => {
                debug!("Pruning closed connection {} from room {}", conn_id, room_key);
                false
            }
        });

        if entry.get().is_empty() {
            entry.remove();
        }
        delivered
    }

    /// Send a targeted event to one connection of a room.
    pub fn send_to(&self, room_key: &str, conn_id: Uuid, event: ChatEvent) -> bool {
        self.inner
            .rooms
            .get(room_key)
            .and_then(|members| members.get(&conn_id).map(|tx| tx.send(event).is_ok()))
            .unwrap_or(false)
    }

    /// Number of rooms with at least one connection.
    pub fn room_count(&self) -> usize {
        self.inner.rooms.len()
    }

    pub fn member_count(&self, room_key: &str) -> usize {
        self.inner.rooms.get(room_key).map_or(0, |members| members.len())
    }
}
