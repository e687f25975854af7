use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use shopiet_chat::{ChatError, ChatResult, MessageStore};
use shopiet_types::events::{ChatEvent, InboundMessage};
use shopiet_types::{RoomName, canonical_room_key};

use crate::registry::RoomRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, not yet registered; inbound traffic is refused.
    Connecting,
    Joined,
    /// Terminal.
    Closed,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Connecting,
    Joined(Uuid),
    Closed,
}

/// One live connection of `username` to a two-party room.
///
/// The room name may list the participants in either order; all fan-out uses
/// the canonical key. Closing is idempotent and also happens on drop.
pub struct Session {
    room: RoomName,
    room_key: String,
    username: String,
    registry: RoomRegistry,
    store: Arc<MessageStore>,
    phase: Mutex<Phase>,
}

impl Session {
    /// Authorize `username` for `room` and create the session in
    /// `Connecting`. Only the two participants may connect.
    pub fn connect(
        room: RoomName,
        username: impl Into<String>,
        registry: RoomRegistry,
        store: Arc<MessageStore>,
    ) -> ChatResult<Self> {
        let username = username.into();
        if room.first() == room.second() {
            return Err(ChatError::validation("a room needs two different users"));
        }
        if !room.contains(&username) {
            return Err(ChatError::forbidden(format!(
                "'{}' is not a participant of room '{}'",
                username, room
            )));
        }

        Ok(Self {
            room_key: room.canonical_key(),
            room,
            username,
            registry,
            store,
            phase: Mutex::new(Phase::Connecting),
        })
    }

    pub fn room_key(&self) -> &str {
        &self.room_key
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn state(&self) -> SessionState {
        match *self.phase() {
            Phase::Connecting => SessionState::Connecting,
            Phase::Joined(_) => SessionState::Joined,
            Phase::Closed => SessionState::Closed,
        }
    }

    pub fn conn_id(&self) -> Option<Uuid> {
        match *self.phase() {
            Phase::Joined(conn_id) => Some(conn_id),
            _ => None,
        }
    }

    /// `Connecting -> Joined`: register with the room and return the
    /// connection's outbound event stream.
    pub fn join(&self) -> ChatResult<broadcast::Receiver<ChatEvent>> {
        let mut phase = self.phase();
        match *phase {
            Phase::Connecting => {
                let membership = self.registry.join(&self.room_key);
                *phase = Phase::Joined(membership.conn_id);
                Ok(membership.events)
            }
            Phase::Joined(_) => Err(ChatError::validation("session already joined")),
            Phase::Closed => Err(ChatError::validation("session is closed")),
        }
    }

    /// Decode a text frame and handle it as an inbound message.
    pub async fn handle_text(&self, text: &str) -> ChatResult<usize> {
        let msg: InboundMessage = serde_json::from_str(text)
            .map_err(|e| ChatError::validation(format!("malformed message payload: {}", e)))?;
        self.handle_inbound(msg).await
    }

    /// Store an inbound message and fan it out to the room, including the
    /// sender's other connections. Returns how many connections it was
    /// queued for. Nothing is broadcast if the store rejects it.
    pub async fn handle_inbound(&self, msg: InboundMessage) -> ChatResult<usize> {
        if self.state() != SessionState::Joined {
            return Err(ChatError::validation("session is not joined to a room"));
        }
        if msg.sender != self.username {
            return Err(ChatError::forbidden(format!(
                "cannot send as '{}' on a connection of '{}'",
                msg.sender, self.username
            )));
        }
        if canonical_room_key(&msg.sender, &msg.recipient) != self.room_key {
            return Err(ChatError::forbidden(format!(
                "'{}' is not the other participant of room '{}'",
                msg.recipient, self.room
            )));
        }

        self.store
            .append(&msg.sender, &msg.recipient, &msg.message)
            .await?;

        let delivered = self.registry.broadcast(&self.room_key, msg.into());
        debug!(
            "{} -> room {} delivered to {} connections",
            self.username, self.room_key, delivered
        );
        Ok(delivered)
    }

    /// Tell this connection (only) why its last payload was dropped.
    pub fn reject(&self, err: &ChatError) {
        let detail = match err {
            ChatError::Store(_) => "message could not be stored, try again".to_string(),
            other => other.to_string(),
        };
        if let Some(conn_id) = self.conn_id() {
            self.registry
                .send_to(&self.room_key, conn_id, ChatEvent::Error { detail });
        }
    }

    /// `-> Closed`: leave the room. Safe to call more than once.
    pub fn close(&self) {
        let mut phase = self.phase();
        if let Phase::Joined(conn_id) = *phase {
            if !self.registry.leave(&self.room_key, conn_id) {
                warn!(
                    "Connection {} of {} was already gone from room {}",
                    conn_id, self.username, self.room_key
                );
            }
        }
        *phase = Phase::Closed;
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
