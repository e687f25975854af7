use serde::{Deserialize, Serialize};

/// Payload a client sends over the chat socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InboundMessage {
    pub message: String,
    pub sender: String,
    pub recipient: String,
}

/// Events sent FROM server TO client over the chat socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A message was stored and fanned out to the room
    ChatMessage {
        message: String,
        sender: String,
        recipient: String,
    },

    /// The last inbound payload on this connection was rejected.
    /// Only ever sent to the connection that caused it.
    Error { detail: String },
}

impl From<InboundMessage> for ChatEvent {
    fn from(msg: InboundMessage) -> Self {
        Self::ChatMessage {
            message: msg.message,
            sender: msg.sender,
            recipient: msg.recipient,
        }
    }
}
