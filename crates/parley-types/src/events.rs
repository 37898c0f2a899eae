use serde::{Deserialize, Serialize};

use crate::models::{Message, TargetKey};

/// Events delivered by a live subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// The socket for `target` is (re)established
    Connected { target: TargetKey },

    /// The socket dropped; a reconnect is pending
    Disconnected { target: TargetKey },

    /// A message was created by any participant
    MessageCreate(Message),
}

impl LiveEvent {
    /// Returns the message if this event carries one.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::MessageCreate(m) => Some(m),
            _ => None,
        }
    }
}

/// Text frames arrive either as a bare message object or wrapped in a
/// channel-layer envelope: `{"type": "chat_message", "message": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiveFrame {
    Envelope { message: Message },
    Bare(Message),
}

impl LiveFrame {
    pub fn parse(text: &str) -> serde_json::Result<Message> {
        serde_json::from_str::<LiveFrame>(text).map(|frame| match frame {
            Self::Envelope { message } => message,
            Self::Bare(message) => message,
        })
    }
}
