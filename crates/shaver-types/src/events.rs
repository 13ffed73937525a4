use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, MessageKind};
use crate::roles::Role;

/// Events sent over a group's WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Server confirms the connection is live in the group
    Ready {
        group_id: Uuid,
        user_id: Uuid,
        username: String,
        role: Role,
        online_users: Vec<Uuid>,
    },

    /// A message was persisted (including system announcements)
    NewMessage { message: Message },

    /// Someone started or stopped typing; carries the full typing set
    Typing {
        group_id: Uuid,
        user_id: Uuid,
        username: String,
        is_typing: bool,
        typing_users: Vec<Uuid>,
    },

    UserJoined { group_id: Uuid, user_id: Uuid, username: String },

    UserLeft { group_id: Uuid, user_id: Uuid, username: String },

    /// Sent to a member's connections right before they are evicted
    Removed { group_id: Uuid },

    /// Personal error report; the connection stays open
    Error { code: String, message: String },
}

/// Reference to an uploaded file attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: String,
    pub name: String,
}

/// Body shared by every message-posting command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostBody {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub code_language: Option<String>,
    #[serde(default)]
    pub file_ref: Option<FileRef>,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
}

/// Commands sent FROM client TO server over a group WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatCommand {
    Text(PostBody),
    Code(PostBody),
    File(PostBody),
    Typing {
        #[serde(default = "default_typing")]
        is_typing: bool,
    },
}

fn default_typing() -> bool {
    true
}

impl ChatCommand {
    /// Split a posting command into its message kind and body.
    /// Returns `None` for transient events.
    pub fn into_post(self) -> Option<(MessageKind, PostBody)> {
        match self {
            Self::Text(body) => Some((MessageKind::Text, body)),
            Self::Code(body) => Some((MessageKind::Code, body)),
            Self::File(body) => Some((MessageKind::File, body)),
            Self::Typing { .. } => None,
        }
    }
}
