use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type GroupId = i64;
pub type MessageId = i64;

/// A user or group selected for chat display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationTarget {
    User {
        id: UserId,
        username: String,
        #[serde(default)]
        profile_picture: Option<String>,
    },
    Group {
        id: GroupId,
        name: String,
        #[serde(default)]
        icon: Option<String>,
    },
}

impl ConversationTarget {
    pub fn user(id: UserId, username: impl Into<String>) -> Self {
        Self::User {
            id,
            username: username.into(),
            profile_picture: None,
        }
    }

    pub fn group(id: GroupId, name: impl Into<String>) -> Self {
        Self::Group {
            id,
            name: name.into(),
            icon: None,
        }
    }

    pub fn key(&self) -> TargetKey {
        match self {
            Self::User { id, .. } => TargetKey::User(*id),
            Self::Group { id, .. } => TargetKey::Group(*id),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::User { username, .. } => username,
            Self::Group { name, .. } => name,
        }
    }

    /// Avatar for users, icon for groups.
    pub fn image_url(&self) -> Option<&str> {
        match self {
            Self::User { profile_picture, .. } => profile_picture.as_deref(),
            Self::Group { icon, .. } => icon.as_deref(),
        }
    }
}

/// Identity of a conversation target without its display data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TargetKey {
    User(UserId),
    Group(GroupId),
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{}", id),
            Self::Group(id) => write!(f, "group:{}", id),
        }
    }
}

/// A chat message as returned by history fetches, sends and the live stream.
///
/// Direct messages carry `receiver_id`, group messages carry `group_id`.
/// Live frames use `sender_id`/`group_id` naming while REST responses use
/// `sender`/`receiver`/`group`; both deserialize into this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "sender", alias = "sender_id")]
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_username: Option<String>,
    #[serde(rename = "receiver", alias = "receiver_id", alias = "recipient_id", default)]
    pub receiver_id: Option<UserId>,
    #[serde(rename = "group", alias = "group_id", default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Whether this message belongs to the conversation identified by `key`.
    ///
    /// A direct message addresses a user when that user is either end of it.
    pub fn addresses(&self, key: TargetKey) -> bool {
        match key {
            TargetKey::Group(gid) => self.group_id == Some(gid),
            TargetKey::User(uid) => {
                self.group_id.is_none()
                    && (self.sender_id == uid || self.receiver_id == Some(uid))
            }
        }
    }

    pub fn is_from(&self, user_id: UserId) -> bool {
        self.sender_id == user_id
    }

    /// Text shown in a single-line preview.
    pub fn preview(&self) -> &str {
        match (self.content.as_deref(), self.file_url.as_deref()) {
            (Some(text), _) if !text.trim().is_empty() => text,
            (_, Some(url)) => url.rsplit('/').next().unwrap_or(url),
            _ => "",
        }
    }

    /// File attachments with an image extension render inline.
    pub fn has_image(&self) -> bool {
        self.file_url.as_deref().is_some_and(|url| {
            let lower = url.to_ascii_lowercase();
            [".jpeg", ".jpg", ".png", ".gif"]
                .iter()
                .any(|ext| lower.ends_with(ext))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub text: Option<String>,
    pub timestamp: Option<String>,
}

/// Entry in the user listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub last_message_time: Option<String>,
}

impl Contact {
    pub fn target(&self) -> ConversationTarget {
        ConversationTarget::User {
            id: self.id,
            username: self.username.clone(),
            profile_picture: self.profile_picture.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub members: Vec<UserId>,
}

impl Group {
    pub fn target(&self) -> ConversationTarget {
        ConversationTarget::Group {
            id: self.id,
            name: self.name.clone(),
            icon: self.icon.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    #[serde(default)]
    pub id: Option<UserId>,
    pub username: String,
    #[serde(default)]
    pub profile_picture: Option<String>,
}
