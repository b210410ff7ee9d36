use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Post type Mattermost stamps on the system message for a channel join.
pub const POST_TYPE_JOIN_CHANNEL: &str = "system_join_channel";

/// Role assigned to memberships created by the bot.
pub const MEMBER_ROLE: &str = "channel_user";

/// A user account on the chat server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
}

/// A team (workspace) on the chat server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

/// Channel visibility. Mattermost encodes it as a one-letter `type` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    #[default]
    #[serde(rename = "O")]
    Open,
    #[serde(rename = "P")]
    Private,
    #[serde(rename = "D")]
    Direct,
    #[serde(rename = "G")]
    Group,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(rename = "type", default)]
    pub kind: ChannelKind,
    /// Non-zero once the channel has been archived.
    #[serde(default)]
    pub delete_at: i64,
}

impl Channel {
    pub fn is_public(&self) -> bool {
        self.kind == ChannelKind::Open && self.delete_at == 0
    }
}

/// Parameters for creating a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSpec {
    pub team_id: String,
    pub name: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub purpose: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
}

/// A message in a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub post_type: String,
    #[serde(default)]
    pub root_id: String,
    #[serde(default)]
    pub create_at: i64,
    #[serde(default)]
    pub props: serde_json::Value,
}

impl Post {
    pub fn is_join(&self) -> bool {
        self.post_type == POST_TYPE_JOIN_CHANNEL
    }

    /// Root of the thread this post belongs to, or the post itself.
    pub fn thread_root(&self) -> &str {
        if self.root_id.is_empty() {
            &self.id
        } else {
            &self.root_id
        }
    }

    /// String-valued entry of the post's `props`.
    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(|v| v.as_str())
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        if self.create_at == 0 {
            return None;
        }
        Utc.timestamp_millis_opt(self.create_at).single()
    }
}

/// A post to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPost {
    pub channel_id: String,
    pub message: String,
    /// Thread root to reply under, if any.
    pub root_id: Option<String>,
}

impl OutboundPost {
    pub fn new(channel_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            message: message.into(),
            root_id: None,
        }
    }

    pub fn in_thread(mut self, root_id: impl Into<String>) -> Self {
        let root_id = root_id.into();
        self.root_id = if root_id.is_empty() {
            None
        } else {
            Some(root_id)
        };
        self
    }
}

/// A (user, channel) association with its role tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMember {
    pub channel_id: String,
    pub user_id: String,
    #[serde(default)]
    pub roles: String,
}

/// Result of the server liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// A real-time event, normalized from the websocket stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    PostCreated {
        channel_id: String,
        post: Post,
    },
    UserJoined {
        user_id: String,
        channel_id: String,
    },
    Other {
        kind: String,
    },
}

impl Event {
    pub fn kind(&self) -> &str {
        match self {
            Event::PostCreated { .. } => "posted",
            Event::UserJoined { .. } => "user_added",
            Event::Other { kind } => kind,
        }
    }

    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Event::PostCreated { channel_id, .. } | Event::UserJoined { channel_id, .. } => {
                Some(channel_id)
            }
            Event::Other { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_kind_wire_format() {
        let json = r#"{"id":"c1","name":"general","team_id":"t1","type":"P"}"#;
        let channel: Channel = serde_json::from_str(json).unwrap();
        assert_eq!(channel.kind, ChannelKind::Private);
        assert!(!channel.is_public());

        let spec = ChannelSpec {
            team_id: "t1".to_string(),
            name: "debug".to_string(),
            display_name: "Debug".to_string(),
            purpose: String::new(),
            kind: ChannelKind::Open,
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["type"], "O");
        assert!(value.get("purpose").is_none());
    }

    #[test]
    fn archived_open_channel_is_not_public() {
        let channel = Channel {
            id: "c1".to_string(),
            name: "old".to_string(),
            delete_at: 1_700_000_000_000,
            ..Channel::default()
        };
        assert!(!channel.is_public());
    }

    #[test]
    fn post_thread_root() {
        let mut post = Post {
            id: "p1".to_string(),
            channel_id: "c1".to_string(),
            ..Post::default()
        };
        assert_eq!(post.thread_root(), "p1");
        post.root_id = "p0".to_string();
        assert_eq!(post.thread_root(), "p0");
    }

    #[test]
    fn post_join_and_props() {
        let json = r#"{"id":"p1","channel_id":"c1","user_id":"u1","message":"alice joined the channel.","type":"system_join_channel","props":{"username":"alice"},"create_at":1700000000000}"#;
        let post: Post = serde_json::from_str(json).unwrap();
        assert!(post.is_join());
        assert_eq!(post.prop_str("username"), Some("alice"));
        assert!(post.created_at().is_some());
    }

    #[test]
    fn outbound_post_ignores_empty_thread() {
        let post = OutboundPost::new("c1", "hi").in_thread("");
        assert_eq!(post.root_id, None);
        let post = OutboundPost::new("c1", "hi").in_thread("p1");
        assert_eq!(post.root_id.as_deref(), Some("p1"));
    }
}
