//! Mattermost websocket frame parsing.
//!
//! Decodes raw websocket text frames into normalized [`Event`]s.

use serde::{Deserialize, Serialize};

use crate::error::ChannelAdapterError;
use crate::types::{Event, Post};

/// A websocket event frame as sent by the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebSocketFrame {
    /// Event name (`posted`, `user_added`, `hello`, ...). Absent on action replies.
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub broadcast: Broadcast,
    #[serde(default)]
    pub seq: i64,
    /// Present on replies to actions the client sent.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub seq_reply: Option<i64>,
}

/// Broadcast scope of an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Broadcast {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub team_id: String,
}

/// Authentication action sent right after connecting.
#[derive(Debug, Serialize)]
pub struct AuthenticationChallenge<'a> {
    pub seq: i64,
    pub action: &'static str,
    pub data: AuthenticationData<'a>,
}

#[derive(Debug, Serialize)]
pub struct AuthenticationData<'a> {
    pub token: &'a str,
}

impl<'a> AuthenticationChallenge<'a> {
    pub fn new(seq: i64, token: &'a str) -> Self {
        Self {
            seq,
            action: "authentication_challenge",
            data: AuthenticationData { token },
        }
    }
}

/// Parse one websocket text frame.
pub fn parse_frame(text: &str) -> Result<Event, ChannelAdapterError> {
    let frame: WebSocketFrame = serde_json::from_str(text)
        .map_err(|e| ChannelAdapterError::ParseError(format!("websocket frame: {}", e)))?;
    frame_to_event(frame)
}

/// Normalize a decoded frame.
pub fn frame_to_event(frame: WebSocketFrame) -> Result<Event, ChannelAdapterError> {
    let kind = match frame.event.as_deref() {
        Some(kind) => kind.to_string(),
        None => {
            // Reply to one of our own actions (e.g. the auth challenge).
            if frame.status.as_deref().is_some_and(|s| s != "OK") {
                tracing::warn!(
                    seq_reply = frame.seq_reply.unwrap_or_default(),
                    status = frame.status.as_deref().unwrap_or(""),
                    "websocket action rejected"
                );
            }
            return Ok(Event::Other {
                kind: "action_reply".to_string(),
            });
        }
    };

    match kind.as_str() {
        "posted" => {
            let raw = frame
                .data
                .get("post")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    ChannelAdapterError::ParseError("posted event without post data".to_string())
                })?;
            let post: Post = serde_json::from_str(raw)
                .map_err(|e| ChannelAdapterError::ParseError(format!("posted payload: {}", e)))?;
            let channel_id = if post.channel_id.is_empty() {
                frame.broadcast.channel_id
            } else {
                post.channel_id.clone()
            };
            Ok(Event::PostCreated { channel_id, post })
        }
        "user_added" => {
            let user_id = frame
                .data
                .get("user_id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    ChannelAdapterError::ParseError("user_added event without user_id".to_string())
                })?;
            Ok(Event::UserJoined {
                user_id,
                channel_id: frame.broadcast.channel_id,
            })
        }
        _ => Ok(Event::Other { kind }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_posted_frame() {
        let post = r#"{"id":"p1","channel_id":"ch-1","user_id":"u1","message":"are you alive?","type":"","root_id":""}"#;
        let frame = serde_json::json!({
            "event": "posted",
            "data": { "post": post, "channel_name": "welcome" },
            "broadcast": { "channel_id": "ch-1", "user_id": "", "team_id": "" },
            "seq": 7
        });

        match parse_frame(&frame.to_string()).unwrap() {
            Event::PostCreated { channel_id, post } => {
                assert_eq!(channel_id, "ch-1");
                assert_eq!(post.message, "are you alive?");
                assert_eq!(post.user_id, "u1");
            }
            other => panic!("expected PostCreated, got: {:?}", other),
        }
    }

    #[test]
    fn parse_join_post_frame() {
        let post = r#"{"id":"p2","channel_id":"ch-1","user_id":"u2","message":"bob joined the channel.","type":"system_join_channel","props":{"username":"bob"}}"#;
        let frame = serde_json::json!({
            "event": "posted",
            "data": { "post": post },
            "broadcast": { "channel_id": "ch-1" },
            "seq": 8
        });

        match parse_frame(&frame.to_string()).unwrap() {
            Event::PostCreated { post, .. } => {
                assert!(post.is_join());
                assert_eq!(post.prop_str("username"), Some("bob"));
            }
            other => panic!("expected PostCreated, got: {:?}", other),
        }
    }

    #[test]
    fn parse_user_added_frame() {
        let text = r#"{"event":"user_added","data":{"team_id":"t1","user_id":"u9"},"broadcast":{"channel_id":"ch-1"},"seq":3}"#;
        assert_eq!(
            parse_frame(text).unwrap(),
            Event::UserJoined {
                user_id: "u9".to_string(),
                channel_id: "ch-1".to_string(),
            }
        );
    }

    #[test]
    fn unknown_events_are_other() {
        let text = r#"{"event":"typing","data":{},"broadcast":{"channel_id":"ch-1"},"seq":4}"#;
        assert_eq!(
            parse_frame(text).unwrap(),
            Event::Other {
                kind: "typing".to_string()
            }
        );

        let reply = r#"{"status":"OK","seq_reply":1}"#;
        assert_eq!(parse_frame(reply).unwrap().kind(), "action_reply");
    }

    #[test]
    fn malformed_frames_rejected() {
        assert!(parse_frame("not json").is_err());
        let missing_post = r#"{"event":"posted","data":{},"seq":1}"#;
        assert!(parse_frame(missing_post).is_err());
        let missing_user = r#"{"event":"user_added","data":{},"seq":1}"#;
        assert!(parse_frame(missing_user).is_err());
    }

    #[test]
    fn authentication_challenge_shape() {
        let challenge = AuthenticationChallenge::new(1, "tok-123");
        let value = serde_json::to_value(&challenge).unwrap();
        assert_eq!(value["action"], "authentication_challenge");
        assert_eq!(value["data"]["token"], "tok-123");
        assert_eq!(value["seq"], 1);
    }
}
