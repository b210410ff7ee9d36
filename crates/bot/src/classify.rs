//! Event classification.
//!
//! Decides, for one raw event, whether it is a join to onboard, a message to
//! answer, or noise. Pure function of the event and the session.

use pillar_channel_adapter::{Event, Post};

use crate::session::BotSession;

/// A user join observed in the monitored channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// May be empty when the event only carried a username.
    pub user_id: String,
    pub username: Option<String>,
    pub channel_id: String,
    /// The system post announcing the join, used to thread status reports.
    pub trigger_post_id: Option<String>,
}

impl JoinRequest {
    /// Human-readable label for reports.
    pub fn label(&self) -> String {
        match (self.user_id.is_empty(), self.username.as_deref()) {
            (false, Some(name)) => format!("{} ({})", self.user_id, name),
            (false, None) => self.user_id.clone(),
            (true, Some(name)) => name.to_string(),
            (true, None) => "unknown user".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    UnmonitoredChannel,
    SelfAuthored,
    /// Another system post (leave, header change, ...).
    SystemPost(String),
    UnhandledKind(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Join(JoinRequest),
    PostedMessage(Post),
    Ignored(IgnoreReason),
}

pub fn classify(event: Event, session: &BotSession) -> Classification {
    if let Some(channel_id) = event.channel_id() {
        if !session.is_monitored(channel_id) {
            return Classification::Ignored(IgnoreReason::UnmonitoredChannel);
        }
    }

    match event {
        Event::PostCreated { channel_id, post } => {
            if session.is_self(&post.user_id) {
                return Classification::Ignored(IgnoreReason::SelfAuthored);
            }
            if post.is_join() {
                let username = post
                    .prop_str("username")
                    .filter(|name| !name.is_empty())
                    .map(str::to_string);
                return Classification::Join(JoinRequest {
                    user_id: post.user_id.clone(),
                    username,
                    channel_id,
                    trigger_post_id: Some(post.id.clone()).filter(|id| !id.is_empty()),
                });
            }
            if post.post_type.starts_with("system_") {
                return Classification::Ignored(IgnoreReason::SystemPost(post.post_type));
            }
            Classification::PostedMessage(post)
        }
        Event::UserJoined {
            user_id,
            channel_id,
        } => {
            if session.is_self(&user_id) {
                return Classification::Ignored(IgnoreReason::SelfAuthored);
            }
            Classification::Join(JoinRequest {
                user_id,
                username: None,
                channel_id,
                trigger_post_id: None,
            })
        }
        Event::Other { kind } => Classification::Ignored(IgnoreReason::UnhandledKind(kind)),
    }
}
