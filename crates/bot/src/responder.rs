//! Canned replies to messages in the monitored channel.

use pillar_channel_adapter::{ChannelAdapterError, DirectoryClient, OutboundPost, Post};
use regex::Regex;

const RUNNING_REPLY: &str = "Yes I'm running";
const GREETING_REPLY: &str = "Hi!";
const FALLBACK_REPLY: &str = "I did not understand you!";

/// Trigger tokens in match order, with their replies.
const STANDARD_TRIGGERS: &[(&str, &str)] = &[
    ("alive", RUNNING_REPLY),
    ("up", RUNNING_REPLY),
    ("running", RUNNING_REPLY),
    ("hello", GREETING_REPLY),
];

struct Trigger {
    token: String,
    pattern: Regex,
    reply: String,
}

/// The reply chosen for a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyChoice<'a> {
    /// Matching trigger token; `None` for the fallback reply.
    pub trigger: Option<&'a str>,
    pub text: &'a str,
}

/// What was sent in answer to a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyOutcome {
    pub trigger: Option<String>,
    pub reply_post_id: String,
}

/// Ordered word-boundary triggers; the first match wins.
pub struct MessageResponder {
    triggers: Vec<Trigger>,
    fallback: String,
}

impl Default for MessageResponder {
    fn default() -> Self {
        Self::new(STANDARD_TRIGGERS, FALLBACK_REPLY)
    }
}

impl MessageResponder {
    pub fn new(triggers: &[(&str, &str)], fallback: &str) -> Self {
        let triggers = triggers
            .iter()
            .filter_map(|(token, reply)| {
                let source = format!(r"(?i)\b{}\b", regex::escape(token));
                match Regex::new(&source) {
                    Ok(pattern) => Some(Trigger {
                        token: token.to_string(),
                        pattern,
                        reply: reply.to_string(),
                    }),
                    Err(e) => {
                        tracing::error!(token = %token, "dropping unusable trigger: {}", e);
                        None
                    }
                }
            })
            .collect();

        Self {
            triggers,
            fallback: fallback.to_string(),
        }
    }

    pub fn choose_reply(&self, body: &str) -> ReplyChoice<'_> {
        self.triggers
            .iter()
            .find(|t| t.pattern.is_match(body))
            .map(|t| ReplyChoice {
                trigger: Some(t.token.as_str()),
                text: t.reply.as_str(),
            })
            .unwrap_or(ReplyChoice {
                trigger: None,
                text: self.fallback.as_str(),
            })
    }

    /// Send exactly one threaded reply to `post`.
    pub async fn respond(
        &self,
        client: &dyn DirectoryClient,
        post: &Post,
    ) -> Result<ReplyOutcome, ChannelAdapterError> {
        let choice = self.choose_reply(&post.message);
        let reply = OutboundPost::new(post.channel_id.as_str(), choice.text)
            .in_thread(post.thread_root());
        let sent = client.create_post(&reply).await?;

        tracing::debug!(
            post_id = %post.id,
            trigger = choice.trigger.unwrap_or("none"),
            "replied to monitored message"
        );
        Ok(ReplyOutcome {
            trigger: choice.trigger.map(str::to_string),
            reply_post_id: sent.id,
        })
    }
}
