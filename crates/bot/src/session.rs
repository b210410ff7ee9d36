//! Bot identity and resolved server context.
//!
//! Built once during startup and then only read: the dispatcher, the
//! reporter and the shutdown path all borrow the same value.

use pillar_channel_adapter::{Channel, Team, User};

#[derive(Debug, Clone)]
pub struct BotSession {
    /// The authenticated bot account.
    pub identity: User,
    pub home_team: Team,
    /// Channel for operator-visible status; `None` when it could not be
    /// resolved or created.
    pub debug_channel: Option<Channel>,
    /// Channel whose events the dispatcher acts upon.
    pub monitored_channel: Option<Channel>,
    /// Display name used in lifecycle notices.
    pub bot_name: String,
}

impl BotSession {
    pub fn new(identity: User, home_team: Team) -> Self {
        Self {
            identity,
            home_team,
            debug_channel: None,
            monitored_channel: None,
            bot_name: "Pillar Bot".to_string(),
        }
    }

    pub fn with_debug_channel(mut self, channel: Channel) -> Self {
        self.debug_channel = Some(channel);
        self
    }

    pub fn with_monitored_channel(mut self, channel: Channel) -> Self {
        self.monitored_channel = Some(channel);
        self
    }

    pub fn with_bot_name(mut self, name: impl Into<String>) -> Self {
        self.bot_name = name.into();
        self
    }

    pub fn bot_user_id(&self) -> &str {
        &self.identity.id
    }

    pub fn is_self(&self, user_id: &str) -> bool {
        !user_id.is_empty() && user_id == self.identity.id
    }

    pub fn is_monitored(&self, channel_id: &str) -> bool {
        self.monitored_channel
            .as_ref()
            .is_some_and(|c| c.id == channel_id)
    }

    pub fn debug_channel_id(&self) -> Option<&str> {
        self.debug_channel.as_ref().map(|c| c.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: &str) -> Channel {
        Channel {
            id: id.to_string(),
            name: id.to_string(),
            ..Channel::default()
        }
    }

    #[test]
    fn monitored_and_self_checks() {
        let identity = User {
            id: "bot".to_string(),
            ..User::default()
        };
        let session = BotSession::new(identity, Team::default())
            .with_monitored_channel(channel("ch-1"))
            .with_bot_name("Test Bot");

        assert!(session.is_monitored("ch-1"));
        assert!(!session.is_monitored("ch-2"));
        assert!(session.is_self("bot"));
        assert!(!session.is_self(""));
        assert!(session.debug_channel_id().is_none());
        assert_eq!(session.bot_name, "Test Bot");
    }

    #[test]
    fn nothing_monitored_without_channel() {
        let session = BotSession::new(User::default(), Team::default());
        assert!(!session.is_monitored(""));
        assert!(!session.is_monitored("ch-1"));
    }
}
