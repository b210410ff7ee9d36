use async_trait::async_trait;

use crate::error::ChannelAdapterError;
use crate::types::{
    Channel, ChannelMember, ChannelSpec, Event, OutboundPost, Post, ServerInfo, Team, User,
};

/// The team/channel/user directory of the chat server.
///
/// Every call is one network round trip. Implementations must be usable from
/// a shared reference; the session token obtained by [`login`](Self::login)
/// is kept internally.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Probe server liveness.
    async fn ping(&self) -> Result<ServerInfo, ChannelAdapterError>;

    /// Authenticate and remember the session token for later calls.
    async fn login(&self, email: &str, password: &str) -> Result<User, ChannelAdapterError>;

    /// Session token from the last successful login.
    fn auth_token(&self) -> Option<String>;

    async fn get_team_by_name(&self, name: &str) -> Result<Team, ChannelAdapterError>;

    async fn get_channel_by_name(
        &self,
        name: &str,
        team_id: &str,
    ) -> Result<Channel, ChannelAdapterError>;

    async fn create_channel(&self, spec: &ChannelSpec) -> Result<Channel, ChannelAdapterError>;

    async fn create_post(&self, post: &OutboundPost) -> Result<Post, ChannelAdapterError>;

    async fn add_team_member(&self, team_id: &str, user_id: &str)
        -> Result<(), ChannelAdapterError>;

    async fn add_channel_member(
        &self,
        channel_id: &str,
        user_id: &str,
        role: &str,
    ) -> Result<ChannelMember, ChannelAdapterError>;

    /// Every open, non-archived channel of a team.
    async fn list_public_channels(&self, team_id: &str)
        -> Result<Vec<Channel>, ChannelAdapterError>;

    /// Channels in `team_id` the user is currently a member of.
    async fn list_channels_for_user(
        &self,
        team_id: &str,
        user_id: &str,
    ) -> Result<Vec<Channel>, ChannelAdapterError>;

    async fn get_user_by_username(&self, username: &str) -> Result<User, ChannelAdapterError>;

    async fn update_user(&self, user: &User) -> Result<User, ChannelAdapterError>;
}

/// A live, ordered stream of real-time events.
///
/// Once closed (or ended by the server) the stream is not restartable.
#[async_trait]
pub trait EventSource: Send {
    /// Next event in delivery order; `None` once the stream has ended.
    async fn next_event(&mut self) -> Option<Result<Event, ChannelAdapterError>>;

    /// Close the underlying connection. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), ChannelAdapterError>;
}
