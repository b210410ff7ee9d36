//! Chat platform boundary for the Pillar bot.
//!
//! Two capabilities are exposed as traits so the bot core never touches the
//! network directly:
//! - [`DirectoryClient`]: teams, channels, users, memberships and posts
//! - [`EventSource`]: the live, ordered stream of real-time events
//!
//! The Mattermost implementations are [`MattermostApiClient`] (v4 REST API)
//! and [`MattermostEventStream`] (websocket).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub mod adapters;

pub use adapters::mattermost::api::format_lifecycle_notice;
pub use adapters::mattermost::{MattermostApiClient, MattermostEventStream};
pub use config::MattermostConfig;
pub use error::{ApiFailure, ChannelAdapterError};
pub use traits::{DirectoryClient, EventSource};
pub use types::{
    Channel, ChannelKind, ChannelMember, ChannelSpec, Event, OutboundPost, Post, ServerInfo, Team,
    User, MEMBER_ROLE, POST_TYPE_JOIN_CHANNEL,
};
