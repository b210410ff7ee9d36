//! In-memory fakes of the platform boundary.
//!
//! [`FakeDirectory`] models a small server (teams, channels, users,
//! memberships) and records every call in order; [`ScriptedEvents`] replays
//! a fixed event sequence. Both are used by unit and integration tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use pillar_channel_adapter::{
    ApiFailure, Channel, ChannelAdapterError, ChannelKind, ChannelMember, ChannelSpec,
    DirectoryClient, Event, EventSource, OutboundPost, Post, ServerInfo, Team, User,
};

/// One call made against [`FakeDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Ping,
    Login { email: String },
    GetTeamByName { name: String },
    GetChannelByName { name: String, team_id: String },
    CreateChannel { name: String, team_id: String },
    CreatePost {
        channel_id: String,
        message: String,
        root_id: Option<String>,
    },
    AddTeamMember { team_id: String, user_id: String },
    AddChannelMember {
        channel_id: String,
        user_id: String,
        role: String,
    },
    ListPublicChannels { team_id: String },
    ListChannelsForUser { team_id: String, user_id: String },
    GetUserByUsername { username: String },
    UpdateUser { user_id: String },
}

/// Call sites that can be made to fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Ping,
    Login,
    /// Team lookup by name.
    Team(String),
    /// Adding any user to the team with this id.
    TeamMember(String),
    /// Channel lookup by name.
    Channel(String),
    /// Adding any user to the channel with this id.
    ChannelMember(String),
    /// Adding a user to the channel with this id never completes.
    StallChannelMember(String),
    /// Public channel listing of the team with this id.
    PublicChannels(String),
    /// Membership listing for the team with this id.
    Memberships(String),
    Posts,
    UpdateUser,
    CreateChannel,
}

#[derive(Default)]
struct DirectoryState {
    login_user: Option<User>,
    users: Vec<User>,
    teams: Vec<Team>,
    channels: Vec<Channel>,
    memberships: Vec<(String, String)>,
    /// Post id to channel id, for root validation.
    posts: HashMap<String, String>,
    failures: HashSet<FailPoint>,
    calls: Vec<RecordedCall>,
    logged_in: bool,
    next_id: usize,
}

/// A small in-memory chat server.
#[derive(Default)]
pub struct FakeDirectory {
    state: Mutex<DirectoryState>,
}

fn injected(what: &str) -> ChannelAdapterError {
    ChannelAdapterError::Api(ApiFailure {
        status_code: 500,
        id: "fake.injected_failure".to_string(),
        message: format!("injected failure: {}", what),
        ..ApiFailure::default()
    })
}

fn not_found(what: &str) -> ChannelAdapterError {
    ChannelAdapterError::NotFound(ApiFailure {
        status_code: 404,
        id: "fake.not_found".to_string(),
        message: format!("{} not found", what),
        ..ApiFailure::default()
    })
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DirectoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Account returned by `login`.
    pub fn with_login(self, user: User) -> Self {
        {
            let mut state = self.state();
            state.users.push(user.clone());
            state.login_user = Some(user);
        }
        self
    }

    pub fn with_user(self, id: &str, username: &str) -> Self {
        self.state().users.push(User {
            id: id.to_string(),
            username: username.to_string(),
            ..User::default()
        });
        self
    }

    pub fn with_team(self, name: &str, id: &str) -> Self {
        self.state().teams.push(Team {
            id: id.to_string(),
            name: name.to_string(),
            display_name: name.to_string(),
        });
        self
    }

    /// Open channel `name` with id `id` in team `team_id`.
    pub fn with_channel(self, team_id: &str, name: &str, id: &str) -> Self {
        self.push_channel(team_id, name, id, ChannelKind::Open)
    }

    pub fn with_private_channel(self, team_id: &str, name: &str, id: &str) -> Self {
        self.push_channel(team_id, name, id, ChannelKind::Private)
    }

    fn push_channel(self, team_id: &str, name: &str, id: &str, kind: ChannelKind) -> Self {
        self.state().channels.push(Channel {
            id: id.to_string(),
            name: name.to_string(),
            display_name: name.to_string(),
            team_id: team_id.to_string(),
            kind,
            delete_at: 0,
        });
        self
    }

    /// Pre-existing membership of `user_id` in `channel_id`.
    pub fn with_membership(self, channel_id: &str, user_id: &str) -> Self {
        self.state()
            .memberships
            .push((channel_id.to_string(), user_id.to_string()));
        self
    }

    /// Existing post `post_id` in `channel_id`.
    pub fn with_post(self, channel_id: &str, post_id: &str) -> Self {
        self.state()
            .posts
            .insert(post_id.to_string(), channel_id.to_string());
        self
    }

    pub fn failing(self, point: FailPoint) -> Self {
        self.state().failures.insert(point);
        self
    }

    pub fn fail_posts(self) -> Self {
        self.failing(FailPoint::Posts)
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    /// Only the membership writes, in order.
    pub fn membership_writes(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    RecordedCall::AddTeamMember { .. } | RecordedCall::AddChannelMember { .. }
                )
            })
            .collect()
    }

    /// `(channel_id, message, root_id)` of every post attempt.
    pub fn posts(&self) -> Vec<(String, String, Option<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::CreatePost {
                    channel_id,
                    message,
                    root_id,
                } => Some((channel_id, message, root_id)),
                _ => None,
            })
            .collect()
    }

    pub fn is_member(&self, channel_id: &str, user_id: &str) -> bool {
        self.state()
            .memberships
            .iter()
            .any(|(c, u)| c == channel_id && u == user_id)
    }

    fn record(&self, call: RecordedCall) -> MutexGuard<'_, DirectoryState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn ping(&self) -> Result<ServerInfo, ChannelAdapterError> {
        let state = self.record(RecordedCall::Ping);
        if state.failures.contains(&FailPoint::Ping) {
            return Err(ChannelAdapterError::Connection(
                "connection refused".to_string(),
            ));
        }
        Ok(ServerInfo {
            version: Some("fake-1.0".to_string()),
            checked_at: chrono::Utc::now(),
        })
    }

    async fn login(&self, email: &str, _password: &str) -> Result<User, ChannelAdapterError> {
        let mut state = self.record(RecordedCall::Login {
            email: email.to_string(),
        });
        if state.failures.contains(&FailPoint::Login) {
            return Err(ChannelAdapterError::Auth(ApiFailure {
                status_code: 401,
                id: "api.user.login.invalid_credentials".to_string(),
                message: "invalid credentials".to_string(),
                ..ApiFailure::default()
            }));
        }
        let user = state.login_user.clone().ok_or_else(|| not_found("login user"))?;
        state.logged_in = true;
        Ok(user)
    }

    fn auth_token(&self) -> Option<String> {
        self.state().logged_in.then(|| "fake-token".to_string())
    }

    async fn get_team_by_name(&self, name: &str) -> Result<Team, ChannelAdapterError> {
        let state = self.record(RecordedCall::GetTeamByName {
            name: name.to_string(),
        });
        if state.failures.contains(&FailPoint::Team(name.to_string())) {
            return Err(injected("team lookup"));
        }
        state
            .teams
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| not_found("team"))
    }

    async fn get_channel_by_name(
        &self,
        name: &str,
        team_id: &str,
    ) -> Result<Channel, ChannelAdapterError> {
        let state = self.record(RecordedCall::GetChannelByName {
            name: name.to_string(),
            team_id: team_id.to_string(),
        });
        if state.failures.contains(&FailPoint::Channel(name.to_string())) {
            return Err(injected("channel lookup"));
        }
        state
            .channels
            .iter()
            .find(|c| c.name == name && c.team_id == team_id)
            .cloned()
            .ok_or_else(|| not_found("channel"))
    }

    async fn create_channel(&self, spec: &ChannelSpec) -> Result<Channel, ChannelAdapterError> {
        let mut state = self.record(RecordedCall::CreateChannel {
            name: spec.name.clone(),
            team_id: spec.team_id.clone(),
        });
        if state.failures.contains(&FailPoint::CreateChannel) {
            return Err(injected("create channel"));
        }
        state.next_id += 1;
        let channel = Channel {
            id: format!("created-{}", state.next_id),
            name: spec.name.clone(),
            display_name: spec.display_name.clone(),
            team_id: spec.team_id.clone(),
            kind: spec.kind,
            delete_at: 0,
        };
        state.channels.push(channel.clone());
        Ok(channel)
    }

    async fn create_post(&self, post: &OutboundPost) -> Result<Post, ChannelAdapterError> {
        let mut state = self.record(RecordedCall::CreatePost {
            channel_id: post.channel_id.clone(),
            message: post.message.clone(),
            root_id: post.root_id.clone(),
        });
        if state.failures.contains(&FailPoint::Posts) {
            return Err(injected("create post"));
        }
        if let Some(root) = post.root_id.as_deref() {
            if matches!(state.posts.get(root), Some(channel) if channel != &post.channel_id) {
                return Err(ChannelAdapterError::Api(ApiFailure {
                    status_code: 400,
                    id: "api.post.create_post.root_id.app_error".to_string(),
                    message: "Invalid RootId parameter.".to_string(),
                    ..ApiFailure::default()
                }));
            }
        }
        state.next_id += 1;
        let id = format!("post-{}", state.next_id);
        state.posts.insert(id.clone(), post.channel_id.clone());
        Ok(Post {
            id,
            channel_id: post.channel_id.clone(),
            message: post.message.clone(),
            root_id: post.root_id.clone().unwrap_or_default(),
            ..Post::default()
        })
    }

    async fn add_team_member(
        &self,
        team_id: &str,
        user_id: &str,
    ) -> Result<(), ChannelAdapterError> {
        let state = self.record(RecordedCall::AddTeamMember {
            team_id: team_id.to_string(),
            user_id: user_id.to_string(),
        });
        if state.failures.contains(&FailPoint::TeamMember(team_id.to_string())) {
            return Err(injected("add team member"));
        }
        Ok(())
    }

    async fn add_channel_member(
        &self,
        channel_id: &str,
        user_id: &str,
        role: &str,
    ) -> Result<ChannelMember, ChannelAdapterError> {
        let stalled = self
            .record(RecordedCall::AddChannelMember {
                channel_id: channel_id.to_string(),
                user_id: user_id.to_string(),
                role: role.to_string(),
            })
            .failures
            .contains(&FailPoint::StallChannelMember(channel_id.to_string()));
        if stalled {
            std::future::pending::<()>().await;
        }
        let mut state = self.state();
        if state
            .failures
            .contains(&FailPoint::ChannelMember(channel_id.to_string()))
        {
            return Err(injected("add channel member"));
        }
        let exists = state
            .memberships
            .iter()
            .any(|(c, u)| c == channel_id && u == user_id);
        if exists {
            return Err(ChannelAdapterError::Conflict(ApiFailure {
                status_code: 409,
                id: "fake.already_member".to_string(),
                message: "already a member".to_string(),
                ..ApiFailure::default()
            }));
        }
        state
            .memberships
            .push((channel_id.to_string(), user_id.to_string()));
        Ok(ChannelMember {
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            roles: role.to_string(),
        })
    }

    async fn list_public_channels(
        &self,
        team_id: &str,
    ) -> Result<Vec<Channel>, ChannelAdapterError> {
        let state = self.record(RecordedCall::ListPublicChannels {
            team_id: team_id.to_string(),
        });
        if state
            .failures
            .contains(&FailPoint::PublicChannels(team_id.to_string()))
        {
            return Err(injected("list public channels"));
        }
        Ok(state
            .channels
            .iter()
            .filter(|c| c.team_id == team_id && c.is_public())
            .cloned()
            .collect())
    }

    async fn list_channels_for_user(
        &self,
        team_id: &str,
        user_id: &str,
    ) -> Result<Vec<Channel>, ChannelAdapterError> {
        let state = self.record(RecordedCall::ListChannelsForUser {
            team_id: team_id.to_string(),
            user_id: user_id.to_string(),
        });
        if state
            .failures
            .contains(&FailPoint::Memberships(team_id.to_string()))
        {
            return Err(injected("list memberships"));
        }
        Ok(state
            .channels
            .iter()
            .filter(|c| {
                c.team_id == team_id
                    && state
                        .memberships
                        .iter()
                        .any(|(ch, u)| ch == &c.id && u == user_id)
            })
            .cloned()
            .collect())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<User, ChannelAdapterError> {
        let state = self.record(RecordedCall::GetUserByUsername {
            username: username.to_string(),
        });
        state
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| not_found("user"))
    }

    async fn update_user(&self, user: &User) -> Result<User, ChannelAdapterError> {
        let mut state = self.record(RecordedCall::UpdateUser {
            user_id: user.id.clone(),
        });
        if state.failures.contains(&FailPoint::UpdateUser) {
            return Err(injected("update user"));
        }
        if let Some(existing) = state.users.iter_mut().find(|u| u.id == user.id) {
            *existing = user.clone();
        }
        Ok(user.clone())
    }
}

/// Replays a fixed sequence of events.
///
/// By default the stream ends after the last event; [`hold_open`](Self::hold_open)
/// makes it wait forever instead, like an idle live connection.
pub struct ScriptedEvents {
    events: VecDeque<Result<Event, ChannelAdapterError>>,
    hold_open: bool,
    closed: bool,
    close_calls: Arc<AtomicUsize>,
}

impl ScriptedEvents {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events: events.into_iter().map(Ok).collect(),
            hold_open: false,
            closed: false,
            close_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Append a transport error to the script.
    pub fn then_error(mut self, error: ChannelAdapterError) -> Self {
        self.events.push_back(Err(error));
        self
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Counter of `close` calls, observable after the source is moved.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        self.close_calls.clone()
    }
}

#[async_trait]
impl EventSource for ScriptedEvents {
    async fn next_event(&mut self) -> Option<Result<Event, ChannelAdapterError>> {
        if self.closed {
            return None;
        }
        match self.events.pop_front() {
            Some(next) => Some(next),
            None if self.hold_open => std::future::pending().await,
            None => None,
        }
    }

    async fn close(&mut self) -> Result<(), ChannelAdapterError> {
        self.closed = true;
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A `posted` event for a plain message.
pub fn message_event(channel_id: &str, post_id: &str, author_id: &str, text: &str) -> Event {
    Event::PostCreated {
        channel_id: channel_id.to_string(),
        post: Post {
            id: post_id.to_string(),
            channel_id: channel_id.to_string(),
            user_id: author_id.to_string(),
            message: text.to_string(),
            ..Post::default()
        },
    }
}

/// A `posted` event for the system join message of `user_id`.
pub fn join_post_event(channel_id: &str, post_id: &str, user_id: &str, username: &str) -> Event {
    Event::PostCreated {
        channel_id: channel_id.to_string(),
        post: Post {
            id: post_id.to_string(),
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            message: format!("{} joined the channel.", username),
            post_type: pillar_channel_adapter::POST_TYPE_JOIN_CHANNEL.to_string(),
            props: serde_json::json!({ "username": username }),
            ..Post::default()
        },
    }
}
