//! Startup sequencing, the dispatch loop and shutdown.
//!
//! Startup steps are strictly ordered. Connectivity, credentials and the
//! home team are fatal; profile sync and channel resolution only degrade
//! the session. The run loop is bound to a [`ShutdownHandle`] so that an
//! interrupt is an observable transition rather than a process exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pillar_channel_adapter::{
    format_lifecycle_notice, Channel, ChannelAdapterError, ChannelKind, ChannelSpec,
    DirectoryClient, EventSource, OutboundPost, Team, User,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{BotConfig, ConfigError};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::enrollment::EnrollmentEngine;
use crate::reporter::StatusReporter;
use crate::session::BotSession;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Server is unreachable: {0}")]
    Unreachable(#[source] ChannelAdapterError),

    #[error("Failed to log in: {0}")]
    Auth(#[source] ChannelAdapterError),

    #[error("Failed to get team {team}: {source}")]
    HomeTeam {
        team: String,
        #[source]
        source: ChannelAdapterError,
    },

    #[error("Failed to open the event stream: {0}")]
    EventStream(#[source] ChannelAdapterError),
}

/// Operator-facing details of a fatal startup error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupDiagnostics {
    pub message: String,
    pub error_id: String,
    pub detail: String,
}

impl StartupError {
    fn adapter_error(&self) -> Option<&ChannelAdapterError> {
        match self {
            StartupError::Config(_) => None,
            StartupError::Unreachable(e)
            | StartupError::Auth(e)
            | StartupError::EventStream(e)
            | StartupError::HomeTeam { source: e, .. } => Some(e),
        }
    }

    pub fn diagnostics(&self) -> StartupDiagnostics {
        let (error_id, detail) = match self.adapter_error() {
            Some(e) => (e.error_id(), e.detail()),
            None => ("config.invalid".to_string(), self.to_string()),
        };
        StartupDiagnostics {
            message: self.to_string(),
            error_id,
            detail,
        }
    }
}

/// Cooperative shutdown trigger shared with the signal handler.
#[derive(Clone, Default)]
pub struct ShutdownHandle {
    token: CancellationToken,
    stopping: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `true` only for the first request.
    pub fn trigger(&self) -> bool {
        let first = !self.stopping.swap(true, Ordering::SeqCst);
        self.token.cancel();
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The shutdown handle fired.
    Shutdown,
    /// The event source ended on its own.
    StreamEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchCounts {
    pub events: u64,
    pub enrolled: u64,
    pub replied: u64,
    pub ignored: u64,
    pub stream_errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub exit: RunExit,
    pub counts: DispatchCounts,
}

/// A started bot: resolved session plus the components driving it.
pub struct Lifecycle {
    client: Arc<dyn DirectoryClient>,
    session: Arc<BotSession>,
    reporter: Arc<StatusReporter>,
    dispatcher: Dispatcher,
    stopped: AtomicBool,
}

impl Lifecycle {
    /// Verify liveness, log in and resolve the session, then announce startup.
    pub async fn start(
        config: &BotConfig,
        client: Arc<dyn DirectoryClient>,
    ) -> Result<Self, StartupError> {
        let info = client.ping().await.map_err(StartupError::Unreachable)?;
        tracing::info!(
            server = %config.server,
            version = info.version.as_deref().unwrap_or("unknown"),
            "Server detected"
        );

        let identity = client
            .login(&config.email, &config.password)
            .await
            .map_err(StartupError::Auth)?;
        tracing::info!(user = %identity.username, "Logged in");

        let identity = sync_profile(client.as_ref(), config, identity).await;

        let home_team = client
            .get_team_by_name(&config.team)
            .await
            .map_err(|source| StartupError::HomeTeam {
                team: config.team.clone(),
                source,
            })?;

        let mut session = BotSession::new(identity, home_team).with_bot_name(&config.bot_name);

        if let Some(channel) = ensure_debug_channel(client.as_ref(), config, &session.home_team).await {
            session = session.with_debug_channel(channel);
        }

        let monitored_name = config.monitored_channel_name();
        let monitored = match session.debug_channel.as_ref() {
            Some(debug) if debug.name == monitored_name => Some(debug.clone()),
            _ => match client
                .get_channel_by_name(monitored_name, &session.home_team.id)
                .await
            {
                Ok(channel) => Some(channel),
                Err(e) => {
                    tracing::error!(
                        channel = %monitored_name,
                        "Could not resolve monitored channel, events will be ignored: {}",
                        e
                    );
                    None
                }
            },
        };
        if let Some(channel) = monitored {
            session = session.with_monitored_channel(channel);
        }

        let session = Arc::new(session);
        let reporter = Arc::new(StatusReporter::new(
            client.clone(),
            session.debug_channel_id().map(str::to_string),
        ));
        let engine = EnrollmentEngine::new(client.clone(), config.autoadd.clone());
        let dispatcher = Dispatcher::new(session.clone(), client.clone(), engine, reporter.clone());

        let lifecycle = Self {
            client,
            session,
            reporter,
            dispatcher,
            stopped: AtomicBool::new(false),
        };
        lifecycle.announce("started").await;
        Ok(lifecycle)
    }

    pub fn session(&self) -> &BotSession {
        &self.session
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.reporter
    }

    /// Session token for opening the event stream.
    pub fn auth_token(&self) -> Option<String> {
        self.client.auth_token()
    }

    /// Dispatch events one at a time until shutdown or end of stream.
    ///
    /// Shutdown abandons the event being handled.
    pub async fn run(&self, source: &mut dyn EventSource, shutdown: &ShutdownHandle) -> RunOutcome {
        let mut counts = DispatchCounts::default();

        let exit = loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break RunExit::Shutdown,
                next = source.next_event() => next,
            };

            let event = match next {
                None => break RunExit::StreamEnded,
                Some(Err(e)) => {
                    counts.stream_errors += 1;
                    tracing::warn!("Event stream error: {}", e);
                    continue;
                }
                Some(Ok(event)) => event,
            };
            counts.events += 1;

            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break RunExit::Shutdown,
                outcome = self.dispatcher.dispatch(event) => outcome,
            };
            match outcome {
                DispatchOutcome::Enrolled(_) => counts.enrolled += 1,
                DispatchOutcome::Replied { .. } => counts.replied += 1,
                DispatchOutcome::Ignored(_) => counts.ignored += 1,
            }
        };

        tracing::info!(
            exit = ?exit,
            events = counts.events,
            enrolled = counts.enrolled,
            replied = counts.replied,
            "Dispatch loop finished"
        );
        RunOutcome { exit, counts }
    }

    /// Close the event source and post the farewell.
    ///
    /// Only the first call does anything; returns whether this was it.
    pub async fn stop(&self, source: &mut dyn EventSource) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Err(e) = source.close().await {
            tracing::warn!("Failed to close the event stream: {}", e);
        }
        self.announce("stopped").await;
        true
    }

    async fn announce(&self, state: &str) {
        let notice = format_lifecycle_notice(&self.session.bot_name, state);
        match self.session.debug_channel_id() {
            Some(channel_id) => {
                let post = OutboundPost::new(channel_id, notice.as_str());
                if let Err(e) = self.client.create_post(&post).await {
                    tracing::warn!("Failed to announce {} state: {}", state, e);
                }
            }
            None => tracing::info!("{}", notice),
        }
    }
}

/// Push configured profile fields to the server when they differ.
async fn sync_profile(client: &dyn DirectoryClient, config: &BotConfig, identity: User) -> User {
    let wanted = User {
        username: config.username.clone(),
        first_name: config.first_name.clone(),
        last_name: config.last_name.clone(),
        ..identity.clone()
    };
    if wanted == identity {
        return identity;
    }
    match client.update_user(&wanted).await {
        Ok(updated) => {
            tracing::info!(user = %updated.username, "Bot profile updated");
            updated
        }
        Err(e) => {
            tracing::error!("Failed to update bot profile: {}", e);
            identity
        }
    }
}

async fn ensure_debug_channel(
    client: &dyn DirectoryClient,
    config: &BotConfig,
    team: &Team,
) -> Option<Channel> {
    match client.get_channel_by_name(&config.debug_channel, &team.id).await {
        Ok(channel) => return Some(channel),
        Err(e) => tracing::debug!(channel = %config.debug_channel, "Debug channel lookup failed: {}", e),
    }

    let spec = ChannelSpec {
        team_id: team.id.clone(),
        name: config.debug_channel.clone(),
        display_name: format!("Debugging For {}", config.bot_name),
        purpose: format!("Status messages from {}", config.bot_name),
        kind: ChannelKind::Open,
    };
    match client.create_channel(&spec).await {
        Ok(channel) => {
            tracing::info!(channel = %channel.name, "Created debug channel");
            Some(channel)
        }
        Err(e) => {
            tracing::error!(channel = %config.debug_channel, "Could not create debug channel: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailPoint, FakeDirectory, RecordedCall, ScriptedEvents};

    fn config() -> BotConfig {
        BotConfig::from_yaml(
            r#"
email: bot@example.com
password: secret
username: pillar-bot
server: localhost:8065
team: home
debug_channel: bot-debug
"#,
        )
        .unwrap()
    }

    fn directory() -> FakeDirectory {
        FakeDirectory::new()
            .with_login(User {
                id: "bot".to_string(),
                username: "pillar-bot".to_string(),
                ..User::default()
            })
            .with_team("home", "t-home")
            .with_channel("t-home", "bot-debug", "c-dbg")
    }

    #[tokio::test]
    async fn start_resolves_session_and_announces() {
        let directory = Arc::new(directory());
        let lifecycle = Lifecycle::start(&config(), directory.clone()).await.unwrap();

        let session = lifecycle.session();
        assert_eq!(session.home_team.id, "t-home");
        assert_eq!(session.debug_channel_id(), Some("c-dbg"));
        assert!(session.is_monitored("c-dbg"));
        assert_eq!(
            directory.posts(),
            vec![(
                "c-dbg".to_string(),
                "_Pillar Bot has **started** running_".to_string(),
                None
            )]
        );
        assert!(!directory
            .calls()
            .iter()
            .any(|c| matches!(c, RecordedCall::UpdateUser { .. })));
    }

    #[tokio::test]
    async fn missing_debug_channel_is_created() {
        let directory = Arc::new(
            FakeDirectory::new()
                .with_login(User {
                    id: "bot".to_string(),
                    username: "pillar-bot".to_string(),
                    ..User::default()
                })
                .with_team("home", "t-home"),
        );
        let lifecycle = Lifecycle::start(&config(), directory.clone()).await.unwrap();
        assert!(directory.calls().contains(&RecordedCall::CreateChannel {
            name: "bot-debug".to_string(),
            team_id: "t-home".to_string()
        }));
        assert!(lifecycle.session().debug_channel.is_some());
    }

    #[tokio::test]
    async fn profile_sync_failure_is_not_fatal() {
        let directory = Arc::new(
            directory().failing(FailPoint::UpdateUser),
        );
        let mut cfg = config();
        cfg.first_name = "Pillar".to_string();

        let lifecycle = Lifecycle::start(&cfg, directory.clone()).await.unwrap();
        assert_eq!(lifecycle.session().identity.first_name, "");
        assert!(directory.calls().contains(&RecordedCall::UpdateUser {
            user_id: "bot".to_string()
        }));
    }

    #[tokio::test]
    async fn fatal_startup_errors() {
        let err = Lifecycle::start(&config(), Arc::new(directory().failing(FailPoint::Ping)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StartupError::Unreachable(_)));

        let err = Lifecycle::start(&config(), Arc::new(directory().failing(FailPoint::Login)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StartupError::Auth(_)));
        assert_eq!(
            err.diagnostics().error_id,
            "api.user.login.invalid_credentials"
        );

        let err = Lifecycle::start(
            &config(),
            Arc::new(directory().failing(FailPoint::Team("home".to_string()))),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, StartupError::HomeTeam { ref team, .. } if team == "home"));
    }

    #[tokio::test]
    async fn run_ends_with_stream_and_stop_is_idempotent() {
        let directory = Arc::new(directory());
        let lifecycle = Lifecycle::start(&config(), directory.clone()).await.unwrap();
        let mut source = ScriptedEvents::new(vec![
            crate::testing::message_event("c-dbg", "p1", "u1", "hello"),
            crate::testing::message_event("c-other", "p2", "u1", "hello"),
        ])
        .then_error(ChannelAdapterError::Connection("reset".to_string()));
        let closes = source.close_counter();

        let outcome = lifecycle.run(&mut source, &ShutdownHandle::new()).await;
        assert_eq!(outcome.exit, RunExit::StreamEnded);
        assert_eq!(outcome.counts.events, 2);
        assert_eq!(outcome.counts.replied, 1);
        assert_eq!(outcome.counts.ignored, 1);
        assert_eq!(outcome.counts.stream_errors, 1);

        assert!(lifecycle.stop(&mut source).await);
        assert!(!lifecycle.stop(&mut source).await);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        let farewells = directory
            .posts()
            .into_iter()
            .filter(|(_, message, _)| message.contains("**stopped**"))
            .count();
        assert_eq!(farewells, 1);
    }

    #[test]
    fn shutdown_trigger_reports_first_call_only() {
        let handle = ShutdownHandle::new();
        assert!(!handle.is_triggered());
        assert!(handle.trigger());
        assert!(!handle.clone().trigger());
        assert!(handle.is_triggered());
    }
}
