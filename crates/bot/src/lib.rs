//! Core of the Pillar bot.
//!
//! Owns the session resolved at startup, classifies real-time events from
//! the monitored channel and routes them either to the [`MessageResponder`]
//! or to the [`EnrollmentEngine`], which adds newly joined users to the
//! teams and channels named in configuration. All platform access goes
//! through the `pillar-channel-adapter` traits.

pub mod classify;
pub mod config;
pub mod dispatch;
pub mod enrollment;
pub mod lifecycle;
pub mod reporter;
pub mod responder;
pub mod session;

/// In-memory fakes for tests.
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use classify::{classify, Classification, IgnoreReason, JoinRequest};
pub use config::{BotConfig, ChannelSelection, ConfigError, EnrollmentRule, DEFAULT_CONFIG_PATH};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use enrollment::{EnrollmentEngine, EnrollmentReport, EnrollmentStep, StepKind, StepStatus};
pub use lifecycle::{
    DispatchCounts, Lifecycle, RunExit, RunOutcome, ShutdownHandle, StartupDiagnostics,
    StartupError,
};
pub use reporter::{Severity, StatusEntry, StatusReporter};
pub use responder::{MessageResponder, ReplyChoice, ReplyOutcome};
pub use session::BotSession;
